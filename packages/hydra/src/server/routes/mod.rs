pub mod admin;
pub mod events;
pub mod health;
pub mod jobs;
pub mod queue;
pub mod runs;
pub mod workers;
