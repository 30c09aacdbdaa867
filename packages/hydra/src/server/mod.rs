// HTTP API surface for the control plane.

pub mod app;
pub mod auth;
pub mod error;
pub mod routes;

pub use app::{build_app, AppState};
pub use auth::AuthContext;
pub use error::ApiError;
