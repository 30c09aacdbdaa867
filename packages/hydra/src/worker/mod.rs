// Worker runtime: per-node process that executes dispatched jobs.

pub mod completion;
pub mod executor;
pub mod git_source;
pub mod python_env;
pub mod runtime;

pub use runtime::WorkerRuntime;
