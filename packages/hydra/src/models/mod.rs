// Data model layer.
//
// Job definitions, run history and domain metadata live in PostgreSQL and
// carry their own SQL. Worker records live in Redis hashes and map through
// `WorkerInfo`.

pub mod domain;
pub mod job_definition;
pub mod job_run;
pub mod worker_info;

pub use domain::Domain;
pub use job_definition::{
    Affinity, CompletionCriteria, ExecutorConfig, JobCreate, JobDefinition, JobUpdate,
    JobValidationResult, PythonEnvironment, PythonEnvironmentKind, ScheduleConfig, ScheduleMode,
    SourceConfig,
};
pub use job_run::{JobRun, RunStatus};
pub use worker_info::WorkerInfo;
