//! Job definition model: the executable recipe submitted by users.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::schedule;

// ============================================================================
// Nested configuration blocks (stored as JSONB)
// ============================================================================

/// Worker eligibility constraints. Empty lists are wildcards.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Affinity {
    #[serde(default)]
    pub os: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub allowed_users: Vec<String>,
    #[serde(default)]
    pub hostnames: Vec<String>,
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub deployment_types: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
    #[default]
    Immediate,
    Cron,
    Interval,
}

impl ScheduleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleMode::Immediate => "immediate",
            ScheduleMode::Cron => "cron",
            ScheduleMode::Interval => "interval",
        }
    }

    /// Whether the schedule ticker drives this mode.
    pub fn is_recurring(&self) -> bool {
        matches!(self, ScheduleMode::Cron | ScheduleMode::Interval)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub mode: ScheduleMode,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub interval_seconds: Option<i64>,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            mode: ScheduleMode::Immediate,
            cron: None,
            interval_seconds: None,
            start_at: None,
            end_at: None,
            next_run_at: None,
            timezone: default_timezone(),
            enabled: true,
        }
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_true() -> bool {
    true
}

/// Predicates over exit code and output text that decide run success.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionCriteria {
    #[serde(default = "default_exit_codes")]
    pub exit_codes: Vec<i32>,
    #[serde(default)]
    pub stdout_contains: Vec<String>,
    #[serde(default)]
    pub stdout_not_contains: Vec<String>,
    #[serde(default)]
    pub stderr_contains: Vec<String>,
    #[serde(default)]
    pub stderr_not_contains: Vec<String>,
}

impl Default for CompletionCriteria {
    fn default() -> Self {
        Self {
            exit_codes: default_exit_codes(),
            stdout_contains: Vec::new(),
            stdout_not_contains: Vec::new(),
            stderr_contains: Vec::new(),
            stderr_not_contains: Vec::new(),
        }
    }
}

fn default_exit_codes() -> Vec<i32> {
    vec![0]
}

/// Optional git source checked out before execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub url: String,
    #[serde(default = "default_ref", rename = "ref")]
    pub git_ref: String,
    /// Optional sub-directory of the checkout used as the base workdir.
    #[serde(default)]
    pub path: Option<String>,
}

fn default_protocol() -> String {
    "git".to_string()
}

fn default_ref() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PythonEnvironmentKind {
    #[default]
    System,
    Venv,
    Uv,
}

/// Interpreter environment preparation for python executors.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PythonEnvironment {
    #[serde(default, rename = "type")]
    pub kind: PythonEnvironmentKind,
    #[serde(default)]
    pub python_version: Option<String>,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub requirements_file: Option<String>,
    #[serde(default)]
    pub venv_path: Option<String>,
}

/// Executor variants, discriminated by `type` in the wire format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExecutorConfig {
    Shell {
        script: String,
        #[serde(default = "default_shell")]
        shell: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        workdir: Option<String>,
    },
    Batch {
        script: String,
        #[serde(default = "default_batch_shell")]
        shell: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        workdir: Option<String>,
    },
    Python {
        code: String,
        #[serde(default = "default_interpreter")]
        interpreter: String,
        #[serde(default)]
        environment: PythonEnvironment,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        workdir: Option<String>,
    },
    External {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        workdir: Option<String>,
    },
}

fn default_shell() -> String {
    "bash".to_string()
}

fn default_batch_shell() -> String {
    "cmd".to_string()
}

fn default_interpreter() -> String {
    "python3".to_string()
}

impl ExecutorConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            ExecutorConfig::Shell { .. } => "shell",
            ExecutorConfig::Batch { .. } => "batch",
            ExecutorConfig::Python { .. } => "python",
            ExecutorConfig::External { .. } => "external",
        }
    }

    pub fn args(&self) -> &[String] {
        match self {
            ExecutorConfig::Shell { args, .. }
            | ExecutorConfig::Batch { args, .. }
            | ExecutorConfig::Python { args, .. }
            | ExecutorConfig::External { args, .. } => args,
        }
    }

    pub fn env(&self) -> &HashMap<String, String> {
        match self {
            ExecutorConfig::Shell { env, .. }
            | ExecutorConfig::Batch { env, .. }
            | ExecutorConfig::Python { env, .. }
            | ExecutorConfig::External { env, .. } => env,
        }
    }

    pub fn workdir(&self) -> Option<&str> {
        match self {
            ExecutorConfig::Shell { workdir, .. }
            | ExecutorConfig::Batch { workdir, .. }
            | ExecutorConfig::Python { workdir, .. }
            | ExecutorConfig::External { workdir, .. } => workdir.as_deref(),
        }
    }
}

// ============================================================================
// Job definition model
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct JobDefinition {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    #[builder(setter(into))]
    pub name: String,
    #[builder(default = "prod".to_string(), setter(into))]
    pub domain: String,
    #[serde(rename = "user")]
    #[builder(default, setter(into))]
    pub job_user: String,

    #[builder(default = 5)]
    pub priority: i32,
    #[builder(default = 0)]
    pub retries: i32,
    #[serde(rename = "timeout")]
    #[builder(default = 0)]
    pub timeout_seconds: i64,

    #[builder(default, setter(strip_option))]
    pub source: Option<Json<SourceConfig>>,
    #[builder(default = Json(Affinity::default()))]
    pub affinity: Json<Affinity>,
    pub executor: Json<ExecutorConfig>,
    #[builder(default = Json(CompletionCriteria::default()))]
    pub completion: Json<CompletionCriteria>,
    #[builder(default = Json(ScheduleConfig::default()))]
    pub schedule: Json<ScheduleConfig>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, name, domain, job_user, priority, retries, timeout_seconds, \
                       source, affinity, executor, completion, schedule, created_at, updated_at";

impl JobDefinition {
    pub async fn find_by_id(id: Uuid, db: &PgPool) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM job_definitions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;

        Ok(job)
    }

    /// List definitions, scoped to a domain unless `domain` is `None` (admin).
    pub async fn list(domain: Option<&str>, db: &PgPool) -> Result<Vec<Self>> {
        let jobs = match domain {
            Some(d) => {
                sqlx::query_as::<_, Self>(&format!(
                    "SELECT {COLUMNS} FROM job_definitions WHERE domain = $1 ORDER BY created_at DESC"
                ))
                .bind(d)
                .fetch_all(db)
                .await?
            }
            None => {
                sqlx::query_as::<_, Self>(&format!(
                    "SELECT {COLUMNS} FROM job_definitions ORDER BY created_at DESC"
                ))
                .fetch_all(db)
                .await?
            }
        };

        Ok(jobs)
    }

    pub async fn insert(&self, db: &PgPool) -> Result<Self> {
        let schedule = &self.schedule.0;
        let job = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO job_definitions (
                id, name, domain, job_user, priority, retries, timeout_seconds,
                source, affinity, executor, completion, schedule,
                schedule_mode, schedule_enabled, next_run_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(self.id)
        .bind(&self.name)
        .bind(&self.domain)
        .bind(&self.job_user)
        .bind(self.priority)
        .bind(self.retries)
        .bind(self.timeout_seconds)
        .bind(&self.source)
        .bind(&self.affinity)
        .bind(&self.executor)
        .bind(&self.completion)
        .bind(&self.schedule)
        .bind(schedule.mode.as_str())
        .bind(schedule.enabled)
        .bind(schedule.next_run_at)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_one(db)
        .await?;

        Ok(job)
    }

    pub async fn update(&self, db: &PgPool) -> Result<Self> {
        let schedule = &self.schedule.0;
        let job = sqlx::query_as::<_, Self>(&format!(
            r#"
            UPDATE job_definitions SET
                name = $1, domain = $2, job_user = $3, priority = $4, retries = $5,
                timeout_seconds = $6, source = $7, affinity = $8, executor = $9,
                completion = $10, schedule = $11,
                schedule_mode = $12, schedule_enabled = $13, next_run_at = $14,
                updated_at = NOW()
            WHERE id = $15
            RETURNING {COLUMNS}
            "#
        ))
        .bind(&self.name)
        .bind(&self.domain)
        .bind(&self.job_user)
        .bind(self.priority)
        .bind(self.retries)
        .bind(self.timeout_seconds)
        .bind(&self.source)
        .bind(&self.affinity)
        .bind(&self.executor)
        .bind(&self.completion)
        .bind(&self.schedule)
        .bind(schedule.mode.as_str())
        .bind(schedule.enabled)
        .bind(schedule.next_run_at)
        .bind(self.id)
        .fetch_one(db)
        .await?;

        Ok(job)
    }

    pub async fn find_many(ids: &[Uuid], db: &PgPool) -> Result<Vec<Self>> {
        let jobs = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM job_definitions WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(db)
        .await?;

        Ok(jobs)
    }

    /// Recurring jobs whose next fire time has arrived.
    pub async fn find_due(
        domain: &str,
        now: DateTime<Utc>,
        limit: i64,
        db: &PgPool,
    ) -> Result<Vec<Self>> {
        let jobs = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {COLUMNS} FROM job_definitions
            WHERE domain = $1
              AND schedule_mode IN ('cron', 'interval')
              AND schedule_enabled
              AND next_run_at IS NOT NULL
              AND next_run_at <= $2
            ORDER BY next_run_at
            LIMIT $3
            "#
        ))
        .bind(domain)
        .bind(now)
        .bind(limit)
        .fetch_all(db)
        .await?;

        Ok(jobs)
    }

    /// Enabled recurring jobs whose next fire time is in the future.
    pub async fn find_upcoming(
        domain: Option<&str>,
        now: DateTime<Utc>,
        limit: i64,
        db: &PgPool,
    ) -> Result<Vec<Self>> {
        let jobs = match domain {
            Some(d) => {
                sqlx::query_as::<_, Self>(&format!(
                    r#"
                    SELECT {COLUMNS} FROM job_definitions
                    WHERE domain = $1 AND schedule_enabled AND next_run_at > $2
                    ORDER BY next_run_at
                    LIMIT $3
                    "#
                ))
                .bind(d)
                .bind(now)
                .bind(limit)
                .fetch_all(db)
                .await?
            }
            None => {
                sqlx::query_as::<_, Self>(&format!(
                    r#"
                    SELECT {COLUMNS} FROM job_definitions
                    WHERE schedule_enabled AND next_run_at > $1
                    ORDER BY next_run_at
                    LIMIT $2
                    "#
                ))
                .bind(now)
                .bind(limit)
                .fetch_all(db)
                .await?
            }
        };

        Ok(jobs)
    }

    /// Compare-and-set schedule advancement.
    ///
    /// Updates the schedule only if `next_run_at` still equals the value this
    /// ticker read, so concurrent tickers advance a due instant exactly once.
    /// Returns `false` when another ticker won.
    pub async fn advance_schedule_cas(
        id: Uuid,
        expected_next_run_at: DateTime<Utc>,
        advanced: &ScheduleConfig,
        db: &PgPool,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_definitions
            SET schedule = $1, schedule_enabled = $2, next_run_at = $3, updated_at = NOW()
            WHERE id = $4 AND next_run_at = $5
            "#,
        )
        .bind(Json(advanced))
        .bind(advanced.enabled)
        .bind(advanced.next_run_at)
        .bind(id)
        .bind(expected_next_run_at)
        .execute(db)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// API payloads and validation
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCreate {
    pub name: String,
    #[serde(default, rename = "user")]
    pub job_user: String,
    #[serde(default)]
    pub source: Option<SourceConfig>,
    #[serde(default)]
    pub affinity: Affinity,
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub retries: i32,
    #[serde(default, rename = "timeout")]
    pub timeout_seconds: i64,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub completion: CompletionCriteria,
}

fn default_priority() -> i32 {
    5
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobUpdate {
    pub name: Option<String>,
    #[serde(default, rename = "user")]
    pub job_user: Option<String>,
    pub source: Option<SourceConfig>,
    pub affinity: Option<Affinity>,
    pub executor: Option<ExecutorConfig>,
    pub retries: Option<i32>,
    #[serde(rename = "timeout")]
    pub timeout_seconds: Option<i64>,
    pub priority: Option<i32>,
    pub schedule: Option<ScheduleConfig>,
    pub completion: Option<CompletionCriteria>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl JobCreate {
    /// Validate the payload; collects every error rather than stopping at the
    /// first. A valid result carries the schedule's initial fire time.
    pub fn validate(&self, now: DateTime<Utc>) -> JobValidationResult {
        let mut errors = Vec::new();

        match &self.executor {
            ExecutorConfig::Shell { script, .. } => {
                if script.trim().is_empty() {
                    errors.push("shell executor requires a non-empty script".to_string());
                }
            }
            ExecutorConfig::Batch { script, .. } => {
                if script.trim().is_empty() {
                    errors.push("batch executor requires a non-empty script".to_string());
                }
            }
            ExecutorConfig::Python {
                code, environment, ..
            } => {
                if code.trim().is_empty() {
                    errors.push("python executor requires non-empty code".to_string());
                }
                if environment.venv_path.is_some()
                    && environment.kind != PythonEnvironmentKind::Venv
                {
                    errors.push(
                        "environment.venv_path is only valid when environment.type = \"venv\""
                            .to_string(),
                    );
                }
            }
            ExecutorConfig::External { command, .. } => {
                if command.trim().is_empty() {
                    errors.push("external executor requires a non-empty command".to_string());
                }
            }
        }

        let next_run_at = match schedule::initialize(&self.schedule, now) {
            Ok(initialized) => initialized.next_run_at,
            Err(e) => {
                errors.push(e.to_string());
                None
            }
        };

        if !(1..=10).contains(&self.priority) {
            errors.push(format!("priority {} outside range 1-10", self.priority));
        }
        if self.retries < 0 {
            errors.push("retries must be >= 0".to_string());
        }
        if self.timeout_seconds < 0 {
            errors.push("timeout must be >= 0".to_string());
        }

        JobValidationResult {
            valid: errors.is_empty(),
            errors,
            next_run_at,
        }
    }

    /// Build a definition in `domain` with an already-initialized schedule.
    pub fn into_definition(self, domain: String, schedule: ScheduleConfig) -> JobDefinition {
        let now = Utc::now();
        JobDefinition {
            id: Uuid::new_v4(),
            name: self.name,
            domain,
            job_user: self.job_user,
            priority: self.priority,
            retries: self.retries,
            timeout_seconds: self.timeout_seconds,
            source: self.source.map(Json),
            affinity: Json(self.affinity),
            executor: Json(self.executor),
            completion: Json(self.completion),
            schedule: Json(schedule),
            created_at: now,
            updated_at: now,
        }
    }
}

impl JobDefinition {
    /// Apply a partial update to the definition in place.
    pub fn apply_update(&mut self, update: JobUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(user) = update.job_user {
            self.job_user = user;
        }
        if let Some(source) = update.source {
            self.source = Some(Json(source));
        }
        if let Some(affinity) = update.affinity {
            self.affinity = Json(affinity);
        }
        if let Some(executor) = update.executor {
            self.executor = Json(executor);
        }
        if let Some(retries) = update.retries {
            self.retries = retries;
        }
        if let Some(timeout) = update.timeout_seconds {
            self.timeout_seconds = timeout;
        }
        if let Some(priority) = update.priority {
            self.priority = priority;
        }
        if let Some(schedule) = update.schedule {
            self.schedule = Json(schedule);
        }
        if let Some(completion) = update.completion {
            self.completion = Json(completion);
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_create(script: &str) -> JobCreate {
        JobCreate {
            name: "hi".to_string(),
            job_user: "alice".to_string(),
            source: None,
            affinity: Affinity::default(),
            executor: ExecutorConfig::Shell {
                script: script.to_string(),
                shell: "bash".to_string(),
                args: vec![],
                env: HashMap::new(),
                workdir: None,
            },
            retries: 0,
            timeout_seconds: 0,
            priority: 5,
            schedule: ScheduleConfig::default(),
            completion: CompletionCriteria::default(),
        }
    }

    #[test]
    fn executor_deserializes_by_type_tag() {
        let value: ExecutorConfig =
            serde_json::from_str(r#"{"type": "shell", "script": "echo ok"}"#).unwrap();
        assert_eq!(value.type_name(), "shell");
        match value {
            ExecutorConfig::Shell { script, shell, .. } => {
                assert_eq!(script, "echo ok");
                assert_eq!(shell, "bash");
            }
            other => panic!("expected shell executor, got {}", other.type_name()),
        }
    }

    #[test]
    fn python_executor_defaults() {
        let value: ExecutorConfig =
            serde_json::from_str(r#"{"type": "python", "code": "print(1)"}"#).unwrap();
        match value {
            ExecutorConfig::Python {
                interpreter,
                environment,
                ..
            } => {
                assert_eq!(interpreter, "python3");
                assert_eq!(environment.kind, PythonEnvironmentKind::System);
            }
            other => panic!("expected python executor, got {}", other.type_name()),
        }
    }

    #[test]
    fn completion_criteria_defaults_exit_code_zero() {
        let criteria: CompletionCriteria = serde_json::from_str("{}").unwrap();
        assert_eq!(criteria.exit_codes, vec![0]);
    }

    #[test]
    fn validate_accepts_basic_shell_job() {
        let result = shell_create("echo ok").validate(Utc::now());
        assert!(result.valid, "errors: {:?}", result.errors);
        assert!(result.next_run_at.is_none());
    }

    #[test]
    fn validate_rejects_empty_script() {
        let result = shell_create("  ").validate(Utc::now());
        assert!(!result.valid);
        assert!(result.errors[0].contains("script"));
    }

    #[test]
    fn validate_rejects_out_of_range_priority() {
        let mut create = shell_create("echo ok");
        create.priority = 11;
        let result = create.validate(Utc::now());
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("priority")));
    }

    #[test]
    fn validate_rejects_venv_path_without_venv_type() {
        let mut create = shell_create("unused");
        create.executor = ExecutorConfig::Python {
            code: "print(1)".to_string(),
            interpreter: "python3".to_string(),
            environment: PythonEnvironment {
                kind: PythonEnvironmentKind::System,
                venv_path: Some("/opt/venv".to_string()),
                ..Default::default()
            },
            args: vec![],
            env: HashMap::new(),
            workdir: None,
        };
        let result = create.validate(Utc::now());
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("venv_path")));
    }

    #[test]
    fn validate_rejects_bad_cron() {
        let mut create = shell_create("echo ok");
        create.schedule = ScheduleConfig {
            mode: ScheduleMode::Cron,
            cron: Some("not a cron".to_string()),
            ..Default::default()
        };
        let result = create.validate(Utc::now());
        assert!(!result.valid);
    }

    #[test]
    fn validate_revalidation_is_stable() {
        let create = shell_create("echo ok");
        let first = create.validate(Utc::now());
        let json = serde_json::to_string(&create).unwrap();
        let reread: JobCreate = serde_json::from_str(&json).unwrap();
        let second = reread.validate(Utc::now());
        assert_eq!(first.valid, second.valid);
        assert_eq!(first.errors, second.errors);
    }

    #[test]
    fn into_definition_uses_token_domain() {
        let create = shell_create("echo ok");
        let schedule = ScheduleConfig::default();
        let def = create.into_definition("team-a".to_string(), schedule);
        assert_eq!(def.domain, "team-a");
        assert_eq!(def.priority, 5);
        assert_eq!(def.executor.0.type_name(), "shell");
    }

    #[test]
    fn source_ref_defaults_to_main() {
        let source: SourceConfig =
            serde_json::from_str(r#"{"url": "https://example.com/repo.git"}"#).unwrap();
        assert_eq!(source.git_ref, "main");
        assert_eq!(source.protocol, "git");
    }
}
