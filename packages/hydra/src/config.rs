use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Control-plane configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub port: u16,
    /// Token granting admin access across all domains. Optional; when unset
    /// every request must carry a domain token.
    pub admin_token: Option<String>,
    /// Domain attributed to admin requests that do not override it.
    pub admin_domain: String,
    /// Heartbeat freshness window used by both dispatch and failover.
    pub heartbeat_ttl: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            admin_token: env::var("ADMIN_TOKEN").ok(),
            admin_domain: env::var("ADMIN_DOMAIN").unwrap_or_else(|_| "admin".to_string()),
            heartbeat_ttl: Duration::from_secs(heartbeat_ttl_seconds()),
        })
    }
}

/// Worker-node configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub domain: String,
    pub domain_token: String,
    pub tags: Vec<String>,
    pub allowed_users: Vec<String>,
    pub queues: Vec<String>,
    pub max_concurrency: usize,
    /// Initial administrative state: online | draining | disabled.
    pub state: String,
    pub deployment_type: String,
    pub hostname: String,
    pub ip: String,
    pub subnet: String,
    pub run_user: String,
    pub redis_url: String,
    pub database_url: String,
    pub heartbeat_ttl: Duration,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        let domain_token = env::var("WORKER_DOMAIN_TOKEN")
            .or_else(|_| env::var("API_TOKEN"))
            .context("WORKER_DOMAIN_TOKEN (or API_TOKEN) must be set")?;

        Ok(Self {
            worker_id: env::var("WORKER_ID").unwrap_or_else(|_| default_worker_id()),
            domain: env::var("WORKER_DOMAIN").unwrap_or_else(|_| "prod".to_string()),
            domain_token,
            tags: split_csv(&env::var("WORKER_TAGS").unwrap_or_default()),
            allowed_users: split_csv(&env::var("ALLOWED_USERS").unwrap_or_default()),
            queues: {
                let queues = split_csv(&env::var("WORKER_QUEUES").unwrap_or_default());
                if queues.is_empty() {
                    vec!["default".to_string()]
                } else {
                    queues
                }
            },
            max_concurrency: env::var("MAX_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2usize)
                .max(1),
            state: normalize_state(&env::var("WORKER_STATE").unwrap_or_default()),
            deployment_type: env::var("DEPLOYMENT_TYPE").unwrap_or_default(),
            hostname: env::var("HOSTNAME").unwrap_or_default(),
            ip: env::var("WORKER_IP").unwrap_or_default(),
            subnet: env::var("WORKER_SUBNET").unwrap_or_default(),
            run_user: env::var("USER")
                .or_else(|_| env::var("USERNAME"))
                .unwrap_or_default(),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            heartbeat_ttl: Duration::from_secs(heartbeat_ttl_seconds()),
        })
    }
}

fn heartbeat_ttl_seconds() -> u64 {
    env::var("SCHEDULER_HEARTBEAT_TTL")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10)
}

/// Stable identity so a reconnecting worker reclaims its metadata hash.
fn default_worker_id() -> String {
    let host = env::var("HOSTNAME").unwrap_or_else(|_| "host".to_string());
    format!("worker-{}-{}", host, std::process::id())
}

/// Split a comma-separated list, trimming whitespace and dropping empties.
pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

fn normalize_state(value: &str) -> String {
    let state = value.trim().to_lowercase();
    match state.as_str() {
        "online" | "draining" | "disabled" => state,
        _ => "online".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_csv_trims_and_drops_empties() {
        assert_eq!(split_csv("gpu, linux ,,x86"), vec!["gpu", "linux", "x86"]);
        assert!(split_csv("").is_empty());
        assert!(split_csv(" , ,").is_empty());
    }

    #[test]
    fn unknown_worker_state_falls_back_to_online() {
        assert_eq!(normalize_state("DRAINING"), "draining");
        assert_eq!(normalize_state("paused"), "online");
        assert_eq!(normalize_state(""), "online");
    }

    #[test]
    fn default_worker_id_includes_pid() {
        let id = default_worker_id();
        assert!(id.starts_with("worker-"));
        assert!(id.ends_with(&std::process::id().to_string()));
    }
}
