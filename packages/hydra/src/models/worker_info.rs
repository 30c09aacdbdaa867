//! Worker registration record.
//!
//! Workers live in Redis hashes, not the durable store; this type owns the
//! mapping between the hash fields and a typed view the dispatcher and API
//! can reason about.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::split_csv;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub worker_id: String,
    pub domain: String,
    pub os: String,
    pub tags: Vec<String>,
    pub allowed_users: Vec<String>,
    pub queues: Vec<String>,
    pub max_concurrency: i64,
    pub current_running: i64,
    /// Liveness as last observed: online | offline.
    pub status: String,
    /// Administrative state: online | draining | disabled.
    pub state: String,
    pub hostname: String,
    pub ip: String,
    pub subnet: String,
    pub deployment_type: String,
    pub run_user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_token_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<f64>,
    #[serde(default)]
    pub running_jobs: Vec<String>,
}

impl WorkerInfo {
    /// Decode a `workers:{domain}:{id}` hash.
    pub fn from_hash(domain: &str, worker_id: &str, fields: &HashMap<String, String>) -> Self {
        let get = |key: &str| fields.get(key).cloned().unwrap_or_default();
        let get_int = |key: &str, default: i64| {
            fields
                .get(key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };

        Self {
            worker_id: worker_id.to_string(),
            domain: domain.to_string(),
            os: get("os"),
            tags: split_csv(&get("tags")),
            allowed_users: split_csv(&get("allowed_users")),
            queues: split_csv(&get("queues")),
            max_concurrency: get_int("max_concurrency", 1),
            current_running: get_int("current_running", 0),
            status: non_empty_or(get("status"), "online"),
            state: non_empty_or(get("state"), "online"),
            hostname: get("hostname"),
            ip: get("ip"),
            subnet: get("subnet"),
            deployment_type: get("deployment_type"),
            run_user: get("run_user"),
            cpu_count: fields.get("cpu_count").and_then(|v| v.parse().ok()),
            pid: fields.get("pid").and_then(|v| v.parse().ok()),
            domain_token_hash: fields.get("domain_token_hash").cloned(),
            last_heartbeat: None,
            running_jobs: Vec::new(),
        }
    }

    /// Encode registration fields for the worker hash.
    pub fn to_hash(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("os".to_string(), self.os.clone()),
            ("tags".to_string(), self.tags.join(",")),
            ("allowed_users".to_string(), self.allowed_users.join(",")),
            ("queues".to_string(), self.queues.join(",")),
            (
                "max_concurrency".to_string(),
                self.max_concurrency.to_string(),
            ),
            (
                "current_running".to_string(),
                self.current_running.to_string(),
            ),
            ("status".to_string(), self.status.clone()),
            ("state".to_string(), self.state.clone()),
            ("hostname".to_string(), self.hostname.clone()),
            ("ip".to_string(), self.ip.clone()),
            ("subnet".to_string(), self.subnet.clone()),
            (
                "deployment_type".to_string(),
                self.deployment_type.clone(),
            ),
            ("run_user".to_string(), self.run_user.clone()),
        ];
        if let Some(cpu_count) = self.cpu_count {
            fields.push(("cpu_count".to_string(), cpu_count.to_string()));
        }
        if let Some(pid) = self.pid {
            fields.push(("pid".to_string(), pid.to_string()));
        }
        if let Some(hash) = &self.domain_token_hash {
            fields.push(("domain_token_hash".to_string(), hash.clone()));
        }
        fields
    }

    pub fn has_free_slot(&self) -> bool {
        self.current_running < self.max_concurrency
    }

    /// Heartbeat freshness against the TTL window.
    pub fn is_alive(&self, now: DateTime<Utc>, ttl_seconds: u64) -> bool {
        match self.last_heartbeat {
            Some(beat) => now.timestamp() as f64 - beat <= ttl_seconds as f64,
            None => false,
        }
    }
}

fn non_empty_or(value: String, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hash() -> HashMap<String, String> {
        [
            ("os", "linux"),
            ("tags", "gpu,x86"),
            ("allowed_users", ""),
            ("queues", "default"),
            ("max_concurrency", "4"),
            ("current_running", "2"),
            ("state", "online"),
            ("hostname", "node-1"),
            ("ip", "10.0.1.7"),
            ("subnet", "10.0.1"),
            ("deployment_type", "bare"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn from_hash_parses_fields() {
        let info = WorkerInfo::from_hash("prod", "worker-1", &sample_hash());
        assert_eq!(info.worker_id, "worker-1");
        assert_eq!(info.domain, "prod");
        assert_eq!(info.tags, vec!["gpu", "x86"]);
        assert!(info.allowed_users.is_empty());
        assert_eq!(info.max_concurrency, 4);
        assert_eq!(info.current_running, 2);
        assert!(info.has_free_slot());
    }

    #[test]
    fn from_hash_defaults_missing_fields() {
        let info = WorkerInfo::from_hash("prod", "worker-1", &HashMap::new());
        assert_eq!(info.max_concurrency, 1);
        assert_eq!(info.current_running, 0);
        assert_eq!(info.status, "online");
        assert_eq!(info.state, "online");
    }

    #[test]
    fn hash_roundtrip_preserves_fields() {
        let mut info = WorkerInfo::from_hash("prod", "worker-1", &sample_hash());
        info.domain_token_hash = Some("abc123".to_string());
        let encoded: HashMap<String, String> = info.to_hash().into_iter().collect();
        let decoded = WorkerInfo::from_hash("prod", "worker-1", &encoded);
        assert_eq!(decoded.tags, info.tags);
        assert_eq!(decoded.max_concurrency, info.max_concurrency);
        assert_eq!(decoded.domain_token_hash, info.domain_token_hash);
    }

    #[test]
    fn full_worker_has_no_free_slot() {
        let mut fields = sample_hash();
        fields.insert("current_running".to_string(), "4".to_string());
        let info = WorkerInfo::from_hash("prod", "worker-1", &fields);
        assert!(!info.has_free_slot());
    }

    #[test]
    fn aliveness_honors_ttl() {
        let mut info = WorkerInfo::from_hash("prod", "worker-1", &sample_hash());
        let now = Utc::now();
        assert!(!info.is_alive(now, 10));

        info.last_heartbeat = Some(now.timestamp() as f64 - 3.0);
        assert!(info.is_alive(now, 10));

        info.last_heartbeat = Some(now.timestamp() as f64 - 30.0);
        assert!(!info.is_alive(now, 10));
    }
}
