//! Affinity predicates: which workers may run a job.
//!
//! Every check is a conjunction and every empty allow-list is a wildcard, so
//! adding entries can only shrink the candidate set. Comparisons are
//! case-insensitive except subnets, which match as literal prefixes.

use crate::models::{JobDefinition, WorkerInfo};

fn eq_ignore_case(list: &[String], value: &str) -> bool {
    list.iter().any(|item| item.eq_ignore_ascii_case(value))
}

pub fn os_matches(job_oses: &[String], worker_os: &str) -> bool {
    job_oses.is_empty() || eq_ignore_case(job_oses, worker_os)
}

/// All job tags must be present on the worker.
pub fn tags_match(job_tags: &[String], worker_tags: &[String]) -> bool {
    job_tags
        .iter()
        .all(|tag| eq_ignore_case(worker_tags, tag))
}

pub fn user_allowed(job_user: &str, allowed_users: &[String]) -> bool {
    allowed_users.is_empty() || eq_ignore_case(allowed_users, job_user)
}

pub fn hostname_allowed(hostnames: &[String], worker_hostname: &str) -> bool {
    hostnames.is_empty() || eq_ignore_case(hostnames, worker_hostname)
}

/// Subnet entries match as a literal prefix of the worker's IP or an exact
/// match of its registered subnet string.
pub fn subnet_allowed(subnets: &[String], worker_ip: &str, worker_subnet: &str) -> bool {
    subnets.is_empty()
        || subnets
            .iter()
            .any(|subnet| worker_ip.starts_with(subnet.as_str()) || worker_subnet == *subnet)
}

pub fn deployment_allowed(deployment_types: &[String], worker_deployment: &str) -> bool {
    deployment_types.is_empty() || eq_ignore_case(deployment_types, worker_deployment)
}

pub fn passes_affinity(job: &JobDefinition, worker: &WorkerInfo) -> bool {
    let affinity = &job.affinity.0;
    os_matches(&affinity.os, &worker.os)
        && tags_match(&affinity.tags, &worker.tags)
        && user_allowed(&job.job_user, &worker.allowed_users)
        && hostname_allowed(&affinity.hostnames, &worker.hostname)
        && subnet_allowed(&affinity.subnets, &worker.ip, &worker.subnet)
        && deployment_allowed(&affinity.deployment_types, &worker.deployment_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Affinity, ExecutorConfig, JobDefinition};
    use sqlx::types::Json;
    use std::collections::HashMap;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn job_with_affinity(affinity: Affinity, user: &str) -> JobDefinition {
        JobDefinition::builder()
            .name("j")
            .job_user(user)
            .affinity(Json(affinity))
            .executor(Json(ExecutorConfig::Shell {
                script: "echo ok".to_string(),
                shell: "bash".to_string(),
                args: vec![],
                env: HashMap::new(),
                workdir: None,
            }))
            .build()
    }

    fn worker() -> WorkerInfo {
        WorkerInfo::from_hash(
            "prod",
            "w1",
            &[
                ("os", "linux"),
                ("tags", "cpu,x86"),
                ("hostname", "node-1"),
                ("ip", "10.0.1.7"),
                ("subnet", "10.0.1"),
                ("deployment_type", "bare"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        )
    }

    #[test]
    fn empty_lists_are_wildcards() {
        let job = job_with_affinity(Affinity::default(), "alice");
        assert!(passes_affinity(&job, &worker()));
    }

    #[test]
    fn os_comparison_is_case_insensitive() {
        assert!(os_matches(&strings(&["Linux"]), "linux"));
        assert!(!os_matches(&strings(&["windows"]), "linux"));
    }

    #[test]
    fn all_job_tags_must_be_present() {
        let worker_tags = strings(&["cpu", "x86"]);
        assert!(tags_match(&strings(&["CPU"]), &worker_tags));
        assert!(tags_match(&[], &worker_tags));
        assert!(!tags_match(&strings(&["cpu", "gpu"]), &worker_tags));
    }

    #[test]
    fn gpu_job_rejected_by_cpu_worker() {
        let job = job_with_affinity(
            Affinity {
                tags: strings(&["gpu"]),
                ..Default::default()
            },
            "alice",
        );
        assert!(!passes_affinity(&job, &worker()));
    }

    #[test]
    fn user_allow_list_restricts() {
        assert!(user_allowed("alice", &[]));
        assert!(user_allowed("Alice", &strings(&["alice"])));
        assert!(!user_allowed("mallory", &strings(&["alice"])));
    }

    #[test]
    fn subnet_matches_ip_prefix() {
        assert!(subnet_allowed(&strings(&["10.0.1"]), "10.0.1.7", ""));
        assert!(subnet_allowed(&strings(&["10.0.1"]), "", "10.0.1"));
        assert!(!subnet_allowed(&strings(&["10.0.2"]), "10.0.1.7", "10.0.1"));
        // Prefix matching is literal, not case-folded.
        assert!(!subnet_allowed(&strings(&["10.0.10"]), "10.0.1.7", ""));
    }

    #[test]
    fn adding_allow_list_entries_never_enlarges_candidates() {
        let open = job_with_affinity(Affinity::default(), "alice");
        let narrowed = job_with_affinity(
            Affinity {
                hostnames: strings(&["node-2"]),
                ..Default::default()
            },
            "alice",
        );
        let w = worker();
        assert!(passes_affinity(&open, &w));
        assert!(!passes_affinity(&narrowed, &w));
    }

    #[test]
    fn deployment_type_filter() {
        let job = job_with_affinity(
            Affinity {
                deployment_types: strings(&["BARE"]),
                ..Default::default()
            },
            "alice",
        );
        assert!(passes_affinity(&job, &worker()));
    }
}
