//! Log chunk envelope for run output streaming.
//!
//! Each stdout/stderr line a worker produces is wrapped in this envelope,
//! appended to the capped history list, and published on the run's channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Chunks kept in `log_stream:{domain}:{run}:history`.
pub const LOG_HISTORY_CAP: isize = 400;

/// History list TTL in seconds.
pub const LOG_HISTORY_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogChunk {
    pub run_id: Uuid,
    pub job_id: Uuid,
    pub worker_id: String,
    pub domain: String,
    pub ts: DateTime<Utc>,
    pub stream: LogStream,
    pub text: String,
}

impl LogChunk {
    pub fn new(
        run_id: Uuid,
        job_id: Uuid,
        worker_id: &str,
        domain: &str,
        stream: LogStream,
        text: String,
    ) -> Self {
        Self {
            run_id,
            job_id,
            worker_id: worker_id.to_string(),
            domain: domain.to_string(),
            ts: Utc::now(),
            stream,
            text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_wire_format() {
        let chunk = LogChunk::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "worker-1",
            "prod",
            LogStream::Stdout,
            "hello".to_string(),
        );
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["stream"], "stdout");
        assert_eq!(value["text"], "hello");
        assert_eq!(value["worker_id"], "worker-1");
        assert_eq!(value["domain"], "prod");
        assert!(value["ts"].is_string());
    }

    #[test]
    fn chunk_roundtrips() {
        let chunk = LogChunk::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "w",
            "d",
            LogStream::Stderr,
            "boom".to_string(),
        );
        let json = serde_json::to_string(&chunk).unwrap();
        let parsed: LogChunk = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.run_id, chunk.run_id);
        assert_eq!(parsed.stream, LogStream::Stderr);
    }
}
