//! Schedule engine: pure computation of `next_run_at` for recurring jobs.
//!
//! Two operations, both side-effect free:
//! - [`initialize`] sets the first fire time when a definition is created or
//!   updated;
//! - [`advance`] moves a due schedule to its successor occurrence.
//!
//! Both clamp against the optional `end_at` window; an advance that falls
//! past the window exhausts the schedule (`next_run_at = None`,
//! `enabled = false`).

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule as CronSchedule;
use thiserror::Error;

use crate::models::{ScheduleConfig, ScheduleMode};

#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error("cron schedule requires a cron expression")]
    MissingCron,
    #[error("invalid cron expression '{0}'")]
    InvalidCron(String),
    #[error("interval schedule requires positive interval_seconds")]
    NonPositiveInterval,
}

/// Parse a cron expression, accepting both the classic five-field form and
/// the six/seven-field form with seconds.
pub fn parse_cron(expression: &str) -> Result<CronSchedule, ScheduleError> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Err(ScheduleError::MissingCron);
    }
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };
    CronSchedule::from_str(&normalized)
        .map_err(|_| ScheduleError::InvalidCron(trimmed.to_string()))
}

fn clamp_to_window(
    candidate: Option<DateTime<Utc>>,
    schedule: &ScheduleConfig,
) -> Option<DateTime<Utc>> {
    let candidate = candidate?;
    match schedule.end_at {
        Some(end) if candidate > end => None,
        _ => Some(candidate),
    }
}

/// Compute the first fire time for a freshly created or updated schedule.
pub fn initialize(
    schedule: &ScheduleConfig,
    now: DateTime<Utc>,
) -> Result<ScheduleConfig, ScheduleError> {
    let mut result = schedule.clone();

    if !schedule.enabled || schedule.mode == ScheduleMode::Immediate {
        result.next_run_at = None;
        return Ok(result);
    }

    let candidate = match schedule.mode {
        ScheduleMode::Cron => {
            let cron = schedule.cron.as_deref().ok_or(ScheduleError::MissingCron)?;
            let parsed = parse_cron(cron)?;
            let base = schedule.start_at.map_or(now, |start| start.max(now));
            parsed.after(&base).next()
        }
        ScheduleMode::Interval => {
            let interval = schedule.interval_seconds.unwrap_or(0);
            if interval <= 0 {
                return Err(ScheduleError::NonPositiveInterval);
            }
            Some(schedule.start_at.map_or(now, |start| start.max(now)))
        }
        ScheduleMode::Immediate => unreachable!(),
    };

    result.next_run_at = clamp_to_window(candidate, schedule);
    Ok(result)
}

/// Compute the successor occurrence after a due fire.
///
/// When the successor falls past `end_at` the schedule is exhausted: the
/// result carries `next_run_at = None` and `enabled = false`, and advancing
/// it again is a no-op.
pub fn advance(
    schedule: &ScheduleConfig,
    now: DateTime<Utc>,
) -> Result<ScheduleConfig, ScheduleError> {
    let mut result = schedule.clone();

    if !schedule.enabled || schedule.mode == ScheduleMode::Immediate {
        result.next_run_at = None;
        return Ok(result);
    }

    let base = schedule.next_run_at.unwrap_or(now);

    let candidate = match schedule.mode {
        ScheduleMode::Cron => {
            let cron = schedule.cron.as_deref().ok_or(ScheduleError::MissingCron)?;
            parse_cron(cron)?.after(&base).next()
        }
        ScheduleMode::Interval => {
            let interval = schedule.interval_seconds.unwrap_or(0);
            if interval <= 0 {
                return Err(ScheduleError::NonPositiveInterval);
            }
            Some(base + Duration::seconds(interval))
        }
        ScheduleMode::Immediate => unreachable!(),
    };

    match clamp_to_window(candidate, schedule) {
        Some(next) => {
            result.next_run_at = Some(next);
        }
        None => {
            result.next_run_at = None;
            result.enabled = false;
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn interval_schedule(seconds: i64) -> ScheduleConfig {
        ScheduleConfig {
            mode: ScheduleMode::Interval,
            interval_seconds: Some(seconds),
            ..Default::default()
        }
    }

    fn cron_schedule(expr: &str) -> ScheduleConfig {
        ScheduleConfig {
            mode: ScheduleMode::Cron,
            cron: Some(expr.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn five_field_cron_is_accepted() {
        assert!(parse_cron("*/5 * * * *").is_ok());
        assert!(parse_cron("0 0 * * * *").is_ok());
        assert!(parse_cron("nonsense").is_err());
        assert!(parse_cron("").is_err());
    }

    #[test]
    fn immediate_mode_has_no_next_run() {
        let schedule = ScheduleConfig::default();
        let initialized = initialize(&schedule, Utc::now()).unwrap();
        assert_eq!(initialized.next_run_at, None);
    }

    #[test]
    fn disabled_schedule_has_no_next_run() {
        let mut schedule = interval_schedule(60);
        schedule.enabled = false;
        let initialized = initialize(&schedule, Utc::now()).unwrap();
        assert_eq!(initialized.next_run_at, None);
    }

    #[test]
    fn interval_initializes_to_now_or_start() {
        let now = at(2025, 6, 1, 12, 0, 0);

        let initialized = initialize(&interval_schedule(60), now).unwrap();
        assert_eq!(initialized.next_run_at, Some(now));

        let mut future_start = interval_schedule(60);
        future_start.start_at = Some(at(2025, 6, 2, 0, 0, 0));
        let initialized = initialize(&future_start, now).unwrap();
        assert_eq!(initialized.next_run_at, Some(at(2025, 6, 2, 0, 0, 0)));

        let mut past_start = interval_schedule(60);
        past_start.start_at = Some(at(2025, 5, 1, 0, 0, 0));
        let initialized = initialize(&past_start, now).unwrap();
        assert_eq!(initialized.next_run_at, Some(now));
    }

    #[test]
    fn interval_rejects_non_positive_seconds() {
        assert_eq!(
            initialize(&interval_schedule(0), Utc::now()),
            Err(ScheduleError::NonPositiveInterval)
        );
        assert_eq!(
            advance(&interval_schedule(-5), Utc::now()),
            Err(ScheduleError::NonPositiveInterval)
        );
    }

    #[test]
    fn cron_initializes_to_first_fire_after_base() {
        let now = at(2025, 6, 1, 12, 30, 0);
        let initialized = initialize(&cron_schedule("0 * * * *"), now).unwrap();
        assert_eq!(initialized.next_run_at, Some(at(2025, 6, 1, 13, 0, 0)));
    }

    #[test]
    fn cron_without_expression_errors() {
        let schedule = ScheduleConfig {
            mode: ScheduleMode::Cron,
            ..Default::default()
        };
        assert_eq!(
            initialize(&schedule, Utc::now()),
            Err(ScheduleError::MissingCron)
        );
    }

    #[test]
    fn advance_is_strictly_increasing() {
        let now = at(2025, 6, 1, 12, 0, 0);
        let mut schedule = interval_schedule(300);
        schedule.next_run_at = Some(now);

        let advanced = advance(&schedule, now).unwrap();
        assert_eq!(advanced.next_run_at, Some(at(2025, 6, 1, 12, 5, 0)));
        assert!(advanced.next_run_at.unwrap() > schedule.next_run_at.unwrap());

        let mut hourly = cron_schedule("0 * * * *");
        hourly.next_run_at = Some(at(2025, 6, 1, 12, 0, 0));
        let advanced = advance(&hourly, now).unwrap();
        assert_eq!(advanced.next_run_at, Some(at(2025, 6, 1, 13, 0, 0)));
    }

    #[test]
    fn advance_clamps_to_end_and_disables() {
        let now = at(2025, 6, 1, 12, 0, 0);
        let mut schedule = interval_schedule(3600);
        schedule.next_run_at = Some(now);
        schedule.end_at = Some(at(2025, 6, 1, 12, 30, 0));

        let advanced = advance(&schedule, now).unwrap();
        assert_eq!(advanced.next_run_at, None);
        assert!(!advanced.enabled);

        // Advancing an exhausted schedule stays exhausted.
        let again = advance(&advanced, now).unwrap();
        assert_eq!(again.next_run_at, None);
        assert!(!again.enabled);
    }

    #[test]
    fn initialize_clamps_past_window() {
        let now = at(2025, 6, 1, 12, 0, 0);
        let mut schedule = cron_schedule("0 0 1 1 *");
        schedule.end_at = Some(at(2025, 6, 2, 0, 0, 0));
        let initialized = initialize(&schedule, now).unwrap();
        assert_eq!(initialized.next_run_at, None);
    }

    #[test]
    fn advance_uses_now_when_next_run_missing() {
        let now = at(2025, 6, 1, 12, 0, 0);
        let advanced = advance(&interval_schedule(60), now).unwrap();
        assert_eq!(advanced.next_run_at, Some(at(2025, 6, 1, 12, 1, 0)));
    }
}
