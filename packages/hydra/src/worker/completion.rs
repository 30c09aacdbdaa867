//! Completion evaluator: did an attempt satisfy the job's criteria?
//!
//! Pure and idempotent. Checks run in a fixed order and the first failure
//! short-circuits with a human-readable reason.

use crate::models::CompletionCriteria;

fn contains_all<'a>(text: &str, needles: &'a [String]) -> Option<&'a str> {
    needles
        .iter()
        .find(|needle| !text.contains(needle.as_str()))
        .map(|needle| needle.as_str())
}

fn contains_none<'a>(text: &str, needles: &'a [String]) -> Option<&'a str> {
    needles
        .iter()
        .find(|needle| !needle.is_empty() && text.contains(needle.as_str()))
        .map(|needle| needle.as_str())
}

/// Evaluate `(exit code, stdout, stderr)` against the criteria.
pub fn evaluate_completion(
    criteria: &CompletionCriteria,
    returncode: i32,
    stdout: &str,
    stderr: &str,
) -> (bool, String) {
    // An explicitly empty list still means "exit 0", matching the
    // validation default.
    let exit_codes: &[i32] = if criteria.exit_codes.is_empty() {
        &[0]
    } else {
        &criteria.exit_codes
    };
    if !exit_codes.contains(&returncode) {
        return (
            false,
            format!("exit code {} not in {:?}", returncode, exit_codes),
        );
    }

    if let Some(missing) = contains_all(stdout, &criteria.stdout_contains) {
        return (false, format!("stdout missing '{missing}'"));
    }
    if let Some(found) = contains_none(stdout, &criteria.stdout_not_contains) {
        return (false, format!("stdout found forbidden '{found}'"));
    }
    if let Some(missing) = contains_all(stderr, &criteria.stderr_contains) {
        return (false, format!("stderr missing '{missing}'"));
    }
    if let Some(found) = contains_none(stderr, &criteria.stderr_not_contains) {
        return (false, format!("stderr found forbidden '{found}'"));
    }

    (true, "criteria satisfied".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criteria() -> CompletionCriteria {
        CompletionCriteria::default()
    }

    #[test]
    fn default_criteria_accept_exit_zero() {
        let (ok, reason) = evaluate_completion(&criteria(), 0, "", "");
        assert!(ok);
        assert_eq!(reason, "criteria satisfied");
    }

    #[test]
    fn nonzero_exit_fails_with_reason() {
        let (ok, reason) = evaluate_completion(&criteria(), 1, "", "");
        assert!(!ok);
        assert!(reason.contains("exit code 1"));
    }

    #[test]
    fn stdout_contains_requires_all_substrings() {
        let mut c = criteria();
        c.stdout_contains = vec!["done".to_string(), "ok".to_string()];
        let (ok, _) = evaluate_completion(&c, 0, "all done, ok", "");
        assert!(ok);
        let (ok, reason) = evaluate_completion(&c, 0, "all done", "");
        assert!(!ok);
        assert!(reason.contains("missing 'ok'"));
    }

    #[test]
    fn stdout_not_contains_rejects_forbidden() {
        let mut c = criteria();
        c.stdout_not_contains = vec!["ERROR".to_string()];
        let (ok, reason) = evaluate_completion(&c, 0, "ERROR: boom", "");
        assert!(!ok);
        assert!(reason.contains("forbidden 'ERROR'"));
    }

    #[test]
    fn stderr_checks_follow_stdout_checks() {
        let mut c = criteria();
        c.stderr_contains = vec!["warn".to_string()];
        let (ok, reason) = evaluate_completion(&c, 0, "", "");
        assert!(!ok);
        assert!(reason.starts_with("stderr"));

        let (ok, _) = evaluate_completion(&c, 0, "", "warn: things");
        assert!(ok);
    }

    #[test]
    fn exit_code_check_short_circuits() {
        let mut c = criteria();
        c.stdout_contains = vec!["never checked".to_string()];
        let (_, reason) = evaluate_completion(&c, 7, "", "");
        assert!(reason.contains("exit code 7"));
    }

    #[test]
    fn empty_exit_codes_still_require_zero() {
        let mut c = criteria();
        c.exit_codes = vec![];
        assert!(evaluate_completion(&c, 0, "", "").0);
        let (ok, reason) = evaluate_completion(&c, 1, "", "");
        assert!(!ok);
        assert!(reason.contains("exit code 1"));
    }

    #[test]
    fn custom_exit_codes() {
        let mut c = criteria();
        c.exit_codes = vec![0, 3];
        assert!(evaluate_completion(&c, 3, "", "").0);
        assert!(!evaluate_completion(&c, 2, "", "").0);
    }

    #[test]
    fn evaluation_is_idempotent() {
        let mut c = criteria();
        c.stdout_contains = vec!["x".to_string()];
        let first = evaluate_completion(&c, 0, "x marks", "");
        let second = evaluate_completion(&c, 0, "x marks", "");
        assert_eq!(first, second);
    }

    #[test]
    fn empty_forbidden_tokens_are_ignored() {
        let mut c = criteria();
        c.stderr_not_contains = vec![String::new()];
        assert!(evaluate_completion(&c, 0, "", "anything").0);
    }
}
