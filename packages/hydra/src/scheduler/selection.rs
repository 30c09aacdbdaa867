//! Worker selection: pick the least-loaded candidate.

use crate::models::WorkerInfo;

/// Load key: fractional slot usage first, absolute running count second.
fn load_key(worker: &WorkerInfo) -> (f64, i64) {
    let max_concurrency = worker.max_concurrency.max(1);
    (
        worker.current_running as f64 / max_concurrency as f64,
        worker.current_running,
    )
}

/// Select the candidate with the lexicographically smallest load key.
/// Deterministic for a given candidate order; returns `None` for an empty
/// candidate list.
pub fn select_best_worker<'a>(candidates: &'a [WorkerInfo]) -> Option<&'a WorkerInfo> {
    candidates.iter().min_by(|a, b| {
        let (ratio_a, running_a) = load_key(a);
        let (ratio_b, running_b) = load_key(b);
        ratio_a
            .total_cmp(&ratio_b)
            .then(running_a.cmp(&running_b))
    })
}
