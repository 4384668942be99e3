//! Additive cost model. Costs are only used for join-reordering tie-breaks
//! and `EXPLAIN` output, not for picking between fundamentally different
//! access paths (this crate has exactly one access path per operator kind).

/// Row-count estimate fallback when no statistics exist.
pub const DEFAULT_ROW_ESTIMATE: f64 = 1000.0;

pub fn scan_cost(estimated_rows: f64) -> f64 {
    estimated_rows
}

pub fn selection_cost(input_cost: f64) -> f64 {
    1.2 * input_cost + 10.0
}

pub fn projection_cost(input_cost: f64, expr_count: usize) -> f64 {
    1.1 * input_cost + 5.0 * expr_count as f64
}

pub fn hash_join_cost(left_cost: f64, right_cost: f64) -> f64 {
    left_cost + right_cost + 0.1 * (left_cost + right_cost)
}

pub fn hash_aggregate_cost(input_cost: f64, groups: usize, aggs: usize) -> f64 {
    input_cost + 0.05 * input_cost * (groups + aggs) as f64
}

pub fn limit_cost(input_cost: f64, limit: u64) -> f64 {
    input_cost + 0.01 * limit as f64
}

/// Row-count estimate for a scan: the `limit` hint if present, else the
/// fallback default.
pub fn estimate_scan_rows(limit: Option<u64>) -> f64 {
    limit.map(|l| l as f64).unwrap_or(DEFAULT_ROW_ESTIMATE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_hint_overrides_fallback_estimate() {
        assert_eq!(estimate_scan_rows(None), DEFAULT_ROW_ESTIMATE);
        assert_eq!(estimate_scan_rows(Some(5)), 5.0);
    }

    #[test]
    fn hash_join_cost_is_additive_with_a_surcharge() {
        let cost = hash_join_cost(100.0, 200.0);
        assert_eq!(cost, 100.0 + 200.0 + 0.1 * 300.0);
    }
}
