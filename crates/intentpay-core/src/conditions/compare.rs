use crate::types::ComparisonOperator;

/// Relative tolerance for numeric comparisons.
///
/// Amounts pass through decimal formatting on the way in and out of the ledger client,
/// so exact float equality would report spurious mismatches.
pub const EPSILON: f64 = 1e-9;

pub fn approx_eq(a: f64, b: f64) -> bool {
    let scale = 1.0_f64.max(a.abs()).max(b.abs());
    (a - b).abs() <= EPSILON * scale
}

pub fn compare_numbers(actual: f64, operator: ComparisonOperator, expected: f64) -> bool {
    let equal = approx_eq(actual, expected);
    match operator {
        ComparisonOperator::Equal => equal,
        ComparisonOperator::NotEqual => !equal,
        ComparisonOperator::GreaterThan => !equal && actual > expected,
        ComparisonOperator::LessThan => !equal && actual < expected,
        ComparisonOperator::GreaterOrEqual => equal || actual > expected,
        ComparisonOperator::LessOrEqual => equal || actual < expected,
    }
}

/// String comparison; `None` for ordering operators.
pub fn compare_text(actual: &str, operator: ComparisonOperator, expected: &str) -> Option<bool> {
    match operator {
        ComparisonOperator::Equal => Some(actual == expected),
        ComparisonOperator::NotEqual => Some(actual != expected),
        _ => None,
    }
}
