//! Version token comparison.

use std::cmp::Ordering;

/// Compare two version tokens.
///
/// If both parse as non-negative integers they compare numerically, so
/// `"9" < "10"` and `"001" == "1"` by value. Otherwise the comparison falls
/// back to lexicographic order.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}
