//! Shuffling primitives.
//!
//! Every shuffle produces an assignment `row-slot -> source-slot` rather than
//! moving values directly. The page processor applies assignments to the
//! actual cells with [`apply_assignment`], which keeps the engines free of any
//! knowledge about value types and makes the bijection property testable on
//! plain indices.

pub mod block;
pub mod permutation;
pub mod scramble;

pub use block::shuffle_block;
pub use permutation::{AssignmentLedger, ColumnAssignment, shuffle_among, shuffle_column};
pub use scramble::{scramble_before_at, scramble_characters, scramble_ipv4_octets};

/// Builds the shuffled column: row `r` receives `values[sources[r]]`.
///
/// `sources` must be a bijection on `0..values.len()`; assignments produced by
/// this module always are.
pub fn apply_assignment<T: Clone>(values: &[T], sources: &[usize]) -> Vec<T> {
    sources
        .iter()
        .zip(values)
        .map(|(&source, original)| values.get(source).unwrap_or(original).clone())
        .collect()
}

/// Returns true when `sources` uses every slot in `0..sources.len()` exactly once.
pub fn is_bijection(sources: &[usize]) -> bool {
    let mut seen = vec![false; sources.len()];
    for &source in sources {
        match seen.get_mut(source) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_assignment_moves_values() {
        let values = vec!["a", "b", "c"];
        assert_eq!(apply_assignment(&values, &[2, 0, 1]), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_is_bijection() {
        assert!(is_bijection(&[]));
        assert!(is_bijection(&[0]));
        assert!(is_bijection(&[1, 2, 0]));
        assert!(!is_bijection(&[0, 0, 1]));
        assert!(!is_bijection(&[0, 3, 1]));
    }
}
