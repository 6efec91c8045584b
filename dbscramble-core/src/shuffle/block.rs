//! Correlated-block shuffling.
//!
//! Columns that describe one fact (street, number, postcode) must move
//! together or the row ends up with an address that never existed. A block
//! gets a single uniform permutation that is applied to every member column.
//! There is no retry logic here: a row keeping its own tuple is acceptable.

use rand::Rng;
use rand::seq::SliceRandom;

/// One uniformly random permutation of `0..rows` for a group of `group_size`
/// columns.
///
/// Returns the identity for `rows <= 1` or an empty group.
pub fn shuffle_block<R: Rng + ?Sized>(rows: usize, group_size: usize, rng: &mut R) -> Vec<usize> {
    let mut sources: Vec<usize> = (0..rows).collect();
    if rows <= 1 || group_size == 0 {
        return sources;
    }
    sources.shuffle(rng);
    sources
}
