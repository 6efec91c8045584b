//! Bounded-retry column permutation.
//!
//! Columns of a page are shuffled one at a time. For each row the engine draws
//! source slots from the pool of still-unused slots and prefers one that the
//! row has not already received through an earlier column. After
//! `max_attempts` rejected draws the last candidate is accepted anyway, so the
//! result is always a bijection and the loop always terminates; the number of
//! rows that took this path is reported as `fallbacks`.

use rand::Rng;

/// Per-row record of source slots already handed to each row.
///
/// Feeding the ledger forward across the columns of a page keeps a row from
/// receiving two sub-fields of the same original value, which would partly
/// rebuild it.
#[derive(Debug, Clone, Default)]
pub struct AssignmentLedger {
    used: Vec<Vec<usize>>,
}

impl AssignmentLedger {
    /// Empty ledger for `rows` slots.
    pub fn new(rows: usize) -> Self {
        Self {
            used: vec![Vec::new(); rows],
        }
    }

    /// Ledger where every row already "holds" its own slot, which biases the
    /// first column away from leaving values in place.
    pub fn seeded(rows: usize) -> Self {
        Self {
            used: (0..rows).map(|row| vec![row]).collect(),
        }
    }

    /// Number of row slots tracked.
    pub fn rows(&self) -> usize {
        self.used.len()
    }

    /// True if `row` already received `source` through an earlier column.
    pub fn contains(&self, row: usize, source: usize) -> bool {
        self.used
            .get(row)
            .is_some_and(|sources| sources.contains(&source))
    }

    /// Records an assignment so later columns avoid its sources.
    pub fn record(&mut self, assignment: &ColumnAssignment) {
        if self.used.len() < assignment.sources.len() {
            self.used.resize(assignment.sources.len(), Vec::new());
        }
        for (row, &source) in assignment.sources.iter().enumerate() {
            if let Some(sources) = self.used.get_mut(row)
                && !sources.contains(&source)
            {
                sources.push(source);
            }
        }
    }
}

/// The outcome of shuffling one physical column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnAssignment {
    /// `sources[row]` is the slot whose original value lands in `row`
    pub sources: Vec<usize>,
    /// Rows that exhausted their attempts and accepted a conflicting slot
    pub fallbacks: usize,
}

impl ColumnAssignment {
    /// Assignment that leaves every value in place.
    pub fn identity(rows: usize) -> Self {
        Self {
            sources: (0..rows).collect(),
            fallbacks: 0,
        }
    }

    /// Number of row slots covered.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// True for an assignment over zero rows.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Shuffles one column over all `rows` slots.
pub fn shuffle_column<R: Rng + ?Sized>(
    rows: usize,
    ledger: &AssignmentLedger,
    max_attempts: usize,
    rng: &mut R,
) -> ColumnAssignment {
    let slots: Vec<usize> = (0..rows).collect();
    shuffle_among(rows, &slots, ledger, max_attempts, rng)
}

/// Shuffles one column among a subset of row slots.
///
/// Only the listed slots exchange values; every other row keeps its own. Used
/// when null padding in a sub-field slot must stay where it is.
pub fn shuffle_among<R: Rng + ?Sized>(
    rows: usize,
    slots: &[usize],
    ledger: &AssignmentLedger,
    max_attempts: usize,
    rng: &mut R,
) -> ColumnAssignment {
    let mut assignment = ColumnAssignment::identity(rows);
    if slots.len() <= 1 {
        return assignment;
    }

    let attempts = max_attempts.max(1);
    let mut pool: Vec<usize> = slots.to_vec();

    for &row in slots {
        let mut chosen = None;
        let mut last_index = 0;

        for _ in 0..attempts {
            let index = rng.random_range(0..pool.len());
            last_index = index;
            if !ledger.contains(row, pool[index]) {
                chosen = Some(index);
                break;
            }
        }

        let index = match chosen {
            Some(index) => index,
            None => {
                assignment.fallbacks += 1;
                last_index
            }
        };

        if let Some(source) = assignment.sources.get_mut(row) {
            *source = pool.swap_remove(index);
        }
    }

    assignment
}
