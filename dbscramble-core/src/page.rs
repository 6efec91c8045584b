//! Page processor.
//!
//! Turns one page of rows into the row updates that anonymize it:
//! 1. composite columns are decomposed into sub-field slots, padded with
//!    NULL up to the longest value of the page
//! 2. every opaque column and every slot gets its own bounded-retry
//!    permutation, with one ledger fed forward across all of them. Slots are
//!    permuted only among rows whose value has tokens, so a NULL email or
//!    name stays NULL and never lends its padding to another row
//! 3. every group gets one block permutation applied to all its members
//! 4. composite columns are recomposed; row-local kinds are scrambled in place
//!
//! Only configured columns are assigned, and only when their value changed.

use crate::codec::{Decomposed, decompose, recompose};
use crate::config::{RunOptions, SparseSlotPolicy, TablePlan};
use crate::error::ScrambleError;
use crate::models::{CellValue, ColumnKind, Page, RowKey, RowUpdate};
use crate::shuffle::{
    AssignmentLedger, ColumnAssignment, apply_assignment, scramble_before_at,
    scramble_characters, scramble_ipv4_octets, shuffle_among, shuffle_block, shuffle_column,
};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Counters for one processed page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageStats {
    /// Rows in the page
    pub rows: usize,
    /// Row draws that exhausted their attempts and accepted a conflict
    pub fallbacks: usize,
    /// Single-token emails scrambled at character level
    pub single_token_scrambles: usize,
    /// Values left unchanged because they did not fit their kind
    pub malformed_values: usize,
    /// Sub-field slots left in place by the sparse slot policy
    pub skipped_slots: usize,
    /// Rows with at least one changed value
    pub changed_rows: usize,
}

impl PageStats {
    /// Adds another page's counters to these.
    pub fn merge(&mut self, other: &PageStats) {
        self.rows = self.rows.saturating_add(other.rows);
        self.fallbacks = self.fallbacks.saturating_add(other.fallbacks);
        self.single_token_scrambles = self
            .single_token_scrambles
            .saturating_add(other.single_token_scrambles);
        self.malformed_values = self.malformed_values.saturating_add(other.malformed_values);
        self.skipped_slots = self.skipped_slots.saturating_add(other.skipped_slots);
        self.changed_rows = self.changed_rows.saturating_add(other.changed_rows);
    }
}

/// Updates for one page plus its counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageResult {
    pub updates: Vec<RowUpdate>,
    pub stats: PageStats,
}

struct Shuffler<'a, R: Rng + ?Sized> {
    rows: usize,
    ledger: AssignmentLedger,
    options: &'a RunOptions,
    rng: &'a mut R,
    stats: PageStats,
}

impl<R: Rng + ?Sized> Shuffler<'_, R> {
    fn column(&mut self) -> ColumnAssignment {
        let assignment = shuffle_column(self.rows, &self.ledger, self.options.max_attempts, self.rng);
        self.ledger.record(&assignment);
        self.stats.fallbacks = self.stats.fallbacks.saturating_add(assignment.fallbacks);
        assignment
    }

    /// Shuffles one sub-field slot among `participants`, the rows whose value
    /// produced at least one token. The policy only decides what happens to
    /// the padding between those rows.
    fn slot(&mut self, slot: &[Option<String>], participants: &[usize]) -> ColumnAssignment {
        let present: Vec<usize> = participants
            .iter()
            .copied()
            .filter(|&row| slot.get(row).is_some_and(Option::is_some))
            .collect();

        let pool = match self.options.sparse_slots {
            SparseSlotPolicy::ShuffleAll => participants,
            SparseSlotPolicy::PresentOnly => present.as_slice(),
            SparseSlotPolicy::SkipSparse => {
                let padding = participants.len().saturating_sub(present.len());
                let ratio = padding as f64 / participants.len().max(1) as f64;
                if ratio > self.options.sparse_null_ratio {
                    self.stats.skipped_slots = self.stats.skipped_slots.saturating_add(1);
                    return ColumnAssignment::identity(self.rows);
                }
                participants
            }
        };

        let assignment = shuffle_among(
            self.rows,
            pool,
            &self.ledger,
            self.options.max_attempts,
            self.rng,
        );

        self.ledger.record(&assignment);
        self.stats.fallbacks = self.stats.fallbacks.saturating_add(assignment.fallbacks);
        assignment
    }

    fn composite(&mut self, originals: &[CellValue], kind: ColumnKind) -> Vec<CellValue> {
        let mut decomposed: Vec<Decomposed> = originals
            .iter()
            .map(|value| decompose(value.to_text().as_deref(), kind))
            .collect();

        if kind == ColumnKind::Email {
            for value in decomposed.iter_mut().filter(|d| d.is_single_token()) {
                if let Some(Some(token)) = value.parts.first_mut() {
                    *token = scramble_characters(token, self.rng);
                    self.stats.single_token_scrambles =
                        self.stats.single_token_scrambles.saturating_add(1);
                }
            }
        }

        // NULL (or token-less) values never enter a pool and pass through.
        let participants: Vec<usize> = decomposed
            .iter()
            .enumerate()
            .filter(|(_, d)| !d.parts.is_empty())
            .map(|(row, _)| row)
            .collect();

        let width = decomposed.iter().map(|d| d.parts.len()).max().unwrap_or(0);
        let mut slots: Vec<Vec<Option<String>>> = Vec::with_capacity(width);
        for index in 0..width {
            let slot: Vec<Option<String>> = decomposed
                .iter()
                .map(|d| d.parts.get(index).cloned().flatten())
                .collect();
            let assignment = self.slot(&slot, &participants);
            slots.push(apply_assignment(&slot, &assignment.sources));
        }

        decomposed
            .iter()
            .zip(originals)
            .enumerate()
            .map(|(row, (decomposed, original))| {
                if decomposed.parts.is_empty() {
                    return original.clone();
                }
                let parts: Vec<Option<String>> =
                    slots.iter().map(|slot| slot.get(row).cloned().flatten()).collect();
                CellValue::from(recompose(&parts, decomposed.suffix.as_deref(), kind))
            })
            .collect()
    }
}

fn column_values(page: &Page, table: &str, column: &str) -> crate::Result<Vec<CellValue>> {
    let index = page
        .column_index(column)
        .ok_or_else(|| ScrambleError::missing_column(table, column))?;
    Ok(page.rows.iter().map(|row| row.get(index).clone()).collect())
}

fn row_key(page: &Page, key_indexes: &[(String, usize)], row: usize) -> RowKey {
    RowKey {
        parts: key_indexes
            .iter()
            .map(|(column, index)| {
                let value = page
                    .rows
                    .get(row)
                    .map(|r| r.get(*index).clone())
                    .unwrap_or(CellValue::Null);
                (column.clone(), value)
            })
            .collect(),
    }
}

/// Shuffles one page according to the table plan.
///
/// `key_columns` identify rows in the emitted updates and must be part of the
/// page. Values of anonymized columns never reach the log.
///
/// # Errors
/// Returns `MissingColumn` if a configured or key column is not in the page
pub fn process_page<R: Rng + ?Sized>(
    table: &str,
    page: &Page,
    plan: &TablePlan,
    key_columns: &[String],
    options: &RunOptions,
    rng: &mut R,
) -> crate::Result<PageResult> {
    let rows = page.len();
    let key_indexes = key_columns
        .iter()
        .map(|column| {
            page.column_index(column)
                .map(|index| (column.clone(), index))
                .ok_or_else(|| ScrambleError::missing_column(table, column))
        })
        .collect::<crate::Result<Vec<_>>>()?;

    let mut shuffler = Shuffler {
        rows,
        ledger: AssignmentLedger::seeded(rows),
        options,
        rng,
        stats: PageStats {
            rows,
            ..PageStats::default()
        },
    };

    if rows == 0 {
        return Ok(PageResult::default());
    }

    // (column, original values, new values)
    let mut rewritten: Vec<(String, Vec<CellValue>, Vec<CellValue>)> = Vec::new();

    for rule in plan.page_rules() {
        let originals = column_values(page, table, &rule.name)?;
        let shuffled = match rule.kind {
            ColumnKind::Opaque => {
                let assignment = shuffler.column();
                apply_assignment(&originals, &assignment.sources)
            }
            ColumnKind::Email | ColumnKind::PersonName => shuffler.composite(&originals, rule.kind),
            ColumnKind::CharacterScramble => originals
                .iter()
                .map(|value| match value.to_text() {
                    Some(text) => CellValue::Text(scramble_before_at(&text, shuffler.rng)),
                    None => CellValue::Null,
                })
                .collect(),
            ColumnKind::Ipv4Octets => {
                let mut scrambled = Vec::with_capacity(rows);
                for (row, value) in originals.iter().enumerate() {
                    let Some(text) = value.to_text() else {
                        scrambled.push(CellValue::Null);
                        continue;
                    };
                    match scramble_ipv4_octets(&text, shuffler.rng) {
                        Some(ip) => scrambled.push(CellValue::Text(ip)),
                        None => {
                            tracing::warn!(
                                table = %table,
                                column = %rule.name,
                                key = %row_key(page, &key_indexes, row),
                                "Value is not a four-group IPv4 address, left unchanged"
                            );
                            shuffler.stats.malformed_values =
                                shuffler.stats.malformed_values.saturating_add(1);
                            scrambled.push(value.clone());
                        }
                    }
                }
                scrambled
            }
            ColumnKind::Grouped => continue,
        };
        rewritten.push((rule.name.clone(), originals, shuffled));
    }

    for group in &plan.groups {
        let sources = shuffle_block(rows, group.columns.len(), shuffler.rng);
        for column in &group.columns {
            let originals = column_values(page, table, column)?;
            let shuffled = apply_assignment(&originals, &sources);
            rewritten.push((column.clone(), originals, shuffled));
        }
    }

    let mut updates = Vec::new();
    for row in 0..rows {
        let assignments: Vec<(String, CellValue)> = rewritten
            .iter()
            .filter_map(|(column, originals, shuffled)| {
                let new_value = shuffled.get(row)?;
                (originals.get(row) != Some(new_value)).then(|| (column.clone(), new_value.clone()))
            })
            .collect();
        if !assignments.is_empty() {
            updates.push(RowUpdate {
                key: row_key(page, &key_indexes, row),
                assignments,
            });
        }
    }

    let mut stats = shuffler.stats;
    stats.changed_rows = updates.len();

    tracing::debug!(
        table = %table,
        rows = stats.rows,
        changed = stats.changed_rows,
        fallbacks = stats.fallbacks,
        "Page shuffled"
    );

    Ok(PageResult { updates, stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Row;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn page(columns: &[&str], rows: Vec<Vec<CellValue>>) -> Page {
        Page::new(
            columns.iter().map(|c| (*c).to_string()).collect(),
            rows.into_iter().map(Row::new).collect(),
        )
    }

    fn key() -> Vec<String> {
        vec!["id".to_string()]
    }

    /// Applies updates to a copy of the page, keyed by `id`.
    fn apply(page: &Page, result: &PageResult) -> Page {
        let mut out = page.clone();
        for update in &result.updates {
            let (_, id) = &update.key.parts[0];
            let row = out.rows.iter_mut().find(|r| r.get(0) == id).unwrap();
            for (column, value) in &update.assignments {
                let index = page.column_index(column).unwrap();
                row.values[index] = value.clone();
            }
        }
        out
    }

    fn sorted_column(page: &Page, column: &str) -> Vec<String> {
        let index = page.column_index(column).unwrap();
        let mut values: Vec<String> = page.rows.iter().map(|r| r.get(index).to_string()).collect();
        values.sort();
        values
    }

    #[test]
    fn test_opaque_column_preserves_multiset() {
        let input = page(
            &["id", "iban"],
            (0..40i64).map(|i| vec![i.into(), format!("ES{:04}", i).into()]).collect(),
        );
        let plan = TablePlan::new().column("iban", ColumnKind::Opaque);
        let mut rng = StdRng::seed_from_u64(1);

        let result = process_page("t", &input, &plan, &key(), &RunOptions::default(), &mut rng).unwrap();
        let output = apply(&input, &result);

        assert_eq!(sorted_column(&output, "iban"), sorted_column(&input, "iban"));
        assert_eq!(sorted_column(&output, "id"), sorted_column(&input, "id"));
        assert!(result.stats.changed_rows > 0);
        assert!(result.updates.iter().all(|u| u.assignments.len() == 1));
    }

    #[test]
    fn test_email_scenario_keeps_shape_and_tokens() {
        let input = page(
            &["id", "email"],
            vec![
                vec![CellValue::Integer(1), "ana.lopez@x.com".into()],
                vec![CellValue::Integer(2), "bea.ruiz@x.com".into()],
                vec![CellValue::Integer(3), "carlos@x.com".into()],
            ],
        );
        let plan = TablePlan::new().column("email", ColumnKind::Email);
        let mut rng = StdRng::seed_from_u64(7);

        let result = process_page("t", &input, &plan, &key(), &RunOptions::default(), &mut rng).unwrap();
        let output = apply(&input, &result);
        assert_eq!(result.stats.single_token_scrambles, 1);

        let mut tokens: Vec<String> = Vec::new();
        for row in &output.rows {
            let email = row.get(1).as_text().unwrap();
            let (local, domain) = email.split_once('@').unwrap();
            assert_eq!(domain, "x.com");
            assert!(!local.is_empty());
            tokens.extend(local.split('.').map(|t| {
                let mut chars: Vec<char> = t.chars().collect();
                chars.sort_unstable();
                chars.into_iter().collect::<String>()
            }));
        }
        tokens.sort();

        let mut expected: Vec<String> = ["ana", "lopez", "bea", "ruiz", "carlos"]
            .iter()
            .map(|t| {
                let mut chars: Vec<char> = t.chars().collect();
                chars.sort_unstable();
                chars.into_iter().collect::<String>()
            })
            .collect();
        expected.sort();
        assert_eq!(tokens, expected);
    }

    #[test]
    fn test_group_moves_as_tuple() {
        let input = page(
            &["id", "street", "number", "city"],
            (0..25i64)
                .map(|i| {
                    vec![
                        i.into(),
                        format!("street-{}", i).into(),
                        format!("number-{}", i).into(),
                        "Madrid".into(),
                    ]
                })
                .collect(),
        );
        let plan = TablePlan::new().group("address", &["street", "number"]);
        let mut rng = StdRng::seed_from_u64(3);

        let result = process_page("t", &input, &plan, &key(), &RunOptions::default(), &mut rng).unwrap();
        let output = apply(&input, &result);

        for row in &output.rows {
            let street = row.get(1).as_text().unwrap().trim_start_matches("street-");
            let number = row.get(2).as_text().unwrap().trim_start_matches("number-");
            assert_eq!(street, number);
            assert_eq!(row.get(3), &CellValue::from("Madrid"));
        }
        assert_eq!(sorted_column(&output, "street"), sorted_column(&input, "street"));
    }

    #[test]
    fn test_present_only_keeps_token_counts() {
        let input = page(
            &["id", "name"],
            vec![
                vec![CellValue::Integer(1), "Ana".into()],
                vec![CellValue::Integer(2), "Bea Ruiz".into()],
                vec![CellValue::Integer(3), "Carlos Gil Pons".into()],
                vec![CellValue::Integer(4), CellValue::Null],
                vec![CellValue::Integer(5), "Dora Mar".into()],
            ],
        );
        let plan = TablePlan::new().column("name", ColumnKind::PersonName);
        let options = RunOptions::new().with_sparse_slots(SparseSlotPolicy::PresentOnly);
        let mut rng = StdRng::seed_from_u64(11);

        let result = process_page("t", &input, &plan, &key(), &options, &mut rng).unwrap();
        let output = apply(&input, &result);

        let counts: Vec<usize> = output
            .rows
            .iter()
            .map(|r| r.get(1).as_text().map_or(0, |n| n.split(' ').count()))
            .collect();
        assert_eq!(counts, vec![1, 2, 3, 0, 2]);
    }

    #[test]
    fn test_skip_sparse_leaves_sparse_slot() {
        let input = page(
            &["id", "name"],
            vec![
                vec![CellValue::Integer(1), "Ana".into()],
                vec![CellValue::Integer(2), "Bea".into()],
                vec![CellValue::Integer(3), "Carlos Gil Pons".into()],
            ],
        );
        let plan = TablePlan::new().column("name", ColumnKind::PersonName);
        let options = RunOptions::new().with_sparse_slots(SparseSlotPolicy::SkipSparse);
        let mut rng = StdRng::seed_from_u64(5);

        let result = process_page("t", &input, &plan, &key(), &options, &mut rng).unwrap();
        assert_eq!(result.stats.skipped_slots, 2);
        let output = apply(&input, &result);
        let carlos = output.rows.iter().find(|r| r.get(0) == &CellValue::Integer(3)).unwrap();
        assert!(carlos.get(1).as_text().unwrap().ends_with("Gil Pons"));
    }

    #[test]
    fn test_null_composites_stay_null_under_every_policy() {
        let input = page(
            &["id", "email", "name"],
            vec![
                vec![CellValue::Integer(1), "carlos@x.com".into(), "Ana Ruiz".into()],
                vec![CellValue::Integer(2), CellValue::Null, CellValue::Null],
                vec![CellValue::Integer(3), "ana.lopez@y.com".into(), "Bea".into()],
                vec![CellValue::Integer(4), CellValue::Null, "Carlos Gil Pons".into()],
                vec![CellValue::Integer(5), "bea.maria.ruiz@z.org".into(), CellValue::Null],
                vec![CellValue::Integer(6), "dora_mar@x.com".into(), "Dora".into()],
                vec![CellValue::Integer(7), CellValue::Null, CellValue::Null],
            ],
        );
        let plan = TablePlan::new()
            .column("email", ColumnKind::Email)
            .column("name", ColumnKind::PersonName);

        for policy in [
            SparseSlotPolicy::ShuffleAll,
            SparseSlotPolicy::PresentOnly,
            SparseSlotPolicy::SkipSparse,
        ] {
            let options = RunOptions::new().with_sparse_slots(policy);
            for seed in 0..20u64 {
                let mut rng = StdRng::seed_from_u64(seed);
                let result = process_page("t", &input, &plan, &key(), &options, &mut rng).unwrap();
                let output = apply(&input, &result);

                for (before, after) in input.rows.iter().zip(&output.rows) {
                    for column in [1, 2] {
                        assert_eq!(
                            before.get(column).is_null(),
                            after.get(column).is_null(),
                            "{:?} seed {} row {}",
                            policy,
                            seed,
                            before.get(0)
                        );
                    }
                    if let Some(email) = before.get(1).as_text() {
                        let domain = &email[email.find('@').unwrap()..];
                        let shuffled = after.get(1).as_text().unwrap();
                        assert!(shuffled.ends_with(domain), "{:?} seed {}", policy, seed);
                        assert!(shuffled.len() > domain.len());
                    }
                }
            }
        }
    }

    #[test]
    fn test_row_local_kinds() {
        let input = page(
            &["id", "ip", "secret"],
            vec![
                vec![CellValue::Integer(1), "10.0.0.1".into(), "hunter2@vault".into()],
                vec![CellValue::Integer(2), "not-an-ip".into(), CellValue::Null],
            ],
        );
        let plan = TablePlan::new()
            .column("ip", ColumnKind::Ipv4Octets)
            .column("secret", ColumnKind::CharacterScramble);
        let mut rng = StdRng::seed_from_u64(2);

        let result = process_page("t", &input, &plan, &key(), &RunOptions::default(), &mut rng).unwrap();
        assert_eq!(result.stats.malformed_values, 1);

        let output = apply(&input, &result);
        assert_eq!(output.rows[1].get(1), &CellValue::from("not-an-ip"));
        assert!(output.rows[1].get(2).is_null());
        assert!(output.rows[0].get(2).as_text().unwrap().ends_with("@vault"));
        let mut groups: Vec<&str> = output.rows[0].get(1).as_text().unwrap().split('.').collect();
        groups.sort_unstable();
        assert_eq!(groups, vec!["0", "0", "1", "10"]);
    }

    #[test]
    fn test_single_row_page_changes_nothing_but_row_local() {
        let input = page(&["id", "iban"], vec![vec![CellValue::Integer(1), "ES01".into()]]);
        let plan = TablePlan::new().column("iban", ColumnKind::Opaque);
        let mut rng = StdRng::seed_from_u64(4);
        let result = process_page("t", &input, &plan, &key(), &RunOptions::default(), &mut rng).unwrap();
        assert!(result.updates.is_empty());
    }

    #[test]
    fn test_missing_column_is_reported() {
        let input = page(&["id"], vec![vec![CellValue::Integer(1)], vec![CellValue::Integer(2)]]);
        let plan = TablePlan::new().column("email", ColumnKind::Email);
        let mut rng = StdRng::seed_from_u64(4);
        let result = process_page("t", &input, &plan, &key(), &RunOptions::default(), &mut rng);
        assert!(matches!(result, Err(ScrambleError::MissingColumn { .. })));
    }

    #[test]
    fn test_composite_key_in_updates() {
        let input = page(
            &["id", "rev_ver", "iban"],
            (0..10i64)
                .map(|i| vec![(i / 2).into(), (i % 2).into(), format!("ES{}", i).into()])
                .collect(),
        );
        let plan = TablePlan::new().column("iban", ColumnKind::Opaque);
        let keys = vec!["id".to_string(), "rev_ver".to_string()];
        let mut rng = StdRng::seed_from_u64(8);

        let result = process_page("t_aud", &input, &plan, &keys, &RunOptions::default(), &mut rng).unwrap();
        assert!(result.updates.iter().all(|u| u.key.parts.len() == 2));
    }
}
