//! Ordered-course alignment.
//!
//! Expected controls are aligned against the punched ones with a Levenshtein
//! matrix, then replayed from the top-left corner. The replay rules are not a
//! textbook backtrace and published results depend on them staying as they
//! are: a control is only declared missing while the punch cursor stays put,
//! and a punch is only skipped when the matrix says skipping costs no more
//! than the whole alignment.

use crate::card::{Punch, NO_TIME};

use super::ControlResult;

/// Aligns expected control codes against a punch list, in order. Punches
/// whose code is not on the course are ignored here (they are reported as
/// extras by the caller); one result is produced per expected control.
pub(crate) fn align_ordered(expected: &[u16], punches: &[Punch]) -> Vec<ControlResult> {
    let filtered: Vec<&Punch> = punches
        .iter()
        .filter(|punch| expected.contains(&punch.code))
        .collect();
    let matrix = distance_matrix(expected, &filtered);
    let total_cost = matrix[expected.len()][filtered.len()];

    let mut results = Vec::with_capacity(expected.len());
    let mut i = 0;
    let mut j = 0;
    while i < expected.len() && j < filtered.len() {
        if matrix[i + 1][j + 1] == matrix[i][j] {
            results.push(ControlResult {
                expected_code: expected[i],
                found: true,
                timestamp_ms: filtered[j].timestamp_ms,
            });
            i += 1;
        } else if !filtered[j + 1..].iter().any(|punch| punch.code == expected[i]) {
            // The control was never punched later on; the punch under the
            // cursor may still match a following control.
            results.push(missed(expected[i]));
            i += 1;
            continue;
        } else if matrix[i][j + 1] > total_cost {
            // Skipping this punch costs more than the best alignment, so the
            // control is missing even though its code shows up later.
            results.push(missed(expected[i]));
            i += 1;
            continue;
        }
        j += 1;
    }
    while i < expected.len() {
        results.push(missed(expected[i]));
        i += 1;
    }
    results
}

fn missed(expected_code: u16) -> ControlResult {
    ControlResult {
        expected_code,
        found: false,
        timestamp_ms: NO_TIME,
    }
}

/// Full (m+1)×(n+1) edit-distance matrix; substitution is free on a code
/// match.
fn distance_matrix(expected: &[u16], filtered: &[&Punch]) -> Vec<Vec<usize>> {
    let m = expected.len();
    let n = filtered.len();
    let mut matrix = vec![vec![0usize; n + 1]; m + 1];
    for (i, row) in matrix.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=n {
        matrix[0][j] = j;
    }
    for i in 0..m {
        for j in 0..n {
            let substitution =
                matrix[i][j] + usize::from(expected[i] != filtered[j].code);
            matrix[i + 1][j + 1] = substitution
                .min(matrix[i][j + 1] + 1)
                .min(matrix[i + 1][j] + 1);
        }
    }
    matrix
}
