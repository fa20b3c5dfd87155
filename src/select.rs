//! Drop log, selection invariants, and count equalization.
//!
//! Every original candidate event owns one drop-log entry for the life of the
//! store. An empty entry means the row is kept; a non-empty entry holds the
//! reasons it was excluded. Entries only ever go from kept to dropped.
use std::collections::BTreeSet;

use anyhow::{bail, Context, Result};
use rand::seq::SliceRandom;

use crate::error::EpoError;
use crate::event::EventId;

// ── Standard reasons ──────────────────────────────────────────────────────

pub const REASON_IGNORED: &str = "IGNORED";
pub const REASON_TOO_SHORT: &str = "TOO_SHORT";
pub const REASON_NO_DATA: &str = "NO_DATA";
pub const REASON_EQUALIZED: &str = "EQUALIZED_COUNT";
pub const REASON_USER: &str = "USER";

// ── Drop log ──────────────────────────────────────────────────────────────

/// Per-original-candidate record of inclusion/exclusion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DropLog {
    entries: Vec<Vec<String>>,
}

impl DropLog {
    /// All `n` candidates start out kept.
    pub fn new(n: usize) -> Self {
        DropLog { entries: vec![Vec::new(); n] }
    }

    pub fn from_entries(entries: Vec<Vec<String>>) -> Self {
        DropLog { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Vec<String>] {
        &self.entries
    }

    pub fn entry(&self, idx: usize) -> &[String] {
        &self.entries[idx]
    }

    pub fn is_kept(&self, idx: usize) -> bool {
        self.entries[idx].is_empty()
    }

    /// Record reasons for a candidate. Dropping is terminal: a second mark on
    /// the same entry leaves the first reasons in place.
    pub fn mark(&mut self, idx: usize, reasons: impl IntoIterator<Item = String>) {
        if self.entries[idx].is_empty() {
            self.entries[idx] = reasons.into_iter().collect();
        }
    }

    pub fn kept_indices(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn n_kept(&self) -> usize {
        self.entries.iter().filter(|e| e.is_empty()).count()
    }

    /// Fraction of candidates dropped, ignoring the given reason (pass "" to
    /// count everything).
    pub fn drop_fraction(&self, ignore: &str) -> f64 {
        let considered: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.is_empty() || !e.iter().any(|r| r == ignore))
            .collect();
        if considered.is_empty() {
            return 0.0;
        }
        let dropped = considered.iter().filter(|e| !e.is_empty()).count();
        dropped as f64 / considered.len() as f64
    }

    /// The selection/drop-log consistency invariant: `selection` lists
    /// exactly the kept entries, in order.
    pub fn assert_consistent(&self, selection: &[usize]) -> Result<()> {
        let kept = self.kept_indices();
        if kept != selection {
            bail!(EpoError::state(format!(
                "drop log and selection diverged: {} kept entries vs \
                 {} selected rows",
                kept.len(),
                selection.len()
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.entries).expect("strings serialize")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<Vec<String>> =
            serde_json::from_str(json).context("parse drop log json")?;
        Ok(DropLog { entries })
    }
}

// ── Equalization ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqualizeMethod {
    /// Greedy removal from the larger group of the member whose removal
    /// minimizes the remaining total sample-time discrepancy.
    MinTime,
    /// Drop trailing excess rows.
    Truncate,
    /// Uniform-random removal of excess rows.
    Random,
}

/// Validate the two key groups used for equalization: no mixing of
/// hierarchical and flat keys, and the matched code sets must not overlap.
pub fn validate_equalize_keys(
    event_id: &EventId,
    keys_a: &[&str],
    keys_b: &[&str],
) -> Result<(Vec<i32>, Vec<i32>)> {
    let all: Vec<&str> = keys_a.iter().chain(keys_b.iter()).copied().collect();
    let n_hier = all.iter().filter(|k| k.contains('/')).count();
    if n_hier != 0 && n_hier != all.len() {
        bail!(EpoError::validation(
            "cannot mix hierarchical and regular event names when equalizing"
        ));
    }
    let codes_a = event_id.matching_codes_any(keys_a)?;
    let codes_b = event_id.matching_codes_any(keys_b)?;
    let set_a: BTreeSet<i32> = codes_a.iter().copied().collect();
    let set_b: BTreeSet<i32> = codes_b.iter().copied().collect();
    if !set_a.is_disjoint(&set_b) {
        bail!(EpoError::validation(format!(
            "event keys {keys_a:?} and {keys_b:?} select overlapping events"
        )));
    }
    Ok((codes_a, codes_b))
}

/// Row indices to drop so both groups end up the same size.
///
/// Groups are `(row_index, event_sample)` pairs; the returned indices always
/// come from the larger group. Ties in the mintime cost break toward the
/// lowest row index.
pub fn equalize_counts(
    group_a: &[(usize, i64)],
    group_b: &[(usize, i64)],
    method: EqualizeMethod,
) -> Vec<usize> {
    let (larger, smaller) = if group_a.len() >= group_b.len() {
        (group_a, group_b)
    } else {
        (group_b, group_a)
    };
    let n_drop = larger.len() - smaller.len();
    if n_drop == 0 {
        return Vec::new();
    }
    match method {
        EqualizeMethod::Truncate => larger[smaller.len()..].iter().map(|&(i, _)| i).collect(),
        EqualizeMethod::Random => {
            let mut rng = rand::thread_rng();
            let mut rows: Vec<usize> = larger.iter().map(|&(i, _)| i).collect();
            rows.shuffle(&mut rng);
            rows.truncate(n_drop);
            rows.sort_unstable();
            rows
        }
        EqualizeMethod::MinTime => mintime_drop(larger, smaller, n_drop),
    }
}

fn mintime_drop(larger: &[(usize, i64)], smaller: &[(usize, i64)], n_drop: usize) -> Vec<usize> {
    let mut remaining: Vec<(usize, i64)> = larger.to_vec();
    let mut dropped = Vec::with_capacity(n_drop);
    for _ in 0..n_drop {
        let mut best_pos = 0usize;
        let mut best_cost = f64::INFINITY;
        for cand in 0..remaining.len() {
            let cost: f64 = remaining
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != cand)
                .map(|(_, &(_, s))| nearest_distance(s, smaller))
                .sum();
            let better = cost < best_cost
                || (cost == best_cost && remaining[cand].0 < remaining[best_pos].0);
            if better {
                best_cost = cost;
                best_pos = cand;
            }
        }
        dropped.push(remaining.remove(best_pos).0);
    }
    dropped.sort_unstable();
    dropped
}

fn nearest_distance(sample: i64, group: &[(usize, i64)]) -> f64 {
    group
        .iter()
        .map(|&(_, s)| (sample - s).abs() as f64)
        .fold(f64::INFINITY, f64::min)
}
