//! Per-epoch accept/reject decisions.
//!
//! A rejection criterion is either a peak-to-peak amplitude bound or a user
//! predicate, configured per channel type. All triggered criteria contribute
//! their reasons to one combined verdict — no short-circuiting, so the drop
//! log shows every offending channel type at once.
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use ndarray::ArrayView2;

use crate::error::EpoError;
use crate::info::{ChannelType, Info};
use crate::select::{REASON_NO_DATA, REASON_TOO_SHORT};

/// User predicate over one channel-type slice `[n_type_channels, n_times]`.
/// Returns whether the epoch is bad and the reasons when it is.
pub type RejectFn = Arc<dyn Fn(ArrayView2<'_, f64>) -> (bool, Vec<String>) + Send + Sync>;

/// One rejection criterion for a channel type.
#[derive(Clone)]
pub enum Criterion {
    /// Peak-to-peak amplitude bound (upper for `reject`, lower for `flat`).
    Bound(f64),
    /// User predicate; its return contract is validated at the boundary.
    Callable(RejectFn),
}

impl std::fmt::Debug for Criterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Criterion::Bound(v) => write!(f, "Bound({v})"),
            Criterion::Callable(_) => write!(f, "Callable(..)"),
        }
    }
}

/// Per-channel-type criteria.
pub type Thresholds = BTreeMap<ChannelType, Criterion>;

/// Convenience constructor for amplitude-bound thresholds.
pub fn bounds(pairs: impl IntoIterator<Item = (ChannelType, f64)>) -> Thresholds {
    pairs
        .into_iter()
        .map(|(t, v)| (t, Criterion::Bound(v)))
        .collect()
}

/// Check bound values are usable numbers.
pub fn validate_thresholds(thresholds: &Thresholds, what: &str) -> Result<()> {
    for (kind, criterion) in thresholds {
        if let Criterion::Bound(v) = criterion {
            if !v.is_finite() || *v < 0.0 {
                bail!(EpoError::validation(format!(
                    "{what} threshold for {kind} must be a non-negative finite \
                     number, got {v}"
                )));
            }
        }
    }
    Ok(())
}

/// Which direction "stricter" points for a threshold set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundKind {
    /// `reject`: an upper bound; stricter means lower.
    Upper,
    /// `flat`: a lower bound; stricter means higher.
    Lower,
}

/// Merge newly supplied thresholds into the remembered ones.
///
/// Re-applying with a looser bound than previously applied is an error;
/// thresholds only ever tighten across repeated calls. Callables replace
/// whatever was remembered (they carry no comparable value).
pub fn merge_thresholds(old: &mut Thresholds, new: &Thresholds, kind: BoundKind) -> Result<()> {
    // Check everything before inserting anything, so a bad value leaves the
    // remembered thresholds untouched.
    for (key, criterion) in new {
        if let (Some(Criterion::Bound(o)), Criterion::Bound(n)) = (old.get(key), criterion) {
            let looser = match kind {
                BoundKind::Upper => n > o,
                BoundKind::Lower => n < o,
            };
            if looser {
                let what = match kind {
                    BoundKind::Upper => "reject",
                    BoundKind::Lower => "flat",
                };
                bail!(EpoError::validation(format!(
                    "new {what} threshold for {key} ({n}) is less strict \
                     than the previously applied value ({o})"
                )));
            }
        }
    }
    for (key, criterion) in new {
        old.insert(*key, criterion.clone());
    }
    Ok(())
}

// ── Per-epoch decision ────────────────────────────────────────────────────

/// Evaluate one epoch against amplitude and callable criteria.
///
/// `data` is the full epoch `[n_ch, n_times]` (or absent for a window that
/// could not be read); `window` is the inclusive sample range the thresholds
/// look at (defaults to all samples).
pub fn is_good(
    data: Option<&ArrayView2<'_, f64>>,
    info: &Info,
    reject: &Thresholds,
    flat: &Thresholds,
    window: Option<(usize, usize)>,
) -> Result<(bool, Vec<String>)> {
    let data = match data {
        None => return Ok((false, vec![REASON_NO_DATA.to_string()])),
        Some(d) => d,
    };
    if data.ncols() < 2 || data.nrows() == 0 {
        return Ok((false, vec![REASON_TOO_SHORT.to_string()]));
    }
    let (w0, w1) = window.unwrap_or((0, data.ncols() - 1));
    let windowed = data.slice(ndarray::s![.., w0..=w1]);

    let mut reasons: Vec<String> = Vec::new();
    apply_set(&windowed, info, reject, BoundKind::Upper, &mut reasons)?;
    apply_set(&windowed, info, flat, BoundKind::Lower, &mut reasons)?;
    Ok((reasons.is_empty(), reasons))
}

fn apply_set(
    data: &ArrayView2<'_, f64>,
    info: &Info,
    thresholds: &Thresholds,
    kind: BoundKind,
    reasons: &mut Vec<String>,
) -> Result<()> {
    for (ch_type, criterion) in thresholds {
        let picks = info.picks_by_type(*ch_type);
        if picks.is_empty() {
            continue;
        }
        match criterion {
            Criterion::Bound(bound) => {
                // Worst violator of this group gives the reason.
                let mut worst: Option<(usize, f64)> = None;
                for &ch in &picks {
                    let p2p = peak_to_peak(&data.row(ch));
                    let violates = match kind {
                        BoundKind::Upper => p2p > *bound,
                        BoundKind::Lower => p2p < *bound,
                    };
                    if violates {
                        let more_extreme = match (kind, worst) {
                            (_, None) => true,
                            (BoundKind::Upper, Some((_, w))) => p2p > w,
                            (BoundKind::Lower, Some((_, w))) => p2p < w,
                        };
                        if more_extreme {
                            worst = Some((ch, p2p));
                        }
                    }
                }
                if let Some((ch, _)) = worst {
                    reasons.push(info.chs[ch].name.clone());
                }
            }
            Criterion::Callable(predicate) => {
                let mut slice = ndarray::Array2::<f64>::zeros((picks.len(), data.ncols()));
                for (row, &ch) in picks.iter().enumerate() {
                    slice.row_mut(row).assign(&data.row(ch));
                }
                let (bad, fn_reasons) = predicate(slice.view());
                if bad {
                    if fn_reasons.is_empty() {
                        bail!(EpoError::validation(format!(
                            "rejection callable for {ch_type} flagged an epoch \
                             but returned no reason"
                        )));
                    }
                    reasons.extend(fn_reasons);
                }
            }
        }
    }
    Ok(())
}

fn peak_to_peak(row: &ndarray::ArrayView1<'_, f64>) -> f64 {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for &v in row {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    hi - lo
}
