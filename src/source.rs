//! Continuous-data source contract.
//!
//! The epoch core never parses acquisition files itself; it pulls windows of
//! calibrated samples through this trait. Any raw reader (preloaded or not)
//! can back a lazy epoch store by implementing it.
use anyhow::{bail, Result};
use ndarray::Array2;

use crate::annot::Annotations;
use crate::error::EpoError;
use crate::info::Info;

/// A provider of continuous multichannel data.
///
/// Sample indices are absolute (acquisition time): valid reads cover
/// `[first_samp, first_samp + n_times)`.
pub trait ContinuousSource: Send + Sync {
    fn info(&self) -> &Info;

    /// Index of the first available sample in acquisition time.
    fn first_samp(&self) -> i64;

    /// Total number of available samples.
    fn n_times(&self) -> usize;

    /// Read the half-open absolute window `[start, stop)` for the given
    /// channel indices, returning `[len(picks), stop - start]`.
    ///
    /// The whole window must be in range; partial windows are the caller's
    /// problem to detect beforehand.
    fn read(&self, picks: &[usize], start: i64, stop: i64) -> Result<Array2<f64>>;

    /// Annotations attached to the recording, if any.
    fn annotations(&self) -> Option<&Annotations> {
        None
    }

    #[inline]
    fn last_samp(&self) -> i64 {
        self.first_samp() + self.n_times() as i64 - 1
    }
}

// ── In-memory source ──────────────────────────────────────────────────────

/// A fully materialized continuous recording.
pub struct ArraySource {
    info: Info,
    data: Array2<f64>,
    first_samp: i64,
    annotations: Option<Annotations>,
}

impl ArraySource {
    pub fn new(info: Info, data: Array2<f64>) -> Result<Self> {
        Self::with_first_samp(info, data, 0)
    }

    pub fn with_first_samp(info: Info, data: Array2<f64>, first_samp: i64) -> Result<Self> {
        if data.nrows() != info.n_chan() {
            bail!(EpoError::validation(format!(
                "data has {} rows but info describes {} channels",
                data.nrows(),
                info.n_chan()
            )));
        }
        Ok(ArraySource { info, data, first_samp, annotations: None })
    }

    pub fn set_annotations(&mut self, annotations: Option<Annotations>) {
        self.annotations = annotations;
    }
}

impl ContinuousSource for ArraySource {
    fn info(&self) -> &Info {
        &self.info
    }

    fn first_samp(&self) -> i64 {
        self.first_samp
    }

    fn n_times(&self) -> usize {
        self.data.ncols()
    }

    fn read(&self, picks: &[usize], start: i64, stop: i64) -> Result<Array2<f64>> {
        let rel_start = start - self.first_samp;
        let rel_stop = stop - self.first_samp;
        if rel_start < 0 || rel_stop > self.data.ncols() as i64 || rel_start > rel_stop {
            bail!(EpoError::validation(format!(
                "read window [{start}, {stop}) outside recording \
                 [{}, {})",
                self.first_samp,
                self.first_samp + self.data.ncols() as i64
            )));
        }
        let (rel_start, rel_stop) = (rel_start as usize, rel_stop as usize);
        let mut out = Array2::<f64>::zeros((picks.len(), rel_stop - rel_start));
        for (row, &ch) in picks.iter().enumerate() {
            if ch >= self.data.nrows() {
                bail!(EpoError::validation(format!(
                    "channel index {ch} out of range ({} channels)",
                    self.data.nrows()
                )));
            }
            out.row_mut(row)
                .assign(&self.data.slice(ndarray::s![ch, rel_start..rel_stop]));
        }
        Ok(out)
    }

    fn annotations(&self) -> Option<&Annotations> {
        self.annotations.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::{ChannelInfo, ChannelType};

    fn source() -> ArraySource {
        let chs = (0..3)
            .map(|i| ChannelInfo::basic(format!("ch{i}"), ChannelType::Eeg))
            .collect();
        let info = Info::new(100.0, chs).unwrap();
        let data = Array2::from_shape_fn((3, 50), |(c, t)| (c * 100 + t) as f64);
        ArraySource::with_first_samp(info, data, 10).unwrap()
    }

    #[test]
    fn read_respects_first_samp() {
        let src = source();
        let out = src.read(&[0, 2], 10, 13).unwrap();
        assert_eq!(out.shape(), &[2, 3]);
        assert_eq!(out[[0, 0]], 0.0);
        assert_eq!(out[[1, 0]], 200.0);
    }

    #[test]
    fn out_of_range_read_fails() {
        let src = source();
        assert!(src.read(&[0], 5, 12).is_err());
        assert!(src.read(&[0], 55, 65).is_err());
    }

    #[test]
    fn channel_count_must_match_info() {
        let chs = vec![ChannelInfo::basic("a", ChannelType::Eeg)];
        let info = Info::new(100.0, chs).unwrap();
        let data = Array2::<f64>::zeros((2, 10));
        assert!(ArraySource::new(info, data).is_err());
    }
}
