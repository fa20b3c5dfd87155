//! Time ↔ sample-index arithmetic.
//!
//! A [`SampleClock`] maps between real time in seconds and integer sample
//! indices given a sampling rate and a first-sample offset. Purely
//! functional — it owns no data and never changes once built.
//!
//! Rounding: `time_to_sample` uses round-half-away (`f64::round`), so window
//! bounds that land a hair off an exact sample (e.g. `0.7 * 600 =
//! 419.99999…`) still resolve to the intended index.
use anyhow::{bail, Result};

use crate::error::EpoError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleClock {
    /// Sampling rate in Hz. Always > 0.
    pub sfreq: f64,
    /// Index of the first sample of the recording in acquisition time.
    pub first_samp: i64,
}

impl SampleClock {
    pub fn new(sfreq: f64) -> Result<Self> {
        Self::with_first_samp(sfreq, 0)
    }

    pub fn with_first_samp(sfreq: f64, first_samp: i64) -> Result<Self> {
        if !sfreq.is_finite() || sfreq <= 0.0 {
            bail!(EpoError::validation(format!(
                "sampling rate must be a positive finite number, got {sfreq}"
            )));
        }
        Ok(SampleClock { sfreq, first_samp })
    }

    /// Relative sample offset for a time offset in seconds.
    #[inline]
    pub fn time_to_sample(&self, t: f64) -> i64 {
        (t * self.sfreq).round() as i64
    }

    /// Time offset in seconds for a relative sample offset.
    #[inline]
    pub fn sample_to_time(&self, s: i64) -> f64 {
        s as f64 / self.sfreq
    }

    /// Number of samples in the inclusive window `[tmin, tmax]`.
    ///
    /// `round((tmax - tmin) * sfreq) + 1`, fixed once at construction for
    /// every epoch sharing this clock.
    pub fn n_samples(&self, tmin: f64, tmax: f64) -> Result<usize> {
        let (start, stop) = self.window(tmin, tmax)?;
        Ok((stop - start + 1) as usize)
    }

    /// Inclusive `(start, stop)` sample offsets of the window `[tmin, tmax]`
    /// relative to the anchoring event sample.
    pub fn window(&self, tmin: f64, tmax: f64) -> Result<(i64, i64)> {
        if tmin > tmax {
            bail!(EpoError::validation(format!(
                "tmin ({tmin}) must not exceed tmax ({tmax})"
            )));
        }
        Ok((self.time_to_sample(tmin), self.time_to_sample(tmax)))
    }

    /// Time vector for `n` retained samples starting at `tmin`, keeping
    /// every `decim`-th sample.
    pub fn times(&self, tmin: f64, n: usize, decim: usize) -> Vec<f64> {
        let start = self.time_to_sample(tmin);
        (0..n)
            .map(|i| (start + (i * decim) as i64) as f64 / self.sfreq)
            .collect()
    }

    /// Absolute sample index of an event-relative offset.
    #[inline]
    pub fn absolute(&self, event_sample: i64, offset: i64) -> i64 {
        event_sample + offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_sample_counts() {
        let clock = SampleClock::new(1000.0).unwrap();
        assert_eq!(clock.n_samples(-0.2, 0.5).unwrap(), 701);
        assert_eq!(clock.n_samples(0.0, 0.0).unwrap(), 1);
    }

    #[test]
    fn rounding_tolerates_fp_jitter() {
        // 0.7 * 600 = 419.99999999999994 must still give sample 420.
        let clock = SampleClock::new(600.0).unwrap();
        assert_eq!(clock.time_to_sample(0.7), 420);
    }

    #[test]
    fn tmin_greater_than_tmax_rejected() {
        let clock = SampleClock::new(100.0).unwrap();
        assert!(clock.window(0.5, -0.5).is_err());
    }

    #[test]
    fn bad_sfreq_rejected() {
        assert!(SampleClock::new(0.0).is_err());
        assert!(SampleClock::new(-1.0).is_err());
        assert!(SampleClock::new(f64::NAN).is_err());
    }

    #[test]
    fn decimated_times() {
        let clock = SampleClock::new(100.0).unwrap();
        let t = clock.times(0.0, 3, 2);
        assert_eq!(t, vec![0.0, 0.02, 0.04]);
    }
}
