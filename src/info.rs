//! Measurement info: channel metadata, rates, filters, projections.
//!
//! Restricted to the fields the epoch core actually consumes; acquisition
//! details with no bearing on epoching (HPI, compensation, dig points) are
//! intentionally omitted.
use anyhow::{bail, Result};

use crate::error::EpoError;
use crate::proj::Proj;

// ── Channel type ──────────────────────────────────────────────────────────

/// Channel modality, used to group channels for threshold rejection and to
/// tag channel structs in the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelType {
    Meg,
    RefMeg,
    Eeg,
    Stim,
    Eog,
    Emg,
    Ecg,
    Misc,
    Seeg,
    Ecog,
}

impl ChannelType {
    /// Wire code, identical to the FIFF channel-kind values.
    pub fn code(self) -> i32 {
        match self {
            ChannelType::Meg => 1,
            ChannelType::Eeg => 2,
            ChannelType::Stim => 3,
            ChannelType::Eog => 202,
            ChannelType::RefMeg => 301,
            ChannelType::Emg => 302,
            ChannelType::Ecg => 402,
            ChannelType::Misc => 502,
            ChannelType::Seeg => 802,
            ChannelType::Ecog => 902,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        Ok(match code {
            1 => ChannelType::Meg,
            2 => ChannelType::Eeg,
            3 => ChannelType::Stim,
            202 => ChannelType::Eog,
            301 => ChannelType::RefMeg,
            302 => ChannelType::Emg,
            402 => ChannelType::Ecg,
            502 => ChannelType::Misc,
            802 => ChannelType::Seeg,
            902 => ChannelType::Ecog,
            other => bail!(EpoError::validation(format!(
                "unknown channel kind code {other}"
            ))),
        })
    }

    /// Short name used in config keys and error messages ("eeg", "eog", …).
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelType::Meg => "meg",
            ChannelType::RefMeg => "ref_meg",
            ChannelType::Eeg => "eeg",
            ChannelType::Stim => "stim",
            ChannelType::Eog => "eog",
            ChannelType::Emg => "emg",
            ChannelType::Ecg => "ecg",
            ChannelType::Misc => "misc",
            ChannelType::Seeg => "seeg",
            ChannelType::Ecog => "ecog",
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Channel info ──────────────────────────────────────────────────────────

/// Per-channel metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInfo {
    pub name: String,
    pub kind: ChannelType,
    /// Calibration factor applied to stored samples.
    pub cal: f64,
    /// Acquisition range factor; effective calibration is `cal × range`.
    pub range: f64,
    /// Position + orientation `[x, y, z, …]` in metres; zeros when unknown.
    pub loc: [f32; 12],
    pub unit: i32,
    pub unit_mul: i32,
}

impl ChannelInfo {
    /// A unit-calibrated channel with no position, enough for synthetic data.
    pub fn basic(name: impl Into<String>, kind: ChannelType) -> Self {
        ChannelInfo {
            name: name.into(),
            kind,
            cal: 1.0,
            range: 1.0,
            loc: [0.0; 12],
            unit: 0,
            unit_mul: 0,
        }
    }

    #[inline]
    pub fn calibration(&self) -> f64 {
        self.cal * self.range
    }
}

// ── Measurement info ──────────────────────────────────────────────────────

/// Recording-level metadata shared by every epoch in a store.
#[derive(Debug, Clone, PartialEq)]
pub struct Info {
    /// Current sampling rate in Hz (reflects decimation / resampling).
    pub sfreq: f64,
    /// Acquisition lowpass cutoff in Hz, if known. Consulted by the
    /// decimation aliasing check.
    pub lowpass: Option<f64>,
    /// Acquisition highpass cutoff in Hz, if known.
    pub highpass: Option<f64>,
    pub chs: Vec<ChannelInfo>,
    /// Names of channels marked bad; excluded from amplitude rejection.
    pub bads: Vec<String>,
    pub projs: Vec<Proj>,
}

impl Info {
    pub fn new(sfreq: f64, chs: Vec<ChannelInfo>) -> Result<Self> {
        if !sfreq.is_finite() || sfreq <= 0.0 {
            bail!(EpoError::validation(format!(
                "sampling rate must be positive, got {sfreq}"
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for ch in &chs {
            if !seen.insert(ch.name.as_str()) {
                bail!(EpoError::validation(format!(
                    "duplicate channel name {:?}",
                    ch.name
                )));
            }
        }
        Ok(Info {
            sfreq,
            lowpass: None,
            highpass: None,
            chs,
            bads: Vec::new(),
            projs: Vec::new(),
        })
    }

    pub fn n_chan(&self) -> usize {
        self.chs.len()
    }

    pub fn ch_names(&self) -> Vec<&str> {
        self.chs.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn ch_index(&self, name: &str) -> Option<usize> {
        self.chs.iter().position(|c| c.name == name)
    }

    /// Indices of non-bad channels of the given type.
    pub fn picks_by_type(&self, kind: ChannelType) -> Vec<usize> {
        self.chs
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind == kind && !self.bads.iter().any(|b| b == &c.name))
            .map(|(i, _)| i)
            .collect()
    }

    /// The set of channel types present, in a deterministic order.
    pub fn types_present(&self) -> Vec<ChannelType> {
        let mut types: Vec<ChannelType> = self.chs.iter().map(|c| c.kind).collect();
        types.sort();
        types.dedup();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eeg_info(n: usize) -> Info {
        let chs = (0..n)
            .map(|i| ChannelInfo::basic(format!("EEG{i:03}"), ChannelType::Eeg))
            .collect();
        Info::new(1000.0, chs).unwrap()
    }

    #[test]
    fn duplicate_channel_names_rejected() {
        let chs = vec![
            ChannelInfo::basic("A", ChannelType::Eeg),
            ChannelInfo::basic("A", ChannelType::Eog),
        ];
        assert!(Info::new(100.0, chs).is_err());
    }

    #[test]
    fn picks_exclude_bads() {
        let mut info = eeg_info(4);
        info.bads = vec!["EEG002".to_string()];
        assert_eq!(info.picks_by_type(ChannelType::Eeg), vec![0, 1, 3]);
    }

    #[test]
    fn type_codes_round_trip() {
        for t in [
            ChannelType::Meg,
            ChannelType::RefMeg,
            ChannelType::Eeg,
            ChannelType::Stim,
            ChannelType::Eog,
            ChannelType::Emg,
            ChannelType::Ecg,
            ChannelType::Misc,
            ChannelType::Seeg,
            ChannelType::Ecog,
        ] {
            assert_eq!(ChannelType::from_code(t.code()).unwrap(), t);
        }
        assert!(ChannelType::from_code(12345).is_err());
    }
}
