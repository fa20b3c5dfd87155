//! # epo — event-aligned epoch management for multichannel biosignals
//!
//! `epo` carves a continuous multichannel recording into event-anchored,
//! fixed-length segments ("epochs"), manages their selection / rejection /
//! equalization lifecycle, and persists them to a FIFF-style tagged binary
//! container with size-based file splitting.
//!
//! ## Pipeline overview
//!
//! ```text
//! continuous source + event table
//!   │
//!   ├─ event::resolve_duplicates   drop / merge same-sample markers
//!   ├─ Epochs::new                 window math, IGNORED / TOO_SHORT pass
//!   ├─ drop_bad                    amplitude / callable / annotation reject
//!   ├─ crop · decimate · resample · apply_baseline · equalize …
//!   └─ fiff::write_epochs          chunked container, byte-budget splitting
//!        │
//!        └─→ fiff::read_epochs     identical store after round trip
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use epo::{ArraySource, Epochs, EpochsOptions, Event, Info, ChannelInfo, ChannelType};
//! use ndarray::Array2;
//!
//! // 1. An in-memory continuous recording: 4 channels, 10 s at 1 kHz.
//! let chs = (0..4)
//!     .map(|i| ChannelInfo::basic(format!("EEG{i:03}"), ChannelType::Eeg))
//!     .collect();
//! let info = Info::new(1000.0, chs).unwrap();
//! let source = ArraySource::new(info, Array2::zeros((4, 10_000))).unwrap();
//!
//! // 2. Carve epochs around three events.
//! let events = vec![
//!     Event::new(2000, 0, 1),
//!     Event::new(5000, 0, 1),
//!     Event::new(8000, 0, 2),
//! ];
//! let mut epochs = Epochs::new(
//!     Arc::new(source),
//!     &events,
//!     None,
//!     EpochsOptions { tmin: -0.2, tmax: 0.5, preload: true, ..Default::default() },
//! )
//! .unwrap();
//!
//! // 3. Transform and persist.
//! epochs.apply_baseline(Some((-0.2, 0.0))).unwrap();
//! let saved = epo::fiff::write_epochs(
//!     std::path::Path::new("run1-epo.fif"),
//!     &epochs,
//!     &epo::fiff::SaveOptions::default(),
//! )
//! .unwrap();
//! assert_eq!(saved.len(), 1);
//! ```

pub mod annot;
pub mod clock;
pub mod dsp;
pub mod error;
pub mod event;
pub mod fiff;
pub mod info;
pub mod meta;
pub mod proj;
pub mod reject;
pub mod select;
pub mod source;
pub mod store;

// ── Crate-root re-exports ─────────────────────────────────────────────────
//
// Everything a downstream user is likely to need is available directly as
// `epo::Foo` without having to know the internal module layout.

pub use annot::{Annotation, Annotations};
pub use clock::SampleClock;
pub use error::EpoError;
pub use event::{resolve_duplicates, DuplicatePolicy, Event, EventId};
pub use info::{ChannelInfo, ChannelType, Info};
pub use meta::{MetadataTable, Query};
pub use proj::{make_projector, Proj};
pub use reject::{bounds, Criterion, RejectFn, Thresholds};
pub use select::{DropLog, EqualizeMethod};
pub use source::{ArraySource, ContinuousSource};
pub use store::{Epochs, EpochsOptions};
