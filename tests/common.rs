/// Shared builders for synthetic recordings and epoch stores.
use std::sync::Arc;

use epo::{ArraySource, ChannelInfo, ChannelType, ContinuousSource, Epochs, Event, Info};
use ndarray::{Array2, Array3};

#[allow(unused)]
pub fn eeg_info(n_ch: usize, sfreq: f64) -> Info {
    let chs = (0..n_ch)
        .map(|i| ChannelInfo::basic(format!("EEG{i:03}"), ChannelType::Eeg))
        .collect();
    Info::new(sfreq, chs).unwrap()
}

/// Deterministic continuous data: channel index in the hundreds digit,
/// sample index in the rest.
#[allow(unused)]
pub fn ramp_source(n_ch: usize, n_samples: usize, sfreq: f64) -> Arc<dyn ContinuousSource> {
    let info = eeg_info(n_ch, sfreq);
    let data = Array2::from_shape_fn((n_ch, n_samples), |(c, t)| {
        c as f64 * 10_000.0 + t as f64
    });
    Arc::new(ArraySource::new(info, data).unwrap())
}

/// Events spaced `step` samples apart starting at `start`, all code 1.
#[allow(unused)]
pub fn regular_events(n: usize, start: i64, step: i64) -> Vec<Event> {
    (0..n).map(|i| Event::new(start + i as i64 * step, 0, 1)).collect()
}

/// Preloaded store built straight from an array, one code-1 event per epoch.
#[allow(unused)]
pub fn array_store(n_epochs: usize, n_ch: usize, n_times: usize, sfreq: f64) -> Epochs {
    let info = eeg_info(n_ch, sfreq);
    let data = Array3::from_shape_fn((n_epochs, n_ch, n_times), |(e, c, t)| {
        (e * 100_000 + c * 1_000 + t) as f64
    });
    let events = regular_events(n_epochs, 0, n_times as i64);
    Epochs::from_array(info, data, events, None, 0.0, None).unwrap()
}

