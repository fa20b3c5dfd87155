mod common;

use approx::assert_abs_diff_eq;
use common::{array_store, eeg_info, ramp_source, regular_events};
use epo::{ChannelInfo, ChannelType, Epochs, EpochsOptions, Event};
use ndarray::{s, Array3};
use std::sync::Arc;

#[test]
fn crop_is_idempotent() {
    let mut once = array_store(3, 4, 100, 1000.0);
    once.crop(0.02, 0.07, true).unwrap();
    let mut twice = array_store(3, 4, 100, 1000.0);
    twice.crop(0.02, 0.07, true).unwrap();
    twice.crop(0.02, 0.07, true).unwrap();

    assert_eq!(once.times(), twice.times());
    assert_eq!(
        once.get_data(None, None, None, None).unwrap(),
        twice.get_data(None, None, None, None).unwrap()
    );
}

#[test]
fn crop_bounds_validated() {
    let mut epochs = array_store(2, 2, 100, 1000.0);
    // Times cover [0, 0.099]; entirely-outside bounds are an error.
    assert!(epochs.crop(0.2, 0.3, true).is_err());
    // Partially outside clamps (with a warning) instead of failing.
    epochs.crop(0.05, 0.5, true).unwrap();
    assert_abs_diff_eq!(epochs.tmin(), 0.05, epsilon = 1e-9);
    assert_abs_diff_eq!(epochs.tmax(), 0.099, epsilon = 1e-9);
}

#[test]
fn crop_keeps_configured_baseline() {
    let mut epochs = array_store(2, 2, 100, 1000.0);
    epochs.apply_baseline(Some((0.0, 0.01))).unwrap();
    epochs.crop(0.05, 0.09, true).unwrap();
    // The window value survives even though its samples are gone.
    assert_eq!(epochs.baseline(), Some((0.0, 0.01)));
    assert!(epochs.baseline_cropped());
}

#[test]
fn decimation_composes_like_direct_slicing() {
    // 5 epochs × 10 channels × 20 samples; 6 = 2 × 3.
    let info = eeg_info(10, 1000.0);
    let data = Array3::from_shape_fn((5, 10, 20), |(e, c, t)| {
        (e as f64 + 1.0) * 1000.0 + c as f64 * 31.0 + (t as f64).sin()
    });
    let events = regular_events(5, 0, 20);
    let make = || {
        Epochs::from_array(info.clone(), data.clone(), events.clone(), None, 0.0, None)
            .unwrap()
    };

    let mut one_call = make();
    one_call.decimate(6, 0).unwrap();
    let mut chained = make();
    chained.decimate(2, 0).unwrap();
    chained.decimate(3, 0).unwrap();
    let mut offset = make();
    offset.decimate(6, 1).unwrap();

    let direct = data.slice(s![.., .., ..;6]).to_owned();
    let direct_off = data.slice(s![.., .., 1..;6]).to_owned();
    assert_eq!(one_call.get_data(None, None, None, None).unwrap(), direct);
    assert_eq!(chained.get_data(None, None, None, None).unwrap(), direct);
    assert_eq!(offset.get_data(None, None, None, None).unwrap(), direct_off);
    assert_abs_diff_eq!(one_call.info.sfreq, 1000.0 / 6.0, epsilon = 1e-9);
    assert_abs_diff_eq!(chained.info.sfreq, 1000.0 / 6.0, epsilon = 1e-9);
}

#[test]
fn baseline_single_sample_window() {
    // Two epochs of [2, 3] at 1 kHz; baseline (0, 0) subtracts the first
    // sample, leaving [0, 1].
    let info = eeg_info(1, 1000.0);
    let data = Array3::from_shape_vec((2, 1, 2), vec![2.0, 3.0, 2.0, 3.0]).unwrap();
    let events = regular_events(2, 0, 10);
    let mut epochs = Epochs::from_array(info, data, events, None, 0.0, None).unwrap();
    epochs.apply_baseline(Some((0.0, 0.0))).unwrap();

    let d = epochs.get_data(None, None, None, None).unwrap();
    for e in 0..2 {
        assert_abs_diff_eq!(d[[e, 0, 0]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(d[[e, 0, 1]], 1.0, epsilon = 1e-12);
    }
}

#[test]
fn baseline_removal_after_preload_is_an_error() {
    let mut epochs = array_store(2, 2, 50, 1000.0);
    epochs.apply_baseline(Some((0.0, 0.02))).unwrap();
    let err = epochs.apply_baseline(None).unwrap_err();
    assert!(err.to_string().contains("cannot be removed"));
    // Re-correcting with a different window is still allowed.
    epochs.apply_baseline(Some((0.0, 0.01))).unwrap();
}

#[test]
fn baseline_outside_window_rejected() {
    let mut epochs = array_store(2, 2, 50, 1000.0);
    assert!(epochs.apply_baseline(Some((-0.5, 0.0))).is_err());
    assert!(epochs.apply_baseline(Some((0.02, 0.01))).is_err());
}

#[test]
fn lazy_and_preloaded_agree() {
    let source = ramp_source(3, 5_000, 500.0);
    let events = vec![Event::new(1000, 0, 1), Event::new(2000, 0, 1), Event::new(3000, 0, 2)];
    let opts = EpochsOptions {
        tmin: -0.1,
        tmax: 0.3,
        baseline: Some((-0.1, 0.0)),
        decim: 2,
        ..Default::default()
    };
    let mut lazy = Epochs::new(Arc::clone(&source), &events, None, opts.clone()).unwrap();
    let mut pre = Epochs::new(
        source,
        &events,
        None,
        EpochsOptions { preload: true, ..opts },
    )
    .unwrap();

    assert!(!lazy.is_preloaded());
    assert!(pre.is_preloaded());
    let a = lazy.get_data(None, None, None, None).unwrap();
    let b = pre.get_data(None, None, None, None).unwrap();
    assert_eq!(a.dim(), b.dim());
    for (x, y) in a.iter().zip(b.iter()) {
        assert_abs_diff_eq!(x, y, epsilon = 1e-12);
    }
    // Accessing data did not silently preload.
    assert!(!lazy.is_preloaded());
    lazy.load().unwrap();
    assert!(lazy.is_preloaded());
}

#[test]
fn selection_invariant_after_drops() {
    let mut epochs = array_store(6, 2, 50, 1000.0);
    epochs.drop(&[1, 4], Some("USER")).unwrap();
    assert_eq!(epochs.len(), 4);
    assert_eq!(epochs.selection(), &[0, 2, 3, 5]);
    assert_eq!(
        epochs.get_data(None, None, None, None).unwrap().dim().0,
        epochs.selection().len()
    );
    for &idx in epochs.selection() {
        assert!(epochs.drop_log().entry(idx).is_empty());
    }
    assert_eq!(epochs.drop_log().entry(1), &["USER".to_string()]);
    assert_eq!(epochs.drop_log().entry(4), &["USER".to_string()]);
}

#[test]
fn empty_store_transforms_fail_but_inspection_works() {
    let mut epochs = array_store(2, 2, 50, 1000.0);
    epochs.drop(&[0, 1], None).unwrap();
    assert!(epochs.is_empty());
    assert_eq!(epochs.drop_log().n_kept(), 0);
    assert_eq!(epochs.n_times(), 50);

    let crop = epochs.crop(0.0, 0.01, true).unwrap_err();
    assert!(crop.to_string().contains("empty"));
    assert!(epochs.decimate(2, 0).is_err());
    assert!(epochs.resample(500.0).is_err());
    assert!(epochs.apply_baseline(Some((0.0, 0.01))).is_err());
    assert!(epochs.average().is_err());
}

#[test]
fn get_data_subsetting() {
    let mut epochs = array_store(4, 3, 100, 1000.0);
    let d = epochs
        .get_data(Some(&[2]), Some(&[1, 3]), Some(0.01), Some(0.02))
        .unwrap();
    assert_eq!(d.dim(), (2, 1, 11));
    // Row 1, channel 2, sample 10 of the original layout.
    assert_abs_diff_eq!(d[[0, 0, 0]], 102_010.0, epsilon = 1e-9);
    assert!(epochs.get_data(Some(&[9]), None, None, None).is_err());
    assert!(epochs.get_data(None, Some(&[9]), None, None).is_err());
}

#[test]
fn data_view_requires_preload() {
    let source = ramp_source(2, 2_000, 1000.0);
    let events = vec![Event::new(500, 0, 1)];
    let mut epochs = Epochs::new(
        source,
        &events,
        None,
        EpochsOptions { tmin: -0.1, tmax: 0.1, ..Default::default() },
    )
    .unwrap();
    assert!(epochs.data().is_err());
    assert!(epochs.shift_time(0.01).is_err());
    epochs.load().unwrap();
    assert_eq!(epochs.data().unwrap().dim(), (1, 2, 201));
}

#[test]
fn add_channels_mismatches_are_descriptive() {
    let a = array_store(3, 2, 50, 1000.0);

    // Rate mismatch.
    let mut b = array_store(3, 2, 50, 500.0);
    let mut a1 = a.clone();
    // Rename b's channels so only the rate differs.
    b.info.chs = vec![
        ChannelInfo::basic("X0", ChannelType::Eeg),
        ChannelInfo::basic("X1", ChannelType::Eeg),
    ];
    let err = a1.add_channels(vec![b]).unwrap_err();
    assert!(err.to_string().contains("sampling rate"));

    // Row-count mismatch.
    let mut c = array_store(2, 2, 50, 1000.0);
    c.info.chs = vec![
        ChannelInfo::basic("X0", ChannelType::Eeg),
        ChannelInfo::basic("X1", ChannelType::Eeg),
    ];
    let mut a2 = a.clone();
    let err = a2.add_channels(vec![c]).unwrap_err();
    assert!(err.to_string().contains("time mismatch"));

    // Name collision.
    let mut a3 = a.clone();
    let err = a3.add_channels(vec![a.clone()]).unwrap_err();
    assert!(err.to_string().contains("collision"));

    // A compatible pair concatenates.
    let mut d = array_store(3, 2, 50, 1000.0);
    d.info.chs = vec![
        ChannelInfo::basic("EOG061", ChannelType::Eog),
        ChannelInfo::basic("EOG062", ChannelType::Eog),
    ];
    let mut a4 = a.clone();
    a4.add_channels(vec![d]).unwrap();
    assert_eq!(a4.info.n_chan(), 4);
    assert_eq!(a4.data().unwrap().dim(), (3, 4, 50));
}

#[test]
fn resample_halves_samples_and_keeps_anchor() {
    let info = eeg_info(2, 1000.0);
    let data = Array3::from_shape_fn((3, 2, 200), |(_, _, t)| {
        (2.0 * std::f64::consts::PI * 5.0 * t as f64 / 1000.0).sin()
    });
    let events = regular_events(3, 0, 200);
    let mut epochs = Epochs::from_array(info, data, events, None, -0.05, None).unwrap();
    let tmin_before = epochs.tmin();
    epochs.resample(500.0).unwrap();
    assert_eq!(epochs.n_times(), 100);
    assert_abs_diff_eq!(epochs.info.sfreq, 500.0, epsilon = 1e-12);
    assert_abs_diff_eq!(epochs.tmin(), tmin_before, epsilon = 1e-3);
}

#[test]
fn channel_picking() {
    let mut epochs = array_store(2, 4, 30, 1000.0);
    epochs.pick_channels(&["EEG001", "EEG003"]).unwrap();
    assert_eq!(epochs.info.ch_names(), vec!["EEG001", "EEG003"]);
    assert_eq!(epochs.data().unwrap().dim(), (2, 2, 30));
    // Channel values follow the picked indices.
    assert_abs_diff_eq!(epochs.data().unwrap()[[0, 1, 0]], 3_000.0, epsilon = 1e-9);

    let mut epochs = array_store(2, 4, 30, 1000.0);
    epochs.drop_channels(&["EEG000"]).unwrap();
    assert_eq!(epochs.info.n_chan(), 3);
    assert!(epochs.drop_channels(&["nope"]).is_err());
}

#[test]
fn metadata_alignment_enforced() {
    use serde_json::json;
    let mut epochs = array_store(3, 2, 20, 1000.0);
    let rows: Vec<_> = (0..3)
        .map(|i| json!({"rt": i as f64 * 0.1}).as_object().unwrap().clone())
        .collect();
    let table = epo::MetadataTable::new(vec!["rt".to_string()], rows).unwrap();
    epochs.set_metadata(Some(table.clone())).unwrap();
    // Dropping a row keeps metadata aligned.
    epochs.drop(&[1], None).unwrap();
    assert_eq!(epochs.metadata().unwrap().len(), 2);
    // A table of the wrong length is rejected outright.
    assert!(epochs.set_metadata(Some(table)).is_err());
}

#[test]
fn get_data_scaled_by_channel_type() {
    use std::collections::BTreeMap;
    let mut epochs = array_store(1, 2, 10, 1000.0);
    let mut units = BTreeMap::new();
    units.insert(ChannelType::Eeg, 1e6);
    let scaled = epochs.get_data_scaled(None, None, None, None, &units).unwrap();
    let plain = epochs.get_data(None, None, None, None).unwrap();
    assert_abs_diff_eq!(scaled[[0, 1, 3]], plain[[0, 1, 3]] * 1e6, epsilon = 1e-6);
    // Types without a factor pass through unscaled.
    let empty = BTreeMap::new();
    let same = epochs.get_data_scaled(None, None, None, None, &empty).unwrap();
    assert_eq!(same, plain);
}

#[test]
fn average_over_epochs() {
    let info = eeg_info(1, 1000.0);
    let data = Array3::from_shape_vec((2, 1, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    let events = regular_events(2, 0, 10);
    let mut epochs = Epochs::from_array(info, data, events, None, 0.0, None).unwrap();
    let (evoked, n) = epochs.average().unwrap();
    assert_eq!(n, 2);
    assert_abs_diff_eq!(evoked[[0, 0]], 2.0, epsilon = 1e-12);
    assert_abs_diff_eq!(evoked[[0, 1]], 3.0, epsilon = 1e-12);
}
