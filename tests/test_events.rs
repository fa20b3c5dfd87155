mod common;

use common::ramp_source;
use epo::{DuplicatePolicy, Epochs, EpochsOptions, Event, EventId};

fn dup_options(policy: DuplicatePolicy) -> EpochsOptions {
    EpochsOptions {
        tmin: 0.0,
        tmax: 0.05,
        event_repeated: policy,
        preload: true,
        ..Default::default()
    }
}

#[test]
fn repeated_events_drop_policy() {
    let source = ramp_source(2, 100, 1000.0);
    let events = vec![Event::new(10, 0, 1), Event::new(10, 0, 2)];
    let mut epochs = Epochs::new(source, &events, None, dup_options(DuplicatePolicy::Drop))
        .unwrap();

    assert_eq!(epochs.len(), 1);
    assert_eq!(epochs.selection(), &[0]);
    let entries = epochs.drop_log().entries();
    assert_eq!(entries.len(), 2);
    assert!(entries[0].is_empty());
    assert_eq!(entries[1], vec!["DROP DUPLICATE".to_string()]);
    // The kept row is the first event at the clashing sample.
    assert_eq!(epochs.events()[0].code, 1);
    assert_eq!(epochs.get_data(None, None, None, None).unwrap().dim().0, 1);
}

#[test]
fn repeated_events_merge_policy() {
    let source = ramp_source(2, 100, 1000.0);
    let events = vec![Event::new(10, 0, 1), Event::new(10, 0, 2)];
    let mut epochs = Epochs::new(source, &events, None, dup_options(DuplicatePolicy::Merge))
        .unwrap();

    assert_eq!(epochs.len(), 1);
    assert_eq!(epochs.selection(), &[0]);
    let entries = epochs.drop_log().entries();
    assert!(entries[0].is_empty());
    assert_eq!(entries[1], vec!["MERGE DUPLICATE".to_string()]);
    // Merged code is a previously-unused integer with a composite name.
    let merged = epochs.events()[0].code;
    assert_eq!(merged, 3);
    assert_eq!(epochs.event_id.get("1/2"), Some(3));
    assert_eq!(epochs.get_data(None, None, None, None).unwrap().dim().0, 1);
}

#[test]
fn repeated_events_error_policy() {
    let source = ramp_source(2, 100, 1000.0);
    let events = vec![Event::new(10, 0, 1), Event::new(10, 0, 2)];
    assert!(Epochs::new(source, &events, None, dup_options(DuplicatePolicy::Error)).is_err());
}

#[test]
fn unrequested_codes_are_ignored() {
    let source = ramp_source(2, 2000, 1000.0);
    let events = vec![
        Event::new(300, 0, 1),
        Event::new(600, 0, 7), // not in the requested map
        Event::new(900, 0, 2),
    ];
    let event_id = EventId::new([("a".to_string(), 1), ("b".to_string(), 2)]).unwrap();
    let epochs = Epochs::new(
        source,
        &events,
        Some(event_id),
        EpochsOptions { tmin: -0.1, tmax: 0.1, ..Default::default() },
    )
    .unwrap();

    assert_eq!(epochs.len(), 2);
    assert_eq!(epochs.selection(), &[0, 2]);
    assert_eq!(epochs.drop_log().entry(1), &["IGNORED".to_string()]);
}

#[test]
fn out_of_bounds_windows_are_too_short() {
    let source = ramp_source(2, 1000, 1000.0);
    // First event too close to the start, last too close to the end.
    let events = vec![
        Event::new(50, 0, 1),
        Event::new(500, 0, 1),
        Event::new(980, 0, 1),
    ];
    let epochs = Epochs::new(
        source,
        &events,
        None,
        EpochsOptions { tmin: -0.2, tmax: 0.2, ..Default::default() },
    )
    .unwrap();

    assert_eq!(epochs.len(), 1);
    assert_eq!(epochs.selection(), &[1]);
    assert_eq!(epochs.drop_log().entry(0), &["TOO_SHORT".to_string()]);
    assert_eq!(epochs.drop_log().entry(2), &["TOO_SHORT".to_string()]);
}

#[test]
fn hierarchical_subset_preserves_order() {
    let source = ramp_source(2, 10_000, 1000.0);
    let events = vec![
        Event::new(1000, 0, 1),
        Event::new(2000, 0, 2),
        Event::new(3000, 0, 1),
        Event::new(4000, 0, 3),
        Event::new(5000, 0, 2),
    ];
    let event_id = EventId::new([
        ("aud/left".to_string(), 1),
        ("aud/right".to_string(), 2),
        ("vis/left".to_string(), 3),
    ])
    .unwrap();
    let epochs = Epochs::new(
        source,
        &events,
        Some(event_id),
        EpochsOptions { tmin: -0.1, tmax: 0.1, ..Default::default() },
    )
    .unwrap();

    // "aud" matches both aud/left and aud/right; order stays as-recorded.
    let aud = epochs.subset(&["aud"]).unwrap();
    assert_eq!(aud.selection(), &[0, 1, 2, 4]);
    // Tag order in the key does not matter.
    let left = epochs.subset(&["left/aud"]).unwrap();
    assert_eq!(left.selection(), &[0, 2]);
    // Several keys OR together, still in original order.
    let both = epochs.subset(&["vis", "aud/right"]).unwrap();
    assert_eq!(both.selection(), &[1, 3, 4]);
    // Deselected rows are logged IGNORED in the subset's drop log.
    assert_eq!(both.drop_log().entry(0), &["IGNORED".to_string()]);
    // Unknown keys are a validation error.
    assert!(epochs.subset(&["tactile"]).is_err());
}
