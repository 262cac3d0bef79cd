//! End-to-end enrichment scenarios from raw records.

use pitwall_core::{CompoundFamily, PitwallError, ValidationError};
use pitwall_pipeline::{enrich, safety_car_laps, transform, validate, with_reference};
use pitwall_test_utils::fixtures::{self, raw_lap, RACE_2024_R05};
use serde_json::json;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-3
}

#[test]
fn test_c2_at_miami_resolves_to_medium() {
    let records = vec![raw_lap("VER", 1, 90.0)];
    let table = enrich(&RACE_2024_R05, &records, &fixtures::pipeline_config()).unwrap();

    let lap = &table.laps[0];
    assert!(lap.is_slick);
    assert_eq!(lap.absolute_compound, Some(CompoundFamily::Medium));
    assert!(table.warnings.is_empty());
}

#[test]
fn test_inaccurate_lap_is_never_valid() {
    let records = vec![
        raw_lap("VER", 1, 90.0).with("IsAccurate", false),
        raw_lap("VER", 2, 90.0).with("IsAccurate", false).with("Compound", "SOFT"),
        raw_lap("VER", 3, 90.0),
    ];
    let table = enrich(&RACE_2024_R05, &records, &fixtures::pipeline_config()).unwrap();

    assert!(!table.laps[0].is_valid);
    assert!(!table.laps[1].is_valid);
    assert!(table.laps[2].is_valid);
}

#[test]
fn test_yellow_and_wet_laps_are_invalid() {
    let records = vec![
        raw_lap("VER", 1, 90.0).with("TrackStatus", "12"),
        raw_lap("VER", 2, 98.0).with("Compound", "WET"),
    ];
    let table = enrich(&RACE_2024_R05, &records, &fixtures::pipeline_config()).unwrap();
    assert!(table.laps.iter().all(|lap| !lap.is_valid));
    assert!(!table.laps[1].is_slick);
    assert_eq!(table.laps[1].absolute_compound, None);
}

#[test]
fn test_pct_from_fastest() {
    let records = vec![
        raw_lap("VER", 1, 90.0),
        raw_lap("NOR", 1, 90.5),
        raw_lap("LEC", 1, 91.0),
    ];
    let table = enrich(&RACE_2024_R05, &records, &fixtures::pipeline_config()).unwrap();

    assert_eq!(table.laps[0].pct_from_fastest, Some(0.0));
    assert!(close(table.laps[1].pct_from_fastest.unwrap(), 0.556));
    assert!(close(table.laps[2].pct_from_fastest.unwrap(), 1.111));
    assert!(close(table.laps[2].delta_to_fastest.unwrap(), 1.0));
}

#[test]
fn test_invalid_fastest_lap_is_not_the_reference() {
    let records = vec![
        raw_lap("VER", 1, 85.0).with("IsAccurate", false),
        raw_lap("NOR", 1, 90.0),
        raw_lap("LEC", 1, 90.9),
    ];
    let table = enrich(&RACE_2024_R05, &records, &fixtures::pipeline_config()).unwrap();
    assert!(close(table.laps[2].pct_from_fastest.unwrap(), 1.0));
    assert!(table.laps[0].pct_from_fastest.unwrap() < 0.0);
}

#[test]
fn test_representative_time_needs_min_laps() {
    let config = fixtures::pipeline_config().with_min_laps(3);
    let mut records = vec![
        raw_lap("VER", 1, 90.0),
        raw_lap("VER", 2, 91.0),
        raw_lap("VER", 3, 92.0),
    ];
    records.push(raw_lap("VER", 4, 95.0).with("Stint", 2));
    records.push(raw_lap("VER", 5, 95.5).with("Stint", 2));

    let table = enrich(&RACE_2024_R05, &records, &config).unwrap();
    assert_eq!(table.laps[0].delta_to_rep, Some(-1.0));
    assert_eq!(table.laps[2].delta_to_rep, Some(1.0));
    assert!(close(table.laps[2].pct_from_rep.unwrap(), 100.0 / 91.0));
    assert_eq!(table.laps[3].delta_to_rep, None);
    assert_eq!(table.laps[4].pct_from_rep, None);
}

#[test]
fn test_lap_representative_uses_same_lap_number() {
    let records = vec![
        raw_lap("VER", 1, 90.0),
        raw_lap("NOR", 1, 91.0),
        raw_lap("LEC", 1, 92.0),
        raw_lap("VER", 2, 80.0),
    ];
    let table = enrich(&RACE_2024_R05, &records, &fixtures::pipeline_config()).unwrap();
    assert_eq!(table.laps[0].delta_to_lap_rep, Some(-1.0));
    assert_eq!(table.laps[2].delta_to_lap_rep, Some(1.0));
    assert_eq!(table.laps[3].delta_to_lap_rep, Some(0.0));
}

#[test]
fn test_gap_to_reference_uses_running_time() {
    let records = fixtures::race_session(RACE_2024_R05, &["VER", "NOR"], 3);
    let config = fixtures::pipeline_config().with_reference_driver("VER");
    let table = enrich(&RACE_2024_R05, &records, &config).unwrap();

    let gaps: Vec<f64> = table
        .laps_for("NOR")
        .map(|lap| lap.gap_to_reference.unwrap())
        .collect();
    assert!(close(gaps[0], 0.2));
    assert!(close(gaps[1], 0.4));
    assert!(close(gaps[2], 0.6));
    assert!(table.laps_for("VER").all(|lap| lap.gap_to_reference == Some(0.0)));

    let against_nor = with_reference(&table, "NOR");
    assert!(close(against_nor.laps[0].gap_to_reference.unwrap(), -0.2));
}

#[test]
fn test_rejected_rows_travel_with_table() {
    let records = vec![
        raw_lap("VER", 1, 90.0),
        raw_lap("NOR", 1, 90.0).with("LapTime", "n/a"),
        raw_lap("LEC", 1, 90.0).with("RoundNumber", 9),
    ];
    let table = enrich(&RACE_2024_R05, &records, &fixtures::pipeline_config()).unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table.rejected_rows.len(), 2);
    assert_eq!(table.rejected_rows[0].row(), Some(1));
    assert_eq!(table.rejected_rows[1].row(), Some(2));
}

#[test]
fn test_structural_failure_is_fatal() {
    let records: Vec<_> = (1..=3)
        .map(|lap| {
            let mut record = raw_lap("VER", lap, 90.0);
            record.remove("TrackStatus");
            record
        })
        .collect();
    let err = enrich(&RACE_2024_R05, &records, &fixtures::pipeline_config()).unwrap_err();
    assert!(matches!(
        err,
        PitwallError::Validation(ValidationError::MissingColumns { ref columns }) if columns == &["TrackStatus"]
    ));
}

#[test]
fn test_safety_car_detection_on_enriched_table() {
    let records = vec![
        raw_lap("VER", 10, 110.0).with("TrackStatus", "4").with("Position", 1),
        raw_lap("VER", 11, 105.0).with("TrackStatus", "6").with("Position", 1),
        raw_lap("NOR", 12, 105.0).with("TrackStatus", "4").with("Position", json!(2)),
    ];
    let table = enrich(&RACE_2024_R05, &records, &fixtures::pipeline_config()).unwrap();
    assert_eq!(safety_car_laps(&table), (vec![10], vec![11]));
}

#[test]
fn test_recomputation_is_byte_identical() {
    let records = fixtures::race_session(RACE_2024_R05, &["VER", "NOR", "LEC", "PIA"], 20);
    let config = fixtures::pipeline_config().with_reference_driver("LEC");
    let outcome = validate(&RACE_2024_R05, &records).unwrap();

    let first = transform(&outcome.table, &config).unwrap();
    let second = transform(&outcome.table, &config).unwrap();
    assert_eq!(first.fingerprint().unwrap(), second.fingerprint().unwrap());

    let again = transform(&first.base_table(), &config).unwrap();
    assert_eq!(again, first);
}
