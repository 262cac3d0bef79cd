//! Read-only queries over an enriched table.

use crate::transform::median;
use pitwall_core::{EnrichedLap, EnrichedTable};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Lap numbers run under a safety car and under a virtual safety car.
///
/// A lap counts when the race leader's track status for that lap carries the
/// flag. Both lists are sorted and free of duplicates.
pub fn safety_car_laps(table: &EnrichedTable) -> (Vec<u32>, Vec<u32>) {
    let mut sc = BTreeSet::new();
    let mut vsc = BTreeSet::new();

    for lap in table.laps.iter().filter(|lap| lap.base.position == Some(1)) {
        let status = &lap.base.track_status;
        if status.has_safety_car() {
            sc.insert(lap.base.lap_number);
        } else if status.has_virtual_safety_car() {
            vsc.insert(lap.base.lap_number);
        }
    }

    (sc.into_iter().collect(), vsc.into_iter().collect())
}

/// Drivers from `drivers` with at least `min_laps` laps in `table`, in the
/// order given.
pub fn drivers_with_min_laps(table: &EnrichedTable, drivers: &[&str], min_laps: usize) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for lap in &table.laps {
        *counts.entry(lap.base.driver.as_str()).or_default() += 1;
    }

    drivers
        .iter()
        .filter(|driver| {
            let count = counts.get(**driver).copied().unwrap_or(0);
            if count < min_laps {
                info!(driver = **driver, laps = count, min_laps, "Dropping driver with too few laps");
            }
            count >= min_laps
        })
        .map(|driver| driver.to_string())
        .collect()
}

/// Per-lap value used to compare teammates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LapMetric {
    LapTime,
    FuelAdjLapTime,
    PctFromFastest,
    DeltaToRep,
}

impl LapMetric {
    pub fn value(&self, lap: &EnrichedLap) -> Option<f64> {
        match self {
            LapMetric::LapTime => lap.base.lap_time,
            LapMetric::FuelAdjLapTime => lap.fuel_adj_lap_time,
            LapMetric::PctFromFastest => lap.pct_from_fastest,
            LapMetric::DeltaToRep => lap.delta_to_rep,
        }
    }
}

/// Reorder teammate pairs by the gap between their median `metric`,
/// largest gap first.
///
/// `drivers` lists teammates next to each other. Within a pair the driver
/// with the lower median comes first. A pair with a driver lacking data
/// counts as a zero gap and keeps its order. An unpaired trailing driver
/// stays last.
pub fn teammate_order(table: &EnrichedTable, drivers: &[&str], metric: LapMetric) -> Vec<String> {
    let mut samples: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for lap in &table.laps {
        if let Some(value) = metric.value(lap) {
            samples.entry(lap.base.driver.as_str()).or_default().push(value);
        }
    }
    let medians: BTreeMap<&str, f64> = samples
        .into_iter()
        .filter_map(|(driver, mut values)| median(&mut values).map(|m| (driver, m)))
        .collect();

    let mut pairs: Vec<([&str; 2], f64)> = drivers
        .chunks_exact(2)
        .map(|pair| {
            let (first, second) = (pair[0], pair[1]);
            match (medians.get(first), medians.get(second)) {
                (Some(a), Some(b)) if a - b < 0.0 => ([first, second], b - a),
                (Some(a), Some(b)) => ([second, first], a - b),
                _ => ([first, second], 0.0),
            }
        })
        .collect();

    // Stable, so equal gaps keep their input order.
    pairs.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut ordered: Vec<String> = pairs
        .into_iter()
        .flat_map(|(pair, _)| pair.map(str::to_string))
        .collect();
    if drivers.len() % 2 == 1 {
        if let Some(last) = drivers.last() {
            ordered.push(last.to_string());
        }
    }
    ordered
}
