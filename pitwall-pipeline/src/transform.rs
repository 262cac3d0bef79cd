//! Derived-column computation.
//!
//! A [`Pipeline`] is an ordered list of named [`DerivationStep`]s. Each step
//! declares the derived columns it reads and writes; the pipeline refuses to
//! run a step whose inputs have not been produced yet, and refuses a second
//! writer for the same column. Base columns are always readable.
//!
//! Every aggregate is computed over `BTreeMap`s and sorted vectors, so the
//! output depends only on the validated rows and the [`PipelineConfig`].

use pitwall_core::{
    Compound, DerivedColumn, EnrichedLap, EnrichedTable, PipelineConfig, PipelineError,
    PipelineWarning, SessionKey, ValidatedTable,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

// ============================================================================
// FRAME
// ============================================================================

/// Working table passed through the steps.
#[derive(Debug, Clone)]
pub struct Frame {
    pub key: SessionKey,
    pub laps: Vec<EnrichedLap>,
    pub warnings: Vec<PipelineWarning>,
    pub reference_driver: Option<String>,
    present: BTreeSet<DerivedColumn>,
}

impl Frame {
    fn from_validated(table: &ValidatedTable) -> Self {
        Self {
            key: table.key,
            laps: table.rows.iter().cloned().map(EnrichedLap::from_base).collect(),
            warnings: Vec::new(),
            reference_driver: None,
            present: BTreeSet::new(),
        }
    }

    pub fn has_column(&self, column: DerivedColumn) -> bool {
        self.present.contains(&column)
    }

    fn into_table(self) -> EnrichedTable {
        EnrichedTable {
            key: self.key,
            reference_driver: self.reference_driver,
            laps: self.laps,
            warnings: self.warnings,
            rejected_rows: Vec::new(),
        }
    }
}

/// One named derivation over a [`Frame`].
pub trait DerivationStep: Send + Sync {
    fn name(&self) -> &'static str;

    /// Derived columns read by this step.
    fn inputs(&self) -> &'static [DerivedColumn];

    /// Derived columns written by this step and by no other.
    fn outputs(&self) -> &'static [DerivedColumn];

    fn apply(&self, frame: &mut Frame, config: &PipelineConfig);
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Ordered derivation steps.
pub struct Pipeline {
    steps: Vec<Box<dyn DerivationStep>>,
}

impl Pipeline {
    pub fn new(steps: Vec<Box<dyn DerivationStep>>) -> Self {
        Self { steps }
    }

    /// The full derivation order.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(SlickFlag),
            Box::new(AbsoluteCompound),
            Box::new(LapValidity),
            Box::new(RepresentativeTime),
            Box::new(LapRepresentative),
            Box::new(FastestLap),
            Box::new(FuelAdjustment),
            Box::new(GapToReference),
        ])
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    pub fn run(
        &self,
        table: &ValidatedTable,
        config: &PipelineConfig,
    ) -> Result<EnrichedTable, PipelineError> {
        let mut frame = Frame::from_validated(table);

        for step in &self.steps {
            if let Some(column) = step.inputs().iter().find(|c| !frame.has_column(**c)) {
                return Err(PipelineError::MissingInput {
                    step: step.name().to_string(),
                    column: column.to_string(),
                });
            }
            if let Some(column) = step.outputs().iter().find(|c| frame.has_column(**c)) {
                return Err(PipelineError::DuplicateOutput {
                    step: step.name().to_string(),
                    column: column.to_string(),
                });
            }

            step.apply(&mut frame, config);
            frame.present.extend(step.outputs().iter().copied());
        }

        for warning in &frame.warnings {
            warn!(
                season = frame.key.season,
                round = frame.key.round,
                session = %frame.key.session_type,
                warning = %warning,
                "Pipeline warning"
            );
        }
        debug!(
            season = frame.key.season,
            round = frame.key.round,
            session = %frame.key.session_type,
            rows = frame.laps.len(),
            steps = self.steps.len(),
            "Enriched lap table"
        );

        Ok(frame.into_table())
    }
}

/// Run the standard pipeline.
pub fn transform(
    table: &ValidatedTable,
    config: &PipelineConfig,
) -> Result<EnrichedTable, PipelineError> {
    Pipeline::standard().run(table, config)
}

/// Recompute the gap column of an enriched table against `driver`.
///
/// Every other derived column is left untouched.
pub fn with_reference(table: &EnrichedTable, driver: &str) -> EnrichedTable {
    let mut enriched = table.clone();
    enriched
        .warnings
        .retain(|w| !matches!(w, PipelineWarning::ReferenceDriverAbsent { .. }));

    let driver = driver.trim().to_ascii_uppercase();
    if let Some(warning) = apply_gap(&mut enriched.laps, &driver) {
        enriched.warnings.push(warning);
    }
    enriched.reference_driver = Some(driver);
    enriched
}

// ============================================================================
// STEPS
// ============================================================================

/// `IsSlick`: dry-weather compound.
pub struct SlickFlag;

impl DerivationStep for SlickFlag {
    fn name(&self) -> &'static str {
        "slick_flag"
    }

    fn inputs(&self) -> &'static [DerivedColumn] {
        &[]
    }

    fn outputs(&self) -> &'static [DerivedColumn] {
        &[DerivedColumn::IsSlick]
    }

    fn apply(&self, frame: &mut Frame, _config: &PipelineConfig) {
        for lap in &mut frame.laps {
            lap.is_slick = lap.base.compound.is_slick();
        }
    }
}

/// `AbsoluteCompound`: resolve relative labels through the compound mapping.
pub struct AbsoluteCompound;

impl DerivationStep for AbsoluteCompound {
    fn name(&self) -> &'static str {
        "absolute_compound"
    }

    fn inputs(&self) -> &'static [DerivedColumn] {
        &[DerivedColumn::IsSlick]
    }

    fn outputs(&self) -> &'static [DerivedColumn] {
        &[DerivedColumn::AbsoluteCompound]
    }

    fn apply(&self, frame: &mut Frame, config: &PipelineConfig) {
        let mut unmapped: BTreeMap<(u8, Compound), usize> = BTreeMap::new();
        let season = frame.key.season;

        for lap in &mut frame.laps {
            if !lap.is_slick {
                lap.absolute_compound = None;
                continue;
            }
            let round = lap.base.round_number;
            lap.absolute_compound =
                config
                    .compound_mapping
                    .family_for(season, round, lap.base.compound);
            if lap.absolute_compound.is_none() {
                *unmapped.entry((round, lap.base.compound)).or_default() += 1;
            }
        }

        frame.warnings.extend(unmapped.into_iter().map(|((round, compound), rows)| {
            PipelineWarning::UnmappedCompound {
                season,
                round,
                compound,
                rows,
            }
        }));
    }
}

/// `IsValid`: accurate, green-flag, slick.
pub struct LapValidity;

impl DerivationStep for LapValidity {
    fn name(&self) -> &'static str {
        "lap_validity"
    }

    fn inputs(&self) -> &'static [DerivedColumn] {
        &[DerivedColumn::IsSlick]
    }

    fn outputs(&self) -> &'static [DerivedColumn] {
        &[DerivedColumn::IsValid]
    }

    fn apply(&self, frame: &mut Frame, _config: &PipelineConfig) {
        for lap in &mut frame.laps {
            lap.is_valid = lap.base.is_accurate && lap.base.track_status.is_green() && lap.is_slick;
        }
    }
}

/// `DeltaToRep` / `PctFromRep`: against the median of valid laps sharing the
/// lap's stint number and compound. Groups below `min_laps` get no
/// representative.
pub struct RepresentativeTime;

impl DerivationStep for RepresentativeTime {
    fn name(&self) -> &'static str {
        "representative_time"
    }

    fn inputs(&self) -> &'static [DerivedColumn] {
        &[DerivedColumn::IsValid]
    }

    fn outputs(&self) -> &'static [DerivedColumn] {
        &[DerivedColumn::DeltaToRep, DerivedColumn::PctFromRep]
    }

    fn apply(&self, frame: &mut Frame, config: &PipelineConfig) {
        let mut groups: BTreeMap<(u32, Compound), Vec<f64>> = BTreeMap::new();
        for lap in &frame.laps {
            if let Some(time) = lap.valid_lap_time() {
                groups
                    .entry((lap.base.stint, lap.base.compound))
                    .or_default()
                    .push(time);
            }
        }

        let reps: BTreeMap<(u32, Compound), f64> = groups
            .into_iter()
            .filter(|(_, times)| times.len() >= config.min_laps)
            .filter_map(|(group, mut times)| median(&mut times).map(|m| (group, m)))
            .collect();

        for lap in &mut frame.laps {
            let rep = reps.get(&(lap.base.stint, lap.base.compound)).copied();
            let (delta, pct) = relative_to(lap.base.lap_time, rep);
            lap.delta_to_rep = delta;
            lap.pct_from_rep = pct;
        }
    }
}

/// `DeltaToLapRep` / `PctFromLapRep`: against the median valid lap time of
/// the field on the same lap number.
pub struct LapRepresentative;

impl DerivationStep for LapRepresentative {
    fn name(&self) -> &'static str {
        "lap_representative"
    }

    fn inputs(&self) -> &'static [DerivedColumn] {
        &[DerivedColumn::IsValid]
    }

    fn outputs(&self) -> &'static [DerivedColumn] {
        &[DerivedColumn::DeltaToLapRep, DerivedColumn::PctFromLapRep]
    }

    fn apply(&self, frame: &mut Frame, _config: &PipelineConfig) {
        let mut by_lap: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
        for lap in &frame.laps {
            if let Some(time) = lap.valid_lap_time() {
                by_lap.entry(lap.base.lap_number).or_default().push(time);
            }
        }
        let reps: BTreeMap<u32, f64> = by_lap
            .into_iter()
            .filter_map(|(lap_number, mut times)| median(&mut times).map(|m| (lap_number, m)))
            .collect();

        for lap in &mut frame.laps {
            let rep = reps.get(&lap.base.lap_number).copied();
            let (delta, pct) = relative_to(lap.base.lap_time, rep);
            lap.delta_to_lap_rep = delta;
            lap.pct_from_lap_rep = pct;
        }
    }
}

/// `DeltaToFastest` / `PctFromFastest`: against the session's fastest valid
/// lap.
pub struct FastestLap;

impl DerivationStep for FastestLap {
    fn name(&self) -> &'static str {
        "fastest_lap"
    }

    fn inputs(&self) -> &'static [DerivedColumn] {
        &[DerivedColumn::IsValid]
    }

    fn outputs(&self) -> &'static [DerivedColumn] {
        &[DerivedColumn::DeltaToFastest, DerivedColumn::PctFromFastest]
    }

    fn apply(&self, frame: &mut Frame, _config: &PipelineConfig) {
        let fastest = frame
            .laps
            .iter()
            .filter_map(EnrichedLap::valid_lap_time)
            .min_by(f64::total_cmp);

        for lap in &mut frame.laps {
            let (delta, pct) = relative_to(lap.base.lap_time, fastest);
            lap.delta_to_fastest = delta;
            lap.pct_from_fastest = pct;
        }
    }
}

/// `FuelAdjLapTime`: remove the time cost of the fuel still on board.
///
/// Fuel load falls linearly to zero at the session's last lap, so a lap
/// carries `fuel_effect_per_lap * (last_lap - lap_number)` seconds of fuel.
pub struct FuelAdjustment;

impl DerivationStep for FuelAdjustment {
    fn name(&self) -> &'static str {
        "fuel_adjustment"
    }

    fn inputs(&self) -> &'static [DerivedColumn] {
        &[]
    }

    fn outputs(&self) -> &'static [DerivedColumn] {
        &[DerivedColumn::FuelAdjLapTime]
    }

    fn apply(&self, frame: &mut Frame, config: &PipelineConfig) {
        let last_lap = frame.laps.iter().map(|lap| lap.base.lap_number).max().unwrap_or(0);

        for lap in &mut frame.laps {
            let laps_remaining = f64::from(last_lap.saturating_sub(lap.base.lap_number));
            lap.fuel_adj_lap_time = lap
                .base
                .lap_time
                .map(|time| time - config.fuel_effect_per_lap * laps_remaining)
                .filter(|adjusted| adjusted.is_finite() && *adjusted > 0.0);
        }
    }
}

/// `GapToReference`: running-time difference to the configured driver.
pub struct GapToReference;

impl DerivationStep for GapToReference {
    fn name(&self) -> &'static str {
        "gap_to_reference"
    }

    fn inputs(&self) -> &'static [DerivedColumn] {
        &[]
    }

    fn outputs(&self) -> &'static [DerivedColumn] {
        &[DerivedColumn::GapToReference]
    }

    fn apply(&self, frame: &mut Frame, config: &PipelineConfig) {
        let Some(driver) = config.reference_driver.as_deref() else {
            for lap in &mut frame.laps {
                lap.gap_to_reference = None;
            }
            return;
        };
        let driver = driver.trim().to_ascii_uppercase();
        if let Some(warning) = apply_gap(&mut frame.laps, &driver) {
            frame.warnings.push(warning);
        }
        frame.reference_driver = Some(driver);
    }
}

/// Gap of every lap to `driver`'s session time on the same lap number.
///
/// The reference times are forward-filled over the reference driver's own
/// laps, so a missing timing on one of their laps reuses the previous one.
fn apply_gap(laps: &mut [EnrichedLap], driver: &str) -> Option<PipelineWarning> {
    let mut reference: Vec<(u32, Option<f64>)> = laps
        .iter()
        .filter(|lap| lap.base.driver == driver)
        .map(|lap| (lap.base.lap_number, lap.base.time))
        .collect();

    if reference.is_empty() {
        for lap in laps.iter_mut() {
            lap.gap_to_reference = None;
        }
        return Some(PipelineWarning::ReferenceDriverAbsent {
            driver: driver.to_string(),
        });
    }

    reference.sort_by_key(|(lap_number, _)| *lap_number);
    let mut filled: BTreeMap<u32, f64> = BTreeMap::new();
    let mut last = None;
    for (lap_number, time) in reference {
        if time.is_some() {
            last = time;
        }
        if let Some(time) = last {
            filled.entry(lap_number).or_insert(time);
        }
    }

    for lap in laps.iter_mut() {
        lap.gap_to_reference = match (lap.base.time, filled.get(&lap.base.lap_number)) {
            (Some(time), Some(reference)) => Some(time - reference),
            _ => None,
        };
    }
    None
}

// ============================================================================
// HELPERS
// ============================================================================

/// Median of `values`; mean of the middle pair for even counts.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

/// Signed delta and percentage of `time` over `reference`.
fn relative_to(time: Option<f64>, reference: Option<f64>) -> (Option<f64>, Option<f64>) {
    match (time, reference) {
        (Some(time), Some(reference)) if reference > 0.0 => {
            let delta = time - reference;
            (Some(delta), Some(delta / reference * 100.0))
        }
        _ => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitwall_core::{CompoundFamily, LapRow, SessionType, TrackStatus};

    fn key() -> SessionKey {
        SessionKey::new(2024, 5, SessionType::Race)
    }

    fn row(driver: &str, lap_number: u32, lap_time: f64, time: f64) -> LapRow {
        LapRow {
            driver: driver.to_string(),
            driver_number: "1".to_string(),
            lap_number,
            lap_time: Some(lap_time),
            time: Some(time),
            stint: 1,
            compound: Compound::C2,
            tyre_life: lap_number,
            fresh_tyre: true,
            position: Some(1),
            track_status: TrackStatus::parse("1").unwrap(),
            is_accurate: true,
            round_number: 5,
            event_name: "Miami Grand Prix".to_string(),
        }
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn test_standard_step_order() {
        assert_eq!(
            Pipeline::standard().step_names(),
            vec![
                "slick_flag",
                "absolute_compound",
                "lap_validity",
                "representative_time",
                "lap_representative",
                "fastest_lap",
                "fuel_adjustment",
                "gap_to_reference",
            ]
        );
    }

    #[test]
    fn test_step_reading_unproduced_column_fails() {
        let pipeline = Pipeline::new(vec![Box::new(LapValidity)]);
        let err = pipeline
            .run(&ValidatedTable::empty(key()), &PipelineConfig::default())
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::MissingInput {
                step: "lap_validity".to_string(),
                column: "IsSlick".to_string(),
            }
        );
    }

    #[test]
    fn test_second_writer_for_column_fails() {
        let pipeline = Pipeline::new(vec![Box::new(SlickFlag), Box::new(SlickFlag)]);
        let err = pipeline
            .run(&ValidatedTable::empty(key()), &PipelineConfig::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateOutput { .. }));
    }

    #[test]
    fn test_fuel_adjustment_is_linear_to_last_lap() {
        let table = ValidatedTable::new(
            key(),
            vec![row("VER", 1, 95.0, 95.0), row("VER", 51, 92.0, 4700.0)],
        );
        let config = PipelineConfig::default().with_fuel_effect(0.05);
        let enriched = transform(&table, &config).unwrap();
        assert!((enriched.laps[0].fuel_adj_lap_time.unwrap() - 92.5).abs() < 1e-9);
        assert!((enriched.laps[1].fuel_adj_lap_time.unwrap() - 92.0).abs() < 1e-9);
    }

    #[test]
    fn test_gap_forward_fills_reference_timing() {
        let mut ver_2 = row("VER", 2, 91.0, 0.0);
        ver_2.time = None;
        let table = ValidatedTable::new(
            key(),
            vec![
                row("VER", 1, 90.0, 100.0),
                ver_2,
                row("NOR", 1, 90.5, 100.5),
                row("NOR", 2, 91.0, 191.5),
                row("NOR", 3, 91.0, 282.5),
            ],
        );
        let config = PipelineConfig::default().with_reference_driver("VER");
        let enriched = transform(&table, &config).unwrap();

        assert_eq!(enriched.reference_driver.as_deref(), Some("VER"));
        let nor: Vec<_> = enriched.laps_for("NOR").map(|l| l.gap_to_reference).collect();
        assert!((nor[0].unwrap() - 0.5).abs() < 1e-9);
        assert!((nor[1].unwrap() - 91.5).abs() < 1e-9);
        assert_eq!(nor[2], None);
        assert_eq!(enriched.laps[0].gap_to_reference, Some(0.0));
    }

    #[test]
    fn test_absent_reference_driver_warns() {
        let table = ValidatedTable::new(key(), vec![row("VER", 1, 90.0, 100.0)]);
        let config = PipelineConfig::default().with_reference_driver("HAM");
        let enriched = transform(&table, &config).unwrap();
        assert_eq!(enriched.laps[0].gap_to_reference, None);
        assert!(enriched.warnings.contains(&PipelineWarning::ReferenceDriverAbsent {
            driver: "HAM".to_string()
        }));
    }

    #[test]
    fn test_with_reference_only_touches_gap() {
        let table = ValidatedTable::new(
            key(),
            vec![row("VER", 1, 90.0, 100.0), row("NOR", 1, 90.5, 100.5)],
        );
        let enriched = transform(&table, &PipelineConfig::default()).unwrap();
        assert_eq!(enriched.laps[0].gap_to_reference, None);

        let against_nor = with_reference(&enriched, "nor");
        assert_eq!(against_nor.reference_driver.as_deref(), Some("NOR"));
        assert!((against_nor.laps[0].gap_to_reference.unwrap() + 0.5).abs() < 1e-9);
        assert_eq!(against_nor.laps[0].pct_from_fastest, enriched.laps[0].pct_from_fastest);
        assert_eq!(against_nor.base_table(), enriched.base_table());
    }

    #[test]
    fn test_unmapped_relative_compound_warns_once_per_label() {
        let mut wet = row("NOR", 1, 100.0, 100.0);
        wet.compound = Compound::Wet;
        let table = ValidatedTable::new(
            key(),
            vec![row("VER", 1, 90.0, 90.0), row("VER", 2, 90.0, 180.0), wet],
        );
        let enriched = transform(&table, &PipelineConfig::default()).unwrap();
        assert_eq!(
            enriched.warnings,
            vec![PipelineWarning::UnmappedCompound {
                season: 2024,
                round: 5,
                compound: Compound::C2,
                rows: 2
            }]
        );
        assert_eq!(enriched.laps[2].absolute_compound, None);
    }

    #[test]
    fn test_family_label_resolves_without_mapping() {
        let mut hard = row("VER", 1, 90.0, 90.0);
        hard.compound = Compound::Hard;
        let table = ValidatedTable::new(key(), vec![hard]);
        let enriched = transform(&table, &PipelineConfig::default()).unwrap();
        assert_eq!(enriched.laps[0].absolute_compound, Some(CompoundFamily::Hard));
        assert!(enriched.warnings.is_empty());
    }
}
