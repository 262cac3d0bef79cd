//! Pitwall Test Utilities
//!
//! Shared test infrastructure for the pitwall workspace:
//! - Fixtures for raw laps, sessions and configuration
//! - A scripted mock provider
//! - Proptest generators for raw sessions

pub use pitwall_core::{
    CacheEntry, Compound, CompoundMapping, EnrichedTable, FetchError, PipelineConfig,
    PitwallError, PitwallResult, RawRecord, SessionKey, SessionProvider, SessionType, Timestamp,
};

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

// ============================================================================
// MOCK PROVIDER
// ============================================================================

/// In-memory [`SessionProvider`] with a call counter and scripted behaviour.
///
/// - `with_latency` delays every fetch.
/// - `fail_next` queues failures returned before any data.
/// - `gated` holds every fetch until [`MockProvider::open_gate`] is called.
#[derive(Debug, Default)]
pub struct MockProvider {
    sessions: Mutex<HashMap<SessionKey, Vec<RawRecord>>>,
    failures: Mutex<VecDeque<PitwallError>>,
    calls: AtomicUsize,
    latency: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(self, key: SessionKey, records: Vec<RawRecord>) -> Self {
        self.set_session(key, records);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Hold every fetch until the gate is opened.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Let held and future fetches complete.
    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            if gate.available_permits() == 0 {
                gate.add_permits(1);
            }
        }
    }

    /// Replace the records served for `key`.
    pub fn set_session(&self, key: SessionKey, records: Vec<RawRecord>) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(key, records);
        }
    }

    /// Queue a failure for the next fetch.
    pub fn fail_next(&self, error: impl Into<PitwallError>) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push_back(error.into());
        }
    }

    /// Queue `count` availability failures for `key`.
    pub fn fail_unavailable(&self, key: SessionKey, count: usize) {
        for _ in 0..count {
            self.fail_next(FetchError::Unavailable {
                key,
                reason: "provider returned 503".to_string(),
            });
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProvider for MockProvider {
    async fn fetch_session(&self, key: &SessionKey) -> PitwallResult<Vec<RawRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await;
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let scripted = self.failures.lock().ok().and_then(|mut f| f.pop_front());
        if let Some(error) = scripted {
            return Err(error);
        }

        let sessions = self.sessions.lock().map_err(|_| FetchError::Unavailable {
            key: *key,
            reason: "mock provider lock poisoned".to_string(),
        })?;
        sessions.get(key).cloned().ok_or_else(|| {
            FetchError::Unavailable {
                key: *key,
                reason: "no such session".to_string(),
            }
            .into()
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made keys, records and configuration.

    use super::*;
    use pitwall_core::EnrichedLap;
    use serde_json::json;
    use std::sync::Arc;

    pub const RACE_2024_R05: SessionKey = SessionKey::new(2024, 5, SessionType::Race);
    pub const SPRINT_2024_R05: SessionKey = SessionKey::new(2024, 5, SessionType::Sprint);

    /// One clean green-flag lap on `C2` at round 5 of 2024.
    pub fn raw_lap(driver: &str, lap_number: u32, lap_time: f64) -> RawRecord {
        RawRecord::new()
            .with("Driver", driver)
            .with("DriverNumber", driver_number(driver))
            .with("LapNumber", lap_number)
            .with("LapTime", lap_time)
            .with("Time", json!(null))
            .with("Stint", 1)
            .with("Compound", "C2")
            .with("TyreLife", lap_number)
            .with("FreshTyre", true)
            .with("Position", json!(null))
            .with("TrackStatus", "1")
            .with("IsAccurate", true)
            .with("RoundNumber", 5)
            .with("EventName", "Miami Grand Prix")
            .with("Sector1Time", lap_time * 0.3)
    }

    /// A full session: every driver runs `laps` laps on one stint.
    ///
    /// Lap times degrade by 50 ms per lap, each driver is 200 ms slower than
    /// the previous one, and positions follow driver order.
    pub fn race_session(key: SessionKey, drivers: &[&str], laps: u32) -> Vec<RawRecord> {
        let mut records = Vec::new();
        for lap in 1..=laps {
            for (i, driver) in drivers.iter().enumerate() {
                let lap_time = 90.0 + 0.2 * i as f64 + 0.05 * f64::from(lap);
                let elapsed: f64 = (1..=lap)
                    .map(|l| 90.0 + 0.2 * i as f64 + 0.05 * f64::from(l))
                    .sum();
                records.push(
                    raw_lap(driver, lap, lap_time)
                        .with("Time", 3600.0 + elapsed)
                        .with("Position", i + 1)
                        .with("RoundNumber", key.round),
                );
            }
        }
        records
    }

    /// Compound nominations with `C1`/`C2`/`C3` as hard/medium/soft at
    /// round 5 of 2024.
    pub fn compound_mapping() -> CompoundMapping {
        CompoundMapping::new()
            .with_event(2024, 5, Compound::C1, Compound::C2, Compound::C3)
            .with_event(2024, 6, Compound::C2, Compound::C3, Compound::C4)
    }

    pub fn pipeline_config() -> PipelineConfig {
        PipelineConfig::default()
            .with_min_laps(3)
            .with_compound_mapping(compound_mapping())
    }

    /// An enriched table holding `laps` bare laps for `key`.
    pub fn enriched_table(key: SessionKey, laps: u32) -> EnrichedTable {
        let laps = (1..=laps)
            .map(|lap| EnrichedLap::from_base(lap_row(key, "VER", lap, 90.0 + f64::from(lap) / 10.0)))
            .collect();
        EnrichedTable {
            key,
            reference_driver: None,
            laps,
            warnings: Vec::new(),
            rejected_rows: Vec::new(),
        }
    }

    /// A cache entry for `table` fetched at `fetched_at` and living for `ttl`.
    pub fn cache_entry(table: EnrichedTable, fetched_at: Timestamp, ttl: chrono::Duration) -> CacheEntry {
        CacheEntry::new(table.key, Arc::new(table), fetched_at, fetched_at + ttl)
    }

    fn lap_row(key: SessionKey, driver: &str, lap_number: u32, lap_time: f64) -> pitwall_core::LapRow {
        pitwall_core::LapRow {
            driver: driver.to_string(),
            driver_number: driver_number(driver),
            lap_number,
            lap_time: Some(lap_time),
            time: None,
            stint: 1,
            compound: Compound::Medium,
            tyre_life: lap_number,
            fresh_tyre: false,
            position: None,
            track_status: pitwall_core::TrackStatus::parse("1").expect("green status"),
            is_accurate: true,
            round_number: key.round,
            event_name: "Miami Grand Prix".to_string(),
        }
    }

    fn driver_number(driver: &str) -> String {
        let sum: u32 = driver.bytes().map(u32::from).sum();
        (sum % 99 + 1).to_string()
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for raw session data.

    use super::*;
    use proptest::prelude::*;

    const DRIVERS: [&str; 8] = ["VER", "PER", "NOR", "PIA", "LEC", "SAI", "HAM", "RUS"];

    pub fn arb_session_type() -> impl Strategy<Value = SessionType> {
        prop_oneof![Just(SessionType::Race), Just(SessionType::Sprint)]
    }

    pub fn arb_session_key() -> impl Strategy<Value = SessionKey> {
        (2018u16..2030, 1u8..25, arb_session_type())
            .prop_map(|(season, round, session_type)| SessionKey::new(season, round, session_type))
    }

    pub fn arb_compound_label() -> impl Strategy<Value = &'static str> {
        prop_oneof![
            4 => Just("C2"),
            4 => Just("C3"),
            2 => Just("MEDIUM"),
            1 => Just("INTERMEDIATE"),
            1 => Just("WET"),
        ]
    }

    pub fn arb_track_status() -> impl Strategy<Value = &'static str> {
        prop_oneof![
            8 => Just("1"),
            1 => Just("12"),
            1 => Just("4"),
            1 => Just("671"),
        ]
    }

    /// One schema-valid raw lap for `round`.
    pub fn arb_raw_lap(round: u8) -> impl Strategy<Value = RawRecord> {
        (
            prop::sample::select(DRIVERS.to_vec()),
            1u32..60,
            prop::option::weighted(0.95, 80.0f64..120.0),
            3000.0f64..9000.0,
            1u32..4,
            arb_compound_label(),
            arb_track_status(),
            any::<bool>(),
            prop::option::of(1u8..21),
        )
            .prop_map(
                move |(driver, lap, lap_time, time, stint, compound, status, accurate, position)| {
                    fixtures::raw_lap(driver, lap, 90.0)
                        .with("LapTime", serde_json::json!(lap_time))
                        .with("Time", time)
                        .with("Stint", stint)
                        .with("Compound", compound)
                        .with("TrackStatus", status)
                        .with("IsAccurate", accurate)
                        .with("Position", serde_json::json!(position))
                        .with("RoundNumber", round)
                },
            )
    }

    /// A session's worth of schema-valid raw laps.
    pub fn arb_raw_session(round: u8) -> impl Strategy<Value = Vec<RawRecord>> {
        prop::collection::vec(arb_raw_lap(round), 0..80)
    }
}
