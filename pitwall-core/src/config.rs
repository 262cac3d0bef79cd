//! Configuration for the cache tiers and the transformation pipeline.
//!
//! Everything here is read once at startup and passed to constructors
//! explicitly. Nothing is held in process-global state.

use crate::{Compound, CompoundFamily, ConfigError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// CACHE SETTINGS
// ============================================================================

/// Sizing and timing for both cache tiers and the upstream fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Directory holding the LMDB environment.
    pub cache_dir: PathBuf,
    /// LMDB map size in megabytes.
    pub lmdb_map_size_mb: usize,
    /// Time-to-live of a durable entry, measured from its fetch time.
    pub ttl_secs: u64,
    /// Maximum number of tables held in memory.
    pub memory_capacity: usize,
    /// Upper bound on one upstream fetch, validation and transform included.
    pub fetch_timeout_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".pitwall-cache"),
            lmdb_map_size_mb: 1024,
            ttl_secs: 24 * 60 * 60,
            memory_capacity: 256,
            fetch_timeout_ms: 30_000,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn lmdb_map_size_bytes(&self) -> usize {
        self.lmdb_map_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_memory_capacity(mut self, capacity: usize) -> Self {
        self.memory_capacity = capacity;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_lmdb_map_size_mb(mut self, mb: usize) -> Self {
        self.lmdb_map_size_mb = mb;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_capacity == 0 {
            return Err(invalid(
                "memory_capacity",
                self.memory_capacity,
                "memory_capacity must be greater than 0",
            ));
        }
        if self.ttl_secs == 0 {
            return Err(invalid("ttl_secs", self.ttl_secs, "ttl_secs must be greater than 0"));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(invalid(
                "fetch_timeout_ms",
                self.fetch_timeout_ms,
                "fetch_timeout_ms must be greater than 0",
            ));
        }
        if self.lmdb_map_size_mb == 0 {
            return Err(invalid(
                "lmdb_map_size_mb",
                self.lmdb_map_size_mb,
                "lmdb_map_size_mb must be greater than 0",
            ));
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "cache_dir".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// COMPOUND MAPPING
// ============================================================================

/// Relative compound labels per event, resolving `C0`..`C6` to a family.
///
/// The TOML form is one table per season, keyed by round, listing the labels
/// nominated as hard, medium and soft:
///
/// ```toml
/// [2024]
/// "5" = ["C2", "C3", "C4"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompoundMapping {
    events: BTreeMap<(u16, u8), [Compound; 3]>,
}

impl CompoundMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the hard, medium and soft labels for one event.
    pub fn with_event(
        mut self,
        season: u16,
        round: u8,
        hard: Compound,
        medium: Compound,
        soft: Compound,
    ) -> Self {
        self.events.insert((season, round), [hard, medium, soft]);
        self
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Absolute family for `compound` at the given event.
    ///
    /// Family labels resolve to themselves. Relative labels resolve only when
    /// the event is mapped and nominates that label.
    pub fn family_for(&self, season: u16, round: u8, compound: Compound) -> Option<CompoundFamily> {
        if let Some(family) = compound.intrinsic_family() {
            return Some(family);
        }
        let nominated = self.events.get(&(season, round))?;
        let families = [CompoundFamily::Hard, CompoundFamily::Medium, CompoundFamily::Soft];
        nominated
            .iter()
            .zip(families)
            .find(|(label, _)| **label == compound)
            .map(|(_, family)| family)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: BTreeMap<String, BTreeMap<String, Vec<String>>> =
            toml::from_str(contents).map_err(|e| ConfigError::InvalidValue {
                field: "compound_map".to_string(),
                value: String::new(),
                reason: e.to_string(),
            })?;

        let mut mapping = Self::new();
        for (season_str, rounds) in raw {
            let season: u16 = season_str
                .parse()
                .map_err(|_| invalid("compound_map.season", &season_str, "season must be a year"))?;
            for (round_str, labels) in rounds {
                let field = format!("compound_map.{}.{}", season, round_str);
                let round: u8 = round_str
                    .parse()
                    .ok()
                    .filter(|r| *r > 0)
                    .ok_or_else(|| invalid(&field, &round_str, "round must be a positive integer"))?;
                if labels.len() != 3 {
                    return Err(invalid(
                        &field,
                        labels.join(","),
                        "expected exactly three labels: hard, medium, soft",
                    ));
                }
                let mut parsed = [Compound::Unknown; 3];
                for (slot, label) in parsed.iter_mut().zip(&labels) {
                    let compound: Compound = label
                        .parse()
                        .map_err(|e: crate::EnumParseError| invalid(&field, label, e.to_string()))?;
                    if !compound.is_relative() {
                        return Err(invalid(&field, label, "only C0..C6 labels can be mapped"));
                    }
                    *slot = compound;
                }
                mapping.events.insert((season, round), parsed);
            }
        }
        Ok(mapping)
    }

    pub fn from_toml_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }
}

// ============================================================================
// PIPELINE CONFIG
// ============================================================================

/// Parameters of the derived-column computation.
///
/// Two tables enriched with equal configs from the same validated table are
/// byte-identical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Valid timed laps a stint/compound group needs before it gets a
    /// representative time.
    pub min_laps: usize,
    /// Seconds of lap time one lap of fuel costs.
    pub fuel_effect_per_lap: f64,
    /// Driver the gap column is measured against.
    pub reference_driver: Option<String>,
    /// TOML file with the compound mapping, relative to the config file.
    pub compound_map: Option<PathBuf>,
    #[serde(skip)]
    pub compound_mapping: CompoundMapping,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_laps: 5,
            fuel_effect_per_lap: 0.06,
            reference_driver: None,
            compound_map: None,
            compound_mapping: CompoundMapping::default(),
        }
    }
}

impl PipelineConfig {
    pub fn with_min_laps(mut self, min_laps: usize) -> Self {
        self.min_laps = min_laps;
        self
    }

    pub fn with_fuel_effect(mut self, seconds_per_lap: f64) -> Self {
        self.fuel_effect_per_lap = seconds_per_lap;
        self
    }

    pub fn with_reference_driver(mut self, driver: impl Into<String>) -> Self {
        self.reference_driver = Some(driver.into().to_ascii_uppercase());
        self
    }

    pub fn with_compound_mapping(mut self, mapping: CompoundMapping) -> Self {
        self.compound_mapping = mapping;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_laps == 0 {
            return Err(invalid("min_laps", self.min_laps, "min_laps must be greater than 0"));
        }
        if !self.fuel_effect_per_lap.is_finite() || self.fuel_effect_per_lap < 0.0 {
            return Err(invalid(
                "fuel_effect_per_lap",
                self.fuel_effect_per_lap,
                "fuel_effect_per_lap must be a non-negative number",
            ));
        }
        if let Some(driver) = &self.reference_driver {
            let len = driver.chars().count();
            if !(2..=3).contains(&len) || !driver.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(invalid(
                    "reference_driver",
                    driver,
                    "reference_driver must be a 2-3 letter driver code",
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// TOP-LEVEL CONFIG
// ============================================================================

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitwallConfig {
    pub cache: CacheSettings,
    pub pipeline: PipelineConfig,
    /// Directory the file-backed provider reads raw sessions from.
    pub data_dir: Option<PathBuf>,
    /// Emit logs as JSON lines.
    pub json_logs: bool,
}

impl PitwallConfig {
    /// Build from `PITWALL_*` environment variables, falling back to defaults.
    ///
    /// The compound map is only located here; call
    /// [`PitwallConfig::load_compound_map`] to read it.
    pub fn from_env() -> Self {
        let cache = CacheSettings::default();
        let pipeline = PipelineConfig::default();

        Self {
            cache: CacheSettings {
                cache_dir: std::env::var("PITWALL_CACHE_DIR")
                    .ok()
                    .map(PathBuf::from)
                    .unwrap_or(cache.cache_dir),
                lmdb_map_size_mb: std::env::var("PITWALL_LMDB_MAP_SIZE_MB")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(cache.lmdb_map_size_mb),
                ttl_secs: std::env::var("PITWALL_CACHE_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(cache.ttl_secs),
                memory_capacity: std::env::var("PITWALL_MEMORY_CAPACITY")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(cache.memory_capacity),
                fetch_timeout_ms: std::env::var("PITWALL_FETCH_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(cache.fetch_timeout_ms),
            },
            pipeline: PipelineConfig {
                min_laps: std::env::var("PITWALL_MIN_LAPS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(pipeline.min_laps),
                fuel_effect_per_lap: std::env::var("PITWALL_FUEL_EFFECT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(pipeline.fuel_effect_per_lap),
                reference_driver: std::env::var("PITWALL_REFERENCE_DRIVER")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| s.trim().to_ascii_uppercase()),
                compound_map: std::env::var("PITWALL_COMPOUND_MAP").ok().map(PathBuf::from),
                compound_mapping: CompoundMapping::default(),
            },
            data_dir: std::env::var("PITWALL_DATA_DIR").ok().map(PathBuf::from),
            json_logs: std::env::var("PITWALL_JSON_LOGS")
                .ok()
                .map(|s| matches!(s.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }

    /// Parse a TOML config file and resolve its compound map relative to it.
    pub fn from_toml_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut config: PitwallConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::InvalidValue {
                field: "config".to_string(),
                value: path.display().to_string(),
                reason: e.to_string(),
            })?;

        if let (Some(map), Some(base)) = (&config.pipeline.compound_map, path.parent()) {
            if map.is_relative() {
                config.pipeline.compound_map = Some(base.join(map));
            }
        }
        config.load_compound_map()?;
        Ok(config)
    }

    /// Read the compound map file, if one is configured.
    pub fn load_compound_map(&mut self) -> Result<(), ConfigError> {
        if let Some(path) = &self.pipeline.compound_map {
            self.pipeline.compound_mapping = CompoundMapping::from_toml_path(path)?;
        }
        Ok(())
    }

    /// Load from `path` when given, otherwise from the environment, then
    /// validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_toml_path(path)?,
            None => {
                let mut config = Self::from_env();
                config.load_compound_map()?;
                config
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.pipeline.validate()
    }
}

fn invalid(field: &str, value: impl ToString, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const MAP: &str = r#"
[2024]
"5" = ["C2", "C3", "C4"]
"6" = ["C3", "C4", "C5"]

[2023]
"1" = ["C1", "C2", "C3"]
"#;

    #[test]
    fn test_defaults_are_valid() {
        let config = PitwallConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.ttl(), Duration::from_secs(86_400));
        assert_eq!(config.cache.memory_capacity, 256);
        assert_eq!(config.cache.fetch_timeout(), Duration::from_secs(30));
        assert_eq!(config.pipeline.min_laps, 5);
    }

    #[test]
    fn test_cache_settings_reject_zero_capacity() {
        let settings = CacheSettings::default().with_memory_capacity(0);
        match settings.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "memory_capacity"),
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_cache_settings_reject_zero_timeout() {
        let settings = CacheSettings::default().with_fetch_timeout(Duration::ZERO);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_pipeline_rejects_negative_fuel_effect() {
        let config = PipelineConfig::default().with_fuel_effect(-0.1);
        assert!(config.validate().is_err());
        let config = PipelineConfig::default().with_fuel_effect(f64::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pipeline_rejects_bad_reference_driver() {
        let mut config = PipelineConfig::default();
        config.reference_driver = Some("VERSTAPPEN".to_string());
        assert!(config.validate().is_err());
        assert!(PipelineConfig::default().with_reference_driver("ver").validate().is_ok());
    }

    #[test]
    fn test_compound_mapping_from_toml() {
        let mapping = CompoundMapping::from_toml_str(MAP).unwrap();
        assert_eq!(mapping.len(), 3);
        assert_eq!(
            mapping.family_for(2024, 5, Compound::C3),
            Some(CompoundFamily::Medium)
        );
        assert_eq!(mapping.family_for(2024, 5, Compound::C2), Some(CompoundFamily::Hard));
        assert_eq!(mapping.family_for(2024, 6, Compound::C5), Some(CompoundFamily::Soft));
        assert_eq!(mapping.family_for(2024, 5, Compound::C5), None);
        assert_eq!(mapping.family_for(2022, 5, Compound::C3), None);
    }

    #[test]
    fn test_family_labels_resolve_without_mapping() {
        let mapping = CompoundMapping::new();
        assert_eq!(
            mapping.family_for(2018, 1, Compound::Soft),
            Some(CompoundFamily::Soft)
        );
        assert_eq!(mapping.family_for(2018, 1, Compound::Wet), None);
    }

    #[test]
    fn test_compound_mapping_rejects_family_labels() {
        let err = CompoundMapping::from_toml_str("[2024]\n\"5\" = [\"HARD\", \"C3\", \"C4\"]\n");
        assert!(err.is_err());
        let err = CompoundMapping::from_toml_str("[2024]\n\"5\" = [\"C3\", \"C4\"]\n");
        assert!(err.is_err());
        let err = CompoundMapping::from_toml_str("[2024]\n\"0\" = [\"C2\", \"C3\", \"C4\"]\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_from_toml_path_resolves_compound_map() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("compounds.toml"), MAP).unwrap();

        let config_path = dir.path().join("pitwall.toml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
data_dir = "/var/lib/pitwall/raw"

[cache]
ttl_secs = 3600
memory_capacity = 16

[pipeline]
min_laps = 3
reference_driver = "LEC"
compound_map = "compounds.toml"
"#
        )
        .unwrap();

        let config = PitwallConfig::load(Some(&config_path)).unwrap();
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.cache.memory_capacity, 16);
        assert_eq!(config.cache.fetch_timeout_ms, 30_000);
        assert_eq!(config.pipeline.min_laps, 3);
        assert_eq!(config.pipeline.reference_driver.as_deref(), Some("LEC"));
        assert_eq!(
            config.pipeline.compound_mapping.family_for(2023, 1, Compound::C1),
            Some(CompoundFamily::Hard)
        );
    }

    #[test]
    fn test_missing_compound_map_is_unreadable() {
        let mut config = PitwallConfig::default();
        config.pipeline.compound_map = Some(PathBuf::from("/nonexistent/compounds.toml"));
        assert!(matches!(
            config.load_compound_map(),
            Err(ConfigError::Unreadable { .. })
        ));
    }
}
