//! Enum types for session and lap data

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// SESSION TYPE
// ============================================================================

/// Kind of session a cache entry covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SessionType {
    Race,
    Sprint,
}

impl SessionType {
    /// Single-letter code used by the upstream provider (`R` / `S`).
    pub fn code(&self) -> &'static str {
        match self {
            SessionType::Race => "R",
            SessionType::Sprint => "S",
        }
    }

    /// Stable byte used in storage keys.
    pub fn as_byte(&self) -> u8 {
        match self {
            SessionType::Race => b'R',
            SessionType::Sprint => b'S',
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'R' => Some(SessionType::Race),
            b'S' => Some(SessionType::Sprint),
            _ => None,
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            SessionType::Race => "Race",
            SessionType::Sprint => "Sprint",
        };
        write!(f, "{}", value)
    }
}

impl FromStr for SessionType {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "r" | "race" => Ok(SessionType::Race),
            "s" | "sprint" => Ok(SessionType::Sprint),
            _ => Err(EnumParseError {
                kind: "session type",
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// TYRE COMPOUNDS
// ============================================================================

/// Tyre compound label as reported by the provider.
///
/// `C0`..`C6` are the season-relative slick labels; the family names are what
/// the provider reports when it has already resolved them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Compound {
    C0,
    C1,
    C2,
    C3,
    C4,
    C5,
    C6,
    Soft,
    Medium,
    Hard,
    Intermediate,
    Wet,
    Unknown,
}

impl Compound {
    /// True for dry-weather compounds.
    pub fn is_slick(&self) -> bool {
        !matches!(
            self,
            Compound::Intermediate | Compound::Wet | Compound::Unknown
        )
    }

    /// True for the season-relative `C` labels, which need a mapping to
    /// resolve their family.
    pub fn is_relative(&self) -> bool {
        matches!(
            self,
            Compound::C0
                | Compound::C1
                | Compound::C2
                | Compound::C3
                | Compound::C4
                | Compound::C5
                | Compound::C6
        )
    }

    /// Family for labels that already name one.
    pub fn intrinsic_family(&self) -> Option<CompoundFamily> {
        match self {
            Compound::Soft => Some(CompoundFamily::Soft),
            Compound::Medium => Some(CompoundFamily::Medium),
            Compound::Hard => Some(CompoundFamily::Hard),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Compound::C0 => "C0",
            Compound::C1 => "C1",
            Compound::C2 => "C2",
            Compound::C3 => "C3",
            Compound::C4 => "C4",
            Compound::C5 => "C5",
            Compound::C6 => "C6",
            Compound::Soft => "SOFT",
            Compound::Medium => "MEDIUM",
            Compound::Hard => "HARD",
            Compound::Intermediate => "INTERMEDIATE",
            Compound::Wet => "WET",
            Compound::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Compound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Compound {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = match s.trim().to_ascii_uppercase().as_str() {
            "C0" => Compound::C0,
            "C1" => Compound::C1,
            "C2" => Compound::C2,
            "C3" => Compound::C3,
            "C4" => Compound::C4,
            "C5" => Compound::C5,
            "C6" => Compound::C6,
            "SOFT" => Compound::Soft,
            "MEDIUM" => Compound::Medium,
            "HARD" => Compound::Hard,
            "INTERMEDIATE" => Compound::Intermediate,
            "WET" => Compound::Wet,
            "UNKNOWN" | "TEST_UNKNOWN" => Compound::Unknown,
            _ => {
                return Err(EnumParseError {
                    kind: "compound",
                    value: s.to_string(),
                })
            }
        };
        Ok(value)
    }
}

/// Absolute compound family a relative label resolves to for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompoundFamily {
    Hard,
    Medium,
    Soft,
}

impl fmt::Display for CompoundFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            CompoundFamily::Hard => "HARD",
            CompoundFamily::Medium => "MEDIUM",
            CompoundFamily::Soft => "SOFT",
        };
        write!(f, "{}", value)
    }
}

// ============================================================================
// TRACK STATUS
// ============================================================================

/// Track status codes observed during a lap, in the provider's digit form.
///
/// `1` green, `2` yellow, `4` safety car, `5` red, `6`/`7` virtual safety car.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackStatus(String);

impl TrackStatus {
    /// Build from a digit string. Returns `None` for empty or non-digit input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    /// Green flag for the whole lap.
    pub fn is_green(&self) -> bool {
        !self.0.is_empty() && self.0.chars().all(|c| c == '1')
    }

    pub fn has_safety_car(&self) -> bool {
        self.0.contains('4')
    }

    /// Virtual safety car without a full safety car.
    pub fn has_virtual_safety_car(&self) -> bool {
        (self.0.contains('6') || self.0.contains('7')) && !self.has_safety_car()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error when parsing an invalid enum string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for EnumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for EnumParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_type_round_trips_codes() {
        assert_eq!("R".parse::<SessionType>().unwrap(), SessionType::Race);
        assert_eq!("sprint".parse::<SessionType>().unwrap(), SessionType::Sprint);
        assert!("Q".parse::<SessionType>().is_err());
        assert_eq!(SessionType::from_byte(SessionType::Sprint.as_byte()), Some(SessionType::Sprint));
    }

    #[test]
    fn test_compound_slick_set() {
        for label in ["C0", "C3", "C6", "SOFT", "MEDIUM", "HARD"] {
            assert!(label.parse::<Compound>().unwrap().is_slick(), "{label}");
        }
        for label in ["INTERMEDIATE", "WET", "UNKNOWN"] {
            assert!(!label.parse::<Compound>().unwrap().is_slick(), "{label}");
        }
    }

    #[test]
    fn test_compound_parse_is_case_insensitive() {
        assert_eq!("c2".parse::<Compound>().unwrap(), Compound::C2);
        assert_eq!("Medium".parse::<Compound>().unwrap(), Compound::Medium);
        assert!("SUPERSOFT".parse::<Compound>().is_err());
    }

    #[test]
    fn test_compound_serde_uses_upper_case() {
        let json = serde_json::to_string(&Compound::Intermediate).unwrap();
        assert_eq!(json, "\"INTERMEDIATE\"");
        let family: CompoundFamily = serde_json::from_str("\"MEDIUM\"").unwrap();
        assert_eq!(family, CompoundFamily::Medium);
    }

    #[test]
    fn test_track_status_flags() {
        let green = TrackStatus::parse("1").unwrap();
        assert!(green.is_green());
        assert!(TrackStatus::parse("11").unwrap().is_green());

        let yellow = TrackStatus::parse("12").unwrap();
        assert!(!yellow.is_green());

        let sc = TrackStatus::parse("14").unwrap();
        assert!(sc.has_safety_car());
        assert!(!sc.has_virtual_safety_car());

        let vsc = TrackStatus::parse("671").unwrap();
        assert!(vsc.has_virtual_safety_car());

        assert!(TrackStatus::parse("").is_none());
        assert!(TrackStatus::parse("1a").is_none());
    }
}
