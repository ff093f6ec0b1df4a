//! Shared value types used across every layer: [`Severity`], [`Family`], and
//! small timestamp helpers. Kept in one place because both L1 and L2 results,
//! policies, and telemetry events all order and compare on them.

use serde::{Deserialize, Serialize};
use std::fmt;

// ── Severity ───────────────────────────────────────────────────────────

/// Detection severity, ordered `Info < Low < Medium < High < Critical` so
/// that `Ord`/`max` give `Critical` as the greatest element — matching the
/// `CRITICAL>HIGH>MEDIUM>LOW>INFO` order from the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational only; not actionable.
    Info,
    /// Low-severity finding.
    Low,
    /// Medium-severity finding.
    Medium,
    /// High-severity finding.
    High,
    /// Critical finding; typically triggers fail-fast and blocking.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" | "none" => Ok(Self::Info),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

// ── Family ─────────────────────────────────────────────────────────────

/// Coarse threat family. Closed set; unknown L2 family predictions map to
/// [`Family::Custom`] (see Open Question decision #1 in `DESIGN.md`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[non_exhaustive]
pub enum Family {
    /// Prompt injection.
    Pi,
    /// Jailbreak.
    Jb,
    /// Personal data leak.
    Pii,
    /// Command injection.
    Cmd,
    /// Encoded payload.
    Enc,
    /// Retrieval / RAG attack.
    Rag,
    /// Harmful content.
    Hc,
    /// Generic security.
    Sec,
    /// Quality issue (not a security threat).
    Qual,
    /// User-defined / catch-all.
    Custom,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pi => "PI",
            Self::Jb => "JB",
            Self::Pii => "PII",
            Self::Cmd => "CMD",
            Self::Enc => "ENC",
            Self::Rag => "RAG",
            Self::Hc => "HC",
            Self::Sec => "SEC",
            Self::Qual => "QUAL",
            Self::Custom => "CUSTOM",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Family {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PI" => Ok(Self::Pi),
            "JB" => Ok(Self::Jb),
            "PII" => Ok(Self::Pii),
            "CMD" => Ok(Self::Cmd),
            "ENC" => Ok(Self::Enc),
            "RAG" => Ok(Self::Rag),
            "HC" => Ok(Self::Hc),
            "SEC" => Ok(Self::Sec),
            "QUAL" => Ok(Self::Qual),
            // Any other value, including the original's stray "BENIGN",
            // collapses into the existing catch-all rather than inventing
            // a second "unknown" bucket.
            _ => Ok(Self::Custom),
        }
    }
}

/// Current UTC instant formatted as ISO-8601, the timestamp shape used by
/// every record in the data model (`Detection`, `TelemetryEvent`, audit log
/// entries, ...).
#[must_use]
pub fn now_iso8601() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Lowercase hex encoding. Neither checksum verification nor webhook
/// signing need a full `hex` dependency for this.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{b:02x}").expect("writing to String never fails");
    }
    s
}

/// Decode a lowercase (or mixed-case) hex string into bytes.
///
/// # Errors
///
/// Returns an error if the string has odd length or contains non-hex
/// characters.
pub fn from_hex(s: &str) -> Result<Vec<u8>, String> {
    if s.len() % 2 != 0 {
        return Err("hex string has odd length".to_string());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| e.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::Info);
    }

    #[test]
    fn severity_round_trips_json() {
        let json = serde_json::to_string(&Severity::High).unwrap();
        assert_eq!(json, "\"high\"");
        let back: Severity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Severity::High);
    }

    #[test]
    fn family_display_round_trips_through_parse() {
        for f in [
            Family::Pi,
            Family::Jb,
            Family::Pii,
            Family::Cmd,
            Family::Enc,
            Family::Rag,
            Family::Hc,
            Family::Sec,
            Family::Qual,
            Family::Custom,
        ] {
            let s = f.to_string();
            let parsed: Family = s.parse().unwrap();
            assert_eq!(parsed, f);
        }
    }

    #[test]
    fn unknown_family_maps_to_custom() {
        let parsed: Family = "BENIGN".parse().unwrap();
        assert_eq!(parsed, Family::Custom);
        let parsed: Family = "something_else".parse().unwrap();
        assert_eq!(parsed, Family::Custom);
    }

    #[test]
    fn hex_round_trips() {
        let bytes = [0u8, 1, 254, 255, 16];
        let encoded = to_hex(&bytes);
        assert_eq!(encoded, "0001feff10");
        assert_eq!(from_hex(&encoded).unwrap(), bytes);
    }

    #[test]
    fn from_hex_rejects_odd_length() {
        assert!(from_hex("abc").is_err());
    }
}
