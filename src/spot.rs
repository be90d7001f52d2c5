//! Data structures representing DX cluster spots.
//!
//! This module defines the core types used throughout the bridge to
//! represent parsed spot announcements from the cluster feed.

use serde::Serialize;
use std::fmt;

/// Amateur band table: (label, low Hz, high Hz), bounds inclusive.
///
/// Ordered lowest to highest; the first matching range wins.
pub const BANDS: &[(&str, u64, u64)] = &[
    ("160m", 1_800_000, 2_000_000),
    ("80m", 3_500_000, 4_000_000),
    ("60m", 5_300_000, 5_400_000),
    ("40m", 7_000_000, 7_300_000),
    ("30m", 10_100_000, 10_150_000),
    ("20m", 14_000_000, 14_350_000),
    ("17m", 18_068_000, 18_168_000),
    ("15m", 21_000_000, 21_450_000),
    ("12m", 24_890_000, 24_990_000),
    ("10m", 28_000_000, 29_700_000),
    ("6m", 50_000_000, 54_000_000),
    ("4m", 70_000_000, 70_500_000),
    ("2m", 144_000_000, 148_000_000),
];

/// Returns the amateur band label for a frequency, or `""` if the
/// frequency falls outside every listed band.
pub fn band_for_freq(freq_hz: u64) -> &'static str {
    for (name, low, high) in BANDS {
        if (*low..=*high).contains(&freq_hz) {
            return name;
        }
    }
    ""
}

/// The operating mode announced with a spot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    /// Continuous Wave (Morse code)
    Cw,
    /// Single sideband voice
    Ssb,
    /// Upper sideband voice
    Usb,
    /// Lower sideband voice
    Lsb,
    /// Amplitude modulation
    Am,
    /// Frequency modulation
    Fm,
    /// FT8 digital mode
    Ft8,
    /// FT4 digital mode
    Ft4,
    /// Radio teletype
    Rtty,
    /// Phase-shift keying
    Psk,
    /// Unspecified digital mode
    Digi,
    /// JT65 digital mode
    Jt65,
    /// JT9 digital mode
    Jt9,
    /// No recognized mode token in the announcement
    Unknown,
}

impl Mode {
    /// Map a free-text token onto a mode, case-insensitively.
    ///
    /// Returns `None` for anything outside the fixed token set; `UNKNOWN`
    /// is a serialization sentinel, not a recognized token.
    pub fn from_token(token: &str) -> Option<Mode> {
        match token.to_ascii_uppercase().as_str() {
            "CW" => Some(Mode::Cw),
            "SSB" => Some(Mode::Ssb),
            "USB" => Some(Mode::Usb),
            "LSB" => Some(Mode::Lsb),
            "AM" => Some(Mode::Am),
            "FM" => Some(Mode::Fm),
            "FT8" => Some(Mode::Ft8),
            "FT4" => Some(Mode::Ft4),
            "RTTY" => Some(Mode::Rtty),
            "PSK" => Some(Mode::Psk),
            "DIGI" => Some(Mode::Digi),
            "JT65" => Some(Mode::Jt65),
            "JT9" => Some(Mode::Jt9),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Cw => write!(f, "CW"),
            Mode::Ssb => write!(f, "SSB"),
            Mode::Usb => write!(f, "USB"),
            Mode::Lsb => write!(f, "LSB"),
            Mode::Am => write!(f, "AM"),
            Mode::Fm => write!(f, "FM"),
            Mode::Ft8 => write!(f, "FT8"),
            Mode::Ft4 => write!(f, "FT4"),
            Mode::Rtty => write!(f, "RTTY"),
            Mode::Psk => write!(f, "PSK"),
            Mode::Digi => write!(f, "DIGI"),
            Mode::Jt65 => write!(f, "JT65"),
            Mode::Jt9 => write!(f, "JT9"),
            Mode::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// A parsed DX spot from the cluster feed.
///
/// Field names and declaration order are the wire contract: serializing a
/// `Spot` with `serde_json` produces exactly
/// `{"freq":...,"call":...,"mode":...,"comment":...,"spotter":...,"band":...,"time":...}`.
///
/// # Example
///
/// A raw announcement like:
/// ```text
/// DX de W1AW: 14074.0 JA1ABC FT8 good signal
/// ```
///
/// becomes a `Spot` with:
/// - `freq_hz`: 14074000 (kHz input scaled to Hz)
/// - `call`: "JA1ABC"
/// - `mode`: Mode::Ft8
/// - `comment`: "good signal"
/// - `spotter`: "W1AW"
/// - `band`: "20m"
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spot {
    /// Frequency in Hz. Cluster sources report kHz or Hz; values under
    /// 1 MHz are assumed kHz and scaled up at parse time.
    #[serde(rename = "freq")]
    pub freq_hz: u64,

    /// Callsign of the station being spotted, uppercased.
    pub call: String,

    /// Operating mode, `UNKNOWN` when the announcement carried none.
    pub mode: Mode,

    /// Free-text remainder of the announcement, possibly empty.
    pub comment: String,

    /// Callsign of the station reporting the spot, uppercased.
    pub spotter: String,

    /// Amateur band label, `""` when the frequency is outside the table.
    pub band: &'static str,

    /// Epoch seconds assigned at parse time; the cluster line itself
    /// carries no reliable timestamp.
    pub time: i64,
}

impl fmt::Display for Spot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DX de {}: {} Hz {} {} {}",
            self.spotter, self.freq_hz, self.call, self.mode, self.comment
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_spot(freq_hz: u64) -> Spot {
        Spot {
            freq_hz,
            call: "JA1ABC".to_string(),
            mode: Mode::Ft8,
            comment: "good signal".to_string(),
            spotter: "W1AW".to_string(),
            band: band_for_freq(freq_hz),
            time: 1_700_000_000,
        }
    }

    #[test]
    fn test_band_lookup() {
        assert_eq!(band_for_freq(14_074_000), "20m");
        assert_eq!(band_for_freq(7_030_000), "40m");
        assert_eq!(band_for_freq(50_313_000), "6m");
    }

    #[test]
    fn test_band_lookup_inclusive_bounds() {
        assert_eq!(band_for_freq(7_000_000), "40m");
        assert_eq!(band_for_freq(7_300_000), "40m");
        assert_eq!(band_for_freq(6_999_999), "");
        assert_eq!(band_for_freq(7_300_001), "");
    }

    #[test]
    fn test_band_lookup_outside_table() {
        assert_eq!(band_for_freq(0), "");
        assert_eq!(band_for_freq(2_400_000_000), "");
    }

    #[test]
    fn test_every_listed_band_is_reachable() {
        for (name, low, high) in BANDS {
            assert_eq!(band_for_freq(*low), *name);
            assert_eq!(band_for_freq(*high), *name);
            assert_eq!(band_for_freq((low + high) / 2), *name);
        }
    }

    #[test]
    fn test_mode_from_token() {
        assert_eq!(Mode::from_token("CW"), Some(Mode::Cw));
        assert_eq!(Mode::from_token("ft8"), Some(Mode::Ft8));
        assert_eq!(Mode::from_token("Rtty"), Some(Mode::Rtty));
        assert_eq!(Mode::from_token("QRP"), None);
        assert_eq!(Mode::from_token(""), None);
        // The sentinel is not itself a member of the token set.
        assert_eq!(Mode::from_token("UNKNOWN"), None);
    }

    #[test]
    fn test_mode_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Mode::Ft8).unwrap(), "\"FT8\"");
        assert_eq!(serde_json::to_string(&Mode::Jt65).unwrap(), "\"JT65\"");
        assert_eq!(
            serde_json::to_string(&Mode::Unknown).unwrap(),
            "\"UNKNOWN\""
        );
    }

    #[test]
    fn test_spot_wire_format() {
        let spot = make_spot(14_074_000);
        assert_eq!(
            serde_json::to_string(&spot).unwrap(),
            r#"{"freq":14074000,"call":"JA1ABC","mode":"FT8","comment":"good signal","spotter":"W1AW","band":"20m","time":1700000000}"#
        );
    }

    #[test]
    fn test_spot_wire_format_no_band() {
        let spot = make_spot(100_000_000);
        let json = serde_json::to_string(&spot).unwrap();
        assert!(json.contains(r#""band":"""#));
    }
}
