//! Parser for DX cluster spot announcements.
//!
//! This module uses the `nom` parsing library to recognize DX spot lines
//! from the sanitized cluster feed. A line that does not match the
//! grammar is a normal outcome (clusters interleave chatter, banners and
//! WWV announcements with spots), so the parser returns an `Option`
//! rather than an error.
//!
//! # Spot format
//!
//! ```text
//! DX de SPOTTER: FREQ CALLSIGN REST...
//! ```
//!
//! Example:
//! ```text
//! DX de W1AW: 14074.0 JA1ABC FT8 good signal
//! ```
//!
//! `FREQ` is a decimal number in kHz or Hz; `REST` holds an optional mode
//! token and free-text comment.

use chrono::Utc;
use nom::{
    IResult, Parser,
    bytes::complete::{tag_no_case, take_while1},
    character::complete::{char, multispace1, space0, space1},
    combinator::value,
    sequence::terminated,
};

use crate::spot::{Mode, Spot, band_for_freq};

/// The raw string fields of a matched spot line, before normalization.
struct RawSpot<'a> {
    spotter: &'a str,
    freq: &'a str,
    call: &'a str,
    rest: &'a str,
}

fn is_spotter_char(c: char) -> bool {
    !c.is_whitespace() && c != ':'
}

/// Parse the "DX de " prefix that starts every spot line.
fn parse_dx_de_prefix(input: &str) -> IResult<&str, ()> {
    value(
        (),
        (
            tag_no_case("DX"),
            multispace1,
            tag_no_case("de"),
            multispace1,
        ),
    )
    .parse(input)
}

/// Parse the spotter callsign followed by a colon.
fn parse_spotter(input: &str) -> IResult<&str, &str> {
    terminated(take_while1(is_spotter_char), (char(':'), space0)).parse(input)
}

/// Match a full spot line into its raw fields.
fn match_spot_line(input: &str) -> IResult<&str, RawSpot<'_>> {
    let (input, _) = parse_dx_de_prefix(input)?;
    let (input, spotter) = parse_spotter(input)?;
    let (input, freq) = take_while1(|c: char| c.is_ascii_digit() || c == '.').parse(input)?;
    let (input, _) = space1(input)?;
    let (input, call) = take_while1(|c: char| !c.is_whitespace()).parse(input)?;
    // The grammar requires whitespace after the callsign; a line that
    // ends right there is not a spot.
    let (rest, _) = space1(input)?;
    Ok(("", RawSpot {
        spotter,
        freq,
        call,
        rest,
    }))
}

/// Normalize a frequency token to Hz.
///
/// Most clusters report kHz (e.g. 14074.0), a few report Hz. Values
/// under 1 MHz are assumed kHz and scaled by 1000. The heuristic is
/// lossy; downstream feeds depend on this exact behavior.
///
/// Returns `None` for malformed numbers and non-positive values.
pub fn parse_frequency(raw: &str) -> Option<u64> {
    let freq: f64 = raw.parse().ok()?;
    if freq <= 0.0 {
        return None;
    }
    if freq < 1_000_000.0 {
        Some((freq * 1000.0) as u64)
    } else {
        Some(freq as u64)
    }
}

/// Split the free-text tail of a spot into mode and comment.
///
/// Two-phase, order-sensitive:
/// 1. If the first whitespace-delimited token is a mode token, the mode
///    is that token and the comment is the rejoined remainder.
/// 2. Otherwise every token is scanned; on a match the mode is that
///    token but the comment stays the ENTIRE trimmed rest, mode token
///    included. Downstream consumers rely on this asymmetry.
///
/// No match at all yields `Mode::Unknown` and the full rest.
pub fn extract_mode_and_comment(rest: &str) -> (Mode, String) {
    let rest = rest.trim();
    if rest.is_empty() {
        return (Mode::Unknown, String::new());
    }

    let parts: Vec<&str> = rest.split_whitespace().collect();
    if let Some(mode) = parts.first().and_then(|t| Mode::from_token(t)) {
        return (mode, parts[1..].join(" "));
    }

    for token in &parts {
        if let Some(mode) = Mode::from_token(token) {
            return (mode, rest.to_string());
        }
    }

    (Mode::Unknown, rest.to_string())
}

/// Parse one sanitized line into a [`Spot`].
///
/// Returns `None` for anything that is not a spot announcement,
/// including lines with malformed or non-positive frequencies.
///
/// # Example
///
/// ```
/// use dx_bridge::parser::parse_spot;
///
/// let spot = parse_spot("DX de W1AW: 14074.0 JA1ABC FT8 good signal").unwrap();
/// assert_eq!(spot.spotter, "W1AW");
/// assert_eq!(spot.freq_hz, 14_074_000);
/// assert_eq!(spot.band, "20m");
/// ```
pub fn parse_spot(line: &str) -> Option<Spot> {
    let line = line.trim();
    let raw = match match_spot_line(line) {
        Ok((_, raw)) => raw,
        Err(_) => return None,
    };

    let freq_hz = parse_frequency(raw.freq)?;
    let (mode, comment) = extract_mode_and_comment(raw.rest);

    Some(Spot {
        freq_hz,
        call: raw.call.to_uppercase(),
        mode,
        comment,
        spotter: raw.spotter.to_uppercase(),
        band: band_for_freq(freq_hz),
        time: Utc::now().timestamp(),
    })
}

/// Check if a line could be a spot (quick pre-filter).
///
/// Deliberately looser than the grammar: it must never reject a line
/// `parse_spot` would accept.
#[inline]
pub fn looks_like_spot(line: &str) -> bool {
    let b = line.trim_start().as_bytes();
    b.len() >= 2 && b[0].eq_ignore_ascii_case(&b'd') && b[1].eq_ignore_ascii_case(&b'x')
}
