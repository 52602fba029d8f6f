//! Decoded card data and the time arithmetic shared by all card series.
//!
//! Cards store clock times as seconds within a 12-hour half-day (Card-5) or
//! with an AM/PM bit (Card-6 and later). Decoders therefore carry a running
//! reference time, seeded from the configured zero hour, and push each raw
//! value forward in half-day or full-day steps until it lies past the
//! reference. All resolved times are milliseconds since the event midnight.

pub mod card5;
pub mod card6plus;

/// A time field the card never wrote. Any negative value means "no time";
/// this is the canonical one.
pub const NO_TIME: i64 = -1;
/// Raw marker for an unwritten time field, already scaled to milliseconds.
pub const NO_SI_TIME: i64 = 1000 * 0xEEEE;
pub const TWELVE_HOURS: i64 = 12 * 3600 * 1000;
pub const ONE_DAY: i64 = 2 * TWELVE_HOURS;

/// Slack for slightly out-of-order punches: a raw time up to one hour before
/// the reference is taken as-is rather than pushed a step forward.
const BACKWARD_SLACK: i64 = 3_600_000;

/// Resolves a raw card time against a reference.
///
/// `NO_SI_TIME` resolves to [`NO_TIME`]; with no reference the raw value
/// stands; otherwise the value is advanced in `step` increments until it is
/// no more than an hour before `reference`.
pub fn advance_time_past(raw: i64, reference: i64, step: i64) -> i64 {
    if raw == NO_SI_TIME {
        return NO_TIME;
    }
    if reference == NO_TIME {
        return raw;
    }
    let mut time = raw;
    while time < reference - BACKWARD_SLACK {
        time += step;
    }
    time
}

/// Renders milliseconds since midnight as `HH:MM:SS`, or `--:--:--` for a
/// missing time. Hours keep counting past 24 after a day rollover.
pub fn format_clock(ms: i64) -> String {
    if ms < 0 {
        return "--:--:--".to_string();
    }
    let secs = ms / 1000;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// One control visit recorded on a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Punch {
    /// Control code, 31..511 in practice.
    pub code: u16,
    /// Milliseconds since the event midnight, or [`NO_TIME`].
    pub timestamp_ms: i64,
}

/// Card generation, as announced by the detection frame and the memory
/// layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CardSeries {
    #[strum(serialize = "SiCard 5")]
    Card5,
    #[strum(serialize = "SiCard 6")]
    Card6,
    #[strum(serialize = "SiCard 8")]
    Card8,
    #[strum(serialize = "SiCard 9")]
    Card9,
    #[strum(serialize = "pCard")]
    PCard,
    #[strum(serialize = "SiCard 10/11/SIAC")]
    Card10Plus,
    #[strum(serialize = "unknown card")]
    Unknown,
}

/// Everything read from one card. Produced once by a decoder and never
/// modified afterwards.
#[derive(Debug, Clone)]
pub struct CardRecord {
    pub card_number: String,
    pub series: CardSeries,
    pub start_ms: i64,
    pub finish_ms: i64,
    pub check_ms: i64,
    pub punch_count: u16,
    pub punches: Vec<Punch>,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("card data truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
}

pub(crate) fn check_len(data: &[u8], need: usize) -> Result<(), DecodeError> {
    if data.len() < need {
        return Err(DecodeError::Truncated {
            need,
            have: data.len(),
        });
    }
    Ok(())
}
