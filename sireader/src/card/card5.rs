//! Card-5 decoder.
//!
//! The whole card is one 128-byte block, carried at offset 5 of the readout
//! answer. Times are bare seconds words without an AM/PM bit, so every field
//! is resolved in half-day steps against the running reference. The first 30
//! punches carry times, five to a 16-byte page; any further punches are
//! stored as bare codes in the first byte of each page.

use super::{
    advance_time_past, check_len, CardRecord, CardSeries, DecodeError, Punch, NO_TIME,
    TWELVE_HOURS,
};

const BLOCK_OFFSET: usize = 5;
const BLOCK_LEN: usize = 128;

const CARD_NUMBER: usize = 0x04;
const CARD_NUMBER_SERIES: usize = 0x06;
const START_TIME: usize = 0x13;
const FINISH_TIME: usize = 0x15;
const PUNCH_COUNT: usize = 0x17;
const CHECK_TIME: usize = 0x19;

const TIMED_PUNCHES: usize = 0x21;
const CODE_ONLY_PUNCHES: usize = 0x20;
const PAGE_SIZE: usize = 0x10;
const PUNCHES_PER_PAGE: usize = 5;
const TIMED_CAPACITY: usize = 30;

/// Decodes the Card-5 readout answer into a card record.
pub fn decode(response: &[u8], zero_hour_ms: i64) -> Result<CardRecord, DecodeError> {
    check_len(response, BLOCK_OFFSET + BLOCK_LEN)?;
    let block = &response[BLOCK_OFFSET..BLOCK_OFFSET + BLOCK_LEN];

    let mut card_number = u32::from(word(block, CARD_NUMBER));
    let series_byte = block[CARD_NUMBER_SERIES];
    if series_byte > 1 {
        card_number += u32::from(series_byte) * 100_000;
    }

    // The counter byte includes the clear record.
    let punch_count = usize::from(block[PUNCH_COUNT].saturating_sub(1));

    let start_ms = advance_time_past(raw_ms(block, START_TIME), zero_hour_ms, TWELVE_HOURS);
    let check_ms = advance_time_past(raw_ms(block, CHECK_TIME), zero_hour_ms, TWELVE_HOURS);

    let mut reference = zero_hour_ms.max(start_ms);
    let mut punches = Vec::with_capacity(punch_count);
    for i in 0..punch_count.min(TIMED_CAPACITY) {
        let offset = TIMED_PUNCHES + i / PUNCHES_PER_PAGE * PAGE_SIZE + i % PUNCHES_PER_PAGE * 3;
        let timestamp_ms = advance_time_past(raw_ms(block, offset + 1), reference, TWELVE_HOURS);
        if timestamp_ms != NO_TIME {
            reference = timestamp_ms;
        }
        punches.push(Punch {
            code: block[offset].into(),
            timestamp_ms,
        });
    }
    for extra in 0..punch_count.saturating_sub(TIMED_CAPACITY) {
        let offset = CODE_ONLY_PUNCHES + extra * PAGE_SIZE;
        check_len(block, offset + 1)?;
        punches.push(Punch {
            code: block[offset].into(),
            timestamp_ms: NO_TIME,
        });
    }

    let finish_ms = advance_time_past(raw_ms(block, FINISH_TIME), reference, TWELVE_HOURS);

    Ok(CardRecord {
        card_number: card_number.to_string(),
        series: CardSeries::Card5,
        start_ms,
        finish_ms,
        check_ms,
        punch_count: punch_count as u16,
        punches,
    })
}

fn word(block: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([block[offset], block[offset + 1]])
}

/// Seconds word scaled to milliseconds; the 0xEEEE marker scales straight to
/// the raw no-time sentinel.
fn raw_ms(block: &[u8], offset: usize) -> i64 {
    i64::from(word(block, offset)) * 1000
}
