//! Decoders for Card-6 and the Card-8 family (8, 9, pCard, 10/11/SIAC).
//!
//! These cards answer a readout as a run of 128-byte blocks. All of them
//! store times as 4-byte pages (AM/PM bit, then a seconds word) and punches
//! as 4-byte pages holding a 10-bit code; only the field offsets differ per
//! series, so one decoder runs off a small offset table. The Card-8 family
//! additionally announces its exact series in the low nibble of byte 24.

use super::{
    advance_time_past, check_len, CardRecord, CardSeries, DecodeError, Punch, NO_SI_TIME, NO_TIME,
    ONE_DAY, TWELVE_HOURS,
};

pub const BLOCK_LEN: usize = 128;
/// Card data sits at bytes 6..134 of each block answer.
const RESPONSE_DATA_OFFSET: usize = 6;

const PAGE_BYTES: usize = 4;
const SERIES_NIBBLE: usize = 24;

/// Field offsets of one card series. Times and the card number are byte
/// offsets into the assembled buffer; punches are indexed in 4-byte pages.
struct Layout {
    series: CardSeries,
    card_number: usize,
    start_time: usize,
    finish_time: usize,
    check_time: usize,
    punch_count: usize,
    punches_page: usize,
}

const CARD6: Layout = Layout {
    series: CardSeries::Card6,
    card_number: 11,
    start_time: 24,
    finish_time: 20,
    check_time: 28,
    punch_count: 18,
    punches_page: 32,
};

const fn card8_family(series: CardSeries, punches_page: usize) -> Layout {
    Layout {
        series,
        card_number: 25,
        start_time: 12,
        finish_time: 16,
        check_time: 8,
        punch_count: 22,
        punches_page,
    }
}

/// Concatenates the card data of consecutive block answers.
pub fn assemble_blocks<'a>(
    responses: impl IntoIterator<Item = &'a [u8]>,
) -> Result<Vec<u8>, DecodeError> {
    let mut data = Vec::new();
    for response in responses {
        check_len(response, RESPONSE_DATA_OFFSET + BLOCK_LEN)?;
        data.extend_from_slice(&response[RESPONSE_DATA_OFFSET..RESPONSE_DATA_OFFSET + BLOCK_LEN]);
    }
    Ok(data)
}

/// Decodes an assembled Card-6 buffer.
pub fn decode_card6(data: &[u8], zero_hour_ms: i64) -> Result<CardRecord, DecodeError> {
    decode_with_layout(data, &CARD6, zero_hour_ms)
}

/// Decodes an assembled Card-8-family buffer, picking the series from the
/// discriminator nibble.
pub fn decode_card8plus(data: &[u8], zero_hour_ms: i64) -> Result<CardRecord, DecodeError> {
    check_len(data, BLOCK_LEN)?;
    let layout = match data[SERIES_NIBBLE] & 0x0F {
        2 => card8_family(CardSeries::Card8, 34),
        1 => card8_family(CardSeries::Card9, 14),
        4 => card8_family(CardSeries::PCard, 44),
        15 => card8_family(CardSeries::Card10Plus, 32),
        _ => card8_family(CardSeries::Unknown, 0),
    };
    decode_with_layout(data, &layout, zero_hour_ms)
}

fn decode_with_layout(
    data: &[u8],
    layout: &Layout,
    zero_hour_ms: i64,
) -> Result<CardRecord, DecodeError> {
    check_len(data, BLOCK_LEN)?;

    let card_number = u32::from_be_bytes([
        0,
        data[layout.card_number],
        data[layout.card_number + 1],
        data[layout.card_number + 2],
    ]);
    let punch_count = usize::from(data[layout.punch_count]);
    check_len(data, (layout.punches_page + punch_count) * PAGE_BYTES)?;

    let start_ms = advance_time_past(page_time(data, layout.start_time), zero_hour_ms, ONE_DAY);
    let check_ms = advance_time_past(page_time(data, layout.check_time), zero_hour_ms, ONE_DAY);

    let mut reference = zero_hour_ms.max(start_ms);
    let mut punches = Vec::with_capacity(punch_count);
    for page in 0..punch_count {
        let offset = (layout.punches_page + page) * PAGE_BYTES;
        let timestamp_ms = advance_time_past(page_time(data, offset), reference, ONE_DAY);
        if timestamp_ms != NO_TIME {
            reference = timestamp_ms;
        }
        punches.push(Punch {
            code: page_code(data, offset),
            timestamp_ms,
        });
    }

    let finish_ms = advance_time_past(page_time(data, layout.finish_time), reference, ONE_DAY);

    Ok(CardRecord {
        card_number: card_number.to_string(),
        series: layout.series,
        start_ms,
        finish_ms,
        check_ms,
        punch_count: punch_count as u16,
        punches,
    })
}

/// Time page: AM/PM flag in bit 0 of the first byte, seconds word in the
/// last two. The unwritten marker passes through untouched.
fn page_time(data: &[u8], offset: usize) -> i64 {
    let pm = i64::from(data[offset] & 0x01);
    let raw = i64::from(u16::from_be_bytes([data[offset + 2], data[offset + 3]])) * 1000;
    if raw == NO_SI_TIME {
        NO_SI_TIME
    } else {
        pm * TWELVE_HOURS + raw
    }
}

/// Punch page: the two top bits of the first byte extend the code byte to
/// ten bits.
fn page_code(data: &[u8], offset: usize) -> u16 {
    (u16::from(data[offset] & 0xC0) << 2) | u16::from(data[offset + 1])
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_VALUE: u16 = 0xEEEE;

    struct CardImage {
        data: Vec<u8>,
    }

    impl CardImage {
        fn new(blocks: usize) -> Self {
            CardImage {
                data: vec![0; blocks * BLOCK_LEN],
            }
        }

        fn put_time(&mut self, offset: usize, pm: bool, seconds: u16) -> &mut Self {
            self.data[offset] = pm as u8;
            self.data[offset + 2..offset + 4].copy_from_slice(&seconds.to_be_bytes());
            self
        }

        fn put_number(&mut self, offset: usize, number: u32) -> &mut Self {
            self.data[offset..offset + 3].copy_from_slice(&number.to_be_bytes()[1..]);
            self
        }

        fn put_punch(&mut self, page: usize, code: u16, pm: bool, seconds: u16) -> &mut Self {
            let offset = page * PAGE_BYTES;
            self.data[offset] = ((code >> 2) as u8 & 0xC0) | pm as u8;
            self.data[offset + 1] = code as u8;
            self.data[offset + 2..offset + 4].copy_from_slice(&seconds.to_be_bytes());
            self
        }

        fn card6(&mut self, number: u32, punches: &[(u16, bool, u16)]) -> &mut Self {
            self.put_number(CARD6.card_number, number);
            self.data[CARD6.punch_count] = punches.len() as u8;
            for (i, &(code, pm, secs)) in punches.iter().enumerate() {
                self.put_punch(CARD6.punches_page + i, code, pm, secs);
            }
            self
        }

        fn card8_family(&mut self, nibble: u8, number: u32, punches: &[(u16, bool, u16)]) -> &mut Self {
            self.data[SERIES_NIBBLE] = 0xA0 | nibble;
            self.put_number(25, number);
            self.data[22] = punches.len() as u8;
            let page = match nibble {
                2 => 34,
                1 => 14,
                4 => 44,
                15 => 32,
                _ => 0,
            };
            for (i, &(code, pm, secs)) in punches.iter().enumerate() {
                self.put_punch(page + i, code, pm, secs);
            }
            self
        }
    }

    #[test]
    fn decodes_a_card6_readout() {
        let mut image = CardImage::new(3);
        image.card6(501_200, &[(31, false, 30_600), (32, false, 31_200), (33, false, 31_980)]);
        image.put_time(CARD6.start_time, false, 30_000);
        image.put_time(CARD6.finish_time, false, 32_400);
        image.put_time(CARD6.check_time, false, 29_700);

        let record = decode_card6(&image.data, 0).unwrap();
        assert_eq!(record.card_number, "501200");
        assert_eq!(record.series, CardSeries::Card6);
        assert_eq!(record.punch_count, 3);
        assert_eq!(record.start_ms, 30_000_000);
        assert_eq!(record.finish_ms, 32_400_000);
        assert_eq!(record.check_ms, 29_700_000);
        assert_eq!(record.punches[0], Punch { code: 31, timestamp_ms: 30_600_000 });
        assert_eq!(record.punches[2], Punch { code: 33, timestamp_ms: 31_980_000 });
    }

    #[test]
    fn pm_bit_shifts_into_the_afternoon() {
        let mut image = CardImage::new(3);
        image.card6(77, &[(31, true, 3_600)]);
        image.put_time(CARD6.start_time, true, 3_000);
        image.put_time(CARD6.finish_time, true, 4_200);
        image.put_time(CARD6.check_time, false, NO_VALUE);

        let record = decode_card6(&image.data, 0).unwrap();
        assert_eq!(record.start_ms, TWELVE_HOURS + 3_000_000);
        assert_eq!(record.punches[0].timestamp_ms, TWELVE_HOURS + 3_600_000);
        assert_eq!(record.finish_ms, TWELVE_HOURS + 4_200_000);
        assert_eq!(record.check_ms, NO_TIME);
    }

    #[test]
    fn midnight_rollover_pushes_a_whole_day() {
        // Second punch reads 00:10 AM after a 23:30 one: it happened the next
        // day, as did the finish.
        let mut image = CardImage::new(3);
        image.card6(9, &[(41, true, 41_400), (42, false, 600)]);
        image.put_time(CARD6.start_time, true, 41_000);
        image.put_time(CARD6.finish_time, false, 1_200);
        image.put_time(CARD6.check_time, false, NO_VALUE);

        let record = decode_card6(&image.data, 0).unwrap();
        assert_eq!(record.punches[0].timestamp_ms, TWELVE_HOURS + 41_400_000);
        assert_eq!(record.punches[1].timestamp_ms, ONE_DAY + 600_000);
        assert_eq!(record.finish_ms, ONE_DAY + 1_200_000);
    }

    #[test]
    fn ten_bit_codes_keep_their_high_bits() {
        let mut image = CardImage::new(3);
        image.card6(1, &[(300, false, 30_000), (511, false, 30_100)]);
        image.put_time(CARD6.start_time, false, 29_000);
        image.put_time(CARD6.finish_time, false, NO_VALUE);
        image.put_time(CARD6.check_time, false, NO_VALUE);

        let record = decode_card6(&image.data, 0).unwrap();
        assert_eq!(record.punches[0].code, 300);
        assert_eq!(record.punches[1].code, 511);
    }

    #[test]
    fn card9_stores_punches_inside_the_first_block() {
        let mut image = CardImage::new(2);
        image.card8_family(1, 200_345, &[(35, false, 40_000)]);
        image.put_time(12, false, 39_000);
        image.put_time(16, false, 41_000);
        image.put_time(8, false, NO_VALUE);

        let record = decode_card8plus(&image.data, 0).unwrap();
        assert_eq!(record.series, CardSeries::Card9);
        assert_eq!(record.card_number, "200345");
        assert_eq!(record.punches, vec![Punch { code: 35, timestamp_ms: 40_000_000 }]);
        assert_eq!(record.start_ms, 39_000_000);
        assert_eq!(record.finish_ms, 41_000_000);
        assert_eq!(record.check_ms, NO_TIME);
    }

    #[test]
    fn card8_punches_start_in_the_second_block() {
        let mut image = CardImage::new(2);
        image.card8_family(2, 890_100, &[(31, false, 30_000), (32, false, 30_500)]);
        image.put_time(12, false, 29_500);
        image.put_time(16, false, 31_000);
        image.put_time(8, false, 29_000);

        let record = decode_card8plus(&image.data, 0).unwrap();
        assert_eq!(record.series, CardSeries::Card8);
        assert_eq!(record.punch_count, 2);
        assert_eq!(record.punches[1], Punch { code: 32, timestamp_ms: 30_500_000 });
    }

    #[test]
    fn siac_series_nibble_is_all_ones() {
        let mut image = CardImage::new(5);
        image.card8_family(15, 8_000_001, &[(100, false, 36_000)]);
        image.put_time(12, false, 35_000);
        image.put_time(16, false, 37_000);
        image.put_time(8, false, NO_VALUE);

        let record = decode_card8plus(&image.data, 0).unwrap();
        assert_eq!(record.series, CardSeries::Card10Plus);
        assert_eq!(record.card_number, "8000001");
        assert_eq!(record.punches[0].code, 100);
    }

    #[test]
    fn pcard_uses_its_own_punch_page() {
        let mut image = CardImage::new(2);
        image.card8_family(4, 4_000_123, &[(61, false, 50_000)]);
        image.put_time(12, false, 49_000);
        image.put_time(16, false, 51_000);
        image.put_time(8, false, NO_VALUE);

        let record = decode_card8plus(&image.data, 0).unwrap();
        assert_eq!(record.series, CardSeries::PCard);
        assert_eq!(record.punches[0], Punch { code: 61, timestamp_ms: 50_000_000 });
    }

    #[test]
    fn unrecognised_series_nibble_still_yields_a_record() {
        let mut image = CardImage::new(2);
        image.card8_family(9, 123, &[]);
        image.put_time(12, false, NO_VALUE);
        image.put_time(16, false, NO_VALUE);
        image.put_time(8, false, NO_VALUE);

        let record = decode_card8plus(&image.data, 0).unwrap();
        assert_eq!(record.series, CardSeries::Unknown);
        assert_eq!(record.card_number, "123");
        assert!(record.punches.is_empty());
    }

    #[test]
    fn punch_counter_beyond_the_buffer_is_rejected() {
        let mut image = CardImage::new(3);
        image.card6(5, &[]);
        image.data[CARD6.punch_count] = 200;
        assert!(matches!(
            decode_card6(&image.data, 0),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn assembles_block_answers_in_order() {
        let mut first = vec![0u8; RESPONSE_DATA_OFFSET + BLOCK_LEN + 3];
        let mut second = first.clone();
        first[RESPONSE_DATA_OFFSET] = 0xAA;
        second[RESPONSE_DATA_OFFSET] = 0xBB;
        let data =
            assemble_blocks([first.as_slice(), second.as_slice()]).unwrap();
        assert_eq!(data.len(), 2 * BLOCK_LEN);
        assert_eq!(data[0], 0xAA);
        assert_eq!(data[BLOCK_LEN], 0xBB);
    }

    #[test]
    fn short_block_answer_is_rejected() {
        let short = vec![0u8; 40];
        assert!(matches!(
            assemble_blocks([short.as_slice()]),
            Err(DecodeError::Truncated { .. })
        ));
    }
}
