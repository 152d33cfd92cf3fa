use crate::error::DecodeError;

use chrono::{NaiveDate, NaiveDateTime};

pub const MAX_NUMERIC_WIDTH: usize = 16;

pub struct Decoder;
impl Decoder {
    /// UTF-8 text with trailing NUL padding removed.
    pub fn text(input: &[u8]) -> Result<String, DecodeError> {
        let s = std::str::from_utf8(input)?;
        Ok(s.trim_end_matches('\0').to_string())
    }

    /// Big-endian unsigned integer, 1 to 16 bytes wide.
    pub fn unsigned(input: &[u8]) -> Result<u128, DecodeError> {
        Self::check_width(input)?;
        Ok(input.iter().fold(0u128, |acc, b| (acc << 8) | u128::from(*b)))
    }

    /// Big-endian two's-complement integer, 1 to 16 bytes wide.
    pub fn signed(input: &[u8]) -> Result<i128, DecodeError> {
        let raw = Self::unsigned(input)?;
        let shift = 128 - 8 * input.len() as u32;
        // sign-extend from the top bit of the narrower value
        Ok(((raw << shift) as i128) >> shift)
    }

    /// Six bytes: years since 2000, month, day, hour, minute, second.
    pub fn datetime(input: &[u8]) -> Result<NaiveDateTime, DecodeError> {
        let invalid = || DecodeError::Date(input.to_vec());

        if input.len() < 6 {
            return Err(invalid());
        }

        NaiveDate::from_ymd_opt(
            2000 + i32::from(input[0]),
            u32::from(input[1]),
            u32::from(input[2]),
        )
        .and_then(|d| d.and_hms_opt(u32::from(input[3]), u32::from(input[4]), u32::from(input[5])))
        .ok_or_else(invalid)
    }

    pub fn check_width(input: &[u8]) -> Result<(), DecodeError> {
        if input.is_empty() || input.len() > MAX_NUMERIC_WIDTH {
            return Err(DecodeError::Width { len: input.len() });
        }
        Ok(())
    }
}
