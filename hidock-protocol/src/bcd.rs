//! Packed-decimal (BCD) helpers used for device timestamps.
//!
//! Each byte carries two decimal digits, high nibble first. Device clocks
//! travel as the 14-digit string `YYYYMMDDHHMMSS` packed into 7 bytes.

use crate::error::ProtocolError;
use chrono::NaiveDateTime;

/// Timestamp format used on the wire.
pub const TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Packs an even-length string of decimal digits.
pub fn to_bcd(digits: &str) -> Result<Vec<u8>, ProtocolError> {
    if digits.len() % 2 != 0 {
        return Err(ProtocolError::InvalidBcd(format!(
            "odd digit count {}",
            digits.len()
        )));
    }
    if let Some(c) = digits.chars().find(|c| !c.is_ascii_digit()) {
        return Err(ProtocolError::InvalidBcd(format!("non-digit {:?}", c)));
    }

    Ok(digits
        .as_bytes()
        .chunks(2)
        .map(|pair| ((pair[0] - b'0') << 4) | (pair[1] - b'0'))
        .collect())
}

/// Unpacks BCD bytes into a digit string, two digits per byte.
pub fn from_bcd(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(char::from(b'0' + ((b >> 4) & 0x0F)));
        out.push(char::from(b'0' + (b & 0x0F)));
    }
    out
}

/// Encodes a timestamp as 7 BCD bytes.
///
/// Only years 0 through 9999 fit in four digits.
pub fn encode_time(time: &NaiveDateTime) -> Result<Vec<u8>, ProtocolError> {
    let digits = time.format(TIME_FORMAT).to_string();
    if digits.len() != 14 {
        return Err(ProtocolError::InvalidBcd(format!(
            "timestamp {} does not fit 14 digits",
            digits
        )));
    }
    to_bcd(&digits)
}

/// Parses the 14-digit timestamp produced by [`from_bcd`].
pub fn parse_time(digits: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(digits, TIME_FORMAT).ok()
}
