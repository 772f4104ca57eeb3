//! Pairing token decoding.
//!
//! The pairing token is configured as a hex string, optionally grouped with
//! dashes (`1a2b-3c4d-...`). It is written verbatim to the auth
//! characteristic.

use crate::error::{Error, Result};

/// Decode a hex pairing token into the bytes written during authentication.
///
/// Dashes are ignored. The remaining characters must be an even number of
/// hex digits.
pub fn decode_hex_token(token: &str) -> Result<Vec<u8>> {
    let digits: Vec<u8> = token.bytes().filter(|b| *b != b'-').collect();

    if digits.len() % 2 != 0 {
        return Err(Error::InvalidTokenFormat {
            reason: format!("odd number of hex digits ({})", digits.len()),
        });
    }

    digits
        .chunks_exact(2)
        .map(|pair| match (hex_value(pair[0]), hex_value(pair[1])) {
            (Some(hi), Some(lo)) => Ok((hi << 4) | lo),
            _ => Err(Error::InvalidTokenFormat {
                reason: format!(
                    "non-hex characters {:?}",
                    String::from_utf8_lossy(pair)
                ),
            }),
        })
        .collect()
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}
