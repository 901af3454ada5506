//! Hex formatting helpers.
//!
//! EPCs and passwords travel through logs, CLIs and settings files as hex
//! strings; these two functions are the only conversion points.

use crate::error::{Error, Result};

/// Format bytes as an uppercase hex string with no separators.
///
/// # Example
///
/// ```
/// use uhflib_core::bytes_to_hex;
///
/// assert_eq!(bytes_to_hex(&[0xE2, 0x00, 0x1a]), "E2001A");
/// ```
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Parse a hex string into bytes.
///
/// Accepts upper or lower case, an optional `0x` prefix, and ignores
/// spaces, `:` and `-` separators.
///
/// # Example
///
/// ```
/// use uhflib_core::parse_hex;
///
/// assert_eq!(parse_hex("0xE2 00:1a").unwrap(), vec![0xE2, 0x00, 0x1A]);
/// assert!(parse_hex("ABC").is_err());
/// ```
pub fn parse_hex(s: &str) -> Result<Vec<u8>> {
    let trimmed = s.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let digits: String = body
        .chars()
        .filter(|c| !matches!(c, ' ' | ':' | '-'))
        .collect();
    hex::decode(&digits).map_err(|e| Error::InvalidParameter(format!("invalid hex {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_uppercase() {
        assert_eq!(bytes_to_hex(&[0x00, 0xab, 0xFF]), "00ABFF");
        assert_eq!(bytes_to_hex(&[]), "");
    }

    #[test]
    fn parse_hex_plain() {
        assert_eq!(parse_hex("deadBEEF").unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn parse_hex_with_separators() {
        assert_eq!(parse_hex("00-11:22 33").unwrap(), vec![0x00, 0x11, 0x22, 0x33]);
    }

    #[test]
    fn parse_hex_rejects_garbage() {
        assert!(matches!(parse_hex("zz"), Err(Error::InvalidParameter(_))));
        assert!(matches!(parse_hex("123"), Err(Error::InvalidParameter(_))));
        assert!(matches!(parse_hex("0x"), Ok(ref v) if v.is_empty()));
    }
}
