//! Utility functions for the muse-ble-link crate.

use crate::error::{Error, Result};

/// Format bytes as upper-case hex pairs separated by dashes.
///
/// # Arguments
///
/// * `data` - Bytes to format
///
/// # Returns
///
/// A string such as `"02-05-08"`, or an empty string for empty input
///
/// # Example
///
/// ```
/// use muse_ble_link::format_hex;
///
/// assert_eq!(format_hex(&[0x02, 0x05, 0xAB]), "02-05-AB");
/// ```
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join("-")
}

/// Parse dash-separated hex pairs, the inverse of [`format_hex`].
///
/// Case-insensitive. An empty string parses to no bytes.
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }

    text.split('-')
        .map(|pair| {
            // from_str_radix alone would accept a sign
            if pair.len() != 2 || !pair.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(Error::InvalidData {
                    context: format!("Invalid hex pair '{}'", pair),
                });
            }
            u8::from_str_radix(pair, 16).map_err(|_| Error::InvalidData {
                context: format!("Invalid hex pair '{}'", pair),
            })
        })
        .collect()
}
