// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use crate::DecodeError;

/// Upper bound on length-prefixed string and binary fields.
pub const TWO_BYTES_MAX: usize = u16::MAX as usize;

/// Generate a random alphanumeric string of `len` chars.
///
/// Used for auto-generated client ids.
#[must_use]
pub fn random_string(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringError {
    /// Longer than 65,535 bytes.
    TooLong,

    /// Not well-formed UTF-8.
    IllFormed,

    /// Contains U+0000 or another disallowed code point.
    InvalidChar,
}

/// Check an MQTT UTF-8 string field.
///
/// The character data MUST be well-formed UTF-8 and MUST NOT include the
/// null character U+0000 [MQTT-1.5.4-2].
///
/// # Errors
///
/// Returns error if `s` is too long or contains a disallowed code point.
pub fn validate_utf8_string(s: &str) -> Result<(), StringError> {
    if s.len() > TWO_BYTES_MAX {
        return Err(StringError::TooLong);
    }
    if s.chars().any(|c| c == '\u{0000}') {
        return Err(StringError::InvalidChar);
    }
    Ok(())
}

/// Convert raw bytes into a validated MQTT string.
///
/// # Errors
///
/// Returns error if `bytes` are not well-formed UTF-8 or contain a
/// disallowed code point.
pub fn to_utf8_string(bytes: &[u8]) -> Result<String, StringError> {
    let s = String::from_utf8(bytes.to_vec()).map_err(|_e| StringError::IllFormed)?;
    validate_utf8_string(&s)?;
    Ok(s)
}

/// Check a two-byte length-prefixed binary field.
///
/// # Errors
///
/// Returns error if `data` is longer than 65,535 bytes.
pub fn validate_two_bytes_data(data: &[u8]) -> Result<(), StringError> {
    if data.len() > TWO_BYTES_MAX {
        Err(StringError::TooLong)
    } else {
        Ok(())
    }
}

/// Check a client identifier.
///
/// An empty id is accepted; the server then assigns one and returns it in
/// the Assigned Client Identifier property. Servers commonly accept more
/// than the 23-char minimum set, so only the character set is enforced.
///
/// # Errors
///
/// Returns error if `client_id` contains characters outside
/// `[0-9a-zA-Z_-]`.
pub fn validate_client_id(client_id: &str) -> Result<(), DecodeError> {
    if client_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        Ok(())
    } else {
        Err(DecodeError::InvalidClientId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_string() {
        let s = random_string(8);
        assert_eq!(s.len(), 8);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_validate_utf8_string() {
        assert!(validate_utf8_string("sensors/temp").is_ok());
        assert_eq!(
            validate_utf8_string("a\u{0000}b"),
            Err(StringError::InvalidChar)
        );
    }

    #[test]
    fn test_validate_client_id() {
        assert!(validate_client_id("lumo-A1_b2").is_ok());
        assert!(validate_client_id("").is_ok());
        assert_eq!(
            validate_client_id("no spaces"),
            Err(DecodeError::InvalidClientId)
        );
    }
}
