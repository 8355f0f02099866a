// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};
use std::fmt;
use std::io::Write;

use crate::utils::{validate_utf8_string, StringError};
use crate::{ByteReader, DecodeError, DecodePacket, EncodeError, EncodePacket};

/// UTF-8 Encoded String field.
///
/// A Two Byte Integer length prefix followed by that many bytes of
/// well-formed UTF-8, so the payload is limited to 65,535 bytes. The
/// character data MUST NOT include U+0000 [MQTT-1.5.4-2]; ill-formed
/// UTF-8 is a Malformed Packet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StringData(String);

impl StringData {
    #[must_use]
    pub const fn new() -> Self {
        Self(String::new())
    }

    /// Convert a string slice into string data.
    ///
    /// # Errors
    ///
    /// Returns error if `s` is too long or contains a disallowed code
    /// point.
    pub fn from(s: &str) -> Result<Self, StringError> {
        validate_utf8_string(s)?;
        Ok(Self(s.to_string()))
    }

    /// Get byte length in packet, length prefix included.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Take the inner string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for StringData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for StringData {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl DecodePacket for StringData {
    fn decode(reader: &mut ByteReader) -> Result<Self, DecodeError> {
        let len = reader.read_u16()?;
        let s = reader.read_string(usize::from(len))?;
        Ok(Self(s))
    }
}

impl EncodePacket for StringData {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        #[allow(clippy::cast_possible_truncation)]
        let len = self.0.len() as u16;
        buf.write_u16::<BigEndian>(len)?;
        buf.write_all(self.0.as_bytes())?;
        Ok(self.bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let s = StringData::from("sensors/temp").unwrap();
        let mut buf = Vec::new();
        let written = s.encode(&mut buf).unwrap();
        assert_eq!(written, s.bytes());
        assert_eq!(&buf[..2], &[0x00, 0x0c]);

        let mut reader = ByteReader::new(&buf);
        assert_eq!(StringData::decode(&mut reader).unwrap(), s);
    }

    #[test]
    fn test_rejects_null_char() {
        assert!(StringData::from("a\u{0000}").is_err());
    }
}
