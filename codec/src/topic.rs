// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Topic names and topic filters.
//!
//! A topic name identifies the channel of a PUBLISH packet and never
//! contains wildcards. A topic filter is a subscription pattern that may
//! contain `+` (one level) and `#` (all trailing levels), and may be a
//! shared subscription of the form `$share/<group>/<filter>`.

use std::fmt;

use crate::utils::validate_utf8_string;
use crate::{ByteReader, DecodeError, DecodePacket, EncodeError, EncodePacket, StringData};

const LEVEL_SEPARATOR: char = '/';
const MULTI_WILDCARD: &str = "#";
const SINGLE_WILDCARD: &str = "+";
const SHARE_PREFIX: &str = "$share/";

/// Topic name carried in a PUBLISH packet.
///
/// May be empty only when a topic alias stands in for it; packet-level
/// validation enforces that.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PubTopic(StringData);

impl PubTopic {
    /// Create a topic name.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` contains a wildcard character
    /// [MQTT-3.3.2-2] or is not a valid MQTT string.
    pub fn new(topic: &str) -> Result<Self, EncodeError> {
        validate_utf8_string(topic).map_err(|_e| EncodeError::InvalidData)?;
        if topic.contains(['#', '+']) {
            return Err(EncodeError::InvalidData);
        }
        let inner = StringData::from(topic)?;
        Ok(Self(inner))
    }

    /// Get byte length in packet.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.0.bytes()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<str> for PubTopic {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl fmt::Display for PubTopic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl DecodePacket for PubTopic {
    fn decode(reader: &mut ByteReader) -> Result<Self, DecodeError> {
        let inner = StringData::decode(reader)?;
        if inner.as_ref().contains(['#', '+']) {
            return Err(DecodeError::InvalidTopic);
        }
        Ok(Self(inner))
    }
}

impl EncodePacket for PubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        self.0.encode(buf)
    }
}

/// Subscription pattern with optional wildcards and shared-subscription
/// prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicFilter {
    filter: StringData,

    /// Byte offset past the `$share/<group>/` prefix, 0 for ordinary
    /// filters.
    match_start: usize,
}

impl TopicFilter {
    /// Parse and validate a topic filter.
    ///
    /// # Errors
    ///
    /// Returns error if the filter is empty, misplaces a wildcard, or
    /// carries a malformed `$share` prefix.
    pub fn new(filter: &str) -> Result<Self, DecodeError> {
        let match_start = Self::validate(filter)?;
        let filter = StringData::from(filter).map_err(|_e| DecodeError::InvalidTopic)?;
        Ok(Self {
            filter,
            match_start,
        })
    }

    fn validate(filter: &str) -> Result<usize, DecodeError> {
        if filter.is_empty() {
            return Err(DecodeError::InvalidTopic);
        }

        let match_start = if let Some(rest) = filter.strip_prefix(SHARE_PREFIX) {
            // A shared filter is $share/<group>/<filter>; the group name
            // must be non-empty and must not contain wildcards
            // [MQTT-4.8.2-1].
            let Some(separator) = rest.find(LEVEL_SEPARATOR) else {
                return Err(DecodeError::InvalidTopic);
            };
            let group = &rest[..separator];
            if group.is_empty() || group.contains(['#', '+']) {
                return Err(DecodeError::InvalidTopic);
            }
            if rest[separator + 1..].is_empty() {
                return Err(DecodeError::InvalidTopic);
            }
            SHARE_PREFIX.len() + separator + 1
        } else {
            0
        };

        let effective = &filter[match_start..];
        let levels: Vec<&str> = effective.split(LEVEL_SEPARATOR).collect();
        for (index, level) in levels.iter().enumerate() {
            match *level {
                MULTI_WILDCARD => {
                    // `#` must be the last level [MQTT-4.7.1-1].
                    if index != levels.len() - 1 {
                        return Err(DecodeError::InvalidTopic);
                    }
                }
                SINGLE_WILDCARD => (),
                other => {
                    // Wildcard chars may only stand alone in a level
                    // [MQTT-4.7.1-2], [MQTT-4.7.1-3].
                    if other.contains(['#', '+']) {
                        return Err(DecodeError::InvalidTopic);
                    }
                }
            }
        }
        Ok(match_start)
    }

    /// The full filter string, shared prefix included.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.filter.as_ref()
    }

    /// The portion matched against topic names, shared prefix stripped.
    #[must_use]
    pub fn effective_filter(&self) -> &str {
        &self.filter.as_ref()[self.match_start..]
    }

    /// Shared-subscription group name, if any.
    #[must_use]
    pub fn share_group(&self) -> Option<&str> {
        if self.match_start == 0 {
            None
        } else {
            let rest = &self.filter.as_ref()[SHARE_PREFIX.len()..self.match_start - 1];
            Some(rest)
        }
    }

    /// True if the effective filter contains `+` or `#`.
    #[must_use]
    pub fn has_wildcard(&self) -> bool {
        self.effective_filter()
            .split(LEVEL_SEPARATOR)
            .any(|level| level == MULTI_WILDCARD || level == SINGLE_WILDCARD)
    }

    /// True for `$share/...` filters.
    #[must_use]
    pub const fn is_shared(&self) -> bool {
        self.match_start != 0
    }

    /// Check whether `topic` matches this filter.
    ///
    /// `+` matches exactly one level, `#` matches all trailing levels
    /// including the parent. Topics starting with `$` are not matched by
    /// a wildcard in the first level [MQTT-4.7.2-1].
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        let filter = self.effective_filter();

        if topic.starts_with('$') {
            let first_level = filter.split(LEVEL_SEPARATOR).next().unwrap_or_default();
            if first_level == MULTI_WILDCARD || first_level == SINGLE_WILDCARD {
                return false;
            }
        }

        let mut filter_levels = filter.split(LEVEL_SEPARATOR);
        let mut topic_levels = topic.split(LEVEL_SEPARATOR);
        loop {
            match (filter_levels.next(), topic_levels.next()) {
                // `sport/#` also matches the parent `sport` [MQTT-4.7.1-1].
                (Some(MULTI_WILDCARD), _) => return true,
                (Some(SINGLE_WILDCARD), Some(_)) => (),
                (Some(f), Some(t)) => {
                    if f != t {
                        return false;
                    }
                }
                (None, None) => return true,
                _ => return false,
            }
        }
    }

    /// Get byte length in packet.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.filter.bytes()
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.filter)
    }
}

impl DecodePacket for TopicFilter {
    fn decode(reader: &mut ByteReader) -> Result<Self, DecodeError> {
        let inner = StringData::decode(reader)?;
        Self::new(inner.as_ref())
    }
}

impl EncodePacket for TopicFilter {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        self.filter.encode(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pub_topic_rejects_wildcards() {
        assert!(PubTopic::new("sensors/temp").is_ok());
        assert!(PubTopic::new("sensors/+").is_err());
        assert!(PubTopic::new("sensors/#").is_err());
    }

    #[test]
    fn test_filter_validation() {
        assert!(TopicFilter::new("sensors/#").is_ok());
        assert!(TopicFilter::new("#").is_ok());
        assert!(TopicFilter::new("+/tennis/+").is_ok());
        assert!(TopicFilter::new("").is_err());
        assert!(TopicFilter::new("sensors/#/more").is_err());
        assert!(TopicFilter::new("sport+").is_err());
        assert!(TopicFilter::new("sport/ten#").is_err());
    }

    #[test]
    fn test_single_level_wildcard() {
        let filter = TopicFilter::new("sport/+/player1").unwrap();
        assert!(filter.matches("sport/tennis/player1"));
        assert!(!filter.matches("sport/tennis/player2"));
        assert!(!filter.matches("sport/player1"));

        // `+` matches an empty level.
        let filter = TopicFilter::new("+/+").unwrap();
        assert!(filter.matches("/finance"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        let filter = TopicFilter::new("sport/tennis/player1/#").unwrap();
        assert!(filter.matches("sport/tennis/player1"));
        assert!(filter.matches("sport/tennis/player1/ranking"));
        assert!(filter.matches("sport/tennis/player1/score/wimbledon"));
        assert!(!filter.matches("sport/tennis/player2"));
    }

    #[test]
    fn test_dollar_topics_not_matched_by_wildcards() {
        assert!(!TopicFilter::new("#").unwrap().matches("$SYS/broker/load"));
        assert!(!TopicFilter::new("+/monitor/Clients")
            .unwrap()
            .matches("$SYS/monitor/Clients"));
        assert!(TopicFilter::new("$SYS/#").unwrap().matches("$SYS/broker"));
    }

    #[test]
    fn test_shared_subscription() {
        let filter = TopicFilter::new("$share/workers/sensors/#").unwrap();
        assert!(filter.is_shared());
        assert_eq!(filter.share_group(), Some("workers"));
        assert_eq!(filter.effective_filter(), "sensors/#");
        assert!(filter.matches("sensors/temp"));
        assert!(!filter.matches("other/temp"));

        assert!(TopicFilter::new("$share//x").is_err());
        assert!(TopicFilter::new("$share/g").is_err());
    }
}
