//! Envelope codec (spec §4.1): the fixed header fields carried in broker
//! message properties, plus the publish-side option surface (spec §6.3).

use std::collections::HashMap;

use rq_common::Clock;
use thiserror::Error;
use uuid::Uuid;

use crate::delivery::{DeliveryProperties, HEADER_EXPIRES_AT, HEADER_FLAGS, HEADER_FORMAT_VERSION};

/// Current envelope format version (spec §3.1).
pub const FORMAT_VERSION: u32 = 1;

/// Bit 0 of `flags`: the publisher sent this message to two brokers.
pub const FLAG_REDUNDANT: u32 = 1 << 0;

/// Default time-to-live applied when the caller doesn't specify one: one day.
pub const DEFAULT_TTL_SECONDS: i64 = 24 * 60 * 60;

/// The decoded envelope fields (spec §3.1), independent of payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub message_id: String,
    pub format_version: u32,
    pub flags: u32,
    pub expires_at: i64,
}

impl Envelope {
    pub fn redundant(&self) -> bool {
        self.flags & FLAG_REDUNDANT != 0
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("missing header {0}")]
    MissingHeader(&'static str),
    #[error("header {0} is not a valid integer: {1}")]
    InvalidInteger(&'static str, String),
}

/// Decode envelope fields out of broker-level delivery properties.
///
/// Best-effort per spec §4.1: callers that need the "construct anyway, stash
/// the error" behavior should use `MessageState::from_delivery`, which wraps
/// this and never propagates the error itself.
pub fn decode(properties: &DeliveryProperties) -> Result<Envelope, EnvelopeError> {
    let format_version = read_int(properties, HEADER_FORMAT_VERSION)? as u32;
    let flags = read_int(properties, HEADER_FLAGS)? as u32;
    let expires_at = read_int(properties, HEADER_EXPIRES_AT)?;

    Ok(Envelope {
        message_id: properties.message_id.clone(),
        format_version,
        flags,
        expires_at,
    })
}

fn read_int(properties: &DeliveryProperties, header: &'static str) -> Result<i64, EnvelopeError> {
    let raw = properties
        .headers
        .get(header)
        .ok_or(EnvelopeError::MissingHeader(header))?;
    raw.parse::<i64>()
        .map_err(|_| EnvelopeError::InvalidInteger(header, raw.clone()))
}

/// Loose option values accepted by [`publishing_options`], mirroring the
/// untyped option bag callers pass at the publish call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
    Str(String),
    U64(u64),
}

/// Recognized publish-time option keys (spec §6.3). Any other key in the
/// caller's map is silently dropped.
const RECOGNIZED_KEYS: &[&str] = &[
    "key",
    "mandatory",
    "immediate",
    "persistent",
    "reply_to",
    "redundant",
    "ttl",
];

/// A ready-to-send publish descriptor: broker flags plus the encoded
/// message properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishDescriptor {
    pub routing_key: Option<String>,
    pub mandatory: bool,
    pub immediate: bool,
    pub persistent: bool,
    pub reply_to: Option<String>,
    pub properties: DeliveryProperties,
}

/// Build a [`PublishDescriptor`] from a loose option map (spec §4.1, §6.3).
///
/// Generates a fresh UUID message id on every call — publishing the same
/// logical payload `redundant: true` twice yields two distinct message ids,
/// by design; the caller (not this function) is responsible for reusing one
/// `message_id` across the two broker publishes that make up one redundant
/// logical message.
pub fn publishing_options(opts: &HashMap<String, OptionValue>, clock: &dyn Clock) -> PublishDescriptor {
    let redundant = matches!(opts.get("redundant"), Some(OptionValue::Bool(true)));
    let ttl = match opts.get("ttl") {
        Some(OptionValue::U64(v)) => *v as i64,
        _ => DEFAULT_TTL_SECONDS,
    };

    let flags = if redundant { FLAG_REDUNDANT } else { 0 };
    let expires_at = clock.now() + ttl;

    let mut headers = HashMap::new();
    headers.insert(HEADER_FORMAT_VERSION.to_string(), FORMAT_VERSION.to_string());
    headers.insert(HEADER_FLAGS.to_string(), flags.to_string());
    headers.insert(HEADER_EXPIRES_AT.to_string(), expires_at.to_string());

    let properties = DeliveryProperties {
        message_id: Uuid::new_v4().to_string(),
        headers,
    };

    PublishDescriptor {
        routing_key: str_opt(opts, "key"),
        mandatory: bool_opt(opts, "mandatory"),
        immediate: bool_opt(opts, "immediate"),
        persistent: bool_opt(opts, "persistent"),
        reply_to: str_opt(opts, "reply_to"),
        properties,
    }
}

fn str_opt(opts: &HashMap<String, OptionValue>, key: &str) -> Option<String> {
    match opts.get(key) {
        Some(OptionValue::Str(s)) => Some(s.clone()),
        _ => None,
    }
}

fn bool_opt(opts: &HashMap<String, OptionValue>, key: &str) -> bool {
    matches!(opts.get(key), Some(OptionValue::Bool(true)))
}

/// Returns true iff `key` is one this module understands; exposed so callers
/// building their own option maps can validate up front instead of silently
/// losing a typo'd key.
pub fn is_recognized_option(key: &str) -> bool {
    RECOGNIZED_KEYS.contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rq_common::FixedClock;

    fn props(message_id: &str, format_version: &str, flags: &str, expires_at: &str) -> DeliveryProperties {
        let mut headers = HashMap::new();
        headers.insert(HEADER_FORMAT_VERSION.to_string(), format_version.to_string());
        headers.insert(HEADER_FLAGS.to_string(), flags.to_string());
        headers.insert(HEADER_EXPIRES_AT.to_string(), expires_at.to_string());
        DeliveryProperties {
            message_id: message_id.to_string(),
            headers,
        }
    }

    #[test]
    fn decode_round_trips_encode() {
        let clock = FixedClock::new(1_000);
        let mut opts = HashMap::new();
        opts.insert("redundant".to_string(), OptionValue::Bool(true));
        opts.insert("key".to_string(), OptionValue::Str("orders".to_string()));
        opts.insert("ttl".to_string(), OptionValue::U64(60));

        let descriptor = publishing_options(&opts, &clock);
        let envelope = decode(&descriptor.properties).unwrap();

        assert_eq!(envelope.message_id, descriptor.properties.message_id);
        assert!(envelope.redundant());
        assert_eq!(envelope.expires_at, 1_060);
        assert_eq!(descriptor.routing_key.as_deref(), Some("orders"));
    }

    #[test]
    fn unknown_option_key_is_silently_dropped() {
        let clock = FixedClock::new(0);
        let mut with_unknown = HashMap::new();
        with_unknown.insert("key".to_string(), OptionValue::Str("q".to_string()));
        with_unknown.insert("bogus".to_string(), OptionValue::Str("whatever".to_string()));

        let mut without_unknown = HashMap::new();
        without_unknown.insert("key".to_string(), OptionValue::Str("q".to_string()));

        let a = publishing_options(&with_unknown, &clock);
        let b = publishing_options(&without_unknown, &clock);

        assert_eq!(a.routing_key, b.routing_key);
        assert_eq!(a.mandatory, b.mandatory);
        assert_eq!(a.reply_to, b.reply_to);
    }

    #[test]
    fn redundant_encoded_twice_yields_different_message_ids() {
        let clock = FixedClock::new(0);
        let mut opts = HashMap::new();
        opts.insert("redundant".to_string(), OptionValue::Bool(true));

        let first = publishing_options(&opts, &clock);
        let second = publishing_options(&opts, &clock);

        assert_ne!(first.properties.message_id, second.properties.message_id);
    }

    #[test]
    fn default_ttl_is_one_day() {
        let clock = FixedClock::new(0);
        let descriptor = publishing_options(&HashMap::new(), &clock);
        let envelope = decode(&descriptor.properties).unwrap();
        assert_eq!(envelope.expires_at, DEFAULT_TTL_SECONDS);
        assert!(!envelope.redundant());
    }

    #[test]
    fn decode_is_best_effort_and_reports_missing_header() {
        let mut headers = HashMap::new();
        headers.insert(HEADER_FORMAT_VERSION.to_string(), "1".to_string());
        let properties = DeliveryProperties {
            message_id: "abc".to_string(),
            headers,
        };

        let err = decode(&properties).unwrap_err();
        assert_eq!(err, EnvelopeError::MissingHeader(HEADER_FLAGS));
    }

    #[test]
    fn decode_reports_invalid_integer() {
        let properties = props("abc", "not-a-number", "0", "100");
        let err = decode(&properties).unwrap_err();
        assert!(matches!(err, EnvelopeError::InvalidInteger(HEADER_FORMAT_VERSION, _)));
    }

    #[test]
    fn ttl_zero_expires_strictly_after_the_instant_it_was_set() {
        // `now > expires_at` is the strict rule from §4.3; an observation at
        // exactly `expires_at` is not yet ancient, the very next second is.
        let clock = FixedClock::new(1_000);
        let mut opts = HashMap::new();
        opts.insert("ttl".to_string(), OptionValue::U64(0));
        let descriptor = publishing_options(&opts, &clock);
        let envelope = decode(&descriptor.properties).unwrap();

        assert!(!envelope.is_expired(1_000));
        assert!(envelope.is_expired(1_001));
    }
}
