//! Per-device topic names and the property suffix the hub appends to them.

use tracing::warn;

use crate::core::communication::message::PropertyBag;

pub fn event_topic(device_id: &str) -> String {
    format!("devices/{}/messages/events", device_id)
}

pub fn devicebound_topic(device_id: &str) -> String {
    format!("devices/{}/messages/devicebound", device_id)
}

/// Publish topic for a message; properties ride as a `k=v&k=v` suffix
pub fn publish_topic(base: &str, properties: &PropertyBag) -> String {
    if properties.is_empty() {
        return base.to_string();
    }

    let suffix = properties
        .iter()
        .map(|(key, value)| format!("{}={}", encode(key), encode(value)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}/{}", base, suffix)
}

/// Match an inbound topic against the subscribed one.
///
/// Returns the decoded properties, or `None` when the topic is unrelated.
pub fn match_inbound(subscribed: &str, topic: &str) -> Option<PropertyBag> {
    let rest = topic.strip_prefix(subscribed)?;
    let mut properties = PropertyBag::new();

    if rest.is_empty() {
        return Some(properties);
    }
    let suffix = rest.strip_prefix('/')?;

    for pair in suffix.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode(key);
        if let Err(e) = properties.insert(key.clone(), decode(value)) {
            warn!("Skipping inbound property '{}': {}", key, e);
        }
    }
    Some(properties)
}

fn encode(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

fn decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let escaped = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(byte) = escaped {
                decoded.push(byte);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&decoded).into_owned()
}
