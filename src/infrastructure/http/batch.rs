//! Batch body encoding for the polling protocol.
//!
//! Each message becomes `{"body":"<base64>","properties":{...}}`. The
//! `properties` member is left out entirely when a message has none.

use base64::Engine;
use serde::Serialize;

use crate::core::communication::message::{Message, PropertyBag};
use crate::domain::error::{HubError, HubResult};

#[derive(Serialize)]
struct BatchEntry<'a> {
    body: String,
    #[serde(skip_serializing_if = "has_no_properties")]
    properties: &'a PropertyBag,
}

fn has_no_properties(properties: &&PropertyBag) -> bool {
    properties.is_empty()
}

/// Serialize messages into a JSON array batch body
pub fn encode_batch(messages: &[Message]) -> HubResult<Vec<u8>> {
    let entries: Vec<BatchEntry<'_>> = messages
        .iter()
        .map(|message| BatchEntry {
            body: base64::engine::general_purpose::STANDARD.encode(message.payload()),
            properties: message.properties(),
        })
        .collect();

    serde_json::to_vec(&entries)
        .map_err(|e| HubError::InvalidArgument(format!("Failed to encode batch: {}", e)))
}
