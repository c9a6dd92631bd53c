use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::domain::error::{HubError, HubResult};

/// Ordered string-to-string property bag.
///
/// Keys are unique and iteration follows insertion order, which is also
/// the order used on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyBag {
    entries: Vec<(String, String)>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a property, rejecting empty or duplicate keys
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> HubResult<()> {
        let key = key.into();
        if key.is_empty() {
            return Err(HubError::InvalidArgument("property key must not be empty".to_string()));
        }
        if self.contains_key(&key) {
            return Err(HubError::InvalidArgument(format!("duplicate property key '{}'", key)));
        }
        self.entries.push((key, value.into()));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Serialize for PropertyBag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Protocol-specific claim on one inbound message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeliveryToken {
    /// Lock token handed out by the polling protocol
    Lock(String),
    /// Receiver-local delivery tag of the persistent link
    Tag(u64),
}

impl std::fmt::Display for DeliveryToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryToken::Lock(token) => write!(f, "{}", token),
            DeliveryToken::Tag(tag) => write!(f, "tag-{}", tag),
        }
    }
}

/// Payload and properties exchanged with the hub in either direction.
///
/// Payload and properties cannot change once the message is built; inbound
/// messages additionally carry the delivery token used for settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    payload: Vec<u8>,
    properties: PropertyBag,
    delivery_token: Option<DeliveryToken>,
}

impl Message {
    /// Create an outbound message
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            properties: PropertyBag::new(),
            delivery_token: None,
        }
    }

    /// Add a property while building the message
    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> HubResult<Self> {
        self.properties.insert(key, value)?;
        Ok(self)
    }

    /// Build a message from an existing property bag
    pub fn with_properties(payload: impl Into<Vec<u8>>, properties: PropertyBag) -> Self {
        Self {
            payload: payload.into(),
            properties,
            delivery_token: None,
        }
    }

    pub(crate) fn inbound(payload: Vec<u8>, properties: PropertyBag, token: DeliveryToken) -> Self {
        Self {
            payload,
            properties,
            delivery_token: Some(token),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    pub fn delivery_token(&self) -> Option<&DeliveryToken> {
        self.delivery_token.as_ref()
    }

    /// Get payload as string (if valid UTF-8)
    pub fn data_as_string(&self) -> Option<String> {
        String::from_utf8(self.payload.clone()).ok()
    }

    /// Get payload as hex string
    pub fn data_as_hex(&self) -> String {
        self.payload
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
