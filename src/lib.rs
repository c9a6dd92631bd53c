//! HubLink Library
//!
//! Device-side messaging client for a cloud telemetry hub: one transport
//! facade over an HTTPS polling engine or a persistent MQTT link, with
//! inbound message settlement.

pub mod cli;
pub mod core;
pub mod domain;
pub mod infrastructure;

pub use crate::core::communication::{
    ConnectionState, DeliveryToken, HubTransport, Message, MessageHandler, PropertyBag, Receiver,
    ReceiverState, SettlementOutcome,
};
pub use crate::domain::config::{
    ConnectionConfig, DeviceProfile, GlobalConfig, HubConfig, ProtocolKind, QualityOfService,
};
pub use crate::domain::error::{
    ConnectionError, DeliveryError, HubError, HubResult, SettlementError,
};
pub use crate::infrastructure::http::{
    HttpExecutor, HttpMethod, HttpRequest, HttpResponse, PollingSettings, RequestFailure,
};
pub use crate::infrastructure::mqtt::{
    LinkConnector, LinkError, LinkEvent, LinkOptions, LinkSession, LinkSettings,
};
