use thiserror::Error;

use crate::domain::response::HttpResponse;

/// HubLink unified error type
#[derive(Error, Debug)]
pub enum HubError {
    #[error("Configuration error: missing required field(s): {}", missing.join(", "))]
    Configuration { missing: Vec<String> },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Config file error: {message}")]
    Config { message: String },

    #[error("Output error: {0}")]
    Output(String),
}

/// Failure to establish or keep the underlying link.
///
/// Cloneable so that every caller waiting on the same in-flight connect
/// observes the same outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("link failure: {0}")]
    Link(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("hub responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("connection attempt timed out")]
    Timeout,
}

/// Outbound send failure.
#[derive(Error, Debug, Clone)]
pub enum DeliveryError {
    /// The hub answered with a status at or above 300.
    #[error("hub rejected the event with status {}", response.status)]
    Rejected { response: HttpResponse },

    #[error("link write failed: {0}")]
    Link(String),

    #[error("request failed: {0}")]
    Request(String),
}

/// Settlement (complete / reject / abandon) failure.
#[derive(Error, Debug, Clone)]
pub enum SettlementError {
    #[error("delivery token '{token}' is already settled")]
    AlreadySettled { token: String },

    #[error("delivery token '{token}' is unknown to this receiver")]
    UnknownToken { token: String },

    #[error("receiver is closed")]
    ReceiverClosed,

    #[error("message carries no delivery token")]
    MissingToken,

    #[error("hub rejected the settlement with status {}", response.status)]
    Rejected { response: HttpResponse },

    #[error("settlement request failed: {0}")]
    Request(String),
}

pub type HubResult<T> = Result<T, HubError>;

impl HubError {
    /// Build a configuration error from the names of the missing fields.
    pub fn missing_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Configuration {
            missing: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// True when the error is `Settlement(AlreadySettled)`.
    pub fn is_already_settled(&self) -> bool {
        matches!(self, Self::Settlement(SettlementError::AlreadySettled { .. }))
    }
}
