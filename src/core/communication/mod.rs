// Communication module - Transport facade, engines and inbound settlement
pub mod engine;
pub mod message;
pub mod receiver;
pub mod settlement;
pub mod transport;

pub use message::{DeliveryToken, Message, PropertyBag};
pub use receiver::{MessageHandler, Receiver, ReceiverState};
pub use settlement::{SettlementOutcome, TokenState};
pub use transport::{ConnectionState, HubTransport};
