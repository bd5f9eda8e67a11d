//! Coinbase Feed Adapter
//!
//! WebSocket client for the Coinbase Exchange `ticker` channel:
//!
//! - `codec`: frame → `TickMessage` decoding and validation
//! - `messages`: wire types, subscribe request, acknowledgment sniffing
//! - `reconnect`: exponential backoff between connection attempts
//! - `session`: connection lifecycle driving the enrichment pipeline

pub mod codec;
pub mod messages;
pub mod reconnect;
pub mod session;

pub use codec::{DecodeError, TickerCodec};
pub use messages::{COINBASE_FEED_URL, SubscriptionRequest, TickerPayload, is_subscription_ack};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use session::{
    SessionConfig, SessionError, SessionManager, SessionSnapshot, SessionState, TransportEvent,
};
