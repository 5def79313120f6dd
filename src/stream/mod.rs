pub mod dispatcher;
pub mod manager;
pub mod sse;
pub mod transport;

pub use dispatcher::{DispatchOutcome, EventDispatcher, EventHandler, SubscriptionId};
pub use manager::{ConnectionState, StreamConnectionManager, StreamStatus};
pub use sse::{RawFrame, SseDecoder};
pub use transport::{
    transport_for_url, EventStream, SseTransport, StreamTransport, WebSocketTransport,
};
