// Reference-counted WebSocket channels with reconnect and backoff.

pub mod manager;
pub mod transport;

pub use manager::{ChannelEvent, ConnectionManager, ConnectionState, Subscription};
pub use transport::{Connector, FrameStream, MemoryConnector, TransportError, TungsteniteConnector};
