//! Stream Transport Adapter
//!
//! WebSocket implementation of the transport collaborator: JSON wire
//! frames, the codec, the connection client with reconnect backoff, and the
//! outbound handle implementing the [`Transport`](crate::application::ports::Transport)
//! port.

pub mod client;
pub mod codec;
pub mod messages;
pub mod reconnect;

pub use client::{StreamClient, StreamClientConfig, StreamClientError, StreamEvent, StreamHandle};
pub use codec::{CodecError, JsonCodec};
pub use messages::{ClientFrame, ServerFrame};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
