//! Cursor-based forwarding of tagged messages into subscriber channels.

pub mod engine;
pub mod transport;

pub use engine::{CycleReport, EngineConfig, ForwardingEngine, spawn_forward_ticker};
pub use transport::{ChannelInfo, Content, GroupMedia, Transport};
