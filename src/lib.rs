//! Tag Relay: captures channel forwards under routing tags and replays them
//! into subscriber channels.

pub mod bot;
pub mod capture;
pub mod channels;
pub mod config;
pub mod error;
pub mod forwarding;
pub mod store;
pub mod tagging;
