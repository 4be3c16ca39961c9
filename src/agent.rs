//! The bridge agent: per-conversation turn processing.

pub mod channel;

pub use channel::ChannelRunner;
