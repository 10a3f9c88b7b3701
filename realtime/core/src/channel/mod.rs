//! Realtime Client Boundary
//!
//! The pool never talks to a realtime backend directly. It goes through the
//! [`RealtimeClient`] trait, which exposes the three capabilities the pool
//! needs: create a channel for a logical id, inspect a channel's subscription
//! state, and tear a channel down.
//!
//! # Implementations
//!
//! - `PhoenixClient` (feature `websocket`): Phoenix-protocol channels over WebSocket
//! - `test_utils::MockRealtimeClient` (tests only): scriptable fake

use async_trait::async_trait;
use thiserror::Error;

#[cfg(feature = "websocket")]
pub mod phoenix;

#[cfg(feature = "websocket")]
pub use phoenix::{PhoenixChannel, PhoenixClient};

/// Subscription state of a realtime channel as reported by the client
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Join in progress
    Joining,
    /// Subscribed and receiving updates
    Joined,
    /// Leave in progress
    Leaving,
    /// Closed by either side
    Closed,
    /// Server reported an error on the channel
    Errored,
}

impl ChannelState {
    /// Whether the channel is usable for live updates
    #[must_use]
    pub fn is_joined(&self) -> bool {
        matches!(self, Self::Joined)
    }

    /// Whether the channel can never become joined again
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Joining => write!(f, "joining"),
            Self::Joined => write!(f, "joined"),
            Self::Leaving => write!(f, "leaving"),
            Self::Closed => write!(f, "closed"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// Errors surfaced by a realtime client
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// Could not reach the realtime endpoint
    #[error("Failed to connect to realtime endpoint: {0}")]
    ConnectionFailed(String),

    /// The server refused the subscription
    #[error("Channel join rejected for {topic}: {reason}")]
    JoinRejected {
        /// Topic that was rejected
        topic: String,
        /// Reason reported by the server
        reason: String,
    },

    /// The operation did not complete in time
    #[error("Realtime operation timed out after {0}ms")]
    Timeout(u64),

    /// The channel's transport is gone
    #[error("Channel is closed")]
    Closed,

    /// Malformed or unexpected protocol data
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Capability the pool uses to manage realtime channels
///
/// Handles are cheap to clone; a clone refers to the same underlying channel.
#[async_trait]
pub trait RealtimeClient: Send + Sync + 'static {
    /// Handle to a subscribed channel
    type Channel: Clone + Send + Sync + 'static;

    /// Create and subscribe a channel for a logical connection id
    async fn create(&self, id: &str) -> Result<Self::Channel, ChannelError>;

    /// Report the channel's current subscription state
    async fn inspect_state(&self, channel: &Self::Channel) -> Result<ChannelState, ChannelError>;

    /// Unsubscribe and release the channel
    async fn remove(&self, channel: &Self::Channel) -> Result<(), ChannelError>;
}
