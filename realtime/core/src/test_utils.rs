//! Test Utilities
//!
//! Scriptable in-memory [`RealtimeClient`] for unit tests. Clones share state,
//! so a test can keep one clone to drive failures and inspect call history
//! while the pool owns another.
//!
//! # Usage
//!
//! ```ignore
//! let client = MockRealtimeClient::new();
//! let pool = ConnectionPool::new(client.clone(), PoolConfig::for_testing());
//!
//! client.fail_creates_for("visit-1");
//! assert!(pool.get_connection("visit-1").await.is_none());
//! assert_eq!(client.create_count("visit-1"), 1);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::channel::{ChannelError, ChannelState, RealtimeClient};

/// Handle produced by [`MockRealtimeClient`]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MockChannel {
    /// Connection id it was created for
    pub id: String,
    /// Unique per created channel
    pub serial: u64,
}

#[derive(Debug, Default)]
struct MockState {
    next_serial: u64,
    creates: HashMap<String, usize>,
    failing_ids: HashSet<String>,
    fail_all_creates: bool,
    fail_inspects: bool,
    fail_removes: bool,
    states: HashMap<u64, ChannelState>,
    removed: HashSet<u64>,
    remove_calls: usize,
    inspect_calls: usize,
    create_delay: Duration,
    create_delays: HashMap<String, Duration>,
    inspect_delay: Duration,
}

/// In-memory realtime client with scripted failures
#[derive(Clone, Debug, Default)]
pub struct MockRealtimeClient {
    state: Arc<Mutex<MockState>>,
}

impl MockRealtimeClient {
    /// Client where every operation succeeds
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make creations for `id` fail
    pub fn fail_creates_for(&self, id: &str) {
        self.state.lock().failing_ids.insert(id.to_string());
    }

    /// Make every creation fail (or stop doing so)
    pub fn fail_all_creates(&self, fail: bool) {
        self.state.lock().fail_all_creates = fail;
    }

    /// Clear all scripted creation failures
    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failing_ids.clear();
        state.fail_all_creates = false;
    }

    /// Make state inspection return an error
    pub fn fail_inspects(&self, fail: bool) {
        self.state.lock().fail_inspects = fail;
    }

    /// Make teardown return an error
    pub fn fail_removes(&self, fail: bool) {
        self.state.lock().fail_removes = fail;
    }

    /// Delay each creation by `delay`
    pub fn set_create_delay(&self, delay: Duration) {
        self.state.lock().create_delay = delay;
    }

    /// Delay creations for `id` by `delay`, overriding the shared delay
    pub fn set_create_delay_for(&self, id: &str, delay: Duration) {
        self.state.lock().create_delays.insert(id.to_string(), delay);
    }

    /// Delay each inspection by `delay`
    pub fn set_inspect_delay(&self, delay: Duration) {
        self.state.lock().inspect_delay = delay;
    }

    /// Force the state reported for `channel`
    pub fn set_state(&self, channel: &MockChannel, state: ChannelState) {
        self.state.lock().states.insert(channel.serial, state);
    }

    /// Creation attempts for `id`, failed ones included
    #[must_use]
    pub fn create_count(&self, id: &str) -> usize {
        self.state.lock().creates.get(id).copied().unwrap_or(0)
    }

    /// Creation attempts across all ids
    #[must_use]
    pub fn total_creates(&self) -> usize {
        self.state.lock().creates.values().sum()
    }

    /// Teardown calls
    #[must_use]
    pub fn remove_count(&self) -> usize {
        self.state.lock().remove_calls
    }

    /// State inspection calls
    #[must_use]
    pub fn inspect_count(&self) -> usize {
        self.state.lock().inspect_calls
    }

    /// Whether `channel` has been torn down
    #[must_use]
    pub fn was_removed(&self, channel: &MockChannel) -> bool {
        self.state.lock().removed.contains(&channel.serial)
    }
}

#[async_trait]
impl RealtimeClient for MockRealtimeClient {
    type Channel = MockChannel;

    async fn create(&self, id: &str) -> Result<MockChannel, ChannelError> {
        let delay = {
            let mut state = self.state.lock();
            *state.creates.entry(id.to_string()).or_insert(0) += 1;
            state
                .create_delays
                .get(id)
                .copied()
                .unwrap_or(state.create_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.fail_all_creates || state.failing_ids.contains(id) {
            return Err(ChannelError::JoinRejected {
                topic: format!("realtime:{id}"),
                reason: "mock failure".to_string(),
            });
        }

        state.next_serial += 1;
        let channel = MockChannel {
            id: id.to_string(),
            serial: state.next_serial,
        };
        state.states.insert(channel.serial, ChannelState::Joined);
        Ok(channel)
    }

    async fn inspect_state(&self, channel: &MockChannel) -> Result<ChannelState, ChannelError> {
        let delay = {
            let mut state = self.state.lock();
            state.inspect_calls += 1;
            state.inspect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock();
        if state.fail_inspects {
            return Err(ChannelError::Protocol("mock inspect failure".to_string()));
        }
        if state.removed.contains(&channel.serial) {
            return Ok(ChannelState::Closed);
        }
        Ok(state
            .states
            .get(&channel.serial)
            .copied()
            .unwrap_or(ChannelState::Joined))
    }

    async fn remove(&self, channel: &MockChannel) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        state.remove_calls += 1;
        state.removed.insert(channel.serial);
        state.states.insert(channel.serial, ChannelState::Closed);
        if state.fail_removes {
            return Err(ChannelError::Closed);
        }
        Ok(())
    }
}
