//! # Channel State
//!
//! The 16 control values shared between callers and the send loop.
//! Writers replace the whole set; readers copy the whole set out. A reader
//! therefore always sees a complete set that some writer stored.

use std::sync::{Arc, RwLock};

use crate::crsf::protocol::{RcChannels, CRSF_CHANNEL_VALUE_CENTER, CRSF_NUM_CHANNELS};

/// Channel indices for semantic access.
pub mod channels {
    pub const ROLL: usize = 0;
    pub const PITCH: usize = 1;
    pub const THROTTLE: usize = 2;
    pub const YAW: usize = 3;
    /// AUX1, conventionally the arm switch
    pub const ARM: usize = 4;
}

/// AUX1 value that arms
pub const ARM_VALUE: u16 = 1984;

/// AUX1 value that disarms
pub const DISARM_VALUE: u16 = 0;

/// All sticks centered, AUX switches mid
pub const CENTERED_CHANNELS: RcChannels = [CRSF_CHANNEL_VALUE_CENTER; CRSF_NUM_CHANNELS];

/// Neutral sticks, throttle low and disarmed
pub const FAILSAFE_CHANNELS: RcChannels = {
    let mut set = CENTERED_CHANNELS;
    set[channels::THROTTLE] = 0;
    set[channels::ARM] = DISARM_VALUE;
    set
};

/// Thread-safe, cheaply cloneable handle to the current channel set
#[derive(Debug, Clone)]
pub struct ChannelState {
    inner: Arc<RwLock<RcChannels>>,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self::new(CENTERED_CHANNELS)
    }
}

impl ChannelState {
    pub fn new(initial: RcChannels) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    /// Replace the whole set. Values are stored as given, without clamping.
    pub fn update(&self, channels: RcChannels) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = channels;
    }

    /// Snapshot of the current set
    pub fn get(&self) -> RcChannels {
        *self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Read-modify-write of a single channel. Out-of-range indices are ignored.
    ///
    /// Concurrent writers may overwrite each other's change, but every
    /// stored set is still complete.
    pub fn set(&self, index: usize, value: u16) {
        if index >= CRSF_NUM_CHANNELS {
            return;
        }
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        guard[index] = value;
    }
}
