//! Virtual controller input
//!
//! Watchers stream controller snapshots; the bridge maps each `(peer, slot)`
//! onto an emulated device. Device emulation itself sits behind
//! [`InputBridge`]; [`InputBindings`] is the in-process implementation that
//! keeps the binding table and the latest state of every device.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::{info, trace};

use crate::models::PeerId;
use crate::protocol::InputFrame;
use crate::{Error, Result};

/// Controllers one watcher may bind at once.
pub const MAX_PADS_PER_PEER: u8 = 4;

/// Which of a watcher's controllers a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InputSlot {
    /// Physical gamepad, numbered from 1.
    Pad(u8),
    /// On-screen touch gamepad.
    Virtual,
}

impl InputSlot {
    /// Binding key, `<peerId>-<slot>`.
    #[must_use]
    pub fn input_id(self, peer_id: &PeerId) -> String {
        format!("{peer_id}-{self}")
    }
}

impl fmt::Display for InputSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pad(n) => write!(f, "{n}"),
            Self::Virtual => f.write_str("virtual"),
        }
    }
}

impl FromStr for InputSlot {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "virtual" {
            return Ok(Self::Virtual);
        }
        match s.parse::<u8>() {
            Ok(n) if (1..=MAX_PADS_PER_PEER).contains(&n) => Ok(Self::Pad(n)),
            _ => Err(Error::InvalidInput(format!("invalid controller slot '{s}'"))),
        }
    }
}

/// Sink for controller input, implemented by whatever drives the emulated devices.
pub trait InputBridge: Send + Sync {
    /// Push one snapshot for `peer_id`'s controller in `slot`.
    fn submit(&self, peer_id: &PeerId, slot: InputSlot, frame: &InputFrame) -> Result<()>;

    /// Unplug every controller bound to `peer_id`. Returns how many were released.
    fn release(&self, peer_id: &PeerId) -> usize;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputBinding {
    pub peer_id: PeerId,
    pub slot: InputSlot,
    pub axes: Vec<f64>,
    pub buttons: Vec<f64>,
    pub frames: u64,
    pub updated_at: DateTime<Utc>,
}

/// Binding table keyed by input id.
#[derive(Debug, Default)]
pub struct InputBindings {
    bindings: DashMap<String, InputBinding>,
}

impl InputBindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, input_id: &str) -> Option<InputBinding> {
        self.bindings.get(input_id).map(|b| b.value().clone())
    }

    #[must_use]
    pub fn bound_slots(&self, peer_id: &PeerId) -> Vec<InputSlot> {
        let mut slots: Vec<InputSlot> = self
            .bindings
            .iter()
            .filter(|entry| entry.peer_id == *peer_id)
            .map(|entry| entry.slot)
            .collect();
        slots.sort_by_key(ToString::to_string);
        slots
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl InputBridge for InputBindings {
    fn submit(&self, peer_id: &PeerId, slot: InputSlot, frame: &InputFrame) -> Result<()> {
        let input_id = slot.input_id(peer_id);
        let now = Utc::now();

        let mut binding = self.bindings.entry(input_id.clone()).or_insert_with(|| {
            info!(peer_id = %peer_id, input_id = %input_id, "Controller bound");
            InputBinding {
                peer_id: peer_id.clone(),
                slot,
                axes: Vec::new(),
                buttons: Vec::new(),
                frames: 0,
                updated_at: now,
            }
        });
        binding.axes.clone_from(&frame.axes);
        binding.buttons.clone_from(&frame.buttons);
        binding.frames += 1;
        binding.updated_at = now;
        trace!(input_id = %input_id, frames = binding.frames, "Controller frame applied");
        Ok(())
    }

    fn release(&self, peer_id: &PeerId) -> usize {
        let before = self.bindings.len();
        self.bindings.retain(|_, binding| binding.peer_id != *peer_id);
        let released = before.saturating_sub(self.bindings.len());
        if released > 0 {
            info!(peer_id = %peer_id, released, "Controllers released");
        }
        released
    }
}
