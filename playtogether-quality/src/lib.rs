//! Adaptive quality control for outbound peer streams
//!
//! Once per tick the controller reads each active peer's transport
//! statistics, steps its encoder bitrate down on congestion or up otherwise,
//! and moves its resolution along a fixed downscale ladder. A viewer may pin a
//! fixed profile instead, which takes the peer out of the loop until it
//! selects `auto` again.
//!
//! The media engine is reached through [`StatsReader`] and [`EncoderControl`].

pub mod aggregator;
pub mod config;
pub mod controller;
pub mod engine;
pub mod stats;

pub use aggregator::StatsAggregator;
pub use config::ControllerConfig;
pub use controller::{QualityController, ResolutionLadder, TickReport};
pub use engine::{EncoderControl, EngineError, StatsReader};
pub use stats::{fraction_lost_to_percent, NetworkSample};
