//! Session orchestration
//!
//! All state lives in one [`SessionRegistry`] owned by a single event loop.
//! Handlers are synchronous and answer with an [`Outbox`] of frames for the
//! transport layer to deliver.

pub mod admission;
pub mod bridge;
pub mod health;
pub mod outbox;
pub mod registry;
pub mod relay;
pub mod session;

pub use admission::AdmissionController;
pub use bridge::{InputBinding, InputBindings, InputBridge, InputSlot};
pub use health::HealthMonitor;
pub use outbox::{Envelope, Outbox, Recipient};
pub use registry::{SessionRegistry, SessionSnapshot};
pub use relay::SignalingRelay;
pub use session::{EndpointRole, SessionCore};
