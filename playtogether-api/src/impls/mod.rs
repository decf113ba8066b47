// Session driver and the media-engine seam it runs against

pub mod driver;
pub mod engine;

pub use driver::{spawn, DashboardView, DriverEvent, SessionDriver, SessionHandle};
pub use engine::RelayedEngine;
