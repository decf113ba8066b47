pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod protocol;
pub mod sdp;
pub mod service;

pub use config::Config;
pub use error::{Error, Result};
