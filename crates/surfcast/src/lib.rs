//! Surfcast host application
//!
//! Stands in for a renderer: it starts the ingest client, polls the particle
//! store once per frame without ever waiting on the network, and reports the
//! heads-up status lines a renderer would draw.

pub mod cli;
pub mod consumer;
pub mod settings;
pub mod status;
pub mod test_server;

pub use consumer::{ConsumerOptions, ConsumerReport, StopReason};
pub use settings::{Settings, SettingsError};
