//! CancerDetect daemon
//!
//! Simulated diagnosis scoring and model training behind a local IPC socket.
//! Neither simulator inspects image content: scores and training progress are
//! drawn from an injected random source and advanced on a fixed tick.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod intake;
pub mod notifier;
pub mod progress;
pub mod protocol;
pub mod scorer;
pub mod service;
pub mod socket;
pub mod stats;
