//! Test host for Swink guests.
//!
//! A guest is either the kernel booted under QEMU or a board attached over a
//! UART. The host starts it, streams its console, and turns the first
//! terminal marker (or the lack of one) into a [`RunResult`].

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod guest;
pub mod host;
pub mod markers;
pub mod result;
pub mod signal;

pub use config::HostConfig;
pub use error::HostError;
pub use guest::{GuestKind, GuestSpec};
pub use host::TestHost;
pub use result::{RunResult, RunState, RunStatus};
