//! Deep-sleep environmental sensor node.
//!
//! Every wake is a cold start. The only state that crosses a power-down is
//! the retained-memory buffer ([`retained`]) and the configuration record
//! ([`config`]). [`boot::BootOrchestrator`] runs one cycle and tells the
//! caller whether to sleep or restart.
//!
//! Everything except [`hardware`] and [`network`] is hardware-independent and
//! talks to the board through the traits in [`traits`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod batch;
pub mod boot;
pub mod config;
pub mod constants;
pub mod error;
pub mod feedback;
pub mod model;
pub mod provisioning;
pub mod retained;
pub mod traits;
pub mod transport;

#[cfg(feature = "firmware")]
pub mod hardware;
#[cfg(feature = "firmware")]
pub mod network;

#[cfg(test)]
mod testing;
