//! Telepuppet: Telegram account puppeting for chat bridges.
//!
//! Drives one remote account per [`puppet::Puppet`]: multi-step sign-in,
//! write-through credential storage, a single lazily built protocol
//! connection, and normalization of pushed updates into canonical events
//! for the bridging layer.
//!
//! See `DESIGN.md` for architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod credentials;
pub mod logging;
pub mod puppet;
