//! Three sans-io state machines coordinating a Lightning node's peer-facing
//! behaviour: trampoline routing advertisement, Electrum master election,
//! and on-chain swap-out feerate discovery.
//!
//! Each machine is a plain struct driven by `process(&mut self, input)` and
//! drained as an `Iterator<Item = Io>`, following the manager pattern used
//! throughout this crate's `p2p` counterpart. None of the three hold
//! references to each other or to the comms tower/channel manager/event bus;
//! those are passed in as capability handles (a [`trampoline::ChannelSource`]
//! implementation, a [`clock::Clock`] implementation, and so on) by the
//! caller that owns the reactor loop.

pub mod clock;
pub mod config;
pub mod electrum;
pub mod error;
pub mod logging;
pub mod outbox;
pub mod swapout;
pub mod trampoline;
pub mod types;
