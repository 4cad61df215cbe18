//! Shared wire-adjacent types (GLOSSARY of the specification).
//!
//! These model the collaborators the specification declares external
//! (comms tower, channel manager) only to the extent the three state
//! machines need to read from them. None of the actual wire codec,
//! channel bookkeeping, or transport lives here.

use std::fmt;
use std::net::SocketAddr;

use bitcoin_hashes::hex::ToHex;

/// Compact public key identifying a Lightning peer (33 bytes, SEC1 compressed).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerPubkey(pub [u8; 33]);

impl PeerPubkey {
    /// Build a `PeerPubkey` from raw bytes, for tests and fixtures.
    pub fn from_byte(tag: u8) -> Self {
        let mut bytes = [0u8; 33];
        bytes[0] = 0x02;
        bytes[32] = tag;
        Self(bytes)
    }
}

impl fmt::Debug for PeerPubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerPubkey({})", self.0.to_hex())
    }
}

impl fmt::Display for PeerPubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

/// Address and public key of a remote Lightning peer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RemoteNodeInfo {
    /// The peer's node id.
    pub node_id: PeerPubkey,
    /// The peer's last known network address.
    pub address: SocketAddr,
}

/// Feature bits a peer may advertise in its `init` message.
///
/// Only the two features these state machines care about are modeled;
/// the full feature-bit-vector codec is the comms tower's concern.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct PeerFeatures {
    /// Peer supports receiving/advertising private trampoline routing.
    pub private_routing: bool,
    /// Peer supports the on-chain swap-out protocol.
    pub chain_swap: bool,
}

/// A handle to a connected peer, as surfaced by the comms tower.
///
/// Stands in for the comms tower's `Worker` handle (`info.nodeId`,
/// `nodeSpecificPair`); the actual dispatch machinery lives outside
/// this crate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Worker {
    /// Identifying info for the peer behind this worker.
    pub info: RemoteNodeInfo,
}

/// A read-only view of one channel, as exposed by the channel manager.
///
/// Mirrors §6's "Consumed from the channel manager": `availableForSend`,
/// `availableForReceive`, `remoteInfo.nodeId`, and the
/// `isOperationalAndOpen` predicate.
pub trait ChanAndCommits {
    /// Millisatoshis available to send out over this channel.
    fn available_for_send(&self) -> u64;
    /// Millisatoshis available to receive over this channel.
    fn available_for_receive(&self) -> u64;
    /// The node id of the remote party to this channel.
    fn remote_node_id(&self) -> PeerPubkey;
    /// Whether the channel is operational and open (usable for balance math).
    fn is_operational_and_open(&self) -> bool;
}

/// A simple owned implementation of [`ChanAndCommits`], used by callers
/// that keep their own channel snapshot (and throughout this crate's tests).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SimpleChannel {
    /// See [`ChanAndCommits::remote_node_id`].
    pub remote_node_id: PeerPubkey,
    /// See [`ChanAndCommits::available_for_send`].
    pub available_for_send: u64,
    /// See [`ChanAndCommits::available_for_receive`].
    pub available_for_receive: u64,
    /// See [`ChanAndCommits::is_operational_and_open`].
    pub operational_and_open: bool,
}

impl ChanAndCommits for SimpleChannel {
    fn available_for_send(&self) -> u64 {
        self.available_for_send
    }

    fn available_for_receive(&self) -> u64 {
        self.available_for_receive
    }

    fn remote_node_id(&self) -> PeerPubkey {
        self.remote_node_id
    }

    fn is_operational_and_open(&self) -> bool {
        self.operational_and_open
    }
}
