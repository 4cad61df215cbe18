//! Error types for the pool subsystem.
//!
//! The broadcaster and swap-out handler never surface errors across
//! their boundary (§7: "Errors never propagate across FSM boundaries") —
//! only the pool has user-visible failure modes (operations attempted
//! before a connection exists, a corrupt server-list resource, an
//! unrecognized chain hash).

use thiserror::Error;

/// Failure constructing an [`crate::electrum::ElectrumClientPool`].
#[derive(Error, Debug)]
pub enum PoolConstructError {
    /// The supplied chain hash does not match any known network.
    #[error("unrecognized chain hash: {0}")]
    UnknownChainHash(String),
    /// The embedded server-list resource for this chain failed to parse.
    #[error("failed to parse server list: {0}")]
    ServerList(#[from] ServerListError),
}

/// Failure parsing a `servers_<chain>.json` resource.
#[derive(Error, Debug)]
pub enum ServerListError {
    /// The resource was not valid JSON, or did not match the expected shape.
    #[error("malformed server list resource: {0}")]
    Parse(String),
}

/// Failure performing an operation against the pool.
#[derive(Error, Debug)]
pub enum RequestError {
    /// The pool has no elected master client yet.
    #[error("not connected")]
    NotConnected,
}
