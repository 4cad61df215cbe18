//! Tunables shared across the three state machines (§6 "Constants").
//!
//! Grouped the way `p2p::fsm::Config`/`Limits` group the Bitcoin
//! protocol's knobs, with the same `Default` + constructor pattern.

use crate::clock::LocalDuration;

/// Minimum acceptable on-chain feerate for a swap-out offer, in satoshis.
pub const MIN_CHAIN_FEE_SAT: u64 = 253;

/// Interval between trampoline broadcast ticks.
pub const BROADCAST_TICK: LocalDuration = LocalDuration::from_secs(10);

/// Default capacity ratio applied to channels with peers other than the
/// trampoline broadcast's target when computing `canSendOut`.
pub const DEFAULT_MAX_ROUTABLE_RATIO: f64 = 0.9;

/// How long the swap-out handler waits for a first response.
pub const FIRST_RESPONSE_TIMEOUT: LocalDuration = LocalDuration::from_secs(30);

/// How long the swap-out handler waits for further responses once one has
/// arrived.
pub const FOLLOWUP_TIMEOUT: LocalDuration = LocalDuration::from_secs(5);

/// Delay before the pool retries a failed Electrum connection.
pub const RECONNECT_DELAY: LocalDuration = LocalDuration::from_secs(5);

/// Minimum height lead a non-master client needs before it is promoted.
pub const MASTER_SWITCH_HYSTERESIS: u64 = 2;

/// Pool-specific configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of concurrent Electrum connections to maintain.
    pub max_chain_connections_count: usize,
    /// Whether `.onion` addresses are eligible for selection.
    pub use_onion: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_chain_connections_count: 4,
            use_onion: false,
        }
    }
}

impl PoolConfig {
    /// Build a config overriding just the connection cap.
    pub fn with_max_connections(max_chain_connections_count: usize) -> Self {
        Self {
            max_chain_connections_count,
            ..Self::default()
        }
    }
}
