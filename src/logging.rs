//! Logging setup.
//!
//! The three state machines log through the `log` facade only
//! (`log::{trace,debug,info,warn}`), the same as `nakamoto-node::run`
//! and `p2p::fsm`'s managers. This module wires that facade to
//! `env_logger`, standing in for the wallet binary's own `logger`
//! module (declared but not part of the retrieved source).

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize the global logger, honoring `RUST_LOG` if set.
///
/// Safe to call more than once; only the first call takes effect.
pub fn init() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or("info"),
        )
        .try_init();
    });
}
