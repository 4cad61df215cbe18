//! Trampoline routing capability broadcaster (§4.1).
//!
//! Recomputes, once per tick, how much this node is willing to route for
//! each currently-connected private-routing peer, and sends only the
//! peers whose advertisement actually changed. Modeled as a `BloomManager`-
//! style struct: a plain state + data pair mutated by `process`, with all
//! outbound effects collected in an [`Outbox`] rather than performed inline.

use std::collections::HashMap;

use crate::config::{BROADCAST_TICK, DEFAULT_MAX_ROUTABLE_RATIO};
use crate::outbox::Outbox;
use crate::types::{ChanAndCommits, PeerFeatures, PeerPubkey, RemoteNodeInfo, Worker};

/// Fee/CLTV template for a trampoline routing advertisement, with the
/// `maxMsat` field recomputed on every tick from live channel balances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrampolineOn {
    /// Base fee charged for routing through this node, in millisatoshis.
    pub fee_base_msat: u64,
    /// Proportional fee, in millionths.
    pub fee_proportional_millionths: u32,
    /// CLTV expiry delta required by this node.
    pub cltv_expiry_delta: u16,
    /// Minimum advertised routable amount.
    pub min_msat: u64,
    /// Maximum advertised routable amount (recomputed per peer per tick).
    pub max_msat: u64,
}

/// What we last told (or would tell) a given peer about our trampoline
/// routing capability toward them.
#[derive(Debug, Clone, PartialEq)]
pub enum TrampolineStatus {
    /// We have nothing worth advertising to this peer.
    TrampolineUndesired,
    /// The first non-undesired advertisement sent to this peer.
    TrampolineStatusInit {
        /// Always empty: reserved for a future batched-update wire format.
        updates: Vec<TrampolineOn>,
        /// The advertised capability.
        status: TrampolineOn,
    },
    /// A refresh of a previously-sent advertisement.
    TrampolineStatusUpdate {
        /// Always empty: reserved for a future batched-update wire format.
        removed: Vec<PeerPubkey>,
        /// Always empty: reserved for a future batched-update wire format.
        changed: HashMap<PeerPubkey, TrampolineOn>,
        /// The refreshed capability, or `None` if it is being withdrawn.
        status: Option<TrampolineOn>,
    },
}

/// The last (or pending) advertisement sent to one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct LastBroadcast {
    /// The advertisement last sent (or computed) for this peer.
    pub last: TrampolineStatus,
    /// The peer this advertisement is for.
    pub info: RemoteNodeInfo,
    /// Fraction of non-peer outbound capacity counted toward `canSendOut`.
    pub max_routable_ratio: f64,
}

impl LastBroadcast {
    /// Seed a fresh, not-yet-advertised entry for a peer.
    pub fn seed(info: RemoteNodeInfo) -> Self {
        Self {
            last: TrampolineStatus::TrampolineUndesired,
            info,
            max_routable_ratio: DEFAULT_MAX_ROUTABLE_RATIO,
        }
    }

    /// Recompute this peer's advertisement from the current usable channel
    /// set and the active routing template (§4.1 "Recomputation").
    pub fn updated<C: ChanAndCommits>(&self, usable_chans: &[C], params: &TrampolineOn) -> Self {
        let peer = self.info.node_id;

        let can_receive_from_peer: u64 = usable_chans
            .iter()
            .filter(|c| c.is_operational_and_open() && c.remote_node_id() == peer)
            .map(|c| c.available_for_receive())
            .sum();

        let can_send_out: f64 = usable_chans
            .iter()
            .filter(|c| c.is_operational_and_open() && c.remote_node_id() != peer)
            .map(|c| c.available_for_send() as f64 * self.max_routable_ratio)
            .sum();

        let status = TrampolineOn {
            max_msat: (can_send_out as u64).min(can_receive_from_peer),
            ..*params
        };

        let last = if status.min_msat > status.max_msat {
            TrampolineStatus::TrampolineUndesired
        } else if matches!(self.last, TrampolineStatus::TrampolineUndesired) {
            TrampolineStatus::TrampolineStatusInit {
                updates: Vec::new(),
                status,
            }
        } else {
            TrampolineStatus::TrampolineStatusUpdate {
                removed: Vec::new(),
                changed: HashMap::new(),
                status: Some(status),
            }
        };

        Self {
            last,
            info: self.info,
            max_routable_ratio: self.max_routable_ratio,
        }
    }
}

/// Whether the user currently has routing turned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BroadcasterState {
    RoutingDisabled,
    RoutingEnabled,
}

/// The data half of the (state, data) pair (§9 "State + data pair").
#[derive(Debug, Clone, PartialEq)]
enum BroadcastStatus {
    RoutingOff,
    RoutingOn(TrampolineOn),
}

/// Asynchronous input accepted by [`TrampolineBroadcaster::process`].
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// The periodic 10s tick.
    CmdBroadcast,
    /// The user enabled or reconfigured routing.
    RoutingOn(TrampolineOn),
    /// The user disabled routing.
    RoutingOff,
    /// Internally produced when a peer becomes operational.
    SeedBroadcast(LastBroadcast),
}

/// Effects emitted by the broadcaster, to be carried out by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Io {
    /// Send a trampoline status message to one peer.
    Send(RemoteNodeInfo, TrampolineStatus),
    /// (Re-)arm the periodic broadcast timer.
    SetTimer,
    /// Cancel the periodic broadcast timer.
    CancelTimer,
}

/// A read-only source of this node's currently usable channels
/// (§6 "Consumed from the channel manager").
pub trait ChannelSource {
    /// Concrete channel-view type returned by this source.
    type Channel: ChanAndCommits;

    /// Snapshot of all operational, open channels.
    fn usable_channels(&self) -> Vec<Self::Channel>;
}

/// Periodically recomputes and broadcasts per-peer trampoline routing
/// advertisements, sending only deltas (§4.1).
#[derive(Debug)]
pub struct TrampolineBroadcaster<S: ChannelSource> {
    state: BroadcasterState,
    status: BroadcastStatus,
    broadcasters: HashMap<PeerPubkey, LastBroadcast>,
    channels: S,
    outbox: Outbox<Io>,
}

impl<S: ChannelSource> TrampolineBroadcaster<S> {
    /// Create a new broadcaster, initially with routing disabled.
    pub fn new(channels: S) -> Self {
        let mut outbox = Outbox::default();
        outbox.push(Io::SetTimer);
        Self {
            state: BroadcasterState::RoutingDisabled,
            status: BroadcastStatus::RoutingOff,
            broadcasters: HashMap::new(),
            channels,
            outbox,
        }
    }

    /// Tick interval the caller should (re-)arm [`Io::SetTimer`] with.
    pub fn tick_interval() -> crate::clock::LocalDuration {
        BROADCAST_TICK
    }

    /// Currently stored per-peer advertisements, for inspection in tests
    /// and diagnostics.
    pub fn broadcasters(&self) -> &HashMap<PeerPubkey, LastBroadcast> {
        &self.broadcasters
    }

    /// Comms-tower callback: a peer finished negotiating `init`.
    ///
    /// If the peer advertises `PrivateRouting`, seeds a fresh entry and
    /// forwards it to [`Self::process`] (§4.1).
    pub fn on_operational(&mut self, worker: Worker, their_init: PeerFeatures) {
        if their_init.private_routing {
            let seed = LastBroadcast::seed(worker.info);
            self.process(Input::SeedBroadcast(seed));
        }
    }

    /// Comms-tower callback: a peer disconnected.
    pub fn on_disconnect(&mut self, worker: Worker) {
        self.broadcasters.remove(&worker.info.node_id);
    }

    /// Cancel the periodic broadcast subscription and tear down.
    pub fn become_shut_down(&mut self) {
        self.outbox.push(Io::CancelTimer);
    }

    /// Handle one asynchronous input (§4.1).
    pub fn process(&mut self, input: Input) {
        match input {
            Input::RoutingOn(params) => {
                self.state = BroadcasterState::RoutingEnabled;
                self.status = BroadcastStatus::RoutingOn(params);
            }
            Input::RoutingOff => {
                if self.state == BroadcasterState::RoutingEnabled {
                    self.route_off();
                }
                // Ignored while RoutingDisabled: no entries exist to turn off.
            }
            Input::CmdBroadcast => {
                if self.state == BroadcasterState::RoutingEnabled {
                    if let BroadcastStatus::RoutingOn(params) = self.status {
                        self.broadcast_tick(params);
                    }
                    // RoutingOff is a latch: nothing new to compute without
                    // a params template, and every peer is already Undesired.
                }
            }
            Input::SeedBroadcast(lb) => {
                self.broadcasters.entry(lb.info.node_id).or_insert(lb);
            }
        }
    }

    fn broadcast_tick(&mut self, params: TrampolineOn) {
        log::trace!("broadcast tick over {} peers", self.broadcasters.len());
        let usable = self.channels.usable_channels();
        let mut next = HashMap::with_capacity(self.broadcasters.len());

        for (peer, lb) in self.broadcasters.iter() {
            let updated = lb.updated(&usable, &params);
            if updated.last != lb.last {
                log::debug!("trampoline advertisement changed for {peer}");
                self.outbox
                    .push(Io::Send(updated.info, updated.last.clone()));
            }
            next.insert(*peer, updated);
        }

        self.broadcasters = next;
    }

    fn route_off(&mut self) {
        log::info!("routing disabled, latching all peers to undesired");
        for lb in self.broadcasters.values_mut() {
            lb.last = TrampolineStatus::TrampolineUndesired;
            self.outbox
                .push(Io::Send(lb.info, TrampolineStatus::TrampolineUndesired));
        }
        self.status = BroadcastStatus::RoutingOff;
    }
}

impl<S: ChannelSource> Iterator for TrampolineBroadcaster<S> {
    type Item = Io;

    fn next(&mut self) -> Option<Io> {
        self.outbox.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn peer(tag: u8) -> RemoteNodeInfo {
        RemoteNodeInfo {
            node_id: PeerPubkey::from_byte(tag),
            address: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 9000 + tag as u16),
        }
    }

    fn params() -> TrampolineOn {
        TrampolineOn {
            fee_base_msat: 1000,
            fee_proportional_millionths: 100,
            cltv_expiry_delta: 144,
            min_msat: 1,
            max_msat: 0,
        }
    }

    struct FakeChannels(Vec<crate::types::SimpleChannel>);

    impl ChannelSource for FakeChannels {
        type Channel = crate::types::SimpleChannel;

        fn usable_channels(&self) -> Vec<Self::Channel> {
            self.0.clone()
        }
    }

    fn chans(a: u64, b: u64) -> FakeChannels {
        use crate::types::SimpleChannel;
        FakeChannels(vec![
            SimpleChannel {
                remote_node_id: PeerPubkey::from_byte(1),
                available_for_send: 0,
                available_for_receive: a,
                operational_and_open: true,
            },
            SimpleChannel {
                remote_node_id: PeerPubkey::from_byte(2),
                available_for_send: 0,
                available_for_receive: b,
                operational_and_open: true,
            },
            // Shared outbound liquidity toward unrelated peers, available
            // to route *to* either A or B.
            SimpleChannel {
                remote_node_id: PeerPubkey::from_byte(99),
                available_for_send: 10_000_000,
                available_for_receive: 0,
                operational_and_open: true,
            },
        ])
    }

    fn connect(bc: &mut TrampolineBroadcaster<FakeChannels>, p: RemoteNodeInfo) {
        bc.on_operational(
            Worker { info: p },
            PeerFeatures {
                private_routing: true,
                chain_swap: false,
            },
        );
    }

    #[test]
    fn s1_delta_suppression() {
        let a = peer(1);
        let b = peer(2);
        let mut bc = TrampolineBroadcaster::new(chans(500_000, 500_000));
        bc.process(Input::RoutingOn(params()));
        connect(&mut bc, a);
        connect(&mut bc, b);

        bc.process(Input::CmdBroadcast);
        let sent: Vec<_> = bc.by_ref().collect();
        assert_eq!(sent.len(), 2, "tick 1 should send an Init to each peer");
        for io in &sent {
            match io {
                Io::Send(_, TrampolineStatus::TrampolineStatusInit { status, .. }) => {
                    assert_eq!(status.max_msat, 500_000);
                }
                other => panic!("unexpected io: {other:?}"),
            }
        }

        // Tick 2, unchanged balances: no sends.
        bc.process(Input::CmdBroadcast);
        assert_eq!(bc.by_ref().count(), 0);

        // Tick 3, after a 100_000 msat payment reduces both sides' receive cap.
        bc.channels = chans(400_000, 400_000);
        bc.process(Input::CmdBroadcast);
        let sent: Vec<_> = bc.by_ref().collect();
        assert_eq!(sent.len(), 2);
        for io in &sent {
            match io {
                Io::Send(_, TrampolineStatus::TrampolineStatusUpdate { status, .. }) => {
                    assert_eq!(status.as_ref().unwrap().max_msat, 400_000);
                }
                other => panic!("unexpected io: {other:?}"),
            }
        }
    }

    #[test]
    fn s2_undesired_gate() {
        let a = peer(1);
        let mut bc = TrampolineBroadcaster::new(chans(800_000, 0));
        let mut p = params();
        p.min_msat = 1_000_000;
        bc.process(Input::RoutingOn(p));
        connect(&mut bc, a);

        bc.process(Input::CmdBroadcast);
        let sent: Vec<_> = bc.by_ref().collect();
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            sent[0],
            Io::Send(_, TrampolineStatus::TrampolineUndesired)
        ));
    }

    #[test]
    fn s3_routing_off_latches() {
        let a = peer(1);
        let b = peer(2);
        let mut bc = TrampolineBroadcaster::new(chans(500_000, 500_000));
        bc.process(Input::RoutingOn(params()));
        connect(&mut bc, a);
        connect(&mut bc, b);
        bc.process(Input::CmdBroadcast);
        let _ = bc.by_ref().count();

        bc.process(Input::RoutingOff);
        let sent: Vec<_> = bc.by_ref().collect();
        assert_eq!(sent.len(), 2);
        for io in &sent {
            assert!(matches!(
                io,
                Io::Send(_, TrampolineStatus::TrampolineUndesired)
            ));
        }
        for lb in bc.broadcasters().values() {
            assert_eq!(lb.last, TrampolineStatus::TrampolineUndesired);
        }

        // A further tick is a no-op: state is latched RoutingOff.
        bc.process(Input::CmdBroadcast);
        assert_eq!(bc.by_ref().count(), 0);

        // Re-enabling hits the "either state" arm and resumes broadcasting.
        bc.process(Input::RoutingOn(params()));
        bc.process(Input::CmdBroadcast);
        assert_eq!(bc.by_ref().count(), 2);
    }

    #[test]
    fn tick_never_changes_peer_set() {
        let a = peer(1);
        let mut bc = TrampolineBroadcaster::new(chans(500_000, 0));
        bc.process(Input::RoutingOn(params()));
        connect(&mut bc, a);
        let before: std::collections::HashSet<_> = bc.broadcasters().keys().copied().collect();
        bc.process(Input::CmdBroadcast);
        let _ = bc.by_ref().count();
        let after: std::collections::HashSet<_> = bc.broadcasters().keys().copied().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn disconnect_removes_peer() {
        let a = peer(1);
        let mut bc = TrampolineBroadcaster::new(chans(500_000, 0));
        connect(&mut bc, a);
        assert_eq!(bc.broadcasters().len(), 1);
        bc.on_disconnect(Worker { info: a });
        assert_eq!(bc.broadcasters().len(), 0);
    }

    #[test]
    fn peer_without_private_routing_is_ignored() {
        let a = peer(1);
        let mut bc = TrampolineBroadcaster::new(chans(500_000, 0));
        bc.on_operational(
            Worker { info: a },
            PeerFeatures {
                private_routing: false,
                chain_swap: false,
            },
        );
        assert!(bc.broadcasters().is_empty());
    }
}
