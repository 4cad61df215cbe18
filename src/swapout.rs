//! One-shot swap-out feerate aggregation FSM (§4.3).

use std::collections::HashMap;

use crate::config::MIN_CHAIN_FEE_SAT;
use crate::outbox::Outbox;
use crate::types::{PeerFeatures, RemoteNodeInfo, Worker};

/// A per-chain-pair feerate quoted by a swap-out provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainPairFeerate {
    /// Feerate in satoshis (per vbyte, opaque to this crate).
    pub fee: u64,
}

/// The wire payload of a `YesSwapOutSupport` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOutMessage {
    /// One quote per chain pair the responder supports.
    pub feerates: Vec<ChainPairFeerate>,
}

/// A stored, accepted swap-out offer: the message plus the offering peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOutResponseExt {
    /// The accepted message.
    pub msg: SwapOutMessage,
    /// The peer that sent it.
    pub info: RemoteNodeInfo,
}

/// Input accepted by [`SwapOutFeeratesHandler::process`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Start the search over the given capable channel counterparties.
    CmdStart(Vec<Worker>),
    /// A peer became operational; `features` gates whether it is queried.
    OnOperational(Worker, PeerFeatures),
    /// A peer disconnected before answering.
    OnDisconnect(Worker),
    /// A peer explicitly reported it does not support swap-out.
    NoSwapOutSupport(Worker),
    /// A peer replied with usable (or unusable) feerate quotes.
    YesSwapOutSupport(Worker, SwapOutMessage),
    /// Cancel the search; idempotent.
    CmdCancel,
    /// Internal timer firing `doSearch(force = true)`.
    TimerFired,
}

/// Effects emitted by the handler.
#[derive(Debug)]
pub enum Io {
    /// Register a private swap-out listener with `worker`.
    Listen(Worker),
    /// Remove the private swap-out listener from `worker`.
    RemoveListener(Worker),
    /// Send a swap-out request to `worker`.
    SendRequest(Worker),
    /// Arm the 30-second hard timeout.
    SetFirstResponseTimer,
    /// Arm the 5-second secondary timeout.
    SetFollowupTimer,
    /// Cancel any armed timer.
    CancelTimer,
    /// All capable peers answered (or rejected); offers found.
    OnFound(Vec<SwapOutResponseExt>),
    /// Every capable peer rejected or was unsupported.
    OnNoProviderSwapOutSupport,
    /// The hard timeout elapsed with no usable response at all.
    OnTimeoutAndNoResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingFirstResponse,
    WaitingRestOfResponses,
    Finalized,
}

struct FeeratesData {
    results: HashMap<RemoteNodeInfo, Option<SwapOutResponseExt>>,
}

/// Aggregates swap-out feerate offers from a fixed set of capable peers,
/// then finalises once (§4.3).
pub struct SwapOutFeeratesHandler {
    state: State,
    data: Option<FeeratesData>,
    outbox: Outbox<Io>,
}

impl Default for SwapOutFeeratesHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SwapOutFeeratesHandler {
    /// Construct a handler in its `Initial` state.
    pub fn new() -> Self {
        Self {
            state: State::Initial,
            data: None,
            outbox: Outbox::default(),
        }
    }

    /// Whether the handler has finalised (found, rejected, or timed out).
    pub fn is_finalized(&self) -> bool {
        matches!(self.state, State::Finalized)
    }

    /// Number of peers still awaited (`|results|`, §8 invariant 8).
    pub fn pending_count(&self) -> usize {
        self.data.as_ref().map(|d| d.results.len()).unwrap_or(0)
    }

    /// Number of accepted offers so far (`|responses|`).
    pub fn response_count(&self) -> usize {
        self.data
            .as_ref()
            .map(|d| d.results.values().filter(|v| v.is_some()).count())
            .unwrap_or(0)
    }

    /// Handle one input.
    pub fn process(&mut self, input: Input) {
        match input {
            Input::CmdStart(peers) => self.cmd_start(peers),
            Input::OnOperational(worker, features) => self.on_operational(worker, features),
            Input::OnDisconnect(worker) => self.remove_peer(worker.info),
            Input::NoSwapOutSupport(worker) => {
                self.remove_peer(worker.info);
                self.do_search(false);
            }
            Input::YesSwapOutSupport(worker, msg) => {
                self.on_yes_swap_out_support(worker, msg);
            }
            Input::CmdCancel => self.cmd_cancel(),
            Input::TimerFired => self.do_search(true),
        }
    }

    fn cmd_start(&mut self, peers: Vec<Worker>) {
        if !matches!(self.state, State::Initial) {
            return;
        }
        let mut results = HashMap::new();
        for worker in &peers {
            results.insert(worker.info, None);
            self.outbox.push(Io::Listen(*worker));
        }
        self.data = Some(FeeratesData { results });
        self.outbox.push(Io::SetFirstResponseTimer);
        self.state = State::WaitingFirstResponse;
        self.do_search(false);
    }

    fn on_operational(&mut self, worker: Worker, features: PeerFeatures) {
        if !self.waiting() {
            return;
        }
        if !self.data_has(&worker) {
            return;
        }
        if features.chain_swap {
            self.outbox.push(Io::SendRequest(worker));
        } else {
            self.remove_peer(worker.info);
            self.do_search(false);
        }
    }

    fn on_yes_swap_out_support(&mut self, worker: Worker, msg: SwapOutMessage) {
        if !self.waiting() {
            return;
        }
        let Some(data) = &mut self.data else { return };
        if !data.results.contains_key(&worker.info) {
            return;
        }

        let all_below_min = msg.feerates.iter().all(|f| f.fee < MIN_CHAIN_FEE_SAT);
        if all_below_min {
            self.remove_peer(worker.info);
            self.do_search(false);
            return;
        }

        let was_first = self.response_count() == 0;
        if let Some(data) = &mut self.data {
            data.results.insert(
                worker.info,
                Some(SwapOutResponseExt {
                    msg,
                    info: worker.info,
                }),
            );
        }

        if was_first && matches!(self.state, State::WaitingFirstResponse) {
            self.state = State::WaitingRestOfResponses;
            self.outbox.push(Io::CancelTimer);
            self.outbox.push(Io::SetFollowupTimer);
        }
        self.do_search(false);
    }

    fn remove_peer(&mut self, info: RemoteNodeInfo) {
        if let Some(data) = &mut self.data {
            data.results.remove(&info);
        }
    }

    fn data_has(&self, worker: &Worker) -> bool {
        self.data
            .as_ref()
            .map(|d| d.results.contains_key(&worker.info))
            .unwrap_or(false)
    }

    fn waiting(&self) -> bool {
        matches!(
            self.state,
            State::WaitingFirstResponse | State::WaitingRestOfResponses
        )
    }

    /// `doSearch(force)` decision table (§4.3).
    fn do_search(&mut self, force: bool) {
        if !self.waiting() {
            return;
        }
        let Some(data) = &self.data else { return };
        let total = data.results.len();
        let responses: Vec<SwapOutResponseExt> =
            data.results.values().filter_map(|v| v.clone()).collect();

        if total == 0 {
            log::debug!("no capable peers left, no swap-out support available");
            self.outbox.push(Io::OnNoProviderSwapOutSupport);
            self.cmd_cancel();
        } else if responses.len() == total {
            log::debug!("all {total} capable peers answered");
            self.outbox.push(Io::OnFound(responses));
            self.cmd_cancel();
        } else if force && !responses.is_empty() {
            log::debug!("secondary timeout elapsed with {} offers", responses.len());
            self.outbox.push(Io::OnFound(responses));
            self.cmd_cancel();
        } else if force && responses.is_empty() {
            log::warn!("hard timeout elapsed with no responses");
            self.outbox.push(Io::OnTimeoutAndNoResponse);
            self.cmd_cancel();
        }
    }

    fn cmd_cancel(&mut self) {
        if matches!(self.state, State::Finalized) {
            return;
        }
        if let Some(data) = &self.data {
            for info in data.results.keys() {
                self.outbox.push(Io::RemoveListener(Worker { info: *info }));
            }
        }
        self.outbox.push(Io::CancelTimer);
        self.state = State::Finalized;
    }
}

impl Iterator for SwapOutFeeratesHandler {
    type Item = Io;

    fn next(&mut self) -> Option<Io> {
        self.outbox.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PeerPubkey;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn worker(tag: u8) -> Worker {
        Worker {
            info: RemoteNodeInfo {
                node_id: PeerPubkey::from_byte(tag),
                address: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000 + tag as u16),
            },
        }
    }

    fn chain_swap() -> PeerFeatures {
        PeerFeatures {
            private_routing: false,
            chain_swap: true,
        }
    }

    fn drain(h: &mut SwapOutFeeratesHandler) -> Vec<Io> {
        h.by_ref().collect()
    }

    #[test]
    fn s6_partial_timeout_reports_one_offer() {
        let mut h = SwapOutFeeratesHandler::new();
        let peers = vec![worker(1), worker(2), worker(3)];
        h.process(Input::CmdStart(peers.clone()));
        let _ = drain(&mut h);

        for p in &peers {
            h.process(Input::OnOperational(*p, chain_swap()));
        }
        let _ = drain(&mut h);

        h.process(Input::YesSwapOutSupport(
            peers[0],
            SwapOutMessage {
                feerates: vec![ChainPairFeerate { fee: 500 }],
            },
        ));
        let events = drain(&mut h);
        assert!(events.iter().any(|io| matches!(io, Io::SetFollowupTimer)));
        assert!(!h.is_finalized());

        h.process(Input::TimerFired);
        let events = drain(&mut h);
        assert!(matches!(&events[0], Io::OnFound(offers) if offers.len() == 1));
        assert!(h.is_finalized());
    }

    #[test]
    fn s7_hard_timeout_no_replies() {
        let mut h = SwapOutFeeratesHandler::new();
        let peers = vec![worker(1), worker(2)];
        h.process(Input::CmdStart(peers.clone()));
        let _ = drain(&mut h);
        for p in &peers {
            h.process(Input::OnOperational(*p, chain_swap()));
        }
        let _ = drain(&mut h);

        h.process(Input::TimerFired);
        let events = drain(&mut h);
        assert!(events.iter().any(|io| matches!(io, Io::OnTimeoutAndNoResponse)));
        assert!(h.is_finalized());
    }

    #[test]
    fn unusable_offer_is_dropped() {
        let mut h = SwapOutFeeratesHandler::new();
        let peers = vec![worker(1)];
        h.process(Input::CmdStart(peers.clone()));
        let _ = drain(&mut h);
        h.process(Input::OnOperational(peers[0], chain_swap()));
        let _ = drain(&mut h);

        h.process(Input::YesSwapOutSupport(
            peers[0],
            SwapOutMessage {
                feerates: vec![ChainPairFeerate { fee: 10 }],
            },
        ));
        let events = drain(&mut h);
        assert!(events.iter().any(|io| matches!(io, Io::OnNoProviderSwapOutSupport)));
        assert!(h.is_finalized());
    }

    #[test]
    fn all_answered_finalizes_immediately() {
        let mut h = SwapOutFeeratesHandler::new();
        let peers = vec![worker(1), worker(2)];
        h.process(Input::CmdStart(peers.clone()));
        let _ = drain(&mut h);
        for p in &peers {
            h.process(Input::OnOperational(*p, chain_swap()));
        }
        let _ = drain(&mut h);

        for p in &peers {
            h.process(Input::YesSwapOutSupport(
                *p,
                SwapOutMessage {
                    feerates: vec![ChainPairFeerate { fee: 1000 }],
                },
            ));
        }
        let events = drain(&mut h);
        assert!(events.iter().any(|io| matches!(io, Io::OnFound(offers) if offers.len() == 2)));
        assert!(h.is_finalized());
    }

    #[test]
    fn no_provider_support_anywhere() {
        let mut h = SwapOutFeeratesHandler::new();
        let peers = vec![worker(1), worker(2)];
        h.process(Input::CmdStart(peers.clone()));
        let _ = drain(&mut h);
        h.process(Input::NoSwapOutSupport(peers[0]));
        let _ = drain(&mut h);
        h.process(Input::NoSwapOutSupport(peers[1]));
        let events = drain(&mut h);
        assert!(events
            .iter()
            .any(|io| matches!(io, Io::OnNoProviderSwapOutSupport)));
        assert!(h.is_finalized());
    }

    #[test]
    fn cmd_cancel_is_idempotent() {
        let mut h = SwapOutFeeratesHandler::new();
        h.process(Input::CmdStart(vec![worker(1)]));
        let _ = drain(&mut h);
        h.process(Input::CmdCancel);
        let _ = drain(&mut h);
        assert!(h.is_finalized());

        // A late timer fire, per the spec's explicit open question, is a no-op.
        h.process(Input::TimerFired);
        let events = drain(&mut h);
        assert!(events.is_empty());

        h.process(Input::CmdCancel);
        let events = drain(&mut h);
        assert!(events.is_empty());
    }

    #[test]
    fn invariant_counts_shrink_monotonically() {
        let mut h = SwapOutFeeratesHandler::new();
        let peers = vec![worker(1), worker(2), worker(3)];
        h.process(Input::CmdStart(peers.clone()));
        let _ = drain(&mut h);
        assert_eq!(h.pending_count(), 3);
        assert!(h.response_count() <= h.pending_count());

        h.process(Input::NoSwapOutSupport(peers[0]));
        let _ = drain(&mut h);
        assert_eq!(h.pending_count(), 2);
        assert!(h.response_count() <= h.pending_count());
    }
}
