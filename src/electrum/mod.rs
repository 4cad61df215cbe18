//! Electrum client pool: maintains several concurrent Electrum connections
//! and elects a single master chain-tip source (§4.2).

mod addresses;

use std::collections::{HashMap, HashSet};

pub use addresses::{read_server_addresses, Chain, ServerAddress};

use crate::config::{PoolConfig, MASTER_SWITCH_HYSTERESIS, RECONNECT_DELAY};
use crate::error::{PoolConstructError, RequestError};
use crate::outbox::Outbox;

/// Chain height.
pub type Height = u64;

/// A raw block header, as reported by an Electrum server.
///
/// The actual block header codec is the Electrum client's concern; this
/// crate only ever compares and forwards these bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header(pub [u8; 80]);

/// A 32-byte script hash, as used by the `blockchain.scripthash.subscribe`
/// Electrum method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScriptHash(pub [u8; 32]);

/// A handle identifying one Electrum connection attempt or client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientHandle(u64);

/// A handle identifying one registered status listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// An opaque Electrum JSON-RPC request; framing is the client's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectrumRequest(pub String);

/// An opaque Electrum JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectrumResponse(pub String);

/// Events published to status listeners and the global event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// A client became (or remains) the master chain-tip source.
    ElectrumReady {
        /// The client this event names as source.
        ///
        /// On a handleHeader-driven master switch this is, by design,
        /// the *previous* master's handle — see the "Master switch
        /// source identity" entry in DESIGN.md.
        src: ClientHandle,
        /// Its reported height.
        height: Height,
        /// Its reported tip header.
        tip: Header,
        /// The server address behind the named client.
        addr: ServerAddress,
    },
    /// A client (or the whole pool) disconnected.
    ElectrumDisconnected {
        /// The client that disconnected.
        src: ClientHandle,
    },
}

/// Asynchronous input accepted by [`ElectrumClientPool::process`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// A client finished its initial handshake and reported a tip.
    ElectrumReady {
        /// Reporting client.
        src: ClientHandle,
        /// Its height.
        height: Height,
        /// Its tip header.
        tip: Header,
        /// Its resolved address.
        addr: ServerAddress,
    },
    /// A client's header subscription produced a new tip.
    HeaderSubscriptionResponse {
        /// Reporting client.
        src: ClientHandle,
        /// Its height.
        height: Height,
        /// Its tip header.
        tip: Header,
    },
    /// A client disconnected.
    ElectrumDisconnected {
        /// The disconnected client.
        src: ClientHandle,
    },
    /// The 5-second reconnect delay scheduled after a disconnect fired.
    ReconnectTick,
}

/// Effects emitted by the pool, to be carried out by the caller.
pub enum Io {
    /// Open a new Electrum connection to `addr` as client `handle`.
    Connect(ClientHandle, ServerAddress),
    /// Subscribe `handle`'s client to header notifications.
    SubscribeHeaders(ClientHandle),
    /// Subscribe `handle`'s client to a script hash's status.
    SubscribeScriptHash(ClientHandle, ScriptHash),
    /// Forward a request to `handle`'s client; the response arrives on
    /// the paired sender, standing in for a `Future<Response>`.
    Request(
        ClientHandle,
        ElectrumRequest,
        crossbeam_channel::Sender<ElectrumResponse>,
    ),
    /// Arm the 5-second reconnect timer.
    ScheduleReconnect,
    /// Dispatch an event to every currently registered status listener.
    Notify(PoolEvent),
    /// Dispatch an event to exactly one (newly registered) listener.
    NotifyOne(ListenerId, PoolEvent),
    /// Publish an event onto the global event bus.
    PublishEvent(PoolEvent),
}

impl std::fmt::Debug for Io {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Io::Connect(h, a) => f.debug_tuple("Connect").field(h).field(a).finish(),
            Io::SubscribeHeaders(h) => f.debug_tuple("SubscribeHeaders").field(h).finish(),
            Io::SubscribeScriptHash(h, s) => {
                f.debug_tuple("SubscribeScriptHash").field(h).field(s).finish()
            }
            Io::Request(h, r, _) => f.debug_tuple("Request").field(h).field(r).finish(),
            Io::ScheduleReconnect => write!(f, "ScheduleReconnect"),
            Io::Notify(e) => f.debug_tuple("Notify").field(e).finish(),
            Io::NotifyOne(id, e) => f.debug_tuple("NotifyOne").field(id).field(e).finish(),
            Io::PublishEvent(e) => f.debug_tuple("PublishEvent").field(e).finish(),
        }
    }
}

enum PoolState {
    Disconnected,
    Connected {
        master: ClientHandle,
        tips: HashMap<ClientHandle, (Height, Header)>,
    },
}

/// Supervises up to `max_chain_connections_count` concurrent Electrum
/// connections and elects a single master (§4.2).
pub struct ElectrumClientPool {
    state: PoolState,
    addresses: HashMap<ClientHandle, ServerAddress>,
    status_listeners: HashSet<ListenerId>,
    block_count: Height,
    server_list: Vec<ServerAddress>,
    config: PoolConfig,
    rng: fastrand::Rng,
    next_handle: u64,
    next_listener_id: u64,
    outbox: Outbox<Io>,
}

impl ElectrumClientPool {
    /// Construct a pool for the network identified by `chain_hash`.
    ///
    /// Fails only if the chain hash is unrecognized or the embedded
    /// server-list resource fails to parse (§7).
    pub fn new(
        chain_hash: bitcoin_hashes::sha256d::Hash,
        config: PoolConfig,
        rng: fastrand::Rng,
        custom_address: Option<ServerAddress>,
    ) -> Result<Self, PoolConstructError> {
        let server_list = if let Some(addr) = custom_address {
            vec![addr]
        } else {
            let chain = Chain::from_hash(chain_hash)
                .ok_or_else(|| PoolConstructError::UnknownChainHash(format!("{chain_hash}")))?;
            read_server_addresses(chain, config.use_onion)?
        };

        Ok(Self {
            state: PoolState::Disconnected,
            addresses: HashMap::new(),
            status_listeners: HashSet::new(),
            block_count: 0,
            server_list,
            config,
            rng,
            next_handle: 0,
            next_listener_id: 0,
            outbox: Outbox::default(),
        })
    }

    /// Current published chain height. Monotonic (§3, §8 invariant 5).
    pub fn block_count(&self) -> Height {
        self.block_count
    }

    /// Whether the pool currently has an elected master.
    pub fn is_connected(&self) -> bool {
        matches!(self.state, PoolState::Connected { .. })
    }

    /// The currently elected master, if any.
    pub fn master(&self) -> Option<ClientHandle> {
        match &self.state {
            PoolState::Connected { master, .. } => Some(*master),
            PoolState::Disconnected => None,
        }
    }

    /// Launch `min(max_chain_connections_count, |server_addresses|)`
    /// initial connection attempts (§4.2 "Connect loop").
    pub fn init_connect(&mut self) {
        let n = self
            .config
            .max_chain_connections_count
            .min(self.server_list.len());
        for _ in 0..n {
            self.connect_one();
        }
    }

    /// Register a status listener, synthesising an immediate
    /// `ElectrumReady` if the pool is already connected (§4.2).
    pub fn add_status_listener(&mut self) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.status_listeners.insert(id);

        if let PoolState::Connected { master, tips } = &self.state {
            if let Some((height, tip)) = tips.get(master) {
                let addr = self.address_of(*master);
                self.outbox.push(Io::NotifyOne(
                    id,
                    PoolEvent::ElectrumReady {
                        src: *master,
                        height: *height,
                        tip: *tip,
                        addr,
                    },
                ));
            }
        }
        id
    }

    /// Subscribe the master client to header notifications.
    pub fn subscribe_to_headers(&mut self) -> Result<(), RequestError> {
        let master = self.master().ok_or(RequestError::NotConnected)?;
        self.outbox.push(Io::SubscribeHeaders(master));
        Ok(())
    }

    /// Subscribe the master client to one script hash.
    pub fn subscribe_to_script_hash(&mut self, hash: ScriptHash) -> Result<(), RequestError> {
        let master = self.master().ok_or(RequestError::NotConnected)?;
        self.outbox.push(Io::SubscribeScriptHash(master, hash));
        Ok(())
    }

    /// Forward a request to the master client.
    pub fn request(
        &mut self,
        req: ElectrumRequest,
    ) -> Result<crossbeam_channel::Receiver<ElectrumResponse>, RequestError> {
        let master = self.master().ok_or(RequestError::NotConnected)?;
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.outbox.push(Io::Request(master, req, tx));
        Ok(rx)
    }

    /// Handle one asynchronous input (§4.2's transition table).
    pub fn process(&mut self, input: Input) {
        match input {
            Input::ElectrumReady {
                src,
                height,
                tip,
                addr,
            } => {
                if !self.addresses.contains_key(&src) {
                    return;
                }
                self.addresses.insert(src, addr.clone());
                self.outbox.push(Io::SubscribeHeaders(src));
                self.handle_header(src, height, tip, addr);
            }
            Input::HeaderSubscriptionResponse { src, height, tip } => {
                if !self.addresses.contains_key(&src) {
                    return;
                }
                let addr = self.address_of(src);
                self.handle_header(src, height, tip, addr);
            }
            Input::ElectrumDisconnected { src } => {
                self.on_disconnected(src);
            }
            Input::ReconnectTick => {
                self.connect_one();
            }
        }
    }

    fn address_of(&self, handle: ClientHandle) -> ServerAddress {
        self.addresses
            .get(&handle)
            .cloned()
            .expect("address recorded when the client handle was created")
    }

    fn next_handle(&mut self) -> ClientHandle {
        let h = ClientHandle(self.next_handle);
        self.next_handle += 1;
        h
    }

    fn pick_address(&mut self) -> Option<ServerAddress> {
        let candidates: Vec<&ServerAddress> = self
            .server_list
            .iter()
            .filter(|a| !self.addresses.values().any(|used| used == *a))
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let idx = self.rng.usize(..candidates.len());
        Some(candidates[idx].clone())
    }

    fn connect_one(&mut self) {
        if self.addresses.len() >= self.config.max_chain_connections_count {
            return;
        }
        if let Some(addr) = self.pick_address() {
            let handle = self.next_handle();
            self.addresses.insert(handle, addr.clone());
            self.outbox.push(Io::Connect(handle, addr));
        }
    }

    fn schedule_reconnect(&mut self) {
        log::debug!("scheduling reconnect in {}ms", RECONNECT_DELAY.as_millis());
        self.outbox.push(Io::ScheduleReconnect);
    }

    fn update_block_count(&mut self, h: Height) {
        if h > self.block_count {
            self.block_count = h;
        }
    }

    /// `handleHeader` from §4.2: always updates `block_count`; either
    /// installs the first master, updates the reporting client's tip, or
    /// switches master once the hysteresis threshold is cleared.
    fn handle_header(&mut self, conn: ClientHandle, h: Height, tip: Header, addr: ServerAddress) {
        self.update_block_count(h);

        if matches!(self.state, PoolState::Disconnected) {
            let mut tips = HashMap::new();
            tips.insert(conn, (h, tip));
            self.state = PoolState::Connected { master: conn, tips };
            self.notify_ready(conn, h, tip, addr);
            return;
        }

        let master = match &self.state {
            PoolState::Connected { master, .. } => *master,
            PoolState::Disconnected => unreachable!(),
        };

        if conn != master {
            let master_height = match &self.state {
                PoolState::Connected { tips, .. } => {
                    tips.get(&master).map(|(mh, _)| *mh).unwrap_or(0)
                }
                PoolState::Disconnected => 0,
            };

            if h > master_height + MASTER_SWITCH_HYSTERESIS {
                log::info!("master switch: {master:?} -> {conn:?} at height {h}");
                // Master switch. The replacement `ElectrumReady` is, by
                // design, emitted with the *old* master's handle as its
                // source (see DESIGN.md).
                self.outbox
                    .push(Io::Notify(PoolEvent::ElectrumDisconnected { src: master }));
                self.notify_ready(master, h, tip, addr.clone());

                if let PoolState::Connected { master: m, tips } = &mut self.state {
                    tips.insert(conn, (h, tip));
                    *m = conn;
                }
                return;
            }
        }

        if let PoolState::Connected { tips, .. } = &mut self.state {
            tips.insert(conn, (h, tip));
        }
    }

    fn on_disconnected(&mut self, src: ClientHandle) {
        log::debug!("client {src:?} disconnected");
        self.addresses.remove(&src);
        self.schedule_reconnect();

        let was_master = match &self.state {
            PoolState::Connected { master, .. } => *master == src,
            PoolState::Disconnected => return,
        };

        if let PoolState::Connected { tips, .. } = &mut self.state {
            tips.remove(&src);
        }

        let tips_empty = matches!(&self.state, PoolState::Connected { tips, .. } if tips.is_empty());

        if tips_empty {
            self.outbox
                .push(Io::Notify(PoolEvent::ElectrumDisconnected { src }));
            self.state = PoolState::Disconnected;
        } else if was_master {
            self.elect_new_master();
        }
    }

    /// Elect the remaining client with the highest tip height as master,
    /// ties broken `(height desc, handle asc)` per the deterministic
    /// tie-break adopted in SPEC_FULL.md.
    fn elect_new_master(&mut self) {
        let best = match &self.state {
            PoolState::Connected { tips, .. } => {
                let mut iter = tips.iter().map(|(id, (h, tip))| (*id, *h, *tip));
                let mut best = iter.next();
                for cand in iter {
                    best = Some(match best {
                        None => cand,
                        Some(b) => {
                            if cand.1 > b.1 || (cand.1 == b.1 && cand.0 < b.0) {
                                cand
                            } else {
                                b
                            }
                        }
                    });
                }
                best
            }
            PoolState::Disconnected => None,
        };

        let Some((new_master, h, tip)) = best else {
            return;
        };

        if let PoolState::Connected { master, .. } = &mut self.state {
            *master = new_master;
        }
        let addr = self.address_of(new_master);
        self.notify_ready(new_master, h, tip, addr);
    }

    fn notify_ready(&mut self, src: ClientHandle, h: Height, tip: Header, addr: ServerAddress) {
        let ev = PoolEvent::ElectrumReady {
            src,
            height: h,
            tip,
            addr,
        };
        self.outbox.push(Io::Notify(ev.clone()));
        self.outbox.push(Io::PublishEvent(ev));
    }
}

impl Iterator for ElectrumClientPool {
    type Item = Io;

    fn next(&mut self) -> Option<Io> {
        self.outbox.next()
    }
}
