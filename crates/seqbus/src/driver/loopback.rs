//! An in-memory sequencer bus.
//!
//! [`LoopbackBus`] keeps the client/port/queue/subscription graph in one
//! mutex-guarded state and each [`LoopbackDriver`] is a user client on it.
//! Inbound events are queued in wire format. Every user client owns a
//! non-blocking pipe that holds one byte while its inbox is non-empty, so
//! its readiness can be polled like a real sequencer handle.
//!
//! Events are routed when the sender drains its output. Queue timestamps are
//! not honoured: scheduled events are delivered at drain time like direct
//! ones.

use std::collections::{BTreeMap, VecDeque};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace, warn};

use super::{InputOutcome, OpenParams, SeqDriver};
use crate::address::Address;
use crate::codes::{addr_client, event_type as ev, streams};
use crate::error::{DriverError, DriverResult};
use crate::event::{wire, Connection, Event};
use crate::graph::{
    ClientInfo, ClientType, PortCaps, PortInfo, PortTypes, QueueInfo, QueueTempo, Subscriber,
    Subscription, SubsKind,
};
use crate::poll::{self, Interest, PollDescriptor};

const FIRST_USER_CLIENT: u8 = 128;
const LAST_USER_CLIENT: u8 = 191;
const MIDI_THROUGH: u8 = 14;
const MAX_QUEUES: u8 = 32;
const MAX_PORTS: u8 = 253;
const DEFAULT_TEMPO: u32 = 500_000;
const DEFAULT_PPQ: i32 = 96;

/// Driver operations that can be made to fail with [`LoopbackBus::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    SetNonblock,
    CreatePort,
    DeletePort,
    Subscribe,
    Unsubscribe,
    QueryClient,
    QueryPort,
    QuerySubscribers,
    AllocQueue,
    FreeQueue,
    SetQueueTempo,
    ControlQueue,
    EventInput,
    EventOutput,
    Drain,
    Sync,
}

fn errno(code: i32) -> DriverError {
    DriverError::from_errno(-code)
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(libc::EIO)
}

/// Encoded events waiting for one client, plus its readiness pipe.
struct Inbox {
    events: VecDeque<Vec<u8>>,
    bytes: usize,
    reader: OwnedFd,
    writer: OwnedFd,
    signalled: bool,
}

impl Inbox {
    fn new() -> DriverResult<Self> {
        let mut fds = [0; 2];
        // SAFETY: pipe2 writes two descriptors into the array on success.
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        if rc != 0 {
            return Err(errno(last_errno()));
        }
        // SAFETY: both descriptors were just created and nothing else owns them.
        let (reader, writer) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        Ok(Self {
            events: VecDeque::new(),
            bytes: 0,
            reader,
            writer,
            signalled: false,
        })
    }

    fn push(&mut self, record: Vec<u8>) {
        self.bytes += record.len();
        self.events.push_back(record);
        if !self.signalled {
            let byte = 1u8;
            // SAFETY: one byte from a live stack value into our own pipe.
            let n = unsafe {
                libc::write(
                    self.writer.as_raw_fd(),
                    &byte as *const u8 as *const libc::c_void,
                    1,
                )
            };
            self.signalled = n == 1;
        }
    }

    fn pop(&mut self) -> Option<Vec<u8>> {
        let record = self.events.pop_front()?;
        self.bytes -= record.len();
        if self.events.is_empty() && self.signalled {
            let mut byte = 0u8;
            // SAFETY: one byte into a live stack value from our own pipe.
            unsafe {
                libc::read(
                    self.reader.as_raw_fd(),
                    &mut byte as *mut u8 as *mut libc::c_void,
                    1,
                );
            }
            self.signalled = false;
        }
        Some(record)
    }
}

#[derive(Debug, Clone)]
struct PortState {
    name: String,
    caps: PortCaps,
    types: PortTypes,
}

struct ClientState {
    name: String,
    client_type: ClientType,
    ports: BTreeMap<u8, PortState>,
    /// Kernel clients have no inbox.
    inbox: Option<Inbox>,
}

impl ClientState {
    fn kernel(name: &str, ports: Vec<(u8, PortState)>) -> Self {
        Self {
            name: name.to_string(),
            client_type: ClientType::Kernel,
            ports: ports.into_iter().collect(),
            inbox: None,
        }
    }
}

struct QueueState {
    owner: u8,
    name: String,
    tempo: u32,
    ppq: i32,
    running: bool,
}

enum Announcement {
    Addr(Address),
    Connect(Connection),
}

#[derive(Default)]
struct BusState {
    clients: BTreeMap<u8, ClientState>,
    /// In the order they were made.
    subscriptions: Vec<Subscription>,
    queues: BTreeMap<u8, QueueState>,
    faults: Vec<(Fault, i32)>,
}

impl BusState {
    fn with_system_clients() -> Self {
        let mut state = BusState::default();
        let timer = PortState {
            name: "Timer".to_string(),
            caps: PortCaps::READ | PortCaps::WRITE | PortCaps::SUBS_READ | PortCaps::SUBS_WRITE,
            types: PortTypes::empty(),
        };
        let announce = PortState {
            name: "Announce".to_string(),
            caps: PortCaps::READ | PortCaps::SUBS_READ,
            types: PortTypes::empty(),
        };
        state.clients.insert(
            addr_client::SYSTEM,
            ClientState::kernel("System", vec![(0, timer), (1, announce)]),
        );
        let through = PortState {
            name: "Midi Through Port-0".to_string(),
            caps: PortCaps::READ | PortCaps::WRITE | PortCaps::SUBS_READ | PortCaps::SUBS_WRITE,
            types: PortTypes::MIDI_GENERIC | PortTypes::SOFTWARE | PortTypes::PORT,
        };
        state
            .clients
            .insert(MIDI_THROUGH, ClientState::kernel("Midi Through", vec![(0, through)]));
        state
    }

    /// Consume a pending injected fault for `fault`, if any.
    fn check(&mut self, fault: Fault) -> DriverResult<()> {
        if let Some(pos) = self.faults.iter().position(|(f, _)| *f == fault) {
            let (_, code) = self.faults.remove(pos);
            debug!(?fault, code, "loopback fault injected");
            return Err(errno(code));
        }
        Ok(())
    }

    fn port(&self, addr: Address) -> Option<&PortState> {
        self.clients.get(&addr.client)?.ports.get(&addr.port)
    }

    fn client_info(id: u8, client: &ClientState) -> ClientInfo {
        ClientInfo {
            id,
            name: client.name.clone(),
            client_type: client.client_type,
            broadcast_filter: false,
            error_bounce: false,
            event_filter: [0; 32],
            num_ports: client.ports.len() as u32,
            event_lost: 0,
        }
    }

    fn port_info(addr: Address, port: &PortState) -> PortInfo {
        PortInfo {
            addr,
            name: port.name.clone(),
            capability: port.caps,
            port_type: port.types,
        }
    }

    /// Queue `event` for `dest`. Returns false when the destination has no
    /// inbox (kernel clients, vanished clients).
    fn deliver(&mut self, event: &Event, dest: Address) -> bool {
        let Some(inbox) = self
            .clients
            .get_mut(&dest.client)
            .and_then(|c| c.inbox.as_mut())
        else {
            return false;
        };
        let mut copy = event.clone();
        copy.set_dest(dest);
        inbox.push(wire::encode(&copy));
        true
    }

    /// Deliver to every subscriber of `sender`, in subscription order.
    fn fan_out(&mut self, event: &Event, sender: Address) -> usize {
        let dests: Vec<Address> = self
            .subscriptions
            .iter()
            .filter(|s| s.sender == sender)
            .map(|s| s.dest)
            .collect();
        dests
            .into_iter()
            .filter(|dest| self.deliver(event, *dest))
            .count()
    }

    fn announce(&mut self, event_type: u8, body: Announcement) {
        let mut event = match Event::new(event_type) {
            Ok(event) => event,
            Err(e) => {
                warn!("cannot build announcement {}: {}", event_type, e);
                return;
            }
        };
        let filled = match body {
            Announcement::Addr(addr) => event.set_addr(addr),
            Announcement::Connect(connection) => event.set_connect(connection),
        };
        if let Err(e) = filled {
            warn!("cannot fill announcement {}: {}", event_type, e);
            return;
        }
        event.set_source(Address::SYSTEM_ANNOUNCE);
        self.fan_out(&event, Address::SYSTEM_ANNOUNCE);
    }

    fn remove_subscription(&mut self, index: usize) {
        let sub = self.subscriptions.remove(index);
        self.announce(
            ev::PORT_UNSUBSCRIBED,
            Announcement::Connect(Connection {
                sender: sub.sender,
                dest: sub.dest,
            }),
        );
    }

    /// Drop every subscription with an end matching `touches`.
    fn remove_subscriptions_where(&mut self, touches: impl Fn(&Subscription) -> bool) {
        while let Some(index) = self.subscriptions.iter().position(&touches) {
            self.remove_subscription(index);
        }
    }

    /// Route one event sent by `client`.
    fn route(&mut self, client: u8, mut event: Event) -> DriverResult<()> {
        let source = Address::new(client, event.source().port);
        event.set_source(source);
        let dest = event.dest();

        if dest.is_subscribers() {
            if self.port(source).is_none() {
                return Err(errno(libc::EINVAL));
            }
            let count = self.fan_out(&event, source);
            trace!(%source, count, "routed to subscribers");
            return Ok(());
        }

        if dest.is_broadcast() {
            let targets: Vec<u8> = self
                .clients
                .iter()
                .filter(|(id, c)| **id != client && c.inbox.is_some())
                .map(|(id, _)| *id)
                .collect();
            for id in targets {
                self.deliver(&event, Address::new(id, dest.port));
            }
            return Ok(());
        }

        if self.port(dest).is_none() {
            return Err(errno(libc::ENOENT));
        }
        if dest.client == MIDI_THROUGH {
            // The through port echoes everything to its own subscribers.
            event.set_source(dest);
            self.fan_out(&event, dest);
            return Ok(());
        }
        self.deliver(&event, dest);
        Ok(())
    }

    /// Whether `requester` may subscribe with `addr` as the given end.
    fn may_subscribe(&self, requester: u8, addr: Address, needed: PortCaps) -> DriverResult<()> {
        let port = self.port(addr).ok_or_else(|| errno(libc::EINVAL))?;
        if addr.client == requester {
            return Ok(());
        }
        if port.caps.contains(PortCaps::NO_EXPORT) || !port.caps.contains(needed) {
            return Err(errno(libc::EPERM));
        }
        Ok(())
    }

    fn queue_mut(&mut self, queue: u8) -> DriverResult<&mut QueueState> {
        self.queues.get_mut(&queue).ok_or_else(|| errno(libc::EINVAL))
    }

    fn detach(&mut self, client: u8) {
        self.remove_subscriptions_where(|s| s.sender.client == client || s.dest.client == client);
        self.queues.retain(|_, q| q.owner != client);
        if self.clients.remove(&client).is_some() {
            self.announce(
                ev::CLIENT_EXIT,
                Announcement::Addr(Address::new(client, 0)),
            );
            debug!(client, "loopback client detached");
        }
    }
}

/// Shared handle on an in-memory bus. Clones refer to the same bus.
#[derive(Clone)]
pub struct LoopbackBus {
    state: Arc<Mutex<BusState>>,
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackBus {
    /// A bus with the system client (timer and announce ports) and the
    /// kernel's MIDI through client.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState::with_system_clients())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().expect("loopback bus mutex poisoned")
    }

    /// Join the bus as a new duplex, non-blocking user client.
    pub fn attach(&self, name: &str) -> DriverResult<LoopbackDriver> {
        self.open(&OpenParams {
            device: "loopback".to_string(),
            client_name: name.to_string(),
            streams: streams::DUPLEX,
            nonblock: true,
        })
    }

    /// Join the bus with explicit open parameters.
    pub fn open(&self, params: &OpenParams) -> DriverResult<LoopbackDriver> {
        let mut state = self.lock();
        let client = (FIRST_USER_CLIENT..=LAST_USER_CLIENT)
            .find(|id| !state.clients.contains_key(id))
            .ok_or_else(|| errno(libc::EBUSY))?;
        state.clients.insert(
            client,
            ClientState {
                name: params.client_name.clone(),
                client_type: ClientType::User,
                ports: BTreeMap::new(),
                inbox: Some(Inbox::new()?),
            },
        );
        state.announce(
            ev::CLIENT_START,
            Announcement::Addr(Address::new(client, 0)),
        );
        debug!(client, name = %params.client_name, "loopback client attached");

        Ok(LoopbackDriver {
            bus: self.clone(),
            client,
            streams: params.streams,
            nonblock: params.nonblock,
            outbox: Vec::new(),
            outbox_bytes: 0,
        })
    }

    /// Make the next `fault` operation on any client fail with `-code`.
    pub fn fail_next(&self, fault: Fault, code: i32) {
        self.lock().faults.push((fault, code.abs()));
    }

    /// Put `event` straight into a client's inbox, as if the bus had routed
    /// it there.
    pub fn inject(&self, dest: Address, event: &Event) -> DriverResult<()> {
        if !self.lock().deliver(event, dest) {
            return Err(errno(libc::ENOENT));
        }
        Ok(())
    }

    /// Every live subscription, oldest first.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.lock().subscriptions.clone()
    }

    /// Ids of every client currently on the bus.
    pub fn client_ids(&self) -> Vec<u8> {
        self.lock().clients.keys().copied().collect()
    }
}

/// One user client on a [`LoopbackBus`].
pub struct LoopbackDriver {
    bus: LoopbackBus,
    client: u8,
    streams: i32,
    nonblock: bool,
    outbox: Vec<Event>,
    outbox_bytes: usize,
}

impl LoopbackDriver {
    pub fn bus(&self) -> &LoopbackBus {
        &self.bus
    }

    pub fn is_nonblocking(&self) -> bool {
        self.nonblock
    }

    fn has_input(&self) -> DriverResult<()> {
        if self.streams & streams::INPUT == 0 {
            return Err(errno(libc::EINVAL));
        }
        Ok(())
    }

    fn has_output(&self) -> DriverResult<()> {
        if self.streams & streams::OUTPUT == 0 {
            return Err(errno(libc::EINVAL));
        }
        Ok(())
    }
}

impl Drop for LoopbackDriver {
    fn drop(&mut self) {
        if let Ok(mut state) = self.bus.state.lock() {
            state.detach(self.client);
        }
    }
}

impl SeqDriver for LoopbackDriver {
    fn client_id(&self) -> u8 {
        self.client
    }

    fn set_client_name(&mut self, name: &str) -> DriverResult<()> {
        let mut state = self.bus.lock();
        let client = state
            .clients
            .get_mut(&self.client)
            .ok_or_else(|| errno(libc::ENOENT))?;
        client.name = name.to_string();
        state.announce(
            ev::CLIENT_CHANGE,
            Announcement::Addr(Address::new(self.client, 0)),
        );
        Ok(())
    }

    fn set_nonblock(&mut self, nonblock: bool) -> DriverResult<()> {
        self.bus.lock().check(Fault::SetNonblock)?;
        self.nonblock = nonblock;
        Ok(())
    }

    fn create_port(&mut self, name: &str, caps: PortCaps, types: PortTypes) -> DriverResult<u8> {
        let mut state = self.bus.lock();
        state.check(Fault::CreatePort)?;
        let client = state
            .clients
            .get_mut(&self.client)
            .ok_or_else(|| errno(libc::ENOENT))?;
        let port = (0..MAX_PORTS)
            .find(|id| !client.ports.contains_key(id))
            .ok_or_else(|| errno(libc::ENOMEM))?;
        client.ports.insert(
            port,
            PortState {
                name: name.to_string(),
                caps,
                types,
            },
        );
        state.announce(
            ev::PORT_START,
            Announcement::Addr(Address::new(self.client, port)),
        );
        Ok(port)
    }

    fn delete_port(&mut self, port: u8) -> DriverResult<()> {
        let mut state = self.bus.lock();
        state.check(Fault::DeletePort)?;
        let addr = Address::new(self.client, port);
        if state.port(addr).is_none() {
            return Err(errno(libc::ENOENT));
        }
        state.remove_subscriptions_where(|s| s.sender == addr || s.dest == addr);
        if let Some(client) = state.clients.get_mut(&self.client) {
            client.ports.remove(&port);
        }
        state.announce(ev::PORT_EXIT, Announcement::Addr(addr));
        Ok(())
    }

    fn next_client(&self, prev: i32) -> DriverResult<Option<ClientInfo>> {
        let mut state = self.bus.lock();
        state.check(Fault::QueryClient)?;
        let next = state
            .clients
            .iter()
            .find(|(id, _)| i32::from(**id) > prev)
            .map(|(id, client)| BusState::client_info(*id, client));
        Ok(next)
    }

    fn next_port(&self, client: u8, prev: i32) -> DriverResult<Option<PortInfo>> {
        let mut state = self.bus.lock();
        state.check(Fault::QueryPort)?;
        // A client that left mid-walk simply has no more ports.
        let Some(owner) = state.clients.get(&client) else {
            return Ok(None);
        };
        let next = owner
            .ports
            .iter()
            .find(|(id, _)| i32::from(**id) > prev)
            .map(|(id, port)| BusState::port_info(Address::new(client, *id), port));
        Ok(next)
    }

    fn query_subscribers(
        &self,
        root: Address,
        kind: SubsKind,
        index: u32,
    ) -> DriverResult<Option<Subscriber>> {
        let mut state = self.bus.lock();
        state.check(Fault::QuerySubscribers)?;
        if state.port(root).is_none() {
            return Ok(None);
        }
        let found = state
            .subscriptions
            .iter()
            .filter_map(|s| match kind {
                SubsKind::Read if s.sender == root => Some((s, s.dest)),
                SubsKind::Write if s.dest == root => Some((s, s.sender)),
                _ => None,
            })
            .nth(index as usize)
            .map(|(s, addr)| Subscriber {
                addr,
                queue: s.queue,
                exclusive: s.exclusive,
                time_update: s.time_update,
                time_real: s.time_real,
            });
        Ok(found)
    }

    fn client_info(&self, client: u8) -> DriverResult<ClientInfo> {
        let mut state = self.bus.lock();
        state.check(Fault::QueryClient)?;
        let info = state
            .clients
            .get(&client)
            .map(|c| BusState::client_info(client, c))
            .ok_or_else(|| errno(libc::ENOENT))?;
        Ok(info)
    }

    fn port_info(&self, addr: Address) -> DriverResult<PortInfo> {
        let mut state = self.bus.lock();
        state.check(Fault::QueryPort)?;
        state
            .port(addr)
            .map(|port| BusState::port_info(addr, port))
            .ok_or_else(|| errno(libc::ENOENT))
    }

    fn subscribe(&mut self, sub: &Subscription) -> DriverResult<()> {
        let mut state = self.bus.lock();
        state.check(Fault::Subscribe)?;
        state.may_subscribe(self.client, sub.sender, PortCaps::SUBS_READ)?;
        state.may_subscribe(self.client, sub.dest, PortCaps::SUBS_WRITE)?;
        if state
            .subscriptions
            .iter()
            .any(|s| s.sender == sub.sender && s.dest == sub.dest)
        {
            return Err(errno(libc::EBUSY));
        }
        state.subscriptions.push(*sub);
        state.announce(
            ev::PORT_SUBSCRIBED,
            Announcement::Connect(Connection {
                sender: sub.sender,
                dest: sub.dest,
            }),
        );
        debug!(sender = %sub.sender, dest = %sub.dest, "loopback subscribed");
        Ok(())
    }

    fn unsubscribe(&mut self, sender: Address, dest: Address) -> DriverResult<()> {
        let mut state = self.bus.lock();
        state.check(Fault::Unsubscribe)?;
        let index = state
            .subscriptions
            .iter()
            .position(|s| s.sender == sender && s.dest == dest)
            .ok_or_else(|| errno(libc::ENOENT))?;
        state.remove_subscription(index);
        Ok(())
    }

    fn subscription(&self, sender: Address, dest: Address) -> DriverResult<Subscription> {
        let mut state = self.bus.lock();
        state.check(Fault::QuerySubscribers)?;
        state
            .subscriptions
            .iter()
            .find(|s| s.sender == sender && s.dest == dest)
            .copied()
            .ok_or_else(|| errno(libc::ENOENT))
    }

    fn alloc_queue(&mut self, name: Option<&str>) -> DriverResult<u8> {
        let mut state = self.bus.lock();
        state.check(Fault::AllocQueue)?;
        let id = (0..MAX_QUEUES)
            .find(|id| !state.queues.contains_key(id))
            .ok_or_else(|| errno(libc::ENOMEM))?;
        state.queues.insert(
            id,
            QueueState {
                owner: self.client,
                name: name.unwrap_or_default().to_string(),
                tempo: DEFAULT_TEMPO,
                ppq: DEFAULT_PPQ,
                running: false,
            },
        );
        Ok(id)
    }

    fn free_queue(&mut self, queue: u8) -> DriverResult<()> {
        let mut state = self.bus.lock();
        state.check(Fault::FreeQueue)?;
        let owner = state.queue_mut(queue)?.owner;
        if owner != self.client {
            return Err(errno(libc::EPERM));
        }
        state.queues.remove(&queue);
        Ok(())
    }

    fn queue_tempo(&self, queue: u8) -> DriverResult<QueueTempo> {
        let mut state = self.bus.lock();
        let q = state.queue_mut(queue)?;
        Ok(QueueTempo {
            tempo: q.tempo,
            ppq: q.ppq,
        })
    }

    fn set_queue_tempo(&mut self, queue: u8, tempo: QueueTempo) -> DriverResult<()> {
        let mut state = self.bus.lock();
        state.check(Fault::SetQueueTempo)?;
        let q = state.queue_mut(queue)?;
        if tempo.ppq <= 0 || tempo.tempo == 0 {
            return Err(errno(libc::EINVAL));
        }
        q.tempo = tempo.tempo;
        q.ppq = tempo.ppq;
        Ok(())
    }

    fn queue_info(&self, queue: u8) -> DriverResult<QueueInfo> {
        let mut state = self.bus.lock();
        let q = state.queue_mut(queue)?;
        Ok(QueueInfo {
            id: queue,
            name: (!q.name.is_empty()).then(|| q.name.clone()),
            tempo: q.tempo,
            ppq: q.ppq,
            running: q.running,
        })
    }

    fn control_queue(&mut self, queue: u8, event_type: u8, value: i32) -> DriverResult<()> {
        let mut state = self.bus.lock();
        state.check(Fault::ControlQueue)?;
        let q = state.queue_mut(queue)?;
        match event_type {
            ev::START | ev::CONTINUE => q.running = true,
            ev::STOP => q.running = false,
            ev::TEMPO if value > 0 => q.tempo = value as u32,
            _ => return Err(errno(libc::EINVAL)),
        }
        trace!(queue, event_type, value, "loopback queue control");
        Ok(())
    }

    fn event_input(&mut self) -> DriverResult<InputOutcome> {
        self.has_input()?;
        loop {
            let reader = {
                let mut state = self.bus.lock();
                state.check(Fault::EventInput)?;
                let inbox = state
                    .clients
                    .get_mut(&self.client)
                    .and_then(|c| c.inbox.as_mut())
                    .ok_or_else(|| errno(libc::ENOENT))?;
                if let Some(record) = inbox.pop() {
                    let (event, _) = wire::decode(&record)
                        .map_err(|e| DriverError::new(-libc::EINVAL, e.to_string()))?;
                    return Ok(InputOutcome::Event {
                        event,
                        remaining: inbox.bytes,
                    });
                }
                if self.nonblock {
                    return Ok(InputOutcome::WouldBlock);
                }
                inbox.reader.as_raw_fd()
            };
            // Blocking handle: wait for the pipe with the bus unlocked.
            poll::wait(&[PollDescriptor::new(reader, libc::POLLIN)], -1)?;
        }
    }

    fn input_pending(&mut self, _fetch: bool) -> DriverResult<usize> {
        self.has_input()?;
        let state = self.bus.lock();
        Ok(state
            .clients
            .get(&self.client)
            .and_then(|c| c.inbox.as_ref())
            .map(|inbox| inbox.bytes)
            .unwrap_or(0))
    }

    fn event_output(&mut self, event: &Event) -> DriverResult<usize> {
        self.has_output()?;
        self.bus.lock().check(Fault::EventOutput)?;
        self.outbox_bytes += wire::encode(event).len();
        self.outbox.push(event.clone());
        Ok(self.outbox_bytes)
    }

    fn drain_output(&mut self) -> DriverResult<usize> {
        self.has_output()?;
        let mut state = self.bus.lock();
        state.check(Fault::Drain)?;
        let mut pending = std::mem::take(&mut self.outbox).into_iter();
        while let Some(event) = pending.next() {
            if let Err(e) = state.route(self.client, event) {
                // The failed event is gone; the rest stay buffered.
                self.outbox = pending.collect();
                self.outbox_bytes = self.outbox.iter().map(|e| wire::encode(e).len()).sum();
                return Err(e);
            }
        }
        self.outbox_bytes = 0;
        Ok(0)
    }

    fn sync_output_queue(&mut self) -> DriverResult<()> {
        self.bus.lock().check(Fault::Sync)
    }

    fn poll_descriptors(&self, interest: Interest) -> DriverResult<Vec<PollDescriptor>> {
        let state = self.bus.lock();
        let inbox = state
            .clients
            .get(&self.client)
            .and_then(|c| c.inbox.as_ref())
            .ok_or_else(|| errno(libc::ENOENT))?;
        let mut descriptors = Vec::new();
        if interest.input() && self.streams & streams::INPUT != 0 {
            descriptors.push(PollDescriptor::new(inbox.reader.as_raw_fd(), libc::POLLIN));
        }
        if interest.output() && self.streams & streams::OUTPUT != 0 {
            descriptors.push(PollDescriptor::new(inbox.writer.as_raw_fd(), libc::POLLOUT));
        }
        Ok(descriptors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readable() -> PortCaps {
        PortCaps::READ | PortCaps::SUBS_READ
    }

    fn writable() -> PortCaps {
        PortCaps::WRITE | PortCaps::SUBS_WRITE
    }

    fn next_event(driver: &mut LoopbackDriver) -> Option<Event> {
        match driver.event_input().unwrap() {
            InputOutcome::Event { event, .. } => Some(event),
            InputOutcome::WouldBlock => None,
        }
    }

    #[test]
    fn test_bus_starts_with_system_clients() {
        let bus = LoopbackBus::new();
        assert_eq!(bus.client_ids(), vec![0, 14]);

        let driver = bus.attach("viewer").unwrap();
        assert_eq!(driver.client_id(), 128);
        let system = driver.client_info(0).unwrap();
        assert_eq!(system.client_type, ClientType::Kernel);
        assert_eq!(system.num_ports, 2);
        let announce = driver.port_info(Address::SYSTEM_ANNOUNCE).unwrap();
        assert_eq!(announce.name, "Announce");
    }

    #[test]
    fn test_client_ids_are_reused_after_drop() {
        let bus = LoopbackBus::new();
        let a = bus.attach("a").unwrap();
        let b = bus.attach("b").unwrap();
        assert_eq!((a.client_id(), b.client_id()), (128, 129));
        drop(a);
        let c = bus.attach("c").unwrap();
        assert_eq!(c.client_id(), 128);
    }

    #[test]
    fn test_walk_past_departed_client_ends_quietly() {
        let bus = LoopbackBus::new();
        let viewer = bus.attach("viewer").unwrap();
        let mut gone = bus.attach("gone").unwrap();
        let port = gone.create_port("out", readable(), PortTypes::APPLICATION).unwrap();
        let id = gone.client_id();
        drop(gone);

        assert!(viewer.next_port(id, -1).unwrap().is_none());
        let root = Address::new(id, port);
        assert!(viewer.query_subscribers(root, SubsKind::Read, 0).unwrap().is_none());
        assert!(viewer.query_subscribers(root, SubsKind::Write, 0).unwrap().is_none());
        assert_eq!(viewer.port_info(root).unwrap_err().code, -libc::ENOENT);
    }

    #[test]
    fn test_subscribe_routes_to_subscriber() {
        let bus = LoopbackBus::new();
        let mut src = bus.attach("src").unwrap();
        let mut dst = bus.attach("dst").unwrap();
        let out = src.create_port("out", readable(), PortTypes::APPLICATION).unwrap();
        let input = dst.create_port("in", writable(), PortTypes::APPLICATION).unwrap();

        let sender = Address::new(src.client_id(), out);
        let dest = Address::new(dst.client_id(), input);
        src.subscribe(&Subscription::new(sender, dest)).unwrap();

        let mut note = Event::note_on(0, 60, 100);
        note.set_source(Address::new(0, out));
        src.event_output(&note).unwrap();
        assert_eq!(src.drain_output().unwrap(), 0);

        let got = next_event(&mut dst).unwrap();
        assert_eq!(got.source(), sender);
        assert_eq!(got.dest(), dest);
        assert_eq!(got.note().unwrap().note, 60);
        assert!(next_event(&mut dst).is_none());
    }

    #[test]
    fn test_duplicate_subscription_is_busy() {
        let bus = LoopbackBus::new();
        let mut a = bus.attach("a").unwrap();
        let port = a.create_port("p", readable() | writable(), PortTypes::empty()).unwrap();
        let addr = Address::new(a.client_id(), port);
        let through = Address::new(MIDI_THROUGH, 0);

        a.subscribe(&Subscription::new(addr, through)).unwrap();
        let err = a.subscribe(&Subscription::new(addr, through)).unwrap_err();
        assert_eq!(err.code, -libc::EBUSY);
    }

    #[test]
    fn test_subscribe_checks_permissions() {
        let bus = LoopbackBus::new();
        let mut a = bus.attach("a").unwrap();
        let mut b = bus.attach("b").unwrap();
        let hidden = a.create_port("hidden", readable() | PortCaps::NO_EXPORT, PortTypes::empty()).unwrap();
        let input = b.create_port("in", writable(), PortTypes::empty()).unwrap();

        let sender = Address::new(a.client_id(), hidden);
        let dest = Address::new(b.client_id(), input);
        let err = b.subscribe(&Subscription::new(sender, dest)).unwrap_err();
        assert_eq!(err.code, -libc::EPERM);

        // The owner may still wire its own hidden port.
        a.subscribe(&Subscription::new(sender, dest)).unwrap();

        let missing = Address::new(a.client_id(), 9);
        let err = b.subscribe(&Subscription::new(missing, dest)).unwrap_err();
        assert_eq!(err.code, -libc::EINVAL);
    }

    #[test]
    fn test_announcements_reach_announce_subscribers() {
        let bus = LoopbackBus::new();
        let mut watcher = bus.attach("watcher").unwrap();
        let port = watcher.create_port("events", writable(), PortTypes::empty()).unwrap();
        watcher
            .subscribe(&Subscription::new(
                Address::SYSTEM_ANNOUNCE,
                Address::new(watcher.client_id(), port),
            ))
            .unwrap();

        let mut other = bus.attach("other").unwrap();
        let other_id = other.client_id();
        other.create_port("p", readable(), PortTypes::empty()).unwrap();
        drop(other);

        let types: Vec<u8> = std::iter::from_fn(|| next_event(&mut watcher))
            .map(|e| e.event_type())
            .collect();
        assert_eq!(
            types,
            vec![
                ev::PORT_SUBSCRIBED,
                ev::CLIENT_START,
                ev::PORT_START,
                ev::CLIENT_EXIT
            ]
        );
        assert!(!bus.client_ids().contains(&other_id));
    }

    #[test]
    fn test_direct_send_to_missing_port_fails_at_drain() {
        let bus = LoopbackBus::new();
        let mut a = bus.attach("a").unwrap();
        let mut note = Event::note_on(0, 60, 1);
        note.set_dest(Address::new(200, 0));
        a.event_output(&note).unwrap();
        assert_eq!(a.drain_output().unwrap_err().code, -libc::ENOENT);
    }

    #[test]
    fn test_fail_next_hits_once() {
        let bus = LoopbackBus::new();
        let mut a = bus.attach("a").unwrap();
        bus.fail_next(Fault::CreatePort, libc::ENOMEM);
        let err = a.create_port("p", readable(), PortTypes::empty()).unwrap_err();
        assert_eq!(err.code, -libc::ENOMEM);
        assert_eq!(a.create_port("p", readable(), PortTypes::empty()).unwrap(), 0);
    }

    #[test]
    fn test_queue_lifecycle() {
        let bus = LoopbackBus::new();
        let mut a = bus.attach("a").unwrap();
        let mut b = bus.attach("b").unwrap();
        let q = a.alloc_queue(Some("clock")).unwrap();
        assert_eq!(q, 0);
        assert_eq!(b.alloc_queue(None).unwrap(), 1);

        let info = a.queue_info(q).unwrap();
        assert_eq!(info.name.as_deref(), Some("clock"));
        assert_eq!((info.tempo, info.ppq, info.running), (DEFAULT_TEMPO, DEFAULT_PPQ, false));

        a.control_queue(q, ev::START, 0).unwrap();
        assert!(a.queue_info(q).unwrap().running);
        a.control_queue(q, ev::STOP, 0).unwrap();
        assert!(!a.queue_info(q).unwrap().running);
        assert_eq!(a.control_queue(q, ev::NOTEON, 0).unwrap_err().code, -libc::EINVAL);

        assert_eq!(b.free_queue(q).unwrap_err().code, -libc::EPERM);
        a.free_queue(q).unwrap();
        assert_eq!(a.queue_info(q).unwrap_err().code, -libc::EINVAL);
    }

    #[test]
    fn test_inbox_pipe_tracks_readiness() {
        let bus = LoopbackBus::new();
        let mut a = bus.attach("a").unwrap();
        let descriptors = a.poll_descriptors(Interest::Input).unwrap();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(poll::wait(&descriptors, 0).unwrap(), 0);

        bus.inject(Address::new(a.client_id(), 0), &Event::note_on(0, 1, 1)).unwrap();
        assert_eq!(poll::wait(&descriptors, 0).unwrap(), 1);
        assert_eq!(a.input_pending(true).unwrap(), wire::RAW_EVENT_SIZE);

        assert!(next_event(&mut a).is_some());
        assert_eq!(poll::wait(&descriptors, 0).unwrap(), 0);
        assert_eq!(a.input_pending(false).unwrap(), 0);
    }

    #[test]
    fn test_through_port_echoes_to_subscribers() {
        let bus = LoopbackBus::new();
        let mut a = bus.attach("a").unwrap();
        let port = a.create_port("in", writable(), PortTypes::empty()).unwrap();
        let through = Address::new(MIDI_THROUGH, 0);
        a.subscribe(&Subscription::new(through, Address::new(a.client_id(), port)))
            .unwrap();

        let mut note = Event::note_on(0, 64, 90);
        note.set_dest(through);
        a.event_output(&note).unwrap();
        a.drain_output().unwrap();

        let echoed = next_event(&mut a).unwrap();
        assert_eq!(echoed.source(), through);
        assert_eq!(echoed.note().unwrap().velocity, 90);
    }
}
