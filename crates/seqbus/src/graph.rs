//! Clients, ports, queues and subscriptions as seen through queries.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::codes::{client_type, query_subs};
use crate::constants::{Category, Constant};
use crate::driver::SeqDriver;
use crate::error::{DriverError, DriverResult, Result, SeqError};

bitflags! {
    /// What a port allows (`SND_SEQ_PORT_CAP_*`).
    #[derive(Default)]
    pub struct PortCaps: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const SYNC_READ = 1 << 2;
        const SYNC_WRITE = 1 << 3;
        const DUPLEX = 1 << 4;
        const SUBS_READ = 1 << 5;
        const SUBS_WRITE = 1 << 6;
        const NO_EXPORT = 1 << 7;
    }
}

impl PortCaps {
    pub(crate) const NAMED: &'static [(&'static str, PortCaps)] = &[
        ("SEQ_PORT_CAP_READ", PortCaps::READ),
        ("SEQ_PORT_CAP_WRITE", PortCaps::WRITE),
        ("SEQ_PORT_CAP_SYNC_READ", PortCaps::SYNC_READ),
        ("SEQ_PORT_CAP_SYNC_WRITE", PortCaps::SYNC_WRITE),
        ("SEQ_PORT_CAP_DUPLEX", PortCaps::DUPLEX),
        ("SEQ_PORT_CAP_SUBS_READ", PortCaps::SUBS_READ),
        ("SEQ_PORT_CAP_SUBS_WRITE", PortCaps::SUBS_WRITE),
        ("SEQ_PORT_CAP_NO_EXPORT", PortCaps::NO_EXPORT),
    ];

    /// Others can read from this port and subscribe to it.
    pub fn is_readable(&self) -> bool {
        self.contains(PortCaps::READ | PortCaps::SUBS_READ)
    }

    /// Others can write to this port and subscribe to it.
    pub fn is_writable(&self) -> bool {
        self.contains(PortCaps::WRITE | PortCaps::SUBS_WRITE)
    }

    pub fn constant(&self) -> Constant {
        Constant::resolve(Category::PortCap, self.bits() as i64)
    }
}

bitflags! {
    /// What a port is (`SND_SEQ_PORT_TYPE_*`).
    #[derive(Default)]
    pub struct PortTypes: u32 {
        const SPECIFIC = 1 << 0;
        const MIDI_GENERIC = 1 << 1;
        const MIDI_GM = 1 << 2;
        const MIDI_GS = 1 << 3;
        const MIDI_XG = 1 << 4;
        const MIDI_MT32 = 1 << 5;
        const MIDI_GM2 = 1 << 6;
        const SYNTH = 1 << 10;
        const DIRECT_SAMPLE = 1 << 11;
        const SAMPLE = 1 << 12;
        const HARDWARE = 1 << 16;
        const SOFTWARE = 1 << 17;
        const SYNTHESIZER = 1 << 18;
        const PORT = 1 << 19;
        const APPLICATION = 1 << 20;
    }
}

impl PortTypes {
    pub(crate) const NAMED: &'static [(&'static str, PortTypes)] = &[
        ("SEQ_PORT_TYPE_SPECIFIC", PortTypes::SPECIFIC),
        ("SEQ_PORT_TYPE_MIDI_GENERIC", PortTypes::MIDI_GENERIC),
        ("SEQ_PORT_TYPE_MIDI_GM", PortTypes::MIDI_GM),
        ("SEQ_PORT_TYPE_MIDI_GS", PortTypes::MIDI_GS),
        ("SEQ_PORT_TYPE_MIDI_XG", PortTypes::MIDI_XG),
        ("SEQ_PORT_TYPE_MIDI_MT32", PortTypes::MIDI_MT32),
        ("SEQ_PORT_TYPE_MIDI_GM2", PortTypes::MIDI_GM2),
        ("SEQ_PORT_TYPE_SYNTH", PortTypes::SYNTH),
        ("SEQ_PORT_TYPE_DIRECT_SAMPLE", PortTypes::DIRECT_SAMPLE),
        ("SEQ_PORT_TYPE_SAMPLE", PortTypes::SAMPLE),
        ("SEQ_PORT_TYPE_HARDWARE", PortTypes::HARDWARE),
        ("SEQ_PORT_TYPE_SOFTWARE", PortTypes::SOFTWARE),
        ("SEQ_PORT_TYPE_SYNTHESIZER", PortTypes::SYNTHESIZER),
        ("SEQ_PORT_TYPE_PORT", PortTypes::PORT),
        ("SEQ_PORT_TYPE_APPLICATION", PortTypes::APPLICATION),
    ];

    pub fn constant(&self) -> Constant {
        Constant::resolve(Category::PortType, self.bits() as i64)
    }
}

// bitflags 1.x has no serde support; both sets travel as their raw bits
macro_rules! serde_as_bits {
    ($t:ty) => {
        impl Serialize for $t {
            fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
                s.serialize_u32(self.bits())
            }
        }

        impl<'de> Deserialize<'de> for $t {
            fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
                Ok(<$t>::from_bits_truncate(u32::deserialize(d)?))
            }
        }
    };
}

serde_as_bits!(PortCaps);
serde_as_bits!(PortTypes);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    User,
    Kernel,
}

impl ClientType {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            client_type::USER => Some(ClientType::User),
            client_type::KERNEL => Some(ClientType::Kernel),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            ClientType::User => client_type::USER,
            ClientType::Kernel => client_type::KERNEL,
        }
    }

    pub fn constant(self) -> Constant {
        Constant::resolve(Category::ClientType, self.code() as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: u8,
    pub name: String,
    pub client_type: ClientType,
    pub broadcast_filter: bool,
    pub error_bounce: bool,
    /// One bit per event type the client accepts; all zero means no filter.
    pub event_filter: [u8; 32],
    pub num_ports: u32,
    pub event_lost: u32,
}

impl ClientInfo {
    pub fn accepts(&self, event_type: u8) -> bool {
        self.event_filter.iter().all(|b| *b == 0)
            || self.event_filter[(event_type / 8) as usize] & (1 << (event_type % 8)) != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub addr: Address,
    pub name: String,
    pub capability: PortCaps,
    pub port_type: PortTypes,
}

/// Subscription parameters, keyed by `(sender, dest)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub sender: Address,
    pub dest: Address,
    pub queue: u8,
    pub exclusive: bool,
    pub time_update: bool,
    pub time_real: bool,
}

impl Subscription {
    pub fn new(sender: Address, dest: Address) -> Self {
        Self {
            sender,
            dest,
            queue: 0,
            exclusive: false,
            time_update: false,
            time_real: false,
        }
    }
}

/// Direction of a subscriber query relative to the port being asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubsKind {
    /// Ports reading from the root (root is the sender)
    Read,
    /// Ports writing to the root (root is the destination)
    Write,
}

impl SubsKind {
    pub fn code(self) -> i32 {
        match self {
            SubsKind::Read => query_subs::READ,
            SubsKind::Write => query_subs::WRITE,
        }
    }
}

/// One entry of a subscriber query: the other end plus the edge's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub addr: Address,
    pub queue: u8,
    pub exclusive: bool,
    pub time_update: bool,
    pub time_real: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTempo {
    /// Microseconds per quarter note.
    pub tempo: u32,
    /// Ticks per quarter note.
    pub ppq: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub id: u8,
    pub name: Option<String>,
    pub tempo: u32,
    pub ppq: i32,
    pub running: bool,
}

impl QueueInfo {
    pub fn id_constant(&self) -> Constant {
        Constant::resolve(Category::Queue, self.id as i64)
    }
}

/// Snapshot of one port: its subscribers in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortNode {
    pub id: u8,
    pub name: String,
    /// Ports this one feeds (read subscriptions rooted here)
    pub read_subscribers: Vec<Subscriber>,
    /// Ports feeding this one (write subscriptions rooted here)
    pub write_subscribers: Vec<Subscriber>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientNode {
    pub id: u8,
    pub name: String,
    pub ports: Vec<PortNode>,
}

/// A walk over the live bus. Not atomic: the bus may change while it runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionGraph {
    pub clients: Vec<ClientNode>,
}

impl ConnectionGraph {
    pub fn client(&self, id: u8) -> Option<&ClientNode> {
        self.clients.iter().find(|c| c.id == id)
    }

    pub fn port(&self, addr: Address) -> Option<&PortNode> {
        self.client(addr.client)?
            .ports
            .iter()
            .find(|p| p.id == addr.port)
    }

    /// Every edge, each reported once from its sender's side.
    pub fn edges(&self) -> Vec<Subscription> {
        let mut edges = Vec::new();
        for client in &self.clients {
            for port in &client.ports {
                let sender = Address::new(client.id, port.id);
                for sub in &port.read_subscribers {
                    edges.push(Subscription {
                        sender,
                        dest: sub.addr,
                        queue: sub.queue,
                        exclusive: sub.exclusive,
                        time_update: sub.time_update,
                        time_real: sub.time_real,
                    });
                }
            }
        }
        edges
    }
}

/// Lazy walk over clients, driven by the driver's next-client cursor.
pub struct ClientCursor<'a, D: SeqDriver + ?Sized> {
    driver: &'a D,
    last: i32,
    done: bool,
}

impl<'a, D: SeqDriver + ?Sized> ClientCursor<'a, D> {
    pub fn new(driver: &'a D) -> Self {
        Self {
            driver,
            last: -1,
            done: false,
        }
    }
}

impl<D: SeqDriver + ?Sized> Iterator for ClientCursor<'_, D> {
    type Item = DriverResult<ClientInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.driver.next_client(self.last) {
            Ok(Some(info)) => {
                self.last = info.id as i32;
                Some(Ok(info))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Lazy walk over one client's ports.
pub struct PortCursor<'a, D: SeqDriver + ?Sized> {
    driver: &'a D,
    client: u8,
    last: i32,
    done: bool,
}

impl<'a, D: SeqDriver + ?Sized> PortCursor<'a, D> {
    pub fn new(driver: &'a D, client: u8) -> Self {
        Self {
            driver,
            client,
            last: -1,
            done: false,
        }
    }
}

impl<D: SeqDriver + ?Sized> Iterator for PortCursor<'_, D> {
    type Item = DriverResult<PortInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.driver.next_port(self.client, self.last) {
            Ok(Some(info)) => {
                self.last = info.addr.port as i32;
                Some(Ok(info))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Indexed subscriber query: ask for index 0, 1, ... until the driver has
/// no more.
pub struct SubscriberCursor<'a, D: SeqDriver + ?Sized> {
    driver: &'a D,
    root: Address,
    kind: SubsKind,
    index: u32,
    done: bool,
}

impl<'a, D: SeqDriver + ?Sized> SubscriberCursor<'a, D> {
    pub fn new(driver: &'a D, root: Address, kind: SubsKind) -> Self {
        Self {
            driver,
            root,
            kind,
            index: 0,
            done: false,
        }
    }
}

impl<D: SeqDriver + ?Sized> Iterator for SubscriberCursor<'_, D> {
    type Item = DriverResult<Subscriber>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.driver.query_subscribers(self.root, self.kind, self.index) {
            Ok(Some(sub)) => {
                self.index += 1;
                Some(Ok(sub))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn query_err(what: String) -> impl FnOnce(DriverError) -> SeqError {
    move |source| SeqError::Query { what, source }
}

/// Walk clients, then each client's ports, then each port's read and write
/// subscribers, keeping the driver's enumeration order.
pub fn walk<D: SeqDriver + ?Sized>(driver: &D) -> Result<ConnectionGraph> {
    let mut clients = Vec::new();
    for client in ClientCursor::new(driver) {
        let client = client.map_err(query_err("clients".to_string()))?;

        let mut ports = Vec::new();
        for port in PortCursor::new(driver, client.id) {
            let port = port.map_err(query_err(format!("ports of client {}", client.id)))?;
            let root = port.addr;

            let read_subscribers = SubscriberCursor::new(driver, root, SubsKind::Read)
                .collect::<DriverResult<Vec<_>>>()
                .map_err(query_err(format!("read subscribers of {}", root)))?;
            let write_subscribers = SubscriberCursor::new(driver, root, SubsKind::Write)
                .collect::<DriverResult<Vec<_>>>()
                .map_err(query_err(format!("write subscribers of {}", root)))?;

            ports.push(PortNode {
                id: root.port,
                name: port.name,
                read_subscribers,
                write_subscribers,
            });
        }

        clients.push(ClientNode {
            id: client.id,
            name: client.name,
            ports,
        });
    }

    Ok(ConnectionGraph { clients })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_caps_helpers() {
        let caps = PortCaps::READ | PortCaps::SUBS_READ;
        assert!(caps.is_readable());
        assert!(!caps.is_writable());
        assert_eq!(caps.bits(), 0x21);
        assert_eq!(PortCaps::NO_EXPORT.constant().name(), Some("SEQ_PORT_CAP_NO_EXPORT"));
        assert!(!caps.constant().is_named());
    }

    #[test]
    fn test_port_types_constants() {
        assert_eq!(
            PortTypes::APPLICATION.constant().name(),
            Some("SEQ_PORT_TYPE_APPLICATION")
        );
        assert_eq!(PortTypes::MIDI_GENERIC.bits(), 2);
    }

    #[test]
    fn test_client_event_filter() {
        let mut info = ClientInfo {
            id: 130,
            name: "filter".to_string(),
            client_type: ClientType::User,
            broadcast_filter: false,
            error_bounce: false,
            event_filter: [0; 32],
            num_ports: 0,
            event_lost: 0,
        };
        assert!(info.accepts(6));
        info.event_filter[0] = 1 << 6;
        assert!(info.accepts(6));
        assert!(!info.accepts(7));
    }

    #[test]
    fn test_graph_edges_and_json() {
        let sub = Subscriber {
            addr: Address::new(130, 0),
            queue: 1,
            exclusive: false,
            time_update: true,
            time_real: false,
        };
        let graph = ConnectionGraph {
            clients: vec![ClientNode {
                id: 129,
                name: "src".to_string(),
                ports: vec![PortNode {
                    id: 0,
                    name: "out".to_string(),
                    read_subscribers: vec![sub],
                    write_subscribers: vec![],
                }],
            }],
        };

        let edges = graph.edges();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].sender, Address::new(129, 0));
        assert_eq!(edges[0].dest, Address::new(130, 0));
        assert!(edges[0].time_update);

        let json = serde_json::to_string(&graph).unwrap();
        let back: ConnectionGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(back, graph);
        assert!(graph.port(Address::new(129, 0)).is_some());
        assert!(graph.port(Address::new(129, 1)).is_none());
    }
}
