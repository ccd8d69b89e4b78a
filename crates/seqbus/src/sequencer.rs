//! The client engine: one bus handle plus everything done through it.
//!
//! A [`Sequencer`] owns its driver exclusively. Ports and queues it creates
//! belong to it; subscriptions are the only thing shared with other clients
//! and are changed only through [`Sequencer::connect_ports`] and
//! [`Sequencer::disconnect_ports`].

use seqconf::{BlockMode, ConnectionConfig, Streams};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::address::{self, Address};
use crate::codes::{event_type as ev, mode};
use crate::driver::{LoopbackBus, OpenParams, SeqDriver};
use crate::error::{DriverError, Result, SeqError};
use crate::graph::{
    self, ClientCursor, ClientInfo, ConnectionGraph, PortCaps, PortCursor, PortInfo, PortTypes,
    QueueInfo, QueueTempo, Subscription,
};

/// Which ports [`Sequencer::list_ports`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortFilter {
    /// Ports others can subscribe to as a source
    Readable,
    /// Ports others can subscribe to as a destination
    Writable,
    All,
}

impl PortFilter {
    fn admits(self, caps: PortCaps) -> bool {
        if caps.contains(PortCaps::NO_EXPORT) {
            return false;
        }
        match self {
            PortFilter::Readable => caps.is_readable(),
            PortFilter::Writable => caps.is_writable(),
            PortFilter::All => true,
        }
    }
}

pub struct Sequencer {
    pub(crate) driver: Box<dyn SeqDriver>,
    device: String,
    client_name: String,
    streams: Streams,
    mode: BlockMode,
    pub(crate) receive_max_events: usize,
    /// Input bytes the driver reported as still buffered after the last read.
    pub(crate) remaining: usize,
}

fn open_params(config: &ConnectionConfig) -> OpenParams {
    OpenParams {
        device: config.device.clone(),
        client_name: config.client_name.clone(),
        streams: config.streams.code(),
        nonblock: config.mode.is_nonblocking(),
    }
}

impl Sequencer {
    /// Open the kernel sequencer described by `config`.
    #[cfg(feature = "alsa-backend")]
    pub fn open(config: &ConnectionConfig) -> Result<Self> {
        let driver = crate::driver::AlsaDriver::open(&open_params(config)).map_err(|source| {
            SeqError::Open {
                device: config.device.clone(),
                source,
            }
        })?;
        Ok(Self::with_driver(driver, config))
    }

    /// Join an in-memory bus as a new client.
    pub fn attach(bus: &LoopbackBus, config: &ConnectionConfig) -> Result<Self> {
        let driver = bus.open(&open_params(config)).map_err(|source| SeqError::Open {
            device: config.device.clone(),
            source,
        })?;
        Ok(Self::with_driver(driver, config))
    }

    /// Wrap an already-open driver.
    pub fn with_driver(driver: impl SeqDriver + 'static, config: &ConnectionConfig) -> Self {
        info!(
            client = driver.client_id(),
            device = %config.device,
            name = %config.client_name,
            "sequencer client ready"
        );
        Self {
            driver: Box::new(driver),
            device: config.device.clone(),
            client_name: config.client_name.clone(),
            streams: config.streams,
            mode: config.mode,
            receive_max_events: config.receive_max_events.max(1),
            remaining: 0,
        }
    }

    pub fn client_id(&self) -> u8 {
        self.driver.client_id()
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn set_client_name(&mut self, name: &str) -> Result<()> {
        self.driver
            .set_client_name(name)
            .map_err(|source| SeqError::ClientName {
                name: name.to_string(),
                source,
            })?;
        self.client_name = name.to_string();
        Ok(())
    }

    pub fn device_name(&self) -> &str {
        &self.device
    }

    pub fn streams(&self) -> Streams {
        self.streams
    }

    pub fn mode(&self) -> BlockMode {
        self.mode
    }

    /// Switch blocking mode by raw code (0 block, 1 non-block). The stored
    /// mode only changes if the driver accepts it.
    pub fn set_mode(&mut self, code: i32) -> Result<()> {
        let mode = match code {
            mode::BLOCK => BlockMode::Block,
            mode::NONBLOCK => BlockMode::Nonblock,
            other => return Err(SeqError::InvalidMode(other)),
        };
        self.set_block_mode(mode)
    }

    pub fn set_block_mode(&mut self, mode: BlockMode) -> Result<()> {
        self.driver
            .set_nonblock(mode.is_nonblocking())
            .map_err(|source| SeqError::Mode {
                mode: mode.code(),
                source,
            })?;
        debug!(%mode, "sequencer mode changed");
        self.mode = mode;
        Ok(())
    }

    pub fn receive_max_events(&self) -> usize {
        self.receive_max_events
    }

    pub fn set_receive_max_events(&mut self, max: usize) -> Result<()> {
        if max == 0 {
            return Err(SeqError::invalid_value("receive_max_events", max));
        }
        self.receive_max_events = max;
        Ok(())
    }

    /// Direct access to the driver, for calls the engine does not wrap.
    pub fn driver(&self) -> &dyn SeqDriver {
        self.driver.as_ref()
    }

    // --- ports ---

    pub fn create_port(&mut self, name: &str, types: PortTypes, caps: PortCaps) -> Result<u8> {
        let port = self
            .driver
            .create_port(name, caps, types)
            .map_err(|source| SeqError::PortCreate {
                name: name.to_string(),
                source,
            })?;
        debug!(port, name, "created port");
        Ok(port)
    }

    pub fn delete_port(&mut self, port: u8) -> Result<()> {
        self.driver
            .delete_port(port)
            .map_err(|source| SeqError::Port { port, source })
    }

    /// Every exported port matching `filter`, in driver order.
    pub fn list_ports(&self, filter: PortFilter) -> Result<Vec<PortInfo>> {
        let mut ports = Vec::new();
        for client in ClientCursor::new(self.driver.as_ref()) {
            let client = client.map_err(query_err("clients"))?;
            for port in PortCursor::new(self.driver.as_ref(), client.id) {
                let port = port.map_err(query_err(format!("ports of client {}", client.id)))?;
                if filter.admits(port.capability) {
                    ports.push(port);
                }
            }
        }
        Ok(ports)
    }

    // --- connections ---

    pub fn connect_ports(&mut self, subscription: &Subscription) -> Result<()> {
        self.driver
            .subscribe(subscription)
            .map_err(subscription_err("connect", subscription.sender, subscription.dest))?;
        debug!(sender = %subscription.sender, dest = %subscription.dest, "connected");
        Ok(())
    }

    /// Connect with default parameters: queue 0, nothing exclusive, no
    /// timestamping.
    pub fn connect(&mut self, sender: Address, dest: Address) -> Result<()> {
        self.connect_ports(&Subscription::new(sender, dest))
    }

    pub fn disconnect_ports(&mut self, sender: Address, dest: Address) -> Result<()> {
        self.driver
            .unsubscribe(sender, dest)
            .map_err(subscription_err("disconnect", sender, dest))?;
        debug!(%sender, %dest, "disconnected");
        Ok(())
    }

    pub fn get_connection_info(&self, sender: Address, dest: Address) -> Result<Subscription> {
        self.driver
            .subscription(sender, dest)
            .map_err(subscription_err("look up", sender, dest))
    }

    /// Snapshot of every client, port and subscription on the bus.
    pub fn connection_list(&self) -> Result<ConnectionGraph> {
        graph::walk(self.driver.as_ref())
    }

    /// Remove every connection between exported ports. Returns how many
    /// were removed.
    pub fn remove_all_connections(&mut self) -> Result<usize> {
        let snapshot = self.connection_list()?;
        let mut removed = 0;
        for edge in snapshot.edges() {
            if !self.is_exported(edge.sender)? || !self.is_exported(edge.dest)? {
                continue;
            }
            self.disconnect_ports(edge.sender, edge.dest)?;
            removed += 1;
        }
        info!(removed, "removed all connections");
        Ok(removed)
    }

    fn is_exported(&self, addr: Address) -> Result<bool> {
        let port = self.get_port_info(addr.port, Some(addr.client))?;
        Ok(!port.capability.contains(PortCaps::NO_EXPORT))
    }

    /// Client info for `client`, or for ourselves.
    pub fn get_client_info(&self, client: Option<u8>) -> Result<ClientInfo> {
        let client = client.unwrap_or_else(|| self.client_id());
        self.driver
            .client_info(client)
            .map_err(query_err(format!("client {}", client)))
    }

    /// Port info for `port` on `client`, or on ourselves.
    pub fn get_port_info(&self, port: u8, client: Option<u8>) -> Result<PortInfo> {
        let addr = Address::new(client.unwrap_or_else(|| self.client_id()), port);
        self.driver
            .port_info(addr)
            .map_err(query_err(format!("port {}", addr)))
    }

    // --- queues ---

    pub fn create_queue(&mut self, name: Option<&str>) -> Result<u8> {
        let queue = self
            .driver
            .alloc_queue(name)
            .map_err(queue_err("create", -1))?;
        debug!(queue, ?name, "created queue");
        Ok(queue)
    }

    pub fn delete_queue(&mut self, queue: u8) -> Result<()> {
        self.driver
            .free_queue(queue)
            .map_err(queue_err("delete", queue as i32))
    }

    pub fn start_queue(&mut self, queue: u8) -> Result<()> {
        self.driver
            .control_queue(queue, ev::START, 0)
            .map_err(queue_err("start", queue as i32))
    }

    pub fn stop_queue(&mut self, queue: u8) -> Result<()> {
        self.driver
            .control_queue(queue, ev::STOP, 0)
            .map_err(queue_err("stop", queue as i32))
    }

    /// Read a queue's tempo and ppq, first applying both if both are given.
    /// A lone `tempo` or `ppq` is not applied.
    pub fn queue_tempo(
        &mut self,
        queue: u8,
        tempo: Option<u32>,
        ppq: Option<i32>,
    ) -> Result<QueueTempo> {
        let current = self
            .driver
            .queue_tempo(queue)
            .map_err(queue_err("read tempo of", queue as i32))?;

        let (Some(tempo), Some(ppq)) = (tempo, ppq) else {
            if tempo.is_some() || ppq.is_some() {
                debug!(queue, ?tempo, ?ppq, "partial tempo update ignored");
            }
            return Ok(current);
        };

        let wanted = QueueTempo { tempo, ppq };
        self.driver
            .set_queue_tempo(queue, wanted)
            .map_err(queue_err("set tempo of", queue as i32))?;
        Ok(wanted)
    }

    pub fn queue_info(&self, queue: u8) -> Result<QueueInfo> {
        self.driver
            .queue_info(queue)
            .map_err(queue_err("query", queue as i32))
    }

    // --- addresses ---

    /// Parse `client:port` text, resolving client names against the live
    /// client list.
    pub fn parse_address(&self, text: &str) -> Result<Address> {
        let clients = ClientCursor::new(self.driver.as_ref())
            .map(|c| c.map(|info| (info.id, info.name)))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(query_err("clients"))?;
        address::parse(text, clients)
    }
}

fn query_err(what: impl Into<String>) -> impl FnOnce(DriverError) -> SeqError {
    let what = what.into();
    move |source| SeqError::Query { what, source }
}

fn queue_err(op: &'static str, queue: i32) -> impl FnOnce(DriverError) -> SeqError {
    move |source| SeqError::Queue { op, queue, source }
}

fn subscription_err(
    op: &'static str,
    sender: Address,
    dest: Address,
) -> impl FnOnce(DriverError) -> SeqError {
    move |source| SeqError::Subscription {
        op,
        sender,
        dest,
        source,
    }
}
