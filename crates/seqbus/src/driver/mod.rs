//! The boundary between the engine and whatever implements the bus.
//!
//! Every method mirrors one driver call and reports faults as a
//! [`DriverError`] carrying the negative errno. The engine maps those onto
//! its own error kinds; drivers never decide what a failure means.

#[cfg(feature = "alsa-backend")]
pub mod alsa;
pub mod loopback;

use crate::address::Address;
use crate::event::Event;
use crate::graph::{
    ClientInfo, PortCaps, PortInfo, PortTypes, QueueInfo, QueueTempo, Subscriber, Subscription,
    SubsKind,
};
use crate::poll::{self, Interest, PollDescriptor};
use crate::error::{DriverError, DriverResult};

#[cfg(feature = "alsa-backend")]
pub use self::alsa::AlsaDriver;
pub use loopback::{Fault, LoopbackBus, LoopbackDriver};

/// Result of pulling one event from the input buffer.
#[derive(Debug)]
pub enum InputOutcome {
    /// An event, plus the bytes still buffered after it.
    Event { event: Event, remaining: usize },
    /// Nothing complete is buffered and the handle is non-blocking.
    WouldBlock,
}

/// Parameters for opening a sequencer handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenParams {
    pub device: String,
    pub client_name: String,
    pub streams: i32,
    pub nonblock: bool,
}

pub trait SeqDriver: Send {
    /// Our own client id.
    fn client_id(&self) -> u8;

    fn set_client_name(&mut self, name: &str) -> DriverResult<()>;

    fn set_nonblock(&mut self, nonblock: bool) -> DriverResult<()>;

    /// Create a port on our client and return its id.
    fn create_port(&mut self, name: &str, caps: PortCaps, types: PortTypes) -> DriverResult<u8>;

    fn delete_port(&mut self, port: u8) -> DriverResult<()>;

    /// The client after `prev` (`-1` starts the walk), or `None` at the end.
    fn next_client(&self, prev: i32) -> DriverResult<Option<ClientInfo>>;

    /// The port of `client` after `prev` (`-1` starts the walk).
    fn next_port(&self, client: u8, prev: i32) -> DriverResult<Option<PortInfo>>;

    /// Subscriber number `index` of `root`, or `None` past the last one.
    fn query_subscribers(
        &self,
        root: Address,
        kind: SubsKind,
        index: u32,
    ) -> DriverResult<Option<Subscriber>>;

    fn client_info(&self, client: u8) -> DriverResult<ClientInfo>;

    fn port_info(&self, addr: Address) -> DriverResult<PortInfo>;

    fn subscribe(&mut self, sub: &Subscription) -> DriverResult<()>;

    fn unsubscribe(&mut self, sender: Address, dest: Address) -> DriverResult<()>;

    fn subscription(&self, sender: Address, dest: Address) -> DriverResult<Subscription>;

    fn alloc_queue(&mut self, name: Option<&str>) -> DriverResult<u8>;

    fn free_queue(&mut self, queue: u8) -> DriverResult<()>;

    fn queue_tempo(&self, queue: u8) -> DriverResult<QueueTempo>;

    fn set_queue_tempo(&mut self, queue: u8, tempo: QueueTempo) -> DriverResult<()>;

    fn queue_info(&self, queue: u8) -> DriverResult<QueueInfo>;

    /// Send a queue control event (start, stop, continue, ...) and flush it.
    fn control_queue(&mut self, queue: u8, event_type: u8, value: i32) -> DriverResult<()>;

    /// Pull one event from the input buffer.
    fn event_input(&mut self) -> DriverResult<InputOutcome>;

    /// Bytes of input buffered; with `fetch`, first pull from the kernel
    /// if the buffer is empty.
    fn input_pending(&mut self, fetch: bool) -> DriverResult<usize>;

    /// Queue an event on the output buffer. Returns the bytes buffered.
    fn event_output(&mut self, event: &Event) -> DriverResult<usize>;

    /// Flush the output buffer. Returns the bytes still buffered.
    fn drain_output(&mut self) -> DriverResult<usize>;

    /// Wait until drained events have been processed.
    fn sync_output_queue(&mut self) -> DriverResult<()>;

    fn poll_descriptors(&self, interest: Interest) -> DriverResult<Vec<PollDescriptor>>;

    /// Block until input is readable or `timeout_ms` passes (negative waits
    /// forever). Returns whether input became ready.
    fn wait_input(&mut self, timeout_ms: i32) -> DriverResult<bool> {
        let descriptors = self.poll_descriptors(Interest::Input)?;
        if descriptors.is_empty() {
            return Err(DriverError::from_errno(-libc::EINVAL));
        }
        Ok(poll::wait(&descriptors, timeout_ms)? > 0)
    }
}

impl<T: SeqDriver + ?Sized> SeqDriver for Box<T> {
    fn client_id(&self) -> u8 {
        (**self).client_id()
    }
    fn set_client_name(&mut self, name: &str) -> DriverResult<()> {
        (**self).set_client_name(name)
    }
    fn set_nonblock(&mut self, nonblock: bool) -> DriverResult<()> {
        (**self).set_nonblock(nonblock)
    }
    fn create_port(&mut self, name: &str, caps: PortCaps, types: PortTypes) -> DriverResult<u8> {
        (**self).create_port(name, caps, types)
    }
    fn delete_port(&mut self, port: u8) -> DriverResult<()> {
        (**self).delete_port(port)
    }
    fn next_client(&self, prev: i32) -> DriverResult<Option<ClientInfo>> {
        (**self).next_client(prev)
    }
    fn next_port(&self, client: u8, prev: i32) -> DriverResult<Option<PortInfo>> {
        (**self).next_port(client, prev)
    }
    fn query_subscribers(
        &self,
        root: Address,
        kind: SubsKind,
        index: u32,
    ) -> DriverResult<Option<Subscriber>> {
        (**self).query_subscribers(root, kind, index)
    }
    fn client_info(&self, client: u8) -> DriverResult<ClientInfo> {
        (**self).client_info(client)
    }
    fn port_info(&self, addr: Address) -> DriverResult<PortInfo> {
        (**self).port_info(addr)
    }
    fn subscribe(&mut self, sub: &Subscription) -> DriverResult<()> {
        (**self).subscribe(sub)
    }
    fn unsubscribe(&mut self, sender: Address, dest: Address) -> DriverResult<()> {
        (**self).unsubscribe(sender, dest)
    }
    fn subscription(&self, sender: Address, dest: Address) -> DriverResult<Subscription> {
        (**self).subscription(sender, dest)
    }
    fn alloc_queue(&mut self, name: Option<&str>) -> DriverResult<u8> {
        (**self).alloc_queue(name)
    }
    fn free_queue(&mut self, queue: u8) -> DriverResult<()> {
        (**self).free_queue(queue)
    }
    fn queue_tempo(&self, queue: u8) -> DriverResult<QueueTempo> {
        (**self).queue_tempo(queue)
    }
    fn set_queue_tempo(&mut self, queue: u8, tempo: QueueTempo) -> DriverResult<()> {
        (**self).set_queue_tempo(queue, tempo)
    }
    fn queue_info(&self, queue: u8) -> DriverResult<QueueInfo> {
        (**self).queue_info(queue)
    }
    fn control_queue(&mut self, queue: u8, event_type: u8, value: i32) -> DriverResult<()> {
        (**self).control_queue(queue, event_type, value)
    }
    fn event_input(&mut self) -> DriverResult<InputOutcome> {
        (**self).event_input()
    }
    fn input_pending(&mut self, fetch: bool) -> DriverResult<usize> {
        (**self).input_pending(fetch)
    }
    fn event_output(&mut self, event: &Event) -> DriverResult<usize> {
        (**self).event_output(event)
    }
    fn drain_output(&mut self) -> DriverResult<usize> {
        (**self).drain_output()
    }
    fn sync_output_queue(&mut self) -> DriverResult<()> {
        (**self).sync_output_queue()
    }
    fn poll_descriptors(&self, interest: Interest) -> DriverResult<Vec<PollDescriptor>> {
        (**self).poll_descriptors(interest)
    }
    fn wait_input(&mut self, timeout_ms: i32) -> DriverResult<bool> {
        (**self).wait_input(timeout_ms)
    }
}
