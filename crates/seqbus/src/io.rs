//! Receiving and sending events through a [`Sequencer`].
//!
//! A receive call moves through three states:
//!
//! ```text
//! Idle -> Waiting(timeout) -> Draining -> Idle
//! Idle -> Draining -> Idle            (input already buffered)
//! ```
//!
//! Waiting is a real poll(2) on the handle's descriptors, bounded by the
//! timeout; it is the only place the engine suspends the calling thread.

use tracing::trace;

use crate::driver::InputOutcome;
use crate::error::{Result, SeqError};
use crate::event::Event;
use crate::poll::{Interest, Reactor};
use crate::sequencer::Sequencer;

impl Sequencer {
    /// Pull up to `max_events` events (default: the configured batch size).
    ///
    /// With nothing buffered, waits up to `timeout_ms` for input (0 does not
    /// wait, negative waits forever); a timeout yields an empty batch. Events
    /// come back in delivery order, each owning its payload.
    pub fn receive_events(&mut self, timeout_ms: i32, max_events: Option<usize>) -> Result<Vec<Event>> {
        let max = max_events.unwrap_or(self.receive_max_events);
        let mut events = Vec::new();
        if max == 0 {
            return Ok(events);
        }

        if self.remaining == 0 {
            let buffered = self.driver.input_pending(false).map_err(SeqError::Receive)?;
            if buffered == 0 {
                trace!(timeout_ms, "receive: waiting");
                let ready = self.driver.wait_input(timeout_ms).map_err(SeqError::Receive)?;
                if !ready {
                    trace!("receive: idle, nothing ready");
                    return Ok(events);
                }
            }
        }

        trace!(max, remaining = self.remaining, "receive: draining");
        while events.len() < max {
            match self.driver.event_input().map_err(SeqError::Receive)? {
                InputOutcome::Event { event, remaining } => {
                    self.remaining = remaining;
                    events.push(event);
                    if remaining == 0 {
                        break;
                    }
                }
                InputOutcome::WouldBlock => {
                    self.remaining = 0;
                    break;
                }
            }
        }
        trace!(count = events.len(), remaining = self.remaining, "receive: idle");
        Ok(events)
    }

    /// Queue `event` on the output buffer. Nothing is sent until a drain.
    /// Returns the bytes now buffered.
    pub fn output_event(&mut self, event: &Event) -> Result<usize> {
        self.driver.event_output(event).map_err(SeqError::Output)
    }

    /// Flush the output buffer. Returns the bytes still buffered.
    pub fn drain_output(&mut self) -> Result<usize> {
        self.driver.drain_output().map_err(SeqError::Drain)
    }

    /// Block until everything drained so far has been processed.
    pub fn sync_output_queue(&mut self) -> Result<()> {
        self.driver.sync_output_queue().map_err(SeqError::Sync)
    }

    /// Output and drain in one step.
    pub fn send_event(&mut self, event: &Event) -> Result<()> {
        self.output_event(event)?;
        self.drain_output()?;
        Ok(())
    }

    /// Input bytes currently buffered on the handle.
    pub fn input_pending(&mut self) -> Result<usize> {
        self.driver.input_pending(false).map_err(SeqError::Receive)
    }

    /// Hand our descriptors to an outside reactor. Asking for neither
    /// direction, or both, registers both. Returns how many were registered.
    pub fn register_poll<R: Reactor + ?Sized>(
        &self,
        reactor: &mut R,
        input: bool,
        output: bool,
    ) -> Result<usize> {
        let descriptors = self
            .driver
            .poll_descriptors(Interest::from_flags(input, output))
            .map_err(SeqError::Poll)?;
        for d in &descriptors {
            reactor.register(d.fd, d.events);
        }
        Ok(descriptors.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::driver::{Fault, LoopbackBus};
    use crate::graph::{PortCaps, PortTypes};
    use crate::poll::PollSet;
    use seqconf::ConnectionConfig;

    fn client(bus: &LoopbackBus, name: &str) -> Sequencer {
        Sequencer::attach(bus, &ConnectionConfig::named(name)).unwrap()
    }

    #[test]
    fn test_zero_timeout_returns_empty() {
        let bus = LoopbackBus::new();
        let mut seq = client(&bus, "idle");
        assert!(seq.receive_events(0, None).unwrap().is_empty());
    }

    #[test]
    fn test_timeout_expires_empty() {
        let bus = LoopbackBus::new();
        let mut seq = client(&bus, "waiting");
        let started = std::time::Instant::now();
        assert!(seq.receive_events(20, None).unwrap().is_empty());
        assert!(started.elapsed() >= std::time::Duration::from_millis(15));
    }

    #[test]
    fn test_default_batch_size() {
        let bus = LoopbackBus::new();
        let mut config = ConnectionConfig::named("batch");
        config.receive_max_events = 2;
        let mut seq = Sequencer::attach(&bus, &config).unwrap();
        let me = Address::new(seq.client_id(), 0);
        for n in 0..3 {
            bus.inject(me, &Event::note_on(0, n, 1)).unwrap();
        }
        assert_eq!(seq.receive_events(0, None).unwrap().len(), 2);
        assert_eq!(seq.receive_events(0, None).unwrap().len(), 1);
    }

    #[test]
    fn test_receive_fault_surfaces() {
        let bus = LoopbackBus::new();
        let mut seq = client(&bus, "faulty");
        bus.inject(Address::new(seq.client_id(), 0), &Event::note_on(0, 1, 1))
            .unwrap();
        bus.fail_next(Fault::EventInput, libc::ENOSPC);
        let err = seq.receive_events(0, None).unwrap_err();
        assert!(matches!(err, SeqError::Receive(_)));
        assert_eq!(err.driver_code(), Some(-libc::ENOSPC));
    }

    #[test]
    fn test_drain_and_sync_errors() {
        let bus = LoopbackBus::new();
        let mut seq = client(&bus, "out");
        seq.create_port("out", PortTypes::APPLICATION, PortCaps::READ | PortCaps::SUBS_READ)
            .unwrap();
        seq.output_event(&Event::note_on(0, 60, 100)).unwrap();

        bus.fail_next(Fault::Drain, libc::EIO);
        assert!(matches!(seq.drain_output(), Err(SeqError::Drain(_))));
        assert_eq!(seq.drain_output().unwrap(), 0);

        bus.fail_next(Fault::Sync, libc::EIO);
        assert!(matches!(seq.sync_output_queue(), Err(SeqError::Sync(_))));
        seq.sync_output_queue().unwrap();
    }

    #[test]
    fn test_register_poll_selects_sets() {
        let bus = LoopbackBus::new();
        let seq = client(&bus, "poller");

        let mut both = PollSet::new();
        assert_eq!(seq.register_poll(&mut both, false, false).unwrap(), 2);

        let mut input = PollSet::new();
        assert_eq!(seq.register_poll(&mut input, true, false).unwrap(), 1);
        assert!(input.descriptors()[0].wants_input());

        bus.inject(Address::new(seq.client_id(), 0), &Event::note_on(0, 1, 1))
            .unwrap();
        assert_eq!(input.poll(0).unwrap(), 1);
    }
}
