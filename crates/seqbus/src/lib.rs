//! seqbus: a client engine for the ALSA sequencer bus
//!
//! A process joins the bus as a client, owns ports and queues, wires ports
//! together with subscriptions and exchanges [`Event`]s with other clients.
//!
//! - **Constants**: named protocol codes ([`Registry`], [`Constant`])
//! - **Events**: typed header plus a per-type payload, with the driver's
//!   28-byte wire record in [`event::wire`]
//! - **Graph**: clients, ports, queues and subscriptions ([`ConnectionGraph`])
//! - **Engine**: [`Sequencer`] with ports, connections, queues and the
//!   receive/send loop
//! - **Drivers**: libasound ([`driver::AlsaDriver`], `alsa-backend` feature)
//!   or the in-memory [`LoopbackBus`]
//! - **Services**: card and mixer controls with change notifications

pub mod address;
pub mod codes;
pub mod constants;
pub mod driver;
pub mod error;
pub mod event;
pub mod graph;
pub mod io;
pub mod notify;
pub mod poll;
pub mod sequencer;
pub mod services;

pub use address::Address;
pub use constants::{Category, Constant, Registry, RegistryBuilder};
pub use driver::{Fault, InputOutcome, LoopbackBus, LoopbackDriver, OpenParams, SeqDriver};
pub use error::{DriverError, DriverResult, Result, SeqError};
pub use event::{
    DataKey, DataMap, DataValue, Event, EventFlags, EventTime, LengthKind, Payload, PayloadClass,
    TimeMode, TimeValue, TimestampKind,
};
pub use graph::{
    ClientInfo, ClientType, ConnectionGraph, PortCaps, PortInfo, PortTypes, QueueInfo, QueueTempo,
    Subscriber, Subscription, SubsKind,
};
pub use notify::{ElementWatcher, Notification, NotificationDispatcher};
pub use poll::{Interest, PollDescriptor, PollSet, Reactor};
pub use sequencer::{PortFilter, Sequencer};
pub use services::{ControlService, ElementChange, MemoryControls};

pub use seqconf::{BlockMode, ConnectionConfig, SeqConfig, Streams};
