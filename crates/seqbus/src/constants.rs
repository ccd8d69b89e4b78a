//! Named protocol constants.
//!
//! Raw driver codes are wrapped in [`Constant`] so they print as
//! `SEQ_EVENT_NOTEON` instead of `6`. The process-wide [`Registry`] is built
//! once and never mutated afterwards; codes it does not know resolve to an
//! unnamed constant carrying just the number, so newer driver codes still
//! flow through.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{BitAnd, BitOr};
use std::str::FromStr;
use std::sync::OnceLock;

use crate::codes::{addr_client, addr_port, client_type, event_type, mode, queue, streams};
use crate::error::SeqError;
use crate::graph::{PortCaps, PortTypes};

/// Semantic family a constant belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Streams,
    Mode,
    Queue,
    ClientType,
    PortCap,
    PortType,
    EventType,
    Timestamp,
    TimeMode,
    AddrClient,
    AddrPort,
}

impl Category {
    pub const ALL: [Category; 11] = [
        Category::Streams,
        Category::Mode,
        Category::Queue,
        Category::ClientType,
        Category::PortCap,
        Category::PortType,
        Category::EventType,
        Category::Timestamp,
        Category::TimeMode,
        Category::AddrClient,
        Category::AddrPort,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Streams => "streams",
            Category::Mode => "mode",
            Category::Queue => "queue",
            Category::ClientType => "client_type",
            Category::PortCap => "port_cap",
            Category::PortType => "port_type",
            Category::EventType => "event_type",
            Category::Timestamp => "timestamp",
            Category::TimeMode => "time_mode",
            Category::AddrClient => "addr_client",
            Category::AddrPort => "addr_port",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = SeqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.replace('-', "_").to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| SeqError::InvalidValue {
                field: "category".to_string(),
                value: s.to_string(),
            })
    }
}

/// A raw code tagged with its category and, when registered, its name.
///
/// Identity is `(category, value)`; the name does not take part in equality.
#[derive(Clone)]
pub struct Constant {
    value: i64,
    name: Option<Cow<'static, str>>,
    category: Category,
}

impl Constant {
    /// An unnamed constant. Not cached anywhere.
    pub fn unnamed(category: Category, value: i64) -> Self {
        Self {
            value,
            name: None,
            category,
        }
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn is_named(&self) -> bool {
        self.name.is_some()
    }

    /// Resolve `value` in the global registry.
    pub fn resolve(category: Category, value: i64) -> Self {
        Registry::global().resolve(category, value)
    }

    pub fn event_type(code: u8) -> Self {
        Self::resolve(Category::EventType, code as i64)
    }
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        self.category == other.category && self.value == other.value
    }
}

impl Eq for Constant {}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.category.hash(state);
        self.value.hash(state);
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.value),
        }
    }
}

impl fmt::Debug for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}(0x{:x})", name, self.value),
            None => write!(f, "{:?}({})", self.category, self.value),
        }
    }
}

/// Combining two constants keeps the left-hand category and drops the name.
impl BitOr for Constant {
    type Output = Constant;

    fn bitor(self, rhs: Self) -> Self::Output {
        Constant::unnamed(self.category, self.value | rhs.value)
    }
}

impl BitAnd for Constant {
    type Output = Constant;

    fn bitand(self, rhs: Self) -> Self::Output {
        Constant::unnamed(self.category, self.value & rhs.value)
    }
}

#[derive(Debug, Default)]
struct Table {
    by_value: HashMap<i64, Constant>,
    order: Vec<i64>,
}

/// Builds a [`Registry`]. Registration is idempotent per `(category, value)`:
/// the first name registered for a pair wins.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    tables: HashMap<Category, Table>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        category: Category,
        name: impl Into<Cow<'static, str>>,
        value: i64,
    ) -> Constant {
        let table = self.tables.entry(category).or_default();
        if let Some(existing) = table.by_value.get(&value) {
            return existing.clone();
        }

        let constant = Constant {
            value,
            name: Some(name.into()),
            category,
        };
        table.by_value.insert(value, constant.clone());
        table.order.push(value);
        constant
    }

    pub fn build(self) -> Registry {
        Registry {
            tables: self.tables,
        }
    }
}

/// Read-only lookup tables, one per [`Category`].
#[derive(Debug)]
pub struct Registry {
    tables: HashMap<Category, Table>,
}

impl Registry {
    /// The process-wide registry of every code the driver defines.
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(builtin)
    }

    /// The registered constant, or an unnamed one carrying `value`.
    pub fn resolve(&self, category: Category, value: i64) -> Constant {
        self.get(category, value)
            .cloned()
            .unwrap_or_else(|| Constant::unnamed(category, value))
    }

    pub fn get(&self, category: Category, value: i64) -> Option<&Constant> {
        self.tables.get(&category)?.by_value.get(&value)
    }

    pub fn contains(&self, category: Category, value: i64) -> bool {
        self.get(category, value).is_some()
    }

    /// Reverse lookup by name.
    pub fn lookup_name(&self, category: Category, name: &str) -> Option<Constant> {
        self.tables
            .get(&category)?
            .by_value
            .values()
            .find(|c| c.name() == Some(name))
            .cloned()
    }

    /// Names in registration order.
    pub fn enumerate(&self, category: Category) -> Vec<&str> {
        match self.tables.get(&category) {
            Some(table) => table
                .order
                .iter()
                .filter_map(|v| table.by_value.get(v).and_then(|c| c.name()))
                .collect(),
            None => Vec::new(),
        }
    }
}

fn builtin() -> Registry {
    let mut b = RegistryBuilder::new();

    b.register(Category::Streams, "SEQ_OPEN_OUTPUT", streams::OUTPUT as i64);
    b.register(Category::Streams, "SEQ_OPEN_INPUT", streams::INPUT as i64);
    b.register(Category::Streams, "SEQ_OPEN_DUPLEX", streams::DUPLEX as i64);

    b.register(Category::Mode, "SEQ_BLOCK", mode::BLOCK as i64);
    b.register(Category::Mode, "SEQ_NONBLOCK", mode::NONBLOCK as i64);

    b.register(Category::Queue, "SEQ_QUEUE_DIRECT", queue::DIRECT as i64);

    b.register(Category::ClientType, "SEQ_USER_CLIENT", client_type::USER as i64);
    b.register(Category::ClientType, "SEQ_KERNEL_CLIENT", client_type::KERNEL as i64);

    b.register(Category::PortCap, "SEQ_PORT_CAP_NONE", 0);
    for (name, cap) in PortCaps::NAMED {
        b.register(Category::PortCap, *name, cap.bits() as i64);
    }
    for (name, ty) in PortTypes::NAMED {
        b.register(Category::PortType, *name, ty.bits() as i64);
    }

    for (code, name) in EVENT_TYPE_NAMES {
        b.register(Category::EventType, *name, *code as i64);
    }

    b.register(Category::Timestamp, "SEQ_TIME_STAMP_TICK", 0);
    b.register(Category::Timestamp, "SEQ_TIME_STAMP_REAL", 1);
    b.register(Category::TimeMode, "SEQ_TIME_MODE_ABS", 0);
    b.register(Category::TimeMode, "SEQ_TIME_MODE_REL", 2);

    b.register(Category::AddrClient, "SEQ_CLIENT_SYSTEM", addr_client::SYSTEM as i64);
    b.register(Category::AddrClient, "SEQ_ADDRESS_BROADCAST", addr_client::BROADCAST as i64);
    b.register(Category::AddrClient, "SEQ_ADDRESS_SUBSCRIBERS", addr_client::SUBSCRIBERS as i64);
    b.register(Category::AddrClient, "SEQ_ADDRESS_UNKNOWN", addr_client::UNKNOWN as i64);

    b.register(Category::AddrPort, "SEQ_PORT_SYSTEM_TIMER", addr_port::SYSTEM_TIMER as i64);
    b.register(Category::AddrPort, "SEQ_PORT_SYSTEM_ANNOUNCE", addr_port::SYSTEM_ANNOUNCE as i64);
    b.register(Category::AddrPort, "SEQ_ADDRESS_BROADCAST", 255);
    b.register(Category::AddrPort, "SEQ_ADDRESS_SUBSCRIBERS", 254);
    b.register(Category::AddrPort, "SEQ_ADDRESS_UNKNOWN", addr_port::UNKNOWN as i64);

    b.build()
}

const EVENT_TYPE_NAMES: &[(u8, &str)] = &[
    (event_type::SYSTEM, "SEQ_EVENT_SYSTEM"),
    (event_type::RESULT, "SEQ_EVENT_RESULT"),
    (event_type::NOTE, "SEQ_EVENT_NOTE"),
    (event_type::NOTEON, "SEQ_EVENT_NOTEON"),
    (event_type::NOTEOFF, "SEQ_EVENT_NOTEOFF"),
    (event_type::KEYPRESS, "SEQ_EVENT_KEYPRESS"),
    (event_type::CONTROLLER, "SEQ_EVENT_CONTROLLER"),
    (event_type::PGMCHANGE, "SEQ_EVENT_PGMCHANGE"),
    (event_type::CHANPRESS, "SEQ_EVENT_CHANPRESS"),
    (event_type::PITCHBEND, "SEQ_EVENT_PITCHBEND"),
    (event_type::CONTROL14, "SEQ_EVENT_CONTROL14"),
    (event_type::NONREGPARAM, "SEQ_EVENT_NONREGPARAM"),
    (event_type::REGPARAM, "SEQ_EVENT_REGPARAM"),
    (event_type::SONGPOS, "SEQ_EVENT_SONGPOS"),
    (event_type::SONGSEL, "SEQ_EVENT_SONGSEL"),
    (event_type::QFRAME, "SEQ_EVENT_QFRAME"),
    (event_type::TIMESIGN, "SEQ_EVENT_TIMESIGN"),
    (event_type::KEYSIGN, "SEQ_EVENT_KEYSIGN"),
    (event_type::START, "SEQ_EVENT_START"),
    (event_type::CONTINUE, "SEQ_EVENT_CONTINUE"),
    (event_type::STOP, "SEQ_EVENT_STOP"),
    (event_type::SETPOS_TICK, "SEQ_EVENT_SETPOS_TICK"),
    (event_type::SETPOS_TIME, "SEQ_EVENT_SETPOS_TIME"),
    (event_type::TEMPO, "SEQ_EVENT_TEMPO"),
    (event_type::CLOCK, "SEQ_EVENT_CLOCK"),
    (event_type::TICK, "SEQ_EVENT_TICK"),
    (event_type::QUEUE_SKEW, "SEQ_EVENT_QUEUE_SKEW"),
    (event_type::SYNC_POS, "SEQ_EVENT_SYNC_POS"),
    (event_type::TUNE_REQUEST, "SEQ_EVENT_TUNE_REQUEST"),
    (event_type::RESET, "SEQ_EVENT_RESET"),
    (event_type::SENSING, "SEQ_EVENT_SENSING"),
    (event_type::ECHO, "SEQ_EVENT_ECHO"),
    (event_type::OSS, "SEQ_EVENT_OSS"),
    (event_type::CLIENT_START, "SEQ_EVENT_CLIENT_START"),
    (event_type::CLIENT_EXIT, "SEQ_EVENT_CLIENT_EXIT"),
    (event_type::CLIENT_CHANGE, "SEQ_EVENT_CLIENT_CHANGE"),
    (event_type::PORT_START, "SEQ_EVENT_PORT_START"),
    (event_type::PORT_EXIT, "SEQ_EVENT_PORT_EXIT"),
    (event_type::PORT_CHANGE, "SEQ_EVENT_PORT_CHANGE"),
    (event_type::PORT_SUBSCRIBED, "SEQ_EVENT_PORT_SUBSCRIBED"),
    (event_type::PORT_UNSUBSCRIBED, "SEQ_EVENT_PORT_UNSUBSCRIBED"),
    (event_type::USR0, "SEQ_EVENT_USR0"),
    (91, "SEQ_EVENT_USR1"),
    (92, "SEQ_EVENT_USR2"),
    (93, "SEQ_EVENT_USR3"),
    (94, "SEQ_EVENT_USR4"),
    (95, "SEQ_EVENT_USR5"),
    (96, "SEQ_EVENT_USR6"),
    (97, "SEQ_EVENT_USR7"),
    (98, "SEQ_EVENT_USR8"),
    (event_type::USR9, "SEQ_EVENT_USR9"),
    (event_type::SYSEX, "SEQ_EVENT_SYSEX"),
    (event_type::BOUNCE, "SEQ_EVENT_BOUNCE"),
    (event_type::USR_VAR0, "SEQ_EVENT_USR_VAR0"),
    (136, "SEQ_EVENT_USR_VAR1"),
    (137, "SEQ_EVENT_USR_VAR2"),
    (138, "SEQ_EVENT_USR_VAR3"),
    (event_type::USR_VAR4, "SEQ_EVENT_USR_VAR4"),
    (event_type::NONE, "SEQ_EVENT_NONE"),
];
