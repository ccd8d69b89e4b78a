//! Per-type payloads and the key/value view over them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::address::Address;
use crate::codes::event_type as ev;
use crate::error::{Result, SeqError};

/// Shape of the data an event type carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadClass {
    /// System/result: event, result
    Result,
    /// Full note with duration
    Note,
    /// Note on/off/keypress: channel, note, velocity
    ShortNote,
    /// Controller with parameter
    Control,
    /// Program change, channel pressure, pitch bend: channel, value
    ShortControl,
    /// Song position, frame, signatures: value
    Value,
    /// Queue start/stop/tempo etc.
    QueueControl,
    /// Client lifecycle announcements
    ClientAddr,
    /// Port lifecycle announcements
    PortAddr,
    /// Subscription announcements
    Connect,
    /// Byte payload of arbitrary length
    Variable,
    /// No payload
    Empty,
    /// Fixed 12 bytes with no field schema
    Raw,
}

/// Payload class for a known event type, `None` for codes the driver does
/// not define.
pub fn classify(event_type: u8) -> Option<PayloadClass> {
    let class = match event_type {
        ev::SYSTEM | ev::RESULT => PayloadClass::Result,
        ev::NOTE => PayloadClass::Note,
        ev::NOTEON | ev::NOTEOFF | ev::KEYPRESS => PayloadClass::ShortNote,
        ev::CONTROLLER | ev::CONTROL14 | ev::NONREGPARAM | ev::REGPARAM => PayloadClass::Control,
        ev::PGMCHANGE | ev::CHANPRESS | ev::PITCHBEND => PayloadClass::ShortControl,
        ev::SONGPOS..=ev::KEYSIGN => PayloadClass::Value,
        ev::START | ev::CONTINUE | ev::STOP | ev::SETPOS_TICK | ev::TEMPO | ev::QUEUE_SKEW => {
            PayloadClass::QueueControl
        }
        ev::CLOCK | ev::TICK | ev::TUNE_REQUEST | ev::RESET | ev::SENSING => PayloadClass::Empty,
        ev::SETPOS_TIME | ev::SYNC_POS | ev::ECHO | ev::OSS | ev::NONE => PayloadClass::Raw,
        ev::USR0..=ev::USR9 => PayloadClass::Raw,
        ev::CLIENT_START | ev::CLIENT_EXIT | ev::CLIENT_CHANGE => PayloadClass::ClientAddr,
        ev::PORT_START | ev::PORT_EXIT | ev::PORT_CHANGE => PayloadClass::PortAddr,
        ev::PORT_SUBSCRIBED | ev::PORT_UNSUBSCRIBED => PayloadClass::Connect,
        ev::SYSEX | ev::BOUNCE => PayloadClass::Variable,
        ev::USR_VAR0..=ev::USR_VAR4 => PayloadClass::Variable,
        _ => return None,
    };
    Some(class)
}

pub fn is_known_type(t: u8) -> bool {
    classify(t).is_some()
}

pub fn is_result_type(t: u8) -> bool {
    matches!(t, ev::SYSTEM..=4)
}

pub fn is_note_type(t: u8) -> bool {
    matches!(t, ev::NOTE..=9)
}

pub fn is_control_type(t: u8) -> bool {
    matches!(t, ev::CONTROLLER..=ev::KEYSIGN)
}

pub fn is_channel_type(t: u8) -> bool {
    matches!(t, ev::NOTE..=ev::REGPARAM)
}

pub fn is_queue_type(t: u8) -> bool {
    matches!(t, ev::START..=ev::SYNC_POS)
}

pub fn is_message_type(t: u8) -> bool {
    matches!(t, ev::CLIENT_START..=ev::PORT_CHANGE)
}

pub fn is_subscribe_type(t: u8) -> bool {
    matches!(t, ev::PORT_SUBSCRIBED | ev::PORT_UNSUBSCRIBED)
}

pub fn is_user_type(t: u8) -> bool {
    matches!(t, ev::USR0..=ev::USR9 | ev::USR_VAR0..=ev::USR_VAR4)
}

pub fn is_fixed_type(t: u8) -> bool {
    matches!(classify(t), Some(c) if c != PayloadClass::Variable)
}

pub fn is_variable_type(t: u8) -> bool {
    classify(t) == Some(PayloadClass::Variable)
}

/// Always false. The kernel carries the user variable range (`USR_VAR0` to
/// `USR_VAR4`) as ordinary variable-length payloads, like `SYSEX` and
/// `BOUNCE`, and no longer defines any type with a user-space pointer
/// payload. Kept so callers can ask the question the driver API asks.
pub fn is_varusr_type(_t: u8) -> bool {
    false
}

pub fn is_reserved(t: u8) -> bool {
    !is_known_type(t)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Note {
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
    pub off_velocity: u8,
    pub duration: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Control {
    pub channel: u8,
    pub param: u32,
    pub value: i32,
}

/// Queue control data. The 8 parameter bytes are the driver's union of
/// value/time/position/skew; `value()` reads the common signed form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueControl {
    pub queue: u8,
    pub param: [u8; 8],
}

impl QueueControl {
    pub fn new(queue: u8, value: i32) -> Self {
        let mut param = [0u8; 8];
        param[..4].copy_from_slice(&value.to_ne_bytes());
        Self { queue, param }
    }

    pub fn value(&self) -> i32 {
        i32::from_ne_bytes([self.param[0], self.param[1], self.param[2], self.param[3]])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Connection {
    pub sender: Address,
    pub dest: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventResult {
    pub event: i32,
    pub result: i32,
}

/// Event data, one variant per storage shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Result(EventResult),
    Note(Note),
    Control(Control),
    Queue(QueueControl),
    Addr(Address),
    Connect(Connection),
    Ext(Vec<u8>),
    Empty,
    Raw([u8; 12]),
}

impl Payload {
    /// Zeroed payload of the given class.
    pub fn empty_for(class: PayloadClass) -> Self {
        match class {
            PayloadClass::Result => Payload::Result(EventResult::default()),
            PayloadClass::Note | PayloadClass::ShortNote => Payload::Note(Note::default()),
            PayloadClass::Control | PayloadClass::ShortControl | PayloadClass::Value => {
                Payload::Control(Control::default())
            }
            PayloadClass::QueueControl => Payload::Queue(QueueControl::default()),
            PayloadClass::ClientAddr | PayloadClass::PortAddr => Payload::Addr(Address::default()),
            PayloadClass::Connect => Payload::Connect(Connection::default()),
            PayloadClass::Variable => Payload::Ext(Vec::new()),
            PayloadClass::Empty => Payload::Empty,
            PayloadClass::Raw => Payload::Raw([0; 12]),
        }
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Payload::Result(_) => "result",
            Payload::Note(_) => "note",
            Payload::Control(_) => "control",
            Payload::Queue(_) => "queue",
            Payload::Addr(_) => "address",
            Payload::Connect(_) => "connect",
            Payload::Ext(_) => "ext",
            Payload::Empty => "empty",
            Payload::Raw(_) => "raw",
        }
    }
}

/// Field names accepted by `get_data`/`set_data`.
///
/// Declaration order is the order `set_data` applies fields in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataKey {
    #[serde(rename = "note.channel")]
    NoteChannel,
    #[serde(rename = "note.note")]
    NoteNote,
    #[serde(rename = "note.velocity")]
    NoteVelocity,
    #[serde(rename = "note.off_velocity")]
    NoteOffVelocity,
    #[serde(rename = "note.duration")]
    NoteDuration,
    #[serde(rename = "control.channel")]
    ControlChannel,
    #[serde(rename = "control.param")]
    ControlParam,
    #[serde(rename = "control.value")]
    ControlValue,
    #[serde(rename = "ext")]
    Ext,
    #[serde(rename = "queue.queue")]
    QueueQueue,
    #[serde(rename = "addr.client")]
    AddrClient,
    #[serde(rename = "addr.port")]
    AddrPort,
    #[serde(rename = "connect.sender.client")]
    ConnectSenderClient,
    #[serde(rename = "connect.sender.port")]
    ConnectSenderPort,
    #[serde(rename = "connect.dest.client")]
    ConnectDestClient,
    #[serde(rename = "connect.dest.port")]
    ConnectDestPort,
    #[serde(rename = "result.event")]
    ResultEvent,
    #[serde(rename = "result.result")]
    ResultResult,
}

impl DataKey {
    pub const ALL: [DataKey; 18] = [
        DataKey::NoteChannel,
        DataKey::NoteNote,
        DataKey::NoteVelocity,
        DataKey::NoteOffVelocity,
        DataKey::NoteDuration,
        DataKey::ControlChannel,
        DataKey::ControlParam,
        DataKey::ControlValue,
        DataKey::Ext,
        DataKey::QueueQueue,
        DataKey::AddrClient,
        DataKey::AddrPort,
        DataKey::ConnectSenderClient,
        DataKey::ConnectSenderPort,
        DataKey::ConnectDestClient,
        DataKey::ConnectDestPort,
        DataKey::ResultEvent,
        DataKey::ResultResult,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataKey::NoteChannel => "note.channel",
            DataKey::NoteNote => "note.note",
            DataKey::NoteVelocity => "note.velocity",
            DataKey::NoteOffVelocity => "note.off_velocity",
            DataKey::NoteDuration => "note.duration",
            DataKey::ControlChannel => "control.channel",
            DataKey::ControlParam => "control.param",
            DataKey::ControlValue => "control.value",
            DataKey::Ext => "ext",
            DataKey::QueueQueue => "queue.queue",
            DataKey::AddrClient => "addr.client",
            DataKey::AddrPort => "addr.port",
            DataKey::ConnectSenderClient => "connect.sender.client",
            DataKey::ConnectSenderPort => "connect.sender.port",
            DataKey::ConnectDestClient => "connect.dest.client",
            DataKey::ConnectDestPort => "connect.dest.port",
            DataKey::ResultEvent => "result.event",
            DataKey::ResultResult => "result.result",
        }
    }

    /// Keys that belong to a payload class, in `set_data` order.
    pub fn schema(class: PayloadClass) -> &'static [DataKey] {
        use DataKey::*;
        match class {
            PayloadClass::Result => &[ResultEvent, ResultResult],
            PayloadClass::Note => &[
                NoteChannel,
                NoteNote,
                NoteVelocity,
                NoteOffVelocity,
                NoteDuration,
            ],
            PayloadClass::ShortNote => &[NoteChannel, NoteNote, NoteVelocity],
            PayloadClass::Control => &[ControlChannel, ControlParam, ControlValue],
            PayloadClass::ShortControl => &[ControlChannel, ControlValue],
            PayloadClass::Value => &[ControlValue],
            PayloadClass::QueueControl => &[QueueQueue],
            PayloadClass::ClientAddr => &[AddrClient],
            PayloadClass::PortAddr => &[AddrClient, AddrPort],
            PayloadClass::Connect => &[
                ConnectSenderClient,
                ConnectSenderPort,
                ConnectDestClient,
                ConnectDestPort,
            ],
            PayloadClass::Variable => &[Ext],
            PayloadClass::Empty | PayloadClass::Raw => &[],
        }
    }
}

impl fmt::Display for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataKey {
    type Err = SeqError;

    fn from_str(s: &str) -> Result<Self> {
        DataKey::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| SeqError::invalid_value("data key", s))
    }
}

/// A value in the key/value view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    Int(i64),
    Bytes(Vec<u8>),
}

impl DataValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            DataValue::Int(v) => Some(*v),
            DataValue::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            DataValue::Bytes(b) => Some(b),
            DataValue::Int(_) => None,
        }
    }
}

macro_rules! int_data_value {
    ($($t:ty),*) => {
        $(impl From<$t> for DataValue {
            fn from(v: $t) -> Self {
                DataValue::Int(v as i64)
            }
        })*
    };
}

int_data_value!(i64, i32, u32, u8, u16, i16);

impl From<Vec<u8>> for DataValue {
    fn from(v: Vec<u8>) -> Self {
        DataValue::Bytes(v)
    }
}

impl From<&[u8]> for DataValue {
    fn from(v: &[u8]) -> Self {
        DataValue::Bytes(v.to_vec())
    }
}

pub type DataMap = BTreeMap<DataKey, DataValue>;

fn int_in<T: TryFrom<i64>>(key: DataKey, value: &DataValue) -> Result<T> {
    let raw = value
        .as_int()
        .ok_or_else(|| SeqError::invalid_value(key.as_str(), "expected an integer"))?;
    T::try_from(raw).map_err(|_| SeqError::invalid_value(key.as_str(), raw))
}

/// Read the fields of `payload` that belong to `class`.
pub(crate) fn get_data(class: PayloadClass, payload: &Payload) -> DataMap {
    let mut out = DataMap::new();
    for key in DataKey::schema(class) {
        let value: DataValue = match (key, payload) {
            (DataKey::NoteChannel, Payload::Note(n)) => n.channel.into(),
            (DataKey::NoteNote, Payload::Note(n)) => n.note.into(),
            (DataKey::NoteVelocity, Payload::Note(n)) => n.velocity.into(),
            (DataKey::NoteOffVelocity, Payload::Note(n)) => n.off_velocity.into(),
            (DataKey::NoteDuration, Payload::Note(n)) => n.duration.into(),
            (DataKey::ControlChannel, Payload::Control(c)) => c.channel.into(),
            (DataKey::ControlParam, Payload::Control(c)) => c.param.into(),
            (DataKey::ControlValue, Payload::Control(c)) => c.value.into(),
            (DataKey::Ext, Payload::Ext(bytes)) => bytes.clone().into(),
            (DataKey::QueueQueue, Payload::Queue(q)) => q.queue.into(),
            (DataKey::AddrClient, Payload::Addr(a)) => a.client.into(),
            (DataKey::AddrPort, Payload::Addr(a)) => a.port.into(),
            (DataKey::ConnectSenderClient, Payload::Connect(c)) => c.sender.client.into(),
            (DataKey::ConnectSenderPort, Payload::Connect(c)) => c.sender.port.into(),
            (DataKey::ConnectDestClient, Payload::Connect(c)) => c.dest.client.into(),
            (DataKey::ConnectDestPort, Payload::Connect(c)) => c.dest.port.into(),
            (DataKey::ResultEvent, Payload::Result(r)) => r.event.into(),
            (DataKey::ResultResult, Payload::Result(r)) => r.result.into(),
            _ => continue,
        };
        out.insert(*key, value);
    }
    out
}

/// Write the keys of `data` that belong to `class` into `payload`.
///
/// Keys outside the class schema are skipped. A value that does not fit its
/// field fails the whole call and leaves `payload` untouched.
pub(crate) fn set_data(class: PayloadClass, payload: &mut Payload, data: &DataMap) -> Result<()> {
    let schema = DataKey::schema(class);
    let mut next = payload.clone();

    for (key, value) in data {
        if !schema.contains(key) {
            tracing::trace!(key = %key, ?class, "ignoring key outside payload schema");
            continue;
        }

        match (key, &mut next) {
            (DataKey::NoteChannel, Payload::Note(n)) => n.channel = int_in(*key, value)?,
            (DataKey::NoteNote, Payload::Note(n)) => n.note = int_in(*key, value)?,
            (DataKey::NoteVelocity, Payload::Note(n)) => n.velocity = int_in(*key, value)?,
            (DataKey::NoteOffVelocity, Payload::Note(n)) => n.off_velocity = int_in(*key, value)?,
            (DataKey::NoteDuration, Payload::Note(n)) => n.duration = int_in(*key, value)?,
            (DataKey::ControlChannel, Payload::Control(c)) => c.channel = int_in(*key, value)?,
            (DataKey::ControlParam, Payload::Control(c)) => c.param = int_in(*key, value)?,
            (DataKey::ControlValue, Payload::Control(c)) => c.value = int_in(*key, value)?,
            (DataKey::Ext, Payload::Ext(bytes)) => {
                let src = value
                    .as_bytes()
                    .ok_or_else(|| SeqError::invalid_value("ext", "expected a byte sequence"))?;
                if u32::try_from(src.len()).is_err() {
                    return Err(SeqError::invalid_value("ext", src.len()));
                }
                // Replaces (and drops) the previous buffer
                *bytes = src.to_vec();
            }
            (DataKey::QueueQueue, Payload::Queue(q)) => q.queue = int_in(*key, value)?,
            (DataKey::AddrClient, Payload::Addr(a)) => a.client = int_in(*key, value)?,
            (DataKey::AddrPort, Payload::Addr(a)) => a.port = int_in(*key, value)?,
            (DataKey::ConnectSenderClient, Payload::Connect(c)) => {
                c.sender.client = int_in(*key, value)?
            }
            (DataKey::ConnectSenderPort, Payload::Connect(c)) => c.sender.port = int_in(*key, value)?,
            (DataKey::ConnectDestClient, Payload::Connect(c)) => c.dest.client = int_in(*key, value)?,
            (DataKey::ConnectDestPort, Payload::Connect(c)) => c.dest.port = int_in(*key, value)?,
            (DataKey::ResultEvent, Payload::Result(r)) => r.event = int_in(*key, value)?,
            (DataKey::ResultResult, Payload::Result(r)) => r.result = int_in(*key, value)?,
            (key, other) => {
                return Err(SeqError::Malformed(format!(
                    "{} payload has no field {}",
                    other.kind_name(),
                    key
                )))
            }
        }
    }

    *payload = next;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_table() {
        assert_eq!(classify(ev::NOTE), Some(PayloadClass::Note));
        assert_eq!(classify(ev::NOTEON), Some(PayloadClass::ShortNote));
        assert_eq!(classify(ev::CONTROL14), Some(PayloadClass::Control));
        assert_eq!(classify(ev::PITCHBEND), Some(PayloadClass::ShortControl));
        assert_eq!(classify(ev::QFRAME), Some(PayloadClass::Value));
        assert_eq!(classify(ev::TEMPO), Some(PayloadClass::QueueControl));
        assert_eq!(classify(ev::CLOCK), Some(PayloadClass::Empty));
        assert_eq!(classify(ev::PORT_EXIT), Some(PayloadClass::PortAddr));
        assert_eq!(classify(ev::PORT_SUBSCRIBED), Some(PayloadClass::Connect));
        assert_eq!(classify(ev::SYSEX), Some(PayloadClass::Variable));
        assert_eq!(classify(137), Some(PayloadClass::Variable));
        assert_eq!(classify(3), None);
        assert_eq!(classify(200), None);
    }

    #[test]
    fn test_user_variable_range_is_plain_variable() {
        for t in ev::USR_VAR0..=ev::USR_VAR4 {
            assert!(is_variable_type(t), "type {}", t);
            assert!(is_user_type(t), "type {}", t);
            assert!(!is_varusr_type(t), "type {}", t);
        }
        for t in [ev::SYSEX, ev::BOUNCE] {
            assert!(is_variable_type(t));
            assert!(!is_varusr_type(t));
        }
    }

    #[test]
    fn test_type_predicates() {
        assert!(is_note_type(ev::NOTEOFF));
        assert!(is_channel_type(ev::PGMCHANGE));
        assert!(!is_channel_type(ev::SONGPOS));
        assert!(is_control_type(ev::SONGPOS));
        assert!(is_queue_type(ev::SETPOS_TIME));
        assert!(is_message_type(ev::CLIENT_CHANGE));
        assert!(is_subscribe_type(ev::PORT_UNSUBSCRIBED));
        assert!(is_user_type(93));
        assert!(is_fixed_type(ev::ECHO));
        assert!(is_variable_type(ev::BOUNCE));
        assert!(is_reserved(120));
    }

    #[test]
    fn test_schema_matches_get_data() {
        for code in 0..=255u8 {
            if let Some(class) = classify(code) {
                let keys: Vec<DataKey> =
                    get_data(class, &Payload::empty_for(class)).into_keys().collect();
                assert_eq!(keys, DataKey::schema(class), "type {}", code);
            }
        }
    }

    #[test]
    fn test_set_data_rejects_out_of_range() {
        let mut payload = Payload::empty_for(PayloadClass::ShortNote);
        let mut data = DataMap::new();
        data.insert(DataKey::NoteChannel, 3.into());
        data.insert(DataKey::NoteVelocity, 300.into());

        let err = set_data(PayloadClass::ShortNote, &mut payload, &data).unwrap_err();
        assert!(matches!(err, SeqError::InvalidValue { .. }));
        // Nothing applied
        assert_eq!(payload, Payload::Note(Note::default()));
    }

    #[test]
    fn test_set_data_skips_foreign_keys() {
        let mut payload = Payload::empty_for(PayloadClass::Control);
        let mut data = DataMap::new();
        data.insert(DataKey::NoteNote, 60.into());
        data.insert(DataKey::ControlValue, (-5).into());
        set_data(PayloadClass::Control, &mut payload, &data).unwrap();

        let out = get_data(PayloadClass::Control, &payload);
        assert_eq!(out.get(&DataKey::ControlValue), Some(&DataValue::Int(-5)));
        assert!(!out.contains_key(&DataKey::NoteNote));
    }

    #[test]
    fn test_data_key_strings() {
        for key in DataKey::ALL {
            assert_eq!(key.as_str().parse::<DataKey>().unwrap(), key);
        }
        assert!("note.pitch".parse::<DataKey>().is_err());
    }

    #[test]
    fn test_queue_control_value() {
        let q = QueueControl::new(2, -120);
        assert_eq!(q.value(), -120);
        assert_eq!(q.queue, 2);
    }
}
