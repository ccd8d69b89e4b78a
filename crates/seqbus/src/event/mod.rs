//! Sequencer events.
//!
//! An [`Event`] is a fixed header plus a [`Payload`] whose shape is decided
//! by the event type. The type is the only discriminator: re-typing an event
//! drops its payload and installs an empty one of the new shape.

pub mod payload;
pub mod wire;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use payload::{
    classify, Connection, Control, DataKey, DataMap, DataValue, EventResult, Note, Payload,
    PayloadClass, QueueControl,
};

use crate::address::Address;
use crate::codes::{event_type as ev, flags, queue};
use crate::constants::{Category, Constant};
use crate::error::{Result, SeqError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampKind {
    #[default]
    Tick,
    Real,
}

impl TimestampKind {
    pub fn constant(self) -> Constant {
        Constant::resolve(Category::Timestamp, (self.bits() & flags::TIME_STAMP_MASK) as i64)
    }

    fn bits(self) -> u8 {
        match self {
            TimestampKind::Tick => flags::TIME_STAMP_TICK,
            TimestampKind::Real => flags::TIME_STAMP_REAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeMode {
    #[default]
    Absolute,
    Relative,
}

impl TimeMode {
    pub fn constant(self) -> Constant {
        Constant::resolve(Category::TimeMode, self.bits() as i64)
    }

    fn bits(self) -> u8 {
        match self {
            TimeMode::Absolute => flags::TIME_MODE_ABS,
            TimeMode::Relative => flags::TIME_MODE_REL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthKind {
    #[default]
    Fixed,
    Variable,
    VarUser,
}

/// The flags byte of the event header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventFlags {
    pub timestamp: TimestampKind,
    pub time_mode: TimeMode,
    pub high_priority: bool,
    pub length: LengthKind,
}

impl EventFlags {
    pub fn bits(&self) -> u8 {
        let length = match self.length {
            LengthKind::Fixed => flags::LENGTH_FIXED,
            LengthKind::Variable => flags::LENGTH_VARIABLE,
            LengthKind::VarUser => flags::LENGTH_VARUSR,
        };
        let priority = if self.high_priority {
            flags::PRIORITY_HIGH
        } else {
            flags::PRIORITY_NORMAL
        };
        self.timestamp.bits() | self.time_mode.bits() | length | priority
    }

    pub fn from_bits(bits: u8) -> Self {
        let timestamp = if bits & flags::TIME_STAMP_MASK == flags::TIME_STAMP_REAL {
            TimestampKind::Real
        } else {
            TimestampKind::Tick
        };
        let time_mode = if bits & flags::TIME_MODE_MASK == flags::TIME_MODE_REL {
            TimeMode::Relative
        } else {
            TimeMode::Absolute
        };
        let length = match bits & flags::LENGTH_MASK {
            flags::LENGTH_VARIABLE => LengthKind::Variable,
            flags::LENGTH_VARUSR => LengthKind::VarUser,
            _ => LengthKind::Fixed,
        };
        Self {
            timestamp,
            time_mode,
            high_priority: bits & flags::PRIORITY_MASK == flags::PRIORITY_HIGH,
            length,
        }
    }
}

/// Stored event time; its shape always matches the timestamp flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventTime {
    Tick(u32),
    Real { sec: u32, nsec: u32 },
}

impl EventTime {
    pub fn zero(kind: TimestampKind) -> Self {
        match kind {
            TimestampKind::Tick => EventTime::Tick(0),
            TimestampKind::Real => EventTime::Real { sec: 0, nsec: 0 },
        }
    }

    pub fn kind(&self) -> TimestampKind {
        match self {
            EventTime::Tick(_) => TimestampKind::Tick,
            EventTime::Real { .. } => TimestampKind::Real,
        }
    }
}

/// Caller-facing time value: ticks are integers, real time is seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeValue {
    Ticks(i64),
    Seconds(f64),
}

impl From<EventTime> for TimeValue {
    fn from(t: EventTime) -> Self {
        match t {
            EventTime::Tick(tick) => TimeValue::Ticks(tick as i64),
            EventTime::Real { sec, nsec } => {
                TimeValue::Seconds(sec as f64 + nsec as f64 / 1_000_000_000.0)
            }
        }
    }
}

fn seconds_to_real(seconds: f64) -> Result<EventTime> {
    if !seconds.is_finite() || seconds < 0.0 || seconds >= (u32::MAX as f64 + 1.0) {
        return Err(SeqError::Time(format!("{} seconds is out of range", seconds)));
    }
    let sec = seconds.trunc();
    let mut nsec = ((seconds - sec) * 1_000_000_000.0).round() as u32;
    let mut sec = sec as u32;
    if nsec >= 1_000_000_000 {
        sec = sec
            .checked_add(1)
            .ok_or_else(|| SeqError::Time(format!("{} seconds is out of range", seconds)))?;
        nsec -= 1_000_000_000;
    }
    Ok(EventTime::Real { sec, nsec })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    event_type: u8,
    flags: EventFlags,
    tag: u8,
    queue: u8,
    time: EventTime,
    source: Address,
    dest: Address,
    payload: Payload,
}

impl Event {
    /// A tick-stamped, absolute-time event sent directly to subscribers.
    pub fn new(event_type: u8) -> Result<Self> {
        Self::with_time(event_type, TimestampKind::Tick, TimeMode::Absolute)
    }

    pub fn with_time(event_type: u8, timestamp: TimestampKind, time_mode: TimeMode) -> Result<Self> {
        let class = classify(event_type).ok_or(SeqError::InvalidType(event_type))?;
        Ok(Self {
            event_type,
            flags: EventFlags {
                timestamp,
                time_mode,
                high_priority: false,
                length: length_for(class),
            },
            tag: 0,
            queue: queue::DIRECT,
            time: EventTime::zero(timestamp),
            source: Address::default(),
            dest: Address::SUBSCRIBERS,
            payload: Payload::empty_for(class),
        })
    }

    /// Build from already-decoded parts. `payload` must match `event_type`'s
    /// class, or be `Raw`/`Ext` for codes outside the known table.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        event_type: u8,
        flags: EventFlags,
        tag: u8,
        queue: u8,
        time: EventTime,
        source: Address,
        dest: Address,
        payload: Payload,
    ) -> Self {
        Self {
            event_type,
            flags,
            tag,
            queue,
            time,
            source,
            dest,
            payload,
        }
    }

    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self::fixed(
            ev::NOTEON,
            Payload::Note(Note {
                channel,
                note,
                velocity,
                ..Note::default()
            }),
        )
    }

    pub fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        Self::fixed(
            ev::NOTEOFF,
            Payload::Note(Note {
                channel,
                note,
                velocity,
                ..Note::default()
            }),
        )
    }

    pub fn full_note(channel: u8, note: u8, velocity: u8, off_velocity: u8, duration: u32) -> Self {
        Self::fixed(
            ev::NOTE,
            Payload::Note(Note {
                channel,
                note,
                velocity,
                off_velocity,
                duration,
            }),
        )
    }

    pub fn controller(channel: u8, param: u32, value: i32) -> Self {
        Self::fixed(
            ev::CONTROLLER,
            Payload::Control(Control {
                channel,
                param,
                value,
            }),
        )
    }

    pub fn program_change(channel: u8, program: i32) -> Self {
        Self::fixed(
            ev::PGMCHANGE,
            Payload::Control(Control {
                channel,
                param: 0,
                value: program,
            }),
        )
    }

    pub fn pitch_bend(channel: u8, value: i32) -> Self {
        Self::fixed(
            ev::PITCHBEND,
            Payload::Control(Control {
                channel,
                param: 0,
                value,
            }),
        )
    }

    pub fn sysex(bytes: impl Into<Vec<u8>>) -> Self {
        let mut event = Self::fixed(ev::SYSEX, Payload::Ext(bytes.into()));
        event.flags.length = LengthKind::Variable;
        event
    }

    fn fixed(event_type: u8, payload: Payload) -> Self {
        Self {
            event_type,
            flags: EventFlags::default(),
            tag: 0,
            queue: queue::DIRECT,
            time: EventTime::Tick(0),
            source: Address::default(),
            dest: Address::SUBSCRIBERS,
            payload,
        }
    }

    pub fn event_type(&self) -> u8 {
        self.event_type
    }

    pub fn type_constant(&self) -> Constant {
        Constant::event_type(self.event_type)
    }

    /// Change the type. The current payload is dropped and replaced by an
    /// empty payload of the new shape; on failure nothing changes.
    pub fn set_type(&mut self, event_type: u8) -> Result<()> {
        let class = classify(event_type).ok_or(SeqError::InvalidType(event_type))?;
        self.event_type = event_type;
        self.flags.length = length_for(class);
        self.payload = Payload::empty_for(class);
        Ok(())
    }

    pub fn payload_class(&self) -> PayloadClass {
        classify(self.event_type).unwrap_or(match self.payload {
            Payload::Ext(_) => PayloadClass::Variable,
            _ => PayloadClass::Raw,
        })
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn flags(&self) -> EventFlags {
        self.flags
    }

    pub fn timestamp(&self) -> TimestampKind {
        self.flags.timestamp
    }

    /// Switch between tick and real time. A change resets the time to zero.
    pub fn set_timestamp(&mut self, kind: TimestampKind) {
        if self.flags.timestamp != kind {
            self.flags.timestamp = kind;
            self.time = EventTime::zero(kind);
        }
    }

    pub fn time_mode(&self) -> TimeMode {
        self.flags.time_mode
    }

    pub fn set_time_mode(&mut self, mode: TimeMode) {
        self.flags.time_mode = mode;
    }

    pub fn time(&self) -> EventTime {
        self.time
    }

    pub fn time_value(&self) -> TimeValue {
        self.time.into()
    }

    /// Set the time in the representation the timestamp flag selects.
    ///
    /// Tick events take whole ticks only. Real events take seconds; an
    /// integer is read as whole seconds.
    pub fn set_time(&mut self, value: TimeValue) -> Result<()> {
        self.time = match (self.flags.timestamp, value) {
            (TimestampKind::Tick, TimeValue::Ticks(t)) => EventTime::Tick(
                u32::try_from(t).map_err(|_| SeqError::Time(format!("tick {} out of range", t)))?,
            ),
            (TimestampKind::Tick, TimeValue::Seconds(s)) => {
                return Err(SeqError::Time(format!(
                    "tick-stamped event cannot take {} seconds",
                    s
                )))
            }
            (TimestampKind::Real, TimeValue::Ticks(t)) => {
                let sec = u32::try_from(t)
                    .map_err(|_| SeqError::Time(format!("{} seconds out of range", t)))?;
                EventTime::Real { sec, nsec: 0 }
            }
            (TimestampKind::Real, TimeValue::Seconds(s)) => seconds_to_real(s)?,
        };
        Ok(())
    }

    /// Set time and timestamp kind together.
    pub fn set_event_time(&mut self, time: EventTime) -> Result<()> {
        if let EventTime::Real { nsec, .. } = time {
            if nsec >= 1_000_000_000 {
                return Err(SeqError::Time(format!("{} nanoseconds out of range", nsec)));
            }
        }
        self.flags.timestamp = time.kind();
        self.time = time;
        Ok(())
    }

    pub fn is_prior(&self) -> bool {
        self.flags.high_priority
    }

    pub fn set_priority(&mut self, high: bool) {
        self.flags.high_priority = high;
    }

    pub fn tag(&self) -> u8 {
        self.tag
    }

    pub fn set_tag(&mut self, tag: u8) {
        self.tag = tag;
    }

    pub fn queue(&self) -> u8 {
        self.queue
    }

    pub fn queue_constant(&self) -> Constant {
        Constant::resolve(Category::Queue, self.queue as i64)
    }

    pub fn set_queue(&mut self, queue: u8) {
        self.queue = queue;
    }

    /// Bypass queues: deliver immediately.
    pub fn set_direct(&mut self) {
        self.queue = queue::DIRECT;
    }

    pub fn is_direct(&self) -> bool {
        self.queue == queue::DIRECT
    }

    pub fn source(&self) -> Address {
        self.source
    }

    pub fn set_source(&mut self, source: Address) {
        self.source = source;
    }

    pub fn dest(&self) -> Address {
        self.dest
    }

    pub fn set_dest(&mut self, dest: Address) {
        self.dest = dest;
    }

    /// Deliver to everything subscribed to the source port.
    pub fn set_subs(&mut self) {
        self.dest = Address::SUBSCRIBERS;
    }

    pub fn set_broadcast(&mut self) {
        self.dest = Address::BROADCAST;
    }

    pub fn is_tick(&self) -> bool {
        self.flags.timestamp == TimestampKind::Tick
    }

    pub fn is_real(&self) -> bool {
        self.flags.timestamp == TimestampKind::Real
    }

    pub fn is_abstime(&self) -> bool {
        self.flags.time_mode == TimeMode::Absolute
    }

    pub fn is_reltime(&self) -> bool {
        self.flags.time_mode == TimeMode::Relative
    }

    pub fn is_result_type(&self) -> bool {
        payload::is_result_type(self.event_type)
    }

    pub fn is_note_type(&self) -> bool {
        payload::is_note_type(self.event_type)
    }

    pub fn is_control_type(&self) -> bool {
        payload::is_control_type(self.event_type)
    }

    pub fn is_channel_type(&self) -> bool {
        payload::is_channel_type(self.event_type)
    }

    pub fn is_queue_type(&self) -> bool {
        payload::is_queue_type(self.event_type)
    }

    pub fn is_message_type(&self) -> bool {
        payload::is_message_type(self.event_type)
    }

    pub fn is_subscribe_type(&self) -> bool {
        payload::is_subscribe_type(self.event_type)
    }

    pub fn is_user_type(&self) -> bool {
        payload::is_user_type(self.event_type)
    }

    pub fn is_fixed_type(&self) -> bool {
        payload::is_fixed_type(self.event_type)
    }

    pub fn is_variable_type(&self) -> bool {
        payload::is_variable_type(self.event_type)
    }

    pub fn is_varusr_type(&self) -> bool {
        payload::is_varusr_type(self.event_type)
    }

    pub fn is_reserved(&self) -> bool {
        payload::is_reserved(self.event_type)
    }

    /// The fields valid for the current type, and only those.
    pub fn get_data(&self) -> DataMap {
        payload::get_data(self.payload_class(), &self.payload)
    }

    /// Write the recognised keys of `data` in the fixed order note, control,
    /// ext, queue, addr, connect, result. Keys outside the current type's
    /// schema are ignored. Fails without changes if any value does not fit.
    pub fn set_data(&mut self, data: &DataMap) -> Result<()> {
        let class = self.payload_class();
        payload::set_data(class, &mut self.payload, data)
    }

    fn mismatch(&self, wanted: &'static str) -> SeqError {
        mismatch(self.event_type, wanted)
    }

    pub fn note(&self) -> Result<&Note> {
        match &self.payload {
            Payload::Note(n) => Ok(n),
            _ => Err(self.mismatch("note")),
        }
    }

    pub fn note_mut(&mut self) -> Result<&mut Note> {
        let event_type = self.event_type;
        match &mut self.payload {
            Payload::Note(n) => Ok(n),
            _ => Err(mismatch(event_type, "note")),
        }
    }

    pub fn control(&self) -> Result<&Control> {
        match &self.payload {
            Payload::Control(c) if self.payload_class() != PayloadClass::Value => Ok(c),
            _ => Err(self.mismatch("control")),
        }
    }

    pub fn control_mut(&mut self) -> Result<&mut Control> {
        let class = self.payload_class();
        let event_type = self.event_type;
        match &mut self.payload {
            Payload::Control(c) if class != PayloadClass::Value => Ok(c),
            _ => Err(mismatch(event_type, "control")),
        }
    }

    /// The single value of song position, frame and signature events.
    pub fn value(&self) -> Result<i32> {
        match &self.payload {
            Payload::Control(c) if self.payload_class() == PayloadClass::Value => Ok(c.value),
            _ => Err(self.mismatch("value")),
        }
    }

    pub fn set_value(&mut self, value: i32) -> Result<()> {
        let event_type = self.event_type;
        let class = self.payload_class();
        match &mut self.payload {
            Payload::Control(c) if class == PayloadClass::Value => {
                c.value = value;
                Ok(())
            }
            _ => Err(mismatch(event_type, "value")),
        }
    }

    pub fn queue_control(&self) -> Result<&QueueControl> {
        match &self.payload {
            Payload::Queue(q) => Ok(q),
            _ => Err(self.mismatch("queue")),
        }
    }

    pub fn set_queue_control(&mut self, control: QueueControl) -> Result<()> {
        let event_type = self.event_type;
        match &mut self.payload {
            Payload::Queue(q) => {
                *q = control;
                Ok(())
            }
            _ => Err(mismatch(event_type, "queue")),
        }
    }

    pub fn addr(&self) -> Result<Address> {
        match &self.payload {
            Payload::Addr(a) => Ok(*a),
            _ => Err(self.mismatch("address")),
        }
    }

    pub fn set_addr(&mut self, addr: Address) -> Result<()> {
        let event_type = self.event_type;
        match &mut self.payload {
            Payload::Addr(a) => {
                *a = addr;
                Ok(())
            }
            _ => Err(mismatch(event_type, "address")),
        }
    }

    pub fn connect(&self) -> Result<Connection> {
        match &self.payload {
            Payload::Connect(c) => Ok(*c),
            _ => Err(self.mismatch("connect")),
        }
    }

    pub fn set_connect(&mut self, connection: Connection) -> Result<()> {
        let event_type = self.event_type;
        match &mut self.payload {
            Payload::Connect(c) => {
                *c = connection;
                Ok(())
            }
            _ => Err(mismatch(event_type, "connect")),
        }
    }

    pub fn result(&self) -> Result<EventResult> {
        match &self.payload {
            Payload::Result(r) => Ok(*r),
            _ => Err(self.mismatch("result")),
        }
    }

    pub fn set_result(&mut self, result: EventResult) -> Result<()> {
        let event_type = self.event_type;
        match &mut self.payload {
            Payload::Result(r) => {
                *r = result;
                Ok(())
            }
            _ => Err(mismatch(event_type, "result")),
        }
    }

    pub fn ext(&self) -> Result<&[u8]> {
        match &self.payload {
            Payload::Ext(bytes) => Ok(bytes),
            _ => Err(self.mismatch("ext")),
        }
    }

    /// Replace the variable payload; the old buffer is dropped.
    pub fn set_ext(&mut self, bytes: impl Into<Vec<u8>>) -> Result<()> {
        let event_type = self.event_type;
        let bytes = bytes.into();
        if u32::try_from(bytes.len()).is_err() {
            return Err(SeqError::invalid_value("ext", bytes.len()));
        }
        match &mut self.payload {
            Payload::Ext(current) => {
                *current = bytes;
                Ok(())
            }
            _ => Err(mismatch(event_type, "ext")),
        }
    }
}

fn mismatch(event_type: u8, wanted: &'static str) -> SeqError {
    SeqError::TypeMismatch { event_type, wanted }
}

fn length_for(class: PayloadClass) -> LengthKind {
    match class {
        PayloadClass::Variable => LengthKind::Variable,
        _ => LengthKind::Fixed,
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.type_constant(), self.source, self.dest)?;
        match &self.payload {
            Payload::Ext(bytes) => write!(f, " [{} bytes]", bytes.len()),
            _ => {
                for (key, value) in self.get_data() {
                    if let DataValue::Int(v) = value {
                        write!(f, " {}={}", key, v)?;
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(DataKey, DataValue)]) -> DataMap {
        pairs.iter().cloned().collect()
    }

    #[test]
    fn test_new_defaults() {
        let e = Event::new(ev::NOTEON).unwrap();
        assert!(e.is_tick());
        assert!(e.is_abstime());
        assert!(e.is_direct());
        assert_eq!(e.dest(), Address::SUBSCRIBERS);
        assert_eq!(e.time(), EventTime::Tick(0));
        assert_eq!(e.flags().length, LengthKind::Fixed);
        assert_eq!(e.type_constant().name(), Some("SEQ_EVENT_NOTEON"));

        let sysex = Event::new(ev::SYSEX).unwrap();
        assert_eq!(sysex.flags().length, LengthKind::Variable);
    }

    #[test]
    fn test_new_rejects_unknown_type() {
        assert!(matches!(Event::new(3), Err(SeqError::InvalidType(3))));
        assert!(matches!(Event::new(201), Err(SeqError::InvalidType(201))));
    }

    #[test]
    fn test_note_round_trip() {
        let mut e = Event::new(ev::NOTE).unwrap();
        let input = data(&[
            (DataKey::NoteChannel, 9.into()),
            (DataKey::NoteNote, 36.into()),
            (DataKey::NoteVelocity, 127.into()),
            (DataKey::NoteOffVelocity, 64.into()),
            (DataKey::NoteDuration, 480.into()),
            (DataKey::ControlParam, 7.into()),
        ]);
        e.set_data(&input).unwrap();

        let out = e.get_data();
        assert_eq!(out.len(), 5);
        for (key, value) in &out {
            assert_eq!(input.get(key), Some(value));
        }
        assert_eq!(e.note().unwrap().duration, 480);
    }

    #[test]
    fn test_short_note_exposes_three_fields() {
        let e = Event::note_on(1, 60, 100);
        let keys: Vec<_> = e.get_data().into_keys().collect();
        assert_eq!(
            keys,
            vec![DataKey::NoteChannel, DataKey::NoteNote, DataKey::NoteVelocity]
        );
    }

    #[test]
    fn test_set_type_clears_payload() {
        let mut e = Event::note_on(1, 60, 100);
        e.set_type(ev::CONTROLLER).unwrap();
        let out = e.get_data();
        assert!(out.keys().all(|k| !k.as_str().starts_with("note.")));
        assert_eq!(out.get(&DataKey::ControlValue), Some(&DataValue::Int(0)));

        e.set_type(ev::SYSEX).unwrap();
        assert_eq!(e.ext().unwrap(), &[] as &[u8]);
        assert_eq!(e.flags().length, LengthKind::Variable);

        e.set_type(ev::NOTEOFF).unwrap();
        assert_eq!(e.flags().length, LengthKind::Fixed);
        assert_eq!(e.note().unwrap(), &Note::default());
    }

    #[test]
    fn test_set_type_failure_leaves_event_unchanged() {
        let mut e = Event::note_on(2, 61, 90);
        let before = e.clone();
        assert!(matches!(e.set_type(2), Err(SeqError::InvalidType(2))));
        assert_eq!(e, before);
    }

    #[test]
    fn test_ext_lengths() {
        for len in [0usize, 1, 256] {
            let bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let mut e = Event::new(ev::SYSEX).unwrap();
            e.set_data(&data(&[(DataKey::Ext, bytes.clone().into())])).unwrap();
            assert_eq!(e.get_data().get(&DataKey::Ext), Some(&DataValue::Bytes(bytes)));
        }
    }

    #[test]
    fn test_ext_replaced_on_repeat() {
        let mut e = Event::sysex(vec![0xF0, 0x7E, 0xF7]);
        e.set_data(&data(&[(DataKey::Ext, vec![1u8, 2].into())])).unwrap();
        e.set_data(&data(&[(DataKey::Ext, vec![9u8].into())])).unwrap();
        assert_eq!(e.ext().unwrap(), &[9]);
    }

    #[test]
    fn test_typed_accessor_mismatch() {
        let e = Event::controller(0, 7, 100);
        assert!(matches!(e.note(), Err(SeqError::TypeMismatch { .. })));
        assert!(matches!(e.ext(), Err(SeqError::TypeMismatch { .. })));
        assert!(matches!(e.value(), Err(SeqError::TypeMismatch { .. })));
        assert_eq!(e.control().unwrap().param, 7);

        let mut pos = Event::new(ev::SONGPOS).unwrap();
        pos.set_value(1024).unwrap();
        assert_eq!(pos.value().unwrap(), 1024);
        assert!(pos.control().is_err());
    }

    #[test]
    fn test_empty_and_raw_types_have_no_fields() {
        assert!(Event::new(ev::CLOCK).unwrap().get_data().is_empty());
        assert!(Event::new(ev::ECHO).unwrap().get_data().is_empty());
    }

    #[test]
    fn test_time_tick_and_real() {
        let mut e = Event::new(ev::NOTEON).unwrap();
        e.set_time(TimeValue::Ticks(960)).unwrap();
        assert_eq!(e.time(), EventTime::Tick(960));
        assert!(matches!(e.set_time(TimeValue::Seconds(1.5)), Err(SeqError::Time(_))));
        assert!(matches!(e.set_time(TimeValue::Ticks(-1)), Err(SeqError::Time(_))));

        e.set_timestamp(TimestampKind::Real);
        assert_eq!(e.time(), EventTime::Real { sec: 0, nsec: 0 });

        e.set_time(TimeValue::Seconds(2.25)).unwrap();
        assert_eq!(e.time(), EventTime::Real { sec: 2, nsec: 250_000_000 });
        assert_eq!(e.time_value(), TimeValue::Seconds(2.25));

        e.set_time(TimeValue::Ticks(3)).unwrap();
        assert_eq!(e.time(), EventTime::Real { sec: 3, nsec: 0 });

        assert!(e.set_time(TimeValue::Seconds(f64::NAN)).is_err());
        assert!(e.set_time(TimeValue::Seconds(-0.5)).is_err());
    }

    #[test]
    fn test_flag_bits() {
        let mut e = Event::with_time(ev::SYSEX, TimestampKind::Real, TimeMode::Relative).unwrap();
        e.set_priority(true);
        let bits = e.flags().bits();
        assert_eq!(bits, 1 | 2 | 4 | 16);
        assert_eq!(EventFlags::from_bits(bits), e.flags());
    }

    #[test]
    fn test_connect_and_addr_payloads() {
        let mut e = Event::new(ev::PORT_SUBSCRIBED).unwrap();
        e.set_data(&data(&[
            (DataKey::ConnectSenderClient, 128.into()),
            (DataKey::ConnectSenderPort, 0.into()),
            (DataKey::ConnectDestClient, 129.into()),
            (DataKey::ConnectDestPort, 1.into()),
        ]))
        .unwrap();
        assert_eq!(
            e.connect().unwrap(),
            Connection {
                sender: Address::new(128, 0),
                dest: Address::new(129, 1),
            }
        );

        let mut c = Event::new(ev::CLIENT_START).unwrap();
        c.set_addr(Address::new(130, 5)).unwrap();
        // Client announcements only carry the client
        assert_eq!(c.get_data().len(), 1);
    }
}
