//! The driver's native 28-byte event record.
//!
//! Layout (native endianness):
//!
//! | offset | field |
//! |--------|-------|
//! | 0 | type |
//! | 1 | flags |
//! | 2 | tag |
//! | 3 | queue |
//! | 4 | tick, or sec + nsec |
//! | 12 | source client, port |
//! | 14 | dest client, port |
//! | 16 | 12-byte data union |
//!
//! Variable payloads store `len: u32` at data offset 0 followed by a packed
//! pointer. In a byte stream the payload bytes follow the record directly
//! and the pointer is left zero.

use super::payload::{Connection, Control, EventResult, Note, QueueControl};
use super::{classify, Event, EventFlags, EventTime, LengthKind, Payload, PayloadClass, TimestampKind};
use crate::address::Address;
use crate::error::{Result, SeqError};

pub const RAW_EVENT_SIZE: usize = 28;
const DATA: usize = 16;

/// Native event record, aligned as the driver expects.
#[repr(C, align(4))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent(pub [u8; RAW_EVENT_SIZE]);

impl Default for RawEvent {
    fn default() -> Self {
        RawEvent([0; RAW_EVENT_SIZE])
    }
}

impl RawEvent {
    pub fn event_type(&self) -> u8 {
        self.0[0]
    }

    pub fn flags(&self) -> EventFlags {
        EventFlags::from_bits(self.0[1])
    }

    pub fn is_variable(&self) -> bool {
        self.flags().length != LengthKind::Fixed
    }

    /// Length of the variable payload as recorded in the data union.
    pub fn ext_len(&self) -> usize {
        read_u32(&self.0, DATA) as usize
    }

    /// Store the address of the variable payload in the data union.
    pub fn set_ext_ptr(&mut self, ptr: *const u8) {
        let addr = (ptr as usize).to_ne_bytes();
        self.0[DATA + 4..DATA + 4 + addr.len()].copy_from_slice(&addr);
    }

    /// Address of the variable payload recorded in the data union.
    pub fn ext_ptr(&self) -> *const u8 {
        const N: usize = std::mem::size_of::<usize>();
        let mut addr = [0u8; N];
        addr.copy_from_slice(&self.0[DATA + 4..DATA + 4 + N]);
        usize::from_ne_bytes(addr) as *const u8
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_i32(buf: &[u8], at: usize) -> i32 {
    i32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn write_u32(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_ne_bytes());
}

fn write_i32(buf: &mut [u8], at: usize, v: i32) {
    buf[at..at + 4].copy_from_slice(&v.to_ne_bytes());
}

/// Encode the fixed record. For variable payloads only the length is set.
pub fn encode_header(event: &Event) -> RawEvent {
    let mut raw = RawEvent::default();
    let b = &mut raw.0;

    b[0] = event.event_type();
    b[1] = event.flags().bits();
    b[2] = event.tag();
    b[3] = event.queue();
    match event.time() {
        EventTime::Tick(tick) => write_u32(b, 4, tick),
        EventTime::Real { sec, nsec } => {
            write_u32(b, 4, sec);
            write_u32(b, 8, nsec);
        }
    }
    let (src, dst) = (event.source(), event.dest());
    b[12] = src.client;
    b[13] = src.port;
    b[14] = dst.client;
    b[15] = dst.port;

    match event.payload() {
        Payload::Note(n) => {
            b[DATA] = n.channel;
            b[DATA + 1] = n.note;
            b[DATA + 2] = n.velocity;
            b[DATA + 3] = n.off_velocity;
            write_u32(b, DATA + 4, n.duration);
        }
        Payload::Control(c) => {
            b[DATA] = c.channel;
            write_u32(b, DATA + 4, c.param);
            write_i32(b, DATA + 8, c.value);
        }
        Payload::Queue(q) => {
            b[DATA] = q.queue;
            b[DATA + 4..DATA + 12].copy_from_slice(&q.param);
        }
        Payload::Addr(a) => {
            b[DATA] = a.client;
            b[DATA + 1] = a.port;
        }
        Payload::Connect(c) => {
            b[DATA] = c.sender.client;
            b[DATA + 1] = c.sender.port;
            b[DATA + 2] = c.dest.client;
            b[DATA + 3] = c.dest.port;
        }
        Payload::Result(r) => {
            write_i32(b, DATA, r.event);
            write_i32(b, DATA + 4, r.result);
        }
        Payload::Ext(bytes) => write_u32(b, DATA, bytes.len() as u32),
        Payload::Raw(raw_bytes) => b[DATA..DATA + 12].copy_from_slice(raw_bytes),
        Payload::Empty => {}
    }

    raw
}

/// Encode to the stream form: record followed by any variable bytes.
pub fn encode(event: &Event) -> Vec<u8> {
    let header = encode_header(event);
    let ext = event.ext().unwrap_or(&[]);
    let mut out = Vec::with_capacity(RAW_EVENT_SIZE + ext.len());
    out.extend_from_slice(&header.0);
    out.extend_from_slice(ext);
    out
}

/// Decode a record. `ext` supplies the variable bytes for variable events
/// and is copied, so the result owns everything it holds.
pub fn decode_header(raw: &RawEvent, ext: Option<&[u8]>) -> Result<Event> {
    let b = &raw.0;
    let event_type = b[0];
    let flags = EventFlags::from_bits(b[1]);
    let time = match flags.timestamp {
        TimestampKind::Tick => EventTime::Tick(read_u32(b, 4)),
        TimestampKind::Real => EventTime::Real {
            sec: read_u32(b, 4),
            nsec: read_u32(b, 8),
        },
    };
    let source = Address::new(b[12], b[13]);
    let dest = Address::new(b[14], b[15]);

    let class = match classify(event_type) {
        Some(class) => class,
        None if flags.length != LengthKind::Fixed => PayloadClass::Variable,
        None => PayloadClass::Raw,
    };

    let payload = match class {
        PayloadClass::Note | PayloadClass::ShortNote => Payload::Note(Note {
            channel: b[DATA],
            note: b[DATA + 1],
            velocity: b[DATA + 2],
            off_velocity: b[DATA + 3],
            duration: read_u32(b, DATA + 4),
        }),
        PayloadClass::Control | PayloadClass::ShortControl | PayloadClass::Value => {
            Payload::Control(Control {
                channel: b[DATA],
                param: read_u32(b, DATA + 4),
                value: read_i32(b, DATA + 8),
            })
        }
        PayloadClass::QueueControl => {
            let mut param = [0u8; 8];
            param.copy_from_slice(&b[DATA + 4..DATA + 12]);
            Payload::Queue(QueueControl {
                queue: b[DATA],
                param,
            })
        }
        PayloadClass::ClientAddr | PayloadClass::PortAddr => {
            Payload::Addr(Address::new(b[DATA], b[DATA + 1]))
        }
        PayloadClass::Connect => Payload::Connect(Connection {
            sender: Address::new(b[DATA], b[DATA + 1]),
            dest: Address::new(b[DATA + 2], b[DATA + 3]),
        }),
        PayloadClass::Result => Payload::Result(EventResult {
            event: read_i32(b, DATA),
            result: read_i32(b, DATA + 4),
        }),
        PayloadClass::Variable => {
            let len = raw.ext_len();
            let bytes = ext.unwrap_or(&[]);
            if bytes.len() != len {
                return Err(SeqError::Malformed(format!(
                    "variable payload is {} bytes, record says {}",
                    bytes.len(),
                    len
                )));
            }
            Payload::Ext(bytes.to_vec())
        }
        PayloadClass::Empty => Payload::Empty,
        PayloadClass::Raw => {
            let mut data = [0u8; 12];
            data.copy_from_slice(&b[DATA..DATA + 12]);
            Payload::Raw(data)
        }
    };

    Ok(Event::from_parts(
        event_type, flags, b[2], b[3], time, source, dest, payload,
    ))
}

/// Decode one event from the front of a stream. Returns the event and the
/// number of bytes consumed.
pub fn decode(bytes: &[u8]) -> Result<(Event, usize)> {
    if bytes.len() < RAW_EVENT_SIZE {
        return Err(SeqError::Malformed(format!(
            "need {} bytes for an event record, have {}",
            RAW_EVENT_SIZE,
            bytes.len()
        )));
    }

    let mut raw = RawEvent::default();
    raw.0.copy_from_slice(&bytes[..RAW_EVENT_SIZE]);

    let variable = classify(raw.event_type())
        .map(|c| c == PayloadClass::Variable)
        .unwrap_or_else(|| raw.is_variable());
    if !variable {
        return Ok((decode_header(&raw, None)?, RAW_EVENT_SIZE));
    }

    let len = raw.ext_len();
    let end = RAW_EVENT_SIZE
        .checked_add(len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| {
            SeqError::Malformed(format!(
                "variable payload of {} bytes truncated to {}",
                len,
                bytes.len() - RAW_EVENT_SIZE
            ))
        })?;
    let event = decode_header(&raw, Some(&bytes[RAW_EVENT_SIZE..end]))?;
    Ok((event, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::event_type as ev;
    use crate::event::{TimeMode, TimeValue};

    #[test]
    fn test_record_size() {
        assert_eq!(std::mem::size_of::<RawEvent>(), RAW_EVENT_SIZE);
        assert_eq!(std::mem::align_of::<RawEvent>(), 4);
    }

    #[test]
    fn test_note_layout() {
        let mut e = Event::full_note(3, 64, 100, 40, 0x0102_0304);
        e.set_tag(7);
        e.set_queue(1);
        e.set_source(Address::new(128, 0));
        e.set_dest(Address::new(129, 2));
        e.set_time(TimeValue::Ticks(96)).unwrap();

        let raw = encode_header(&e);
        assert_eq!(raw.0[0], ev::NOTE);
        assert_eq!(raw.0[2], 7);
        assert_eq!(raw.0[3], 1);
        assert_eq!(read_u32(&raw.0, 4), 96);
        assert_eq!(&raw.0[12..16], &[128, 0, 129, 2]);
        assert_eq!(&raw.0[16..20], &[3, 64, 100, 40]);
        assert_eq!(read_u32(&raw.0, 20), 0x0102_0304);

        assert_eq!(decode_header(&raw, None).unwrap(), e);
    }

    #[test]
    fn test_real_time_layout() {
        let mut e = Event::with_time(ev::CONTROLLER, TimestampKind::Real, TimeMode::Relative).unwrap();
        e.set_time(TimeValue::Seconds(1.5)).unwrap();
        let raw = encode_header(&e);
        assert_eq!(raw.0[1] & 3, 3);
        assert_eq!(read_u32(&raw.0, 4), 1);
        assert_eq!(read_u32(&raw.0, 8), 500_000_000);
    }

    #[test]
    fn test_sysex_stream() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let e = Event::sysex(payload.clone());
        let mut stream = encode(&e);
        assert_eq!(stream.len(), RAW_EVENT_SIZE + 256);

        stream.extend_from_slice(&encode(&Event::note_on(0, 60, 1)));
        let (first, used) = decode(&stream).unwrap();
        assert_eq!(first.ext().unwrap(), payload.as_slice());
        let (second, used2) = decode(&stream[used..]).unwrap();
        assert_eq!(second.note().unwrap().note, 60);
        assert_eq!(used + used2, stream.len());
    }

    #[test]
    fn test_decode_truncated() {
        let stream = encode(&Event::sysex(vec![1, 2, 3, 4]));
        assert!(matches!(decode(&stream[..30]), Err(SeqError::Malformed(_))));
        assert!(matches!(decode(&stream[..10]), Err(SeqError::Malformed(_))));
    }

    #[test]
    fn test_unknown_type_kept_raw() {
        let mut raw = RawEvent::default();
        raw.0[0] = 120;
        raw.0[16..28].copy_from_slice(&[9; 12]);
        let e = decode_header(&raw, None).unwrap();
        assert!(e.is_reserved());
        assert_eq!(e.payload(), &Payload::Raw([9; 12]));
        assert!(e.get_data().is_empty());
        assert_eq!(encode_header(&e), raw);
    }

    #[test]
    fn test_ext_ptr_round_trip() {
        let bytes = [1u8, 2, 3];
        let mut raw = encode_header(&Event::sysex(bytes.to_vec()));
        raw.set_ext_ptr(bytes.as_ptr());
        assert_eq!(raw.ext_len(), 3);
        assert_eq!(raw.ext_ptr(), bytes.as_ptr());

        raw.set_ext_ptr(std::ptr::null());
        assert!(raw.ext_ptr().is_null());
        assert_eq!(raw.ext_len(), 3);
    }
}
