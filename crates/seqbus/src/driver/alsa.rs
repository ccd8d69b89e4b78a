//! The libasound sequencer backend.
//!
//! Graph and queue calls go through alsa-sys info objects, each owned by a
//! small RAII box. Events are handed to the library in their native record
//! form ([`RawEvent`]), so nothing is reinterpreted on the way through.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_uchar};
use std::ptr;

use alsa_sys as sys;
use tracing::{debug, trace};

use super::{InputOutcome, OpenParams, SeqDriver};
use crate::address::Address;
use crate::error::{DriverError, DriverResult};
use crate::event::wire::{self, RawEvent, RAW_EVENT_SIZE};
use crate::event::Event;
use crate::graph::{
    ClientInfo, ClientType, PortCaps, PortInfo, PortTypes, QueueInfo, QueueTempo, Subscriber,
    Subscription, SubsKind,
};
use crate::poll::{Interest, PollDescriptor};

fn alsa_error(code: c_int) -> DriverError {
    // SAFETY: snd_strerror returns a static, NUL-terminated string.
    let message = unsafe { CStr::from_ptr(sys::snd_strerror(code)) }
        .to_string_lossy()
        .into_owned();
    DriverError::new(code, message)
}

fn check(rc: c_int) -> DriverResult<c_int> {
    if rc < 0 {
        Err(alsa_error(rc))
    } else {
        Ok(rc)
    }
}

fn c_string(text: &str) -> DriverResult<CString> {
    CString::new(text).map_err(|_| DriverError::new(-libc::EINVAL, "string contains a NUL byte"))
}

fn owned_str(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    // SAFETY: libasound hands out NUL-terminated strings that live as long
    // as the info object we copy from.
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

/// Copy the 256-bit event type filter out of a client info object.
fn copy_event_filter(ptr: *const c_uchar) -> [u8; 32] {
    let mut filter = [0u8; 32];
    if !ptr.is_null() {
        // SAFETY: libasound's filter is a fixed 32 byte bitmap inside the
        // info object, which outlives this copy.
        let len = filter.len();
        filter.copy_from_slice(unsafe { std::slice::from_raw_parts(ptr, len) });
    }
    filter
}

fn c_addr(addr: Address) -> sys::snd_seq_addr_t {
    sys::snd_seq_addr_t {
        client: addr.client,
        port: addr.port,
    }
}

macro_rules! info_box {
    ($name:ident, $t:ty, $malloc:path, $free:path) => {
        struct $name(*mut $t);

        impl $name {
            fn new() -> DriverResult<Self> {
                let mut ptr = ptr::null_mut();
                // SAFETY: the allocator fills `ptr` on success.
                check(unsafe { $malloc(&mut ptr) })?;
                Ok(Self(ptr))
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                // SAFETY: allocated by the matching malloc in `new`.
                unsafe { $free(self.0) }
            }
        }
    };
}

info_box!(
    ClientInfoBox,
    sys::snd_seq_client_info_t,
    sys::snd_seq_client_info_malloc,
    sys::snd_seq_client_info_free
);
info_box!(
    PortInfoBox,
    sys::snd_seq_port_info_t,
    sys::snd_seq_port_info_malloc,
    sys::snd_seq_port_info_free
);
info_box!(
    QuerySubsBox,
    sys::snd_seq_query_subscribe_t,
    sys::snd_seq_query_subscribe_malloc,
    sys::snd_seq_query_subscribe_free
);
info_box!(
    PortSubsBox,
    sys::snd_seq_port_subscribe_t,
    sys::snd_seq_port_subscribe_malloc,
    sys::snd_seq_port_subscribe_free
);
info_box!(
    QueueTempoBox,
    sys::snd_seq_queue_tempo_t,
    sys::snd_seq_queue_tempo_malloc,
    sys::snd_seq_queue_tempo_free
);
info_box!(
    QueueInfoBox,
    sys::snd_seq_queue_info_t,
    sys::snd_seq_queue_info_malloc,
    sys::snd_seq_queue_info_free
);
info_box!(
    QueueStatusBox,
    sys::snd_seq_queue_status_t,
    sys::snd_seq_queue_status_malloc,
    sys::snd_seq_queue_status_free
);

/// A live handle on the kernel sequencer.
pub struct AlsaDriver {
    seq: *mut sys::snd_seq_t,
    client: u8,
}

// The handle is owned exclusively and never shared between threads.
unsafe impl Send for AlsaDriver {}

impl AlsaDriver {
    pub fn open(params: &OpenParams) -> DriverResult<Self> {
        let device = c_string(&params.device)?;
        let name = c_string(&params.client_name)?;
        let mode = if params.nonblock { sys::SND_SEQ_NONBLOCK as c_int } else { 0 };

        let mut seq = ptr::null_mut();
        // SAFETY: `seq` is filled on success; `device` outlives the call.
        check(unsafe { sys::snd_seq_open(&mut seq, device.as_ptr(), params.streams, mode) })?;
        let mut driver = Self { seq, client: 0 };

        // SAFETY: `seq` is a valid open handle from here on.
        let id = check(unsafe { sys::snd_seq_client_id(driver.seq) })?;
        driver.client = id as u8;
        check(unsafe { sys::snd_seq_set_client_name(driver.seq, name.as_ptr()) })?;

        debug!(device = %params.device, client = id, "opened ALSA sequencer");
        Ok(driver)
    }

    fn read_client(info: &ClientInfoBox) -> ClientInfo {
        // SAFETY: `info` holds a filled client info object.
        unsafe {
            let kind = sys::snd_seq_client_info_get_type(info.0) as i32;
            ClientInfo {
                id: sys::snd_seq_client_info_get_client(info.0) as u8,
                name: owned_str(sys::snd_seq_client_info_get_name(info.0)),
                client_type: ClientType::from_code(kind).unwrap_or(ClientType::User),
                broadcast_filter: sys::snd_seq_client_info_get_broadcast_filter(info.0) != 0,
                error_bounce: sys::snd_seq_client_info_get_error_bounce(info.0) != 0,
                event_filter: copy_event_filter(sys::snd_seq_client_info_get_event_filter(
                    info.0,
                )),
                num_ports: sys::snd_seq_client_info_get_num_ports(info.0).max(0) as u32,
                event_lost: sys::snd_seq_client_info_get_event_lost(info.0).max(0) as u32,
            }
        }
    }

    fn read_port(info: &PortInfoBox) -> PortInfo {
        // SAFETY: `info` holds a filled port info object.
        unsafe {
            PortInfo {
                addr: Address::new(
                    sys::snd_seq_port_info_get_client(info.0) as u8,
                    sys::snd_seq_port_info_get_port(info.0) as u8,
                ),
                name: owned_str(sys::snd_seq_port_info_get_name(info.0)),
                capability: PortCaps::from_bits_truncate(sys::snd_seq_port_info_get_capability(info.0)),
                port_type: PortTypes::from_bits_truncate(sys::snd_seq_port_info_get_type(info.0)),
            }
        }
    }

    fn port_subscribe(sender: Address, dest: Address) -> DriverResult<PortSubsBox> {
        let subs = PortSubsBox::new()?;
        let (sender, dest) = (c_addr(sender), c_addr(dest));
        // SAFETY: the setters copy the addresses.
        unsafe {
            sys::snd_seq_port_subscribe_set_sender(subs.0, &sender);
            sys::snd_seq_port_subscribe_set_dest(subs.0, &dest);
        }
        Ok(subs)
    }
}

impl Drop for AlsaDriver {
    fn drop(&mut self) {
        // SAFETY: closing the handle we opened; nothing uses it afterwards.
        unsafe {
            sys::snd_seq_close(self.seq);
        }
    }
}

impl SeqDriver for AlsaDriver {
    fn client_id(&self) -> u8 {
        self.client
    }

    fn set_client_name(&mut self, name: &str) -> DriverResult<()> {
        let name = c_string(name)?;
        check(unsafe { sys::snd_seq_set_client_name(self.seq, name.as_ptr()) })?;
        Ok(())
    }

    fn set_nonblock(&mut self, nonblock: bool) -> DriverResult<()> {
        check(unsafe { sys::snd_seq_nonblock(self.seq, nonblock as c_int) })?;
        Ok(())
    }

    fn create_port(&mut self, name: &str, caps: PortCaps, types: PortTypes) -> DriverResult<u8> {
        let name = c_string(name)?;
        let port = check(unsafe {
            sys::snd_seq_create_simple_port(self.seq, name.as_ptr(), caps.bits(), types.bits())
        })?;
        Ok(port as u8)
    }

    fn delete_port(&mut self, port: u8) -> DriverResult<()> {
        check(unsafe { sys::snd_seq_delete_simple_port(self.seq, port as c_int) })?;
        Ok(())
    }

    fn next_client(&self, prev: i32) -> DriverResult<Option<ClientInfo>> {
        let info = ClientInfoBox::new()?;
        // SAFETY: `info` is a valid allocation; the query fills it.
        let rc = unsafe {
            sys::snd_seq_client_info_set_client(info.0, prev);
            sys::snd_seq_query_next_client(self.seq, info.0)
        };
        if rc < 0 {
            return Ok(None);
        }
        Ok(Some(Self::read_client(&info)))
    }

    fn next_port(&self, client: u8, prev: i32) -> DriverResult<Option<PortInfo>> {
        let info = PortInfoBox::new()?;
        let rc = unsafe {
            sys::snd_seq_port_info_set_client(info.0, client as c_int);
            sys::snd_seq_port_info_set_port(info.0, prev);
            sys::snd_seq_query_next_port(self.seq, info.0)
        };
        if rc < 0 {
            return Ok(None);
        }
        Ok(Some(Self::read_port(&info)))
    }

    fn query_subscribers(
        &self,
        root: Address,
        kind: SubsKind,
        index: u32,
    ) -> DriverResult<Option<Subscriber>> {
        let query = QuerySubsBox::new()?;
        let root = c_addr(root);
        // SAFETY: `query` is valid; the root is copied by the setter.
        let rc = unsafe {
            sys::snd_seq_query_subscribe_set_root(query.0, &root);
            sys::snd_seq_query_subscribe_set_type(query.0, kind.code() as _);
            sys::snd_seq_query_subscribe_set_index(query.0, index as c_int);
            sys::snd_seq_query_port_subscribers(self.seq, query.0)
        };
        if rc < 0 {
            return Ok(None);
        }
        // SAFETY: a successful query fills every field read here.
        let subscriber = unsafe {
            let addr = &*sys::snd_seq_query_subscribe_get_addr(query.0);
            Subscriber {
                addr: Address::new(addr.client, addr.port),
                queue: sys::snd_seq_query_subscribe_get_queue(query.0) as u8,
                exclusive: sys::snd_seq_query_subscribe_get_exclusive(query.0) != 0,
                time_update: sys::snd_seq_query_subscribe_get_time_update(query.0) != 0,
                time_real: sys::snd_seq_query_subscribe_get_time_real(query.0) != 0,
            }
        };
        Ok(Some(subscriber))
    }

    fn client_info(&self, client: u8) -> DriverResult<ClientInfo> {
        let info = ClientInfoBox::new()?;
        check(unsafe { sys::snd_seq_get_any_client_info(self.seq, client as c_int, info.0) })?;
        Ok(Self::read_client(&info))
    }

    fn port_info(&self, addr: Address) -> DriverResult<PortInfo> {
        let info = PortInfoBox::new()?;
        check(unsafe {
            sys::snd_seq_get_any_port_info(self.seq, addr.client as c_int, addr.port as c_int, info.0)
        })?;
        Ok(Self::read_port(&info))
    }

    fn subscribe(&mut self, sub: &Subscription) -> DriverResult<()> {
        let subs = Self::port_subscribe(sub.sender, sub.dest)?;
        check(unsafe {
            sys::snd_seq_port_subscribe_set_queue(subs.0, sub.queue as c_int);
            sys::snd_seq_port_subscribe_set_exclusive(subs.0, sub.exclusive as c_int);
            sys::snd_seq_port_subscribe_set_time_update(subs.0, sub.time_update as c_int);
            sys::snd_seq_port_subscribe_set_time_real(subs.0, sub.time_real as c_int);
            sys::snd_seq_subscribe_port(self.seq, subs.0)
        })?;
        Ok(())
    }

    fn unsubscribe(&mut self, sender: Address, dest: Address) -> DriverResult<()> {
        let subs = Self::port_subscribe(sender, dest)?;
        check(unsafe { sys::snd_seq_unsubscribe_port(self.seq, subs.0) })?;
        Ok(())
    }

    fn subscription(&self, sender: Address, dest: Address) -> DriverResult<Subscription> {
        let subs = Self::port_subscribe(sender, dest)?;
        check(unsafe { sys::snd_seq_get_port_subscription(self.seq, subs.0) })?;
        // SAFETY: filled by the successful lookup above.
        unsafe {
            Ok(Subscription {
                sender,
                dest,
                queue: sys::snd_seq_port_subscribe_get_queue(subs.0) as u8,
                exclusive: sys::snd_seq_port_subscribe_get_exclusive(subs.0) != 0,
                time_update: sys::snd_seq_port_subscribe_get_time_update(subs.0) != 0,
                time_real: sys::snd_seq_port_subscribe_get_time_real(subs.0) != 0,
            })
        }
    }

    fn alloc_queue(&mut self, name: Option<&str>) -> DriverResult<u8> {
        let queue = match name {
            Some(name) => {
                let name = c_string(name)?;
                check(unsafe { sys::snd_seq_alloc_named_queue(self.seq, name.as_ptr()) })?
            }
            None => check(unsafe { sys::snd_seq_alloc_queue(self.seq) })?,
        };
        Ok(queue as u8)
    }

    fn free_queue(&mut self, queue: u8) -> DriverResult<()> {
        check(unsafe { sys::snd_seq_free_queue(self.seq, queue as c_int) })?;
        Ok(())
    }

    fn queue_tempo(&self, queue: u8) -> DriverResult<QueueTempo> {
        let tempo = QueueTempoBox::new()?;
        check(unsafe { sys::snd_seq_get_queue_tempo(self.seq, queue as c_int, tempo.0) })?;
        unsafe {
            Ok(QueueTempo {
                tempo: sys::snd_seq_queue_tempo_get_tempo(tempo.0),
                ppq: sys::snd_seq_queue_tempo_get_ppq(tempo.0),
            })
        }
    }

    fn set_queue_tempo(&mut self, queue: u8, value: QueueTempo) -> DriverResult<()> {
        let tempo = QueueTempoBox::new()?;
        // Start from the current settings so skew and friends are kept.
        check(unsafe { sys::snd_seq_get_queue_tempo(self.seq, queue as c_int, tempo.0) })?;
        check(unsafe {
            sys::snd_seq_queue_tempo_set_tempo(tempo.0, value.tempo);
            sys::snd_seq_queue_tempo_set_ppq(tempo.0, value.ppq);
            sys::snd_seq_set_queue_tempo(self.seq, queue as c_int, tempo.0)
        })?;
        Ok(())
    }

    fn queue_info(&self, queue: u8) -> DriverResult<QueueInfo> {
        let tempo = self.queue_tempo(queue)?;
        let info = QueueInfoBox::new()?;
        check(unsafe { sys::snd_seq_get_queue_info(self.seq, queue as c_int, info.0) })?;
        let status = QueueStatusBox::new()?;
        check(unsafe { sys::snd_seq_get_queue_status(self.seq, queue as c_int, status.0) })?;

        let name = owned_str(unsafe { sys::snd_seq_queue_info_get_name(info.0) });
        let running = unsafe { sys::snd_seq_queue_status_get_status(status.0) } & 1 != 0;
        Ok(QueueInfo {
            id: queue,
            name: (!name.is_empty()).then_some(name),
            tempo: tempo.tempo,
            ppq: tempo.ppq,
            running,
        })
    }

    fn control_queue(&mut self, queue: u8, event_type: u8, value: i32) -> DriverResult<()> {
        check(unsafe {
            sys::snd_seq_control_queue(
                self.seq,
                queue as c_int,
                event_type as c_int,
                value,
                ptr::null_mut(),
            )
        })?;
        self.drain_output()?;
        Ok(())
    }

    fn event_input(&mut self) -> DriverResult<InputOutcome> {
        let mut cell: *mut sys::snd_seq_event_t = ptr::null_mut();
        let rc = unsafe { sys::snd_seq_event_input(self.seq, &mut cell) };
        if rc == -libc::EAGAIN {
            return Ok(InputOutcome::WouldBlock);
        }
        let remaining = check(rc)?;
        if cell.is_null() {
            return Ok(InputOutcome::WouldBlock);
        }

        let mut raw = RawEvent::default();
        // SAFETY: the library's event cell is a full native record and stays
        // valid until the next input call.
        unsafe {
            ptr::copy_nonoverlapping(cell as *const u8, raw.0.as_mut_ptr(), RAW_EVENT_SIZE);
        }
        let ext = if raw.is_variable() && !raw.ext_ptr().is_null() {
            // SAFETY: variable cells point at `ext_len` bytes owned by the
            // library's input buffer; they are copied out immediately.
            Some(unsafe { std::slice::from_raw_parts(raw.ext_ptr(), raw.ext_len()) })
        } else {
            None
        };
        let event = wire::decode_header(&raw, ext)
            .map_err(|e| DriverError::new(-libc::EINVAL, e.to_string()))?;
        trace!(event_type = event.event_type(), remaining, "event input");
        Ok(InputOutcome::Event {
            event,
            remaining: remaining as usize,
        })
    }

    fn input_pending(&mut self, fetch: bool) -> DriverResult<usize> {
        let pending = check(unsafe { sys::snd_seq_event_input_pending(self.seq, fetch as c_int) })?;
        Ok(pending as usize)
    }

    fn event_output(&mut self, event: &Event) -> DriverResult<usize> {
        let mut raw = wire::encode_header(event);
        let ext = event.ext().ok();
        if let Some(bytes) = ext {
            raw.set_ext_ptr(bytes.as_ptr());
        }
        // SAFETY: `raw` has the native layout and alignment; the library
        // copies the record and any ext bytes before returning.
        let queued = check(unsafe {
            sys::snd_seq_event_output(self.seq, &mut raw as *mut RawEvent as *mut sys::snd_seq_event_t)
        })?;
        Ok(queued as usize)
    }

    fn drain_output(&mut self) -> DriverResult<usize> {
        let left = check(unsafe { sys::snd_seq_drain_output(self.seq) })?;
        Ok(left as usize)
    }

    fn sync_output_queue(&mut self) -> DriverResult<()> {
        check(unsafe { sys::snd_seq_sync_output_queue(self.seq) })?;
        Ok(())
    }

    fn poll_descriptors(&self, interest: Interest) -> DriverResult<Vec<PollDescriptor>> {
        let events = interest.events();
        let count = check(unsafe { sys::snd_seq_poll_descriptors_count(self.seq, events) })?;
        let mut fds = vec![
            libc::pollfd {
                fd: -1,
                events: 0,
                revents: 0,
            };
            count as usize
        ];
        // SAFETY: libc::pollfd and the library's pollfd share one layout;
        // the buffer holds `count` entries.
        let filled = unsafe {
            sys::snd_seq_poll_descriptors(
                self.seq,
                fds.as_mut_ptr() as *mut libc::pollfd,
                count as _,
                events,
            )
        };
        let filled = check(filled)? as usize;
        Ok(fds
            .into_iter()
            .take(filled)
            .map(|p| PollDescriptor::new(p.fd, p.events))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::streams;

    fn open() -> Option<AlsaDriver> {
        AlsaDriver::open(&OpenParams {
            device: "default".to_string(),
            client_name: "seqbus-test".to_string(),
            streams: streams::DUPLEX,
            nonblock: true,
        })
        .ok()
    }

    #[test]
    fn test_open_and_enumerate() {
        let Some(driver) = open() else {
            println!("Skipping test - ALSA sequencer not available");
            return;
        };
        assert!(driver.client_id() > 0);
        let system = driver.next_client(-1).unwrap();
        assert!(system.is_some());
        let me = driver.client_info(driver.client_id()).unwrap();
        assert_eq!(me.name, "seqbus-test");
    }

    #[test]
    fn test_port_and_queue_roundtrip() {
        let Some(mut driver) = open() else {
            println!("Skipping test - ALSA sequencer not available");
            return;
        };
        let port = driver
            .create_port("scratch", PortCaps::READ | PortCaps::SUBS_READ, PortTypes::APPLICATION)
            .unwrap();
        let info = driver.port_info(Address::new(driver.client_id(), port)).unwrap();
        assert_eq!(info.name, "scratch");

        let queue = driver.alloc_queue(Some("scratch-queue")).unwrap();
        driver
            .set_queue_tempo(queue, QueueTempo { tempo: 400_000, ppq: 192 })
            .unwrap();
        let tempo = driver.queue_tempo(queue).unwrap();
        assert_eq!((tempo.tempo, tempo.ppq), (400_000, 192));
        driver.free_queue(queue).unwrap();
        driver.delete_port(port).unwrap();
    }

    #[test]
    fn test_copy_event_filter() {
        assert_eq!(copy_event_filter(ptr::null()), [0; 32]);

        let mut bits = [0u8; 32];
        bits[0] = 1 << 6;
        bits[31] = 0x80;
        assert_eq!(copy_event_filter(bits.as_ptr()), bits);
    }

    #[test]
    fn test_client_event_filter_is_reported() {
        use crate::codes::event_type::{CONTROLLER, NOTEON};

        let Some(driver) = open() else {
            println!("Skipping test - ALSA sequencer not available");
            return;
        };
        let me = driver.client_info(driver.client_id()).unwrap();
        assert!(me.event_filter.iter().all(|b| *b == 0));

        // SAFETY: the handle is open for the life of `driver`.
        let rc = unsafe { sys::snd_seq_set_client_event_filter(driver.seq, NOTEON as c_int) };
        assert!(rc >= 0);

        let me = driver.client_info(driver.client_id()).unwrap();
        assert!(me.accepts(NOTEON));
        assert!(!me.accepts(CONTROLLER));
    }

    #[test]
    fn test_nonblocking_input_is_empty() {
        let Some(mut driver) = open() else {
            println!("Skipping test - ALSA sequencer not available");
            return;
        };
        assert!(matches!(driver.event_input().unwrap(), InputOutcome::WouldBlock));
        assert!(!driver.poll_descriptors(Interest::Input).unwrap().is_empty());
    }
}
