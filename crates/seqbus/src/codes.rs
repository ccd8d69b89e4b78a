//! Raw protocol codes as the sequencer driver defines them.
//!
//! These are the bare integers; [`crate::constants`] gives them names.

/// Event type codes (`SND_SEQ_EVENT_*`).
pub mod event_type {
    pub const SYSTEM: u8 = 0;
    pub const RESULT: u8 = 1;

    pub const NOTE: u8 = 5;
    pub const NOTEON: u8 = 6;
    pub const NOTEOFF: u8 = 7;
    pub const KEYPRESS: u8 = 8;

    pub const CONTROLLER: u8 = 10;
    pub const PGMCHANGE: u8 = 11;
    pub const CHANPRESS: u8 = 12;
    pub const PITCHBEND: u8 = 13;
    pub const CONTROL14: u8 = 14;
    pub const NONREGPARAM: u8 = 15;
    pub const REGPARAM: u8 = 16;

    pub const SONGPOS: u8 = 20;
    pub const SONGSEL: u8 = 21;
    pub const QFRAME: u8 = 22;
    pub const TIMESIGN: u8 = 23;
    pub const KEYSIGN: u8 = 24;

    pub const START: u8 = 30;
    pub const CONTINUE: u8 = 31;
    pub const STOP: u8 = 32;
    pub const SETPOS_TICK: u8 = 33;
    pub const SETPOS_TIME: u8 = 34;
    pub const TEMPO: u8 = 35;
    pub const CLOCK: u8 = 36;
    pub const TICK: u8 = 37;
    pub const QUEUE_SKEW: u8 = 38;
    pub const SYNC_POS: u8 = 39;

    pub const TUNE_REQUEST: u8 = 40;
    pub const RESET: u8 = 41;
    pub const SENSING: u8 = 42;

    pub const ECHO: u8 = 50;
    pub const OSS: u8 = 51;

    pub const CLIENT_START: u8 = 60;
    pub const CLIENT_EXIT: u8 = 61;
    pub const CLIENT_CHANGE: u8 = 62;
    pub const PORT_START: u8 = 63;
    pub const PORT_EXIT: u8 = 64;
    pub const PORT_CHANGE: u8 = 65;
    pub const PORT_SUBSCRIBED: u8 = 66;
    pub const PORT_UNSUBSCRIBED: u8 = 67;

    pub const USR0: u8 = 90;
    pub const USR9: u8 = 99;

    pub const SYSEX: u8 = 130;
    pub const BOUNCE: u8 = 131;
    pub const USR_VAR0: u8 = 135;
    pub const USR_VAR4: u8 = 139;

    pub const NONE: u8 = 255;
}

/// Event flag bits (`SND_SEQ_TIME_*`, `SND_SEQ_EVENT_LENGTH_*`, `SND_SEQ_PRIORITY_*`).
pub mod flags {
    pub const TIME_STAMP_TICK: u8 = 0;
    pub const TIME_STAMP_REAL: u8 = 1;
    pub const TIME_STAMP_MASK: u8 = 1;

    pub const TIME_MODE_ABS: u8 = 0;
    pub const TIME_MODE_REL: u8 = 2;
    pub const TIME_MODE_MASK: u8 = 2;

    pub const LENGTH_FIXED: u8 = 0;
    pub const LENGTH_VARIABLE: u8 = 4;
    pub const LENGTH_VARUSR: u8 = 8;
    pub const LENGTH_MASK: u8 = 12;

    pub const PRIORITY_NORMAL: u8 = 0;
    pub const PRIORITY_HIGH: u8 = 16;
    pub const PRIORITY_MASK: u8 = 16;
}

/// Open directions (`SND_SEQ_OPEN_*`).
pub mod streams {
    pub const OUTPUT: i32 = 1;
    pub const INPUT: i32 = 2;
    pub const DUPLEX: i32 = 3;
}

/// Blocking modes.
pub mod mode {
    pub const BLOCK: i32 = 0;
    pub const NONBLOCK: i32 = 1;
}

/// Special queue ids.
pub mod queue {
    pub const DIRECT: u8 = 253;
}

/// Reserved client ids (`SND_SEQ_CLIENT_SYSTEM`, `SND_SEQ_ADDRESS_*`).
pub mod addr_client {
    pub const SYSTEM: u8 = 0;
    pub const UNKNOWN: u8 = 253;
    pub const SUBSCRIBERS: u8 = 254;
    pub const BROADCAST: u8 = 255;
}

/// Reserved port ids.
pub mod addr_port {
    pub const SYSTEM_TIMER: u8 = 0;
    pub const SYSTEM_ANNOUNCE: u8 = 1;
    pub const UNKNOWN: u8 = 253;
}

/// Client kinds (`SND_SEQ_*_CLIENT`).
pub mod client_type {
    pub const USER: i32 = 1;
    pub const KERNEL: i32 = 2;
}

/// Subscriber query direction (`SND_SEQ_QUERY_SUBS_*`).
pub mod query_subs {
    pub const READ: i32 = 0;
    pub const WRITE: i32 = 1;
}
