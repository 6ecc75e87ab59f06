//! NetSIO event identifiers and message type.
//!
//! The same event identifiers travel on both wires; only the framing
//! differs. On UDP each datagram is `<event:u8><arg…>`; on TCP the event
//! rides a 17-byte header (see [`crate::host::framing`]).

use std::fmt;

use tokio::time::Instant;

/// NetSIO event identifiers.
///
/// Identifiers below [`event::CONN_MGMT`] are data events; identifiers at
/// or above it are connection management and never reach the emulator's
/// serial path.
pub mod event {
    /// Single serial byte. Argument: the byte.
    pub const DATA_BYTE: u8 = 0x01;
    /// Block of serial bytes. Argument: the bytes.
    pub const DATA_BLOCK: u8 = 0x02;
    /// Serial byte that pauses the emulator until a response arrives.
    pub const DATA_BYTE_SYNC: u8 = 0x09;
    /// SIO command line rising edge.
    pub const COMMAND_OFF: u8 = 0x10;
    /// SIO command line falling edge. Argument: device id.
    pub const COMMAND_ON: u8 = 0x11;
    /// Command line rising edge that pauses the emulator. Argument:
    /// checksum, plus the hub-appended request serial number on UDP.
    pub const COMMAND_OFF_SYNC: u8 = 0x18;
    /// Cassette motor line low.
    pub const MOTOR_OFF: u8 = 0x20;
    /// Cassette motor line high.
    pub const MOTOR_ON: u8 = 0x21;
    /// Proceed line low.
    pub const PROCEED_OFF: u8 = 0x30;
    /// Proceed line high.
    pub const PROCEED_ON: u8 = 0x31;
    /// Interrupt line low.
    pub const INTERRUPT_OFF: u8 = 0x40;
    /// Interrupt line high.
    pub const INTERRUPT_ON: u8 = 0x41;
    /// Serial output speed changed. Argument: baud rate, u32 LE.
    pub const SPEED_CHANGE: u8 = 0x80;
    /// Response to a sync request. UDP argument:
    /// `[sn, type, ack, write_lo, write_hi]`.
    pub const SYNC_RESPONSE: u8 = 0x81;

    /// First connection-management identifier.
    pub const CONN_MGMT: u8 = 0xC0;
    /// Peripheral says goodbye.
    pub const DEVICE_DISCONNECT: u8 = 0xC0;
    /// Peripheral hello; registers the sender.
    pub const DEVICE_CONNECT: u8 = 0xC1;
    /// Reachability probe, answered regardless of registration.
    pub const PING_REQUEST: u8 = 0xC2;
    /// Answer to [`PING_REQUEST`].
    pub const PING_RESPONSE: u8 = 0xC3;
    /// Keep-alive from a registered peripheral.
    pub const ALIVE_REQUEST: u8 = 0xC4;
    /// Answer to [`ALIVE_REQUEST`].
    pub const ALIVE_RESPONSE: u8 = 0xC5;
    /// Peripheral announces its remaining credit. Argument: credit.
    pub const CREDIT_STATUS: u8 = 0xC6;
    /// Hub grants credit. Argument: credit.
    pub const CREDIT_UPDATE: u8 = 0xC7;

    /// Emulator warm reset.
    pub const WARM_RESET: u8 = 0xFE;
    /// Emulator cold reset.
    pub const COLD_RESET: u8 = 0xFF;

    /// Sync response type byte marking an empty response (no ACK byte).
    pub const EMPTY_SYNC: u8 = 0x00;
    /// Sync response type byte marking a response with an ACK byte.
    pub const ACK_SYNC: u8 = 0x01;
}

/// Result returned to the emulator when a sync request produced nothing:
/// timeout, no peripheral registered, or a DATA_BLOCK delivered
/// synchronously. By convention the empty indicator carries no event tag.
pub const EMPTY_SYNC_RESULT: u32 = 0x00;

/// Pack a non-empty sync result for the emulator.
///
/// Bits 0-7: the SYNC_RESPONSE event tag. Bits 8-15: the SIO ACK byte
/// ('A'/'N'/'C'/'E'). Bits 16-31: anticipated next-write size, LE.
#[must_use]
pub fn pack_sync_result(ack: u8, write_lo: u8, write_hi: u8) -> u32 {
    u32::from(event::SYNC_RESPONSE)
        | u32::from(ack) << 8
        | u32::from(write_lo) << 16
        | u32::from(write_hi) << 24
}

/// True for connection-management identifiers (never serial traffic).
#[must_use]
pub fn is_conn_mgmt(id: u8) -> bool {
    id >= event::CONN_MGMT
}

/// A NetSIO message: event identifier plus argument bytes.
///
/// `time` is the capture instant, used for latency diagnostics in debug
/// logs; it does not travel on the wire.
#[derive(Debug, Clone)]
pub struct NetSioMsg {
    /// Event identifier.
    pub id: u8,
    /// Argument bytes; interpretation depends on `id`.
    pub arg: Vec<u8>,
    /// Instant the message entered the hub.
    pub time: Instant,
}

impl NetSioMsg {
    /// Message with an empty argument.
    #[must_use]
    pub fn new(id: u8) -> Self {
        Self::with_arg(id, Vec::new())
    }

    /// Message with the given argument bytes.
    #[must_use]
    pub fn with_arg(id: u8, arg: Vec<u8>) -> Self {
        Self {
            id,
            arg,
            time: Instant::now(),
        }
    }

    /// Message with a single-byte argument.
    #[must_use]
    pub fn with_byte(id: u8, byte: u8) -> Self {
        Self::with_arg(id, vec![byte])
    }

    /// Microseconds since the message was captured.
    #[must_use]
    pub fn elapsed_us(&self) -> u128 {
        self.time.elapsed().as_micros()
    }

    /// Encode as a UDP datagram: `<id><arg…>`.
    #[must_use]
    pub fn to_datagram(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.arg.len());
        buf.push(self.id);
        buf.extend_from_slice(&self.arg);
        buf
    }

    /// Decode a UDP datagram. Returns `None` for an empty datagram.
    #[must_use]
    pub fn from_datagram(data: &[u8]) -> Option<Self> {
        let (&id, arg) = data.split_first()?;
        Some(Self::with_arg(id, arg.to_vec()))
    }
}

impl fmt::Display for NetSioMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}[{}]", self.id, self.arg.len())?;
        for b in self.arg.iter().take(8) {
            write!(f, " {b:02X}")?;
        }
        if self.arg.len() > 8 {
            write!(f, " ..")?;
        }
        Ok(())
    }
}
