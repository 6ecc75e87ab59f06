//! Wire codec for the emulator's custom-device TCP protocol.
//!
//! Every message starts with a fixed 17-byte header:
//!
//! ```text
//! [u8 event] [u32 LE param1] [u32 LE param2] [u64 LE timestamp]
//! ```
//!
//! optionally followed by a payload whose length depends on the event:
//! DATA_BLOCK carries `param2` payload bytes, COMMAND_OFF_SYNC carries the
//! one-byte SIO checksum. Every other event, known or not, has no payload.
//!
//! `param2` doubles as the scalar argument slot: the byte value for
//! DATA_BYTE / DATA_BYTE_SYNC, the device id for COMMAND_ON, the baud rate
//! for SPEED_CHANGE, and the packed result for an outbound SYNC_RESPONSE.

use anyhow::{bail, Result};
use bytes::{Buf, BufMut};

use crate::protocol::{event, NetSioMsg};

/// Fixed header size.
pub const HEADER_LEN: usize = 17;

/// Upper bound on a DATA_BLOCK payload; larger lengths are treated as a
/// framing error and close the connection.
pub const MAX_PAYLOAD: usize = 4096;

/// One decoded emulator-protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFrame {
    /// Event identifier.
    pub event: u8,
    /// First header parameter; unused by the events the hub handles.
    pub param1: u32,
    /// Second header parameter; scalar argument slot (see module docs).
    pub param2: u32,
    /// Emulator-side timestamp, echoed for diagnostics only.
    pub timestamp: u64,
    /// Payload bytes following the header.
    pub payload: Vec<u8>,
}

impl HostFrame {
    /// Frame with no payload and zeroed `param1`/timestamp.
    #[must_use]
    pub fn new(event: u8, param2: u32) -> Self {
        Self {
            event,
            param1: 0,
            param2,
            timestamp: 0,
            payload: Vec::new(),
        }
    }

    /// Frame carrying a payload, with `param2` set to its length.
    #[must_use]
    pub fn with_payload(event: u8, payload: Vec<u8>) -> Self {
        Self {
            event,
            param1: 0,
            param2: payload.len() as u32,
            timestamp: 0,
            payload,
        }
    }

    /// Encode into wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u8(self.event);
        buf.put_u32_le(self.param1);
        buf.put_u32_le(self.param2);
        buf.put_u64_le(self.timestamp);
        buf.put_slice(&self.payload);
        buf
    }
}

/// Payload length implied by a header, or a framing error for lengths the
/// hub refuses to buffer.
fn payload_len(event: u8, param2: u32) -> Result<usize> {
    match event {
        event::DATA_BLOCK => {
            let len = param2 as usize;
            if len > MAX_PAYLOAD {
                bail!("DATA_BLOCK payload too large: {len} bytes (max {MAX_PAYLOAD})");
            }
            Ok(len)
        }
        event::COMMAND_OFF_SYNC => Ok(1),
        _ => Ok(0),
    }
}

/// Incremental frame decoder over the TCP byte stream.
///
/// Feed read chunks via [`FrameDecoder::feed`] and collect complete
/// frames; partial data is buffered until the rest arrives.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create a decoder with an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and extract all complete frames.
    ///
    /// # Errors
    ///
    /// Returns an error on an oversized DATA_BLOCK length; the caller is
    /// expected to drop the connection.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<HostFrame>> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            if self.buf.len() < HEADER_LEN {
                break;
            }

            let mut header = &self.buf[..HEADER_LEN];
            let event = header.get_u8();
            let param1 = header.get_u32_le();
            let param2 = header.get_u32_le();
            let timestamp = header.get_u64_le();

            let len = payload_len(event, param2)?;
            let total = HEADER_LEN + len;
            if self.buf.len() < total {
                break; // incomplete frame, wait for more data
            }

            frames.push(HostFrame {
                event,
                param1,
                param2,
                timestamp,
                payload: self.buf[HEADER_LEN..total].to_vec(),
            });
            self.buf.drain(..total);
        }

        Ok(frames)
    }

    /// True if the decoder holds a partial frame.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}

/// Translate an inbound frame into the hub's message form.
///
/// Returns `None` for NONE (0x00) padding events, which carry nothing.
#[must_use]
pub fn msg_from_frame(frame: &HostFrame) -> Option<NetSioMsg> {
    let msg = match frame.event {
        0x00 => return None,
        event::DATA_BLOCK => NetSioMsg::with_arg(frame.event, frame.payload.clone()),
        // The checksum payload becomes the argument; the hub appends its
        // own request serial number before broadcasting.
        event::COMMAND_OFF_SYNC => {
            NetSioMsg::with_arg(frame.event, frame.payload.clone())
        }
        event::DATA_BYTE | event::DATA_BYTE_SYNC | event::COMMAND_ON => {
            NetSioMsg::with_byte(frame.event, frame.param2 as u8)
        }
        event::SPEED_CHANGE => {
            NetSioMsg::with_arg(frame.event, frame.param2.to_le_bytes().to_vec())
        }
        _ => NetSioMsg::new(frame.event),
    };
    Some(msg)
}

/// Translate an outbound message into its frame form.
///
/// DATA_BLOCK carries its bytes as payload; single-byte arguments travel
/// in `param2`; SPEED_CHANGE packs its u32 back into `param2`.
#[must_use]
pub fn frame_from_msg(msg: &NetSioMsg) -> HostFrame {
    match msg.id {
        event::DATA_BLOCK => HostFrame::with_payload(msg.id, msg.arg.clone()),
        _ => {
            let param2 = match msg.arg.len() {
                1 => u32::from(msg.arg[0]),
                4 => u32::from_le_bytes([msg.arg[0], msg.arg[1], msg.arg[2], msg.arg[3]]),
                _ => 0,
            };
            HostFrame::new(msg.id, param2)
        }
    }
}
