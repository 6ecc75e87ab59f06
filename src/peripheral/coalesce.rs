//! Inbound byte coalescing.
//!
//! Peripherals often emit serial data one DATA_BYTE datagram at a time.
//! Relaying each byte as its own host message wastes the TCP path, so
//! bytes accumulate here and leave as one DATA_BLOCK when the buffer
//! reaches the size threshold or the oldest byte turns stale, whichever
//! comes first. A flush of a single byte stays a DATA_BYTE.
//!
//! Any non-DATA_BYTE data event from a peripheral must flush this buffer
//! first so the host sees traffic in source order.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::hub::Hub;
use crate::protocol::{event, NetSioMsg};

#[derive(Debug, Default)]
struct BufState {
    data: Vec<u8>,
    /// Deadline armed when the first byte of a batch arrives.
    deadline: Option<Instant>,
}

/// Byte accumulator with flush-on-size and flush-on-age.
pub struct InboundBuffer {
    state: Mutex<BufState>,
    armed: Notify,
    max_len: usize,
    max_age: Duration,
}

impl InboundBuffer {
    /// Buffer flushing at `max_len` bytes or `max_age` after the first
    /// unflushed byte.
    #[must_use]
    pub fn new(max_len: usize, max_age: Duration) -> Self {
        Self {
            state: Mutex::new(BufState::default()),
            armed: Notify::new(),
            max_len,
            max_age,
        }
    }

    /// Append bytes, flushing to the hub when the size threshold is hit.
    pub fn extend(&self, bytes: &[u8], hub: &Hub) {
        let flushed = {
            let mut st = self.state.lock().unwrap();
            st.data.extend_from_slice(bytes);
            if st.data.len() >= self.max_len {
                st.deadline = None;
                Some(std::mem::take(&mut st.data))
            } else {
                if st.deadline.is_none() {
                    st.deadline = Some(Instant::now() + self.max_age);
                    self.armed.notify_one();
                }
                None
            }
        };
        if let Some(data) = flushed {
            Self::emit(data, hub);
        }
    }

    /// Flush whatever is buffered, regardless of age.
    pub fn flush(&self, hub: &Hub) {
        let data = {
            let mut st = self.state.lock().unwrap();
            st.deadline = None;
            std::mem::take(&mut st.data)
        };
        if !data.is_empty() {
            Self::emit(data, hub);
        }
    }

    /// Timer task: waits out each armed deadline and flushes stale bytes.
    /// Runs for the life of the endpoint.
    pub async fn monitor(&self, hub: &Hub) {
        loop {
            let deadline = self.state.lock().unwrap().deadline;
            match deadline {
                None => self.armed.notified().await,
                Some(deadline) => {
                    tokio::time::sleep_until(deadline).await;
                    // A size flush may have disarmed the timer, or a new
                    // batch may have re-armed it later; only flush when
                    // this deadline is still the live one.
                    let stale = {
                        let st = self.state.lock().unwrap();
                        st.deadline == Some(deadline)
                    };
                    if stale {
                        self.flush(hub);
                    }
                }
            }
        }
    }

    fn emit(data: Vec<u8>, hub: &Hub) {
        let msg = if data.len() > 1 {
            NetSioMsg::with_arg(event::DATA_BLOCK, data)
        } else {
            NetSioMsg::with_arg(event::DATA_BYTE, data)
        };
        log::debug!("[net] flush {msg}");
        hub.handle_peripheral_msg(msg);
    }
}
