//! Single-slot request/response correlator for sync calls.
//!
//! While the emulator is paused inside a sync call, the hub broadcasts the
//! request with a serial number appended and waits here for a matching
//! SYNC_RESPONSE. At most one request is in flight; a response is accepted
//! only when its serial number matches the current request, so late
//! answers to a timed-out request fall on the floor.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;

/// State guarded by the slot's mutex. The completion itself travels over a
/// oneshot channel so the waiter never holds the lock.
#[derive(Debug, Default)]
struct SyncState {
    sn: u8,
    pending: Option<u8>,
    tx: Option<oneshot::Sender<u32>>,
    rx: Option<oneshot::Receiver<u32>>,
}

/// The hub's one sync-request slot.
#[derive(Debug, Default)]
pub struct SyncRequest {
    state: Mutex<SyncState>,
}

impl SyncRequest {
    /// Create an idle slot. Serial numbers start at zero and advance on
    /// each [`SyncRequest::set_request`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the slot for a new request of the given event kind and return
    /// the serial number to append to the broadcast.
    pub fn set_request(&self, kind: u8) -> u8 {
        let mut st = self.state.lock().unwrap();
        st.sn = st.sn.wrapping_add(1);
        st.pending = Some(kind);
        let (tx, rx) = oneshot::channel();
        st.tx = Some(tx);
        st.rx = Some(rx);
        st.sn
    }

    /// Complete the in-flight request, if `sn` still names it. A stale or
    /// duplicate response is silently dropped.
    pub fn set_response(&self, value: u32, sn: u8) {
        let mut st = self.state.lock().unwrap();
        if st.pending.is_some() && st.sn == sn {
            st.pending = None;
            if let Some(tx) = st.tx.take() {
                let _ = tx.send(value);
            }
        }
    }

    /// Complete whatever request is in flight with `value`. Used when the
    /// host detaches or resets mid-request.
    pub fn cancel(&self, value: u32) {
        let sn = self.state.lock().unwrap().sn;
        self.set_response(value, sn);
    }

    /// Wait up to `timeout` for the response; `default` on expiry or when
    /// no request is armed. The slot is cleared either way.
    pub async fn get_response(&self, timeout: Duration, default: u32) -> u32 {
        let rx = self.state.lock().unwrap().rx.take();
        let value = match rx {
            Some(rx) => match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(value)) => value,
                // Timed out, or the sender side was dropped by a newer
                // set_request; either way the emulator gets the default.
                _ => default,
            },
            None => default,
        };

        let mut st = self.state.lock().unwrap();
        st.pending = None;
        st.tx = None;
        value
    }

    /// Snapshot `(pending kind, current serial number)` for the
    /// peripheral-side router.
    #[must_use]
    pub fn check_request(&self) -> (Option<u8>, u8) {
        let st = self.state.lock().unwrap();
        (st.pending, st.sn)
    }
}
