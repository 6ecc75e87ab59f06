//! Hub - routes traffic between the emulator and NetSIO peripherals.
//!
//! The hub owns the queue feeding the emulator connection and the single
//! sync-request slot. Both endpoints call into it: the TCP side delivers
//! host events (async or sync), the UDP side delivers peripheral events.
//! Peripheral-bound traffic leaves through the [`PeripheralLink`] seam so
//! the hub never holds a reference back into the endpoint that drives it.
//!
//! ```text
//!  emulator ──TCP──► HostEndpoint ──► Hub ──► PeripheralLink ──UDP──► devices
//!  emulator ◄──TCP── host_outbound ◄── Hub ◄───── handle_peripheral_msg ◄──┘
//! ```

pub mod sio;
pub mod sync;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::HubConfig;
use crate::protocol::{event, pack_sync_result, NetSioMsg, EMPTY_SYNC_RESULT};
use crate::queue::BoundedQueue;
use sio::PendingSioCommand;
use sync::SyncRequest;

/// Outbound seam toward the peripherals.
///
/// Implemented by the UDP endpoint; an alternate transport (the serial
/// backend) plugs in here with the same hub semantics.
pub trait PeripheralLink: Send + Sync {
    /// Queue a message for broadcast; drops with a log line when full.
    fn to_peripheral(&self, msg: NetSioMsg);

    /// True when at least one peripheral is registered.
    fn connected(&self) -> bool;

    /// Recompute available credit against the host queue depth and top up
    /// clients that are below it.
    fn credit_clients(&self, host_queue_depth: usize);

    /// Flush undelivered outbound messages (reset semantics).
    fn clear_outbound(&self);
}

/// Central router between the host connection and the peripherals.
pub struct Hub {
    config: HubConfig,
    link: Arc<dyn PeripheralLink>,
    host_outbound: Arc<BoundedQueue<NetSioMsg>>,
    host_attached: AtomicBool,
    sync: SyncRequest,
    pending_sio: Mutex<PendingSioCommand>,
}

impl Hub {
    /// Create a hub bridging the given peripheral link.
    #[must_use]
    pub fn new(config: HubConfig, link: Arc<dyn PeripheralLink>) -> Arc<Self> {
        let host_outbound = Arc::new(BoundedQueue::new(config.host_queue_depth));
        Arc::new(Self {
            config,
            link,
            host_outbound,
            host_attached: AtomicBool::new(false),
            sync: SyncRequest::new(),
            pending_sio: Mutex::new(PendingSioCommand::default()),
        })
    }

    /// The hub's configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Queue of messages destined for the emulator, drained by the host
    /// connection's writer task.
    #[must_use]
    pub fn host_queue(&self) -> Arc<BoundedQueue<NetSioMsg>> {
        Arc::clone(&self.host_outbound)
    }

    /// Current depth of the host queue, for credit recomputation.
    #[must_use]
    pub fn host_queue_depth(&self) -> usize {
        self.host_outbound.len()
    }

    /// The emulator connected.
    pub fn host_attached(&self) {
        log::info!("[hub] host connected");
        self.host_attached.store(true, Ordering::SeqCst);
    }

    /// The emulator connection closed or failed. Drains the host queue and
    /// completes any in-flight sync with the empty indicator.
    pub fn host_detached(&self) {
        self.host_attached.store(false, Ordering::SeqCst);
        let dropped = self.host_outbound.clear();
        if dropped > 0 {
            log::debug!("[hub] host queue drained on detach ({dropped} messages)");
        }
        self.sync.cancel(EMPTY_SYNC_RESULT);
        log::info!("[hub] host disconnected");
    }

    /// True while an emulator connection is up.
    #[must_use]
    pub fn is_host_attached(&self) -> bool {
        self.host_attached.load(Ordering::SeqCst)
    }

    /// Handle an asynchronous message from the emulator; emulation keeps
    /// running. The message is forwarded to the peripherals verbatim.
    pub fn handle_host_msg(&self, msg: NetSioMsg) {
        self.track_sio_sequence(&msg);

        if matches!(msg.id, event::COLD_RESET | event::WARM_RESET) {
            log::info!(
                "[hub] host {} reset",
                if msg.id == event::COLD_RESET { "cold" } else { "warm" }
            );
            self.link.clear_outbound();
            self.sync.cancel(EMPTY_SYNC_RESULT);
        }

        log::debug!("[hub] > dev {msg} +{}us", msg.elapsed_us());
        self.link.to_peripheral(msg);
    }

    /// Handle a synchronous message from the emulator; emulation is paused
    /// until the returned result reaches it.
    ///
    /// A DATA_BLOCK delivered synchronously expects no peripheral answer:
    /// it is forwarded and the empty indicator returned immediately. For
    /// DATA_BYTE_SYNC and COMMAND_OFF_SYNC the request serial number is
    /// appended, the message broadcast, and the slot awaited.
    pub async fn handle_host_msg_sync(&self, mut msg: NetSioMsg) -> u32 {
        if msg.id == event::DATA_BLOCK {
            self.handle_host_msg(msg);
            return EMPTY_SYNC_RESULT;
        }

        if msg.id == event::COMMAND_OFF_SYNC {
            self.finish_sio_sequence(&msg);
        } else if self.pending_sio.lock().unwrap().reset() {
            log::warn!(
                "[hub] sync event {:02X} interrupted an SIO command sequence",
                msg.id
            );
        }

        let sn = self.sync.set_request(msg.id);
        let stale = self.host_outbound.clear();
        if stale > 0 {
            log::debug!("[hub] dropped {stale} stale host messages before sync wait");
        }

        if self.link.connected() {
            msg.arg.push(sn);
            log::debug!("[hub] > dev sync {msg} sn={sn}");
            self.link.to_peripheral(msg);
        } else {
            // Shortcut: nobody can answer, complete the request now.
            self.sync.set_response(EMPTY_SYNC_RESULT, sn);
        }

        self.sync
            .get_response(self.config.sync_timeout, EMPTY_SYNC_RESULT)
            .await
    }

    /// Handle a message arriving from a peripheral (or from the inbound
    /// byte coalescer).
    pub fn handle_peripheral_msg(&self, msg: NetSioMsg) {
        if !self.is_host_attached() {
            return;
        }

        let (pending, sn) = self.sync.check_request();
        if pending.is_some() {
            if msg.id == event::SYNC_RESPONSE && msg.arg.first() == Some(&sn) {
                self.complete_sync(&msg, sn);
                return;
            }
            if matches!(msg.id, event::DATA_BYTE | event::DATA_BLOCK) {
                // The sync response carries authoritative state; serial
                // traffic racing ahead of it would only confuse the host.
                log::debug!("[hub] discarding {msg} during sync wait");
                return;
            }
            log::debug!("[hub] passing {msg} during sync wait");
        }

        if msg.id == event::SYNC_RESPONSE {
            // Nobody is waiting for this response: the request timed out
            // or was never ours. Late responses are discarded.
            log::debug!("[hub] dropping stray sync response {msg}");
            return;
        }

        self.to_host(msg);
    }

    /// Enqueue for the emulator and trigger one credit recomputation.
    fn to_host(&self, msg: NetSioMsg) {
        if let Err(dropped) = self.host_outbound.try_push(msg) {
            log::warn!("[hub] host queue full, dropping {dropped}");
        }
        self.link.credit_clients(self.host_outbound.len());
    }

    /// Complete the in-flight sync request from a matching SYNC_RESPONSE.
    fn complete_sync(&self, msg: &NetSioMsg, sn: u8) {
        match msg.arg.get(1) {
            Some(&event::EMPTY_SYNC) => {
                self.sync.set_response(EMPTY_SYNC_RESULT, sn);
            }
            Some(_) if msg.arg.len() >= 5 => {
                let result = pack_sync_result(msg.arg[2], msg.arg[3], msg.arg[4]);
                self.sync.set_response(result, sn);
            }
            _ => {
                log::warn!("[hub] malformed sync response {msg}, treating as empty");
                self.sync.set_response(EMPTY_SYNC_RESULT, sn);
            }
        }
    }

    /// Advance the SIO reconstruction state machine for async host events.
    fn track_sio_sequence(&self, msg: &NetSioMsg) {
        let mut pending = self.pending_sio.lock().unwrap();
        match msg.id {
            event::COMMAND_ON => {
                if let Some(&device) = msg.arg.first() {
                    pending.on_command_on(device);
                }
            }
            event::DATA_BLOCK => {
                if !pending.on_data_block(&msg.arg) && *pending == PendingSioCommand::Empty {
                    log::debug!("[hub] data block outside SIO command sequence");
                }
            }
            _ => {
                if pending.reset() {
                    log::warn!(
                        "[hub] host event {:02X} interrupted an SIO command sequence",
                        msg.id
                    );
                }
            }
        }
    }

    /// Consume the reconstruction state on COMMAND_OFF_SYNC and log the
    /// assembled command.
    fn finish_sio_sequence(&self, msg: &NetSioMsg) {
        let checksum = msg.arg.first().copied().unwrap_or(0);
        match self.pending_sio.lock().unwrap().on_command_off_sync(checksum) {
            Some(frame) => {
                log::info!(
                    "[hub] SIO command: device={:02X} cmd={:02X} aux={:02X},{:02X} cksum={:02X}",
                    frame.device,
                    frame.command,
                    frame.aux1,
                    frame.aux2,
                    frame.checksum
                );
            }
            None => {
                log::warn!("[hub] command off sync outside SIO command sequence");
            }
        }
    }
}
