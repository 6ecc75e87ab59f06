//! Hub configuration.
//!
//! All process-wide tunables live in one explicit value handed to the hub
//! and endpoints at construction time; nothing reads module-level state.

use std::time::Duration;

/// Default TCP port the emulator connects to.
pub const DEFAULT_HOST_PORT: u16 = 9996;
/// Default UDP port peripherals send NetSIO datagrams to.
pub const DEFAULT_NETSIO_PORT: u16 = 9997;
/// Credit granted to a peripheral on registration.
pub const DEFAULT_CREDIT: u8 = 3;

/// Configuration for the hub and both endpoints.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// TCP port for the emulator connection (localhost).
    pub host_port: u16,
    /// UDP port for NetSIO peripherals (all interfaces).
    pub netsio_port: u16,
    /// Serial device path for the alternate transport. When set, the UDP
    /// path is disabled; the transport itself is provided externally.
    pub serial_port: Option<String>,
    /// Verbose protocol logging.
    pub debug: bool,

    /// How long the hub waits for a SYNC_RESPONSE before answering the
    /// emulator with the empty indicator.
    pub sync_timeout: Duration,
    /// Idle interval after which a silent peripheral is deregistered.
    pub alive_expiration: Duration,
    /// Credit granted on registration and the ceiling for top-ups.
    pub default_credit: u8,

    /// Bound of the queue feeding the emulator connection.
    pub host_queue_depth: usize,
    /// Bound of the queue feeding the peripheral broadcast sender.
    pub peripheral_queue_depth: usize,

    /// Coalescer flush threshold in bytes.
    pub coalesce_limit: usize,
    /// Coalescer flush age, measured from the first unflushed byte.
    pub coalesce_max_age: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host_port: DEFAULT_HOST_PORT,
            netsio_port: DEFAULT_NETSIO_PORT,
            serial_port: None,
            debug: false,
            sync_timeout: Duration::from_secs(1),
            alive_expiration: Duration::from_secs(20),
            default_credit: DEFAULT_CREDIT,
            host_queue_depth: 8,
            peripheral_queue_depth: 16,
            coalesce_limit: 130,
            coalesce_max_age: Duration::from_millis(5),
        }
    }
}
