//! Registered peripheral bookkeeping: credit and liveness.
//!
//! A peripheral is keyed by its UDP source address. Its record carries the
//! expiry deadline (refreshed on any datagram from it) and the credit the
//! hub last granted. Credit is the number of further messages the
//! peripheral may send before it must wait for a CREDIT_UPDATE; the hub's
//! record counts down as messages arrive and is raised by top-ups.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

/// Mutable per-peripheral state, guarded by the client's own mutex.
#[derive(Debug)]
struct ClientState {
    credit: u8,
    expires_at: Instant,
}

/// One registered peripheral.
#[derive(Debug)]
pub struct PeripheralClient {
    addr: SocketAddr,
    state: Mutex<ClientState>,
}

impl PeripheralClient {
    fn new(addr: SocketAddr, ttl: Duration) -> Self {
        Self {
            addr,
            state: Mutex::new(ClientState {
                credit: 0,
                expires_at: Instant::now() + ttl,
            }),
        }
    }

    /// The peripheral's UDP address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// True when the expiry deadline has passed at `now`.
    #[must_use]
    pub fn expired(&self, now: Instant) -> bool {
        self.state.lock().unwrap().expires_at < now
    }

    /// Push the expiry deadline a full alive-interval into the future.
    pub fn refresh(&self, ttl: Duration) {
        self.state.lock().unwrap().expires_at = Instant::now() + ttl;
    }

    /// Force the next expiry check to fail; used after a send error so the
    /// broadcast path removes the client.
    pub fn mark_failed(&self) {
        let mut st = self.state.lock().unwrap();
        st.expires_at = Instant::now() - Duration::from_secs(1);
    }

    /// Credit currently on record.
    #[must_use]
    pub fn credit(&self) -> u8 {
        self.state.lock().unwrap().credit
    }

    /// Overwrite the credit record, e.g. the registration grant.
    pub fn set_credit(&self, credit: u8) {
        self.state.lock().unwrap().credit = credit;
    }

    /// Count one received message against the record.
    pub fn consume_credit(&self) {
        let mut st = self.state.lock().unwrap();
        st.credit = st.credit.saturating_sub(1);
    }

    /// Raise the record to `credit` when it is an improvement. Returns
    /// true when a CREDIT_UPDATE should be sent.
    pub fn raise_credit(&self, credit: u8) -> bool {
        let mut st = self.state.lock().unwrap();
        if credit > st.credit {
            st.credit = credit;
            true
        } else {
            false
        }
    }
}

/// The set of registered peripherals.
///
/// The table mutex covers only membership; per-client state sits behind
/// each client's own lock, and iteration snapshots the list so no lock is
/// held across socket I/O.
pub struct ClientTable {
    clients: Mutex<HashMap<SocketAddr, Arc<PeripheralClient>>>,
    ttl: Duration,
}

impl ClientTable {
    /// Empty table whose clients expire after `ttl` of silence.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Register `addr`, or refresh it when already present. Returns the
    /// client and whether it is new.
    pub fn register(&self, addr: SocketAddr) -> (Arc<PeripheralClient>, bool) {
        let mut clients = self.clients.lock().unwrap();
        if let Some(client) = clients.get(&addr) {
            client.refresh(self.ttl);
            (Arc::clone(client), false)
        } else {
            let client = Arc::new(PeripheralClient::new(addr, self.ttl));
            clients.insert(addr, Arc::clone(&client));
            (client, true)
        }
    }

    /// Remove `addr` from the table.
    pub fn deregister(&self, addr: SocketAddr) -> Option<Arc<PeripheralClient>> {
        self.clients.lock().unwrap().remove(&addr)
    }

    /// Look up a registered client.
    #[must_use]
    pub fn get(&self, addr: SocketAddr) -> Option<Arc<PeripheralClient>> {
        self.clients.lock().unwrap().get(&addr).cloned()
    }

    /// Refresh a client's expiry deadline.
    pub fn refresh(&self, client: &PeripheralClient) {
        client.refresh(self.ttl);
    }

    /// Copy of the current client list, for iteration without the lock.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<PeripheralClient>> {
        self.clients.lock().unwrap().values().cloned().collect()
    }

    /// Remove and return every client whose deadline has passed.
    pub fn take_expired(&self, now: Instant) -> Vec<Arc<PeripheralClient>> {
        let mut clients = self.clients.lock().unwrap();
        let expired: Vec<SocketAddr> = clients
            .iter()
            .filter(|(_, c)| c.expired(now))
            .map(|(addr, _)| *addr)
            .collect();
        expired
            .into_iter()
            .filter_map(|addr| clients.remove(&addr))
            .collect()
    }

    /// Number of registered clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// True when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.lock().unwrap().is_empty()
    }
}
