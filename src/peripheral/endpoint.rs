//! UDP endpoint for NetSIO peripherals.
//!
//! Owns the UDP socket and everything peripheral-shaped: the client
//! table, registration and keep-alive handling, credit top-ups, inbound
//! byte coalescing, and the broadcast sender draining the outbound queue.
//!
//! One task drains the socket and dispatches datagrams; a second drains
//! [`PeripheralEndpoint::outbound`] and broadcasts to every live client;
//! a third runs the coalescer timer. Ping/alive/credit answers are sent
//! inline from the receive task with non-blocking sends.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::HubConfig;
use crate::hub::{Hub, PeripheralLink};
use crate::protocol::{event, is_conn_mgmt, NetSioMsg};
use crate::queue::BoundedQueue;

use super::clients::{ClientTable, PeripheralClient};
use super::coalesce::InboundBuffer;

/// Receive buffer size; a NetSIO datagram never comes close.
const RECV_BUF: usize = 8192;

/// A CREDIT_STATUS announcement at or below this value asks for an
/// immediate top-up.
const CREDIT_TOPUP_THRESHOLD: u8 = 10;

/// The UDP side of the hub.
pub struct PeripheralEndpoint {
    socket: Arc<UdpSocket>,
    clients: ClientTable,
    outbound: BoundedQueue<NetSioMsg>,
    inbuffer: InboundBuffer,
    default_credit: u8,
}

impl PeripheralEndpoint {
    /// Bind the NetSIO UDP socket on all interfaces.
    ///
    /// # Errors
    ///
    /// Returns an error when the port cannot be bound.
    pub async fn bind(config: &HubConfig) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(("0.0.0.0", config.netsio_port))
            .await
            .with_context(|| format!("failed to bind UDP port {}", config.netsio_port))?;

        Ok(Arc::new(Self {
            socket: Arc::new(socket),
            clients: ClientTable::new(config.alive_expiration),
            outbound: BoundedQueue::new(config.peripheral_queue_depth),
            inbuffer: InboundBuffer::new(config.coalesce_limit, config.coalesce_max_age),
            default_credit: config.default_credit,
        }))
    }

    /// The bound socket address (useful with port 0 in tests).
    ///
    /// # Errors
    ///
    /// Returns an error when the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Spawn the receive, broadcast, and coalescer-timer tasks.
    pub fn run(self: Arc<Self>, hub: Arc<Hub>) -> Vec<JoinHandle<()>> {
        let recv = {
            let this = Arc::clone(&self);
            let hub = Arc::clone(&hub);
            tokio::spawn(async move { this.recv_loop(&hub).await })
        };
        let send = {
            let this = Arc::clone(&self);
            let hub = Arc::clone(&hub);
            tokio::spawn(async move { this.send_loop(&hub).await })
        };
        let timer = {
            let this = self;
            tokio::spawn(async move { this.inbuffer.monitor(&hub).await })
        };
        vec![recv, send, timer]
    }

    /// Drain the socket and dispatch each datagram.
    async fn recv_loop(&self, hub: &Hub) {
        let mut buf = [0u8; RECV_BUF];
        loop {
            let (len, addr) = match self.socket.recv_from(&mut buf).await {
                Ok(r) => r,
                Err(e) => {
                    log::warn!("[net] recv error: {e}");
                    continue;
                }
            };
            let Some(msg) = NetSioMsg::from_datagram(&buf[..len]) else {
                continue; // empty datagram
            };
            log::debug!("[net] < {addr} {msg}");

            if is_conn_mgmt(msg.id) {
                self.handle_conn_mgmt(msg, addr, hub);
            } else {
                self.handle_data(msg, addr, hub);
            }
        }
    }

    /// Data event from a (hopefully registered) peripheral.
    fn handle_data(&self, msg: NetSioMsg, addr: SocketAddr, hub: &Hub) {
        let Some(client) = self.clients.get(addr) else {
            // Not registered; the datagram is dropped.
            return;
        };
        if client.expired(Instant::now()) {
            self.drop_client(addr, true, hub);
            return;
        }
        self.clients.refresh(&client);
        client.consume_credit();

        if msg.id == event::DATA_BYTE {
            self.inbuffer.extend(&msg.arg, hub);
        } else {
            // Keep source order: buffered bytes leave before this event.
            self.inbuffer.flush(hub);
            hub.handle_peripheral_msg(msg);
        }
    }

    /// Connection-management event; most are answered on the spot.
    fn handle_conn_mgmt(&self, msg: NetSioMsg, addr: SocketAddr, hub: &Hub) {
        match msg.id {
            event::DEVICE_CONNECT => self.register(addr, hub),
            event::DEVICE_DISCONNECT => self.drop_client(addr, false, hub),
            event::PING_REQUEST => {
                // Answered whether or not the sender is registered.
                self.send_now(addr, &NetSioMsg::new(event::PING_RESPONSE));
            }
            event::ALIVE_REQUEST => {
                if let Some(client) = self.clients.get(addr) {
                    self.clients.refresh(&client);
                    if let Some(&announced) = msg.arg.first() {
                        client.set_credit(announced.min(self.default_credit));
                    }
                    self.send_now(addr, &NetSioMsg::new(event::ALIVE_RESPONSE));
                }
            }
            event::CREDIT_STATUS => {
                if let Some(client) = self.clients.get(addr) {
                    self.clients.refresh(&client);
                    if let Some(&announced) = msg.arg.first() {
                        client.set_credit(announced.min(self.default_credit));
                        if announced <= CREDIT_TOPUP_THRESHOLD {
                            self.top_up(&client, hub.host_queue_depth());
                        }
                    }
                }
            }
            other => {
                log::debug!("[net] unhandled management event {other:02X} from {addr}");
            }
        }
    }

    /// DEVICE_CONNECT: create or refresh the client, grant credit, tell
    /// the hub.
    fn register(&self, addr: SocketAddr, hub: &Hub) {
        let (client, is_new) = self.clients.register(addr);
        if is_new {
            log::info!("[net] device connected: {addr}  devices: {}", self.clients.len());
        } else {
            log::info!("[net] device reconnected: {addr}  devices: {}", self.clients.len());
        }

        client.set_credit(self.default_credit);
        self.send_now(addr, &NetSioMsg::with_byte(event::CREDIT_UPDATE, self.default_credit));
        hub.handle_peripheral_msg(NetSioMsg::new(event::DEVICE_CONNECT));
    }

    /// Remove a client and report the disconnect to the hub.
    fn drop_client(&self, addr: SocketAddr, expired: bool, hub: &Hub) {
        if self.clients.deregister(addr).is_some() {
            log::info!(
                "[net] device disconnected{}: {addr}  devices: {}",
                if expired { " (connection expired)" } else { "" },
                self.clients.len()
            );
            hub.handle_peripheral_msg(NetSioMsg::new(event::DEVICE_DISCONNECT));
        }
    }

    /// Send one CREDIT_UPDATE when the queue has room to justify it.
    fn top_up(&self, client: &PeripheralClient, host_queue_depth: usize) {
        let avail = self
            .default_credit
            .saturating_sub(host_queue_depth.min(usize::from(u8::MAX)) as u8);
        if avail >= 2 && client.raise_credit(avail) {
            self.send_now(client.addr(), &NetSioMsg::with_byte(event::CREDIT_UPDATE, avail));
        }
    }

    /// Non-blocking datagram send from the receive path.
    fn send_now(&self, addr: SocketAddr, msg: &NetSioMsg) {
        if msg.id != event::ALIVE_RESPONSE {
            log::debug!("[net] > {addr} {msg}");
        }
        if let Err(e) = self.socket.try_send_to(&msg.to_datagram(), addr) {
            log::warn!("[net] send to {addr} failed: {e}");
            if let Some(client) = self.clients.get(addr) {
                client.mark_failed();
            }
        }
    }

    /// Drain the outbound queue, broadcasting each message to every live
    /// client in enqueue order.
    async fn send_loop(&self, hub: &Hub) {
        loop {
            let msg = self.outbound.recv().await;
            self.broadcast(&msg, hub).await;
        }
    }

    /// One broadcast pass; expired clients found along the way are
    /// deregistered afterwards.
    async fn broadcast(&self, msg: &NetSioMsg, hub: &Hub) {
        let now = Instant::now();
        let datagram = msg.to_datagram();
        let mut saw_expired = false;

        for client in self.clients.snapshot() {
            if client.expired(now) {
                saw_expired = true;
                continue;
            }
            log::debug!("[net] > {} {msg} +{}us", client.addr(), msg.elapsed_us());
            if let Err(e) = self.socket.send_to(&datagram, client.addr()).await {
                // Keep delivering to the others; this one goes away on the
                // expiry sweep below.
                log::warn!("[net] send to {} failed: {e}", client.addr());
                client.mark_failed();
                saw_expired = true;
            }
        }

        if saw_expired {
            for client in self.clients.take_expired(Instant::now()) {
                log::info!(
                    "[net] device disconnected (connection expired): {}  devices: {}",
                    client.addr(),
                    self.clients.len()
                );
                hub.handle_peripheral_msg(NetSioMsg::new(event::DEVICE_DISCONNECT));
            }
        }
    }
}

impl PeripheralLink for PeripheralEndpoint {
    fn to_peripheral(&self, msg: NetSioMsg) {
        if let Err(dropped) = self.outbound.try_push(msg) {
            log::warn!("[net] device queue full, dropping {dropped}");
        }
    }

    fn connected(&self) -> bool {
        !self.clients.is_empty()
    }

    fn credit_clients(&self, host_queue_depth: usize) {
        let avail = self
            .default_credit
            .saturating_sub(host_queue_depth.min(usize::from(u8::MAX)) as u8);
        if avail < 2 {
            return;
        }
        for client in self.clients.snapshot() {
            if client.raise_credit(avail) {
                self.send_now(client.addr(), &NetSioMsg::with_byte(event::CREDIT_UPDATE, avail));
            }
        }
    }

    fn clear_outbound(&self) {
        let dropped = self.outbound.clear();
        if dropped > 0 {
            log::debug!("[net] device queue flushed ({dropped} messages)");
        }
    }
}
