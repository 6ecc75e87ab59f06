//! End-to-end bridge tests over real TCP and UDP sockets.
//!
//! Each test spins up a full hub on ephemeral ports, attaches an emulator
//! stand-in over TCP and peripherals over UDP, and checks what crosses
//! each wire.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use netsio_hub::host::framing::{FrameDecoder, HostFrame};
use netsio_hub::protocol::event;
use netsio_hub::{HostEndpoint, Hub, HubConfig, PeripheralEndpoint, PeripheralLink};

const TMOUT: Duration = Duration::from_secs(2);

/// Start a hub on ephemeral ports; returns (tcp addr, udp addr).
async fn start_hub(mut config: HubConfig) -> (SocketAddr, SocketAddr) {
    config.host_port = 0;
    config.netsio_port = 0;

    let periph = PeripheralEndpoint::bind(&config).await.unwrap();
    let udp_addr = periph.local_addr().unwrap();

    let hub = Hub::new(config.clone(), Arc::clone(&periph) as Arc<dyn PeripheralLink>);
    periph.run(Arc::clone(&hub));

    let host = HostEndpoint::bind(&config).await.unwrap();
    let tcp_addr = host.local_addr().unwrap();
    tokio::spawn(host.run(hub));

    (tcp_addr, udp_addr)
}

/// Emulator stand-in: a TCP connection plus an incremental decoder.
struct Emulator {
    stream: TcpStream,
    decoder: FrameDecoder,
    pending: Vec<HostFrame>,
}

impl Emulator {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        // Give the hub's accept task a chance to attach the host before
        // any peripheral traffic races it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        Self {
            stream,
            decoder: FrameDecoder::new(),
            pending: Vec::new(),
        }
    }

    async fn send(&mut self, frame: &HostFrame) {
        self.stream.write_all(&frame.encode()).await.unwrap();
    }

    async fn recv(&mut self) -> HostFrame {
        loop {
            if !self.pending.is_empty() {
                return self.pending.remove(0);
            }
            let mut buf = [0u8; 4096];
            let n = tokio::time::timeout(TMOUT, self.stream.read(&mut buf))
                .await
                .expect("timed out waiting for a host frame")
                .unwrap();
            assert!(n > 0, "hub closed the connection");
            self.pending = self.decoder.feed(&buf[..n]).unwrap();
        }
    }

    /// Send the three-event SIO status-query sequence for `device`.
    async fn send_status_query(&mut self, device: u8) {
        self.send(&HostFrame::new(event::COMMAND_ON, u32::from(device)))
            .await;
        self.send(&HostFrame::with_payload(
            event::DATA_BLOCK,
            vec![0x53, 0x00, 0x00],
        ))
        .await;
        let mut off = HostFrame::new(event::COMMAND_OFF_SYNC, 1);
        off.payload = vec![0x53];
        self.send(&off).await;
    }
}

/// Peripheral stand-in: a UDP socket aimed at the hub.
struct Peripheral {
    socket: UdpSocket,
}

impl Peripheral {
    async fn connect(hub_addr: SocketAddr) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket
            .connect(("127.0.0.1", hub_addr.port()))
            .await
            .unwrap();
        let periph = Self { socket };
        periph.send(&[event::DEVICE_CONNECT]).await;

        // Registration is acknowledged with the initial credit grant.
        let grant = periph.recv().await;
        assert_eq!(grant, vec![event::CREDIT_UPDATE, 3]);
        periph
    }

    async fn send(&self, datagram: &[u8]) {
        self.socket.send(datagram).await.unwrap();
    }

    async fn recv(&self) -> Vec<u8> {
        let mut buf = [0u8; 8192];
        let n = tokio::time::timeout(TMOUT, self.socket.recv(&mut buf))
            .await
            .expect("timed out waiting for a datagram")
            .unwrap();
        buf[..n].to_vec()
    }

    async fn recv_nothing(&self, wait: Duration) {
        let mut buf = [0u8; 8192];
        let got = tokio::time::timeout(wait, self.socket.recv(&mut buf)).await;
        assert!(got.is_err(), "unexpected datagram: {:?}", &buf[..got.unwrap().unwrap()]);
    }
}

#[tokio::test]
async fn test_status_query_without_peripherals_returns_empty() {
    let (tcp, _udp) = start_hub(HubConfig {
        sync_timeout: Duration::from_millis(200),
        ..HubConfig::default()
    })
    .await;

    let mut emu = Emulator::connect(tcp).await;
    emu.send_status_query(0x31).await;

    let response = emu.recv().await;
    assert_eq!(response.event, event::SYNC_RESPONSE);
    assert_eq!(response.param2, 0x00, "empty indicator, nobody answered");
}

#[tokio::test]
async fn test_status_query_with_peripheral_round_trip() {
    let (tcp, udp) = start_hub(HubConfig::default()).await;

    let periph = Peripheral::connect(udp).await;
    let mut emu = Emulator::connect(tcp).await;
    emu.send_status_query(0x31).await;

    // The three SIO events arrive in order, the third carrying the
    // appended request serial number.
    assert_eq!(periph.recv().await, vec![event::COMMAND_ON, 0x31]);
    assert_eq!(periph.recv().await, vec![event::DATA_BLOCK, 0x53, 0x00, 0x00]);
    let off = periph.recv().await;
    assert_eq!(&off[..2], &[event::COMMAND_OFF_SYNC, 0x53]);
    assert_eq!(off.len(), 3, "checksum plus appended serial number");
    let sn = off[2];

    // 'A' ack, zero anticipated write size.
    periph
        .send(&[event::SYNC_RESPONSE, sn, 0x01, 0x41, 0x00, 0x00])
        .await;

    let response = emu.recv().await;
    assert_eq!(response.event, event::SYNC_RESPONSE);
    assert_eq!(response.param2, 0x0000_4181);
}

#[tokio::test]
async fn test_credit_update_follows_queue_depth() {
    let (tcp, udp) = start_hub(HubConfig::default()).await;

    let periph = Peripheral::connect(udp).await;
    let mut emu = Emulator::connect(tcp).await;

    // First data event: stored credit drops to 2; the queue holds one
    // message at recomputation time, so no top-up clears the bar.
    periph.send(&[event::PROCEED_ON]).await;
    let frame = emu.recv().await;
    assert_eq!(frame.event, event::PROCEED_ON);

    // Second data event: stored credit is 1, available is 2 once the
    // queue drains to a single slot, so a top-up goes out.
    periph.send(&[event::PROCEED_OFF]).await;
    let frame = emu.recv().await;
    assert_eq!(frame.event, event::PROCEED_OFF);

    assert_eq!(periph.recv().await, vec![event::CREDIT_UPDATE, 2]);
}

#[tokio::test]
async fn test_data_byte_coalescing_end_to_end() {
    let (tcp, udp) = start_hub(HubConfig::default()).await;

    let periph = Peripheral::connect(udp).await;
    let mut emu = Emulator::connect(tcp).await;

    for i in 0..200u8 {
        periph.send(&[event::DATA_BYTE, i]).await;
    }

    // All 200 bytes arrive in source order, coalesced into blocks no
    // larger than the 130-byte threshold.
    let mut received = Vec::new();
    let mut saw_block = false;
    while received.len() < 200 {
        let frame = emu.recv().await;
        match frame.event {
            event::DATA_BLOCK => {
                assert!(frame.payload.len() <= 130);
                saw_block = true;
                received.extend_from_slice(&frame.payload);
            }
            event::DATA_BYTE => received.push(frame.param2 as u8),
            other => panic!("unexpected event {other:02X}"),
        }
    }
    assert_eq!(received, (0..200u8).collect::<Vec<_>>());
    assert!(saw_block, "burst should have been coalesced");
}

#[tokio::test]
async fn test_silent_peripheral_expires_on_broadcast() {
    let (tcp, udp) = start_hub(HubConfig {
        alive_expiration: Duration::from_millis(200),
        ..HubConfig::default()
    })
    .await;

    let periph = Peripheral::connect(udp).await;
    let mut emu = Emulator::connect(tcp).await;

    // Let the peripheral go stale, then broadcast something.
    tokio::time::sleep(Duration::from_millis(300)).await;
    emu.send(&HostFrame::new(event::COMMAND_ON, 0x31)).await;

    // The expired client is skipped and deregistered; the host hears
    // about the disconnect and the peripheral hears nothing.
    let frame = emu.recv().await;
    assert_eq!(frame.event, event::DEVICE_DISCONNECT);
    periph.recv_nothing(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_cold_reset_reaches_peripheral() {
    let (tcp, udp) = start_hub(HubConfig::default()).await;

    let periph = Peripheral::connect(udp).await;
    let mut emu = Emulator::connect(tcp).await;

    emu.send(&HostFrame::new(event::COLD_RESET, 0)).await;
    assert_eq!(periph.recv().await, vec![event::COLD_RESET]);
}

#[tokio::test]
async fn test_reconnect_re_grants_credit_once_per_connect() {
    let (_tcp, udp) = start_hub(HubConfig::default()).await;

    let periph = Peripheral::connect(udp).await;

    // A second CONNECT from the same socket refreshes the single record
    // and re-grants credit exactly once.
    periph.send(&[event::DEVICE_CONNECT]).await;
    assert_eq!(periph.recv().await, vec![event::CREDIT_UPDATE, 3]);
    periph.recv_nothing(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_ping_answered_without_registration() {
    let (_tcp, udp) = start_hub(HubConfig::default()).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(("127.0.0.1", udp.port())).await.unwrap();
    socket.send(&[event::PING_REQUEST]).await.unwrap();

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(TMOUT, socket.recv(&mut buf))
        .await
        .expect("no ping response")
        .unwrap();
    assert_eq!(&buf[..n], &[event::PING_RESPONSE]);
}

#[tokio::test]
async fn test_alive_request_refreshes_and_answers() {
    let (_tcp, udp) = start_hub(HubConfig {
        alive_expiration: Duration::from_millis(300),
        ..HubConfig::default()
    })
    .await;

    let periph = Peripheral::connect(udp).await;

    // Keep-alives straddle the expiration window.
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(150)).await;
        periph.send(&[event::ALIVE_REQUEST, 3]).await;
        assert_eq!(periph.recv().await, vec![event::ALIVE_RESPONSE]);
    }
}

#[tokio::test]
async fn test_sync_timeout_returns_empty_and_discards_late_response() {
    let (tcp, udp) = start_hub(HubConfig {
        sync_timeout: Duration::from_millis(150),
        ..HubConfig::default()
    })
    .await;

    let periph = Peripheral::connect(udp).await;
    let mut emu = Emulator::connect(tcp).await;
    emu.send_status_query(0x31).await;

    // Swallow the three forwarded events but never answer in time.
    periph.recv().await;
    periph.recv().await;
    let off = periph.recv().await;
    let sn = *off.last().unwrap();

    let response = emu.recv().await;
    assert_eq!(response.event, event::SYNC_RESPONSE);
    assert_eq!(response.param2, 0x00, "timeout yields the empty indicator");

    // The late answer must not surface anywhere on the host wire.
    periph
        .send(&[event::SYNC_RESPONSE, sn, 0x01, 0x41, 0x00, 0x00])
        .await;
    emu.send(&HostFrame::new(event::COMMAND_OFF, 0)).await;
    assert_eq!(periph.recv().await, vec![event::COMMAND_OFF]);
}
