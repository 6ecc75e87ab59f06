//! TCP endpoint for the emulator connection.
//!
//! Accepts one connection at a time. The accept task becomes the
//! connection's read loop: asynchronous events go straight to the hub,
//! synchronous ones block the loop in the hub's sync path (the pause the
//! emulator is expecting) until the result goes back
//! as a SYNC_RESPONSE frame. A writer task drains the hub's host queue
//! concurrently; both paths funnel through one guarded write half so
//! frames never interleave.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::config::HubConfig;
use crate::hub::Hub;
use crate::protocol::{event, NetSioMsg};
use crate::queue::BoundedQueue;

use super::framing::{frame_from_msg, msg_from_frame, FrameDecoder, HostFrame};

/// Shared, serialized write half of the emulator connection.
type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

/// The TCP side of the hub.
pub struct HostEndpoint {
    listener: TcpListener,
}

impl HostEndpoint {
    /// Bind the emulator-facing TCP port on localhost.
    ///
    /// # Errors
    ///
    /// Returns an error when the port cannot be bound.
    pub async fn bind(config: &HubConfig) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", config.host_port))
            .await
            .with_context(|| format!("failed to bind TCP port {}", config.host_port))?;
        Ok(Self { listener })
    }

    /// The bound listener address (useful with port 0 in tests).
    ///
    /// # Errors
    ///
    /// Returns an error when the listener has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop. Serves one emulator connection to completion before
    /// accepting the next; a lost connection never takes the hub down.
    pub async fn run(self, hub: Arc<Hub>) {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    log::error!("[host] accept error: {e}");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    continue;
                }
            };
            log::info!("[host] emulator connected from {peer}");

            if let Err(e) = serve(stream, &hub).await {
                log::info!("[host] connection ended: {e:#}");
            }
            hub.host_detached();
        }
    }
}

/// Serve one emulator connection until it closes or fails.
async fn serve(stream: TcpStream, hub: &Arc<Hub>) -> Result<()> {
    stream.set_nodelay(true)?;
    let (read_half, write_half) = stream.into_split();
    let writer: SharedWriter = Arc::new(Mutex::new(write_half));

    hub.host_attached();

    // Writer task: drains host_outbound for as long as the connection
    // lives. A write failure ends the task, which tears the connection
    // down through the select below.
    let mut drain = tokio::spawn(drain_host_queue(hub.host_queue(), Arc::clone(&writer)));
    let drain_abort = drain.abort_handle();

    let result = tokio::select! {
        res = read_loop(read_half, &writer, hub) => res,
        _ = &mut drain => Err(anyhow::anyhow!("write failure")),
    };
    drain_abort.abort();
    result
}

/// Forward queued hub messages onto the wire until a write fails.
async fn drain_host_queue(queue: Arc<BoundedQueue<NetSioMsg>>, writer: SharedWriter) {
    loop {
        let msg = queue.recv().await;
        log::debug!("[host] > {msg} +{}us", msg.elapsed_us());
        if let Err(e) = send_frame(&writer, &frame_from_msg(&msg)).await {
            log::warn!("[host] write failed: {e}");
            return;
        }
    }
}

/// Write one frame; the mutex keeps queue traffic and sync responses from
/// interleaving mid-frame.
async fn send_frame(writer: &SharedWriter, frame: &HostFrame) -> Result<()> {
    let mut wr = writer.lock().await;
    wr.write_all(&frame.encode()).await?;
    Ok(())
}

/// Read loop: parse frames off the stream and dispatch to the hub.
///
/// Returns `Ok(())` on a clean close. Framing errors propagate and close
/// the connection.
async fn read_loop(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    writer: &SharedWriter,
    hub: &Arc<Hub>,
) -> Result<()> {
    use tokio::io::AsyncReadExt;

    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = read_half.read(&mut buf).await.context("read error")?;
        if n == 0 {
            return Ok(()); // emulator closed the connection
        }
        for frame in decoder.feed(&buf[..n]).context("framing error")? {
            dispatch_frame(frame, writer, hub).await?;
        }
    }
}

/// Route one inbound frame: sync events block for a result, everything
/// else is fire-and-forget.
async fn dispatch_frame(frame: HostFrame, writer: &SharedWriter, hub: &Arc<Hub>) -> Result<()> {
    let Some(msg) = msg_from_frame(&frame) else {
        return Ok(()); // NONE padding
    };
    log::debug!("[host] < {msg}");

    match frame.event {
        event::COMMAND_OFF_SYNC | event::DATA_BYTE_SYNC => {
            let result = hub.handle_host_msg_sync(msg).await;
            log::debug!("[host] > sync response {result:#010X}");
            send_frame(writer, &HostFrame::new(event::SYNC_RESPONSE, result))
                .await
                .context("failed to write sync response")?;
        }
        event::DATA_BYTE
        | event::DATA_BLOCK
        | event::COMMAND_OFF
        | event::COMMAND_ON
        | event::MOTOR_OFF
        | event::MOTOR_ON
        | event::PROCEED_OFF
        | event::PROCEED_ON
        | event::INTERRUPT_OFF
        | event::INTERRUPT_ON
        | event::SPEED_CHANGE
        | event::WARM_RESET
        | event::COLD_RESET => hub.handle_host_msg(msg),
        other => {
            log::debug!("[host] ignoring unhandled event {other:02X}");
        }
    }
    Ok(())
}
