//! Notification pusher (C8).
//!
//! A push is a one-shot outbound TCP connection to the recipient's
//! `(host, notification_port)` carrying a single serialized packet; the
//! pusher does not wait for acknowledgement. Pushes are best-effort:
//! failure is logged and never propagated to the caller, so a
//! disconnected peer's last-known endpoint does not fail the triggering
//! request. The pusher does its network I/O without holding any broker
//! lock.

use iplchat_common::protocol::{write_packet, Packet};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a fresh connection to `endpoint`, write `packet`, and close. Errors
/// are swallowed into a log line; callers never see them.
pub async fn push(endpoint: SocketAddr, packet: Packet) {
    let kind = packet.kind;
    match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(endpoint)).await {
        Ok(Ok(mut stream)) => {
            if let Err(e) = write_packet(&mut stream, &packet).await {
                tracing::warn!(%endpoint, ?kind, error = %e, "notification push failed to send");
            }
        }
        Ok(Err(e)) => {
            tracing::warn!(%endpoint, ?kind, error = %e, "notification push failed to connect");
        }
        Err(_) => {
            tracing::warn!(%endpoint, ?kind, "notification push timed out connecting");
        }
    }
}
