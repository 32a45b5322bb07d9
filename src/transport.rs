// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! A single bound IPv4 UDP socket with an asynchronous receive loop.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Datagrams larger than this are never read off the wire.
const MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;

/// Bound on how long a single send is allowed to take.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// `listen` was called while already bound.
    #[error("already listening")]
    AlreadyListening,
    /// `send` or `listen` was attempted on a socket that isn't bound.
    #[error("not listening")]
    NotListening,
    /// The OS failed to bind, read, or write.
    #[error("transport send failure")]
    SendFailure,
}

/// A received datagram: the sender's address and the raw bytes.
pub type Datagram = (std::net::SocketAddr, Vec<u8>);

/// Owns a single UDP socket, exposing a receive channel and a send method.
pub struct UdpTransport {
    port: u16,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    receive_loop: Mutex<Option<(tokio::task::JoinHandle<()>, CancellationToken)>>,
}

impl UdpTransport {
    /// A transport bound to `port` once [`listen`](Self::listen) is called.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            socket: Mutex::new(None),
            receive_loop: Mutex::new(None),
        }
    }

    /// Bind the socket and spawn the background receive loop. Returns a
    /// channel the caller can poll for inbound datagrams, plus a
    /// cancellation token that [`stop`](Self::stop) also triggers.
    ///
    /// Fails with [`TransportError::AlreadyListening`] if already bound.
    pub async fn listen(&self) -> Result<(mpsc::Receiver<Datagram>, CancellationToken), TransportError> {
        let mut guard = self.socket.lock().await;
        if guard.is_some() {
            return Err(TransportError::AlreadyListening);
        }

        let addr = format!("0.0.0.0:{}", self.port);
        let socket = UdpSocket::bind(&addr)
            .await
            .map_err(|_| TransportError::SendFailure)?;
        socket.set_broadcast(true).ok();
        let socket = Arc::new(socket);
        *guard = Some(socket.clone());
        drop(guard);

        let (tx, rx) = mpsc::channel(1024);
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_PACKET_SIZE];
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => {
                        trace!("udp transport receive loop cancelled");
                        break;
                    }
                    result = socket.recv_from(&mut buf) => {
                        match result {
                            Ok((len, sender)) => {
                                if tx.send((sender, buf[..len].to_vec())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                trace!(error = %e, "udp read heartbeat/ignorable error");
                                continue;
                            }
                        }
                    }
                }
            }
        });

        *self.receive_loop.lock().await = Some((handle, cancel.clone()));

        Ok((rx, cancel))
    }

    /// Send one datagram to `address` (an IPv4 `host:port` string).
    pub async fn send(&self, address: &str, bytes: &[u8]) -> Result<(), TransportError> {
        let guard = self.socket.lock().await;
        let socket = guard.as_ref().ok_or(TransportError::NotListening)?.clone();
        drop(guard);

        let fut = socket.send_to(bytes, address);
        match tokio::time::timeout(WRITE_TIMEOUT, fut).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                warn!(error = %e, %address, "udp send failed");
                Err(TransportError::SendFailure)
            }
            Err(_) => {
                warn!(%address, "udp send timed out");
                Err(TransportError::SendFailure)
            }
        }
    }

    /// Close the socket. Cancels and joins the receive loop so the bound
    /// port is actually released before this returns; a subsequent `listen`
    /// is then guaranteed to succeed.
    pub async fn stop(&self) {
        if let Some((handle, cancel)) = self.receive_loop.lock().await.take() {
            cancel.cancel();
            let _ = handle.await;
        }
        let mut guard = self.socket.lock().await;
        *guard = None;
    }

    /// True if currently bound.
    pub async fn is_listening(&self) -> bool {
        self.socket.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn free_port() -> u16 {
        let s = UdpSocket::bind("0.0.0.0:0").await.unwrap();
        s.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn listen_then_listen_again_fails() {
        let transport = UdpTransport::new(free_port().await);
        let (_, cancel) = transport.listen().await.unwrap();
        assert!(matches!(
            transport.listen().await,
            Err(TransportError::AlreadyListening)
        ));
        cancel.cancel();
        transport.stop().await;
    }

    #[tokio::test]
    async fn send_without_listening_fails() {
        let transport = UdpTransport::new(free_port().await);
        let result = transport.send("127.0.0.1:1", b"hi").await;
        assert!(matches!(result, Err(TransportError::NotListening)));
    }

    #[tokio::test]
    async fn stop_then_listen_again_succeeds() {
        let port = free_port().await;
        let transport = UdpTransport::new(port);
        let (_, cancel) = transport.listen().await.unwrap();
        cancel.cancel();
        transport.stop().await;
        assert!(transport.listen().await.is_ok());
    }

    #[tokio::test]
    async fn datagram_round_trips_between_two_transports() {
        let a = UdpTransport::new(free_port().await);
        let b_port = free_port().await;
        let b = UdpTransport::new(b_port);

        let (mut a_rx, _a_cancel) = a.listen().await.unwrap();
        let (mut b_rx, _b_cancel) = b.listen().await.unwrap();

        let a_addr = format!("127.0.0.1:{}", a.port);
        a.send(&format!("127.0.0.1:{b_port}"), b"hello").await.unwrap();

        let (_, bytes) = b_rx.recv().await.unwrap();
        assert_eq!(bytes, b"hello");

        b.send(&a_addr, b"world").await.unwrap();
        let (_, bytes) = a_rx.recv().await.unwrap();
        assert_eq!(bytes, b"world");
    }
}
