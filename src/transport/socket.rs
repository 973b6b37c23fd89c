//! Tokio TCP adapter for the host transport boundary.
//!
//! Handles `tcp://` targets only. TLS schemes need a host that terminates TLS
//! and are rejected here. Inbound frames are split with the frame layout and
//! size limit carried by the [`ConnectTarget`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::error::{TransportError, TransportResult};
use super::frame::FrameDecoder;
use super::host::{ConnectTarget, Transport, TransportConnector, TransportLink};

/// Default read buffer size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024;

/// Inbound payloads buffered before the reader applies backpressure.
pub const DEFAULT_INBOUND_CAPACITY: usize = 64;

/// Opens plain TCP transports.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl TransportConnector for TcpConnector {
    async fn open(&self, target: &ConnectTarget) -> TransportResult<TransportLink> {
        let address = target
            .address
            .strip_prefix("tcp://")
            .ok_or_else(|| TransportError::InvalidAddress {
                address: target.address.clone(),
                reason: "tcp adapter only handles tcp:// targets".into(),
            })?;

        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        let (mut read, write) = stream.into_split();

        let (inbound_tx, inbound_rx) = mpsc::channel(DEFAULT_INBOUND_CAPACITY);
        let decoder = FrameDecoder::new(target.frame).with_max_frame_size(target.max_frame_size);
        let identity = target.identity.clone();

        let reader = tokio::spawn(async move {
            let mut decoder = decoder;
            let mut buf = vec![0u8; DEFAULT_READ_BUFFER_SIZE];
            loop {
                let n = match read.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(err) => {
                        debug!(identity = %identity, error = %err, "tcp read failed");
                        break;
                    }
                };
                decoder.push(&buf[..n]);
                loop {
                    match decoder.next_frame() {
                        Ok(Some(payload)) => {
                            if inbound_tx.send(payload).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            warn!(identity = %identity, error = %err, "undecodable frame, dropping stream");
                            return;
                        }
                    }
                }
            }
        });

        Ok(TransportLink {
            transport: Arc::new(TcpTransport {
                write: Mutex::new(Some(write)),
                reader,
            }),
            inbound: inbound_rx,
        })
    }
}

/// Outbound half of a TCP transport.
#[derive(Debug)]
pub struct TcpTransport {
    write: Mutex<Option<OwnedWriteHalf>>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, frame: Vec<u8>) -> TransportResult<()> {
        let mut write = self.write.lock().await;
        let stream = write.as_mut().ok_or(TransportError::ConnectionClosed)?;
        stream.write_all(&frame).await?;
        Ok(())
    }

    async fn close(&self) {
        if let Some(mut stream) = self.write.lock().await.take() {
            let _ = stream.shutdown().await;
        }
        self.reader.abort();
    }
}
