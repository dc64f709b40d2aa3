//! Dedicated message channel between the host and one worker
//!
//! Each worker gets its own loopback listener. The worker connects, sends a
//! hello line carrying its token, and from then on both sides exchange
//! newline-delimited JSON values.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use longday_core::worker::{WorkerEvent, WorkerId};

use crate::error::{HostError, Result};

/// Environment variable carrying the channel address
pub const CHANNEL_ADDR_ENV: &str = "LONGDAY_CHANNEL_ADDR";
/// Environment variable carrying the channel token
pub const CHANNEL_TOKEN_ENV: &str = "LONGDAY_CHANNEL_TOKEN";

/// How long a connecting peer has to present its hello line
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
/// How long to look for a connection queued by a worker that already exited
const LATE_CONNECT_GRACE: Duration = Duration::from_millis(50);

/// First line a worker sends after connecting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelHello {
    pub token: String,
}

/// Serialize a value to a JSON line (with newline)
pub fn encode_line<T: Serialize>(value: &T) -> Result<String> {
    let mut json = serde_json::to_string(value)
        .map_err(|e| HostError::protocol(format!("Failed to encode message: {}", e)))?;
    json.push('\n');
    Ok(json)
}

/// Deserialize a JSON line
pub fn decode_line<T: for<'de> Deserialize<'de>>(line: &str) -> Result<T> {
    serde_json::from_str(line.trim())
        .map_err(|e| HostError::protocol(format!("Invalid message line: {}", e)))
}

/// Host side of a worker's channel, before the worker connects
pub struct ChannelListener {
    listener: TcpListener,
    addr: SocketAddr,
    token: String,
}

impl ChannelListener {
    /// Bind a fresh loopback listener with a random token
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        Ok(Self {
            listener,
            addr,
            token: Uuid::new_v4().simple().to_string(),
        })
    }

    /// Address the worker should connect to
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Token the worker must present
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Read and check the hello line of a fresh connection
    async fn handshake(
        &self,
        stream: TcpStream,
    ) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        let read = tokio::time::timeout(HANDSHAKE_TIMEOUT, reader.read_line(&mut line))
            .await
            .map_err(|_| HostError::protocol("Timed out waiting for hello"))??;
        if read == 0 {
            return Err(HostError::protocol("Connection closed before hello"));
        }

        let hello: ChannelHello = decode_line(&line)?;
        if hello.token != self.token {
            return Err(HostError::protocol("Token mismatch"));
        }

        Ok((reader, write_half))
    }

    /// Wait for the worker to connect and pump messages until it disconnects
    ///
    /// Inbound lines become `WorkerEvent::Message`s; `outbound` payloads are
    /// written as lines once connected. `exited` fires when the process is
    /// gone, which stops waiting for a connection that will never come.
    pub async fn run(
        self,
        worker_id: WorkerId,
        mut outbound: mpsc::UnboundedReceiver<Value>,
        events: broadcast::Sender<WorkerEvent>,
        mut exited: oneshot::Receiver<()>,
    ) {
        let mut exited_seen = false;

        let (mut reader, mut writer) = loop {
            let accepted = if exited_seen {
                match tokio::time::timeout(LATE_CONNECT_GRACE, self.listener.accept()).await {
                    Ok(accepted) => accepted,
                    Err(_) => {
                        debug!("Worker {} exited without connecting", worker_id);
                        return;
                    }
                }
            } else {
                tokio::select! {
                    biased;
                    accepted = self.listener.accept() => accepted,
                    _ = &mut exited => {
                        exited_seen = true;
                        continue;
                    }
                }
            };

            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept failed on channel for worker {}: {}", worker_id, e);
                    if exited_seen {
                        return;
                    }
                    continue;
                }
            };

            match self.handshake(stream).await {
                Ok(halves) => break halves,
                Err(e) => {
                    warn!(
                        "Rejected channel connection for worker {} from {}: {}",
                        worker_id, peer, e
                    );
                    if exited_seen {
                        return;
                    }
                }
            }
        };

        info!("Worker {} connected its message channel", worker_id);

        let writer_task = tokio::spawn(async move {
            while let Some(payload) = outbound.recv().await {
                let line = match encode_line(&payload) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Dropping outbound message for {}: {}", worker_id, e);
                        continue;
                    }
                };
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    debug!("Channel write to worker {} failed: {}", worker_id, e);
                    break;
                }
            }
        });

        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match decode_line::<Value>(&line) {
                        Ok(data) => {
                            if events.send(WorkerEvent::message(worker_id, data)).is_err() {
                                debug!("No subscribers for message from worker {}", worker_id);
                            }
                        }
                        Err(e) => warn!("Worker {} sent an invalid line: {}", worker_id, e),
                    }
                }
                Err(e) => {
                    warn!("Channel read from worker {} failed: {}", worker_id, e);
                    break;
                }
            }
        }

        writer_task.abort();
        debug!("Message channel for worker {} closed", worker_id);
    }
}
