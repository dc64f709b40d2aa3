//! Worker-side end of the message channel
//!
//! Worker programs are plain blocking processes, so this side uses std I/O.

use std::any::Any;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::net::TcpStream;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;

use longday_core::worker::WorkerReport;

use crate::channel::{decode_line, encode_line, ChannelHello, CHANNEL_ADDR_ENV, CHANNEL_TOKEN_ENV};
use crate::error::{HostError, Result};

/// Connection from a worker process back to its host
pub struct WorkerChannel {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    line_buffer: String,
}

impl WorkerChannel {
    /// Connect using the address and token the host put in the environment
    pub fn connect_from_env() -> Result<Self> {
        let addr = std::env::var(CHANNEL_ADDR_ENV)
            .map_err(|_| HostError::protocol(format!("{} is not set", CHANNEL_ADDR_ENV)))?;
        let token = std::env::var(CHANNEL_TOKEN_ENV)
            .map_err(|_| HostError::protocol(format!("{} is not set", CHANNEL_TOKEN_ENV)))?;
        Self::connect(&addr, &token)
    }

    /// Connect to a host listener and present the token
    pub fn connect(addr: &str, token: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        let mut channel = Self {
            reader,
            writer: BufWriter::new(stream),
            line_buffer: String::with_capacity(1024),
        };
        channel.write(&ChannelHello {
            token: token.to_string(),
        })?;
        Ok(channel)
    }

    fn write<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let line = encode_line(value)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    /// Send an arbitrary JSON payload
    pub fn send_value(&mut self, value: &Value) -> Result<()> {
        self.write(value)
    }

    /// Send a typed report
    pub fn send(&mut self, report: &WorkerReport) -> Result<()> {
        self.write(report)
    }

    /// Report a fault to the host as an `error` message
    ///
    /// Call this before exiting with a failure so the host records why.
    pub fn report_error(&mut self, message: impl Into<String>) -> Result<()> {
        self.send(&WorkerReport::error(message))
    }

    /// Install a panic hook that sends an `error` report to the host
    ///
    /// The previously installed hook still runs afterwards.
    pub fn report_panics(&self) -> Result<()> {
        let stream = Mutex::new(self.writer.get_ref().try_clone()?);
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let report = WorkerReport::error(panic_message(info.payload()));
            if let Ok(line) = encode_line(&report) {
                let mut stream = stream.lock().unwrap_or_else(|p| p.into_inner());
                let _ = stream.write_all(line.as_bytes());
                let _ = stream.flush();
            }
            previous(info);
        }));
        Ok(())
    }

    /// Block until the host sends a message
    ///
    /// Returns `None` once the host closes the channel.
    pub fn recv(&mut self) -> Result<Option<Value>> {
        loop {
            self.line_buffer.clear();
            match self.reader.read_line(&mut self.line_buffer) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    if self.line_buffer.trim().is_empty() {
                        continue;
                    }
                    return decode_line(&self.line_buffer).map(Some);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("Worker panicked: {}", detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelListener;
    use longday_core::worker::{WorkerEvent, WorkerId};
    use serde_json::json;
    use tokio::sync::{broadcast, mpsc, oneshot};

    #[tokio::test]
    async fn test_worker_channel_round_trip() {
        let listener = ChannelListener::bind().await.unwrap();
        let addr = listener.addr().to_string();
        let token = listener.token().to_string();
        let worker_id = WorkerId::new();
        let (events_tx, mut events_rx) = broadcast::channel(16);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (_exited_tx, exited_rx) = oneshot::channel();

        let pump = tokio::spawn(listener.run(worker_id, outbound_rx, events_tx, exited_rx));
        outbound_tx.send(json!({"command": "start", "iterations": 5})).unwrap();

        let worker = tokio::task::spawn_blocking(move || {
            let mut channel = WorkerChannel::connect(&addr, &token).unwrap();
            channel.send(&WorkerReport::Ready).unwrap();
            let command = channel.recv().unwrap().unwrap();
            channel.send(&WorkerReport::result("done")).unwrap();
            command
        });

        let command = worker.await.unwrap();
        assert_eq!(command["iterations"], 5);
        pump.await.unwrap();

        assert_eq!(
            events_rx.recv().await.unwrap(),
            WorkerEvent::message(worker_id, json!({"type": "ready"}))
        );
        assert_eq!(
            events_rx.recv().await.unwrap(),
            WorkerEvent::message(worker_id, json!({"type": "result", "value": "done"}))
        );
    }

    #[tokio::test]
    async fn test_report_error_reaches_host() {
        let listener = ChannelListener::bind().await.unwrap();
        let addr = listener.addr().to_string();
        let token = listener.token().to_string();
        let worker_id = WorkerId::new();
        let (events_tx, mut events_rx) = broadcast::channel(16);
        let (_outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (_exited_tx, exited_rx) = oneshot::channel();

        let pump = tokio::spawn(listener.run(worker_id, outbound_rx, events_tx, exited_rx));
        tokio::task::spawn_blocking(move || {
            let mut channel = WorkerChannel::connect(&addr, &token).unwrap();
            channel.report_error("disk full").unwrap();
        })
        .await
        .unwrap();
        pump.await.unwrap();

        let event = events_rx.recv().await.unwrap();
        assert_eq!(
            event,
            WorkerEvent::message(worker_id, json!({"type": "error", "message": "disk full"}))
        );
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("index out of bounds");
        assert_eq!(
            panic_message(payload.as_ref()),
            "Worker panicked: index out of bounds"
        );

        let payload: Box<dyn Any + Send> = Box::new(String::from("bad state"));
        assert_eq!(panic_message(payload.as_ref()), "Worker panicked: bad state");

        let payload: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(payload.as_ref()), "Worker panicked: unknown panic");
    }

    #[test]
    fn test_connect_without_env() {
        std::env::remove_var(CHANNEL_ADDR_ENV);
        assert!(matches!(
            WorkerChannel::connect_from_env(),
            Err(HostError::Protocol { .. })
        ));
    }
}
