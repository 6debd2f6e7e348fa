/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Framed JSON-RPC transport over a child process's stdio.
//!
//! One transport per peer. Requests are correlated to replies through a
//! single pending table; server-initiated traffic (requests and
//! notifications) is delivered to an injected channel in arrival order.
//! Every pending request is resolved by its reply, rejected by its timeout,
//! or rejected when the peer exits — never left suspended.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error, trace, warn};

use super::protocol::{
    self, NotificationMessage, RequestId, RequestMessage, ResponseMessage, encode_message,
};
use crate::error::Error;

/// A server-initiated message, delivered to the peer's dispatcher.
#[derive(Debug)]
pub enum ServerMessage {
    /// A request from the server that expects a reply.
    Request {
        /// The server's request id, echoed back in the reply.
        id: RequestId,
        /// The method name.
        method: String,
        /// The request parameters.
        params: Value,
    },
    /// A notification from the server.
    Notification {
        /// The method name.
        method: String,
        /// The notification parameters.
        params: Value,
    },
}

type Pending = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Result<Value, Error>>>>>;

/// Content-Length framed JSON-RPC transport for one peer process.
pub struct Transport {
    next_id: AtomicI64,
    stdin: Arc<Mutex<ChildStdin>>,
    pending: Pending,
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl Transport {
    /// Builds a transport over the child's stdio and starts the reader task.
    ///
    /// Server-initiated messages are pushed into `incoming`; the receiving
    /// side decides what to do with them.
    pub fn new(
        stdin: ChildStdin,
        stdout: ChildStdout,
        incoming: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        let stdin = Arc::new(Mutex::new(stdin));
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        let reader_handle = tokio::spawn(Self::reader_task(stdout, pending.clone(), incoming));

        Self {
            next_id: AtomicI64::new(1),
            stdin,
            pending,
            _reader_handle: reader_handle,
        }
    }

    /// Background task that reads framed messages and routes them.
    async fn reader_task(
        stdout: ChildStdout,
        pending: Pending,
        incoming: mpsc::UnboundedSender<ServerMessage>,
    ) {
        let mut reader = BufReader::new(stdout);
        let mut buffer = BytesMut::with_capacity(8192);

        loop {
            let mut temp = [0u8; 4096];
            match reader.read(&mut temp).await {
                Ok(0) => {
                    debug!("LSP stdout closed");
                    break;
                }
                Ok(n) => buffer.extend_from_slice(&temp[..n]),
                Err(e) => {
                    error!("Error reading from LSP stdout: {}", e);
                    break;
                }
            }

            loop {
                let message_str = match protocol::try_parse_message(&mut buffer) {
                    Ok(Some(m)) => m,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Unrecoverable framing error: {}", e);
                        // Drain all pending and stop reading.
                        Self::drain_pending(&pending, "framing error on server stdout").await;
                        return;
                    }
                };

                trace!("Received LSP message: {}", message_str);

                // A body that fails to decode is dropped; the stream survives.
                let value: Value = match serde_json::from_str(&message_str) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("Discarding undecodable message body: {}", e);
                        continue;
                    }
                };

                Self::route(value, &pending, &incoming).await;
            }
        }

        Self::drain_pending(&pending, "server closed its stdout").await;
    }

    /// Routes one decoded message: correlated reply, server request, or
    /// server notification. A message with both a method and an id is a
    /// server request, never a reply.
    async fn route(value: Value, pending: &Pending, incoming: &mpsc::UnboundedSender<ServerMessage>) {
        let method = value
            .get("method")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let id = value
            .get("id")
            .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());

        match (method, id) {
            (Some(method), Some(id)) => {
                let params = value.get("params").cloned().unwrap_or(Value::Null);
                let _ = incoming.send(ServerMessage::Request { id, method, params });
            }
            (Some(method), None) => {
                let params = value.get("params").cloned().unwrap_or(Value::Null);
                let _ = incoming.send(ServerMessage::Notification { method, params });
            }
            (None, Some(id)) => {
                let response: ResponseMessage = match serde_json::from_value(value) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("Discarding malformed response: {}", e);
                        return;
                    }
                };

                let sender = pending.lock().await.remove(&id);
                if let Some(sender) = sender {
                    let outcome = match response.error {
                        Some(err) => Err(Error::Protocol {
                            code: err.code,
                            message: err.message,
                        }),
                        None => Ok(response.result.unwrap_or(Value::Null)),
                    };
                    let _ = sender.send(outcome);
                } else {
                    // Late reply after a timeout; dropped silently.
                    trace!("Dropping reply for unknown request id {}", id);
                }
            }
            (None, None) => {
                warn!("Ignoring message with neither method nor id");
            }
        }
    }

    async fn drain_pending(pending: &Pending, reason: &str) {
        let mut pending = pending.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(Error::PeerExit(reason.to_string())));
        }
    }

    /// Sends a request and waits for its reply or the timeout.
    ///
    /// On timeout the pending entry is discarded, so a late reply is dropped
    /// silently by the reader.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestTimeout`] after `timeout`, [`Error::Protocol`]
    /// on an error response, or [`Error::PeerExit`] when the connection dies.
    pub async fn send_request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, Error> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let request = RequestMessage::new(id.clone(), method, params);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if let Err(e) = self.write_message(&request).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::PeerExit("server connection closed".to_string())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::RequestTimeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Sends a notification (no id, no correlation).
    ///
    /// # Errors
    ///
    /// Returns [`Error::PeerExit`] when the server's stdin is gone.
    pub async fn send_notification(&self, method: &str, params: Value) -> Result<(), Error> {
        self.write_message(&NotificationMessage::new(method, params))
            .await
    }

    /// Sends a raw response message. Used to answer server-initiated
    /// requests handled by adapters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PeerExit`] when the server's stdin is gone.
    pub async fn send_response(&self, response: &ResponseMessage) -> Result<(), Error> {
        self.write_message(response).await
    }

    /// Fails every outstanding request with the given reason. Called when
    /// the peer exits or errors.
    pub async fn reject_all_pending(&self, reason: &str) {
        Self::drain_pending(&self.pending, reason).await;
    }

    async fn write_message<T: serde::Serialize>(&self, message: &T) -> Result<(), Error> {
        let framed = encode_message(message)
            .map_err(|e| Error::PeerExit(format!("failed to encode message: {e}")))?;

        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(&framed)
            .await
            .map_err(|e| Error::PeerExit(format!("failed to write to server stdin: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::PeerExit(format!("failed to flush server stdin: {e}")))?;
        Ok(())
    }
}
