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

//! JSON-RPC 2.0 envelope types and Content-Length framing.

use std::fmt;

use anyhow::{Context, Result};
use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_null() -> Value {
    Value::Null
}

/// A JSON-RPC request sent to the server.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RequestMessage {
    /// Always "2.0".
    pub jsonrpc: String,
    /// Correlation id, unique within a peer.
    pub id: RequestId,
    /// The method name.
    pub method: String,
    /// The request parameters.
    #[serde(default = "default_null")]
    pub params: Value,
}

impl RequestMessage {
    /// Builds a request envelope for the given id and method.
    #[must_use]
    pub fn new(id: RequestId, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// A JSON-RPC response, in either direction.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseMessage {
    /// Always "2.0".
    pub jsonrpc: String,
    /// The id of the request being answered.
    pub id: Option<RequestId>,
    /// The result, when the request succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error, when the request failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl ResponseMessage {
    /// Builds a successful reply to a server-initiated request.
    #[must_use]
    pub fn result(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error reply to a server-initiated request.
    #[must_use]
    pub fn error(id: RequestId, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: None,
            error: Some(ResponseError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// A JSON-RPC notification (no id, no reply).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotificationMessage {
    /// Always "2.0".
    pub jsonrpc: String,
    /// The method name.
    pub method: String,
    /// The notification parameters.
    #[serde(default = "default_null")]
    pub params: Value,
}

impl NotificationMessage {
    /// Builds a notification envelope.
    #[must_use]
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// Request id, numeric or string. Ids assigned by this client are always
/// numeric and strictly increasing; string ids appear only in
/// server-initiated requests.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// A numeric id.
    Number(i64),
    /// A string id.
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseError {
    /// The error code.
    pub code: i64,
    /// The error message.
    pub message: String,
    /// Additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// `MethodNotFound` per JSON-RPC 2.0.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Encodes a message with its Content-Length header. N is the UTF-8 byte
/// length of the body.
///
/// # Errors
///
/// Returns a serialization error if the message cannot be converted to JSON.
pub fn encode_message<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_string(message)?;
    let mut framed = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    framed.extend_from_slice(body.as_bytes());
    Ok(framed)
}

/// Extracts the next complete framed body from the buffer, if one is
/// available.
///
/// A header block that carries no `Content-Length` is skipped and scanning
/// continues with the bytes that follow it. Partial frames are left in the
/// buffer untouched.
///
/// # Errors
///
/// Returns an error if the header bytes are not UTF-8 or the length does not
/// parse; the caller should drop the connection in that case.
pub fn try_parse_message(buffer: &mut BytesMut) -> Result<Option<String>> {
    loop {
        let mut headers_end = None;
        let mut content_length = None;

        // Scan for \r\n\r\n
        for i in 0..buffer.len().saturating_sub(3) {
            if &buffer[i..i + 4] == b"\r\n\r\n" {
                headers_end = Some(i + 4);

                let headers_str = std::str::from_utf8(&buffer[0..i])
                    .context("Failed to parse headers as UTF-8")?;

                for line in headers_str.lines() {
                    if let Some(value) = line
                        .to_ascii_lowercase()
                        .strip_prefix("content-length:")
                        .map(str::trim)
                    {
                        content_length = Some(value.parse::<usize>()?);
                    }
                }
                break;
            }
        }

        let Some(header_len) = headers_end else {
            return Ok(None);
        };

        let Some(content_len) = content_length else {
            // Header block without Content-Length: skip it, keep the stream.
            buffer.advance(header_len);
            continue;
        };

        if buffer.len() < header_len + content_len {
            return Ok(None);
        }

        buffer.advance(header_len);
        let message_bytes = buffer.split_to(content_len);
        let message = String::from_utf8(message_bytes.to_vec())?;
        return Ok(Some(message));
    }
}
