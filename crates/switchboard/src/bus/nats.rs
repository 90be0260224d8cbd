// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! NATS transport.
//!
//! Topics map onto NATS subjects segment by segment: `/` becomes `.` and
//! the `+` wildcard becomes `*`. Characters NATS treats specially inside a
//! token are percent-escaped so a topic survives the round trip. The
//! message kind travels in the `message.type` header and the payload is
//! the JSON-encoded data map.

use std::sync::{Mutex, MutexGuard};

use async_nats::connection::State;
use async_nats::HeaderMap;
use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::info;

use super::{RawMessage, RawStream, Transport};
use crate::message::MessageKind;
use crate::topic::ANY;

pub const MESSAGE_TYPE_HEADER: &str = "message.type";

#[derive(Default)]
pub struct NatsTransport {
    client: Mutex<Option<async_nats::Client>>,
}

impl NatsTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<async_nats::Client>> {
        self.client.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn client(&self) -> anyhow::Result<async_nats::Client> {
        self.slot().clone().ok_or_else(|| anyhow::anyhow!("not connected"))
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn connect(&self, endpoint: &str, token: &str) -> anyhow::Result<()> {
        let client = async_nats::ConnectOptions::with_token(token.to_owned())
            .name("switchboard")
            .connect(endpoint)
            .await?;
        info!(url = %endpoint, "nats connected");
        *self.slot() = Some(client);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.slot().as_ref().is_some_and(|c| c.connection_state() == State::Connected)
    }

    async fn subscribe(&self, filter: &str) -> anyhow::Result<RawStream> {
        let client = self.client()?;
        let sub = client.subscribe(to_subject(filter)).await?;
        Ok(sub
            .map(|msg| {
                let kind = msg
                    .headers
                    .as_ref()
                    .and_then(|h| h.get(MESSAGE_TYPE_HEADER))
                    .map(|v| MessageKind::parse(v.as_str()))
                    .unwrap_or(MessageKind::Event);
                RawMessage { topic: from_subject(msg.subject.as_str()), kind, payload: msg.payload }
            })
            .boxed())
    }

    async fn publish(&self, message: RawMessage) -> anyhow::Result<()> {
        let client = self.client()?;
        let mut headers = HeaderMap::new();
        headers.insert(MESSAGE_TYPE_HEADER, message.kind.as_str());
        client.publish_with_headers(to_subject(&message.topic), headers, message.payload).await?;
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        let client = self.slot().take();
        if let Some(client) = client {
            client.flush().await?;
            info!("nats disconnected");
        }
        Ok(())
    }
}

/// Map a slash topic (or `+` filter) to a NATS subject.
pub fn to_subject(topic: &str) -> String {
    topic
        .split('/')
        .map(|seg| if seg == ANY { "*".to_owned() } else { escape(seg) })
        .collect::<Vec<_>>()
        .join(".")
}

/// Inverse of [`to_subject`] for concrete subjects.
pub fn from_subject(subject: &str) -> String {
    subject.split('.').map(unescape).collect::<Vec<_>>().join("/")
}

fn escape(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        match c {
            '%' | '.' | '*' | '>' => out.push_str(&format!("%{:02X}", c as u32)),
            c if c.is_ascii_whitespace() => out.push_str(&format!("%{:02X}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

fn unescape(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    let mut rest = token;
    while let Some(i) = rest.find('%') {
        out.push_str(&rest[..i]);
        let hex = rest.get(i + 1..i + 3);
        match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
            Some(byte) => {
                out.push(char::from(byte));
                rest = &rest[i + 3..];
            }
            None => {
                out.push('%');
                rest = &rest[i + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}
