//! Bridges node frames to the broker.
//!
//! The bridge owns the broker connection state machine
//! (`Disconnected → Connecting → Connected`) and the process-lifetime
//! counters. All methods are driven from one task and run to completion, so
//! nothing here is shared or locked.

use std::collections::VecDeque;
use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::time::Instant;

use crate::config::{BridgeConfig, OutboundPolicy};
use crate::message::{DecodeError, EventMessage};

use super::payload::{self, EventPayload, LivenessPayload};

/// A message ready for the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Publish sink the bridge forwards to.
#[allow(async_fn_in_trait)]
pub trait Broker {
    type Error: fmt::Display;

    /// A connection attempt in flight. It owns what it needs, so frames can
    /// still be handled while it runs.
    type Connect: Future<Output = Result<(), Self::Error>> + Unpin;

    fn connect(&mut self) -> Self::Connect;

    /// Connection liveness as seen by the client's keepalive.
    fn is_connected(&self) -> bool;

    async fn publish(&mut self, publish: Publish) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Counters since the gateway started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Frames that decoded into a message.
    pub messages_received: u64,
    /// Messages the broker accepted.
    pub messages_forwarded: u64,
    /// Decoded messages that were never forwarded.
    pub messages_dropped: u64,
}

/// What happened to one received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Forwarded,
    /// Held for the next connection.
    Queued,
    /// Broker unavailable, message discarded.
    Dropped,
    /// The broker rejected the publish.
    PublishFailed,
    Malformed(DecodeError),
}

#[derive(Debug, Clone, Copy)]
enum Link {
    Disconnected { retry_at: Instant },
    Connecting { attempt: u32, next_attempt_at: Instant },
    /// Attempt number `attempt` has been started and not yet finished.
    Attempting { attempt: u32 },
    Connected,
}

pub struct GatewayBridge<B: Broker> {
    broker: B,
    config: BridgeConfig,
    link: Link,
    counters: Counters,
    queue: VecDeque<Publish>,
    started_at: Instant,
}

impl<B: Broker> GatewayBridge<B> {
    /// A disconnected bridge that will try to connect on the first
    /// [`begin_connect`](Self::begin_connect).
    pub fn new(broker: B, config: BridgeConfig, now: Instant) -> Self {
        GatewayBridge {
            broker,
            config,
            link: Link::Disconnected { retry_at: now },
            counters: Counters::default(),
            queue: VecDeque::new(),
            started_at: now,
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self.link {
            Link::Disconnected { .. } => ConnectionState::Disconnected,
            Link::Connecting { .. } | Link::Attempting { .. } => ConnectionState::Connecting,
            Link::Connected => ConnectionState::Connected,
        }
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn broker_mut(&mut self) -> &mut B {
        &mut self.broker
    }

    /// Decode one radio frame and forward it.
    ///
    /// Malformed frames are logged and leave the bridge untouched. Decoding
    /// happens whatever the broker state; without a connection the message
    /// is dropped or queued according to the outbound policy.
    #[tracing::instrument(skip(self, frame, now), fields(len = frame.len()))]
    pub async fn handle_frame(&mut self, frame: &[u8], source: &str, now: Instant) -> FrameOutcome {
        let message = match EventMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "malformed frame dropped");
                return FrameOutcome::Malformed(e);
            }
        };
        self.counters.messages_received += 1;
        tracing::info!(
            node_id = message.node_id,
            event_type = %message.event_type,
            trap_count = message.trap_count,
            "frame received"
        );

        let body = EventPayload::new(&message, chrono::Utc::now(), source);
        let publish = match serde_json::to_vec(&body) {
            Ok(payload) => Publish {
                topic: message.topic(&self.config.topic_prefix),
                payload,
            },
            Err(e) => {
                tracing::error!(error = %e, "cannot serialize event payload");
                self.counters.messages_dropped += 1;
                return FrameOutcome::Dropped;
            }
        };

        self.notice_loss(now);
        if let Link::Connected = self.link {
            return self.forward(publish, now).await;
        }

        match self.config.outbound {
            OutboundPolicy::Queue { capacity } if capacity > 0 => {
                if self.queue.len() >= capacity {
                    self.queue.pop_front();
                    self.counters.messages_dropped += 1;
                    tracing::warn!(capacity, "outbound queue full, oldest message dropped");
                }
                self.queue.push_back(publish);
                tracing::info!(queued = self.queue.len(), "broker unavailable, message queued");
                FrameOutcome::Queued
            }
            _ => {
                self.counters.messages_dropped += 1;
                tracing::warn!(state = ?self.state(), "broker unavailable, message dropped");
                FrameOutcome::Dropped
            }
        }
    }

    /// Advance the connection state machine to `now` and start a connection
    /// attempt if one is due.
    ///
    /// Starts at most one attempt per call and none while one is in flight.
    /// Attempts are spaced by the reconnect backoff; after the last attempt
    /// of a window the bridge stays disconnected until the window has passed.
    /// The caller drives the returned attempt and hands its result to
    /// [`finish_connect`](Self::finish_connect). Frames handled meanwhile are
    /// treated as arriving while disconnected.
    pub fn begin_connect(&mut self, now: Instant) -> Option<B::Connect> {
        self.notice_loss(now);

        if let Link::Disconnected { retry_at } = self.link {
            if now >= retry_at {
                self.link = Link::Connecting {
                    attempt: 0,
                    next_attempt_at: now,
                };
            }
        }

        match self.link {
            Link::Connecting { attempt, next_attempt_at } if now >= next_attempt_at => {
                let attempt = attempt + 1;
                tracing::info!(attempt, "connecting to the broker");
                self.link = Link::Attempting { attempt };
                Some(self.broker.connect())
            }
            _ => None,
        }
    }

    /// Record the outcome of the attempt started by
    /// [`begin_connect`](Self::begin_connect).
    pub async fn finish_connect(&mut self, result: Result<(), B::Error>, now: Instant) -> ConnectionState {
        let Link::Attempting { attempt } = self.link else {
            tracing::debug!("no connection attempt in flight");
            return self.state();
        };
        let policy = self.config.reconnect;

        match result {
            Ok(()) => {
                tracing::info!(attempt, "connected to the broker");
                self.link = Link::Connected;
                self.flush_queue(now).await;
            }
            Err(e) if attempt >= policy.max_attempts.max(1) => {
                tracing::error!(attempt, error = %e, retry_in = ?policy.window, "broker unreachable, giving up until next window");
                self.link = Link::Disconnected {
                    retry_at: now + policy.window,
                };
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "broker connection attempt failed");
                self.link = Link::Connecting {
                    attempt,
                    next_attempt_at: now + policy.backoff,
                };
            }
        }
        self.state()
    }

    /// [`begin_connect`](Self::begin_connect) and wait for the attempt.
    pub async fn maintain_connection(&mut self, now: Instant) -> ConnectionState {
        match self.begin_connect(now) {
            Some(connect) => {
                let result = connect.await;
                self.finish_connect(result, now).await
            }
            None => self.state(),
        }
    }

    /// Publish the gateway heartbeat. Skipped while not connected.
    pub async fn publish_liveness(&mut self, now: Instant, signal_quality: Option<i32>) -> bool {
        self.notice_loss(now);
        if !matches!(self.link, Link::Connected) {
            tracing::debug!("broker unavailable, liveness skipped");
            return false;
        }

        let body = LivenessPayload {
            status: "online",
            uptime: now.saturating_duration_since(self.started_at).as_secs(),
            signal_quality,
            messages_received: self.counters.messages_received,
            messages_forwarded: self.counters.messages_forwarded,
            free_memory: payload::free_memory(),
        };
        let payload = match serde_json::to_vec(&body) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "cannot serialize liveness payload");
                return false;
            }
        };

        let publish = Publish {
            topic: self.config.status_topic.clone(),
            payload,
        };
        match self.broker.publish(publish).await {
            Ok(()) => {
                tracing::debug!(uptime = body.uptime, "liveness published");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "liveness publish failed");
                self.notice_loss(now);
                false
            }
        }
    }

    async fn forward(&mut self, publish: Publish, now: Instant) -> FrameOutcome {
        let topic = publish.topic.clone();
        match self.broker.publish(publish).await {
            Ok(()) => {
                self.counters.messages_forwarded += 1;
                tracing::info!(%topic, "event forwarded");
                FrameOutcome::Forwarded
            }
            Err(e) => {
                self.counters.messages_dropped += 1;
                tracing::warn!(%topic, error = %e, "event publish failed, message dropped");
                self.notice_loss(now);
                FrameOutcome::PublishFailed
            }
        }
    }

    async fn flush_queue(&mut self, now: Instant) {
        while let Some(publish) = self.queue.pop_front() {
            if self.forward(publish, now).await != FrameOutcome::Forwarded {
                break;
            }
        }
    }

    /// Start reconnecting if the client lost a connection we thought we had.
    fn notice_loss(&mut self, now: Instant) {
        if let Link::Connected = self.link {
            if !self.broker.is_connected() {
                tracing::warn!("broker connection lost");
                self.link = Link::Connecting {
                    attempt: 0,
                    next_attempt_at: now,
                };
            }
        }
    }
}

impl<B: Broker> Debug for GatewayBridge<B> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayBridge")
            .field("state", &self.state())
            .field("counters", &self.counters)
            .field("queued", &self.queue.len())
            .finish()
    }
}
