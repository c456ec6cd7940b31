//! # Reconnecting connection manager: one streaming channel, self-healing on drop.
//!
//! ## State machine
//! ```text
//!                connect()
//! Disconnected ───────────► Connecting ── handshake ok ──► Connected (attempt = 0)
//!      ▲                        ▲  │                           │
//!      │                        │  └── handshake failed ──┐    │ transport closed
//!      │                  timer │                         ▼    ▼
//!      │                        └──────────────────── Reconnecting
//!      │   attempt >= max_attempts (exactly one Exhausted)    │
//!      └──────────────────────────────────────────────────────┘
//! ```
//!
//! While reconnecting, the delay before the next attempt is `backoff.next(attempt)`
//! (`min(cap, base × 2^attempt)` by default), then `attempt` is incremented.
//!
//! ## Rules
//! - `send` never queues: it fails with [`ConnectionError::NotConnected`] unless connected.
//! - Every attempt asks the [`EndpointSource`] for an endpoint.
//! - The reader of the previous transport is detached before a new one is attached.
//! - Each attempt carries a generation number; closes from superseded transports are ignored.
//! - `disconnect()` cancels the pending timer and resets the attempt counter.
//! - A `connect()` future dropped mid-handshake does not strand the channel in `Connecting`.

use std::sync::{Arc, OnceLock};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ReconnectConfig;
use crate::connection::endpoint::EndpointSource;
use crate::connection::link::{Connector, Link};
use crate::error::ConnectionError;
use crate::events::{Bus, Event, EventKind};
use crate::policies::BackoffPolicy;

const CHANNEL_EVENTS_CAPACITY: usize = 256;

/// Channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected and not trying.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Transport established.
    Connected,
    /// Waiting for the next scheduled attempt.
    Reconnecting,
}

/// Events delivered to [`ConnectionManager::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Transport established.
    Open {
        /// Endpoint connected to.
        endpoint: String,
    },
    /// Inbound frame.
    Message(Vec<u8>),
    /// Transport closed or a connect attempt failed.
    Close {
        /// Why.
        reason: String,
    },
    /// Reconnect attempts are exhausted; the channel stays down.
    Exhausted {
        /// Attempts made.
        attempts: u32,
    },
}

/// Snapshot returned by [`ConnectionManager::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    /// Channel name.
    pub channel: String,
    /// Current state.
    pub state: ConnectionState,
    /// Reconnect attempts since the last clean connect.
    pub attempt: u32,
    /// Endpoint of the current or last attempt.
    pub endpoint: Option<String>,
    /// True after attempts were exhausted, until the next explicit `connect`.
    pub exhausted: bool,
}

#[derive(Default)]
struct Conn {
    state: ConnectionState,
    attempt: u32,
    endpoint: Option<String>,
    outbound: Option<mpsc::Sender<Vec<u8>>>,
    generation: u64,
    reader: Option<CancellationToken>,
    timer: Option<CancellationToken>,
    exhausted: bool,
}

impl Conn {
    fn detach(&mut self) {
        self.outbound = None;
        if let Some(reader) = self.reader.take() {
            reader.cancel();
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

struct Shared {
    channel: String,
    max_attempts: u32,
    backoff: BackoffPolicy,
    handshake_timeout: Option<time::Duration>,
    connector: Arc<dyn Connector>,
    endpoints: Arc<dyn EndpointSource>,
    conn: Mutex<Conn>,
    events: broadcast::Sender<ChannelEvent>,
    bus: OnceLock<Bus>,
}

/// Manages one logical streaming channel.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Creates a disconnected channel.
    pub fn new(
        channel: impl Into<String>,
        connector: Arc<dyn Connector>,
        endpoints: Arc<dyn EndpointSource>,
        config: ReconnectConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(CHANNEL_EVENTS_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                channel: channel.into(),
                max_attempts: config.max_attempts,
                backoff: config.backoff(),
                handshake_timeout: config.handshake_timeout(),
                connector,
                endpoints,
                conn: Mutex::new(Conn::default()),
                events,
                bus: OnceLock::new(),
            }),
        }
    }

    /// Publishes lifecycle events to `bus`.
    pub fn with_bus(self, bus: Bus) -> Self {
        let _ = self.shared.bus.set(bus);
        self
    }

    /// Channel name.
    pub fn channel(&self) -> &str {
        &self.shared.channel
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.shared.conn.lock().state
    }

    /// Snapshot of the channel.
    pub fn status(&self) -> ConnectionStatus {
        let conn = self.shared.conn.lock();
        ConnectionStatus {
            channel: self.shared.channel.clone(),
            state: conn.state,
            attempt: conn.attempt,
            endpoint: conn.endpoint.clone(),
            exhausted: conn.exhausted,
        }
    }

    /// Receives channel events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.shared.events.subscribe()
    }

    /// Starts connecting and waits for the outcome of this attempt.
    ///
    /// No-op (`Ok`) while already connecting or connected. Called while reconnecting, it
    /// cancels the pending timer and tries immediately. A failed attempt schedules the
    /// next one in the background and returns the handshake error.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let generation = {
            let mut conn = self.shared.conn.lock();
            match conn.state {
                ConnectionState::Connecting | ConnectionState::Connected => return Ok(()),
                ConnectionState::Reconnecting => conn.cancel_timer(),
                ConnectionState::Disconnected => {
                    conn.attempt = 0;
                    conn.exhausted = false;
                }
            }
            conn.state = ConnectionState::Connecting;
            conn.generation += 1;
            conn.generation
        };
        // The attempt runs on its own task and settles the state even if this caller is dropped.
        match tokio::spawn(Shared::attempt(self.shared.clone(), generation)).await {
            Ok(res) => res,
            Err(join) => {
                let endpoint = self.shared.conn.lock().endpoint.clone().unwrap_or_default();
                let reason = format!("connect attempt aborted: {join}");
                Shared::on_lost(&self.shared, generation, Some(&endpoint), reason.clone());
                Err(ConnectionError::Handshake {
                    endpoint,
                    error: reason,
                })
            }
        }
    }

    /// Sends one frame. Fails unless connected.
    pub async fn send(&self, data: Vec<u8>) -> Result<(), ConnectionError> {
        let outbound = {
            let conn = self.shared.conn.lock();
            match (&conn.state, &conn.outbound) {
                (ConnectionState::Connected, Some(tx)) => tx.clone(),
                _ => {
                    return Err(ConnectionError::NotConnected {
                        channel: self.shared.channel.clone(),
                    });
                }
            }
        };
        outbound
            .send(data)
            .await
            .map_err(|_| ConnectionError::SendFailed {
                channel: self.shared.channel.clone(),
            })
    }

    /// Closes the channel, cancels any pending reconnect and resets the attempt counter.
    pub fn disconnect(&self) {
        let was = {
            let mut conn = self.shared.conn.lock();
            let was = conn.state;
            conn.generation += 1;
            conn.detach();
            conn.cancel_timer();
            conn.state = ConnectionState::Disconnected;
            conn.attempt = 0;
            conn.exhausted = false;
            was
        };
        if was != ConnectionState::Disconnected {
            info!(channel = %self.shared.channel, "connection closed");
            let _ = self.shared.events.send(ChannelEvent::Close {
                reason: "closed by client".to_string(),
            });
            self.shared
                .publish(Event::new(EventKind::ConnectionClosed).with_subject(self.shared.channel.as_str()));
        }
    }
}

impl Shared {
    fn publish(&self, ev: Event) {
        if let Some(bus) = self.bus.get() {
            bus.publish(ev);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.conn.lock().generation == generation
    }

    /// One connect attempt for `generation`.
    fn attempt(self: Arc<Self>, generation: u64) -> BoxFuture<'static, Result<(), ConnectionError>> {
        async move {
            let Some(endpoint) = self.endpoints.next_endpoint(&self.channel) else {
                let err = ConnectionError::NoEndpoint {
                    channel: self.channel.clone(),
                };
                Shared::on_lost(&self, generation, None, err.to_string());
                return Err(err);
            };

            {
                let mut conn = self.conn.lock();
                if conn.generation != generation {
                    return Err(superseded(&self.channel));
                }
                conn.endpoint = Some(endpoint.clone());
            }
            debug!(channel = %self.channel, %endpoint, "connecting");

            let handshake = self.connector.connect(&endpoint);
            let res = match self.handshake_timeout {
                Some(timeout) => time::timeout(timeout, handshake).await.unwrap_or_else(|_| {
                    Err(ConnectionError::HandshakeTimeout {
                        endpoint: endpoint.clone(),
                        timeout,
                    })
                }),
                None => handshake.await,
            };

            match res {
                Ok(link) => Shared::on_open(&self, generation, endpoint, link),
                Err(err) => {
                    Shared::on_lost(&self, generation, Some(&endpoint), err.to_string());
                    Err(err)
                }
            }
        }
        .boxed()
    }

    fn on_open(
        this: &Arc<Self>,
        generation: u64,
        endpoint: String,
        link: Link,
    ) -> Result<(), ConnectionError> {
        let Link { outbound, inbound } = link;
        let reader = CancellationToken::new();
        {
            let mut conn = this.conn.lock();
            if conn.generation != generation {
                return Err(superseded(&this.channel));
            }
            conn.detach();
            conn.state = ConnectionState::Connected;
            conn.attempt = 0;
            conn.exhausted = false;
            conn.outbound = Some(outbound);
            conn.reader = Some(reader.clone());
        }

        info!(channel = %this.channel, %endpoint, "connection opened");
        let _ = this.events.send(ChannelEvent::Open {
            endpoint: endpoint.clone(),
        });
        this.publish(
            Event::new(EventKind::ConnectionOpened)
                .with_subject(this.channel.as_str())
                .with_endpoint(endpoint.as_str()),
        );

        tokio::spawn(Shared::read(this.clone(), generation, endpoint, inbound, reader));
        Ok(())
    }

    async fn read(
        this: Arc<Self>,
        generation: u64,
        endpoint: String,
        mut inbound: mpsc::Receiver<Vec<u8>>,
        token: CancellationToken,
    ) {
        loop {
            select! {
                _ = token.cancelled() => return,
                frame = inbound.recv() => match frame {
                    Some(data) => {
                        let _ = this.events.send(ChannelEvent::Message(data));
                    }
                    None => {
                        Shared::on_lost(&this, generation, Some(&endpoint), "transport closed".to_string());
                        return;
                    }
                }
            }
        }
    }

    /// Unexpected close or failed attempt: schedule the next attempt or give up.
    fn on_lost(this: &Arc<Self>, generation: u64, endpoint: Option<&str>, reason: String) {
        enum Next {
            Retry { attempt: u32, delay: time::Duration, timer: CancellationToken },
            Exhausted { attempts: u32 },
        }

        let next = {
            let mut conn = this.conn.lock();
            if conn.generation != generation {
                debug!(channel = %this.channel, "ignoring close of superseded transport");
                return;
            }
            conn.detach();
            if conn.attempt < this.max_attempts {
                let delay = this.backoff.next(conn.attempt);
                conn.attempt += 1;
                conn.state = ConnectionState::Reconnecting;
                conn.cancel_timer();
                let timer = CancellationToken::new();
                conn.timer = Some(timer.clone());
                Next::Retry {
                    attempt: conn.attempt,
                    delay,
                    timer,
                }
            } else {
                conn.state = ConnectionState::Disconnected;
                conn.exhausted = true;
                Next::Exhausted {
                    attempts: conn.attempt,
                }
            }
        };

        warn!(channel = %this.channel, endpoint, %reason, "connection lost");
        let _ = this.events.send(ChannelEvent::Close {
            reason: reason.clone(),
        });
        let mut lost = Event::new(EventKind::ConnectionLost)
            .with_subject(this.channel.as_str())
            .with_reason(reason);
        if let Some(ep) = endpoint {
            lost = lost.with_endpoint(ep);
        }
        this.publish(lost);

        match next {
            Next::Retry {
                attempt,
                delay,
                timer,
            } => {
                warn!(channel = %this.channel, attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
                this.publish(
                    Event::new(EventKind::ReconnectScheduled)
                        .with_subject(this.channel.as_str())
                        .with_attempt(attempt)
                        .with_delay(delay),
                );
                tokio::spawn(Shared::reconnect_after(this.clone(), generation, delay, timer));
            }
            Next::Exhausted { attempts } => {
                error!(channel = %this.channel, attempts, "reconnect attempts exhausted");
                let _ = this.events.send(ChannelEvent::Exhausted { attempts });
                this.publish(
                    Event::new(EventKind::ConnectionExhausted)
                        .with_subject(this.channel.as_str())
                        .with_attempt(attempts),
                );
            }
        }
    }

    async fn reconnect_after(
        this: Arc<Self>,
        generation: u64,
        delay: time::Duration,
        timer: CancellationToken,
    ) {
        select! {
            _ = timer.cancelled() => return,
            _ = time::sleep(delay) => {}
        }

        let next = {
            let mut conn = this.conn.lock();
            if conn.generation != generation || conn.state != ConnectionState::Reconnecting {
                return;
            }
            conn.timer = None;
            conn.state = ConnectionState::Connecting;
            conn.generation += 1;
            conn.generation
        };
        // failures are handled (and rescheduled) inside the attempt
        let _ = Shared::attempt(this, next).await;
    }
}

fn superseded(channel: &str) -> ConnectionError {
    ConnectionError::NotConnected {
        channel: channel.to_string(),
    }
}
