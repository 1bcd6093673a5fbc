//! Keepalive session state machine.
//!
//! A session stays alive for [`ACTIVE_WINDOW`] after the last [`Session::ping`]
//! and runs a single background task: connect, then every
//! [`HEARTBEAT_INTERVAL`] read the key characteristic (which doubles as the
//! keepalive tickle the firmware requires), deliver at most one pending
//! command encrypted under the key just read, and go back to sleep. Any link
//! failure tears the connection down, reports it through the connectivity
//! callback and retries after [`RETRY_BACKOFF`] for as long as the keepalive
//! window lasts. Transport errors never reach the callers of `ping`/`send`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::sync::Notify;
use tokio::time::Instant;

use jura_proto::cipher;

/// How long a session stays alive after the last ping.
pub const ACTIVE_WINDOW: Duration = Duration::from_secs(120);
/// How long a pending command stays deliverable.
pub const COMMAND_WINDOW: Duration = Duration::from_secs(15);
/// Pause between heartbeat reads while connected.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
/// Pause before reconnecting after a link failure.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error(transparent)]
    Ble(#[from] btleplug::Error),
    #[error("characteristic {0} not found")]
    CharacteristicMissing(uuid::Uuid),
    #[error("link unavailable: {0}")]
    Unavailable(&'static str),
}

/// Transport seam between the session loop and the peripheral.
///
/// [`crate::BleLink`] implements this over a btleplug peripheral; tests
/// substitute their own.
#[async_trait]
pub trait Link: Send + Sync + 'static {
    async fn connect(&self) -> Result<(), LinkError>;
    /// Heartbeat read; byte 0 of the payload is the current cipher key.
    async fn read_key(&self) -> Result<Vec<u8>, LinkError>;
    /// Write-with-response of an already encrypted command frame.
    async fn write_command(&self, payload: &[u8]) -> Result<(), LinkError>;
    async fn disconnect(&self) -> Result<(), LinkError>;
}

struct Pending {
    data: Vec<u8>,
    expires: Instant,
}

struct State {
    deadline: Option<Instant>,
    pending: Option<Pending>,
    running: bool,
}

impl State {
    fn expired(&self) -> bool {
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => true,
        }
    }
}

struct Shared {
    link: Box<dyn Link>,
    on_connected: Box<dyn Fn(bool) + Send + Sync>,
    state: Mutex<State>,
    wake: Notify,
}

/// Connection and keepalive owner for one machine.
///
/// Cheap to clone through its inner `Arc`; all operations are callable from
/// any task. Must be used inside a tokio runtime, since `ping` spawns the
/// session loop.
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    pub fn new(link: impl Link, on_connected: impl Fn(bool) + Send + Sync + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                link: Box::new(link),
                on_connected: Box::new(on_connected),
                state: Mutex::new(State {
                    deadline: None,
                    pending: None,
                    running: false,
                }),
                wake: Notify::new(),
            }),
        }
    }

    /// Extend the keepalive window and start the session loop if none is
    /// running. Safe to call repeatedly; repeated calls only push the
    /// deadline forward.
    pub fn ping(&self) {
        let mut state = self.shared.state();
        state.deadline = Some(Instant::now() + ACTIVE_WINDOW);
        if !state.running {
            state.running = true;
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move { shared.run().await });
        }
    }

    /// Expire the keepalive window immediately and wake the loop so it
    /// observes the expiry now instead of after its current sleep. No-op
    /// when the session is idle.
    pub fn ping_cancel(&self) {
        self.shared.state().deadline = None;
        self.shared.wake.notify_one();
    }

    /// Queue a command for delivery on the next heartbeat tick. Implies
    /// [`Session::ping`]. Delivery is best effort within [`COMMAND_WINDOW`];
    /// a newer command replaces an undelivered older one.
    pub fn send(&self, command: Vec<u8>) {
        self.shared.state().pending = Some(Pending {
            data: command,
            expires: Instant::now() + COMMAND_WINDOW,
        });
        self.ping();
        self.shared.wake.notify_one();
    }

    /// Whether the session loop is currently running.
    pub fn active(&self) -> bool {
        self.shared.state().running
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(&self) {
        loop {
            // exit decision is taken under the lock so a concurrent ping
            // either extends the deadline in time or starts a fresh loop
            {
                let mut state = self.state();
                if state.expired() {
                    state.running = false;
                    return;
                }
            }

            if let Err(err) = self.connected_cycle().await {
                debug!("session link error: {err}");
            }
            let _ = self.link.disconnect().await;
            (self.on_connected)(false);
            tokio::time::sleep(RETRY_BACKOFF).await;
        }
    }

    async fn connected_cycle(&self) -> Result<(), LinkError> {
        self.link.connect().await?;
        debug!("link established");
        (self.on_connected)(true);

        while !self.state().expired() {
            let heartbeat = self.link.read_key().await?;
            let key = heartbeat
                .first()
                .copied()
                .ok_or(LinkError::Unavailable("empty heartbeat payload"))?;

            if let Some(command) = self.take_pending() {
                self.link
                    .write_command(&cipher::encrypt_command(&command, key))
                    .await?;
                debug!("command delivered under key {key:#04x}");
            }

            tokio::select! {
                _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {}
                _ = self.wake.notified() => {}
            }
        }
        Ok(())
    }

    /// Remove the pending command, returning it only while still within its
    /// delivery window. One delivery attempt per command: it is taken before
    /// the write, so a failed write drops it rather than retrying.
    fn take_pending(&self) -> Option<Vec<u8>> {
        let pending = self.state().pending.take()?;
        (Instant::now() < pending.expires).then_some(pending.data)
    }
}
