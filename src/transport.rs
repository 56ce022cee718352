//! Sensor array connection lifecycle
//!
//! [`ConnectionManager`] drives a [`SensorLink`] (the radio or a test double)
//! through `disconnected → connecting → connected`, decodes every
//! notification with [`crate::codec::decode`] and fans packets and state
//! changes out to subscribers.
//!
//! An unsolicited drop starts a reconnect loop governed by
//! [`ReconnectPolicy`]. The loop is a single spawned task; an explicit
//! [`ConnectionManager::disconnect`] or [`ConnectionManager::connect`] aborts
//! it, including a pending backoff sleep.
//!
//! State callbacks never run under the manager's internal lock. Transitions
//! are queued in the order they happen and delivered one at a time, so a
//! callback may call back into the manager.

use core::fmt;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::codec::decode;
use crate::error::TransportError;
use crate::types::{ReconnectSettings, SensorPacket};

/// A selected sensor array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
}

/// Events delivered by an open link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Raw bytes of one characteristic notification
    Notification(Vec<u8>),
    /// The device went away without being asked to
    Disconnected,
}

/// Platform radio access
///
/// `connect` returns the notification stream of the subscribed
/// characteristic. The stream ending is treated the same as
/// [`LinkEvent::Disconnected`].
pub trait SensorLink: Send + Sync + 'static {
    /// Let the user pick a device; may suspend indefinitely
    fn request_device(&self) -> impl Future<Output = Result<DeviceInfo, TransportError>> + Send;

    fn connect(
        &self,
        device: &DeviceInfo,
    ) -> impl Future<Output = Result<mpsc::Receiver<LinkEvent>, TransportError>> + Send;

    fn disconnect(&self) -> impl Future<Output = ()> + Send;
}

/// Exponential backoff with a retry cap
///
/// # Example
/// ```
/// use knee_rehab_core::ReconnectPolicy;
///
/// let mut policy = ReconnectPolicy::default();
/// let delays: Vec<u64> = std::iter::from_fn(|| policy.next_delay())
///     .map(|d| d.as_millis() as u64)
///     .collect();
///
/// assert_eq!(delays, [1000, 2000, 4000, 8000, 10000]);
/// assert!(policy.is_exhausted());
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    settings: ReconnectSettings,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(settings: ReconnectSettings) -> Self {
        Self {
            settings,
            attempt: 0,
        }
    }

    /// Backoff before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let millis = self
            .settings
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.settings.max_delay_ms);
        Duration::from_millis(millis)
    }

    /// Delay before the next retry, or `None` once the cap is reached
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.delay_for(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Retries scheduled since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.settings.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(ReconnectSettings::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Snapshot published to state subscribers
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub device_name: Option<String>,
    /// User-facing description of the last failure
    pub error: Option<String>,
    /// Reconnect attempts that have failed since the link dropped
    ///
    /// 0 while the first retry is pending or in flight; reset to 0 by a
    /// successful connection.
    pub reconnect_attempt: u32,
}

impl ConnectionState {
    fn new(status: ConnectionStatus, device_name: Option<String>) -> Self {
        Self {
            status,
            device_name,
            ..Default::default()
        }
    }

    fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    fn with_attempt(mut self, attempt: u32) -> Self {
        self.reconnect_attempt = attempt;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Handle returned by subscription calls
///
/// Dropping it leaves the callback registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[must_use = "dropping a Subscription keeps the callback registered forever"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered callback list
struct Registry<T> {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback<T>)>>,
}

impl<T: 'static> Registry<T> {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(u64, Callback<T>)>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribe(self: &Arc<Self>, callback: Callback<T>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, callback));

        let registry = Arc::downgrade(self);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.lock().retain(|(entry, _)| *entry != id);
                }
            })),
        }
    }

    /// Current callbacks in registration order
    fn snapshot(&self) -> Vec<Callback<T>> {
        self.lock().iter().map(|(_, cb)| Arc::clone(cb)).collect()
    }

    /// Call every callback in registration order
    ///
    /// The list is copied first so callbacks may subscribe or unsubscribe.
    fn notify(&self, value: &T) {
        for callback in self.snapshot() {
            callback(value);
        }
    }
}

/// One state, addressed to the subscribers present when it was queued
struct Delivery {
    callbacks: Vec<Callback<ConnectionState>>,
    state: ConnectionState,
}

#[derive(Default)]
struct DispatchQueue {
    pending: VecDeque<Delivery>,
    delivering: bool,
}

/// Serial delivery of state changes
///
/// Whoever finds the queue idle delivers until it is empty. A call made
/// while a delivery is in progress, including from inside a callback, only
/// enqueues; the active deliverer picks it up in order.
#[derive(Default)]
struct Dispatcher {
    queue: Mutex<DispatchQueue>,
}

impl Dispatcher {
    fn lock(&self) -> MutexGuard<'_, DispatchQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, delivery: Delivery) {
        self.lock().pending.push_back(delivery);
    }

    fn drain(&self) {
        {
            let mut queue = self.lock();
            if queue.delivering {
                return;
            }
            queue.delivering = true;
        }

        loop {
            let delivery = {
                let mut queue = self.lock();
                match queue.pending.pop_front() {
                    Some(delivery) => delivery,
                    None => {
                        queue.delivering = false;
                        return;
                    }
                }
            };
            for callback in &delivery.callbacks {
                callback(&delivery.state);
            }
        }
    }
}

/// Mutable connection bookkeeping
///
/// `generation` increases on every explicit connect or disconnect. Tasks
/// carry the generation they were started under and stop touching state
/// once it no longer matches.
struct Session {
    device: Option<DeviceInfo>,
    policy: ReconnectPolicy,
    reader: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    generation: u64,
}

impl Session {
    fn abort_tasks(&mut self) {
        for task in [self.reader.take(), self.reconnect.take()].into_iter().flatten() {
            task.abort();
        }
    }

    fn device_name(&self) -> Option<String> {
        self.device.as_ref().map(|d| d.name.clone())
    }
}

struct Inner<L> {
    link: L,
    state: watch::Sender<ConnectionState>,
    data_subscribers: Arc<Registry<SensorPacket>>,
    state_subscribers: Arc<Registry<ConnectionState>>,
    dispatcher: Dispatcher,
    session: Mutex<Session>,
}

impl<L: SensorLink> Inner<L> {
    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `state` and queue it for subscribers if it differs from the current one
    ///
    /// Called with the session lock held so the queue follows transition
    /// order. Nothing is delivered until [`Self::flush`].
    fn publish(&self, state: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state.clone();
                true
            }
        });

        if changed {
            match &state.error {
                Some(error) => info!("connection {:?}: {error}", state.status),
                None => info!("connection {:?}", state.status),
            }
            self.dispatcher.enqueue(Delivery {
                callbacks: self.state_subscribers.snapshot(),
                state,
            });
        }
    }

    /// Deliver queued state changes; must be called without the session lock
    fn flush(&self) {
        self.dispatcher.drain();
    }

    /// Publish only while `generation` is still current
    fn transition(&self, generation: u64, state: ConnectionState) -> bool {
        let current = {
            let session = self.lock_session();
            let current = session.generation == generation;
            if current {
                self.publish(state);
            }
            current
        };
        self.flush();
        current
    }

    /// Take over a freshly opened link
    ///
    /// Returns `false` when a disconnect or newer connect superseded the
    /// attempt that opened it; the caller then owns closing the link.
    fn start_session(self: &Arc<Self>, events: mpsc::Receiver<LinkEvent>, generation: u64) -> bool {
        {
            let mut session = self.lock_session();
            if session.generation != generation {
                return false;
            }

            session.policy.reset();
            let inner = Arc::clone(self);
            session.reader = Some(tokio::spawn(inner.read_events(events, generation)));
            let device_name = session.device_name();
            self.publish(ConnectionState::new(ConnectionStatus::Connected, device_name));
        }
        self.flush();
        true
    }

    /// Close a link whose connect was superseded, unless a newer attempt owns the radio
    async fn discard_link(&self) {
        let idle = self.state.borrow().status == ConnectionStatus::Disconnected;
        if idle {
            debug!("closing link opened by a superseded connect");
            self.link.disconnect().await;
        } else {
            debug!("dropping link opened by a superseded connect");
        }
    }

    async fn read_events(self: Arc<Self>, mut events: mpsc::Receiver<LinkEvent>, generation: u64) {
        while let Some(event) = events.recv().await {
            match event {
                LinkEvent::Notification(bytes) => match decode(&bytes) {
                    Ok(packet) => self.data_subscribers.notify(&packet),
                    Err(e) => warn!("dropping {}-byte notification: {e}", bytes.len()),
                },
                LinkEvent::Disconnected => break,
            }
        }

        self.handle_drop(generation);
    }

    fn handle_drop(self: &Arc<Self>, generation: u64) {
        let mut session = self.lock_session();
        if session.generation != generation {
            return;
        }

        warn!("sensor link dropped unexpectedly");
        session.reader = None;
        let inner = Arc::clone(self);
        session.reconnect = Some(tokio::spawn(inner.reconnect_loop(generation)));
    }

    /// Publish the wait before the next retry, or the terminal failure
    ///
    /// Returns the backoff delay, the device and the failed-retry count.
    fn schedule_retry(&self, generation: u64) -> Option<(Duration, DeviceInfo, u32)> {
        let mut session = self.lock_session();
        if session.generation != generation {
            return None;
        }

        let device_name = session.device_name();
        let Some(device) = session.device.clone() else {
            self.publish(
                ConnectionState::new(ConnectionStatus::Disconnected, None)
                    .with_error(TransportError::NoDevice),
            );
            return None;
        };

        // Every retry scheduled before this one has failed
        let failed = session.policy.attempts();
        let Some(delay) = session.policy.next_delay() else {
            let error = TransportError::ReconnectionFailed { attempts: failed };
            warn!("{error}");
            self.publish(
                ConnectionState::new(ConnectionStatus::Disconnected, device_name)
                    .with_error(error)
                    .with_attempt(failed),
            );
            return None;
        };

        debug!("reconnect attempt {} in {delay:?}", failed + 1);
        self.publish(
            ConnectionState::new(ConnectionStatus::Disconnected, device_name)
                .with_error("connection lost; reconnecting")
                .with_attempt(failed),
        );
        Some((delay, device, failed))
    }

    async fn reconnect_loop(self: Arc<Self>, generation: u64) {
        loop {
            let retry = self.schedule_retry(generation);
            self.flush();
            let Some((delay, device, failed)) = retry else {
                return;
            };

            tokio::time::sleep(delay).await;

            let connecting =
                ConnectionState::new(ConnectionStatus::Connecting, Some(device.name.clone()))
                    .with_attempt(failed);
            if !self.transition(generation, connecting) {
                return;
            }

            match self.link.connect(&device).await {
                Ok(events) => {
                    if self.start_session(events, generation) {
                        info!("reconnected to {} after {failed} failed attempts", device.name);
                    } else {
                        self.discard_link().await;
                    }
                    return;
                }
                Err(e) => warn!("reconnect attempt {} failed: {e}", failed + 1),
            }
        }
    }
}

/// Owns the link to one sensor array
///
/// Cloning yields another handle to the same connection.
pub struct ConnectionManager<L: SensorLink> {
    inner: Arc<Inner<L>>,
}

impl<L: SensorLink> Clone for ConnectionManager<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: SensorLink> ConnectionManager<L> {
    pub fn new(link: L) -> Self {
        Self::with_settings(link, ReconnectSettings::default())
    }

    pub fn with_settings(link: L, settings: ReconnectSettings) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        Self {
            inner: Arc::new(Inner {
                link,
                state,
                data_subscribers: Arc::new(Registry::new()),
                state_subscribers: Arc::new(Registry::new()),
                dispatcher: Dispatcher::default(),
                session: Mutex::new(Session {
                    device: None,
                    policy: ReconnectPolicy::new(settings),
                    reader: None,
                    reconnect: None,
                    generation: 0,
                }),
            }),
        }
    }

    /// Ask the user to pick a device and remember it for [`Self::connect`]
    pub async fn request_device(&self) -> Result<DeviceInfo, TransportError> {
        let device = self.inner.link.request_device().await?;
        info!("selected device {} ({})", device.name, device.id);
        self.inner.lock_session().device = Some(device.clone());
        Ok(device)
    }

    pub fn selected_device(&self) -> Option<DeviceInfo> {
        self.inner.lock_session().device.clone()
    }

    /// Open the link to the selected device
    ///
    /// Cancels any reconnect loop in progress and resets the backoff policy.
    /// Does nothing when already connected.
    ///
    /// # Errors
    /// - [`TransportError::NoDevice`] without a prior [`Self::request_device`]
    /// - [`TransportError::Cancelled`] when [`Self::disconnect`] or another
    ///   connect ran while the link was opening; the late link is closed
    /// - the link's own failure, which is also published as the state's error
    pub async fn connect(&self) -> Result<(), TransportError> {
        let (device, generation) = {
            let mut session = self.inner.lock_session();
            let device = session.device.clone().ok_or(TransportError::NoDevice)?;
            if self.inner.state.borrow().is_connected() {
                return Ok(());
            }

            session.abort_tasks();
            session.policy.reset();
            session.generation += 1;
            self.inner.publish(ConnectionState::new(
                ConnectionStatus::Connecting,
                Some(device.name.clone()),
            ));
            (device, session.generation)
        };
        self.inner.flush();

        match self.inner.link.connect(&device).await {
            Ok(events) => {
                if self.inner.start_session(events, generation) {
                    Ok(())
                } else {
                    self.inner.discard_link().await;
                    Err(TransportError::Cancelled)
                }
            }
            Err(e) => {
                let failed = ConnectionState::new(ConnectionStatus::Disconnected, Some(device.name))
                    .with_error(&e);
                self.inner.transition(generation, failed);
                Err(e)
            }
        }
    }

    /// Close the link and stop any pending reconnect
    ///
    /// Always leaves the state `disconnected`; calling it again is harmless.
    pub async fn disconnect(&self) {
        {
            let mut session = self.inner.lock_session();
            session.generation += 1;
            session.abort_tasks();
            session.policy.reset();
            let device_name = session.device_name();
            self.inner
                .publish(ConnectionState::new(ConnectionStatus::Disconnected, device_name));
        }
        self.inner.flush();

        self.inner.link.disconnect().await;
    }

    /// Register a callback for every decoded packet
    ///
    /// Callbacks run on the reader task in registration order and must not block.
    pub fn on_data_received<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SensorPacket) + Send + Sync + 'static,
    {
        self.inner.data_subscribers.subscribe(Arc::new(callback))
    }

    /// Register a callback for state transitions
    ///
    /// The callback first receives the current state, then every later
    /// transition in order. When no other delivery is in progress the
    /// current state is delivered before this returns. Callbacks may call
    /// back into the manager.
    pub fn on_state_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        let callback: Callback<ConnectionState> = Arc::new(callback);
        let subscription = {
            // Holding the session lock keeps transitions out between the
            // registration and the snapshot
            let _session = self.inner.lock_session();
            let subscription = self.inner.state_subscribers.subscribe(Arc::clone(&callback));
            self.inner.dispatcher.enqueue(Delivery {
                callbacks: vec![callback],
                state: self.connection_state(),
            });
            subscription
        };
        self.inner.flush();
        subscription
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    /// Channel view of the connection state, always holding the latest value
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }
}
