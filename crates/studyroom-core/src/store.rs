//! Ownership of live engines and connection presence.
//!
//! [`UserStore`] holds one [`UserHandle`] per user id. A handle serialises
//! every mutation of its session behind an async mutex and fans events out
//! on its own broadcast channel, so per-user ordering is emission order.
//! [`ConnectionTable`] maps transport connections to user ids and is kept
//! apart from the engines.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{broadcast, Mutex, MutexGuard, RwLock};

use crate::events::{Event, UserId};
use crate::scheduler::TickRegistration;
use crate::session::UserSession;

/// Transport connection id.
pub type ConnId = String;

/// Everything guarded by a user's lock.
#[derive(Debug)]
pub struct UserSlot {
    pub session: UserSession,
    /// Present while the engine is running.
    pub ticker: Option<TickRegistration>,
    generation: u64,
}

impl UserSlot {
    fn new(session: UserSession) -> Self {
        Self {
            session,
            ticker: None,
            generation: 0,
        }
    }

    /// Generation number for the next tick registration.
    pub fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Stop and forget the current ticker, if any.
    pub fn cancel_ticker(&mut self) -> bool {
        match self.ticker.take() {
            Some(ticker) => {
                ticker.cancel();
                true
            }
            None => false,
        }
    }
}

pub struct UserHandle {
    user_id: UserId,
    slot: Mutex<UserSlot>,
    events: broadcast::Sender<Event>,
    all_events: broadcast::Sender<Event>,
}

impl UserHandle {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub async fn lock(&self) -> MutexGuard<'_, UserSlot> {
        self.slot.lock().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Publish to this user's subscribers and the store-wide feed. Call
    /// while holding the slot lock to keep emission order.
    pub fn emit(&self, event: Event) {
        tracing::trace!(user = %self.user_id, event = event.name(), "emit");
        // No receivers is fine; events are fire-and-forget.
        let _ = self.all_events.send(event.clone());
        let _ = self.events.send(event);
    }
}

/// All live engines, keyed by user id.
pub struct UserStore {
    users: RwLock<HashMap<UserId, Arc<UserHandle>>>,
    capacity: usize,
    all_events: broadcast::Sender<Event>,
}

impl UserStore {
    pub fn new(channel_capacity: usize) -> Self {
        let capacity = channel_capacity.max(1);
        let (all_events, _) = broadcast::channel(capacity);
        Self {
            users: RwLock::new(HashMap::new()),
            capacity,
            all_events,
        }
    }

    fn handle_for(&self, session: UserSession) -> Arc<UserHandle> {
        let (events, _) = broadcast::channel(self.capacity);
        Arc::new(UserHandle {
            user_id: session.user_id().to_string(),
            slot: Mutex::new(UserSlot::new(session)),
            events,
            all_events: self.all_events.clone(),
        })
    }

    pub async fn get(&self, user_id: &str) -> Option<Arc<UserHandle>> {
        self.users.read().await.get(user_id).cloned()
    }

    /// Existing handle, or a new one built from `make`. The flag reports
    /// whether the user was created.
    pub async fn get_or_insert_with<F>(&self, user_id: &str, make: F) -> (Arc<UserHandle>, bool)
    where
        F: FnOnce() -> UserSession,
    {
        if let Some(handle) = self.get(user_id).await {
            return (handle, false);
        }
        let mut users = self.users.write().await;
        if let Some(handle) = users.get(user_id) {
            return (Arc::clone(handle), false);
        }
        let handle = self.handle_for(make());
        users.insert(user_id.to_string(), Arc::clone(&handle));
        (handle, true)
    }

    /// Insert or replace a session. Used when restoring snapshots.
    pub async fn insert(&self, session: UserSession) -> Arc<UserHandle> {
        let handle = self.handle_for(session);
        self.users
            .write()
            .await
            .insert(handle.user_id.clone(), Arc::clone(&handle));
        handle
    }

    /// Whether `handle` is still the one registered for its user. A handle
    /// fetched before a purge stays usable but is no longer reachable.
    pub async fn is_current(&self, handle: &Arc<UserHandle>) -> bool {
        self.users
            .read()
            .await
            .get(handle.user_id())
            .is_some_and(|current| Arc::ptr_eq(current, handle))
    }

    pub async fn remove(&self, user_id: &str) -> Option<Arc<UserHandle>> {
        self.users.write().await.remove(user_id)
    }

    /// Snapshot of the current handles; the map lock is not held afterwards.
    pub async fn handles(&self) -> Vec<Arc<UserHandle>> {
        self.users.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }

    /// Feed of every user's events.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.all_events.subscribe()
    }

    /// Drop offline, idle users whose last activity is older than
    /// `inactive_days`. Returns the removed ids.
    pub async fn purge_inactive(&self, now: DateTime<Utc>, inactive_days: i64) -> Vec<UserId> {
        let cutoff = now - Duration::days(inactive_days.max(0));
        let mut removed = Vec::new();
        for handle in self.handles().await {
            let slot = handle.lock().await;
            let session = &slot.session;
            if session.is_online() || session.is_active() || session.last_activity() >= cutoff {
                continue;
            }
            // Removed under the slot lock; anyone queued on it must check
            // `is_current` once they get in.
            self.users.write().await.remove(handle.user_id());
            removed.push(handle.user_id.clone());
        }
        removed
    }
}

/// Connection id to user id. A user is online while any connection maps
/// to them.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    conns: StdMutex<HashMap<ConnId, UserId>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn conns(&self) -> std::sync::MutexGuard<'_, HashMap<ConnId, UserId>> {
        self.conns.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Bind `conn` to `user_id`, returning the user it was bound to before.
    pub fn insert(&self, conn: impl Into<ConnId>, user_id: impl Into<UserId>) -> Option<UserId> {
        self.conns().insert(conn.into(), user_id.into())
    }

    pub fn remove(&self, conn: &str) -> Option<UserId> {
        self.conns().remove(conn)
    }

    pub fn user_for(&self, conn: &str) -> Option<UserId> {
        self.conns().get(conn).cloned()
    }

    pub fn connections_for(&self, user_id: &str) -> usize {
        self.conns().values().filter(|u| *u == user_id).count()
    }

    pub fn len(&self) -> usize {
        self.conns().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns().is_empty()
    }
}
