//! Keyed pool of reusable authenticated sessions.
//!
//! Connection setup plus the login round trip is the expensive part of
//! talking to the server; the pool amortizes it by keeping every session
//! it ever opened and handing idle ones back out, keyed by database name.
//! A single gate serializes membership changes and Busy/Idle flips; a
//! checked-out session is exclusively owned by its holder and never
//! touched by the pool until returned.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::commands::{self, Database};
use crate::error::{ClientError, ClientResult};
use crate::session::{Session, SessionConfig};

// ============================================================================
// Pool Events
// ============================================================================

/// Observability notifications emitted around the `open` command issued
/// for freshly created sessions. Not correctness-relevant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    Opening { database: String },
    Opened { database: String },
}

/// Callback invoked synchronously for every [`PoolEvent`].
pub type EventHandler = Arc<dyn Fn(&PoolEvent) + Send + Sync>;

// ============================================================================
// Pool Internals
// ============================================================================

/// One pool entry. `busy` flips under the gate; while a session is
/// checked out the slot keeps its key and id but holds no session.
struct Slot {
    id: u64,
    database: String,
    busy: bool,
    session: Option<Session>,
}

struct PoolInner {
    config: SessionConfig,
    /// `None` once the pool has been shut down.
    slots: Mutex<Option<Vec<Slot>>>,
    next_slot_id: AtomicU64,
    on_event: Option<EventHandler>,
}

impl PoolInner {
    /// Return a checked-out session to its slot, Busy -> Idle. After
    /// shutdown the slot is gone and dropping the session closes its
    /// transport.
    fn release(&self, slot_id: u64, session: Session) {
        let mut guard = self.slots.lock();
        if let Some(slots) = guard.as_mut() {
            if let Some(slot) = slots.iter_mut().find(|slot| slot.id == slot_id) {
                slot.busy = false;
                slot.session = Some(session);
            }
        }
    }

    fn unregister(&self, slot_id: u64) {
        let mut guard = self.slots.lock();
        if let Some(slots) = guard.as_mut() {
            slots.retain(|slot| slot.id != slot_id);
        }
    }
}

// ============================================================================
// Session Pool
// ============================================================================

/// A pool of reusable sessions, keyed case-insensitively by database name.
///
/// Sessions accumulate for the pool's lifetime; there is no idle eviction.
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

impl SessionPool {
    /// Create a pool. No connection is opened until the first acquire.
    pub fn new(config: SessionConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a pool with an event callback for open notifications.
    pub fn with_event_handler(config: SessionConfig, handler: EventHandler) -> Self {
        Self::build(config, Some(handler))
    }

    fn build(config: SessionConfig, on_event: Option<EventHandler>) -> Self {
        SessionPool {
            inner: Arc::new(PoolInner {
                config,
                slots: Mutex::new(Some(Vec::new())),
                next_slot_id: AtomicU64::new(0),
                on_event,
            }),
        }
    }

    /// Check out a session bound to `database` (empty = no database open).
    ///
    /// An idle session whose key matches ASCII-case-insensitively is
    /// reused without any network I/O. Otherwise a Busy slot is reserved
    /// under the gate and a new session is connected, authenticated and
    /// `open`ed outside it; on any failure the reserved slot is removed
    /// and the broken connection discarded, never pooled.
    pub async fn acquire(&self, database: &str) -> ClientResult<DatabaseSession> {
        let slot_id = {
            let mut guard = self.inner.slots.lock();
            let slots = guard.as_mut().ok_or(ClientError::PoolClosed)?;

            let mut reused = None;
            if let Some(slot) = slots
                .iter_mut()
                .find(|slot| !slot.busy && slot.database.eq_ignore_ascii_case(database))
            {
                if let Some(session) = slot.session.take() {
                    slot.busy = true;
                    reused = Some((slot.id, slot.database.clone(), session));
                }
            }
            if let Some((id, name, session)) = reused {
                debug!(database = %name, slot = id, "reusing idle session");
                return Ok(DatabaseSession::checked_out(
                    session,
                    id,
                    name,
                    Arc::clone(&self.inner),
                ));
            }

            let id = self.inner.next_slot_id.fetch_add(1, Ordering::Relaxed);
            slots.push(Slot {
                id,
                database: database.to_string(),
                busy: true,
                session: None,
            });
            id
        };

        match self.open_session(database).await {
            Ok(session) => {
                debug!(database, slot = slot_id, "created session");
                Ok(DatabaseSession::checked_out(
                    session,
                    slot_id,
                    database.to_string(),
                    Arc::clone(&self.inner),
                ))
            }
            Err(err) => {
                self.inner.unregister(slot_id);
                Err(err)
            }
        }
    }

    async fn open_session(&self, database: &str) -> ClientResult<Session> {
        let mut session = Session::connect(&self.inner.config).await?;
        if !database.is_empty() {
            self.emit(PoolEvent::Opening {
                database: database.to_string(),
            });
            if let Err(err) = session.open_database(database).await {
                // The session never reached its caller; discard it here
                // instead of pooling a connection with the wrong state.
                let _ = session.close().await;
                return Err(err);
            }
            self.emit(PoolEvent::Opened {
                database: database.to_string(),
            });
        }
        Ok(session)
    }

    /// Run `list` on a databaseless session and parse the reply.
    pub async fn databases(&self) -> ClientResult<Vec<Database>> {
        let mut session = self.acquire("").await?;
        let listing = session.execute("list").await?;
        Ok(commands::parse_database_list(&listing))
    }

    /// Shut the pool down: send `exit` to every idle session and discard
    /// the collection. Later acquires fail with [`ClientError::PoolClosed`];
    /// a second close is a no-op. Checked-out sessions are dropped when
    /// their guards return.
    pub async fn close(&self) {
        let slots = self.inner.slots.lock().take();
        let Some(slots) = slots else {
            return;
        };
        debug!(sessions = slots.len(), "closing session pool");
        for slot in slots {
            if let Some(session) = slot.session {
                // Exit is fire-and-forget; a dead peer must not abort
                // the rest of the shutdown.
                let _ = session.close().await;
            }
        }
    }

    /// Number of sessions the pool currently tracks, busy or idle.
    pub fn total_sessions(&self) -> usize {
        self.inner.slots.lock().as_ref().map_or(0, Vec::len)
    }

    /// Number of idle sessions ready for reuse.
    pub fn idle_sessions(&self) -> usize {
        self.inner
            .slots
            .lock()
            .as_ref()
            .map_or(0, |slots| slots.iter().filter(|slot| !slot.busy).count())
    }

    fn emit(&self, event: PoolEvent) {
        if let Some(handler) = &self.inner.on_event {
            handler(&event);
        }
    }
}

// ============================================================================
// Database-bound Session
// ============================================================================

/// A session checked out from the pool, fixed to one database name.
///
/// Dropping the guard returns the session to the pool on every exit path;
/// the connection itself is never closed by a release.
pub struct DatabaseSession {
    session: Option<Session>,
    database: String,
    slot: u64,
    pool: Arc<PoolInner>,
}

impl std::fmt::Debug for DatabaseSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSession")
            .field("database", &self.database)
            .field("slot", &self.slot)
            .field("checked_out", &self.session.is_some())
            .finish()
    }
}

impl DatabaseSession {
    fn checked_out(session: Session, slot: u64, database: String, pool: Arc<PoolInner>) -> Self {
        DatabaseSession {
            session: Some(session),
            database,
            slot,
            pool,
        }
    }

    /// The database name this session was acquired for.
    pub fn database(&self) -> &str {
        &self.database
    }

    pub async fn execute(&mut self, command: &str) -> ClientResult<String> {
        self.session_mut()?.execute(command).await
    }

    pub async fn send_payload(&mut self, payload: &[u8]) -> ClientResult<()> {
        self.session_mut()?.send_payload(payload).await
    }

    pub async fn set_bindings(&mut self, vars: &[(&str, &str)]) -> ClientResult<String> {
        self.session_mut()?.set_bindings(vars).await
    }

    pub async fn query(&mut self, query: &str) -> ClientResult<String> {
        self.session_mut()?.query(query).await
    }

    pub async fn query_with_bindings(
        &mut self,
        query: &str,
        vars: &[(&str, &str)],
    ) -> ClientResult<String> {
        self.session_mut()?.query_with_bindings(query, vars).await
    }

    /// Info string from the most recent command.
    pub fn info(&self) -> &str {
        self.session.as_ref().map_or("", Session::info)
    }

    pub fn tag(&self) -> Option<&str> {
        self.session.as_ref().and_then(Session::tag)
    }

    pub fn set_tag(&mut self, tag: Option<String>) {
        if let Some(session) = self.session.as_mut() {
            session.set_tag(tag);
        }
    }

    fn session_mut(&mut self) -> ClientResult<&mut Session> {
        self.session.as_mut().ok_or(ClientError::ConnectionClosed)
    }
}

impl Drop for DatabaseSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(self.slot, session);
        }
    }
}
