//! Blocking client surface.
//!
//! Mirrors the async [`Session`](crate::Session) and
//! [`SessionPool`](crate::SessionPool) over `std::net` for callers without
//! an async runtime. The configured deadline maps to socket read/write
//! timeouts, surfacing as [`ClientError::Timeout`].

use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::commands::{self, Database};
use crate::error::{ClientError, ClientResult};
use crate::pool::{EventHandler, PoolEvent};
use crate::protocol::{self, FrameReader};
use crate::session::SessionConfig;

// ============================================================================
// Session
// ============================================================================

/// One authenticated connection to the server, blocking flavor.
pub struct Session {
    stream: TcpStream,
    reader: FrameReader,
    info: String,
    tag: Option<String>,
}

impl Session {
    /// Connect and authenticate.
    pub fn connect(config: &SessionConfig) -> ClientResult<Self> {
        let stream = connect_stream(config)?;
        stream
            .set_read_timeout(config.timeout)
            .map_err(ClientError::from_io)?;
        stream
            .set_write_timeout(config.timeout)
            .map_err(ClientError::from_io)?;
        stream.set_nodelay(true).map_err(ClientError::from_io)?;

        let mut session = Session {
            stream,
            reader: FrameReader::new(),
            info: String::new(),
            tag: None,
        };
        session.login(&config.username, &config.password)?;
        debug!(host = %config.host, port = config.port, "session established");
        Ok(session)
    }

    fn login(&mut self, username: &str, password: &str) -> ClientResult<()> {
        let greeting = self.receive_text()?;
        let digest = protocol::login_digest(&greeting, username, password);
        self.send(username)?;
        self.send(&digest)?;
        if self.read_status()? != 0 {
            return Err(ClientError::AccessDenied);
        }
        Ok(())
    }

    /// Execute a command and return the decoded payload.
    pub fn execute(&mut self, command: &str) -> ClientResult<String> {
        trace!(command, "execute");
        self.send(command)?;
        self.reader.reset();
        let payload = self.receive()?;
        self.info = self.receive_text()?;
        if self.read_status()? != 0 {
            return Err(ClientError::Command(self.info.clone()));
        }
        Ok(String::from_utf8_lossy(&payload).into_owned())
    }

    /// Stream an arbitrary binary payload in place of a command.
    pub fn send_payload(&mut self, payload: &[u8]) -> ClientResult<()> {
        let frame = protocol::encode_payload(payload);
        self.stream.write_all(&frame).map_err(ClientError::from_io)?;
        self.reader.reset();
        self.info = self.receive_text()?;
        if self.read_status()? != 0 {
            return Err(ClientError::Command(self.info.clone()));
        }
        Ok(())
    }

    /// Send the `exit` command without awaiting a reply and release the
    /// transport. The transport is released even when the send fails.
    pub fn close(mut self) -> ClientResult<()> {
        self.send("exit")
    }

    /// Info string from the most recent command.
    pub fn info(&self) -> &str {
        &self.info
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn set_tag(&mut self, tag: Option<String>) {
        self.tag = tag;
    }

    // ========================================================================
    // Command helpers
    // ========================================================================

    /// Open the named database on this session.
    pub fn open_database(&mut self, database: &str) -> ClientResult<()> {
        self.execute(&commands::open(database)).map(|_| ())
    }

    /// Bind external variables for the next query.
    pub fn set_bindings(&mut self, vars: &[(&str, &str)]) -> ClientResult<String> {
        self.execute(&commands::set_bindings(vars))
    }

    /// Run a query against the currently open database.
    pub fn query(&mut self, query: &str) -> ClientResult<String> {
        self.execute(&commands::xquery(query))
    }

    /// Bind external variables, then run the query.
    pub fn query_with_bindings(
        &mut self,
        query: &str,
        vars: &[(&str, &str)],
    ) -> ClientResult<String> {
        self.set_bindings(vars)?;
        self.query(query)
    }

    // ========================================================================
    // Private helpers
    // ========================================================================

    fn send(&mut self, message: &str) -> ClientResult<()> {
        let frame = protocol::encode_text(message);
        self.stream.write_all(&frame).map_err(ClientError::from_io)
    }

    fn receive(&mut self) -> ClientResult<Vec<u8>> {
        self.reader.read_frame(&mut self.stream)
    }

    fn receive_text(&mut self) -> ClientResult<String> {
        Ok(String::from_utf8_lossy(&self.receive()?).into_owned())
    }

    fn read_status(&mut self) -> ClientResult<u8> {
        self.reader.read_byte(&mut self.stream)
    }
}

fn connect_stream(config: &SessionConfig) -> ClientResult<TcpStream> {
    match config.timeout {
        None => TcpStream::connect((config.host.as_str(), config.port))
            .map_err(ClientError::from_io),
        Some(limit) => {
            let addrs: Vec<SocketAddr> = (config.host.as_str(), config.port)
                .to_socket_addrs()
                .map_err(ClientError::from_io)?
                .collect();
            let mut last: Option<io::Error> = None;
            for addr in addrs {
                match TcpStream::connect_timeout(&addr, limit) {
                    Ok(stream) => return Ok(stream),
                    Err(err) => last = Some(err),
                }
            }
            Err(match last {
                Some(err) => ClientError::from_io(err),
                None => ClientError::from_io(io::ErrorKind::AddrNotAvailable.into()),
            })
        }
    }
}

// ============================================================================
// Session Pool
// ============================================================================

/// One pool entry; see the async pool for the slot life cycle.
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

/// Blocking pool of reusable sessions, keyed case-insensitively by
/// database name. Same semantics as the async pool.
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
    pub fn acquire(&self, database: &str) -> ClientResult<DatabaseSession> {
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

        match self.open_session(database) {
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

    fn open_session(&self, database: &str) -> ClientResult<Session> {
        let mut session = Session::connect(&self.inner.config)?;
        if !database.is_empty() {
            self.emit(PoolEvent::Opening {
                database: database.to_string(),
            });
            if let Err(err) = session.open_database(database) {
                let _ = session.close();
                return Err(err);
            }
            self.emit(PoolEvent::Opened {
                database: database.to_string(),
            });
        }
        Ok(session)
    }

    /// Run `list` on a databaseless session and parse the reply.
    pub fn databases(&self) -> ClientResult<Vec<Database>> {
        let mut session = self.acquire("")?;
        let listing = session.execute("list")?;
        Ok(commands::parse_database_list(&listing))
    }

    /// Shut the pool down; see the async pool for the contract.
    pub fn close(&self) {
        let slots = self.inner.slots.lock().take();
        let Some(slots) = slots else {
            return;
        };
        debug!(sessions = slots.len(), "closing session pool");
        for slot in slots {
            if let Some(session) = slot.session {
                let _ = session.close();
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

/// A blocking session checked out from the pool, fixed to one database
/// name. Dropping the guard returns the session to the pool on every exit
/// path; the connection itself is never closed by a release.
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

    pub fn execute(&mut self, command: &str) -> ClientResult<String> {
        self.session_mut()?.execute(command)
    }

    pub fn send_payload(&mut self, payload: &[u8]) -> ClientResult<()> {
        self.session_mut()?.send_payload(payload)
    }

    pub fn set_bindings(&mut self, vars: &[(&str, &str)]) -> ClientResult<String> {
        self.session_mut()?.set_bindings(vars)
    }

    pub fn query(&mut self, query: &str) -> ClientResult<String> {
        self.session_mut()?.query(query)
    }

    pub fn query_with_bindings(
        &mut self,
        query: &str,
        vars: &[(&str, &str)],
    ) -> ClientResult<String> {
        self.session_mut()?.query_with_bindings(query, vars)
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
