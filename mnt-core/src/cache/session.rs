use super::schema;
use super::store_err;
use crate::error::CacheError;
use crate::lock::{LockRegistryRef, ReentrantTrackedLock};
use rusqlite::{Connection, Params, Row};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct SessionState {
    active: bool,
    depth: usize,
    // Bumped by every open(), so cursors that outlive a close() can be told apart
    generation: u64,
    db_path: Option<PathBuf>,
    conn: Option<Connection>,
}

/// Leased access to the wallet cache database.
///
/// All access is serialized by one [`ReentrantTrackedLock`]: a thread holding a cursor excludes
/// every other thread until its outermost cursor is released, while nested cursors on the same
/// thread share one connection. The connection exists only while at least one cursor is out.
///
/// The connection always runs inside an explicit transaction, started when the connection is
/// opened and restarted by [`Self::commit`] and [`Self::rollback`]. Work not committed when the
/// outermost cursor is released is rolled back.
pub struct CacheSession {
    lock: ReentrantTrackedLock,
    state: Mutex<SessionState>,
}

pub type CacheSessionRef = Arc<CacheSession>;

impl CacheSession {
    pub fn new(registry: &LockRegistryRef) -> Self {
        Self {
            lock: ReentrantTrackedLock::new(registry, "wallet-cache"),
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn lock(&self) -> &ReentrantTrackedLock {
        &self.lock
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().unwrap().active
    }

    pub fn depth(&self) -> usize {
        self.state.lock().unwrap().depth
    }

    pub fn db_path(&self) -> Option<PathBuf> {
        self.state.lock().unwrap().db_path.clone()
    }

    /// Open the cache at `location` and bring its schema up to date.
    #[track_caller]
    pub fn open(&self, location: &Path) -> Result<(), CacheError> {
        if self.is_active() {
            error!("Cache session is already active, open({}) rejected", location.display());
            return Err(CacheError::AlreadyActive);
        }

        let _guard = self.lock.lock();
        if self.is_active() {
            error!("Cache session is already active, open({}) rejected", location.display());
            return Err(CacheError::AlreadyActive);
        }
        if location.as_os_str().is_empty() {
            error!("Cannot open cache session: empty location");
            return Err(CacheError::EmptyLocation);
        }

        info!("Opening wallet cache at {}", location.display());
        let conn = Connection::open(location).map_err(|e| {
            store_err(
                &format!("Failed to open wallet cache at {}", location.display()),
                e,
            )
        })?;
        schema::migrate(&conn)?;

        // The bootstrap connection is not kept, cursors open their own
        conn.close()
            .map_err(|(_, e)| store_err("Failed to close bootstrap connection", e))?;

        let mut state = self.state.lock().unwrap();
        state.db_path = Some(location.to_path_buf());
        state.conn = None;
        state.depth = 0;
        state.generation += 1;
        state.active = true;

        Ok(())
    }

    /// Take a lease on the cache. Blocks while another thread holds one.
    #[track_caller]
    pub fn get_cursor(&self) -> Result<CacheCursor<'_>, CacheError> {
        if !self.is_active() {
            error!("get_cursor called on an inactive cache session");
            return Err(CacheError::NotActive);
        }

        self.lock.acquire();

        match self.enter() {
            Ok(generation) => Ok(CacheCursor {
                session: self,
                generation,
                released: false,
                _not_send: PhantomData,
            }),
            Err(e) => {
                self.lock.release()?;
                Err(e)
            }
        }
    }

    // Called with the lock held.
    fn enter(&self) -> Result<u64, CacheError> {
        let mut state = self.state.lock().unwrap();
        if !state.active {
            error!("Cache session was closed while waiting for a cursor");
            return Err(CacheError::NotActive);
        }

        if state.depth == 0 {
            let path = state.db_path.clone().ok_or(CacheError::NotActive)?;
            let conn = Connection::open(&path).map_err(|e| {
                store_err(
                    &format!("Failed to open wallet cache at {}", path.display()),
                    e,
                )
            })?;
            conn.execute_batch("BEGIN")
                .map_err(|e| store_err("Failed to begin cache transaction", e))?;
            state.conn = Some(conn);
            debug!("Opened wallet cache connection");
        }

        state.depth += 1;
        trace!("Cache cursor acquired, depth {}", state.depth);

        Ok(state.generation)
    }

    /// Give back one lease. Closes the connection when the outermost lease is returned.
    pub fn release_cursor(&self) -> Result<(), CacheError> {
        self.release_lease(None)
    }

    // Checks and the depth update happen under one hold of the state mutex, so a concurrent
    // close() either sees the lease or finds it already returned.
    fn release_lease(&self, generation: Option<u64>) -> Result<(), CacheError> {
        let step = {
            let mut state = self.state.lock().unwrap();
            let holder = self.lock.is_held_by_current_thread();
            let stale = generation.is_some_and(|g| !state.active || state.generation != g);

            if stale {
                LeaseRelease::Stale
            } else if !state.active {
                error!("release_cursor called on an inactive cache session");
                if holder {
                    // The lease was dropped by close(), only the lock hold is left
                    self.lock.release()?;
                }
                return Err(CacheError::NotActive);
            } else if !holder {
                if state.depth == 0 {
                    error!("release_cursor called but no cursor is acquired");
                    return Err(CacheError::CursorNotAcquired);
                }
                LeaseRelease::NotOwner
            } else {
                let Some(depth) = state.depth.checked_sub(1) else {
                    error!("release_cursor called but no cursor is acquired");
                    return Err(CacheError::CursorNotAcquired);
                };
                state.depth = depth;
                trace!("Cache cursor released, depth {}", depth);

                if depth == 0 {
                    LeaseRelease::Last(state.conn.take())
                } else {
                    LeaseRelease::Nested
                }
            }
        };

        match step {
            LeaseRelease::Stale => {
                warn!("Releasing a cursor that outlived its cache session");
                self.lock.release()?;
                Ok(())
            }
            LeaseRelease::NotOwner => {
                // Goes through release() so the ownership error is reported with its holder
                match self.lock.release() {
                    Err(e) => Err(CacheError::Lock(e)),
                    Ok(()) => Err(CacheError::CursorNotAcquired),
                }
            }
            LeaseRelease::Nested => {
                self.lock.release()?;
                Ok(())
            }
            LeaseRelease::Last(conn) => {
                // Still holding the lock, nobody else can open a connection meanwhile
                let result = match conn {
                    Some(conn) => close_connection(conn).map(|()| {
                        debug!("Closed wallet cache connection");
                    }),
                    None => Ok(()),
                };
                self.lock.release()?;
                result
            }
        }
    }

    #[track_caller]
    pub fn commit(&self) -> Result<(), CacheError> {
        self.finish_transaction("commit", "COMMIT")
    }

    #[track_caller]
    pub fn rollback(&self) -> Result<(), CacheError> {
        self.finish_transaction("rollback", "ROLLBACK")
    }

    #[track_caller]
    fn finish_transaction(&self, op: &'static str, sql: &str) -> Result<(), CacheError> {
        if !self.is_active() {
            error!("{} called on an inactive cache session", op);
            return Err(CacheError::NotActive);
        }

        let _guard = self.lock.lock();
        let state = self.state.lock().unwrap();
        let conn = match (&state.conn, state.depth) {
            (Some(conn), depth) if depth > 0 => conn,
            _ => {
                error!("Cannot {} without an acquired cursor", op);
                return Err(CacheError::NoCursor(op));
            }
        };

        if !conn.is_autocommit() {
            conn.execute_batch(sql)
                .map_err(|e| store_err(&format!("Failed to {} cache transaction", op), e))?;
        }
        conn.execute_batch("BEGIN")
            .map_err(|e| store_err("Failed to begin cache transaction", e))?;

        Ok(())
    }

    /// Mark the session inactive. Returns the number of leases still outstanding, which is
    /// logged as an error since it means a caller did not release its cursor.
    pub fn close(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let outstanding = state.depth;
        if outstanding > 0 {
            error!(
                "Closing wallet cache session with {} outstanding cursor(s)",
                outstanding
            );
        }

        if state.active {
            info!("Closing wallet cache session");
        }
        state.active = false;
        state.depth = 0;
        if let Some(conn) = state.conn.take() {
            if let Err(e) = close_connection(conn) {
                error!("Failed to close wallet cache connection: {}", e);
            }
        }

        outstanding
    }

    // Drop path of a cursor. A cursor from before the last close() no longer counts towards
    // the depth, it only gives back its hold on the lock.
    fn release_from_cursor(&self, generation: u64) -> Result<(), CacheError> {
        self.release_lease(Some(generation))
    }

    fn with_connection<R>(
        &self,
        generation: u64,
        f: impl FnOnce(&Connection) -> Result<R, CacheError>,
    ) -> Result<R, CacheError> {
        let state = self.state.lock().unwrap();
        if !state.active || state.generation != generation {
            error!("Cursor used after its cache session was closed");
            return Err(CacheError::NotActive);
        }

        match &state.conn {
            Some(conn) => f(conn),
            None => Err(CacheError::CursorNotAcquired),
        }
    }
}

impl Drop for CacheSession {
    fn drop(&mut self) {
        self.close();
    }
}

enum LeaseRelease {
    Stale,
    NotOwner,
    Nested,
    Last(Option<Connection>),
}

fn close_connection(conn: Connection) -> Result<(), CacheError> {
    if !conn.is_autocommit() {
        conn.execute_batch("ROLLBACK")
            .map_err(|e| store_err("Failed to roll back uncommitted cache changes", e))?;
    }
    conn.close()
        .map_err(|(_, e)| store_err("Failed to close wallet cache connection", e))
}

/// One lease on a [`CacheSession`], released when dropped. Stays on the thread that took it.
pub struct CacheCursor<'a> {
    session: &'a CacheSession,
    generation: u64,
    released: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a> CacheCursor<'a> {
    pub fn session(&self) -> &'a CacheSession {
        self.session
    }

    /// Run `f` against the leased connection.
    ///
    /// `f` must not call back into the session or another cursor.
    pub fn with_connection<R>(
        &self,
        f: impl FnOnce(&Connection) -> Result<R, CacheError>,
    ) -> Result<R, CacheError> {
        self.session.with_connection(self.generation, f)
    }

    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize, CacheError> {
        self.with_connection(|conn| {
            conn.execute(sql, params)
                .map_err(|e| store_err("Failed to execute cache statement", e))
        })
    }

    /// First row of a query, `None` when there is no row.
    pub fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Option<T>, CacheError>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| store_err("Failed to prepare cache query", e))?;
            let mut rows = stmt
                .query(params)
                .map_err(|e| store_err("Failed to run cache query", e))?;
            match rows
                .next()
                .map_err(|e| store_err("Failed to fetch cache row", e))?
            {
                Some(row) => f(row)
                    .map(Some)
                    .map_err(|e| store_err("Failed to read cache row", e)),
                None => Ok(None),
            }
        })
    }

    pub fn query_map<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Vec<T>, CacheError>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| store_err("Failed to prepare cache query", e))?;
            let rows = stmt
                .query_map(params, f)
                .map_err(|e| store_err("Failed to run cache query", e))?;
            rows.collect::<Result<Vec<T>, _>>()
                .map_err(|e| store_err("Failed to read cache row", e))
        })
    }

    pub fn last_insert_rowid(&self) -> Result<i64, CacheError> {
        self.with_connection(|conn| Ok(conn.last_insert_rowid()))
    }

    pub fn commit(&self) -> Result<(), CacheError> {
        self.session.commit()
    }

    pub fn rollback(&self) -> Result<(), CacheError> {
        self.session.rollback()
    }

    /// Release explicitly, reporting failures instead of only logging them.
    pub fn release(mut self) -> Result<(), CacheError> {
        self.released = true;
        self.session.release_from_cursor(self.generation)
    }
}

impl Drop for CacheCursor<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.session.release_from_cursor(self.generation) {
            error!("Failed to release cache cursor: {}", e);
        }
    }
}
