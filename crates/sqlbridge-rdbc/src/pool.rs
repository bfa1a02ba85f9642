//! Connection pool for the backend drivers
//!
//! A small checkout pool: a semaphore bounds the number of live connections,
//! idle connections are reused, and a borrowed connection returns to the
//! pool on drop. `close` stops new checkouts immediately while connections
//! already borrowed drain on their own (the disconnect policy of the
//! drivers).

use async_trait::async_trait;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// Factory the pool uses to open and validate connections
#[async_trait]
pub trait ConnectionFactory<C>: Send + Sync {
    /// Open a new connection
    async fn connect(&self) -> Result<C>;

    /// Whether an idle connection is still usable
    fn is_valid(&self, _conn: &C) -> bool {
        true
    }
}

struct Shared<C> {
    factory: Box<dyn ConnectionFactory<C>>,
    idle: Mutex<Vec<C>>,
    semaphore: Arc<Semaphore>,
    closed: AtomicBool,
}

/// Bounded checkout pool
pub struct Pool<C: Send + 'static> {
    shared: Arc<Shared<C>>,
    max_size: usize,
}

impl<C: Send + 'static> Pool<C> {
    /// Create a pool holding at most `max_size` connections
    pub fn new(factory: impl ConnectionFactory<C> + 'static, max_size: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                factory: Box::new(factory),
                idle: Mutex::new(Vec::with_capacity(max_size)),
                semaphore: Arc::new(Semaphore::new(max_size)),
                closed: AtomicBool::new(false),
            }),
            max_size,
        }
    }

    /// Borrow a connection, opening one if no valid idle connection exists.
    ///
    /// Suspends when the pool is at capacity until a connection returns.
    pub async fn get(&self) -> Result<PooledConn<C>> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(Error::connection("pool is closed"));
        }

        let permit = Arc::clone(&self.shared.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::connection("pool is closed"))?;

        loop {
            let candidate = self.shared.idle.lock().pop();
            match candidate {
                Some(conn) if self.shared.factory.is_valid(&conn) => {
                    return Ok(PooledConn {
                        conn: Some(conn),
                        shared: Arc::clone(&self.shared),
                        _permit: permit,
                    });
                }
                Some(stale) => drop(stale),
                None => break,
            }
        }

        let conn = self.shared.factory.connect().await?;
        Ok(PooledConn {
            conn: Some(conn),
            shared: Arc::clone(&self.shared),
            _permit: permit,
        })
    }

    /// Stop new checkouts and drop idle connections.
    ///
    /// Borrowed connections finish their work and are dropped on return.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.semaphore.close();
        self.shared.idle.lock().clear();
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Number of idle connections
    pub fn idle(&self) -> usize {
        self.shared.idle.lock().len()
    }

    /// Configured capacity
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

impl<C: Send + 'static> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            max_size: self.max_size,
        }
    }
}

/// A connection borrowed from the pool; returns on drop
pub struct PooledConn<C: Send + 'static> {
    conn: Option<C>,
    shared: Arc<Shared<C>>,
    _permit: OwnedSemaphorePermit,
}

impl<C: Send + 'static> Deref for PooledConn<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<C: Send + 'static> DerefMut for PooledConn<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<C: Send + 'static> Drop for PooledConn<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if !self.shared.closed.load(Ordering::Acquire) {
                self.shared.idle.lock().push(conn);
            }
        }
    }
}
