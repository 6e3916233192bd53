use std::{
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use pki_logger::{debug, trace};

use crate::{HError, HResult, RawSession, SlotIdentifier};

struct PoolState {
    idle: Vec<Box<dyn RawSession>>,
    /// Sessions currently open, idle or borrowed, plus those being opened
    opened: usize,
}

/// A bounded pool of sessions on one slot.
///
/// At most `capacity` sessions are ever open at the same time. When all of them are borrowed,
/// callers block until one is returned or, when a wait timeout is configured, fail with
/// [`HError::SessionTimeout`].
pub struct SessionPool {
    slot: SlotIdentifier,
    capacity: usize,
    wait_timeout: Option<Duration>,
    state: Mutex<PoolState>,
    released: Condvar,
}

impl SessionPool {
    #[must_use]
    pub fn new(slot: SlotIdentifier, capacity: usize, wait_timeout: Option<Duration>) -> Self {
        Self {
            slot,
            capacity: capacity.max(1),
            wait_timeout,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                opened: 0,
            }),
            released: Condvar::new(),
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of sessions open on the slot.
    pub fn opened(&self) -> HResult<usize> {
        Ok(self.lock()?.opened)
    }

    /// Borrow an idle session, open a new one with `open` if the pool is not full, or wait
    /// for a session to be returned.
    ///
    /// # Errors
    /// * [`HError::SessionTimeout`] if no session was returned within the wait timeout
    /// * any error of `open`; the capacity it reserved is released
    pub fn acquire<F>(&self, open: F) -> HResult<PooledSession<'_>>
    where
        F: FnOnce() -> HResult<Box<dyn RawSession>>,
    {
        let started = Instant::now();
        let mut state = self.lock()?;
        loop {
            if let Some(session) = state.idle.pop() {
                trace!("reusing an idle session on slot {}", self.slot);
                return Ok(PooledSession::new(self, session));
            }
            if state.opened < self.capacity {
                state.opened += 1;
                let number = state.opened;
                drop(state);
                debug!(
                    "opening session {number} of {} on slot {}",
                    self.capacity, self.slot
                );
                return match open() {
                    Ok(session) => Ok(PooledSession::new(self, session)),
                    Err(e) => {
                        self.forget_one();
                        Err(e)
                    }
                };
            }
            state = match self.wait_timeout {
                None => self.released.wait(state).map_err(|e| {
                    HError::Default(format!("Failed to acquire lock on the session pool: {e}"))
                })?,
                Some(timeout) => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(HError::SessionTimeout {
                            slot: self.slot,
                            waited,
                        });
                    }
                    self.released
                        .wait_timeout(state, timeout - waited)
                        .map_err(|e| {
                            HError::Default(format!(
                                "Failed to acquire lock on the session pool: {e}"
                            ))
                        })?
                        .0
                }
            };
        }
    }

    fn lock(&self) -> HResult<MutexGuard<'_, PoolState>> {
        self.state.lock().map_err(|e| {
            HError::Default(format!("Failed to acquire lock on the session pool: {e}"))
        })
    }

    fn release(&self, session: Box<dyn RawSession>) {
        match self.state.lock() {
            Ok(mut state) => state.idle.push(session),
            Err(poisoned) => {
                // a poisoned pool closes the session and frees its place
                let mut state = poisoned.into_inner();
                state.opened = state.opened.saturating_sub(1);
                drop(state);
                drop(session);
            }
        }
        self.released.notify_one();
    }

    fn forget_one(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.opened = state.opened.saturating_sub(1);
        drop(state);
        self.released.notify_one();
    }
}

/// A session borrowed from a [`SessionPool`]; returned to the pool when dropped.
pub struct PooledSession<'a> {
    pool: &'a SessionPool,
    session: Option<Box<dyn RawSession>>,
}

impl<'a> PooledSession<'a> {
    fn new(pool: &'a SessionPool, session: Box<dyn RawSession>) -> Self {
        Self {
            pool,
            session: Some(session),
        }
    }

    pub fn session(&self) -> HResult<&dyn RawSession> {
        self.session
            .as_deref()
            .ok_or_else(|| HError::IllegalState("the pooled session was discarded".to_owned()))
    }

    /// Close the session instead of returning it to the pool.
    pub fn discard(mut self) {
        if self.session.take().is_some() {
            self.pool.forget_one();
        }
    }
}

impl Drop for PooledSession<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(session);
        }
    }
}
