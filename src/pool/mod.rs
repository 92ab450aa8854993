//! Bounded pool of command channels over one transport connection.
//!
//! Slots are permits in a bounded crossbeam channel. Acquiring takes a permit
//! and opens a fresh channel; releasing closes the channel and puts the permit
//! back. Closing the pool drops the shutdown sender, which wakes every thread
//! blocked in [`SessionPool::acquire`].

use crate::ssh::channel::{ExecChannel, Transport};
use crate::utils::error::RemoteError;
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// OpenSSH's `MaxSessions` defaults to 10; stay one below it.
pub const DEFAULT_MAX_SESSIONS: usize = 9;

pub struct SessionPool<T: Transport> {
    transport: T,
    capacity: usize,
    permits: Sender<()>,
    available: Receiver<()>,
    shutdown: Mutex<Option<Sender<()>>>,
    shutdown_signal: Receiver<()>,
    closed: AtomicBool,
}

impl<T: Transport> SessionPool<T> {
    pub fn new(transport: T, capacity: usize) -> Self {
        assert!(capacity > 0, "session pool needs at least one slot");

        let (permits, available) = bounded(capacity);
        for _ in 0..capacity {
            if permits.try_send(()).is_err() {
                break;
            }
        }
        let (shutdown, shutdown_signal) = bounded(0);

        SessionPool {
            transport,
            capacity,
            permits,
            available,
            shutdown: Mutex::new(Some(shutdown)),
            shutdown_signal,
            closed: AtomicBool::new(false),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.available.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Blocks until a slot frees up, then opens a channel on it.
    pub fn acquire(&self) -> Result<Lease<'_, T>, RemoteError> {
        if self.is_closed() {
            return Err(RemoteError::PoolClosed);
        }

        select! {
            recv(self.available) -> permit => {
                if permit.is_err() {
                    return Err(RemoteError::PoolClosed);
                }
            }
            recv(self.shutdown_signal) -> _ => return Err(RemoteError::PoolClosed),
        }

        // Lost the race against close() while waiting.
        if self.is_closed() {
            self.return_permit();
            return Err(RemoteError::PoolClosed);
        }

        match self.transport.open_channel() {
            Ok(channel) => Ok(Lease {
                pool: self,
                channel: Some(channel),
                holds_permit: true,
            }),
            Err(e) => {
                self.return_permit();
                Err(RemoteError::Channel(e))
            }
        }
    }

    /// Stops granting leases. Outstanding leases keep working and release
    /// normally.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let sender = match self.shutdown.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);

        log::debug!("Session pool closed");
        true
    }

    fn return_permit(&self) {
        match self.permits.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => {
                log::warn!("Session pool received more releases than leases");
            }
            Err(TrySendError::Disconnected(())) => {}
        }
    }
}

/// A leased channel. Dropping it closes the channel and frees the slot.
pub struct Lease<'a, T: Transport> {
    pool: &'a SessionPool<T>,
    channel: Option<T::Channel>,
    holds_permit: bool,
}

impl<'a, T: Transport> Lease<'a, T> {
    /// Closes the channel and frees the slot, reporting a failed close.
    /// The slot is freed either way.
    pub fn release(mut self) -> std::io::Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> std::io::Result<()> {
        let closed = match self.channel.take() {
            Some(mut channel) => channel.close(),
            None => Ok(()),
        };

        if self.holds_permit {
            self.holds_permit = false;
            self.pool.return_permit();
        }

        closed
    }
}

impl<'a, T: Transport> Deref for Lease<'a, T> {
    type Target = T::Channel;

    fn deref(&self) -> &T::Channel {
        self.channel
            .as_ref()
            .unwrap_or_else(|| unreachable!("lease used after release"))
    }
}

impl<'a, T: Transport> DerefMut for Lease<'a, T> {
    fn deref_mut(&mut self) -> &mut T::Channel {
        self.channel
            .as_mut()
            .unwrap_or_else(|| unreachable!("lease used after release"))
    }
}

impl<'a, T: Transport> Drop for Lease<'a, T> {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            log::warn!("Failed to close SSH channel: {}", e);
        }
    }
}
