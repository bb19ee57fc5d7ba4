//! Per-call, append-only context carried through a middleware chain.
//!
//! A [`CallContext`] is never mutated: every write derives a new value that
//! shares its ancestors' entries. A stage therefore sees everything written by
//! the stages that wrapped it, and nothing written by the stages it wraps or
//! by sibling calls.
//!
//! Entries are keyed by type, so lookups are checked at compile time and a
//! missing entry is an `Option::None`, not a failed runtime cast.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::auth::{BearerToken, Claims};
use crate::error::Failure;

struct Entry {
    value: Box<dyn Any + Send + Sync>,
    parent: Option<Arc<Entry>>,
}

/// Immutable, append-only key/value environment for one call.
#[derive(Clone, Default)]
pub struct CallContext {
    head: Option<Arc<Entry>>,
    deadline: Option<Instant>,
    cancellation: Option<Cancellation>,
}

impl CallContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a context that additionally carries `value`.
    ///
    /// A later value of the same type shadows an earlier one for this context
    /// and its descendants only.
    #[must_use]
    pub fn with<T: Send + Sync + 'static>(&self, value: T) -> Self {
        Self {
            head: Some(Arc::new(Entry {
                value: Box::new(value),
                parent: self.head.clone(),
            })),
            deadline: self.deadline,
            cancellation: self.cancellation.clone(),
        }
    }

    /// Newest value of type `T`, if any ancestor wrote one.
    #[must_use]
    pub fn get<T: 'static>(&self) -> Option<&T> {
        let mut cursor = self.head.as_deref();
        while let Some(entry) = cursor {
            if let Some(value) = entry.value.downcast_ref::<T>() {
                return Some(value);
            }
            cursor = entry.parent.as_deref();
        }
        None
    }

    #[must_use]
    pub fn with_token(&self, token: BearerToken) -> Self {
        self.with(token)
    }

    /// Bearer token placed by the signer (client) or the transport (server).
    #[must_use]
    pub fn token(&self) -> Option<&BearerToken> {
        self.get()
    }

    #[must_use]
    pub fn with_claims(&self, claims: Claims) -> Self {
        self.with(claims)
    }

    /// Verified claims attached by the token parser.
    #[must_use]
    pub fn claims(&self) -> Option<&Claims> {
        self.get()
    }

    /// Derive a context with a deadline. An earlier inherited deadline wins.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut ctx = self.clone();
        ctx.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        ctx
    }

    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn with_cancellation(&self, cancellation: Cancellation) -> Self {
        let mut ctx = self.clone();
        ctx.cancellation = Some(cancellation);
        ctx
    }

    /// Fail fast if the caller cancelled the call or its deadline has passed.
    ///
    /// # Errors
    /// Returns `Failure::Cancelled` or `Failure::DeadlineExceeded`.
    pub fn check(&self) -> Result<(), Failure> {
        if self
            .cancellation
            .as_ref()
            .is_some_and(Cancellation::is_cancelled)
        {
            return Err(Failure::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Failure::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drive `fut` unless the call is cancelled or its deadline passes first.
    ///
    /// # Errors
    /// Returns the future's own error, or `Failure::Cancelled` /
    /// `Failure::DeadlineExceeded` if it was abandoned.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, Failure>
    where
        F: Future<Output = Result<T, Failure>>,
    {
        self.check()?;

        let cancelled = async {
            match &self.cancellation {
                Some(c) => c.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            () = cancelled => Err(Failure::Cancelled),
            () = expired => Err(Failure::DeadlineExceeded),
            result = fut => result,
        }
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries = 0;
        let mut cursor = self.head.as_deref();
        while let Some(entry) = cursor {
            entries += 1;
            cursor = entry.parent.as_deref();
        }
        f.debug_struct("CallContext")
            .field("entries", &entries)
            .field("deadline", &self.deadline)
            .field(
                "cancelled",
                &self.cancellation.as_ref().map(Cancellation::is_cancelled),
            )
            .finish()
    }
}

/// Caller side of a cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observer side of a cancellation signal, carried in the [`CallContext`].
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancelled. Never resolves if the handle is dropped unused.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Create a linked cancel handle and observer.
#[must_use]
pub fn cancellation() -> (CancelHandle, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, Cancellation { rx })
}
