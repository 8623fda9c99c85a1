//! Worker lifecycle primitives
//!
//! Every actor in the registry tree runs as a tokio task spawned through [`spawn`].
//! The returned [`Lifecycle`] is the part of a handle that lets anybody observe
//! (or force) the worker's termination:
//!
//! ```text
//! spawn(actor.run()) ──► tokio task ──► exits (Stopped | Panicked | Killed)
//!        │                                   │
//!        └─► Lifecycle ◄── watch channel ◄───┘
//!               │
//!               ├─► terminated().await   (any number of observers)
//!               └─► watch(mailbox, ..)   (delivers a message on the watcher's mailbox)
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::trace;

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a spawned worker
///
/// Never reused, so a recreated device gets a different id than the one it replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl WorkerId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        Self(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The actor loop returned (stop command or closed mailbox)
    Stopped,

    /// The actor panicked while handling a message
    Panicked,

    /// The task was aborted from outside
    Killed,
}

/// Anything a registry can hold as a child handle
pub trait Worker {
    fn worker_id(&self) -> WorkerId;
}

/// Observer side of a running worker
#[derive(Clone)]
pub struct Lifecycle {
    id: WorkerId,
    state: watch::Receiver<Option<ExitReason>>,
    abort: Arc<AbortHandle>,
}

impl Lifecycle {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Whether the worker has already stopped
    pub fn is_terminated(&self) -> bool {
        self.state.borrow().is_some()
    }

    /// Wait until the worker has stopped
    ///
    /// Resolves immediately if it already has.
    pub async fn terminated(&self) -> ExitReason {
        let mut state = self.state.clone();
        match state.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(ExitReason::Killed),
            // the monitor was dropped without reporting, i.e. the runtime is going away
            Err(_) => ExitReason::Killed,
        }
    }

    /// Abort the worker task, as if it crashed
    pub fn kill(&self) {
        self.abort.abort();
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("id", &self.id)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

/// Spawn a worker future and start monitoring it
pub fn spawn<F>(worker: F) -> Lifecycle
where
    F: Future<Output = ()> + Send + 'static,
{
    let id = WorkerId::next();
    let (state_tx, state_rx) = watch::channel(None);

    let join = tokio::spawn(worker);
    let abort = Arc::new(join.abort_handle());

    tokio::spawn(async move {
        let reason = match join.await {
            Ok(()) => ExitReason::Stopped,
            Err(e) if e.is_panic() => ExitReason::Panicked,
            Err(_) => ExitReason::Killed,
        };
        trace!("worker {id} exited: {reason:?}");
        state_tx.send_replace(Some(reason));
    });

    Lifecycle {
        id,
        state: state_rx,
        abort,
    }
}

/// Deliver a termination notification for `lifecycle` on `mailbox`
///
/// Only a weak reference to the mailbox is held, so watching a child never keeps
/// the watching parent alive. If the parent is gone by the time the child stops,
/// the notification is dropped.
pub fn watch<M, F>(lifecycle: &Lifecycle, mailbox: mpsc::WeakSender<M>, notification: F)
where
    M: Send + 'static,
    F: FnOnce(WorkerId, ExitReason) -> M + Send + 'static,
{
    let lifecycle = lifecycle.clone();

    tokio::spawn(async move {
        let reason = lifecycle.terminated().await;

        let Some(mailbox) = mailbox.upgrade() else {
            trace!("watcher of {} is gone, dropping notification", lifecycle.id());
            return;
        };

        if mailbox
            .send(notification(lifecycle.id(), reason))
            .await
            .is_err()
        {
            trace!("watcher of {} stopped, dropping notification", lifecycle.id());
        }
    });
}
