//! # Threaded Storage Façade
//!
//! Wraps the synchronous [`Storage`] session in a worker thread so callers
//! never block on lock acquisition or SQL work.
//!
//! ```text
//! caller thread                        worker thread
//! ─────────────                        ─────────────
//! StorageActor::load_incidences ──►  command queue ──► Storage::load_incidences
//!        ...                                                │ observer relay
//! drain: next_event / dispatch ◄──  event channel  ◄────────┘
//! ```
//!
//! Every public method enqueues a command (arguments are owned clones, so
//! the caller's objects and the worker's never share) and returns
//! immediately. Results surface as [`ObserverEvent`]s on a bounded
//! channel: the worker *blocks* on `opened`, `modified`, `updated`,
//! `loaded` and `finished` sends once the channel is full, which is what
//! makes the caller apply observers serially and in order. `closed` is
//! sent non-blocking since nobody may be listening anymore.
//!
//! A file-system watcher on the change-ping file feeds `FileChanged`
//! commands into the same queue, so external-change detection shares the
//! worker's serialization.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::storage::{Storage, StorageConfig, StorageObserver};
use crate::types::{
    DbOperation, DeleteAction, Filter, Incidence, Notebook, NotebookIncidences, SortedFilter,
};

/// Commands queued ahead of the worker.
const COMMAND_CHANNEL_BOUND: usize = 1024;

/// Observer events buffered toward the caller; beyond this the worker
/// blocks until the caller drains.
const EVENT_CHANNEL_BOUND: usize = 16;

// =============================================================================
// Commands and events
// =============================================================================

enum Command {
    LoadIncidences(Filter),
    LoadSortedIncidences {
        filter: SortedFilter,
        limit: usize,
        last: Option<DateTime<Utc>>,
    },
    StoreIncidences {
        additions: NotebookIncidences,
        modifications: NotebookIncidences,
        deletions: NotebookIncidences,
        delete_action: DeleteAction,
    },
    PurgeDeletedIncidences(Vec<Incidence>),
    ModifyNotebook {
        notebook: Notebook,
        op: DbOperation,
    },
    FileChanged,
    Close,
}

/// Observer callbacks, materialized so the caller thread applies them.
#[derive(Debug)]
pub enum ObserverEvent {
    /// The backend finished opening.
    Opened(Vec<Notebook>),
    /// The backend closed.
    Closed,
    /// Another process committed changes.
    Modified(Vec<Notebook>),
    /// A save batch committed.
    Updated {
        additions: NotebookIncidences,
        modifications: NotebookIncidences,
        deletions: NotebookIncidences,
    },
    /// A load produced these incidences.
    Loaded(NotebookIncidences),
    /// An operation completed.
    Finished { error: bool, message: String },
}

/// Forwards the backend's observer callbacks into the event channel from
/// the worker thread.
struct EventRelay {
    events: Mutex<SyncSender<ObserverEvent>>,
}

impl EventRelay {
    fn send(&self, event: ObserverEvent) {
        let Ok(sender) = self.events.lock() else { return };
        // Blocking by design: the caller drains serially.
        if sender.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}

impl StorageObserver for EventRelay {
    fn storage_opened(&self, notebooks: &[Notebook]) {
        self.send(ObserverEvent::Opened(notebooks.to_vec()));
    }

    fn storage_closed(&self) {
        // Non-blocking: close must never wait on a departed caller.
        let Ok(sender) = self.events.lock() else { return };
        if let Err(TrySendError::Full(_)) = sender.try_send(ObserverEvent::Closed) {
            debug!("dropping closed event, channel full");
        }
    }

    fn storage_modified(&self, notebooks: &[Notebook]) {
        self.send(ObserverEvent::Modified(notebooks.to_vec()));
    }

    fn storage_updated(
        &self,
        additions: &NotebookIncidences,
        modifications: &NotebookIncidences,
        deletions: &NotebookIncidences,
    ) {
        self.send(ObserverEvent::Updated {
            additions: additions.clone(),
            modifications: modifications.clone(),
            deletions: deletions.clone(),
        });
    }

    fn incidences_loaded(&self, incidences: &NotebookIncidences) {
        self.send(ObserverEvent::Loaded(incidences.clone()));
    }

    fn finished(&self, error: bool, message: &str) {
        self.send(ObserverEvent::Finished {
            error,
            message: message.to_string(),
        });
    }
}

// =============================================================================
// The façade
// =============================================================================

/// The asynchronous face of a storage session.
///
/// Spawning moves a prepared backend onto a dedicated worker thread and
/// opens it there; the `Opened` event reports the stored notebooks once
/// ready. Dropping the façade (or calling [`StorageActor::close`]) shuts
/// the worker down gracefully.
pub struct StorageActor {
    commands: SyncSender<Command>,
    events: Receiver<ObserverEvent>,
    worker: Option<JoinHandle<()>>,
    // Kept alive for the façade's lifetime; dropping it stops the
    // file-system notifications.
    _watcher: Option<RecommendedWatcher>,
}

impl StorageActor {
    /// Spawns the worker for the configured database.
    ///
    /// Fails only on local setup problems (lock or ping file creation);
    /// the open itself happens on the worker and reports through the
    /// `Opened` / `Finished` events.
    pub fn spawn(config: StorageConfig) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::sync_channel(COMMAND_CHANNEL_BOUND);
        let (event_tx, event_rx) = mpsc::sync_channel(EVENT_CHANNEL_BOUND);

        let mut storage = Storage::new(config)?;
        storage.register_observer(Arc::new(EventRelay {
            events: Mutex::new(event_tx.clone()),
        }));

        let watcher = Self::spawn_watcher(&storage, command_tx.clone());

        let worker = thread::Builder::new()
            .name("caldb-storage".to_string())
            .spawn(move || run_worker(storage, command_rx, event_tx))
            .expect("failed to spawn storage worker thread");

        Ok(Self {
            commands: command_tx,
            events: event_rx,
            worker: Some(worker),
            _watcher: watcher,
        })
    }

    /// Watches the change-ping file and feeds `FileChanged` into the
    /// command queue. A full queue coalesces pings; one check is enough.
    fn spawn_watcher(
        storage: &Storage,
        commands: SyncSender<Command>,
    ) -> Option<RecommendedWatcher> {
        let ping_path = storage.change_path().to_path_buf();
        let result = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            match event {
                Ok(_) => {
                    let _ = commands.try_send(Command::FileChanged);
                }
                Err(err) => warn!(%err, "change watcher error"),
            }
        });
        match result {
            Ok(mut watcher) => match watcher.watch(&ping_path, RecursiveMode::NonRecursive) {
                Ok(()) => Some(watcher),
                Err(err) => {
                    warn!(path = %ping_path.display(), %err, "cannot watch change file");
                    None
                }
            },
            Err(err) => {
                warn!(%err, "cannot create change watcher");
                None
            }
        }
    }

    fn enqueue(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::Closed)
    }

    /// Queues an unsorted load; the page arrives as a `Loaded` event.
    pub fn load_incidences(&self, filter: Filter) -> Result<()> {
        self.enqueue(Command::LoadIncidences(filter))
    }

    /// Queues a sorted, windowed load.
    pub fn load_sorted_incidences(
        &self,
        filter: SortedFilter,
        limit: usize,
        last: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.enqueue(Command::LoadSortedIncidences {
            filter,
            limit,
            last,
        })
    }

    /// Queues a save batch. The lists are owned clones; the caller's
    /// objects stay untouched.
    pub fn store_incidences(
        &self,
        additions: NotebookIncidences,
        modifications: NotebookIncidences,
        deletions: NotebookIncidences,
        delete_action: DeleteAction,
    ) -> Result<()> {
        self.enqueue(Command::StoreIncidences {
            additions,
            modifications,
            deletions,
            delete_action,
        })
    }

    /// Queues a tombstone purge.
    pub fn purge_deleted_incidences(&self, list: Vec<Incidence>) -> Result<()> {
        self.enqueue(Command::PurgeDeletedIncidences(list))
    }

    /// Queues a notebook insert, update or delete.
    pub fn modify_notebook(&self, notebook: Notebook, op: DbOperation) -> Result<()> {
        self.enqueue(Command::ModifyNotebook { notebook, op })
    }

    /// Best-effort cancellation; the backend ignores it.
    pub fn cancel(&self) -> bool {
        true
    }

    /// The next pending event, if one is already queued.
    pub fn try_next_event(&self) -> Option<ObserverEvent> {
        self.events.try_recv().ok()
    }

    /// Waits up to `timeout` for the next event.
    pub fn next_event_timeout(&self, timeout: Duration) -> Option<ObserverEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Drains every queued event into `observer` on the calling thread.
    /// Returns the number of callbacks delivered.
    pub fn dispatch_pending(&self, observer: &dyn StorageObserver) -> usize {
        let mut delivered = 0;
        while let Some(event) = self.try_next_event() {
            match event {
                ObserverEvent::Opened(notebooks) => observer.storage_opened(&notebooks),
                ObserverEvent::Closed => observer.storage_closed(),
                ObserverEvent::Modified(notebooks) => observer.storage_modified(&notebooks),
                ObserverEvent::Updated {
                    additions,
                    modifications,
                    deletions,
                } => observer.storage_updated(&additions, &modifications, &deletions),
                ObserverEvent::Loaded(incidences) => observer.incidences_loaded(&incidences),
                ObserverEvent::Finished { error, message } => observer.finished(error, &message),
            }
            delivered += 1;
        }
        delivered
    }

    /// Shuts the worker down and waits for it to finish.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.commands.send(Command::Close);
            // Unblock a worker waiting on a full event channel.
            while !worker.is_finished() {
                while self.events.try_recv().is_ok() {}
                thread::sleep(Duration::from_millis(1));
            }
            if worker.join().is_err() {
                warn!("storage worker panicked");
            }
        }
    }
}

impl Drop for StorageActor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// =============================================================================
// Worker loop
// =============================================================================

fn run_worker(
    mut storage: Storage,
    commands: Receiver<Command>,
    events: SyncSender<ObserverEvent>,
) {
    if let Err(err) = storage.open() {
        warn!(%err, "opening storage backend failed");
        let _ = events.send(ObserverEvent::Finished {
            error: true,
            message: format!("open failed: {err}"),
        });
    }

    while let Ok(command) = commands.recv() {
        let result = match command {
            Command::LoadIncidences(filter) => storage.load_incidences(&filter).map(drop),
            Command::LoadSortedIncidences {
                filter,
                limit,
                last,
            } => {
                let mut last = last;
                storage
                    .load_sorted_incidences(&filter, limit, &mut last)
                    .map(drop)
            }
            Command::StoreIncidences {
                additions,
                modifications,
                deletions,
                delete_action,
            } => storage
                .store_incidences(&additions, &modifications, &deletions, delete_action)
                .map(drop),
            Command::PurgeDeletedIncidences(list) => {
                storage.purge_deleted_incidences(&list).map(drop)
            }
            Command::ModifyNotebook { notebook, op } => storage.modify_notebook(&notebook, op),
            Command::FileChanged => storage.check_modified().map(drop),
            Command::Close => break,
        };
        // Operations that fail outright never reach their own observer
        // fan-out; surface the failure here.
        if let Err(err) = result {
            let _ = events.send(ObserverEvent::Finished {
                error: true,
                message: err.to_string(),
            });
        }
    }

    storage.close();
}
