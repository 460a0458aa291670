//! Single-writer command queue in front of the tracker.
//!
//! All mutating calls are queued to one dedicated writer thread, so commits
//! (and therefore published batches) follow queue order no matter how many
//! tasks submit hints. Reads go straight to the tracker.

use super::{FileChangeBatch, HintTracker};
use crate::error::TrackerError;
use crate::hint::Hint;
use crate::store::AttachedData;
use crate::tree::{FileRecord, Url};
use crate::walker::{WalkHandler, WalkItem};
use async_trait::async_trait;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

type Reply<T> = oneshot::Sender<Result<T, TrackerError>>;

enum Command {
    Commit {
        hint: Hint,
        reply: Reply<FileChangeBatch>,
    },
    Attach {
        url: Url,
        record: FileRecord,
        data: AttachedData,
        replace: bool,
        reply: Reply<()>,
    },
    Detach {
        url: Url,
        key: String,
        reply: Reply<Option<AttachedData>>,
    },
    Stop,
}

/// Owner of the writer thread
pub struct TrackerService {
    handle: TrackerHandle,
    thread: Option<JoinHandle<()>>,
}

impl TrackerService {
    /// Start the writer thread for `tracker`.
    pub fn spawn(tracker: Arc<HintTracker>) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let writer = Arc::clone(&tracker);
        let thread = std::thread::Builder::new()
            .name("arbor-writer".to_string())
            .spawn(move || run_writer(writer, receiver))?;
        info!("Tracker writer started");
        Ok(Self {
            handle: TrackerHandle { sender, tracker },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> TrackerHandle {
        self.handle.clone()
    }

    /// Stop accepting commands after the ones already queued and join the
    /// writer thread. Blocks the calling thread until the queue drains.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.handle.sender.send(Command::Stop);
        if thread.join().is_err() {
            error!("Tracker writer thread panicked");
        }
        info!("Tracker writer stopped");
    }
}

impl Drop for TrackerService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_writer(tracker: Arc<HintTracker>, mut receiver: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = receiver.blocking_recv() {
        match command {
            Command::Commit { hint, reply } => {
                let _ = reply.send(tracker.commit_hint(&hint));
            }
            Command::Attach {
                url,
                record,
                data,
                replace,
                reply,
            } => {
                let _ = reply.send(tracker.attach_data(&url, &record, data, replace));
            }
            Command::Detach { url, key, reply } => {
                let _ = reply.send(tracker.detach_data(&url, &key));
            }
            Command::Stop => break,
        }
    }
    debug!("Tracker writer loop exited");
}

/// Cloneable async front end of a [`TrackerService`]
#[derive(Clone)]
pub struct TrackerHandle {
    sender: mpsc::UnboundedSender<Command>,
    tracker: Arc<HintTracker>,
}

impl TrackerHandle {
    /// The tracker, for read-only calls.
    pub fn tracker(&self) -> &Arc<HintTracker> {
        &self.tracker
    }

    pub async fn commit_hint(&self, hint: Hint) -> Result<FileChangeBatch, TrackerError> {
        self.request(|reply| Command::Commit { hint, reply }).await
    }

    pub async fn attach_data(
        &self,
        url: Url,
        record: FileRecord,
        data: AttachedData,
        replace: bool,
    ) -> Result<(), TrackerError> {
        self.request(|reply| Command::Attach {
            url,
            record,
            data,
            replace,
            reply,
        })
        .await
    }

    pub async fn detach_data(
        &self,
        url: Url,
        key: String,
    ) -> Result<Option<AttachedData>, TrackerError> {
        self.request(|reply| Command::Detach { url, key, reply })
            .await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, TrackerError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(command(reply))
            .map_err(|_| TrackerError::ServiceStopped)?;
        response.await.map_err(|_| TrackerError::ServiceStopped)?
    }
}

#[async_trait]
impl WalkHandler for TrackerHandle {
    async fn handle(&self, item: WalkItem) -> anyhow::Result<()> {
        self.commit_hint(item.into_hint()).await?;
        Ok(())
    }
}
