//! Walker
//!
//! Breadth-first enumeration of a namespace, one directory listing per item.
//! A walk is a lazy stream: nothing is listed until the consumer polls, and
//! every call to [`Walker::walk`] starts a fresh enumeration.

pub mod thread;

use crate::backend::FileSystem;
use crate::error::FsError;
use crate::hint::Hint;
use crate::tree::{FileRecord, Url};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

pub use thread::{WalkerThread, WalkerTiming};

/// One visited directory and its complete listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkItem {
    pub url: Url,
    pub entries: Vec<(String, FileRecord)>,
}

impl WalkItem {
    /// The directory hint this listing amounts to.
    pub fn into_hint(self) -> Hint {
        Hint::directory(self.url, self.entries)
    }
}

/// Callback invoked by a [`WalkerThread`] for every visited directory.
///
/// A failure is logged and the lap goes on with the next item.
#[async_trait]
pub trait WalkHandler: Send + Sync {
    async fn handle(&self, item: WalkItem) -> anyhow::Result<()>;
}

/// [`WalkHandler`] backed by an async closure
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> WalkHandler for FnHandler<F>
where
    F: Fn(WalkItem) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync,
{
    async fn handle(&self, item: WalkItem) -> anyhow::Result<()> {
        (self.0)(item).await
    }
}

/// Wrap an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn WalkHandler>
where
    F: Fn(WalkItem) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(
        move |item| -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(f(item)) },
    ))
}

/// Breadth-first lister over one backend
#[derive(Clone)]
pub struct Walker {
    fs: Arc<dyn FileSystem>,
}

impl Walker {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Enumerate the tree below `root`.
    ///
    /// Pending directories are kept in a FIFO seeded with `root`. Each step
    /// lists one of them, yields the listing and queues its subdirectories.
    /// A failed listing is yielded as an error and the walk moves on to the
    /// next queued directory; the consumer decides whether to stop.
    pub fn walk(&self, root: Url) -> BoxStream<'static, Result<WalkItem, FsError>> {
        let state = (Arc::clone(&self.fs), VecDeque::from([root]));
        stream::unfold(state, |(fs, mut pending)| async move {
            let url = pending.pop_front()?;
            let step = match fs.read_directory(&url).await {
                Ok(entries) => {
                    pending.extend(
                        entries
                            .iter()
                            .filter(|(_, record)| record.is_directory())
                            .map(|(name, _)| url.join(name)),
                    );
                    Ok(WalkItem { url, entries })
                }
                Err(e) => Err(e),
            };
            Some((step, (fs, pending)))
        })
        .boxed()
    }
}
