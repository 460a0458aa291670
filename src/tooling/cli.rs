//! CLI Tooling
//!
//! Command-line interface over a local directory. Paths given on the command
//! line are canonicalized and indexed under their absolute location, so one
//! index can hold several scanned trees.

use crate::backend::{observe, FileSystem, LocalFileSystem};
use crate::config::{ArborConfig, ConfigLoader};
use crate::error::{ApiError, FsError, StorageError, TrackerError};
use crate::hint::Hint;
use crate::store::{AttachedData, DeletionPolicy, TreeIndex};
use crate::tracker::{
    EventChannel, FileChangeEvent, FileChangeKind, HintTracker, TrackerService,
};
use crate::tree::Url;
use crate::walker::{Walker, WalkerThread, WalkerTiming};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use futures::StreamExt;
use owo_colors::OwoColorize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Arbor CLI - incremental file-tree tracking
#[derive(Parser)]
#[command(name = "arbor", version)]
#[command(about = "Index a directory tree and report what changed")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (layered over the global config)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Index directory (overrides storage.path)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Deletion policy as spelled on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    Manual,
    ContentChange,
    Deleted,
}

impl From<PolicyArg> for DeletionPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Manual => DeletionPolicy::Manual,
            PolicyArg::ContentChange => DeletionPolicy::WhenContentChanges,
            PolicyArg::Deleted => DeletionPolicy::WhenDeleted,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Walk a directory once and print the resulting changes
    Scan {
        /// Directory to index
        dir: PathBuf,
    },
    /// Keep walking a directory and print changes until interrupted
    Watch {
        /// Directory to track
        dir: PathBuf,
    },
    /// List indexed paths at or below a path
    Ls {
        /// Base path (default: everything)
        path: Option<String>,
    },
    /// Show data attached to an indexed path
    Meta {
        path: String,
    },
    /// Attach data to the current version of an indexed path
    Attach {
        path: String,
        key: String,
        value: String,
        /// When the data stops applying
        #[arg(long, value_enum, default_value_t = PolicyArg::ContentChange)]
        policy: PolicyArg,
        /// Overwrite existing data with the same key
        #[arg(long)]
        replace: bool,
    },
    /// Drop a path and everything below it from the index
    Forget {
        path: String,
    },
    /// Show index row counts
    Stats,
}

impl Cli {
    /// Load configuration and apply command-line overrides.
    pub fn load_config(&self) -> Result<ArborConfig, ApiError> {
        let mut config = match &self.config {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load()?,
        };
        if let Some(store) = &self.store {
            config.storage.path = Some(store.clone());
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(output) = &self.log_output {
            config.logging.output = output.clone();
        }
        if let Some(file) = &self.log_file {
            config.logging.file = Some(file.clone());
        }
        Ok(config)
    }
}

/// CLI context: an open index and the settings commands run with
pub struct CliContext {
    config: ArborConfig,
    tracker: Arc<HintTracker>,
    format: OutputFormat,
}

impl CliContext {
    /// Open the index named by `config`.
    pub fn new(config: ArborConfig, format: OutputFormat) -> Result<Self, ApiError> {
        let path = config.storage.resolve_path()?;
        let index = TreeIndex::open(
            &path,
            &config.storage.tree_name,
            config.storage.flush_on_commit,
        )?;
        info!(path = %path.display(), "Opened tree index");
        Ok(Self::with_index(config, Arc::new(index), format))
    }

    pub fn with_index(config: ArborConfig, index: Arc<TreeIndex>, format: OutputFormat) -> Self {
        let events = EventChannel::new(config.events.capacity);
        Self {
            tracker: Arc::new(HintTracker::new(index, events)),
            config,
            format,
        }
    }

    pub fn tracker(&self) -> &Arc<HintTracker> {
        &self.tracker
    }

    /// Execute a command and return its rendered output.
    pub async fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Scan { dir } => self.scan(dir).await,
            Commands::Watch { dir } => self.watch(dir).await,
            Commands::Ls { path } => self.list(path.as_deref()),
            Commands::Meta { path } => self.meta(path),
            Commands::Attach {
                path,
                key,
                value,
                policy,
                replace,
            } => self.attach(path, key, value, *policy, *replace),
            Commands::Forget { path } => self.forget(path),
            Commands::Stats => self.stats(),
        }
    }

    async fn scan(&self, dir: &Path) -> Result<String, ApiError> {
        let (fs, root) = locate(dir)?;
        let fs: Arc<dyn FileSystem> = Arc::new(fs);
        let service = TrackerService::spawn(Arc::clone(&self.tracker)).map_err(StorageError::from)?;
        let handle = service.handle();

        let mut events: Vec<FileChangeEvent> = Vec::new();
        let batch = handle.commit_hint(observe(fs.as_ref(), &root).await?).await?;
        events.extend(batch.iter().cloned());

        let mut directories = 0usize;
        let mut failures = 0usize;
        let mut steps = Walker::new(fs).walk(root.clone());
        while let Some(step) = steps.next().await {
            match step {
                Ok(item) => {
                    directories += 1;
                    let batch = handle.commit_hint(item.into_hint()).await?;
                    events.extend(batch.iter().cloned());
                }
                Err(e) if e.url() == &root => return Err(e.into()),
                Err(e) => {
                    failures += 1;
                    warn!(url = %e.url(), error = %e, "Failed to list directory");
                }
            }
        }
        drop(handle);
        service.shutdown();
        info!(root = %root, directories, failures, events = events.len(), "Scan finished");

        match self.format {
            OutputFormat::Json => to_json(&json!({
                "root": root.to_string(),
                "directories": directories,
                "failures": failures,
                "events": events.iter().map(event_json).collect::<Vec<_>>(),
            })),
            OutputFormat::Text => {
                let mut out: Vec<String> = events.iter().map(render_event_text).collect();
                out.push(format!(
                    "{} directories scanned, {} changes, {} listing failures",
                    directories,
                    events.len(),
                    failures
                ));
                Ok(out.join("\n"))
            }
        }
    }

    async fn watch(&self, dir: &Path) -> Result<String, ApiError> {
        let (fs, root) = locate(dir)?;
        let fs: Arc<dyn FileSystem> = Arc::new(fs);
        let service = TrackerService::spawn(Arc::clone(&self.tracker)).map_err(StorageError::from)?;
        let handle = service.handle();

        self.print_events(&handle.commit_hint(observe(fs.as_ref(), &root).await?).await?);
        let mut receiver = self.tracker.subscribe();
        let walker = WalkerThread::spawn(
            Walker::new(fs),
            root.clone(),
            WalkerTiming::from(&self.config.walker),
            Arc::new(handle.clone()),
        );

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut printed = 0usize;
        loop {
            tokio::select! {
                _ = &mut ctrl_c => break,
                received = receiver.recv() => match received {
                    Ok(batch) => printed += self.print_events(&batch),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event subscriber lagged; some changes were not printed");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        walker.shutdown().await;
        let laps = walker.laps_completed();
        drop(handle);
        service.shutdown();
        Ok(format!("Stopped watching {} after {} laps ({} changes)", root, laps, printed))
    }

    fn print_events(&self, events: &[FileChangeEvent]) -> usize {
        for event in events {
            match self.format {
                OutputFormat::Json => println!("{}", event_json(event)),
                OutputFormat::Text => println!("{}", render_event_text(event)),
            }
        }
        events.len()
    }

    fn list(&self, path: Option<&str>) -> Result<String, ApiError> {
        let base = path.map(resolve_url).unwrap_or_else(Url::root);
        let urls = self.tracker.enumerate_all_files(&base)?;
        match self.format {
            OutputFormat::Json => to_json(&urls),
            OutputFormat::Text if urls.is_empty() => Ok(format!("No indexed paths under {}", base)),
            OutputFormat::Text => Ok(urls
                .iter()
                .map(Url::to_string)
                .collect::<Vec<_>>()
                .join("\n")),
        }
    }

    fn meta(&self, path: &str) -> Result<String, ApiError> {
        let url = resolve_url(path);
        let attachments = self.tracker.get_metadata(&url)?;
        if self.format == OutputFormat::Json {
            let rows: Vec<serde_json::Value> = attachments
                .iter()
                .map(|data| {
                    json!({
                        "key": data.key,
                        "policy": policy_label(data.deletion_policy),
                        "size": data.payload.len(),
                        "payload": String::from_utf8_lossy(&data.payload),
                    })
                })
                .collect();
            return to_json(&rows);
        }
        if attachments.is_empty() {
            return Ok(format!("No data attached to {}", url));
        }
        let mut table = Table::new();
        table.load_preset(UTF8_BORDERS_ONLY);
        table.set_header(vec!["Key", "Policy", "Size", "Payload"]);
        for data in &attachments {
            table.add_row(vec![
                data.key.clone(),
                policy_label(data.deletion_policy).to_string(),
                data.payload.len().to_string(),
                preview(&data.payload),
            ]);
        }
        Ok(format!("{}\n{}", url.bold(), table))
    }

    fn attach(
        &self,
        path: &str,
        key: &str,
        value: &str,
        policy: PolicyArg,
        replace: bool,
    ) -> Result<String, ApiError> {
        let url = resolve_url(path);
        let node = self
            .tracker
            .get_node(&url)?
            .ok_or_else(|| TrackerError::NotIndexed(url.clone()))?;
        let data = AttachedData::new(key, value.as_bytes(), policy.into());
        self.tracker
            .attach_data(&url, &node.file_record(), data, replace)?;
        Ok(format!("Attached {} to {}", key, url))
    }

    fn forget(&self, path: &str) -> Result<String, ApiError> {
        let url = resolve_url(path);
        let batch = self.tracker.commit_hint(&Hint::deleted(url.clone()))?;
        match self.format {
            OutputFormat::Json => to_json(&batch.iter().map(event_json).collect::<Vec<_>>()),
            OutputFormat::Text if batch.is_empty() => Ok(format!("{} was not indexed", url)),
            OutputFormat::Text => Ok(batch
                .iter()
                .map(render_event_text)
                .collect::<Vec<_>>()
                .join("\n")),
        }
    }

    fn stats(&self) -> Result<String, ApiError> {
        let stats = self.tracker.index().stats()?;
        if self.format == OutputFormat::Json {
            return to_json(&json!({
                "nodes": stats.nodes,
                "observed_nodes": stats.observed_nodes,
                "attachments": stats.attachments,
            }));
        }
        let mut table = Table::new();
        table.load_preset(UTF8_BORDERS_ONLY);
        table.set_header(vec!["Rows", "Count"]);
        table.add_row(vec!["Nodes".to_string(), stats.nodes.to_string()]);
        table.add_row(vec!["Observed".to_string(), stats.observed_nodes.to_string()]);
        table.add_row(vec!["Attachments".to_string(), stats.attachments.to_string()]);
        Ok(table.to_string())
    }
}

/// Backend rooted at the file-system root plus the key of `dir` inside it.
fn locate(dir: &Path) -> Result<(LocalFileSystem, Url), ApiError> {
    let canonical = dunce::canonicalize(dir)
        .map_err(|e| FsError::io(&Url::parse(&dir.to_string_lossy()), e))?;
    let root = canonical.ancestors().last().unwrap_or(canonical.as_path()).to_path_buf();
    let fs = LocalFileSystem::new(root);
    let url = fs
        .url_for(&canonical)
        .ok_or_else(|| ApiError::InvalidPath(canonical.display().to_string()))?;
    Ok((fs, url))
}

/// Key for a command-line path: the canonical location when it exists on
/// disk, the literal text otherwise (e.g. for paths already deleted).
fn resolve_url(arg: &str) -> Url {
    locate(Path::new(arg))
        .map(|(_, url)| url)
        .unwrap_or_else(|_| Url::parse(arg))
}

fn kind_label(kind: FileChangeKind) -> &'static str {
    match kind {
        FileChangeKind::Created => "created",
        FileChangeKind::Changed => "changed",
        FileChangeKind::Deleted => "deleted",
    }
}

fn policy_label(policy: DeletionPolicy) -> &'static str {
    match policy {
        DeletionPolicy::Manual => "manual",
        DeletionPolicy::WhenContentChanges => "content-change",
        DeletionPolicy::WhenDeleted => "deleted",
    }
}

fn render_event_text(event: &FileChangeEvent) -> String {
    let marker = match event.kind {
        FileChangeKind::Created => format!("{}", "+".green()),
        FileChangeKind::Changed => format!("{}", "~".yellow()),
        FileChangeKind::Deleted => format!("{}", "-".red()),
    };
    if event.attached_data.is_empty() {
        return format!("{} {}", marker, event.url);
    }
    let keys: Vec<&str> = event.attached_data.iter().map(|d| d.key.as_str()).collect();
    format!("{} {} {}", marker, event.url, format!("[{}]", keys.join(", ")).dimmed())
}

fn event_json(event: &FileChangeEvent) -> serde_json::Value {
    json!({
        "kind": kind_label(event.kind),
        "url": event.url.to_string(),
        "attached_data": event.attached_data.iter().map(|d| d.key.as_str()).collect::<Vec<_>>(),
    })
}

fn preview(payload: &[u8]) -> String {
    const MAX: usize = 40;
    match std::str::from_utf8(payload) {
        Ok(text) if text.chars().count() <= MAX => text.to_string(),
        Ok(text) => format!("{}...", text.chars().take(MAX).collect::<String>()),
        Err(_) => hex::encode(&payload[..payload.len().min(MAX / 2)]),
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, ApiError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| ApiError::StorageError(StorageError::Encode(e.to_string())))
}
