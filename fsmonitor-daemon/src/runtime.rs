//! Monitor runtime: version handshake plus the protocol command loop.
//!
//! One single-threaded command loop reads commands line by line; each active
//! replica gets its own router task. The loop and the routers share nothing
//! but the registry's synchronized fields and the output transport. Every
//! error is fatal by design: the caller restarts the daemon rather than
//! trusting possibly-corrupted replica state.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use notify::{recommended_watcher, RecursiveMode, Watcher};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, BufReader};
use tokio::sync::{broadcast, mpsc};

use fsmonitor_core::{Command, SyncSet};

use crate::error::{io_err, MonitorError};
use crate::registry::{ReplicaEntry, ReplicaRegistry, StartOutcome};
use crate::router;
use crate::transport::CommandSender;

/// Protocol version offered in the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// The daemon: command loop state plus the shared replica registry.
pub struct Monitor<R> {
    reader: R,
    sender: CommandSender,
    registry: Arc<ReplicaRegistry>,
    /// Replicas the caller is blocked waiting on.
    waiting: Arc<SyncSet>,
    /// Replicas already sent a `CHANGES` notification for the current
    /// pending change set.
    reported: Arc<SyncSet>,
    debug: Arc<AtomicBool>,
    shutdown: broadcast::Sender<()>,
    protocol_version: f64,
}

/// Run the monitor over stdio and block the current thread until it exits.
pub fn start_blocking(debug: bool) -> Result<(), MonitorError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(async move {
        let monitor = Monitor::new(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            debug,
        );
        monitor.run().await
    })
}

impl<R> Monitor<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(
        reader: R,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        debug: bool,
    ) -> Self {
        let debug = Arc::new(AtomicBool::new(debug));
        let (shutdown, _) = broadcast::channel(16);
        Self {
            reader,
            sender: CommandSender::new(writer, debug.clone()),
            registry: Arc::new(ReplicaRegistry::new()),
            waiting: Arc::new(SyncSet::new()),
            reported: Arc::new(SyncSet::new()),
            debug,
            shutdown,
            protocol_version: 0.0,
        }
    }

    /// Version negotiated in the handshake (0 before the handshake ran).
    pub fn protocol_version(&self) -> f64 {
        self.protocol_version
    }

    /// Drive the protocol until `QUIT`, end of input, or a fatal error.
    ///
    /// On the fatal path the `ERROR` reply is flushed before this returns
    /// and no further input is read; the caller maps the error to a
    /// non-zero exit code.
    pub async fn run(mut self) -> Result<(), MonitorError> {
        let result = self.session().await;
        self.registry.shutdown();
        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                let message = err.to_string();
                let _ = self.sender.send("ERROR", &[&message]).await;
                Err(err)
            }
        }
    }

    async fn session(&mut self) -> Result<(), MonitorError> {
        self.handshake().await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            let line = tokio::select! {
                _ = shutdown_rx.recv() => {
                    return Err(MonitorError::ChannelClosed("router transport"));
                }
                line = read_command_line(&mut self.reader) => line?,
            };
            let command = self.parse_line(&line)?;

            // Any command other than WAIT means the caller has moved on from
            // blocking semantics: cancel every pending wait.
            if !command.is_wait() {
                self.waiting.clear();
            }

            match command {
                Command::Debug => {
                    self.debug.store(true, Ordering::Relaxed);
                    tracing::info!("verbose wire logging enabled");
                }
                Command::Start {
                    replica,
                    root,
                    path,
                } => self.handle_start(replica, root, path).await?,
                Command::Wait { replica } => self.handle_wait(&replica).await?,
                Command::Changes { replica } => self.handle_changes(&replica).await?,
                Command::Reset { replica } => self.handle_reset(&replica)?,
                Command::Quit => return Ok(()),
                other => {
                    return Err(MonitorError::UnexpectedCommand {
                        keyword: other.keyword(),
                    })
                }
            }
        }
    }

    /// Send our version, require the caller's `VERSION` before anything else.
    async fn handshake(&mut self) -> Result<(), MonitorError> {
        self.sender.send_version(PROTOCOL_VERSION).await?;

        let line = read_command_line(&mut self.reader).await?;
        let command = self.parse_line(&line)?;
        let Command::Version(version) = command else {
            return Err(MonitorError::Handshake(format!(
                "expected VERSION command, got {}",
                command.keyword()
            )));
        };

        if version != "1" {
            tracing::warn!(version = %version, "unexpected protocol version");
        }
        self.protocol_version = version.parse().map_err(|_| {
            MonitorError::Handshake(format!("unable to parse version {version:?}"))
        })?;
        Ok(())
    }

    async fn handle_start(
        &mut self,
        replica: String,
        root: String,
        path: String,
    ) -> Result<(), MonitorError> {
        let root = PathBuf::from(root);
        let outcome = self.registry.get_or_insert_with(&replica, || {
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            let mut watcher = recommended_watcher(move |event| {
                let _ = event_tx.send(event);
            })?;
            watcher.watch(&root, RecursiveMode::Recursive)?;
            let (stop_tx, stop_rx) = mpsc::channel(1);
            let entry = ReplicaEntry::new(root.clone(), Some(watcher), stop_tx);
            Ok::<_, MonitorError>((entry, (event_rx, stop_rx)))
        })?;

        let entry = match outcome {
            StartOutcome::Created {
                entry,
                aux: (event_rx, stop_rx),
            } => {
                tracing::debug!(
                    replica = %replica,
                    root = %entry.root().display(),
                    "monitoring replica",
                );
                tokio::spawn(router::router_task(
                    replica.clone(),
                    entry.clone(),
                    self.waiting.clone(),
                    self.reported.clone(),
                    self.sender.clone(),
                    self.shutdown.clone(),
                    event_rx,
                    stop_rx,
                ));
                entry
            }
            StartOutcome::Existing(entry) => entry,
        };

        entry.register_path(&path);
        self.sender.send_ok().await?;
        self.collect_subpaths(&entry).await
    }

    /// Collecting mode: only `DIR`, `LINK`, and `DONE` are legal until the
    /// sub-path enumeration ends.
    async fn collect_subpaths(&mut self, entry: &ReplicaEntry) -> Result<(), MonitorError> {
        loop {
            let line = read_command_line(&mut self.reader).await?;
            match self.parse_line(&line)? {
                Command::Dir { path } => {
                    entry.register_path(&path);
                    self.sender.send_ok().await?;
                }
                Command::Link => return Err(MonitorError::LinksUnsupported),
                Command::Done => return Ok(()),
                other => {
                    return Err(MonitorError::CollectingMode {
                        keyword: other.keyword(),
                    })
                }
            }
        }
    }

    async fn handle_wait(&mut self, replica: &str) -> Result<(), MonitorError> {
        let entry = self.lookup(replica)?;
        self.waiting.insert(replica.to_string());

        // Changes already pending: notify right away, once.
        if !entry.changes().is_empty() && self.reported.insert(replica.to_string()) {
            self.sender.send("CHANGES", &[replica]).await?;
        }
        Ok(())
    }

    async fn handle_changes(&mut self, replica: &str) -> Result<(), MonitorError> {
        let entry = self.lookup(replica)?;

        let mut changes = entry.changes().drain();
        changes.sort();
        for change in &changes {
            self.sender.send("RECURSIVE", &[change]).await?;
        }
        self.sender.send_done().await?;

        self.waiting.remove([replica]);
        self.reported.remove([replica]);
        Ok(())
    }

    fn handle_reset(&mut self, replica: &str) -> Result<(), MonitorError> {
        let entry = self
            .registry
            .remove(replica)
            .ok_or_else(|| MonitorError::UnknownReplica {
                name: replica.to_string(),
            })?;
        self.waiting.remove([replica]);
        self.reported.remove([replica]);
        tracing::debug!(replica = %replica, root = %entry.root().display(), "replica reset");
        Ok(())
    }

    fn parse_line(&self, line: &str) -> Result<Command, MonitorError> {
        if self.debug.load(Ordering::Relaxed) {
            tracing::debug!(line = %line.trim_end(), "recv");
        }
        Ok(Command::parse(line)?)
    }

    fn lookup(&self, replica: &str) -> Result<Arc<ReplicaEntry>, MonitorError> {
        self.registry
            .get(replica)
            .ok_or_else(|| MonitorError::UnknownReplica {
                name: replica.to_string(),
            })
    }

    #[cfg(test)]
    fn registry_handle(&self) -> Arc<ReplicaRegistry> {
        self.registry.clone()
    }
}

async fn read_command_line<R>(reader: &mut R) -> Result<String, MonitorError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .await
        .map_err(|e| io_err("command input", e))?;
    if read == 0 {
        return Err(io_err(
            "command input",
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "input stream closed"),
        ));
    }
    Ok(line)
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the protocol; all diagnostics go to stderr.
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
