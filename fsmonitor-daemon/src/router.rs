//! Watch event router: one worker per active replica.
//!
//! Consumes raw notify events for the replica's root, matches each event
//! path against the registered sub-paths, and folds matches into the
//! replica's change set. When the caller is blocked in `WAIT` the first new
//! change triggers a one-time `CHANGES <replica>` notification.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind};
use tokio::sync::{broadcast, mpsc};

use fsmonitor_core::SyncSet;

use crate::registry::ReplicaEntry;
use crate::transport::CommandSender;

/// Consume events until the stop signal fires or the event source closes.
///
/// The stop branch is biased: once `RESET` has signaled, buffered events are
/// never processed.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn router_task(
    replica: String,
    entry: Arc<ReplicaEntry>,
    waiting: Arc<SyncSet>,
    reported: Arc<SyncSet>,
    sender: CommandSender,
    shutdown: broadcast::Sender<()>,
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop_rx.recv() => {
                tracing::debug!(replica = %replica, "router stopped");
                return;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::debug!(replica = %replica, "event source closed");
                    return;
                };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(replica = %replica, error = %err, "watch event error");
                        continue;
                    }
                };
                if let Err(err) = handle_event(
                    &replica, &entry, &waiting, &reported, &sender, event,
                ).await {
                    // The caller can no longer hear us; tear the daemon down.
                    tracing::error!(replica = %replica, error = %err, "router transport failure");
                    let _ = shutdown.send(());
                    return;
                }
            }
        }
    }
}

async fn handle_event(
    replica: &str,
    entry: &ReplicaEntry,
    waiting: &SyncSet,
    reported: &SyncSet,
    sender: &CommandSender,
    event: Event,
) -> Result<(), crate::error::MonitorError> {
    // Access events are read-side noise (inotify reports them; FSEvents does
    // not) and never represent a content change Unison cares about.
    if matches!(event.kind, EventKind::Access(_)) {
        return Ok(());
    }

    for path in &event.paths {
        tracing::trace!(replica = %replica, path = %path.display(), "fs event");

        let Some(change) = match_change(entry.root(), &entry.paths(), path) else {
            continue;
        };
        entry.changes().insert(change);

        // First new change for a waiting caller gets exactly one
        // notification; `insert` makes the check-and-mark atomic.
        if waiting.contains(replica) && reported.insert(replica.to_string()) {
            sender.send("CHANGES", &[replica]).await?;
        }
    }
    Ok(())
}

/// Match one absolute event path against the registered sub-paths, in
/// registration order; first match wins. Returns the change path relative to
/// the replica root, or `None` when the event falls outside every sub-path.
pub(crate) fn match_change(root: &Path, subpaths: &[String], event_path: &Path) -> Option<String> {
    for bp in subpaths {
        let full = if bp.is_empty() {
            root.to_path_buf()
        } else {
            root.join(bp)
        };
        let Some(rel) = relative_under(&full, event_path) else {
            continue;
        };
        return Some(join_change(bp, &rel));
    }
    None
}

/// Relative path of `target` under `base`, or `None` when `target` is not
/// below `base` or escapes upward (leading `..` segment).
fn relative_under(base: &Path, target: &Path) -> Option<PathBuf> {
    let rel = target.strip_prefix(base).ok()?;
    if matches!(rel.components().next(), Some(Component::ParentDir)) {
        return None;
    }
    Some(rel.to_path_buf())
}

fn join_change(subpath: &str, rel: &Path) -> String {
    if subpath.is_empty() {
        return rel.to_string_lossy().into_owned();
    }
    if rel.as_os_str().is_empty() {
        return subpath.to_string();
    }
    format!("{}/{}", subpath, rel.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    use notify::event::{CreateKind, ModifyKind};
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Duration};

    use crate::registry::ReplicaEntry;

    #[test]
    fn matches_event_under_registered_subpath() {
        let subpaths = vec!["foo".to_string(), "bar".to_string()];
        let change = match_change(
            Path::new("/r"),
            &subpaths,
            Path::new("/r/foo/x.txt"),
        );
        assert_eq!(change.as_deref(), Some("foo/x.txt"));
    }

    #[test]
    fn discards_event_outside_all_subpaths() {
        let subpaths = vec!["foo".to_string(), "bar".to_string()];
        assert_eq!(
            match_change(Path::new("/r"), &subpaths, Path::new("/r/baz/y.txt")),
            None
        );
    }

    #[test]
    fn rejects_upward_escaping_relative_paths() {
        // Lexically under "foo" but the relative path starts with "..": the
        // sub-path must not claim it.
        let subpaths = vec!["foo".to_string()];
        assert_eq!(
            match_change(
                Path::new("/r"),
                &subpaths,
                Path::new("/r/foo/../bar/z.txt"),
            ),
            None
        );
    }

    #[test]
    fn first_registered_subpath_wins() {
        let subpaths = vec!["foo".to_string(), "foo/nested".to_string()];
        let change = match_change(
            Path::new("/r"),
            &subpaths,
            Path::new("/r/foo/nested/x.txt"),
        );
        assert_eq!(change.as_deref(), Some("foo/nested/x.txt"));
    }

    #[test]
    fn empty_subpath_watches_the_root_itself() {
        let subpaths = vec![String::new()];
        assert_eq!(
            match_change(Path::new("/r"), &subpaths, Path::new("/r/a/b.txt")).as_deref(),
            Some("a/b.txt")
        );
        assert_eq!(
            match_change(Path::new("/r"), &subpaths, Path::new("/elsewhere/c.txt")),
            None
        );
    }

    #[test]
    fn event_at_the_subpath_itself_reports_the_subpath() {
        let subpaths = vec!["foo".to_string()];
        assert_eq!(
            match_change(Path::new("/r"), &subpaths, Path::new("/r/foo")).as_deref(),
            Some("foo")
        );
    }

    struct RouterFixture {
        entry: Arc<ReplicaEntry>,
        waiting: Arc<SyncSet>,
        reported: Arc<SyncSet>,
        events: mpsc::UnboundedSender<notify::Result<Event>>,
        stop: mpsc::Sender<()>,
        lines: tokio::io::Lines<BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>>,
        task: tokio::task::JoinHandle<()>,
        // Keeps the server write half open after the router task exits, so
        // reads distinguish "nothing written" (timeout) from EOF.
        _sender: CommandSender,
    }

    fn spawn_router(root: &str, subpaths: &[&str]) -> RouterFixture {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let entry = Arc::new(ReplicaEntry::new(PathBuf::from(root), None, stop_tx.clone()));
        for bp in subpaths {
            entry.register_path(bp);
        }

        let waiting = Arc::new(SyncSet::new());
        let reported = Arc::new(SyncSet::new());
        let (client, server) = tokio::io::duplex(1024);
        let (client_read, _client_write) = tokio::io::split(client);
        let (_server_read, server_write) = tokio::io::split(server);
        let sender = CommandSender::new(server_write, Arc::new(AtomicBool::new(false)));
        let (shutdown_tx, _) = broadcast::channel(1);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(router_task(
            "rep".to_string(),
            entry.clone(),
            waiting.clone(),
            reported.clone(),
            sender.clone(),
            shutdown_tx,
            event_rx,
            stop_rx,
        ));

        RouterFixture {
            entry,
            waiting,
            reported,
            events: event_tx,
            stop: stop_tx,
            lines: BufReader::new(client_read).lines(),
            task,
            _sender: sender,
        }
    }

    fn create_event(path: &str) -> notify::Result<Event> {
        Ok(Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from(path)))
    }

    #[tokio::test]
    async fn router_accumulates_matching_changes() {
        let mut fixture = spawn_router("/r", &["foo", "bar"]);

        fixture.events.send(create_event("/r/foo/x.txt")).expect("send");
        fixture.events.send(create_event("/r/foo/x.txt")).expect("send");
        fixture.events.send(create_event("/r/baz/y.txt")).expect("send");
        fixture.events.send(create_event("/r/bar/z.txt")).expect("send");

        for _ in 0..100 {
            if fixture.entry.changes().size() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        fixture.stop.send(()).await.expect("stop");
        timeout(Duration::from_secs(5), fixture.task)
            .await
            .expect("router exits")
            .expect("router task");

        let mut changes = fixture.entry.changes().to_vec();
        changes.sort();
        assert_eq!(changes, vec!["bar/z.txt".to_string(), "foo/x.txt".to_string()]);
    }

    #[tokio::test]
    async fn waiting_replica_is_notified_exactly_once() {
        let mut fixture = spawn_router("/r", &["foo"]);
        fixture.waiting.add(["rep"]);

        fixture.events.send(create_event("/r/foo/a.txt")).expect("send");
        let line = timeout(Duration::from_secs(5), fixture.lines.next_line())
            .await
            .expect("notification arrives")
            .expect("read");
        assert_eq!(line, Some("CHANGES rep".to_string()));
        assert!(fixture.reported.contains("rep"));

        // A second matching event must not re-notify.
        fixture
            .events
            .send(Ok(Event::new(EventKind::Modify(ModifyKind::Any))
                .add_path(PathBuf::from("/r/foo/b.txt"))))
            .expect("send");
        for _ in 0..100 {
            if fixture.entry.changes().size() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fixture.entry.changes().size(), 2);

        // Only the single CHANGES line was ever written.
        let trailing = timeout(Duration::from_millis(100), fixture.lines.next_line()).await;
        assert!(trailing.is_err(), "no second notification expected");

        fixture.stop.send(()).await.expect("stop");
        timeout(Duration::from_secs(5), fixture.task)
            .await
            .expect("router exits")
            .expect("router task");
    }

    #[tokio::test]
    async fn non_waiting_replica_is_not_notified() {
        let mut fixture = spawn_router("/r", &["foo"]);

        fixture.events.send(create_event("/r/foo/a.txt")).expect("send");
        for _ in 0..100 {
            if !fixture.entry.changes().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        fixture.stop.send(()).await.expect("stop");
        timeout(Duration::from_secs(5), fixture.task)
            .await
            .expect("router exits")
            .expect("router task");

        assert!(fixture.entry.changes().contains("foo/a.txt"));
        assert!(fixture.reported.is_empty());
        let trailing = timeout(Duration::from_millis(100), fixture.lines.next_line()).await;
        assert!(trailing.is_err(), "no notification expected");
    }

    #[tokio::test]
    async fn router_exits_when_event_source_closes() {
        let fixture = spawn_router("/r", &["foo"]);
        drop(fixture.events);
        timeout(Duration::from_secs(5), fixture.task)
            .await
            .expect("router exits")
            .expect("router task");
    }
}
