//! Coalescing layer over the raw platform event stream.
//!
//! Editors, compilers and sync tools emit storms of raw events for a
//! single logical change. The debouncer keeps at most one pending event
//! per path, merges newcomers into it, and only emits once the path has
//! been quiet for [`QUIESCENT_PERIOD`]. A Delete of a directory
//! supersedes everything pending below it.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{
    select,
    sync::{mpsc, watch},
    time::{self, Instant, MissedTickBehavior},
};
use tracing::trace;

use crate::{platform, EventKind, RawEvent, EVENT_CHANNEL_CAPACITY};

/// How long a path must stay event-free before its pending event is
/// emitted.
pub const QUIESCENT_PERIOD: Duration = Duration::from_secs(10);

/// How often pending events are checked for quiescence. Bounds the
/// emission latency jitter; must not exceed [`QUIESCENT_PERIOD`].
pub const TICK_INTERVAL: Duration = Duration::from_secs(4);

/// A coalesced filesystem event, emitted at most once per path per
/// debounce window.
#[derive(Debug, Clone)]
pub struct Event {
    pub path: PathBuf,
    pub kind: EventKind,
    pub last_modified_at: Instant,
}

type Pending = Arc<Mutex<HashMap<PathBuf, RawEvent>>>;

/// Consumes a raw event stream and emits coalesced [`Event`]s.
///
/// Two internal tasks run until `close` is called or the `Debouncer` is
/// dropped: a receiver folding raw events into the pending map, and a
/// ticker flushing quiescent entries.
pub struct Debouncer {
    events: Option<mpsc::Receiver<Event>>,
    // Dropping the sender signals both tasks to exit.
    shutdown: Option<watch::Sender<()>>,
}

impl Debouncer {
    pub fn new(raw_events: mpsc::Receiver<RawEvent>) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(());
        let (sender, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(receive_events(
            raw_events,
            pending.clone(),
            shutdown_rx.clone(),
        ));
        tokio::spawn(send_due_events(sender, pending, shutdown_rx));

        Self {
            events: Some(receiver),
            shutdown: Some(shutdown),
        }
    }

    /// Take the receiving half of the coalesced event channel. Yields
    /// `Some` exactly once.
    pub fn events(&mut self) -> Option<mpsc::Receiver<Event>> {
        self.events.take()
    }

    /// Signal both internal tasks to exit. Idempotent.
    pub fn close(&mut self) {
        self.shutdown.take();
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.close();
    }
}

async fn receive_events(
    mut raw_events: mpsc::Receiver<RawEvent>,
    pending: Pending,
    mut shutdown: watch::Receiver<()>,
) {
    loop {
        select! {
            _ = shutdown.changed() => return,
            event = raw_events.recv() => {
                let Some(event) = event else { return };
                trace!("raw event {:?} for {}", event.kind(), event.path.display());
                apply(&mut pending.lock().expect("lock poisoned"), event);
            }
        }
    }
}

async fn send_due_events(
    sender: mpsc::Sender<Event>,
    pending: Pending,
    mut shutdown: watch::Receiver<()>,
) {
    let mut tick = time::interval(TICK_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        select! {
            _ = shutdown.changed() => return,
            _ = tick.tick() => {
                // Collect under the lock, send after releasing it.
                let due: Vec<RawEvent> = {
                    let mut pending = pending.lock().expect("lock poisoned");
                    let now = Instant::now();
                    let paths: Vec<PathBuf> = pending
                        .iter()
                        .filter(|(_, event)| event.last_modified_at + QUIESCENT_PERIOD <= now)
                        .map(|(path, _)| path.clone())
                        .collect();
                    paths.iter().filter_map(|path| pending.remove(path)).collect()
                };
                for event in due {
                    if sender.send(coalesced(event)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Fold a raw event into the pending map, keeping at most one entry per
/// path.
fn apply(pending: &mut HashMap<PathBuf, RawEvent>, event: RawEvent) {
    if event.kind() == EventKind::Delete {
        // Everything pending at or below a deleted path is superseded
        // by the delete itself.
        pending.retain(|path, _| !path.starts_with(&event.path));
    }
    let merged = match pending.remove(&event.path) {
        Some(old) => debounce(&old, &event),
        None => event,
    };
    pending.insert(merged.path.clone(), merged);
}

/// Merge a newly arrived raw event into the pending event for the same
/// path. Pure function; the only rewrites are on a pending Delete:
/// delete-then-create is a net content change (editor safe-save), and
/// delete-then-change is a re-creation reported as a change by some
/// filesystems.
fn debounce(old: &RawEvent, new: &RawEvent) -> RawEvent {
    let mut merged = old.clone();
    match new.kind() {
        EventKind::Unknown => {}
        EventKind::Create => {
            merged.mask = if old.kind() == EventKind::Delete {
                platform::KIND_CHANGE_MASK
            } else {
                new.mask
            };
        }
        EventKind::Delete => merged.mask = new.mask,
        EventKind::Change => {
            if old.kind() == EventKind::Delete {
                merged.mask = platform::KIND_CREATE_MASK;
            }
        }
    }
    merged.last_modified_at = new.created_at;
    merged
}

fn coalesced(event: RawEvent) -> Event {
    // The external kind set is closed; a mask that never resolved to a
    // recognized kind is reported as a change.
    let kind = match event.kind() {
        EventKind::Unknown => EventKind::Change,
        kind => kind,
    };
    Event {
        path: event.path,
        kind,
        last_modified_at: event.last_modified_at,
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, path::Path, time::Duration};

    use tokio::{
        sync::mpsc,
        time::{self, Instant},
    };

    use super::{apply, coalesced, debounce, Debouncer, Event};
    use crate::{platform, EventKind, RawEvent};

    fn mask_for(kind: EventKind) -> u64 {
        match kind {
            EventKind::Create => platform::KIND_CREATE_MASK,
            EventKind::Delete => platform::KIND_DELETE_MASK,
            EventKind::Change => platform::KIND_CHANGE_MASK,
            EventKind::Unknown => 0,
        }
    }

    fn raw(path: &str, kind: EventKind) -> RawEvent {
        let at = Instant::now();
        RawEvent {
            path: path.into(),
            mask: mask_for(kind),
            created_at: at,
            last_modified_at: at,
        }
    }

    fn debouncer() -> (mpsc::Sender<RawEvent>, Debouncer, mpsc::Receiver<Event>) {
        let (sender, receiver) = mpsc::channel(16);
        let mut debouncer = Debouncer::new(receiver);
        let events = debouncer.events().expect("events not yet taken");
        (sender, debouncer, events)
    }

    #[tokio::test]
    async fn debounce_table_is_total_and_deterministic() {
        use EventKind::{Change, Create, Delete, Unknown};

        let cases = [
            ((Create, Create), Create),
            ((Create, Delete), Delete),
            ((Create, Change), Create),
            ((Create, Unknown), Create),
            ((Delete, Create), Change),
            ((Delete, Delete), Delete),
            ((Delete, Change), Create),
            ((Delete, Unknown), Delete),
            ((Change, Create), Create),
            ((Change, Delete), Delete),
            ((Change, Change), Change),
            ((Change, Unknown), Change),
        ];
        for ((old_kind, new_kind), expected) in cases {
            let old = raw("/a/x", old_kind);
            time::sleep(Duration::from_millis(1)).await;
            let new = raw("/a/x", new_kind);

            let merged = debounce(&old, &new);
            assert_eq!(
                merged.kind(),
                expected,
                "debounce({old_kind:?}, {new_kind:?})"
            );
            // Every cell keeps the original arrival time and bumps the
            // activity timestamp.
            assert_eq!(merged.created_at, old.created_at);
            assert_eq!(merged.last_modified_at, new.created_at);

            let again = debounce(&old, &new);
            assert_eq!(again.mask, merged.mask);
            assert_eq!(again.last_modified_at, merged.last_modified_at);
        }
    }

    #[tokio::test]
    async fn pending_map_holds_one_entry_per_path() {
        let mut pending = HashMap::new();
        apply(&mut pending, raw("/a/x", EventKind::Create));
        apply(&mut pending, raw("/a/x", EventKind::Change));
        apply(&mut pending, raw("/a/x", EventKind::Change));
        apply(&mut pending, raw("/a/y", EventKind::Change));

        assert_eq!(pending.len(), 2);
        assert_eq!(pending[Path::new("/a/x")].kind(), EventKind::Create);
    }

    #[tokio::test]
    async fn directory_delete_purges_descendants() {
        let mut pending = HashMap::new();
        apply(&mut pending, raw("/a/b/c.txt", EventKind::Change));
        apply(&mut pending, raw("/a/b/d/e.txt", EventKind::Create));
        apply(&mut pending, raw("/a/x", EventKind::Change));
        apply(&mut pending, raw("/a/b", EventKind::Delete));

        assert_eq!(pending.len(), 2);
        assert_eq!(pending[Path::new("/a/b")].kind(), EventKind::Delete);
        assert_eq!(pending[Path::new("/a/x")].kind(), EventKind::Change);
    }

    #[tokio::test]
    async fn sibling_with_common_prefix_survives_delete() {
        let mut pending = HashMap::new();
        apply(&mut pending, raw("/a/bc/file", EventKind::Change));
        apply(&mut pending, raw("/a/b", EventKind::Delete));

        assert!(pending.contains_key(Path::new("/a/bc/file")));
    }

    #[tokio::test]
    async fn unknown_only_entry_coalesces_to_change() {
        let event = coalesced(raw("/a/x", EventKind::Unknown));
        assert_eq!(event.kind, EventKind::Change);
    }

    #[tokio::test(start_paused = true)]
    async fn create_then_delete_emits_delete() {
        let (sender, _debouncer, mut events) = debouncer();
        sender.send(raw("/a/x.txt", EventKind::Create)).await.unwrap();
        time::sleep(Duration::from_millis(100)).await;
        sender.send(raw("/a/x.txt", EventKind::Delete)).await.unwrap();

        time::sleep(Duration::from_secs(15)).await;
        let event = events.recv().await.expect("one coalesced event");
        assert_eq!(event.path, Path::new("/a/x.txt"));
        assert_eq!(event.kind, EventKind::Delete);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn create_then_change_emits_create() {
        let (sender, _debouncer, mut events) = debouncer();
        sender.send(raw("/a/x.txt", EventKind::Create)).await.unwrap();
        time::sleep(Duration::from_millis(100)).await;
        sender.send(raw("/a/x.txt", EventKind::Change)).await.unwrap();

        time::sleep(Duration::from_secs(15)).await;
        let event = events.recv().await.expect("one coalesced event");
        assert_eq!(event.kind, EventKind::Create);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_then_create_emits_change() {
        let (sender, _debouncer, mut events) = debouncer();
        sender.send(raw("/a/x.txt", EventKind::Delete)).await.unwrap();
        time::sleep(Duration::from_millis(100)).await;
        sender.send(raw("/a/x.txt", EventKind::Create)).await.unwrap();

        time::sleep(Duration::from_secs(15)).await;
        let event = events.recv().await.expect("one coalesced event");
        assert_eq!(event.kind, EventKind::Change);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_then_change_emits_create() {
        let (sender, _debouncer, mut events) = debouncer();
        sender.send(raw("/a/x.txt", EventKind::Delete)).await.unwrap();
        time::sleep(Duration::from_millis(100)).await;
        sender.send(raw("/a/x.txt", EventKind::Change)).await.unwrap();

        time::sleep(Duration::from_secs(15)).await;
        let event = events.recv().await.expect("one coalesced event");
        assert_eq!(event.kind, EventKind::Create);
        assert!(events.try_recv().is_err());
    }

    // Editor safe-save: delete, recreate, write. One CHANGE comes out.
    #[tokio::test(start_paused = true)]
    async fn safe_save_sequence_emits_single_change() {
        let (sender, _debouncer, mut events) = debouncer();
        sender.send(raw("/a/x.txt", EventKind::Delete)).await.unwrap();
        time::sleep(Duration::from_millis(100)).await;
        sender.send(raw("/a/x.txt", EventKind::Create)).await.unwrap();
        time::sleep(Duration::from_millis(200)).await;
        sender.send(raw("/a/x.txt", EventKind::Change)).await.unwrap();

        time::sleep(Duration::from_secs(15)).await;
        let event = events.recv().await.expect("one coalesced event");
        assert_eq!(event.path, Path::new("/a/x.txt"));
        assert_eq!(event.kind, EventKind::Change);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn directory_removal_supersedes_pending_child() {
        let (sender, _debouncer, mut events) = debouncer();
        sender.send(raw("/a/b/c.txt", EventKind::Change)).await.unwrap();
        time::sleep(Duration::from_secs(1)).await;
        sender.send(raw("/a/b", EventKind::Delete)).await.unwrap();

        time::sleep(Duration::from_secs(15)).await;
        let event = events.recv().await.expect("one coalesced event");
        assert_eq!(event.path, Path::new("/a/b"));
        assert_eq!(event.kind, EventKind::Delete);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_change_flushes_only_after_quiescence() {
        let (sender, _debouncer, mut events) = debouncer();
        sender.send(raw("/a/y", EventKind::Change)).await.unwrap();

        time::sleep(Duration::from_secs(8)).await;
        assert!(events.try_recv().is_err());

        time::sleep(Duration::from_secs(6)).await;
        let event = events.recv().await.expect("flushed after quiescence");
        assert_eq!(event.path, Path::new("/a/y"));
        assert_eq!(event.kind, EventKind::Change);
    }

    #[tokio::test(start_paused = true)]
    async fn renewed_activity_restarts_the_quiescence_window() {
        let (sender, _debouncer, mut events) = debouncer();
        sender.send(raw("/a/y", EventKind::Change)).await.unwrap();
        time::sleep(Duration::from_secs(8)).await;
        sender.send(raw("/a/y", EventKind::Change)).await.unwrap();

        time::sleep(Duration::from_secs(8)).await;
        assert!(events.try_recv().is_err());

        time::sleep(Duration::from_secs(8)).await;
        let event = events.recv().await.expect("flushed after second window");
        assert_eq!(event.kind, EventKind::Change);
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_emission() {
        let (sender, mut debouncer, mut events) = debouncer();
        sender.send(raw("/a/x", EventKind::Change)).await.unwrap();
        debouncer.close();

        assert!(events.recv().await.is_none());
    }
}
