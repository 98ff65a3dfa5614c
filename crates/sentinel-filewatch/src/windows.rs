//! Directory-change watcher backend for Windows, built on notify's
//! `ReadDirectoryChangesW` wrapper with one recursive subscription per
//! root.

use std::{io, path::Path};

use notify::{
    event::{ModifyKind, RenameMode},
    Config, EventKind as NotifyEventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use tokio::sync::mpsc;
use tracing::warn;

use crate::{watches::WatchSet, AddWatchError, EventKind, InitError, RawEvent};

// Windows has no kernel bitfield that survives notify's translation,
// so the operation is re-encoded into a synthetic mask.
const MASK_CREATE: u64 = 1 << 0;
const MASK_REMOVE: u64 = 1 << 1;
const MASK_WRITE: u64 = 1 << 2;
const MASK_CHMOD: u64 = 1 << 3;
const MASK_RENAME_FROM: u64 = 1 << 4;
const MASK_RENAME_TO: u64 = 1 << 5;

pub(crate) const KIND_CREATE_MASK: u64 = MASK_CREATE;
pub(crate) const KIND_DELETE_MASK: u64 = MASK_REMOVE;
pub(crate) const KIND_CHANGE_MASK: u64 = MASK_WRITE;

pub(crate) fn classify(mask: u64) -> EventKind {
    if mask & (MASK_CREATE | MASK_RENAME_TO) != 0 {
        EventKind::Create
    } else if mask & (MASK_REMOVE | MASK_RENAME_FROM) != 0 {
        EventKind::Delete
    } else if mask & (MASK_WRITE | MASK_CHMOD) != 0 {
        EventKind::Change
    } else {
        EventKind::Unknown
    }
}

fn mask_for(kind: &NotifyEventKind, position: usize) -> u64 {
    match kind {
        NotifyEventKind::Create(_) => MASK_CREATE,
        NotifyEventKind::Remove(_) => MASK_REMOVE,
        NotifyEventKind::Modify(ModifyKind::Name(RenameMode::From)) => MASK_RENAME_FROM,
        NotifyEventKind::Modify(ModifyKind::Name(RenameMode::To)) => MASK_RENAME_TO,
        // A combined rename event carries the source first and the
        // destination second.
        NotifyEventKind::Modify(ModifyKind::Name(RenameMode::Both)) if position == 0 => {
            MASK_RENAME_FROM
        }
        NotifyEventKind::Modify(ModifyKind::Name(RenameMode::Both)) => MASK_RENAME_TO,
        NotifyEventKind::Modify(ModifyKind::Name(_)) => MASK_RENAME_FROM,
        NotifyEventKind::Modify(ModifyKind::Metadata(_)) => MASK_CHMOD,
        NotifyEventKind::Modify(_) => MASK_WRITE,
        _ => 0,
    }
}

pub(crate) struct DirChangeWatcher {
    watcher: Option<RecommendedWatcher>,
    watches: WatchSet,
}

impl DirChangeWatcher {
    pub(crate) fn new(sender: mpsc::Sender<RawEvent>) -> Result<Self, InitError> {
        let watcher = RecommendedWatcher::new(
            move |result: Result<notify::Event, notify::Error>| match result {
                Ok(event) => {
                    for (position, path) in event.paths.iter().enumerate() {
                        let mask = mask_for(&event.kind, position);
                        if sender
                            .blocking_send(RawEvent::now(path.clone(), mask))
                            .is_err()
                        {
                            return;
                        }
                    }
                }
                Err(err) => warn!("filewatching backend error: {err}"),
            },
            Config::default(),
        )?;
        Ok(Self {
            watcher: Some(watcher),
            watches: WatchSet::default(),
        })
    }

    pub(crate) fn add_recursive_watch(&mut self, path: &Path) -> Result<(), AddWatchError> {
        let root = WatchSet::canonicalize(path)?;
        self.watches.insert(root.clone())?;
        let Some(watcher) = self.watcher.as_mut() else {
            self.watches.remove(&root);
            return Err(AddWatchError::Register(
                root,
                io::Error::from(io::ErrorKind::NotConnected),
            ));
        };
        if let Err(err) = watcher.watch(&root, RecursiveMode::Recursive) {
            self.watches.remove(&root);
            return Err(AddWatchError::Notify(err));
        }
        Ok(())
    }

    pub(crate) fn close(&mut self) {
        // Dropping the backend stops its worker threads and releases
        // its event sender, which closes the raw channel.
        self.watcher.take();
    }
}
