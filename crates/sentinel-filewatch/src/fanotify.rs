//! fanotify-based watcher backend for Linux.
//!
//! The fanotify fd is initialized with `FAN_REPORT_DFID_NAME`, so every
//! event record carries the parent directory's file handle plus the
//! affected filename. The handle is opened against a mount fd rooted at
//! `/` and resolved back to a path through `/proc/self/fd`. Marks are
//! filesystem-wide, so resolved paths are filtered against the watch
//! set before they reach the channel.

use std::{
    ffi::{CString, OsStr},
    io, mem,
    os::{fd::RawFd, unix::ffi::OsStrExt},
    path::{Path, PathBuf},
    ptr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
};

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::{watches::WatchSet, AddWatchError, EventKind, InitError, RawEvent};

const INIT_FLAGS: libc::c_uint =
    libc::FAN_CLOEXEC | libc::FAN_REPORT_DFID_NAME | libc::FAN_UNLIMITED_QUEUE;
const INIT_EVENT_FLAGS: libc::c_uint =
    (libc::O_CLOEXEC | libc::O_RDONLY | libc::O_LARGEFILE) as libc::c_uint;
const MARK_ADD_FLAGS: libc::c_uint = libc::FAN_MARK_ADD | libc::FAN_MARK_FILESYSTEM;
const MARK_FLUSH_FLAGS: libc::c_uint = libc::FAN_MARK_FLUSH | libc::FAN_MARK_FILESYSTEM;
const MARK_EVENT_MASK: u64 = libc::FAN_MODIFY
    | libc::FAN_CREATE
    | libc::FAN_DELETE
    | libc::FAN_MOVE
    | libc::FAN_ATTRIB
    | libc::FAN_ONDIR;

/// 4 KiB holds every record the kernel currently produces; malformed or
/// short records resynchronize on `event_len`.
const EVENT_BUF_LEN: usize = 4096;

pub(crate) const KIND_CREATE_MASK: u64 = libc::FAN_CREATE;
pub(crate) const KIND_DELETE_MASK: u64 = libc::FAN_DELETE;
pub(crate) const KIND_CHANGE_MASK: u64 = libc::FAN_MODIFY;

pub(crate) fn classify(mask: u64) -> EventKind {
    if mask & (libc::FAN_CREATE | libc::FAN_MOVED_TO) != 0 {
        EventKind::Create
    } else if mask & (libc::FAN_DELETE | libc::FAN_MOVED_FROM) != 0 {
        EventKind::Delete
    } else if mask & (libc::FAN_MODIFY | libc::FAN_ATTRIB) != 0 {
        EventKind::Change
    } else {
        EventKind::Unknown
    }
}

// The info record trailing each metadata struct. libc does not export
// the DFID_NAME layout, so it is declared here.
#[repr(C)]
#[derive(Clone, Copy)]
struct EventInfoHeader {
    info_type: u8,
    pad: u8,
    len: u16,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct EventInfoFid {
    header: EventInfoHeader,
    fsid: [i32; 2],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct FileHandleHeader {
    handle_bytes: u32,
    handle_type: i32,
}

pub(crate) struct FanotifyWatcher {
    fd: RawFd,
    mount_fd: RawFd,
    watches: Arc<Mutex<WatchSet>>,
    closed: Arc<AtomicBool>,
}

impl FanotifyWatcher {
    pub(crate) fn new(sender: mpsc::Sender<RawEvent>) -> Result<Self, InitError> {
        // SAFETY: plain syscalls; both descriptors are owned by the
        // returned watcher and closed exactly once in `close`.
        let fd = unsafe { libc::fanotify_init(INIT_FLAGS, INIT_EVENT_FLAGS) };
        if fd < 0 {
            return Err(InitError::Backend(io::Error::last_os_error()));
        }
        let mount_fd = unsafe { libc::open(c"/".as_ptr(), libc::O_DIRECTORY | libc::O_RDONLY) };
        if mount_fd < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(InitError::Backend(err));
        }

        let watches = Arc::new(Mutex::new(WatchSet::default()));
        let closed = Arc::new(AtomicBool::new(false));

        let spawned = thread::Builder::new().name("sentinel-fanotify".to_string()).spawn({
            let watches = watches.clone();
            let closed = closed.clone();
            move || read_events(fd, mount_fd, watches, closed, sender)
        });
        if let Err(err) = spawned {
            unsafe {
                libc::close(fd);
                libc::close(mount_fd);
            }
            return Err(InitError::Backend(err));
        }

        Ok(Self {
            fd,
            mount_fd,
            watches,
            closed,
        })
    }

    pub(crate) fn add_recursive_watch(&mut self, path: &Path) -> Result<(), AddWatchError> {
        let root = WatchSet::canonicalize(path)?;
        let c_root = CString::new(root.as_os_str().as_bytes()).map_err(|_| {
            AddWatchError::Resolve(root.clone(), io::Error::from(io::ErrorKind::InvalidInput))
        })?;

        self.watches
            .lock()
            .expect("lock poisoned")
            .insert(root.clone())?;

        let rc = unsafe {
            libc::fanotify_mark(
                self.fd,
                MARK_ADD_FLAGS,
                MARK_EVENT_MASK,
                libc::AT_FDCWD,
                c_root.as_ptr(),
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            self.watches.lock().expect("lock poisoned").remove(&root);
            return Err(AddWatchError::Register(root, err));
        }
        Ok(())
    }

    pub(crate) fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        unsafe {
            libc::fanotify_mark(self.fd, MARK_FLUSH_FLAGS, 0, libc::AT_FDCWD, c"/".as_ptr());
            libc::close(self.fd);
            libc::close(self.mount_fd);
        }
    }
}

fn read_events(
    fd: RawFd,
    mount_fd: RawFd,
    watches: Arc<Mutex<WatchSet>>,
    closed: Arc<AtomicBool>,
    sender: mpsc::Sender<RawEvent>,
) {
    let meta_size = mem::size_of::<libc::fanotify_event_metadata>();
    let mut buf = [0u8; EVENT_BUF_LEN];

    loop {
        // SAFETY: the buffer outlives the call and its length is passed.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), EVENT_BUF_LEN) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            if !closed.load(Ordering::SeqCst) {
                error!("failed to read fanotify event: {err}");
            }
            return;
        }
        if n == 0 {
            return;
        }

        let buf = &buf[..n as usize];
        let mut offset = 0usize;
        while offset + meta_size <= buf.len() {
            // SAFETY: bounds checked above; read_unaligned tolerates
            // the packed record layout.
            let meta: libc::fanotify_event_metadata =
                unsafe { ptr::read_unaligned(buf.as_ptr().add(offset).cast()) };
            if meta.vers != libc::FANOTIFY_METADATA_VERSION {
                warn!("unexpected fanotify metadata version {}", meta.vers);
                return;
            }
            let event_len = meta.event_len as usize;
            let metadata_len = meta.metadata_len as usize;
            if metadata_len < meta_size || event_len < metadata_len || offset + event_len > buf.len()
            {
                warn!("malformed fanotify record, dropping remainder of read");
                break;
            }
            let next = offset + event_len;

            if let Some(path) = decode_record(mount_fd, &buf[offset + metadata_len..next]) {
                // Marks are filesystem-wide; drop anything outside the
                // watched roots. The lock is released before sending.
                let in_scope = watches.lock().expect("lock poisoned").covers(&path);
                if in_scope && sender.blocking_send(RawEvent::now(path, meta.mask)).is_err() {
                    return;
                }
            }
            offset = next;
        }
    }
}

/// Extract the affected path from a DFID_NAME info record: directory
/// file handle followed by a NUL-terminated filename.
fn decode_record(mount_fd: RawFd, info: &[u8]) -> Option<PathBuf> {
    let fid_size = mem::size_of::<EventInfoFid>();
    let fh_size = mem::size_of::<FileHandleHeader>();
    if info.len() < fid_size + fh_size {
        debug!("truncated fanotify info record ({} bytes)", info.len());
        return None;
    }

    // SAFETY: bounds checked above.
    let fid: EventInfoFid = unsafe { ptr::read_unaligned(info.as_ptr().cast()) };
    if fid.header.info_type != libc::FAN_EVENT_INFO_TYPE_DFID_NAME {
        debug!(
            "ignoring fanotify info record of type {}",
            fid.header.info_type
        );
        return None;
    }

    // SAFETY: bounds checked above.
    let handle: FileHandleHeader =
        unsafe { ptr::read_unaligned(info.as_ptr().add(fid_size).cast()) };
    let handle_len = fh_size + handle.handle_bytes as usize;
    if info.len() < fid_size + handle_len {
        debug!("fanotify file handle exceeds record bounds");
        return None;
    }

    let dir = open_handle_dir(mount_fd, &info[fid_size..fid_size + handle_len])?;

    let name = &info[fid_size + handle_len..];
    let name_len = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    let name = OsStr::from_bytes(&name[..name_len]);
    if name.is_empty() || name == OsStr::new(".") {
        Some(dir)
    } else {
        Some(dir.join(name))
    }
}

/// Open a kernel file handle against the mount fd and resolve it back
/// to a directory path.
fn open_handle_dir(mount_fd: RawFd, handle: &[u8]) -> Option<PathBuf> {
    // open_by_handle_at requires the handle at file_handle alignment;
    // the record slice only guarantees byte alignment.
    let mut aligned = vec![0u64; handle.len().div_ceil(8)];
    // SAFETY: the destination holds at least handle.len() bytes.
    unsafe {
        ptr::copy_nonoverlapping(
            handle.as_ptr(),
            aligned.as_mut_ptr().cast::<u8>(),
            handle.len(),
        );
    }

    // SAFETY: the handle buffer is well-formed per the bounds checks in
    // decode_record.
    let fd = unsafe {
        libc::open_by_handle_at(
            mount_fd,
            aligned.as_mut_ptr().cast::<libc::file_handle>(),
            libc::O_RDONLY,
        )
    };
    if fd < 0 {
        let err = io::Error::last_os_error();
        // ESTALE is routine when a whole directory is removed at once;
        // the directory's own event resolves fine and is sufficient.
        if err.raw_os_error() != Some(libc::ESTALE) {
            warn!("failed to open fanotify file handle: {err}");
        }
        return None;
    }

    let resolved = std::fs::read_link(format!("/proc/self/fd/{fd}"));
    // Close right away so event storms cannot exhaust descriptors.
    unsafe { libc::close(fd) };

    let dir = match resolved {
        Ok(dir) => dir,
        Err(err) => {
            warn!("failed to resolve fanotify file handle: {err}");
            return None;
        }
    };

    // Deleted targets keep their old path with a " (deleted)" suffix.
    match dir.to_str().and_then(|s| s.strip_suffix(" (deleted)")) {
        Some(stripped) => Some(PathBuf::from(stripped)),
        None => Some(dir),
    }
}

#[cfg(test)]
mod tests {
    use super::classify;
    use crate::EventKind;

    #[test]
    fn masks_classify_per_kind() {
        assert_eq!(classify(libc::FAN_CREATE), EventKind::Create);
        assert_eq!(classify(libc::FAN_MOVED_TO), EventKind::Create);
        assert_eq!(classify(libc::FAN_DELETE), EventKind::Delete);
        assert_eq!(classify(libc::FAN_MOVED_FROM), EventKind::Delete);
        assert_eq!(classify(libc::FAN_MODIFY), EventKind::Change);
        assert_eq!(classify(libc::FAN_ATTRIB), EventKind::Change);
        assert_eq!(classify(0), EventKind::Unknown);
        assert_eq!(classify(libc::FAN_CLOSE_WRITE), EventKind::Unknown);
    }

    #[test]
    fn create_bit_wins_over_delete_bit() {
        assert_eq!(
            classify(libc::FAN_CREATE | libc::FAN_DELETE),
            EventKind::Create
        );
    }
}
