//! FSEvents-based watcher backend for macOS.
//!
//! One stream per watch root, created relative to the root's device so
//! paths on non-root volumes resolve correctly, with `WatchRoot` and
//! file-granularity events. Each stream runs its own CFRunLoop thread;
//! the callback translates per-file flag words into raw events.

#![allow(non_upper_case_globals)]

use std::{
    ffi::{CStr, CString},
    io,
    os::unix::prelude::MetadataExt,
    path::{Path, PathBuf},
    ptr,
    sync::mpsc as std_mpsc,
    thread,
};

use bitflags::bitflags;
use fsevent_sys as fs;
use fsevent_sys::core_foundation as cf;
use tokio::sync::mpsc;

use crate::{watches::WatchSet, AddWatchError, EventKind, InitError, RawEvent};

bitflags! {
    #[repr(C)]
    struct StreamFlags: u32 {
        const ITEM_CREATED = fs::kFSEventStreamEventFlagItemCreated;
        const ITEM_REMOVED = fs::kFSEventStreamEventFlagItemRemoved;
        const ITEM_RENAMED = fs::kFSEventStreamEventFlagItemRenamed;
        const ITEM_MODIFIED = fs::kFSEventStreamEventFlagItemModified;
        const ITEM_CHANGE_OWNER = fs::kFSEventStreamEventFlagItemChangeOwner;
        const INODE_META_MOD = fs::kFSEventStreamEventFlagItemInodeMetaMod;
    }
}

pub(crate) const KIND_CREATE_MASK: u64 = fs::kFSEventStreamEventFlagItemCreated as u64;
pub(crate) const KIND_DELETE_MASK: u64 = fs::kFSEventStreamEventFlagItemRemoved as u64;
pub(crate) const KIND_CHANGE_MASK: u64 = fs::kFSEventStreamEventFlagItemModified as u64;

/// FSEvents provides no old/new association for renames, so a renamed
/// item is treated as deleted; the destination raises its own event.
pub(crate) fn classify(mask: u64) -> EventKind {
    let flags = StreamFlags::from_bits_truncate(mask as u32);
    if flags.contains(StreamFlags::ITEM_CREATED) {
        EventKind::Create
    } else if flags.intersects(StreamFlags::ITEM_REMOVED | StreamFlags::ITEM_RENAMED) {
        EventKind::Delete
    } else if flags.intersects(
        StreamFlags::ITEM_MODIFIED | StreamFlags::ITEM_CHANGE_OWNER | StreamFlags::INODE_META_MOD,
    ) {
        EventKind::Change
    } else {
        EventKind::Unknown
    }
}

const STREAM_LATENCY: cf::CFTimeInterval = 0.1;

// CoreFoundation false value
const FALSE: cf::Boolean = 0x0;

extern "C" {
    /// Indicates whether the run loop is waiting for an event.
    fn CFRunLoopIsWaiting(runloop: cf::CFRunLoopRef) -> cf::Boolean;
}

/// Device information and path transformation for a single stream.
///
/// FSEvents streams created relative to a device report device-relative
/// paths; registration strips the mount point prefix and the callback
/// joins it back on. The two conversions must stay symmetric.
#[derive(Debug, Clone)]
struct DeviceContext {
    /// The device ID from `stat.st_dev`.
    device_id: i32,
    /// The effective mount point of the device (e.g. "/Volumes/Data").
    mount_point: PathBuf,
}

impl DeviceContext {
    fn new(path: &Path) -> io::Result<Self> {
        let metadata = std::fs::symlink_metadata(path)?;
        let mount_point = get_mount_point(path)?;
        Ok(Self {
            device_id: metadata.dev() as i32,
            mount_point,
        })
    }

    fn to_device_relative(&self, absolute: &Path) -> io::Result<String> {
        let relative = absolute.strip_prefix(&self.mount_point).map_err(|_| {
            io::Error::other(format!(
                "path {} is not under device mount point {}",
                absolute.display(),
                self.mount_point.display()
            ))
        })?;
        let relative = relative
            .to_str()
            .ok_or_else(|| io::Error::other("path contains invalid UTF-8"))?;
        Ok(format!("/{relative}"))
    }

    fn to_absolute(&self, device_relative: &str) -> PathBuf {
        self.mount_point
            .join(device_relative.trim_start_matches('/'))
    }
}

/// Get the effective mount point for path manipulation purposes.
///
/// On APFS the reported mount point may be virtualized via firmlinks
/// (e.g. `/private/var` reports `/System/Volumes/Data`); when it is not
/// a prefix of the path, `/` is the effective mount point.
fn get_mount_point(path: &Path) -> io::Result<PathBuf> {
    let c_path = CString::new(
        path.to_str()
            .ok_or_else(|| io::Error::other("path contains invalid UTF-8"))?,
    )
    .map_err(|_| io::Error::other("path contains null byte"))?;

    let mut stat: libc::statfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statfs(c_path.as_ptr(), &mut stat) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let mount_point = unsafe {
        CStr::from_ptr(stat.f_mntonname.as_ptr())
            .to_str()
            .map_err(|_| io::Error::other("mount point contains invalid UTF-8"))?
    };
    if !path.starts_with(mount_point) {
        return Ok(PathBuf::from("/"));
    }
    Ok(PathBuf::from(mount_point))
}

struct StreamContext {
    sender: mpsc::Sender<RawEvent>,
    device: DeviceContext,
}

// Free the context when the stream created by `FSEventStreamCreate` is
// released.
extern "C" fn release_context(info: *const libc::c_void) {
    // SAFETY: `release` is only called when the stream is deallocated,
    // so the box can be reclaimed exactly once.
    unsafe {
        drop(Box::from_raw(
            info as *const StreamContext as *mut StreamContext,
        ));
    }
}

extern "C" fn callback(
    _stream_ref: fs::FSEventStreamRef,
    info: *mut libc::c_void,
    num_events: libc::size_t,
    event_paths: *mut libc::c_void,
    event_flags: *const fs::FSEventStreamEventFlags,
    _event_ids: *const fs::FSEventStreamEventId,
) {
    let event_paths = event_paths as *const *const libc::c_char;
    // SAFETY: `info` is the StreamContext installed at stream creation;
    // it outlives the stream.
    let context = unsafe { &*(info as *const StreamContext) };

    for idx in 0..num_events {
        // Must not panic across the FFI boundary; events with non-UTF8
        // paths are skipped.
        let raw_path = match unsafe { CStr::from_ptr(*event_paths.add(idx)) }.to_str() {
            Ok(path) => path,
            Err(_) => continue,
        };
        let path = context.device.to_absolute(raw_path);
        let flags = unsafe { *event_flags.add(idx) };
        if context
            .sender
            .blocking_send(RawEvent::now(path, flags as u64))
            .is_err()
        {
            return;
        }
    }
}

struct RootStream {
    runloop: cf::CFRunLoopRef,
    thread: thread::JoinHandle<()>,
}

// CFRef types may be moved across threads per the CoreFoundation
// thread-safety rules; the runloop ref is only used to stop the loop.
unsafe impl Send for RootStream {}

pub(crate) struct FsEventWatcher {
    sender: mpsc::Sender<RawEvent>,
    watches: WatchSet,
    streams: Vec<RootStream>,
}

impl FsEventWatcher {
    pub(crate) fn new(sender: mpsc::Sender<RawEvent>) -> Result<Self, InitError> {
        Ok(Self {
            sender,
            watches: WatchSet::default(),
            streams: Vec::new(),
        })
    }

    pub(crate) fn add_recursive_watch(&mut self, path: &Path) -> Result<(), AddWatchError> {
        let root = WatchSet::canonicalize(path)?;
        self.watches.insert(root.clone())?;
        match spawn_stream(&root, self.sender.clone()) {
            Ok(stream) => {
                self.streams.push(stream);
                Ok(())
            }
            Err(err) => {
                self.watches.remove(&root);
                Err(AddWatchError::Register(root, err))
            }
        }
    }

    pub(crate) fn close(&mut self) {
        for stream in self.streams.drain(..) {
            unsafe {
                while CFRunLoopIsWaiting(stream.runloop) == FALSE {
                    thread::yield_now();
                }
                cf::CFRunLoopStop(stream.runloop);
            }
            let _ = stream.thread.join();
        }
    }
}

fn spawn_stream(root: &Path, sender: mpsc::Sender<RawEvent>) -> io::Result<RootStream> {
    let device = DeviceContext::new(root)?;
    let relative = device.to_device_relative(root)?;

    let context = Box::into_raw(Box::new(StreamContext { sender, device }));
    let stream_context = fs::FSEventStreamContext {
        version: 0,
        info: context as *mut libc::c_void,
        retain: None,
        release: Some(release_context),
        copy_description: None,
    };

    let stream = unsafe {
        let mut err: cf::CFErrorRef = ptr::null_mut();
        let cf_path = cf::str_path_to_cfstring_ref(&relative, &mut err);
        if cf_path.is_null() {
            cf::CFRelease(err as cf::CFRef);
            // Reclaim the context; the stream never took ownership.
            drop(Box::from_raw(context));
            return Err(io::Error::other("failed to convert path to CFString"));
        }
        let paths = cf::CFArrayCreateMutable(cf::kCFAllocatorDefault, 0, &cf::kCFTypeArrayCallBacks);
        cf::CFArrayAppendValue(paths, cf_path);
        cf::CFRelease(cf_path);

        let device_context = &*(context as *const StreamContext);
        let stream = fs::FSEventStreamCreateRelativeToDevice(
            cf::kCFAllocatorDefault,
            callback,
            &stream_context,
            device_context.device.device_id,
            paths,
            fs::kFSEventStreamEventIdSinceNow,
            STREAM_LATENCY,
            fs::kFSEventStreamCreateFlagFileEvents
                | fs::kFSEventStreamCreateFlagNoDefer
                | fs::kFSEventStreamCreateFlagWatchRoot,
        );
        // The stream copies the path array.
        cf::CFRelease(paths as cf::CFRef);
        stream
    };

    // Wrapper to move CFRef types onto the runloop thread.
    struct CFSendWrapper(cf::CFRef);
    // SAFETY: CFRefs may be moved across threads.
    unsafe impl Send for CFSendWrapper {}

    let stream = CFSendWrapper(stream);
    let (runloop_tx, runloop_rx) = std_mpsc::channel();

    let thread = thread::Builder::new()
        .name("sentinel-fsevents".to_string())
        .spawn(move || {
            let stream = stream.0;
            unsafe {
                let runloop = cf::CFRunLoopGetCurrent();
                fs::FSEventStreamScheduleWithRunLoop(stream, runloop, cf::kCFRunLoopDefaultMode);
                if fs::FSEventStreamStart(stream) == FALSE {
                    fs::FSEventStreamInvalidate(stream);
                    fs::FSEventStreamRelease(stream);
                    return;
                }
                // The CFRunLoopRun call is terminated by CFRunLoopStop
                // in close().
                let _ = runloop_tx.send(CFSendWrapper(runloop));
                cf::CFRunLoopRun();
                fs::FSEventStreamStop(stream);
                fs::FSEventStreamInvalidate(stream);
                fs::FSEventStreamRelease(stream);
            }
        })?;

    let runloop = runloop_rx
        .recv()
        .map_err(|_| io::Error::other("event stream failed to start"))?;

    Ok(RootStream {
        runloop: runloop.0,
        thread,
    })
}
