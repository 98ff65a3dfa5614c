use std::{
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use sentinel_filewatch::{DebouncedWatcher, Event, EventKind};
use sentinel_rpc::{proto, SentinelClient, TlsFiles};
use thiserror::Error;
use tokio::{sync::mpsc, task};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::{
    baseline,
    config::Config,
    fs_object::{FsObject, MaterializeError},
};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Connect(#[from] sentinel_rpc::ConnectError),
    #[error(transparent)]
    Rpc(#[from] sentinel_rpc::RpcError),
    #[error(transparent)]
    WatcherInit(#[from] sentinel_filewatch::InitError),
    #[error(transparent)]
    WatcherAdd(#[from] sentinel_filewatch::AddWatchError),
    #[error(transparent)]
    Walk(#[from] baseline::WalkError),
    #[error("event stream closed unexpectedly")]
    EventStreamClosed,
    #[error("internal error: {0}")]
    Internal(String),
}

/// Drives the full agent lifecycle: connect, baseline or status report
/// per server instruction, then stream coalesced filesystem events
/// until shut down.
pub struct Agent {
    conf: Config,
}

impl Agent {
    pub fn new(conf: Config) -> Self {
        Self { conf }
    }

    pub async fn connect(&self) -> Result<SentinelClient, AgentError> {
        let tls = TlsFiles {
            cert_file: self.conf.cert_file.clone(),
            cert_key_file: self.conf.cert_key_file.clone(),
            ca_file: self.conf.ca_file.clone(),
        };
        Ok(SentinelClient::connect(&self.conf.host, self.conf.port, &tls).await?)
    }

    pub async fn run(&self, mut client: SentinelClient) -> Result<(), AgentError> {
        let startup = client.get_startup_info().await?;
        let roots: Vec<PathBuf> = startup.watched_paths.iter().map(PathBuf::from).collect();

        let (objects, walker) = stream_objects(roots.clone());
        if startup.create_baseline {
            info!("creating baseline for {} roots", roots.len());
            client.create_baseline(objects).await?;
        } else if startup.update_baseline {
            info!("updating baseline for {} roots", roots.len());
            client.update_baseline(objects).await?;
        } else {
            info!("reporting filesystem status for {} roots", roots.len());
            client.report_fs_status(objects).await?;
        }
        walker
            .await
            .map_err(|err| AgentError::Internal(format!("baseline walker panicked: {err}")))??;

        self.watch_fs_events(&mut client, &roots).await
    }

    async fn watch_fs_events(
        &self,
        client: &mut SentinelClient,
        roots: &[PathBuf],
    ) -> Result<(), AgentError> {
        let mut watcher = DebouncedWatcher::new()?;
        for root in roots {
            watcher.add_recursive_watch(root)?;
        }
        let mut events = watcher
            .events()
            .expect("a fresh watcher still holds its event channel");
        info!("watching {} roots for filesystem events", roots.len());

        while let Some(event) = events.recv().await {
            let Some(report) = wire_event(&event) else {
                continue;
            };
            client.report_fs_event(report).await?;
        }
        Err(AgentError::EventStreamClosed)
    }
}

/// Walk the roots on the blocking pool, feeding wire objects through a
/// bounded channel so the RPC stream stays lazy.
fn stream_objects(
    roots: Vec<PathBuf>,
) -> (
    ReceiverStream<proto::FsObject>,
    task::JoinHandle<Result<(), baseline::WalkError>>,
) {
    let (sender, receiver) = mpsc::channel(64);
    let walker = task::spawn_blocking(move || {
        for object in baseline::walk_roots(&roots) {
            // A dropped receiver means the RPC side failed; its error
            // carries the diagnosis.
            if sender.blocking_send(wire_object(object?)).is_err() {
                break;
            }
        }
        Ok(())
    });
    (ReceiverStream::new(receiver), walker)
}

/// Convert a coalesced event into its wire form.
///
/// Deletes ship the bare path; anything else is materialized, and a
/// path that vanished in the meantime is downgraded to a delete.
/// Returns `None` when materialization fails in a non-recoverable way;
/// the event is logged and dropped.
fn wire_event(event: &Event) -> Option<proto::Event> {
    let (kind, object) = match event.kind {
        EventKind::Delete => (EventKind::Delete, FsObject::deleted(&event.path)),
        kind => match FsObject::materialize(&event.path) {
            Ok(object) => (kind, object),
            Err(MaterializeError::NotFound) => {
                (EventKind::Delete, FsObject::deleted(&event.path))
            }
            Err(err) => {
                warn!("failed to materialize {}: {err}", event.path.display());
                return None;
            }
        },
    };

    Some(proto::Event {
        kind: kind.as_str().to_string(),
        issued_at: unix_now(),
        fs_object: Some(wire_object(object)),
    })
}

fn wire_object(object: FsObject) -> proto::FsObject {
    proto::FsObject {
        path: object.path,
        hash: object.hash,
        created: object.created,
        modified: object.modified,
        uid: object.uid,
        gid: object.gid,
        mode: object.mode,
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}
