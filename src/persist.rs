//! Lease snapshot persistence.
//!
//! Handlers publish complete lease snapshots through a [`SnapshotSink`]; a
//! single [`LeaseStore`] task consumes them, keeps the latest snapshot per
//! interface, and rewrites the JSON file after every update. Persistence is
//! best-effort: write failures are logged and the in-memory lease state
//! stays authoritative.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{error, info};

use crate::handler::LeaseSink;
use crate::lease::Lease;

/// On-disk snapshot format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaseFile {
    pub lease_by_interface: HashMap<String, Vec<Lease>>,
}

/// One snapshot from one interface's handler.
#[derive(Debug)]
pub struct LeaseUpdate {
    pub interface: String,
    pub leases: Vec<Lease>,
}

/// The handler-facing side of the bridge: forwards snapshots onto the store's
/// channel, tagged with the interface they came from.
pub struct SnapshotSink {
    interface: String,
    updates: UnboundedSender<LeaseUpdate>,
}

impl SnapshotSink {
    pub fn new(interface: String, updates: UnboundedSender<LeaseUpdate>) -> Self {
        Self { interface, updates }
    }
}

impl LeaseSink for SnapshotSink {
    fn publish(&self, leases: Vec<Lease>, _latest: &Lease) {
        // A closed channel means the store task is gone; leases stay
        // authoritative in memory, so there is nothing to do about it here.
        let _ = self.updates.send(LeaseUpdate {
            interface: self.interface.clone(),
            leases,
        });
    }
}

/// Single consumer of lease snapshots from all interfaces.
pub struct LeaseStore {
    path: Option<PathBuf>,
    file: LeaseFile,
    updates: UnboundedReceiver<LeaseUpdate>,
}

impl LeaseStore {
    /// Loads the existing snapshot file (if any) and returns the store
    /// together with the sender side of its update channel. A missing file is
    /// not an error; an unreadable or unparseable one is logged and ignored.
    pub async fn open(path: Option<PathBuf>) -> (Self, UnboundedSender<LeaseUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let file = match &path {
            Some(path) => match tokio::fs::read(path).await {
                Ok(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(file) => file,
                    Err(err) => {
                        error!("parse lease file {}: {}", path.display(), err);
                        LeaseFile::default()
                    }
                },
                Err(err) if err.kind() == ErrorKind::NotFound => LeaseFile::default(),
                Err(err) => {
                    error!("read lease file {}: {}", path.display(), err);
                    LeaseFile::default()
                }
            },
            None => LeaseFile::default(),
        };

        (
            Self {
                path,
                file,
                updates: rx,
            },
            tx,
        )
    }

    /// The persisted leases for `interface`, for handing to the handler's
    /// restore before its serve loop starts.
    pub fn restored(&self, interface: &str) -> Vec<Lease> {
        self.file
            .lease_by_interface
            .get(interface)
            .cloned()
            .unwrap_or_default()
    }

    /// Consumes snapshots until every sender is gone, rewriting the file
    /// after each one.
    pub async fn run(mut self) {
        if let Some(path) = &self.path {
            info!("persisting leases to {}", path.display());
        }

        while let Some(update) = self.updates.recv().await {
            self.file
                .lease_by_interface
                .insert(update.interface, update.leases);

            let Some(path) = &self.path else {
                continue;
            };

            match serde_json::to_vec(&self.file) {
                Ok(bytes) => {
                    if let Err(err) = write_snapshot(path, &bytes).await {
                        error!("write lease file {}: {}", path.display(), err);
                    }
                }
                Err(err) => error!("marshal lease file: {}", err),
            }
        }
    }
}

/// Writes the snapshot to a sibling temp file (mode 0600) and renames it over
/// the target, so readers never observe a torn file.
async fn write_snapshot(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&tmp)
        .await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await
}
