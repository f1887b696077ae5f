//! Durable mirror of the dual store.
//!
//! Layout, rooted at the configured base directory:
//!
//! ```text
//! <base>/node_<id>/primary/<key>.json
//! <base>/node_<id>/backup/node_<primary>/<key>.json
//! ```
//!
//! Each file is a self-describing JSON record carrying the key, value,
//! serialized vector clock and a role tag, so loading never depends on
//! decoding the filename. Filenames percent-escape anything that is not
//! filesystem-safe. Writes are best-effort: a failed write is logged and the
//! in-memory store stays authoritative. Nothing is fsynced.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::id::Id;
use crate::version::{Value, VectorClock, VersionedValue};
use crate::Result;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RecordRole {
    Primary,
    Backup,
}

/// One key file. Self-describing so the filename is only a locator.
#[derive(Serialize, Deserialize)]
struct KeyRecord {
    key: String,
    value: Value,
    version: VectorClock,
    #[serde(rename = "type")]
    role: RecordRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    primary_node_id: Option<u64>,
}

/// Handle on one node's storage directory.
pub struct DiskStore {
    primary_dir: PathBuf,
    backup_dir: PathBuf,
}

impl DiskStore {
    /// Create (or reuse) `<base>/node_<id>/{primary,backup}`.
    pub fn open(base: &Path, node_id: Id) -> Result<Self> {
        let node_dir = base.join(format!("node_{node_id}"));
        let primary_dir = node_dir.join("primary");
        let backup_dir = node_dir.join("backup");
        fs::create_dir_all(&primary_dir)?;
        fs::create_dir_all(&backup_dir)?;
        Ok(Self {
            primary_dir,
            backup_dir,
        })
    }

    fn backup_dir_for(&self, primary: Id) -> PathBuf {
        self.backup_dir.join(format!("node_{primary}"))
    }

    pub fn save_primary(&self, key: &str, entry: &VersionedValue) {
        let record = KeyRecord {
            key: key.to_owned(),
            value: entry.value.clone(),
            version: entry.version.clone(),
            role: RecordRole::Primary,
            primary_node_id: None,
        };
        write_record(&self.primary_dir.join(file_name(key)), &record);
    }

    pub fn save_backup(&self, key: &str, entry: &VersionedValue, primary: Id) {
        let dir = self.backup_dir_for(primary);
        if let Err(err) = fs::create_dir_all(&dir) {
            warn!(%err, ?dir, "could not create backup directory");
            return;
        }
        let record = KeyRecord {
            key: key.to_owned(),
            value: entry.value.clone(),
            version: entry.version.clone(),
            role: RecordRole::Backup,
            primary_node_id: Some(primary.0),
        };
        write_record(&dir.join(file_name(key)), &record);
    }

    pub fn remove_primary(&self, key: &str) {
        remove_file(&self.primary_dir.join(file_name(key)));
    }

    pub fn remove_backup(&self, key: &str, primary: Id) {
        remove_file(&self.backup_dir_for(primary).join(file_name(key)));
    }

    /// Read every primary record, skipping files that fail to parse.
    pub fn load_primary(&self) -> Vec<(String, VersionedValue)> {
        read_records(&self.primary_dir)
            .into_iter()
            .map(|record| {
                (
                    record.key,
                    VersionedValue::new(record.value, record.version),
                )
            })
            .collect()
    }

    /// Read every backup record across all per-primary subdirectories.
    pub fn load_backups(&self) -> Vec<(Id, String, VersionedValue)> {
        let mut out = Vec::new();
        let Ok(entries) = fs::read_dir(&self.backup_dir) else {
            return out;
        };
        for dir_entry in entries.flatten() {
            let name = dir_entry.file_name();
            let Some(primary) = name
                .to_str()
                .and_then(|n| n.strip_prefix("node_"))
                .and_then(|n| n.parse::<u64>().ok())
            else {
                continue;
            };
            for record in read_records(&dir_entry.path()) {
                out.push((
                    Id(record.primary_node_id.unwrap_or(primary)),
                    record.key,
                    VersionedValue::new(record.value, record.version),
                ));
            }
        }
        out
    }
}

fn write_record(path: &Path, record: &KeyRecord) {
    let result = serde_json::to_vec_pretty(record)
        .map_err(std::io::Error::other)
        .and_then(|bytes| fs::write(path, bytes));
    if let Err(err) = result {
        warn!(%err, ?path, "best-effort key file write failed");
    }
}

fn remove_file(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(%err, ?path, "could not remove key file");
        }
    }
}

fn read_records(dir: &Path) -> Vec<KeyRecord> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .filter_map(|e| {
            let path = e.path();
            fs::read(&path)
                .map_err(std::io::Error::other)
                .and_then(|bytes| serde_json::from_slice(&bytes).map_err(std::io::Error::other))
                .map_err(|err| warn!(%err, ?path, "skipping unreadable key file"))
                .ok()
        })
        .collect()
}

/// Escape a key into a filesystem-safe file name. Percent-encodes every byte
/// outside `[A-Za-z0-9._-]` so path separators can never appear.
fn file_name(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 5);
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out.push_str(".json");
    out
}
