//! One JSON file per workload.
//!
//! Each shard has its own async mutex; an append holds it across the
//! read-modify-write of that shard only. Writes go to a temp file and are
//! renamed into place so a crash never leaves a truncated shard.

use async_trait::async_trait;
use dashmap::DashMap;
use faultline_core::types::{TimelineEvent, Timelines};
use faultline_core::{FaultlineError, FaultlineResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::store::TimelineStore;

const SHARD_EXTENSION: &str = "json";

pub struct ShardedJsonStore {
    root: PathBuf,
    shards: DashMap<String, Arc<Mutex<()>>>,
}

impl ShardedJsonStore {
    /// Open (creating if needed) the store rooted at `data_dir/timelines`.
    pub async fn open(data_dir: impl AsRef<Path>) -> FaultlineResult<Self> {
        let root = data_dir.as_ref().join("timelines");
        tokio::fs::create_dir_all(&root).await?;
        info!(path = %root.display(), "Timeline store initialized");
        Ok(Self {
            root,
            shards: DashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn shard_lock(&self, workload: &str) -> Arc<Mutex<()>> {
        self.shards
            .entry(workload.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn shard_path(&self, workload: &str) -> FaultlineResult<PathBuf> {
        if workload.is_empty() {
            return Err(FaultlineError::Validation(
                "workload name must not be empty".into(),
            ));
        }
        Ok(self
            .root
            .join(format!("{}.{SHARD_EXTENSION}", encode_name(workload))))
    }

    async fn read_shard(path: &Path) -> FaultlineResult<Vec<TimelineEvent>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                FaultlineError::Storage(format!("corrupt shard {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_shard(path: &Path, events: &[TimelineEvent]) -> FaultlineResult<()> {
        let data = serde_json::to_vec_pretty(events)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn shard_names(&self) -> FaultlineResult<Vec<(String, PathBuf)>> {
        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SHARD_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match decode_name(stem) {
                Some(name) => names.push((name, path)),
                None => warn!(file = %path.display(), "Skipping shard with undecodable name"),
            }
        }
        Ok(names)
    }
}

#[async_trait]
impl TimelineStore for ShardedJsonStore {
    async fn load(&self) -> FaultlineResult<Timelines> {
        let mut timelines = Timelines::new();
        for (name, path) in self.shard_names().await? {
            let lock = self.shard_lock(&name);
            let _guard = lock.lock().await;
            timelines.insert(name, Self::read_shard(&path).await?);
        }
        debug!(workloads = timelines.len(), "Loaded timelines");
        Ok(timelines)
    }

    async fn save(&self, timelines: &Timelines) -> FaultlineResult<()> {
        for (name, events) in timelines {
            let path = self.shard_path(name)?;
            let lock = self.shard_lock(name);
            let _guard = lock.lock().await;
            Self::write_shard(&path, events).await?;
        }

        for (name, path) in self.shard_names().await? {
            if !timelines.contains_key(&name) {
                let lock = self.shard_lock(&name);
                let _guard = lock.lock().await;
                remove_if_present(&path).await?;
            }
        }
        debug!(workloads = timelines.len(), "Timelines persisted");
        Ok(())
    }

    async fn append_event(&self, workload: &str, event: TimelineEvent) -> FaultlineResult<()> {
        let path = self.shard_path(workload)?;
        let lock = self.shard_lock(workload);
        let _guard = lock.lock().await;

        let mut events = Self::read_shard(&path).await?;
        events.push(event);
        Self::write_shard(&path, &events).await?;
        debug!(workload = %workload, events = events.len(), "Event appended");
        Ok(())
    }

    async fn events(&self, workload: &str) -> FaultlineResult<Vec<TimelineEvent>> {
        let path = self.shard_path(workload)?;
        let lock = self.shard_lock(workload);
        let _guard = lock.lock().await;
        Self::read_shard(&path).await
    }

    async fn clear(&self, workload: &str) -> FaultlineResult<()> {
        let path = self.shard_path(workload)?;
        let lock = self.shard_lock(workload);
        let _guard = lock.lock().await;
        remove_if_present(&path).await?;
        info!(workload = %workload, "Timeline cleared");
        Ok(())
    }
}

async fn remove_if_present(path: &Path) -> FaultlineResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Map a workload name to a safe file stem: `[A-Za-z0-9_-]` and non-leading
/// `.` pass through, everything else becomes `%XX`.
fn encode_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, byte) in name.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric()
            || byte == b'_'
            || byte == b'-'
            || (byte == b'.' && i > 0);
        if keep {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_name(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use faultline_core::types::{FailureKind, FailureMetadata, FailureStatus};

    fn kill(status: FailureStatus) -> TimelineEvent {
        TimelineEvent::failure(
            FailureKind::Kill,
            Utc::now(),
            status,
            FailureMetadata::default(),
        )
    }

    #[test]
    fn test_name_encoding() {
        assert_eq!(encode_name("web1"), "web1");
        assert_eq!(encode_name("web.1"), "web.1");
        assert_eq!(encode_name("../etc"), "%2E.%2Fetc");
        assert_eq!(encode_name("a/b c"), "a%2Fb%20c");
        for name in ["web1", "../etc", "a/b c", "ünï", ".hidden"] {
            assert_eq!(decode_name(&encode_name(name)).as_deref(), Some(name));
        }
        assert!(decode_name("bad%zz").is_none());
    }

    #[tokio::test]
    async fn test_append_and_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ShardedJsonStore::open(dir.path()).await.unwrap();
            store
                .append_event("web1", kill(FailureStatus::Scheduled))
                .await
                .unwrap();
            store
                .append_event("web1", kill(FailureStatus::Executed))
                .await
                .unwrap();
            store
                .append_event("db/primary", kill(FailureStatus::Scheduled))
                .await
                .unwrap();
        }

        let store = ShardedJsonStore::open(dir.path()).await.unwrap();
        let all = store.load().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["web1"].len(), 2);
        assert_eq!(all["db/primary"].len(), 1);
        assert_eq!(
            all["web1"][1].failure_status(),
            Some(FailureStatus::Executed)
        );
    }

    #[tokio::test]
    async fn test_concurrent_appends_across_workloads_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ShardedJsonStore::open(dir.path()).await.unwrap());

        let mut tasks = Vec::new();
        for w in 0..4 {
            for _ in 0..10 {
                let store = store.clone();
                tasks.push(tokio::spawn(async move {
                    store
                        .append_event(&format!("w{w}"), kill(FailureStatus::Scheduled))
                        .await
                        .unwrap();
                }));
            }
        }
        for task in tasks {
            task.await.unwrap();
        }

        let all = store.load().await.unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.values().all(|events| events.len() == 10));
    }

    #[tokio::test]
    async fn test_save_replaces_whole_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardedJsonStore::open(dir.path()).await.unwrap();
        store
            .append_event("old", kill(FailureStatus::Scheduled))
            .await
            .unwrap();

        let mut replacement = Timelines::new();
        replacement.insert("new".into(), vec![kill(FailureStatus::Recovered)]);
        store.save(&replacement).await.unwrap();

        let all = store.load().await.unwrap();
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["new"]);
        assert!(store.events("old").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_and_empty_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardedJsonStore::open(dir.path()).await.unwrap();
        store
            .append_event("web1", kill(FailureStatus::Scheduled))
            .await
            .unwrap();
        store.clear("web1").await.unwrap();
        store.clear("web1").await.unwrap();
        assert!(store.events("web1").await.unwrap().is_empty());

        let err = store
            .append_event("", kill(FailureStatus::Scheduled))
            .await
            .unwrap_err();
        assert!(matches!(err, FaultlineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_corrupt_shard_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardedJsonStore::open(dir.path()).await.unwrap();
        tokio::fs::write(store.root().join("web1.json"), b"{not json")
            .await
            .unwrap();
        let err = store.events("web1").await.unwrap_err();
        assert!(matches!(err, FaultlineError::Storage(_)));
    }
}
