//! 地点地图持久化
//!
//! 名称 -> 地点描述；同名插入即覆盖。每次修改后整体写回 JSON 文件（先写临时文件再 rename）。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::memory::StoreError;

/// 单个地点描述
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationDescriptor {
    /// `(X, Z)` 形式的坐标文本
    pub coords: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

/// 地点地图：内存 BTreeMap + JSON 文件
#[derive(Debug)]
pub struct LocationStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, LocationDescriptor>>,
}

impl LocationStore {
    /// 从文件加载；文件不存在时创建空文件，内容损坏时以空地图启动
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let data = std::fs::read_to_string(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            match serde_json::from_str(&data) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Map file unreadable ({}), starting empty", e);
                    BTreeMap::new()
                }
            }
        } else {
            let empty = BTreeMap::new();
            write_atomic(&path, &empty)?;
            empty
        };
        tracing::info!(path = %path.display(), count = entries.len(), "Location map loaded");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// 插入或覆盖，然后写回磁盘；写盘失败时内存中的修改仍然保留。
    /// 写盘期间持锁，临时文件与 rename 不会交错
    pub fn upsert(&self, name: &str, descriptor: LocationDescriptor) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(name.to_string(), descriptor);
        write_atomic(&self.path, &entries)
    }

    pub fn get(&self, name: &str) -> Option<LocationDescriptor> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, LocationDescriptor> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn write_atomic(path: &Path, entries: &BTreeMap<String, LocationDescriptor>) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
    }
    let data = serde_json::to_string_pretty(entries)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(coords: &str) -> LocationDescriptor {
        LocationDescriptor {
            coords: coords.to_string(),
            info: None,
        }
    }

    #[test]
    fn test_open_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory").join("map.json");
        let store = LocationStore::open(&path).unwrap();
        assert!(store.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "{}");
    }

    #[test]
    fn test_upsert_overwrites_same_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");
        let store = LocationStore::open(&path).unwrap();

        store.upsert("Pig King", loc("(457,24)")).unwrap();
        store.upsert("Pig King", loc("(500,30)")).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("Pig King").unwrap().coords, "(500,30)");

        let reloaded = LocationStore::open(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("Pig King").unwrap().coords, "(500,30)");
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");
        std::fs::write(&path, "not json").unwrap();
        let store = LocationStore::open(&path).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_upserts_all_reach_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");
        let store = std::sync::Arc::new(LocationStore::open(&path).unwrap());

        let writers: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..10 {
                        store.upsert(&format!("spot-{t}-{i}"), loc("(1,1)")).unwrap();
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }

        let reloaded = LocationStore::open(&path).unwrap();
        assert_eq!(reloaded.len(), 80);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
