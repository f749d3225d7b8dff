// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::error::{Result, StreamError};

/// Retrieves raw asset bytes by source key
pub trait AssetSource: Send + Sync {
    fn fetch(&self, key: &str) -> Result<Vec<u8>>;
}

impl<F> AssetSource for F
where
    F: Fn(&str) -> Result<Vec<u8>> + Send + Sync,
{
    fn fetch(&self, key: &str) -> Result<Vec<u8>> {
        self(key)
    }
}

/// In-memory source. Clones share the same table.
#[derive(Clone, Default)]
pub struct MemorySource {
    entries: Arc<RwLock<AHashMap<String, Arc<[u8]>>>>,
    fetches: Arc<AtomicU64>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(key, bytes);
        self
    }

    pub fn insert(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        let bytes: Vec<u8> = bytes.into();
        self.entries.write().insert(key.into(), Arc::from(bytes));
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Number of successful fetches served
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl AssetSource for MemorySource {
    fn fetch(&self, key: &str) -> Result<Vec<u8>> {
        let entries = self.entries.read();
        let bytes = entries.get(key).ok_or_else(|| StreamError::SourceUnavailable {
            key: key.to_string(),
            reason: "no such key".to_string(),
        })?;
        self.fetches.fetch_add(1, Ordering::Relaxed);
        Ok(bytes.to_vec())
    }
}

/// Reads `<root>/<key>` from disk
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if key.is_empty() || escapes {
            return Err(StreamError::SourceUnavailable {
                key: key.to_string(),
                reason: "key must be a relative path inside the source root".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

impl AssetSource for DirectorySource {
    fn fetch(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        fs::read(&path).map_err(|e| StreamError::SourceUnavailable {
            key: key.to_string(),
            reason: format!("failed to read {}: {e}", path.display()),
        })
    }
}
