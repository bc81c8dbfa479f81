use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Flat key/value persistence. Values are whole strings, written last-writer-wins.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    async fn keys(&self) -> Result<Vec<String>>;
}

// --- Native Implementation ---

/// One file per key inside `root`.
pub struct NativeStorage {
    root: PathBuf,
}

impl NativeStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.root.join(file_name)
    }
}

#[async_trait]
impl Storage for NativeStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read cache entry {}", key))?;
        Ok(Some(content))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.path_for(key), value)
            .await
            .with_context(|| format!("Failed to write cache entry {}", key))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        if tokio::fs::try_exists(&path).await? {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        if !tokio::fs::try_exists(&self.root).await? {
            return Ok(keys);
        }
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_file() {
                keys.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

// --- In-memory Implementation ---

#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory storage lock poisoned"))
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}
