use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::{domain::UserAccount, errors::Error, Result};

/// Persistent user-id → account mapping with atomic per-key get/put.
///
/// Implementations guard single calls only; read-modify-write sequences must
/// go through [`Accounts::lock`].
pub trait RecordStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<UserAccount>>;
    fn put(&self, account: &UserAccount) -> Result<()>;
    fn ids(&self) -> Result<Vec<String>>;
}

// ============== In-memory ==============

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<BTreeMap<String, UserAccount>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, id: &str) -> Result<Option<UserAccount>> {
        Ok(lock_map(&self.inner)?.get(id).cloned())
    }

    fn put(&self, account: &UserAccount) -> Result<()> {
        lock_map(&self.inner)?.insert(account.id.clone(), account.clone());
        Ok(())
    }

    fn ids(&self) -> Result<Vec<String>> {
        Ok(lock_map(&self.inner)?.keys().cloned().collect())
    }
}

// ============== Flat JSON file ==============

/// Whole-map JSON document, rewritten through a temp file + rename on every put.
pub struct JsonFileStore {
    path: PathBuf,
    inner: Mutex<BTreeMap<String, UserAccount>>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let map = load_file(&path)?;
        tracing::info!(path = %path.display(), users = map.len(), "record store opened");
        Ok(Self {
            path,
            inner: Mutex::new(map),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordStore for JsonFileStore {
    fn get(&self, id: &str) -> Result<Option<UserAccount>> {
        Ok(lock_map(&self.inner)?.get(id).cloned())
    }

    fn put(&self, account: &UserAccount) -> Result<()> {
        let mut map = lock_map(&self.inner)?;
        let previous = map.insert(account.id.clone(), account.clone());
        if let Err(e) = save_file(&self.path, &map) {
            // Keep memory and disk in agreement when the write fails.
            match previous {
                Some(prev) => map.insert(prev.id.clone(), prev),
                None => map.remove(&account.id),
            };
            return Err(e);
        }
        Ok(())
    }

    fn ids(&self) -> Result<Vec<String>> {
        Ok(lock_map(&self.inner)?.keys().cloned().collect())
    }
}

fn lock_map(
    m: &Mutex<BTreeMap<String, UserAccount>>,
) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, UserAccount>>> {
    m.lock()
        .map_err(|_| Error::External("record store mutex poisoned".to_string()))
}

fn load_file(path: &Path) -> Result<BTreeMap<String, UserAccount>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let txt = fs::read_to_string(path)?;
    if txt.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    Ok(serde_json::from_str(&txt)?)
}

fn save_file(path: &Path, map: &BTreeMap<String, UserAccount>) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let txt = serde_json::to_string_pretty(map)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, txt)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

// ============== Per-user locking ==============

#[derive(Default)]
pub struct UserLocks {
    inner: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl UserLocks {
    pub async fn lock_user(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// The record store plus per-user mutual exclusion.
///
/// Every "load → change → persist" sequence on one account runs while holding
/// that user's guard, so inbound handlers and background loops never lose
/// each other's writes.
pub struct Accounts {
    store: Arc<dyn RecordStore>,
    locks: UserLocks,
}

impl Accounts {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            locks: UserLocks::default(),
        }
    }

    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        self.locks.lock_user(id).await
    }

    pub fn get(&self, id: &str) -> Result<Option<UserAccount>> {
        self.store.get(id)
    }

    pub fn put(&self, account: &UserAccount) -> Result<()> {
        self.store.put(account)
    }

    pub fn ids(&self) -> Result<Vec<String>> {
        self.store.ids()
    }
}
