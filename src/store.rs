//! In-memory stores behind the User and Poem services.
//!
//! Both stores use a reader/writer lock: reads run concurrently, every write
//! is exclusive and atomic on its own. Nothing spans more than one call.
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::info;

use crate::proto::poem::Poem;
use crate::proto::unix_now;
use crate::proto::user::{FieldMask, USER_FIELDS, User};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("user {0} not found")]
    UserNotFound(i64),

    #[error("update mask names no field")]
    EmptyMask,

    #[error("poem not found: {0}")]
    PoemNotFound(String),
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let data = std::fs::read(path).map_err(|source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&data).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// Users, in creation order.
#[derive(Debug, Default)]
pub struct UserStore {
    max_id: AtomicI64,
    records: RwLock<Vec<User>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with `users`, stamping their times with now. Ids are
    /// kept; new ids continue after the highest one.
    pub fn with_users(users: Vec<User>) -> Self {
        let now = unix_now();
        let max_id = users.iter().map(|user| user.id).max().unwrap_or(0);
        let records = users
            .into_iter()
            .map(|user| User {
                create_at: now,
                update_at: now,
                ..user
            })
            .collect();

        Self {
            max_id: AtomicI64::new(max_id),
            records: RwLock::new(records),
        }
    }

    /// Load users from a JSON array.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let users: Vec<User> = load_json(path)?;
        info!(path = %path.display(), count = users.len(), "Loaded users");
        Ok(Self::with_users(users))
    }

    /// Store a new user under a fresh id. A non-empty `mask` limits which of
    /// the given fields are kept.
    pub fn create(&self, user: User, mask: Option<&FieldMask>) -> User {
        let mut records = write(&self.records);

        let now = unix_now();
        let mut record = User {
            id: self.max_id.fetch_add(1, Ordering::SeqCst) + 1,
            create_at: now,
            update_at: now,
            ..User::default()
        };
        match mask.filter(|mask| !mask.paths.is_empty()) {
            Some(mask) => apply_mask(&mut record, user, mask),
            None => {
                record.name = user.name;
                record.email = user.email;
            }
        }

        records.push(record.clone());
        record
    }

    pub fn get(&self, id: i64) -> Option<User> {
        read(&self.records).iter().find(|user| user.id == id).cloned()
    }

    /// Copy the fields named by `mask` from `user` onto the stored user with
    /// the same id.
    pub fn update(&self, user: User, mask: Option<&FieldMask>) -> Result<User, StoreError> {
        let mut records = write(&self.records);
        let record = records
            .iter_mut()
            .find(|record| record.id == user.id)
            .ok_or(StoreError::UserNotFound(user.id))?;

        let mask = mask
            .filter(|mask| mask.paths.iter().any(|path| USER_FIELDS.contains(&path.as_str())))
            .ok_or(StoreError::EmptyMask)?;
        apply_mask(record, user, mask);
        record.update_at = unix_now();
        Ok(record.clone())
    }

    pub fn delete(&self, id: i64) -> Option<User> {
        let mut records = write(&self.records);
        let index = records.iter().position(|user| user.id == id)?;
        Some(records.remove(index))
    }

    pub fn list(&self) -> Vec<User> {
        read(&self.records).clone()
    }

    pub fn len(&self) -> usize {
        read(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn apply_mask(record: &mut User, user: User, mask: &FieldMask) {
    if mask.contains("name") {
        record.name = user.name;
    }
    if mask.contains("email") {
        record.email = user.email;
    }
}

/// Poems keyed by title, in insertion order.
#[derive(Debug, Default)]
pub struct PoemStore {
    poems: RwLock<Vec<Poem>>,
}

impl PoemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poems(poems: Vec<Poem>) -> Self {
        let store = Self::new();
        for poem in poems {
            store.upsert(poem);
        }
        store
    }

    /// Load poems from a JSON array.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let poems: Vec<Poem> = load_json(path)?;
        info!(path = %path.display(), count = poems.len(), "Loaded poems");
        Ok(Self::with_poems(poems))
    }

    pub fn get(&self, title: &str) -> Result<Poem, StoreError> {
        read(&self.poems)
            .iter()
            .find(|poem| poem.title == title)
            .cloned()
            .ok_or_else(|| StoreError::PoemNotFound(title.to_string()))
    }

    /// Insert `poem`, replacing any poem with the same title in place.
    pub fn upsert(&self, poem: Poem) {
        let mut poems = write(&self.poems);
        match poems.iter_mut().find(|existing| existing.title == poem.title) {
            Some(existing) => *existing = poem,
            None => poems.push(poem),
        }
    }

    pub fn list(&self) -> Vec<Poem> {
        read(&self.poems).clone()
    }

    pub fn len(&self) -> usize {
        read(&self.poems).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
