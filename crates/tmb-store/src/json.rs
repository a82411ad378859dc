//! JSON-file backed entity store.
//!
//! The database is one JSON document. Each operation reloads it under an
//! advisory file lock; a mutation is applied in memory and written back
//! atomically (temp file + rename) before the lock is released. A mutation
//! that violates a constraint or fails to persist leaves the file untouched.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use tmb_core::types::{Consent, Infant, User, Video};

use crate::error::{StoreError, StoreResult};
use crate::{CascadeReport, ConsentRule, EntityStore};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct Tables {
    users: BTreeMap<Uuid, User>,
    infants: BTreeMap<Uuid, Infant>,
    consents: BTreeMap<Uuid, Consent>,
    videos: BTreeMap<Uuid, Video>,
}

impl Tables {
    fn require_user(&self, entity: &'static str, user_id: Uuid) -> StoreResult<()> {
        if self.users.contains_key(&user_id) {
            Ok(())
        } else {
            Err(StoreError::ForeignKey {
                entity,
                field: "created_by",
                key: user_id.to_string(),
            })
        }
    }

    fn require_infant(&self, entity: &'static str, infant_id: Uuid) -> StoreResult<()> {
        if self.infants.contains_key(&infant_id) {
            Ok(())
        } else {
            Err(StoreError::ForeignKey {
                entity,
                field: "infant_id",
                key: infant_id.to_string(),
            })
        }
    }

    fn check_user_unique(&self, user: &User) -> StoreResult<()> {
        let clash = self
            .users
            .values()
            .any(|u| u.user_id != user.user_id && u.access_key_hash == user.access_key_hash);
        if clash {
            return Err(StoreError::UniqueConstraint {
                entity: "user",
                field: "access_key_hash",
                value: user.access_key_hash.clone(),
            });
        }
        Ok(())
    }

    fn check_infant_unique(&self, infant: &Infant) -> StoreResult<()> {
        let clash = self
            .infants
            .values()
            .any(|i| i.infant_id != infant.infant_id && i.nhi_number == infant.nhi_number);
        if clash {
            return Err(StoreError::UniqueConstraint {
                entity: "infant",
                field: "nhi_number",
                value: infant.nhi_number.clone(),
            });
        }
        Ok(())
    }

    fn check_video_unique(&self, video: &Video) -> StoreResult<()> {
        let clash = self
            .videos
            .values()
            .any(|v| v.video_id != video.video_id && v.video_name == video.video_name);
        if clash {
            return Err(StoreError::UniqueConstraint {
                entity: "video",
                field: "video_name",
                value: video.video_name.clone(),
            });
        }
        Ok(())
    }

    fn counts_for_infant(&self, infant_id: Uuid) -> (usize, usize) {
        let consents = self.consents.values().filter(|c| c.infant_id == infant_id).count();
        let videos = self.videos.values().filter(|v| v.infant_id == infant_id).count();
        (consents, videos)
    }

    fn insert_video(&mut self, video: &Video) -> StoreResult<()> {
        self.require_user("video", video.created_by)?;
        self.require_infant("video", video.infant_id)?;
        self.check_video_unique(video)?;
        self.videos.insert(video.video_id, video.clone());
        Ok(())
    }

    fn user_is_referenced(&self, user_id: Uuid) -> bool {
        self.infants.values().any(|i| i.created_by == user_id)
            || self.consents.values().any(|c| c.created_by == user_id)
            || self.videos.values().any(|v| v.created_by == user_id)
    }
}

/// Entity store persisted as a single JSON document.
///
/// Several processes may open the same file (the daemon and `tmb`). Every
/// operation holds an advisory lock on a sidecar `<db>.lock` file and
/// reloads the document before touching it, so no process works from a
/// stale copy and the lock is held until the rename of a write completes.
pub struct JsonStore {
    /// `None` for a purely in-memory store
    backing: Option<Backing>,
    tables: Mutex<Tables>,
}

struct Backing {
    path: PathBuf,
    lock_file: File,
}

/// Advisory lock on the sidecar file, released on drop.
struct FileLock<'a>(&'a File);

impl<'a> FileLock<'a> {
    fn exclusive(file: &'a File) -> std::io::Result<Self> {
        file.lock()?;
        Ok(Self(file))
    }

    fn shared(file: &'a File) -> std::io::Result<Self> {
        file.lock_shared()?;
        Ok(Self(file))
    }
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.0.unlock() {
            warn!("releasing store lock: {e}");
        }
    }
}

#[derive(Clone, Copy)]
enum Access {
    Read,
    Write,
}

impl Backing {
    fn lock(&self, access: Access) -> StoreResult<FileLock<'_>> {
        let locked = match access {
            Access::Read => FileLock::shared(&self.lock_file),
            Access::Write => FileLock::exclusive(&self.lock_file),
        };
        locked.map_err(|source| StoreError::Lock {
            path: self.path.clone(),
            source,
        })
    }

    /// Read the current document; a missing file is an empty store.
    fn load(&self) -> StoreResult<Tables> {
        let load_err = |reason: String| StoreError::Load {
            path: self.path.clone(),
            reason,
        };
        match std::fs::read(&self.path) {
            Ok(content) => serde_json::from_slice(&content).map_err(|e| load_err(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Tables::default()),
            Err(e) => Err(load_err(e.to_string())),
        }
    }

    fn persist(&self, tables: &Tables) -> StoreResult<()> {
        let io_err = |source: std::io::Error| StoreError::Persist {
            path: self.path.clone(),
            source,
        };

        let json = serde_json::to_vec_pretty(tables)
            .map_err(|e| io_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        // Atomic write: write to temp file, then rename
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &json).map_err(io_err)?;
        std::fs::rename(&tmp_path, &self.path).map_err(io_err)?;

        debug!(path = %self.path.display(), bytes = json.len(), "store persisted");
        Ok(())
    }
}

impl JsonStore {
    /// Open a store at the given path, creating its directory and lock file.
    /// A missing database file starts empty; it is created on first write.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Persist {
                    path: path.to_path_buf(),
                    source,
                })?;
            }
        }

        let lock_path = path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|source| StoreError::Lock {
                path: lock_path.clone(),
                source,
            })?;

        let backing = Backing {
            path: path.to_path_buf(),
            lock_file,
        };
        let tables = {
            let _lock = backing.lock(Access::Read)?;
            backing.load()?
        };

        Ok(Self {
            backing: Some(backing),
            tables: Mutex::new(tables),
        })
    }

    /// A store that never touches disk (tests, dry runs).
    pub fn in_memory() -> Self {
        Self {
            backing: None,
            tables: Mutex::new(Tables::default()),
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> StoreResult<T>) -> StoreResult<T> {
        let mut guard = self.lock()?;
        let Some(backing) = &self.backing else {
            return f(&guard);
        };
        let _file_lock = backing.lock(Access::Read)?;
        *guard = backing.load()?;
        f(&guard)
    }

    /// Apply `f` atomically: on a constraint error or persistence failure the
    /// tables are restored to their state before the call.
    fn write<T>(&self, f: impl FnOnce(&mut Tables) -> StoreResult<T>) -> StoreResult<T> {
        let mut guard = self.lock()?;
        let file_lock = match &self.backing {
            Some(backing) => {
                let file_lock = backing.lock(Access::Write)?;
                *guard = backing.load()?;
                Some(file_lock)
            }
            None => None,
        };
        let snapshot = guard.clone();

        let out = match f(&mut guard) {
            Ok(out) => out,
            Err(e) => {
                *guard = snapshot;
                return Err(e);
            }
        };

        if let Some(backing) = &self.backing {
            if let Err(e) = backing.persist(&guard) {
                *guard = snapshot;
                return Err(e);
            }
        }
        drop(file_lock);
        Ok(out)
    }
}

fn sorted<T: Clone>(values: impl Iterator<Item = T>, key: impl Fn(&T) -> chrono::DateTime<chrono::Utc>) -> Vec<T> {
    let mut out: Vec<T> = values.collect();
    out.sort_by_key(|v| key(v));
    out
}

impl EntityStore for JsonStore {
    // ── Users ────────────────────────────────────────────────────────────

    fn create_user(&self, user: User) -> StoreResult<User> {
        self.write(|t| {
            t.check_user_unique(&user)?;
            t.users.insert(user.user_id, user.clone());
            Ok(user)
        })
    }

    fn get_user(&self, user_id: Uuid) -> StoreResult<User> {
        self.read(|t| {
            t.users
                .get(&user_id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("user", user_id))
        })
    }

    fn find_user_by_access_key_hash(&self, hash: &str) -> StoreResult<Option<User>> {
        self.read(|t| {
            Ok(t.users
                .values()
                .find(|u| u.access_key_hash == hash)
                .cloned())
        })
    }

    fn list_users(&self) -> StoreResult<Vec<User>> {
        self.read(|t| Ok(sorted(t.users.values().cloned(), |u| u.created_at)))
    }

    fn update_user(&self, user: User) -> StoreResult<User> {
        self.write(|t| {
            if !t.users.contains_key(&user.user_id) {
                return Err(StoreError::not_found("user", user.user_id));
            }
            t.check_user_unique(&user)?;
            t.users.insert(user.user_id, user.clone());
            Ok(user)
        })
    }

    fn delete_user(&self, user_id: Uuid) -> StoreResult<bool> {
        self.write(|t| {
            if t.user_is_referenced(user_id) {
                return Err(StoreError::ForeignKey {
                    entity: "user",
                    field: "created_by",
                    key: user_id.to_string(),
                });
            }
            Ok(t.users.remove(&user_id).is_some())
        })
    }

    // ── Infants ──────────────────────────────────────────────────────────

    fn create_infant(&self, infant: Infant) -> StoreResult<Infant> {
        self.write(|t| {
            t.require_user("infant", infant.created_by)?;
            t.check_infant_unique(&infant)?;
            t.infants.insert(infant.infant_id, infant.clone());
            Ok(infant)
        })
    }

    fn get_infant(&self, infant_id: Uuid) -> StoreResult<Infant> {
        self.read(|t| {
            t.infants
                .get(&infant_id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("infant", infant_id))
        })
    }

    fn find_infant_by_nhi(&self, nhi_number: &str) -> StoreResult<Option<Infant>> {
        self.read(|t| {
            Ok(t.infants
                .values()
                .find(|i| i.nhi_number == nhi_number)
                .cloned())
        })
    }

    fn list_infants(&self) -> StoreResult<Vec<Infant>> {
        self.read(|t| Ok(sorted(t.infants.values().cloned(), |i| i.created_at)))
    }

    fn update_infant(&self, infant: Infant) -> StoreResult<Infant> {
        self.write(|t| {
            if !t.infants.contains_key(&infant.infant_id) {
                return Err(StoreError::not_found("infant", infant.infant_id));
            }
            t.check_infant_unique(&infant)?;
            t.infants.insert(infant.infant_id, infant.clone());
            Ok(infant)
        })
    }

    fn delete_infant_cascade(&self, infant_id: Uuid) -> StoreResult<CascadeReport> {
        self.write(|t| {
            let infant = t
                .infants
                .remove(&infant_id)
                .ok_or_else(|| StoreError::not_found("infant", infant_id))?;

            let consent_ids: Vec<Uuid> = t
                .consents
                .values()
                .filter(|c| c.infant_id == infant_id)
                .map(|c| c.consent_id)
                .collect();
            let video_ids: Vec<Uuid> = t
                .videos
                .values()
                .filter(|v| v.infant_id == infant_id)
                .map(|v| v.video_id)
                .collect();

            let consents = consent_ids
                .iter()
                .filter_map(|id| t.consents.remove(id))
                .collect();
            let videos = video_ids
                .iter()
                .filter_map(|id| t.videos.remove(id))
                .collect();

            Ok(CascadeReport {
                infant,
                consents,
                videos,
            })
        })
    }

    // ── Consents ─────────────────────────────────────────────────────────

    fn create_consent(&self, consent: Consent) -> StoreResult<Consent> {
        self.write(|t| {
            t.require_user("consent", consent.created_by)?;
            t.require_infant("consent", consent.infant_id)?;
            t.consents.insert(consent.consent_id, consent.clone());
            Ok(consent)
        })
    }

    fn get_consent(&self, consent_id: Uuid) -> StoreResult<Consent> {
        self.read(|t| {
            t.consents
                .get(&consent_id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("consent", consent_id))
        })
    }

    fn list_consents(&self) -> StoreResult<Vec<Consent>> {
        self.read(|t| Ok(sorted(t.consents.values().cloned(), |c| c.created_at)))
    }

    fn consents_for_infant(&self, infant_id: Uuid) -> StoreResult<Vec<Consent>> {
        self.read(|t| {
            Ok(sorted(
                t.consents
                    .values()
                    .filter(|c| c.infant_id == infant_id)
                    .cloned(),
                |c| c.created_at,
            ))
        })
    }

    fn update_consent(&self, consent: Consent) -> StoreResult<Consent> {
        self.write(|t| {
            if !t.consents.contains_key(&consent.consent_id) {
                return Err(StoreError::not_found("consent", consent.consent_id));
            }
            t.require_infant("consent", consent.infant_id)?;
            t.consents.insert(consent.consent_id, consent.clone());
            Ok(consent)
        })
    }

    fn delete_consent_guarded(&self, consent_id: Uuid, rule: ConsentRule<'_>) -> StoreResult<Consent> {
        self.write(|t| {
            let infant_id = t
                .consents
                .get(&consent_id)
                .map(|c| c.infant_id)
                .ok_or_else(|| StoreError::not_found("consent", consent_id))?;
            let (consents, videos) = t.counts_for_infant(infant_id);
            rule(consents, videos).map_err(StoreError::Rejected)?;
            t.consents
                .remove(&consent_id)
                .ok_or_else(|| StoreError::not_found("consent", consent_id))
        })
    }

    // ── Videos ───────────────────────────────────────────────────────────

    fn create_video(&self, video: Video) -> StoreResult<Video> {
        self.write(|t| {
            t.insert_video(&video)?;
            Ok(video)
        })
    }

    fn create_video_guarded(&self, video: Video, rule: ConsentRule<'_>) -> StoreResult<Video> {
        self.write(|t| {
            t.require_infant("video", video.infant_id)?;
            let (consents, videos) = t.counts_for_infant(video.infant_id);
            rule(consents, videos).map_err(StoreError::Rejected)?;
            t.insert_video(&video)?;
            Ok(video)
        })
    }

    fn get_video(&self, video_id: Uuid) -> StoreResult<Video> {
        self.read(|t| {
            t.videos
                .get(&video_id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("video", video_id))
        })
    }

    fn find_video_by_name(&self, video_name: &str) -> StoreResult<Option<Video>> {
        self.read(|t| {
            Ok(t.videos
                .values()
                .find(|v| v.video_name == video_name)
                .cloned())
        })
    }

    fn list_videos(&self) -> StoreResult<Vec<Video>> {
        self.read(|t| Ok(sorted(t.videos.values().cloned(), |v| v.created_at)))
    }

    fn videos_for_infant(&self, infant_id: Uuid) -> StoreResult<Vec<Video>> {
        self.read(|t| {
            Ok(sorted(
                t.videos
                    .values()
                    .filter(|v| v.infant_id == infant_id)
                    .cloned(),
                |v| v.created_at,
            ))
        })
    }

    fn finalize_video(&self, video_id: Uuid, size_bytes: u64, sha256sum_enc: String) -> StoreResult<Video> {
        self.write(|t| {
            let video = t
                .videos
                .get_mut(&video_id)
                .ok_or_else(|| StoreError::not_found("video", video_id))?;
            video.size_bytes = Some(size_bytes);
            video.sha256sum_enc = Some(sha256sum_enc);
            Ok(video.clone())
        })
    }

    fn delete_video(&self, video_id: Uuid) -> StoreResult<bool> {
        self.write(|t| Ok(t.videos.remove(&video_id).is_some()))
    }
}
