//! Persistence for autoscaling state.
//!
//! The cooldown window has to survive process restarts, so the scaling
//! state lives in `.gridflow/scaling.json`. A lock file guards against a
//! second operator run mutating it concurrently.

use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".gridflow";
const STATE_FILE: &str = "scaling.json";
const STATE_BACKUP: &str = "scaling.json.backup";
const LOCK_FILE: &str = "lock.json";

/// Autoscaling state carried across cycles. Owned exclusively by the
/// control loop; nothing else mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingState {
    /// Current desired capacity
    pub desired: u32,

    /// When the loop last changed capacity; enforces the cooldown window
    pub last_scaled_at: Option<DateTime<Utc>>,
}

impl ScalingState {
    pub fn new(desired: u32) -> Self {
        Self {
            desired,
            last_scaled_at: None,
        }
    }
}

/// On-disk envelope for [`ScalingState`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedState {
    version: u32,
    updated_at: DateTime<Utc>,
    state: ScalingState,
}

/// Reads and writes the scaling state file.
pub struct StateStore {
    project_root: PathBuf,
}

impl StateStore {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
        }
    }

    fn state_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR)
    }

    fn state_path(&self) -> PathBuf {
        self.state_dir().join(STATE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir().join(STATE_BACKUP)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir().join(LOCK_FILE)
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    /// Load the persisted scaling state, or the given initial state when
    /// no file exists yet.
    pub async fn load_or(&self, initial: ScalingState) -> Result<ScalingState> {
        let path = self.state_path();
        if !path.exists() {
            tracing::debug!("No scaling state file, starting from spec defaults");
            return Ok(initial);
        }

        let content = fs::read_to_string(&path).await?;
        let persisted: PersistedState = serde_json::from_str(&content)?;

        if persisted.version > STATE_VERSION {
            return Err(EngineError::StateError(format!(
                "scaling state version {} is newer than supported version {}",
                persisted.version, STATE_VERSION
            )));
        }

        tracing::debug!(
            "Loaded scaling state (desired {}, updated {})",
            persisted.state.desired,
            persisted.updated_at
        );
        Ok(persisted.state)
    }

    /// Save the scaling state, rotating the previous file to a backup.
    pub async fn save(&self, state: &ScalingState) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.state_path();
        let backup = self.backup_path();

        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
        }

        let persisted = PersistedState {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            state: state.clone(),
        };
        let content = serde_json::to_string_pretty(&persisted)?;
        fs::write(&path, content).await?;

        tracing::debug!("Saved scaling state (desired {})", state.desired);
        Ok(())
    }

    /// Acquire the control-loop lock. A lock older than an hour is
    /// presumed abandoned and taken over.
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        self.ensure_state_dir().await?;

        let lock_path = self.lock_path();

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            let lock_info: LockInfo = serde_json::from_str(&content)?;

            let age = Utc::now().signed_duration_since(lock_info.acquired_at);
            if age.num_hours() < 1 {
                return Err(EngineError::LockError(format!(
                    "scaling state is locked by {} since {}",
                    lock_info.holder, lock_info.acquired_at
                )));
            }

            tracing::warn!("Removing stale lock from {}", lock_info.holder);
        }

        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            acquired_at: Utc::now(),
        };

        let content = serde_json::to_string_pretty(&lock_info)?;
        fs::write(&lock_path, content).await?;

        tracing::debug!("Acquired scaling state lock");
        Ok(StateLock {
            lock_path,
            released: false,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for the state lock.
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released scaling state lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            // Drop cannot await, so this removal is synchronous.
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_state_save_load() {
        let temp_dir = tempdir().unwrap();
        let store = StateStore::new(temp_dir.path());

        let mut state = ScalingState::new(8);
        state.last_scaled_at = Some(Utc::now());
        store.save(&state).await.unwrap();

        let loaded = store.load_or(ScalingState::new(0)).await.unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_missing_state_uses_initial() {
        let temp_dir = tempdir().unwrap();
        let store = StateStore::new(temp_dir.path());

        let loaded = store.load_or(ScalingState::new(4)).await.unwrap();
        assert_eq!(loaded.desired, 4);
        assert!(loaded.last_scaled_at.is_none());
    }

    #[tokio::test]
    async fn test_save_rotates_backup() {
        let temp_dir = tempdir().unwrap();
        let store = StateStore::new(temp_dir.path());

        store.save(&ScalingState::new(4)).await.unwrap();
        store.save(&ScalingState::new(6)).await.unwrap();

        assert!(store.backup_path().exists());
        let loaded = store.load_or(ScalingState::new(0)).await.unwrap();
        assert_eq!(loaded.desired, 6);
    }

    #[tokio::test]
    async fn test_lock_blocks_second_holder() {
        let temp_dir = tempdir().unwrap();
        let store = StateStore::new(temp_dir.path());

        let lock = store.acquire_lock().await.unwrap();
        assert!(matches!(
            store.acquire_lock().await,
            Err(EngineError::LockError(_))
        ));
        lock.release().await.unwrap();

        let relock = store.acquire_lock().await.unwrap();
        relock.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_lock_taken_over() {
        let temp_dir = tempdir().unwrap();
        let store = StateStore::new(temp_dir.path());

        let stale = LockInfo {
            holder: "old-host".to_string(),
            acquired_at: Utc::now() - chrono::Duration::hours(2),
        };
        fs::create_dir_all(store.state_dir()).await.unwrap();
        fs::write(
            store.lock_path(),
            serde_json::to_string_pretty(&stale).unwrap(),
        )
        .await
        .unwrap();

        let lock = store.acquire_lock().await.unwrap();
        lock.release().await.unwrap();
    }
}
