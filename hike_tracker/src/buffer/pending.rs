use std::{
    collections::HashSet,
    fmt,
    io::ErrorKind,
    path::PathBuf,
    sync::{Arc, PoisonError},
};

use hike_tracker_lib::hike_session::HikeSession;
use tokio::sync::Mutex;

use crate::{SessionUploader, TrackerError};

const SESSION_FILE_EXTENSION: &str = "session";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PendingId(String);

impl PendingId {
    fn for_session(session: &HikeSession) -> Self {
        Self(format!("{}_{}", session.started_at_ms, session.mountain_id))
    }
}

impl fmt::Display for PendingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResubmitSummary {
    pub uploaded: usize,
    pub failed: usize,
    /// Sessions skipped because an upload of them was already running.
    pub in_flight: usize,
}

type InFlight = Arc<std::sync::Mutex<HashSet<PendingId>>>;

/// Marks a pending session as being uploaded. Released on drop.
pub struct PendingClaim {
    id: PendingId,
    in_flight: InFlight,
}

impl PendingClaim {
    pub fn id(&self) -> &PendingId {
        &self.id
    }
}

impl Drop for PendingClaim {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/**
 * PendingSessions keeps finished hikes on disk until the backend has acknowledged them.
 * One bincode file per session, named after its start time and mountain.
 */
#[derive(Clone)]
pub struct PendingSessions {
    dir: PathBuf,
    lock: Arc<Mutex<()>>,
    in_flight: InFlight,
}

impl PendingSessions {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, TrackerError> {
        let dir = dir.into();

        // Create dir if it doesn't exist
        if !dir.exists() {
            tokio::fs::create_dir_all(&dir).await
                .map_err(|_| TrackerError::Storage(format!("Failed to create pending session directory: {:?}", dir)))?;
        }

        Ok(Self {
            dir,
            lock: Arc::new(Mutex::new(())),
            in_flight: InFlight::default(),
        })
    }

    fn file_path(&self, id: &PendingId) -> PathBuf {
        self.dir.join(format!("{}.{}", id, SESSION_FILE_EXTENSION))
    }

    /// Claims the id for an upload. `None` if another upload holds it.
    pub fn claim(&self, id: &PendingId) -> Option<PendingClaim> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(id.clone()) {
            return None;
        }

        Some(PendingClaim {
            id: id.clone(),
            in_flight: self.in_flight.clone(),
        })
    }

    /// Stores a session that is about to be uploaded. The claim is taken before
    /// the file exists, so `resubmit` never picks up a session mid upload.
    pub async fn store_claimed(&self, session: &HikeSession) -> Result<PendingClaim, TrackerError> {
        let id = PendingId::for_session(session);
        let claim = self.claim(&id)
            .ok_or_else(|| TrackerError::Storage(format!("Pending session {} is already being uploaded", id)))?;

        self.store(session).await?;
        Ok(claim)
    }

    /// Writes the session, replacing an earlier copy of the same session.
    pub async fn store(&self, session: &HikeSession) -> Result<PendingId, TrackerError> {
        let _guard = self.lock.lock().await;

        let id = PendingId::for_session(session);
        let bytes = bincode::serialize(session)
            .map_err(|_| TrackerError::Storage("Failed to serialize session".to_string()))?;

        // Write then rename, so a crash never leaves a half written session behind
        let path = self.file_path(&id);
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &bytes).await
            .map_err(|_| TrackerError::Storage(format!("Failed to write pending session: {:?}", tmp_path)))?;
        tokio::fs::rename(&tmp_path, &path).await
            .map_err(|_| TrackerError::Storage(format!("Failed to move pending session into place: {:?}", path)))?;

        tracing::debug!("Stored pending session {} ({} points)", id, session.path.len());
        Ok(id)
    }

    /// Removes a session. Removing one that is already gone is fine.
    pub async fn remove(&self, id: &PendingId) -> Result<(), TrackerError> {
        let _guard = self.lock.lock().await;

        let path = self.file_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(_) => Err(TrackerError::Storage(format!("Failed to remove pending session: {:?}", path))),
        }
    }

    /// All pending sessions, oldest first. Unreadable files are skipped.
    pub async fn load_all(&self) -> Result<Vec<(PendingId, HikeSession)>, TrackerError> {
        let _guard = self.lock.lock().await;

        let mut entries = tokio::fs::read_dir(&self.dir).await
            .map_err(|_| TrackerError::Storage(format!("Failed to read pending sessions from {:?}", self.dir)))?;

        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await
            .map_err(|_| TrackerError::Storage(format!("Failed to read pending sessions from {:?}", self.dir)))? {
            let path = entry.path();

            if path.extension().and_then(|ext| ext.to_str()) != Some(SESSION_FILE_EXTENSION) {
                continue;
            }

            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                tracing::warn!("Pending session file had illegal path: {:?}", path);
                continue;
            };
            let id = PendingId(stem.to_string());

            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!("Failed to read pending session {:?}: {}", path, err);
                    continue;
                }
            };

            match bincode::deserialize::<HikeSession>(&bytes) {
                Ok(session) => sessions.push((id, session)),
                Err(err) => tracing::warn!("Skipping corrupt pending session {:?}: {}", path, err),
            }
        }

        sessions.sort_by(|(_, a), (_, b)| a.started_at_ms.cmp(&b.started_at_ms));
        Ok(sessions)
    }

    pub async fn count(&self) -> Result<usize, TrackerError> {
        Ok(self.load_all().await?.len())
    }

    /// Uploads every pending session, oldest first, removing each one the backend took.
    /// Sessions with an upload already running are skipped. A failure on one session
    /// never stops the others from being tried.
    pub async fn resubmit(&self, uploader: &dyn SessionUploader) -> Result<ResubmitSummary, TrackerError> {
        let mut summary = ResubmitSummary::default();

        for (id, session) in self.load_all().await? {
            let Some(claim) = self.claim(&id) else {
                tracing::debug!("Pending session {} is being uploaded, skipping", id);
                summary.in_flight += 1;
                continue;
            };

            match uploader.submit(&session).await {
                Ok(_) => {
                    tracing::info!("Resubmitted pending session {}", id);
                    summary.uploaded += 1;
                }
                Err(err) if err.reached_backend() => {
                    tracing::warn!("Pending session {} was accepted with an unreadable reply: {}", id, err);
                    summary.uploaded += 1;
                }
                Err(err) => {
                    tracing::warn!("Pending session {} still not accepted: {}", id, err);
                    summary.failed += 1;
                    continue;
                }
            }

            if let Err(err) = self.remove(claim.id()).await {
                tracing::warn!("Resubmitted session {} but could not clear it: {}", id, err);
            }
        }

        Ok(summary)
    }
}
