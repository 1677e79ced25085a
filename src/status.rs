//! Status store: per-application and per-host suspension status.
//!
//! Status is only read or written through an [`ApplicationLock`], which holds
//! the application's mutual-exclusion lock for as long as it lives (or, for
//! batch contexts, until the operation context is closed).
//!
//! [`InMemoryStatusService`] keeps everything in memory and optionally
//! persists a JSON snapshot after each mutation, written to a temporary file
//! and renamed into place.

use crate::context::{LockRelease, OperationContext};
use crate::error::{OrchestratorError, Result};
use crate::types::{ApplicationReference, ApplicationStatus, HostInfo, HostName, HostStatus};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lock-protected access to the status of one application.
pub trait ApplicationLock: Send {
    fn application(&self) -> &ApplicationReference;

    fn application_status(&self) -> ApplicationStatus;

    /// No-op when the lock was taken by a probe context.
    fn set_application_status(&mut self, status: ApplicationStatus) -> Result<()>;

    fn host_info(&self, host: &HostName) -> HostInfo;

    /// Every host of the application with a non-default status.
    fn host_infos(&self) -> BTreeMap<HostName, HostInfo>;

    /// No-op when the lock was taken by a probe context. Suspending an already
    /// suspended host keeps its original `suspended_since`.
    fn set_host_status(&mut self, host: &HostName, status: HostStatus) -> Result<()>;
}

/// Durable, lock-protected status store.
#[async_trait]
pub trait StatusService: Send + Sync {
    /// Acquire the lock of `application`, waiting at most until the context
    /// deadline. Reuses the lock when the context tree already holds it.
    async fn lock_application(
        &self,
        ctx: &OperationContext,
        application: &ApplicationReference,
    ) -> Result<Box<dyn ApplicationLock>>;

    /// Applications whose committed status is ALLOWED_TO_BE_DOWN.
    fn suspended_applications(&self) -> BTreeSet<ApplicationReference>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StatusData {
    #[serde(default)]
    applications: BTreeMap<ApplicationReference, ApplicationStatus>,
    #[serde(default)]
    hosts: BTreeMap<ApplicationReference, BTreeMap<HostName, HostInfo>>,
}

#[derive(Default)]
struct LockStats {
    acquired: AtomicU64,
    reused: AtomicU64,
    timed_out: AtomicU64,
}

/// Lock statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusStats {
    pub acquired: u64,
    pub reused: u64,
    pub timed_out: u64,
    pub suspended_applications: usize,
}

/// In-memory status store with optional file persistence.
pub struct InMemoryStatusService {
    locks: Mutex<HashMap<ApplicationReference, Arc<tokio::sync::Mutex<()>>>>,
    data: Arc<RwLock<StatusData>>,
    path: Option<PathBuf>,
    stats: LockStats,
}

impl InMemoryStatusService {
    /// Create an empty, memory-only store.
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            data: Arc::new(RwLock::new(StatusData::default())),
            path: None,
            stats: LockStats::default(),
        }
    }

    /// Open a store persisted at `path`, loading existing status if present.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let data: StatusData = serde_json::from_str(&content)?;
            info!(
                path = %path.display(),
                applications = data.applications.len(),
                "Loaded persisted status"
            );
            data
        } else {
            StatusData::default()
        };

        Ok(Self {
            locks: Mutex::new(HashMap::new()),
            data: Arc::new(RwLock::new(data)),
            path: Some(path),
            stats: LockStats::default(),
        })
    }

    pub fn stats(&self) -> StatusStats {
        StatusStats {
            acquired: self.stats.acquired.load(Ordering::Relaxed),
            reused: self.stats.reused.load(Ordering::Relaxed),
            timed_out: self.stats.timed_out.load(Ordering::Relaxed),
            suspended_applications: self.suspended_applications().len(),
        }
    }

    fn mutex_for(&self, application: &ApplicationReference) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(
            locks
                .entry(application.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}

impl Default for InMemoryStatusService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatusService for InMemoryStatusService {
    async fn lock_application(
        &self,
        ctx: &OperationContext,
        application: &ApplicationReference,
    ) -> Result<Box<dyn ApplicationLock>> {
        let mut release = None;

        if ctx.has_lock(application) {
            self.stats.reused.fetch_add(1, Ordering::Relaxed);
            debug!(operation_id = %ctx.id(), application = %application, "Reusing held application lock");
        } else {
            let mutex = self.mutex_for(application);
            let wait = ctx.remaining()?;
            let guard = match tokio::time::timeout(wait, mutex.lock_owned()).await {
                Ok(guard) => guard,
                Err(_) => {
                    self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                    warn!(operation_id = %ctx.id(), application = %application, "Timed out waiting for application lock");
                    return Err(OrchestratorError::LockTimeout(application.clone()));
                }
            };
            self.stats.acquired.fetch_add(1, Ordering::Relaxed);

            let unlock: LockRelease = Box::new(move || drop(guard));
            if let Err(unlock) = ctx.register_lock_acquisition(application, unlock) {
                release = Some(unlock);
            }
        }

        Ok(Box::new(InMemoryApplicationLock {
            application: application.clone(),
            probe: ctx.is_probe(),
            data: Arc::clone(&self.data),
            path: self.path.clone(),
            release,
        }))
    }

    fn suspended_applications(&self) -> BTreeSet<ApplicationReference> {
        self.data
            .read()
            .applications
            .iter()
            .filter(|(_, status)| **status == ApplicationStatus::AllowedToBeDown)
            .map(|(app, _)| app.clone())
            .collect()
    }
}

struct InMemoryApplicationLock {
    application: ApplicationReference,
    probe: bool,
    data: Arc<RwLock<StatusData>>,
    path: Option<PathBuf>,
    release: Option<LockRelease>,
}

impl InMemoryApplicationLock {
    fn persist(&self, data: &StatusData) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(data)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Apply `change` to a copy of the status, persist the copy, and publish
    /// it only once the write succeeded.
    fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut StatusData),
    {
        let mut data = self.data.write();
        let mut next = data.clone();
        change(&mut next);
        self.persist(&next)?;
        *data = next;
        Ok(())
    }
}

impl ApplicationLock for InMemoryApplicationLock {
    fn application(&self) -> &ApplicationReference {
        &self.application
    }

    fn application_status(&self) -> ApplicationStatus {
        self.data
            .read()
            .applications
            .get(&self.application)
            .copied()
            .unwrap_or_default()
    }

    fn set_application_status(&mut self, status: ApplicationStatus) -> Result<()> {
        if self.probe {
            return Ok(());
        }

        let application = &self.application;
        self.update(|data| {
            match status {
                ApplicationStatus::NoRemarks => data.applications.remove(application),
                ApplicationStatus::AllowedToBeDown => {
                    data.applications.insert(application.clone(), status)
                }
            };
        })
    }

    fn host_info(&self, host: &HostName) -> HostInfo {
        self.data
            .read()
            .hosts
            .get(&self.application)
            .and_then(|hosts| hosts.get(host))
            .copied()
            .unwrap_or_default()
    }

    fn host_infos(&self) -> BTreeMap<HostName, HostInfo> {
        self.data
            .read()
            .hosts
            .get(&self.application)
            .cloned()
            .unwrap_or_default()
    }

    fn set_host_status(&mut self, host: &HostName, status: HostStatus) -> Result<()> {
        if self.probe {
            return Ok(());
        }

        let application = &self.application;
        self.update(|data| match status {
            HostStatus::NoRemarks => {
                if let Some(hosts) = data.hosts.get_mut(application) {
                    hosts.remove(host);
                    if hosts.is_empty() {
                        data.hosts.remove(application);
                    }
                }
            }
            HostStatus::AllowedToBeDown => {
                let hosts = data.hosts.entry(application.clone()).or_default();
                let info = hosts.entry(host.clone()).or_default();
                if !info.is_suspended() {
                    *info = HostInfo::allowed_to_be_down(Utc::now());
                }
            }
        })
    }
}

impl Drop for InMemoryApplicationLock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}
