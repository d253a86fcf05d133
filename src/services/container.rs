//! Explicit service composition.
//!
//! No process-global singletons: one [`Container`] owns the shared pieces
//! (embedding provider, secrets filter, audit log) and builds domain-scoped
//! service instances on demand. Per-domain indexes initialize lazily and are
//! cached; the user-domain repository is created on first use.

use super::capture::CaptureService;
use super::lock::CaptureLock;
use super::recall::RecallService;
use super::sync::SyncService;
use crate::config::EngramConfig;
use crate::embedding::EmbeddingProvider;
use crate::git::GitNotes;
use crate::models::Domain;
use crate::security::{AuditLogger, SecretsAllowlist, SecretsFilter};
use crate::storage::MemoryIndex;
use crate::Result;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;

/// One domain's note store plus its derived index.
pub struct DomainStack {
    /// The domain this stack serves.
    pub domain: Domain,
    /// Note store (source of truth).
    pub notes: GitNotes,
    /// Derived index.
    pub index: Arc<MemoryIndex>,
}

/// Builds and caches the component graph for both domains.
pub struct Container {
    config: EngramConfig,
    embedder: Arc<EmbeddingProvider>,
    audit: Arc<AuditLogger>,
    secrets: Arc<SecretsFilter>,
    project_index: OnceCell<Arc<MemoryIndex>>,
    user_index: OnceCell<Arc<MemoryIndex>>,
}

impl Container {
    /// Assembles the container.
    ///
    /// Indexes are not opened here; each domain's index initializes (and
    /// migrates) on first use.
    ///
    /// # Errors
    ///
    /// Returns an error when the allowlist store cannot be loaded.
    pub fn new(config: EngramConfig) -> Result<Self> {
        let audit = Arc::new(AuditLogger::new(
            config.audit_dir(),
            config.secrets.audit_max_size_bytes,
            config.secrets.audit_max_files,
        ));
        let allowlist = SecretsAllowlist::load(config.allowlist_path())?;
        let secrets = Arc::new(SecretsFilter::new(
            config.secrets.clone(),
            allowlist,
            Arc::clone(&audit),
        ));
        let embedder = Arc::new(EmbeddingProvider::new(
            config.embedding.clone(),
            config.models_dir(),
        ));
        Ok(Self {
            config,
            embedder,
            audit,
            secrets,
            project_index: OnceCell::new(),
            user_index: OnceCell::new(),
        })
    }

    /// Returns the loaded configuration.
    #[must_use]
    pub const fn config(&self) -> &EngramConfig {
        &self.config
    }

    /// Returns the shared embedding provider.
    #[must_use]
    pub const fn embedder(&self) -> &Arc<EmbeddingProvider> {
        &self.embedder
    }

    /// Returns the shared secrets filter.
    #[must_use]
    pub const fn secrets(&self) -> &Arc<SecretsFilter> {
        &self.secrets
    }

    /// Returns the shared audit logger.
    #[must_use]
    pub const fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    /// Returns (initializing on first access) a domain's index.
    ///
    /// # Errors
    ///
    /// Propagates open and migration failures; a migration failure is fatal
    /// for the process.
    pub fn index_for(&self, domain: Domain) -> Result<Arc<MemoryIndex>> {
        let cell = match domain {
            Domain::Project => &self.project_index,
            Domain::User => &self.user_index,
        };
        let path = match domain {
            Domain::Project => self.config.project_index_path(),
            Domain::User => self.config.user_index_path(),
        };
        cell.get_or_try_init(|| {
            MemoryIndex::open(path, self.config.limits.busy_timeout_ms).map(Arc::new)
        })
        .cloned()
    }

    /// Builds a domain stack (fresh note store handle, cached index).
    ///
    /// # Errors
    ///
    /// Propagates repository and index failures.
    pub fn stack_for(&self, domain: Domain) -> Result<DomainStack> {
        Ok(DomainStack {
            domain,
            notes: GitNotes::for_domain(&self.config, domain)?,
            index: self.index_for(domain)?,
        })
    }

    /// Builds a capture service for one domain.
    ///
    /// # Errors
    ///
    /// Propagates repository and index failures.
    pub fn capture_service(&self, domain: Domain) -> Result<CaptureService> {
        let stack = self.stack_for(domain)?;
        Ok(CaptureService::new(
            domain,
            stack.notes,
            stack.index,
            Arc::clone(&self.embedder),
            Arc::clone(&self.secrets),
            self.capture_lock(),
            self.config.limits.clone(),
        ))
    }

    /// Builds a recall service over one domain, or both when `None`.
    ///
    /// # Errors
    ///
    /// Propagates repository and index failures.
    pub fn recall_service(&self, domain: Option<Domain>) -> Result<RecallService> {
        let domains: &[Domain] = match domain {
            Some(Domain::Project) => &[Domain::Project],
            Some(Domain::User) => &[Domain::User],
            None => Domain::all(),
        };
        let mut stacks = Vec::with_capacity(domains.len());
        for d in domains {
            stacks.push(self.stack_for(*d)?);
        }
        Ok(RecallService::new(
            self.config.hybrid.clone(),
            Arc::clone(&self.embedder),
            stacks,
        ))
    }

    /// Builds a sync service for one domain.
    ///
    /// # Errors
    ///
    /// Propagates repository and index failures.
    pub fn sync_service(&self, domain: Domain) -> Result<SyncService> {
        let stack = self.stack_for(domain)?;
        Ok(SyncService::new(
            domain,
            stack.notes,
            stack.index,
            Arc::clone(&self.embedder),
        ))
    }

    /// The advisory capture lock shared by every capture in this data dir.
    #[must_use]
    pub fn capture_lock(&self) -> CaptureLock {
        CaptureLock::new(
            self.config.lock_path(),
            Duration::from_secs(self.config.limits.lock_timeout_secs),
        )
    }
}
