//! Service layer: capture, recall, sync, and their composition.

mod capture;
mod container;
mod lock;
mod recall;
mod rrf;
mod sync;

pub use capture::CaptureService;
pub use container::{Container, DomainStack};
pub use lock::{CaptureLock, CaptureLockGuard};
pub use recall::{
    MAX_HYDRATED_FILE_BYTES, MAX_HYDRATED_FILES, MAX_HYDRATED_TOTAL_BYTES, RecallService,
};
pub use rrf::{RrfConfig, RrfFusion};
pub use sync::{SyncReport, SyncService, content_hash};
