//! Secrets detection, filtering, allowlisting, and the audit log.

mod allowlist;
mod audit;
mod filter;
mod secrets;

pub use allowlist::{AllowlistEntry, SecretsAllowlist};
pub use audit::{AuditEvent, AuditKind, AuditLogger, AuditStats};
pub use filter::{FilterAction, FilterOutcome, ScanOutcome, SecretStrategy, SecretsFilter};
pub use secrets::{Detection, DetectionKind, luhn_valid, shannon_entropy};
