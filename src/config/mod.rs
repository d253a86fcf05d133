//! Configuration management.
//!
//! Configuration merges three layers, later layers winning:
//!
//! 1. Built-in defaults
//! 2. Config files: `~/.config/engram/config.toml`, then `<repo>/.engram/config.toml`
//! 3. `ENGRAM_*` environment variables
//!
//! String values support `${VAR}` environment expansion.

use crate::security::SecretStrategy;
use crate::{Error, Result};
use serde::Deserialize;
use std::borrow::Cow;
use std::path::{Path, PathBuf};

/// Default notes ref prefix.
pub const DEFAULT_NOTES_REF_PREFIX: &str = "refs/notes/mem";

/// Default embedding dimension.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;

/// Default cap on memory content, in UTF-8 bytes.
pub const DEFAULT_MAX_CONTENT_BYTES: usize = 102_400;

/// Default cap on summary length, in Unicode scalar values.
pub const DEFAULT_MAX_SUMMARY_CHARS: usize = 100;

/// Expands environment variable references in a string.
///
/// Supports `${VAR_NAME}` syntax. If the variable is not set, the original
/// reference is preserved. Uses `Cow<str>` to avoid allocation when no
/// expansion is needed.
fn expand_env_vars(input: &str) -> Cow<'_, str> {
    if !input.contains("${") {
        return Cow::Borrowed(input);
    }

    let mut result = input.to_string();
    let mut start = 0;

    while let Some(var_start) = result[start..].find("${") {
        let var_start = start + var_start;
        if let Some(var_end) = result[var_start..].find('}') {
            let var_end = var_start + var_end;
            let var_name = &result[var_start + 2..var_end];
            if let Ok(value) = std::env::var(var_name) {
                result.replace_range(var_start..=var_end, &value);
                start = var_start + value.len();
            } else {
                start = var_end + 1;
            }
        } else {
            break;
        }
    }

    Cow::Owned(result)
}

/// Main configuration for engram.
#[derive(Debug, Clone)]
pub struct EngramConfig {
    /// Path to the working git repository (project domain).
    pub repo_path: PathBuf,
    /// Root for all derived storage (indexes, user repo, audit, lock).
    pub data_dir: PathBuf,
    /// Prefix for namespaced notes refs.
    pub notes_ref_prefix: String,
    /// Embedding provider settings.
    pub embedding: EmbeddingConfig,
    /// Validation and contention limits.
    pub limits: LimitsConfig,
    /// Secrets filter policy.
    pub secrets: SecretsConfig,
    /// Hybrid search fusion settings.
    pub hybrid: HybridConfig,
    /// Config files that were loaded (for debugging).
    pub config_sources: Vec<PathBuf>,
}

/// Embedding provider settings.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Model identifier, loaded lazily on first embed. `None` selects the
    /// deterministic hashed provider.
    pub model_id: Option<String>,
    /// Fixed embedding dimension D.
    pub dimensions: usize,
    /// Consecutive failures before the circuit opens.
    pub breaker_failure_threshold: u32,
    /// Cool-down before the circuit half-opens, in milliseconds.
    pub breaker_reset_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: None,
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            breaker_failure_threshold: 5,
            breaker_reset_ms: 30_000,
        }
    }
}

/// Validation and contention limits.
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Capture validation cap on content, in UTF-8 bytes.
    pub max_content_bytes: usize,
    /// Capture validation cap on summary, in Unicode scalar values.
    pub max_summary_chars: usize,
    /// Total wait budget for the capture lock, in seconds.
    pub lock_timeout_secs: u64,
    /// `SQLite` busy timeout, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_content_bytes: DEFAULT_MAX_CONTENT_BYTES,
            max_summary_chars: DEFAULT_MAX_SUMMARY_CHARS,
            lock_timeout_secs: 5,
            busy_timeout_ms: 5000,
        }
    }
}

/// Secrets filter policy.
#[derive(Debug, Clone)]
pub struct SecretsConfig {
    /// Master switch for the filter.
    pub enabled: bool,
    /// Strategy applied to detection kinds without an explicit override.
    pub default_strategy: SecretStrategy,
    /// Whether the high-entropy detector runs.
    pub entropy_enabled: bool,
    /// Whether PII detectors run.
    pub pii_enabled: bool,
    /// Minimum detection confidence to act on.
    pub confidence_threshold: f32,
    /// Override for the audit log directory; defaults to `<data_dir>/audit`.
    pub audit_dir: Option<PathBuf>,
    /// Rotate the audit log past this size.
    pub audit_max_size_bytes: u64,
    /// Keep at most this many rotated audit files.
    pub audit_max_files: usize,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_strategy: SecretStrategy::Redact,
            entropy_enabled: true,
            pii_enabled: true,
            confidence_threshold: 0.5,
            audit_dir: None,
            audit_max_size_bytes: 5 * 1024 * 1024,
            audit_max_files: 5,
        }
    }
}

/// Hybrid search fusion settings.
#[derive(Debug, Clone)]
pub struct HybridConfig {
    /// RRF dampening constant.
    pub rrf_k: f32,
    /// Weight of the vector ranking in the fusion.
    pub vector_weight: f32,
    /// Weight of the BM25 ranking in the fusion.
    pub bm25_weight: f32,
    /// Run the two source queries on separate threads.
    pub enable_parallel: bool,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            vector_weight: 1.0,
            bm25_weight: 1.0,
            enable_parallel: true,
        }
    }
}

/// Partial configuration as read from a TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    data_dir: Option<String>,
    notes_ref_prefix: Option<String>,
    #[serde(default)]
    embedding: EmbeddingFile,
    #[serde(default)]
    limits: LimitsFile,
    #[serde(default)]
    secrets: SecretsFile,
    #[serde(default)]
    hybrid: HybridFile,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct EmbeddingFile {
    model_id: Option<String>,
    dimensions: Option<usize>,
    breaker_failure_threshold: Option<u32>,
    breaker_reset_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LimitsFile {
    max_content_bytes: Option<usize>,
    max_summary_chars: Option<usize>,
    lock_timeout_secs: Option<u64>,
    busy_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SecretsFile {
    enabled: Option<bool>,
    default_strategy: Option<String>,
    entropy_enabled: Option<bool>,
    pii_enabled: Option<bool>,
    confidence_threshold: Option<f32>,
    audit_dir: Option<String>,
    audit_max_size_bytes: Option<u64>,
    audit_max_files: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct HybridFile {
    rrf_k: Option<f32>,
    vector_weight: Option<f32>,
    bm25_weight: Option<f32>,
    enable_parallel: Option<bool>,
}

impl EngramConfig {
    /// Builds a configuration with defaults rooted at the given repository.
    #[must_use]
    pub fn for_repo(repo_path: impl Into<PathBuf>) -> Self {
        let repo_path = repo_path.into();
        let data_dir = repo_path.join(".git").join("engram");
        Self {
            repo_path,
            data_dir,
            notes_ref_prefix: DEFAULT_NOTES_REF_PREFIX.to_string(),
            embedding: EmbeddingConfig::default(),
            limits: LimitsConfig::default(),
            secrets: SecretsConfig::default(),
            hybrid: HybridConfig::default(),
            config_sources: Vec::new(),
        }
    }

    /// Loads configuration for a repository: defaults, config files, then
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when a config file exists but cannot be
    /// parsed.
    pub fn load(repo_path: impl Into<PathBuf>) -> Result<Self> {
        let mut config = Self::for_repo(repo_path);

        if let Some(dirs) = directories::ProjectDirs::from("", "", "engram") {
            let user_config = dirs.config_dir().join("config.toml");
            config.merge_file(&user_config)?;
        }
        let repo_config = config.repo_path.join(".engram").join("config.toml");
        config.merge_file(&repo_config)?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// Merges a single TOML config file, if it exists.
    fn merge_file(&mut self, path: &Path) -> Result<()> {
        let Ok(raw) = std::fs::read_to_string(path) else {
            return Ok(());
        };

        let file: ConfigFile = toml::from_str(&raw).map_err(|e| {
            Error::Validation(format!("config file {}: {e}", path.display()))
        })?;

        if let Some(dir) = file.data_dir {
            self.data_dir = PathBuf::from(expand_env_vars(&dir).into_owned());
        }
        if let Some(prefix) = file.notes_ref_prefix {
            self.notes_ref_prefix = prefix;
        }
        if let Some(model) = file.embedding.model_id {
            self.embedding.model_id = Some(expand_env_vars(&model).into_owned());
        }
        if let Some(dim) = file.embedding.dimensions {
            self.embedding.dimensions = dim;
        }
        if let Some(threshold) = file.embedding.breaker_failure_threshold {
            self.embedding.breaker_failure_threshold = threshold.max(1);
        }
        if let Some(reset) = file.embedding.breaker_reset_ms {
            self.embedding.breaker_reset_ms = reset;
        }
        if let Some(v) = file.limits.max_content_bytes {
            self.limits.max_content_bytes = v;
        }
        if let Some(v) = file.limits.max_summary_chars {
            self.limits.max_summary_chars = v;
        }
        if let Some(v) = file.limits.lock_timeout_secs {
            self.limits.lock_timeout_secs = v;
        }
        if let Some(v) = file.limits.busy_timeout_ms {
            self.limits.busy_timeout_ms = v.max(5000);
        }
        if let Some(v) = file.secrets.enabled {
            self.secrets.enabled = v;
        }
        if let Some(strategy) = file.secrets.default_strategy {
            self.secrets.default_strategy = SecretStrategy::parse(&strategy)
                .ok_or_else(|| Error::Validation(format!("unknown secrets strategy: {strategy}")))?;
        }
        if let Some(v) = file.secrets.entropy_enabled {
            self.secrets.entropy_enabled = v;
        }
        if let Some(v) = file.secrets.pii_enabled {
            self.secrets.pii_enabled = v;
        }
        if let Some(v) = file.secrets.confidence_threshold {
            self.secrets.confidence_threshold = v.clamp(0.0, 1.0);
        }
        if let Some(dir) = file.secrets.audit_dir {
            self.secrets.audit_dir = Some(PathBuf::from(expand_env_vars(&dir).into_owned()));
        }
        if let Some(v) = file.secrets.audit_max_size_bytes {
            self.secrets.audit_max_size_bytes = v;
        }
        if let Some(v) = file.secrets.audit_max_files {
            self.secrets.audit_max_files = v.max(1);
        }
        if let Some(v) = file.hybrid.rrf_k {
            self.hybrid.rrf_k = v;
        }
        if let Some(v) = file.hybrid.vector_weight {
            self.hybrid.vector_weight = v;
        }
        if let Some(v) = file.hybrid.bm25_weight {
            self.hybrid.bm25_weight = v;
        }
        if let Some(v) = file.hybrid.enable_parallel {
            self.hybrid.enable_parallel = v;
        }

        self.config_sources.push(path.to_path_buf());
        Ok(())
    }

    /// Applies `ENGRAM_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ENGRAM_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ENGRAM_NOTES_REF_PREFIX") {
            self.notes_ref_prefix = v;
        }
        if let Ok(v) = std::env::var("ENGRAM_EMBEDDING_MODEL") {
            self.embedding.model_id = Some(v);
        }
        if let Ok(v) = std::env::var("ENGRAM_EMBEDDING_DIMENSIONS")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.embedding.dimensions = parsed;
        }
        if let Ok(v) = std::env::var("ENGRAM_MAX_CONTENT_BYTES")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.limits.max_content_bytes = parsed;
        }
        if let Ok(v) = std::env::var("ENGRAM_MAX_SUMMARY_CHARS")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.limits.max_summary_chars = parsed;
        }
        if let Ok(v) = std::env::var("ENGRAM_LOCK_TIMEOUT_SECS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.limits.lock_timeout_secs = parsed;
        }
        if let Ok(v) = std::env::var("ENGRAM_BUSY_TIMEOUT_MS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.limits.busy_timeout_ms = parsed.max(5000);
        }
        if let Ok(v) = std::env::var("ENGRAM_SECRETS_ENABLED") {
            self.secrets.enabled = v.to_lowercase() == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("ENGRAM_SECRETS_STRATEGY")
            && let Some(strategy) = SecretStrategy::parse(&v)
        {
            self.secrets.default_strategy = strategy;
        }
        if let Ok(v) = std::env::var("ENGRAM_HYBRID_PARALLEL") {
            self.hybrid.enable_parallel = v.to_lowercase() == "true" || v == "1";
        }
    }

    /// Path of the project-domain index database.
    #[must_use]
    pub fn project_index_path(&self) -> PathBuf {
        self.data_dir.join("index.db")
    }

    /// Path of the user-domain index database.
    #[must_use]
    pub fn user_index_path(&self) -> PathBuf {
        self.data_dir.join("user-index.db")
    }

    /// Path of the user-domain bare notes repository.
    #[must_use]
    pub fn user_repo_path(&self) -> PathBuf {
        self.data_dir.join("user-memories.git")
    }

    /// Directory for the rotating audit logs.
    #[must_use]
    pub fn audit_dir(&self) -> PathBuf {
        self.secrets
            .audit_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("audit"))
    }

    /// Directory for cached embedding model files.
    #[must_use]
    pub fn models_dir(&self) -> PathBuf {
        self.data_dir.join("models")
    }

    /// Path of the advisory capture lock file.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join(".capture.lock")
    }

    /// Path of the secrets allowlist store.
    #[must_use]
    pub fn allowlist_path(&self) -> PathBuf {
        self.data_dir.join("secrets-allowlist.json")
    }

    /// Path of the implicit-capture pending store.
    #[must_use]
    pub fn pending_path(&self) -> PathBuf {
        self.data_dir.join("pending.json")
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngramConfig::for_repo("/tmp/repo");
        assert_eq!(config.notes_ref_prefix, DEFAULT_NOTES_REF_PREFIX);
        assert_eq!(config.limits.max_content_bytes, 102_400);
        assert_eq!(config.limits.max_summary_chars, 100);
        assert_eq!(config.limits.busy_timeout_ms, 5000);
        assert_eq!(config.embedding.dimensions, 384);
        assert!((config.hybrid.rrf_k - 60.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_derived_paths() {
        let config = EngramConfig::for_repo("/tmp/repo");
        assert!(config.project_index_path().ends_with("index.db"));
        assert!(config.user_index_path().ends_with("user-index.db"));
        assert!(config.user_repo_path().ends_with("user-memories.git"));
        assert!(config.lock_path().ends_with(".capture.lock"));
        assert!(config.audit_dir().ends_with("audit"));
    }

    #[test]
    fn test_merge_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
notes_ref_prefix = "refs/notes/custom"

[limits]
max_summary_chars = 80

[hybrid]
vector_weight = 2.0
"#,
        )
        .unwrap();

        let mut config = EngramConfig::for_repo("/tmp/repo");
        config.merge_file(&path).unwrap();

        assert_eq!(config.notes_ref_prefix, "refs/notes/custom");
        assert_eq!(config.limits.max_summary_chars, 80);
        assert!((config.hybrid.vector_weight - 2.0).abs() < f32::EPSILON);
        assert_eq!(config.config_sources, vec![path]);
    }

    #[test]
    fn test_merge_missing_file_is_noop() {
        let mut config = EngramConfig::for_repo("/tmp/repo");
        config
            .merge_file(Path::new("/nonexistent/config.toml"))
            .unwrap();
        assert!(config.config_sources.is_empty());
    }

    #[test]
    fn test_malformed_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not = [valid").unwrap();

        let mut config = EngramConfig::for_repo("/tmp/repo");
        assert!(config.merge_file(&path).is_err());
    }

    #[test]
    fn test_expand_env_vars_passthrough() {
        assert_eq!(expand_env_vars("no vars here"), "no vars here");
        assert_eq!(expand_env_vars("${DEFINITELY_NOT_SET_XYZ}"), "${DEFINITELY_NOT_SET_XYZ}");
    }
}
