//! Git notes store: the source of truth for memories.
//!
//! Notes live under namespaced refs (`<prefix>/<namespace>`) attached to
//! commits. Appends concatenate onto any existing note so a single commit
//! and namespace can carry multiple records; the codec tolerates the
//! multi-record stream on the way back out.

use crate::config::EngramConfig;
use crate::models::{ChangedFile, Domain, Namespace};
use crate::{Error, Result};
use git2::{ErrorCode, Oid, Repository, Signature};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Component, Path, PathBuf};

static NAMESPACE_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap()
});

static COMMITISH_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[a-zA-Z0-9_./@^~-]+$").unwrap()
});

/// Validates a namespace token for use in a ref name.
///
/// # Errors
///
/// Returns [`Error::Validation`] when the token is empty or carries
/// characters outside `[a-zA-Z0-9_-]`.
pub fn validate_namespace_token(token: &str) -> Result<()> {
    if NAMESPACE_RE.is_match(token) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "namespace '{token}' has characters outside [a-zA-Z0-9_-]"
        )))
    }
}

/// Validates a commit-ish argument before handing it to the resolver.
///
/// # Errors
///
/// Returns [`Error::Validation`] for empty input, a leading `-` (option
/// injection), or characters outside the commit-ish alphabet.
pub fn validate_commitish(commitish: &str) -> Result<()> {
    if commitish.starts_with('-') {
        return Err(Error::Validation(format!(
            "commit-ish '{commitish}' must not start with '-'"
        )));
    }
    if COMMITISH_RE.is_match(commitish) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "commit-ish '{commitish}' has invalid characters"
        )))
    }
}

/// Validates a repository-relative path argument.
///
/// # Errors
///
/// Returns [`Error::Validation`] for absolute paths, embedded NUL bytes, a
/// leading `-`, or `..` traversal components.
pub fn validate_path_arg(path: &str) -> Result<()> {
    if path.contains('\0') {
        return Err(Error::Validation("path contains a NUL byte".to_string()));
    }
    if path.starts_with('-') {
        return Err(Error::Validation(format!(
            "path '{path}' must not start with '-'"
        )));
    }
    let p = Path::new(path);
    if p.is_absolute() {
        return Err(Error::Validation(format!("path '{path}' is absolute")));
    }
    if p.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(Error::Validation(format!(
            "path '{path}' contains '..'"
        )));
    }
    Ok(())
}

/// Git-notes backed note store for one domain.
pub struct GitNotes {
    repo: Repository,
    repo_path: PathBuf,
    ref_prefix: String,
    domain: Domain,
}

impl GitNotes {
    /// Opens the store over an existing repository (discovers upward from
    /// `path` the way git itself does).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Git`] when no repository can be found.
    pub fn open(path: impl AsRef<Path>, ref_prefix: impl Into<String>) -> Result<Self> {
        let repo = Repository::discover(path.as_ref()).map_err(|e| map_git_error("open", &e))?;
        let repo_path = repo.path().to_path_buf();
        Ok(Self {
            repo,
            repo_path,
            ref_prefix: ref_prefix.into(),
            domain: Domain::Project,
        })
    }

    /// Returns a store bound to the given domain: the working repository for
    /// `project`, a bare repository under the data directory for `user`.
    ///
    /// The user repository is created (with an empty root commit for notes
    /// to attach to) on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Git`] when the repository cannot be opened or
    /// initialized.
    pub fn for_domain(config: &EngramConfig, domain: Domain) -> Result<Self> {
        match domain {
            Domain::Project => Self::open(&config.repo_path, &config.notes_ref_prefix),
            Domain::User => {
                let path = config.user_repo_path();
                let repo = if path.exists() {
                    Repository::open_bare(&path).map_err(|e| map_git_error("open_user_repo", &e))?
                } else {
                    init_user_repo(&path)?
                };
                let repo_path = repo.path().to_path_buf();
                Ok(Self {
                    repo,
                    repo_path,
                    ref_prefix: config.notes_ref_prefix.clone(),
                    domain: Domain::User,
                })
            },
        }
    }

    /// Returns the domain this store is bound to.
    #[must_use]
    pub const fn domain(&self) -> Domain {
        self.domain
    }

    /// Returns the path of the underlying repository (`.git` directory).
    #[must_use]
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Builds the full notes ref for a namespace.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRef`] when the combined name is not a valid
    /// ref.
    pub fn ref_for(&self, namespace: Namespace) -> Result<String> {
        validate_namespace_token(namespace.as_str())?;
        let refname = format!("{}/{}", self.ref_prefix, namespace.as_str());
        if git2::Reference::is_valid_name(&refname) {
            Ok(refname)
        } else {
            Err(Error::InvalidRef(refname))
        }
    }

    /// Resolves a commit-ish to a full commit id.
    ///
    /// # Errors
    ///
    /// - [`Error::NoCommits`] when the repository has no commits
    /// - [`Error::Validation`] for malformed commit-ish input
    /// - [`Error::Git`] for resolution failures
    pub fn resolve_commit(&self, commitish: &str) -> Result<String> {
        Ok(self.resolve_oid(commitish)?.to_string())
    }

    fn resolve_oid(&self, commitish: &str) -> Result<Oid> {
        validate_commitish(commitish)?;
        let object = self.repo.revparse_single(commitish).map_err(|e| {
            if self.repo.is_empty().unwrap_or(false) {
                Error::NoCommits
            } else {
                map_git_error("resolve_commit", &e)
            }
        })?;
        let commit = object
            .peel_to_commit()
            .map_err(|e| map_git_error("resolve_commit", &e))?;
        Ok(commit.id())
    }

    /// Appends `text` to the note attached to `commit` under the namespace,
    /// creating the note when absent.
    ///
    /// Atomic at the git layer: the namespaced ref either moves to the new
    /// note or stays untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCommits`], [`Error::Validation`], or
    /// [`Error::Git`].
    pub fn append_note(&self, namespace: Namespace, commit: &str, text: &str) -> Result<String> {
        let refname = self.ref_for(namespace)?;
        let oid = self.resolve_oid(commit)?;

        let combined = match self.note_message(&refname, oid)? {
            Some(mut existing) => {
                if !existing.ends_with('\n') {
                    existing.push('\n');
                }
                existing.push_str(text);
                existing
            },
            None => text.to_string(),
        };

        let sig = self.signature()?;
        self.repo
            .note(&sig, &sig, Some(&refname), oid, &combined, true)
            .map_err(|e| map_git_error("append_note", &e))?;

        metrics::counter!("engram_notes_appended_total", "namespace" => namespace.as_str())
            .increment(1);
        tracing::debug!(namespace = namespace.as_str(), commit = %oid, "appended note");
        Ok(oid.to_string())
    }

    /// Overwrites the note attached to `commit`, replacing all records.
    ///
    /// Used by status transitions and secrets rewrites; ordinary capture
    /// always appends.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCommits`], [`Error::Validation`], or
    /// [`Error::Git`].
    pub fn overwrite_note(&self, namespace: Namespace, commit: &str, text: &str) -> Result<()> {
        let refname = self.ref_for(namespace)?;
        let oid = self.resolve_oid(commit)?;
        let sig = self.signature()?;
        self.repo
            .note(&sig, &sig, Some(&refname), oid, text, true)
            .map_err(|e| map_git_error("overwrite_note", &e))?;
        Ok(())
    }

    /// Reads the note attached to `commit` under the namespace.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Git`] for failures other than a missing note.
    pub fn show_note(&self, namespace: Namespace, commit: &str) -> Result<Option<String>> {
        let refname = self.ref_for(namespace)?;
        let oid = self.resolve_oid(commit)?;
        self.note_message(&refname, oid)
    }

    fn note_message(&self, refname: &str, oid: Oid) -> Result<Option<String>> {
        match self.repo.find_note(Some(refname), oid) {
            Ok(note) => Ok(note.message().map(ToString::to_string)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(map_git_error("show_note", &e)),
        }
    }

    /// Removes the note attached to `commit` under the namespace.
    ///
    /// Returns `true` when a note existed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Git`] for failures other than a missing note.
    pub fn remove_note(&self, namespace: Namespace, commit: &str) -> Result<bool> {
        let refname = self.ref_for(namespace)?;
        let oid = self.resolve_oid(commit)?;
        let sig = self.signature()?;
        match self.repo.note_delete(oid, Some(refname.as_str()), &sig, &sig) {
            Ok(()) => Ok(true),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(map_git_error("remove_note", &e)),
        }
    }

    /// Lists `(note_id, commit_id)` pairs under the namespace.
    ///
    /// Order is unspecified but stable within a call. An absent ref yields
    /// an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Git`] when the notes iterator fails mid-walk.
    pub fn list_notes(&self, namespace: Namespace) -> Result<Vec<(String, String)>> {
        let refname = self.ref_for(namespace)?;
        let notes = match self.repo.notes(Some(&refname)) {
            Ok(iter) => iter,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(map_git_error("list_notes", &e)),
        };

        let mut out = Vec::new();
        for entry in notes {
            let (note_oid, commit_oid) = entry.map_err(|e| map_git_error("list_notes", &e))?;
            out.push((note_oid.to_string(), commit_oid.to_string()));
        }
        Ok(out)
    }

    /// Lists namespaces that have a notes ref in this repository.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Git`] when references cannot be enumerated.
    pub fn list_namespaces_used(&self) -> Result<Vec<Namespace>> {
        let glob = format!("{}/*", self.ref_prefix);
        let refs = self
            .repo
            .references_glob(&glob)
            .map_err(|e| map_git_error("list_namespaces", &e))?;

        let mut out = Vec::new();
        for reference in refs {
            let reference = reference.map_err(|e| map_git_error("list_namespaces", &e))?;
            let Some(name) = reference.name() else {
                continue;
            };
            let Some(suffix) = name.strip_prefix(&format!("{}/", self.ref_prefix)) else {
                continue;
            };
            if let Some(namespace) = Namespace::parse(suffix) {
                out.push(namespace);
            }
        }
        out.sort_by_key(Namespace::as_str);
        out.dedup();
        Ok(out)
    }

    /// Returns the files changed by `commit` relative to its first parent
    /// (the whole tree for a root commit), with their contents at that
    /// commit.
    ///
    /// Binary blobs are skipped. Returns `(files, truncated)` where
    /// `truncated` is set when any of the caps cut the result short.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Git`] when the diff cannot be computed.
    pub fn changed_files(
        &self,
        commit: &str,
        max_files: usize,
        max_file_bytes: usize,
        max_total_bytes: usize,
    ) -> Result<(Vec<ChangedFile>, bool)> {
        let oid = self.resolve_oid(commit)?;
        let commit = self
            .repo
            .find_commit(oid)
            .map_err(|e| map_git_error("changed_files", &e))?;
        let tree = commit
            .tree()
            .map_err(|e| map_git_error("changed_files", &e))?;
        let parent_tree = commit
            .parent(0)
            .ok()
            .and_then(|parent| parent.tree().ok());

        let diff = self
            .repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)
            .map_err(|e| map_git_error("changed_files", &e))?;

        let mut files = Vec::new();
        let mut total_bytes = 0usize;
        let mut truncated = false;

        for delta in diff.deltas() {
            if files.len() >= max_files {
                truncated = true;
                break;
            }
            let Some(path) = delta.new_file().path().map(|p| p.to_string_lossy().to_string())
            else {
                continue;
            };
            // Repo content is untrusted; never surface hostile paths.
            if validate_path_arg(&path).is_err() {
                continue;
            }
            let blob_id = delta.new_file().id();
            if blob_id.is_zero() {
                // Deletion: nothing to snapshot at this commit.
                continue;
            }
            let Ok(blob) = self.repo.find_blob(blob_id) else {
                continue;
            };
            if blob.is_binary() {
                continue;
            }
            if blob.size() > max_file_bytes {
                truncated = true;
                continue;
            }
            if total_bytes + blob.size() > max_total_bytes {
                truncated = true;
                break;
            }
            total_bytes += blob.size();
            files.push(ChangedFile {
                path,
                content: String::from_utf8_lossy(blob.content()).into_owned(),
            });
        }

        Ok((files, truncated))
    }

    fn signature(&self) -> Result<Signature<'static>> {
        self.repo.signature().or_else(|_| {
            Signature::now("engram", "engram@localhost")
                .map_err(|e| map_git_error("signature", &e))
        })
    }
}

/// Initializes the bare user-domain repository with an empty root commit.
fn init_user_repo(path: &Path) -> Result<Repository> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::PermissionDenied(format!("{}: {e}", parent.display())))?;
    }
    let repo = Repository::init_bare(path).map_err(|e| map_git_error("init_user_repo", &e))?;
    {
        let sig = Signature::now("engram", "engram@localhost")
            .map_err(|e| map_git_error("init_user_repo", &e))?;
        let tree_id = {
            let mut index = repo
                .index()
                .map_err(|e| map_git_error("init_user_repo", &e))?;
            index
                .write_tree()
                .map_err(|e| map_git_error("init_user_repo", &e))?
        };
        let tree = repo
            .find_tree(tree_id)
            .map_err(|e| map_git_error("init_user_repo", &e))?;
        repo.commit(Some("HEAD"), &sig, &sig, "memory root", &tree, &[])
            .map_err(|e| map_git_error("init_user_repo", &e))?;
    }
    tracing::info!(path = %path.display(), "initialized user memory repository");
    Ok(repo)
}

/// Maps a libgit2 error onto the crate taxonomy.
fn map_git_error(operation: &str, e: &git2::Error) -> Error {
    let message = e.message().to_lowercase();
    if message.contains("permission denied") {
        return Error::PermissionDenied(e.message().to_string());
    }
    match e.code() {
        ErrorCode::UnbornBranch => Error::NoCommits,
        ErrorCode::InvalidSpec => Error::InvalidRef(e.message().to_string()),
        _ => Error::Git {
            operation: operation.to_string(),
            cause: e.message().to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use tempfile::TempDir;

    fn create_test_repo() -> (TempDir, String) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let head = {
            let sig = Signature::now("test", "test@test.com").unwrap();
            let tree_id = repo.index().unwrap().write_tree().unwrap();
            let tree = repo.find_tree(tree_id).unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
                .unwrap()
        };
        (dir, head.to_string())
    }

    fn notes_for(dir: &TempDir) -> GitNotes {
        GitNotes::open(dir.path(), "refs/notes/mem").unwrap()
    }

    #[test]
    fn test_append_and_show() {
        let (dir, head) = create_test_repo();
        let notes = notes_for(&dir);

        assert!(notes.show_note(Namespace::Decisions, "HEAD").unwrap().is_none());

        notes
            .append_note(Namespace::Decisions, "HEAD", "first\n")
            .unwrap();
        let text = notes.show_note(Namespace::Decisions, &head).unwrap().unwrap();
        assert_eq!(text, "first\n");
    }

    #[test]
    fn test_append_concatenates() {
        let (dir, _head) = create_test_repo();
        let notes = notes_for(&dir);

        notes
            .append_note(Namespace::Decisions, "HEAD", "first\n")
            .unwrap();
        notes
            .append_note(Namespace::Decisions, "HEAD", "second\n")
            .unwrap();

        let text = notes.show_note(Namespace::Decisions, "HEAD").unwrap().unwrap();
        assert_eq!(text, "first\nsecond\n");
    }

    #[test]
    fn test_namespaces_are_separate_refs() {
        let (dir, _head) = create_test_repo();
        let notes = notes_for(&dir);

        notes
            .append_note(Namespace::Decisions, "HEAD", "a decision\n")
            .unwrap();
        notes
            .append_note(Namespace::Learnings, "HEAD", "a learning\n")
            .unwrap();

        assert_eq!(
            notes.show_note(Namespace::Decisions, "HEAD").unwrap().unwrap(),
            "a decision\n"
        );
        assert_eq!(
            notes.show_note(Namespace::Learnings, "HEAD").unwrap().unwrap(),
            "a learning\n"
        );
        assert_eq!(
            notes.list_namespaces_used().unwrap(),
            vec![Namespace::Decisions, Namespace::Learnings]
        );
    }

    #[test]
    fn test_list_and_remove() {
        let (dir, head) = create_test_repo();
        let notes = notes_for(&dir);

        assert!(notes.list_notes(Namespace::Decisions).unwrap().is_empty());

        notes
            .append_note(Namespace::Decisions, "HEAD", "payload\n")
            .unwrap();
        let listed = notes.list_notes(Namespace::Decisions).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].1, head);

        assert!(notes.remove_note(Namespace::Decisions, "HEAD").unwrap());
        assert!(!notes.remove_note(Namespace::Decisions, "HEAD").unwrap());
        assert!(notes.list_notes(Namespace::Decisions).unwrap().is_empty());
    }

    #[test]
    fn test_no_commits() {
        let dir = TempDir::new().unwrap();
        Repository::init(dir.path()).unwrap();
        let notes = notes_for(&dir);

        assert!(matches!(
            notes.append_note(Namespace::Decisions, "HEAD", "x\n"),
            Err(Error::NoCommits)
        ));
    }

    #[test]
    fn test_commitish_validation() {
        let (dir, _head) = create_test_repo();
        let notes = notes_for(&dir);

        assert!(matches!(
            notes.show_note(Namespace::Decisions, "--exec=evil"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            notes.show_note(Namespace::Decisions, "bad commit"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_resolve_commit_full_id() {
        let (dir, head) = create_test_repo();
        let notes = notes_for(&dir);
        assert_eq!(notes.resolve_commit("HEAD").unwrap(), head);
        assert_eq!(notes.resolve_commit(&head[..7]).unwrap(), head);
    }

    #[test]
    fn test_user_domain_repo_is_created() {
        let dir = TempDir::new().unwrap();
        let mut config = crate::config::EngramConfig::for_repo(dir.path());
        config.data_dir = dir.path().join("data");

        let notes = GitNotes::for_domain(&config, Domain::User).unwrap();
        assert_eq!(notes.domain(), Domain::User);

        // The root commit exists, so captures can attach immediately.
        notes
            .append_note(Namespace::Patterns, "HEAD", "user-scoped\n")
            .unwrap();
        assert!(notes.show_note(Namespace::Patterns, "HEAD").unwrap().is_some());

        // Reopening finds the same repository.
        let again = GitNotes::for_domain(&config, Domain::User).unwrap();
        assert!(again.show_note(Namespace::Patterns, "HEAD").unwrap().is_some());
    }

    #[test]
    fn test_validate_path_arg() {
        assert!(validate_path_arg("src/lib.rs").is_ok());
        assert!(validate_path_arg("/etc/passwd").is_err());
        assert!(validate_path_arg("../escape").is_err());
        assert!(validate_path_arg("-rf").is_err());
        assert!(validate_path_arg("a\0b").is_err());
    }
}
