//! Recall pipeline integration tests.
//!
//! Hybrid/vector/text search over captured memories, cross-domain merging,
//! filters, and progressive hydration.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use engram::config::EngramConfig;
use engram::models::{
    CaptureInput, DetailLevel, Domain, MemoryStatus, Namespace, SearchFilter, SearchMode,
};
use engram::services::Container;
use git2::{Repository, Signature};
use std::path::Path;
use tempfile::TempDir;

fn test_env() -> (TempDir, Container) {
    let dir = TempDir::new().expect("tempdir");
    let repo_path = dir.path().join("repo");
    let repo = Repository::init(&repo_path).expect("init repo");
    {
        let sig = Signature::now("test", "test@test.com").unwrap();
        let tree_id = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
            .unwrap();
    }

    let mut config = EngramConfig::for_repo(&repo_path);
    config.data_dir = dir.path().join("data");
    (dir, Container::new(config).expect("container"))
}

fn commit_file(repo_path: &Path, name: &str, content: &str, message: &str) -> String {
    let repo = Repository::open(repo_path).unwrap();
    std::fs::write(repo.workdir().unwrap().join(name), content).unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new(name)).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = Signature::now("test", "test@test.com").unwrap();
    let parent = repo.head().unwrap().peel_to_commit().unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])
        .unwrap()
        .to_string()
}

fn capture(container: &Container, namespace: Namespace, summary: &str, content: &str) -> String {
    let service = container.capture_service(Domain::Project).unwrap();
    let result = service
        .capture(CaptureInput {
            namespace,
            summary: summary.to_string(),
            content: content.to_string(),
            ..CaptureInput::default()
        })
        .unwrap();
    result.memory.id.as_str().to_string()
}

#[test]
fn test_hybrid_search_ranks_match_first() {
    let (_dir, container) = test_env();
    capture(
        &container,
        Namespace::Decisions,
        "Use JWT for API auth",
        "signed tokens guard the API",
    );
    capture(
        &container,
        Namespace::Decisions,
        "Database connection pooling",
        "keep a warm pool of connections",
    );
    capture(
        &container,
        Namespace::Learnings,
        "CI cache eviction",
        "layer cache expires weekly",
    );

    let service = container.recall_service(Some(Domain::Project)).unwrap();
    let results = service
        .search(
            "JWT API auth",
            5,
            &SearchFilter::new(),
            SearchMode::Hybrid,
        )
        .unwrap();

    assert!(!results.is_empty());
    assert_eq!(results[0].memory.summary, "Use JWT for API auth");
    assert!(results[0].score > 0.0);
}

#[test]
fn test_vector_similarity_threshold() {
    let (_dir, container) = test_env();
    capture(
        &container,
        Namespace::Decisions,
        "Use JWT for API auth",
        "signed tokens",
    );

    let service = container.recall_service(Some(Domain::Project)).unwrap();
    let results = service
        .search(
            "Use JWT for API auth",
            5,
            &SearchFilter::new(),
            SearchMode::Vector,
        )
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(
        results[0].score >= 0.5,
        "expected similarity >= 0.5, got {}",
        results[0].score
    );

    // An unrelated query clears nothing at a high cutoff.
    let results = service
        .search(
            "kubernetes ingress annotations",
            5,
            &SearchFilter::new().with_min_similarity(0.9),
            SearchMode::Vector,
        )
        .unwrap();
    assert!(results.is_empty());
}

#[test]
fn test_text_mode_finds_unembedded_terms() {
    let (_dir, container) = test_env();
    capture(
        &container,
        Namespace::Learnings,
        "SIGPIPE on closed sockets",
        "write after shutdown raises SIGPIPE",
    );

    let service = container.recall_service(Some(Domain::Project)).unwrap();
    let results = service
        .search("sigpipe", 5, &SearchFilter::new(), SearchMode::Text)
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].memory.namespace, Namespace::Learnings);
}

#[test]
fn test_namespace_and_status_filters() {
    let (_dir, container) = test_env();
    let id = capture(
        &container,
        Namespace::Decisions,
        "retire flaky test",
        "quarantine then delete",
    );
    capture(
        &container,
        Namespace::Learnings,
        "flaky test causes",
        "shared state across cases",
    );

    let service = container.recall_service(Some(Domain::Project)).unwrap();

    let decisions_only = service
        .search(
            "flaky test",
            5,
            &SearchFilter::new().with_namespace(Namespace::Decisions),
            SearchMode::Hybrid,
        )
        .unwrap();
    assert_eq!(decisions_only.len(), 1);
    assert_eq!(decisions_only[0].memory.id.as_str(), id);

    // Archive it; an active-only filter no longer sees it.
    let capture_service = container.capture_service(Domain::Project).unwrap();
    capture_service
        .transition(&decisions_only[0].memory.id, MemoryStatus::Archived)
        .unwrap();

    let active_only = service
        .search(
            "flaky test",
            5,
            &SearchFilter::new()
                .with_namespace(Namespace::Decisions)
                .with_status(MemoryStatus::Active),
            SearchMode::Hybrid,
        )
        .unwrap();
    assert!(active_only.is_empty());
}

#[test]
fn test_cross_domain_merge() {
    let (_dir, container) = test_env();
    capture(
        &container,
        Namespace::Patterns,
        "builder pattern for configs",
        "project-scoped note",
    );

    let user_service = container.capture_service(Domain::User).unwrap();
    user_service
        .capture(CaptureInput {
            namespace: Namespace::Patterns,
            summary: "builder pattern for configs".to_string(),
            content: "user-scoped note".to_string(),
            domain: Domain::User,
            ..CaptureInput::default()
        })
        .unwrap();

    let service = container.recall_service(None).unwrap();
    let results = service
        .search(
            "builder pattern configs",
            10,
            &SearchFilter::new(),
            SearchMode::Hybrid,
        )
        .unwrap();

    let domains: Vec<Domain> = results.iter().map(|r| r.domain).collect();
    assert!(domains.contains(&Domain::Project));
    assert!(domains.contains(&Domain::User));

    // Restricting the domain narrows the result set.
    let project_only = service
        .search(
            "builder pattern configs",
            10,
            &SearchFilter::new().with_domain(Domain::Project),
            SearchMode::Hybrid,
        )
        .unwrap();
    assert!(project_only.iter().all(|r| r.domain == Domain::Project));
}

#[test]
fn test_hydration_levels() {
    let (dir, container) = test_env();
    let repo_path = dir.path().join("repo");
    commit_file(
        &repo_path,
        "auth.rs",
        "pub fn verify(token: &str) -> bool { !token.is_empty() }\n",
        "add auth module",
    );

    let id = capture(
        &container,
        Namespace::Decisions,
        "token verification",
        "## Detail\nverify() rejects empty tokens\n",
    );
    let id = engram::models::MemoryId::new(id);

    let service = container.recall_service(Some(Domain::Project)).unwrap();

    let summary = service
        .hydrate(&id, DetailLevel::Summary, Domain::Project)
        .unwrap();
    assert_eq!(summary.memory.summary, "token verification");
    assert!(summary.memory.content.is_empty());
    assert!(summary.files.is_empty());

    let full = service
        .hydrate(&id, DetailLevel::Full, Domain::Project)
        .unwrap();
    assert_eq!(full.memory.content, "## Detail\nverify() rejects empty tokens\n");

    let files = service
        .hydrate(&id, DetailLevel::Files, Domain::Project)
        .unwrap();
    assert_eq!(files.files.len(), 1);
    assert_eq!(files.files[0].path, "auth.rs");
    assert!(files.files[0].content.contains("pub fn verify"));
    assert!(!files.truncated);
}

#[test]
fn test_hydrate_unknown_id() {
    let (_dir, container) = test_env();
    let service = container.recall_service(Some(Domain::Project)).unwrap();
    let err = service
        .hydrate(
            &engram::models::MemoryId::new("decisions:abcdef0:0"),
            DetailLevel::Full,
            Domain::Project,
        )
        .unwrap_err();
    assert!(matches!(err, engram::Error::Hydration { .. }));
}

#[test]
fn test_date_range_filter() {
    let (_dir, container) = test_env();
    capture(&container, Namespace::Progress, "sprint done", "shipped it");

    let service = container.recall_service(Some(Domain::Project)).unwrap();

    let future_only = SearchFilter {
        date_from: Some(chrono::Utc::now() + chrono::Duration::days(1)),
        ..SearchFilter::new()
    };
    let results = service
        .search("sprint done", 5, &future_only, SearchMode::Hybrid)
        .unwrap();
    assert!(results.is_empty());

    let past_window = SearchFilter {
        date_from: Some(chrono::Utc::now() - chrono::Duration::days(1)),
        date_to: Some(chrono::Utc::now() + chrono::Duration::days(1)),
        ..SearchFilter::new()
    };
    let results = service
        .search("sprint done", 5, &past_window, SearchMode::Hybrid)
        .unwrap();
    assert_eq!(results.len(), 1);
}

#[test]
fn test_sequential_hybrid_matches_parallel() {
    let (_dir, container) = test_env();
    capture(
        &container,
        Namespace::Decisions,
        "Use JWT for API auth",
        "signed tokens",
    );
    capture(
        &container,
        Namespace::Decisions,
        "session cookies for web",
        "httponly cookies",
    );

    let parallel = container
        .recall_service(Some(Domain::Project))
        .unwrap()
        .search("JWT auth", 5, &SearchFilter::new(), SearchMode::Hybrid)
        .unwrap();

    let mut config = container.config().clone();
    config.hybrid.enable_parallel = false;
    let sequential_container = Container::new(config).unwrap();
    let sequential = sequential_container
        .recall_service(Some(Domain::Project))
        .unwrap()
        .search("JWT auth", 5, &SearchFilter::new(), SearchMode::Hybrid)
        .unwrap();

    let ids = |results: &[engram::models::MemoryResult]| {
        results
            .iter()
            .map(|r| r.memory.id.as_str().to_string())
            .collect::<Vec<_>>()
    };
    assert_eq!(ids(&parallel), ids(&sequential));
}
