use std::sync::Arc;

use tempfile::TempDir;
use tracing_test::traced_test;

use super::*;
use crate::projection::project;
use crate::state::{LocalStateStore, MemoryStateStore, fixed_store};
use crate::util::testutil::{Call, RecordingProvider, TEST_KIND, TEST_PASSWORD, memory_options};

async fn open(store: &MemoryStateStore, provider: &RecordingProvider) -> Scope {
  Scope::open("app", memory_options("dev", store, provider.registry()))
    .await
    .unwrap()
}

fn thing(name: &str) -> Declaration {
  Declaration::new(name, TEST_KIND)
}

fn creates(calls: &[Call]) -> usize {
  calls.iter().filter(|c| matches!(c, Call::Create(_))).count()
}

#[tokio::test]
async fn first_run_creates_and_second_run_changes_nothing() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);

  let scope = open(&store, &provider).await;
  scope.declare(thing("site").set("main", "index.js")).await.unwrap();
  let report = scope.finalize().await.unwrap();
  assert_eq!(report.created, vec!["site".to_string()]);

  provider.clear_calls();
  let scope = open(&store, &provider).await;
  let handle = scope.declare(thing("site").set("main", "index.js")).await.unwrap();
  let report = scope.finalize().await.unwrap();

  assert!(provider.calls().is_empty());
  assert_eq!(handle.change(), Change::Unchanged);
  assert_eq!(handle.output("id"), Some(&Value::from("site-1")));
  assert_eq!(report.unchanged, vec!["site".to_string()]);
  assert!(report.is_noop());
}

#[tokio::test]
async fn changed_config_updates_with_prior_outputs() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);

  let scope = open(&store, &provider).await;
  scope.declare(thing("site").set("main", "a.js")).await.unwrap();
  scope.finalize().await.unwrap();

  let scope = open(&store, &provider).await;
  let handle = scope.declare(thing("site").set("main", "b.js")).await.unwrap();
  let report = scope.finalize().await.unwrap();

  assert_eq!(handle.change(), Change::Update);
  assert_eq!(handle.output("id"), Some(&Value::from("site-1")));
  assert_eq!(handle.output("main"), Some(&Value::from("b.js")));
  assert_eq!(report.updated, vec!["site".to_string()]);
  assert_eq!(provider.calls().last(), Some(&Call::Update("site".to_string())));

  let document = store.document().unwrap();
  assert_eq!(document.resources["site"].status, ResourceStatus::Updated);
}

#[tokio::test]
async fn undeclared_resources_are_pruned() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);

  let scope = open(&store, &provider).await;
  scope.declare(thing("site")).await.unwrap();
  scope.declare(thing("preview-comment")).await.unwrap();
  scope.finalize().await.unwrap();

  let scope = open(&store, &provider).await;
  scope.declare(thing("site")).await.unwrap();
  let report = scope.finalize().await.unwrap();

  assert_eq!(report.deleted, vec!["preview-comment".to_string()]);
  assert_eq!(provider.calls().last(), Some(&Call::Delete("preview-comment".to_string())));
  let document = store.document().unwrap();
  assert!(!document.resources.contains_key("preview-comment"));
  assert!(document.resources.contains_key("site"));
}

#[tokio::test]
async fn conditional_resource_never_declared_prunes_nothing() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);

  for _ in 0..2 {
    let scope = open(&store, &provider).await;
    scope.declare(thing("site")).await.unwrap();
    let report = scope.finalize().await.unwrap();
    assert!(report.deleted.is_empty());
  }

  assert!(!provider.calls().iter().any(|c| matches!(c, Call::Delete(_))));
}

#[tokio::test]
async fn orphans_are_deleted_dependents_first() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);

  let scope = open(&store, &provider).await;
  let db = scope.declare(thing("db")).await.unwrap();
  let api = scope.declare(thing("api").set("db", db.output_ref("id"))).await.unwrap();
  scope.declare(thing("comment").set("url", api.output_ref("id"))).await.unwrap();
  scope.finalize().await.unwrap();

  provider.clear_calls();
  let scope = open(&store, &provider).await;
  let report = scope.finalize().await.unwrap();

  assert_eq!(
    provider.calls(),
    vec![
      Call::Delete("comment".to_string()),
      Call::Delete("api".to_string()),
      Call::Delete("db".to_string()),
    ]
  );
  assert_eq!(report.deleted.len(), 3);
  assert!(store.document().unwrap().resources.is_empty());
}

#[tokio::test]
async fn references_resolve_to_earlier_outputs() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);
  let scope = open(&store, &provider).await;

  let site = scope.declare(thing("site").set("main", "index.js")).await.unwrap();
  let comment = scope
    .declare(thing("comment").set("body", site.output_ref("id")))
    .await
    .unwrap();
  scope.finalize().await.unwrap();

  assert_eq!(comment.output("body"), Some(&Value::from("site-1")));
  let document = store.document().unwrap();
  assert_eq!(document.resources["comment"].depends_on, vec!["site".to_string()]);
}

#[tokio::test]
async fn changed_upstream_output_updates_the_dependent() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);

  let scope = open(&store, &provider).await;
  let site = scope.declare(thing("site").set("main", "a.js")).await.unwrap();
  scope.declare(thing("comment").set("main", site.output_ref("main"))).await.unwrap();
  scope.finalize().await.unwrap();

  let scope = open(&store, &provider).await;
  let site = scope.declare(thing("site").set("main", "b.js")).await.unwrap();
  let comment = scope
    .declare(thing("comment").set("main", site.output_ref("main")))
    .await
    .unwrap();
  scope.finalize().await.unwrap();

  assert_eq!(comment.change(), Change::Update);
}

#[tokio::test]
async fn duplicate_names_are_rejected() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);
  let scope = open(&store, &provider).await;

  scope.declare(thing("site")).await.unwrap();
  let err = scope.declare(thing("site")).await.unwrap_err();

  assert!(matches!(err, ScopeError::DuplicateName(ref name) if name == "site"));
  assert_eq!(creates(&provider.calls()), 1);
  scope.abort().await.unwrap();
}

#[tokio::test]
async fn forward_references_are_rejected() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);
  let scope = open(&store, &provider).await;

  let err = scope
    .declare(thing("comment").set("url", OutputRef::new("site", "url")))
    .await
    .unwrap_err();

  assert!(matches!(err, ScopeError::ForwardReference { ref name, .. } if name == "comment"));
  assert!(provider.calls().is_empty());
  scope.abort().await.unwrap();
}

#[tokio::test]
async fn missing_outputs_are_rejected() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);
  let scope = open(&store, &provider).await;

  let site = scope.declare(thing("site")).await.unwrap();
  let err = scope
    .declare(thing("comment").set("url", site.output_ref("nope")))
    .await
    .unwrap_err();

  assert!(matches!(err, ScopeError::UnknownOutput { ref target, .. } if target.output == "nope"));
  scope.abort().await.unwrap();
}

#[tokio::test]
async fn unknown_kinds_and_bad_names_are_rejected() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);

  let scope = open(&store, &provider).await;
  let err = scope.declare(Declaration::new("site", "nope::Thing")).await.unwrap_err();
  assert!(matches!(err, ScopeError::UnknownKind { ref kind, .. } if kind == "nope::Thing"));
  scope.abort().await.unwrap();

  let scope = open(&store, &provider).await;
  let err = scope.declare(thing("has space")).await.unwrap_err();
  assert!(matches!(err, ScopeError::InvalidName(_)));
  scope.abort().await.unwrap();
}

#[tokio::test]
async fn kind_change_is_a_declaration_error() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);
  let other = RecordingProvider::new("test::Other");
  let registry = provider.registry().with(Arc::new(other.clone()));

  let scope = open(&store, &provider).await;
  scope.declare(thing("site")).await.unwrap();
  scope.finalize().await.unwrap();

  let scope = Scope::open("app", memory_options("dev", &store, registry)).await.unwrap();
  let err = scope.declare(Declaration::new("site", "test::Other")).await.unwrap_err();

  assert!(matches!(err, ScopeError::KindChanged { ref previous, .. } if previous == TEST_KIND));
  assert!(other.calls().is_empty());
  scope.abort().await.unwrap();
}

#[tokio::test]
async fn reconcile_failure_poisons_and_keeps_partial_progress() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);

  let scope = open(&store, &provider).await;
  scope.declare(thing("old")).await.unwrap();
  scope.finalize().await.unwrap();

  provider.fail_on("broken");
  let scope = open(&store, &provider).await;
  scope.declare(thing("site")).await.unwrap();
  let err = scope.declare(thing("broken")).await.unwrap_err();
  assert!(matches!(
    err,
    ScopeError::Reconcile {
      phase: Phase::Create,
      ..
    }
  ));

  let err = scope.declare(thing("later")).await.unwrap_err();
  assert!(matches!(err, ScopeError::Poisoned(_)));

  let err = scope.finalize().await.unwrap_err();
  assert!(matches!(err, ScopeError::Poisoned(_)));

  let document = store.document().unwrap();
  assert!(document.resources.contains_key("site"));
  assert!(document.resources.contains_key("old"));
  assert!(!document.resources.contains_key("broken"));
  assert!(!provider.calls().iter().any(|c| matches!(c, Call::Delete(_))));
  assert!(!store.is_locked());
}

#[tokio::test]
async fn best_effort_failure_does_not_poison_or_prune() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);

  let scope = open(&store, &provider).await;
  scope.declare(thing("site")).await.unwrap();
  scope.declare(thing("preview-comment")).await.unwrap();
  scope.finalize().await.unwrap();

  provider.fail_on("preview-comment");
  let scope = open(&store, &provider).await;
  scope.declare(thing("site").set("main", "new.js")).await.unwrap();
  let err = scope
    .declare(thing("preview-comment").set("body", "new").best_effort())
    .await
    .unwrap_err();
  assert_eq!(err.resource(), Some("preview-comment"));

  let report = scope.finalize().await.unwrap();
  assert_eq!(report.failed, vec!["preview-comment".to_string()]);
  assert!(report.deleted.is_empty());
  assert!(store.document().unwrap().resources.contains_key("preview-comment"));
}

#[tokio::test]
async fn best_effort_does_not_hide_a_broken_store() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);

  let scope = open(&store, &provider).await;
  scope.declare(thing("site")).await.unwrap();
  store.fail_saves(true);
  let err = scope
    .declare(thing("preview-comment").set("body", "b").best_effort())
    .await
    .unwrap_err();
  assert!(matches!(err, ScopeError::State(_)));

  let err = scope.declare(thing("later")).await.unwrap_err();
  assert!(matches!(err, ScopeError::Poisoned(_)));
  assert!(matches!(scope.finalize().await, Err(ScopeError::Poisoned(_))));
  assert!(!store.is_locked());
}

#[tokio::test]
async fn best_effort_does_not_soften_declaration_errors() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);

  let scope = open(&store, &provider).await;
  let err = scope
    .declare(Declaration::new("preview-comment", "github::Nothing").best_effort())
    .await
    .unwrap_err();
  assert!(matches!(err, ScopeError::UnknownKind { .. }));
  assert!(matches!(scope.finalize().await, Err(ScopeError::Poisoned(_))));
}

#[tokio::test]
async fn inputs_reach_the_provider_but_are_not_compared() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);

  let scope = open(&store, &provider).await;
  let handle = scope
    .declare(thing("site").set("module", "index.js").input("path", "/ci/a/build/index.js"))
    .await
    .unwrap();
  scope.finalize().await.unwrap();
  assert_eq!(handle.output("path"), Some(&Value::from("/ci/a/build/index.js")));

  let recorded = &store.document().unwrap().resources["site"].config;
  assert!(!recorded.contains_key("path"));

  provider.clear_calls();
  let scope = open(&store, &provider).await;
  let handle = scope
    .declare(thing("site").set("module", "index.js").input("path", "/ci/b/build/index.js"))
    .await
    .unwrap();
  let report = scope.finalize().await.unwrap();

  assert!(provider.calls().is_empty());
  assert_eq!(handle.change(), Change::Unchanged);
  assert!(report.is_noop());
}

#[tokio::test]
async fn finalize_twice_is_a_noop() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);
  let scope = open(&store, &provider).await;

  scope.declare(thing("site")).await.unwrap();
  scope.finalize().await.unwrap();
  let saves = store.save_count();

  let report = scope.finalize().await.unwrap();
  assert_eq!(report, FinalizeReport::default());
  assert_eq!(store.save_count(), saves);

  let err = scope.declare(thing("late")).await.unwrap_err();
  assert!(matches!(err, ScopeError::Closed(_)));
}

#[tokio::test]
async fn missing_password_is_a_config_error() {
  let store = MemoryStateStore::new();
  let mut options = memory_options("dev", &store, ProviderRegistry::new());
  options.password = Some(Secret::new(""));

  let err = Scope::open("app", options).await.unwrap_err();
  assert!(matches!(err, ScopeError::Config(ConfigError::MissingPassword)));
  assert!(!store.is_locked());
}

#[tokio::test]
async fn second_open_is_busy_while_first_is_held() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);
  let first = open(&store, &provider).await;

  let err = Scope::open("app", memory_options("dev", &store, provider.registry()))
    .await
    .unwrap_err();
  assert!(matches!(err, ScopeError::Busy(_)));

  first.abort().await.unwrap();
  open(&store, &provider).await.abort().await.unwrap();
}

#[tokio::test]
async fn secrets_are_sealed_at_rest() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);

  let scope = open(&store, &provider).await;
  scope
    .declare(thing("site").set("API_KEY", Secret::new("s3cr3t-value")))
    .await
    .unwrap();
  scope.finalize().await.unwrap();

  let json = serde_json::to_string(&store.document().unwrap()).unwrap();
  assert!(!json.contains("s3cr3t-value"));
  assert!(json.contains("ciphertext"));

  // Same password: the prior secret decrypts and compares equal.
  provider.clear_calls();
  let scope = open(&store, &provider).await;
  let handle = scope
    .declare(thing("site").set("API_KEY", Secret::new("s3cr3t-value")))
    .await
    .unwrap();
  scope.finalize().await.unwrap();
  assert_eq!(handle.change(), Change::Unchanged);
  assert_eq!(handle.output("API_KEY").and_then(Value::as_secret).map(Secret::expose), Some("s3cr3t-value"));
  assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn wrong_password_cannot_open_the_scope() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);

  let scope = open(&store, &provider).await;
  scope.declare(thing("site").set("API_KEY", Secret::new("v"))).await.unwrap();
  scope.finalize().await.unwrap();

  let mut options = memory_options("dev", &store, provider.registry());
  options.password = Some(Secret::new("not the password"));
  let err = Scope::open("app", options).await.unwrap_err();

  assert!(matches!(err, ScopeError::Secret(crate::secret::SecretError::Decrypt(_))));
  assert!(!store.is_locked());
}

#[tokio::test]
async fn projection_of_outputs_drops_secrets() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);
  let scope = open(&store, &provider).await;

  let site = scope
    .declare(
      thing("site")
        .set("PUBLIC_URL", "https://example.com")
        .set("TOKEN", Secret::new("hidden"))
        .set("RETRIES", Value::Integer(3)),
    )
    .await
    .unwrap();
  scope.finalize().await.unwrap();

  let env = project(site.outputs());
  assert_eq!(env.get("PUBLIC_URL"), Some("https://example.com"));
  assert!(!env.contains_key("TOKEN"));
  assert!(!env.contains_key("RETRIES"));
}

#[tokio::test]
async fn run_finalizes_on_success() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);
  let scope = open(&store, &provider).await;

  let (url, report) = scope
    .run(|scope| async move {
      let site = scope.declare(thing("site")).await?;
      Ok::<_, ScopeError>(site.output("id").cloned())
    })
    .await
    .unwrap();

  assert_eq!(url, Some(Value::from("site-1")));
  assert_eq!(report.created, vec!["site".to_string()]);
  assert!(!store.is_locked());
}

#[tokio::test]
async fn run_aborts_without_pruning_on_error() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);

  let scope = open(&store, &provider).await;
  scope.declare(thing("keep")).await.unwrap();
  scope.finalize().await.unwrap();

  let scope = open(&store, &provider).await;
  let result = scope
    .run(|scope| async move {
      scope.declare(thing("site")).await?;
      scope.declare(thing("site")).await?;
      Ok::<_, ScopeError>(())
    })
    .await;

  assert!(matches!(result, Err(ScopeError::DuplicateName(_))));
  assert!(!store.is_locked());
  assert!(store.document().unwrap().resources.contains_key("keep"));
  assert!(!provider.calls().iter().any(|c| matches!(c, Call::Delete(_))));
}

#[tokio::test]
async fn run_releases_the_local_lock_on_error() {
  let dir = TempDir::new().unwrap();
  let provider = RecordingProvider::new(TEST_KIND);
  let local = || {
    let store = Arc::new(LocalStateStore::new(dir.path().join("app/dev"), "app/dev"));
    ScopeOptions::new(Stage::resolve(None), Some(Secret::new(TEST_PASSWORD)), fixed_store(store))
      .providers(provider.registry())
      .work_factor(2)
  };

  let scope = Scope::open("app", local()).await.unwrap();
  let result = scope
    .run(|scope| async move {
      scope.declare(thing("site")).await?;
      scope.declare(Declaration::new("x", "missing::Kind")).await?;
      Ok::<_, ScopeError>(())
    })
    .await;
  assert!(matches!(result, Err(ScopeError::UnknownKind { .. })));

  let scope = Scope::open("app", local()).await.unwrap();
  assert_eq!(scope.prior_names().await, vec!["site".to_string()]);
  scope.abort().await.unwrap();
}

#[tokio::test]
async fn state_for_another_scope_is_refused() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);

  let scope = open(&store, &provider).await;
  scope.declare(thing("site")).await.unwrap();
  scope.finalize().await.unwrap();

  let err = Scope::open("other-app", memory_options("dev", &store, provider.registry()))
    .await
    .unwrap_err();
  assert!(matches!(err, ScopeError::State(StateError::ScopeMismatch { .. })));
}

#[tokio::test]
#[traced_test]
async fn secrets_never_reach_the_logs() {
  let store = MemoryStateStore::new();
  let provider = RecordingProvider::new(TEST_KIND);
  let scope = open(&store, &provider).await;

  let err = scope
    .declare(
      thing("site")
        .set("TOKEN", Secret::new("plaintext-token"))
        .set("missing", OutputRef::new("nowhere", "x")),
    )
    .await
    .unwrap_err();
  assert!(err.to_string().contains("nowhere.x"));
  scope.abort().await.unwrap();

  let scope = open(&store, &provider).await;
  scope
    .declare(thing("site").set("TOKEN", Secret::new("plaintext-token")))
    .await
    .unwrap();
  scope.finalize().await.unwrap();

  assert!(logs_contain("created"));
  assert!(!logs_contain("plaintext-token"));
}
