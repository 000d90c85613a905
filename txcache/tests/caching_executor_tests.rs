// Caching Executor Tests
// Read-path gating, write-path invalidation and transactional isolation


use serde_json::{Value, json};
use std::sync::Arc;
use test_helper::{
    CacheEverything, DbError, FailingCache, create_executor_with_cache, create_test_executor,
};
use txcache::{
    CachingPolicy, Command, CommandFacts, DefaultCachingPolicy, ExecutionError, PolicyConfig,
    RowReader, TransactionHandle,
};

const WORKSPACE: &str = "ShopModel";
const USERS_QUERY: &str = "SELECT id, name FROM users WHERE active = @active";

fn users_query() -> Command {
    CommandFacts::query("shop", USERS_QUERY)
        .with_tags(["Users"])
        .with_parameter("@active", true)
        .with_workspace(WORKSPACE)
        .into()
}

fn users_update() -> Command {
    CommandFacts::write("shop", "UPDATE users SET active = 0 WHERE id = @id")
        .with_tags(["Users"])
        .with_parameter("@id", 1)
        .with_workspace(WORKSPACE)
        .into()
}

fn bounded_rows(min: usize, max: usize) -> Arc<dyn CachingPolicy> {
    Arc::new(DefaultCachingPolicy::new(PolicyConfig {
        min_cacheable_rows: min,
        max_cacheable_rows: Some(max),
        ..PolicyConfig::unbounded()
    }))
}

struct RejectAll;

impl CachingPolicy for RejectAll {
    fn can_be_cached(&self, _tags: &[String], _text: &str, _params: &[(String, Value)]) -> bool {
        false
    }
}

#[tokio::test]
async fn test_results_cached_for_cacheable_queries() {
    let (cache, executor) = create_test_executor(Arc::new(CacheEverything));

    let first = executor.execute_reader(&users_query()).await.unwrap();
    assert!(first.is_cached());
    assert_eq!(cache.inner.count(), 1);

    let second = executor.execute_reader(&users_query()).await.unwrap();
    assert_eq!(executor.executor().reader_calls(), 1);
    assert!(Arc::ptr_eq(
        first.snapshot().unwrap(),
        second.snapshot().unwrap()
    ));

    let snapshot = second.snapshot().unwrap();
    assert_eq!(snapshot.row_count(), 2);
    assert_eq!(snapshot.columns[1].name, "name");
    assert_eq!(
        cache
            .inner
            .entry_tags(users_query().facts.cache_key().as_str()),
        Some(vec!["Users".to_string()])
    );
}

#[tokio::test]
async fn test_cached_rows_replay_like_a_reader() {
    let (_cache, executor) = create_test_executor(Arc::new(CacheEverything));
    executor.execute_reader(&users_query()).await.unwrap();

    let mut rows = executor.execute_reader(&users_query()).await.unwrap();
    assert_eq!(rows.columns().len(), 2);
    assert_eq!(rows.records_affected(), -1);
    assert_eq!(
        rows.next_row().await.unwrap(),
        Some(vec![json!(1), json!("alice")])
    );
    assert_eq!(
        rows.next_row().await.unwrap(),
        Some(vec![json!(2), json!("bob")])
    );
    assert_eq!(rows.next_row().await.unwrap(), None);
}

#[tokio::test]
async fn test_different_parameters_cached_separately() {
    let (cache, executor) = create_test_executor(Arc::new(CacheEverything));

    let active: Command = CommandFacts::query("shop", USERS_QUERY)
        .with_tags(["Users"])
        .with_parameter("@active", true)
        .into();
    let inactive: Command = CommandFacts::query("shop", USERS_QUERY)
        .with_tags(["Users"])
        .with_parameter("@active", false)
        .into();

    executor.execute_reader(&active).await.unwrap();
    executor.execute_reader(&inactive).await.unwrap();

    assert_eq!(cache.inner.count(), 2);
    assert_eq!(executor.executor().reader_calls(), 2);
}

#[tokio::test]
async fn test_reader_write_not_cached_and_invalidates() {
    let (cache, executor) = create_test_executor(Arc::new(CacheEverything));
    executor.execute_reader(&users_query()).await.unwrap();

    let insert: Command =
        CommandFacts::write("shop", "INSERT INTO users (name) VALUES (@n) RETURNING id")
            .with_tags(["Users"])
            .with_parameter("@n", "carol")
            .into();
    let rows = executor.execute_reader(&insert).await.unwrap();

    assert!(!rows.is_cached());
    assert_eq!(cache.invalidation_calls(), 1);
    assert_eq!(cache.inner.count(), 0);
}

#[tokio::test]
async fn test_non_deterministic_query_not_cached() {
    let (cache, executor) = create_test_executor(Arc::new(CacheEverything));
    let command: Command = CommandFacts::query("shop", "SELECT NOW()")
        .with_tags(["Users"])
        .non_deterministic()
        .into();

    let rows = executor.execute_reader(&command).await.unwrap();
    executor.execute_reader(&command).await.unwrap();

    assert!(!rows.is_cached());
    assert_eq!(cache.inner.count(), 0);
    assert_eq!(executor.executor().reader_calls(), 2);
}

#[tokio::test]
async fn test_blacklisted_query_not_cached() {
    let (cache, executor) = create_test_executor(Arc::new(CacheEverything));
    executor
        .registries()
        .add_blacklisted_query(WORKSPACE, USERS_QUERY)
        .unwrap();

    executor.execute_reader(&users_query()).await.unwrap();
    executor.execute_scalar(&users_query()).await.unwrap();

    assert_eq!(cache.inner.count(), 0);
}

#[tokio::test]
async fn test_policy_rejection_not_cached() {
    let (cache, executor) = create_test_executor(Arc::new(RejectAll));

    let rows = executor.execute_reader(&users_query()).await.unwrap();
    let value = executor.execute_scalar(&users_query()).await.unwrap();

    // Rejection degrades to plain execution
    assert!(!rows.is_cached());
    assert_eq!(value, json!(42));
    assert_eq!(cache.inner.count(), 0);
}

#[tokio::test]
async fn test_results_not_cached_if_too_many_or_too_few_rows() {
    let (cache, executor) = create_test_executor(bounded_rows(2, 3));

    for (rows, cached) in [(1, false), (2, true), (3, true), (4, false)] {
        cache.inner.clear();
        executor.executor().set_rows(rows);

        let result = executor.execute_reader(&users_query()).await.unwrap();
        assert_eq!(result.snapshot().unwrap().row_count(), rows);
        assert_eq!(cache.inner.count() == 1, cached, "rows={}", rows);
    }
}

#[tokio::test]
async fn test_always_cached_overrides_every_rejection() {
    let (cache, executor) = create_test_executor(Arc::new(RejectAll));
    let command: Command = CommandFacts::query("shop", "SELECT NEWID(), * FROM users")
        .with_tags(["Users"])
        .with_workspace(WORKSPACE)
        .non_deterministic()
        .into();

    let registries = executor.registries();
    registries
        .add_blacklisted_query(WORKSPACE, "SELECT NEWID(), * FROM users")
        .unwrap();
    registries
        .add_cached_query(WORKSPACE, "SELECT NEWID(), * FROM users")
        .unwrap();

    executor.execute_reader(&command).await.unwrap();
    assert_eq!(cache.inner.count(), 1);

    executor.execute_reader(&command).await.unwrap();
    assert_eq!(executor.executor().reader_calls(), 1);
}

#[tokio::test]
async fn test_always_cached_bypasses_row_bounds() {
    let (cache, executor) = create_test_executor(bounded_rows(5, 10));
    executor
        .registries()
        .add_cached_query(WORKSPACE, USERS_QUERY)
        .unwrap();

    executor.execute_reader(&users_query()).await.unwrap();
    assert_eq!(cache.inner.count(), 1);
}

#[tokio::test]
async fn test_always_cached_is_per_workspace() {
    let (cache, executor) = create_test_executor(Arc::new(RejectAll));
    executor
        .registries()
        .add_cached_query("OtherModel", USERS_QUERY)
        .unwrap();

    executor.execute_reader(&users_query()).await.unwrap();
    assert_eq!(cache.inner.count(), 0);
}

#[tokio::test]
async fn test_scalar_cached_and_served() {
    let (cache, executor) = create_test_executor(Arc::new(CacheEverything));
    let command: Command = CommandFacts::query("shop", "SELECT COUNT(*) FROM users")
        .with_tags(["Users"])
        .into();

    assert_eq!(executor.execute_scalar(&command).await.unwrap(), json!(42));
    executor.executor().set_scalar(json!(7));
    assert_eq!(executor.execute_scalar(&command).await.unwrap(), json!(42));

    assert_eq!(executor.executor().scalar_calls(), 1);
    assert_eq!(cache.inner.count(), 1);
}

#[tokio::test]
async fn test_scalar_and_reader_results_cached_side_by_side() {
    let (cache, executor) = create_test_executor(Arc::new(CacheEverything));

    for _ in 0..3 {
        executor.execute_reader(&users_query()).await.unwrap();
        executor.execute_scalar(&users_query()).await.unwrap();
    }

    assert_eq!(cache.inner.count(), 2);
    assert_eq!(executor.executor().reader_calls(), 1);
    assert_eq!(executor.executor().scalar_calls(), 1);
}

#[tokio::test]
async fn test_failing_cache_falls_back_to_plain_execution() {
    let executor =
        create_executor_with_cache(Arc::new(FailingCache), Arc::new(CacheEverything));

    for _ in 0..2 {
        let mut rows = executor.execute_reader(&users_query()).await.unwrap();
        assert_eq!(
            rows.next_row().await.unwrap(),
            Some(vec![json!(1), json!("alice")])
        );
        assert_eq!(
            executor.execute_scalar(&users_query()).await.unwrap(),
            json!(42)
        );
    }

    assert_eq!(executor.executor().reader_calls(), 2);
    assert_eq!(executor.executor().scalar_calls(), 2);
}

#[tokio::test]
async fn test_registry_uses_scope_when_workspace_unset() {
    let (cache, executor) = create_test_executor(Arc::new(CacheEverything));
    executor
        .registries()
        .add_blacklisted_query("shop", "SELECT * FROM audit_log")
        .unwrap();
    let command: Command = CommandFacts::query("shop", "SELECT * FROM audit_log")
        .with_tags(["AuditLog"])
        .into();

    let rows = executor.execute_reader(&command).await.unwrap();

    assert!(!rows.is_cached());
    assert_eq!(cache.inner.count(), 0);
}

#[tokio::test]
async fn test_scalar_ignores_row_bounds() {
    let (cache, executor) = create_test_executor(bounded_rows(5, 10));
    let command: Command = CommandFacts::query("shop", "SELECT MAX(id) FROM users")
        .with_tags(["Users"])
        .into();

    executor.execute_scalar(&command).await.unwrap();
    assert_eq!(cache.inner.count(), 1);
}

#[tokio::test]
async fn test_non_query_invalidates_affected_sets() {
    let (cache, executor) = create_test_executor(Arc::new(CacheEverything));
    executor.execute_reader(&users_query()).await.unwrap();

    let affected = executor.execute_non_query(&users_update()).await.unwrap();

    assert_eq!(affected, 1);
    assert_eq!(
        cache.invalidations.lock().clone(),
        vec![(vec!["Users".to_string()], Some("shop".to_string()))]
    );
    assert_eq!(cache.inner.count(), 0);
}

#[tokio::test]
async fn test_non_query_without_affected_rows_does_not_invalidate() {
    let (cache, executor) = create_test_executor(Arc::new(CacheEverything));
    executor.execute_reader(&users_query()).await.unwrap();
    executor.executor().set_affected(0);

    let affected = executor.execute_non_query(&users_update()).await.unwrap();

    assert_eq!(affected, 0);
    assert_eq!(cache.invalidation_calls(), 0);
    assert_eq!(cache.inner.count(), 1);
}

#[tokio::test]
async fn test_non_query_without_entity_sets_does_not_invalidate() {
    let (cache, executor) = create_test_executor(Arc::new(CacheEverything));
    executor.executor().set_affected(5);
    let command: Command = CommandFacts::write("shop", "EXEC sp_refresh_stats").into();

    executor.execute_non_query(&command).await.unwrap();

    assert_eq!(cache.invalidation_calls(), 0);
}

#[tokio::test]
async fn test_write_invalidation_scoped_to_database() {
    let (cache, executor) = create_test_executor(Arc::new(CacheEverything));
    let other_db: Command = CommandFacts::query("archive", USERS_QUERY)
        .with_tags(["Users"])
        .into();

    executor.execute_reader(&users_query()).await.unwrap();
    executor.execute_reader(&other_db).await.unwrap();
    assert_eq!(cache.inner.count(), 2);

    executor.execute_non_query(&users_update()).await.unwrap();

    assert_eq!(cache.inner.count(), 1);
    assert!(
        cache
            .inner
            .get_item(other_db.facts.cache_key().as_str())
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_interrupted_materialization_stores_nothing() {
    let (cache, executor) = create_test_executor(Arc::new(CacheEverything));
    executor.executor().set_rows(5);
    executor.executor().fail_reader_after(Some(3));

    let err = executor.execute_reader(&users_query()).await.unwrap_err();

    assert!(matches!(err, ExecutionError::Executor(DbError::Interrupted(3))));
    assert_eq!(cache.inner.count(), 0);

    // Recovers once the driver does
    executor.executor().fail_reader_after(None);
    executor.execute_reader(&users_query()).await.unwrap();
    assert_eq!(cache.inner.count(), 1);
}

#[tokio::test]
async fn test_executor_errors_propagate_unchanged() {
    let (cache, executor) = create_test_executor(Arc::new(CacheEverything));
    executor.executor().fail_execute(true);

    let err = executor.execute_non_query(&users_update()).await.unwrap_err();
    assert_eq!(err.to_string(), "connection lost");
    assert_eq!(err.into_executor(), Some(DbError::ConnectionLost));

    let err = executor.execute_scalar(&users_query()).await.unwrap_err();
    assert!(matches!(err, ExecutionError::Executor(DbError::ConnectionLost)));

    assert_eq!(cache.invalidation_calls(), 0);
    assert_eq!(cache.inner.count(), 0);
}

#[tokio::test]
async fn test_invalid_command_rejected_before_execution() {
    let (_cache, executor) = create_test_executor(Arc::new(CacheEverything));
    let command: Command = CommandFacts::query("shop", "   ").into();

    let err = executor.execute_reader(&command).await.unwrap_err();

    assert!(matches!(err, ExecutionError::Cache(_)));
    assert_eq!(executor.executor().reader_calls(), 0);
}

#[tokio::test]
async fn test_read_in_transaction_never_hits_cache() {
    let (cache, executor) = create_test_executor(Arc::new(CacheEverything));
    executor.execute_reader(&users_query()).await.unwrap();
    assert_eq!(executor.executor().reader_calls(), 1);

    let tx = TransactionHandle::new();
    let command = users_query().in_transaction(tx);
    executor.execute_reader(&command).await.unwrap();
    executor.execute_reader(&command).await.unwrap();

    assert_eq!(executor.executor().reader_calls(), 3);
    assert_eq!(cache.inner.count(), 1);
}

#[tokio::test]
async fn test_results_from_transaction_not_cached() {
    let (cache, executor) = create_test_executor(Arc::new(CacheEverything));
    let tx = TransactionHandle::new();

    executor
        .execute_reader(&users_query().in_transaction(tx))
        .await
        .unwrap();
    executor
        .execute_scalar(&users_query().in_transaction(tx))
        .await
        .unwrap();

    assert_eq!(cache.inner.count(), 0);
}

#[tokio::test]
async fn test_write_in_transaction_deferred_until_commit() {
    let (cache, executor) = create_test_executor(Arc::new(CacheEverything));
    executor.execute_reader(&users_query()).await.unwrap();

    let tx = TransactionHandle::new();
    executor
        .execute_non_query(&users_update().in_transaction(tx))
        .await
        .unwrap();

    assert_eq!(cache.invalidation_calls(), 0);
    executor.execute_reader(&users_query()).await.unwrap();
    assert_eq!(executor.executor().reader_calls(), 1);

    executor.coordinator().committed(&tx, "shop").unwrap();

    assert_eq!(cache.invalidation_calls(), 1);
    assert_eq!(cache.inner.count(), 0);
    executor.execute_reader(&users_query()).await.unwrap();
    assert_eq!(executor.executor().reader_calls(), 2);
}

#[tokio::test]
async fn test_write_in_rolled_back_transaction_has_no_effect() {
    let (cache, executor) = create_test_executor(Arc::new(CacheEverything));
    executor.execute_reader(&users_query()).await.unwrap();

    let tx = TransactionHandle::new();
    executor
        .execute_non_query(&users_update().in_transaction(tx))
        .await
        .unwrap();
    executor.coordinator().rolled_back(&tx);

    assert_eq!(cache.invalidation_calls(), 0);
    assert_eq!(cache.inner.count(), 1);
    assert_eq!(executor.coordinator().pending_transactions(), 0);
}
