use std::sync::Arc;

use serde_json::{Value, json};
use tokio::test;

use backend::auth::{AuthError, AuthService, memory::InMemoryAuth};
use backend::store::memory::InMemoryStore;
use backend::store::{DocumentStore, Fields, StoreError};
use tasks::TaskError;
use tasks::manager::{TASKS_COLLECTION, TaskManager};
use tasks::model::{CREATED_AT_FIELD, OWNER_ID_FIELD, UPDATED_AT_FIELD};

use mock_store::{CountingStore, FailingLogoutAuth};

fn task_fields(title: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("title".to_string(), json!(title));
    fields
}

#[test]
async fn signup_then_task_ops_succeed() -> anyhow::Result<()> {
    let auth = InMemoryAuth::new();
    let store = InMemoryStore::new();
    let mgr = TaskManager::new(auth, store);

    mgr.sign_up("a@example.com", "secret1").await?;

    let id = mgr.add_task(task_fields("x")).await?;
    mgr.update_task(&id, task_fields("x2")).await?;
    mgr.delete_task(&id).await?;

    Ok(())
}

#[test]
async fn task_ops_without_session_fail_before_reaching_store() {
    let auth = InMemoryAuth::new();
    let store = CountingStore::new();
    let mgr = TaskManager::new(auth, store.clone());

    let add = mgr.add_task(task_fields("x")).await;
    assert!(matches!(
        add,
        Err(TaskError::Auth(AuthError::NotAuthenticated))
    ));

    let update = mgr.update_task("some-id", task_fields("y")).await;
    assert!(matches!(
        update,
        Err(TaskError::Auth(AuthError::NotAuthenticated))
    ));

    let delete = mgr.delete_task("some-id").await;
    assert!(matches!(
        delete,
        Err(TaskError::Auth(AuthError::NotAuthenticated))
    ));

    let watch = mgr.watch_tasks().await;
    assert!(matches!(
        watch,
        Err(TaskError::Auth(AuthError::NotAuthenticated))
    ));

    assert_eq!(store.call_count(), 0);
}

#[test]
async fn add_task_stamps_owner_and_timestamps() -> anyhow::Result<()> {
    let auth = InMemoryAuth::new();
    let store = InMemoryStore::new();
    let mgr = TaskManager::new(auth, store.clone());

    let user = mgr.sign_up("a@example.com", "secret1").await?;
    let id = mgr.add_task(task_fields("x")).await?;

    let doc = store.get(TASKS_COLLECTION, &id).await?;
    assert_eq!(
        doc.fields.get(OWNER_ID_FIELD).and_then(Value::as_str),
        Some(user.id.as_str())
    );

    let created = doc.fields.get(CREATED_AT_FIELD).and_then(Value::as_i64);
    let updated = doc.fields.get(UPDATED_AT_FIELD).and_then(Value::as_i64);
    assert!(created.is_some());
    assert_eq!(created, updated);

    Ok(())
}

#[test]
async fn update_task_merges_and_bumps_updated_at() -> anyhow::Result<()> {
    let auth = InMemoryAuth::new();
    let store = InMemoryStore::new();
    let mgr = TaskManager::new(auth, store.clone());

    mgr.sign_up("a@example.com", "secret1").await?;

    let mut fields = task_fields("x");
    fields.insert("column".to_string(), json!("todo"));
    let id = mgr.add_task(fields).await?;

    let before = store.get(TASKS_COLLECTION, &id).await?;
    let updated_before = before
        .fields
        .get(UPDATED_AT_FIELD)
        .and_then(Value::as_i64)
        .unwrap();

    mgr.update_task(&id, task_fields("y")).await?;

    let after = store.get(TASKS_COLLECTION, &id).await?;
    assert_eq!(
        after.fields.get("title").and_then(Value::as_str),
        Some("y")
    );
    // Untouched field survives the partial merge.
    assert_eq!(
        after.fields.get("column").and_then(Value::as_str),
        Some("todo")
    );

    let updated_after = after
        .fields
        .get(UPDATED_AT_FIELD)
        .and_then(Value::as_i64)
        .unwrap();
    assert!(updated_after > updated_before);

    // created_at is untouched by updates.
    assert_eq!(
        before.fields.get(CREATED_AT_FIELD),
        after.fields.get(CREATED_AT_FIELD)
    );

    Ok(())
}

#[test]
async fn update_task_ignores_reserved_fields() -> anyhow::Result<()> {
    let auth = InMemoryAuth::new();
    let store = InMemoryStore::new();
    let mgr = TaskManager::new(auth, store.clone());

    let user = mgr.sign_up("a@example.com", "secret1").await?;
    let id = mgr.add_task(task_fields("x")).await?;

    let mut sneaky = Fields::new();
    sneaky.insert(OWNER_ID_FIELD.to_string(), json!("someone-else"));
    sneaky.insert(CREATED_AT_FIELD.to_string(), json!(0));
    mgr.update_task(&id, sneaky).await?;

    let doc = store.get(TASKS_COLLECTION, &id).await?;
    assert_eq!(
        doc.fields.get(OWNER_ID_FIELD).and_then(Value::as_str),
        Some(user.id.as_str())
    );
    assert_ne!(
        doc.fields.get(CREATED_AT_FIELD).and_then(Value::as_i64),
        Some(0)
    );

    Ok(())
}

#[test]
async fn delete_task_then_get_is_not_found() -> anyhow::Result<()> {
    let auth = InMemoryAuth::new();
    let store = InMemoryStore::new();
    let mgr = TaskManager::new(auth, store.clone());

    mgr.sign_up("a@example.com", "secret1").await?;
    let id = mgr.add_task(task_fields("x")).await?;

    mgr.delete_task(&id).await?;

    let fetched = store.get(TASKS_COLLECTION, &id).await;
    assert!(matches!(fetched, Err(StoreError::NotFound(_))));

    Ok(())
}

#[test]
async fn cross_session_mutation_is_denied() -> anyhow::Result<()> {
    let auth = InMemoryAuth::new();
    let store = InMemoryStore::new();

    let mgr_a = TaskManager::new(auth.clone(), store.clone());
    let mgr_b = TaskManager::new(auth.clone(), store.clone());

    mgr_a.sign_up("a@example.com", "secret1").await?;
    mgr_b.sign_up("b@example.com", "secret2").await?;

    let id = mgr_a.add_task(task_fields("private")).await?;

    let update = mgr_b.update_task(&id, task_fields("stolen")).await;
    assert!(matches!(
        update,
        Err(TaskError::Store(StoreError::PermissionDenied(_)))
    ));

    let delete = mgr_b.delete_task(&id).await;
    assert!(matches!(
        delete,
        Err(TaskError::Store(StoreError::PermissionDenied(_)))
    ));

    // The document is intact.
    let doc = store.get(TASKS_COLLECTION, &id).await?;
    assert_eq!(
        doc.fields.get("title").and_then(Value::as_str),
        Some("private")
    );

    Ok(())
}

#[test]
async fn logout_clears_the_session() -> anyhow::Result<()> {
    let auth = InMemoryAuth::new();
    let store = InMemoryStore::new();
    let mgr = TaskManager::new(auth, store);

    mgr.sign_up("a@example.com", "secret1").await?;
    mgr.logout().await?;

    let add = mgr.add_task(task_fields("x")).await;
    assert!(matches!(
        add,
        Err(TaskError::Auth(AuthError::NotAuthenticated))
    ));

    Ok(())
}

#[test]
async fn failed_logout_keeps_the_session() -> anyhow::Result<()> {
    let auth = Arc::new(FailingLogoutAuth);
    let store = InMemoryStore::new();
    let mgr = TaskManager::new(auth, store);

    mgr.sign_up("a@example.com", "secret1").await?;

    let logout = mgr.logout().await;
    assert!(matches!(logout, Err(AuthError::Backend(_))));

    // Session survives the failed sign-out.
    mgr.add_task(task_fields("x")).await?;

    Ok(())
}

#[test]
async fn second_login_replaces_the_identity() -> anyhow::Result<()> {
    let auth = InMemoryAuth::new();
    let store = InMemoryStore::new();

    let other = auth.create_account("b@example.com", "secret2").await?;

    let mgr = TaskManager::new(auth.clone(), store.clone());
    mgr.sign_up("a@example.com", "secret1").await?;

    mgr.login("b@example.com", "secret2").await?;
    let id = mgr.add_task(task_fields("x")).await?;

    let doc = store.get(TASKS_COLLECTION, &id).await?;
    assert_eq!(
        doc.fields.get(OWNER_ID_FIELD).and_then(Value::as_str),
        Some(other.id.as_str())
    );

    Ok(())
}
