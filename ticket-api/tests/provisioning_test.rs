mod common;

use axum::http::StatusCode;
use common::{body_json, FailingStore, TestApp};
use std::sync::Arc;
use tokio::task::JoinSet;
use ticket_api::models::Role;

const ORIGIN: &str = "198.51.100.20";

#[tokio::test]
async fn test_role_derived_from_groups_on_first_login() {
    let app = TestApp::new();

    let cases: [(&str, &[&str], Role); 5] = [
        ("only-admin", &["admin"], Role::Admin),
        ("only-manager", &["manager"], Role::Manager),
        ("unrecognized", &["helpdesk", "staff"], Role::User),
        ("no-groups", &[], Role::User),
        ("both", &["manager", "admin"], Role::Admin),
    ];

    for (sub, groups, expected) in cases {
        let identity = app.login(&app.token(sub, groups), ORIGIN).await;
        assert_eq!(identity.role, expected, "subject {}", sub);
    }
}

#[tokio::test]
async fn test_relogin_updates_last_login_but_not_role() {
    let app = TestApp::new();

    let first = app.login(&app.token("subject-r", &["manager"]), ORIGIN).await;
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let second = app.login(&app.token("subject-r", &["admin"]), ORIGIN).await;

    assert_eq!(second.id, first.id);
    assert_eq!(second.role, Role::Manager);
    assert!(second.last_login_at > first.last_login_at);

    let stored = app.store.find_by_subject("subject-r").await.unwrap().unwrap();
    assert_eq!(stored.last_login_at, second.last_login_at);
    assert_eq!(stored.role, Role::Manager);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_logins_create_one_identity() {
    let app = Arc::new(TestApp::new());
    let token = app.token("subject-race", &["manager"]);

    let mut tasks = JoinSet::new();
    for _ in 0..16 {
        let app = app.clone();
        let token = token.clone();
        tasks.spawn(async move { app.login(&token, ORIGIN).await });
    }

    let mut ids = Vec::new();
    while let Some(result) = tasks.join_next().await {
        ids.push(result.unwrap().id);
    }

    assert_eq!(ids.len(), 16);
    assert!(ids.iter().all(|id| *id == ids[0]));

    let stored = app.store.find_by_subject("subject-race").await.unwrap().unwrap();
    assert_eq!(stored.id, ids[0]);
}

#[tokio::test]
async fn test_store_failure_is_distinct_from_bad_credential() {
    let app = TestApp::with_store(Arc::new(FailingStore));
    let token = app.token("subject-down", &[]);

    let res = app.get("/api/users/me", Some(&token), ORIGIN).await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(res).await["code"], "IDENTITY_STORE_UNAVAILABLE");

    // Optional authentication still surfaces the outage for a valid credential.
    let res = app.get("/api/auth/session", Some(&token), ORIGIN).await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

    // A bad credential never reaches the store.
    let res = app.get("/api/auth/session", Some("garbage"), ORIGIN).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = app.get("/health", None, ORIGIN).await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(res).await["identityStore"], "unavailable");
}
