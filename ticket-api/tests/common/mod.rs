//! Shared setup for ticket-api integration tests: an in-memory identity
//! store, an admission controller on a fake clock and token minting.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, Response},
    Router,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use governor::clock::FakeRelativeClock;
use http_body_util::BodyExt;
use service_core::config::Config as CoreConfig;
use std::{collections::HashMap, sync::Arc};
use ticket_api::{
    build_router,
    config::ApiConfig,
    models::{Identity, IdentityClaims, NewIdentity},
    services::{
        AdmissionController, Authenticator, IdentityStore, InMemoryIdentityStore, JwtService,
        StoreError, TierPolicies,
    },
    AppState,
};
use tower::util::ServiceExt;
use uuid::Uuid;

pub const ISSUER: &str = "https://login.example.test/tenant/v2.0";
pub const SECRET: &str = "integration-test-secret";

pub fn test_config() -> ApiConfig {
    let vars: HashMap<&str, &str> = [("JWT_ISSUER", ISSUER), ("JWT_SECRET", SECRET)]
        .into_iter()
        .collect();

    ApiConfig::from_lookup(CoreConfig::default(), |k| vars.get(k).map(|v| v.to_string()))
        .expect("test configuration must be valid")
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<dyn IdentityStore>,
    pub admission: Arc<AdmissionController<FakeRelativeClock>>,
    pub clock: FakeRelativeClock,
    pub jwt: JwtService,
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(TierPolicies::default(), Arc::new(InMemoryIdentityStore::new()))
    }

    pub fn with_policies(policies: TierPolicies) -> Self {
        Self::build(policies, Arc::new(InMemoryIdentityStore::new()))
    }

    pub fn with_store(store: Arc<dyn IdentityStore>) -> Self {
        Self::build(TierPolicies::default(), store)
    }

    fn build(policies: TierPolicies, store: Arc<dyn IdentityStore>) -> Self {
        let config = test_config();
        let jwt = JwtService::new(&config.jwt).expect("jwt service");
        let clock = FakeRelativeClock::default();
        let admission = Arc::new(AdmissionController::with_clock(policies, clock.clone()));

        let state = AppState::new(
            config,
            Authenticator::new(jwt.clone(), store.clone()),
            admission.clone(),
        );

        Self {
            router: build_router(state),
            store,
            admission,
            clock,
            jwt,
        }
    }

    pub fn token(&self, sub: &str, groups: &[&str]) -> String {
        self.jwt
            .sign(&claims(sub, groups, ISSUER, ChronoDuration::minutes(15)))
            .expect("sign token")
    }

    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(req).await.expect("router is infallible")
    }

    pub async fn get(&self, uri: &str, token: Option<&str>, origin: &str) -> Response<Body> {
        self.send(request(Method::GET, uri, token, origin)).await
    }

    /// Authenticate through `/api/users/me` and return the provisioned identity.
    pub async fn login(&self, token: &str, origin: &str) -> Identity {
        let res = self.get("/api/users/me", Some(token), origin).await;
        assert_eq!(res.status(), 200, "login failed");
        serde_json::from_value(body_json(res).await).expect("identity body")
    }
}

pub fn claims(sub: &str, groups: &[&str], issuer: &str, ttl: ChronoDuration) -> IdentityClaims {
    let now = Utc::now();
    IdentityClaims {
        sub: sub.to_string(),
        email: format!("{}@example.test", sub),
        given_name: "Grace".to_string(),
        family_name: "Hopper".to_string(),
        iss: issuer.to_string(),
        aud: None,
        groups: groups.iter().map(|g| g.to_string()).collect(),
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    }
}

pub fn request(method: Method, uri: &str, token: Option<&str>, origin: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", origin);

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }

    builder.body(Body::empty()).expect("request")
}

pub fn json_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    origin: &str,
    body: serde_json::Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", origin)
        .header(header::CONTENT_TYPE, "application/json");

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }

    builder.body(Body::from(body.to_string())).expect("request")
}

pub async fn body_json(res: Response<Body>) -> serde_json::Value {
    let bytes = res
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

/// Identity store whose backend is always down.
pub struct FailingStore;

#[async_trait]
impl IdentityStore for FailingStore {
    async fn find_by_subject(&self, _subject_id: &str) -> Result<Option<Identity>, StoreError> {
        Err(StoreError::Unavailable(anyhow::anyhow!("connection refused")))
    }

    async fn find_by_id(&self, _id: Uuid) -> Result<Option<Identity>, StoreError> {
        Err(StoreError::Unavailable(anyhow::anyhow!("connection refused")))
    }

    async fn create(&self, _new: NewIdentity) -> Result<Identity, StoreError> {
        Err(StoreError::Unavailable(anyhow::anyhow!("connection refused")))
    }

    async fn touch_last_login(
        &self,
        _id: Uuid,
        _at: DateTime<Utc>,
    ) -> Result<Identity, StoreError> {
        Err(StoreError::Unavailable(anyhow::anyhow!("connection refused")))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Unavailable(anyhow::anyhow!("connection refused")))
    }
}
