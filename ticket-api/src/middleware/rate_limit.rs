use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use metrics::counter;
use service_core::{error::AppError, middleware::ClientOrigin};
use std::sync::Arc;

use super::auth::Caller;
use crate::services::{Admission, AdmissionControl, BucketKey, GateError, Tier};

pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

/// Middleware state: the shared controller plus the tier this layer charges.
#[derive(Clone)]
pub struct TierGate {
    admission: Arc<dyn AdmissionControl>,
    tier: Tier,
}

impl TierGate {
    pub fn new(admission: Arc<dyn AdmissionControl>, tier: Tier) -> Self {
        Self { admission, tier }
    }
}

/// Charge one point from the caller's bucket in the gate's tier. Keys on the
/// identity attached by an outer authentication layer when the tier allows
/// it, otherwise on the network origin.
pub async fn admission_middleware(
    State(gate): State<TierGate>,
    origin: ClientOrigin,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (identity_id, origin) = match req.extensions().get::<Caller>() {
        Some(caller) => (caller.identity.as_ref().map(|i| i.id), caller.origin),
        None => (None, origin),
    };

    let policy = gate.admission.policy(gate.tier);
    let key = BucketKey::for_caller(policy.key_source, identity_id, origin);

    match gate.admission.consume(gate.tier, &key) {
        Ok(admission) => {
            let mut response = next.run(req).await;
            apply_headers(&mut response, &admission);
            Ok(response)
        }
        Err(rejection) => {
            tracing::warn!(
                tier = %gate.tier,
                %origin,
                identity_id = ?identity_id,
                path = %req.uri().path(),
                remaining = rejection.remaining,
                retry_after_ms = rejection.retry_after_ms(),
                "Request rejected by admission control"
            );
            counter!("admission_rejections_total", "tier" => gate.tier.as_str()).increment(1);

            Err(GateError::from(rejection).into())
        }
    }
}

fn apply_headers(response: &mut Response, admission: &Admission) {
    let reset_secs = admission.reset_after.as_secs_f64().ceil() as u64;

    let headers = response.headers_mut();
    for (name, value) in [
        (RATE_LIMIT_LIMIT_HEADER, u64::from(admission.limit)),
        (RATE_LIMIT_REMAINING_HEADER, u64::from(admission.remaining)),
        (RATE_LIMIT_RESET_HEADER, reset_secs),
    ] {
        headers.insert(HeaderName::from_static(name), HeaderValue::from(value));
    }
}
