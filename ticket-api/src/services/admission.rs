//! Tiered admission control.
//!
//! Each tier runs an independent token bucket per key: a fixed budget of
//! points refilled at the start of every window, and a cooldown ("block")
//! entered when a key asks for a point it does not have. A blocked key is
//! rejected outright until the block expires, after which it starts over
//! with a full bucket.
//!
//! Bucket updates happen under the `DashMap` shard lock held by the entry
//! guard, so concurrent requests for one key are serialised.

use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock, Reference};
use serde::{Deserialize, Serialize};
use service_core::middleware::ClientOrigin;
use std::{fmt, time::Duration};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    General,
    Authentication,
    TicketCreation,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::General, Tier::Authentication, Tier::TicketCreation];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::General => "general",
            Tier::Authentication => "authentication",
            Tier::TicketCreation => "ticket-creation",
        }
    }

    /// Stable code reported to callers when this tier rejects a request.
    pub fn error_code(&self) -> &'static str {
        match self {
            Tier::General => "RATE_LIMIT_EXCEEDED",
            Tier::Authentication => "AUTH_RATE_LIMIT_EXCEEDED",
            Tier::TicketCreation => "TICKET_CREATION_RATE_LIMIT_EXCEEDED",
        }
    }

    pub fn rejection_message(&self) -> &'static str {
        match self {
            Tier::General => "Too many requests. Please try again later.",
            Tier::Authentication => "Too many authentication attempts. Please try again later.",
            Tier::TicketCreation => "Ticket creation limit reached. Please try again later.",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "general" => Ok(Tier::General),
            "authentication" | "auth" => Ok(Tier::Authentication),
            "ticket-creation" | "ticket_creation" => Ok(Tier::TicketCreation),
            _ => Err(format!("Invalid rate limit tier: {}", s)),
        }
    }
}

/// Which caller attribute a tier keys its buckets on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// Authenticated identity when known, otherwise network origin.
    IdentityOrOrigin,
    /// Network origin even for authenticated callers.
    OriginOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPolicy {
    pub points: u32,
    pub window: Duration,
    pub block_duration: Duration,
    pub key_source: KeySource,
}

impl TierPolicy {
    pub fn new(points: u32, window: Duration, block_duration: Duration, key_source: KeySource) -> Self {
        Self {
            points,
            window,
            block_duration,
            key_source,
        }
    }
}

/// Policy table for all tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierPolicies {
    pub general: TierPolicy,
    pub authentication: TierPolicy,
    pub ticket_creation: TierPolicy,
}

impl Default for TierPolicies {
    fn default() -> Self {
        Self {
            general: TierPolicy::new(
                100,
                Duration::from_secs(60),
                Duration::from_secs(15 * 60),
                KeySource::IdentityOrOrigin,
            ),
            authentication: TierPolicy::new(
                5,
                Duration::from_secs(60),
                Duration::from_secs(30 * 60),
                KeySource::OriginOnly,
            ),
            ticket_creation: TierPolicy::new(
                10,
                Duration::from_secs(3600),
                Duration::from_secs(60 * 60),
                KeySource::IdentityOrOrigin,
            ),
        }
    }
}

impl TierPolicies {
    pub fn get(&self, tier: Tier) -> &TierPolicy {
        match tier {
            Tier::General => &self.general,
            Tier::Authentication => &self.authentication,
            Tier::TicketCreation => &self.ticket_creation,
        }
    }
}

/// Bucket key within a tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey(String);

impl BucketKey {
    pub fn identity(id: Uuid) -> Self {
        Self(format!("user:{}", id))
    }

    pub fn origin(origin: ClientOrigin) -> Self {
        Self(format!("origin:{}", origin))
    }

    /// Pick the key for a caller according to the tier's key source.
    pub fn for_caller(source: KeySource, identity_id: Option<Uuid>, origin: ClientOrigin) -> Self {
        match (source, identity_id) {
            (KeySource::IdentityOrOrigin, Some(id)) => Self::identity(id),
            _ => Self::origin(origin),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BucketKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub tier: Tier,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window refills.
    pub reset_after: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub tier: Tier,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the next point is available or the block clears.
    pub retry_after: Duration,
}

impl Rejection {
    pub fn retry_after_ms(&self) -> u64 {
        u64::try_from(self.retry_after.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Read-only view of a bucket, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub remaining: u32,
    pub blocked: bool,
}

#[derive(Debug, Clone, Copy)]
struct Bucket<I> {
    remaining: u32,
    window_started: I,
    blocked_at: Option<I>,
}

impl<I: Reference> Bucket<I> {
    fn full(points: u32, now: I) -> Self {
        Self {
            remaining: points,
            window_started: now,
            blocked_at: None,
        }
    }

    fn block_remaining(&self, policy: &TierPolicy, now: I) -> Option<Duration> {
        let blocked_at = self.blocked_at?;
        policy.block_duration.checked_sub(elapsed(now, blocked_at)).filter(|d| !d.is_zero())
    }

    fn window_remaining(&self, policy: &TierPolicy, now: I) -> Duration {
        policy.window.saturating_sub(elapsed(now, self.window_started))
    }

    fn is_idle(&self, policy: &TierPolicy, now: I) -> bool {
        match self.blocked_at {
            Some(_) => self.block_remaining(policy, now).is_none(),
            None => self.window_remaining(policy, now).is_zero(),
        }
    }
}

fn elapsed<I: Reference>(now: I, earlier: I) -> Duration {
    now.duration_since(earlier).into()
}

/// Owns bucket state for every tier. One instance per process, shared behind
/// an `Arc`; tests construct their own with a fake clock.
pub struct AdmissionController<C: Clock = DefaultClock> {
    policies: TierPolicies,
    buckets: DashMap<(Tier, BucketKey), Bucket<C::Instant>>,
    clock: C,
}

impl AdmissionController<DefaultClock> {
    pub fn new(policies: TierPolicies) -> Self {
        Self::with_clock(policies, DefaultClock::default())
    }
}

impl<C: Clock> AdmissionController<C> {
    pub fn with_clock(policies: TierPolicies, clock: C) -> Self {
        Self {
            policies,
            buckets: DashMap::new(),
            clock,
        }
    }

    pub fn policy(&self, tier: Tier) -> &TierPolicy {
        self.policies.get(tier)
    }

    /// Take one point from `key`'s bucket in `tier`.
    pub fn consume(&self, tier: Tier, key: &BucketKey) -> Result<Admission, Rejection> {
        let policy = *self.policies.get(tier);
        let now = self.clock.now();

        let mut entry = self
            .buckets
            .entry((tier, key.clone()))
            .or_insert_with(|| Bucket::full(policy.points, now));
        let bucket = entry.value_mut();

        if bucket.blocked_at.is_some() {
            if let Some(retry_after) = bucket.block_remaining(&policy, now) {
                return Err(Rejection {
                    tier,
                    limit: policy.points,
                    remaining: 0,
                    retry_after,
                });
            }
            *bucket = Bucket::full(policy.points, now);
        } else if bucket.window_remaining(&policy, now).is_zero() {
            bucket.remaining = policy.points;
            bucket.window_started = now;
        }

        if bucket.remaining > 0 {
            bucket.remaining -= 1;
            return Ok(Admission {
                tier,
                limit: policy.points,
                remaining: bucket.remaining,
                reset_after: bucket.window_remaining(&policy, now),
            });
        }

        // Without a cooldown configured the key simply waits for the refill.
        let retry_after = if policy.block_duration.is_zero() {
            bucket.window_remaining(&policy, now)
        } else {
            bucket.blocked_at = Some(now);
            policy.block_duration
        };

        Err(Rejection {
            tier,
            limit: policy.points,
            remaining: 0,
            retry_after,
        })
    }

    /// Drop all state for `key` in `tier`. Returns whether anything was removed;
    /// resetting a clean key is not an error.
    pub fn reset_bucket(&self, key: &BucketKey, tier: Tier) -> bool {
        self.buckets.remove(&(tier, key.clone())).is_some()
    }

    pub fn snapshot(&self, tier: Tier, key: &BucketKey) -> Option<BucketSnapshot> {
        let now = self.clock.now();
        let policy = self.policies.get(tier);
        self.buckets.get(&(tier, key.clone())).map(|b| BucketSnapshot {
            remaining: b.remaining,
            blocked: b.block_remaining(policy, now).is_some(),
        })
    }

    /// Forget buckets whose window and block have both run out. They would be
    /// recreated full on next use, so removal is not observable to callers.
    pub fn sweep_idle(&self) -> usize {
        let now = self.clock.now();
        let before = self.buckets.len();
        self.buckets
            .retain(|(tier, _), bucket| !bucket.is_idle(self.policies.get(*tier), now));
        before.saturating_sub(self.buckets.len())
    }

    pub fn tracked_buckets(&self) -> usize {
        self.buckets.len()
    }
}

/// Object-safe view of an [`AdmissionController`], so application state does
/// not carry the clock type.
pub trait AdmissionControl: Send + Sync {
    fn policy(&self, tier: Tier) -> &TierPolicy;

    fn consume(&self, tier: Tier, key: &BucketKey) -> Result<Admission, Rejection>;

    fn reset_bucket(&self, key: &BucketKey, tier: Tier) -> bool;

    fn sweep_idle(&self) -> usize;
}

impl<C> AdmissionControl for AdmissionController<C>
where
    C: Clock + Send + Sync,
{
    fn policy(&self, tier: Tier) -> &TierPolicy {
        AdmissionController::policy(self, tier)
    }

    fn consume(&self, tier: Tier, key: &BucketKey) -> Result<Admission, Rejection> {
        AdmissionController::consume(self, tier, key)
    }

    fn reset_bucket(&self, key: &BucketKey, tier: Tier) -> bool {
        AdmissionController::reset_bucket(self, key, tier)
    }

    fn sweep_idle(&self) -> usize {
        AdmissionController::sweep_idle(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::clock::FakeRelativeClock;
    use std::sync::Arc;

    fn auth_like_policies() -> TierPolicies {
        TierPolicies {
            authentication: TierPolicy::new(
                5,
                Duration::from_secs(60),
                Duration::from_secs(1800),
                KeySource::OriginOnly,
            ),
            ..TierPolicies::default()
        }
    }

    fn controller() -> (AdmissionController<FakeRelativeClock>, FakeRelativeClock) {
        let clock = FakeRelativeClock::default();
        (
            AdmissionController::with_clock(auth_like_policies(), clock.clone()),
            clock,
        )
    }

    #[test]
    fn test_budget_then_block() {
        let (limiter, clock) = controller();
        let key = BucketKey::from("origin:203.0.113.9");

        for expected_remaining in (0..5).rev() {
            let admission = limiter.consume(Tier::Authentication, &key).unwrap();
            assert_eq!(admission.remaining, expected_remaining);
            assert_eq!(admission.limit, 5);
        }

        let rejection = limiter.consume(Tier::Authentication, &key).unwrap_err();
        assert_eq!(rejection.retry_after, Duration::from_secs(1800));
        assert_eq!(rejection.retry_after_ms(), 1_800_000);
        assert_eq!(
            limiter.snapshot(Tier::Authentication, &key),
            Some(BucketSnapshot {
                remaining: 0,
                blocked: true
            })
        );

        // Still blocked after the window would have refilled.
        clock.advance(Duration::from_secs(120));
        let rejection = limiter.consume(Tier::Authentication, &key).unwrap_err();
        assert_eq!(rejection.retry_after, Duration::from_secs(1680));
        assert_eq!(limiter.snapshot(Tier::Authentication, &key).unwrap().remaining, 0);

        clock.advance(Duration::from_secs(1680));
        let admission = limiter.consume(Tier::Authentication, &key).unwrap();
        assert_eq!(admission.remaining, 4);
    }

    #[test]
    fn test_window_refill_without_exhaustion() {
        let (limiter, clock) = controller();
        let key = BucketKey::from("origin:198.51.100.1");

        for _ in 0..3 {
            limiter.consume(Tier::Authentication, &key).unwrap();
        }
        clock.advance(Duration::from_secs(30));
        let admission = limiter.consume(Tier::Authentication, &key).unwrap();
        assert_eq!(admission.remaining, 1);
        assert_eq!(admission.reset_after, Duration::from_secs(30));

        clock.advance(Duration::from_secs(30));
        let admission = limiter.consume(Tier::Authentication, &key).unwrap();
        assert_eq!(admission.remaining, 4);
        assert_eq!(admission.reset_after, Duration::from_secs(60));
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _clock) = controller();
        let noisy = BucketKey::from("origin:10.0.0.1");
        let quiet = BucketKey::from("origin:10.0.0.2");

        for _ in 0..6 {
            let _ = limiter.consume(Tier::Authentication, &noisy);
        }
        assert!(limiter.consume(Tier::Authentication, &noisy).is_err());

        let admission = limiter.consume(Tier::Authentication, &quiet).unwrap();
        assert_eq!(admission.remaining, 4);
    }

    #[test]
    fn test_tiers_are_independent() {
        let (limiter, _clock) = controller();
        let key = BucketKey::from("origin:10.0.0.3");

        for _ in 0..6 {
            let _ = limiter.consume(Tier::Authentication, &key);
        }
        assert!(limiter.consume(Tier::Authentication, &key).is_err());

        let admission = limiter.consume(Tier::General, &key).unwrap();
        assert_eq!(admission.remaining, 99);
    }

    #[test]
    fn test_reset_bucket() {
        let (limiter, _clock) = controller();
        let key = BucketKey::from("origin:10.0.0.4");

        assert!(!limiter.reset_bucket(&key, Tier::Authentication));
        assert!(!limiter.reset_bucket(&key, Tier::Authentication));
        assert_eq!(limiter.tracked_buckets(), 0);

        for _ in 0..6 {
            let _ = limiter.consume(Tier::Authentication, &key);
        }
        assert!(limiter.snapshot(Tier::Authentication, &key).unwrap().blocked);

        assert!(limiter.reset_bucket(&key, Tier::Authentication));
        assert!(limiter.snapshot(Tier::Authentication, &key).is_none());

        let admission = limiter.consume(Tier::Authentication, &key).unwrap();
        assert_eq!(admission.remaining, 4);
    }

    #[test]
    fn test_reset_only_touches_named_tier() {
        let (limiter, _clock) = controller();
        let key = BucketKey::from("user:abc");

        limiter.consume(Tier::General, &key).unwrap();
        limiter.consume(Tier::TicketCreation, &key).unwrap();

        assert!(limiter.reset_bucket(&key, Tier::General));
        assert!(limiter.snapshot(Tier::General, &key).is_none());
        assert_eq!(limiter.snapshot(Tier::TicketCreation, &key).unwrap().remaining, 9);
    }

    #[test]
    fn test_zero_block_waits_for_window() {
        let clock = FakeRelativeClock::default();
        let policies = TierPolicies {
            general: TierPolicy::new(
                2,
                Duration::from_secs(10),
                Duration::ZERO,
                KeySource::IdentityOrOrigin,
            ),
            ..TierPolicies::default()
        };
        let limiter = AdmissionController::with_clock(policies, clock.clone());
        let key = BucketKey::from("origin:10.0.0.5");

        limiter.consume(Tier::General, &key).unwrap();
        clock.advance(Duration::from_secs(4));
        limiter.consume(Tier::General, &key).unwrap();

        let rejection = limiter.consume(Tier::General, &key).unwrap_err();
        assert_eq!(rejection.retry_after, Duration::from_secs(6));
        assert!(!limiter.snapshot(Tier::General, &key).unwrap().blocked);

        clock.advance(Duration::from_secs(6));
        assert_eq!(limiter.consume(Tier::General, &key).unwrap().remaining, 1);
    }

    #[test]
    fn test_sweep_idle_buckets() {
        let (limiter, clock) = controller();
        let active = BucketKey::from("origin:10.0.0.6");
        let blocked = BucketKey::from("origin:10.0.0.7");

        limiter.consume(Tier::Authentication, &active).unwrap();
        for _ in 0..6 {
            let _ = limiter.consume(Tier::Authentication, &blocked);
        }

        clock.advance(Duration::from_secs(61));
        assert_eq!(limiter.sweep_idle(), 1);
        assert!(limiter.snapshot(Tier::Authentication, &active).is_none());
        assert!(limiter.snapshot(Tier::Authentication, &blocked).is_some());

        clock.advance(Duration::from_secs(1800));
        assert_eq!(limiter.sweep_idle(), 1);
        assert_eq!(limiter.tracked_buckets(), 0);
    }

    #[test]
    fn test_bucket_key_selection() {
        let id = Uuid::new_v4();
        let origin = ClientOrigin(Some("192.0.2.10".parse().unwrap()));

        assert_eq!(
            BucketKey::for_caller(KeySource::IdentityOrOrigin, Some(id), origin),
            BucketKey::identity(id)
        );
        assert_eq!(
            BucketKey::for_caller(KeySource::IdentityOrOrigin, None, origin).as_str(),
            "origin:192.0.2.10"
        );
        assert_eq!(
            BucketKey::for_caller(KeySource::OriginOnly, Some(id), origin).as_str(),
            "origin:192.0.2.10"
        );
    }

    #[test]
    fn test_default_policies() {
        let policies = TierPolicies::default();
        assert_eq!(policies.get(Tier::General).points, 100);
        assert_eq!(policies.get(Tier::Authentication).block_duration, Duration::from_secs(1800));
        assert_eq!(policies.get(Tier::TicketCreation).window, Duration::from_secs(3600));
        assert_eq!(policies.get(Tier::Authentication).key_source, KeySource::OriginOnly);
    }

    #[test]
    fn test_tier_parsing() {
        for tier in Tier::ALL {
            assert_eq!(tier.as_str().parse::<Tier>().unwrap(), tier);
        }
        assert!("burst".parse::<Tier>().is_err());
    }

    #[test]
    fn test_concurrent_consumers_never_overspend() {
        let limiter = Arc::new(AdmissionController::with_clock(
            TierPolicies {
                ticket_creation: TierPolicy::new(
                    10,
                    Duration::from_secs(3600),
                    Duration::from_secs(3600),
                    KeySource::IdentityOrOrigin,
                ),
                ..TierPolicies::default()
            },
            FakeRelativeClock::default(),
        ));
        let key = BucketKey::identity(Uuid::new_v4());

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let limiter = limiter.clone();
                let key = key.clone();
                std::thread::spawn(move || limiter.consume(Tier::TicketCreation, &key).is_ok())
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(admitted, 10);
    }
}
