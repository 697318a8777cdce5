//! Request gate: decides whether an analysis request may reach the model.
//!
//! Checks run in a fixed order and stop at the first failure:
//! identity, entitlement (subscribers only), input validation, usage.
//! Validation runs before usage so malformed input never costs a slot,
//! unless the gate is built with `charge_invalid_requests`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::accounts::{SessionResolver, SubscriptionDirectory};
use crate::config::AccessMode;
use crate::error::{AnalyzeError, LimitKind};
use crate::identity::{Credentials, Identity};
use crate::rate_limit::{Clock, Consumption, Policy, UsageLedger};

pub const MIN_CASE_CHARS: usize = 100;
pub const MAX_CASE_CHARS: usize = 50_000;

#[derive(Debug, Clone, Copy)]
pub struct Tiers {
    pub anonymous: Policy,
    pub subscriber: Policy,
}

// A request that passed every check and holds a consumed slot
#[derive(Debug, Clone)]
pub struct Admission {
    pub identity: Identity,
    pub case_text: String,
    pub limit: u32,
    pub used: u32,
    pub resets_at: DateTime<Utc>,
}

impl Admission {
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub tier: &'static str,
    pub limit: u32,
    pub used: u32,
    pub remaining: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_active: Option<bool>,
}

/// Trimmed text, between `MIN_CASE_CHARS` and `MAX_CASE_CHARS` characters.
pub fn validate_case_text(text: Option<&str>) -> Result<String, AnalyzeError> {
    let trimmed = text.map(str::trim).unwrap_or_default();
    let chars = trimmed.chars().count();

    if chars < MIN_CASE_CHARS {
        return Err(AnalyzeError::InvalidInput(format!(
            "Please provide at least {MIN_CASE_CHARS} characters of case content."
        )));
    }
    if chars > MAX_CASE_CHARS {
        return Err(AnalyzeError::InvalidInput(
            "Case text too long. Please limit to 50,000 characters.".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

pub struct RequestGate {
    ledger: Arc<dyn UsageLedger>,
    sessions: Arc<dyn SessionResolver>,
    subscriptions: Arc<dyn SubscriptionDirectory>,
    clock: Arc<dyn Clock>,
    access: AccessMode,
    tiers: Tiers,
    charge_invalid: bool,
}

impl RequestGate {
    pub fn new(
        ledger: Arc<dyn UsageLedger>,
        sessions: Arc<dyn SessionResolver>,
        subscriptions: Arc<dyn SubscriptionDirectory>,
        clock: Arc<dyn Clock>,
        access: AccessMode,
        tiers: Tiers,
    ) -> Self {
        Self {
            ledger,
            sessions,
            subscriptions,
            clock,
            access,
            tiers,
            charge_invalid: false,
        }
    }

    // Consume a slot before validating, the way the first deployment did
    pub fn charge_invalid_requests(mut self, charge: bool) -> Self {
        self.charge_invalid = charge;
        self
    }

    pub fn policy_for(&self, identity: &Identity) -> &Policy {
        match identity {
            Identity::Anonymous { .. } => &self.tiers.anonymous,
            Identity::Subscriber { .. } => &self.tiers.subscriber,
        }
    }

    pub async fn identify(&self, creds: &Credentials) -> Result<Identity, AnalyzeError> {
        match (self.access, &creds.bearer) {
            (AccessMode::Anonymous, _) | (AccessMode::Mixed, None) => Ok(Identity::Anonymous {
                ip: creds.client_ip.clone(),
            }),
            (AccessMode::Subscription, None) => Err(AnalyzeError::Unauthenticated),
            (_, Some(token)) => match self.sessions.resolve(token).await {
                Some(user_id) => Ok(Identity::Subscriber { user_id }),
                None => Err(AnalyzeError::Unauthenticated),
            },
        }
    }

    async fn check_entitlement(&self, identity: &Identity) -> Result<(), AnalyzeError> {
        match identity {
            Identity::Anonymous { .. } => Ok(()),
            Identity::Subscriber { user_id } => {
                if self.subscriptions.is_active(user_id).await {
                    Ok(())
                } else {
                    info!(user_id = %user_id, "rejected: no active subscription");
                    Err(AnalyzeError::Forbidden)
                }
            }
        }
    }

    async fn consume(&self, identity: &Identity) -> Result<(u32, DateTime<Utc>), AnalyzeError> {
        let policy = self.policy_for(identity);
        let now = self.clock.now();

        match self
            .ledger
            .check_and_consume(&identity.ledger_key(), policy, now)
            .await
        {
            Consumption::Allowed { count, resets_at } => Ok((count, resets_at)),
            Consumption::Denied { resets_at } => {
                let kind = match identity {
                    Identity::Anonymous { .. } => LimitKind::Rate,
                    Identity::Subscriber { .. } => LimitKind::Quota,
                };
                info!(tier = identity.tier(), limit = policy.limit(), "rejected: usage limit reached");
                Err(AnalyzeError::LimitExceeded {
                    kind,
                    limit: policy.limit(),
                    cadence: policy.cadence(),
                    resets_at,
                    retry_after_secs: (resets_at - now).num_seconds().max(1) as u64,
                })
            }
        }
    }

    /// Runs every check for one analysis request.
    pub async fn admit(
        &self,
        creds: &Credentials,
        case_text: Option<&str>,
    ) -> Result<Admission, AnalyzeError> {
        let identity = self.identify(creds).await?;
        self.check_entitlement(&identity).await?;

        let (case_text, (used, resets_at)) = if self.charge_invalid {
            let usage = self.consume(&identity).await?;
            (validate_case_text(case_text)?, usage)
        } else {
            let text = validate_case_text(case_text)?;
            (text, self.consume(&identity).await?)
        };

        debug!(tier = identity.tier(), used, "request admitted");

        Ok(Admission {
            limit: self.policy_for(&identity).limit(),
            identity,
            case_text,
            used,
            resets_at,
        })
    }

    /// Current consumption of the caller, without consuming anything.
    pub async fn usage(&self, creds: &Credentials) -> Result<UsageReport, AnalyzeError> {
        let identity = self.identify(creds).await?;
        let limit = self.policy_for(&identity).limit();
        let now = self.clock.now();

        let live = self
            .ledger
            .usage(&identity.ledger_key())
            .await
            .filter(|record| !record.is_expired(now));

        let subscription_active = match &identity {
            Identity::Anonymous { .. } => None,
            Identity::Subscriber { user_id } => Some(self.subscriptions.is_active(user_id).await),
        };

        let used = live.map(|record| record.count).unwrap_or(0);
        Ok(UsageReport {
            tier: identity.tier(),
            limit,
            used,
            remaining: limit.saturating_sub(used),
            resets_at: live.map(|record| record.window_end),
            subscription_active,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{AccountEntry, StaticAccounts, token_digest};
    use crate::rate_limit::MemoryLedger;
    use crate::testing::{ManualClock, case_text};
    use chrono::{TimeDelta, TimeZone};
    use std::time::Duration;

    struct Fixture {
        gate: RequestGate,
        ledger: Arc<MemoryLedger>,
        clock: Arc<ManualClock>,
    }

    fn fixture(access: AccessMode) -> Fixture {
        let ledger = Arc::new(MemoryLedger::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap(),
        ));
        let accounts = Arc::new(StaticAccounts::new(vec![
            AccountEntry {
                user_id: "u_active".into(),
                token_sha256: token_digest("good"),
                subscription_active: true,
            },
            AccountEntry {
                user_id: "u_lapsed".into(),
                token_sha256: token_digest("lapsed"),
                subscription_active: false,
            },
        ]));
        let tiers = Tiers {
            anonymous: Policy::fixed_window(10, Duration::from_secs(3600)),
            subscriber: Policy::CalendarMonth { limit: 50 },
        };
        let gate = RequestGate::new(
            ledger.clone(),
            accounts.clone(),
            accounts,
            clock.clone(),
            access,
            tiers,
        );
        Fixture { gate, ledger, clock }
    }

    fn anon(ip: &str) -> Credentials {
        Credentials {
            bearer: None,
            client_ip: ip.to_string(),
        }
    }

    fn bearer(token: &str) -> Credentials {
        Credentials {
            bearer: Some(token.to_string()),
            client_ip: "10.0.0.1".to_string(),
        }
    }

    #[test]
    fn test_validation_boundaries() {
        assert!(validate_case_text(Some(&case_text(99))).is_err());
        assert!(validate_case_text(Some(&case_text(100))).is_ok());
        assert!(validate_case_text(Some(&case_text(50_000))).is_ok());
        assert!(validate_case_text(Some(&case_text(50_001))).is_err());
        assert!(validate_case_text(None).is_err());
    }

    #[test]
    fn test_validation_counts_trimmed_chars() {
        let padded = format!("   {}\n\n", case_text(99));
        assert!(validate_case_text(Some(&padded)).is_err());

        // multi-byte characters count once each
        let accented = "é".repeat(100);
        assert_eq!(validate_case_text(Some(&accented)).unwrap(), accented);
    }

    #[tokio::test]
    async fn test_anonymous_hourly_scenario() {
        let f = fixture(AccessMode::Mixed);
        let text = case_text(200);

        for i in 1..=10 {
            let admission = f.gate.admit(&anon("1.2.3.4"), Some(&text)).await.unwrap();
            assert_eq!(admission.used, i);
            assert_eq!(admission.identity, Identity::Anonymous { ip: "1.2.3.4".into() });
        }

        let err = f.gate.admit(&anon("1.2.3.4"), Some(&text)).await.unwrap_err();
        assert!(matches!(
            err,
            AnalyzeError::LimitExceeded {
                kind: LimitKind::Rate,
                limit: 10,
                retry_after_secs: 3600,
                ..
            }
        ));

        // other IPs are unaffected
        assert!(f.gate.admit(&anon("5.6.7.8"), Some(&text)).await.is_ok());

        f.clock.advance(TimeDelta::minutes(61));
        let admission = f.gate.admit(&anon("1.2.3.4"), Some(&text)).await.unwrap();
        assert_eq!(admission.used, 1);
    }

    #[tokio::test]
    async fn test_invalid_input_does_not_consume() {
        let f = fixture(AccessMode::Mixed);

        let err = f.gate.admit(&anon("1.2.3.4"), Some("too short")).await.unwrap_err();
        assert!(matches!(err, AnalyzeError::InvalidInput(_)));
        assert!(f.ledger.usage("ip:1.2.3.4").await.is_none());
    }

    #[tokio::test]
    async fn test_charge_invalid_requests_consumes_first() {
        let f = fixture(AccessMode::Mixed);
        let gate = f.gate.charge_invalid_requests(true);

        let err = gate.admit(&anon("1.2.3.4"), Some("too short")).await.unwrap_err();
        assert!(matches!(err, AnalyzeError::InvalidInput(_)));
        assert_eq!(f.ledger.usage("ip:1.2.3.4").await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_inactive_subscription_is_forbidden_and_untouched() {
        let f = fixture(AccessMode::Mixed);

        let err = f.gate.admit(&bearer("lapsed"), Some(&case_text(200))).await.unwrap_err();
        assert_eq!(err, AnalyzeError::Forbidden);
        assert!(f.ledger.usage("user:u_lapsed").await.is_none());
        assert_eq!(f.ledger.tracked().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_or_missing_session() {
        let f = fixture(AccessMode::Mixed);
        let text = case_text(200);
        assert_eq!(
            f.gate.admit(&bearer("forged"), Some(&text)).await.unwrap_err(),
            AnalyzeError::Unauthenticated
        );

        let f = fixture(AccessMode::Subscription);
        assert_eq!(
            f.gate.admit(&anon("1.2.3.4"), Some(&text)).await.unwrap_err(),
            AnalyzeError::Unauthenticated
        );
    }

    #[tokio::test]
    async fn test_identity_checked_before_input() {
        let f = fixture(AccessMode::Subscription);
        assert_eq!(
            f.gate.admit(&anon("1.2.3.4"), None).await.unwrap_err(),
            AnalyzeError::Unauthenticated
        );
    }

    #[tokio::test]
    async fn test_anonymous_mode_ignores_credentials() {
        let f = fixture(AccessMode::Anonymous);
        let admission = f.gate.admit(&bearer("forged"), Some(&case_text(200))).await.unwrap();
        assert_eq!(admission.identity, Identity::Anonymous { ip: "10.0.0.1".into() });
    }

    #[tokio::test]
    async fn test_monthly_quota_scenario() {
        let f = fixture(AccessMode::Subscription);
        let text = case_text(150);

        for _ in 0..50 {
            f.gate.admit(&bearer("good"), Some(&text)).await.unwrap();
        }

        let err = f.gate.admit(&bearer("good"), Some(&text)).await.unwrap_err();
        match err {
            AnalyzeError::LimitExceeded {
                kind, limit, resets_at, ..
            } => {
                assert_eq!(kind, LimitKind::Quota);
                assert_eq!(limit, 50);
                assert_eq!(resets_at, Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap());
            }
            other => panic!("unexpected {other:?}"),
        }

        f.clock.set(Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 5).unwrap());
        let admission = f.gate.admit(&bearer("good"), Some(&text)).await.unwrap();
        assert_eq!(admission.used, 1);
        assert_eq!(admission.remaining(), 49);
    }

    #[tokio::test]
    async fn test_usage_report_does_not_consume() {
        let f = fixture(AccessMode::Mixed);
        let text = case_text(150);

        let report = f.gate.usage(&bearer("good")).await.unwrap();
        assert_eq!(report.used, 0);
        assert_eq!(report.resets_at, None);
        assert_eq!(report.subscription_active, Some(true));

        f.gate.admit(&bearer("good"), Some(&text)).await.unwrap();
        f.gate.admit(&bearer("good"), Some(&text)).await.unwrap();

        let report = f.gate.usage(&bearer("good")).await.unwrap();
        assert_eq!(report.tier, "subscriber");
        assert_eq!(report.used, 2);
        assert_eq!(report.remaining, 48);
        assert_eq!(f.ledger.usage("user:u_active").await.unwrap().count, 2);

        let report = f.gate.usage(&anon("1.2.3.4")).await.unwrap();
        assert_eq!(report.tier, "anonymous");
        assert_eq!(report.limit, 10);
        assert_eq!(report.subscription_active, None);
    }
}
