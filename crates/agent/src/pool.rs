//! Credential × model-tier pool with per-credential cooldowns.
//!
//! The cursor walks model tiers first and credentials second. [`advance`] is the
//! whole transition table; [`ProviderPool`] only adds the shared state around
//! it. All reads and writes of that state happen under one lock, and a failure
//! transition is applied only when the pool cursor still points at the
//! attempted pair, so two concurrent invocations never double-advance.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;

use ventix_core::config::ProviderConfig;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Cursor {
    pub credential: usize,
    pub model: usize,
}

impl Cursor {
    pub const fn new(credential: usize, model: usize) -> Self {
        Self { credential, model }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    QuotaExceeded,
    InvalidCredential,
    Transient,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::QuotaExceeded => "quota_exceeded",
            Self::InvalidCredential => "invalid_credential",
            Self::Transient => "transient",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownClass {
    Quota,
    InvalidCredential,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolShape {
    pub credentials: usize,
    pub models: usize,
}

impl PoolShape {
    pub fn combinations(self) -> usize {
        self.credentials * self.models
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub next: Cursor,
    /// Credential index to park, and for how long.
    pub cooldown: Option<(usize, CooldownClass)>,
}

/// Pure cursor transition after a failed call.
///
/// Quota and transient failures move to the next model tier, wrapping to the
/// next credential after the last tier. A quota failure that wraps parks the
/// exhausted credential; transient failures never park anything. An invalid
/// credential is parked and skipped immediately.
pub fn advance(cursor: Cursor, kind: FailureKind, shape: PoolShape) -> Transition {
    let next_credential = (cursor.credential + 1) % shape.credentials.max(1);
    match kind {
        FailureKind::InvalidCredential => Transition {
            next: Cursor::new(next_credential, 0),
            cooldown: Some((cursor.credential, CooldownClass::InvalidCredential)),
        },
        FailureKind::QuotaExceeded | FailureKind::Transient => {
            if cursor.model + 1 < shape.models {
                return Transition { next: Cursor::new(cursor.credential, cursor.model + 1), cooldown: None };
            }
            let cooldown = (kind == FailureKind::QuotaExceeded)
                .then_some((cursor.credential, CooldownClass::Quota));
            Transition { next: Cursor::new(next_credential, 0), cooldown }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub quota: Duration,
    pub invalid_credential: Duration,
}

impl CooldownPolicy {
    pub fn duration_for(&self, class: CooldownClass) -> Duration {
        match class {
            CooldownClass::Quota => self.quota,
            CooldownClass::InvalidCredential => self.invalid_credential,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Selection {
    pub cursor: Cursor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllCoolingDown;

#[derive(Clone, Debug, Serialize)]
pub struct CredentialStatus {
    pub index: usize,
    pub usable_after: Option<DateTime<Utc>>,
    pub cooldown: Option<CooldownClass>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PoolStatus {
    pub cursor: Cursor,
    pub models: Vec<String>,
    pub credentials: Vec<CredentialStatus>,
}

impl PoolStatus {
    pub fn available_credentials(&self) -> usize {
        self.credentials.iter().filter(|credential| credential.usable_after.is_none()).count()
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Parking {
    usable_after: Option<DateTime<Utc>>,
    class: Option<CooldownClass>,
}

struct PoolState {
    cursor: Cursor,
    parking: Vec<Parking>,
}

pub struct ProviderPool {
    credentials: Vec<SecretString>,
    models: Vec<String>,
    policy: CooldownPolicy,
    state: Mutex<PoolState>,
}

impl std::fmt::Debug for ProviderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderPool")
            .field("credentials", &self.credentials.len())
            .field("models", &self.models)
            .field("policy", &self.policy)
            .finish()
    }
}

impl ProviderPool {
    pub fn new(credentials: Vec<SecretString>, models: Vec<String>, policy: CooldownPolicy) -> Self {
        let parking = vec![Parking::default(); credentials.len()];
        Self {
            credentials,
            models,
            policy,
            state: Mutex::new(PoolState { cursor: Cursor::default(), parking }),
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(
            config.api_keys.clone(),
            config.models.clone(),
            CooldownPolicy {
                quota: Duration::from_secs(config.quota_cooldown_secs),
                invalid_credential: Duration::from_secs(config.invalid_credential_cooldown_secs),
            },
        )
    }

    pub fn shape(&self) -> PoolShape {
        PoolShape { credentials: self.credentials.len(), models: self.models.len() }
    }

    pub fn is_empty(&self) -> bool {
        self.shape().combinations() == 0
    }

    pub fn credential(&self, index: usize) -> Option<&SecretString> {
        self.credentials.get(index)
    }

    pub fn model(&self, index: usize) -> Option<&str> {
        self.models.get(index).map(String::as_str)
    }

    pub fn cursor(&self) -> Cursor {
        self.lock().cursor
    }

    /// Resolves the cursor to use now, skipping credentials that are parked.
    ///
    /// Skipping a credential resets the model tier. Fails once every
    /// credential has been checked and all are parked.
    pub fn select(&self, now: DateTime<Utc>) -> Result<Selection, AllCoolingDown> {
        let shape = self.shape();
        let mut state = self.lock();
        let mut cursor = state.cursor;

        for _ in 0..shape.credentials {
            let parking = &mut state.parking[cursor.credential];
            match parking.usable_after {
                Some(until) if now < until => {
                    cursor = Cursor::new((cursor.credential + 1) % shape.credentials, 0);
                }
                Some(_) => {
                    *parking = Parking::default();
                    state.cursor = cursor;
                    return Ok(Selection { cursor });
                }
                None => {
                    state.cursor = cursor;
                    return Ok(Selection { cursor });
                }
            }
        }
        Err(AllCoolingDown)
    }

    /// Applies the failure transition for `attempted`.
    ///
    /// The cooldown always lands; the cursor only moves when nobody else has
    /// moved it since the attempt was selected.
    pub fn record_failure(
        &self,
        attempted: Cursor,
        kind: FailureKind,
        now: DateTime<Utc>,
    ) -> Transition {
        let transition = advance(attempted, kind, self.shape());
        let mut state = self.lock();

        if let Some((index, class)) = transition.cooldown {
            let until = chrono::Duration::from_std(self.policy.duration_for(class))
                .ok()
                .and_then(|duration| now.checked_add_signed(duration))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            if let Some(parking) = state.parking.get_mut(index) {
                let extended = parking.usable_after.map_or(until, |current| current.max(until));
                *parking = Parking { usable_after: Some(extended), class: Some(class) };
            }
        }
        if state.cursor == attempted {
            state.cursor = transition.next;
        }
        transition
    }

    pub fn is_cooling_down(&self, index: usize, now: DateTime<Utc>) -> bool {
        self.lock()
            .parking
            .get(index)
            .and_then(|parking| parking.usable_after)
            .is_some_and(|until| now < until)
    }

    pub fn status(&self, now: DateTime<Utc>) -> PoolStatus {
        let state = self.lock();
        let credentials = state
            .parking
            .iter()
            .enumerate()
            .map(|(index, parking)| {
                let active = parking.usable_after.filter(|until| now < *until);
                CredentialStatus {
                    index,
                    usable_after: active,
                    cooldown: active.and(parking.class),
                }
            })
            .collect();
        PoolStatus { cursor: state.cursor, models: self.models.clone(), credentials }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use secrecy::SecretString;

    use super::{
        advance, AllCoolingDown, CooldownClass, CooldownPolicy, Cursor, FailureKind,
        PoolShape, ProviderPool,
    };

    const SHAPE: PoolShape = PoolShape { credentials: 2, models: 2 };

    fn pool(credentials: usize, models: usize) -> ProviderPool {
        ProviderPool::new(
            (0..credentials).map(|index| SecretString::from(format!("key-{index}"))).collect(),
            (0..models).map(|index| format!("m{}", index + 1)).collect(),
            CooldownPolicy {
                quota: Duration::from_secs(300),
                invalid_credential: Duration::from_secs(86_400),
            },
        )
    }

    #[test]
    fn transition_table() {
        struct Case {
            from: Cursor,
            kind: FailureKind,
            next: Cursor,
            cooldown: Option<(usize, CooldownClass)>,
        }

        let cases = [
            Case {
                from: Cursor::new(0, 0),
                kind: FailureKind::QuotaExceeded,
                next: Cursor::new(0, 1),
                cooldown: None,
            },
            Case {
                from: Cursor::new(0, 1),
                kind: FailureKind::QuotaExceeded,
                next: Cursor::new(1, 0),
                cooldown: Some((0, CooldownClass::Quota)),
            },
            Case {
                from: Cursor::new(1, 1),
                kind: FailureKind::QuotaExceeded,
                next: Cursor::new(0, 0),
                cooldown: Some((1, CooldownClass::Quota)),
            },
            Case {
                from: Cursor::new(0, 0),
                kind: FailureKind::Transient,
                next: Cursor::new(0, 1),
                cooldown: None,
            },
            Case {
                from: Cursor::new(0, 1),
                kind: FailureKind::Transient,
                next: Cursor::new(1, 0),
                cooldown: None,
            },
            Case {
                from: Cursor::new(0, 1),
                kind: FailureKind::InvalidCredential,
                next: Cursor::new(1, 0),
                cooldown: Some((0, CooldownClass::InvalidCredential)),
            },
        ];

        for case in cases {
            let transition = advance(case.from, case.kind, SHAPE);
            assert_eq!(transition.next, case.next, "{:?} from {:?}", case.kind, case.from);
            assert_eq!(transition.cooldown, case.cooldown, "{:?} from {:?}", case.kind, case.from);
        }
    }

    #[test]
    fn select_skips_parked_credentials_and_resets_model() {
        let pool = pool(2, 2);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid time");

        pool.record_failure(Cursor::new(0, 0), FailureKind::QuotaExceeded, now);
        assert_eq!(pool.cursor(), Cursor::new(0, 1));
        pool.record_failure(Cursor::new(0, 1), FailureKind::InvalidCredential, now);

        let selection = pool.select(now).expect("credential 1 is usable");
        assert_eq!(selection.cursor, Cursor::new(1, 0));
        assert!(pool.is_cooling_down(0, now));
    }

    #[test]
    fn parked_credential_is_never_selected_until_cooldown_ends() {
        let pool = pool(1, 2);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid time");

        pool.record_failure(Cursor::new(0, 1), FailureKind::QuotaExceeded, now);
        assert_eq!(pool.select(now), Err(AllCoolingDown));
        assert_eq!(pool.select(now + chrono::Duration::seconds(299)), Err(AllCoolingDown));

        let later = now + chrono::Duration::seconds(300);
        assert_eq!(pool.select(later).map(|selection| selection.cursor), Ok(Cursor::new(0, 0)));
        assert_eq!(pool.status(later).available_credentials(), 1);
    }

    #[test]
    fn cooldown_classes_have_distinct_durations() {
        let pool = pool(2, 1);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid time");

        pool.record_failure(Cursor::new(0, 0), FailureKind::QuotaExceeded, now);
        pool.record_failure(Cursor::new(1, 0), FailureKind::InvalidCredential, now);

        let in_an_hour = now + chrono::Duration::hours(1);
        assert!(!pool.is_cooling_down(0, in_an_hour));
        assert!(pool.is_cooling_down(1, in_an_hour));

        let status = pool.status(now);
        assert_eq!(status.credentials[0].cooldown, Some(CooldownClass::Quota));
        assert_eq!(status.credentials[1].cooldown, Some(CooldownClass::InvalidCredential));
    }

    #[test]
    fn stale_failure_parks_but_does_not_move_cursor() {
        let pool = pool(2, 2);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid time");

        // Two invocations both attempted (0, 0); only the first one advances.
        pool.record_failure(Cursor::new(0, 0), FailureKind::Transient, now);
        pool.record_failure(Cursor::new(0, 0), FailureKind::Transient, now);
        assert_eq!(pool.cursor(), Cursor::new(0, 1));

        pool.record_failure(Cursor::new(0, 1), FailureKind::InvalidCredential, now);
        pool.record_failure(Cursor::new(0, 1), FailureKind::InvalidCredential, now);
        assert_eq!(pool.cursor(), Cursor::new(1, 0));
        assert!(pool.is_cooling_down(0, now));
    }

    #[test]
    fn empty_pool_reports_no_combinations() {
        assert!(pool(0, 4).is_empty());
        assert!(pool(2, 0).is_empty());
        assert!(!pool(1, 1).is_empty());
    }
}
