//! Anonymous id, identified user, and session lifecycle.
//!
//! One persisted record holds everything: the device-stable anonymous id, the identified user (if
//! any) with their merged traits, and the current session window. Sessions expire lazily: the
//! check happens when the next event arrives, not on a timer.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::continuity::ContinuationToken;
use crate::events::Properties;
use crate::storage::StorageBackend;
use crate::Str;

/// The persisted identity record, stored as one JSON value under the configured identity key.
///
/// Absence of the record on load is a first run, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedIdentity {
    /// Brand the record belongs to. A mismatch on load means the storage key is being reused for
    /// a different brand, and the record is discarded rather than mixed in.
    pub brand_id: String,
    pub anonymous_id: Str,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<Str>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub traits: Properties,
    pub session_id: Str,
    pub session_started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl PersistedIdentity {
    fn fresh(brand_id: &str, now: DateTime<Utc>) -> PersistedIdentity {
        PersistedIdentity {
            brand_id: brand_id.to_owned(),
            anonymous_id: generate_id(),
            user_id: None,
            traits: Properties::new(),
            session_id: generate_id(),
            session_started_at: now,
            last_activity_at: now,
        }
    }

    fn seeded(brand_id: &str, token: ContinuationToken) -> PersistedIdentity {
        PersistedIdentity {
            brand_id: brand_id.to_owned(),
            anonymous_id: token.anonymous_id,
            user_id: None,
            traits: Properties::new(),
            session_id: token.session_id,
            session_started_at: token.session_started_at,
            last_activity_at: token.last_activity_at,
        }
    }
}

/// Ids stamped into an event's context, taken atomically at call time.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentitySnapshot {
    pub anonymous_id: Str,
    pub user_id: Option<Str>,
    pub session_id: Str,
}

/// Owns the identity record and its persistence.
///
/// All methods take an explicit `now` so session expiry is deterministic. The manager writes only
/// its own storage key; the event queue mirror lives under a different one.
pub struct IdentityManager {
    storage: Arc<dyn StorageBackend>,
    key: String,
    session_timeout: Duration,
    state: PersistedIdentity,
    /// Cleared on the first failed write; the manager then runs memory-only.
    storage_ok: bool,
}

impl IdentityManager {
    /// Load the identity record, preferring (in order): a cross-domain continuation token, the
    /// stored record, a fresh identity.
    ///
    /// A token wins over local state so a journey that crossed a domain boundary keeps the
    /// originating session and anonymous id; the stored user and traits are retained when the
    /// brand matches.
    pub fn load(
        storage: Arc<dyn StorageBackend>,
        key: impl Into<String>,
        brand_id: &str,
        session_timeout: Duration,
        token: Option<ContinuationToken>,
        now: DateTime<Utc>,
    ) -> IdentityManager {
        let key = key.into();

        let stored = match storage.get(&key) {
            Ok(Some(raw)) => match serde_json::from_str::<PersistedIdentity>(&raw) {
                Ok(record) if record.brand_id == brand_id => Some(record),
                Ok(record) => {
                    log::warn!(target: "founderos",
                               stored_brand = record.brand_id, brand = brand_id;
                               "identity record belongs to a different brand, starting fresh");
                    None
                }
                Err(err) => {
                    log::warn!(target: "founderos",
                               "discarding unreadable identity record: {err}");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                log::warn!(target: "founderos", "failed to read identity record: {err}");
                None
            }
        };

        let state = match (token, stored) {
            (Some(token), Some(mut record)) => {
                log::debug!(target: "founderos",
                            session_id = token.session_id;
                            "continuing session from cross-domain token");
                record.anonymous_id = token.anonymous_id;
                record.session_id = token.session_id;
                record.session_started_at = token.session_started_at;
                record.last_activity_at = token.last_activity_at;
                record
            }
            (Some(token), None) => PersistedIdentity::seeded(brand_id, token),
            (None, Some(record)) => record,
            (None, None) => PersistedIdentity::fresh(brand_id, now),
        };

        let mut manager = IdentityManager {
            storage,
            key,
            session_timeout,
            state,
            storage_ok: true,
        };
        manager.persist();
        manager
    }

    /// Register activity: rotate the session first if it has expired, then bump
    /// `last_activity_at`. Called for every stamped event.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now - self.state.last_activity_at > self.session_timeout {
            self.state.session_id = generate_id();
            self.state.session_started_at = now;
            log::debug!(target: "founderos",
                        session_id = self.state.session_id;
                        "session expired, rotated to a new one");
        }
        self.state.last_activity_at = now;
        self.persist();
    }

    /// Current ids for stamping an event context.
    pub fn snapshot(&self) -> IdentitySnapshot {
        IdentitySnapshot {
            anonymous_id: self.state.anonymous_id.clone(),
            user_id: self.state.user_id.clone(),
            session_id: self.state.session_id.clone(),
        }
    }

    /// Set the identified user and merge `traits` into the stored ones (new keys overwrite,
    /// others are retained). Switching users does not rotate the anonymous id.
    pub fn identify(&mut self, user_id: Str, traits: Option<Properties>) {
        if self.state.user_id.as_ref() != Some(&user_id) {
            self.state.user_id = Some(user_id);
        }
        if let Some(traits) = traits {
            self.state.traits.extend(traits);
        }
        self.persist();
    }

    /// Merge `traits` without touching the identified user.
    pub fn merge_traits(&mut self, traits: Properties) {
        self.state.traits.extend(traits);
        self.persist();
    }

    /// Clear session, user id, and traits. When `all` is true, also discard the anonymous id so
    /// a fresh one is generated.
    pub fn reset(&mut self, all: bool, now: DateTime<Utc>) {
        self.state.user_id = None;
        self.state.traits.clear();
        self.state.session_id = generate_id();
        self.state.session_started_at = now;
        self.state.last_activity_at = now;
        if all {
            self.state.anonymous_id = generate_id();
        }
        self.persist();
    }

    /// Replace the inactivity window (used when the tracker is reconfigured).
    pub fn set_session_timeout(&mut self, session_timeout: Duration) {
        self.session_timeout = session_timeout;
    }

    /// The current record. Primarily for diagnostics and host bridges.
    pub fn record(&self) -> &PersistedIdentity {
        &self.state
    }

    fn persist(&mut self) {
        if !self.storage_ok {
            return;
        }

        let payload = serde_json::to_string(&self.state)
            .expect("identity record should always be serializable to JSON");

        if let Err(err) = self.storage.set(&self.key, &payload) {
            log::warn!(target: "founderos",
                       "failed to persist identity record, continuing in memory only: {err}");
            self.storage_ok = false;
        }
    }
}

fn generate_id() -> Str {
    Str::from(uuid::Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::storage::{MemoryStorage, NoopStorage};

    fn timeout() -> Duration {
        Duration::milliseconds(1_000)
    }

    fn manager(storage: Arc<dyn StorageBackend>, now: DateTime<Utc>) -> IdentityManager {
        IdentityManager::load(storage, "fos", "acme", timeout(), None, now)
    }

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    #[test]
    fn first_run_generates_fresh_identity() {
        let manager = manager(Arc::new(NoopStorage), t0());

        let snapshot = manager.snapshot();
        assert!(!snapshot.anonymous_id.is_empty());
        assert!(!snapshot.session_id.is_empty());
        assert_eq!(snapshot.user_id, None);
    }

    #[test]
    fn session_survives_activity_within_the_timeout() {
        let mut manager = manager(Arc::new(NoopStorage), t0());
        let session = manager.snapshot().session_id;

        manager.touch(t0() + Duration::milliseconds(999));

        assert_eq!(manager.snapshot().session_id, session);
    }

    #[test]
    fn session_rotates_after_the_timeout_but_anonymous_id_survives() {
        let mut manager = manager(Arc::new(NoopStorage), t0());
        let before = manager.snapshot();

        manager.touch(t0() + Duration::milliseconds(1_001));

        let after = manager.snapshot();
        assert_ne!(after.session_id, before.session_id);
        assert_eq!(after.anonymous_id, before.anonymous_id);
    }

    #[test]
    fn activity_extends_the_session_window() {
        let mut manager = manager(Arc::new(NoopStorage), t0());
        let session = manager.snapshot().session_id;

        manager.touch(t0() + Duration::milliseconds(900));
        manager.touch(t0() + Duration::milliseconds(1_800));

        assert_eq!(manager.snapshot().session_id, session);
    }

    #[test]
    fn identify_merges_traits_instead_of_replacing() {
        let mut manager = manager(Arc::new(NoopStorage), t0());

        manager.identify(
            Str::from("user-1"),
            Some(
                [
                    ("plan".to_owned(), json!("free")),
                    ("team".to_owned(), json!("growth")),
                ]
                .into_iter()
                .collect(),
            ),
        );
        manager.identify(
            Str::from("user-1"),
            Some([("plan".to_owned(), json!("pro"))].into_iter().collect()),
        );

        let traits = &manager.record().traits;
        assert_eq!(traits["plan"], json!("pro"));
        assert_eq!(traits["team"], json!("growth"));
    }

    #[test]
    fn switching_users_keeps_the_anonymous_id() {
        let mut manager = manager(Arc::new(NoopStorage), t0());
        let anonymous = manager.snapshot().anonymous_id;

        manager.identify(Str::from("user-1"), None);
        manager.identify(Str::from("user-2"), None);

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.user_id.as_deref(), Some("user-2"));
        assert_eq!(snapshot.anonymous_id, anonymous);
    }

    #[test]
    fn reset_clears_user_but_keeps_anonymous_id() {
        let mut manager = manager(Arc::new(NoopStorage), t0());
        manager.identify(Str::from("user-1"), Some([("a".to_owned(), json!(1))].into_iter().collect()));
        let before = manager.snapshot();

        manager.reset(false, t0() + Duration::seconds(5));

        let after = manager.snapshot();
        assert_eq!(after.user_id, None);
        assert!(manager.record().traits.is_empty());
        assert_ne!(after.session_id, before.session_id);
        assert_eq!(after.anonymous_id, before.anonymous_id);
    }

    #[test]
    fn reset_all_discards_the_anonymous_id() {
        let mut manager = manager(Arc::new(NoopStorage), t0());
        let before = manager.snapshot();

        manager.reset(true, t0() + Duration::seconds(5));

        assert_ne!(manager.snapshot().anonymous_id, before.anonymous_id);
    }

    #[test]
    fn identity_round_trips_through_storage() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());

        let mut first = manager(Arc::clone(&storage), t0());
        first.identify(
            Str::from("user-1"),
            Some([("plan".to_owned(), json!("pro"))].into_iter().collect()),
        );
        let expected = first.record().clone();
        drop(first);

        let second = manager(Arc::clone(&storage), t0() + Duration::milliseconds(500));
        assert_eq!(second.record(), &expected);
    }

    #[test]
    fn record_for_a_different_brand_is_discarded() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let first = IdentityManager::load(
            Arc::clone(&storage),
            "fos",
            "acme",
            timeout(),
            None,
            t0(),
        );
        let acme_anonymous = first.snapshot().anonymous_id;
        drop(first);

        let second = IdentityManager::load(
            Arc::clone(&storage),
            "fos",
            "globex",
            timeout(),
            None,
            t0(),
        );

        assert_ne!(second.snapshot().anonymous_id, acme_anonymous);
        assert_eq!(second.record().brand_id, "globex");
    }

    #[test]
    fn continuation_token_seeds_session_and_anonymous_id() {
        let token = ContinuationToken {
            anonymous_id: Str::from("anon-far-away"),
            session_id: Str::from("session-far-away"),
            session_started_at: t0(),
            last_activity_at: t0(),
        };

        let manager = IdentityManager::load(
            Arc::new(NoopStorage),
            "fos",
            "acme",
            timeout(),
            Some(token),
            t0(),
        );

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.anonymous_id.as_str(), "anon-far-away");
        assert_eq!(snapshot.session_id.as_str(), "session-far-away");
    }

    #[test]
    fn continuation_token_overrides_stored_session_but_keeps_user() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let mut first = manager(Arc::clone(&storage), t0());
        first.identify(Str::from("user-1"), None);
        drop(first);

        let token = ContinuationToken {
            anonymous_id: Str::from("anon-far-away"),
            session_id: Str::from("session-far-away"),
            session_started_at: t0(),
            last_activity_at: t0(),
        };
        let second = IdentityManager::load(
            Arc::clone(&storage),
            "fos",
            "acme",
            timeout(),
            Some(token),
            t0(),
        );

        let snapshot = second.snapshot();
        assert_eq!(snapshot.session_id.as_str(), "session-far-away");
        assert_eq!(snapshot.anonymous_id.as_str(), "anon-far-away");
        assert_eq!(snapshot.user_id.as_deref(), Some("user-1"));
    }
}
