//! Cross-domain session continuity.
//!
//! Cookies don't cross registrable domains, so a journey that hops from `acme.com` to
//! `acme-checkout.com` would normally start a fresh session and anonymous id. To stitch the two
//! halves together, outbound links are decorated with a token carrying the current session, and
//! initialization on the destination extracts it from the landing URL. An absent, malformed, or
//! expired token is not an error; the tracker just falls back to its local state.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::Str;

/// Query parameter carrying the continuation token.
pub const CONTINUITY_PARAM: &str = "_fos_xd";

/// Session state carried across a domain boundary.
///
/// Serialized as URL-safe unpadded base64 of the JSON record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuationToken {
    pub anonymous_id: Str,
    pub session_id: Str,
    pub session_started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl ContinuationToken {
    /// A token is only usable while the session it carries is still inside its inactivity
    /// window.
    pub fn is_expired(&self, session_timeout: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_activity_at > session_timeout
    }

    /// Encode for embedding in a URL query parameter.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self)
            .expect("continuation token should always be serializable to JSON");
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode a raw query parameter value. Returns `None` for anything unparsable.
    pub fn decode(raw: &str) -> Option<ContinuationToken> {
        let bytes = URL_SAFE_NO_PAD.decode(raw).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// Extract a usable continuation token from a landing URL.
///
/// Returns `None` when the URL doesn't parse, carries no token, or carries one that is malformed
/// or expired. Never panics: this runs during initialization with whatever URL the host hands
/// over.
pub fn resolve_url(
    url: &str,
    session_timeout: Duration,
    now: DateTime<Utc>,
) -> Option<ContinuationToken> {
    let parsed = Url::parse(url).ok()?;
    let raw = parsed
        .query_pairs()
        .find(|(key, _)| key == CONTINUITY_PARAM)
        .map(|(_, value)| value.into_owned())?;

    let token = match ContinuationToken::decode(&raw) {
        Some(token) => token,
        None => {
            log::debug!(target: "founderos", "ignoring malformed continuation token");
            return None;
        }
    };

    if token.is_expired(session_timeout, now) {
        log::debug!(target: "founderos", "ignoring expired continuation token");
        return None;
    }

    Some(token)
}

/// Decorate an outbound URL with a continuation token so the destination can pick the session
/// up. Returns `None` when the URL doesn't parse.
pub fn decorate_url(url: &str, token: &ContinuationToken) -> Option<String> {
    let mut parsed = Url::parse(url).ok()?;
    parsed
        .query_pairs_mut()
        .append_pair(CONTINUITY_PARAM, &token.encode());
    Some(parsed.into())
}
