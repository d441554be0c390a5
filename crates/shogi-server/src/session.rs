//! Single-writer session arbitration (§4.H): exactly one connection may
//! mutate state at a time, identified by an opaque `conn_id` the transport
//! layer assigns. `C` is whatever handle that transport needs to push a
//! `session:kicked` notice to a displaced owner; this crate never looks
//! inside it.

use std::sync::Mutex;

use rand::Rng;

fn random_token() -> String {
    format!("{:016x}", rand::rng().random::<u64>())
}

fn utc_now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[derive(Debug, Clone)]
pub enum TryGrantOutcome {
    Granted { owner_since: String, owner_token: String, session_id: String },
    Busy { owner_since: Option<String> },
}

#[derive(Debug, Clone)]
pub enum TakeoverOutcome<C> {
    /// The caller already held ownership; nothing changed.
    AlreadyOwner { owner_since: String, owner_token: String },
    /// Ownership moved to the caller. `displaced` is the previous owner's
    /// channel, if there was one and it wasn't already the caller.
    Takeover { displaced: Option<C>, owner_since: String, owner_token: String, session_id: String },
}

struct OwnerState<C> {
    conn_id: String,
    channel: C,
    owner_since: String,
    owner_token: String,
    session_id: String,
}

/// Grants exclusive ownership of the current game/analysis session to one
/// connection at a time, with a takeover path for reclaiming it.
pub struct SessionArbiter<C> {
    owner: Mutex<Option<OwnerState<C>>>,
}

impl<C: Clone> Default for SessionArbiter<C> {
    fn default() -> Self {
        SessionArbiter { owner: Mutex::new(None) }
    }
}

impl<C: Clone> SessionArbiter<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_grant(&self, conn_id: &str, channel: C) -> TryGrantOutcome {
        let mut owner = self.owner.lock().expect("session arbiter lock poisoned");
        if owner.is_some() {
            return TryGrantOutcome::Busy { owner_since: owner.as_ref().map(|o| o.owner_since.clone()) };
        }
        let owner_since = utc_now_iso();
        let owner_token = random_token();
        let session_id = random_token();
        *owner = Some(OwnerState {
            conn_id: conn_id.to_string(),
            channel,
            owner_since: owner_since.clone(),
            owner_token: owner_token.clone(),
            session_id: session_id.clone(),
        });
        TryGrantOutcome::Granted { owner_since, owner_token, session_id }
    }

    pub fn takeover(&self, conn_id: &str, channel: C) -> TakeoverOutcome<C> {
        let mut owner = self.owner.lock().expect("session arbiter lock poisoned");
        if let Some(current) = owner.as_ref() {
            if current.conn_id == conn_id {
                return TakeoverOutcome::AlreadyOwner {
                    owner_since: current.owner_since.clone(),
                    owner_token: current.owner_token.clone(),
                };
            }
        }
        let displaced = owner.take().map(|o| o.channel);
        let owner_since = utc_now_iso();
        let owner_token = random_token();
        let session_id = random_token();
        *owner = Some(OwnerState {
            conn_id: conn_id.to_string(),
            channel,
            owner_since: owner_since.clone(),
            owner_token: owner_token.clone(),
            session_id: session_id.clone(),
        });
        TakeoverOutcome::Takeover { displaced, owner_since, owner_token, session_id }
    }

    pub fn is_owner(&self, conn_id: &str) -> bool {
        self.owner.lock().expect("session arbiter lock poisoned").as_ref().is_some_and(|o| o.conn_id == conn_id)
    }

    pub fn owner_token(&self, conn_id: &str) -> Option<String> {
        let owner = self.owner.lock().expect("session arbiter lock poisoned");
        owner.as_ref().filter(|o| o.conn_id == conn_id).map(|o| o.owner_token.clone())
    }

    pub fn session_id(&self, conn_id: &str) -> Option<String> {
        let owner = self.owner.lock().expect("session arbiter lock poisoned");
        owner.as_ref().filter(|o| o.conn_id == conn_id).map(|o| o.session_id.clone())
    }

    pub fn release_if_owner(&self, conn_id: &str) -> bool {
        let mut owner = self.owner.lock().expect("session arbiter lock poisoned");
        if owner.as_ref().is_some_and(|o| o.conn_id == conn_id) {
            *owner = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_connection_is_granted_ownership() {
        let arbiter: SessionArbiter<&'static str> = SessionArbiter::new();
        let outcome = arbiter.try_grant("conn-a", "chan-a");
        assert!(matches!(outcome, TryGrantOutcome::Granted { .. }));
        assert!(arbiter.is_owner("conn-a"));
    }

    #[test]
    fn second_connection_is_reported_busy() {
        let arbiter: SessionArbiter<&'static str> = SessionArbiter::new();
        arbiter.try_grant("conn-a", "chan-a");
        let outcome = arbiter.try_grant("conn-b", "chan-b");
        assert!(matches!(outcome, TryGrantOutcome::Busy { .. }));
        assert!(!arbiter.is_owner("conn-b"));
    }

    #[test]
    fn takeover_displaces_the_previous_owner_and_rotates_tokens() {
        let arbiter: SessionArbiter<&'static str> = SessionArbiter::new();
        arbiter.try_grant("conn-a", "chan-a");
        let old_token = arbiter.owner_token("conn-a").unwrap();
        let outcome = arbiter.takeover("conn-b", "chan-b");
        match outcome {
            TakeoverOutcome::Takeover { displaced, owner_token, .. } => {
                assert_eq!(displaced, Some("chan-a"));
                assert_ne!(owner_token, old_token);
            }
            _ => panic!("expected a takeover"),
        }
        assert!(arbiter.is_owner("conn-b"));
        assert!(!arbiter.is_owner("conn-a"));
    }

    #[test]
    fn takeover_by_the_current_owner_is_a_no_op() {
        let arbiter: SessionArbiter<&'static str> = SessionArbiter::new();
        arbiter.try_grant("conn-a", "chan-a");
        let before = arbiter.owner_token("conn-a").unwrap();
        let outcome = arbiter.takeover("conn-a", "chan-a");
        assert!(matches!(outcome, TakeoverOutcome::AlreadyOwner { .. }));
        assert_eq!(arbiter.owner_token("conn-a"), Some(before));
    }

    #[test]
    fn release_if_owner_only_releases_for_the_matching_connection() {
        let arbiter: SessionArbiter<&'static str> = SessionArbiter::new();
        arbiter.try_grant("conn-a", "chan-a");
        assert!(!arbiter.release_if_owner("conn-b"));
        assert!(arbiter.release_if_owner("conn-a"));
        assert!(!arbiter.is_owner("conn-a"));
    }
}
