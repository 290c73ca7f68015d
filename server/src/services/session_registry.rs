//! In-memory mapping from device identity to its current live connection.
//!
//! At most one connection is "current" per identity. Re-registration
//! replaces the mapping (last writer wins) without touching the displaced
//! connection; a displaced connection's later disconnect is absorbed by
//! [`SessionRegistry::release_if_current`] returning `false`.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::services::connection::ConnectionHandle;
use crate::services::identity::DeviceIdentity;

pub struct SessionRegistry {
    sessions: DashMap<String, ConnectionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Store `identity -> handle`, unconditionally replacing any prior
    /// mapping. Returns the displaced handle so the caller can log a
    /// takeover. Presence is updated separately by the caller.
    pub fn register(
        &self,
        identity: &DeviceIdentity,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let conn_id = handle.id;
        let previous = self.sessions.insert(identity.as_str().to_string(), handle);

        match &previous {
            Some(prev) if prev.id != conn_id => {
                info!(
                    device_id = %identity,
                    connection_id = %conn_id,
                    displaced_connection_id = %prev.id,
                    "Session replaced by newer registration"
                );
            }
            _ => {
                debug!(
                    device_id = %identity,
                    connection_id = %conn_id,
                    "Session registered"
                );
            }
        }

        previous
    }

    /// Non-blocking read of the current handle for an identity.
    pub fn lookup(&self, identity: &DeviceIdentity) -> Option<ConnectionHandle> {
        self.sessions
            .get(identity.as_str())
            .map(|entry| entry.value().clone())
    }

    /// Remove the mapping only if the stored handle is still `conn_id`.
    ///
    /// This comparison is what keeps a delayed disconnect callback from an
    /// old connection from evicting a newer, live session for the same
    /// identity. Returns whether the release actually happened; callers use
    /// this to decide whether the device may be marked Offline.
    pub fn release_if_current(&self, identity: &DeviceIdentity, conn_id: Uuid) -> bool {
        match self.sessions.entry(identity.as_str().to_string()) {
            Entry::Occupied(entry) if entry.get().id == conn_id => {
                entry.remove();
                debug!(
                    device_id = %identity,
                    connection_id = %conn_id,
                    "Session released"
                );
                true
            }
            _ => {
                debug!(
                    device_id = %identity,
                    connection_id = %conn_id,
                    "Stale release ignored; a newer session is current"
                );
                false
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::connection::test_support::collector_handle;
    use pretty_assertions::assert_eq;

    #[actix_rt::test]
    async fn test_last_write_wins_registration() {
        let registry = SessionRegistry::new();
        let identity = DeviceIdentity::normalize("dev-001").unwrap();
        let (a, _) = collector_handle();
        let (b, _) = collector_handle();
        let a_id = a.id;
        let b_id = b.id;

        assert!(registry.register(&identity, a).is_none());
        let displaced = registry.register(&identity, b).unwrap();
        assert_eq!(displaced.id, a_id);

        // B is current; A's stale release must not evict it.
        assert_eq!(registry.lookup(&identity).unwrap().id, b_id);
        assert!(!registry.release_if_current(&identity, a_id));
        assert_eq!(registry.lookup(&identity).unwrap().id, b_id);
    }

    #[actix_rt::test]
    async fn test_release_if_current_removes_mapping() {
        let registry = SessionRegistry::new();
        let identity = DeviceIdentity::normalize("dev-001").unwrap();
        let (a, _) = collector_handle();
        let (b, _) = collector_handle();
        let b_id = b.id;

        registry.register(&identity, a);
        registry.register(&identity, b);

        assert!(registry.release_if_current(&identity, b_id));
        assert!(registry.lookup(&identity).is_none());
        assert_eq!(registry.session_count(), 0);
    }

    #[actix_rt::test]
    async fn test_duplicate_registration_with_identity_drift() {
        // The same physical device registers twice with different casing and
        // stray whitespace; both must land on one entry, and the first
        // connection's disconnect must not release the second's session.
        let registry = SessionRegistry::new();
        let first = DeviceIdentity::normalize("dev-001").unwrap();
        let second = DeviceIdentity::normalize("DEV-001 ").unwrap();
        let (a, _) = collector_handle();
        let (b, _) = collector_handle();
        let a_id = a.id;
        let b_id = b.id;

        registry.register(&first, a);
        registry.register(&second, b);

        assert_eq!(registry.session_count(), 1);
        assert_eq!(registry.lookup(&first).unwrap().id, b_id);

        assert!(!registry.release_if_current(&first, a_id));
        assert_eq!(registry.lookup(&second).unwrap().id, b_id);
    }

    #[actix_rt::test]
    async fn test_release_unknown_identity_is_noop() {
        let registry = SessionRegistry::new();
        let identity = DeviceIdentity::normalize("dev-404").unwrap();
        assert!(!registry.release_if_current(&identity, Uuid::new_v4()));
    }
}
