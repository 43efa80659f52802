//! Handshake validation for incoming node connections
//!
//! Checks are applied in a fixed order: repeated handshake, protocol
//! version, credential, then node-id uniqueness. Credentials are compared
//! as SHA-256 digests with a constant-time comparison; plaintext secrets are
//! never kept after construction.

use crate::registry::{ConnectionHandle, NodeRegistry, NodeSession};
use log::{info, warn};
use sha2::{Digest, Sha256};
use shared::messages::Handshake;
use shared::utils::{current_millis, millis_between};
use shared::CLOCK_SKEW_TOLERANCE_MS;
use std::net::SocketAddr;
use std::sync::Arc;

type KeyDigest = [u8; 32];

pub struct SecretKeyValidator {
    key_digests: Vec<KeyDigest>,
}

impl SecretKeyValidator {
    pub fn new<I, S>(secret_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            key_digests: secret_keys.into_iter().map(|key| digest(key.as_ref())).collect(),
        }
    }

    /// Checks the key against every configured digest without short-circuiting.
    pub fn validate(&self, provided: &str) -> bool {
        let provided = digest(provided);
        self.key_digests
            .iter()
            .fold(false, |matched, known| constant_time_eq(known, &provided) | matched)
    }

    pub fn key_count(&self) -> usize {
        self.key_digests.len()
    }
}

fn digest(key: &str) -> KeyDigest {
    Sha256::digest(key.as_bytes()).into()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRejection {
    AlreadyAuthenticated,
    VersionMismatch { expected: u32, actual: u32 },
    InvalidSecret,
    DuplicateNode(String),
}

impl AuthRejection {
    /// Human-readable reason sent back to the node.
    pub fn reason(&self) -> String {
        match self {
            AuthRejection::AlreadyAuthenticated => "Already authenticated".to_string(),
            AuthRejection::VersionMismatch { .. } => "Protocol version mismatch".to_string(),
            AuthRejection::InvalidSecret => "Invalid secret key".to_string(),
            AuthRejection::DuplicateNode(node) => format!("Node already connected: {}", node),
        }
    }

    /// A repeated handshake leaves the existing session in place.
    pub fn closes_connection(&self) -> bool {
        !matches!(self, AuthRejection::AlreadyAuthenticated)
    }
}

#[derive(Debug)]
pub enum AuthOutcome {
    Accepted(Arc<NodeSession>),
    Rejected(AuthRejection),
}

pub struct AuthGuard {
    validator: SecretKeyValidator,
    registry: Arc<NodeRegistry>,
    protocol_version: u32,
}

impl AuthGuard {
    pub fn new(validator: SecretKeyValidator, registry: Arc<NodeRegistry>, protocol_version: u32) -> Self {
        Self {
            validator,
            registry,
            protocol_version,
        }
    }

    pub fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    /// Validates a handshake and registers the node on success.
    pub fn authenticate(
        &self,
        handshake: &Handshake,
        already_authenticated: bool,
        remote_addr: SocketAddr,
        connection: ConnectionHandle,
    ) -> AuthOutcome {
        if already_authenticated {
            warn!("Duplicate handshake from {} ({})", handshake.node_name, remote_addr);
            return AuthOutcome::Rejected(AuthRejection::AlreadyAuthenticated);
        }

        if handshake.protocol_version != self.protocol_version {
            warn!(
                "Protocol version mismatch from {}: expected {}, got {}",
                handshake.node_name, self.protocol_version, handshake.protocol_version
            );
            return AuthOutcome::Rejected(AuthRejection::VersionMismatch {
                expected: self.protocol_version,
                actual: handshake.protocol_version,
            });
        }

        if !self.validator.validate(&handshake.secret_key) {
            warn!("Invalid secret key from {} ({})", handshake.node_name, remote_addr);
            return AuthOutcome::Rejected(AuthRejection::InvalidSecret);
        }

        let skew = millis_between(current_millis(), handshake.timestamp);
        if skew > CLOCK_SKEW_TOLERANCE_MS {
            warn!("Clock skew detected for {}: {}ms", handshake.node_name, skew);
        }

        let session = Arc::new(NodeSession::new(handshake.node_name.clone(), remote_addr, connection));
        if !self.registry.try_register(Arc::clone(&session)) {
            warn!("Rejected duplicate node id {} from {}", handshake.node_name, remote_addr);
            return AuthOutcome::Rejected(AuthRejection::DuplicateNode(handshake.node_name.clone()));
        }

        info!("Node {} authenticated from {}", handshake.node_name, remote_addr);
        AuthOutcome::Accepted(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::PROTOCOL_VERSION;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn handshake(node: &str, secret: &str) -> Handshake {
        Handshake {
            protocol_version: PROTOCOL_VERSION,
            node_name: node.to_string(),
            secret_key: secret.to_string(),
            timestamp: current_millis(),
        }
    }

    fn guard() -> (AuthGuard, Arc<NodeRegistry>) {
        let registry = Arc::new(NodeRegistry::new());
        let validator = SecretKeyValidator::new(["alpha", "beta"]);
        (AuthGuard::new(validator, Arc::clone(&registry), PROTOCOL_VERSION), registry)
    }

    fn connection(id: u64) -> ConnectionHandle {
        ConnectionHandle::channel(id).0
    }

    #[test]
    fn test_validator_accepts_any_configured_key() {
        let validator = SecretKeyValidator::new(vec!["alpha".to_string(), "beta".to_string()]);
        assert_eq!(validator.key_count(), 2);
        assert!(validator.validate("alpha"));
        assert!(validator.validate("beta"));
        assert!(!validator.validate("gamma"));
        assert!(!validator.validate(""));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[test]
    fn test_successful_handshake_registers_node() {
        let (guard, registry) = guard();
        match guard.authenticate(&handshake("lobby-1", "alpha"), false, test_addr(), connection(1)) {
            AuthOutcome::Accepted(session) => assert_eq!(session.node_id, "lobby-1"),
            other => panic!("expected acceptance, got {:?}", other),
        }
        assert!(registry.is_registered("lobby-1"));
    }

    #[test]
    fn test_wrong_version_is_rejected() {
        let (guard, registry) = guard();
        let mut hs = handshake("lobby-1", "alpha");
        hs.protocol_version = 99;
        match guard.authenticate(&hs, false, test_addr(), connection(1)) {
            AuthOutcome::Rejected(rejection) => {
                assert_eq!(rejection.reason(), "Protocol version mismatch");
                assert!(rejection.closes_connection());
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_bad_secret_is_rejected() {
        let (guard, registry) = guard();
        assert!(matches!(
            guard.authenticate(&handshake("lobby-1", "wrong"), false, test_addr(), connection(1)),
            AuthOutcome::Rejected(AuthRejection::InvalidSecret)
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_node_keeps_first_session() {
        let (guard, registry) = guard();
        assert!(matches!(
            guard.authenticate(&handshake("lobby-1", "alpha"), false, test_addr(), connection(1)),
            AuthOutcome::Accepted(_)
        ));
        match guard.authenticate(&handshake("lobby-1", "beta"), false, test_addr(), connection(2)) {
            AuthOutcome::Rejected(rejection) => {
                assert_eq!(rejection.reason(), "Node already connected: lobby-1");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.get("lobby-1").unwrap().connection().id(), 1);
    }

    #[test]
    fn test_repeated_handshake_has_no_side_effects() {
        let (guard, registry) = guard();
        let outcome = guard.authenticate(&handshake("lobby-2", "alpha"), true, test_addr(), connection(1));
        match outcome {
            AuthOutcome::Rejected(rejection) => {
                assert_eq!(rejection, AuthRejection::AlreadyAuthenticated);
                assert!(!rejection.closes_connection());
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clock_skew_is_not_fatal() {
        let (guard, _registry) = guard();
        let mut hs = handshake("lobby-1", "alpha");
        hs.timestamp = hs.timestamp.saturating_sub(60_000);
        assert!(matches!(
            guard.authenticate(&hs, false, test_addr(), connection(1)),
            AuthOutcome::Accepted(_)
        ));
    }
}
