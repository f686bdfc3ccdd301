//! Privilege check for CREATE.

use std::collections::HashSet;

use bytes::Bytes;

/// What the daemon knows about the peer on the other end of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCredentials {
    /// ROUTER identity frames of the peer.
    pub identity: Vec<Bytes>,
}

impl PeerCredentials {
    pub fn new(identity: Vec<Bytes>) -> Self {
        Self { identity }
    }

    /// Printable form of the identity for logs.
    pub fn label(&self) -> String {
        self.identity
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

pub trait PrivilegeChecker: Send + Sync {
    /// True if `peer` holds `privilege`.
    fn check(&self, peer: &PeerCredentials, privilege: &str) -> bool;
}

/// Grants a fixed set of privilege names to every peer.
#[derive(Debug, Clone, Default)]
pub struct StaticPrivileges {
    granted: HashSet<String>,
}

impl StaticPrivileges {
    pub fn new<I, S>(granted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            granted: granted.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(security: &recconf::SecurityConfig) -> Self {
        Self::new(security.granted.iter().cloned())
    }
}

impl PrivilegeChecker for StaticPrivileges {
    fn check(&self, _peer: &PeerCredentials, privilege: &str) -> bool {
        self.granted.contains(privilege)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_only_listed_names() {
        let peer = PeerCredentials::new(vec![Bytes::from_static(b"client-1")]);
        let checker = StaticPrivileges::new(["recorder"]);
        assert!(checker.check(&peer, "recorder"));
        assert!(!checker.check(&peer, "camera"));
        assert!(!StaticPrivileges::default().check(&peer, "recorder"));
    }

    #[test]
    fn label_joins_identity_frames() {
        let peer = PeerCredentials::new(vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        assert_eq!(peer.label(), "a/b");
    }
}
