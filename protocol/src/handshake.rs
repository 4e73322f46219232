//! Version/verack handshake state for a single connection.
//!
//! A connection is open once both sides have sent `version` and both have
//! acknowledged with `verack`. The outbound side speaks first; the inbound
//! side replies with its own `version` when the remote one arrives.

use crate::packets::VersionPacket;
use crate::version::is_compatible;
use crate::ProtocolError;

/// What the connection must send next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeStep {
    SendVersion,
    SendVerack,
}

#[derive(Debug)]
pub struct Handshake {
    outbound: bool,
    local_nonce: u64,
    sent_version: bool,
    sent_verack: bool,
    got_verack: bool,
    remote: Option<VersionPacket>,
}

impl Handshake {
    pub fn new(outbound: bool, local_nonce: u64) -> Self {
        Self {
            outbound,
            local_nonce,
            sent_version: false,
            sent_verack: false,
            got_verack: false,
            remote: None,
        }
    }

    /// Steps to take as soon as the socket is up.
    pub fn start(&mut self) -> Vec<HandshakeStep> {
        if self.outbound && !self.sent_version {
            self.sent_version = true;
            vec![HandshakeStep::SendVersion]
        } else {
            Vec::new()
        }
    }

    pub fn on_version(&mut self, version: VersionPacket) -> Result<Vec<HandshakeStep>, ProtocolError> {
        if self.remote.is_some() {
            return Err(ProtocolError::HandshakeFailed("duplicate version".into()));
        }
        if version.nonce == self.local_nonce && version.nonce != 0 {
            return Err(ProtocolError::HandshakeFailed("connected to self".into()));
        }
        if !is_compatible(version.version) {
            return Err(ProtocolError::UnsupportedVersion(version.version));
        }
        self.remote = Some(version);

        let mut steps = Vec::with_capacity(2);
        if !self.sent_version {
            self.sent_version = true;
            steps.push(HandshakeStep::SendVersion);
        }
        self.sent_verack = true;
        steps.push(HandshakeStep::SendVerack);
        Ok(steps)
    }

    pub fn on_verack(&mut self) -> Result<(), ProtocolError> {
        if !self.sent_version {
            return Err(ProtocolError::HandshakeFailed("verack before version".into()));
        }
        self.got_verack = true;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.sent_version && self.sent_verack && self.got_verack && self.remote.is_some()
    }

    pub fn remote(&self) -> Option<&VersionPacket> {
        self.remote.as_ref()
    }

    pub fn into_remote(self) -> Option<VersionPacket> {
        self.remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::PROTOCOL_VERSION;

    fn remote(nonce: u64) -> VersionPacket {
        VersionPacket {
            nonce,
            ..VersionPacket::default()
        }
    }

    #[test]
    fn outbound_sends_version_first() {
        let mut hs = Handshake::new(true, 1);
        assert_eq!(hs.start(), vec![HandshakeStep::SendVersion]);
        assert_eq!(hs.on_version(remote(2)).unwrap(), vec![HandshakeStep::SendVerack]);
        assert!(!hs.is_complete());
        hs.on_verack().unwrap();
        assert!(hs.is_complete());
        assert_eq!(hs.remote().unwrap().version, PROTOCOL_VERSION);
    }

    #[test]
    fn inbound_replies_with_version() {
        let mut hs = Handshake::new(false, 1);
        assert!(hs.start().is_empty());
        assert_eq!(
            hs.on_version(remote(2)).unwrap(),
            vec![HandshakeStep::SendVersion, HandshakeStep::SendVerack]
        );
        hs.on_verack().unwrap();
        assert!(hs.is_complete());
    }

    #[test]
    fn self_connection_detected_by_nonce() {
        let mut hs = Handshake::new(true, 77);
        hs.start();
        assert!(matches!(
            hs.on_version(remote(77)),
            Err(ProtocolError::HandshakeFailed(_))
        ));
    }

    #[test]
    fn obsolete_peer_refused() {
        let mut hs = Handshake::new(true, 1);
        hs.start();
        let mut old = remote(2);
        old.version = 60_000;
        assert!(matches!(
            hs.on_version(old),
            Err(ProtocolError::UnsupportedVersion(60_000))
        ));
    }

    #[test]
    fn duplicate_version_is_an_error() {
        let mut hs = Handshake::new(false, 1);
        hs.on_version(remote(2)).unwrap();
        assert!(hs.on_version(remote(2)).is_err());
    }

    #[test]
    fn early_verack_is_an_error() {
        let mut hs = Handshake::new(false, 1);
        assert!(hs.on_verack().is_err());
    }
}
