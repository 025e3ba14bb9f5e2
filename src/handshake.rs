//! The distribution handshake (spec component C4): mutual MD5
//! challenge/response authentication exchanged over the name/status/
//! challenge/reply/ack frame sequence, framed the same way `epmd.rs` frames
//! its requests (`Socket::message_writer`/`message_reader`, u16-length
//! prefixed).
//!
//! The teacher's own `handshake.rs` is a stale `fibers`/`handy_async`/
//! futures-0.1 snapshot that predates the current futures-0.3 `socket.rs`;
//! its I/O plumbing doesn't compile against this crate's dependency stack.
//! The protocol sequence and MD5 digest rule it encodes are still correct
//! and are what this module is grounded on; the actual current-API shape
//! (`LocalNode`, `ServerSideHandshake::execute_recv_name`/`execute_rest`,
//! `HandshakeStatus::{Ok, Named}`) comes from `examples/recv_msg.rs`, the
//! only place in the teacher repo that exercises the intended API.

use futures::io::{AsyncRead, AsyncWrite};
use rand::RngCore;

use crate::flags::DistributionFlags;
use crate::naming::{Creation, NodeName};
use crate::socket::Socket;

const TAG_NAME: u8 = b'n';
const TAG_STATUS: u8 = b's';
const TAG_CHALLENGE: u8 = b'n';
const TAG_CHALLENGE_REPLY: u8 = b'r';
const TAG_CHALLENGE_ACK: u8 = b'a';

/// The only distribution protocol version this handshake speaks. OTP's
/// version-6 handshake (tag `'N'`, 64-bit flags in the name/challenge
/// frames) is not implemented; spec.md's Non-goals exclude binary-format
/// evolution beyond what's needed for a working v5 handshake.
const DISTRIBUTION_VERSION: u16 = 5;

/// spec.md §4.4: the negotiated version (`min(peer.distHigh, self.distHigh)`)
/// must be at least this, and the mandatory flags below must be present, or
/// the handshake is refused.
const MIN_DISTRIBUTION_VERSION: u16 = 5;

fn required_peer_flags() -> DistributionFlags {
    DistributionFlags::EXTENDED_REFERENCES | DistributionFlags::EXTENDED_PIDS_PORTS
}

/// Negotiates the distribution version with a peer's advertised version and
/// checks its flags, per spec.md §4.4. Both handshake roles call this right
/// after reading the peer's name/challenge frame.
fn negotiate(peer_version: u16, peer_flags: DistributionFlags) -> Result<(), HandshakeError> {
    let negotiated = peer_version.min(DISTRIBUTION_VERSION);
    if negotiated < MIN_DISTRIBUTION_VERSION {
        return Err(HandshakeError::VersionTooOld {
            negotiated,
            minimum: MIN_DISTRIBUTION_VERSION,
        });
    }
    if !peer_flags.contains(required_peer_flags()) {
        return Err(HandshakeError::MissingMandatoryFlags);
    }
    Ok(())
}

/// This node's identity as presented during a handshake.
#[derive(Debug, Clone)]
pub struct LocalNode {
    pub name: NodeName,
    pub creation: Creation,
    pub flags: DistributionFlags,
}

impl LocalNode {
    pub fn new(name: NodeName, creation: Creation) -> Self {
        Self {
            name,
            creation,
            flags: DistributionFlags::default(),
        }
    }
}

/// The peer's identity, learned during a handshake.
#[derive(Debug, Clone)]
pub struct PeerNode {
    pub name: NodeName,
    pub flags: DistributionFlags,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum HandshakeError {
    #[error("peer rejected the handshake with status {status:?}")]
    Rejected { status: String },

    #[error("peer sent an unexpected frame tag {tag} (expected {expected})")]
    UnexpectedTag { tag: u8, expected: u8 },

    #[error("peer's node name {name:?} is invalid: {source}")]
    InvalidPeerName {
        name: String,
        #[source]
        source: crate::naming::NodeNameError,
    },

    #[error("challenge digest mismatch: the peer's cookie does not match ours")]
    DigestMismatch,

    #[error("handshake frame was empty")]
    EmptyFrame,

    #[error("negotiated distribution version {negotiated} is below the minimum of {minimum}")]
    VersionTooOld { negotiated: u16, minimum: u16 },

    #[error("peer is missing mandatory distribution flags: extended references and extended pids/ports are required")]
    MissingMandatoryFlags,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Either side of a handshake tells the other which of two post-name
/// outcomes applies: the peer's name was already known (`Ok`), or this side
/// is assigning it a name dynamically (`Named`), per the `NAME_ME` flag
/// protocol spec.md §4.4 describes.
#[derive(Debug, Clone)]
pub enum HandshakeStatus {
    Ok,
    Named { name: String, creation: Creation },
}

fn calc_digest(cookie: &str, challenge: u32) -> [u8; 16] {
    md5::compute(format!("{cookie}{challenge}")).0
}

async fn send_name_frame<T>(
    socket: &mut Socket<T>,
    tag: u8,
    flags: DistributionFlags,
    challenge: Option<u32>,
    name: &str,
) -> std::io::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut w = socket.message_writer();
    w.write_u8(tag)?;
    w.write_u16(DISTRIBUTION_VERSION)?;
    w.write_u32(flags.bits() as u32)?;
    if let Some(challenge) = challenge {
        w.write_u32(challenge)?;
    }
    w.write_all(name.as_bytes())?;
    w.finish().await
}

struct NameFrame {
    version: u16,
    flags: DistributionFlags,
    challenge: Option<u32>,
    name: String,
}

async fn recv_name_frame<T>(socket: &mut Socket<T>, expect_challenge: bool) -> Result<NameFrame, HandshakeError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut r = socket.message_reader().await?;
    let tag = r.read_u8().await?;
    if tag != TAG_NAME {
        return Err(HandshakeError::UnexpectedTag {
            tag,
            expected: TAG_NAME,
        });
    }
    let version = r.read_u16().await?;
    let flags = DistributionFlags::from_bits_truncate(r.read_u32().await? as u64);
    let challenge = if expect_challenge {
        Some(r.read_u32().await?)
    } else {
        None
    };
    let name = r.read_string().await?;
    Ok(NameFrame {
        version,
        flags,
        challenge,
        name,
    })
}

async fn send_status<T>(socket: &mut Socket<T>, status: &HandshakeStatus) -> std::io::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut w = socket.message_writer();
    w.write_u8(TAG_STATUS)?;
    match status {
        HandshakeStatus::Ok => w.write_all(b"ok")?,
        HandshakeStatus::Named { name, creation } => {
            w.write_all(b"named")?;
            w.write_u16(name.len() as u16)?;
            w.write_all(name.as_bytes())?;
            w.write_u32(creation.as_u32())?;
        }
    }
    w.finish().await
}

async fn recv_status<T>(socket: &mut Socket<T>) -> Result<String, HandshakeError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut r = socket.message_reader().await?;
    let tag = r.read_u8().await?;
    if tag != TAG_STATUS {
        return Err(HandshakeError::UnexpectedTag {
            tag,
            expected: TAG_STATUS,
        });
    }
    let status = r.read_string().await?;
    if status.is_empty() {
        return Err(HandshakeError::EmptyFrame);
    }
    Ok(status)
}

async fn send_challenge_reply<T>(socket: &mut Socket<T>, challenge: u32, digest: [u8; 16]) -> std::io::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut w = socket.message_writer();
    w.write_u8(TAG_CHALLENGE_REPLY)?;
    w.write_u32(challenge)?;
    w.write_all(&digest)?;
    w.finish().await
}

async fn recv_challenge_reply<T>(socket: &mut Socket<T>) -> Result<(u32, [u8; 16]), HandshakeError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut r = socket.message_reader().await?;
    let tag = r.read_u8().await?;
    if tag != TAG_CHALLENGE_REPLY {
        return Err(HandshakeError::UnexpectedTag {
            tag,
            expected: TAG_CHALLENGE_REPLY,
        });
    }
    let challenge = r.read_u32().await?;
    let mut digest = [0u8; 16];
    r.read_exact(&mut digest).await?;
    Ok((challenge, digest))
}

async fn send_challenge_ack<T>(socket: &mut Socket<T>, digest: [u8; 16]) -> std::io::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut w = socket.message_writer();
    w.write_u8(TAG_CHALLENGE_ACK)?;
    w.write_all(&digest)?;
    w.finish().await
}

async fn recv_challenge_ack<T>(socket: &mut Socket<T>) -> Result<[u8; 16], HandshakeError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut r = socket.message_reader().await?;
    let tag = r.read_u8().await?;
    if tag != TAG_CHALLENGE_ACK {
        return Err(HandshakeError::UnexpectedTag {
            tag,
            expected: TAG_CHALLENGE_ACK,
        });
    }
    let mut digest = [0u8; 16];
    r.read_exact(&mut digest).await?;
    Ok(digest)
}

fn parse_peer_name(raw: &str, flags: DistributionFlags) -> Result<PeerNode, HandshakeError> {
    let name = raw.parse().map_err(|source| HandshakeError::InvalidPeerName {
        name: raw.to_owned(),
        source,
    })?;
    Ok(PeerNode { name, flags })
}

fn random_challenge() -> u32 {
    rand::thread_rng().next_u32()
}

/// The connecting side of a handshake: sends its name first, then completes
/// the challenge/reply/ack exchange it receives from the accepting side.
#[derive(Debug)]
pub struct ClientSideHandshake<T> {
    socket: Socket<T>,
    local_node: LocalNode,
    cookie: String,
}

impl<T> ClientSideHandshake<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(connection: T, local_node: LocalNode, cookie: &str) -> Self {
        Self {
            socket: Socket::new(connection),
            local_node,
            cookie: cookie.to_owned(),
        }
    }

    pub async fn execute(mut self) -> Result<(T, PeerNode), HandshakeError> {
        send_name_frame(
            &mut self.socket,
            TAG_NAME,
            self.local_node.flags,
            None,
            &self.local_node.name.to_string(),
        )
        .await?;

        let status = recv_status(&mut self.socket).await?;
        if status != "ok" && status != "ok_simultaneous" {
            return Err(HandshakeError::Rejected { status });
        }

        let challenge_frame = recv_name_frame(&mut self.socket, true).await?;
        negotiate(challenge_frame.version, challenge_frame.flags)?;
        let peer = parse_peer_name(&challenge_frame.name, challenge_frame.flags)?;
        let peer_challenge = challenge_frame.challenge.ok_or(HandshakeError::EmptyFrame)?;

        let our_challenge = random_challenge();
        let reply_digest = calc_digest(&self.cookie, peer_challenge);
        send_challenge_reply(&mut self.socket, our_challenge, reply_digest).await?;

        let ack_digest = recv_challenge_ack(&mut self.socket).await?;
        if ack_digest != calc_digest(&self.cookie, our_challenge) {
            return Err(HandshakeError::DigestMismatch);
        }

        Ok((self.socket.into_inner(), peer))
    }
}

/// The accepting side of a handshake. `execute_recv_name` reads the peer's
/// name frame and must run before `execute_rest`, which picks its status
/// reply based on whether the peer requested a dynamically assigned name
/// (`NAME_ME`, surfaced as `execute_recv_name` returning `None`).
#[derive(Debug)]
pub struct ServerSideHandshake<T> {
    socket: Socket<T>,
    local_node: LocalNode,
    cookie: String,
    peer_version: Option<u16>,
    peer_flags: Option<DistributionFlags>,
    peer_name: Option<String>,
}

impl<T> ServerSideHandshake<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(connection: T, local_node: LocalNode, cookie: &str) -> Self {
        Self {
            socket: Socket::new(connection),
            local_node,
            cookie: cookie.to_owned(),
            peer_version: None,
            peer_flags: None,
            peer_name: None,
        }
    }

    /// Reads the peer's name frame and negotiates the distribution version
    /// and mandatory flags (spec §4.4) before accepting it. Returns
    /// `Some(name)` when the peer presented a static name, `None` when it
    /// set the `NAME_ME` flag and expects this side to assign one via
    /// `HandshakeStatus::Named`.
    pub async fn execute_recv_name(&mut self) -> Result<Option<String>, HandshakeError> {
        let frame = recv_name_frame(&mut self.socket, false).await?;
        negotiate(frame.version, frame.flags)?;
        self.peer_version = Some(frame.version);
        self.peer_flags = Some(frame.flags);
        if frame.flags.contains(DistributionFlags::NAME_ME) {
            self.peer_name = None;
            Ok(None)
        } else {
            self.peer_name = Some(frame.name.clone());
            Ok(Some(frame.name))
        }
    }

    pub async fn execute_rest(mut self, status: HandshakeStatus) -> Result<(T, PeerNode), HandshakeError> {
        let peer_flags = self.peer_flags.ok_or(HandshakeError::EmptyFrame)?;
        let peer_version = self.peer_version.ok_or(HandshakeError::EmptyFrame)?;
        negotiate(peer_version, peer_flags)?;
        let peer_name_str = match &status {
            HandshakeStatus::Ok => self.peer_name.clone().ok_or(HandshakeError::EmptyFrame)?,
            HandshakeStatus::Named { name, .. } => name.clone(),
        };

        send_status(&mut self.socket, &status).await?;

        let our_challenge = random_challenge();
        send_name_frame(
            &mut self.socket,
            TAG_CHALLENGE,
            self.local_node.flags,
            Some(our_challenge),
            &self.local_node.name.to_string(),
        )
        .await?;

        let (peer_challenge, their_reply_digest) = recv_challenge_reply(&mut self.socket).await?;
        if their_reply_digest != calc_digest(&self.cookie, our_challenge) {
            return Err(HandshakeError::DigestMismatch);
        }

        let ack_digest = calc_digest(&self.cookie, peer_challenge);
        send_challenge_ack(&mut self.socket, ack_digest).await?;

        let peer = parse_peer_name(&peer_name_str, peer_flags)?;
        Ok((self.socket.into_inner(), peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic_for_same_inputs() {
        let a = calc_digest("cookie", 42);
        let b = calc_digest("cookie", 42);
        assert_eq!(a, b);
    }

    #[test]
    fn digest_differs_for_different_cookies() {
        let a = calc_digest("cookie-a", 42);
        let b = calc_digest("cookie-b", 42);
        assert_ne!(a, b);
    }

    #[test]
    fn local_node_defaults_to_mandatory_flags() {
        let name: NodeName = "foo@localhost".parse().unwrap();
        let local = LocalNode::new(name, Creation::new(1));
        assert_eq!(local.flags, DistributionFlags::mandatory());
    }

    #[test]
    fn negotiate_rejects_a_version_below_the_minimum() {
        let err = negotiate(4, DistributionFlags::mandatory()).unwrap_err();
        assert!(matches!(err, HandshakeError::VersionTooOld { negotiated: 4, minimum: 5 }));
    }

    #[test]
    fn negotiate_rejects_flags_missing_extended_references_or_pids_ports() {
        let err = negotiate(5, DistributionFlags::empty()).unwrap_err();
        assert!(matches!(err, HandshakeError::MissingMandatoryFlags));

        let err = negotiate(5, DistributionFlags::EXTENDED_REFERENCES).unwrap_err();
        assert!(matches!(err, HandshakeError::MissingMandatoryFlags));
    }

    #[test]
    fn negotiate_accepts_version_5_with_mandatory_flags() {
        negotiate(5, DistributionFlags::mandatory()).unwrap();
    }
}
