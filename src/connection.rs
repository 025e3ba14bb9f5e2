//! The running-connection framing layer (spec §5): once a handshake
//! completes, both peers exchange length-prefixed frames carrying either a
//! bare tick or a `PASS_THROUGH` (0x70) control message, optionally followed
//! by a payload term. Adapted from the teacher's `channel.rs`/`io.rs` split,
//! dropping the eetf dependency in favor of this crate's own `term` codec.

use crate::message::{Message, MessageError, OP_REG_SEND, OP_SEND};
use crate::term::{self, Atom, Integer, Term};
use byteorder::{BigEndian, ByteOrder as _};
use futures::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};

const PASS_THROUGH_TAG: u8 = 112;

/// Splits a connected transport into independent send/receive halves, each
/// carrying the cookie this side of the connection uses to stamp (`Sender`)
/// or pin-and-verify (`Receiver`) the first `SEND`/`REG_SEND` control tuple
/// (spec §4.5 "Cookie check").
///
/// `T` must be `Clone` (e.g. a `TcpStream`, whose clones share the
/// underlying socket) so the two halves can operate concurrently.
pub fn connection<T>(transport: T, cookie: Atom) -> (Sender<T>, Receiver<T>)
where
    T: AsyncRead + AsyncWrite + Unpin + Clone,
{
    (
        Sender::new(transport.clone(), cookie.clone()),
        Receiver::new(transport, cookie),
    )
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConnectionError {
    #[error("the peer closed the connection")]
    Closed,

    #[error("expected the pass-through tag {PASS_THROUGH_TAG} but got {tag}")]
    UnexpectedTag { tag: u8 },

    #[error("peer's cookie did not match ours on its first SEND/REG_SEND")]
    AuthError,

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Encode(#[from] term::EncodeError),

    #[error(transparent)]
    Decode(#[from] term::DecodeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Sends [`Message`]s over a connected transport.
#[derive(Debug)]
pub struct Sender<T> {
    transport: T,
    cookie: Atom,
}

impl<T> Sender<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    fn new(transport: T, cookie: Atom) -> Self {
        Self { transport, cookie }
    }

    /// Sends a single message frame. `Message::Tick` is framed as a bare
    /// zero-length message, matching how OTP keeps a connection alive
    /// between `net_ticktime` intervals.
    pub async fn send(&mut self, message: Message) -> Result<(), ConnectionError> {
        if matches!(message, Message::Tick) {
            return self.write_frame(&[]).await;
        }

        let (mut control, payload) = message.to_control_and_payload();
        stamp_cookie(&mut control, &self.cookie);
        let mut buf = vec![PASS_THROUGH_TAG];
        buf.extend(term::encode(&control)?);
        if let Some(payload) = payload {
            buf.extend(term::encode(&payload)?);
        }
        self.write_frame(&buf).await
    }

    async fn write_frame(&mut self, buf: &[u8]) -> Result<(), ConnectionError> {
        let mut len_buf = [0u8; 4];
        BigEndian::write_u32(&mut len_buf, buf.len() as u32);
        self.transport.write_all(&len_buf).await?;
        self.transport.write_all(buf).await?;
        self.transport.flush().await?;
        Ok(())
    }
}

/// The control tuple's cookie slot (index 1 for `SEND`, index 2 for
/// `REG_SEND`) historically carried the peer's cookie atom; modern OTP
/// leaves it an unused placeholder atom but older releases and this spec's
/// cookie-check still expect it populated.
fn cookie_slot(control: &Term) -> Option<usize> {
    match control.as_tuple()?.first()?.as_integer()? {
        Integer::Small(v) if *v == OP_SEND => Some(1),
        Integer::Small(v) if *v == OP_REG_SEND => Some(2),
        _ => None,
    }
}

fn stamp_cookie(control: &mut Term, cookie: &Atom) {
    if let Some(slot) = cookie_slot(control) {
        if let Term::Tuple(elems) = control {
            elems[slot] = Term::Atom(cookie.clone());
        }
    }
}

/// Receives [`Message`]s from a connected transport.
#[derive(Debug)]
pub struct Receiver<T> {
    transport: T,
    cookie: Atom,
    cookie_pinned: bool,
}

impl<T> Receiver<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    fn new(transport: T, cookie: Atom) -> Self {
        Self {
            transport,
            cookie,
            cookie_pinned: false,
        }
    }

    /// Receives the next message frame, blocking until one arrives.
    pub async fn recv(&mut self) -> Result<Message, ConnectionError> {
        let mut len_buf = [0u8; 4];
        if let Err(e) = self.transport.read_exact(&mut len_buf).await {
            return if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Err(ConnectionError::Closed)
            } else {
                Err(e.into())
            };
        }
        let size = BigEndian::read_u32(&len_buf) as usize;
        if size == 0 {
            return Ok(Message::Tick);
        }

        let mut buf = vec![0u8; size];
        self.transport.read_exact(&mut buf).await?;

        let tag = buf[0];
        if tag != PASS_THROUGH_TAG {
            return Err(ConnectionError::UnexpectedTag { tag });
        }

        let rest = &buf[1..];
        let (control, consumed) = term::decode_one(rest)?;
        let rest = &rest[consumed..];
        let payload = if rest.is_empty() {
            None
        } else {
            Some(term::decode_one(rest)?.0)
        };

        if !self.cookie_pinned {
            if let Some(slot) = cookie_slot(&control) {
                let peer_cookie = control
                    .as_tuple()
                    .and_then(|elems| elems.get(slot))
                    .and_then(Term::as_atom);
                if peer_cookie != Some(&self.cookie) {
                    return Err(ConnectionError::AuthError);
                }
                self.cookie_pinned = true;
            }
        }

        Ok(Message::from_control_and_payload(control, payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;

    #[derive(Clone)]
    struct SharedBuf(std::sync::Arc<parking_lot::Mutex<std::collections::VecDeque<u8>>>);

    impl SharedBuf {
        fn new() -> Self {
            Self(std::sync::Arc::new(parking_lot::Mutex::new(std::collections::VecDeque::new())))
        }
    }

    impl AsyncWrite for SharedBuf {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            self.0.lock().extend(buf.iter().copied());
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_close(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    impl AsyncRead for SharedBuf {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut [u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            let mut inner = self.0.lock();
            let n = buf.len().min(inner.len());
            for slot in buf.iter_mut().take(n) {
                *slot = inner.pop_front().unwrap();
            }
            std::task::Poll::Ready(Ok(n))
        }
    }

    fn cookie() -> Atom {
        Atom::new("cookie").unwrap()
    }

    #[test]
    fn tick_roundtrips_as_zero_length_frame() {
        let buf = SharedBuf::new();
        let (mut sender, mut receiver) = connection(buf, cookie());
        smol::block_on(async {
            sender.send(Message::Tick).await.unwrap();
            let received = receiver.recv().await.unwrap();
            assert_eq!(received, Message::Tick);
        });
    }

    #[test]
    fn send_with_payload_roundtrips() {
        use crate::term::Pid;

        let buf = SharedBuf::new();
        let (mut sender, mut receiver) = connection(buf, cookie());
        let msg = Message::Send {
            to: Pid::new(Atom::new("a@b").unwrap(), 1, 0, 1),
            message: crate::term::Term::atom("hi").unwrap(),
        };
        smol::block_on(async {
            sender.send(msg.clone()).await.unwrap();
            let received = receiver.recv().await.unwrap();
            assert_eq!(received, msg);
        });
    }

    #[test]
    fn mismatched_cookie_on_first_send_is_rejected() {
        use crate::term::Pid;

        let buf = SharedBuf::new();
        let (mut sender, _) = connection(buf.clone(), Atom::new("wrong").unwrap());
        let mut receiver = Receiver::new(buf, cookie());
        let msg = Message::Send {
            to: Pid::new(Atom::new("a@b").unwrap(), 1, 0, 1),
            message: crate::term::Term::atom("hi").unwrap(),
        };
        smol::block_on(async {
            sender.send(msg).await.unwrap();
            let err = receiver.recv().await.unwrap_err();
            assert!(matches!(err, ConnectionError::AuthError));
        });
    }

    #[test]
    fn closed_connection_reports_closed_error() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut receiver = Receiver::new(cursor, cookie());
        let err = smol::block_on(receiver.recv()).unwrap_err();
        assert!(matches!(err, ConnectionError::Closed));
    }
}
