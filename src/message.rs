//! The control-message catalogue (spec §3 supplemental): every control-tuple
//! operation the teacher's `message.rs` implements against `eetf::Term`,
//! reworked against this crate's own `term::Term`. A connection frame is
//! either a bare `Tick` (zero-length frame) or a control tuple optionally
//! followed by a payload term, mirroring `channel.rs`'s framing and
//! `message.rs`'s `DistributionMessage` catalogue.

use crate::term::{Atom, AtomError, DecodeError as TermDecodeError, EncodeError as TermEncodeError, Integer, Pid, Reference, Term};

const OP_LINK: i64 = 1;
pub(crate) const OP_SEND: i64 = 2;
const OP_EXIT: i64 = 3;
const OP_UNLINK: i64 = 4;
const OP_NODE_LINK: i64 = 5;
pub(crate) const OP_REG_SEND: i64 = 6;
const OP_GROUP_LEADER: i64 = 7;
const OP_EXIT2: i64 = 8;
const OP_SEND_TT: i64 = 12;
const OP_EXIT_TT: i64 = 13;
const OP_REG_SEND_TT: i64 = 16;
const OP_EXIT2_TT: i64 = 18;
const OP_MONITOR_P: i64 = 19;
const OP_DEMONITOR_P: i64 = 20;
const OP_MONITOR_P_EXIT: i64 = 21;
const OP_SEND_SENDER: i64 = 22;
const OP_SEND_SENDER_TT: i64 = 23;
const OP_PAYLOAD_EXIT: i64 = 24;
const OP_PAYLOAD_EXIT_TT: i64 = 25;
const OP_PAYLOAD_EXIT2: i64 = 26;
const OP_PAYLOAD_EXIT2_TT: i64 = 27;
const OP_PAYLOAD_MONITOR_P_EXIT: i64 = 28;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PidOrAtom {
    Pid(Pid),
    Name(Atom),
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MessageError {
    #[error("control tuple has {actual} elements, expected at least {expected}")]
    WrongArity { expected: usize, actual: usize },
    #[error("control tuple's first element is not an integer op code")]
    MissingOp,
    #[error("expected a pid in the control tuple, found something else")]
    ExpectedPid,
    #[error("expected an atom in the control tuple, found something else")]
    ExpectedAtom,
    #[error("expected a reference in the control tuple, found something else")]
    ExpectedReference,
    #[error("this op requires a payload term that was not supplied")]
    MissingPayload,
    #[error(transparent)]
    InvalidAtom(#[from] AtomError),
    #[error(transparent)]
    Encode(#[from] TermEncodeError),
    #[error(transparent)]
    Decode(#[from] TermDecodeError),
}

/// A decoded control message. `Unknown` preserves any op this crate doesn't
/// attach semantics to (spec §3: monitors/spawn are decoded for robustness
/// only) so the connection loop never has to hard-fail on a tag a real peer
/// legitimately sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Tick,
    Link { from: Pid, to: Pid },
    Unlink { from: Pid, to: Pid },
    NodeLink,
    GroupLeader { from: Pid, to: Pid },
    Send { to: Pid, message: Term },
    SendTt { to: Pid, trace_token: Term, message: Term },
    SendSender { from: Pid, to: Pid, message: Term },
    SendSenderTt { from: Pid, to: Pid, trace_token: Term, message: Term },
    RegSend { from: Pid, to_name: Atom, message: Term },
    RegSendTt { from: Pid, to_name: Atom, trace_token: Term, message: Term },
    Exit { from: Pid, to: Pid, reason: Term },
    ExitTt { from: Pid, to: Pid, trace_token: Term, reason: Term },
    Exit2 { from: Pid, to: Pid, reason: Term },
    Exit2Tt { from: Pid, to: Pid, trace_token: Term, reason: Term },
    PayloadExit { from: Pid, to: Pid, reason: Term },
    PayloadExitTt { from: Pid, to: Pid, trace_token: Term, reason: Term },
    PayloadExit2 { from: Pid, to: Pid, reason: Term },
    PayloadExit2Tt { from: Pid, to: Pid, trace_token: Term, reason: Term },
    MonitorP { from: Pid, to: PidOrAtom, reference: Reference },
    DemonitorP { from: Pid, to: PidOrAtom, reference: Reference },
    MonitorPExit { from: PidOrAtom, to: Pid, reference: Reference, reason: Term },
    PayloadMonitorPExit { from: PidOrAtom, to: Pid, reference: Reference, reason: Term },
    Unknown { op: i64, control: Term, payload: Option<Term> },
}

fn unused() -> Term {
    Term::atom("").expect("empty atom is valid")
}

fn pid_of(t: &Term) -> Result<Pid, MessageError> {
    t.as_pid().cloned().ok_or(MessageError::ExpectedPid)
}

fn atom_of(t: &Term) -> Result<Atom, MessageError> {
    t.as_atom().cloned().ok_or(MessageError::ExpectedAtom)
}

fn reference_of(t: &Term) -> Result<Reference, MessageError> {
    match t {
        Term::Reference(r) => Ok(r.clone()),
        _ => Err(MessageError::ExpectedReference),
    }
}

fn pid_or_atom_of(t: &Term) -> Result<PidOrAtom, MessageError> {
    match t {
        Term::Pid(p) => Ok(PidOrAtom::Pid(p.clone())),
        Term::Atom(a) => Ok(PidOrAtom::Name(a.clone())),
        _ => Err(MessageError::ExpectedPid),
    }
}

fn pid_or_atom_term(v: &PidOrAtom) -> Term {
    match v {
        PidOrAtom::Pid(p) => Term::Pid(p.clone()),
        PidOrAtom::Name(a) => Term::Atom(a.clone()),
    }
}

fn op_term(op: i64) -> Term {
    Term::Integer(Integer::from_i64(op))
}

fn elems(control: &Term) -> Result<&[Term], MessageError> {
    control.as_tuple().ok_or(MessageError::MissingOp)
}

fn require(elements: &[Term], n: usize) -> Result<(), MessageError> {
    if elements.len() < n {
        Err(MessageError::WrongArity {
            expected: n,
            actual: elements.len(),
        })
    } else {
        Ok(())
    }
}

impl Message {
    /// Encodes this message into a control-tuple term and, for the ops
    /// that carry one, a separate payload term. `Tick` has no wire
    /// representation here; the connection loop frames it as a bare
    /// zero-length message directly.
    pub fn to_control_and_payload(&self) -> (Term, Option<Term>) {
        match self {
            Message::Tick => (Term::nil(), None),
            Message::Link { from, to } => (
                Term::Tuple(vec![op_term(OP_LINK), Term::Pid(from.clone()), Term::Pid(to.clone())]),
                None,
            ),
            Message::Unlink { from, to } => (
                Term::Tuple(vec![op_term(OP_UNLINK), Term::Pid(from.clone()), Term::Pid(to.clone())]),
                None,
            ),
            Message::NodeLink => (Term::Tuple(vec![op_term(OP_NODE_LINK)]), None),
            Message::GroupLeader { from, to } => (
                Term::Tuple(vec![op_term(OP_GROUP_LEADER), Term::Pid(from.clone()), Term::Pid(to.clone())]),
                None,
            ),
            Message::Send { to, message } => (
                Term::Tuple(vec![op_term(OP_SEND), unused(), Term::Pid(to.clone())]),
                Some(message.clone()),
            ),
            Message::SendTt {
                to,
                trace_token,
                message,
            } => (
                Term::Tuple(vec![op_term(OP_SEND_TT), unused(), Term::Pid(to.clone()), trace_token.clone()]),
                Some(message.clone()),
            ),
            Message::SendSender { from, to, message } => (
                Term::Tuple(vec![op_term(OP_SEND_SENDER), Term::Pid(from.clone()), Term::Pid(to.clone())]),
                Some(message.clone()),
            ),
            Message::SendSenderTt {
                from,
                to,
                trace_token,
                message,
            } => (
                Term::Tuple(vec![
                    op_term(OP_SEND_SENDER_TT),
                    Term::Pid(from.clone()),
                    Term::Pid(to.clone()),
                    trace_token.clone(),
                ]),
                Some(message.clone()),
            ),
            Message::RegSend { from, to_name, message } => (
                Term::Tuple(vec![op_term(OP_REG_SEND), Term::Pid(from.clone()), unused(), Term::Atom(to_name.clone())]),
                Some(message.clone()),
            ),
            Message::RegSendTt {
                from,
                to_name,
                trace_token,
                message,
            } => (
                Term::Tuple(vec![
                    op_term(OP_REG_SEND_TT),
                    Term::Pid(from.clone()),
                    unused(),
                    Term::Atom(to_name.clone()),
                    trace_token.clone(),
                ]),
                Some(message.clone()),
            ),
            Message::Exit { from, to, reason } => (
                Term::Tuple(vec![op_term(OP_EXIT), Term::Pid(from.clone()), Term::Pid(to.clone()), reason.clone()]),
                None,
            ),
            Message::ExitTt {
                from,
                to,
                trace_token,
                reason,
            } => (
                Term::Tuple(vec![
                    op_term(OP_EXIT_TT),
                    Term::Pid(from.clone()),
                    Term::Pid(to.clone()),
                    trace_token.clone(),
                    reason.clone(),
                ]),
                None,
            ),
            Message::Exit2 { from, to, reason } => (
                Term::Tuple(vec![op_term(OP_EXIT2), Term::Pid(from.clone()), Term::Pid(to.clone()), reason.clone()]),
                None,
            ),
            Message::Exit2Tt {
                from,
                to,
                trace_token,
                reason,
            } => (
                Term::Tuple(vec![
                    op_term(OP_EXIT2_TT),
                    Term::Pid(from.clone()),
                    Term::Pid(to.clone()),
                    trace_token.clone(),
                    reason.clone(),
                ]),
                None,
            ),
            Message::PayloadExit { from, to, reason } => (
                Term::Tuple(vec![op_term(OP_PAYLOAD_EXIT), Term::Pid(from.clone()), Term::Pid(to.clone())]),
                Some(reason.clone()),
            ),
            Message::PayloadExitTt {
                from,
                to,
                trace_token,
                reason,
            } => (
                Term::Tuple(vec![
                    op_term(OP_PAYLOAD_EXIT_TT),
                    Term::Pid(from.clone()),
                    Term::Pid(to.clone()),
                    trace_token.clone(),
                ]),
                Some(reason.clone()),
            ),
            Message::PayloadExit2 { from, to, reason } => (
                Term::Tuple(vec![op_term(OP_PAYLOAD_EXIT2), Term::Pid(from.clone()), Term::Pid(to.clone())]),
                Some(reason.clone()),
            ),
            Message::PayloadExit2Tt {
                from,
                to,
                trace_token,
                reason,
            } => (
                Term::Tuple(vec![
                    op_term(OP_PAYLOAD_EXIT2_TT),
                    Term::Pid(from.clone()),
                    Term::Pid(to.clone()),
                    trace_token.clone(),
                ]),
                Some(reason.clone()),
            ),
            Message::MonitorP { from, to, reference } => (
                Term::Tuple(vec![
                    op_term(OP_MONITOR_P),
                    Term::Pid(from.clone()),
                    pid_or_atom_term(to),
                    Term::Reference(reference.clone()),
                ]),
                None,
            ),
            Message::DemonitorP { from, to, reference } => (
                Term::Tuple(vec![
                    op_term(OP_DEMONITOR_P),
                    Term::Pid(from.clone()),
                    pid_or_atom_term(to),
                    Term::Reference(reference.clone()),
                ]),
                None,
            ),
            Message::MonitorPExit {
                from,
                to,
                reference,
                reason,
            } => (
                Term::Tuple(vec![
                    op_term(OP_MONITOR_P_EXIT),
                    pid_or_atom_term(from),
                    Term::Pid(to.clone()),
                    Term::Reference(reference.clone()),
                    reason.clone(),
                ]),
                None,
            ),
            Message::PayloadMonitorPExit {
                from,
                to,
                reference,
                reason,
            } => (
                Term::Tuple(vec![
                    op_term(OP_PAYLOAD_MONITOR_P_EXIT),
                    pid_or_atom_term(from),
                    Term::Pid(to.clone()),
                    Term::Reference(reference.clone()),
                ]),
                Some(reason.clone()),
            ),
            Message::Unknown { control, payload, .. } => (control.clone(), payload.clone()),
        }
    }

    /// Decodes a control tuple plus an optional trailing payload term back
    /// into a [`Message`]. A frame with no control tuple at all (zero bytes)
    /// is represented by the caller as `Tick` directly.
    pub fn from_control_and_payload(control: Term, payload: Option<Term>) -> Result<Self, MessageError> {
        let elements = elems(&control)?;
        require(elements, 1)?;
        let op = match &elements[0] {
            Term::Integer(Integer::Small(v)) => *v,
            _ => return Err(MessageError::MissingOp),
        };
        match op {
            OP_LINK => {
                require(elements, 3)?;
                Ok(Message::Link {
                    from: pid_of(&elements[1])?,
                    to: pid_of(&elements[2])?,
                })
            }
            OP_UNLINK => {
                require(elements, 3)?;
                Ok(Message::Unlink {
                    from: pid_of(&elements[1])?,
                    to: pid_of(&elements[2])?,
                })
            }
            OP_NODE_LINK => Ok(Message::NodeLink),
            OP_GROUP_LEADER => {
                require(elements, 3)?;
                Ok(Message::GroupLeader {
                    from: pid_of(&elements[1])?,
                    to: pid_of(&elements[2])?,
                })
            }
            OP_SEND => {
                require(elements, 3)?;
                Ok(Message::Send {
                    to: pid_of(&elements[2])?,
                    message: payload.ok_or(MessageError::MissingPayload)?,
                })
            }
            OP_SEND_TT => {
                require(elements, 4)?;
                Ok(Message::SendTt {
                    to: pid_of(&elements[2])?,
                    trace_token: elements[3].clone(),
                    message: payload.ok_or(MessageError::MissingPayload)?,
                })
            }
            OP_SEND_SENDER => {
                require(elements, 3)?;
                Ok(Message::SendSender {
                    from: pid_of(&elements[1])?,
                    to: pid_of(&elements[2])?,
                    message: payload.ok_or(MessageError::MissingPayload)?,
                })
            }
            OP_SEND_SENDER_TT => {
                require(elements, 4)?;
                Ok(Message::SendSenderTt {
                    from: pid_of(&elements[1])?,
                    to: pid_of(&elements[2])?,
                    trace_token: elements[3].clone(),
                    message: payload.ok_or(MessageError::MissingPayload)?,
                })
            }
            OP_REG_SEND => {
                require(elements, 4)?;
                Ok(Message::RegSend {
                    from: pid_of(&elements[1])?,
                    to_name: atom_of(&elements[3])?,
                    message: payload.ok_or(MessageError::MissingPayload)?,
                })
            }
            OP_REG_SEND_TT => {
                require(elements, 5)?;
                Ok(Message::RegSendTt {
                    from: pid_of(&elements[1])?,
                    to_name: atom_of(&elements[3])?,
                    trace_token: elements[4].clone(),
                    message: payload.ok_or(MessageError::MissingPayload)?,
                })
            }
            OP_EXIT => {
                require(elements, 4)?;
                Ok(Message::Exit {
                    from: pid_of(&elements[1])?,
                    to: pid_of(&elements[2])?,
                    reason: elements[3].clone(),
                })
            }
            OP_EXIT_TT => {
                require(elements, 5)?;
                Ok(Message::ExitTt {
                    from: pid_of(&elements[1])?,
                    to: pid_of(&elements[2])?,
                    trace_token: elements[3].clone(),
                    reason: elements[4].clone(),
                })
            }
            OP_EXIT2 => {
                require(elements, 4)?;
                Ok(Message::Exit2 {
                    from: pid_of(&elements[1])?,
                    to: pid_of(&elements[2])?,
                    reason: elements[3].clone(),
                })
            }
            OP_EXIT2_TT => {
                require(elements, 5)?;
                Ok(Message::Exit2Tt {
                    from: pid_of(&elements[1])?,
                    to: pid_of(&elements[2])?,
                    trace_token: elements[3].clone(),
                    reason: elements[4].clone(),
                })
            }
            OP_PAYLOAD_EXIT => {
                require(elements, 3)?;
                Ok(Message::PayloadExit {
                    from: pid_of(&elements[1])?,
                    to: pid_of(&elements[2])?,
                    reason: payload.ok_or(MessageError::MissingPayload)?,
                })
            }
            OP_PAYLOAD_EXIT_TT => {
                require(elements, 4)?;
                Ok(Message::PayloadExitTt {
                    from: pid_of(&elements[1])?,
                    to: pid_of(&elements[2])?,
                    trace_token: elements[3].clone(),
                    reason: payload.ok_or(MessageError::MissingPayload)?,
                })
            }
            OP_PAYLOAD_EXIT2 => {
                require(elements, 3)?;
                Ok(Message::PayloadExit2 {
                    from: pid_of(&elements[1])?,
                    to: pid_of(&elements[2])?,
                    reason: payload.ok_or(MessageError::MissingPayload)?,
                })
            }
            OP_PAYLOAD_EXIT2_TT => {
                require(elements, 4)?;
                Ok(Message::PayloadExit2Tt {
                    from: pid_of(&elements[1])?,
                    to: pid_of(&elements[2])?,
                    trace_token: elements[3].clone(),
                    reason: payload.ok_or(MessageError::MissingPayload)?,
                })
            }
            OP_MONITOR_P => {
                require(elements, 4)?;
                Ok(Message::MonitorP {
                    from: pid_of(&elements[1])?,
                    to: pid_or_atom_of(&elements[2])?,
                    reference: reference_of(&elements[3])?,
                })
            }
            OP_DEMONITOR_P => {
                require(elements, 4)?;
                Ok(Message::DemonitorP {
                    from: pid_of(&elements[1])?,
                    to: pid_or_atom_of(&elements[2])?,
                    reference: reference_of(&elements[3])?,
                })
            }
            OP_MONITOR_P_EXIT => {
                require(elements, 4)?;
                Ok(Message::MonitorPExit {
                    from: pid_or_atom_of(&elements[1])?,
                    to: pid_of(&elements[2])?,
                    reference: reference_of(&elements[3])?,
                    reason: elements.get(4).cloned().unwrap_or_else(Term::nil),
                })
            }
            OP_PAYLOAD_MONITOR_P_EXIT => {
                require(elements, 4)?;
                Ok(Message::PayloadMonitorPExit {
                    from: pid_or_atom_of(&elements[1])?,
                    to: pid_of(&elements[2])?,
                    reference: reference_of(&elements[3])?,
                    reason: payload.ok_or(MessageError::MissingPayload)?,
                })
            }
            other => Ok(Message::Unknown {
                op: other,
                control,
                payload,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::Atom as TermAtom;

    fn pid(n: u32) -> Pid {
        Pid::new(TermAtom::new("a@b").unwrap(), n, 0, 1)
    }

    #[test]
    fn send_roundtrips_through_control_and_payload() {
        let msg = Message::Send {
            to: pid(1),
            message: Term::atom("hello").unwrap(),
        };
        let (control, payload) = msg.to_control_and_payload();
        let decoded = Message::from_control_and_payload(control, payload).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn reg_send_roundtrips() {
        let msg = Message::RegSend {
            from: pid(1),
            to_name: TermAtom::new("server").unwrap(),
            message: Term::Integer(Integer::from_i64(7)),
        };
        let (control, payload) = msg.to_control_and_payload();
        let decoded = Message::from_control_and_payload(control, payload).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn unknown_op_is_preserved_not_rejected() {
        let control = Term::Tuple(vec![op_term(29), Term::Integer(Integer::from_i64(0))]);
        let decoded = Message::from_control_and_payload(control.clone(), None).unwrap();
        assert_eq!(
            decoded,
            Message::Unknown {
                op: 29,
                control,
                payload: None
            }
        );
    }

    #[test]
    fn exit_carries_reason_inline_not_as_payload() {
        let msg = Message::Exit {
            from: pid(1),
            to: pid(2),
            reason: Term::atom("normal").unwrap(),
        };
        let (control, payload) = msg.to_control_and_payload();
        assert!(payload.is_none());
        let decoded = Message::from_control_and_payload(control, payload).unwrap();
        assert_eq!(decoded, msg);
    }
}
