//! A runtime that lets a foreign (non-Erlang) process join an Erlang
//! distribution cluster as a first-class node: EPMD discovery/registration,
//! the mutually-authenticated distribution handshake, the external term
//! format codec, the framed control-message protocol running over a live
//! connection, and an in-process mailbox/actor layer for sending and
//! receiving messages once connected.
//!
//! Originally a low-level EPMD/handshake/codec toolkit
//! (`erl_dist`, <https://github.com/sile/erl_dist>) meant to be driven by a
//! hand-written binary per example; [`node`] adds the missing runtime layer
//! on top so a single [`node::Node`] owns the listening socket, the
//! outgoing-connection cache, and the mailbox registry a real node needs.
//!
//! # Examples
//!
//! - Low-level client/server examples translated from the original crate's
//!   `send_msg.rs`/`recv_msg.rs` live under `demos/` in this repository.

#![warn(missing_docs)]
#![allow(clippy::result_large_err)]

pub mod connection;
pub mod cookie;
pub mod epmd;
pub mod flags;
pub mod handshake;
pub mod link_table;
pub mod mailbox;
pub mod message;
pub mod naming;
pub mod node;
pub mod scheduler;
mod socket;
pub mod term;
pub mod trace;
mod transport;

pub use flags::DistributionFlags;
pub use mailbox::{Mailbox, MailboxError, MailboxKind, Received};
pub use message::Message;
pub use naming::{Creation, DistributionProtocolVersion, NodeName, NodeNameError, NodeType, TransportProtocol};
pub use node::{Node, NodeError, StatusHandler};
pub use scheduler::{Actor, ActorControl, ActorScheduler};
pub use term::Term;
pub use transport::TcpTransport;
