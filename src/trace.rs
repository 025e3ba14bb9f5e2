//! Trace verbosity levels for the optional wire-level diagnostics spec §6
//! describes (handshake frames, EPMD requests, control dispatch, and
//! decoded payload terms, logged through the `log` facade the rest of the
//! crate uses).
//!
//! Spec §9 DESIGN NOTES calls out the original's global trace-level state
//! as a pattern to replace with "an injected configuration; the node keeps
//! its own level" -- so this is a plain `Copy` value threaded through
//! `node::NodeInner` (see its `trace` field), never a process-wide global.
//!
//! Kept as a linearly ordered enum rather than a bitmask: each level is
//! strictly more verbose than the last, so `node_trace_level >=
//! TraceLevel::Handshake`-style comparisons read naturally at call sites.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum TraceLevel {
    /// No extra tracing beyond ordinary `log` records.
    #[default]
    Silent = 0,
    /// Logs handshake frame exchange (name/status/challenge/ack) and
    /// connection establishment/teardown.
    Handshake = 1,
    /// Also logs each control message dispatched on a live connection.
    Connection = 2,
    /// Also logs decoded term payloads (verbose; may contain message data).
    Payload = 3,
    /// Also logs EPMD request/response traffic.
    Epmd = 4,
}

impl TraceLevel {
    /// Parses the level names `node::Node` accepts from a configuration
    /// string (e.g. an env var), case-insensitively. Unknown input maps to
    /// `Silent` rather than erroring -- tracing is a diagnostic aid, not a
    /// correctness-affecting setting.
    pub fn parse(s: &str) -> TraceLevel {
        match s.to_ascii_lowercase().as_str() {
            "handshake" => TraceLevel::Handshake,
            "connection" => TraceLevel::Connection,
            "payload" => TraceLevel::Payload,
            "epmd" => TraceLevel::Epmd,
            _ => TraceLevel::Silent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(TraceLevel::Epmd > TraceLevel::Payload);
        assert!(TraceLevel::Payload > TraceLevel::Connection);
        assert!(TraceLevel::Connection > TraceLevel::Handshake);
        assert!(TraceLevel::Handshake > TraceLevel::Silent);
    }

    #[test]
    fn parse_is_case_insensitive_and_defaults_to_silent() {
        assert_eq!(TraceLevel::parse("EPMD"), TraceLevel::Epmd);
        assert_eq!(TraceLevel::parse("bogus"), TraceLevel::Silent);
    }
}
