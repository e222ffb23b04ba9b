use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default payload length of every message in a run, in bytes.
pub const DEFAULT_LENGTH: usize = 1024;

/// Default number of messages the sender emits when neither `-n` nor `-T`
/// is given.
pub const DEFAULT_NUMBER_OF_MESSAGES: u64 = 1024;

/// Default port for both roles.
pub const DEFAULT_PORT: u16 = 5001;

/// Size of the receive buffer handed to each connection worker.
///
/// Messages larger than this are delivered in several partial reads.
pub const RECEIVE_BUFFER_SIZE: usize = 1 << 16;

/// Seconds the sender lingers on close so queued data can drain.
pub const LINGER_SECS: u64 = 1;

/// Maximum number of local addresses that can be bound.
pub const MAX_LOCAL_ADDRS: usize = 10;

/// Application tag carried by every message in normal runs.
///
/// In very-verbose runs the tag starts at zero and counts messages instead.
pub const DEFAULT_PPID: u32 = 39;

/// Delivery ordering requested for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ordering {
    /// Delivered in stream sequence order
    Ordered,
    /// Delivered as soon as it arrives, without a stream sequence number
    Unordered,
}

impl Ordering {
    pub fn from_unordered(unordered: bool) -> Self {
        if unordered {
            Ordering::Unordered
        } else {
            Ordering::Ordered
        }
    }

    pub fn is_unordered(self) -> bool {
        self == Ordering::Unordered
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Ordering::Ordered => "ordered",
            Ordering::Unordered => "unordered",
        }
    }
}

/// Partial-reliability policy applied to a message.
///
/// Exactly one policy is active per run and every message of the run
/// carries it. The numeric codes match the `-P` command line option.
///
/// # Examples
///
/// ```
/// use sctperf::protocol::Reliability;
///
/// let policy = Reliability::from_policy(1, 250).unwrap();
/// assert_eq!(policy, Reliability::TimeToLive(250));
/// assert_eq!(policy.code(), 1);
/// assert_eq!(policy.value(), 250);
///
/// assert!(Reliability::from_policy(7, 0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reliability {
    /// Fully reliable delivery
    Reliable,
    /// Abandon the message once it is older than this many milliseconds
    TimeToLive(u32),
    /// Abandon the message after this many retransmissions
    Retransmissions(u32),
    /// Abandon lower-priority messages when the send buffer is full
    BufferBound(u32),
}

impl Reliability {
    pub const CODE_NONE: u8 = 0;
    pub const CODE_TTL: u8 = 1;
    pub const CODE_RTX: u8 = 2;
    pub const CODE_BUF: u8 = 3;

    /// Resolves a policy code and its parameter.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for codes outside `0..=3`.
    pub fn from_policy(code: u32, value: u32) -> Result<Self> {
        match code {
            0 => Ok(Reliability::Reliable),
            1 => Ok(Reliability::TimeToLive(value)),
            2 => Ok(Reliability::Retransmissions(value)),
            3 => Ok(Reliability::BufferBound(value)),
            other => Err(Error::Config(format!("Unknown PR-SCTP policy {}", other))),
        }
    }

    /// Wire code of the policy.
    pub fn code(self) -> u8 {
        match self {
            Reliability::Reliable => Self::CODE_NONE,
            Reliability::TimeToLive(_) => Self::CODE_TTL,
            Reliability::Retransmissions(_) => Self::CODE_RTX,
            Reliability::BufferBound(_) => Self::CODE_BUF,
        }
    }

    /// Policy parameter; zero for reliable delivery.
    pub fn value(self) -> u32 {
        match self {
            Reliability::Reliable => 0,
            Reliability::TimeToLive(v)
            | Reliability::Retransmissions(v)
            | Reliability::BufferBound(v) => v,
        }
    }

    /// Rebuilds a policy from its wire code, as the receive side sees it.
    ///
    /// Unknown codes decode as reliable: the peer never sets one.
    pub fn from_wire(code: u8, value: u32) -> Self {
        Self::from_policy(code as u32, value).unwrap_or(Reliability::Reliable)
    }
}

/// Metadata attached to every message handed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendInfo {
    /// Application tag (payload protocol identifier)
    pub ppid: u32,
    /// Stream index, `0 <= stream < stream count`
    pub stream: u16,
    pub ordering: Ordering,
    pub reliability: Reliability,
    /// Last message of the run; the sending direction shuts down after it
    pub eof: bool,
}

/// Metadata of one received data fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecvInfo {
    pub ppid: u32,
    pub stream: u16,
    /// Per-stream sequence number; zero for unordered messages
    pub ssn: u16,
    /// Transmission sequence number of the fragment
    pub tsn: u32,
    pub ordering: Ordering,
    pub reliability: Reliability,
    /// Set on the fragment that completes its message
    pub end_of_record: bool,
}

/// One event returned by a receive call on an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecvEvent {
    /// A transport notification, not application data
    Notification { len: usize },
    /// A fragment of an application message
    Data { len: usize, info: RecvInfo },
}

impl RecvEvent {
    pub fn len(&self) -> usize {
        match self {
            RecvEvent::Notification { len } | RecvEvent::Data { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_notification(&self) -> bool {
        matches!(self, RecvEvent::Notification { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_codes() {
        assert_eq!(Reliability::from_policy(0, 99).unwrap(), Reliability::Reliable);
        assert_eq!(
            Reliability::from_policy(2, 3).unwrap(),
            Reliability::Retransmissions(3)
        );
        assert_eq!(
            Reliability::from_policy(3, 8).unwrap(),
            Reliability::BufferBound(8)
        );
        for code in 0..4u32 {
            let policy = Reliability::from_policy(code, 5).unwrap();
            assert_eq!(policy.code() as u32, code);
        }
    }

    #[test]
    fn test_unknown_policy_is_config_error() {
        let err = Reliability::from_policy(4, 0).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("Unknown PR-SCTP policy 4"));
    }

    #[test]
    fn test_reliable_has_no_value() {
        assert_eq!(Reliability::from_policy(0, 100).unwrap().value(), 0);
    }

    #[test]
    fn test_from_wire_falls_back_to_reliable() {
        assert_eq!(Reliability::from_wire(9, 1), Reliability::Reliable);
        assert_eq!(Reliability::from_wire(1, 7), Reliability::TimeToLive(7));
    }

    #[test]
    fn test_ordering() {
        assert_eq!(Ordering::from_unordered(true), Ordering::Unordered);
        assert!(!Ordering::from_unordered(false).is_unordered());
        assert_eq!(Ordering::Unordered.as_str(), "unordered");
    }

    #[test]
    fn test_recv_event_len() {
        let event = RecvEvent::Notification { len: 12 };
        assert_eq!(event.len(), 12);
        assert!(event.is_notification());
    }
}
