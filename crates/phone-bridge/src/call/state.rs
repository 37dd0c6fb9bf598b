//! Call roles, states and SIP status classification

use serde::{Deserialize, Serialize};

use crate::stack::InviteState;

/// Which side originated the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallRole {
    Caller,
    Receiver,
}

/// Application-level call state
///
/// Variants are declared in ordinal order; a call only ever moves to a
/// higher ordinal. `Disconnected` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CallState {
    Inited,
    Calling,
    Ringing,
    Connecting,
    Confirmed,
    Disconnected,
    Aborted,
}

impl CallState {
    /// Whether no further state or status change can be applied
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Aborted)
    }

    /// Map an invite state reported by the stack, given the last status code
    pub fn from_invite(state: InviteState, last_status: u16) -> Self {
        match state {
            InviteState::Null => Self::Inited,
            InviteState::Calling | InviteState::Incoming => Self::Calling,
            InviteState::Early => Self::Ringing,
            InviteState::Connecting => Self::Connecting,
            InviteState::Confirmed => Self::Confirmed,
            InviteState::Disconnected => {
                if status::is_error(last_status) {
                    Self::Aborted
                } else {
                    Self::Disconnected
                }
            }
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Inited => "Inited",
            Self::Calling => "Calling",
            Self::Ringing => "Ringing",
            Self::Connecting => "Connecting",
            Self::Confirmed => "Confirmed",
            Self::Disconnected => "Disconnected",
            Self::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}

/// SIP status codes used by the bridge
pub mod status {
    pub const UNDEFINED: u16 = 0;
    pub const TRYING: u16 = 100;
    pub const RINGING: u16 = 180;
    pub const CALL_BEING_FORWARDED: u16 = 181;
    pub const QUEUED: u16 = 182;
    pub const PROGRESS: u16 = 183;
    pub const OK: u16 = 200;
    pub const ACCEPTED: u16 = 202;
    pub const REQUEST_TERMINATED: u16 = 487;
    pub const BUSY_HERE: u16 = 486;
    pub const NOT_ACCEPTABLE_HERE: u16 = 488;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const BUSY_EVERYWHERE: u16 = 600;
    pub const DECLINE: u16 = 603;

    /// Whether a final status means the call failed
    ///
    /// Busy and decline are ordinary outcomes of a call, not failures.
    pub fn is_error(code: u16) -> bool {
        !matches!(
            code,
            TRYING
                | RINGING
                | CALL_BEING_FORWARDED
                | QUEUED
                | PROGRESS
                | OK
                | ACCEPTED
                | BUSY_HERE
                | BUSY_EVERYWHERE
                | DECLINE
        )
    }

    /// Standard reason phrase of a status code
    pub fn reason_phrase(code: u16) -> &'static str {
        match code {
            TRYING => "Trying",
            RINGING => "Ringing",
            CALL_BEING_FORWARDED => "Call Is Being Forwarded",
            QUEUED => "Queued",
            PROGRESS => "Session Progress",
            OK => "OK",
            ACCEPTED => "Accepted",
            300 => "Multiple Choices",
            301 => "Moved Permanently",
            302 => "Moved Temporarily",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            407 => "Proxy Authentication Required",
            408 => "Request Timeout",
            410 => "Gone",
            415 => "Unsupported Media Type",
            480 => "Temporarily Unavailable",
            481 => "Call/Transaction Does Not Exist",
            484 => "Address Incomplete",
            BUSY_HERE => "Busy Here",
            REQUEST_TERMINATED => "Request Terminated",
            NOT_ACCEPTABLE_HERE => "Not Acceptable Here",
            INTERNAL_SERVER_ERROR => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Server Time-out",
            BUSY_EVERYWHERE => "Busy Everywhere",
            DECLINE => "Decline",
            604 => "Does Not Exist Anywhere",
            606 => "Not Acceptable",
            _ => "Unknown Status",
        }
    }
}
