//! Session states.

use std::fmt;

/// State of a session.
///
/// A session moves forward through the states in declaration order until it
/// is [`Done`](Self::Done). It can be [`Cancelled`](Self::Cancelled) or fail
/// from any state before [`Finalizing`](Self::Finalizing), and can fail while
/// finalizing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// Not started.
    #[default]
    Idle,
    /// Establishing the session with the relay.
    Connecting,
    /// Performing the TLS handshake.
    Handshaking,
    /// Writing the request.
    SendingRequest,
    /// Waiting for the server to respond.
    AwaitingResponse,
    /// Producing reveal material and obtaining the attestation.
    Finalizing,
    /// The attestation was obtained.
    Done,
    /// The session was cancelled.
    Cancelled,
    /// The session failed.
    Failed,
}

impl SessionState {
    /// Returns `true` if the session can no longer make progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }

    /// Returns `true` if the session can still be cancelled.
    pub fn is_cancellable(&self) -> bool {
        !self.is_terminal() && *self != Self::Finalizing
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::SendingRequest => "sending-request",
            Self::AwaitingResponse => "awaiting-response",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };

        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(SessionState::Idle, false, true)]
    #[case(SessionState::Handshaking, false, true)]
    #[case(SessionState::AwaitingResponse, false, true)]
    #[case(SessionState::Finalizing, false, false)]
    #[case(SessionState::Done, true, false)]
    #[case(SessionState::Cancelled, true, false)]
    #[case(SessionState::Failed, true, false)]
    fn test_state(#[case] state: SessionState, #[case] terminal: bool, #[case] cancellable: bool) {
        assert_eq!(state.is_terminal(), terminal);
        assert_eq!(state.is_cancellable(), cancellable);
    }
}
