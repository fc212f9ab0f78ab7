//! Session lifecycle states and start/stop controls.

use std::fmt;

use serde::Serialize;

use crate::error::{ClientError, Result};

/// Lifecycle of one viewer session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Negotiating,
    Connected,
    Stopping,
}

/// Requests that move a session between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Start,
    Negotiate,
    Complete,
    Abort,
    Stop,
    Release,
}

/// Visibility of the start/stop controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Controls {
    pub start_visible: bool,
    pub stop_visible: bool,
}

impl SessionState {
    /// Guarded transition; anything not listed is rejected.
    pub fn transition(self, command: SessionCommand) -> Result<SessionState> {
        use SessionCommand as C;
        use SessionState as S;

        let next = match (self, command) {
            (S::Idle, C::Start) => S::Starting,
            (S::Starting, C::Negotiate) => S::Negotiating,
            (S::Negotiating, C::Complete) => S::Connected,
            (S::Starting, C::Abort) => S::Idle,
            (S::Starting | S::Negotiating | S::Connected, C::Stop) => S::Stopping,
            (S::Stopping, C::Release) => S::Idle,
            (state, command) => return Err(ClientError::InvalidTransition { state, command }),
        };
        Ok(next)
    }

    pub fn controls(self) -> Controls {
        Controls {
            start_visible: self == SessionState::Idle,
            stop_visible: matches!(self, SessionState::Negotiating | SessionState::Connected),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Negotiating => "negotiating",
            SessionState::Connected => "connected",
            SessionState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}
