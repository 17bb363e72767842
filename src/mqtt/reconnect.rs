//! Reconnection policy state machine
//!
//! Single source of truth for the link state, the attempt counter and the
//! backoff delay. The transport worker feeds it handshake results and drops;
//! each call returns the [`Transition`] it caused so the caller can log it and
//! forward it to the presentation side.
//!
//! ```text
//!            start                 ConnAck 0
//!   Idle ───────────► Connecting ─────────────► Connected
//!    ▲                 │    ▲                       │
//!    │   shutdown      │    │ backoff elapsed       │ abnormal drop
//!    ├─────────────────┤    │                       ▼
//!    │                 │    └──────────────────  RetryWait
//!    │                 │ fail, attempts left        ▲
//!    │                 └────────────────────────────┘
//!    │                 │ fail, budget spent
//!    │                 ▼
//!    └──── start ── FailedPermanent
//! ```
//!
//! The attempt counter resets to zero on every successful handshake, so a
//! long-lived connection that drops later gets the full retry budget again.
//! Only a failed connection attempt can end in `FailedPermanent`; a drop of
//! an established session always schedules a retry.

use super::error::{FailureCause, PolicyError};
use std::fmt;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkState {
    #[default]
    Idle,
    Connecting,
    Connected,
    RetryWait,
    FailedPermanent,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            LinkState::Idle => "idle",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::RetryWait => "waiting to retry",
            LinkState::FailedPermanent => "failed permanently",
        };
        f.write_str(text)
    }
}

/// Why a connected session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Clean,
    Abnormal(FailureCause),
}

impl DisconnectReason {
    /// Numeric reason, zero only for a clean disconnect
    pub fn code(&self) -> u8 {
        match self {
            DisconnectReason::Clean => 0,
            DisconnectReason::Abnormal(_) => 7,
        }
    }
}

/// One edge of the state machine, with enough context to log it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: LinkState,
    pub to: LinkState,
    pub code: Option<u8>,
    pub cause: Option<FailureCause>,
    pub attempt: u32,
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Transition {
    pub fn is_failure(&self) -> bool {
        self.cause.is_some()
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MQTT {} -> {}", self.from, self.to)?;
        if let Some(code) = self.code {
            write!(f, " (code {})", code)?;
        }
        if let Some(cause) = self.cause {
            write!(f, ": {}", cause)?;
        }
        match self.to {
            LinkState::RetryWait if self.attempt == 0 => {
                write!(f, ", reconnecting in {:?}", self.backoff)
            }
            LinkState::RetryWait => write!(
                f,
                ", retry {}/{} in {:?}",
                self.attempt, self.max_attempts, self.backoff
            ),
            LinkState::FailedPermanent => write!(
                f,
                ", giving up after {} attempts",
                self.attempt
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    state: LinkState,
    attempt_count: u32,
    max_attempts: u32,
    backoff: Duration,
    shutdown_requested: bool,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            state: LinkState::Idle,
            attempt_count: 0,
            max_attempts: max_attempts.max(1),
            backoff,
            shutdown_requested: false,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    /// Explicit start request. Allowed from `Idle` and, as a user restart,
    /// from `FailedPermanent`; both begin with a fresh budget.
    pub fn start(&mut self) -> Result<Transition, PolicyError> {
        match self.state {
            LinkState::Idle | LinkState::FailedPermanent => {
                self.attempt_count = 0;
                self.shutdown_requested = false;
                Ok(self.move_to(LinkState::Connecting, None, None))
            }
            other => Err(PolicyError::NotStartable(other)),
        }
    }

    /// Handshake accepted (return code 0)
    pub fn on_connected(&mut self) -> Transition {
        self.attempt_count = 0;
        self.move_to(LinkState::Connected, Some(0), None)
    }

    /// Handshake refused or transport failure while connecting
    pub fn on_connect_failed(&mut self, cause: FailureCause, code: Option<u8>) -> Transition {
        if self.shutdown_requested {
            return self.move_to(LinkState::Idle, code, Some(cause));
        }
        self.attempt_count += 1;
        if self.attempt_count < self.max_attempts {
            self.move_to(LinkState::RetryWait, code, Some(cause))
        } else {
            self.move_to(LinkState::FailedPermanent, code, Some(cause))
        }
    }

    /// Session ended after a successful handshake. An abnormal drop always
    /// goes to `RetryWait`; the budget is only spent by the reconnect
    /// attempts that follow.
    pub fn on_disconnected(&mut self, reason: DisconnectReason) -> Transition {
        match reason {
            DisconnectReason::Abnormal(cause) if !self.shutdown_requested => {
                self.move_to(LinkState::RetryWait, Some(reason.code()), Some(cause))
            }
            _ => self.move_to(LinkState::Idle, Some(0), None),
        }
    }

    /// Backoff timer fired; returns `None` if the wait was overtaken by a shutdown
    pub fn on_backoff_elapsed(&mut self) -> Option<Transition> {
        if self.state != LinkState::RetryWait || self.shutdown_requested {
            return None;
        }
        Some(self.move_to(LinkState::Connecting, None, None))
    }

    /// Records a clean shutdown without leaving the current state. Used while
    /// connected, where the session end is reported by [`Self::on_disconnected`].
    pub fn mark_shutdown(&mut self) {
        self.shutdown_requested = true;
    }

    /// Clean shutdown; idempotent. Returns a transition only if the state changed.
    pub fn request_shutdown(&mut self) -> Option<Transition> {
        self.shutdown_requested = true;
        match self.state {
            LinkState::Idle => None,
            _ => Some(self.move_to(LinkState::Idle, None, None)),
        }
    }

    fn move_to(
        &mut self,
        to: LinkState,
        code: Option<u8>,
        cause: Option<FailureCause>,
    ) -> Transition {
        let transition = Transition {
            from: self.state,
            to,
            code,
            cause,
            attempt: self.attempt_count,
            max_attempts: self.max_attempts,
            backoff: self.backoff,
        };
        debug!("Link transition: {:?}", transition);
        self.state = to;
        transition
    }
}
