// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session lifecycle state, server-issued session data and counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::types::{ByteString, NodeId};

// =============================================================================
// SessionState
// =============================================================================

/// Lifecycle state of a [`Session`](super::Session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session exists.
    #[default]
    Closed,

    /// Discovering the endpoint and opening the secure channel.
    Connecting,

    /// CreateSession is in progress.
    Creating,

    /// ActivateSession is in progress.
    Activating,

    /// The session accepts service calls.
    Active,

    /// The session is being moved to a new secure channel.
    Reconnecting,

    /// CloseSession is in progress.
    Closing,

    /// The server no longer accepts the session, or opening failed.
    Faulted,
}

impl SessionState {
    /// Returns `true` if service calls may be issued.
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns `true` while a lifecycle operation is running.
    #[inline]
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Creating | Self::Activating | Self::Reconnecting | Self::Closing
        )
    }

    /// Returns `true` if the session needs a fresh `open()`.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Faulted)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Creating => write!(f, "Creating"),
            Self::Activating => write!(f, "Activating"),
            Self::Active => write!(f, "Active"),
            Self::Reconnecting => write!(f, "Reconnecting"),
            Self::Closing => write!(f, "Closing"),
            Self::Faulted => write!(f, "Faulted"),
        }
    }
}

// =============================================================================
// SessionInfo
// =============================================================================

/// What the server handed out in CreateSession and ActivateSession.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Public session id.
    pub session_id: NodeId,

    /// Secret token placed in every request header.
    pub authentication_token: NodeId,

    /// Timeout granted by the server.
    pub revised_timeout: Duration,

    /// Largest request the server accepts; 0 means no limit.
    pub max_request_message_size: u32,

    /// Latest server nonce, refreshed by every ActivateSession.
    pub server_nonce: ByteString,

    /// Creation time.
    pub created_at: Instant,

    /// Time of the last activation.
    pub activated_at: Instant,
}

impl SessionInfo {
    /// Returns the session age.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

// =============================================================================
// SessionStats
// =============================================================================

/// Counters for session operations.
#[derive(Debug, Default)]
pub struct SessionStats {
    creations: AtomicU64,
    activations: AtomicU64,
    reconnections: AtomicU64,
    service_calls: AtomicU64,
    service_faults: AtomicU64,
    failures: AtomicU64,
}

impl SessionStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_creation(&self) {
        self.creations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_activation(&self) {
        self.activations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnection(&self) {
        self.reconnections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_call(&self) {
        self.service_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fault(&self) {
        self.service_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Sessions created.
    pub fn creations(&self) -> u64 {
        self.creations.load(Ordering::Relaxed)
    }

    /// Successful activations, including re-activations.
    pub fn activations(&self) -> u64 {
        self.activations.load(Ordering::Relaxed)
    }

    /// Successful reconnects.
    pub fn reconnections(&self) -> u64 {
        self.reconnections.load(Ordering::Relaxed)
    }

    /// Service calls issued.
    pub fn service_calls(&self) -> u64 {
        self.service_calls.load(Ordering::Relaxed)
    }

    /// Service calls that failed.
    pub fn service_faults(&self) -> u64 {
        self.service_faults.load(Ordering::Relaxed)
    }

    /// Failed opens and session losses.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state() {
        assert!(SessionState::Active.is_active());
        assert!(!SessionState::Reconnecting.is_active());
        assert!(SessionState::Reconnecting.is_transitioning());
        assert!(SessionState::Creating.is_transitioning());
        assert!(!SessionState::Active.is_transitioning());
        assert!(SessionState::Faulted.is_terminal());
        assert!(SessionState::Closed.is_terminal());
        assert_eq!(SessionState::default(), SessionState::Closed);
        assert_eq!(SessionState::Activating.to_string(), "Activating");
    }

    #[test]
    fn test_session_stats() {
        let stats = SessionStats::new();
        stats.record_creation();
        stats.record_activation();
        stats.record_activation();
        stats.record_call();
        assert_eq!(stats.creations(), 1);
        assert_eq!(stats.activations(), 2);
        assert_eq!(stats.service_calls(), 1);
        assert_eq!(stats.failures(), 0);
    }
}
