// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Sessions and subscriptions held by the mock server.

use std::collections::{BTreeMap, HashMap, VecDeque};

use ua_client::codec::DataValue;
use ua_client::messages::ReferenceDescription;
use ua_client::security::Certificate;
use ua_client::types::{NodeId, StatusCode};

use super::connection::Outgoing;
use super::publish::{MockSubscription, PendingPublish};
use super::services::encode_fault;
use super::DEMO_NS;

/// Namespace of server-assigned session ids and tokens.
const SESSION_NS: u16 = DEMO_NS + 1;

/// Remaining references of a paged Browse.
pub(crate) struct BrowseCursor {
    pub remaining: Vec<ReferenceDescription>,
    pub max: usize,
}

/// One session, keyed by its authentication token.
pub(crate) struct SessionEntry {
    pub session_id: NodeId,
    pub name: String,
    pub nonce: Vec<u8>,
    pub client_certificate: Option<Certificate>,
    pub channel_id: u32,
    pub activated: bool,
    pub user: Option<String>,
    pub browse_points: HashMap<Vec<u8>, BrowseCursor>,
    pub history_points: HashMap<Vec<u8>, Vec<DataValue>>,
    pub publish_queue: VecDeque<PendingPublish>,
}

impl SessionEntry {
    pub fn new(session_id: NodeId, name: String, nonce: Vec<u8>, channel_id: u32) -> Self {
        Self {
            session_id,
            name,
            nonce,
            client_certificate: None,
            channel_id,
            activated: false,
            user: None,
            browse_points: HashMap::new(),
            history_points: HashMap::new(),
            publish_queue: VecDeque::new(),
        }
    }

    /// Answers every queued Publish with a fault.
    pub fn fail_publishes(&mut self, status: StatusCode) {
        for publish in self.publish_queue.drain(..) {
            let _ = publish.reply.send(Outgoing::Message {
                request_id: publish.request_id,
                body: encode_fault(publish.request_handle, status),
            });
        }
    }
}

#[derive(Default)]
pub(crate) struct Core {
    pub sessions: HashMap<NodeId, SessionEntry>,
    pub subscriptions: BTreeMap<u32, MockSubscription>,
    next_session: u32,
    next_subscription: u32,
}

impl Core {
    /// Allocates a session id and its authentication token.
    pub fn allocate_session(&mut self) -> (NodeId, NodeId) {
        self.next_session += 1;
        let n = self.next_session;
        (
            NodeId::string(SESSION_NS, format!("Session{n}")),
            NodeId::string(SESSION_NS, format!("Token{n}")),
        )
    }

    pub fn next_subscription_id(&mut self) -> u32 {
        self.next_subscription += 1;
        self.next_subscription
    }

    /// A session that exists and is activated.
    pub fn active_session_mut(&mut self, token: &NodeId) -> Result<&mut SessionEntry, StatusCode> {
        let session = self
            .sessions
            .get_mut(token)
            .ok_or(StatusCode::BAD_SESSION_ID_INVALID)?;
        if !session.activated {
            return Err(StatusCode::BAD_SESSION_NOT_ACTIVATED);
        }
        Ok(session)
    }

    /// A subscription owned by the session behind `token`.
    pub fn owned_subscription_mut(
        &mut self,
        token: &NodeId,
        subscription_id: u32,
    ) -> Result<&mut MockSubscription, StatusCode> {
        match self.subscriptions.get_mut(&subscription_id) {
            Some(subscription) if &subscription.owner == token => Ok(subscription),
            _ => Err(StatusCode::BAD_SUBSCRIPTION_ID_INVALID),
        }
    }

    pub fn has_subscriptions(&self, token: &NodeId) -> bool {
        self.subscriptions.values().any(|s| &s.owner == token)
    }

    /// Removes a session, failing its queued publishes with `status`.
    pub fn remove_session(&mut self, token: &NodeId, status: StatusCode, delete_subscriptions: bool) -> bool {
        let Some(mut session) = self.sessions.remove(token) else {
            return false;
        };
        session.fail_publishes(status);
        if delete_subscriptions {
            self.subscriptions.retain(|_, s| &s.owner != token);
        }
        true
    }

    /// Forgets every session and subscription.
    pub fn invalidate_all(&mut self) -> usize {
        let tokens: Vec<NodeId> = self.sessions.keys().cloned().collect();
        for token in &tokens {
            self.remove_session(token, StatusCode::BAD_SESSION_ID_INVALID, true);
        }
        self.subscriptions.clear();
        tokens.len()
    }

    /// Answers queued publishes of a session that has no subscriptions left.
    pub fn release_orphaned_publishes(&mut self, token: &NodeId) {
        if self.has_subscriptions(token) {
            return;
        }
        if let Some(session) = self.sessions.get_mut(token) {
            session.fail_publishes(StatusCode::BAD_NO_SUBSCRIPTION);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn core_with_session() -> (Core, NodeId) {
        let mut core = Core::default();
        let (id, token) = core.allocate_session();
        core.sessions
            .insert(token.clone(), SessionEntry::new(id, "test".into(), Vec::new(), 1));
        (core, token)
    }

    #[test]
    fn test_session_must_be_activated() {
        let (mut core, token) = core_with_session();
        assert_eq!(
            core.active_session_mut(&token).err(),
            Some(StatusCode::BAD_SESSION_NOT_ACTIVATED)
        );
        core.sessions.get_mut(&token).unwrap().activated = true;
        assert!(core.active_session_mut(&token).is_ok());
        assert_eq!(
            core.active_session_mut(&NodeId::null()).err(),
            Some(StatusCode::BAD_SESSION_ID_INVALID)
        );
    }

    #[test]
    fn test_subscription_ownership() {
        let (mut core, token) = core_with_session();
        let id = core.next_subscription_id();
        core.subscriptions.insert(
            id,
            MockSubscription::new(id, token.clone(), Duration::from_millis(100), 3, 10, true),
        );
        assert!(core.owned_subscription_mut(&token, id).is_ok());
        assert_eq!(
            core.owned_subscription_mut(&NodeId::null(), id).err(),
            Some(StatusCode::BAD_SUBSCRIPTION_ID_INVALID)
        );

        assert!(core.remove_session(&token, StatusCode::BAD_SESSION_CLOSED, true));
        assert!(core.subscriptions.is_empty());
        assert!(!core.remove_session(&token, StatusCode::BAD_SESSION_CLOSED, true));
    }
}
