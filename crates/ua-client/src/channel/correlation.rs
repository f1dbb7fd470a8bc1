// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Request/response correlation.
//!
//! Each outgoing request registers a single-use completion slot keyed by its
//! request id. The reader task completes the slot when the matching response
//! arrives, in whatever order the server answers.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{ChannelAbortedError, UaError};

/// Result delivered to a waiting request.
pub type Completion = Result<Bytes, UaError>;

#[derive(Debug)]
struct Pending {
    service: &'static str,
    sender: oneshot::Sender<Completion>,
    created: Instant,
}

/// In-flight requests of one secure channel.
#[derive(Debug, Default)]
pub struct PendingRequests {
    slots: Mutex<HashMap<u32, Pending>>,
}

impl PendingRequests {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a slot for `request_id`.
    ///
    /// Request ids are never reused while outstanding; a duplicate is a
    /// programming error and is reported as a protocol failure.
    pub fn register(
        &self,
        request_id: u32,
        service: &'static str,
    ) -> Result<oneshot::Receiver<Completion>, ChannelAbortedError> {
        let (sender, receiver) = oneshot::channel();
        let mut slots = self.slots.lock();
        if slots.contains_key(&request_id) {
            return Err(ChannelAbortedError::protocol(format!(
                "request id {request_id} is already outstanding"
            )));
        }
        slots.insert(
            request_id,
            Pending {
                service,
                sender,
                created: Instant::now(),
            },
        );
        Ok(receiver)
    }

    /// Completes the slot for `request_id`. Returns `false` if no request
    /// was waiting (late response after a timeout or cancellation).
    pub fn complete(&self, request_id: u32, result: Completion) -> bool {
        let pending = self.slots.lock().remove(&request_id);
        match pending {
            Some(pending) => {
                tracing::trace!(
                    request_id,
                    service = pending.service,
                    elapsed_ms = pending.created.elapsed().as_millis() as u64,
                    "Response correlated"
                );
                // The waiter may have been dropped in the meantime.
                let _ = pending.sender.send(result);
                true
            }
            None => false,
        }
    }

    /// Drops the slot without completing it.
    pub fn remove(&self, request_id: u32) {
        self.slots.lock().remove(&request_id);
    }

    /// Fails every outstanding request with `error`.
    pub fn fail_all(&self, error: &ChannelAbortedError) -> usize {
        let drained: Vec<_> = self.slots.lock().drain().collect();
        let count = drained.len();
        for (_, pending) in drained {
            let _ = pending.sender.send(Err(UaError::ChannelAborted(error.clone())));
        }
        count
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Returns `true` when nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Service name of an outstanding request.
    pub fn service_of(&self, request_id: u32) -> Option<&'static str> {
        self.slots.lock().get(&request_id).map(|p| p.service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_out_of_order_completion() {
        let table = PendingRequests::new();
        let first = table.register(1, "Read").unwrap();
        let second = table.register(2, "Browse").unwrap();
        assert_eq!(table.len(), 2);

        assert!(table.complete(2, Ok(Bytes::from_static(b"two"))));
        assert!(table.complete(1, Ok(Bytes::from_static(b"one"))));

        assert_eq!(first.await.unwrap().unwrap(), Bytes::from_static(b"one"));
        assert_eq!(second.await.unwrap().unwrap(), Bytes::from_static(b"two"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let table = PendingRequests::new();
        let _rx = table.register(5, "Read").unwrap();
        assert!(table.register(5, "Read").is_err());
    }

    #[test]
    fn test_late_response_ignored() {
        let table = PendingRequests::new();
        let rx = table.register(3, "Read").unwrap();
        table.remove(3);
        drop(rx);
        assert!(!table.complete(3, Ok(Bytes::new())));
    }

    #[tokio::test]
    async fn test_fail_all() {
        let table = PendingRequests::new();
        let a = table.register(1, "Read").unwrap();
        let b = table.register(2, "Publish").unwrap();
        assert_eq!(table.fail_all(&ChannelAbortedError::Aborted), 2);
        for rx in [a, b] {
            assert!(matches!(
                rx.await.unwrap(),
                Err(UaError::ChannelAborted(ChannelAbortedError::Aborted))
            ));
        }
    }
}
