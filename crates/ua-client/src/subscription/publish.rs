// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The publish loop.
//!
//! While the session has subscriptions the loop keeps up to
//! `outstanding_requests` Publish requests in flight on the current secure
//! channel. Every response is routed through the [`SubscriptionRegistry`],
//! broadcast raw to observers and replaced by a fresh request carrying the
//! acknowledgement for its sequence number.
//!
//! The loop exits on shutdown or when the server reports the session
//! invalid. A dead channel only parks it until the session installs a new
//! one.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::channel::SecureChannel;
use crate::config::PublishSettings;
use crate::error::{UaError, UaResult};
use crate::messages::{PublishRequest, PublishResponse, RequestHeader, SubscriptionAcknowledgement};
use crate::types::{NodeId, StatusCode};

use super::registry::SubscriptionRegistry;

/// Why the publish loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishExit {
    /// Stopped by the session.
    Shutdown,
    /// The server no longer accepts the session.
    SessionInvalid(StatusCode),
}

/// Publish loop counters.
#[derive(Debug, Default)]
pub struct PublishStats {
    requests: AtomicU64,
    responses: AtomicU64,
    faults: AtomicU64,
    depth: AtomicUsize,
}

impl PublishStats {
    /// Publish requests sent.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Publish responses received, keep-alives included.
    pub fn responses(&self) -> u64 {
        self.responses.load(Ordering::Relaxed)
    }

    /// Publish requests that failed.
    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    /// Current target of outstanding requests.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

/// Everything the loop needs from its session.
pub(crate) struct PublishContext {
    pub channel: watch::Receiver<Option<Arc<SecureChannel>>>,
    pub authentication_token: NodeId,
    pub registry: Arc<SubscriptionRegistry>,
    pub responses: broadcast::Sender<Arc<PublishResponse>>,
    pub settings: PublishSettings,
    pub stats: Arc<PublishStats>,
}

/// A running publish loop.
#[derive(Debug)]
pub(crate) struct PublishTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PublishTask {
    /// Starts the loop. `on_exit` runs on the loop task once it stops.
    pub fn spawn<F>(context: PublishContext, on_exit: F) -> Self
    where
        F: FnOnce(PublishExit) + Send + 'static,
    {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let exit = run(context, shutdown_rx).await;
            tracing::debug!(exit = ?exit, "Publish loop stopped");
            on_exit(exit);
        });
        Self { shutdown, handle }
    }

    /// Signals the loop to stop and waits for it. Outstanding Publish
    /// requests are abandoned.
    pub async fn stop(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                tracing::error!("Publish loop panicked");
            }
        }
    }

    /// Stops the loop without waiting.
    pub fn abort(self) {
        self.shutdown.send_replace(true);
        self.handle.abort();
    }
}

type InFlight = JoinSet<(Vec<SubscriptionAcknowledgement>, UaResult<PublishResponse>)>;

async fn run(mut ctx: PublishContext, mut shutdown: watch::Receiver<bool>) -> PublishExit {
    let mut depth = ctx.settings.outstanding_requests.max(1);
    ctx.stats.depth.store(depth, Ordering::Relaxed);
    let timeout_hint = u32::try_from(ctx.settings.publish_timeout.as_millis()).unwrap_or(u32::MAX);
    let mut subscriptions = ctx.registry.subscribe_count();
    let mut acks: Vec<SubscriptionAcknowledgement> = Vec::new();
    let mut in_flight: InFlight = JoinSet::new();
    let mut backoff: Option<Duration> = None;

    tracing::debug!(depth, "Publish loop started");

    loop {
        if *shutdown.borrow() {
            return PublishExit::Shutdown;
        }

        if let Some(pause) = backoff.take() {
            tokio::select! {
                _ = shutdown.changed() => return PublishExit::Shutdown,
                _ = tokio::time::sleep(pause) => {}
            }
            continue;
        }

        let channel = ctx
            .channel
            .borrow_and_update()
            .clone()
            .filter(|c| c.state().is_usable());
        let mut parked = channel.is_none();

        // Top up the pool.
        if let Some(channel) = &channel {
            while in_flight.len() < depth && !ctx.registry.is_empty() {
                let sent = std::mem::take(&mut acks);
                let request = PublishRequest {
                    request_header: RequestHeader::new(ctx.authentication_token.clone(), 0, timeout_hint),
                    subscription_acknowledgements: (!sent.is_empty()).then(|| sent.clone()),
                };
                match channel.send(request).await {
                    Ok(pending) => {
                        ctx.stats.requests.fetch_add(1, Ordering::Relaxed);
                        in_flight.spawn(async move { (sent, pending.response().await) });
                    }
                    Err(e) => {
                        acks = sent;
                        ctx.stats.faults.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(error = %e, "Publish request not sent");
                        if e.is_channel_fatal() {
                            parked = true;
                        } else {
                            backoff = Some(ctx.settings.no_subscription_backoff);
                        }
                        break;
                    }
                }
            }
        }
        if backoff.is_some() {
            continue;
        }

        tokio::select! {
            biased;

            _ = shutdown.changed() => return PublishExit::Shutdown,

            Some(joined) = in_flight.join_next() => {
                let Ok((sent, result)) = joined else {
                    continue;
                };
                match result {
                    Ok(response) => {
                        ctx.stats.responses.fetch_add(1, Ordering::Relaxed);
                        handle_response(&ctx, response, &mut acks);
                    }
                    Err(UaError::SessionInvalid(e)) => {
                        tracing::warn!(status = %e.status, "Publish reported session invalid");
                        return PublishExit::SessionInvalid(e.status);
                    }
                    Err(e) => {
                        ctx.stats.faults.fetch_add(1, Ordering::Relaxed);
                        match e.status_code() {
                            StatusCode::BAD_NO_SUBSCRIPTION => {
                                tracing::debug!("Server reports no subscription, backing off");
                                backoff = Some(ctx.settings.no_subscription_backoff);
                            }
                            StatusCode::BAD_TOO_MANY_PUBLISH_REQUESTS => {
                                depth = depth.saturating_sub(1).max(1);
                                ctx.stats.depth.store(depth, Ordering::Relaxed);
                                tracing::info!(depth, "Server limits outstanding publish requests");
                                acks.extend(sent);
                            }
                            _ if e.is_channel_fatal() => {
                                tracing::debug!(error = %e, "Publish lost with its channel");
                                acks.extend(sent);
                            }
                            _ => {
                                tracing::debug!(error = %e, "Publish request failed");
                                acks.extend(sent);
                                if matches!(e, UaError::ServiceFault(_)) {
                                    backoff = Some(ctx.settings.no_subscription_backoff);
                                }
                            }
                        }
                    }
                }
            }

            // Nothing in flight: wait for a channel or a subscription.
            changed = ctx.channel.changed(), if in_flight.is_empty() && parked => {
                if changed.is_err() {
                    return PublishExit::Shutdown;
                }
            }
            changed = subscriptions.changed(), if in_flight.is_empty() && !parked => {
                if changed.is_err() {
                    return PublishExit::Shutdown;
                }
            }
        }
    }
}

fn handle_response(ctx: &PublishContext, response: PublishResponse, acks: &mut Vec<SubscriptionAcknowledgement>) {
    let subscription_id = response.subscription_id;
    let message = &response.notification_message;
    tracing::trace!(
        subscription_id,
        sequence_number = message.sequence_number,
        keep_alive = message.is_keep_alive(),
        more = response.more_notifications,
        "Publish response"
    );

    if !message.is_keep_alive() {
        acks.push(SubscriptionAcknowledgement {
            subscription_id,
            sequence_number: message.sequence_number,
        });
    }
    for status in response.results.iter().flatten().filter(|s| s.is_bad()) {
        tracing::debug!(subscription_id, status = %status, "Acknowledgement rejected");
    }

    ctx.registry.dispatch(&response);
    // No receivers is fine.
    let _ = ctx.responses.send(Arc::new(response));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DataValue, ExtensionObject, Variant};
    use crate::messages::{DataChangeNotification, MonitoredItemNotification, NotificationMessage};
    use crate::types::DateTime;

    fn context() -> (PublishContext, broadcast::Receiver<Arc<PublishResponse>>) {
        let (_tx, channel) = watch::channel(None);
        let (responses, rx) = broadcast::channel(8);
        let ctx = PublishContext {
            channel,
            authentication_token: NodeId::numeric(0, 1),
            registry: Arc::new(SubscriptionRegistry::new(8)),
            responses,
            settings: PublishSettings::default(),
            stats: Arc::new(PublishStats::default()),
        };
        (ctx, rx)
    }

    fn response(seq: u32, data: Option<Vec<ExtensionObject>>) -> PublishResponse {
        PublishResponse {
            subscription_id: 7,
            notification_message: NotificationMessage {
                sequence_number: seq,
                publish_time: DateTime::now(),
                notification_data: data,
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_data_response_is_acknowledged_and_broadcast() {
        let (ctx, mut rx) = context();
        let mut acks = Vec::new();
        let data = ExtensionObject::from_structure(DataChangeNotification {
            monitored_items: Some(vec![MonitoredItemNotification {
                client_handle: 1,
                value: DataValue::new(Variant::Double(1.5)),
            }]),
            diagnostic_infos: None,
        });
        handle_response(&ctx, response(4, Some(vec![data])), &mut acks);

        assert_eq!(
            acks,
            vec![SubscriptionAcknowledgement {
                subscription_id: 7,
                sequence_number: 4
            }]
        );
        assert_eq!(rx.recv().await.unwrap().notification_message.sequence_number, 4);
    }

    #[tokio::test]
    async fn test_keep_alive_not_acknowledged() {
        let (ctx, mut rx) = context();
        let mut acks = Vec::new();
        handle_response(&ctx, response(9, None), &mut acks);
        assert!(acks.is_empty());
        assert!(rx.recv().await.unwrap().notification_message.is_keep_alive());
    }

    #[tokio::test]
    async fn test_shutdown_without_channel() {
        let (ctx, _rx) = context();
        let exits = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let recorded = Arc::clone(&exits);
        let task = PublishTask::spawn(ctx, move |exit| recorded.lock().push(exit));
        tokio::task::yield_now().await;
        task.stop().await;
        assert_eq!(exits.lock().as_slice(), &[PublishExit::Shutdown]);
    }
}
