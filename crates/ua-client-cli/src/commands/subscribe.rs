// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `subscribe` command.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};
use ua_client::messages::{MonitoredItemCreateRequest, TimestampsToReturn};
use ua_client::session::SessionState;
use ua_client::types::{NodeId, StatusCode};
use ua_client::{BaseEvent, ChannelCallback, Notification, Session, SubscriptionSettings};

use crate::cli::{OutputFormat, SubscribeArgs};
use crate::error::{CliError, CliResult};
use crate::output::{data_value_json, data_value_text, emit_record, status_json};
use crate::value::parse_node_id;

/// How often the channel is checked while waiting for notifications.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// What a client handle stands for.
#[derive(Debug, Clone)]
enum Monitored {
    Value(NodeId),
    Events,
}

/// Why the notification loop ended.
#[derive(Debug, PartialEq, Eq)]
enum Stop {
    Interrupted,
    Elapsed,
    CountReached,
    SubscriptionLost,
}

/// Creates one subscription with a value item per node and optionally an
/// event item on the Server object, then prints notifications until Ctrl-C,
/// `--duration` or `--count`.
///
/// A dropped channel is repaired with `reconnect`, which keeps the
/// subscription alive on the server.
pub async fn subscribe(output: OutputFormat, args: &SubscribeArgs, session: Session) -> CliResult<()> {
    if args.nodes.is_empty() && !args.events {
        return Err(CliError::input("nothing to monitor: give node ids or --events"));
    }

    let mut settings: SubscriptionSettings = session.config().subscription.clone();
    if let Some(interval) = args.interval {
        settings.publishing_interval = interval;
    }
    let (callback, rx) = ChannelCallback::with_channel(session.config().publish.dispatch_queue);
    let info = session.create_subscription(settings, Arc::new(callback)).await?;
    let subscription_id = info.subscription_id;

    let sampling_ms = args
        .sampling
        .unwrap_or(info.publishing_interval)
        .as_secs_f64()
        * 1000.0;

    let mut handles: HashMap<u32, Monitored> = HashMap::new();
    let mut requests = Vec::new();
    for (index, text) in args.nodes.iter().enumerate() {
        let node = parse_node_id(text)?;
        let handle = index as u32 + 1;
        requests.push(MonitoredItemCreateRequest::value(
            node.clone(),
            handle,
            sampling_ms,
            args.queue_size,
        ));
        handles.insert(handle, Monitored::Value(node));
    }
    if args.events {
        let handle = args.nodes.len() as u32 + 1;
        requests.push(BaseEvent::monitored_item(handle, args.queue_size));
        handles.insert(handle, Monitored::Events);
    }

    let results = session
        .create_monitored_items(subscription_id, TimestampsToReturn::Both, requests)
        .await?;
    let accepted = results.iter().filter(|r| r.status_code.is_good()).count();
    for (handle, result) in (1u32..).zip(&results) {
        if result.status_code.is_bad() {
            eprintln!("item {}: {}", describe(handles.get(&handle)), result.status_code);
        }
    }
    if accepted == 0 {
        let status = results.first().map(|r| r.status_code).unwrap_or_default();
        let _ = session.delete_subscriptions(vec![subscription_id]).await;
        return Err(CliError::rejected("create monitored items", status));
    }
    info!(
        subscription_id,
        publishing_interval_ms = info.publishing_interval.as_millis() as u64,
        items = accepted,
        "Monitoring"
    );

    let stop = watch(output, args, &session, &handles, rx).await?;
    info!(subscription_id, reason = ?stop, "Monitoring stopped");

    if stop != Stop::SubscriptionLost && session.state().is_active() {
        if let Err(e) = session.delete_subscriptions(vec![subscription_id]).await {
            warn!(subscription_id, error = %e, "Failed to delete subscription");
        }
    }
    Ok(())
}

async fn watch(
    output: OutputFormat,
    args: &SubscribeArgs,
    session: &Session,
    handles: &HashMap<u32, Monitored>,
    mut rx: mpsc::Receiver<Notification>,
) -> CliResult<Stop> {
    let deadline = async {
        match args.duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut state = session.subscribe_state();
    let mut health = tokio::time::interval(HEALTH_CHECK_INTERVAL);
    let mut received: u64 = 0;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => return Ok(Stop::Interrupted),
            _ = &mut deadline => return Ok(Stop::Elapsed),
            notification = rx.recv() => {
                let Some(notification) = notification else {
                    return Ok(Stop::SubscriptionLost);
                };
                let lost = matches!(
                    &notification,
                    Notification::StatusChange { status, .. } if status.is_bad()
                );
                print_notification(output, handles, &notification)?;
                if lost {
                    return Ok(Stop::SubscriptionLost);
                }
                received += 1;
                if args.count.is_some_and(|n| received >= n) {
                    return Ok(Stop::CountReached);
                }
            }
            changed = state.changed() => {
                if changed.is_err() || *state.borrow() == SessionState::Faulted {
                    return Err(CliError::rejected("subscribe", StatusCode::BAD_SESSION_CLOSED));
                }
            }
            _ = health.tick() => {
                let channel_ok = session.channel().is_some_and(|c| c.state().is_usable());
                let recoverable = matches!(
                    session.state(),
                    SessionState::Active | SessionState::Reconnecting
                );
                if !channel_ok && recoverable {
                    warn!("Channel lost, reconnecting");
                    if let Err(e) = session.reconnect().await {
                        warn!(error = %e, "Reconnect failed, retrying");
                    }
                }
            }
        }
    }
}

fn describe(monitored: Option<&Monitored>) -> String {
    match monitored {
        Some(Monitored::Value(node)) => node.to_string(),
        Some(Monitored::Events) => "events".to_string(),
        None => "?".to_string(),
    }
}

fn print_notification(
    output: OutputFormat,
    handles: &HashMap<u32, Monitored>,
    notification: &Notification,
) -> CliResult<()> {
    let (record, text) = notification_record(handles, notification);
    emit_record(output, &record, || text)
}

fn notification_record(handles: &HashMap<u32, Monitored>, notification: &Notification) -> (Value, String) {
    match notification {
        Notification::DataChange(change) => {
            let source = describe(handles.get(&change.client_handle));
            (
                json!({
                    "kind": "data_change",
                    "node": source,
                    "sequence_number": change.sequence_number,
                    "value": data_value_json(&change.value),
                }),
                format!("{source} = {}", data_value_text(&change.value)),
            )
        }
        Notification::Event(fields) => {
            let event = BaseEvent::from(fields);
            (
                json!({
                    "kind": "event",
                    "source": event.source_name,
                    "source_node": event.source_node.to_string(),
                    "event_type": event.event_type.to_string(),
                    "time": event.time.to_string(),
                    "severity": event.severity,
                    "message": event.message.text,
                }),
                format!(
                    "event {} [{}] {}: {}",
                    event.time, event.severity, event.source_name, event.message
                ),
            )
        }
        Notification::StatusChange {
            subscription_id,
            status,
        } => (
            json!({
                "kind": "status_change",
                "subscription_id": subscription_id,
                "status": status_json(*status),
            }),
            format!("subscription {subscription_id}: {status}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ua_client::codec::{DataValue, Variant};
    use ua_client::types::LocalizedText;
    use ua_client::{DataChange, EventFields};

    fn handles() -> HashMap<u32, Monitored> {
        HashMap::from([
            (1, Monitored::Value(NodeId::string(2, "Temperature"))),
            (2, Monitored::Events),
        ])
    }

    #[test]
    fn test_data_change_record() {
        let notification = Notification::DataChange(DataChange {
            subscription_id: 9,
            client_handle: 1,
            node_id: None,
            value: DataValue::new(21.5f64),
            sequence_number: 4,
        });
        let (record, text) = notification_record(&handles(), &notification);
        assert_eq!(record["kind"], json!("data_change"));
        assert_eq!(record["node"], json!("ns=2;s=Temperature"));
        assert_eq!(record["value"]["value"], json!(21.5));
        assert_eq!(text, "ns=2;s=Temperature = 21.5");
    }

    #[test]
    fn test_event_record() {
        let mut fields = vec![Variant::Empty; 8];
        fields[3] = Variant::from("Boiler");
        fields[6] = Variant::from(LocalizedText::new("Overheat"));
        fields[7] = Variant::UInt16(700);
        let notification = Notification::Event(EventFields {
            subscription_id: 9,
            client_handle: 2,
            fields,
            sequence_number: 5,
        });
        let (record, text) = notification_record(&handles(), &notification);
        assert_eq!(record["severity"], json!(700));
        assert_eq!(record["source"], json!("Boiler"));
        assert!(text.ends_with("Boiler: Overheat"));
    }

    #[test]
    fn test_status_change_record() {
        let notification = Notification::StatusChange {
            subscription_id: 9,
            status: StatusCode::BAD_TIMEOUT,
        };
        let (record, text) = notification_record(&handles(), &notification);
        assert_eq!(record["kind"], json!("status_change"));
        assert!(text.starts_with("subscription 9:"));
    }

    #[test]
    fn test_describe_unknown_handle() {
        assert_eq!(describe(handles().get(&7)), "?");
        assert_eq!(describe(handles().get(&2)), "events");
    }
}
