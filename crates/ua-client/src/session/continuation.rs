// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Continuation point loops for Browse/BrowseNext and HistoryRead.
//!
//! Every loop resubmits the server's continuation point verbatim until it
//! comes back null. The number of round trips (the initial request included)
//! is capped by `max_continuation_round_trips`; hitting the cap releases the
//! outstanding continuation points and fails with
//! [`SessionError::ContinuationLimit`].

use crate::codec::{DataValue, ExtensionObject};
use crate::error::{SessionError, UaError, UaResult};
use crate::messages::{
    BrowseDescription, BrowseResult, HistoryData, HistoryEvent, HistoryEventFieldList,
    HistoryReadResult, HistoryReadValueId, ReferenceDescription, TimestampsToReturn,
};
use crate::types::{ByteString, NodeId, StatusCode};

use super::Session;

// =============================================================================
// Browse
// =============================================================================

/// References of one node collected over all continuation rounds.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowseOutcome {
    /// Node that was browsed.
    pub node_id: NodeId,
    /// Status of the last round for this node.
    pub status_code: StatusCode,
    /// References in server order.
    pub references: Vec<ReferenceDescription>,
}

impl Session {
    /// Browses every node and follows continuation points until each result
    /// is complete.
    ///
    /// A bad status for one node stops that node only; the others continue.
    pub async fn browse_all(
        &self,
        nodes: Vec<BrowseDescription>,
        max_references_per_node: u32,
    ) -> UaResult<Vec<BrowseOutcome>> {
        let limit = self.max_round_trips();
        let mut outcomes: Vec<BrowseOutcome> = nodes
            .iter()
            .map(|d| BrowseOutcome {
                node_id: d.node_id.clone(),
                status_code: StatusCode::GOOD,
                references: Vec::new(),
            })
            .collect();

        let first = self.browse(nodes, max_references_per_node).await?;
        let mut round_trips = 1;
        // (index into outcomes, continuation point)
        let mut pending = absorb_browse(&mut outcomes, (0..first.len()).collect(), first);

        while !pending.is_empty() {
            if round_trips >= limit {
                let points = pending.into_iter().map(|(_, cp)| cp).collect();
                self.release_browse(points).await;
                return Err(SessionError::ContinuationLimit {
                    service: "BrowseNext",
                    round_trips,
                }
                .into());
            }
            let (indices, points): (Vec<usize>, Vec<ByteString>) = pending.into_iter().unzip();
            let results = self.browse_next(false, points).await?;
            round_trips += 1;
            pending = absorb_browse(&mut outcomes, indices, results);
        }

        tracing::debug!(nodes = outcomes.len(), round_trips, "Browse complete");
        Ok(outcomes)
    }

    /// Returns a pager that fetches the references of one node page by page.
    pub fn browse_pager(&self, description: BrowseDescription, max_references_per_node: u32) -> BrowsePager<'_> {
        BrowsePager {
            session: self,
            description,
            max_references_per_node,
            position: PagerPosition::Start,
            round_trips: 0,
        }
    }

    pub(crate) async fn release_browse(&self, points: Vec<ByteString>) {
        if points.is_empty() {
            return;
        }
        if let Err(e) = self.browse_next(true, points).await {
            tracing::debug!(error = %e, "Releasing continuation points failed");
        }
    }

    async fn release_history(&self, details: &ExtensionObject, nodes: Vec<HistoryReadValueId>) {
        if nodes.is_empty() {
            return;
        }
        if let Err(e) = self
            .history_read(details.clone(), TimestampsToReturn::Neither, true, nodes)
            .await
        {
            tracing::debug!(error = %e, "Releasing history continuation points failed");
        }
    }
}

fn absorb_browse(
    outcomes: &mut [BrowseOutcome],
    indices: Vec<usize>,
    results: Vec<BrowseResult>,
) -> Vec<(usize, ByteString)> {
    let mut pending = Vec::new();
    for (index, result) in indices.into_iter().zip(results) {
        let Some(outcome) = outcomes.get_mut(index) else {
            continue;
        };
        outcome.status_code = result.status_code;
        outcome.references.extend(result.references.unwrap_or_default());
        if result.status_code.is_bad() {
            tracing::debug!(node = %outcome.node_id, status = %result.status_code, "Browse failed for node");
            continue;
        }
        if !result.continuation_point.is_null_or_empty() {
            pending.push((index, result.continuation_point));
        }
    }
    pending
}

#[derive(Debug)]
enum PagerPosition {
    Start,
    More(ByteString),
    Done,
}

/// Fetches the references of one node one page at a time.
///
/// Dropping a pager that still holds a continuation point leaves it on the
/// server until the session closes; call [`release`](Self::release) to free
/// it early.
#[derive(Debug)]
pub struct BrowsePager<'a> {
    session: &'a Session,
    description: BrowseDescription,
    max_references_per_node: u32,
    position: PagerPosition,
    round_trips: usize,
}

impl BrowsePager<'_> {
    /// Fetches the next page, or `None` once the result is complete.
    ///
    /// A bad status for the node is returned as a service fault.
    pub async fn next_page(&mut self) -> UaResult<Option<Vec<ReferenceDescription>>> {
        let result = match std::mem::replace(&mut self.position, PagerPosition::Done) {
            PagerPosition::Done => return Ok(None),
            PagerPosition::Start => {
                let results = self
                    .session
                    .browse(vec![self.description.clone()], self.max_references_per_node)
                    .await?;
                single(results, "Browse")?
            }
            PagerPosition::More(point) => {
                if self.round_trips >= self.session.max_round_trips() {
                    self.session.release_browse(vec![point]).await;
                    return Err(SessionError::ContinuationLimit {
                        service: "BrowseNext",
                        round_trips: self.round_trips,
                    }
                    .into());
                }
                let results = self.session.browse_next(false, vec![point]).await?;
                single(results, "BrowseNext")?
            }
        };
        self.round_trips += 1;

        if result.status_code.is_bad() {
            return Err(UaError::service_fault("Browse", result.status_code));
        }
        if !result.continuation_point.is_null_or_empty() {
            self.position = PagerPosition::More(result.continuation_point);
        }
        Ok(Some(result.references.unwrap_or_default()))
    }

    /// Releases a held continuation point.
    pub async fn release(&mut self) {
        if let PagerPosition::More(point) = std::mem::replace(&mut self.position, PagerPosition::Done) {
            self.session.release_browse(vec![point]).await;
        }
    }

    /// Round trips so far.
    pub fn round_trips(&self) -> usize {
        self.round_trips
    }

    /// Returns `true` once the last page was returned.
    pub fn is_done(&self) -> bool {
        matches!(self.position, PagerPosition::Done) && self.round_trips > 0
    }
}

fn single<T>(results: Vec<T>, service: &'static str) -> UaResult<T> {
    results.into_iter().next().ok_or_else(|| {
        SessionError::UnexpectedResponse {
            reason: format!("{service} returned no result"),
        }
        .into()
    })
}

// =============================================================================
// HistoryRead
// =============================================================================

/// History of one node collected over all continuation rounds.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPages {
    /// Node that was read.
    pub node_id: NodeId,
    /// Status of the last round for this node.
    pub status_code: StatusCode,
    /// One `HistoryData` or `HistoryEvent` per round, in order.
    pub pages: Vec<ExtensionObject>,
}

impl HistoryPages {
    /// Concatenates the values of all `HistoryData` pages.
    pub fn data_values(&self) -> UaResult<Vec<DataValue>> {
        let mut values = Vec::new();
        for page in &self.pages {
            if let Some(data) = page.decode_as::<HistoryData>()? {
                values.extend(data.data_values.unwrap_or_default());
            }
        }
        Ok(values)
    }

    /// Concatenates the events of all `HistoryEvent` pages.
    pub fn events(&self) -> UaResult<Vec<HistoryEventFieldList>> {
        let mut events = Vec::new();
        for page in &self.pages {
            if let Some(history) = page.decode_as::<HistoryEvent>()? {
                events.extend(history.events.unwrap_or_default());
            }
        }
        Ok(events)
    }
}

impl Session {
    /// Reads history for every node, following continuation points until
    /// each node's data is complete.
    pub async fn history_read_all(
        &self,
        details: ExtensionObject,
        timestamps_to_return: TimestampsToReturn,
        nodes: Vec<HistoryReadValueId>,
    ) -> UaResult<Vec<HistoryPages>> {
        let limit = self.max_round_trips();
        let mut outcomes: Vec<HistoryPages> = nodes
            .iter()
            .map(|n| HistoryPages {
                node_id: n.node_id.clone(),
                status_code: StatusCode::GOOD,
                pages: Vec::new(),
            })
            .collect();

        let mut requests = nodes;
        let mut indices: Vec<usize> = (0..requests.len()).collect();
        let mut round_trips = 0;
        loop {
            let results = self
                .history_read(details.clone(), timestamps_to_return, false, requests.clone())
                .await?;
            round_trips += 1;

            let mut next_requests = Vec::new();
            let mut next_indices = Vec::new();
            for ((index, mut request), result) in indices.into_iter().zip(requests).zip(results) {
                let Some(outcome) = outcomes.get_mut(index) else {
                    continue;
                };
                absorb_history(outcome, &result);
                if result.status_code.is_bad() || result.continuation_point.is_null_or_empty() {
                    continue;
                }
                request.continuation_point = result.continuation_point;
                next_requests.push(request);
                next_indices.push(index);
            }

            if next_requests.is_empty() {
                break;
            }
            if round_trips >= limit {
                self.release_history(&details, next_requests).await;
                return Err(SessionError::ContinuationLimit {
                    service: "HistoryRead",
                    round_trips,
                }
                .into());
            }
            requests = next_requests;
            indices = next_indices;
        }

        tracing::debug!(nodes = outcomes.len(), round_trips, "History read complete");
        Ok(outcomes)
    }
}

fn absorb_history(outcome: &mut HistoryPages, result: &HistoryReadResult) {
    outcome.status_code = result.status_code;
    if result.status_code.is_bad() {
        tracing::debug!(node = %outcome.node_id, status = %result.status_code, "History read failed for node");
    }
    if !result.history_data.is_null() {
        outcome.pages.push(result.history_data.clone());
    }
}
