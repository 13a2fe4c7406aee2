use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace, warn};

use crate::config::OverlayConfig;
use crate::error::{RequestError, RouteError};
use crate::message::message::Message;
use crate::message::routable_id::{NodeId, RoutableId};
use crate::routing::router::Router;
use crate::routing::routing_table::TopologyPlugin;
use crate::util::random::{Random, RngRandom};

type AnswerResult = Result<Message, RequestError>;

struct PendingRequest {
    /// distinguishes successive requests that reuse a transaction id
    entry_id: u64,
    destination: RoutableId,
    created_at: Instant,
    result_slot: oneshot::Sender<AnswerResult>,
    expiry_timer: Option<AbortHandle>,
}

impl PendingRequest {
    fn resolve(self, result: AnswerResult) {
        if let Some(expiry_timer) = &self.expiry_timer {
            expiry_timer.abort();
        }
        // the caller may have lost interest in the meantime
        let _ = self.result_slot.send(result);
    }
}

/// The table of pending requests, shared between submitters, the answer path and the expiry
///  timers. All of them remove entries with remove-if-present semantics, so exactly one of them
///  resolves any given request.
#[derive(Default)]
struct PendingTable {
    entries: Mutex<FxHashMap<u64, PendingRequest>>,
    next_entry_id: AtomicU64,
}

impl PendingTable {
    fn lock(&self) -> std::sync::MutexGuard<'_, FxHashMap<u64, PendingRequest>> {
        // entries are plain data, so a panic while holding the lock leaves them consistent
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    /// removes an entry, but only if it is the same entry the caller refers to
    fn take(&self, transaction_id: u64, entry_id: u64) -> Option<PendingRequest> {
        let mut entries = self.lock();
        match entries.get(&transaction_id) {
            Some(entry) if entry.entry_id == entry_id => entries.remove(&transaction_id),
            _ => None,
        }
    }

    fn take_any(&self, transaction_id: u64) -> Option<PendingRequest> {
        self.lock().remove(&transaction_id)
    }

    fn attach_expiry_timer(&self, transaction_id: u64, entry_id: u64, expiry_timer: AbortHandle) {
        match self.lock().get_mut(&transaction_id) {
            Some(entry) if entry.entry_id == entry_id => entry.expiry_timer = Some(expiry_timer),
            _ => expiry_timer.abort(),
        }
    }

    /// returns whether the request was still pending
    fn on_expiry(&self, transaction_id: u64, entry_id: u64) -> bool {
        match self.take(transaction_id, entry_id) {
            Some(entry) => {
                debug!("request {} to {:?} timed out after {:?}", transaction_id, entry.destination, entry.created_at.elapsed());
                entry.resolve(Err(RequestError::RequestTimeout(transaction_id)));
                true
            }
            None => false,
        }
    }

    fn on_route_failure(&self, transaction_id: u64, entry_id: u64, error: RouteError) {
        if let Some(entry) = self.take(transaction_id, entry_id) {
            debug!("request {} could not be forwarded: {}", transaction_id, error);
            entry.resolve(Err(error.into()));
        }
    }

    fn cancel(&self, transaction_id: u64, entry_id: u64) {
        if let Some(entry) = self.take(transaction_id, entry_id) {
            trace!("request {} cancelled", transaction_id);
            entry.resolve(Err(RequestError::Cancelled));
        }
    }
}

/// The caller's handle on a submitted request. It resolves exactly once: with the validated
///  answer, or with the reason why there is none. Dropping it cancels the request.
#[must_use]
pub struct PendingAnswer {
    transaction_id: u64,
    entry_id: u64,
    receiver: oneshot::Receiver<AnswerResult>,
    table: Arc<PendingTable>,
}

impl PendingAnswer {
    pub fn transaction_id(&self) -> u64 {
        self.transaction_id
    }

    pub fn cancel(self) {
        // cancellation happens in drop()
    }
}

impl Future for PendingAnswer {
    type Output = AnswerResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(RequestError::Cancelled)))
    }
}

impl Drop for PendingAnswer {
    fn drop(&mut self) {
        self.table.cancel(self.transaction_id, self.entry_id);
    }
}

/// Matches answers to pending requests by transaction id, validating that the answer came from
///  a node that is entitled to answer.
pub struct RequestCorrelator<R: Random = RngRandom> {
    config: Arc<OverlayConfig>,
    router: Arc<Router>,
    topology: Arc<dyn TopologyPlugin>,
    table: Arc<PendingTable>,
    _random: PhantomData<R>,
}

impl RequestCorrelator<RngRandom> {
    pub fn new(config: Arc<OverlayConfig>, router: Arc<Router>, topology: Arc<dyn TopologyPlugin>) -> RequestCorrelator<RngRandom> {
        Self::new_with_random(config, router, topology)
    }
}

impl <R: Random> RequestCorrelator<R> {
    pub fn new_with_random(config: Arc<OverlayConfig>, router: Arc<Router>, topology: Arc<dyn TopologyPlugin>) -> RequestCorrelator<R> {
        RequestCorrelator {
            config,
            router,
            topology,
            table: Default::default(),
            _random: Default::default(),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.table.len()
    }

    /// Submits a request and waits for its answer
    pub async fn request(&self, request: Message) -> AnswerResult {
        self.submit(request)?.await
    }

    /// Registers a request as pending and sends it. A transaction id of 0 is replaced by a
    ///  generated one.
    ///
    /// The request fails immediately if there is no route to its destination. If sending fails
    ///  on all next hops, the returned [PendingAnswer] resolves with that failure without
    ///  waiting for the request to time out.
    pub fn submit(&self, request: Message) -> Result<PendingAnswer, RequestError> {
        let mut raw = request.to_raw().map_err(RouteError::from)?;
        let destination = raw.header.final_destination()
            .cloned()
            .ok_or(RouteError::NoDestination)?;

        let entry_id = self.table.next_entry_id.fetch_add(1, Ordering::Relaxed);
        let (result_slot, receiver) = oneshot::channel();

        let transaction_id = {
            let mut entries = self.table.lock();
            let transaction_id = match raw.header.transaction_id {
                0 => Self::unused_transaction_id(&entries),
                transaction_id if entries.contains_key(&transaction_id) => {
                    return Err(RequestError::DuplicateTransactionId(transaction_id));
                }
                transaction_id => transaction_id,
            };

            entries.insert(transaction_id, PendingRequest {
                entry_id,
                destination,
                created_at: Instant::now(),
                result_slot,
                expiry_timer: None,
            });
            transaction_id
        };
        raw.header.transaction_id = transaction_id;

        let pending_answer = PendingAnswer {
            transaction_id,
            entry_id,
            receiver,
            table: self.table.clone(),
        };

        let table = self.table.clone();
        let request_timeout = self.config.request_timeout;
        let expiry_timer = tokio::spawn(async move {
            sleep(request_timeout).await;
            table.on_expiry(transaction_id, entry_id);
        });
        self.table.attach_expiry_timer(transaction_id, entry_id, expiry_timer.abort_handle());

        trace!("submitting request {} to {:?}", transaction_id, raw.header.final_destination());
        let pending_forward = match self.router.dispatch(&raw) {
            Ok(pending_forward) => pending_forward,
            Err(e) => {
                debug!("request {} failed immediately: {}", transaction_id, e);
                // dropping the pending answer removes the entry and stops the timer
                drop(pending_answer);
                return Err(e.into());
            }
        };

        let table = self.table.clone();
        tokio::spawn(async move {
            match pending_forward.outcome().await {
                Ok(outcome) if outcome.is_partial_failure() => {
                    debug!("request {} reached {:?}, failed for {:?}", transaction_id, outcome.succeeded, outcome.failed);
                }
                Ok(_) => {}
                Err(e) => table.on_route_failure(transaction_id, entry_id, e),
            }
        });

        Ok(pending_answer)
    }

    fn unused_transaction_id(entries: &FxHashMap<u64, PendingRequest>) -> u64 {
        loop {
            let candidate = R::next_u64();
            if candidate != 0 && !entries.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Resolves the pending request matching an answer. `sender` is the node the answer
    ///  originates from.
    ///
    /// Answers without a pending request are expected (late or duplicate answers), and they are
    ///  dropped. Returns whether the answer matched a pending request.
    pub fn on_answer(&self, answer: Message, sender: NodeId) -> bool {
        let transaction_id = answer.transaction_id();
        let entry = match self.table.take_any(transaction_id) {
            Some(entry) => entry,
            None => {
                debug!("answer {} from {:?} does not match a pending request - dropping", transaction_id, sender);
                return false;
            }
        };

        let result = match self.check_provenance(&entry.destination, &sender) {
            Ok(()) => {
                trace!("answer {} from {:?} after {:?}", transaction_id, sender, entry.created_at.elapsed());
                Ok(answer)
            }
            Err(expected) => {
                warn!("answer {} for {:?} came from {:?}, expected {:?} - rejecting it", transaction_id, entry.destination, sender, expected);
                Err(RequestError::ProvenanceMismatch { transaction_id, expected, actual: sender })
            }
        };
        entry.resolve(result);
        true
    }

    /// Checks that `sender` is entitled to answer for `destination`, returning the expected
    ///  sender otherwise
    fn check_provenance(&self, destination: &RoutableId, sender: &NodeId) -> Result<(), Option<NodeId>> {
        let expected = match destination {
            RoutableId::Node(node_id) => Some(node_id.clone()),
            _ => {
                let mut candidates = self.router.routing_table().neighbors();
                if !candidates.contains(sender) {
                    candidates.push(sender.clone());
                }
                self.topology.closer_id(destination, &candidates)
            }
        };

        if expected.as_ref() == Some(sender) {
            Ok(())
        }
        else {
            Err(expected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;
    use crate::message::message::{Content, MessageCode};
    use crate::message::message_builder::MessageBuilder;
    use crate::routing::connection::Connection;
    use crate::routing::routing_table::{MockRoutingTable, MockTopologyPlugin};
    use crate::test_util::connection::TrackingMockConnection;
    use crate::test_util::node::{test_bind_addr, test_node_id_from_number, test_resource_id_from_number};
    use crate::util::random::{MockRandom, MOCK_RANDOM_MUTEX};
    use bytes::Bytes;
    use rstest::rstest;
    use std::time::Duration;
    use tokio::runtime::Builder;
    use tokio::sync::Barrier;
    use tokio::time;

    fn config() -> Arc<OverlayConfig> {
        Arc::new(OverlayConfig::new(test_node_id_from_number(1), "overlay", test_bind_addr()))
    }

    fn paused_runtime() -> tokio::runtime::Runtime {
        Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build().unwrap()
    }

    fn routing_table(connections: Vec<Arc<TrackingMockConnection>>, neighbors: Vec<u16>) -> MockRoutingTable {
        let mut routing_table = MockRoutingTable::new();
        routing_table.expect_next_hops()
            .returning(move |_| connections.iter()
                .map(|c| c.clone() as Arc<dyn Connection>)
                .collect());
        routing_table.expect_neighbors()
            .returning(move || neighbors.iter()
                .map(|&n| test_node_id_from_number(n))
                .collect());
        routing_table
    }

    /// picks the candidate with the given number if it is present
    fn topology(closest: u16) -> MockTopologyPlugin {
        let mut topology = MockTopologyPlugin::new();
        topology.expect_closer_id()
            .returning(move |_, candidates| candidates.iter()
                .find(|&c| c == &test_node_id_from_number(closest))
                .cloned());
        topology
    }

    fn correlator(routing_table: MockRoutingTable, topology: MockTopologyPlugin) -> RequestCorrelator {
        let config = config();
        let router = Arc::new(Router::new(config.clone(), Arc::new(routing_table)));
        RequestCorrelator::new(config, router, Arc::new(topology))
    }

    fn request(destination: RoutableId, transaction_id: u64) -> Message {
        let mut msg = MessageBuilder::new(config())
            .request_with_options(vec![destination], Content::new(MessageCode(1), Bytes::new()), vec![]);
        msg.header.transaction_id = transaction_id;
        msg
    }

    fn answer(transaction_id: u64, body: &'static [u8]) -> Message {
        let mut msg = request(test_node_id_from_number(1).into(), transaction_id);
        msg.content = Content::new(MessageCode(2), Bytes::from_static(body));
        msg
    }

    #[test]
    fn test_end_to_end_resource_request() {
        paused_runtime().block_on(async {
            let a = Arc::new(TrackingMockConnection::failing(test_node_id_from_number(2), LinkError::UnackedFrame { sequence: 0 }));
            let b = Arc::new(TrackingMockConnection::new(test_node_id_from_number(3)));
            let correlator = correlator(routing_table(vec![a, b], vec![2, 3]), topology(3));

            let pending = correlator.submit(request(test_resource_id_from_number(100).into(), 42)).unwrap();
            assert_eq!(pending.transaction_id(), 42);
            assert_eq!(correlator.pending_count(), 1);

            time::sleep(Duration::from_millis(100)).await;
            // the partial failure does not affect the request
            assert_eq!(correlator.pending_count(), 1);

            correlator.on_answer(answer(42, b"value"), test_node_id_from_number(3));
            let result = pending.await.unwrap();
            assert_eq!(result.content.body, Bytes::from_static(b"value"));
            assert_eq!(correlator.pending_count(), 0);
        });
    }

    #[rstest]
    #[case::node_matches(RoutableId::from(test_node_id_from_number(5)), 5, None)]
    #[case::node_mismatch(RoutableId::from(test_node_id_from_number(5)), 6, Some(Some(5)))]
    #[case::resource_closest(RoutableId::from(test_resource_id_from_number(100)), 3, None)]
    #[case::resource_not_closest(RoutableId::from(test_resource_id_from_number(100)), 2, Some(Some(3)))]
    #[case::resource_sender_is_not_a_neighbor(RoutableId::from(test_resource_id_from_number(100)), 4, Some(Some(3)))]
    fn test_provenance(#[case] destination: RoutableId, #[case] sender: u16, #[case] expected_mismatch: Option<Option<u16>>) {
        paused_runtime().block_on(async move {
            let connection = Arc::new(TrackingMockConnection::new(test_node_id_from_number(2)));
            let correlator = correlator(routing_table(vec![connection], vec![2, 3]), topology(3));

            let pending = correlator.submit(request(destination, 7)).unwrap();
            correlator.on_answer(answer(7, b"x"), test_node_id_from_number(sender));

            match expected_mismatch {
                None => assert!(pending.await.is_ok()),
                Some(expected) => assert_eq!(pending.await, Err(RequestError::ProvenanceMismatch {
                    transaction_id: 7,
                    expected: expected.map(test_node_id_from_number),
                    actual: test_node_id_from_number(sender),
                })),
            }
        });
    }

    #[test]
    fn test_timeout() {
        paused_runtime().block_on(async {
            let connection = Arc::new(TrackingMockConnection::new(test_node_id_from_number(2)));
            let correlator = correlator(routing_table(vec![connection], vec![2]), topology(2));

            let start = Instant::now();
            let result = correlator.request(request(test_node_id_from_number(2).into(), 9)).await;
            assert_eq!(result, Err(RequestError::RequestTimeout(9)));
            assert!(start.elapsed() >= Duration::from_millis(5000));
            assert!(start.elapsed() < Duration::from_millis(5010));
            assert_eq!(correlator.pending_count(), 0);

            // a late answer is dropped quietly
            correlator.on_answer(answer(9, b"late"), test_node_id_from_number(2));
        });
    }

    #[test]
    fn test_no_route_fails_immediately() {
        paused_runtime().block_on(async {
            let correlator = correlator(routing_table(vec![], vec![]), topology(2));
            let result = correlator.submit(request(test_resource_id_from_number(100).into(), 9));
            assert!(matches!(result, Err(RequestError::Route(RouteError::NoRoute(_)))));
            assert_eq!(correlator.pending_count(), 0);
        });
    }

    #[test]
    fn test_total_forwarding_failure_fails_fast() {
        paused_runtime().block_on(async {
            let a = Arc::new(TrackingMockConnection::failing(test_node_id_from_number(2), LinkError::Closed)
                .with_delay(Duration::from_millis(200)));
            let correlator = correlator(routing_table(vec![a], vec![2]), topology(2));

            let start = Instant::now();
            let result = correlator.request(request(test_resource_id_from_number(100).into(), 9)).await;
            assert!(matches!(result, Err(RequestError::Route(RouteError::AllHopsFailed(failed))) if failed.len() == 1));
            assert!(start.elapsed() >= Duration::from_millis(200));
            assert!(start.elapsed() < Duration::from_millis(210));
            assert_eq!(correlator.pending_count(), 0);
        });
    }

    #[test]
    fn test_duplicate_transaction_id() {
        paused_runtime().block_on(async {
            let connection = Arc::new(TrackingMockConnection::new(test_node_id_from_number(2)));
            let correlator = correlator(routing_table(vec![connection], vec![2]), topology(2));

            let _pending = correlator.submit(request(test_node_id_from_number(2).into(), 9)).unwrap();
            assert!(matches!(
                correlator.submit(request(test_node_id_from_number(2).into(), 9)),
                Err(RequestError::DuplicateTransactionId(9)),
            ));
            assert_eq!(correlator.pending_count(), 1);
        });
    }

    #[test]
    fn test_cancel_on_drop() {
        paused_runtime().block_on(async {
            let connection = Arc::new(TrackingMockConnection::new(test_node_id_from_number(2)));
            let correlator = correlator(routing_table(vec![connection], vec![2]), topology(2));

            let pending = correlator.submit(request(test_node_id_from_number(2).into(), 9)).unwrap();
            assert_eq!(correlator.pending_count(), 1);
            pending.cancel();
            assert_eq!(correlator.pending_count(), 0);

            // the transaction id is free for reuse, and the old timer does not affect the new request
            time::sleep(Duration::from_millis(3000)).await;
            let pending = correlator.submit(request(test_node_id_from_number(2).into(), 9)).unwrap();
            time::sleep(Duration::from_millis(2500)).await;
            assert_eq!(correlator.pending_count(), 1);

            correlator.on_answer(answer(9, b"x"), test_node_id_from_number(2));
            assert!(pending.await.is_ok());
        });
    }

    #[test]
    fn test_resolved_answer_drop_does_not_cancel_successor() {
        paused_runtime().block_on(async {
            let connection = Arc::new(TrackingMockConnection::new(test_node_id_from_number(2)));
            let correlator = correlator(routing_table(vec![connection], vec![2]), topology(2));

            let first = correlator.submit(request(test_node_id_from_number(2).into(), 9)).unwrap();
            correlator.on_answer(answer(9, b"x"), test_node_id_from_number(2));

            let _second = correlator.submit(request(test_node_id_from_number(2).into(), 9)).unwrap();
            drop(first);
            assert_eq!(correlator.pending_count(), 1);
        });
    }

    #[rstest]
    #[case::answer_before_deadline(4999, true)]
    #[case::answer_after_deadline(5001, false)]
    fn test_answer_relative_to_deadline(#[case] answer_delay_millis: u64, #[case] answer_wins: bool) {
        paused_runtime().block_on(async move {
            let connection = Arc::new(TrackingMockConnection::new(test_node_id_from_number(2)));
            let correlator = correlator(routing_table(vec![connection], vec![2]), topology(2));

            let pending = correlator.submit(request(test_node_id_from_number(2).into(), 9)).unwrap();

            time::sleep(Duration::from_millis(answer_delay_millis)).await;
            assert_eq!(correlator.on_answer(answer(9, b"x"), test_node_id_from_number(2)), answer_wins);
            assert_eq!(correlator.pending_count(), 0);

            match pending.await {
                Ok(answer) => {
                    assert!(answer_wins);
                    assert_eq!(answer.content.body, Bytes::from_static(b"x"));
                }
                Err(e) => {
                    assert!(!answer_wins);
                    assert_eq!(e, RequestError::RequestTimeout(9));
                }
            }
        });
    }

    #[test]
    fn test_concurrent_answer_and_expiry_resolve_once() {
        let rt = Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build().unwrap();

        rt.block_on(async {
            let connection = Arc::new(TrackingMockConnection::new(test_node_id_from_number(2)));
            let correlator = Arc::new(correlator(routing_table(vec![connection], vec![2]), topology(2)));

            for transaction_id in 1..=100 {
                let pending = correlator.submit(request(test_node_id_from_number(2).into(), transaction_id)).unwrap();
                let entry_id = pending.entry_id;
                let barrier = Arc::new(Barrier::new(2));

                let answer_path = {
                    let correlator = correlator.clone();
                    let barrier = barrier.clone();
                    tokio::spawn(async move {
                        barrier.wait().await;
                        correlator.on_answer(answer(transaction_id, b"x"), test_node_id_from_number(2))
                    })
                };
                let expiry_path = {
                    let correlator = correlator.clone();
                    let barrier = barrier.clone();
                    tokio::spawn(async move {
                        barrier.wait().await;
                        correlator.table.on_expiry(transaction_id, entry_id)
                    })
                };

                let answer_won = answer_path.await.unwrap();
                let expiry_won = expiry_path.await.unwrap();
                assert_ne!(answer_won, expiry_won);
                assert_eq!(correlator.pending_count(), 0);

                match pending.await {
                    Ok(_) => assert!(answer_won),
                    Err(RequestError::RequestTimeout(id)) => {
                        assert!(expiry_won);
                        assert_eq!(id, transaction_id);
                    }
                    other => panic!("unexpected result {:?}", other),
                }
            }
        });
    }

    #[test]
    fn test_generated_transaction_id() {
        let _lock = MOCK_RANDOM_MUTEX.lock().unwrap_or_else(|e| e.into_inner());

        let ctx = MockRandom::next_u64_context();
        let mut values = vec![0u64, 9, 9, 11].into_iter();
        ctx.expect().returning(move || values.next().unwrap());

        paused_runtime().block_on(async {
            let connection = Arc::new(TrackingMockConnection::new(test_node_id_from_number(2)));
            let config = config();
            let router = Arc::new(Router::new(config.clone(), Arc::new(routing_table(vec![connection.clone()], vec![2]))));
            let correlator = RequestCorrelator::<MockRandom>::new_with_random(config, router, Arc::new(topology(2)));

            let first = correlator.submit(request(test_node_id_from_number(2).into(), 0)).unwrap();
            assert_eq!(first.transaction_id(), 9);
            let second = correlator.submit(request(test_node_id_from_number(2).into(), 0)).unwrap();
            assert_eq!(second.transaction_id(), 11);

            time::sleep(Duration::from_millis(10)).await;
            let sent = connection.sent_messages().await;
            let codec = crate::message::message::MessageCodec::default();
            assert_eq!(codec.decode(sent[0].clone()).unwrap().transaction_id(), 9);
            assert_eq!(codec.decode(sent[1].clone()).unwrap().transaction_id(), 11);
        });
    }
}
