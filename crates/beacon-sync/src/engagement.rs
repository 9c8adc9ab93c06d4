//! # Engagement Batcher
//!
//! Queues notification engagement events and delivers them in batches.
//!
//! ## Actor Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Engagement Batcher                                 │
//! │                                                                         │
//! │  EngagementHandle (Clone)          EngagementBatcher (one task)         │
//! │  ┌───────────────────┐  Command   ┌────────────────────────────────┐   │
//! │  │ track(event)      │──────────►│ queue: Vec<EngagementEvent>    │   │
//! │  │ flush_now()       │  (mpsc)    │ in_flight: Option<InFlight>    │   │
//! │  │ pending()         │           │                                │   │
//! │  │ wait_idle()       │           │ select! {                      │   │
//! │  │ shutdown()        │◄──────────│   timer tick                   │   │
//! │  └───────────────────┘ (oneshot)  │   flush completion             │   │
//! │                                   │   command                      │   │
//! │                                   │ }                              │   │
//! │                                   └───────────────┬────────────────┘   │
//! │                                                   │ spawn              │
//! │                                                   ▼                    │
//! │                                   ┌────────────────────────────────┐   │
//! │                                   │ flush task                     │   │
//! │                                   │ group by callback URL          │   │
//! │                                   │ join_all(one POST per URL)     │   │
//! │                                   │ ──► Completion back to actor   │   │
//! │                                   └────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Flush Triggers
//! - an `opened` or `clicked` event is admitted
//! - the queue reaches `batch_size`
//! - the timer fires (main app only)
//!
//! Only one flush runs at a time; triggers during a flush are dropped.
//! A batch succeeds only if every URL accepts it. On failure the whole
//! batch stays queued.

use futures::future::join_all;
use std::collections::HashSet;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use beacon_core::engagement::group_by_callback;
use beacon_core::validation::validate_callback_url;
use beacon_core::{Clock, EngagementEvent, EngagementType};
use beacon_db::StateRepository;

use crate::capabilities::PlatformCapabilities;
use crate::config::SdkConfig;
use crate::emitter::SyncEventEmitter;
use crate::error::{SyncError, SyncResult};
use crate::transport::{RequestSpec, RetryingTransport};

const COMMAND_BUFFER: usize = 64;

// =============================================================================
// Configuration
// =============================================================================

/// Batching parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BatcherConfig {
    /// Maximum events per flush, and the queue length that forces one.
    pub batch_size: usize,

    /// Periodic flush interval. `None` disables the timer.
    pub interval: Option<Duration>,

    /// Delivery attempts per callback URL.
    pub max_attempts: u32,
}

impl BatcherConfig {
    /// The timer only runs where the platform allows periodic work.
    pub fn from_config(config: &SdkConfig, capabilities: &dyn PlatformCapabilities) -> Self {
        BatcherConfig {
            batch_size: config.engagement_batch_size.max(1),
            interval: capabilities
                .supports_periodic_flush()
                .then(|| config.batch_interval()),
            max_attempts: config.engagement_max_attempts.max(1),
        }
    }
}

// =============================================================================
// Outcomes and Commands
// =============================================================================

/// Result of a flush request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Another flush was already in flight.
    Skipped,
    /// Nothing to send.
    Empty,
    /// Every URL accepted its events.
    Delivered { sent: usize, remaining: usize },
    /// At least one URL failed; the whole batch is still queued.
    Failed { error: SyncError, retained: usize },
}

enum Command {
    Track {
        event: EngagementEvent,
        reply: oneshot::Sender<SyncResult<()>>,
    },
    Flush {
        reply: oneshot::Sender<FlushOutcome>,
    },
    Pending {
        reply: oneshot::Sender<Vec<EngagementEvent>>,
    },
    WaitIdle {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

struct Completion {
    batch: Vec<EngagementEvent>,
    result: SyncResult<()>,
}

struct InFlight {
    waiter: Option<oneshot::Sender<FlushOutcome>>,
}

// =============================================================================
// Handle
// =============================================================================

/// Handle for talking to a running batcher.
#[derive(Clone)]
pub struct EngagementHandle {
    command_tx: mpsc::Sender<Command>,
}

impl EngagementHandle {
    /// Queues an event. Invalid events are rejected before reaching the queue.
    pub async fn track(&self, event: EngagementEvent) -> SyncResult<()> {
        validate_callback_url(&event.callback_url)?;
        self.request(|reply| Command::Track { event, reply }).await?
    }

    /// Flushes now and waits for the outcome.
    pub async fn flush_now(&self) -> SyncResult<FlushOutcome> {
        self.request(|reply| Command::Flush { reply }).await
    }

    /// Snapshot of queued events.
    pub async fn pending(&self) -> SyncResult<Vec<EngagementEvent>> {
        self.request(|reply| Command::Pending { reply }).await
    }

    /// Resolves once no flush is in flight.
    pub async fn wait_idle(&self) -> SyncResult<()> {
        self.request(|reply| Command::WaitIdle { reply }).await
    }

    /// Stops the timer, lets an in-flight flush finish, runs a final flush
    /// and waits for the batcher to exit. Calling it again is a no-op.
    pub async fn shutdown(&self) -> SyncResult<()> {
        let (reply, rx) = oneshot::channel();
        if self
            .command_tx
            .send(Command::Shutdown { reply })
            .await
            .is_err()
        {
            return Ok(());
        }

        let _ = rx.await;
        Ok(())
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> SyncResult<T> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(make(reply))
            .await
            .map_err(|_| SyncError::ShuttingDown)?;

        rx.await
            .map_err(|_| SyncError::ChannelError("Engagement batcher dropped reply".into()))
    }
}

// =============================================================================
// Batcher
// =============================================================================

/// Owns the engagement queue. Runs as a single background task.
pub struct EngagementBatcher {
    queue: Vec<EngagementEvent>,
    in_flight: Option<InFlight>,
    idle_waiters: Vec<oneshot::Sender<()>>,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
    stopping: bool,

    store: StateRepository,
    transport: RetryingTransport,
    clock: Arc<dyn Clock>,
    capabilities: Arc<dyn PlatformCapabilities>,
    emitter: Arc<dyn SyncEventEmitter>,
    config: BatcherConfig,

    command_rx: mpsc::Receiver<Command>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
}

impl EngagementBatcher {
    /// Loads the persisted queue, drops stale events and spawns the actor.
    pub async fn start(
        store: StateRepository,
        transport: RetryingTransport,
        clock: Arc<dyn Clock>,
        capabilities: Arc<dyn PlatformCapabilities>,
        emitter: Arc<dyn SyncEventEmitter>,
        config: BatcherConfig,
    ) -> SyncResult<EngagementHandle> {
        let mut queue = store.pending_events().await?;
        let loaded = queue.len();
        let now = clock.now();
        queue.retain(|event| !event.is_stale_at(now));

        if queue.len() != loaded {
            info!(
                dropped = loaded - queue.len(),
                "Dropped stale engagement events on load"
            );
            store.set_pending_events(&queue).await?;
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        let batcher = EngagementBatcher {
            queue,
            in_flight: None,
            idle_waiters: Vec::new(),
            shutdown_waiters: Vec::new(),
            stopping: false,
            store,
            transport,
            clock,
            capabilities,
            emitter,
            config,
            command_rx,
            completion_tx,
            completion_rx,
        };

        tokio::spawn(batcher.run());

        Ok(EngagementHandle { command_tx })
    }

    async fn run(mut self) {
        info!(
            queued = self.queue.len(),
            batch_size = self.config.batch_size,
            interval = ?self.config.interval,
            "Engagement batcher starting"
        );

        let mut ticker = self.config.interval.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut commands_open = true;

        loop {
            if self.stopping && self.in_flight.is_none() {
                break;
            }

            tokio::select! {
                _ = next_tick(&mut ticker) => {
                    debug!("Engagement timer fired");
                    self.start_flush(None).await;
                }

                Some(completion) = self.completion_rx.recv() => {
                    self.complete(completion).await;
                }

                command = self.command_rx.recv(), if commands_open => match command {
                    Some(Command::Shutdown { reply }) => {
                        ticker = None;
                        self.stopping = true;
                        self.shutdown_waiters.push(reply);
                    }
                    Some(command) => self.handle(command).await,
                    None => {
                        debug!("All engagement handles dropped");
                        commands_open = false;
                        ticker = None;
                        self.stopping = true;
                    }
                },
            }
        }

        self.command_rx.close();
        while let Ok(command) = self.command_rx.try_recv() {
            self.reject(command);
        }

        self.final_flush().await;

        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }
        info!(queued = self.queue.len(), "Engagement batcher stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Track { event, reply } => {
                let result = self.admit(event).await;
                let _ = reply.send(result);
            }
            Command::Flush { reply } => {
                if self.stopping {
                    let _ = reply.send(FlushOutcome::Skipped);
                } else {
                    self.start_flush(Some(reply)).await;
                }
            }
            Command::Pending { reply } => {
                let _ = reply.send(self.queue.clone());
            }
            Command::WaitIdle { reply } => {
                if self.in_flight.is_none() {
                    let _ = reply.send(());
                } else {
                    self.idle_waiters.push(reply);
                }
            }
            Command::Shutdown { .. } => {}
        }
    }

    /// Answers commands that arrive after shutdown began.
    fn reject(&mut self, command: Command) {
        match command {
            Command::Track { reply, .. } => {
                let _ = reply.send(Err(SyncError::ShuttingDown));
            }
            Command::Flush { reply } => {
                let _ = reply.send(FlushOutcome::Skipped);
            }
            Command::Pending { reply } => {
                let _ = reply.send(self.queue.clone());
            }
            Command::WaitIdle { reply } => {
                let _ = reply.send(());
            }
            Command::Shutdown { reply } => self.shutdown_waiters.push(reply),
        }
    }

    async fn admit(&mut self, event: EngagementEvent) -> SyncResult<()> {
        if self.stopping {
            return Err(SyncError::ShuttingDown);
        }

        let high_priority = event.event_type.is_high_priority();
        debug!(
            event_type = %event.event_type,
            notification_id = ?event.notification_id,
            "Queued engagement event"
        );

        self.queue.push(event);
        self.persist().await;

        if high_priority {
            self.start_flush(None).await;
        } else if self.queue.len() >= self.config.batch_size {
            debug!(queued = self.queue.len(), "Batch size reached");
            self.start_flush(None).await;
        }

        Ok(())
    }

    /// Selects the next batch, pruning events that have aged out.
    async fn select_batch(&mut self) -> Vec<EngagementEvent> {
        let now = self.clock.now();
        let before = self.queue.len();
        self.queue.retain(|event| !event.is_stale_at(now));
        if self.queue.len() != before {
            debug!(dropped = before - self.queue.len(), "Dropped stale engagement events");
            self.persist().await;
        }

        let take = self.queue.len().min(self.config.batch_size);
        self.queue[..take].to_vec()
    }

    async fn start_flush(&mut self, waiter: Option<oneshot::Sender<FlushOutcome>>) {
        if self.in_flight.is_some() {
            debug!("Flush already in flight");
            if let Some(waiter) = waiter {
                let _ = waiter.send(FlushOutcome::Skipped);
            }
            return;
        }

        let batch = self.select_batch().await;
        if batch.is_empty() {
            if let Some(waiter) = waiter {
                let _ = waiter.send(FlushOutcome::Empty);
            }
            return;
        }

        debug!(events = batch.len(), "Starting engagement flush");
        self.in_flight = Some(InFlight { waiter });

        let transport = self.transport.clone();
        let completion_tx = self.completion_tx.clone();
        let max_attempts = self.config.max_attempts;
        let guard = self.capabilities.begin_background_task("engagement-flush");

        tokio::spawn(async move {
            let result = deliver(&transport, &batch, max_attempts).await;
            drop(guard);
            let _ = completion_tx.send(Completion { batch, result });
        });
    }

    async fn complete(&mut self, completion: Completion) {
        let waiter = self.in_flight.take().and_then(|flight| flight.waiter);
        let outcome = self.apply(completion).await;

        let more_due = matches!(outcome, FlushOutcome::Delivered { sent, .. } if sent > 0)
            && self.queue.len() >= self.config.batch_size
            && !self.stopping;

        if let Some(waiter) = waiter {
            let _ = waiter.send(outcome);
        }
        for waiter in self.idle_waiters.drain(..) {
            let _ = waiter.send(());
        }

        if more_due {
            self.start_flush(None).await;
        }
    }

    /// Removes delivered events, or keeps everything on failure.
    async fn apply(&mut self, completion: Completion) -> FlushOutcome {
        let Completion { batch, result } = completion;

        match result {
            Ok(()) => {
                let delivered: HashSet<(&str, EngagementType)> =
                    batch.iter().filter_map(EngagementEvent::removal_key).collect();

                let before = self.queue.len();
                self.queue.retain(|event| match event.removal_key() {
                    Some(key) => !delivered.contains(&key),
                    None => true,
                });
                let removed = before - self.queue.len();
                if removed > 0 {
                    self.persist().await;
                }

                let remaining = self.queue.len();
                info!(sent = batch.len(), removed, remaining, "Engagement batch delivered");
                self.emitter.emit_engagement_flushed(batch.len(), remaining);

                FlushOutcome::Delivered {
                    sent: batch.len(),
                    remaining,
                }
            }
            Err(error) => {
                warn!(
                    error = %error,
                    events = batch.len(),
                    "Engagement batch failed, keeping events queued"
                );
                self.emitter.emit_error(&error);

                FlushOutcome::Failed {
                    error,
                    retained: self.queue.len(),
                }
            }
        }
    }

    async fn final_flush(&mut self) {
        let batch = self.select_batch().await;
        if batch.is_empty() {
            return;
        }

        let _guard = self
            .capabilities
            .begin_background_task("engagement-final-flush");
        info!(events = batch.len(), "Final engagement flush");

        let result = deliver(&self.transport, &batch, self.config.max_attempts).await;
        self.apply(Completion { batch, result }).await;
    }

    async fn persist(&self) {
        if let Err(e) = self.store.set_pending_events(&self.queue).await {
            error!(error = %e, "Failed to persist engagement queue");
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending::<()>().await,
    }
}

/// Sends one request per callback URL concurrently. Any failure fails the batch.
async fn deliver(
    transport: &RetryingTransport,
    batch: &[EngagementEvent],
    max_attempts: u32,
) -> SyncResult<()> {
    let groups = group_by_callback(batch);

    let calls = groups.iter().map(|(url, events)| async move {
        let request = RequestSpec::post_json(url, events)?;
        transport.execute(&request, max_attempts).await.map(|_| ())
    });

    join_all(calls).await.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{MainAppCapabilities, NoCapabilities};
    use crate::emitter::recording::{Recorded, RecordingEmitter};
    use crate::transport::fake::{Reply, ScriptedClient};
    use beacon_core::ManualClock;
    use beacon_db::{Database, DbConfig};
    use chrono::Utc;

    const URL_A: &str = "https://a.example.com/engage";
    const URL_B: &str = "https://b.example.com/engage";

    struct Fixture {
        db: Database,
        client: Arc<ScriptedClient>,
        clock: Arc<ManualClock>,
        emitter: Arc<RecordingEmitter>,
    }

    impl Fixture {
        async fn new() -> Self {
            Self::with_client(ScriptedClient::new()).await
        }

        async fn with_client(client: ScriptedClient) -> Self {
            Fixture {
                db: Database::new(DbConfig::in_memory()).await.unwrap(),
                client: Arc::new(client),
                clock: Arc::new(ManualClock::new(Utc::now())),
                emitter: Arc::new(RecordingEmitter::default()),
            }
        }

        async fn start(&self, config: BatcherConfig) -> EngagementHandle {
            self.start_with(config, Arc::new(NoCapabilities)).await
        }

        async fn start_with(
            &self,
            config: BatcherConfig,
            capabilities: Arc<dyn PlatformCapabilities>,
        ) -> EngagementHandle {
            EngagementBatcher::start(
                self.db.state(),
                RetryingTransport::new(self.client.clone()),
                self.clock.clone(),
                capabilities,
                self.emitter.clone(),
                config,
            )
            .await
            .unwrap()
        }

        fn event(&self, kind: EngagementType, url: &str, id: &str) -> EngagementEvent {
            EngagementEvent::new(kind, url, Some(id.to_string()), self.clock.now()).unwrap()
        }

        fn sent_ids(&self) -> Vec<String> {
            self.client
                .requests()
                .iter()
                .flat_map(|request| {
                    let events: Vec<EngagementEvent> =
                        serde_json::from_slice(&request.body).unwrap();
                    events.into_iter().filter_map(|e| e.notification_id)
                })
                .collect()
        }
    }

    fn no_timer(batch_size: usize) -> BatcherConfig {
        BatcherConfig {
            batch_size,
            interval: None,
            max_attempts: 1,
        }
    }

    #[tokio::test]
    async fn test_high_priority_flushes_below_batch_size() {
        let fx = Fixture::new().await;
        let handle = fx
            .start(BatcherConfig {
                interval: Some(Duration::from_secs(3600)),
                ..no_timer(10)
            })
            .await;

        handle
            .track(fx.event(EngagementType::Clicked, URL_A, "n1"))
            .await
            .unwrap();
        handle.wait_idle().await.unwrap();

        assert_eq!(fx.client.calls(), 1);
        assert!(handle.pending().await.unwrap().is_empty());
        assert_eq!(
            fx.emitter.events(),
            vec![Recorded::EngagementFlushed { sent: 1, remaining: 0 }]
        );
    }

    #[tokio::test]
    async fn test_low_priority_waits_for_batch_size() {
        let fx = Fixture::new().await;
        let handle = fx.start(no_timer(10)).await;

        for i in 0..15 {
            let id = format!("n{}", i);
            handle
                .track(fx.event(EngagementType::Delivered, URL_A, &id))
                .await
                .unwrap();
            if i < 9 {
                assert_eq!(fx.client.calls(), 0);
            }
        }
        handle.wait_idle().await.unwrap();

        assert_eq!(fx.client.calls(), 1);
        let sent = fx.sent_ids();
        assert_eq!(sent.len(), 10);
        assert_eq!(sent[0], "n0");
        assert_eq!(sent[9], "n9");

        let pending = handle.pending().await.unwrap();
        assert_eq!(pending.len(), 5);
        assert_eq!(pending[0].notification_id.as_deref(), Some("n10"));
        assert_eq!(fx.db.state().pending_events().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_every_event() {
        let fx = Fixture::with_client(ScriptedClient::with_fallback(Reply::status(500))).await;
        let handle = fx.start(no_timer(10)).await;

        for id in ["n1", "n2", "n3"] {
            handle
                .track(fx.event(EngagementType::Delivered, URL_A, id))
                .await
                .unwrap();
        }

        let outcome = handle.flush_now().await.unwrap();

        assert!(matches!(
            outcome,
            FlushOutcome::Failed { error: SyncError::ServerError { code: 500, .. }, retained: 3 }
        ));
        assert_eq!(handle.pending().await.unwrap().len(), 3);
        assert_eq!(fx.db.state().pending_events().await.unwrap().len(), 3);
        assert!(matches!(fx.emitter.events().last(), Some(Recorded::Error(_))));
    }

    #[tokio::test]
    async fn test_partial_url_failure_keeps_whole_batch() {
        let fx = Fixture::new().await;
        let handle = fx.start(no_timer(10)).await;

        handle
            .track(fx.event(EngagementType::Delivered, URL_A, "n1"))
            .await
            .unwrap();
        handle
            .track(fx.event(EngagementType::Delivered, URL_B, "n2"))
            .await
            .unwrap();

        fx.client.fail_url(URL_B);
        let outcome = handle.flush_now().await.unwrap();
        assert!(matches!(outcome, FlushOutcome::Failed { retained: 2, .. }));
        assert_eq!(fx.client.calls(), 2);

        fx.client.heal_url(URL_B);
        let outcome = handle.flush_now().await.unwrap();
        assert_eq!(outcome, FlushOutcome::Delivered { sent: 2, remaining: 0 });

        let urls: Vec<String> = fx.client.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(urls.iter().filter(|url| *url == URL_A).count(), 2);
        assert_eq!(urls.iter().filter(|url| *url == URL_B).count(), 2);
    }

    #[tokio::test]
    async fn test_stale_events_dropped_on_load() {
        let fx = Fixture::new().await;
        let stale = EngagementEvent::new(
            EngagementType::Delivered,
            URL_A,
            Some("old".into()),
            fx.clock.now() - chrono::Duration::days(8),
        )
        .unwrap();
        let fresh = fx.event(EngagementType::Delivered, URL_A, "new");
        fx.db
            .state()
            .set_pending_events(&[stale, fresh.clone()])
            .await
            .unwrap();

        let handle = fx.start(no_timer(10)).await;

        assert_eq!(handle.pending().await.unwrap(), vec![fresh.clone()]);
        assert_eq!(fx.db.state().pending_events().await.unwrap(), vec![fresh]);

        handle.flush_now().await.unwrap();
        assert_eq!(fx.sent_ids(), vec!["new".to_string()]);
    }

    #[tokio::test]
    async fn test_events_aging_out_are_never_sent() {
        let fx = Fixture::new().await;
        let handle = fx.start(no_timer(10)).await;

        handle
            .track(fx.event(EngagementType::Delivered, URL_A, "n1"))
            .await
            .unwrap();
        fx.clock.advance(chrono::Duration::days(8));

        assert_eq!(handle.flush_now().await.unwrap(), FlushOutcome::Empty);
        assert_eq!(fx.client.calls(), 0);
        assert!(fx.db.state().pending_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_stored_event_does_not_lose_the_rest() {
        let fx = Fixture::new().await;
        let kept = fx.event(EngagementType::Delivered, URL_A, "n1");
        let stored = serde_json::json!([kept, {"type": "dismissed"}]);
        fx.db
            .kv()
            .set(beacon_db::keys::PENDING_EVENTS, &stored.to_string())
            .await
            .unwrap();

        let handle = fx.start(no_timer(10)).await;
        assert_eq!(handle.pending().await.unwrap(), vec![kept.clone()]);

        let next = fx.event(EngagementType::Delivered, URL_A, "n2");
        handle.track(next.clone()).await.unwrap();

        assert_eq!(
            fx.db.state().pending_events().await.unwrap(),
            vec![kept, next]
        );
    }

    #[tokio::test]
    async fn test_timer_flushes_regardless_of_queue_size() {
        let fx = Fixture::new().await;
        let handle = fx
            .start(BatcherConfig {
                interval: Some(Duration::from_millis(50)),
                ..no_timer(10)
            })
            .await;

        handle
            .track(fx.event(EngagementType::Delivered, URL_A, "n1"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.wait_idle().await.unwrap();

        assert_eq!(fx.client.calls(), 1);
        assert!(handle.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_events_without_notification_id_stay_queued() {
        let fx = Fixture::new().await;
        let handle = fx.start(no_timer(10)).await;

        let anonymous =
            EngagementEvent::new(EngagementType::Delivered, URL_A, None, fx.clock.now()).unwrap();
        handle.track(anonymous).await.unwrap();

        let outcome = handle.flush_now().await.unwrap();

        assert_eq!(outcome, FlushOutcome::Delivered { sent: 1, remaining: 1 });
        assert_eq!(handle.pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_flush_while_sending_is_skipped() {
        let fx =
            Fixture::with_client(ScriptedClient::new().with_latency(Duration::from_millis(200)))
                .await;
        let handle = fx.start(no_timer(10)).await;

        handle
            .track(fx.event(EngagementType::Opened, URL_A, "n1"))
            .await
            .unwrap();
        handle
            .track(fx.event(EngagementType::Clicked, URL_A, "n2"))
            .await
            .unwrap();

        assert_eq!(handle.flush_now().await.unwrap(), FlushOutcome::Skipped);
        handle.wait_idle().await.unwrap();

        assert_eq!(fx.client.calls(), 1);
        assert_eq!(fx.sent_ids(), vec!["n1".to_string()]);
        assert_eq!(handle.pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_waits_and_runs_final_flush() {
        let fx =
            Fixture::with_client(ScriptedClient::new().with_latency(Duration::from_millis(100)))
                .await;
        let caps = MainAppCapabilities::new();
        let handle = fx.start_with(no_timer(10), Arc::new(caps.clone())).await;

        handle
            .track(fx.event(EngagementType::Clicked, URL_A, "n1"))
            .await
            .unwrap();
        handle
            .track(fx.event(EngagementType::Delivered, URL_A, "n2"))
            .await
            .unwrap();

        handle.shutdown().await.unwrap();

        assert_eq!(fx.client.calls(), 2);
        assert_eq!(fx.sent_ids(), vec!["n1".to_string(), "n2".to_string()]);
        assert!(fx.db.state().pending_events().await.unwrap().is_empty());
        assert_eq!(caps.active_background_tasks(), 0);

        let late = fx.event(EngagementType::Clicked, URL_A, "n3");
        assert_eq!(handle.track(late).await, Err(SyncError::ShuttingDown));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_event_rejected_before_queueing() {
        let fx = Fixture::new().await;
        let handle = fx.start(no_timer(10)).await;

        let mut event = fx.event(EngagementType::Clicked, URL_A, "n1");
        event.callback_url = String::new();

        assert!(matches!(
            handle.track(event).await,
            Err(SyncError::MissingRequiredField(_))
        ));
        assert!(handle.pending().await.unwrap().is_empty());
        assert_eq!(fx.client.calls(), 0);
    }

    #[tokio::test]
    async fn test_delivery_payload_shape() {
        let fx = Fixture::new().await;
        let handle = fx.start(no_timer(10)).await;

        let event = fx
            .event(EngagementType::Opened, URL_A, "n1")
            .with_metadata("target", "promo");
        handle.track(event).await.unwrap();
        handle.wait_idle().await.unwrap();

        let request = &fx.client.requests()[0];
        assert_eq!(request.url, URL_A);
        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        let first = &body.as_array().unwrap()[0];
        assert_eq!(first["type"], "opened");
        assert_eq!(first["callbackUrl"], URL_A);
        assert_eq!(first["notificationId"], "n1");
        assert_eq!(first["metadata"]["target"], "promo");
        assert!(first["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_config_disables_timer_without_periodic_support() {
        let config = SdkConfig::default();

        let main = BatcherConfig::from_config(&config, &MainAppCapabilities::new());
        assert_eq!(main.interval, Some(Duration::from_secs(30)));
        assert_eq!(main.batch_size, 10);
        assert_eq!(main.max_attempts, 2);

        let extension = BatcherConfig::from_config(&config, &NoCapabilities);
        assert_eq!(extension.interval, None);
    }
}
