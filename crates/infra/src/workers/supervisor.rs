//! Reconnection supervisor.
//!
//! Owns the broker connection lifecycle: connects, starts a dispatch loop on
//! the resulting stream, watches the connection's close signal and, once the
//! connection is gone, stops that loop before connecting again. At most one
//! dispatch loop runs at any time.
//!
//! ```text
//!   Connecting ──ok──▶ AwaitingPriming ──priming──▶ Watching
//!       ▲  │                                           │
//!       │  └─err: backoff, retry                       │
//!       └────── close signal / loop exit: stop loop ◀──┘
//! ```

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::{
    BrokerTopology, CloseReason, CloseSignal, Connector, PrimingReceiver, PrimingSender,
    priming_channel,
};

use super::dispatch_worker::{DispatchContext, DispatchExit, DispatchHandle, DispatchWorker};

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// First delay after a failed connect; doubles on each further failure.
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// How long a stopping dispatch loop may take before it is aborted.
    pub stop_grace: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            backoff_initial: Duration::from_millis(250),
            backoff_max: Duration::from_secs(30),
            stop_grace: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            next: initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.next = self.initial;
    }
}

enum State {
    Connecting,
    AwaitingPriming(DispatchHandle),
    Watching(DispatchHandle, CloseSignal),
}

/// What woke the supervisor up while watching a connection.
enum Wake {
    Shutdown,
    Closed(CloseReason),
    LoopExited(DispatchExit),
}

pub struct Supervisor<C> {
    connector: C,
    topology: BrokerTopology,
    ctx: DispatchContext,
    settings: SupervisorSettings,
    generation: u64,
}

impl<C: Connector + 'static> Supervisor<C> {
    pub fn new(
        connector: C,
        topology: BrokerTopology,
        ctx: DispatchContext,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            connector,
            topology,
            ctx,
            settings,
            generation: 0,
        }
    }

    /// Run on a background task until `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Supervise until `shutdown` is cancelled; never gives up on its own.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let (primer, mut primings) = priming_channel();
        let mut backoff = Backoff::new(self.settings.backoff_initial, self.settings.backoff_max);
        let mut state = State::Connecting;

        loop {
            state = match state {
                State::Connecting => {
                    match self.connect(&primer, &mut backoff, &shutdown).await {
                        Some(handle) => State::AwaitingPriming(handle),
                        None => break,
                    }
                }
                State::AwaitingPriming(handle) => {
                    match self.await_priming(&mut primings, &shutdown).await {
                        Some(signal) => {
                            info!(generation = handle.generation(), "watching broker connection");
                            State::Watching(handle, signal)
                        }
                        None => {
                            self.stop_loop(handle).await;
                            break;
                        }
                    }
                }
                State::Watching(mut handle, signal) => {
                    let wake = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => Wake::Shutdown,
                        reason = signal.closed() => Wake::Closed(reason),
                        exit = handle.finished() => Wake::LoopExited(exit),
                    };
                    match wake {
                        Wake::Shutdown => {
                            self.stop_loop(handle).await;
                            break;
                        }
                        Wake::Closed(reason) => {
                            warn!(%reason, generation = handle.generation(), "broker connection closed");
                        }
                        Wake::LoopExited(exit) => {
                            warn!(?exit, generation = handle.generation(), "dispatch loop exited on its own");
                        }
                    }
                    self.stop_loop(handle).await;
                    State::Connecting
                }
            };
        }
        info!("supervisor shut down");
    }

    /// Connect until it works, then start a dispatch loop on the stream.
    ///
    /// Returns `None` when shut down first.
    async fn connect(
        &mut self,
        primer: &PrimingSender,
        backoff: &mut Backoff,
        shutdown: &CancellationToken,
    ) -> Option<DispatchHandle> {
        loop {
            let attempt = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                attempt = self.connector.connect(&self.topology, primer) => attempt,
            };

            match attempt {
                Ok(stream) => {
                    backoff.reset();
                    self.generation += 1;
                    info!(generation = self.generation, "connected to broker; starting dispatch loop");
                    return Some(DispatchWorker::spawn(
                        self.generation,
                        &self.topology.consumer_tag,
                        stream,
                        self.ctx.clone(),
                    ));
                }
                Err(err) => {
                    let delay = backoff.next_delay();
                    warn!(
                        error = %err,
                        retry_in_ms = delay.as_millis() as u64,
                        "connecting to broker failed"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn await_priming(
        &self,
        primings: &mut PrimingReceiver,
        shutdown: &CancellationToken,
    ) -> Option<CloseSignal> {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            priming = primings.recv() => priming.map(|p| p.into_signal()),
        }
    }

    async fn stop_loop(&self, handle: DispatchHandle) {
        let generation = handle.generation();
        let exit = handle.stop(self.settings.stop_grace).await;
        info!(generation, ?exit, "dispatch loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::broker::MemoryBroker;
    use crate::notify::RecordingNotifier;
    use crate::store::InMemoryJobEventStore;
    use crate::test_support::{body, executing, topology, wait_until};

    struct Harness {
        broker: MemoryBroker,
        store: Arc<InMemoryJobEventStore>,
        shutdown: CancellationToken,
        task: JoinHandle<()>,
    }

    fn start(broker: MemoryBroker) -> Harness {
        let store = Arc::new(InMemoryJobEventStore::new());
        let ctx = DispatchContext::new(store.clone(), Arc::new(RecordingNotifier::new()));
        let settings = SupervisorSettings {
            backoff_initial: Duration::from_millis(1),
            backoff_max: Duration::from_millis(4),
            stop_grace: Duration::from_secs(1),
        };
        let shutdown = CancellationToken::new();
        let task = Supervisor::new(broker.clone(), topology(), ctx, settings).spawn(shutdown.clone());
        Harness {
            broker,
            store,
            shutdown,
            task,
        }
    }

    impl Harness {
        async fn shut_down(self) -> MemoryBroker {
            self.shutdown.cancel();
            tokio::time::timeout(Duration::from_secs(2), self.task)
                .await
                .expect("supervisor did not shut down")
                .unwrap();
            self.broker
        }
    }

    #[tokio::test]
    async fn reconnects_after_close_error() {
        let h = start(MemoryBroker::new());
        wait_until("first session", || h.broker.sessions_opened() == 1).await;
        h.broker.publish(body(&executing(1), "before")).unwrap();
        wait_until("first event stored", || h.store.job_events().len() == 1).await;

        h.broker.kill_connection(Some("CONNECTION_FORCED - broker shutdown"));
        wait_until("second session", || h.broker.sessions_opened() == 2).await;
        h.broker.publish(body(&executing(1), "after")).unwrap();
        wait_until("second event stored", || h.store.job_events().len() == 2).await;

        assert_eq!(h.broker.max_active_streams(), 1);
        assert_eq!(h.broker.topologies(), vec![topology(), topology()]);
        let broker = h.shut_down().await;
        assert_eq!(broker.active_streams(), 0);
    }

    #[tokio::test]
    async fn reconnects_when_close_notifier_is_dropped() {
        let h = start(MemoryBroker::new());
        wait_until("first session", || h.broker.sessions_opened() == 1).await;

        h.broker.kill_connection(None);
        wait_until("second session", || h.broker.sessions_opened() == 2).await;

        assert_eq!(h.broker.max_active_streams(), 1);
        h.shut_down().await;
    }

    #[tokio::test]
    async fn reconnects_when_delivery_stream_ends() {
        let h = start(MemoryBroker::new());
        wait_until("first session", || h.broker.sessions_opened() == 1).await;

        // Close notifier untouched: only the loop exiting reveals the drop.
        h.broker.end_stream();
        wait_until("second session", || h.broker.sessions_opened() == 2).await;
        assert_eq!(h.broker.max_active_streams(), 1);

        h.broker.publish(body(&executing(9), "resumed")).unwrap();
        wait_until("event stored", || h.store.job_events().len() == 1).await;
        h.shut_down().await;
    }

    #[tokio::test]
    async fn retries_failed_connects_without_starting_a_loop() {
        let broker = MemoryBroker::new();
        broker.fail_next_connects(3);
        let h = start(broker);

        wait_until("session after retries", || h.broker.sessions_opened() == 1).await;
        assert_eq!(h.broker.connect_attempts(), 4);
        assert_eq!(h.broker.max_active_streams(), 1);

        h.broker.publish(body(&executing(3), "x")).unwrap();
        wait_until("event stored", || h.store.job_events().len() == 1).await;
        h.shut_down().await;
    }

    #[tokio::test]
    async fn shutdown_interrupts_connect_retries() {
        let broker = MemoryBroker::new();
        broker.fail_next_connects(usize::MAX);
        let h = start(broker);

        wait_until("a few attempts", || h.broker.connect_attempts() >= 3).await;
        let broker = h.shut_down().await;
        assert_eq!(broker.sessions_opened(), 0);
    }

    #[tokio::test]
    async fn repeated_drops_keep_one_loop() {
        let h = start(MemoryBroker::new());
        for round in 1..=5 {
            wait_until("session", || h.broker.sessions_opened() == round).await;
            h.broker.kill_connection(Some("heartbeat timeout"));
        }
        wait_until("final session", || h.broker.sessions_opened() == 6).await;

        assert_eq!(h.broker.max_active_streams(), 1);
        h.shut_down().await;
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(250), Duration::from_secs(1));
        let delays: Vec<u128> = (0..5).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![250, 500, 1000, 1000, 1000]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
    }
}
