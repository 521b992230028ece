use crate::{
    metrics::ControllerMetrics,
    reconcile::{Error, InstanceKey, Outcome, Reconciler, Store},
};
use futures::{prelude::*, stream::FuturesUnordered};
use kubert::lease::Claim;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};
use tokio::{
    sync::{mpsc, watch},
    task::{AbortHandle, JoinError},
    time,
};
use tracing::{debug, info, info_span, warn, Instrument};

/// A handle used to request that an instance be reconciled.
#[derive(Clone, Debug)]
pub struct Queue {
    tx: mpsc::UnboundedSender<InstanceKey>,
}

/// Determines whether this replica may write to the cluster.
#[derive(Clone, Debug)]
pub enum Leadership {
    Always,
    Lease {
        claims: watch::Receiver<Arc<Claim>>,
        claimant: String,
    },
}

/// Bounds for the delay before a failed key is retried. The delay doubles
/// with each consecutive failure of the same key.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub min: time::Duration,
    pub max: time::Duration,
}

/// Dispatches reconcile passes for queued instance keys.
///
/// A key is reconciled by at most one pass at a time. A key queued while its
/// pass is running is reconciled again once the pass completes.
pub struct Scheduler<S> {
    reconciler: Arc<Reconciler<S>>,
    queue: Queue,
    rx: mpsc::UnboundedReceiver<InstanceKey>,
    leadership: Leadership,
    max_concurrent: usize,
    backoff: Backoff,
    metrics: ControllerMetrics,
}

/// Work queue bookkeeping, kept apart from the task set so that each can be
/// borrowed independently while polling.
#[derive(Default)]
struct State {
    pending: VecDeque<InstanceKey>,
    queued: HashSet<InstanceKey>,
    in_flight: HashMap<InstanceKey, AbortHandle>,
    rerun: HashSet<InstanceKey>,
    failures: HashMap<InstanceKey, u32>,
}

pub fn queue() -> (Queue, mpsc::UnboundedReceiver<InstanceKey>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Queue { tx }, rx)
}

// === impl Queue ===

impl Queue {
    pub fn enqueue(&self, key: InstanceKey) {
        if self.tx.send(key).is_err() {
            debug!("Scheduler has stopped");
        }
    }

    /// Enqueues `key` once `delay` has elapsed.
    pub fn enqueue_after(&self, key: InstanceKey, delay: time::Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            queue.enqueue(key);
        });
    }
}

// === impl Leadership ===

impl Leadership {
    fn is_leader(&self) -> bool {
        match self {
            Self::Always => true,
            Self::Lease { claims, claimant } => claims.borrow().is_current_for(claimant),
        }
    }

    /// Completes when the lease is claimed anew; never completes otherwise.
    async fn changed(&mut self) {
        if let Self::Lease { claims, .. } = self {
            if claims.changed().await.is_ok() {
                return;
            }
        }
        future::pending::<()>().await
    }
}

// === impl Backoff ===

impl Backoff {
    pub fn delay(&self, failures: u32) -> time::Duration {
        let exp = failures.saturating_sub(1).min(31);
        self.min.saturating_mul(1 << exp).min(self.max)
    }
}

// === impl Scheduler ===

impl<S> Scheduler<S>
where
    S: Store + 'static,
{
    pub fn new(
        reconciler: Reconciler<S>,
        (queue, rx): (Queue, mpsc::UnboundedReceiver<InstanceKey>),
        leadership: Leadership,
        max_concurrent: usize,
        backoff: Backoff,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            queue,
            rx,
            leadership,
            max_concurrent: max_concurrent.max(1),
            backoff,
            metrics,
        }
    }

    /// Runs until `shutdown` is signaled, at which point in-flight passes are
    /// aborted.
    pub async fn run(self, shutdown: drain::Watch) {
        let Self {
            reconciler,
            queue,
            mut rx,
            mut leadership,
            max_concurrent,
            backoff,
            metrics,
        } = self;

        let mut state = State::default();
        let mut running = FuturesUnordered::new();

        let shutdown = shutdown.signaled();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                release = &mut shutdown => {
                    for task in state.in_flight.values() {
                        task.abort();
                    }
                    info!(aborted = state.in_flight.len(), "Scheduler shutting down");
                    drop(release);
                    return;
                }

                key = rx.recv() => match key {
                    Some(key) => state.push(key),
                    None => return,
                },

                Some((key, result)) = running.next(), if !running.is_empty() => {
                    state.in_flight.remove(&key);
                    state.complete(&key, result, &queue, &backoff, &metrics);
                    if state.rerun.remove(&key) {
                        state.push(key);
                    }
                }

                () = leadership.changed() => {
                    debug!(
                        leader = leadership.is_leader(),
                        pending = state.pending.len(),
                        "Lease changed"
                    );
                }
            }

            // Followers hold on to their keys so that they are reconciled as
            // soon as this replica acquires the lease.
            while state.in_flight.len() < max_concurrent && leadership.is_leader() {
                let Some(key) = state.pop() else { break };
                let reconciler = reconciler.clone();
                let task = tokio::spawn({
                    let key = key.clone();
                    let span = info_span!("reconcile", instance = %key);
                    async move { reconciler.reconcile(&key).await }.instrument(span)
                });
                state.in_flight.insert(key.clone(), task.abort_handle());
                running.push(async move { (key, task.await) });
            }

            metrics.set_pending(state.pending.len());
        }
    }
}

// === impl State ===

impl State {
    fn push(&mut self, key: InstanceKey) {
        if self.in_flight.contains_key(&key) {
            self.rerun.insert(key);
        } else if self.queued.insert(key.clone()) {
            self.pending.push_back(key);
        }
    }

    fn pop(&mut self) -> Option<InstanceKey> {
        let key = self.pending.pop_front()?;
        self.queued.remove(&key);
        Some(key)
    }

    fn complete(
        &mut self,
        key: &InstanceKey,
        result: Result<Result<Outcome, Error>, JoinError>,
        queue: &Queue,
        backoff: &Backoff,
        metrics: &ControllerMetrics,
    ) {
        let error = match result {
            Ok(Ok(outcome)) => {
                self.failures.remove(key);
                metrics.reconciled(&outcome);
                return;
            }
            Ok(Err(error @ Error::InstanceNotFound(_))) => {
                debug!(instance = %key, %error, "Dropping deleted instance");
                self.failures.remove(key);
                metrics.failed(&error);
                return;
            }
            Ok(Err(error)) => {
                metrics.failed(&error);
                error.to_string()
            }
            Err(error) if error.is_cancelled() => return,
            Err(error) => error.to_string(),
        };

        let failures = self.failures.entry(key.clone()).or_default();
        *failures += 1;
        let delay = backoff.delay(*failures);
        warn!(instance = %key, %error, failures = *failures, ?delay, "Reconcile failed; retrying");
        metrics.retried();
        queue.enqueue_after(key.clone(), delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::{
        ScopeInstance, ScopeInstanceSpec, ScopeTemplate, ScopeTemplateSpec, Selector,
    };
    use crate::reconcile::{
        store::{Error as StoreError, Result},
        Binding, BindingKind,
    };
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    /// Serves instances that reference an empty template, so every pass
    /// succeeds without mutations unless a failure is scripted.
    #[derive(Default)]
    struct CountingStore {
        gets: Mutex<BTreeMap<String, usize>>,
        failures: Mutex<BTreeMap<String, usize>>,
        stall: Mutex<Option<String>>,
        release: tokio::sync::Notify,
    }

    impl CountingStore {
        fn gets(&self, name: &str) -> usize {
            self.gets.lock().get(name).copied().unwrap_or_default()
        }

        fn fail(&self, name: &str, times: usize) {
            self.failures.lock().insert(name.to_string(), times);
        }
    }

    #[async_trait::async_trait]
    impl Store for CountingStore {
        async fn get_instance(&self, name: &str) -> Result<ScopeInstance> {
            *self.gets.lock().entry(name.to_string()).or_default() += 1;
            if self.stall.lock().as_deref() == Some(name) {
                self.release.notified().await;
            }
            if let Some(n) = self.failures.lock().get_mut(name) {
                if *n > 0 {
                    *n -= 1;
                    return Err(StoreError::Timeout { op: "get" });
                }
            }
            if name == "gone" {
                return Err(StoreError::NotFound {
                    kind: "ScopeInstance".to_string(),
                    name: name.to_string(),
                });
            }
            let mut instance = ScopeInstance::new(
                name,
                ScopeInstanceSpec {
                    scope_template_name: "empty".to_string(),
                    namespaces: vec![],
                },
            );
            instance.metadata.uid = Some(format!("uid-{}", name));
            Ok(instance)
        }

        async fn get_template(&self, name: &str) -> Result<ScopeTemplate> {
            let mut template = ScopeTemplate::new(name, ScopeTemplateSpec::default());
            template.metadata.uid = Some("uid-template".to_string());
            Ok(template)
        }

        async fn list_instances(&self) -> Result<Vec<ScopeInstance>> {
            Ok(vec![])
        }

        async fn list_bindings(
            &self,
            _: BindingKind,
            _: Option<&str>,
            _: &Selector,
        ) -> Result<Vec<Binding>> {
            Ok(vec![])
        }

        async fn create_binding(&self, binding: Binding) -> Result<Binding> {
            Ok(binding)
        }

        async fn update_binding(&self, binding: Binding) -> Result<Binding> {
            Ok(binding)
        }

        async fn delete_binding(&self, _: &Binding) -> Result<()> {
            Ok(())
        }
    }

    const BACKOFF: Backoff = Backoff {
        min: time::Duration::from_millis(10),
        max: time::Duration::from_millis(100),
    };

    fn spawn(
        store: Arc<CountingStore>,
        leadership: Leadership,
    ) -> (Queue, drain::Signal, tokio::task::JoinHandle<()>) {
        let (queue, rx) = queue();
        let (signal, watch) = drain::channel();
        let scheduler = Scheduler::new(
            Reconciler::new(store),
            (queue.clone(), rx),
            leadership,
            2,
            BACKOFF,
            ControllerMetrics::default(),
        );
        (queue, signal, tokio::spawn(scheduler.run(watch)))
    }

    async fn settle() {
        for _ in 0..100 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn backoff_doubles_up_to_max() {
        assert_eq!(BACKOFF.delay(1), time::Duration::from_millis(10));
        assert_eq!(BACKOFF.delay(2), time::Duration::from_millis(20));
        assert_eq!(BACKOFF.delay(4), time::Duration::from_millis(80));
        assert_eq!(BACKOFF.delay(5), time::Duration::from_millis(100));
        assert_eq!(BACKOFF.delay(u32::MAX), time::Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn reconciles_queued_keys() {
        let store = Arc::new(CountingStore::default());
        let (queue, signal, task) = spawn(store.clone(), Leadership::Always);

        queue.enqueue(InstanceKey::new("a"));
        queue.enqueue(InstanceKey::new("b"));
        settle().await;

        assert_eq!(store.gets("a"), 1);
        assert_eq!(store.gets("b"), 1);

        signal.drain().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn key_queued_during_pass_runs_again() {
        let store = Arc::new(CountingStore::default());
        *store.stall.lock() = Some("a".to_string());
        let (queue, signal, task) = spawn(store.clone(), Leadership::Always);

        queue.enqueue(InstanceKey::new("a"));
        settle().await;
        assert_eq!(store.gets("a"), 1);

        // The running pass must not be joined by a second, concurrent one.
        queue.enqueue(InstanceKey::new("a"));
        queue.enqueue(InstanceKey::new("a"));
        settle().await;
        assert_eq!(store.gets("a"), 1);

        // Once it completes, the key is reconciled exactly once more.
        *store.stall.lock() = None;
        store.release.notify_one();
        settle().await;
        assert_eq!(store.gets("a"), 2);

        signal.drain().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_pass_is_retried_after_backoff() {
        let store = Arc::new(CountingStore::default());
        store.fail("a", 2);
        let (queue, signal, task) = spawn(store.clone(), Leadership::Always);

        queue.enqueue(InstanceKey::new("a"));
        settle().await;
        assert_eq!(store.gets("a"), 1);

        time::sleep(BACKOFF.delay(1)).await;
        settle().await;
        assert_eq!(store.gets("a"), 2);

        time::sleep(BACKOFF.delay(2)).await;
        settle().await;
        assert_eq!(store.gets("a"), 3);

        // The third pass succeeded, so nothing further is scheduled.
        time::sleep(BACKOFF.max * 2).await;
        settle().await;
        assert_eq!(store.gets("a"), 3);

        signal.drain().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_instance_is_not_retried() {
        let store = Arc::new(CountingStore::default());
        let (queue, signal, task) = spawn(store.clone(), Leadership::Always);

        queue.enqueue(InstanceKey::new("gone"));
        settle().await;
        time::sleep(BACKOFF.max * 2).await;
        settle().await;
        assert_eq!(store.gets("gone"), 1);

        signal.drain().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn followers_reconcile_once_they_lead() {
        let store = Arc::new(CountingStore::default());
        let claim = |holder: &str| {
            Arc::new(Claim {
                holder: holder.to_string(),
                expiry: chrono::Utc::now() + chrono::Duration::seconds(30),
            })
        };
        let (claims_tx, claims) = watch::channel(claim("other"));
        let leadership = Leadership::Lease {
            claims,
            claimant: "me".to_string(),
        };
        let (queue, signal, task) = spawn(store.clone(), leadership);

        queue.enqueue(InstanceKey::new("a"));
        queue.enqueue(InstanceKey::new("b"));
        settle().await;
        assert_eq!(store.gets("a"), 0);
        assert_eq!(store.gets("b"), 0);

        claims_tx.send(claim("me")).unwrap();
        settle().await;
        assert_eq!(store.gets("a"), 1);
        assert_eq!(store.gets("b"), 1);

        signal.drain().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_in_flight_passes() {
        let store = Arc::new(CountingStore::default());
        *store.stall.lock() = Some("a".to_string());
        let (queue, signal, task) = spawn(store.clone(), Leadership::Always);

        queue.enqueue(InstanceKey::new("a"));
        settle().await;
        assert_eq!(store.gets("a"), 1);

        // Draining completes even though the pass would never finish.
        signal.drain().await;
        task.await.unwrap();
    }
}
