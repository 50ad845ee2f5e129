//! Work queues and the worker pool.
//!
//! Each queue is an unbounded channel drained by a configurable
//! number of workers; the shared receiver sits behind an async mutex
//! so any free worker picks up the next message. Coordination happens
//! only through the store and these queues, never through shared
//! memory.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::api::ApiClient;
use crate::config::Config;
use crate::error::Error;
use crate::pipeline::messages::{
    CheckOrcidMessage, CheckUpdatesMessage, ClaimsMessage, EnrichedClaim,
};
use crate::pipeline::tasks;
use crate::store::ProfileStore;

/// Sender half of one queue. Every send registers the message with
/// the shared in-flight counter so `run_until_idle` can tell when the
/// pipeline drained.
pub struct QueueSender<T> {
    tx: UnboundedSender<T>,
    pending: Arc<AtomicUsize>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl<T: Send + 'static> QueueSender<T> {
    /// Enqueues a message. Returns false when the queue shut down.
    pub fn send(&self, message: T) -> bool {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(message).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Enqueues a message after a delay (self-reschedules, backoff).
    /// The slot counts as pending from scheduling time; the worker
    /// that eventually processes the message releases it.
    pub fn send_after(&self, delay: Duration, message: T) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let tx = self.tx.clone();
        let pending = self.pending.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(message).is_err() {
                pending.fetch_sub(1, Ordering::SeqCst);
            }
        });
    }
}

/// The four named queues of the coordinator.
pub struct Queues {
    pub check_updates: QueueSender<CheckUpdatesMessage>,
    pub check_orcidid: QueueSender<CheckOrcidMessage>,
    pub match_claim: QueueSender<EnrichedClaim>,
    pub output_results: QueueSender<ClaimsMessage>,
}

impl Clone for Queues {
    fn clone(&self) -> Self {
        Self {
            check_updates: self.check_updates.clone(),
            check_orcidid: self.check_orcidid.clone(),
            match_claim: self.match_claim.clone(),
            output_results: self.output_results.clone(),
        }
    }
}

/// Receiver halves of the four queues, consumed by the worker pools
/// (or inspected directly by tests).
pub struct QueueReceivers {
    pub check_updates: UnboundedReceiver<CheckUpdatesMessage>,
    pub check_orcidid: UnboundedReceiver<CheckOrcidMessage>,
    pub match_claim: UnboundedReceiver<EnrichedClaim>,
    pub output_results: UnboundedReceiver<ClaimsMessage>,
}

impl Queues {
    /// Builds the four queues over a shared in-flight counter.
    pub fn new(pending: Arc<AtomicUsize>) -> (Queues, QueueReceivers) {
        let (cu_tx, cu_rx) = mpsc::unbounded_channel();
        let (co_tx, co_rx) = mpsc::unbounded_channel();
        let (mc_tx, mc_rx) = mpsc::unbounded_channel();
        let (or_tx, or_rx) = mpsc::unbounded_channel();

        let queues = Queues {
            check_updates: QueueSender {
                tx: cu_tx,
                pending: pending.clone(),
            },
            check_orcidid: QueueSender {
                tx: co_tx,
                pending: pending.clone(),
            },
            match_claim: QueueSender {
                tx: mc_tx,
                pending: pending.clone(),
            },
            output_results: QueueSender {
                tx: or_tx,
                pending,
            },
        };
        let receivers = QueueReceivers {
            check_updates: cu_rx,
            check_orcidid: co_rx,
            match_claim: mc_rx,
            output_results: or_rx,
        };
        (queues, receivers)
    }
}

/// Everything a task handler needs.
pub struct PipelineContext {
    pub store: Arc<ProfileStore>,
    pub api: Arc<dyn ApiClient>,
    pub config: Arc<Config>,
    pub queues: Queues,
}

/// The running coordinator: four worker pools over the four queues.
pub struct Pipeline {
    context: Arc<PipelineContext>,
    pending: Arc<AtomicUsize>,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Builds the queues and starts the worker pools.
    pub fn start(store: Arc<ProfileStore>, api: Arc<dyn ApiClient>, config: Arc<Config>) -> Self {
        let pending = Arc::new(AtomicUsize::new(0));
        let (queues, receivers) = Queues::new(pending.clone());

        let context = Arc::new(PipelineContext {
            store,
            api,
            config: config.clone(),
            queues,
        });

        let mut workers = Vec::new();

        // one poller is enough; its work is a single HTTP round-trip
        workers.extend(spawn_workers(
            "check-updates",
            receivers.check_updates,
            1,
            pending.clone(),
            context.clone(),
            |ctx, msg| async move {
                tasks::task_check_orcid_updates(&ctx, msg).await.map(|_| ())
            },
        ));
        workers.extend(spawn_workers(
            "check-orcidid",
            receivers.check_orcidid,
            config.workers_per_queue,
            pending.clone(),
            context.clone(),
            |ctx, msg| async move {
                tasks::task_index_orcid_profile(&ctx, msg).await.map(|_| ())
            },
        ));
        workers.extend(spawn_workers(
            "match-claim",
            receivers.match_claim,
            config.workers_per_queue,
            pending.clone(),
            context.clone(),
            |ctx, msg| async move { tasks::task_match_claim(&ctx, msg).await.map(|_| ()) },
        ));
        workers.extend(spawn_workers(
            "output-results",
            receivers.output_results,
            config.workers_per_queue,
            pending.clone(),
            context.clone(),
            |ctx, msg| async move { tasks::task_output_results(&ctx, msg).await },
        ));

        Self {
            context,
            pending,
            workers,
        }
    }

    pub fn queues(&self) -> &Queues {
        &self.context.queues
    }

    pub fn context(&self) -> Arc<PipelineContext> {
        self.context.clone()
    }

    /// Runs the pipeline as a service: seed the update poller and
    /// process until shutdown is requested.
    pub async fn run_service(&self) -> crate::error::Result<()> {
        info!("starting update poller");
        self.context
            .queues
            .check_updates
            .send(CheckUpdatesMessage::default());

        tokio::signal::ctrl_c().await.map_err(|e| {
            Error::Config(format!("cannot install shutdown handler: {}", e))
        })?;
        info!("shutdown requested, draining queues");
        Ok(())
    }

    /// Waits until every enqueued message has been processed. Used by
    /// the maintenance commands, which enqueue a finite amount of work.
    pub async fn run_until_idle(&self) {
        loop {
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Stops the worker pools.
    pub fn shutdown(self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

fn spawn_workers<T, F, Fut>(
    queue: &'static str,
    receiver: UnboundedReceiver<T>,
    count: usize,
    pending: Arc<AtomicUsize>,
    context: Arc<PipelineContext>,
    handler: F,
) -> Vec<JoinHandle<()>>
where
    T: Send + 'static,
    F: Fn(Arc<PipelineContext>, T) -> Fut + Send + Sync + Copy + 'static,
    Fut: std::future::Future<Output = crate::error::Result<()>> + Send,
{
    let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
    (0..count.max(1))
        .map(|worker_id| {
            let receiver = receiver.clone();
            let pending = pending.clone();
            let context = context.clone();
            tokio::spawn(async move {
                loop {
                    let message = { receiver.lock().await.recv().await };
                    let Some(message) = message else {
                        break;
                    };
                    if let Err(e) = handler(context.clone(), message).await {
                        log_task_error(queue, worker_id, &e);
                    }
                    pending.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect()
}

/// Maps the error kinds of the design onto log levels: ignorable
/// payloads are warnings, everything else is an error for the
/// message that hit it. Only `check-updates` schedules retries.
fn log_task_error(queue: &str, worker_id: usize, error: &Error) {
    match error {
        Error::Ignorable(message) => {
            warn!(queue, worker_id, %message, "dropping malformed message");
        }
        _ => {
            error!(queue, worker_id, error = %error, "task failed, message dropped");
        }
    }
}
