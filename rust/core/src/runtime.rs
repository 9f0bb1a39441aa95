//! Long-running driver: periodic polling and aggregate recompute, plus a FIFO
//! queue that feeds the orchestrator one action at a time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::commitment::FieldHash;
use crate::error::ClientError;
use crate::orchestrator::{ActionIntent, ActionOrchestrator, ActionOutcome};
use crate::poller::{AggregateRecompute, Aggregates, IndexingPoller};

const COMMAND_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionRequest {
    Intent(ActionIntent),
    Withdraw(FieldHash),
    CollectFees(FieldHash),
    RemoveLiquidity(FieldHash),
}

impl ActionRequest {
    /// Note that has to be ready before this request may run.
    fn implicit_dependency(&self) -> Option<FieldHash> {
        match self {
            ActionRequest::Intent(_) => None,
            ActionRequest::Withdraw(fp)
            | ActionRequest::CollectFees(fp)
            | ActionRequest::RemoveLiquidity(fp) => Some(*fp),
        }
    }
}

type Reply = oneshot::Sender<Result<ActionOutcome, ClientError>>;

struct QueuedAction {
    request: ActionRequest,
    depends_on: Option<FieldHash>,
    reply: Reply,
}

enum RuntimeCommand {
    Enqueue(QueuedAction),
    Shutdown,
}

enum Readiness {
    Ready,
    Waiting,
    Gone(FieldHash),
}

#[derive(Clone)]
pub struct RuntimeHandle {
    tx: mpsc::Sender<RuntimeCommand>,
    aggregates: watch::Receiver<Aggregates>,
}

impl RuntimeHandle {
    /// Queues `request` behind earlier ones. With `depends_on`, it waits until
    /// that note is ready.
    pub async fn submit(
        &self,
        request: ActionRequest,
        depends_on: Option<FieldHash>,
    ) -> Result<ActionOutcome, ClientError> {
        let (reply, rx) = oneshot::channel();
        let depends_on = depends_on.or_else(|| request.implicit_dependency());
        self.tx
            .send(RuntimeCommand::Enqueue(QueuedAction {
                request,
                depends_on,
                reply,
            }))
            .await
            .map_err(|_| ClientError::RuntimeStopped)?;
        rx.await.map_err(|_| ClientError::RuntimeStopped)?
    }

    pub fn aggregates(&self) -> watch::Receiver<Aggregates> {
        self.aggregates.clone()
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(RuntimeCommand::Shutdown).await;
    }
}

pub struct Runtime {
    orchestrator: Arc<ActionOrchestrator>,
    poller: IndexingPoller,
    recompute: AggregateRecompute,
    poll_interval: Interval,
    aggregate_interval: Interval,
    command_rx: mpsc::Receiver<RuntimeCommand>,
    queue: VecDeque<QueuedAction>,
    running: Option<JoinHandle<()>>,
}

impl Runtime {
    pub fn new(
        orchestrator: Arc<ActionOrchestrator>,
        poller: IndexingPoller,
        recompute: AggregateRecompute,
        poll_every: Duration,
        aggregate_every: Duration,
    ) -> (Self, RuntimeHandle) {
        let (tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = RuntimeHandle {
            tx,
            aggregates: recompute.subscribe(),
        };
        let mut poll_interval = interval(poll_every);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut aggregate_interval = interval(aggregate_every);
        aggregate_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let runtime = Self {
            orchestrator,
            poller,
            recompute,
            poll_interval,
            aggregate_interval,
            command_rx,
            queue: VecDeque::new(),
            running: None,
        };
        (runtime, handle)
    }

    pub async fn run(mut self) {
        info!("runtime started");
        loop {
            tokio::select! {
                _ = self.poll_interval.tick() => {
                    self.poll().await;
                    self.dispatch().await;
                }
                _ = self.aggregate_interval.tick() => {
                    if let Err(err) = self.recompute.recompute().await {
                        warn!(error = %err, "aggregate recompute failed");
                    }
                }
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(RuntimeCommand::Enqueue(action)) => {
                            debug!(request = ?action.request, queued = self.queue.len(), "action queued");
                            self.queue.push_back(action);
                            self.dispatch().await;
                        }
                        Some(RuntimeCommand::Shutdown) | None => break,
                    }
                }
                joined = join_running(&mut self.running) => {
                    self.running = None;
                    if let Err(err) = joined {
                        warn!(error = %err, "action task aborted");
                    }
                    self.dispatch().await;
                }
            }
        }
        if let Some(task) = self.running.take() {
            // in-flight proofs and submissions are never cancelled
            let _ = task.await;
        }
        info!(dropped = self.queue.len(), "runtime stopped");
    }

    async fn poll(&self) {
        match self.poller.poll_once().await {
            Ok(report) => {
                if !report.promoted.is_empty() || !report.errors.is_empty() {
                    info!(
                        checked = report.checked,
                        promoted = report.promoted.len(),
                        errors = report.errors.len(),
                        "poll tick"
                    );
                }
            }
            Err(err) => warn!(error = %err, "poll tick failed"),
        }
    }

    /// Starts the queue head if nothing is running and its dependency is ready.
    async fn dispatch(&mut self) {
        while self.running.is_none() {
            let Some(head) = self.queue.front() else {
                return;
            };
            match self.readiness(head.depends_on).await {
                Readiness::Waiting => return,
                Readiness::Gone(fingerprint) => {
                    if let Some(action) = self.queue.pop_front() {
                        warn!(%fingerprint, "queued action lost its dependency");
                        let _ = action.reply.send(Err(ClientError::StaleState(format!(
                            "note {fingerprint} no longer in ledger"
                        ))));
                    }
                }
                Readiness::Ready => {
                    if let Some(action) = self.queue.pop_front() {
                        self.running = Some(self.spawn(action));
                    }
                }
            }
        }
    }

    async fn readiness(&self, depends_on: Option<FieldHash>) -> Readiness {
        let Some(fingerprint) = depends_on else {
            return Readiness::Ready;
        };
        match self.orchestrator.ledger().get(&fingerprint).await {
            Ok(Some(note)) if note.is_ready() => Readiness::Ready,
            Ok(Some(_)) => Readiness::Waiting,
            Ok(None) => Readiness::Gone(fingerprint),
            Err(err) => {
                warn!(error = %err, "ledger read failed; holding queue");
                Readiness::Waiting
            }
        }
    }

    fn spawn(&self, action: QueuedAction) -> JoinHandle<()> {
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            let result = match action.request {
                ActionRequest::Intent(intent) => orchestrator.execute(intent).await,
                ActionRequest::Withdraw(fp) => orchestrator.withdraw(&fp).await,
                ActionRequest::CollectFees(fp) => orchestrator.collect_fees(&fp).await,
                ActionRequest::RemoveLiquidity(fp) => orchestrator.remove_liquidity(&fp).await,
            };
            let _ = action.reply.send(result);
        })
    }
}

async fn join_running(
    running: &mut Option<JoinHandle<()>>,
) -> Result<(), tokio::task::JoinError> {
    match running {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}
