//! Worker pool supervisor.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use lvs_protocol::{InitParams, WorkerResult, WorkerTask};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::handler::TaskHandler;
use crate::limiter::{Push, RateLimiter};
use crate::worker::{self, ReplySender, WorkerContext, WorkerMsg, WorkerReply};
use crate::PoolError;

/// Default spacing between rate-limited deliveries.
pub const DEFAULT_RATE_LIMIT: Duration = Duration::from_millis(50);

/// Pool construction parameters.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Spacing between deliveries; zero dispatches every post immediately.
    pub rate_limit: Duration,
    /// Payload of the init handshake.
    pub init: InitParams,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            rate_limit: DEFAULT_RATE_LIMIT,
            init: InitParams::default(),
        }
    }
}

/// Event emitted by the pool.
#[derive(Debug)]
pub enum PoolEvent {
    /// A worker finished a task.
    Result {
        /// Worker that ran the task.
        worker: usize,
        /// What it produced.
        result: WorkerResult,
    },
    /// A worker crashed or failed its handshake; it will not be restarted.
    WorkerFailed {
        /// Worker that failed.
        worker: usize,
        /// Failure description.
        reason: String,
    },
}

enum PoolCommand {
    Post(WorkerTask),
    Terminate(oneshot::Sender<()>),
}

/// Handle to a running pool.
///
/// Cheap to clone; every clone talks to the same supervisor task.
#[derive(Clone)]
pub struct WorkerPool {
    commands: mpsc::UnboundedSender<PoolCommand>,
    terminating: Arc<AtomicBool>,
    scratch_dir: PathBuf,
}

impl WorkerPool {
    /// Start `config.workers` threads running handlers built by `factory`.
    ///
    /// Must be called inside a tokio runtime. Returns the pool handle and the
    /// receiver of task results.
    pub fn spawn<H, F>(
        config: PoolConfig,
        factory: F,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PoolEvent>), PoolError>
    where
        H: TaskHandler,
        F: Fn(&WorkerContext) -> H,
    {
        let scratch = tempfile::Builder::new()
            .prefix("lvs-pool-")
            .tempdir()
            .map_err(PoolError::Scratch)?;
        let scratch_dir = scratch.path().to_path_buf();

        let workers = config.workers.max(1);
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let mut slots = Vec::with_capacity(workers);
        for index in 0..workers {
            let context = WorkerContext {
                index,
                scratch_dir: scratch_dir.clone(),
            };
            let handler = factory(&context);
            slots.push(spawn_worker(context, handler, &reply_tx)?);
        }
        drop(reply_tx);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let supervisor = Supervisor {
            slots,
            limiter: RateLimiter::default(),
            rate_limit: config.rate_limit,
            counter: 0,
            init: config.init,
            commands: command_rx,
            replies: reply_rx,
            events: event_tx,
            scratch: Some(scratch),
        };
        tokio::spawn(supervisor.run());

        tracing::debug!(workers, rate_limit = ?config.rate_limit, "Worker pool started");

        Ok((
            Self {
                commands: command_tx,
                terminating: Arc::new(AtomicBool::new(false)),
                scratch_dir,
            },
            event_rx,
        ))
    }

    /// Submit a task. A no-op once [`terminate`](Self::terminate) was called.
    pub fn post(&self, task: WorkerTask) {
        if self.terminating.load(Ordering::Acquire) {
            return;
        }
        let _ = self.commands.send(PoolCommand::Post(task));
    }

    /// Stop every worker and remove the scratch directory.
    ///
    /// Resolves once the supervisor has shut down.
    pub async fn terminate(&self) {
        if self.terminating.swap(true, Ordering::AcqRel) {
            return;
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(PoolCommand::Terminate(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Whether [`terminate`](Self::terminate) was called.
    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    /// Scratch directory shared by the workers.
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }
}

fn spawn_worker<H: TaskHandler>(
    context: WorkerContext,
    handler: H,
    replies: &ReplySender,
) -> Result<WorkerSlot, PoolError> {
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    let replies = replies.clone();
    std::thread::Builder::new()
        .name(format!("lvs-worker-{}", context.index))
        .spawn(move || worker::run(&context, handler, inbox_rx, &replies))
        .map_err(PoolError::Spawn)?;

    Ok(WorkerSlot {
        inbox: inbox_tx,
        state: WorkerState::Starting,
        backlog: Vec::new(),
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WorkerState {
    Starting,
    Ready,
    Dead,
}

struct WorkerSlot {
    inbox: mpsc::UnboundedSender<WorkerMsg>,
    state: WorkerState,
    /// Tasks routed here before the handshake finished.
    backlog: Vec<WorkerTask>,
}

struct Supervisor {
    slots: Vec<WorkerSlot>,
    limiter: RateLimiter<WorkerTask>,
    rate_limit: Duration,
    counter: usize,
    init: InitParams,
    commands: mpsc::UnboundedReceiver<PoolCommand>,
    replies: mpsc::UnboundedReceiver<(usize, WorkerReply)>,
    events: mpsc::UnboundedSender<PoolEvent>,
    scratch: Option<tempfile::TempDir>,
}

impl Supervisor {
    async fn run(mut self) {
        let mut next_tick: Option<Instant> = None;

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(PoolCommand::Post(task)) => self.post(task, &mut next_tick),
                    Some(PoolCommand::Terminate(ack)) => {
                        self.shutdown();
                        let _ = ack.send(());
                        return;
                    }
                    None => {
                        self.shutdown();
                        return;
                    }
                },
                Some((index, reply)) = self.replies.recv() => self.on_reply(index, reply),
                () = wait_until(next_tick) => {
                    next_tick = match self.limiter.tick() {
                        Some(task) => {
                            self.dispatch(task);
                            Some(Instant::now() + self.rate_limit)
                        }
                        None => None,
                    };
                }
            }
        }
    }

    fn post(&mut self, task: WorkerTask, next_tick: &mut Option<Instant>) {
        if self.rate_limit.is_zero() {
            self.dispatch(task);
            return;
        }

        match self.limiter.push(task) {
            Push::Dispatch(task) => {
                self.dispatch(task);
                *next_tick = Some(Instant::now() + self.rate_limit);
            }
            Push::Queued {
                evicted: Some(dropped),
            } => {
                tracing::debug!(file = %dropped.file_name, "Worker queue full, dropped oldest task");
            }
            Push::Queued { evicted: None } => {}
        }
    }

    /// Round-robin over live workers, moving on when a worker's inbox is closed.
    fn dispatch(&mut self, mut task: WorkerTask) {
        let count = self.slots.len();
        for _ in 0..count {
            let index = self.counter % count;
            self.counter = self.counter.wrapping_add(1);

            let slot = &mut self.slots[index];
            match slot.state {
                WorkerState::Dead => {}
                WorkerState::Starting => {
                    slot.backlog.push(task);
                    return;
                }
                WorkerState::Ready => match slot.inbox.send(WorkerMsg::Task(task)) {
                    Ok(()) => return,
                    Err(mpsc::error::SendError(message)) => {
                        // Thread is gone without telling us.
                        slot.state = WorkerState::Dead;
                        tracing::debug!(worker = index, "Worker inbox closed");
                        let WorkerMsg::Task(returned) = message else {
                            return;
                        };
                        task = returned;
                    }
                },
            }
        }
        tracing::debug!(file = %task.file_name, "No live workers, task dropped");
    }

    fn on_reply(&mut self, index: usize, reply: WorkerReply) {
        let Some(slot) = self.slots.get_mut(index) else {
            return;
        };

        match reply {
            WorkerReply::Online => {
                let _ = slot.inbox.send(WorkerMsg::Init(self.init.clone()));
            }
            WorkerReply::Ready => {
                slot.state = WorkerState::Ready;
                for task in slot.backlog.drain(..) {
                    let _ = slot.inbox.send(WorkerMsg::Task(task));
                }
                tracing::debug!(worker = index, "Worker ready");
            }
            WorkerReply::Result(result) => {
                let _ = self.events.send(PoolEvent::Result {
                    worker: index,
                    result,
                });
            }
            WorkerReply::Error(reason) => {
                slot.state = WorkerState::Dead;
                slot.backlog.clear();
                tracing::debug!(worker = index, %reason, "Worker failed");
                let _ = self.events.send(PoolEvent::WorkerFailed {
                    worker: index,
                    reason,
                });
            }
            WorkerReply::Exit => {
                if slot.state != WorkerState::Dead {
                    slot.state = WorkerState::Dead;
                    tracing::debug!(worker = index, "Worker exited");
                }
            }
        }
    }

    fn shutdown(&mut self) {
        self.limiter.clear();
        // Detach: replies still in flight are dropped with the receiver.
        self.replies.close();

        for slot in &mut self.slots {
            slot.state = WorkerState::Dead;
            slot.backlog.clear();
            let _ = slot.inbox.send(WorkerMsg::Stop);
        }
        // Threads are detached; a worker busy with a task stops after it.
        self.slots.clear();

        if let Some(scratch) = self.scratch.take()
            && let Err(e) = scratch.close()
        {
            tracing::debug!(error = %e, "Failed to remove worker scratch directory");
        }
        tracing::debug!("Worker pool terminated");
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
