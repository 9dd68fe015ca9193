//! Worker thread side of the pool.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;

use lvs_protocol::{InitParams, WorkerResult, WorkerTask};
use tokio::sync::mpsc;

use crate::handler::TaskHandler;

/// Message from the pool to one worker.
#[derive(Debug)]
pub(crate) enum WorkerMsg {
    /// Handshake payload, sent once after [`WorkerReply::Online`].
    Init(InitParams),
    /// Real work; only sent after [`WorkerReply::Ready`].
    Task(WorkerTask),
    /// Leave the loop after the current task.
    Stop,
}

/// Message from one worker back to the pool.
#[derive(Debug)]
pub(crate) enum WorkerReply {
    /// Thread started and is waiting for the init payload.
    Online,
    /// Init acknowledged; the worker accepts tasks.
    Ready,
    /// Task finished.
    Result(WorkerResult),
    /// Init failed or a task panicked; the worker is gone.
    Error(String),
    /// Thread left its loop.
    Exit,
}

/// What a worker thread is handed when it starts.
#[derive(Clone, Debug)]
pub struct WorkerContext {
    /// Position of the worker in the pool.
    pub index: usize,
    /// Scratch directory shared by the pool, removed on terminate.
    pub scratch_dir: PathBuf,
}

pub(crate) type ReplySender = mpsc::UnboundedSender<(usize, WorkerReply)>;

/// Body of a worker thread.
pub(crate) fn run<H: TaskHandler>(
    context: &WorkerContext,
    mut handler: H,
    mut inbox: mpsc::UnboundedReceiver<WorkerMsg>,
    replies: &ReplySender,
) {
    let index = context.index;
    let reply = |msg: WorkerReply| {
        // The pool stops listening on terminate.
        let _ = replies.send((index, msg));
    };

    reply(WorkerReply::Online);

    while let Some(msg) = inbox.blocking_recv() {
        match msg {
            WorkerMsg::Init(params) => match handler.init(&params) {
                Ok(()) => reply(WorkerReply::Ready),
                Err(e) => {
                    reply(WorkerReply::Error(format!("init failed: {e}")));
                    break;
                }
            },
            WorkerMsg::Task(task) => {
                if let Some(params) = &task.init
                    && let Err(e) = handler.init(params)
                {
                    reply(WorkerReply::Error(format!("init failed: {e}")));
                    break;
                }
                match catch_unwind(AssertUnwindSafe(|| handler.handle(&task))) {
                    Ok(result) => reply(WorkerReply::Result(result)),
                    Err(panic) => {
                        reply(WorkerReply::Error(panic_message(panic.as_ref())));
                        break;
                    }
                }
            }
            WorkerMsg::Stop => break,
        }
    }

    reply(WorkerReply::Exit);
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("task panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("task panicked: {s}")
    } else {
        "task panicked".to_owned()
    }
}
