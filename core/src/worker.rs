//! Cooperative handoff of host access to one worker thread.
//!
//! The host is single-threaded: every host call must be made from the
//! thread that owns the session. [`run_with_worker`] runs a closure on a
//! second thread while the owner thread blocks servicing a task queue. The
//! worker reaches the host only by posting tasks, which the owner runs one
//! at a time.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::guard::panic_message;
use crate::host::HostJump;
use crate::session::Session;

type Task = Box<dyn FnOnce(&Session) + Send>;

enum Message {
    Run(Task),
    Done,
}

/// The worker's way back to the session owner.
#[derive(Clone)]
pub struct WorkerHandle {
    sender: mpsc::Sender<Message>,
}

fn owner_gone() -> Error {
    Error::Worker("session owner is gone".to_string())
}

impl WorkerHandle {
    /// Runs `task` on the owner thread and waits for its result.
    pub fn post<R, F>(&self, task: F) -> Result<R>
    where
        F: FnOnce(&Session) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let (reply, response) = mpsc::sync_channel(1);
        let task: Task = Box::new(move |session| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(session)));
            let result = match outcome {
                Ok(result) => result,
                Err(payload) if payload.is::<HostJump>() => panic::resume_unwind(payload),
                Err(payload) => Err(Error::Worker(format!(
                    "task panicked: {}",
                    panic_message(&*payload)
                ))),
            };
            let _ = reply.send(result);
        });
        self.sender.send(Message::Run(task)).map_err(|_| owner_gone())?;
        response.recv().map_err(|_| owner_gone())?
    }
}

/// Runs `f` on a worker thread while this thread services its tasks.
///
/// Returns once `f` has returned and every task it posted has run. A panic
/// in `f` is reported as [`Error::Worker`].
pub fn run_with_worker<R, F>(session: &Session, f: F) -> Result<R>
where
    F: FnOnce(WorkerHandle) -> R + Send,
    R: Send,
{
    let (sender, receiver) = mpsc::channel::<Message>();
    thread::scope(|scope| {
        let done = sender.clone();
        let worker = scope.spawn(move || {
            let result = f(WorkerHandle { sender });
            let _ = done.send(Message::Done);
            result
        });
        debug!("worker started");

        let mut served = 0usize;
        for message in &receiver {
            match message {
                Message::Run(task) => {
                    task(session);
                    served += 1;
                    trace!(served, "worker task done");
                }
                Message::Done => break,
            }
        }
        drop(receiver);
        debug!(served, "worker finished");

        worker
            .join()
            .map_err(|payload| Error::Worker(format!("worker panicked: {}", panic_message(&*payload))))
    })
}
