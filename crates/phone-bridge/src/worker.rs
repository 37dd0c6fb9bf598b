//! Single-thread task queue for blocking stack operations
//!
//! Stack setup, teardown and preview control may block for a long time on
//! native I/O. They are queued as [`SipTask`]s and executed one at a time, in
//! submission order, on a dedicated thread. The single thread is also what
//! keeps these mutating stack calls from ever running concurrently.
//!
//! # Shutdown
//!
//! After [`Worker::quit`] no task is accepted, but everything already queued
//! still runs and is reported before the thread exits.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::error::{PhoneError, PhoneResult};
use crate::stack::{SipStack, StackSetup, StackStatus, WindowHandle};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Kind of work a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    CreateStack,
    DestroyStack,
    StartPreview,
    StopPreview,
}

#[derive(Debug)]
enum TaskParams {
    CreateStack(Box<StackSetup>),
    DestroyStack,
    StartPreview { capture_dev: usize, render_dev: usize },
    StopPreview { capture_dev: usize },
}

/// One unit of blocking work
///
/// Owned by the queue until executed, then handed to the completion sink.
/// A task runs exactly once.
#[derive(Debug)]
pub struct SipTask {
    id: u64,
    params: TaskParams,
    status: StackStatus,
    window: WindowHandle,
}

impl SipTask {
    fn new(params: TaskParams) -> Self {
        Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            params,
            status: StackStatus::UNKNOWN_FAILURE,
            window: WindowHandle::None,
        }
    }

    /// Create and start the stack
    pub fn create_stack(setup: StackSetup) -> Self {
        Self::new(TaskParams::CreateStack(Box::new(setup)))
    }

    /// Tear the stack down
    pub fn destroy_stack() -> Self {
        Self::new(TaskParams::DestroyStack)
    }

    /// Start previewing a capture device into a render device
    pub fn start_preview(capture_dev: usize, render_dev: usize) -> Self {
        Self::new(TaskParams::StartPreview { capture_dev, render_dev })
    }

    /// Stop previewing a capture device
    pub fn stop_preview(capture_dev: usize) -> Self {
        Self::new(TaskParams::StopPreview { capture_dev })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn task_type(&self) -> TaskType {
        match self.params {
            TaskParams::CreateStack(_) => TaskType::CreateStack,
            TaskParams::DestroyStack => TaskType::DestroyStack,
            TaskParams::StartPreview { .. } => TaskType::StartPreview,
            TaskParams::StopPreview { .. } => TaskType::StopPreview,
        }
    }

    /// Result of the native call; unknown failure until the task has run
    pub fn status(&self) -> StackStatus {
        self.status
    }

    /// Capture device of a preview task
    pub fn capture_device(&self) -> Option<usize> {
        match self.params {
            TaskParams::StartPreview { capture_dev, .. } | TaskParams::StopPreview { capture_dev } => Some(capture_dev),
            _ => None,
        }
    }

    /// Preview window produced by a successful start-preview task
    pub fn window(&self) -> WindowHandle {
        self.window
    }

    pub(crate) fn run(&mut self, stack: &dyn SipStack) {
        let result = match &self.params {
            TaskParams::CreateStack(setup) => stack.create(setup),
            TaskParams::DestroyStack => stack.destroy(),
            TaskParams::StartPreview { capture_dev, render_dev } => {
                stack.preview_start(*capture_dev, *render_dev).map(|window| {
                    self.window = window;
                })
            }
            TaskParams::StopPreview { capture_dev } => stack.preview_stop(*capture_dev),
        };
        self.status = match result {
            Ok(()) => StackStatus::SUCCESS,
            Err(status) => status,
        };
    }
}

impl fmt::Display for SipTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SipTask_{}({:?})", self.id, self.task_type())
    }
}

struct QueueState {
    quit: bool,
    tasks: VecDeque<SipTask>,
}

struct Shared {
    state: Mutex<QueueState>,
    task_ready: Condvar,
}

/// Owner of the worker thread and its queue
pub struct Worker {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Start the worker thread
    ///
    /// `on_finished` receives every task after it ran, on the worker thread.
    pub fn spawn<F>(stack: Arc<dyn SipStack>, on_finished: F) -> PhoneResult<Self>
    where
        F: FnMut(SipTask) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                quit: false,
                tasks: VecDeque::new(),
            }),
            task_ready: Condvar::new(),
        });

        let thread_shared = shared.clone();
        let thread = thread::Builder::new()
            .name("sip-worker".to_string())
            .spawn(move || run_worker_loop(&thread_shared, stack.as_ref(), on_finished))
            .map_err(|e| PhoneError::internal(format!("Failed to spawn worker thread: {}", e)))?;

        info!("SIP worker started");
        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Queue a task; false once the worker has been told to quit
    pub fn start_task(&self, task: SipTask) -> bool {
        let mut state = self.shared.state.lock();
        if state.quit {
            warn!(task = %task, "Worker is quitting, task rejected");
            return false;
        }
        debug!(task = %task, "Task queued");
        state.tasks.push_back(task);
        self.shared.task_ready.notify_one();
        true
    }

    /// Number of tasks waiting to run
    pub fn pending(&self) -> usize {
        self.shared.state.lock().tasks.len()
    }

    /// Stop accepting tasks; queued ones still run
    pub fn quit(&self) {
        let mut state = self.shared.state.lock();
        if !state.quit {
            state.quit = true;
            debug!(pending = state.tasks.len(), "SIP worker quitting");
        }
        self.shared.task_ready.notify_all();
    }

    /// Quit and wait for the queue to drain and the thread to exit
    pub fn join(&mut self) {
        self.quit();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("SIP worker thread panicked");
            } else {
                info!("SIP worker stopped");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.join();
    }
}

fn run_worker_loop<F>(shared: &Shared, stack: &dyn SipStack, mut on_finished: F)
where
    F: FnMut(SipTask),
{
    if let Err(status) = stack.register_thread("sip-worker") {
        warn!(status = %status, "Failed to register worker thread with stack");
    }

    let mut state = shared.state.lock();
    loop {
        if let Some(mut task) = state.tasks.pop_front() {
            MutexGuard::unlocked(&mut state, || {
                debug!(task = %task, "Task started");
                task.run(stack);
                debug!(task = %task, status = %task.status(), "Task finished");
                on_finished(task);
            });
        } else if state.quit {
            break;
        } else {
            shared.task_ready.wait(&mut state);
        }
    }
}
