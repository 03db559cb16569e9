/// Background fetch execution
///
/// Every fetch for every source runs on one sequential worker so remote
/// traffic stays serialized and bursts queue up instead of fanning out.
use crate::error::{EngineError, EngineResult};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// One unit of background fetch work
pub type FetchJob = BoxFuture<'static, ()>;

/// Accepts fetch jobs for background execution
pub trait FetchExecutor: Send + Sync {
    fn submit(&self, job: FetchJob) -> EngineResult<()>;
}

/// Single tokio task draining a job queue in order
#[derive(Clone)]
pub struct FetchWorker {
    sender: mpsc::UnboundedSender<FetchJob>,
}

impl FetchWorker {
    /// Start the worker on the current runtime
    pub fn spawn() -> Self {
        Self::spawn_on(&Handle::current())
    }

    /// Start the worker on a specific runtime
    pub fn spawn_on(handle: &Handle) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        handle.spawn(Self::run(receiver));
        info!("Texture fetch worker started");
        Self { sender }
    }

    async fn run(mut receiver: mpsc::UnboundedReceiver<FetchJob>) {
        while let Some(job) = receiver.recv().await {
            if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                error!("Texture fetch job panicked");
            }
        }
        debug!("Texture fetch worker stopped");
    }
}

impl FetchExecutor for FetchWorker {
    fn submit(&self, job: FetchJob) -> EngineResult<()> {
        self.sender
            .send(job)
            .map_err(|_| EngineError::WorkerUnavailable)
    }
}

/// Queue drained explicitly by the owner
///
/// For hosts that pump background work from their own loop, and for tests.
#[derive(Default)]
pub struct ManualExecutor {
    queue: Mutex<VecDeque<FetchJob>>,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run the oldest queued job, returns false if the queue was empty
    pub async fn run_next(&self) -> bool {
        let job = self.queue.lock().pop_front();
        match job {
            Some(job) => {
                job.await;
                true
            }
            None => false,
        }
    }

    /// Run queued jobs until the queue is empty, returns how many ran
    pub async fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next().await {
            ran += 1;
        }
        ran
    }

    /// Drop every queued job without running it
    pub fn discard_all(&self) -> usize {
        let mut queue = self.queue.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }
}

impl FetchExecutor for ManualExecutor {
    fn submit(&self, job: FetchJob) -> EngineResult<()> {
        self.queue.lock().push_back(job);
        Ok(())
    }
}
