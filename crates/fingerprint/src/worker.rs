//! Hasher worker: a [`FingerprintEngine`] running in its own task.
//!
//! The owner talks to the worker through [`HashCommand`]s and receives
//! [`HashEvent`]s. Pause and resume are handled while a job is running.
//! They only toggle the engine's pause flag; arming and releasing the shared
//! gate is left to the owner, so a command handled late cannot release a
//! newer pause.

use std::path::PathBuf;

use chunkload_tasks::PauseGate;
use chunkload_transfer::{ChunkDescriptor, ChunkReader};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{FingerprintEngine, FingerprintError, FingerprintMode};

const EVENT_CAPACITY: usize = 64;

/// A file to fingerprint.
#[derive(Debug, Clone)]
pub struct HashJob {
    pub path: PathBuf,
    pub plan: Vec<ChunkDescriptor>,
    pub mode: FingerprintMode,
}

/// Requests accepted by the hasher worker.
#[derive(Debug)]
pub enum HashCommand {
    Hash(HashJob),
    Pause,
    Resume,
}

/// Responses from the hasher worker.
#[derive(Debug)]
pub enum HashEvent {
    /// Percentage of the current job completed.
    Progress(f64),
    /// Lowercase hex fingerprint of the finished job.
    Fingerprint(String),
    Failed(FingerprintError),
}

/// Sends commands to a running worker. Cheap to clone.
#[derive(Debug, Clone)]
pub struct HasherControl {
    commands: mpsc::UnboundedSender<HashCommand>,
    abort: AbortHandle,
}

impl HasherControl {
    pub fn send(&self, command: HashCommand) -> Result<(), FingerprintError> {
        self.commands
            .send(command)
            .map_err(|_| FingerprintError::WorkerGone)
    }

    pub fn pause(&self) -> Result<(), FingerprintError> {
        self.send(HashCommand::Pause)
    }

    pub fn resume(&self) -> Result<(), FingerprintError> {
        self.send(HashCommand::Resume)
    }

    /// Terminates the worker task.
    pub fn abort(&self) {
        self.abort.abort();
    }
}

/// Owning handle to a hasher worker. Dropping it terminates the worker.
#[derive(Debug)]
pub struct HasherHandle {
    control: HasherControl,
    events: mpsc::Receiver<HashEvent>,
    task: JoinHandle<()>,
}

impl HasherHandle {
    pub fn control(&self) -> HasherControl {
        self.control.clone()
    }

    pub fn send(&self, command: HashCommand) -> Result<(), FingerprintError> {
        self.control.send(command)
    }

    /// Receives the next event, or `None` once the worker has stopped.
    pub async fn next_event(&mut self) -> Option<HashEvent> {
        self.events.recv().await
    }

    /// Runs one job to completion, forwarding progress to `on_progress`.
    pub async fn hash<P>(&mut self, job: HashJob, mut on_progress: P) -> Result<String, FingerprintError>
    where
        P: FnMut(f64),
    {
        self.send(HashCommand::Hash(job))?;
        loop {
            match self.next_event().await {
                Some(HashEvent::Progress(pct)) => on_progress(pct),
                Some(HashEvent::Fingerprint(fp)) => return Ok(fp),
                Some(HashEvent::Failed(e)) => return Err(e),
                None => return Err(FingerprintError::WorkerGone),
            }
        }
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for HasherHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawns a hasher worker that pauses on `gate` and stops when `cancel`
/// fires.
pub fn spawn_hasher(gate: PauseGate, cancel: CancellationToken) -> HasherHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
    let engine = FingerprintEngine::with_cancel(gate, cancel);

    let task = tokio::spawn(run_worker(engine, cmd_rx, event_tx));
    HasherHandle {
        control: HasherControl {
            commands: cmd_tx,
            abort: task.abort_handle(),
        },
        events: event_rx,
        task,
    }
}

async fn run_worker(
    engine: FingerprintEngine,
    mut commands: mpsc::UnboundedReceiver<HashCommand>,
    events: mpsc::Sender<HashEvent>,
) {
    while let Some(command) = commands.recv().await {
        let job = match command {
            HashCommand::Hash(job) => job,
            HashCommand::Pause => {
                engine.set_paused(true);
                continue;
            }
            HashCommand::Resume => {
                engine.set_paused(false);
                continue;
            }
        };

        let reader = ChunkReader::new(&job.path);
        let progress_tx = events.clone();
        let compute = engine.compute(&reader, &job.plan, job.mode, move |pct| {
            // Progress is advisory; a full channel drops the update.
            let _ = progress_tx.try_send(HashEvent::Progress(pct));
        });
        tokio::pin!(compute);

        let result = loop {
            tokio::select! {
                result = &mut compute => break Some(result),
                command = commands.recv() => match command {
                    Some(HashCommand::Pause) => engine.set_paused(true),
                    Some(HashCommand::Resume) => engine.set_paused(false),
                    Some(HashCommand::Hash(other)) => {
                        warn!(path = %other.path.display(), "hasher busy, job dropped");
                    }
                    None => break None,
                },
            }
        };

        let Some(result) = result else {
            debug!("hasher command channel closed mid-job");
            return;
        };
        let event = match result {
            Ok(fp) => HashEvent::Fingerprint(fp),
            Err(e) => HashEvent::Failed(e),
        };
        if events.send(event).await.is_err() {
            return;
        }
    }
    debug!("hasher worker stopped");
}
