//! Upload session controller.
//!
//! Drives one selected file through hashing, chunk uploads and the merge
//! request, and accepts pause, resume and cancel calls while doing so. All
//! methods take `&self`; share the controller behind an `Arc` to control a
//! running `start()` from another task.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};

use chunkload_fingerprint::{FingerprintError, HashCommand, HashEvent, HashJob, HasherControl, spawn_hasher};
use chunkload_protocol::{CODE_SERVER_ERROR, ChunkId, ChunkStatus, DEFAULT_CHUNK_SIZE, MergeRequest};
use chunkload_tasks::{PauseGate, ScheduleError, run_bounded_with_cancel};
use chunkload_transfer::{ChunkDescriptor, ChunkReader, SpeedCalculator};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::session::{PausedPhase, SessionEvent, UploadSession, UploadState};
use crate::transport::ChunkTransport;
use crate::types::{ProgressThrottle, UploadEvent, UploadOutcome, UploadSummary};

const EVENT_CAPACITY: usize = 256;

/// Orchestrates the upload of one file at a time.
pub struct UploadController {
    config: UploadConfig,
    transport: Arc<dyn ChunkTransport>,
    shared: Arc<Shared>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
}

/// State shared with spawned chunk tasks and gate callbacks.
struct Shared {
    session: Mutex<UploadSession>,
    /// Bumped on every select and cancel; results tagged with an older
    /// value are dropped.
    generation: AtomicU64,
    gate: PauseGate,
    handles: StdMutex<RunHandles>,
    meters: StdMutex<Meters>,
    events: mpsc::Sender<UploadEvent>,
}

#[derive(Default)]
struct RunHandles {
    session_token: CancellationToken,
    /// Token of the scheduler run in progress; cancelled by `pause()`.
    upload_run: Option<CancellationToken>,
    hasher: Option<HasherControl>,
}

#[derive(Default)]
struct Meters {
    hash: ProgressThrottle,
    upload: ProgressThrottle,
    speed: SpeedCalculator,
}

impl UploadController {
    pub fn new(config: UploadConfig, transport: Arc<dyn ChunkTransport>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        Self {
            config,
            transport,
            shared: Arc::new(Shared {
                session: Mutex::new(UploadSession::default()),
                generation: AtomicU64::new(0),
                gate: PauseGate::new(),
                handles: StdMutex::new(RunHandles::default()),
                meters: StdMutex::new(Meters::default()),
                events: events_tx,
            }),
            events_rx: Some(events_rx),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Returns a copy of the current session.
    pub async fn snapshot(&self) -> UploadSession {
        self.shared.session.lock().await.clone()
    }

    /// Selects `path` for upload and builds its chunk plan.
    ///
    /// Rejected while a transfer is running or paused.
    pub async fn select_file(&self, path: &Path) -> Result<UploadSession, UploadError> {
        let mut session = self.shared.session.lock().await;
        if session.state.is_active() {
            return Err(UploadError::InvalidState(format!(
                "cannot select a file while {}",
                session.state
            )));
        }

        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(UploadError::NoFile);
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or(UploadError::NoFile)?;
        let chunk_size = if self.config.chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            self.config.chunk_size
        };

        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        self.shared.reset_handles();
        self.shared.reset_meters();

        let next = UploadSession::new(path, file_name, metadata.len(), chunk_size);
        info!(
            file = %next.file_name,
            size = next.total_size,
            chunks = next.chunks_total(),
            chunked = next.chunked,
            "file selected"
        );
        self.shared.replace(&mut session, next);
        self.shared.emit(UploadEvent::StateChanged {
            state: UploadState::Idle,
        });
        Ok(session.clone())
    }

    /// Runs the upload until it completes, fails or is cancelled.
    ///
    /// From `Failed`, only chunks that are not yet stored are sent again.
    /// There is no automatic retry.
    pub async fn start(&self) -> Result<UploadOutcome, UploadError> {
        let (generation, cancel) = {
            let mut session = self.shared.session.lock().await;
            if session.path.as_os_str().is_empty() {
                return Err(UploadError::NoFile);
            }
            let next = session.apply(SessionEvent::Start)?;
            self.shared.replace(&mut session, next);
            let generation = self.shared.generation.load(Ordering::Acquire);
            let cancel = self.shared.lock_handles().session_token.clone();
            info!(file = %session.file_name, state = %session.state, "upload started");
            (generation, cancel)
        };

        match self.drive(generation, &cancel).await {
            Ok(summary) => {
                self.shared.emit(UploadEvent::Completed {
                    file_name: summary.file_name.clone(),
                    total_bytes: summary.total_bytes,
                });
                info!(file = %summary.file_name, chunks = summary.chunks, "upload completed");
                Ok(UploadOutcome::Completed(summary))
            }
            Err(UploadError::Cancelled) => Ok(UploadOutcome::Cancelled),
            Err(e) => {
                let failed = self
                    .shared
                    .update(generation, SessionEvent::Fail(e.to_string()), |_| ())
                    .await;
                if failed.is_err() {
                    // The session moved on (cancel or new file) while we failed.
                    return Ok(UploadOutcome::Cancelled);
                }
                self.shared.emit(UploadEvent::Failed {
                    error: e.to_string(),
                });
                error!(error = %e, "upload failed");
                Err(e)
            }
        }
    }

    /// Pauses hashing or chunk dispatch.
    ///
    /// Chunk requests already in flight are left to finish. With a
    /// configured pause timeout the session resumes by itself.
    pub async fn pause(&self) -> Result<(), UploadError> {
        let mut session = self.shared.session.lock().await;
        let next = session.apply(SessionEvent::Pause)?;
        let UploadState::Paused(phase) = next.state else {
            return Err(UploadError::InvalidState(format!("pause led to {}", next.state)));
        };
        self.shared.replace(&mut session, next);

        match self.config.pause_timeout() {
            Some(timeout) => self.shared.gate.arm_with_timeout(timeout),
            None => self.shared.gate.arm(),
        };
        let generation = self.shared.generation.load(Ordering::Acquire);
        let weak = Arc::downgrade(&self.shared);
        self.shared
            .gate
            .on_release(move || resume_after_release(weak, generation));

        let handles = self.shared.lock_handles();
        match phase {
            PausedPhase::Hashing => {
                if let Some(hasher) = &handles.hasher
                    && hasher.pause().is_err()
                {
                    warn!("hasher worker gone while pausing");
                }
            }
            PausedPhase::Uploading => {
                if let Some(run) = &handles.upload_run {
                    run.cancel();
                }
            }
        }
        info!(?phase, "upload paused");
        Ok(())
    }

    /// Resumes a paused session.
    pub async fn resume(&self) -> Result<(), UploadError> {
        {
            let mut session = self.shared.session.lock().await;
            let next = session.apply(SessionEvent::Resume)?;
            self.shared.replace(&mut session, next);
            self.shared.resume_hasher();
        }
        // The gate is released here only; the hasher's resume command just
        // clears its pause flag.
        self.shared.gate.release().await;
        info!("upload resumed");
        Ok(())
    }

    /// Cancels the session and resets it.
    ///
    /// Requests already in flight may still complete; their results are
    /// ignored.
    pub async fn cancel(&self) {
        {
            let mut session = self.shared.session.lock().await;
            self.shared.generation.fetch_add(1, Ordering::AcqRel);
            self.shared.reset_handles();
            if let Ok(next) = session.apply(SessionEvent::Cancel) {
                self.shared.replace(&mut session, next);
            }
        }
        self.shared.gate.release().await;
        self.shared.reset_meters();
        info!("upload cancelled");
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    async fn drive(
        &self,
        generation: u64,
        cancel: &CancellationToken,
    ) -> Result<UploadSummary, UploadError> {
        let session = self.snapshot().await;

        if session.chunked {
            let fingerprint = match session.fingerprint.clone() {
                Some(fp) => fp,
                None => self.fingerprint(generation, cancel, &session).await?,
            };
            self.upload_chunks(generation, cancel, &fingerprint).await?;
            self.merge(generation, cancel).await?;
        } else {
            self.upload_whole(generation, cancel, &session).await?;
        }

        let session = self.snapshot().await;
        Ok(UploadSummary {
            file_name: session.file_name,
            total_bytes: session.total_size,
            chunks: session.chunks.len(),
            fingerprint: session.fingerprint,
        })
    }

    /// Single-request path for files that fit in one chunk.
    async fn upload_whole(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        session: &UploadSession,
    ) -> Result<(), UploadError> {
        let reader = ChunkReader::new(&session.path);
        let data = reader.read_range(0..session.total_size).await?;
        expect_len(data.len() as u64, session.total_size)?;

        debug!(file = %session.file_name, bytes = data.len(), "sending whole file");
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            result = self.transport.upload_file(session.file_name.clone(), data) => result,
        };

        let status = if result.is_ok() {
            ChunkStatus::Success
        } else {
            ChunkStatus::Failed
        };
        for chunk in &session.chunks {
            self.shared.settle(generation, chunk, status).await;
        }
        result?;
        self.shared
            .update(generation, SessionEvent::UploadsFinished, |_| ())
            .await
    }

    async fn fingerprint(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        session: &UploadSession,
    ) -> Result<String, UploadError> {
        let mode = self.config.mode_for(session.total_size);
        let mut worker = spawn_hasher(self.shared.gate.clone(), cancel.child_token());
        {
            let session = self.shared.session.lock().await;
            if self.shared.generation.load(Ordering::Acquire) != generation {
                return Err(UploadError::Cancelled);
            }
            let control = worker.control();
            if session.state == UploadState::Paused(PausedPhase::Hashing) {
                control.pause()?;
            }
            self.shared.lock_handles().hasher = Some(control);
        }

        worker.send(HashCommand::Hash(HashJob {
            path: session.path.clone(),
            plan: session.chunks.clone(),
            mode,
        }))?;
        debug!(file = %session.file_name, ?mode, "hashing started");

        let result = loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(UploadError::Cancelled),
                event = worker.next_event() => event,
            };
            match event {
                Some(HashEvent::Progress(pct)) => {
                    if let Err(e) = self.shared.record_hash_progress(generation, pct).await {
                        break Err(e);
                    }
                }
                Some(HashEvent::Fingerprint(fp)) => break Ok(fp),
                Some(HashEvent::Failed(FingerprintError::Cancelled)) => {
                    break Err(UploadError::Cancelled);
                }
                Some(HashEvent::Failed(e)) => break Err(e.into()),
                None => break Err(FingerprintError::WorkerGone.into()),
            }
        };
        self.shared.lock_handles().hasher = None;
        drop(worker);

        let fingerprint = result?;
        self.shared
            .update(generation, SessionEvent::Hashed(fingerprint.clone()), |_| ())
            .await?;
        self.shared.emit(UploadEvent::HashProgress { percent: 100.0 });
        self.shared.emit(UploadEvent::Fingerprinted {
            fingerprint: fingerprint.clone(),
        });
        info!(file = %session.file_name, %fingerprint, "file fingerprinted");
        Ok(fingerprint)
    }

    /// Sends every pending chunk, one scheduler run per uninterrupted stretch.
    async fn upload_chunks(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        fingerprint: &str,
    ) -> Result<(), UploadError> {
        while let Some((session, run)) = self.next_upload_run(generation, cancel).await? {
            match self.run_pending(generation, &session, fingerprint, &run).await {
                Ok(()) => {}
                Err(UploadError::Cancelled) if !cancel.is_cancelled() => {
                    debug!("upload run stopped by pause");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Waits out a pause, then either starts a new run over the pending
    /// chunks or, when every chunk is stored, moves the session to merging.
    async fn next_upload_run(
        &self,
        generation: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<(UploadSession, CancellationToken)>, UploadError> {
        loop {
            {
                let mut session = self.shared.session.lock().await;
                if self.shared.generation.load(Ordering::Acquire) != generation {
                    return Err(UploadError::Cancelled);
                }
                match session.state {
                    UploadState::Paused(_) if !self.shared.gate.is_armed() => {
                        // Released by timeout before the callback ran.
                        let next = session.apply(SessionEvent::Resume)?;
                        self.shared.replace(&mut session, next);
                        continue;
                    }
                    UploadState::Paused(_) => {}
                    UploadState::Uploading if session.all_uploaded() => {
                        let next = session.apply(SessionEvent::UploadsFinished)?;
                        self.shared.replace(&mut session, next);
                        return Ok(None);
                    }
                    UploadState::Uploading => {
                        let run = cancel.child_token();
                        self.shared.lock_handles().upload_run = Some(run.clone());
                        return Ok(Some((session.clone(), run)));
                    }
                    other => {
                        return Err(UploadError::InvalidState(format!(
                            "unexpected {other} while uploading"
                        )));
                    }
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                _ = self.shared.gate.await_release() => {}
            }
        }
    }

    async fn run_pending(
        &self,
        generation: u64,
        session: &UploadSession,
        fingerprint: &str,
        run: &CancellationToken,
    ) -> Result<(), UploadError> {
        let reader = ChunkReader::new(&session.path);
        let pending = session.pending_chunks();
        debug!(
            file = %session.file_name,
            pending = pending.len(),
            concurrency = self.config.concurrency,
            "upload run started"
        );

        let tasks: Vec<_> = pending
            .into_iter()
            .map(|chunk| {
                let shared = Arc::clone(&self.shared);
                let transport = Arc::clone(&self.transport);
                let reader = reader.clone();
                let file_name = session.file_name.clone();
                let chunk_id = ChunkId {
                    fingerprint: fingerprint.to_string(),
                    index: chunk.index,
                    delimiter: self.config.delimiter.clone(),
                }
                .to_string();

                move |_slot: usize| async move {
                    let result =
                        send_chunk(transport.as_ref(), &reader, &chunk, file_name, chunk_id).await;
                    let status = if result.is_ok() {
                        ChunkStatus::Success
                    } else {
                        ChunkStatus::Failed
                    };
                    shared.settle(generation, &chunk, status).await;
                    result
                }
            })
            .collect();

        match run_bounded_with_cancel(tasks, self.config.concurrency, run).await {
            Ok(_) => Ok(()),
            Err(ScheduleError::Failed { index, source }) => {
                warn!(task = index, error = %source, "chunk upload failed, stopping run");
                Err(source)
            }
            Err(ScheduleError::Panicked { index }) => Err(UploadError::TaskPanicked(index)),
            Err(ScheduleError::Cancelled) => Err(UploadError::Cancelled),
        }
    }

    async fn merge(&self, generation: u64, cancel: &CancellationToken) -> Result<(), UploadError> {
        let session = self.snapshot().await;
        let mut request = MergeRequest::new(session.file_name.clone(), session.chunk_size);
        request.delimiter = Some(self.config.delimiter.clone());

        debug!(file = %session.file_name, chunks = session.chunks_total(), "requesting merge");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            result = self.transport.merge(request) => result?,
        }
        self.shared
            .update(generation, SessionEvent::Merged, |_| ())
            .await
    }
}

impl Shared {
    fn emit(&self, event: UploadEvent) {
        // Events are advisory; a full channel drops them.
        let _ = self.events.try_send(event);
    }

    fn lock_handles(&self) -> std::sync::MutexGuard<'_, RunHandles> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset_handles(&self) {
        let mut handles = self.lock_handles();
        handles.session_token.cancel();
        handles.session_token = CancellationToken::new();
        handles.upload_run = None;
        if let Some(hasher) = handles.hasher.take() {
            hasher.abort();
        }
    }

    fn reset_meters(&self) {
        *self.meters.lock().unwrap_or_else(PoisonError::into_inner) = Meters::default();
    }

    /// Stores `next` and reports a state change.
    fn replace(&self, session: &mut UploadSession, next: UploadSession) {
        let changed = session.state != next.state;
        *session = next;
        if changed {
            self.emit(UploadEvent::StateChanged {
                state: session.state,
            });
        }
    }

    /// Applies `event` if the session still belongs to `generation`.
    async fn update<R>(
        &self,
        generation: u64,
        event: SessionEvent,
        inspect: impl FnOnce(&UploadSession) -> R,
    ) -> Result<R, UploadError> {
        let mut session = self.session.lock().await;
        if self.generation.load(Ordering::Acquire) != generation {
            return Err(UploadError::Cancelled);
        }
        let next = session.apply(event)?;
        self.replace(&mut session, next);
        Ok(inspect(&session))
    }

    async fn record_hash_progress(&self, generation: u64, pct: f64) -> Result<(), UploadError> {
        self.update(generation, SessionEvent::HashProgress(pct), |_| ())
            .await?;
        let emit = self
            .meters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .hash
            .should_emit(pct);
        if emit {
            self.emit(UploadEvent::HashProgress { percent: pct });
        }
        Ok(())
    }

    /// Records the outcome of one chunk request.
    async fn settle(&self, generation: u64, chunk: &ChunkDescriptor, status: ChunkStatus) {
        let settled = self
            .update(
                generation,
                SessionEvent::ChunkSettled {
                    index: chunk.index,
                    status,
                },
                |s| (s.uploaded_bytes(), s.total_size, s.upload_progress()),
            )
            .await;
        let Ok((uploaded_bytes, total_bytes, percent)) = settled else {
            debug!(index = chunk.index, "late chunk result ignored");
            return;
        };
        self.emit(UploadEvent::ChunkSettled {
            index: chunk.index,
            status,
        });
        debug!(index = chunk.index, status = status.label(), "chunk settled");

        if status != ChunkStatus::Success {
            return;
        }
        let progress = {
            let mut meters = self.meters.lock().unwrap_or_else(PoisonError::into_inner);
            meters.speed.add_sample(chunk.size());
            meters
                .upload
                .should_emit(percent)
                .then(|| meters.speed.bytes_per_second())
        };
        if let Some(bytes_per_second) = progress {
            self.emit(UploadEvent::Progress {
                uploaded_bytes,
                total_bytes,
                percent,
                bytes_per_second,
            });
        }
    }

    fn resume_hasher(&self) {
        if let Some(hasher) = &self.lock_handles().hasher
            && hasher.resume().is_err()
        {
            warn!("hasher worker gone while resuming");
        }
    }

    /// Gate callback: ends a pause that was released without `resume()`.
    ///
    /// Returns `false` when the gate is armed again, meaning a newer pause
    /// is in effect and the callback belongs to its release.
    async fn resume_if_released(&self, generation: u64) -> bool {
        let mut session = self.session.lock().await;
        if self.generation.load(Ordering::Acquire) != generation {
            return true;
        }
        if self.gate.is_armed() {
            return false;
        }
        if let UploadState::Paused(_) = session.state
            && let Ok(next) = session.apply(SessionEvent::Resume)
        {
            self.replace(&mut session, next);
            self.resume_hasher();
            info!("pause timed out, upload resumed");
        }
        true
    }
}

async fn resume_after_release(weak: Weak<Shared>, generation: u64) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    if !shared.resume_if_released(generation).await {
        // Drained while a newer pause is armed. Waiting here would hold up
        // the drain, so follow that pause from a task of its own.
        tokio::spawn(follow_pause(weak, generation));
    }
}

async fn follow_pause(weak: Weak<Shared>, generation: u64) {
    loop {
        let Some((gate, session_token)) = weak.upgrade().map(|shared| {
            let token = shared.lock_handles().session_token.clone();
            (shared.gate.clone(), token)
        }) else {
            return;
        };
        tokio::select! {
            _ = session_token.cancelled() => return,
            _ = gate.await_release() => {}
        }
        let Some(shared) = weak.upgrade() else {
            return;
        };
        if shared.resume_if_released(generation).await {
            return;
        }
    }
}

async fn send_chunk(
    transport: &dyn ChunkTransport,
    reader: &ChunkReader,
    chunk: &ChunkDescriptor,
    file_name: String,
    chunk_id: String,
) -> Result<(), UploadError> {
    let data = reader.read_chunk(chunk).await?;
    expect_len(data.len() as u64, chunk.size())?;

    let reply = transport.upload_chunk(file_name, chunk_id, data).await?;
    if !reply.is_stored() {
        return Err(UploadError::Server {
            code: CODE_SERVER_ERROR,
            msg: format!("chunk {} not stored", reply.hash),
        });
    }
    Ok(())
}

fn expect_len(actual: u64, expected: u64) -> Result<(), UploadError> {
    if actual == expected {
        return Ok(());
    }
    Err(UploadError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("file changed: expected {expected} bytes, read {actual}"),
    )))
}
