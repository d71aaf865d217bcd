//! FIFO generation queue with a single runner.
//!
//! The job list lives behind one mutex as an `Arc<Vec<_>>` and every change
//! swaps in a new vector, so a snapshot never shows a half-applied update.
//! `claim` refuses to start a job while another is running; that check is
//! what keeps execution one-at-a-time whether jobs are driven by
//! `run_next`/`drain` on the caller's thread or by a `JobWorker`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use studio_contracts::error::{StudioError, StudioResult};
use studio_contracts::events::{EventJournal, EventPayload};
use studio_contracts::gallery::MediaMetadata;
use studio_contracts::jobs::{GenerationJob, JobDescriptor, JobId, JobState};
use studio_contracts::media::MediaItem;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::gallery::{Gallery, SaveOutcome};
use crate::generator::Generator;
use crate::providers::GenerationRequest;

/// Destination for results of jobs flagged `save_to_gallery`.
pub trait MediaSink: Send + Sync {
    fn save(&self, media: &[MediaItem], metadata: &MediaMetadata) -> SaveOutcome;
}

impl MediaSink for Gallery {
    fn save(&self, media: &[MediaItem], metadata: &MediaMetadata) -> SaveOutcome {
        Gallery::save(self, media, metadata)
    }
}

#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    jobs: Mutex<Arc<Vec<GenerationJob>>>,
    generator: Generator,
    sink: Option<Arc<dyn MediaSink>>,
    journal: Option<EventJournal>,
    history_cap: usize,
    notify: Mutex<Option<mpsc::Sender<WorkerCommand>>>,
}

impl JobQueue {
    pub fn new(generator: Generator, history_cap: usize) -> Self {
        Self::with_parts(generator, history_cap, None, None)
    }

    pub fn with_parts(
        generator: Generator,
        history_cap: usize,
        sink: Option<Arc<dyn MediaSink>>,
        journal: Option<EventJournal>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                jobs: Mutex::new(Arc::new(Vec::new())),
                generator,
                sink,
                journal,
                history_cap,
                notify: Mutex::new(None),
            }),
        }
    }

    pub fn enqueue(&self, descriptor: JobDescriptor) -> StudioResult<JobId> {
        let id = Uuid::new_v4().to_string();
        let job = GenerationJob::from_descriptor(id.clone(), descriptor);
        self.record("job_queued", job.summary());
        {
            let mut jobs = self.lock_jobs()?;
            let mut next = jobs.as_ref().clone();
            next.push(job);
            *jobs = Arc::new(next);
        }
        debug!(job = %id, "job queued");
        self.wake_worker();
        Ok(id)
    }

    pub fn snapshot(&self) -> Arc<Vec<GenerationJob>> {
        self.lock_jobs()
            .map(|jobs| Arc::clone(&jobs))
            .unwrap_or_default()
    }

    pub fn get(&self, id: &str) -> Option<GenerationJob> {
        self.snapshot().iter().find(|job| job.id == id).cloned()
    }

    pub fn running_count(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|job| job.state() == JobState::Running)
            .count()
    }

    /// Moves the oldest queued job to running, unless one already runs.
    pub fn claim(&self) -> StudioResult<Option<GenerationJob>> {
        let mut jobs = self.lock_jobs()?;
        if jobs.iter().any(|job| job.state() == JobState::Running) {
            return Ok(None);
        }
        let Some(index) = jobs.iter().position(|job| job.state() == JobState::Queued) else {
            return Ok(None);
        };
        let mut next = jobs.as_ref().clone();
        next[index].start()?;
        let claimed = next[index].clone();
        *jobs = Arc::new(next);
        drop(jobs);
        info!(job = %claimed.id, provider = %claimed.provider, modality = %claimed.modality, "job started");
        self.record("job_started", claimed.summary());
        Ok(Some(claimed))
    }

    /// Claims and runs one job on the calling thread.
    pub fn run_next(&self) -> StudioResult<Option<JobId>> {
        let Some(job) = self.claim()? else {
            return Ok(None);
        };
        self.execute(&job)?;
        self.prune(self.inner.history_cap)?;
        Ok(Some(job.id))
    }

    /// Runs queued jobs until none are left. Returns how many ran.
    pub fn drain(&self) -> StudioResult<usize> {
        let mut ran = 0;
        while self.run_next()?.is_some() {
            ran += 1;
        }
        Ok(ran)
    }

    /// Drops the oldest finished jobs beyond `cap`. Queued and running jobs
    /// are never dropped.
    pub fn prune(&self, cap: usize) -> StudioResult<usize> {
        let mut jobs = self.lock_jobs()?;
        let finished = jobs.iter().filter(|job| job.state().is_terminal()).count();
        if finished <= cap {
            return Ok(0);
        }
        let mut order: Vec<(usize, _)> = jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| job.state().is_terminal())
            .map(|(idx, job)| (idx, job.finished_at))
            .collect();
        order.sort_by_key(|(idx, finished_at)| (*finished_at, *idx));
        let dropped: HashSet<usize> = order
            .iter()
            .take(finished - cap)
            .map(|(idx, _)| *idx)
            .collect();
        let next: Vec<GenerationJob> = jobs
            .iter()
            .enumerate()
            .filter(|(idx, _)| !dropped.contains(idx))
            .map(|(_, job)| job.clone())
            .collect();
        let removed = jobs.len() - next.len();
        *jobs = Arc::new(next);
        Ok(removed)
    }

    fn execute(&self, job: &GenerationJob) -> StudioResult<()> {
        let credential = job.credential().cloned().unwrap_or_default();
        let request = GenerationRequest::from_job(job, credential);
        let outcome = self.inner.generator.run(&request, &mut |message| {
            let updated = self.update(&job.id, |entry| {
                entry.set_progress(message);
                Ok(())
            });
            if updated.is_ok() {
                let mut payload = EventPayload::new();
                payload.insert("job_id".to_string(), json!(job.id));
                payload.insert("progress".to_string(), json!(message));
                self.record("job_progress", payload);
            }
        });

        match outcome {
            Ok(result) => {
                let media = result.clone().into_items();
                let finished = self.update(&job.id, |entry| entry.succeed(result))?;
                let summary = finished.result().map(|r| r.summary()).unwrap_or_default();
                info!(job = %job.id, result = %summary, "job succeeded");
                self.record("job_succeeded", finished.summary());
                if job.save_to_gallery {
                    self.save_to_gallery(job, &media)?;
                }
            }
            Err(err) => {
                warn!(job = %job.id, kind = %err.kind(), error = %err, "job failed");
                let message = err.to_string();
                let finished = self.update(&job.id, |entry| entry.fail(message))?;
                self.record("job_failed", finished.summary());
            }
        }
        Ok(())
    }

    fn save_to_gallery(&self, job: &GenerationJob, media: &[MediaItem]) -> StudioResult<()> {
        let Some(sink) = &self.inner.sink else {
            return Ok(());
        };
        let metadata = MediaMetadata {
            prompt: job.prompt.clone(),
            model: job.model.clone(),
            provider: job.provider,
        };
        let outcome = sink.save(media, &metadata);
        let mut payload = EventPayload::new();
        payload.insert("job_id".to_string(), json!(job.id));
        payload.insert("saved".to_string(), json!(outcome.saved));
        payload.insert("evicted".to_string(), json!(outcome.evicted));
        match outcome.warning() {
            None => self.record("gallery_saved", payload),
            Some(warning) => {
                payload.insert("error".to_string(), Value::String(warning.clone()));
                self.record("gallery_save_failed", payload);
                self.update(&job.id, |entry| {
                    entry.storage_warning = Some(warning);
                    Ok(())
                })?;
            }
        }
        Ok(())
    }

    /// Applies `change` to a copy of the job and swaps the list.
    fn update<F>(&self, id: &str, change: F) -> StudioResult<GenerationJob>
    where
        F: FnOnce(&mut GenerationJob) -> StudioResult<()>,
    {
        let mut jobs = self.lock_jobs()?;
        let index = jobs
            .iter()
            .position(|job| job.id == id)
            .ok_or_else(|| StudioError::Validation(format!("unknown job {id}")))?;
        let mut next = jobs.as_ref().clone();
        change(&mut next[index])?;
        let updated = next[index].clone();
        *jobs = Arc::new(next);
        Ok(updated)
    }

    fn record(&self, event: &str, payload: EventPayload) {
        if let Some(journal) = &self.inner.journal {
            if let Err(err) = journal.record(event, payload) {
                warn!(event, error = %err, "failed to append event");
            }
        }
    }

    fn wake_worker(&self) {
        if let Ok(notify) = self.inner.notify.lock() {
            if let Some(tx) = notify.as_ref() {
                let _ = tx.send(WorkerCommand::Wake);
            }
        }
    }

    fn lock_jobs(&self) -> StudioResult<MutexGuard<'_, Arc<Vec<GenerationJob>>>> {
        self.inner
            .jobs
            .lock()
            .map_err(|_| StudioError::Storage("job queue lock poisoned".to_string()))
    }
}

enum WorkerCommand {
    Wake,
    Stop,
}

/// Background thread that drains the queue whenever a job is enqueued.
pub struct JobWorker {
    sender: Option<mpsc::Sender<WorkerCommand>>,
    handle: Option<thread::JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
    queue: JobQueue,
}

impl JobWorker {
    pub fn spawn(queue: JobQueue) -> StudioResult<Self> {
        let (tx, rx) = mpsc::channel();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let runner = WorkerLoop {
            queue: queue.clone(),
            stop_flag: Arc::clone(&stop_flag),
        };
        let handle = thread::Builder::new()
            .name("studio-job-worker".to_string())
            .spawn(move || runner.run(rx))
            .map_err(|err| StudioError::Storage(format!("job worker spawn failed: {err}")))?;
        if let Ok(mut notify) = queue.inner.notify.lock() {
            *notify = Some(tx.clone());
        }
        // Jobs enqueued before the worker existed.
        let _ = tx.send(WorkerCommand::Wake);
        Ok(Self {
            sender: Some(tx),
            handle: Some(handle),
            stop_flag,
            queue,
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Finishes the job in flight, then stops. Queued jobs stay queued.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Ok(mut notify) = self.queue.inner.notify.lock() {
            *notify = None;
        }
        if let Some(tx) = self.sender.take() {
            let _ = tx.send(WorkerCommand::Stop);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for JobWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

struct WorkerLoop {
    queue: JobQueue,
    stop_flag: Arc<AtomicBool>,
}

impl WorkerLoop {
    fn run(self, rx: mpsc::Receiver<WorkerCommand>) {
        while !self.stop_flag.load(Ordering::SeqCst) {
            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(WorkerCommand::Wake) => {}
                Ok(WorkerCommand::Stop) => break,
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
            while !self.stop_flag.load(Ordering::SeqCst) {
                match self.queue.run_next() {
                    Ok(Some(_)) => {}
                    Ok(None) => break,
                    Err(err) => {
                        warn!(error = %err, "job worker step failed");
                        break;
                    }
                }
            }
        }
        debug!("job worker stopped");
    }
}
