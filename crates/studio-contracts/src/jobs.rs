use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{StudioError, StudioResult};
use crate::media::{Credential, GenerationResult, Modality, ProviderId};

pub type JobId = String;
pub type ParamBag = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Success,
    Error,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Running, Self::Success)
                | (Self::Running, Self::Error)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the UI hands to the queue.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub modality: Modality,
    pub provider: ProviderId,
    pub model: String,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub params: ParamBag,
    pub credential: Credential,
    pub save_to_gallery: bool,
}

impl JobDescriptor {
    pub fn new(
        modality: Modality,
        provider: ProviderId,
        model: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            modality,
            provider,
            model: model.into(),
            prompt: prompt.into(),
            negative_prompt: None,
            params: Map::new(),
            credential: Credential::empty(),
            save_to_gallery: false,
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_negative_prompt(mut self, negative_prompt: impl Into<String>) -> Self {
        let negative_prompt = negative_prompt.into();
        self.negative_prompt = (!negative_prompt.trim().is_empty()).then_some(negative_prompt);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_params(mut self, params: ParamBag) -> Self {
        for (key, value) in params {
            self.params.insert(key, value);
        }
        self
    }

    pub fn save_to_gallery(mut self, enabled: bool) -> Self {
        self.save_to_gallery = enabled;
        self
    }
}

/// One unit of work owned by the job queue. State, result and error are
/// only reachable through the transition methods so the invariants hold:
/// result is set iff `Success`, error is set iff `Error`.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub id: JobId,
    pub modality: Modality,
    pub provider: ProviderId,
    pub model: String,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub params: ParamBag,
    pub progress: String,
    pub storage_warning: Option<String>,
    pub save_to_gallery: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    state: JobState,
    result: Option<GenerationResult>,
    error: Option<String>,
    credential: Option<Credential>,
}

impl GenerationJob {
    pub fn from_descriptor(id: impl Into<JobId>, descriptor: JobDescriptor) -> Self {
        Self {
            id: id.into(),
            modality: descriptor.modality,
            provider: descriptor.provider,
            model: descriptor.model,
            prompt: descriptor.prompt,
            negative_prompt: descriptor.negative_prompt,
            params: descriptor.params,
            progress: "Queued.".to_string(),
            storage_warning: None,
            save_to_gallery: descriptor.save_to_gallery,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            state: JobState::Queued,
            result: None,
            error: None,
            credential: Some(descriptor.credential),
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn result(&self) -> Option<&GenerationResult> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Present only while the job is queued or running.
    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn start(&mut self) -> StudioResult<()> {
        self.transition(JobState::Running)?;
        self.started_at = Some(Utc::now());
        self.progress = "Starting...".to_string();
        Ok(())
    }

    pub fn succeed(&mut self, result: GenerationResult) -> StudioResult<()> {
        self.transition(JobState::Success)?;
        self.result = Some(result);
        self.progress = "Ready.".to_string();
        self.finish();
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> StudioResult<()> {
        self.transition(JobState::Error)?;
        self.error = Some(message.into());
        self.progress = "Failed.".to_string();
        self.finish();
        Ok(())
    }

    pub fn set_progress(&mut self, message: impl Into<String>) {
        if self.state == JobState::Running {
            self.progress = message.into();
        }
    }

    /// Compact, credential-free view used by the event journal.
    pub fn summary(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("job_id".to_string(), json!(self.id));
        payload.insert("modality".to_string(), json!(self.modality));
        payload.insert("provider".to_string(), json!(self.provider));
        payload.insert("model".to_string(), json!(self.model));
        payload.insert("state".to_string(), json!(self.state));
        payload.insert("progress".to_string(), json!(self.progress));
        if let Some(result) = &self.result {
            payload.insert("result".to_string(), json!(result.summary()));
        }
        if let Some(error) = &self.error {
            payload.insert("error".to_string(), json!(error));
        }
        payload
    }

    fn transition(&mut self, next: JobState) -> StudioResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(StudioError::Validation(format!(
                "job {} cannot move from {} to {}",
                self.id, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
        self.credential = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaItem;

    fn job() -> GenerationJob {
        let descriptor = JobDescriptor::new(Modality::Image, ProviderId::Dryrun, "dryrun-image", "a cat")
            .with_credential(Credential::new("token"))
            .with_param("aspectRatio", json!("1:1"));
        GenerationJob::from_descriptor("job-1", descriptor)
    }

    #[test]
    fn transitions_only_move_forward() -> anyhow::Result<()> {
        let mut job = job();
        assert!(job.succeed(GenerationResult::Images(Vec::new())).is_err());
        job.start()?;
        assert!(job.start().is_err());
        job.fail("boom")?;
        assert!(job.start().is_err());
        assert!(job.succeed(GenerationResult::Images(Vec::new())).is_err());
        assert_eq!(job.state(), JobState::Error);
        Ok(())
    }

    #[test]
    fn result_and_error_follow_state() -> anyhow::Result<()> {
        let mut ok = job();
        ok.start()?;
        ok.succeed(GenerationResult::Images(vec![MediaItem::bytes(
            Modality::Image,
            vec![1, 2],
            "image/png",
        )]))?;
        assert!(ok.result().is_some());
        assert!(ok.error().is_none());

        let mut failed = job();
        failed.start()?;
        failed.fail("provider down")?;
        assert!(failed.result().is_none());
        assert_eq!(failed.error(), Some("provider down"));
        Ok(())
    }

    #[test]
    fn credential_is_dropped_once_terminal() -> anyhow::Result<()> {
        let mut job = job();
        assert!(job.credential().is_some());
        job.start()?;
        assert!(job.credential().is_some());
        job.fail("nope")?;
        assert!(job.credential().is_none());
        assert!(!serde_json::to_string(&job.summary())?.contains("token"));
        Ok(())
    }

    #[test]
    fn progress_only_updates_while_running() -> anyhow::Result<()> {
        let mut job = job();
        job.set_progress("ignored");
        assert_eq!(job.progress, "Queued.");
        job.start()?;
        job.set_progress("Rendering...");
        assert_eq!(job.progress, "Rendering...");
        Ok(())
    }
}
