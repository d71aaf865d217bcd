use std::sync::Arc;

use studio_contracts::error::{StudioError, StudioResult};
use studio_contracts::media::GenerationResult;
use tracing::{debug, info};

use crate::polling::{AsyncOperation, PollPolicy};
use crate::providers::{AdapterRegistry, GenerationRequest, Submission};
use crate::scheduler::{CancelToken, Scheduler};

/// Runs one generation request end to end: validation, adapter dispatch,
/// and polling for providers that answer with an operation handle.
#[derive(Clone)]
pub struct Generator {
    registry: Arc<AdapterRegistry>,
    scheduler: Arc<dyn Scheduler>,
    default_policy: PollPolicy,
    cancel: CancelToken,
}

impl Generator {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        scheduler: Arc<dyn Scheduler>,
        default_policy: PollPolicy,
        cancel: CancelToken,
    ) -> Self {
        Self {
            registry,
            scheduler,
            default_policy,
            cancel,
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn run(
        &self,
        request: &GenerationRequest,
        progress: &mut dyn FnMut(&str),
    ) -> StudioResult<GenerationResult> {
        request.validate()?;
        self.cancel.check()?;
        let adapter = self
            .registry
            .get(request.provider, request.modality)
            .ok_or_else(|| {
                StudioError::Validation(format!(
                    "{} does not support {} generation.",
                    request.provider, request.modality
                ))
            })?;

        progress("Queueing...");
        info!(
            provider = %request.provider,
            modality = %request.modality,
            model = %request.model,
            "submitting generation"
        );
        let result = match adapter.submit(request)? {
            Submission::Ready(result) => result,
            Submission::Pending(handle) => {
                progress("Rendering... (about a minute)");
                let policy = adapter.poll_policy().unwrap_or(self.default_policy);
                debug!(operation = %handle.id, max_attempts = policy.max_attempts, "awaiting operation");
                let mut operation =
                    AsyncOperation::new(adapter, handle, request.credential.clone(), policy);
                operation.run_to_completion(
                    self.scheduler.as_ref(),
                    &self.cancel,
                    &mut |attempt, max| progress(&format!("Rendering... ({attempt}/{max})")),
                )?
            }
        };
        if result.is_empty() {
            return Err(StudioError::EmptyResult(request.provider.to_string()));
        }
        progress("Ready.");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use studio_contracts::error::ErrorKind;
    use studio_contracts::media::{Credential, GenerationResult, Modality, ProviderId};

    use super::Generator;
    use crate::polling::PollPolicy;
    use crate::providers::{AdapterRegistry, DryrunAdapter, GenerationRequest};
    use crate::scheduler::{CancelToken, VirtualScheduler};

    fn generator(video_polls: u32, max_attempts: u32) -> (Generator, Arc<VirtualScheduler>) {
        let mut registry = AdapterRegistry::new();
        registry.register(DryrunAdapter::new(Modality::Image));
        registry.register(
            DryrunAdapter::new(Modality::Video)
                .with_video_polls(video_polls)
                .with_poll_policy(PollPolicy::new(Duration::from_secs(5), max_attempts)),
        );
        let scheduler = Arc::new(VirtualScheduler::new());
        let generator = Generator::new(
            Arc::new(registry),
            scheduler.clone(),
            PollPolicy::default(),
            CancelToken::new(),
        );
        (generator, scheduler)
    }

    #[test]
    fn video_polls_until_done_and_reports_progress() -> anyhow::Result<()> {
        let (generator, scheduler) = generator(3, 10);
        let request = GenerationRequest::new(
            ProviderId::Dryrun,
            Modality::Video,
            "dryrun-video-1",
            "tide pools",
            Credential::empty(),
        );
        let mut seen = Vec::new();
        let result = generator.run(&request, &mut |message| seen.push(message.to_string()))?;
        assert!(matches!(result, GenerationResult::Video(_)));
        assert_eq!(scheduler.sleeps().len(), 2);
        assert_eq!(seen.first().map(String::as_str), Some("Queueing..."));
        assert!(seen.iter().any(|message| message == "Rendering... (about a minute)"));
        assert_eq!(seen.last().map(String::as_str), Some("Ready."));
        Ok(())
    }

    #[test]
    fn video_times_out_at_policy_limit() {
        let (generator, scheduler) = generator(50, 4);
        let request = GenerationRequest::new(
            ProviderId::Dryrun,
            Modality::Video,
            "dryrun-video-1",
            "slow",
            Credential::empty(),
        );
        let err = generator.run(&request, &mut |_| {}).err();
        assert_eq!(err.map(|err| err.kind()), Some(ErrorKind::Timeout));
        assert_eq!(scheduler.sleeps().len(), 3);
    }

    #[test]
    fn missing_adapter_is_a_validation_error() {
        let (generator, _) = generator(1, 1);
        let request = GenerationRequest::new(
            ProviderId::Dryrun,
            Modality::Audio,
            "dryrun-audio-1",
            "hum",
            Credential::empty(),
        );
        let err = generator.run(&request, &mut |_| {}).err();
        assert_eq!(err.map(|err| err.kind()), Some(ErrorKind::Validation));
    }

    #[test]
    fn cancelled_generator_refuses_new_work() {
        let (generator, _) = generator(1, 1);
        generator.cancel_token().cancel();
        let request = GenerationRequest::new(
            ProviderId::Dryrun,
            Modality::Image,
            "dryrun-image-1",
            "fox",
            Credential::empty(),
        );
        let err = generator.run(&request, &mut |_| {}).err();
        assert_eq!(err.map(|err| err.kind()), Some(ErrorKind::Cancelled));
    }
}
