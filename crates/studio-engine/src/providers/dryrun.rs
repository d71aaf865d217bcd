use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;

use image::{ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};
use studio_contracts::error::{StudioError, StudioResult};
use studio_contracts::media::{Credential, GenerationResult, MediaItem, Modality, ProviderId};

use super::shapes::wav_from_pcm16;
use super::{AsyncHandle, GenerationAdapter, GenerationRequest, PollOutcome, Submission};
use crate::polling::PollPolicy;

const DEFAULT_SIZE: u32 = 256;
const MAX_SIZE: u32 = 1024;
const AUDIO_SAMPLE_RATE: u32 = 16_000;

/// Offline provider with deterministic output. Images are solid colours
/// derived from the prompt; audio is silence; video completes after a fixed
/// number of polls. Setting the `simulate_error` param fails the request.
pub struct DryrunAdapter {
    modality: Modality,
    video_polls: u32,
    policy: PollPolicy,
    pending: Mutex<HashMap<String, u32>>,
}

impl DryrunAdapter {
    pub fn new(modality: Modality) -> Self {
        Self {
            modality,
            video_polls: 3,
            policy: PollPolicy::new(Duration::from_millis(500), 20),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_video_polls(mut self, polls: u32) -> Self {
        self.video_polls = polls.max(1);
        self
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn image(request: &GenerationRequest) -> StudioResult<GenerationResult> {
        let (width, height) = request
            .param_str("size")
            .and_then(parse_dims)
            .unwrap_or((DEFAULT_SIZE, DEFAULT_SIZE));
        let count = request.param_u64("n").unwrap_or(1).clamp(1, 4);
        let seed = request.param_u64("seed").unwrap_or_default();
        let mut items = Vec::new();
        for idx in 0..count {
            let png = solid_png(width, height, color_from_prompt(&request.prompt, seed.wrapping_add(idx)))?;
            items.push(MediaItem::bytes(Modality::Image, png, "image/png"));
        }
        Ok(GenerationResult::Images(items))
    }

    fn audio(request: &GenerationRequest) -> GenerationResult {
        let seconds = request.param_u64("duration").unwrap_or(1).clamp(1, 10) as usize;
        let samples = vec![0u8; AUDIO_SAMPLE_RATE as usize * 2 * seconds];
        GenerationResult::Audio(MediaItem::bytes(
            Modality::Audio,
            wav_from_pcm16(&samples, AUDIO_SAMPLE_RATE, 1),
            "audio/wav",
        ))
    }
}

impl GenerationAdapter for DryrunAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::Dryrun
    }

    fn modality(&self) -> Modality {
        self.modality
    }

    fn submit(&self, request: &GenerationRequest) -> StudioResult<Submission> {
        if let Some(message) = request.param_str("simulate_error") {
            return Err(StudioError::provider(self.provider().as_str(), Some(500), message));
        }
        match self.modality {
            Modality::Image => Ok(Submission::Ready(Self::image(request)?)),
            Modality::Audio => Ok(Submission::Ready(Self::audio(request))),
            Modality::Video => {
                let id = format!("dryrun-op-{}", uuid::Uuid::new_v4());
                if let Ok(mut pending) = self.pending.lock() {
                    pending.insert(id.clone(), 0);
                }
                Ok(Submission::Pending(AsyncHandle {
                    provider: self.provider(),
                    modality: Modality::Video,
                    id,
                    model: request.model.clone(),
                }))
            }
        }
    }

    fn poll(&self, handle: &AsyncHandle, _credential: &Credential) -> StudioResult<PollOutcome> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| StudioError::Storage("dryrun operation table poisoned".to_string()))?;
        let Some(count) = pending.get_mut(&handle.id) else {
            return Ok(PollOutcome::Failed(format!("unknown operation {}", handle.id)));
        };
        *count += 1;
        if *count < self.video_polls {
            return Ok(PollOutcome::Pending);
        }
        pending.remove(&handle.id);
        Ok(PollOutcome::Done(GenerationResult::Video(MediaItem::bytes(
            Modality::Video,
            placeholder_mp4(&handle.id),
            "video/mp4",
        ))))
    }

    fn poll_policy(&self) -> Option<PollPolicy> {
        Some(self.policy)
    }
}

fn parse_dims(size: &str) -> Option<(u32, u32)> {
    let (w, h) = size.trim().to_ascii_lowercase().split_once('x').map(|(w, h)| {
        (w.trim().parse::<u32>().ok(), h.trim().parse::<u32>().ok())
    })?;
    Some((w?.clamp(1, MAX_SIZE), h?.clamp(1, MAX_SIZE)))
}

fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn solid_png(width: u32, height: u32, (r, g, b): (u8, u8, u8)) -> StudioResult<Vec<u8>> {
    let image = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|err| StudioError::Storage(format!("failed to encode dryrun image: {err}")))?;
    Ok(out.into_inner())
}

/// An `ftyp` box followed by the operation id; enough for sniffers and tests.
fn placeholder_mp4(operation: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&24u32.to_be_bytes());
    out.extend_from_slice(b"ftypisom");
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(b"isommp41");
    out.extend_from_slice(operation.as_bytes());
    out
}
