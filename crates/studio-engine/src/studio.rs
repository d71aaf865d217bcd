//! Process-level wiring: one settings store, one gallery, one generator and
//! one job queue per data directory, plus chat sessions that share them.

use std::collections::BTreeMap;
use std::fs;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde_json::Value;
use studio_contracts::chat::{ChatInput, ToolArguments, ToolKind};
use studio_contracts::conversation::{ChatMessage, Conversation};
use studio_contracts::error::{StudioError, StudioResult};
use studio_contracts::events::EventJournal;
use studio_contracts::gallery::MediaMetadata;
use studio_contracts::jobs::{JobDescriptor, JobId};
use studio_contracts::media::{Credential, GenerationResult, MediaItem, Modality, ProviderId};
use studio_contracts::models::{Capability, ModelRegistry, ModelSelector};
use studio_contracts::settings::{keys, SettingsStore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chat::{ChatClient, ChatRequest, DryrunChatClient, ProxyChatClient};
use crate::config::{lock_settings, resolve_credential, SharedSettings, StudioConfig};
use crate::gallery::{BlobStore, FsBlobStore, Gallery, MediaFetcher, MemoryBlobStore};
use crate::generator::Generator;
use crate::http::ProxyClient;
use crate::providers::{default_registry, AdapterRegistry, DryrunAdapter, GenerationRequest};
use crate::queue::{JobQueue, JobWorker, MediaSink};
use crate::scheduler::{CancelToken, Scheduler, ThreadScheduler, VirtualScheduler};
use crate::tool_loop::{LoopOutcome, ToolLoop, ToolRunner};

/// Replaceable collaborators. `Studio::init` fills these with the real
/// filesystem and network pieces; `Studio::offline` with in-process ones.
pub struct StudioParts {
    pub settings: SharedSettings,
    pub blobs: Arc<dyn BlobStore>,
    pub scheduler: Arc<dyn Scheduler>,
    pub adapters: AdapterRegistry,
    pub chat_client: Arc<dyn ChatClient>,
    pub fetcher: Option<Arc<dyn MediaFetcher>>,
    pub journal: Option<EventJournal>,
}

pub struct Studio {
    config: StudioConfig,
    settings: SharedSettings,
    selector: Arc<ModelSelector>,
    generator: Generator,
    queue: JobQueue,
    gallery: Arc<Gallery>,
    chat_client: Arc<dyn ChatClient>,
    worker: Option<JobWorker>,
}

impl Studio {
    /// Opens (or creates) the data directory and restores the gallery.
    pub fn init(config: StudioConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("failed to create data dir {}", config.data_dir.display())
        })?;
        let proxy = ProxyClient::new(config.proxy_base.clone());
        let settings: SharedSettings =
            Arc::new(Mutex::new(SettingsStore::open(config.settings_path())));
        let journal = EventJournal::new(config.journal_path(), Uuid::new_v4().to_string());
        let parts = StudioParts {
            settings: settings.clone(),
            blobs: Arc::new(FsBlobStore::new(config.blob_dir())),
            scheduler: Arc::new(ThreadScheduler::new()),
            adapters: default_registry(&proxy),
            chat_client: Arc::new(ProxyChatClient::new(proxy.clone())),
            fetcher: Some(Arc::new(ProxyMediaFetcher {
                client: proxy,
                settings,
            })),
            journal: Some(journal),
        };
        let studio = Self::assemble(config, parts);
        match studio.gallery.hydrate() {
            Ok(count) => debug!(count, "gallery restored"),
            Err(err) => warn!(error = %err, "failed to restore gallery"),
        }
        info!(
            data_dir = %studio.config.data_dir.display(),
            proxy = %studio.config.proxy_base,
            "studio ready"
        );
        Ok(studio)
    }

    /// Dryrun-only studio with in-memory settings and blobs and a virtual
    /// clock. Nothing touches the disk or the network.
    pub fn offline(config: StudioConfig) -> Self {
        let mut adapters = AdapterRegistry::new();
        for modality in Modality::ALL {
            adapters.register(DryrunAdapter::new(modality));
        }
        Self::assemble(
            config,
            StudioParts {
                settings: Arc::new(Mutex::new(SettingsStore::in_memory())),
                blobs: Arc::new(MemoryBlobStore::new()),
                scheduler: Arc::new(VirtualScheduler::new()),
                adapters,
                chat_client: Arc::new(DryrunChatClient),
                fetcher: None,
                journal: None,
            },
        )
    }

    pub fn assemble(config: StudioConfig, parts: StudioParts) -> Self {
        let settings = parts.settings;
        let selector = Arc::new(ModelSelector::new(Some(load_model_cache(&settings))));
        let mut gallery = Gallery::new(settings.clone(), config.gallery_max_items)
            .with_blob_store(parts.blobs);
        if let Some(fetcher) = parts.fetcher {
            gallery = gallery.with_fetcher(fetcher);
        }
        let gallery = Arc::new(gallery);
        let generator = Generator::new(
            Arc::new(parts.adapters),
            parts.scheduler,
            config.poll,
            CancelToken::new(),
        );
        let sink: Arc<dyn MediaSink> = gallery.clone();
        let queue = JobQueue::with_parts(
            generator.clone(),
            config.job_history_cap,
            Some(sink),
            parts.journal,
        );
        Self {
            config,
            settings,
            selector,
            generator,
            queue,
            gallery,
            chat_client: parts.chat_client,
            worker: None,
        }
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.selector.registry
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn credential_for(&self, provider: ProviderId) -> StudioResult<Credential> {
        Ok(resolve_credential(&*lock_settings(&self.settings)?, provider))
    }

    /// Fills in a missing credential and model, remembers the choice for
    /// the modality, and queues the job.
    pub fn submit(&self, mut descriptor: JobDescriptor) -> StudioResult<JobId> {
        {
            let mut settings = lock_settings(&self.settings)?;
            if descriptor.credential.is_blank() {
                descriptor.credential = resolve_credential(&settings, descriptor.provider);
            }
            if descriptor.model.trim().is_empty() {
                descriptor.model = resolve_model(
                    &settings,
                    &self.selector,
                    descriptor.provider,
                    descriptor.modality,
                )?;
            }
            let mode = descriptor.modality.as_str();
            remember(
                &mut settings,
                &keys::last_model(descriptor.provider, mode),
                &descriptor.model,
            );
            remember(
                &mut settings,
                &keys::provider_for(descriptor.modality),
                descriptor.provider.as_str(),
            );
        }
        self.queue.enqueue(descriptor)
    }

    /// Starts the background runner. Calling it twice is a no-op.
    pub fn start_worker(&mut self) -> StudioResult<()> {
        if self.worker.as_ref().is_some_and(JobWorker::is_running) {
            return Ok(());
        }
        self.worker = Some(JobWorker::spawn(self.queue.clone())?);
        Ok(())
    }

    pub fn chat_session(&self) -> StudioResult<ChatSession> {
        let history: Vec<ChatMessage> = lock_settings(&self.settings)?
            .get_typed(keys::CHAT_HISTORY)
            .unwrap_or_default();
        Ok(ChatSession {
            settings: self.settings.clone(),
            selector: self.selector.clone(),
            remote: self.chat_client.clone(),
            dryrun: DryrunChatClient,
            runner: StudioToolRunner {
                settings: self.settings.clone(),
                selector: self.selector.clone(),
                generator: self.generator.clone(),
                gallery: Some(self.gallery.clone()),
            },
            conversation: Conversation::from_messages(history),
            max_rounds: self.config.tool_rounds,
        })
    }

    /// Cancels in-flight polling, stops the worker, frees every display
    /// reference and flushes settings.
    pub fn teardown(&mut self) -> Result<()> {
        self.generator.cancel_token().cancel();
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
        let revoked = self.gallery.teardown();
        lock_settings(&self.settings)?
            .flush()
            .context("failed to flush settings")?;
        info!(revoked, "studio closed");
        Ok(())
    }
}

/// Reads provider model listings cached in settings as
/// `{"image": [...], "chat": [...]}` and merges them into the catalog.
fn load_model_cache(settings: &SharedSettings) -> ModelRegistry {
    let mut registry = ModelRegistry::default();
    let Ok(settings) = lock_settings(settings) else {
        return registry;
    };
    for provider in ProviderId::ALL {
        let Some(cache) =
            settings.get_typed::<BTreeMap<String, Vec<String>>>(&keys::model_cache(provider))
        else {
            continue;
        };
        for (capability, names) in cache {
            match Capability::parse(&capability) {
                Some(capability) => {
                    let added = registry.merge_listing(provider, capability, &names);
                    debug!(%provider, %capability, added, "merged cached models");
                }
                None => debug!(%provider, capability, "ignoring unknown model cache key"),
            }
        }
    }
    registry
}

fn resolve_model(
    settings: &SettingsStore,
    selector: &ModelSelector,
    provider: ProviderId,
    modality: Modality,
) -> StudioResult<String> {
    let remembered = settings.get_string(&keys::last_model(provider, modality.as_str()));
    selector
        .select(provider, remembered.as_deref(), Capability::from(modality))
        .map(|selection| selection.model.name)
        .map_err(StudioError::Validation)
}

fn remember(settings: &mut SettingsStore, key: &str, value: &str) {
    if let Err(err) = settings.set(key, Value::String(value.to_string())) {
        warn!(key, error = %format!("{err:#}"), "failed to save preference");
    }
}

struct ProxyMediaFetcher {
    client: ProxyClient,
    settings: SharedSettings,
}

impl MediaFetcher for ProxyMediaFetcher {
    fn fetch(&self, provider: ProviderId, url: &str) -> StudioResult<(Vec<u8>, String)> {
        let credential = resolve_credential(&*lock_settings(&self.settings)?, provider);
        self.client.fetch_media(provider, url, &credential)
    }
}

/// Runs generation tool calls with the provider and model last used for
/// the tool's modality, saving results to the gallery unless auto-save is
/// switched off.
pub struct StudioToolRunner {
    settings: SharedSettings,
    selector: Arc<ModelSelector>,
    generator: Generator,
    gallery: Option<Arc<Gallery>>,
}

impl ToolRunner for StudioToolRunner {
    fn run(&self, tool: ToolKind, arguments: &ToolArguments) -> StudioResult<GenerationResult> {
        let modality = tool.modality();
        let (provider, model, credential, auto_save) = {
            let settings = lock_settings(&self.settings)?;
            let provider = settings
                .get_string(&keys::provider_for(modality))
                .and_then(|raw| ProviderId::parse(&raw))
                .unwrap_or(ProviderId::Dryrun);
            let model = resolve_model(&settings, &self.selector, provider, modality)?;
            let auto_save = settings.get_bool(keys::GALLERY_AUTO_SAVE).unwrap_or(true);
            (provider, model, resolve_credential(&settings, provider), auto_save)
        };

        let mut request =
            GenerationRequest::new(provider, modality, model, arguments.prompt.clone(), credential);
        request.params = arguments.params.clone();
        if let Some(Value::String(negative)) = request.params.remove("negative_prompt") {
            request.negative_prompt = Some(negative).filter(|value| !value.trim().is_empty());
        }
        let result = self.generator.run(&request, &mut |message| {
            debug!(tool = tool.name(), message, "tool progress");
        })?;

        if let (true, Some(gallery)) = (auto_save, &self.gallery) {
            let media: Vec<MediaItem> = result.items().into_iter().cloned().collect();
            let outcome = gallery.save(
                &media,
                &MediaMetadata {
                    prompt: request.prompt.clone(),
                    model: request.model.clone(),
                    provider,
                },
            );
            if let Some(warning) = outcome.warning() {
                warn!(tool = tool.name(), %warning, "tool result not fully saved");
            }
        }
        Ok(result)
    }
}

/// What the caller should show after `ChatSession::apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionReply {
    Silent,
    Notice(String),
    Turn(LoopOutcome),
    Quit,
}

/// One chat window: persisted history plus the preferences that shape
/// each request.
pub struct ChatSession {
    settings: SharedSettings,
    selector: Arc<ModelSelector>,
    remote: Arc<dyn ChatClient>,
    dryrun: DryrunChatClient,
    runner: StudioToolRunner,
    conversation: Conversation,
    max_rounds: usize,
}

impl ChatSession {
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn provider(&self) -> StudioResult<ProviderId> {
        Ok(lock_settings(&self.settings)?
            .get_string(keys::CHAT_PROVIDER)
            .and_then(|raw| ProviderId::parse(&raw))
            .unwrap_or(ProviderId::Dryrun))
    }

    pub fn model(&self) -> StudioResult<String> {
        let provider = self.provider()?;
        let stored = lock_settings(&self.settings)?.get_string(keys::CHAT_MODEL);
        self.selector
            .select(provider, stored.as_deref(), Capability::Chat)
            .map(|selection| selection.model.name)
            .map_err(StudioError::Validation)
    }

    pub fn system_prompt(&self) -> StudioResult<Option<String>> {
        Ok(lock_settings(&self.settings)?.get_string(keys::SYSTEM_PROMPT))
    }

    pub fn enabled_tools(&self) -> StudioResult<Vec<ToolKind>> {
        let settings = lock_settings(&self.settings)?;
        Ok(ToolKind::ALL
            .into_iter()
            .filter(|kind| settings.get_bool(&keys::tool_enabled(kind.name())).unwrap_or(true))
            .collect())
    }

    pub fn set_provider(&mut self, raw: &str) -> StudioResult<ProviderId> {
        let provider = ProviderId::parse(raw)
            .ok_or_else(|| StudioError::Validation(format!("Unknown provider '{raw}'.")))?;
        let mut settings = lock_settings(&self.settings)?;
        settings
            .set(keys::CHAT_PROVIDER, Value::String(provider.as_str().to_string()))
            .map_err(storage)?;
        settings.remove(keys::CHAT_MODEL).map_err(storage)?;
        Ok(provider)
    }

    pub fn set_model(&mut self, raw: &str) -> StudioResult<String> {
        let provider = self.provider()?;
        let selection = self
            .selector
            .select(provider, Some(raw), Capability::Chat)
            .map_err(StudioError::Validation)?;
        if let Some(reason) = selection.fallback_reason {
            return Err(StudioError::Validation(reason));
        }
        lock_settings(&self.settings)?
            .set(keys::CHAT_MODEL, Value::String(selection.model.name.clone()))
            .map_err(storage)?;
        Ok(selection.model.name)
    }

    pub fn set_system_prompt(&mut self, prompt: Option<String>) -> StudioResult<()> {
        let mut settings = lock_settings(&self.settings)?;
        let saved = match prompt.filter(|value| !value.trim().is_empty()) {
            Some(prompt) => settings.set(keys::SYSTEM_PROMPT, Value::String(prompt)),
            None => settings.remove(keys::SYSTEM_PROMPT),
        };
        saved.map_err(storage)
    }

    pub fn set_tool_enabled(&mut self, tool: ToolKind, enabled: bool) -> StudioResult<()> {
        lock_settings(&self.settings)?
            .set(&keys::tool_enabled(tool.name()), Value::Bool(enabled))
            .map_err(storage)
    }

    pub fn clear(&mut self) -> StudioResult<()> {
        self.conversation.clear();
        lock_settings(&self.settings)?
            .remove(keys::CHAT_HISTORY)
            .map_err(storage)
    }

    /// Sends one user message and runs the tool loop. History is saved
    /// whether or not the turn succeeded.
    pub fn send(
        &mut self,
        text: &str,
        on_update: &mut dyn FnMut(&ChatMessage),
    ) -> StudioResult<LoopOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(StudioError::Validation("Message is empty.".to_string()));
        }
        let provider = self.provider()?;
        let credential = resolve_credential(&*lock_settings(&self.settings)?, provider);
        let request = ChatRequest {
            provider,
            model: self.model()?,
            credential,
            system_prompt: self.system_prompt()?,
            messages: Vec::new(),
            tools: self.enabled_tools()?,
        };
        self.conversation.push(ChatMessage::user(text))?;

        let client: &dyn ChatClient = if provider == ProviderId::Dryrun {
            &self.dryrun
        } else {
            self.remote.as_ref()
        };
        let result = ToolLoop::new(client, &self.runner, self.max_rounds).run(
            &mut self.conversation,
            &request,
            on_update,
        );
        self.persist();
        result
    }

    /// Applies one parsed line from the chat box.
    pub fn apply(
        &mut self,
        input: ChatInput,
        on_update: &mut dyn FnMut(&ChatMessage),
    ) -> StudioResult<SessionReply> {
        Ok(match input {
            ChatInput::Noop => SessionReply::Silent,
            ChatInput::Quit => SessionReply::Quit,
            ChatInput::Message(text) => SessionReply::Turn(self.send(&text, on_update)?),
            ChatInput::Clear => {
                self.clear()?;
                SessionReply::Notice("Chat cleared.".to_string())
            }
            ChatInput::Help(lines) => SessionReply::Notice(lines.join("\n")),
            ChatInput::SetSystemPrompt(prompt) => {
                let cleared = prompt.is_none();
                self.set_system_prompt(prompt)?;
                SessionReply::Notice(if cleared {
                    "System prompt cleared.".to_string()
                } else {
                    "System prompt updated.".to_string()
                })
            }
            ChatInput::SetModel(raw) => {
                let model = self.set_model(&raw)?;
                SessionReply::Notice(format!("Chat model set to {model}."))
            }
            ChatInput::SetProvider(raw) => {
                let provider = self.set_provider(&raw)?;
                SessionReply::Notice(format!("Chat provider set to {provider}."))
            }
            ChatInput::ToggleTool { tool, enabled } => {
                self.set_tool_enabled(tool, enabled)?;
                let state = if enabled { "enabled" } else { "disabled" };
                SessionReply::Notice(format!("{} {state}.", tool.name()))
            }
            ChatInput::Invalid { command, reason } => {
                SessionReply::Notice(format!("/{command}: {reason}"))
            }
        })
    }

    fn persist(&self) {
        let saved = lock_settings(&self.settings).and_then(|mut settings| {
            settings
                .set_typed(keys::CHAT_HISTORY, &self.conversation.messages())
                .map_err(storage)
        });
        if let Err(err) = saved {
            warn!(error = %err, "failed to save chat history");
        }
    }
}

fn storage(err: anyhow::Error) -> StudioError {
    StudioError::Storage(format!("{err:#}"))
}
