//! Round and output lifecycle: turns prompts into batches of generation work and writes the
//! results back into the [`SessionStore`].
//!
//! Spawned work only ever carries ids. Each write-back re-looks-up its output and is dropped
//! silently when the round was removed, archived or the output re-dispatched in the meantime.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::gateway::{GatewayError, GenerationGateway, GenerationRequest};
use crate::gemini::preview;
use crate::models::{
    AiEditSession, CaptionState, ImageState, Output, Round, Settings, SettingsPatch, SourceImage, MAX_BATCH_SIZE,
    MIN_BATCH_SIZE,
};
use crate::presets;
use crate::prompt;
use crate::store::SessionStore;

#[derive(Debug, Error)]
pub enum StudioError {
    #[error("prompt is empty")]
    EmptyPrompt,
    #[error("unknown style: {0}")]
    UnknownStyle(String),
    #[error("unknown layout: {0}")]
    UnknownLayout(String),
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("batch size must be between 1 and 6, got {0}")]
    BatchSize(u8),
    #[error("no AI edit session is open")]
    NoEditSession,
    #[error("output has no finished image")]
    OutputNotReady,
    #[error("output changed while the edit was running")]
    EditSuperseded,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// A value produced synchronously plus the background work it started.
pub struct Dispatch<T> {
    pub value: T,
    tasks: Vec<JoinHandle<()>>,
}

impl<T> Dispatch<T> {
    /// Leaves the spawned work running on its own and returns the value.
    pub fn detach(self) -> T {
        debug!("{} task(s) left running in the background", self.tasks.len());
        self.value
    }

    /// Waits for every spawned task to finish writing back, then returns the value.
    #[cfg(test)]
    pub async fn settled(self) -> T {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Generation task failed: {}", e);
            }
        }
        self.value
    }
}

#[derive(Debug, Clone, Copy)]
struct Target {
    round_id: Uuid,
    output_id: Uuid,
    attempt: u32,
}

pub struct Studio {
    store: Arc<SessionStore>,
    gateway: Arc<dyn GenerationGateway>,
}

impl Studio {
    pub fn new(store: Arc<SessionStore>, gateway: Arc<dyn GenerationGateway>) -> Self {
        Self { store, gateway }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<dyn GenerationGateway> {
        &self.gateway
    }

    /// Submits `prompt` with the current settings. The round is in the feed, all outputs pending,
    /// before this returns; results arrive through the spawned tasks.
    pub fn create_round(&self, prompt: &str) -> Result<Dispatch<Round>, StudioError> {
        if prompt.trim().is_empty() {
            return Err(StudioError::EmptyPrompt);
        }

        let (round, request) = self.store.update(|state| {
            let settings = &state.settings;
            let system_instruction =
                prompt::system_instruction(&settings.style, settings.uploaded_image.is_some());
            let full_prompt = prompt::full_prompt(
                &system_instruction,
                prompt::layout_instruction(Some(&settings.layout)),
                prompt,
            );
            let round = Round {
                id: Uuid::new_v4(),
                prompt: prompt.to_string(),
                system_instruction,
                created_at: Utc::now(),
                output_mode: settings.style.clone(),
                layout: Some(settings.layout.clone()),
                uploaded_image: settings.uploaded_image.clone(),
                outputs: (0..settings.batch_size)
                    .map(|_| Output::pending(&settings.model, &settings.style, prompt))
                    .collect(),
            };
            let request = GenerationRequest {
                model: presets::model_string(&settings.model),
                prompt: full_prompt,
                image: settings.uploaded_image.clone(),
            };
            state.feed.insert(0, round.clone());
            (round, request)
        });

        info!(
            "🚀 Round {} created: {} output(s) on {} for prompt: {}",
            round.id,
            round.outputs.len(),
            request.model,
            preview(prompt)
        );

        let tasks = round
            .outputs
            .iter()
            .flat_map(|output| {
                let target = Target { round_id: round.id, output_id: output.id, attempt: output.attempt };
                self.dispatch(target, request.clone(), prompt.to_string(), false)
            })
            .collect();
        Ok(Dispatch { value: round, tasks })
    }

    /// Submits an existing round's prompt again with the current settings.
    pub fn rerun_round(&self, round_id: Uuid) -> Result<Dispatch<Round>, StudioError> {
        let prompt = self
            .store
            .read(|s| s.round(round_id).map(|r| r.prompt.clone()))
            .ok_or(StudioError::NotFound("round"))?;
        self.create_round(&prompt)
    }

    /// Re-runs one output with `new_prompt`, keeping the round's frozen instruction and layout.
    /// `None` when the round or output no longer exists.
    pub fn regenerate_output(&self, round_id: Uuid, output_id: Uuid, new_prompt: &str) -> Option<Dispatch<Output>> {
        let (output, request) = self
            .store
            .try_update(|state| {
                let round = state.round_mut(round_id).ok_or(StudioError::NotFound("round"))?;
                let full_prompt = prompt::full_prompt(
                    &round.system_instruction,
                    prompt::layout_instruction(round.layout.as_deref()),
                    new_prompt,
                );
                let image = round.uploaded_image.clone();
                let output = round.output_mut(output_id).ok_or(StudioError::NotFound("output"))?;
                output.image = ImageState::Pending;
                output.started_at = Utc::now();
                output.total_time = None;
                output.prompt = new_prompt.to_string();
                output.caption = CaptionState::Generating;
                output.attempt += 1;
                let request = GenerationRequest { model: presets::model_string(&output.model), prompt: full_prompt, image };
                let reset = (output.clone(), request);
                if state.ai_edit.as_ref().is_some_and(|a| a.round_id == round_id && a.output_id == output_id) {
                    state.ai_edit = None;
                }
                Ok::<_, StudioError>(reset)
            })
            .ok()?;

        info!("🔄 Regenerating output {} of round {} (attempt {})", output_id, round_id, output.attempt);
        let target = Target { round_id, output_id, attempt: output.attempt };
        let tasks = self.dispatch(target, request, new_prompt.to_string(), true).into();
        Some(Dispatch { value: output, tasks })
    }

    pub fn set_output_editing(&self, round_id: Uuid, output_id: Uuid, editing: bool) -> bool {
        self.store
            .try_update(|state| {
                let output = state.output_mut(round_id, output_id).ok_or(())?;
                output.is_editing = editing;
                Ok::<_, ()>(())
            })
            .is_ok()
    }

    fn dispatch(&self, target: Target, request: GenerationRequest, caption_prompt: String, leave_edit_mode: bool) -> [JoinHandle<()>; 2] {
        let generation = tokio::spawn(run_generation(
            self.store.clone(),
            self.gateway.clone(),
            target,
            request,
            leave_edit_mode,
        ));
        let caption = tokio::spawn(run_caption(self.store.clone(), self.gateway.clone(), target, caption_prompt));
        [generation, caption]
    }

    // --- AI edit ---

    pub fn open_ai_edit(&self, round_id: Uuid, output_id: Uuid) -> Result<AiEditSession, StudioError> {
        self.store.try_update(|state| {
            let round = state.round(round_id).ok_or(StudioError::NotFound("round"))?;
            let output = round.output(output_id).ok_or(StudioError::NotFound("output"))?;
            let image = output.output_data().ok_or(StudioError::OutputNotReady)?.to_string();
            let session = AiEditSession { round_id, output_id, image };
            state.ai_edit = Some(session.clone());
            Ok(session)
        })
    }

    pub fn close_ai_edit(&self) {
        self.store.update(|state| state.ai_edit = None);
    }

    /// Applies a free-form edit to the open session's current image. Success replaces the
    /// output's image and the session's working image, so further edits build on it. The result
    /// is discarded if the output was regenerated or otherwise changed in the meantime.
    pub async fn apply_ai_edit(&self, edit_prompt: &str) -> Result<String, StudioError> {
        if edit_prompt.trim().is_empty() {
            return Err(StudioError::EmptyPrompt);
        }
        let (session, attempt) = self
            .store
            .read(|s| {
                let session = s.ai_edit.clone()?;
                let attempt = s.round(session.round_id).and_then(|r| r.output(session.output_id)).map(|o| o.attempt);
                Some((session, attempt))
            })
            .ok_or(StudioError::NoEditSession)?;
        let attempt = attempt.ok_or(StudioError::NotFound("output"))?;
        let image = SourceImage::from_data_url(&session.image)
            .map_err(|e| GatewayError::InvalidInput(e.to_string()))?;
        let request = GenerationRequest {
            model: presets::image_editing_model().model_string.to_string(),
            prompt: edit_prompt.to_string(),
            image: Some(image),
        };

        info!("🎨 Applying AI edit to output {}: {}", session.output_id, preview(edit_prompt));
        let data = self.gateway.generate(&request).await?;

        self.store.update(|state| {
            let still_open = |s: &Option<AiEditSession>| s.as_ref().is_some_and(|a| a.output_id == session.output_id);
            let Some(output) = state.output_mut(session.round_id, session.output_id) else {
                if still_open(&state.ai_edit) {
                    state.ai_edit = None;
                }
                return Err(StudioError::NotFound("output"));
            };
            if output.attempt != attempt || output.output_data() != Some(session.image.as_str()) {
                debug!("Dropping AI edit for output {}: output changed while editing", session.output_id);
                return Err(StudioError::EditSuperseded);
            }
            output.image = ImageState::Ready { data: data.clone() };
            output.prompt.push_str(&format!(" | Edited with: {edit_prompt}"));
            if let Some(active) = state.ai_edit.as_mut().filter(|a| a.output_id == session.output_id) {
                active.image = data.clone();
            }
            Ok(data)
        })
    }

    // --- Settings ---

    /// Attaching an image forces the image-editing model, remembering the previous choice;
    /// clearing it restores that choice.
    pub fn set_uploaded_image(&self, image: Option<SourceImage>) -> Settings {
        self.store.update_settings(|settings| {
            match image {
                Some(image) => {
                    let capable = presets::model(&settings.model).is_some_and(|m| m.supports_image_input());
                    if !capable {
                        let editor = presets::image_editing_model().key.to_string();
                        info!("Switching model {} -> {} for image editing", settings.model, editor);
                        settings.previous_model = Some(std::mem::replace(&mut settings.model, editor));
                    }
                    settings.uploaded_image = Some(image);
                }
                None => {
                    settings.uploaded_image = None;
                    if let Some(previous) = settings.previous_model.take() {
                        settings.model = previous;
                    }
                }
            }
            settings.clone()
        })
    }

    /// Validates every field of `patch` before applying any of them.
    pub fn update_settings(&self, patch: SettingsPatch) -> Result<Settings, StudioError> {
        if let Some(style) = &patch.style {
            presets::style(style).ok_or_else(|| StudioError::UnknownStyle(style.clone()))?;
        }
        if let Some(layout) = &patch.layout {
            presets::layout(layout).ok_or_else(|| StudioError::UnknownLayout(layout.clone()))?;
        }
        if let Some(model) = &patch.model {
            presets::model(model).ok_or_else(|| StudioError::UnknownModel(model.clone()))?;
        }
        if let Some(size) = patch.batch_size {
            if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&size) {
                return Err(StudioError::BatchSize(size));
            }
        }

        Ok(self.store.update_settings(|settings| {
            if let Some(style) = patch.style {
                settings.style = style;
            }
            if let Some(layout) = patch.layout {
                settings.layout = layout;
            }
            if let Some(model) = patch.model {
                // An explicit pick replaces whatever the image upload remembered.
                settings.previous_model = None;
                settings.model = model;
            }
            if let Some(size) = patch.batch_size {
                settings.batch_size = size;
            }
            settings.clone()
        }))
    }

    pub fn settings(&self) -> Settings {
        self.store.read(|s| s.settings.clone())
    }

    // --- Feed and history ---

    pub fn remove_round(&self, round_id: Uuid) -> bool {
        self.store
            .try_update(|state| {
                let before = state.feed.len();
                state.feed.retain(|r| r.id != round_id);
                if state.feed.len() == before {
                    return Err(());
                }
                if state.ai_edit.as_ref().is_some_and(|a| a.round_id == round_id) {
                    state.ai_edit = None;
                }
                Ok(())
            })
            .is_ok()
    }

    /// Moves the whole feed to the front of the history. Work still in flight for those rounds
    /// can no longer write back, so it is settled as failed. Returns the number archived.
    pub fn reset(&self) -> usize {
        let archived = self.store.update(|state| {
            let mut archived = std::mem::take(&mut state.feed);
            archived.iter_mut().flat_map(|r| r.outputs.iter_mut()).for_each(Output::interrupt);
            let count = archived.len();
            archived.append(&mut state.history);
            state.history = archived;
            state.ai_edit = None;
            count
        });
        info!("🗂️ Archived {} round(s) to history", archived);
        archived
    }

    pub fn history(&self) -> Vec<Round> {
        self.store.read(|s| s.history.clone())
    }

    pub fn restore_from_history(&self, round_id: Uuid) -> Result<Round, StudioError> {
        self.store.try_update(|state| {
            let idx = state
                .history
                .iter()
                .position(|r| r.id == round_id)
                .ok_or(StudioError::NotFound("history round"))?;
            let round = state.history.remove(idx);
            state.feed.insert(0, round.clone());
            Ok(round)
        })
    }

    pub fn delete_from_history(&self, round_id: Uuid) -> bool {
        self.store
            .try_update(|state| {
                let before = state.history.len();
                state.history.retain(|r| r.id != round_id);
                if state.history.len() == before { Err(()) } else { Ok(()) }
            })
            .is_ok()
    }

    pub fn clear_history(&self) -> usize {
        self.store.update(|state| std::mem::take(&mut state.history).len())
    }

    /// Turns a photo into a starting prompt.
    pub async fn describe_image(&self, image: &SourceImage) -> Result<String, StudioError> {
        Ok(self.gateway.describe_image(image).await?)
    }
}

async fn run_generation(
    store: Arc<SessionStore>,
    gateway: Arc<dyn GenerationGateway>,
    target: Target,
    request: GenerationRequest,
    leave_edit_mode: bool,
) {
    let result = gateway.generate(&request).await;
    if let Err(e) = &result {
        error!("❌ Output {} failed: {}", target.output_id, e);
    }
    let applied = store.update_output(target.round_id, target.output_id, target.attempt, |output| {
        output.image = match result {
            Ok(data) => ImageState::Ready { data },
            Err(_) => ImageState::Error,
        };
        output.finish_timing();
        if leave_edit_mode {
            output.is_editing = false;
        }
    });
    if applied {
        debug!("Output {} of round {} settled", target.output_id, target.round_id);
    } else {
        debug!("Dropping generation result for output {}: round removed or output superseded", target.output_id);
    }
}

async fn run_caption(store: Arc<SessionStore>, gateway: Arc<dyn GenerationGateway>, target: Target, prompt: String) {
    let result = gateway.caption(&prompt).await;
    if let Err(e) = &result {
        error!("❌ Caption for output {} failed: {}", target.output_id, e);
    }
    let applied = store.update_output(target.round_id, target.output_id, target.attempt, |output| {
        output.caption = match result {
            Ok(text) => CaptionState::Ready { text },
            Err(_) => CaptionState::Error,
        };
    });
    if !applied {
        debug!("Dropping caption for output {}: round removed or output superseded", target.output_id);
    }
}
