//! Turn orchestrator: one user submission in, persisted messages out.
//!
//! 1. Resolve (or create) the chat and build the outbound history
//! 2. Persist the user turn before the backend is called
//! 3. Call the backend with the history, tools and generation options
//! 4. Expand the response into ordered messages (tool calls, tool results,
//!    final answer) and append them, with audio on the final answer
//! 5. On failure append an assistant message describing it instead
//!
//! Turns for one chat must not overlap; `run_turn` takes `&mut self` and
//! the UI keeps a busy flag while a turn is outstanding.

use std::collections::HashSet;
use std::rc::Rc;

use omni_types::{
    OmniError, Result,
    chat::Chat,
    config::GenerationOptions,
    event::TurnEvent,
    message::{MediaPayload, Message, Role},
    tool::ToolDescriptor,
};

use crate::event_bus::EventBus;
use crate::ports::{CompletionRequest, CompletionResponse, InferencePort, WireMessage};
use crate::repository::ConversationRepository;

/// What the user submitted.
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    pub text: String,
    pub image: Option<MediaPayload>,
    pub video: Option<MediaPayload>,
    pub audio: Option<MediaPayload>,
}

impl TurnInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_image(mut self, image: MediaPayload) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_video(mut self, video: MediaPayload) -> Self {
        self.video = Some(video);
        self
    }

    pub fn with_audio(mut self, audio: MediaPayload) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn has_media(&self) -> bool {
        self.image.is_some() || self.video.is_some() || self.audio.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && !self.has_media()
    }

    fn into_message(self) -> Message {
        let mut message = Message::user(self.text);
        message.image = self.image;
        message.video = self.video;
        message.input_audio = self.audio;
        message
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingResponse { chat_id: String },
    Failed(String),
}

/// Everything a turn appended after the user message.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub chat_id: String,
    pub appended: Vec<Message>,
    /// Backend failure already turned into a transcript entry
    pub error: Option<OmniError>,
}

pub struct TurnOrchestrator {
    repository: Rc<ConversationRepository>,
    events: EventBus<TurnEvent>,
    generation: GenerationOptions,
    system_prompt: Option<String>,
    state: TurnState,
    online: bool,
    turn_counter: u64,
}

impl TurnOrchestrator {
    pub fn new(repository: Rc<ConversationRepository>, events: EventBus<TurnEvent>) -> Self {
        Self {
            repository,
            events,
            generation: GenerationOptions::default(),
            system_prompt: None,
            state: TurnState::Idle,
            online: true,
            turn_counter: 0,
        }
    }

    pub fn with_generation(mut self, generation: GenerationOptions) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn generation_mut(&mut self) -> &mut GenerationOptions {
        &mut self.generation
    }

    pub fn state(&self) -> &TurnState {
        &self.state
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.state, TurnState::AwaitingResponse { .. })
    }

    /// False after a failure that looked like a connection problem,
    /// true again after the next successful call.
    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn turn_count(&self) -> u64 {
        self.turn_counter
    }

    /// Run one full turn. Backend failures do not surface as `Err`; they are
    /// appended to the chat and reported in `TurnOutcome::error`.
    pub async fn run_turn(
        &mut self,
        chat_id: Option<&str>,
        input: TurnInput,
        tools_enabled: bool,
        tools: &[ToolDescriptor],
        backend: &dyn InferencePort,
    ) -> Result<TurnOutcome> {
        if input.is_empty() {
            return Err(OmniError::Validation("message is empty".to_string()));
        }

        let chat = self.resolve_chat(chat_id).await?;
        let chat_id = chat.id.clone();
        self.turn_counter += 1;
        self.events.emit(TurnEvent::TurnStart { chat_id: chat_id.clone() });

        let user_message = input.into_message();
        let messages = self.build_history(&chat, &user_message, tools_enabled);

        // Optimistic write: the user's turn is kept even if the backend fails.
        let chat = match self.repository.append_message(&chat_id, user_message.clone()).await {
            Ok(Some(chat)) => chat,
            Ok(None) => return Err(self.abort_turn(&chat_id, OmniError::not_found("chat", &chat_id))),
            Err(e) => return Err(self.abort_turn(&chat_id, e)),
        };
        self.events.emit(TurnEvent::MessageAppended {
            chat_id: chat_id.clone(),
            role: Role::User,
        });

        let request = CompletionRequest {
            messages,
            tools: if tools_enabled { tools.to_vec() } else { Vec::new() },
            generation: self.generation.clone(),
        };

        self.state = TurnState::AwaitingResponse { chat_id: chat_id.clone() };
        log::info!(
            "Turn {} for chat {}: {} message(s), {} tool(s)",
            self.turn_counter,
            chat_id,
            request.messages.len(),
            request.tools.len()
        );

        let (appended, error) = match backend.chat_completion(request).await {
            Ok(response) => {
                self.set_online(true);
                let base = omni_types::now_millis().max(user_message.timestamp + 1);
                (expand_response(&chat, response, base), None)
            }
            Err(e) => {
                log::warn!("Backend call failed for chat {}: {}", chat_id, e);
                if e.indicates_offline() {
                    self.set_online(false);
                }
                (vec![Message::assistant(failure_text(&e))], Some(e))
            }
        };

        if let Err(e) = self.repository.append_messages(&chat_id, appended.clone()).await {
            return Err(self.abort_turn(&chat_id, e));
        }
        for message in &appended {
            self.events.emit(TurnEvent::MessageAppended {
                chat_id: chat_id.clone(),
                role: message.role,
            });
        }

        self.state = match error {
            Some(ref e) => TurnState::Failed(e.to_string()),
            None => TurnState::Idle,
        };
        self.events.emit(TurnEvent::TurnEnd { chat_id: chat_id.clone() });

        Ok(TurnOutcome { chat_id, appended, error })
    }

    /// Ask the backend whether it is up and update the connectivity flag.
    pub async fn probe(&mut self, backend: &dyn InferencePort) -> bool {
        match backend.health().await {
            Ok(health) => {
                if !health.is_healthy() {
                    log::warn!("Backend reachable but not ready: {}", health.status);
                }
                self.set_online(true);
            }
            Err(e) => {
                log::debug!("Health probe failed: {}", e);
                if e.indicates_offline() {
                    self.set_online(false);
                }
            }
        }
        self.online
    }

    /// Close a started turn that could not be persisted.
    fn abort_turn(&mut self, chat_id: &str, error: OmniError) -> OmniError {
        log::warn!("Turn for chat {} aborted: {}", chat_id, error);
        self.state = TurnState::Failed(error.to_string());
        self.events.emit(TurnEvent::TurnEnd { chat_id: chat_id.to_string() });
        error
    }

    async fn resolve_chat(&self, chat_id: Option<&str>) -> Result<Chat> {
        if let Some(id) = chat_id {
            if let Some(chat) = self.repository.get_chat(id).await {
                return Ok(chat);
            }
            log::warn!("Chat '{}' not found, starting a new one", id);
        }
        self.repository.create_chat().await
    }

    /// A plain-text turn with no tools and no media anywhere in the chat is
    /// sent on its own. Otherwise the whole history goes out.
    fn build_history(&self, chat: &Chat, user_message: &Message, tools_enabled: bool) -> Vec<WireMessage> {
        let needs_history = tools_enabled
            || user_message.has_media()
            || chat
                .messages
                .iter()
                .any(|m| m.has_media() || m.is_tool_related());
        if !needs_history {
            return vec![to_wire(user_message)];
        }

        let mut messages = Vec::with_capacity(chat.messages.len() + 2);
        if let Some(ref prompt) = self.system_prompt {
            if !chat.messages.iter().any(|m| m.role == Role::System) {
                messages.push(WireMessage::text(Role::System, prompt.clone()));
            }
        }
        messages.extend(chat.messages.iter().map(to_wire));
        messages.push(to_wire(user_message));
        messages
    }

    fn set_online(&mut self, online: bool) {
        if self.online != online {
            self.online = online;
            log::info!("Backend is now {}", if online { "online" } else { "offline" });
            self.events.emit(TurnEvent::ConnectivityChanged { online });
        }
    }
}

/// Map a stored message to the wire. Media is only ever sent for user
/// messages; assistant audio is output and never goes back as input.
pub fn to_wire(message: &Message) -> WireMessage {
    let is_user = message.role == Role::User;
    let media = |payload: &Option<MediaPayload>| {
        if is_user {
            payload.as_ref().map(MediaPayload::to_data_url)
        } else {
            None
        }
    };
    WireMessage {
        role: message.role,
        content: message.content.clone(),
        image: media(&message.image),
        video: media(&message.video),
        audio: media(&message.input_audio),
        tool_calls: message.tool_calls.clone(),
        tool_call_id: message.tool_call_id.clone(),
    }
}

fn from_wire(wire: WireMessage, timestamp: i64) -> Message {
    Message {
        tool_calls: wire.tool_calls,
        tool_call_id: wire.tool_call_id,
        ..Message::new(wire.role, wire.content).with_timestamp(timestamp)
    }
}

/// Turn a backend response into the messages to append, in backend order.
/// User echoes are skipped (the user turn is already stored), tool results
/// that answer no known tool call are dropped, and audio goes on the last
/// assistant message only.
pub fn expand_response(chat: &Chat, response: CompletionResponse, base_timestamp: i64) -> Vec<Message> {
    let audio = response.audio.map(|a| a.data);
    let expanded: Vec<WireMessage> = response
        .conversation_messages
        .unwrap_or_default()
        .into_iter()
        .filter(|m| m.role != Role::User)
        .collect();

    let wires = if expanded.is_empty() {
        let mut single = response.message;
        single.role = Role::Assistant;
        vec![single]
    } else {
        expanded
    };

    let mut known_calls: HashSet<String> = chat
        .messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .flat_map(|m| m.tool_calls.iter().map(|c| c.id.clone()))
        .collect();

    let mut messages: Vec<Message> = Vec::with_capacity(wires.len());
    for wire in wires {
        match wire.role {
            Role::Assistant => known_calls.extend(wire.tool_calls.iter().map(|c| c.id.clone())),
            Role::Tool => {
                let answered = wire
                    .tool_call_id
                    .as_deref()
                    .is_some_and(|id| known_calls.contains(id));
                if !answered {
                    log::warn!("Dropping tool result for unknown call {:?}", wire.tool_call_id);
                    continue;
                }
            }
            _ => {}
        }
        let timestamp = base_timestamp + messages.len() as i64;
        messages.push(from_wire(wire, timestamp));
    }

    if let Some(audio) = audio {
        match messages.iter_mut().rev().find(|m| m.role == Role::Assistant) {
            Some(last) => last.audio_data = Some(audio),
            None => log::warn!("Response audio has no assistant message to attach to"),
        }
    }
    messages
}

/// Transcript text for a failed turn. Server rejections are shown verbatim.
pub fn failure_text(error: &OmniError) -> String {
    match error {
        OmniError::Rejected { detail, .. } => detail.clone(),
        other => format!("Error: {}", other),
    }
}
