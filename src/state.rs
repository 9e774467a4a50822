use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use teloxide::types::{ChatId, FileId, MediaGroupId, MessageId};

use crate::llm::{DesignGateway, HttpGeminiTransport};
use crate::studio::prompt::VisualizationBrief;
use crate::studio::{GenerationResult, ReferenceKind, Session, SessionError};

pub type StudioGateway = DesignGateway<HttpGeminiTransport>;

/// Photos of one Telegram album, collected until the album settles.
#[derive(Debug, Clone)]
pub struct PendingAlbum {
    pub chat_id: ChatId,
    pub first_message_id: MessageId,
    pub file_ids: Vec<FileId>,
    pub kind: Option<ReferenceKind>,
}

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<StudioGateway>,
    pub sessions: Arc<Mutex<HashMap<ChatId, Session>>>,
    pub media_groups: Arc<Mutex<HashMap<MediaGroupId, PendingAlbum>>>,
}

impl AppState {
    pub fn new(gateway: StudioGateway) -> Self {
        AppState {
            gateway: Arc::new(gateway),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            media_groups: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runs `f` against the chat's session, creating it on first use. The
    /// lock is released before this returns.
    pub fn with_session<R>(&self, chat_id: ChatId, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut sessions = self.sessions.lock();
        let session = sessions.entry(chat_id).or_insert_with(Session::new);
        f(session)
    }

    /// Like `with_session`, but only if the chat is still on `project_id`.
    pub fn with_project<R>(
        &self,
        chat_id: ChatId,
        project_id: &str,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Option<R> {
        let mut sessions = self.sessions.lock();
        sessions
            .get_mut(&chat_id)
            .filter(|session| session.project_id() == project_id)
            .map(f)
    }

    /// Claims the chat's generation slot and snapshots the brief to render.
    pub fn claim_generation(
        &self,
        chat_id: ChatId,
        directive: &str,
    ) -> Result<(GenerationSlot, VisualizationBrief), SessionError> {
        let (project_id, brief) = self.with_session(chat_id, |session| {
            session
                .begin_generation(directive)
                .map(|brief| (session.project_id().to_string(), brief))
        })?;
        let slot = GenerationSlot {
            state: self.clone(),
            chat_id,
            project_id,
            released: false,
        };
        Ok((slot, brief))
    }
}

/// A claimed generation slot. Dropping it without [`GenerationSlot::release`]
/// frees the slot with no result.
pub struct GenerationSlot {
    state: AppState,
    chat_id: ChatId,
    project_id: String,
    released: bool,
}

impl GenerationSlot {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Frees the slot, storing `result` if the chat is still on the same
    /// project. Returns whether it was stored.
    pub fn release(mut self, result: Option<GenerationResult>) -> bool {
        self.released = true;
        self.state.with_session(self.chat_id, |session| {
            session.finish_generation(&self.project_id, result)
        })
    }
}

impl Drop for GenerationSlot {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let project_id = &self.project_id;
        self.state.with_session(self.chat_id, |session| {
            session.finish_generation(project_id, None);
        });
    }
}
