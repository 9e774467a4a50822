/// Turns replayed into the advice request.
pub const ADVICE_CONTEXT_TURNS: usize = 5;
/// User turns replayed into the image-generation prompt.
pub const VISUALIZATION_CONTEXT_TURNS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub id: u64,
    pub role: Role,
    pub text: String,
    pub is_error: bool,
}

/// Append-only chat log for one project.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
    next_id: u64,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, role: Role, text: impl Into<String>, is_error: bool) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.turns.push(ConversationTurn {
            id,
            role,
            text: text.into(),
            is_error,
        });
        id
    }

    pub fn push_user(&mut self, text: impl Into<String>) -> u64 {
        self.push(Role::User, text, false)
    }

    pub fn push_model(&mut self, text: impl Into<String>) -> u64 {
        self.push(Role::Model, text, false)
    }

    pub fn push_error(&mut self, text: impl Into<String>) -> u64 {
        self.push(Role::Model, text, true)
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The last `limit` turns in chronological order.
    pub fn recent(&self, limit: usize) -> &[ConversationTurn] {
        let start = self.turns.len().saturating_sub(limit);
        &self.turns[start..]
    }

    /// Texts of the last `limit` user turns in chronological order.
    pub fn recent_user_texts(&self, limit: usize) -> Vec<String> {
        let mut texts: Vec<String> = self
            .turns
            .iter()
            .rev()
            .filter(|turn| turn.role == Role::User)
            .take(limit)
            .map(|turn| turn.text.clone())
            .collect();
        texts.reverse();
        texts
    }
}
