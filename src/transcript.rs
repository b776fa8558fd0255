use chrono::{DateTime, Local};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Author {
    User,
    Assistant,
}

#[derive(Clone, Debug)]
pub struct ChatMessage {
    pub id: u64,
    pub author: Author,
    pub text: String,
    pub created_at: DateTime<Local>,
}

impl ChatMessage {
    pub fn is_user(&self) -> bool {
        self.author == Author::User
    }
}

/// Visible conversation. Messages are only appended, or all dropped at once;
/// ids keep increasing across a clear.
#[derive(Debug)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
    next_id: u64,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            next_id: 1,
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>) -> u64 {
        self.push(Author::User, text.into())
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) -> u64 {
        self.push(Author::Assistant, text.into())
    }

    fn push(&mut self, author: Author, text: String) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.messages.push(ChatMessage {
            id,
            author,
            text,
            created_at: Local::now(),
        });
        id
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
