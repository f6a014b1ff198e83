use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BubbleStatus {
    Pending,
    Done,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub title: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BubbleStatus>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), metadata: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), metadata: None }
    }

    pub fn bubble(
        title: impl Into<String>,
        call_id: Option<&str>,
        content: impl Into<String>,
        status: BubbleStatus,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            metadata: Some(MessageMetadata {
                title: title.into(),
                id: bubble_id(call_id),
                status: Some(status),
            }),
        }
    }

    pub fn is_bubble(&self) -> bool {
        self.metadata.is_some()
    }

    /// Plain assistant text that streaming deltas may extend.
    pub fn is_plain_assistant(&self) -> bool {
        self.role == Role::Assistant && self.metadata.is_none()
    }

    pub fn bubble_status(&self) -> Option<BubbleStatus> {
        self.metadata.as_ref().and_then(|metadata| metadata.status)
    }
}

pub fn bubble_id(call_id: Option<&str>) -> String {
    match call_id {
        Some(call_id) if !call_id.is_empty() => format!("tool-{call_id}"),
        _ => "tool-noid".to_owned(),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BubbleChange {
    Created,
    Updated,
    Unchanged,
}

/// Ordered transcript rendered top to bottom.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<ConversationMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ConversationMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ConversationMessage> {
        self.messages.get(index)
    }

    pub fn last(&self) -> Option<&ConversationMessage> {
        self.messages.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut ConversationMessage> {
        self.messages.last_mut()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConversationMessage> {
        self.messages.iter()
    }

    pub fn find_bubble(&self, call_id: &str) -> Option<&ConversationMessage> {
        let id = bubble_id(Some(call_id));
        self.messages
            .iter()
            .find(|message| message.metadata.as_ref().is_some_and(|metadata| metadata.id == id))
    }

    /// Creates the bubble for `call_id`, or rewrites the existing one in place.
    ///
    /// Calls without an id cannot be matched later, so each one appends.
    pub fn upsert_bubble(
        &mut self,
        title: &str,
        call_id: Option<&str>,
        content: &str,
        status: BubbleStatus,
    ) -> BubbleChange {
        let Some(call_id) = call_id.filter(|call_id| !call_id.is_empty()) else {
            self.push(ConversationMessage::bubble(title, None, content, status));
            return BubbleChange::Created;
        };

        let id = bubble_id(Some(call_id));
        let existing = self
            .messages
            .iter_mut()
            .find(|message| message.metadata.as_ref().is_some_and(|metadata| metadata.id == id));

        match existing {
            Some(message) => {
                let metadata = message.metadata.get_or_insert_with(|| MessageMetadata {
                    title: title.to_owned(),
                    id: id.clone(),
                    status: None,
                });
                let unchanged = message.content == content
                    && metadata.title == title
                    && metadata.status == Some(status);
                if unchanged {
                    return BubbleChange::Unchanged;
                }
                message.content = content.to_owned();
                metadata.title = title.to_owned();
                metadata.status = Some(status);
                BubbleChange::Updated
            }
            None => {
                self.push(ConversationMessage::bubble(title, Some(call_id), content, status));
                BubbleChange::Created
            }
        }
    }

    /// Flips every pending bubble to done and returns how many changed.
    pub fn complete_pending_bubbles(&mut self) -> usize {
        let mut flipped = 0;
        for metadata in self.messages.iter_mut().filter_map(|message| message.metadata.as_mut()) {
            if metadata.status == Some(BubbleStatus::Pending) {
                metadata.status = Some(BubbleStatus::Done);
                flipped += 1;
            }
        }
        flipped
    }
}

impl From<Vec<ConversationMessage>> for Conversation {
    fn from(messages: Vec<ConversationMessage>) -> Self {
        Self { messages }
    }
}

impl IntoIterator for Conversation {
    type Item = ConversationMessage;
    type IntoIter = std::vec::IntoIter<ConversationMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::{BubbleChange, BubbleStatus, Conversation, ConversationMessage, Role};

    #[test]
    fn upsert_bubble_updates_existing_call_in_place() {
        let mut conversation = Conversation::new();
        conversation.push(ConversationMessage::user("hi"));

        let first = conversation.upsert_bubble(
            "🌐 Searching Web Sources",
            Some("abc"),
            "Searching for 'a'...",
            BubbleStatus::Pending,
        );
        let second = conversation.upsert_bubble(
            "🌐 Searching Web Sources",
            Some("abc"),
            "Searching for 'ab'...",
            BubbleStatus::Pending,
        );

        assert_eq!(first, BubbleChange::Created);
        assert_eq!(second, BubbleChange::Updated);
        assert_eq!(conversation.len(), 2);
        let bubble = conversation.find_bubble("abc").expect("bubble");
        assert_eq!(bubble.content, "Searching for 'ab'...");
        assert_eq!(bubble.role, Role::Assistant);
    }

    #[test]
    fn identical_upsert_reports_unchanged() {
        let mut conversation = Conversation::new();
        conversation.upsert_bubble("t", Some("x"), "c", BubbleStatus::Done);
        let change = conversation.upsert_bubble("t", Some("x"), "c", BubbleStatus::Done);
        assert_eq!(change, BubbleChange::Unchanged);
    }

    #[test]
    fn bubbles_without_call_id_always_append() {
        let mut conversation = Conversation::new();
        conversation.upsert_bubble("t", None, "one", BubbleStatus::Pending);
        conversation.upsert_bubble("t", None, "two", BubbleStatus::Pending);

        assert_eq!(conversation.len(), 2);
        assert!(conversation
            .iter()
            .all(|message| message.metadata.as_ref().is_some_and(|m| m.id == "tool-noid")));
    }

    #[test]
    fn complete_pending_bubbles_only_touches_pending_entries() {
        let mut conversation = Conversation::new();
        conversation.upsert_bubble("t", Some("a"), "a", BubbleStatus::Pending);
        conversation.upsert_bubble("t", Some("b"), "b", BubbleStatus::Done);
        conversation.push(ConversationMessage::assistant("text"));

        assert_eq!(conversation.complete_pending_bubbles(), 1);
        assert_eq!(conversation.complete_pending_bubbles(), 0);
        assert!(conversation.iter().filter(|m| m.is_bubble()).all(|m| {
            m.bubble_status() == Some(BubbleStatus::Done)
        }));
    }

    #[test]
    fn serializes_as_plain_message_list() {
        let mut conversation = Conversation::new();
        conversation.push(ConversationMessage::user("hello"));
        conversation.upsert_bubble("title", Some("c1"), "done", BubbleStatus::Done);

        let json = serde_json::to_value(&conversation).expect("serialize");
        assert_eq!(json[0]["role"], "user");
        assert!(json[0].get("metadata").is_none());
        assert_eq!(json[1]["metadata"]["id"], "tool-c1");
        assert_eq!(json[1]["metadata"]["status"], "done");

        let back: Conversation = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, conversation);
    }
}
