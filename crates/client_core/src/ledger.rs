use std::collections::HashSet;

use shared::{domain::MessageId, protocol::Message};

/// Messages of the selected conversation in arrival order, unique by id.
#[derive(Debug, Default, Clone)]
pub struct MessageLedger {
    messages: Vec<Message>,
    seen: HashSet<MessageId>,
}

impl MessageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `message` unless an entry with the same id is already present.
    ///
    /// Returns whether the ledger changed. A `false` means duplicate delivery, e.g. the
    /// push echo of a message that was already merged from its send response.
    pub fn append(&mut self, message: Message) -> bool {
        if !self.seen.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Replaces the contents with a fresh history snapshot, in the order given.
    pub fn seed(&mut self, messages: Vec<Message>) {
        self.seen = messages.iter().map(|message| message.id.clone()).collect();
        self.messages = messages;
    }

    pub fn reset(&mut self) {
        self.messages.clear();
        self.seen.clear();
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
#[path = "tests/ledger_tests.rs"]
mod tests;
