//! Conversation identity and message handling.
//!
//! A conversation is keyed on the canonically ordered user pair, so
//! `find_or_create(a, b)` and `find_or_create(b, a)` always resolve to the
//! same id, including under concurrent creation.  Sending a message appends
//! the row and then notifies the recipient through the fan-out engine as a
//! fire-and-forget side channel: a fan-out failure never fails the send.

use crate::fanout::NotificationFanoutEngine;
use crate::logging;
use crate::store::{new_id, now_secs, ConversationRow, MessageRow, SharedStore, StoreError};
use crate::tlog;

/// Resolves conversations and appends messages.
#[derive(Clone)]
pub struct ConversationService {
    store: SharedStore,
    fanout: NotificationFanoutEngine,
}

impl ConversationService {
    pub fn new(store: SharedStore, fanout: NotificationFanoutEngine) -> Self {
        Self { store, fanout }
    }

    /// Resolve the conversation between two users, creating it on first
    /// contact.  Argument order is irrelevant.
    pub async fn find_or_create(&self, user_a: &str, user_b: &str) -> Result<String, StoreError> {
        let st = self.store.lock().await;
        let row = st.find_or_create_conversation(user_a, user_b, now_secs())?;
        Ok(row.id)
    }

    /// Append a message to an existing conversation, then notify the
    /// recipient.  The append is the user-facing operation and surfaces
    /// errors; the notification is best-effort and only logged on failure.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        recipient_id: &str,
        content: &str,
    ) -> Result<MessageRow, StoreError> {
        let row = MessageRow {
            id: new_id(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            content: content.to_string(),
            created_at: now_secs(),
            read: false,
        };

        {
            let st = self.store.lock().await;
            st.get_conversation(conversation_id)?
                .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;
            st.insert_message(&row)?;
        }

        // Side channel: the send has committed, so a fan-out failure must
        // not propagate to the sender.
        if let Err(e) = self
            .fanout
            .on_new_message(recipient_id, sender_id, conversation_id, content)
            .await
        {
            tlog!(
                "fanout: message notification for {} failed: {}",
                logging::user_id(recipient_id),
                e
            );
        }

        Ok(row)
    }

    /// Messages in a conversation, oldest first.
    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<MessageRow>, StoreError> {
        let st = self.store.lock().await;
        st.list_conversation_messages(conversation_id)
    }

    /// Conversations the user participates in, newest first.
    pub async fn conversations_for(&self, user_id: &str) -> Result<Vec<ConversationRow>, StoreError> {
        let st = self.store.lock().await;
        st.list_user_conversations(user_id)
    }

    /// Mark a message as read.  A direct user operation, so errors surface.
    pub async fn mark_read(&self, message_id: &str) -> Result<bool, StoreError> {
        let st = self.store.lock().await;
        st.mark_message_read(message_id)
    }
}
