use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use glint_db::chat::{ConversationFilter, ConversationOrder};
use glint_db::{ChatStore, Database};
use glint_gateway::dispatcher::Dispatcher;
use glint_types::api::{ConversationView, MessageView, Page, PageQuery};
use glint_types::chat::{Conversation, ConversationStatus, Message, NewMessage};
use glint_types::events::GatewayEvent;
use glint_types::{CoreError, CoreResult, UserId};

use crate::enrichment::{Profiles, conversation_view, message_view};

const PENDING_REQUESTS_LIMIT: u32 = 50;
const MAX_EMOJI_LEN: usize = 16;

/// The private messaging surface: conversation lifecycle, messages and the
/// enriched read views, on top of the document store.
#[derive(Clone)]
pub struct ConversationService {
    store: Arc<ChatStore>,
    db: Arc<Database>,
    dispatcher: Dispatcher,
}

impl ConversationService {
    pub fn new(store: Arc<ChatStore>, db: Arc<Database>, dispatcher: Dispatcher) -> Self {
        Self { store, db, dispatcher }
    }

    /// Runs blocking store work off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&ChatStore, &Database) -> CoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&store, &db))
            .await
            .map_err(CoreError::store)?
    }

    /// Applies one state transition and returns the caller's view of the result.
    async fn transition<F>(&self, id: Uuid, caller: UserId, f: F) -> CoreResult<ConversationView>
    where
        F: FnOnce(&mut Conversation) -> CoreResult<()> + Send + 'static,
    {
        self.blocking(move |store, db| {
            let (conversation, ()) = store.update(id, f)?;
            let profiles = Profiles::for_conversations(db, [&conversation])?;
            Ok(conversation_view(&conversation, caller, &profiles, None))
        })
        .await
    }

    // -- Lifecycle --

    /// Returns the conversation between the two users, starting a pending
    /// one if none exists. The flag is true for a new conversation.
    pub async fn create_or_get(&self, caller: UserId, recipient: UserId) -> CoreResult<(ConversationView, bool)> {
        let (view, created) = self
            .blocking(move |store, db| {
                if caller != recipient && db.get_profile(recipient)?.is_none() {
                    return Err(CoreError::NotFound("user"));
                }

                let (conversation, created) = store.create_or_get(caller, recipient, Utc::now())?;
                let count = if created { 0 } else { store.count_messages(conversation.id)? };
                let profiles = Profiles::for_conversations(db, [&conversation])?;
                Ok((conversation_view(&conversation, caller, &profiles, Some(count)), created))
            })
            .await?;

        if created {
            info!("User {} opened conversation {} with {}", caller, view.id, recipient);
        }
        Ok((view, created))
    }

    pub async fn accept(&self, id: Uuid, caller: UserId) -> CoreResult<ConversationView> {
        self.transition(id, caller, move |c| c.accept(caller, Utc::now())).await
    }

    pub async fn reject(&self, id: Uuid, caller: UserId) -> CoreResult<ConversationView> {
        self.transition(id, caller, move |c| c.reject(caller, Utc::now())).await
    }

    pub async fn block(&self, id: Uuid, caller: UserId) -> CoreResult<ConversationView> {
        self.transition(id, caller, move |c| c.block(caller, Utc::now())).await
    }

    pub async fn unblock(&self, id: Uuid, caller: UserId) -> CoreResult<ConversationView> {
        self.transition(id, caller, move |c| c.unblock(caller, Utc::now())).await
    }

    pub async fn toggle_archive(&self, id: Uuid, caller: UserId) -> CoreResult<ConversationView> {
        self.transition(id, caller, move |c| c.toggle_archive(caller, Utc::now()).map(|_| ()))
            .await
    }

    /// Deletes the conversation and all of its messages for both participants.
    pub async fn delete(&self, id: Uuid, caller: UserId) -> CoreResult<()> {
        self.blocking(move |store, _| {
            store.get_for(id, caller)?;
            if !store.delete(id)? {
                return Err(CoreError::NotFound("conversation"));
            }
            Ok(())
        })
        .await
    }

    // -- Messages --

    /// Stores a message and pushes it to the receiver's open connections.
    pub async fn send_message(&self, id: Uuid, sender: UserId, new: NewMessage) -> CoreResult<MessageView> {
        let (receiver, for_sender, for_receiver) = self
            .blocking(move |store, db| {
                let (_, message) = store.send_message(id, sender, new, Utc::now())?;
                let profiles = Profiles::for_messages(db, [&message])?;
                let receiver = message.receiver_id;
                Ok((
                    receiver,
                    message_view(message.clone(), sender, &profiles),
                    message_view(message, receiver, &profiles),
                ))
            })
            .await?;

        let message_id = for_receiver.id;
        let delivered = self
            .dispatcher
            .deliver_to_user(
                receiver,
                GatewayEvent::MessageReceived {
                    conversation_id: id,
                    message: for_receiver,
                },
            )
            .await;
        if delivered == 0 {
            debug!("User {} offline, message {} stored only", receiver, message_id);
        }

        Ok(for_sender)
    }

    /// Hides a message from the caller only. The other participant still sees it.
    pub async fn delete_message_for_user(&self, id: Uuid, message_id: Uuid, caller: UserId) -> CoreResult<()> {
        self.blocking(move |store, _| {
            store.get_for(id, caller)?;
            store.update_message(id, message_id, |message| {
                message.deleted_for.insert(caller);
                Ok(())
            })?;
            Ok(())
        })
        .await
    }

    pub async fn toggle_reaction(
        &self,
        id: Uuid,
        message_id: Uuid,
        caller: UserId,
        emoji: String,
    ) -> CoreResult<MessageView> {
        let emoji = emoji.trim().to_string();
        if emoji.is_empty() || emoji.chars().count() > MAX_EMOJI_LEN {
            return Err(CoreError::BadRequest("invalid reaction".into()));
        }

        self.blocking(move |store, db| {
            store.get_for(id, caller)?;
            let (message, _) = store.update_message(id, message_id, |message| {
                Ok(message.toggle_reaction(caller, &emoji, Utc::now()))
            })?;
            let profiles = Profiles::for_messages(db, [&message])?;
            Ok(message_view(message, caller, &profiles))
        })
        .await
    }

    /// Marks everything addressed to the caller as read. Returns how many
    /// messages were newly read.
    pub async fn mark_read(&self, id: Uuid, caller: UserId) -> CoreResult<usize> {
        self.blocking(move |store, _| store.mark_read(id, caller, Utc::now()))
            .await
    }

    // -- Reads --

    pub async fn get(&self, id: Uuid, caller: UserId) -> CoreResult<ConversationView> {
        self.blocking(move |store, db| {
            let conversation = store.get_for(id, caller)?;
            let count = store.count_messages(id)?;
            let profiles = Profiles::for_conversations(db, [&conversation])?;
            Ok(conversation_view(&conversation, caller, &profiles, Some(count)))
        })
        .await
    }

    /// Incoming requests the caller has not answered yet, newest first.
    pub async fn pending_requests(&self, caller: UserId) -> CoreResult<Vec<ConversationView>> {
        let filter = ConversationFilter {
            statuses: Some(vec![ConversationStatus::Pending]),
            exclude_requested_by: Some(caller),
            order: ConversationOrder::NewestCreated,
            ..ConversationFilter::for_user(caller)
        };

        let page = self
            .list(filter, PageQuery::new(1, PENDING_REQUESTS_LIMIT), caller, false)
            .await?;
        Ok(page.data)
    }

    /// Accepted conversations, most recent activity first.
    pub async fn active(&self, caller: UserId, page: PageQuery) -> CoreResult<Page<ConversationView>> {
        let filter = ConversationFilter {
            statuses: Some(vec![ConversationStatus::Accepted, ConversationStatus::AutoAccepted]),
            include_archived: false,
            ..ConversationFilter::for_user(caller)
        };
        self.list(filter, page, caller, false).await
    }

    /// Every conversation of the caller, with message counts.
    pub async fn history(
        &self,
        caller: UserId,
        include_archived: bool,
        page: PageQuery,
    ) -> CoreResult<Page<ConversationView>> {
        let filter = ConversationFilter {
            include_archived,
            ..ConversationFilter::for_user(caller)
        };
        self.list(filter, page, caller, true).await
    }

    async fn list(
        &self,
        filter: ConversationFilter,
        page: PageQuery,
        caller: UserId,
        with_counts: bool,
    ) -> CoreResult<Page<ConversationView>> {
        self.blocking(move |store, db| {
            let (conversations, total) = store.list(&filter, page)?;

            let counts = if with_counts {
                let ids: Vec<Uuid> = conversations.iter().map(|c| c.id).collect();
                Some(store.count_messages_batch(&ids)?)
            } else {
                None
            };

            let profiles = Profiles::for_conversations(db, &conversations)?;
            let data = conversations
                .iter()
                .map(|c| {
                    let count = counts
                        .as_ref()
                        .map(|counts| counts.get(&c.id).copied().unwrap_or(0));
                    conversation_view(c, caller, &profiles, count)
                })
                .collect();

            Ok(Page {
                data,
                total,
                page: page.page.max(1),
                limit: page.limit() as u32,
            })
        })
        .await
    }

    /// One chronological page of the conversation as the caller sees it.
    pub async fn messages(&self, id: Uuid, caller: UserId, page: PageQuery) -> CoreResult<Page<MessageView>> {
        self.blocking(move |store, db| {
            store.get_for(id, caller)?;
            let (messages, total) = store.messages(id, page)?;
            message_page(db, messages, total, caller, page)
        })
        .await
    }

    pub async fn search(
        &self,
        id: Uuid,
        caller: UserId,
        query: String,
        page: PageQuery,
    ) -> CoreResult<Page<MessageView>> {
        self.blocking(move |store, db| {
            store.get_for(id, caller)?;
            let (messages, total) = store.search(id, caller, &query, page)?;
            message_page(db, messages, total, caller, page)
        })
        .await
    }
}

fn message_page(
    db: &Database,
    messages: Vec<Message>,
    total: u64,
    viewer: UserId,
    page: PageQuery,
) -> CoreResult<Page<MessageView>> {
    let profiles = Profiles::for_messages(db, &messages)?;
    Ok(Page {
        data: messages
            .into_iter()
            .map(|m| message_view(m, viewer, &profiles))
            .collect(),
        total,
        page: page.page.max(1),
        limit: page.limit() as u32,
    })
}
