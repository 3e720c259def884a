use std::sync::Arc;

use glint_db::{ChatStore, Database};
use glint_gateway::Gateway;

use crate::conversations::ConversationService;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub chats: ConversationService,
    pub gateway: Gateway,
    pub jwt_secret: String,
}

impl AppStateInner {
    pub fn new(db: Arc<Database>, chat_store: Arc<ChatStore>, jwt_secret: String) -> Self {
        let gateway = Gateway::new(db.clone());
        let chats = ConversationService::new(chat_store, db, gateway.dispatcher.clone());

        Self {
            chats,
            gateway,
            jwt_secret,
        }
    }
}
