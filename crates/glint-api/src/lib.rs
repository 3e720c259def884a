pub mod chats;
pub mod conversations;
pub mod enrichment;
pub mod error;
pub mod lives;
pub mod middleware;
pub mod state;
