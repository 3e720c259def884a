pub mod api;
pub mod chat;
pub mod error;
pub mod events;
pub mod ids;
pub mod models;

pub use error::{CoreError, CoreResult};
pub use ids::{ConnectionId, StreamId, UserId};
