pub mod chat_id;
pub mod message;

pub use chat_id::{ChatId, Participants};
pub use message::{Batch, Message};
