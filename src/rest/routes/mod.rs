pub mod ai;
pub mod chats;
pub mod health;
pub mod mail;
pub mod sessions;
pub mod sync;
