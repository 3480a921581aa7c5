pub mod chats;
pub mod messages;
