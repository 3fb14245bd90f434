pub mod conversation;
pub mod events;
pub mod reply;
pub mod transcript;
