pub mod chat;
pub mod events;
pub mod response;
pub mod transcript;
