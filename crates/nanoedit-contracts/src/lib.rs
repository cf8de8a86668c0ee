pub mod chat;
pub mod events;
pub mod image_data;
pub mod session;
