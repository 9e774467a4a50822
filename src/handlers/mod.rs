pub mod chat;
pub mod generation;
pub mod media;
pub mod studio;
