pub mod chat;
pub mod info;
pub mod models;
