pub mod app;
pub mod chat_stream;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod errors;
pub mod message;
pub mod presenter;
