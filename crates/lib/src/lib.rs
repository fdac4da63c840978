//! Chatbridge core library: command dispatch, AI backends, sticker conversion and the
//! Telegram transport used by the CLI.

pub mod bridge;
pub mod channels;
pub mod config;
pub mod dispatch;
pub mod init;
pub mod llm;
pub mod media;
pub mod sources;
