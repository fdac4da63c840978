//! Communication channels (e.g. Telegram).
//!
//! The dispatcher only talks to the [`Transport`] trait; [`TelegramTransport`] is the
//! Bot API implementation used by the run loop.

mod inbound;
mod telegram;
mod transport;

pub use inbound::{InboundMessage, MediaRef};
pub use telegram::{telegram_api_base, TelegramTransport, TelegramUpdate};
pub use transport::{ReplyHandle, Transport, TransportError};
