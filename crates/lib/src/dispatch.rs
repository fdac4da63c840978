//! Command dispatch: classify an inbound message, check enable flags, then run
//! `ask`, `sticker` or `help`.
//!
//! Every failure ends in a fixed chat reply; provider and ffmpeg details only reach the log.

use crate::channels::{InboundMessage, ReplyHandle, Transport, TransportError};
use crate::config::Config;
use crate::llm::{AiBackend, BackendError, BackendProvider, BackendRequest};
use crate::media::{MediaConverter, MediaError};
use crate::sources::{ConversionSource, PlannedSource, SourcePlan};
use futures_util::future::join_all;
use std::sync::Arc;

pub const LOADING_REPLY: &str = "Loading...";
pub const APOLOGY_REPLY: &str = "Sorry, I couldn't process your request.";
pub const NO_COMMANDS_REPLY: &str = "No commands are enabled.";
const MEDIA_ERROR_PREFIX: &str = "Sorry, there was an error processing the media: ";

/// A recognized command with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Trimmed text after the command word (may be empty).
    Ask(String),
    Sticker,
    Help,
    /// `help` while the help command is switched off.
    HelpDisabled,
    Unknown(String),
}

impl Command {
    pub fn name(&self) -> &str {
        match self {
            Command::Ask(_) => "ask",
            Command::Sticker => "sticker",
            Command::Help | Command::HelpDisabled => "help",
            Command::Unknown(name) => name,
        }
    }
}

/// What the dispatcher did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Ignored,
    Ask,
    Sticker,
    Help,
    Unknown,
}

/// Conditions that end a command with a fixed reply.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("empty query")]
    EmptyQuery,
    #[error("{count} sources, limit is {max}")]
    TooManySources { count: usize, max: usize },
    #[error("no sources resolved")]
    NoSourcesResolved,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("downloading media for the backend: {0}")]
    Transport(#[from] TransportError),
}

impl DispatchError {
    /// Chat text for this condition.
    pub fn reply_text(&self, config: &Config) -> String {
        let p = &config.command_prefix;
        match self {
            DispatchError::EmptyQuery => "Please provide a query after the command.".to_string(),
            DispatchError::TooManySources { max, .. } => format!(
                "Too many media items. Please send at most {} per {}sticker command.",
                max, p
            ),
            DispatchError::NoSourcesResolved => format!(
                "Please send an image, GIF or video, a link, or \"quoted text\" with the {}sticker command.",
                p
            ),
            DispatchError::Backend(_) | DispatchError::Transport(_) => APOLOGY_REPLY.to_string(),
        }
    }
}

/// Classify `body`. `None` means the message is not for us and gets no reply.
///
/// The command word is the first token after the prefix and is matched case-insensitively;
/// disabled commands fall through to the unknown-command reply (when enabled), except
/// `help`, which answers that no commands are enabled.
pub fn classify(body: &str, config: &Config) -> Option<Command> {
    let prefix = config.command_prefix.as_str();
    let rest = body.trim_start().strip_prefix(prefix)?;
    if prefix.is_empty() {
        return None;
    }
    let name_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let name = rest[..name_end].to_lowercase();
    let args = rest[name_end..].trim();
    let commands = &config.commands;
    match name.as_str() {
        "ask" if commands.ask => Some(Command::Ask(args.to_string())),
        "sticker" if commands.sticker => Some(Command::Sticker),
        "help" if commands.help => Some(Command::Help),
        "help" => Some(Command::HelpDisabled),
        _ if config.reply_unknown_commands => Some(Command::Unknown(name)),
        _ => None,
    }
}

/// Help text listing the enabled commands.
pub fn help_text(config: &Config) -> String {
    let p = &config.command_prefix;
    let c = &config.commands;
    if !c.any_enabled() {
        return NO_COMMANDS_REPLY.to_string();
    }
    let mut lines = vec!["Available commands:".to_string()];
    if c.ask {
        lines.push(format!("{}ask <query> - Ask a question or request information.", p));
    }
    if c.sticker {
        lines.push(format!(
            "{}sticker - Send an image, GIF, video, link or \"quoted text\" with this command to convert it to a sticker.",
            p
        ));
    }
    if c.help {
        lines.push(format!("{}help - Display this help message.", p));
    }
    lines.join("\n")
}

pub fn unknown_command_text(config: &Config) -> String {
    format!(
        "Sorry, I don't understand that command. Type {}help to see available commands.",
        config.command_prefix
    )
}

/// The "Loading..." reply of an `ask`. [`Placeholder::finish`] consumes it, so it is
/// edited exactly once, after it was posted.
#[derive(Debug)]
pub struct Placeholder {
    handle: ReplyHandle,
}

impl Placeholder {
    pub async fn post(transport: &dyn Transport, msg: &InboundMessage) -> Result<Self, TransportError> {
        let handle = transport.reply(msg, LOADING_REPLY).await?;
        Ok(Self { handle })
    }

    /// Replace the placeholder with the answer, or with the apology on failure.
    pub async fn finish(
        self,
        transport: &dyn Transport,
        outcome: Result<String, DispatchError>,
        config: &Config,
    ) -> Result<(), TransportError> {
        let text = match outcome {
            Ok(answer) => answer,
            Err(e) => {
                log::warn!("ask: {}", e);
                e.reply_text(config)
            }
        };
        transport.edit(&self.handle, &text).await
    }
}

/// Routes inbound messages to the AI backend or the sticker pipeline.
#[derive(Clone)]
pub struct Dispatcher {
    backends: Arc<dyn BackendProvider>,
    converter: MediaConverter,
}

impl Dispatcher {
    pub fn new(backends: Arc<dyn BackendProvider>, converter: MediaConverter) -> Self {
        Self { backends, converter }
    }

    /// Handle one message with the given config snapshot. Only transport failures on the
    /// command's own replies are returned; everything else ends in a chat reply.
    pub async fn dispatch(
        &self,
        msg: &InboundMessage,
        config: &Config,
        transport: &dyn Transport,
    ) -> Result<Handled, TransportError> {
        let Some(command) = classify(&msg.body, config) else {
            return Ok(Handled::Ignored);
        };
        log::info!(
            "dispatch: {}{} from {} in chat {}",
            config.command_prefix,
            command.name(),
            msg.sender,
            msg.chat_id
        );
        match command {
            Command::Ask(query) => {
                self.handle_ask(msg, &query, config, transport).await?;
                Ok(Handled::Ask)
            }
            Command::Sticker => {
                self.handle_sticker(msg, config, transport).await?;
                Ok(Handled::Sticker)
            }
            Command::Help => {
                transport.reply(msg, &help_text(config)).await?;
                Ok(Handled::Help)
            }
            Command::HelpDisabled => {
                transport.reply(msg, NO_COMMANDS_REPLY).await?;
                Ok(Handled::Help)
            }
            Command::Unknown(_) => {
                transport.reply(msg, &unknown_command_text(config)).await?;
                Ok(Handled::Unknown)
            }
        }
    }

    async fn handle_ask(
        &self,
        msg: &InboundMessage,
        query: &str,
        config: &Config,
        transport: &dyn Transport,
    ) -> Result<(), TransportError> {
        if query.is_empty() {
            transport
                .reply(msg, &DispatchError::EmptyQuery.reply_text(config))
                .await?;
            return Ok(());
        }
        let placeholder = Placeholder::post(transport, msg).await?;
        let backend = self.backends.backend(config);
        let deadline = config.ask_timeout();
        // Dropping the timed-out future abandons the request; it can never reply.
        let outcome = match tokio::time::timeout(deadline, ask_backend(backend.as_ref(), msg, query, transport)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(deadline).into()),
        };
        placeholder.finish(transport, outcome, config).await
    }

    async fn handle_sticker(
        &self,
        msg: &InboundMessage,
        config: &Config,
        transport: &dyn Transport,
    ) -> Result<(), TransportError> {
        let plan = SourcePlan::from_message(msg);
        let max = config.media.max_sources;
        let rejection = if plan.is_empty() {
            Some(DispatchError::NoSourcesResolved)
        } else if plan.len() > max {
            Some(DispatchError::TooManySources {
                count: plan.len(),
                max,
            })
        } else {
            None
        };
        if let Some(e) = rejection {
            log::info!("sticker: {}", e);
            transport.reply(msg, &e.reply_text(config)).await?;
            return Ok(());
        }

        let total = plan.len();
        let kinds: Vec<&'static str> = plan.items.iter().map(PlannedSource::kind).collect();
        let resolved = plan.materialize(msg, transport).await;
        let jobs = resolved
            .into_iter()
            .zip(kinds)
            .enumerate()
            .map(|(i, (source, kind))| self.sticker_job(i + 1, kind, source, msg, config, transport));
        let results = join_all(jobs).await;
        let sent = results.iter().filter(|ok| **ok).count();
        log::info!("sticker: {}/{} source(s) converted for chat {}", sent, total, msg.chat_id);
        Ok(())
    }

    /// Convert and send one source. Failures are answered here and never reach siblings.
    async fn sticker_job(
        &self,
        index: usize,
        kind: &str,
        source: Result<ConversionSource, MediaError>,
        msg: &InboundMessage,
        config: &Config,
        transport: &dyn Transport,
    ) -> bool {
        let converted = match source {
            Ok(source) => self.converter.convert(source, &config.media).await,
            Err(e) => Err(e),
        };
        let reason = match converted {
            Ok(sticker) => match transport.reply_sticker(msg, &sticker).await {
                Ok(()) => return true,
                Err(e) => {
                    log::warn!("sticker: sending source {} ({}) failed: {}", index, kind, e);
                    "The sticker could not be sent.".to_string()
                }
            },
            Err(e) => {
                log::warn!("sticker: source {} ({}) failed: {}", index, kind, e);
                e.user_reason(&config.media)
            }
        };
        if let Err(e) = transport
            .reply(msg, &format!("{}{}", MEDIA_ERROR_PREFIX, reason))
            .await
        {
            log::warn!("sticker: error reply for source {} failed: {}", index, e);
        }
        false
    }
}

async fn ask_backend(
    backend: &dyn AiBackend,
    msg: &InboundMessage,
    query: &str,
    transport: &dyn Transport,
) -> Result<String, DispatchError> {
    let inline_media = if msg.has_media() && backend.supports_inline_media() {
        Some(transport.download_media(msg).await?)
    } else {
        None
    };
    let request = BackendRequest {
        query: query.to_string(),
        inline_media,
    };
    let response = backend.ask(&request).await?;
    let answer = response.text.trim();
    if answer.is_empty() {
        return Err(BackendError::UnexpectedResponseShape("non-empty answer text").into());
    }
    log::debug!("ask: {} answered with {} chars", backend.name(), answer.len());
    Ok(answer.to_string())
}
