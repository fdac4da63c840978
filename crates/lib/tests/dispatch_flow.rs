//! Integration test: drive the dispatcher end to end with an in-memory transport, a scripted
//! AI backend and a fake transcoder. Remote links are served by mockito.

use async_trait::async_trait;
use lib::channels::{InboundMessage, MediaRef, ReplyHandle, Transport, TransportError};
use lib::config::Config;
use lib::dispatch::{Dispatcher, Handled, APOLOGY_REPLY, LOADING_REPLY};
use lib::llm::{AiBackend, BackendError, BackendProvider, BackendRequest, BackendResponse};
use lib::media::{MediaConverter, MediaError, MediaPayload, StickerImage, Transcoder};
use lib::sources::{resolve, ConversionSource};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const MIB: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Reply(String),
    Edit(String),
    Sticker(StickerImage),
}

/// Records every outbound operation in order.
#[derive(Default)]
struct RecordingTransport {
    events: Mutex<Vec<Event>>,
    media: Mutex<Option<MediaPayload>>,
    downloads: AtomicUsize,
}

impl RecordingTransport {
    fn with_media(payload: MediaPayload) -> Self {
        let t = Self::default();
        *t.media.lock().unwrap() = Some(payload);
        t
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn replies(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Reply(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    fn stickers(&self) -> Vec<StickerImage> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Sticker(s) => Some(s),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn download_media(&self, msg: &InboundMessage) -> Result<MediaPayload, TransportError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if msg.media.is_none() {
            return Err(TransportError::NoMedia);
        }
        self.media.lock().unwrap().clone().ok_or(TransportError::NoMedia)
    }

    async fn reply(&self, msg: &InboundMessage, text: &str) -> Result<ReplyHandle, TransportError> {
        let mut events = self.events.lock().unwrap();
        events.push(Event::Reply(text.to_string()));
        Ok(ReplyHandle {
            chat_id: msg.chat_id.clone(),
            message_id: format!("r{}", events.len()),
        })
    }

    async fn edit(&self, _handle: &ReplyHandle, text: &str) -> Result<(), TransportError> {
        self.events.lock().unwrap().push(Event::Edit(text.to_string()));
        Ok(())
    }

    async fn reply_sticker(&self, _msg: &InboundMessage, sticker: &StickerImage) -> Result<(), TransportError> {
        self.events.lock().unwrap().push(Event::Sticker(sticker.clone()));
        Ok(())
    }
}

enum Script {
    Answer(&'static str),
    Fail,
    Hang,
}

/// Backend that follows a script and counts calls.
#[derive(Clone)]
struct ScriptedBackend {
    script: Arc<Script>,
    inline_media: bool,
    calls: Arc<AtomicUsize>,
    saw_media: Arc<Mutex<Option<MediaPayload>>>,
}

impl ScriptedBackend {
    fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            inline_media: false,
            calls: Arc::new(AtomicUsize::new(0)),
            saw_media: Arc::new(Mutex::new(None)),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn supports_inline_media(&self) -> bool {
        self.inline_media
    }

    async fn ask(&self, request: &BackendRequest) -> Result<BackendResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.saw_media.lock().unwrap() = request.inline_media.clone();
        match *self.script {
            Script::Answer(text) => Ok(BackendResponse {
                text: text.to_string(),
            }),
            Script::Fail => Err(BackendError::Api("503 upstream exploded".to_string())),
            Script::Hang => std::future::pending().await,
        }
    }
}

impl BackendProvider for ScriptedBackend {
    fn backend(&self, _config: &Config) -> Box<dyn AiBackend> {
        Box::new(self.clone())
    }
}

/// Writes `output_size` bytes and remembers the paths it was handed.
struct FakeTranscoder {
    output_size: usize,
    fail: bool,
    calls: AtomicUsize,
    paths: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl FakeTranscoder {
    fn new(output_size: usize) -> Self {
        Self {
            output_size,
            fail: false,
            calls: AtomicUsize::new(0),
            paths: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(0)
        }
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(&self, input: &Path, output: &Path, _config: &lib::config::MediaConfig) -> Result<(), MediaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.paths
            .lock()
            .unwrap()
            .push((input.to_path_buf(), output.to_path_buf()));
        assert!(input.exists(), "input is written before transcoding");
        if self.fail {
            return Err(MediaError::Transcode("ffmpeg exited with 1".to_string()));
        }
        tokio::fs::write(output, vec![7u8; self.output_size]).await?;
        Ok(())
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.media.temp_dir = Some(
        std::env::temp_dir().join(format!("chatbridge-flow-{}", uuid::Uuid::new_v4())),
    );
    config
}

fn message(body: &str, mime_type: Option<&str>) -> InboundMessage {
    InboundMessage {
        chat_id: "100".to_string(),
        message_id: "7".to_string(),
        sender: "42".to_string(),
        body: body.to_string(),
        media: mime_type.map(|m| MediaRef {
            file_id: "file-1".to_string(),
            mime_type: Some(m.to_string()),
        }),
    }
}

fn dispatcher(backend: &ScriptedBackend, transcoder: Arc<FakeTranscoder>) -> Dispatcher {
    Dispatcher::new(Arc::new(backend.clone()), MediaConverter::new(transcoder))
}

fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

#[tokio::test]
async fn plain_chat_is_ignored() {
    let backend = ScriptedBackend::new(Script::Answer("hi"));
    let d = dispatcher(&backend, Arc::new(FakeTranscoder::new(10)));
    let transport = RecordingTransport::default();
    let config = test_config();

    for body in ["hello", "ask something", "  ", "?ask nope"] {
        let handled = d.dispatch(&message(body, None), &config, &transport).await.unwrap();
        assert_eq!(handled, Handled::Ignored);
    }
    assert!(transport.events().is_empty());
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn ask_posts_placeholder_then_edits_once() {
    let backend = ScriptedBackend::new(Script::Answer("  Rust is a language.  "));
    let d = dispatcher(&backend, Arc::new(FakeTranscoder::new(10)));
    let transport = RecordingTransport::default();
    let config = test_config();

    let handled = d
        .dispatch(&message("!ask what is rust?", None), &config, &transport)
        .await
        .unwrap();

    assert_eq!(handled, Handled::Ask);
    assert_eq!(backend.calls(), 1);
    assert_eq!(
        transport.events(),
        vec![
            Event::Reply(LOADING_REPLY.to_string()),
            Event::Edit("Rust is a language.".to_string()),
        ]
    );
}

#[tokio::test]
async fn empty_ask_never_calls_backend() {
    let backend = ScriptedBackend::new(Script::Answer("unused"));
    let d = dispatcher(&backend, Arc::new(FakeTranscoder::new(10)));
    let transport = RecordingTransport::default();
    let config = test_config();

    d.dispatch(&message("!ask   ", None), &config, &transport).await.unwrap();

    assert_eq!(backend.calls(), 0);
    assert_eq!(
        transport.events(),
        vec![Event::Reply("Please provide a query after the command.".to_string())]
    );
}

#[tokio::test]
async fn backend_failure_edits_apology() {
    let backend = ScriptedBackend::new(Script::Fail);
    let d = dispatcher(&backend, Arc::new(FakeTranscoder::new(10)));
    let transport = RecordingTransport::default();
    let config = test_config();

    d.dispatch(&message("!ask hello", None), &config, &transport).await.unwrap();

    let events = transport.events();
    assert_eq!(
        events,
        vec![
            Event::Reply(LOADING_REPLY.to_string()),
            Event::Edit(APOLOGY_REPLY.to_string()),
        ]
    );
    assert!(!format!("{:?}", events).contains("upstream exploded"));
}

#[tokio::test]
async fn blank_answer_edits_apology() {
    let backend = ScriptedBackend::new(Script::Answer("   \n "));
    let d = dispatcher(&backend, Arc::new(FakeTranscoder::new(10)));
    let transport = RecordingTransport::default();
    let config = test_config();

    d.dispatch(&message("!ask hello", None), &config, &transport).await.unwrap();

    assert_eq!(transport.events().last(), Some(&Event::Edit(APOLOGY_REPLY.to_string())));
}

#[tokio::test(start_paused = true)]
async fn hanging_backend_times_out_with_single_apology() {
    let backend = ScriptedBackend::new(Script::Hang);
    let d = dispatcher(&backend, Arc::new(FakeTranscoder::new(10)));
    let transport = Arc::new(RecordingTransport::default());
    let mut config = test_config();
    config.ask_timeout_secs = 60;

    let started = tokio::time::Instant::now();
    d.dispatch(&message("!ask will you answer?", None), &config, transport.as_ref())
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_secs(60));

    // Nothing arrives after the deadline either.
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(
        transport.events(),
        vec![
            Event::Reply(LOADING_REPLY.to_string()),
            Event::Edit(APOLOGY_REPLY.to_string()),
        ]
    );
}

#[tokio::test]
async fn inline_media_only_for_backends_that_take_it() {
    let png = MediaPayload::new(Some("image/png".to_string()), b"png-bytes".to_vec());
    let config = test_config();

    let mut backend = ScriptedBackend::new(Script::Answer("a cat"));
    backend.inline_media = true;
    let transport = RecordingTransport::with_media(png.clone());
    dispatcher(&backend, Arc::new(FakeTranscoder::new(10)))
        .dispatch(&message("!ask what is this?", Some("image/png")), &config, &transport)
        .await
        .unwrap();
    assert_eq!(transport.downloads.load(Ordering::SeqCst), 1);
    assert_eq!(backend.saw_media.lock().unwrap().clone(), Some(png.clone()));

    let text_only = ScriptedBackend::new(Script::Answer("no idea"));
    let transport = RecordingTransport::with_media(png);
    dispatcher(&text_only, Arc::new(FakeTranscoder::new(10)))
        .dispatch(&message("!ask what is this?", Some("image/png")), &config, &transport)
        .await
        .unwrap();
    assert_eq!(transport.downloads.load(Ordering::SeqCst), 0);
    assert_eq!(text_only.saw_media.lock().unwrap().clone(), None);
}

#[tokio::test]
async fn help_and_unknown_replies() {
    let backend = ScriptedBackend::new(Script::Answer("unused"));
    let d = dispatcher(&backend, Arc::new(FakeTranscoder::new(10)));
    let transport = RecordingTransport::default();
    let mut config = test_config();
    config.commands.sticker = false;

    assert_eq!(
        d.dispatch(&message("!help", None), &config, &transport).await.unwrap(),
        Handled::Help
    );
    assert_eq!(
        d.dispatch(&message("!sticker", None), &config, &transport).await.unwrap(),
        Handled::Unknown
    );
    let replies = transport.replies();
    assert_eq!(replies.len(), 2);
    assert!(replies[0].contains("!ask <query>"));
    assert!(!replies[0].contains("!sticker"));
    assert_eq!(
        replies[1],
        "Sorry, I don't understand that command. Type !help to see available commands."
    );
}

#[tokio::test]
async fn static_image_passes_through_unchanged() {
    let data: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    let transcoder = Arc::new(FakeTranscoder::new(10));
    let backend = ScriptedBackend::new(Script::Answer("unused"));
    let transport = RecordingTransport::with_media(MediaPayload::new(Some("image/png".to_string()), data.clone()));
    let config = test_config();

    dispatcher(&backend, Arc::clone(&transcoder))
        .dispatch(&message("!sticker", Some("image/png")), &config, &transport)
        .await
        .unwrap();

    assert_eq!(transcoder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        transport.stickers(),
        vec![StickerImage {
            mime_type: "image/png".to_string(),
            data,
        }]
    );
}

#[tokio::test]
async fn input_limit_is_inclusive() {
    let backend = ScriptedBackend::new(Script::Answer("unused"));
    let config = test_config();

    let at_limit = RecordingTransport::with_media(MediaPayload::new(Some("image/png".to_string()), vec![1u8; 3 * MIB]));
    dispatcher(&backend, Arc::new(FakeTranscoder::new(10)))
        .dispatch(&message("!sticker", Some("image/png")), &config, &at_limit)
        .await
        .unwrap();
    assert_eq!(at_limit.stickers().len(), 1);
    assert!(at_limit.replies().is_empty());

    let over = RecordingTransport::with_media(MediaPayload::new(Some("image/png".to_string()), vec![1u8; 3 * MIB + 1]));
    dispatcher(&backend, Arc::new(FakeTranscoder::new(10)))
        .dispatch(&message("!sticker", Some("image/png")), &config, &over)
        .await
        .unwrap();
    assert!(over.stickers().is_empty());
    assert_eq!(
        over.replies(),
        vec!["Sorry, there was an error processing the media: Media file size is too large. Please upload a file smaller than 3 MB.".to_string()]
    );
}

#[tokio::test]
async fn video_is_transcoded_to_webp_and_temp_files_removed() {
    let transcoder = Arc::new(FakeTranscoder::new(2048));
    let backend = ScriptedBackend::new(Script::Answer("unused"));
    let transport = RecordingTransport::with_media(MediaPayload::new(Some("video/mp4".to_string()), vec![0u8; 1024]));
    let config = test_config();

    dispatcher(&backend, Arc::clone(&transcoder))
        .dispatch(&message("!sticker", Some("video/mp4")), &config, &transport)
        .await
        .unwrap();

    let stickers = transport.stickers();
    assert_eq!(stickers.len(), 1);
    assert_eq!(stickers[0].mime_type, "image/webp");
    assert_eq!(stickers[0].data.len(), 2048);

    let paths = transcoder.paths.lock().unwrap().clone();
    assert_eq!(paths.len(), 1);
    let (input, output) = &paths[0];
    assert!(input.extension().is_some_and(|e| e == "mp4"));
    assert!(!input.exists());
    assert!(!output.exists());
    let dir = config.media.resolved_temp_dir();
    assert_eq!(files_in(&dir), 0);
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn oversize_output_fails_and_cleans_up() {
    let config = test_config();
    let transcoder = Arc::new(FakeTranscoder::new(config.media.max_output_bytes + 1));
    let backend = ScriptedBackend::new(Script::Answer("unused"));
    let transport = RecordingTransport::with_media(MediaPayload::new(Some("image/gif".to_string()), vec![0u8; 1024]));

    dispatcher(&backend, Arc::clone(&transcoder))
        .dispatch(&message("!sticker", Some("image/gif")), &config, &transport)
        .await
        .unwrap();

    assert!(transport.stickers().is_empty());
    assert_eq!(
        transport.replies(),
        vec!["Sorry, there was an error processing the media: Converted sticker is too large. Please upload a smaller file.".to_string()]
    );
    let dir = config.media.resolved_temp_dir();
    assert_eq!(files_in(&dir), 0);
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn transcoder_failure_cleans_up() {
    let config = test_config();
    let transcoder = Arc::new(FakeTranscoder::failing());
    let backend = ScriptedBackend::new(Script::Answer("unused"));
    let transport = RecordingTransport::with_media(MediaPayload::new(Some("video/webm".to_string()), vec![0u8; 64]));

    dispatcher(&backend, Arc::clone(&transcoder))
        .dispatch(&message("!sticker", Some("video/webm")), &config, &transport)
        .await
        .unwrap();

    assert_eq!(
        transport.replies(),
        vec!["Sorry, there was an error processing the media: The media could not be converted.".to_string()]
    );
    let dir = config.media.resolved_temp_dir();
    assert_eq!(files_in(&dir), 0);
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn missing_mime_type_is_invalid_media() {
    let backend = ScriptedBackend::new(Script::Answer("unused"));
    let transport = RecordingTransport::with_media(MediaPayload::new(None, vec![1, 2, 3]));
    let config = test_config();

    dispatcher(&backend, Arc::new(FakeTranscoder::new(10)))
        .dispatch(&message("!sticker", Some("image/png")), &config, &transport)
        .await
        .unwrap();

    assert!(transport.stickers().is_empty());
    assert_eq!(
        transport.replies(),
        vec!["Sorry, there was an error processing the media: The media type could not be recognized.".to_string()]
    );
}

#[tokio::test]
async fn sticker_without_sources_explains_usage() {
    let backend = ScriptedBackend::new(Script::Answer("unused"));
    let transport = RecordingTransport::default();
    let config = test_config();

    dispatcher(&backend, Arc::new(FakeTranscoder::new(10)))
        .dispatch(&message("!sticker", None), &config, &transport)
        .await
        .unwrap();

    let replies = transport.replies();
    assert_eq!(replies.len(), 1);
    assert!(replies[0].starts_with("Please send an image"));
}

#[tokio::test]
async fn more_than_five_sources_converts_nothing() {
    let transcoder = Arc::new(FakeTranscoder::new(10));
    let backend = ScriptedBackend::new(Script::Answer("unused"));
    let transport = RecordingTransport::with_media(MediaPayload::new(Some("video/mp4".to_string()), vec![0u8; 16]));
    let config = test_config();
    let body = "!sticker https://a.test/1.gif https://a.test/2.gif https://a.test/3.gif https://a.test/4.gif https://a.test/5.gif";

    dispatcher(&backend, Arc::clone(&transcoder))
        .dispatch(&message(body, Some("video/mp4")), &config, &transport)
        .await
        .unwrap();

    assert_eq!(transcoder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(transport.downloads.load(Ordering::SeqCst), 0);
    assert!(transport.stickers().is_empty());
    assert_eq!(
        transport.replies(),
        vec!["Too many media items. Please send at most 5 per !sticker command.".to_string()]
    );
}

#[tokio::test]
async fn one_failing_source_does_not_stop_the_others() {
    let mut server = mockito::Server::new_async().await;
    let _missing = server
        .mock("GET", "/missing.gif")
        .with_status(404)
        .with_body("not found")
        .create_async()
        .await;
    let _ok = server
        .mock("GET", "/ok.gif")
        .with_status(200)
        .with_header("content-type", "image/gif")
        .with_body(b"GIF89a-fake")
        .create_async()
        .await;

    let backend = ScriptedBackend::new(Script::Answer("unused"));
    let transport = RecordingTransport::with_media(MediaPayload::new(Some("image/png".to_string()), b"png".to_vec()));
    let config = test_config();
    let body = format!("!sticker {0}/missing.gif {0}/ok.gif", server.url());

    dispatcher(&backend, Arc::new(FakeTranscoder::new(10)))
        .dispatch(&message(&body, Some("image/png")), &config, &transport)
        .await
        .unwrap();

    let stickers = transport.stickers();
    assert_eq!(stickers.len(), 2);
    assert!(stickers.contains(&StickerImage {
        mime_type: "image/png".to_string(),
        data: b"png".to_vec(),
    }));
    assert!(stickers.contains(&StickerImage {
        mime_type: "image/gif".to_string(),
        data: b"GIF89a-fake".to_vec(),
    }));
    assert_eq!(
        transport.replies(),
        vec!["Sorry, there was an error processing the media: The link could not be downloaded.".to_string()]
    );
}

#[tokio::test]
async fn resolve_keeps_attachment_url_text_order() {
    let png = MediaPayload::new(Some("image/png".to_string()), b"png".to_vec());
    let transport = RecordingTransport::with_media(png.clone());
    let msg = message(
        r#"!sticker https://a.test/x.gif "big text" https://b.test/y.gif "ignored""#,
        Some("image/png"),
    );

    let sources = resolve(&msg, &transport).await.unwrap();

    assert_eq!(
        sources,
        vec![
            ConversionSource::Attachment(png),
            ConversionSource::RemoteUrl("https://a.test/x.gif".to_string()),
            ConversionSource::RemoteUrl("https://b.test/y.gif".to_string()),
            ConversionSource::TextLiteral("big text".to_string()),
        ]
    );
}

#[tokio::test]
async fn failed_attachment_download_still_renders_quoted_text() {
    let backend = ScriptedBackend::new(Script::Answer("unused"));
    // Message says it carries a photo, but the transport has nothing to hand over.
    let transport = RecordingTransport::default();
    let config = test_config();

    dispatcher(&backend, Arc::new(FakeTranscoder::new(10)))
        .dispatch(&message(r#"!sticker "hello""#, Some("image/png")), &config, &transport)
        .await
        .unwrap();

    assert_eq!(transport.downloads.load(Ordering::SeqCst), 1);
    let stickers = transport.stickers();
    assert_eq!(stickers.len(), 1);
    assert_eq!(stickers[0].mime_type, "image/webp");
    let img = image::load_from_memory_with_format(&stickers[0].data, image::ImageFormat::WebP).unwrap();
    assert_eq!((img.width(), img.height()), (512, 512));
    assert_eq!(
        transport.replies(),
        vec!["Sorry, there was an error processing the media: The attachment could not be downloaded.".to_string()]
    );
}
