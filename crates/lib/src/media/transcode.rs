//! Video/GIF to WEBP sticker transcoding through an external ffmpeg process.

use crate::config::MediaConfig;
use crate::media::MediaError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// Stickers are scaled and padded to a square of this many pixels.
pub const STICKER_SIZE: u32 = 256;

/// Turns the file at `input` into a WEBP sticker at `output`.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, input: &Path, output: &Path, config: &MediaConfig) -> Result<(), MediaError>;
}

/// Runs `ffmpeg` (path from `media.ffmpegPath`) with the fixed sticker argument set.
#[derive(Debug, Clone, Default)]
pub struct FfmpegTranscoder;

impl FfmpegTranscoder {
    /// Scale to fit, then pad to a centered square.
    fn filter() -> String {
        format!(
            "scale={s}:{s}:force_original_aspect_ratio=decrease,pad={s}:{s}:(ow-iw)/2:(oh-ih)/2",
            s = STICKER_SIZE
        )
    }

    fn args(input: &Path, output: &Path) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-i".to_string(), input.display().to_string()];
        args.extend(
            [
                "-vcodec", "libwebp", "-vf", Self::filter().as_str(), "-qscale", "50", "-preset", "default",
                "-loop", "0", "-an", "-vsync", "0", "-f", "webp",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(output.display().to_string());
        args
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, input: &Path, output: &Path, config: &MediaConfig) -> Result<(), MediaError> {
        let result = tokio::process::Command::new(&config.ffmpeg_path)
            .args(Self::args(input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| MediaError::Transcode(format!("spawning {}: {}", config.ffmpeg_path, e)))?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: String = stderr.lines().rev().take(3).collect::<Vec<_>>().join(" | ");
            log::warn!("ffmpeg exited with {}: {}", result.status, tail);
            return Err(MediaError::Transcode(format!("ffmpeg exited with {}", result.status)));
        }
        Ok(())
    }
}

/// Uniquely named transcoder input/output pair. Both files are removed when this is dropped,
/// whichever way the conversion ends.
#[derive(Debug)]
pub struct TempMediaFiles {
    input: PathBuf,
    output: PathBuf,
}

impl TempMediaFiles {
    /// Reserve `input_<uuid>.<ext>` and `output_<uuid>.webp` under `dir` (created if missing).
    pub async fn create(dir: &Path, mime_type: &str) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let id = uuid::Uuid::new_v4();
        Ok(Self {
            input: dir.join(format!("input_{}.{}", id, extension_for(mime_type))),
            output: dir.join(format!("output_{}.webp", id)),
        })
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}

impl Drop for TempMediaFiles {
    fn drop(&mut self) {
        for path in [&self.input, &self.output] {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("media: failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

/// File extension from the MIME subtype (`video/mp4` -> `mp4`), restricted to safe characters.
fn extension_for(mime_type: &str) -> String {
    let ext: String = mime_type
        .split('/')
        .nth(1)
        .unwrap_or("")
        .split(';')
        .next()
        .unwrap_or("")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if ext.is_empty() {
        "bin".to_string()
    } else {
        ext
    }
}
