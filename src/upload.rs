//! Handing finished jobs to Telegram.

use std::path::{Path, PathBuf};
use teloxide::prelude::*;
use teloxide::types::InputFile;

use crate::error::TransferError;
use crate::pipeline::{FinishedJob, Pipeline};
use crate::runner::ToolRunner;

/// Telegram's caption limit, in characters.
pub const CAPTION_LIMIT: usize = 1024;

const CUSTOM_THUMBNAIL: &str = "custom_thumb.jpg";

/// Where the thumbnail for an upload comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailSource {
    Url(String),
    File(PathBuf),
    /// Extract a frame from the output.
    Extract,
}

impl ThumbnailSource {
    pub fn from_setting(setting: Option<&str>) -> Self {
        match setting.map(str::trim) {
            Some(s) if s.starts_with("http://") || s.starts_with("https://") => {
                ThumbnailSource::Url(s.to_string())
            }
            Some(s) if !s.is_empty() => ThumbnailSource::File(PathBuf::from(s)),
            _ => ThumbnailSource::Extract,
        }
    }
}

async fn fetch_thumbnail(client: &reqwest::Client, url: &str, target: &Path) -> Result<(), TransferError> {
    let response = client.get(url).send().await?.error_for_status()?;
    let bytes = response.bytes().await?;
    tokio::fs::write(target, &bytes).await?;
    Ok(())
}

/// Resolves the thumbnail for a finished job; `None` uploads without one.
pub async fn prepare_thumbnail<R: ToolRunner>(
    pipeline: &Pipeline<R>,
    client: &reqwest::Client,
    finished: &FinishedJob,
) -> Option<PathBuf> {
    match ThumbnailSource::from_setting(finished.settings.thumbnail.as_deref()) {
        ThumbnailSource::Url(url) => {
            let target = finished.dir.path().join(CUSTOM_THUMBNAIL);
            match fetch_thumbnail(client, &url, &target).await {
                Ok(()) => return Some(target),
                Err(e) => log::warn!("[job {}] thumbnail download from {} failed: {}", finished.id, url, e),
            }
        }
        ThumbnailSource::File(path) => {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Some(path);
            }
            log::warn!("[job {}] thumbnail {} does not exist", finished.id, path.display());
        }
        ThumbnailSource::Extract => {}
    }
    pipeline.extract_thumbnail(finished).await
}

/// Caption listing the file name and the settings the job used.
pub fn job_caption(name: &str, finished: &FinishedJob) -> String {
    let settings = &finished.settings;
    let mut caption = format!("🎞 {}\n\n✅ Done ({})", name, finished.mode);
    if settings.needs_reencode() {
        caption.push_str(&format!(
            "\nWatermark: {}\nMovement: {}\nCRF: {}",
            settings.watermark_label(),
            settings.movement,
            settings.crf
        ));
    }
    truncate_chars(&caption, CAPTION_LIMIT)
}

/// Cuts `text` to at most `max` characters, marking the cut with an ellipsis.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

/// A file ready to be sent.
#[derive(Debug, Clone)]
pub struct Upload<'a> {
    pub path: &'a Path,
    pub caption: String,
    pub thumbnail: Option<PathBuf>,
    pub supports_streaming: bool,
}

/// Sends the file as a video, falling back to a document when Telegram rejects it.
pub async fn deliver(bot: &Bot, chat: ChatId, upload: &Upload<'_>) -> Result<(), teloxide::RequestError> {
    let mut video = bot
        .send_video(chat, InputFile::file(upload.path.to_path_buf()))
        .caption(upload.caption.clone())
        .supports_streaming(upload.supports_streaming);
    if let Some(thumb) = &upload.thumbnail {
        video = video.thumbnail(InputFile::file(thumb.clone()));
    }

    match video.await {
        Ok(_) => Ok(()),
        Err(e) => {
            log::warn!("send_video failed for {}: {}, retrying as document", upload.path.display(), e);
            bot.send_document(chat, InputFile::file(upload.path.to_path_buf()))
                .caption(upload.caption.clone())
                .await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FinalMode;
    use crate::settings::{Movement, Settings};

    fn finished(settings: Settings, mode: FinalMode) -> FinishedJob {
        FinishedJob {
            id: "test".to_string(),
            output: PathBuf::from("work/job-test/out/lecture.mp4"),
            dir: tempfile::TempDir::new().unwrap(),
            mode,
            settings,
        }
    }

    #[test]
    fn test_thumbnail_source_from_setting() {
        assert_eq!(ThumbnailSource::from_setting(None), ThumbnailSource::Extract);
        assert_eq!(
            ThumbnailSource::from_setting(Some("https://example.com/t.jpg")),
            ThumbnailSource::Url("https://example.com/t.jpg".to_string())
        );
        assert_eq!(
            ThumbnailSource::from_setting(Some("thumbs/cover.jpg")),
            ThumbnailSource::File(PathBuf::from("thumbs/cover.jpg"))
        );
    }

    #[test]
    fn test_caption_mentions_watermark_settings() {
        let settings = Settings {
            watermark: Some("Sample".to_string()),
            movement: Movement::LeftToRight,
            crf: 21,
            ..Settings::default()
        };
        let caption = job_caption("lecture", &finished(settings, FinalMode::Watermark));
        assert!(caption.contains("lecture"));
        assert!(caption.contains("Watermark: Sample"));
        assert!(caption.contains("Movement: left→right"));
        assert!(caption.contains("CRF: 21"));

        let caption = job_caption("lecture", &finished(Settings::default(), FinalMode::Copy));
        assert!(caption.contains("stream copy"));
        assert!(!caption.contains("CRF"));
    }

    #[test]
    fn test_truncate_chars_counts_characters() {
        assert_eq!(truncate_chars("short", 10), "short");
        let cut = truncate_chars("ééééé", 3);
        assert_eq!(cut, "éé…");
        assert_eq!(cut.chars().count(), 3);
    }
}
