//! Process configuration read from the environment (and `.env`).

use std::path::PathBuf;
use std::time::Duration;
use teloxide::types::ChatId;

use crate::compose::ToolPaths;
use crate::error::ConfigError;
use crate::settings::{self, Movement, Settings};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub work_dir: PathBuf,
    pub font_file: String,
    pub tools: ToolPaths,
    /// Upper bound for a single external tool run; `None` waits forever.
    pub tool_timeout: Option<Duration>,
    /// Where results are uploaded; `None` replies in the requesting chat.
    pub upload_chat: Option<ChatId>,
    /// Settings new jobs start from, and what `/reset` restores.
    pub defaults: Settings,
    pub settings_file: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let string_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let tool_timeout = match get("TOOL_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                    key: "TOOL_TIMEOUT_SECS",
                    value: raw.clone(),
                })?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => None,
        };

        let upload_chat = match get("UPLOAD_CHAT_ID") {
            Some(raw) => Some(ChatId(raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "UPLOAD_CHAT_ID",
                value: raw.clone(),
            })?)),
            None => None,
        };

        let mut defaults = Settings::default();
        if let Some(raw) = get("DEFAULT_CRF") {
            defaults.crf = settings::parse_crf(&raw).map_err(|source| ConfigError::Setting {
                key: "DEFAULT_CRF",
                source,
            })?;
        }
        if let Some(raw) = get("DEFAULT_QUALITY") {
            defaults.quality = settings::parse_quality(&raw).map_err(|source| ConfigError::Setting {
                key: "DEFAULT_QUALITY",
                source,
            })?;
        }
        if let Some(raw) = get("DEFAULT_WATERMARK") {
            defaults.watermark = settings::parse_watermark(&raw).map_err(|source| ConfigError::Setting {
                key: "DEFAULT_WATERMARK",
                source,
            })?;
        }
        if let Some(raw) = get("DEFAULT_MOVEMENT") {
            defaults.movement = Movement::from_code_lenient(&raw);
        }

        Ok(Self {
            work_dir: PathBuf::from(string_or("WORK_DIR", "downloads")),
            font_file: string_or("FONT_FILE", "vidwater.ttf"),
            tools: ToolPaths {
                ytdlp: string_or("YTDLP_BIN", "yt-dlp"),
                ffmpeg: string_or("FFMPEG_BIN", "ffmpeg"),
                mp4decrypt: string_or("MP4DECRYPT_BIN", "mp4decrypt"),
            },
            tool_timeout,
            upload_chat,
            defaults,
            settings_file: get("SETTINGS_FILE").map(PathBuf::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.work_dir, PathBuf::from("downloads"));
        assert_eq!(cfg.font_file, "vidwater.ttf");
        assert_eq!(cfg.tools, ToolPaths::default());
        assert_eq!(cfg.tool_timeout, None);
        assert_eq!(cfg.upload_chat, None);
        assert_eq!(cfg.defaults, Settings::default());
        assert_eq!(cfg.defaults.crf, 18);
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("WORK_DIR", "/tmp/jobs"),
            ("FFMPEG_BIN", "/opt/ffmpeg/bin/ffmpeg"),
            ("TOOL_TIMEOUT_SECS", "3600"),
            ("UPLOAD_CHAT_ID", "-1001234567890"),
            ("DEFAULT_CRF", "23"),
            ("DEFAULT_QUALITY", "/d"),
            ("DEFAULT_MOVEMENT", "lr"),
        ])
        .unwrap();
        assert_eq!(cfg.work_dir, PathBuf::from("/tmp/jobs"));
        assert_eq!(cfg.tools.ffmpeg, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(cfg.tool_timeout, Some(Duration::from_secs(3600)));
        assert_eq!(cfg.upload_chat, Some(ChatId(-1001234567890)));
        assert_eq!(cfg.defaults.crf, 23);
        assert_eq!(cfg.defaults.quality, None);
        assert_eq!(cfg.defaults.movement, Movement::LeftToRight);
    }

    #[test]
    fn test_zero_timeout_means_unbounded() {
        let cfg = config(&[("TOOL_TIMEOUT_SECS", "0")]).unwrap();
        assert_eq!(cfg.tool_timeout, None);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            config(&[("TOOL_TIMEOUT_SECS", "soon")]),
            Err(ConfigError::Invalid { key: "TOOL_TIMEOUT_SECS", .. })
        ));
        assert!(matches!(
            config(&[("DEFAULT_CRF", "40")]),
            Err(ConfigError::Setting { key: "DEFAULT_CRF", .. })
        ));
    }
}
