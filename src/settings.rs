//! Watermark and compression settings shared by every job.
//!
//! The store holds the current defaults. Jobs never read it directly while
//! running: they take a [`Settings`] snapshot when they are created, so a
//! concurrent change only affects jobs started afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{ConfigError, ConfigurationValueError};

/// Raw value users send to disable an optional setting.
pub const DISABLED: &str = "/d";

/// Canonical default compression level.
pub const DEFAULT_CRF: u8 = 18;
pub const MIN_CRF: u8 = 8;
pub const MAX_CRF: u8 = 28;

pub const DEFAULT_SPEED: u32 = 100;
pub const DEFAULT_QUALITY: u32 = 480;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Movement {
    #[default]
    Stationary,
    LeftToRight,
    TopToBottom,
}

impl Movement {
    pub const CHOICES: &'static str = "none, lr, tb";

    /// Parses the short codes used by the chat surface.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_lowercase().as_str() {
            "none" | "stationary" => Some(Movement::Stationary),
            "lr" | "left-to-right" => Some(Movement::LeftToRight),
            "tb" | "top-to-bottom" => Some(Movement::TopToBottom),
            _ => None,
        }
    }

    /// Like [`Movement::from_code`], but unknown codes become stationary.
    pub fn from_code_lenient(code: &str) -> Self {
        Self::from_code(code).unwrap_or_else(|| {
            log::warn!("Unknown watermark movement `{}`, using stationary", code);
            Movement::Stationary
        })
    }

    pub fn code(self) -> &'static str {
        match self {
            Movement::Stationary => "none",
            Movement::LeftToRight => "lr",
            Movement::TopToBottom => "tb",
        }
    }
}

impl fmt::Display for Movement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Movement::Stationary => "stationary",
            Movement::LeftToRight => "left→right",
            Movement::TopToBottom => "top→bottom",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Position {
    #[default]
    Center,
    BottomRight,
}

impl Position {
    pub const CHOICES: &'static str = "center, bottom-right";

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_lowercase().as_str() {
            "center" => Some(Position::Center),
            "bottom-right" | "br" => Some(Position::BottomRight),
            _ => None,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Center => f.write_str("center"),
            Position::BottomRight => f.write_str("bottom-right"),
        }
    }
}

/// One consistent view of every setting a job needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Watermark text; `None` disables the watermark.
    pub watermark: Option<String>,
    pub movement: Movement,
    pub speed: u32,
    pub position: Position,
    pub crf: u8,
    /// Height ceiling for downloads; `None` takes the best available.
    pub quality: Option<u32>,
    /// Custom thumbnail URL or path; `None` extracts a frame from the video.
    pub thumbnail: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            watermark: None,
            movement: Movement::Stationary,
            speed: DEFAULT_SPEED,
            position: Position::Center,
            crf: DEFAULT_CRF,
            quality: Some(DEFAULT_QUALITY),
            thumbnail: None,
        }
    }
}

impl Settings {
    /// Re-encoding is needed iff a watermark is configured.
    pub fn needs_reencode(&self) -> bool {
        self.watermark.is_some()
    }

    pub fn watermark_label(&self) -> &str {
        self.watermark.as_deref().unwrap_or("disabled")
    }
}

fn parse_int(field: &'static str, raw: &str) -> Result<i64, ConfigurationValueError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ConfigurationValueError::NotANumber {
            field,
            value: raw.trim().to_string(),
        })
}

fn in_range(field: &'static str, value: i64, min: i64, max: i64) -> Result<i64, ConfigurationValueError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigurationValueError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

fn is_disabled(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case(DISABLED)
}

/// Validates a compression level; `/d` yields the default.
pub fn parse_crf(raw: &str) -> Result<u8, ConfigurationValueError> {
    if is_disabled(raw) {
        return Ok(DEFAULT_CRF);
    }
    let value = in_range("crf", parse_int("crf", raw)?, MIN_CRF.into(), MAX_CRF.into())?;
    Ok(value as u8)
}

pub fn parse_speed(raw: &str) -> Result<u32, ConfigurationValueError> {
    let value = in_range("speed", parse_int("speed", raw)?, 1, u32::MAX.into())?;
    Ok(value as u32)
}

/// Validates a height ceiling; `/d` removes the ceiling.
pub fn parse_quality(raw: &str) -> Result<Option<u32>, ConfigurationValueError> {
    if is_disabled(raw) {
        return Ok(None);
    }
    let raw = raw.trim().trim_end_matches('p');
    let value = in_range("quality", parse_int("quality", raw)?, 1, 4320)?;
    Ok(Some(value as u32))
}

pub fn parse_watermark(raw: &str) -> Result<Option<String>, ConfigurationValueError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ConfigurationValueError::Empty("watermark"));
    }
    if is_disabled(text) {
        return Ok(None);
    }
    Ok(Some(text.to_string()))
}

pub fn parse_movement(raw: &str) -> Result<Movement, ConfigurationValueError> {
    Movement::from_code(raw).ok_or_else(|| ConfigurationValueError::UnknownChoice {
        field: "movement",
        value: raw.trim().to_string(),
        expected: Movement::CHOICES,
    })
}

pub fn parse_position(raw: &str) -> Result<Position, ConfigurationValueError> {
    Position::from_code(raw).ok_or_else(|| ConfigurationValueError::UnknownChoice {
        field: "position",
        value: raw.trim().to_string(),
        expected: Position::CHOICES,
    })
}

pub fn parse_thumbnail(raw: &str) -> Result<Option<String>, ConfigurationValueError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ConfigurationValueError::Empty("thumbnail"));
    }
    if is_disabled(value) {
        return Ok(None);
    }
    Ok(Some(value.to_string()))
}

/// Shared, mutable defaults for new jobs.
#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<Mutex<Settings>>,
    defaults: Settings,
    persist_to: Option<PathBuf>,
}

impl SettingsStore {
    pub fn new(defaults: Settings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(defaults.clone())),
            defaults,
            persist_to: None,
        }
    }

    /// Creates a store backed by a JSON file, loading it when it already exists.
    pub async fn with_file(defaults: Settings, path: PathBuf) -> Result<Self, ConfigError> {
        let read = tokio::fs::read(&path).await;
        let current = match read {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| ConfigError::SettingsFormat {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => defaults.clone(),
            Err(source) => return Err(ConfigError::SettingsFile { path, source }),
        };
        log::info!("Loaded settings from {}", path.display());
        Ok(Self {
            inner: Arc::new(Mutex::new(current)),
            defaults,
            persist_to: Some(path),
        })
    }

    /// Copy of the current settings, taken once per job.
    pub async fn snapshot(&self) -> Settings {
        self.inner.lock().await.clone()
    }

    pub async fn set_watermark(&self, raw: &str) -> Result<Option<String>, ConfigurationValueError> {
        let value = parse_watermark(raw)?;
        self.update(|s| s.watermark = value.clone()).await;
        Ok(value)
    }

    pub async fn set_movement(&self, raw: &str) -> Result<Movement, ConfigurationValueError> {
        let value = parse_movement(raw)?;
        self.update(|s| s.movement = value).await;
        Ok(value)
    }

    pub async fn set_speed(&self, raw: &str) -> Result<u32, ConfigurationValueError> {
        let value = parse_speed(raw)?;
        self.update(|s| s.speed = value).await;
        Ok(value)
    }

    pub async fn set_position(&self, raw: &str) -> Result<Position, ConfigurationValueError> {
        let value = parse_position(raw)?;
        self.update(|s| s.position = value).await;
        Ok(value)
    }

    pub async fn set_crf(&self, raw: &str) -> Result<u8, ConfigurationValueError> {
        let value = parse_crf(raw)?;
        self.update(|s| s.crf = value).await;
        Ok(value)
    }

    pub async fn set_quality(&self, raw: &str) -> Result<Option<u32>, ConfigurationValueError> {
        let value = parse_quality(raw)?;
        self.update(|s| s.quality = value).await;
        Ok(value)
    }

    pub async fn set_thumbnail(&self, raw: &str) -> Result<Option<String>, ConfigurationValueError> {
        let value = parse_thumbnail(raw)?;
        self.update(|s| s.thumbnail = value.clone()).await;
        Ok(value)
    }

    /// Restores the start-up defaults.
    pub async fn reset(&self) {
        let defaults = self.defaults.clone();
        self.update(|s| *s = defaults).await;
    }

    async fn update(&self, apply: impl FnOnce(&mut Settings)) {
        let mut settings = self.inner.lock().await;
        apply(&mut settings);
        log::info!("Settings updated: {:?}", *settings);

        if let Some(path) = &self.persist_to {
            match serde_json::to_vec_pretty(&*settings) {
                Ok(bytes) => {
                    if let Err(e) = tokio::fs::write(path, bytes).await {
                        log::warn!("Failed to persist settings to {}: {}", path.display(), e);
                    }
                }
                Err(e) => log::warn!("Failed to serialize settings: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_crf_bounds() {
        assert_eq!(parse_crf("8"), Ok(8));
        assert_eq!(parse_crf(" 28 "), Ok(28));
        assert_eq!(parse_crf("/d"), Ok(DEFAULT_CRF));
        assert!(matches!(
            parse_crf("7"),
            Err(ConfigurationValueError::OutOfRange { value: 7, .. })
        ));
        assert!(matches!(parse_crf("29"), Err(ConfigurationValueError::OutOfRange { .. })));
        assert!(matches!(parse_crf("high"), Err(ConfigurationValueError::NotANumber { .. })));
    }

    #[test]
    fn test_speed_must_be_positive() {
        assert_eq!(parse_speed("150"), Ok(150));
        assert!(parse_speed("0").is_err());
        assert!(parse_speed("-5").is_err());
    }

    #[test]
    fn test_quality_accepts_p_suffix_and_disable() {
        assert_eq!(parse_quality("720p"), Ok(Some(720)));
        assert_eq!(parse_quality("/D"), Ok(None));
        assert!(parse_quality("0").is_err());
    }

    #[test]
    fn test_movement_codes() {
        assert_eq!(parse_movement("lr"), Ok(Movement::LeftToRight));
        assert_eq!(parse_movement("TB"), Ok(Movement::TopToBottom));
        assert_eq!(parse_movement("none"), Ok(Movement::Stationary));
        assert!(parse_movement("diagonal").is_err());
        assert_eq!(Movement::from_code_lenient("diagonal"), Movement::Stationary);
    }

    #[test]
    fn test_watermark_sentinel() {
        assert_eq!(parse_watermark("/d"), Ok(None));
        assert_eq!(parse_watermark(" Sample "), Ok(Some("Sample".to_string())));
        assert_eq!(parse_watermark("   "), Err(ConfigurationValueError::Empty("watermark")));
    }

    #[tokio::test]
    async fn test_rejected_value_leaves_store_unchanged() {
        let store = SettingsStore::new(Settings::default());
        store.set_crf("20").await.unwrap();

        assert!(store.set_crf("99").await.is_err());
        assert!(store.set_position("top-left").await.is_err());

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.crf, 20);
        assert_eq!(snapshot.position, Position::Center);
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_later_changes() {
        let store = SettingsStore::new(Settings::default());
        store.set_watermark("First").await.unwrap();
        let snapshot = store.snapshot().await;

        store.set_watermark("Second").await.unwrap();

        assert_eq!(snapshot.watermark.as_deref(), Some("First"));
        assert_eq!(store.snapshot().await.watermark.as_deref(), Some("Second"));
    }

    #[tokio::test]
    async fn test_reset_restores_defaults() {
        let defaults = Settings {
            crf: 22,
            ..Settings::default()
        };
        let store = SettingsStore::new(defaults.clone());
        store.set_crf("10").await.unwrap();
        store.set_movement("lr").await.unwrap();

        store.reset().await;

        assert_eq!(store.snapshot().await, defaults);
    }

    #[tokio::test]
    async fn test_file_backed_store_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");

        let store = SettingsStore::with_file(Settings::default(), path.clone()).await.unwrap();
        store.set_watermark("Persisted").await.unwrap();
        store.set_movement("tb").await.unwrap();

        let reloaded = SettingsStore::with_file(Settings::default(), path).await.unwrap();
        let snapshot = reloaded.snapshot().await;
        assert_eq!(snapshot.watermark.as_deref(), Some("Persisted"));
        assert_eq!(snapshot.movement, Movement::TopToBottom);
    }
}
