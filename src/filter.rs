//! `drawtext` filter expressions for the text watermark.

use crate::settings::{Movement, Position, Settings};

/// Font size relative to the frame height.
pub const DEFAULT_FONT_SIZE: &str = "h/18";

const FONT_COLOR: &str = "black";
const MARGIN: u32 = 10;

const CENTER_X: &str = "(w-text_w)/2";
const CENTER_Y: &str = "(h-text_h)/2";

/// Everything the watermark filter depends on.
#[derive(Debug, Clone, Copy)]
pub struct WatermarkSpec<'a> {
    pub text: &'a str,
    pub font: &'a str,
    pub movement: Movement,
    pub speed: u32,
    pub position: Position,
    pub font_size: &'a str,
}

impl<'a> WatermarkSpec<'a> {
    /// Spec for the settings' watermark, `None` when the watermark is disabled.
    pub fn from_settings(settings: &'a Settings, font: &'a str) -> Option<Self> {
        let text = settings.watermark.as_deref()?;
        Some(Self {
            text,
            font,
            movement: settings.movement,
            speed: settings.speed,
            position: settings.position,
            font_size: DEFAULT_FONT_SIZE,
        })
    }
}

/// Escapes a value for a filter option inside a filtergraph.
///
/// Two levels apply: the option parser (`\\`, `'`, `:`), then the graph
/// parser, which also treats brackets, commas and semicolons as syntax.
pub fn escape_filter_value(value: &str) -> String {
    let option_level = escape_chars(value, &['\\', '\'', ':']);
    escape_chars(&option_level, &['\\', '\'', '[', ']', ',', ';'])
}

fn escape_chars(value: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Builds the `drawtext` filter for a watermark.
///
/// Text expansion is off, so `%` in the watermark is drawn literally.
pub fn build_watermark_filter(spec: &WatermarkSpec<'_>) -> String {
    let base = format!(
        "drawtext=fontfile={}:text={}:expansion=none:fontcolor={}:fontsize={}:box=0:shadowcolor=black@0.0:shadowx=0:shadowy=0",
        escape_filter_value(spec.font),
        escape_filter_value(spec.text),
        FONT_COLOR,
        spec.font_size,
    );

    let (x, y) = match spec.movement {
        Movement::Stationary => match spec.position {
            Position::Center => (CENTER_X.to_string(), CENTER_Y.to_string()),
            Position::BottomRight => (
                format!("(w-text_w-{})", MARGIN),
                format!("(h-text_h-{})", MARGIN),
            ),
        },
        // The comma separates filters in a graph, so it is escaped inside mod().
        Movement::LeftToRight => (
            format!("mod(t*{}\\,w+text_w)-text_w", spec.speed),
            CENTER_Y.to_string(),
        ),
        Movement::TopToBottom => (
            CENTER_X.to_string(),
            format!("mod(t*{}\\,h+text_h)-text_h", spec.speed),
        ),
    };

    format!("{}:x={}:y={}", base, x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(movement: Movement, position: Position) -> WatermarkSpec<'static> {
        WatermarkSpec {
            text: "Sample",
            font: "vidwater.ttf",
            movement,
            speed: 100,
            position,
            font_size: DEFAULT_FONT_SIZE,
        }
    }

    fn option<'f>(filter: &'f str, key: &str) -> &'f str {
        let prefix = format!(":{}=", key);
        let start = filter.find(&prefix).unwrap() + prefix.len();
        let rest = &filter[start..];
        // Options are separated by unescaped colons.
        let mut end = rest.len();
        let bytes = rest.as_bytes();
        for i in 0..bytes.len() {
            if bytes[i] == b':' && (i == 0 || bytes[i - 1] != b'\\') {
                end = i;
                break;
            }
        }
        &rest[..end]
    }

    #[test]
    fn test_stationary_center() {
        let filter = build_watermark_filter(&spec(Movement::Stationary, Position::Center));
        assert_eq!(option(&filter, "x"), "(w-text_w)/2");
        assert_eq!(option(&filter, "y"), "(h-text_h)/2");
        assert!(filter.contains("fontsize=h/18"));
        assert!(filter.starts_with("drawtext=fontfile=vidwater.ttf:text=Sample:"));
    }

    #[test]
    fn test_stationary_bottom_right_keeps_margin() {
        let filter = build_watermark_filter(&spec(Movement::Stationary, Position::BottomRight));
        assert_eq!(option(&filter, "x"), "(w-text_w-10)");
        assert_eq!(option(&filter, "y"), "(h-text_h-10)");
    }

    #[test]
    fn test_left_to_right_wraps_on_width() {
        let filter = build_watermark_filter(&spec(Movement::LeftToRight, Position::BottomRight));
        let x = option(&filter, "x");
        assert_eq!(x, "mod(t*100\\,w+text_w)-text_w");
        assert!(!x.contains('h'));
        // Position only applies to stationary watermarks.
        assert_eq!(option(&filter, "y"), "(h-text_h)/2");
    }

    #[test]
    fn test_top_to_bottom_wraps_on_height() {
        let mut s = spec(Movement::TopToBottom, Position::Center);
        s.speed = 250;
        let filter = build_watermark_filter(&s);
        assert_eq!(option(&filter, "x"), "(w-text_w)/2");
        assert_eq!(option(&filter, "y"), "mod(t*250\\,h+text_h)-text_h");
    }

    #[test]
    fn test_quotes_and_colons_are_escaped() {
        let mut s = spec(Movement::Stationary, Position::Center);
        s.text = "it's 12:00";
        let filter = build_watermark_filter(&s);
        assert!(filter.contains(r"text=it\\\'s 12\\:00:"));
    }

    #[test]
    fn test_percent_is_drawn_literally() {
        let mut s = spec(Movement::Stationary, Position::Center);
        s.text = "100% original";
        let filter = build_watermark_filter(&s);
        assert_eq!(option(&filter, "text"), "100% original");
        assert_eq!(option(&filter, "expansion"), "none");
    }

    #[test]
    fn test_deterministic() {
        let s = spec(Movement::LeftToRight, Position::Center);
        assert_eq!(build_watermark_filter(&s), build_watermark_filter(&s));
    }

    #[test]
    fn test_disabled_watermark_has_no_spec() {
        let settings = Settings::default();
        assert!(WatermarkSpec::from_settings(&settings, "vidwater.ttf").is_none());

        let settings = Settings {
            watermark: Some("Sample".into()),
            speed: 42,
            ..Settings::default()
        };
        let spec = WatermarkSpec::from_settings(&settings, "font.ttf").unwrap();
        assert_eq!(spec.text, "Sample");
        assert_eq!(spec.speed, 42);
        assert_eq!(spec.font_size, DEFAULT_FONT_SIZE);
    }
}
