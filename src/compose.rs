//! Argument vectors for the external tools.
//!
//! Commands are built as a program plus arguments and executed without a
//! shell, so paths and filter expressions never need shell quoting.

use std::fmt;
use std::path::{Path, PathBuf};

/// Frame used for generated thumbnails.
const THUMBNAIL_AT: &str = "00:00:10";
const ENCODE_PRESET: &str = "medium";

/// Program names (or paths) of the external tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub ytdlp: String,
    pub ffmpeg: String,
    pub mp4decrypt: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ytdlp: "yt-dlp".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            mp4decrypt: "mp4decrypt".to_string(),
        }
    }
}

/// A fully composed external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    /// Value following the first occurrence of `flag`.
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Last argument, which is the output for every composed command.
    pub fn last_arg(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || c == '"') {
                write!(f, " \"{}\"", arg.replace('"', "\\\""))?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// yt-dlp format selector: best video+audio (or best combined), optionally capped by height.
pub fn format_selector(max_height: Option<u32>) -> String {
    match max_height {
        Some(height) => format!("bv[height<={}]+ba/b", height),
        None => "bv+ba/b".to_string(),
    }
}

/// Downloads `url` into `target_template` (a yt-dlp output template).
pub fn compose_download(
    tools: &ToolPaths,
    url: &str,
    target_template: &Path,
    max_height: Option<u32>,
) -> ToolCommand {
    ToolCommand::new(&tools.ytdlp)
        .arg("-f")
        .arg(format_selector(max_height))
        .arg("-o")
        .path_arg(target_template)
        .args(["--allow-unplayable-formats", "--no-check-certificate"])
        .args(["-R", "25", "--fragment-retries", "25"])
        .args(["--external-downloader", "aria2c"])
        .args(["--downloader-args", "aria2c: -x 16 -j 32"])
        .arg(url)
}

/// Decrypts `input` into `output`.
///
/// The key spec is passed through as-is after splitting on whitespace
/// (e.g. `--key KID:KEY --key KID2:KEY2`).
pub fn compose_decrypt(tools: &ToolPaths, input: &Path, key_spec: &str, output: &Path) -> ToolCommand {
    ToolCommand::new(&tools.mp4decrypt)
        .args(key_spec.split_whitespace())
        .arg("--show-progress")
        .path_arg(input)
        .path_arg(output)
}

fn ffmpeg_inputs(tools: &ToolPaths, video: &Path, audio: Option<&Path>) -> ToolCommand {
    let cmd = ToolCommand::new(&tools.ffmpeg)
        .args(["-y", "-hide_banner"])
        .arg("-i")
        .path_arg(video);

    match audio {
        Some(audio) => cmd
            .arg("-i")
            .path_arg(audio)
            .args(["-map", "0:v:0", "-map", "1:a:0"]),
        None => cmd,
    }
}

/// Re-encodes the video through `filter`, copying the audio stream.
pub fn compose_encode_with_filter(
    tools: &ToolPaths,
    video: &Path,
    audio: Option<&Path>,
    filter: &str,
    crf: u8,
    output: &Path,
) -> ToolCommand {
    ffmpeg_inputs(tools, video, audio)
        .arg("-vf")
        .arg(filter)
        .args(["-c:v", "libx264", "-preset", ENCODE_PRESET])
        .arg("-crf")
        .arg(crf.to_string())
        .args(["-c:a", "copy"])
        .path_arg(output)
}

/// Remuxes without re-encoding.
pub fn compose_copy_merge(tools: &ToolPaths, video: &Path, audio: Option<&Path>, output: &Path) -> ToolCommand {
    ffmpeg_inputs(tools, video, audio)
        .args(["-c", "copy"])
        .path_arg(output)
}

/// Extracts a single frame to use as the upload thumbnail.
pub fn compose_thumbnail(tools: &ToolPaths, video: &Path, output: &Path) -> ToolCommand {
    ToolCommand::new(&tools.ffmpeg)
        .args(["-y", "-hide_banner", "-ss", THUMBNAIL_AT])
        .arg("-i")
        .path_arg(video)
        .args(["-vframes", "1"])
        .path_arg(output)
}

/// Output template for a download into `dir`, named `file.<ext>`.
pub fn download_template(dir: &Path) -> PathBuf {
    dir.join("file.%(ext)s")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input_count(cmd: &ToolCommand) -> usize {
        cmd.args.iter().filter(|a| a.as_str() == "-i").count()
    }

    #[test]
    fn test_download_with_height_ceiling() {
        let cmd = compose_download(
            &ToolPaths::default(),
            "https://example.com/master.mpd",
            &download_template(Path::new("jobs/1")),
            Some(480),
        );

        assert_eq!(cmd.program, "yt-dlp");
        assert_eq!(cmd.value_of("-f"), Some("bv[height<=480]+ba/b"));
        assert_eq!(cmd.value_of("-o"), Some("jobs/1/file.%(ext)s"));
        assert_eq!(cmd.value_of("--fragment-retries"), Some("25"));
        assert_eq!(cmd.value_of("--external-downloader"), Some("aria2c"));
        assert_eq!(cmd.value_of("--downloader-args"), Some("aria2c: -x 16 -j 32"));
        assert_eq!(cmd.last_arg(), Some("https://example.com/master.mpd"));
    }

    #[test]
    fn test_download_without_ceiling() {
        let cmd = compose_download(&ToolPaths::default(), "u", Path::new("o"), None);
        assert_eq!(cmd.value_of("-f"), Some("bv+ba/b"));
    }

    #[test]
    fn test_decrypt_passes_key_spec_through() {
        let cmd = compose_decrypt(
            &ToolPaths::default(),
            Path::new("in.mp4"),
            "--key abc:123  --key def:456",
            Path::new("video.mp4"),
        );
        assert_eq!(
            cmd.args,
            vec!["--key", "abc:123", "--key", "def:456", "--show-progress", "in.mp4", "video.mp4"]
        );
    }

    #[test]
    fn test_encode_without_audio_has_single_input() {
        let cmd = compose_encode_with_filter(
            &ToolPaths::default(),
            Path::new("clip.mp4"),
            None,
            "drawtext=text=x",
            20,
            Path::new("out.mp4"),
        );
        assert_eq!(input_count(&cmd), 1);
        assert!(!cmd.args.contains(&"-map".to_string()));
        assert_eq!(cmd.value_of("-vf"), Some("drawtext=text=x"));
        assert_eq!(cmd.value_of("-crf"), Some("20"));
        assert_eq!(cmd.value_of("-c:v"), Some("libx264"));
        assert_eq!(cmd.value_of("-c:a"), Some("copy"));
        assert_eq!(cmd.last_arg(), Some("out.mp4"));
    }

    #[test]
    fn test_encode_with_audio_maps_both_inputs() {
        let cmd = compose_encode_with_filter(
            &ToolPaths::default(),
            Path::new("video.mp4"),
            Some(Path::new("audio.m4a")),
            "drawtext=text=x",
            18,
            Path::new("out.mp4"),
        );
        assert_eq!(input_count(&cmd), 2);
        let joined = cmd.args.join(" ");
        assert!(joined.contains("-i video.mp4 -i audio.m4a -map 0:v:0 -map 1:a:0"));
    }

    #[test]
    fn test_copy_merge_never_filters() {
        let single = compose_copy_merge(&ToolPaths::default(), Path::new("v.mp4"), None, Path::new("o.mp4"));
        assert_eq!(input_count(&single), 1);
        assert_eq!(single.value_of("-c"), Some("copy"));
        assert!(single.value_of("-vf").is_none());

        let merged = compose_copy_merge(
            &ToolPaths::default(),
            Path::new("v.mp4"),
            Some(Path::new("a.m4a")),
            Path::new("o.mp4"),
        );
        assert_eq!(input_count(&merged), 2);
        assert!(merged.value_of("-crf").is_none());
    }

    #[test]
    fn test_display_quotes_arguments_with_spaces() {
        let cmd = ToolCommand::new("yt-dlp").args(["--downloader-args", "aria2c: -x 16"]);
        assert_eq!(cmd.to_string(), "yt-dlp --downloader-args \"aria2c: -x 16\"");
    }
}
