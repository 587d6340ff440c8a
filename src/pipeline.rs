//! Download, decrypt and watermark/remux jobs.
//!
//! A job owns a private temporary directory under the work root. Every stage
//! writes into it, and the job removes what it no longer needs: intermediates
//! once the final file exists, the whole directory when a stage fails or the
//! job is dropped.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::compose::{
    compose_copy_merge, compose_decrypt, compose_download, compose_encode_with_filter,
    compose_thumbnail, download_template, ToolCommand, ToolPaths,
};
use crate::error::{PipelineError, PipelineResult};
use crate::filter::{build_watermark_filter, WatermarkSpec};
use crate::runner::ToolRunner;
use crate::settings::Settings;

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm"];
pub const AUDIO_EXTENSIONS: &[&str] = &["m4a", "mp4", "aac"];

const DECRYPTED_VIDEO: &str = "video.mp4";
const DECRYPTED_AUDIO: &str = "audio.m4a";
const THUMBNAIL: &str = "thumb.jpg";
/// Final files live here, apart from download and decrypt intermediates.
const OUTPUT_DIR: &str = "out";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Created,
    Downloading,
    Decrypting,
    Encoding,
    Copying,
    Verifying,
    CleaningUp,
    Delivered,
    Failed,
}

/// How the final file is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalMode {
    /// Re-encode through the watermark filter.
    Watermark,
    /// Lossless stream copy.
    Copy,
}

impl fmt::Display for FinalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalMode::Watermark => f.write_str("watermarked"),
            FinalMode::Copy => f.write_str("stream copy"),
        }
    }
}

/// Files found after the download stage, first match per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadedMedia {
    pub video: Option<PathBuf>,
    pub audio: Option<PathBuf>,
}

/// A request for remote (possibly encrypted) media.
#[derive(Debug, Clone)]
pub struct RemoteRequest<'a> {
    pub url: &'a str,
    /// Key material for the decryptor; `None` skips decryption.
    pub key_spec: Option<&'a str>,
    pub quality: Option<u32>,
    /// Base name of the final file, without extension.
    pub name: &'a str,
}

/// Scans a download directory for one video and one audio file.
///
/// `.mp4` counts as video first; a second `.mp4` is taken as audio.
pub async fn probe_download(dir: &Path) -> io::Result<DownloadedMedia> {
    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        if entry.file_type().await?.is_file() {
            entries.push(entry.path());
        }
    }
    entries.sort();

    let mut media = DownloadedMedia::default();
    for path in entries {
        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => ext.to_lowercase(),
            None => continue,
        };
        if media.video.is_none() && VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            media.video = Some(path);
        } else if media.audio.is_none() && AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            media.audio = Some(path);
        }
    }
    Ok(media)
}

/// Replaces characters that are unsafe in file names.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(100)
        .collect();
    let cleaned = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if cleaned.is_empty() {
        "video".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Chooses encode-with-filter or copy-merge for the final stage.
pub fn compose_final(
    tools: &ToolPaths,
    settings: &Settings,
    font: &str,
    video: &Path,
    audio: Option<&Path>,
    output: &Path,
) -> (FinalMode, ToolCommand) {
    match WatermarkSpec::from_settings(settings, font) {
        Some(spec) => {
            let filter = build_watermark_filter(&spec);
            let cmd = compose_encode_with_filter(tools, video, audio, &filter, settings.crf, output);
            (FinalMode::Watermark, cmd)
        }
        None => (FinalMode::Copy, compose_copy_merge(tools, video, audio, output)),
    }
}

async fn remove_file_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => log::debug!("Removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
    }
}

async fn remove_dir_quietly(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => log::debug!("Removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
    }
}

fn close_dir(id: &str, dir: TempDir) {
    let path = dir.path().to_path_buf();
    match dir.close() {
        Ok(()) => log::debug!("[job {}] removed {}", id, path.display()),
        Err(e) => log::warn!("[job {}] failed to remove {}: {}", id, path.display(), e),
    }
}

/// A job in progress: its settings snapshot, directory and current stage.
///
/// Dropping a job removes its directory.
#[derive(Debug)]
pub struct Job {
    id: String,
    dir: TempDir,
    settings: Settings,
    stage: JobStage,
}

impl Job {
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Path of a final file, outside the intermediates' namespace.
    fn output_path(&self, file_name: &str) -> PathBuf {
        self.dir().join(OUTPUT_DIR).join(file_name)
    }

    pub fn stage(&self) -> JobStage {
        self.stage
    }

    fn enter(&mut self, stage: JobStage) {
        log::info!("[job {}] {:?} -> {:?}", self.id, self.stage, stage);
        self.stage = stage;
    }

    /// Removes everything in the job directory except `keep`.
    async fn remove_intermediates(&mut self, keep: &Path) {
        self.enter(JobStage::CleaningUp);
        let mut read_dir = match tokio::fs::read_dir(self.dir.path()).await {
            Ok(read_dir) => read_dir,
            Err(e) => {
                log::warn!("[job {}] cannot list {}: {}", self.id, self.dir().display(), e);
                return;
            }
        };
        loop {
            match read_dir.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    if keep.starts_with(&path) {
                        continue;
                    }
                    if path.is_dir() {
                        remove_dir_quietly(&path).await;
                    } else {
                        remove_file_quietly(&path).await;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!("[job {}] cleanup stopped early: {}", self.id, e);
                    break;
                }
            }
        }
    }

    fn fail(mut self, err: &PipelineError) {
        log::error!("[job {}] failed during {:?}: {}", self.id, self.stage, err);
        self.stage = JobStage::Failed;
        close_dir(&self.id, self.dir);
    }
}

/// Result of a successful job, ready to be handed to the uploader.
#[derive(Debug)]
pub struct FinishedJob {
    pub id: String,
    pub output: PathBuf,
    pub dir: TempDir,
    pub mode: FinalMode,
    pub settings: Settings,
}

impl FinishedJob {
    /// Deletes the output and the job directory after delivery.
    pub async fn complete(self, delivered: bool) {
        let stage = if delivered {
            JobStage::Delivered
        } else {
            JobStage::Failed
        };
        log::info!("[job {}] {:?} -> {:?}", self.id, JobStage::CleaningUp, stage);
        close_dir(&self.id, self.dir);
    }
}

/// Runs jobs against a [`ToolRunner`].
pub struct Pipeline<R> {
    runner: R,
    tools: ToolPaths,
    font: String,
    work_root: PathBuf,
}

impl<R: ToolRunner> Pipeline<R> {
    pub fn new(runner: R, tools: ToolPaths, font: impl Into<String>, work_root: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            tools,
            font: font.into(),
            work_root: work_root.into(),
        }
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    /// Creates a job with its own directory and a snapshot of `settings`.
    pub async fn create_job(&self, settings: Settings) -> PipelineResult<Job> {
        tokio::fs::create_dir_all(&self.work_root).await?;
        let prefix = format!("job-{}-", chrono::Utc::now().format("%Y%m%d%H%M%S"));
        let dir = tempfile::Builder::new().prefix(&prefix).tempdir_in(&self.work_root)?;
        let id = dir
            .path()
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("job-"))
            .unwrap_or_default()
            .to_string();
        let job = Job {
            id,
            dir,
            settings,
            stage: JobStage::Created,
        };
        log::info!("[job {}] created in {}", job.id, job.dir().display());
        Ok(job)
    }

    /// Downloads, optionally decrypts, then watermarks or remuxes remote media.
    pub async fn process_remote(
        &self,
        settings: Settings,
        request: &RemoteRequest<'_>,
    ) -> PipelineResult<FinishedJob> {
        let mut job = self.create_job(settings).await?;
        match self.run_remote(&mut job, request).await {
            Ok((output, mode)) => Ok(self.finish(job, output, mode).await),
            Err(e) => {
                job.fail(&e);
                Err(e)
            }
        }
    }

    /// Watermarks or remuxes a local file. The input is removed afterwards.
    pub async fn process_local(&self, settings: Settings, input: &Path) -> PipelineResult<FinishedJob> {
        let mut job = match self.create_job(settings).await {
            Ok(job) => job,
            Err(e) => {
                remove_file_quietly(input).await;
                return Err(e);
            }
        };
        let result = self.run_local(&mut job, input).await;
        remove_file_quietly(input).await;
        match result {
            Ok((output, mode)) => Ok(self.finish(job, output, mode).await),
            Err(e) => {
                job.fail(&e);
                Err(e)
            }
        }
    }

    /// Extracts a thumbnail frame from a finished output.
    pub async fn extract_thumbnail(&self, finished: &FinishedJob) -> Option<PathBuf> {
        let target = finished.dir.path().join(THUMBNAIL);
        let cmd = compose_thumbnail(&self.tools, &finished.output, &target);
        match self.runner.run(&cmd).await {
            Ok(_) if target.exists() => Some(target),
            Ok(_) => None,
            Err(e) => {
                log::warn!("[job {}] thumbnail extraction failed: {}", finished.id, e);
                None
            }
        }
    }

    async fn finish(&self, mut job: Job, output: PathBuf, mode: FinalMode) -> FinishedJob {
        job.remove_intermediates(&output).await;
        log::info!("[job {}] ready: {}", job.id, output.display());
        FinishedJob {
            id: job.id,
            output,
            dir: job.dir,
            mode,
            settings: job.settings,
        }
    }

    async fn run_remote(
        &self,
        job: &mut Job,
        request: &RemoteRequest<'_>,
    ) -> PipelineResult<(PathBuf, FinalMode)> {
        job.enter(JobStage::Downloading);
        let template = download_template(job.dir());
        let download = compose_download(&self.tools, request.url, &template, request.quality);
        self.runner.run(&download).await?;

        let mut media = probe_download(job.dir()).await?;
        log::info!("[job {}] downloaded {:?}", job.id, media);

        if let Some(key_spec) = request.key_spec.filter(|k| !k.trim().is_empty()) {
            job.enter(JobStage::Decrypting);
            if let Some(video) = media.video.take() {
                media.video = Some(self.decrypt(job, &video, key_spec, DECRYPTED_VIDEO, "decrypted video").await?);
            }
            if let Some(audio) = media.audio.take() {
                media.audio = Some(self.decrypt(job, &audio, key_spec, DECRYPTED_AUDIO, "decrypted audio").await?);
            }
        }

        let video = media.video.ok_or(PipelineError::MissingArtifact("video"))?;
        let output = job.output_path(&format!("{}.mp4", sanitize_name(request.name)));
        let mode = self
            .produce_final(job, &video, media.audio.as_deref(), &output)
            .await?;
        Ok((output, mode))
    }

    async fn run_local(&self, job: &mut Job, input: &Path) -> PipelineResult<(PathBuf, FinalMode)> {
        if !tokio::fs::try_exists(input).await.unwrap_or(false) {
            return Err(PipelineError::MissingInput(input.to_path_buf()));
        }
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .map(sanitize_name)
            .unwrap_or_else(|| "video".to_string());
        let suffix = if job.settings.needs_reencode() { "wm" } else { "copy" };
        let output = job.output_path(&format!("{}_{}.mp4", stem, suffix));

        let mode = self.produce_final(job, input, None, &output).await?;
        Ok((output, mode))
    }

    async fn decrypt(
        &self,
        job: &Job,
        input: &Path,
        key_spec: &str,
        target_name: &str,
        what: &'static str,
    ) -> PipelineResult<PathBuf> {
        let target = job.dir().join(target_name);
        let cmd = compose_decrypt(&self.tools, input, key_spec, &target);
        self.runner.run(&cmd).await?;
        if !tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Err(PipelineError::MissingArtifact(what));
        }
        remove_file_quietly(input).await;
        Ok(target)
    }

    async fn produce_final(
        &self,
        job: &mut Job,
        video: &Path,
        audio: Option<&Path>,
        output: &Path,
    ) -> PipelineResult<FinalMode> {
        let (mode, cmd) = compose_final(&self.tools, &job.settings, &self.font, video, audio, output);
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        job.enter(match mode {
            FinalMode::Watermark => JobStage::Encoding,
            FinalMode::Copy => JobStage::Copying,
        });
        self.runner.run(&cmd).await?;

        job.enter(JobStage::Verifying);
        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(PipelineError::MissingOutput(output.to_path_buf()));
        }
        Ok(mode)
    }
}
