use crate::config::Config;
use crate::error::RenderError;
use crate::types::{OverlayPosition, OverlaySpec};
use std::{io::Write, path::{Path, PathBuf}, process::Stdio, time::Duration};
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub const TARGET_WIDTH: u32 = 1080;
pub const TARGET_HEIGHT: u32 = 1920;

/// Aspect-fill into the portrait frame, then center-crop the overflow.
pub fn scale_crop_filter() -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h}",
        w = TARGET_WIDTH,
        h = TARGET_HEIGHT
    )
}

struct CaptionStyle {
    font_size: u32,
    y: &'static str,
    box_alpha: &'static str,
    box_border: u32,
}

fn caption_style(pos: OverlayPosition) -> CaptionStyle {
    match pos {
        OverlayPosition::Top => CaptionStyle { font_size: 26, y: "80", box_alpha: "0.5", box_border: 10 },
        OverlayPosition::Center => CaptionStyle { font_size: 44, y: "(h-text_h)/2", box_alpha: "0.65", box_border: 15 },
        OverlayPosition::Bottom => CaptionStyle { font_size: 22, y: "h-100", box_alpha: "0.5", box_border: 10 },
    }
}

/// Quote a value for use inside a filter option.
///
/// ffmpeg unescapes filter arguments twice: once when splitting the graph and
/// again when splitting `key=value` options. Both levels must be applied here.
fn quote_filter_value(value: &str) -> String {
    // Option level: `\`, `'` and `:` are special outside quotes.
    let option = value.replace('\\', "\\\\").replace('\'', "\\'").replace(':', "\\:");
    // Graph level: single-quoted, closing and reopening around embedded quotes.
    format!("'{}'", option.replace('\'', "'\\''"))
}

/// One drawtext stage reading its caption from `text_file`. Expansion is off so
/// `%{...}` sequences in user text render literally.
pub fn drawtext_filter(pos: OverlayPosition, text_file: &Path, font_file: Option<&Path>) -> String {
    let style = caption_style(pos);
    let mut f = format!("drawtext=textfile={}:expansion=none", quote_filter_value(&text_file.to_string_lossy()));
    if let Some(font) = font_file {
        f.push_str(&format!(":fontfile={}", quote_filter_value(&font.to_string_lossy())));
    }
    f.push_str(&format!(
        ":fontsize={}:fontcolor=white:x=(w-text_w)/2:y={}:box=1:boxcolor=black@{}:boxborderw={}",
        style.font_size, style.y, style.box_alpha, style.box_border
    ));
    f
}

/// Full video filter chain: the mandatory scale/crop followed by one stage per caption.
pub fn build_filter_chain(captions: &[(OverlayPosition, &Path)], font_file: Option<&Path>) -> String {
    let mut stages = vec![scale_crop_filter()];
    stages.extend(captions.iter().map(|(pos, file)| drawtext_filter(*pos, file, font_file)));
    stages.join(",")
}

/// Write each non-blank caption to its own temporary file. The files are removed when dropped.
pub fn write_caption_files(spec: &OverlaySpec) -> Result<Vec<(OverlayPosition, NamedTempFile)>, RenderError> {
    spec.entries()
        .into_iter()
        .map(|(pos, text)| -> Result<_, RenderError> {
            let mut file = tempfile::Builder::new().prefix("caption-").suffix(".txt").tempfile()?;
            file.write_all(text.as_bytes())?;
            file.flush()?;
            Ok((pos, file))
        })
        .collect()
}

pub struct BuiltCommand {
    pub args: Vec<String>,
}

/// Inputs of a single render.
pub struct RenderJob<'a> {
    pub video: &'a Path,
    pub audio: &'a Path,
    pub output: &'a Path,
    pub overlays: &'a OverlaySpec,
    pub duration_secs: f64,
}

#[derive(Debug, Clone)]
pub struct Compositor {
    ffmpeg_bin: String,
    timeout: Duration,
    preset: String,
    crf: String,
    audio_bitrate: String,
    font_file: Option<PathBuf>,
}

impl Compositor {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            timeout: config.render_timeout,
            preset: config.ffmpeg_preset.clone(),
            crf: config.ffmpeg_crf.clone(),
            audio_bitrate: config.ffmpeg_audio_bitrate.clone(),
            font_file: config.font_file.clone(),
        }
    }

    pub fn build_command(&self, job: &RenderJob<'_>, filter_chain: &str) -> BuiltCommand {
        let mut args: Vec<String> = vec!["-y".into(), "-hide_banner".into(), "-loglevel".into(), "error".into()];
        args.extend(["-i".into(), job.video.to_string_lossy().to_string()]);
        args.extend(["-i".into(), job.audio.to_string_lossy().to_string()]);
        args.extend(["-t".into(), format!("{:.3}", job.duration_secs)]);
        args.extend(["-filter_complex".into(), format!("[0:v]{}[v]", filter_chain)]);
        args.extend(["-map".into(), "[v]".into(), "-map".into(), "1:a".into()]);
        args.extend(["-c:v".into(), "libx264".into(), "-preset".into(), self.preset.clone(), "-crf".into(), self.crf.clone()]);
        args.extend(["-pix_fmt".into(), "yuv420p".into()]);
        args.extend(["-c:a".into(), "aac".into(), "-b:a".into(), self.audio_bitrate.clone()]);
        args.push("-shortest".into());
        args.push(job.output.to_string_lossy().to_string());
        BuiltCommand { args }
    }

    /// Run the render tool once. Success means exit status zero; caption files are
    /// removed whatever the outcome, and a failed render's output is discarded.
    pub async fn render(&self, job: &RenderJob<'_>) -> Result<(), RenderError> {
        let captions = write_caption_files(job.overlays)?;
        let caption_paths: Vec<(OverlayPosition, &Path)> = captions.iter().map(|(p, f)| (*p, f.path())).collect();
        let filter = build_filter_chain(&caption_paths, self.font_file.as_deref());
        let built = self.build_command(job, &filter);
        debug!(args = ?built.args, "running ffmpeg");

        let result = self.run(&built).await;
        drop(captions);

        match &result {
            Ok(()) => info!(output = %job.output.display(), duration = job.duration_secs, "render finished"),
            Err(e) => {
                warn!(error = %e, stderr = e.stderr().unwrap_or(""), "render failed");
                let _ = tokio::fs::remove_file(job.output).await;
            }
        }
        result
    }

    async fn run(&self, built: &BuiltCommand) -> Result<(), RenderError> {
        let child = Command::new(&self.ffmpeg_bin)
            .args(&built.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(RenderError::Spawn)?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| RenderError::Timeout(self.timeout))??;

        if output.status.success() {
            Ok(())
        } else {
            Err(RenderError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
