//! Service configuration loaded from the environment.

use std::{path::PathBuf, time::Duration};

/// Direct-download endpoint of the file-sharing service; `{id}` is replaced by the file id.
pub const DEFAULT_SOURCE_URL_TEMPLATE: &str = "https://drive.google.com/uc?export=download&id={id}";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Downloaded sources, removed once a job finishes
    pub upload_dir: PathBuf,
    /// Rendered reels, kept for retrieval through `/outputs`
    pub output_dir: PathBuf,
    /// Job registry snapshot
    pub jobs_file: PathBuf,
    /// Base for URLs handed to clients; derived from the Host header when unset
    pub public_base_url: Option<String>,
    pub source_url_template: String,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    pub font_file: Option<PathBuf>,
    pub fetch_timeout: Duration,
    pub probe_timeout: Duration,
    pub render_timeout: Duration,
    /// Ceiling applied when a request does not carry `maxDuration`
    pub max_duration_secs: f64,
    /// Used when probing fails or the effective duration is not positive
    pub fallback_duration_secs: f64,
    pub job_retention: Duration,
    pub sweep_interval: Duration,
    pub ffmpeg_preset: String,
    pub ffmpeg_crf: String,
    pub ffmpeg_audio_bitrate: String,
    pub cors_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 10000,
            upload_dir: PathBuf::from("/tmp/uploads"),
            output_dir: PathBuf::from("/tmp/outputs"),
            jobs_file: PathBuf::from("/tmp/jobs.json"),
            public_base_url: None,
            source_url_template: DEFAULT_SOURCE_URL_TEMPLATE.to_string(),
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            font_file: None,
            fetch_timeout: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(30),
            render_timeout: Duration::from_secs(120),
            max_duration_secs: 60.0,
            fallback_duration_secs: 30.0,
            job_retention: Duration::from_secs(2 * 60 * 60),
            sweep_interval: Duration::from_secs(600),
            ffmpeg_preset: "ultrafast".to_string(),
            ffmpeg_crf: "28".to_string(),
            ffmpeg_audio_bitrate: "128k".to_string(),
            cors_origins: vec!["*".to_string()],
        }
    }
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            host: env_string("HOST").unwrap_or(d.host),
            port: env_parse("PORT").unwrap_or(d.port),
            upload_dir: env_string("UPLOAD_DIR").map(PathBuf::from).unwrap_or(d.upload_dir),
            output_dir: env_string("OUTPUT_DIR").map(PathBuf::from).unwrap_or(d.output_dir),
            jobs_file: env_string("JOBS_FILE").map(PathBuf::from).unwrap_or(d.jobs_file),
            public_base_url: env_string("PUBLIC_BASE_URL").map(|s| s.trim_end_matches('/').to_string()),
            source_url_template: env_string("SOURCE_URL_TEMPLATE").unwrap_or(d.source_url_template),
            ffmpeg_bin: env_string("FFMPEG_BIN").unwrap_or(d.ffmpeg_bin),
            ffprobe_bin: env_string("FFPROBE_BIN").unwrap_or(d.ffprobe_bin),
            font_file: env_string("FONT_FILE").map(PathBuf::from),
            fetch_timeout: env_secs("FETCH_TIMEOUT_SECS").unwrap_or(d.fetch_timeout),
            probe_timeout: env_secs("PROBE_TIMEOUT_SECS").unwrap_or(d.probe_timeout),
            render_timeout: env_secs("RENDER_TIMEOUT_SECS").unwrap_or(d.render_timeout),
            max_duration_secs: env_parse::<f64>("MAX_DURATION_SECS")
                .filter(|v| v.is_finite() && *v > 0.0)
                .unwrap_or(d.max_duration_secs),
            fallback_duration_secs: env_parse::<f64>("FALLBACK_DURATION_SECS")
                .filter(|v| v.is_finite() && *v > 0.0)
                .unwrap_or(d.fallback_duration_secs),
            job_retention: env_secs("JOB_RETENTION_SECS").unwrap_or(d.job_retention),
            sweep_interval: env_secs("SWEEP_INTERVAL_SECS")
                .filter(|i| !i.is_zero())
                .unwrap_or(d.sweep_interval),
            ffmpeg_preset: env_string("FFMPEG_PRESET").unwrap_or(d.ffmpeg_preset),
            ffmpeg_crf: env_string("FFMPEG_CRF").unwrap_or(d.ffmpeg_crf),
            ffmpeg_audio_bitrate: env_string("FFMPEG_AUDIO_BITRATE").unwrap_or(d.ffmpeg_audio_bitrate),
            cors_origins: env_string("CORS_ORIGINS")
                .map(|s| s.split(',').map(|o| o.trim().to_string()).filter(|o| !o.is_empty()).collect())
                .unwrap_or(d.cors_origins),
        }
    }

    /// Create the upload and output directories.
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        tokio::fs::create_dir_all(&self.output_dir).await?;
        if let Some(parent) = self.jobs_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|s| s.trim().parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_values() {
        let c = Config::default();
        assert_eq!(c.port, 10000);
        assert_eq!(c.job_retention, Duration::from_secs(7200));
        assert_eq!(c.max_duration_secs, 60.0);
        assert_eq!(c.fallback_duration_secs, 30.0);
        assert!(c.source_url_template.contains("{id}"));
    }
}
