//! Background render pipeline: fetch both sources, probe, render, clean up.

use crate::config::Config;
use crate::error::{FetchError, PipelineError, RegistryError};
use crate::fetch::MediaFetcher;
use crate::ffmpeg::{Compositor, RenderJob};
use crate::jobs::{new_job_id, Job, JobRegistry, JobResult, JobState, JobStatus};
use crate::probe::DurationProbe;
use crate::types::RenderRequest;
use std::{path::Path, sync::Arc};
use tracing::{error, info, warn, Instrument};

const ID_ATTEMPTS: usize = 4;

/// Length of the reel: the shortest of both sources and the ceiling, to the
/// millisecond, or `fallback` when that is not a positive number.
pub fn effective_duration(video_secs: f64, audio_secs: f64, max_secs: f64, fallback: f64) -> f64 {
    // The render tool receives millisecond precision; judge the value it will see.
    let d = (video_secs.min(audio_secs).min(max_secs) * 1000.0).round() / 1000.0;
    if d.is_finite() && d > 0.0 { d } else { fallback }
}

pub fn output_file_name(job_id: &str) -> String {
    format!("reel_{job_id}.mp4")
}

#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<JobRegistry>,
    fetcher: MediaFetcher,
    probe: DurationProbe,
    compositor: Compositor,
    config: Arc<Config>,
}

impl Orchestrator {
    pub fn new(config: Arc<Config>, registry: Arc<JobRegistry>) -> Result<Self, FetchError> {
        Ok(Self {
            fetcher: MediaFetcher::new(config.source_url_template.clone(), config.fetch_timeout)?,
            probe: DurationProbe::new(config.ffprobe_bin.clone(), config.probe_timeout, config.fallback_duration_secs),
            compositor: Compositor::from_config(&config),
            registry,
            config,
        })
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Register a new job and start its pipeline in the background. Returns as soon
    /// as the job record exists; `public_base` prefixes the output URL.
    pub async fn submit(&self, request: RenderRequest, public_base: String) -> Result<String, RegistryError> {
        let job_id = self.allocate().await?;
        info!(job_id = %job_id, video_id = %request.video_id, music_id = %request.music_id, "job accepted");

        let this = self.clone();
        let id = job_id.clone();
        let span = tracing::info_span!("job", job_id = %job_id);
        tokio::spawn(async move { this.run(id, request, public_base).await }.instrument(span));
        Ok(job_id)
    }

    async fn allocate(&self) -> Result<String, RegistryError> {
        let mut attempt = 1;
        loop {
            let job = Job::new(new_job_id());
            let id = job.job_id.clone();
            match self.registry.create(job).await {
                Ok(()) => return Ok(id),
                Err(RegistryError::Duplicate(id)) if attempt < ID_ATTEMPTS => {
                    warn!(job_id = %id, "job id collision, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run(self, job_id: String, request: RenderRequest, public_base: String) {
        let video = self.config.upload_dir.join(format!("video_{job_id}.mp4"));
        let music = self.config.upload_dir.join(format!("music_{job_id}.mp3"));

        let outcome = self.execute(&job_id, &request, &video, &music, &public_base).await;
        remove_sources(&[video.as_path(), music.as_path()]).await;

        let state = match outcome {
            Ok(result) => {
                info!(url = %result.video_url, duration = result.duration, "job completed");
                JobState::completed(result)
            }
            Err(e) => {
                error!(error = %e, "job failed");
                JobState::failed(e.client_message())
            }
        };
        self.set_state(&job_id, state).await;
    }

    async fn execute(
        &self,
        job_id: &str,
        request: &RenderRequest,
        video: &Path,
        music: &Path,
        public_base: &str,
    ) -> Result<JobResult, PipelineError> {
        self.set_state(job_id, JobState::stage(JobStatus::Downloading, 20, "Downloading media")).await;
        self.fetcher
            .fetch(&request.video_id, video)
            .await
            .map_err(|source| PipelineError::Fetch { asset: "video", source })?;
        self.fetcher
            .fetch(&request.music_id, music)
            .await
            .map_err(|source| PipelineError::Fetch { asset: "music", source })?;

        self.set_state(job_id, JobState::stage(JobStatus::Rendering, 50, "Rendering video")).await;
        let video_secs = self.probe.duration(video).await;
        let music_secs = self.probe.duration(music).await;
        let duration = effective_duration(video_secs, music_secs, request.max_duration, self.config.fallback_duration_secs);
        info!(video_secs, music_secs, duration, "render duration selected");

        let file_name = output_file_name(job_id);
        let output = self.config.output_dir.join(&file_name);
        self.compositor
            .render(&RenderJob {
                video,
                audio: music,
                output: &output,
                overlays: &request.overlays,
                duration_secs: duration,
            })
            .await?;

        Ok(JobResult {
            video_url: format!("{public_base}/outputs/{file_name}"),
            duration,
            audio_replaced: true,
        })
    }

    async fn set_state(&self, job_id: &str, state: JobState) {
        if let Err(e) = self.registry.update(job_id, state).await {
            warn!(job_id, error = %e, "job state not recorded");
        }
    }
}

async fn remove_sources(paths: &[&Path]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove source file"),
        }
    }
}
