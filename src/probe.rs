//! Media duration lookup through ffprobe.

use crate::error::ProbeError;
use std::{path::Path, process::Stdio, time::Duration};
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct DurationProbe {
    ffprobe_bin: String,
    timeout: Duration,
    fallback_secs: f64,
}

impl DurationProbe {
    pub fn new(ffprobe_bin: impl Into<String>, timeout: Duration, fallback_secs: f64) -> Self {
        Self { ffprobe_bin: ffprobe_bin.into(), timeout, fallback_secs }
    }

    /// Duration of `path` in seconds, or the fallback when it cannot be determined.
    pub async fn duration(&self, path: &Path) -> f64 {
        match self.try_duration(path).await {
            Ok(secs) => {
                debug!(path = %path.display(), secs, "probed duration");
                secs
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, fallback = self.fallback_secs, "duration probe failed");
                self.fallback_secs
            }
        }
    }

    pub async fn try_duration(&self, path: &Path) -> Result<f64, ProbeError> {
        let child = Command::new(&self.ffprobe_bin)
            .args(["-v", "error", "-show_entries", "format=duration", "-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ProbeError::Spawn)?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))?
            .map_err(ProbeError::Spawn)?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse ffprobe's bare `format=duration` output.
pub fn parse_duration(stdout: &str) -> Result<f64, ProbeError> {
    let s = stdout.trim();
    s.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ProbeError::Parse(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// A stand-in tool that outlives any short timeout.
    fn sleeping_tool(dir: &Path) -> String {
        let path = dir.join("slow-ffprobe");
        std::fs::write(&path, "#!/bin/sh\nexec sleep 5\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn parses_plain_seconds() {
        assert_eq!(parse_duration("45.120000\n").unwrap(), 45.12);
        assert_eq!(parse_duration("0").unwrap(), 0.0);
    }

    #[test]
    fn rejects_non_numeric_output() {
        assert!(matches!(parse_duration("N/A"), Err(ProbeError::Parse(_))));
        assert!(matches!(parse_duration(""), Err(ProbeError::Parse(_))));
        assert!(parse_duration("inf").is_err());
    }

    #[tokio::test]
    async fn missing_tool_falls_back() {
        let probe = DurationProbe::new("definitely-not-ffprobe-here", Duration::from_secs(2), 30.0);
        assert!(matches!(probe.try_duration(Path::new("/nonexistent.mp4")).await, Err(ProbeError::Spawn(_))));
        assert_eq!(probe.duration(Path::new("/nonexistent.mp4")).await, 30.0);
    }

    #[tokio::test]
    async fn failing_tool_falls_back() {
        let probe = DurationProbe::new("false", Duration::from_secs(2), 25.0);
        assert_eq!(probe.duration(Path::new("/nonexistent.mp4")).await, 25.0);
    }

    #[tokio::test]
    async fn hung_tool_times_out_and_falls_back() {
        let dir = TempDir::new().unwrap();
        let probe = DurationProbe::new(sleeping_tool(dir.path()), Duration::from_millis(200), 30.0);

        let started = std::time::Instant::now();
        let err = probe.try_duration(Path::new("/nonexistent.mp4")).await.unwrap_err();
        assert!(matches!(err, ProbeError::Timeout(t) if t == Duration::from_millis(200)));
        assert_eq!(probe.duration(Path::new("/nonexistent.mp4")).await, 30.0);
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
