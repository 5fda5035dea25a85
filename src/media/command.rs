use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::{Artifact, DownloadError, DownloadRequest, MediaSource};
use crate::types::job::{MediaKind, Quality};

/// Downloads and extracts media by running a `yt-dlp`-compatible program.
#[derive(Clone, Debug)]
pub struct CommandSource {
    program: String,
    url_prefix: String,
    timeout: Duration,
}

impl CommandSource {
    /// `url_prefix` is prepended to the source reference to form the URL the
    /// program is pointed at.
    pub fn new(
        program: impl Into<String>,
        url_prefix: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            url_prefix: url_prefix.into(),
            timeout,
        }
    }

    fn args(&self, request: &DownloadRequest<'_>) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_owned(),
            "--no-progress".to_owned(),
            "-f".to_owned(),
            format_selector(request.kind, request.quality).to_owned(),
            "-o".to_owned(),
            request.destination.display().to_string(),
        ];

        match request.kind {
            MediaKind::Audio => args.extend([
                "-x".to_owned(),
                "--audio-format".to_owned(),
                "mp3".to_owned(),
                "--audio-quality".to_owned(),
                audio_bitrate(request.quality).to_owned(),
            ]),
            // Merged streams otherwise keep their own container, e.g. webm,
            // and land beside the destination instead of at it.
            MediaKind::Video => args.extend([
                "--merge-output-format".to_owned(),
                "mp4".to_owned(),
            ]),
        }

        args.push(format!("{}{}", self.url_prefix, request.source_ref));
        args
    }
}

/// yt-dlp format selector for each output tier.
fn format_selector(kind: MediaKind, quality: Quality) -> &'static str {
    match (kind, quality) {
        (MediaKind::Audio, Quality::Low) => "ba[abr<=128]/best[abr<=128]",
        (MediaKind::Audio, Quality::Medium) => "ba[abr<=192]/best[abr<=192]",
        (MediaKind::Audio, Quality::High) => "ba/best",
        (MediaKind::Video, Quality::Low) => {
            "bv[height<=480]+ba/best[height<=480]"
        },
        (MediaKind::Video, Quality::Medium) => {
            "bv[height<=720]+ba/best[height<=720]"
        },
        (MediaKind::Video, Quality::High) => {
            "bv[height<=1080]+ba/best[height<=1080]"
        },
    }
}

fn audio_bitrate(quality: Quality) -> &'static str {
    match quality {
        Quality::Low => "128K",
        Quality::Medium => "192K",
        Quality::High => "320K",
    }
}

/// Maps a failed run's stderr onto the download error taxonomy.
pub fn classify_failure(stderr: &str) -> DownloadError {
    let lower = stderr.to_ascii_lowercase();
    let summary = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("downloader failed without output")
        .trim()
        .to_owned();

    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["http error 429", "too many requests"]) {
        DownloadError::RateLimited { retry_after: None }
    } else if has(&[
        "private video",
        "http error 403",
        "sign in to confirm",
        "members-only",
    ]) {
        DownloadError::AccessDenied(summary)
    } else if has(&[
        "video unavailable",
        "http error 404",
        "has been removed",
        "does not exist",
        "unsupported url",
    ]) {
        DownloadError::NotFound(summary)
    } else {
        DownloadError::Unavailable(summary)
    }
}

#[async_trait]
impl MediaSource for CommandSource {
    fn name(&self) -> &str {
        &self.program
    }

    #[instrument(skip_all, fields(program = %self.program, source = request.source_ref))]
    async fn download(
        &self,
        request: &DownloadRequest<'_>,
    ) -> Result<Artifact, DownloadError> {
        let args = self.args(request);
        debug!(?args, "running downloader");

        let run = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, run).await {
            Err(_) => return Err(DownloadError::Timeout),
            Ok(Err(error)) => {
                return Err(DownloadError::Unavailable(format!(
                    "failed to run {}: {error}",
                    self.program
                )))
            },
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(
                &output.stderr,
            )));
        }

        if !tokio::fs::try_exists(request.destination)
            .await
            .unwrap_or(false)
        {
            return Err(DownloadError::Unavailable(
                "downloader exited cleanly but produced no file".into(),
            ));
        }

        Ok(Artifact {
            path: request.destination.to_owned(),
            kind: request.kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn test_classify_failure() {
        assert_eq!(
            classify_failure("ERROR: unable to download: HTTP Error 429: Too Many Requests\n"),
            DownloadError::RateLimited { retry_after: None }
        );
        assert_eq!(
            classify_failure("WARNING: x\nERROR: [youtube] abc: Private video\n"),
            DownloadError::AccessDenied(
                "ERROR: [youtube] abc: Private video".into()
            )
        );
        assert_eq!(
            classify_failure("ERROR: [youtube] abc: Video unavailable\n\n"),
            DownloadError::NotFound(
                "ERROR: [youtube] abc: Video unavailable".into()
            )
        );
        assert_eq!(
            classify_failure("ERROR: ffmpeg not found\n"),
            DownloadError::Unavailable("ERROR: ffmpeg not found".into())
        );
        assert_eq!(
            classify_failure(""),
            DownloadError::Unavailable(
                "downloader failed without output".into()
            )
        );
    }

    #[test]
    fn test_args() {
        let source = CommandSource::new(
            "yt-dlp",
            "https://www.youtube.com/watch?v=",
            Duration::from_secs(60),
        );

        let audio = source.args(&DownloadRequest {
            source_ref: "abc",
            kind: MediaKind::Audio,
            quality: Quality::Medium,
            destination: Path::new("/tmp/j/job.mp3"),
        });
        assert_eq!(
            audio,
            [
                "--no-playlist",
                "--no-progress",
                "-f",
                "ba[abr<=192]/best[abr<=192]",
                "-o",
                "/tmp/j/job.mp3",
                "-x",
                "--audio-format",
                "mp3",
                "--audio-quality",
                "192K",
                "https://www.youtube.com/watch?v=abc",
            ]
        );
        assert!(!audio.contains(&"--merge-output-format".to_owned()));

        let video = source.args(&DownloadRequest {
            source_ref: "abc",
            kind: MediaKind::Video,
            quality: Quality::Low,
            destination: Path::new("/tmp/j/job.mp4"),
        });
        assert_eq!(
            video,
            [
                "--no-playlist",
                "--no-progress",
                "-f",
                "bv[height<=480]+ba/best[height<=480]",
                "-o",
                "/tmp/j/job.mp4",
                "--merge-output-format",
                "mp4",
                "https://www.youtube.com/watch?v=abc",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_transient() {
        let source = CommandSource::new(
            "/nonexistent/convoy-downloader",
            "",
            Duration::from_secs(5),
        );

        let err = source
            .download(&DownloadRequest {
                source_ref: "abc",
                kind: MediaKind::Audio,
                quality: Quality::Low,
                destination: Path::new("/tmp/never.mp3"),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Unavailable(_)));
    }
}
