//! Source-video acquisition through an external downloader (`yt-dlp`).

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use slidedeck_common::config::FetchConfig;
use tokio::process::Command;
use tracing::{debug, info, warn};

const FALLBACK_TITLE: &str = "video";
const RESERVED_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

static VIDEO_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"shorts/(\w+)",
        r"youtu\.be/([\w\-_]+)(\?.*)?",
        r"v=([\w\-_]+)",
        r"live/(\w+)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("download failed ({status}): {stderr}")]
    Failed { status: String, stderr: String },
    #[error("downloader reported success but {0} is missing")]
    MissingOutput(String),
}

/// Video id from the common watch, short-link, shorts and live URL shapes.
pub fn video_id(url: &str) -> Option<String> {
    VIDEO_ID_PATTERNS
        .iter()
        .find_map(|re| re.captures(url))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Replaces filesystem-reserved characters and trims surrounding dots.
pub fn sanitize_title(title: &str) -> String {
    let replaced: String = title
        .trim()
        .chars()
        .map(|c| if RESERVED_CHARS.contains(&c) { '-' } else { c })
        .collect();
    let trimmed = replaced.trim_matches('.');
    if trimmed.trim().is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Title as used for file names: sanitized, spaces replaced by underscores.
pub fn file_stem(title: &str) -> String {
    sanitize_title(title).replace(' ', "_")
}

fn downloader(config: &FetchConfig, cookies: Option<&Path>) -> Command {
    let mut cmd = Command::new(&config.downloader);
    cmd.args(["--quiet", "--no-warnings", "--no-playlist"]);
    if let Some(path) = cookies {
        cmd.arg("--cookies").arg(path);
    }
    cmd.stdin(std::process::Stdio::null()).kill_on_drop(true);
    cmd
}

/// Looks up the video title without downloading. Falls back to `"video"`.
pub async fn video_title(config: &FetchConfig, url: &str, cookies: Option<&Path>) -> String {
    let output = downloader(config, cookies)
        .args(["--skip-download", "--ignore-errors", "--print", "title", "--"])
        .arg(url)
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => {
            let stdout = String::from_utf8_lossy(&out.stdout);
            match stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
                Some(title) => sanitize_title(title),
                None => FALLBACK_TITLE.to_string(),
            }
        }
        Ok(out) => {
            warn!(status = %out.status, "title lookup failed, using fallback");
            FALLBACK_TITLE.to_string()
        }
        Err(e) => {
            warn!(error = %e, downloader = config.downloader, "failed to run title lookup");
            FALLBACK_TITLE.to_string()
        }
    }
}

/// Downloads `url` to exactly `dest`.
pub async fn download(
    config: &FetchConfig,
    url: &str,
    dest: &Path,
    cookies: Option<&Path>,
) -> Result<(), FetchError> {
    debug!(url, dest = %dest.display(), "starting download");
    let output = downloader(config, cookies)
        .args(["--force-overwrites", "-f", &config.format, "-o"])
        .arg(dest)
        .arg("--")
        .arg(url)
        .output()
        .await
        .map_err(|source| FetchError::Spawn {
            program: config.downloader.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(FetchError::Failed {
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    if !tokio::fs::try_exists(dest).await.unwrap_or(false) {
        return Err(FetchError::MissingOutput(dest.display().to_string()));
    }
    info!(url, dest = %dest.display(), "download complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_id_from_supported_shapes() {
        let cases = [
            ("https://www.youtube.com/watch?v=dQw4w9WgXcQ", "dQw4w9WgXcQ"),
            ("https://youtu.be/dQw4w9WgXcQ?t=42", "dQw4w9WgXcQ"),
            ("https://www.youtube.com/shorts/abc123XYZ", "abc123XYZ"),
            ("https://www.youtube.com/live/stream_01", "stream_01"),
            ("https://www.youtube.com/watch?list=PL1&v=a-b_c", "a-b_c"),
        ];
        for (url, id) in cases {
            assert_eq!(video_id(url).as_deref(), Some(id), "url {url}");
        }
    }

    #[test]
    fn unrecognized_url_has_no_id() {
        assert_eq!(video_id("https://example.com/watch"), None);
        assert_eq!(video_id(""), None);
    }

    #[test]
    fn title_reserved_chars_replaced() {
        assert_eq!(sanitize_title(r#"a/b\c:d*e?f"g<h>i|j"#), "a-b-c-d-e-f-g-h-i-j");
    }

    #[test]
    fn title_dots_and_whitespace_trimmed() {
        assert_eq!(sanitize_title("  ..My Talk..  "), "My Talk");
        assert_eq!(sanitize_title("..."), "video");
        assert_eq!(sanitize_title(""), "video");
    }

    #[test]
    fn file_stem_replaces_spaces() {
        assert_eq!(file_stem("Rust in 100 Seconds"), "Rust_in_100_Seconds");
    }

    #[tokio::test]
    async fn title_lookup_falls_back_when_downloader_missing() {
        let config = FetchConfig {
            downloader: "/nonexistent/yt-dlp".into(),
            ..FetchConfig::default()
        };
        assert_eq!(video_title(&config, "https://youtu.be/x", None).await, "video");
    }

    #[tokio::test]
    async fn download_reports_missing_downloader() {
        let config = FetchConfig {
            downloader: "/nonexistent/yt-dlp".into(),
            ..FetchConfig::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let err = download(&config, "https://youtu.be/x", &dir.path().join("v.mp4"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Spawn { .. }));
    }
}
