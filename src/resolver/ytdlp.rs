use async_trait::async_trait;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error};

use super::{short, ResolveError, Resolver};
use crate::config::{Settings, DEFAULT_ACCEPT_LANGUAGE};
use crate::media::{duration_string, Candidate, ResolvedMedia, Source};
use crate::platform::Platform;

const NAME: &str = "yt-dlp";

const AUDIO_EXTS: &[&str] = &["mp3", "m4a", "aac", "opus", "ogg", "oga", "wav", "flac", "weba"];

/// Universal fallback: yt-dlp embedded through PyO3.
pub struct YtDlpResolver {
    timeout: u64,
    options: ExtractOptions,
}

#[derive(Clone, Debug)]
struct ExtractOptions {
    socket_timeout: u64,
    user_agent: String,
    cookies_path: Option<PathBuf>,
}

impl YtDlpResolver {
    pub fn new(settings: &Settings) -> Self {
        Self {
            timeout: settings.ytdlp_timeout,
            options: ExtractOptions {
                socket_timeout: settings.ytdlp_socket_timeout,
                user_agent: settings.user_agent.clone(),
                cookies_path: settings.cookies_path.clone(),
            },
        }
    }
}

#[async_trait]
impl Resolver for YtDlpResolver {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn resolve(&self, url: &str) -> Result<ResolvedMedia, ResolveError> {
        debug!("Extracting {} with yt-dlp", short(url));
        let url_clone = url.to_string();
        let options = self.options.clone();

        let result = tokio::time::timeout(
            Duration::from_secs(self.timeout),
            tokio::task::spawn_blocking(move || extract_with_ytdlp(&url_clone, &options)),
        )
        .await;

        let json_str = match result {
            Ok(Ok(inner)) => inner?,
            Ok(Err(e)) => {
                error!("yt-dlp task join error: {e}");
                return Err(ResolveError::Extraction(format!("task join error: {e}")));
            }
            Err(_) => {
                return Err(ResolveError::Timeout {
                    resolver: NAME,
                    secs: self.timeout,
                })
            }
        };

        let info: Value = serde_json::from_str(&json_str).map_err(|e| ResolveError::Malformed {
            resolver: NAME,
            detail: e.to_string(),
        })?;

        parse_info(url, &info)
    }
}

/// Call `yt_dlp.YoutubeDL(opts).extract_info(url, download=False)` and return
/// the info dict serialized with `json.dumps`. Blocking; run it on a blocking
/// thread.
fn extract_with_ytdlp(url: &str, options: &ExtractOptions) -> Result<String, ResolveError> {
    let py_err = |what: &str, e: PyErr| ResolveError::Extraction(format!("{what}: {e}"));

    Python::with_gil(|py| {
        let yt_dlp = py
            .import("yt_dlp")
            .map_err(|e| py_err("Failed to import yt_dlp", e))?;

        let headers = PyDict::new(py);
        headers
            .set_item("User-Agent", options.user_agent.as_str())
            .and_then(|_| headers.set_item("Accept-Language", DEFAULT_ACCEPT_LANGUAGE))
            .map_err(|e| py_err("Failed to build headers", e))?;

        // Nothing is ever written to disk: download=False and no output template.
        let opts = PyDict::new(py);
        let set_opts = || -> PyResult<()> {
            opts.set_item("quiet", true)?;
            opts.set_item("no_warnings", true)?;
            opts.set_item("noplaylist", true)?;
            opts.set_item("nocheckcertificate", true)?;
            opts.set_item("geo_bypass", true)?;
            opts.set_item("socket_timeout", options.socket_timeout)?;
            opts.set_item("http_headers", &headers)?;
            if let Some(cp) = options.cookies_path.as_ref().filter(|p| p.exists()) {
                opts.set_item("cookiefile", cp.to_string_lossy().to_string())?;
            }
            Ok(())
        };
        set_opts().map_err(|e| py_err("Failed to build options", e))?;

        let ydl = yt_dlp
            .getattr("YoutubeDL")
            .and_then(|class| class.call1((opts,)))
            .map_err(|e| py_err("Failed to create YoutubeDL", e))?;

        let kwargs = PyDict::new(py);
        kwargs
            .set_item("download", false)
            .map_err(|e| py_err("Failed to build kwargs", e))?;
        let info = ydl.call_method("extract_info", (url,), Some(&kwargs));

        // Close ydl to release file descriptors
        let _ = ydl.call_method0("close");

        let info = info.map_err(|e| classify_error(&e.to_string()))?;

        let json_str = py
            .import("json")
            .and_then(|json| json.call_method1("dumps", (info,)))
            .and_then(|dumped| dumped.extract::<String>())
            .map_err(|e| py_err("Failed to serialize", e))?;

        Ok(json_str)
    })
}

/// Sort a yt-dlp error message into the classes the API reports differently.
fn classify_error(err_str: &str) -> ResolveError {
    let lower = err_str.to_lowercase();
    if lower.contains("unsupported url") {
        ResolveError::Unsupported(err_str.to_string())
    } else if lower.contains("login")
        || lower.contains("sign in")
        || lower.contains("authentication")
        || lower.contains("private")
    {
        ResolveError::AuthRequired(err_str.to_string())
    } else if err_str.contains("403") || lower.contains("forbidden") {
        ResolveError::Forbidden(err_str.to_string())
    } else if lower.contains("not found")
        || lower.contains("404")
        || lower.contains("unavailable")
        || lower.contains("unable to download")
    {
        ResolveError::NotFound(err_str.to_string())
    } else {
        ResolveError::Extraction(err_str.to_string())
    }
}

fn parse_info(url: &str, info: &Value) -> Result<ResolvedMedia, ResolveError> {
    // Some extractors return a playlist even with noplaylist; use the first entry.
    let info = if info["_type"].as_str() == Some("playlist") {
        info["entries"]
            .as_array()
            .and_then(|entries| entries.iter().find(|e| e.is_object()))
            .ok_or(ResolveError::Empty { resolver: NAME })?
    } else {
        info
    };

    let mut candidates: Vec<Candidate> = info["formats"]
        .as_array()
        .map(|formats| formats.iter().filter_map(format_to_candidate).collect())
        .unwrap_or_default();

    if candidates.is_empty() {
        if let Some(direct) = format_to_candidate(info) {
            candidates.push(direct);
        }
    }

    if candidates.is_empty() {
        return Err(ResolveError::Empty { resolver: NAME });
    }

    let thumbnail = str_field(info, "thumbnail")
        .or_else(|| {
            info["thumbnails"]
                .as_array()
                .and_then(|t| t.iter().rev().find_map(|t| str_field(t, "url")))
        })
        .unwrap_or_default();

    Ok(ResolvedMedia {
        title: str_field(info, "title")
            .or_else(|| str_field(info, "fulltitle"))
            .unwrap_or_else(|| "Video".into()),
        thumbnail,
        duration: duration_string(info["duration"].as_f64()),
        platform: Platform::detect(url),
        source: Source::YtDlp,
        webpage_url: str_field(info, "webpage_url")
            .or_else(|| str_field(info, "original_url"))
            .unwrap_or_else(|| url.to_string()),
        candidates,
    })
}

fn format_to_candidate(fmt: &Value) -> Option<Candidate> {
    let url = str_field(fmt, "url")?;
    let ext = str_field(fmt, "ext");
    let vcodec = codec(fmt, "vcodec");
    let acodec = codec(fmt, "acodec");
    let height = fmt["height"].as_u64().and_then(|h| u32::try_from(h).ok());

    let (has_video, has_audio) = match (vcodec, acodec) {
        (Some(v), Some(a)) => (v, a),
        (Some(v), None) => (v, !v),
        (None, Some(a)) => (height.is_some(), a),
        // Unknown codecs usually mean a single direct file; guess from the container.
        (None, None) => {
            let audio_container = ext
                .as_deref()
                .is_some_and(|e| AUDIO_EXTS.contains(&e))
                || fmt["resolution"].as_str() == Some("audio only");
            (!audio_container, true)
        }
    };

    let filesize = fmt["filesize"]
        .as_f64()
        .or_else(|| fmt["filesize_approx"].as_f64())
        .filter(|s| *s > 0.0)
        .map(|s| s as u64);

    let http_headers: HashMap<String, String> = fmt["http_headers"]
        .as_object()
        .map(|headers| {
            headers
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Some(Candidate {
        format_id: str_field(fmt, "format_id").unwrap_or_else(|| "direct".into()),
        url,
        ext,
        has_video,
        has_audio,
        height,
        tbr: fmt["tbr"].as_f64(),
        abr: fmt["abr"].as_f64(),
        fps: fmt["fps"].as_f64(),
        filesize,
        protocol: str_field(fmt, "protocol"),
        quality: str_field(fmt, "format_note"),
        http_headers,
    })
}

/// `Some(true)` for a real codec, `Some(false)` for "none", `None` when unknown.
fn codec(fmt: &Value, key: &str) -> Option<bool> {
    fmt[key]
        .as_str()
        .map(|c| !c.is_empty() && !c.eq_ignore_ascii_case("none"))
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v[key]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}
