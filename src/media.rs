use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::platform::Platform;

/// What the caller wants out of a proxy request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Video,
    Audio,
}

impl MediaKind {
    pub fn default_ext(self) -> &'static str {
        match self {
            MediaKind::Video => "mp4",
            MediaKind::Audio => "mp3",
        }
    }
}

/// Which data source produced a [`ResolvedMedia`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    TikWm,
    RapidApi,
    YtDlp,
}

/// One stream option reported by a resolver.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Candidate {
    pub format_id: String,
    pub url: String,
    pub ext: Option<String>,
    pub has_video: bool,
    pub has_audio: bool,
    pub height: Option<u32>,
    /// Total bitrate, kbps.
    pub tbr: Option<f64>,
    /// Audio bitrate, kbps.
    pub abr: Option<f64>,
    pub fps: Option<f64>,
    pub filesize: Option<u64>,
    pub protocol: Option<String>,
    /// Free-form label from third-party APIs ("hd_no_watermark", "720p", ...).
    pub quality: Option<String>,
    pub http_headers: HashMap<String, String>,
}

impl Candidate {
    pub fn is_progressive(&self) -> bool {
        self.has_video && self.has_audio
    }

    pub fn is_video_only(&self) -> bool {
        self.has_video && !self.has_audio
    }

    pub fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }

    pub fn kind_label(&self) -> &'static str {
        match (self.has_video, self.has_audio) {
            (true, true) => "progressive",
            (true, false) => "video",
            (false, true) => "audio",
            (false, false) => "unknown",
        }
    }

    /// Extension to name the download with, falling back to the kind's default.
    pub fn ext_or(&self, kind: MediaKind) -> String {
        self.ext
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .unwrap_or_else(|| kind.default_ext().to_string())
    }
}

/// Result of resolving one page URL.
#[derive(Clone, Debug)]
pub struct ResolvedMedia {
    pub title: String,
    pub thumbnail: String,
    pub duration: String,
    pub platform: Platform,
    pub source: Source,
    pub webpage_url: String,
    pub candidates: Vec<Candidate>,
}

/// Public view of a candidate for the info endpoint.
#[derive(Serialize, Debug)]
pub struct FormatSummary {
    pub format_id: String,
    pub ext: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
}

impl From<&Candidate> for FormatSummary {
    fn from(c: &Candidate) -> Self {
        let kind = if c.is_audio_only() {
            MediaKind::Audio
        } else {
            MediaKind::Video
        };
        Self {
            format_id: c.format_id.clone(),
            ext: c.ext_or(kind),
            kind: c.kind_label(),
            height: c.height,
            filesize: c.filesize,
            quality: c.quality.clone(),
        }
    }
}

/// Render a duration in seconds the way the frontend expects: whole seconds
/// without a fractional part, empty when unknown.
pub fn duration_string(seconds: Option<f64>) -> String {
    match seconds {
        Some(s) if s > 0.0 && s.fract() == 0.0 => format!("{}", s as u64),
        Some(s) if s > 0.0 => format!("{s}"),
        _ => String::new(),
    }
}
