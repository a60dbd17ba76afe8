//! Picks one stream out of a resolver's candidate list.
//!
//! There is no muxing stage behind this service, so a "video" download must be
//! a single file that already carries audio whenever such a file exists.

use std::cmp::Ordering;
use std::str::FromStr;
use url::Url;

use crate::media::{Candidate, MediaKind};

/// Transports that deliver a playlist of segments rather than one file.
const SEGMENTED_PROTOCOLS: &[&str] = &[
    "m3u8",
    "m3u8_native",
    "http_dash_segments",
    "http_dash_segments_generator",
    "dash",
    "f4m",
    "ism",
    "mhtml",
    "websocket_frag",
];

/// What to hand back for an audio request when no audio-only stream exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AudioFallback {
    /// Serve the best progressive file; the audio rides inside a video container.
    #[default]
    Progressive,
    /// Report that nothing qualifies.
    Strict,
}

impl FromStr for AudioFallback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "progressive" | "combined" => Ok(AudioFallback::Progressive),
            "strict" | "none" => Ok(AudioFallback::Strict),
            other => Err(format!("unknown audio fallback policy: {other}")),
        }
    }
}

/// Whether the candidate can be relayed as one plain HTTP byte stream.
pub fn is_proxyable(c: &Candidate) -> bool {
    if c.url.trim().is_empty() {
        return false;
    }
    if let Some(protocol) = c.protocol.as_deref() {
        let protocol = protocol.to_ascii_lowercase();
        // yt-dlp joins protocols of merged formats with '+'
        if protocol
            .split('+')
            .any(|p| SEGMENTED_PROTOCOLS.contains(&p))
        {
            return false;
        }
    }
    let Ok(parsed) = Url::parse(c.url.trim()) else {
        return false;
    };
    let path = parsed.path().to_ascii_lowercase();
    !(path.ends_with(".m3u8") || path.ends_with(".mpd"))
}

pub fn select(candidates: &[Candidate], kind: MediaKind, fallback: AudioFallback) -> Option<&Candidate> {
    match kind {
        MediaKind::Video => select_video(candidates),
        MediaKind::Audio => select_audio(candidates, fallback),
    }
}

/// Best progressive candidate, else best video-only candidate (which may be silent).
pub fn select_video(candidates: &[Candidate]) -> Option<&Candidate> {
    let proxyable = || candidates.iter().filter(|c| is_proxyable(c));

    best_by(proxyable().filter(|c| c.is_progressive()), cmp_video)
        .or_else(|| best_by(proxyable().filter(|c| c.is_video_only()), cmp_video))
}

pub fn select_audio(candidates: &[Candidate], fallback: AudioFallback) -> Option<&Candidate> {
    let proxyable = || candidates.iter().filter(|c| is_proxyable(c));

    let best = best_by(proxyable().filter(|c| c.is_audio_only()), cmp_audio);
    match (best, fallback) {
        (Some(c), _) => Some(c),
        (None, AudioFallback::Progressive) => {
            best_by(proxyable().filter(|c| c.is_progressive()), cmp_video)
        }
        (None, AudioFallback::Strict) => None,
    }
}

/// Explicit pick by format id; segmented transports are still refused.
pub fn select_by_id<'a>(candidates: &'a [Candidate], format_id: &str) -> Option<&'a Candidate> {
    candidates
        .iter()
        .find(|c| c.format_id == format_id && is_proxyable(c))
}

/// Maximum under `cmp`; ties keep the earliest candidate.
fn best_by<'a, I, F>(iter: I, cmp: F) -> Option<&'a Candidate>
where
    I: Iterator<Item = &'a Candidate>,
    F: Fn(&Candidate, &Candidate) -> Ordering,
{
    iter.fold(None, |best, c| match best {
        Some(b) if cmp(c, b) != Ordering::Greater => Some(b),
        _ => Some(c),
    })
}

fn cmp_video(a: &Candidate, b: &Candidate) -> Ordering {
    a.height
        .unwrap_or(0)
        .cmp(&b.height.unwrap_or(0))
        .then_with(|| num(a.tbr).total_cmp(&num(b.tbr)))
        .then_with(|| num(a.fps).total_cmp(&num(b.fps)))
        .then_with(|| a.filesize.unwrap_or(0).cmp(&b.filesize.unwrap_or(0)))
        .then_with(|| label_bonus(a).cmp(&label_bonus(b)))
}

fn cmp_audio(a: &Candidate, b: &Candidate) -> Ordering {
    num(a.abr)
        .total_cmp(&num(b.abr))
        .then_with(|| num(a.tbr).total_cmp(&num(b.tbr)))
        .then_with(|| a.filesize.unwrap_or(0).cmp(&b.filesize.unwrap_or(0)))
        .then_with(|| label_bonus(a).cmp(&label_bonus(b)))
}

fn num(v: Option<f64>) -> f64 {
    v.filter(|x| x.is_finite()).unwrap_or(0.0)
}

/// Third-party APIs only describe streams with a label; prefer HD and
/// watermark-free variants.
fn label_bonus(c: &Candidate) -> i32 {
    let Some(q) = c.quality.as_deref() else {
        return 0;
    };
    let q = q.to_ascii_lowercase();
    let mut bonus = 0;
    if q.contains("hd") {
        bonus += 3;
    }
    if q.contains("no_watermark") || q.contains("no-watermark") || q.contains("nowatermark") {
        bonus += 2;
    } else if q.contains("watermark") {
        bonus -= 1;
    }
    bonus
}
