use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::header::{
    ACCEPT_LANGUAGE, ACCEPT_RANGES, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH,
    CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE, REFERER, USER_AGENT,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::{error, info};

use crate::config::DEFAULT_ACCEPT_LANGUAGE;
use crate::error::ApiError;
use crate::media::{Candidate, MediaKind};
use crate::platform::checked_url;
use crate::resolver::short;
use crate::selector;
use crate::AppState;

const MAX_FILENAME_CHARS: usize = 150;

#[derive(Deserialize)]
pub struct ProxyQuery {
    pub url: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: MediaKind,
    pub filename: Option<String>,
    pub format_id: Option<String>,
    #[serde(default)]
    pub stream: StreamMode,
}

/// `stream=1` relays the bytes, `stream=0` redirects to the upstream URL.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum StreamMode {
    #[serde(rename = "0")]
    Redirect,
    #[default]
    #[serde(rename = "1")]
    Relay,
}

/// Content type mapping
fn content_type_for(ext: &str) -> &'static str {
    match ext {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "3gp" => "video/3gpp",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "opus" | "ogg" | "oga" => "audio/ogg",
        "weba" => "audio/webm",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Make a title safe to use as a file name. Idempotent.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_bad = false;
    let mut in_space = false;

    for c in name.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
            in_bad = false;
        } else if c.is_control() || matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
            if !in_bad {
                out.push('_');
            }
            in_bad = true;
            in_space = false;
        } else {
            out.push(c);
            in_bad = false;
            in_space = false;
        }
    }

    let trimmed: String = out
        .trim_matches(|c| c == ' ' || c == '.')
        .chars()
        .take(MAX_FILENAME_CHARS)
        .collect();
    let trimmed = trimmed.trim_matches(|c| c == ' ' || c == '.');

    if trimmed.is_empty() {
        "download".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<sanitized title>.<ext>`, without doubling an extension the title already has.
pub fn download_filename(title: &str, ext: &str) -> String {
    let stem = sanitize_filename(title);
    let ext = ext.trim_start_matches('.');
    if ext.is_empty() || stem.to_lowercase().ends_with(&format!(".{}", ext.to_lowercase())) {
        stem
    } else {
        format!("{stem}.{ext}")
    }
}

/// `attachment; filename="..."`, plus an RFC 5987 `filename*` when the name
/// is not plain ASCII.
fn content_disposition(filename: &str) -> HeaderValue {
    let ascii: String = filename
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '_' })
        .collect();
    let value = if ascii == filename {
        format!("attachment; filename=\"{filename}\"")
    } else {
        format!(
            "attachment; filename=\"{ascii}\"; filename*=UTF-8''{}",
            urlencoding::encode(filename)
        )
    };
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// GET /proxy — resolve, pick a stream, then redirect to it or relay it.
pub async fn proxy_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<ProxyQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::invalid_query(e.body_text()))?;
    let url = checked_url(query.url.as_deref())?;

    let media = state.resolvers.resolve(&url).await?;

    let chosen = match query.format_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => selector::select_by_id(&media.candidates, id)
            .ok_or_else(|| ApiError::format_not_found(id))?,
        None => selector::select(&media.candidates, query.kind, state.settings.audio_fallback)
            .ok_or_else(|| ApiError::no_direct_url(media.platform))?,
    };

    let ext = chosen.ext_or(query.kind);
    let title = query
        .filename
        .as_deref()
        .filter(|f| !f.trim().is_empty())
        .unwrap_or(&media.title);
    let filename = download_filename(title, &ext);

    info!(
        "Proxy {} -> format {} ({}, {:?})",
        short(&url),
        chosen.format_id,
        chosen.kind_label(),
        query.stream
    );

    if query.stream == StreamMode::Redirect {
        return redirect_to(&chosen.url);
    }

    relay(
        &state.http_client,
        chosen,
        &state.settings.user_agent,
        headers.get(RANGE),
        content_type_for(&ext),
        &filename,
    )
    .await
}

fn redirect_to(url: &str) -> Result<Response, ApiError> {
    let location = HeaderValue::from_str(url)
        .map_err(|_| ApiError::upstream("Upstream URL is not a valid redirect target"))?;
    Ok((StatusCode::TEMPORARY_REDIRECT, [(LOCATION, location)]).into_response())
}

/// Stream the upstream body to the client chunk by chunk. Dropping the
/// response body (client went away) drops the upstream connection with it.
pub async fn relay(
    http_client: &reqwest::Client,
    upstream: &Candidate,
    default_user_agent: &str,
    range: Option<&HeaderValue>,
    content_type: &'static str,
    filename: &str,
) -> Result<Response, ApiError> {
    let user_agent = header_ci(&upstream.http_headers, "user-agent").unwrap_or(default_user_agent);

    let mut request = http_client
        .get(&upstream.url)
        .header(USER_AGENT, user_agent)
        .header(ACCEPT_LANGUAGE, DEFAULT_ACCEPT_LANGUAGE);
    if let Some(referer) = header_ci(&upstream.http_headers, "referer") {
        request = request.header(REFERER, referer);
    }
    if let Some(range) = range {
        request = request.header(RANGE, range.clone());
    }

    let response = request.send().await.map_err(|e| {
        error!("HTTP error streaming from upstream: {e}");
        ApiError::upstream(format!("Upstream request failed: {e}"))
    })?;

    let status = response.status();
    if !status.is_success() {
        error!("Upstream returned status {status} for {}", short(&upstream.url));
        return Err(ApiError::upstream(format!("Upstream returned status {status}")));
    }

    let mut resp_headers = HeaderMap::new();
    resp_headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp_headers.insert(CONTENT_DISPOSITION, content_disposition(filename));
    resp_headers.insert(
        "x-filename",
        HeaderValue::from_str(&urlencoding::encode(filename))
            .unwrap_or_else(|_| HeaderValue::from_static("download")),
    );
    resp_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    for name in [CONTENT_LENGTH, CONTENT_RANGE, ACCEPT_RANGES] {
        if let Some(value) = response.headers().get(&name) {
            resp_headers.insert(name, value.clone());
        }
    }

    let stream = response.bytes_stream().map(|result| {
        result.map_err(|e| {
            error!("Error streaming chunk: {e}");
            std::io::Error::other(e)
        })
    });

    let relayed_status = if status == StatusCode::PARTIAL_CONTENT {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    let mut resp = Response::new(Body::from_stream(stream));
    *resp.status_mut() = relayed_status;
    *resp.headers_mut() = resp_headers;
    Ok(resp)
}

fn header_ci<'a>(
    headers: &'a std::collections::HashMap<String, String>,
    name: &str,
) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}
