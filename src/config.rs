use std::env;
use std::path::PathBuf;

use crate::selector::AudioFallback;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

pub const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9,ar;q=0.8";

#[derive(Clone, Debug)]
pub struct Settings {
    pub port: u16,
    pub rapidapi_key: Option<String>,
    pub rapidapi_host: String,
    pub rapidapi_endpoint: String,
    pub tikwm_endpoint: String,
    pub ytdlp_timeout: u64,
    pub ytdlp_socket_timeout: u64,
    pub cookies_path: Option<PathBuf>,
    pub resolver_timeout: u64,
    pub connect_timeout: u64,
    pub read_timeout: u64,
    pub user_agent: String,
    pub audio_fallback: AudioFallback,
    pub rate_limit_per_minute: usize,
    pub trust_proxy_headers: bool,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", 8000),
            rapidapi_key: env_opt("RAPIDAPI_KEY"),
            rapidapi_host: env_str("RAPIDAPI_HOST", "social-download-all-in-one.p.rapidapi.com"),
            rapidapi_endpoint: env_str(
                "RAPIDAPI_ENDPOINT",
                "https://social-download-all-in-one.p.rapidapi.com/v1/social/autolink",
            ),
            tikwm_endpoint: env_str("TIKWM_ENDPOINT", "https://www.tikwm.com/api/"),
            ytdlp_timeout: env_parse("YTDLP_TIMEOUT", 45),
            ytdlp_socket_timeout: env_parse("YTDLP_SOCKET_TIMEOUT", 20),
            cookies_path: env_opt("COOKIES_PATH").map(PathBuf::from),
            resolver_timeout: env_parse("RESOLVER_TIMEOUT", 25),
            connect_timeout: env_parse("CONNECT_TIMEOUT", 10),
            read_timeout: env_parse("READ_TIMEOUT", 60),
            user_agent: env_str("USER_AGENT", DEFAULT_USER_AGENT),
            audio_fallback: env_parse("AUDIO_FALLBACK", AudioFallback::Progressive),
            rate_limit_per_minute: env_parse("RATE_LIMIT_PER_MINUTE", 0),
            trust_proxy_headers: env_bool("TRUST_PROXY_HEADERS", false),
        }
    }

    pub fn aggregator_enabled(&self) -> bool {
        self.rapidapi_key.is_some()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 8000,
            rapidapi_key: None,
            rapidapi_host: "social-download-all-in-one.p.rapidapi.com".into(),
            rapidapi_endpoint:
                "https://social-download-all-in-one.p.rapidapi.com/v1/social/autolink".into(),
            tikwm_endpoint: "https://www.tikwm.com/api/".into(),
            ytdlp_timeout: 45,
            ytdlp_socket_timeout: 20,
            cookies_path: None,
            resolver_timeout: 25,
            connect_timeout: 10,
            read_timeout: 60,
            user_agent: DEFAULT_USER_AGENT.into(),
            audio_fallback: AudioFallback::Progressive,
            rate_limit_per_minute: 0,
            trust_proxy_headers: false,
        }
    }
}

fn env_str(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Unset and blank values both count as absent.
fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
