//! Video URL parsing and best-effort title lookup.

use regex::Regex;
use tracing::warn;

/// Extract the 11-character video id from the recognized URL shapes
/// (`watch?v=`, `youtu.be/`, `/embed/`, `/shorts/`, `/v/`, `/e/`).
pub fn extract_video_id(url: &str) -> Option<String> {
    let re = Regex::new(
        r"(?:youtube\.com/(?:[^/\n\s]+/\S+/|(?:v|e(?:mbed)?|shorts)/|.*[?&]v=)|youtu\.be/)([\w-]{11})",
    )
    .ok()?;
    re.captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Canonical watch URL for a video id.
pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

/// Look up a display title via the oEmbed endpoint.
///
/// Purely cosmetic: any failure (network, non-2xx, shape mismatch) returns
/// `None` and the caller falls back to an empty title.
pub async fn fetch_video_title(oembed_endpoint: &str, video_id: &str) -> Option<String> {
    let resp = reqwest::Client::new()
        .get(oembed_endpoint)
        .query(&[("url", watch_url(video_id).as_str()), ("format", "json")])
        .send()
        .await
        .map_err(|e| warn!("[oembed] request error: {}", e))
        .ok()?;
    let json: serde_json::Value = resp
        .json()
        .await
        .map_err(|e| warn!("[oembed] JSON error: {}", e))
        .ok()?;
    json["title"]
        .as_str()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_watch_url() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ").as_deref(),
            Some("dQw4w9WgXcQ")
        );
    }

    #[test]
    fn test_extract_short_and_embed_shapes() {
        assert_eq!(
            extract_video_id("https://youtu.be/abcdefghijk").as_deref(),
            Some("abcdefghijk")
        );
        assert_eq!(
            extract_video_id("https://www.youtube.com/embed/abcdefghijk").as_deref(),
            Some("abcdefghijk")
        );
        assert_eq!(
            extract_video_id("https://www.youtube.com/shorts/abcdefghijk").as_deref(),
            Some("abcdefghijk")
        );
    }

    #[test]
    fn test_extract_with_extra_query_params() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?list=PL1&v=abcdefghijk&t=10").as_deref(),
            Some("abcdefghijk")
        );
    }

    #[test]
    fn test_extract_rejects_garbage() {
        assert!(extract_video_id("not-a-url").is_none());
        assert!(extract_video_id("https://example.com/watch?v=abcdefghijk").is_none());
        assert!(extract_video_id("https://youtu.be/short").is_none());
    }

    #[test]
    fn test_watch_url() {
        assert_eq!(
            watch_url("abcdefghijk"),
            "https://www.youtube.com/watch?v=abcdefghijk"
        );
    }
}
