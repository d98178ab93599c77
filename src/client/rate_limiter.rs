//! Header-driven throttling for the generation endpoint.
//!
//! OpenAI-compatible APIs report the remaining request budget in
//! `x-ratelimit-remaining-requests` and the time until it refills in
//! `x-ratelimit-reset-requests`. When the budget hits zero the next request
//! waits for the reset instead of burning a retry on a 429.

use reqwest::header::HeaderMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Longest pause the limiter will impose on its own.
const MAX_WAIT: Duration = Duration::from_secs(120);

/// Upper bound for a server-sent `Retry-After`.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

#[derive(Debug, Default)]
struct LimitState {
    remaining_requests: Option<u32>,
    reset_requests_at: Option<Instant>,
}

/// Tracks the request budget reported by the last response.
#[derive(Debug, Default)]
pub struct RateLimiter {
    state: Mutex<LimitState>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time to wait before the next request.
    pub fn wait_time(&self) -> Duration {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        match (state.remaining_requests, state.reset_requests_at) {
            (Some(0), Some(reset_at)) if reset_at > now => (reset_at - now).min(MAX_WAIT),
            _ => Duration::ZERO,
        }
    }

    /// Sleep until the request budget allows another call.
    pub async fn wait_if_needed(&self) -> Duration {
        let wait = self.wait_time();
        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "Waiting for rate limit reset");
            tokio::time::sleep(wait).await;
        }
        wait
    }

    /// Update state from response headers.
    pub fn update_from_headers(&self, headers: &HeaderMap) {
        let header = |key: &str| headers.get(key)?.to_str().ok().map(str::to_string);

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(remaining) = header("x-ratelimit-remaining-requests") {
            state.remaining_requests = remaining.trim().parse().ok();
        }
        if let Some(reset) = header("x-ratelimit-reset-requests").and_then(|s| parse_reset(&s)) {
            state.reset_requests_at = Some(Instant::now() + reset);
        }
    }
}

/// Finite, non-negative seconds as a duration no longer than `cap`.
fn capped_secs(secs: f64, cap: Duration) -> Option<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(Duration::try_from_secs_f64(secs).map_or(cap, |d| d.min(cap)))
}

/// Parse a `Retry-After` value given in seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs = value.trim().parse::<f64>().ok()?;
    capped_secs(secs, MAX_RETRY_AFTER)
}

/// Parse a reset duration: plain seconds (`"1.5"`) or unit-suffixed
/// segments as sent by OpenAI (`"6m0s"`, `"120ms"`, `"1h2m3.5s"`).
/// Results are capped at the limiter's longest wait.
pub fn parse_reset(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<f64>() {
        return capped_secs(secs, MAX_WAIT);
    }

    // Accumulate in microseconds to keep millisecond values exact.
    let mut total_micros = 0.0_f64;
    let mut number = String::new();
    let mut chars = value.chars().peekable();
    let mut matched = false;
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let n: f64 = number.parse().ok()?;
        number.clear();
        let micros_per_unit = match c {
            'h' => 3_600_000_000.0,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                1_000.0
            }
            'm' => 60_000_000.0,
            's' => 1_000_000.0,
            _ => return None,
        };
        total_micros += n * micros_per_unit;
        matched = true;
    }

    // The cast saturates, so oversized values land on the cap.
    (matched && number.is_empty())
        .then(|| Duration::from_micros(total_micros.round() as u64).min(MAX_WAIT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_reset_formats() {
        assert_eq!(parse_reset("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_reset("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_reset("6m0s"), Some(Duration::from_secs(360)));
        assert_eq!(parse_reset("120ms"), Some(Duration::from_millis(120)));
        assert_eq!(parse_reset("soon"), None);
        assert_eq!(parse_reset("5x"), None);
    }

    #[test]
    fn test_parse_reset_rejects_or_caps_out_of_range_values() {
        assert_eq!(parse_reset("1e300"), Some(MAX_WAIT));
        assert_eq!(parse_reset("99999999999999999999999999h"), Some(MAX_WAIT));
        assert_eq!(parse_reset("NaN"), None);
        assert_eq!(parse_reset("inf"), None);
        assert_eq!(parse_reset("-1"), None);
        assert_eq!(parse_reset("1e300s"), None);
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(" 7 "), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after("0.5"), Some(Duration::from_millis(500)));
        assert_eq!(parse_retry_after("1e300"), Some(MAX_RETRY_AFTER));
        assert_eq!(parse_retry_after("NaN"), None);
        assert_eq!(parse_retry_after("-inf"), None);
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_reset_header_waits_at_most_the_cap() {
        let limiter = RateLimiter::new();
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining-requests", HeaderValue::from_static("0"));
        headers.insert("x-ratelimit-reset-requests", HeaderValue::from_static("1e300"));
        limiter.update_from_headers(&headers);
        assert_eq!(limiter.wait_time(), MAX_WAIT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_only_when_budget_exhausted() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.wait_time(), Duration::ZERO);

        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining-requests", HeaderValue::from_static("3"));
        headers.insert("x-ratelimit-reset-requests", HeaderValue::from_static("10s"));
        limiter.update_from_headers(&headers);
        assert_eq!(limiter.wait_time(), Duration::ZERO);

        headers.insert("x-ratelimit-remaining-requests", HeaderValue::from_static("0"));
        limiter.update_from_headers(&headers);
        assert_eq!(limiter.wait_time(), Duration::from_secs(10));

        let start = Instant::now();
        limiter.wait_if_needed().await;
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert_eq!(limiter.wait_time(), Duration::ZERO);
    }
}
