//! 瞬时错误判定与退避

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

fn retryable_text_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(
            r"(?i)rate.?limit|overloaded|unavailable|high demand|disconnected|connection.?(reset|refused|error|closed)|upstream.?connect|timed? ?out|too many requests|bad gateway|internal server error|gateway timeout",
        )
        .expect("retry regex must compile")
    })
}

/// 状态码 429/5xx 或错误文本命中限流/过载/断连关键词
pub fn is_retryable_http_error(status: u16, body: &str) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504) || retryable_text_regex().is_match(body)
}

pub fn is_retryable_message(message: &str) -> bool {
    retryable_text_regex().is_match(message)
}

/// 第 attempt 次重试前的等待（指数退避，attempt 从 0 开始）
pub fn retry_delay(base_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.min(6);
    Duration::from_millis(base_ms.saturating_mul(2u64.saturating_pow(exponent)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_status() {
        assert!(is_retryable_http_error(429, ""));
        assert!(is_retryable_http_error(502, ""));
        assert!(!is_retryable_http_error(404, "not found"));
        assert!(is_retryable_http_error(400, "Service Unavailable"));
    }

    #[test]
    fn test_retryable_message() {
        assert!(is_retryable_message("connection reset by peer"));
        assert!(is_retryable_message("Rate limit reached"));
        assert!(!is_retryable_message("invalid api key"));
        assert!(is_retryable_message("Invalid status code: 429 Too Many Requests"));
        assert!(is_retryable_message("Invalid status code: 504 Gateway Timeout"));
    }

    #[test]
    fn test_retry_delay() {
        assert_eq!(retry_delay(100, 0), Duration::from_millis(100));
        assert_eq!(retry_delay(100, 2), Duration::from_millis(400));
        assert_eq!(retry_delay(0, 3), Duration::ZERO);
    }
}
