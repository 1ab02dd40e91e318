//! fetch_url：抓取网页正文用于查资料
//!
//! 只允许白名单域名；GET 带超时与 User-Agent；HTML 经 html2text 转成纯文本，
//! 超过 max_result_chars 截断并追加 ...[truncated]。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::config::WebSection;
use crate::core::ToolError;
use crate::tools::Tool;

const USER_AGENT: &str = concat!("amas/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FetchUrlArgs {
    /// http(s) URL to fetch
    pub url: String,
    /// Max characters to return (default and upper bound from config)
    pub max_chars: Option<usize>,
}

pub struct FetchUrlTool {
    client: Client,
    allowed_domains: HashSet<String>,
    max_result_chars: usize,
}

/// html2text 失败时的回退：去标签并压缩空白
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn looks_like_html(s: &str) -> bool {
    let head: String = s.trim_start().chars().take(512).collect::<String>().to_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html") || head.contains("<head") || head.contains("<body")
}

/// 取出小写 host（去掉端口、用户信息与路径）
pub fn extract_domain(url: &str) -> Option<String> {
    let url = url.trim();
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit('@').next()?;
    let host = host.split(':').next()?;
    (!host.is_empty()).then(|| host.to_lowercase())
}

impl FetchUrlTool {
    pub fn new(cfg: &WebSection) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            allowed_domains: cfg.allowed_domains.iter().map(|d| d.to_lowercase()).collect(),
            max_result_chars: cfg.max_result_chars,
        }
    }

    fn check_allowed(&self, url: &str) -> Result<String, ToolError> {
        let domain = extract_domain(url)
            .ok_or_else(|| ToolError::Validation(format!("not an http(s) URL: {url}")))?;
        if self.allowed_domains.contains(&domain) {
            Ok(domain)
        } else {
            Err(ToolError::Validation(format!(
                "domain not in allowlist: {domain} (see tools.web.allowed_domains)"
            )))
        }
    }

    fn readable(body: &str) -> String {
        let body = body.trim_start_matches('\u{FEFF}');
        if !looks_like_html(body) {
            return body.to_string();
        }
        match html2text::from_read(body.as_bytes(), 120) {
            Ok(text) if !text.trim().is_empty() => text,
            _ => strip_html_tags(body),
        }
    }
}

fn truncate_chars(text: String, limit: usize) -> String {
    if text.chars().count() > limit {
        text.chars().take(limit).collect::<String>() + "\n...[truncated]"
    } else {
        text
    }
}

#[async_trait]
impl Tool for FetchUrlTool {
    type Args = FetchUrlArgs;

    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch a web page (documentation, issues, references) and return its text. HTML is converted to plain text. Only allowlisted domains can be fetched."
    }

    async fn execute(&self, args: FetchUrlArgs) -> Result<String, ToolError> {
        let url = args.url.trim();
        let domain = self.check_allowed(url)?;
        tracing::info!(url = %url, domain = %domain, "fetch_url tool execute");

        let resp = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ToolError::Execution(format!("request to {domain} timed out"))
            } else {
                ToolError::Execution(format!("request failed: {e}"))
            }
        })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ToolError::Execution(format!("HTTP {status} for {url}")));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| ToolError::Execution(format!("reading body: {e}")))?;

        let limit = args
            .max_chars
            .unwrap_or(self.max_result_chars)
            .clamp(1, self.max_result_chars.max(1));
        Ok(truncate_chars(Self::readable(&body), limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> FetchUrlTool {
        FetchUrlTool::new(&WebSection {
            allowed_domains: vec!["docs.rs".into()],
            ..WebSection::default()
        })
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(extract_domain("https://docs.rs/tokio/latest").as_deref(), Some("docs.rs"));
        assert_eq!(extract_domain("http://Example.COM:8080?q=1").as_deref(), Some("example.com"));
        assert_eq!(extract_domain("https://user@github.com/a").as_deref(), Some("github.com"));
        assert_eq!(extract_domain("ftp://docs.rs"), None);
        assert_eq!(extract_domain("https://"), None);
    }

    #[tokio::test]
    async fn test_rejects_domain_outside_allowlist() {
        let err = tool()
            .execute(FetchUrlArgs {
                url: "https://evil.example.com/payload".into(),
                max_chars: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation(ref m) if m.contains("evil.example.com")));
        assert!(tool().check_allowed("https://docs.rs/serde").is_ok());
    }

    #[test]
    fn test_readable_strips_markup() {
        let html = "<!DOCTYPE html><html><head><title>t</title></head><body><p>Hello <b>docs</b></p></body></html>";
        let text = FetchUrlTool::readable(html);
        assert!(text.contains("Hello"));
        assert!(text.contains("docs"));
        assert!(!text.contains("<p>"));
        assert_eq!(FetchUrlTool::readable("plain text"), "plain text");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef".into(), 3), "abc\n...[truncated]");
        assert_eq!(truncate_chars("abc".into(), 3), "abc");
        assert_eq!(strip_html_tags("<p>a</p><p>b</p>"), "a b");
    }
}
