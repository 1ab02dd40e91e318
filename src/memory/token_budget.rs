//! Token 估算与上下文预算
//!
//! 估算只用于决定何时压缩和 /cost 展示，不追求与具体 tokenizer 一致。

/// Token 估算器（简单的字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 估算文本的 token 数量
    /// 使用简单的启发式规则：英文约 4 字符/token，中文约 1.5 字符/token
    pub fn estimate(text: &str) -> usize {
        let mut ascii_chars = 0;
        let mut non_ascii_chars = 0;

        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }

        let tokens = ascii_chars / 4 + (non_ascii_chars as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }
}

/// 上下文预算：当前估算值相对压缩阈值的占用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    pub used: usize,
    pub threshold: usize,
}

impl ContextBudget {
    /// 占用达到该比例时 /cost 给出提醒
    pub const WARN_RATIO: f64 = 0.8;

    pub fn new(used: usize, threshold: usize) -> Self {
        Self { used, threshold }
    }

    pub fn ratio(&self) -> f64 {
        if self.threshold == 0 {
            return 1.0;
        }
        self.used as f64 / self.threshold as f64
    }

    pub fn exceeded(&self) -> bool {
        self.used > self.threshold
    }

    pub fn near_limit(&self) -> bool {
        self.ratio() >= Self::WARN_RATIO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_estimator_english() {
        let text = "Hello, world! This is a test.";
        let tokens = TokenEstimator::estimate(text);
        assert!(tokens > 0);
        assert!(tokens < text.len()); // 应该少于字符数
    }

    #[test]
    fn test_token_estimator_chinese() {
        let text = "你好世界，这是一个测试。";
        let tokens = TokenEstimator::estimate(text);
        assert_eq!(tokens, 8);
    }

    #[test]
    fn test_token_estimator_empty() {
        assert_eq!(TokenEstimator::estimate(""), 1);
    }

    #[test]
    fn test_context_budget() {
        let b = ContextBudget::new(850, 1000);
        assert!(b.near_limit());
        assert!(!b.exceeded());
        assert!(ContextBudget::new(1001, 1000).exceeded());
        assert!(!ContextBudget::new(10, 1000).near_limit());
    }
}
