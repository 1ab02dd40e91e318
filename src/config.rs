//! 应用配置：从 config/default.toml、.amas/config.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AMAS__*` 覆盖（双下划线表示嵌套，如 `AMAS__AGENT__AUTO_ACCEPT=true`）。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::AgentError;

/// 工作区内的状态目录（快照、会话日志、本地配置），工具不可写入
pub const STATE_DIR: &str = ".amas";

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub tools: ToolsSection,
    pub snapshot: SnapshotSection,
    pub history: HistorySection,
}

/// [app] 段：工作目录与系统提示词
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppSection {
    /// 工作区根目录，未设置时用当前目录
    pub workspace_root: Option<PathBuf>,
    /// 覆盖内置系统提示词
    pub system_prompt: Option<String>,
}

/// [llm] 段：后端选择、端点与重试
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmSection {
    /// 后端：openai / mock；openai 无 API Key 时回退 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时读取环境变量 OPENAI_API_KEY
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 瞬时错误的重试次数（不含首次请求）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    1
}

fn default_retry_delay_ms() -> u64 {
    1000
}

/// [agent] 段：确认、压缩阈值与工具循环提醒
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentSection {
    /// 跳过确认直接应用变更（/yolo 可在运行时切换）
    #[serde(default)]
    pub auto_accept: bool,
    /// 估算 token 超过该值时在下一次请求前压缩
    #[serde(default = "default_compaction_threshold_tokens")]
    pub compaction_threshold_tokens: usize,
    /// 压缩时原样保留的最近轮数
    #[serde(default = "default_compaction_keep_recent")]
    pub compaction_keep_recent: usize,
    /// 连续工具迭代达到该倍数时插入提醒（不终止）
    #[serde(default = "default_iteration_warning_threshold")]
    pub iteration_warning_threshold: usize,
    /// 需要确认的工具名；与工具自身声明的变更属性取并集
    #[serde(default = "default_mutating_tools")]
    pub mutating_tools: Vec<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            auto_accept: false,
            compaction_threshold_tokens: default_compaction_threshold_tokens(),
            compaction_keep_recent: default_compaction_keep_recent(),
            iteration_warning_threshold: default_iteration_warning_threshold(),
            mutating_tools: default_mutating_tools(),
        }
    }
}

fn default_compaction_threshold_tokens() -> usize {
    32_000
}

fn default_compaction_keep_recent() -> usize {
    6
}

fn default_iteration_warning_threshold() -> usize {
    20
}

fn default_mutating_tools() -> Vec<String> {
    [
        "write_file",
        "create_file",
        "edit_file",
        "replace_lines",
        "delete_file",
        "shell_command",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// [tools] 段：Shell 超时、输出截断与遍历忽略规则
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsSection {
    #[serde(default = "default_shell_timeout_secs")]
    pub shell_timeout_secs: u64,
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
    /// glob 形式，按路径分量匹配（list_files / search_files / 快照扫描共用）
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub web: WebSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            shell_timeout_secs: default_shell_timeout_secs(),
            max_output_chars: default_max_output_chars(),
            ignore: default_ignore(),
            web: WebSection::default(),
        }
    }
}

/// [tools.web] 段：fetch_url 的开关、超时、最大字符数与域名白名单
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_web_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
    /// 允许抓取的 host；子域名需单独列出
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: Vec<String>,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: default_web_timeout_secs(),
            max_result_chars: default_max_result_chars(),
            allowed_domains: default_allowed_domains(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_web_timeout_secs() -> u64 {
    15
}

fn default_max_result_chars() -> usize {
    8000
}

fn default_allowed_domains() -> Vec<String> {
    [
        // 开发者资源
        "docs.rs",
        "crates.io",
        "doc.rust-lang.org",
        "github.com",
        "raw.githubusercontent.com",
        "gist.github.com",
        "stackoverflow.com",
        "developer.mozilla.org",
        "docs.python.org",
        "pypi.org",
        "www.npmjs.com",
        "pkg.go.dev",
        // 百科与论文
        "en.wikipedia.org",
        "arxiv.org",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_shell_timeout_secs() -> u64 {
    30
}

fn default_max_output_chars() -> usize {
    20_000
}

fn default_ignore() -> Vec<String> {
    [
        ".amas",
        ".git",
        "target",
        "node_modules",
        "__pycache__",
        "*.pyc",
        ".venv",
        "dist",
        "build",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// 快照后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotBackend {
    /// 内容寻址文件快照（.amas/snapshots）
    #[default]
    Fs,
    /// git 提交（带 "[amas] " 前缀）
    Git,
    /// 不做版本化
    None,
}

/// [snapshot] 段
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SnapshotSection {
    #[serde(default)]
    pub backend: SnapshotBackend,
}

/// [history] 段：追加式对话日志
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistorySection {
    #[serde(default = "default_history_enabled")]
    pub enabled: bool,
    /// 相对工作区；默认 .amas/history.jsonl
    pub path: Option<PathBuf>,
    /// 单条记录内容的最大字符数
    #[serde(default = "default_history_max_content_chars")]
    pub max_content_chars: usize,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            enabled: default_history_enabled(),
            path: None,
            max_content_chars: default_history_max_content_chars(),
        }
    }
}

fn default_history_enabled() -> bool {
    true
}

fn default_history_max_content_chars() -> usize {
    2000
}

impl AppConfig {
    /// 数值型阈值不能为 0（0 会让压缩或提醒每轮触发、Shell 立刻超时）
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.agent.compaction_threshold_tokens == 0 {
            return Err(AgentError::Config(
                "agent.compaction_threshold_tokens must be > 0".into(),
            ));
        }
        if self.agent.iteration_warning_threshold == 0 {
            return Err(AgentError::Config(
                "agent.iteration_warning_threshold must be > 0".into(),
            ));
        }
        if self.tools.shell_timeout_secs == 0 {
            return Err(AgentError::Config("tools.shell_timeout_secs must be > 0".into()));
        }
        if self.tools.web.enabled && self.tools.web.timeout_secs == 0 {
            return Err(AgentError::Config("tools.web.timeout_secs must be > 0".into()));
        }
        Ok(())
    }

    /// 工作区根目录：配置 > 当前目录
    pub fn workspace_root(&self) -> PathBuf {
        self.app
            .workspace_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn history_path(&self, workspace: &Path) -> PathBuf {
        match &self.history.path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => workspace.join(p),
            None => workspace.join(STATE_DIR).join("history.jsonl"),
        }
    }

    pub fn api_key(&self) -> Option<String> {
        self.llm
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.is_empty())
    }
}

/// 加载配置，环境变量 AMAS__* 可覆盖
///
/// 1. config/default.toml（存在则作为第一源）
/// 2. <workspace>/.amas/config.toml（项目级）
/// 3. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 4. 最后叠加环境变量 AMAS__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for path in ["config/default.toml", ".amas/config.toml"] {
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::from(PathBuf::from(path)).required(false));
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AMAS")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("agent.mutating_tools")
            .with_list_parse_key("tools.ignore")
            .with_list_parse_key("tools.web.allowed_domains")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert!(!cfg.agent.auto_accept);
        assert_eq!(cfg.agent.compaction_threshold_tokens, 32_000);
        assert_eq!(cfg.agent.iteration_warning_threshold, 20);
        assert_eq!(cfg.tools.shell_timeout_secs, 30);
        assert_eq!(cfg.llm.max_retries, 1);
        assert_eq!(cfg.snapshot.backend, SnapshotBackend::Fs);
        assert!(cfg.agent.mutating_tools.iter().any(|t| t == "edit_file"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("amas.toml");
        std::fs::write(
            &path,
            "[agent]\nauto_accept = true\ncompaction_threshold_tokens = 500\n\n[snapshot]\nbackend = \"git\"\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert!(cfg.agent.auto_accept);
        assert_eq!(cfg.agent.compaction_threshold_tokens, 500);
        assert_eq!(cfg.agent.compaction_keep_recent, 6);
        assert_eq!(cfg.snapshot.backend, SnapshotBackend::Git);
    }

    #[test]
    fn test_validate_rejects_zero() {
        let mut cfg = AppConfig::default();
        cfg.tools.shell_timeout_secs = 0;
        assert!(matches!(cfg.validate(), Err(AgentError::Config(_))));
    }

    #[test]
    fn test_history_path() {
        let cfg = AppConfig::default();
        let p = cfg.history_path(Path::new("/ws"));
        assert_eq!(p, PathBuf::from("/ws/.amas/history.jsonl"));
    }
}
