//! 代码搜索工具：在工作区内按正则搜索，输出 `path:line:content`
//!
//! walkdir 遍历，跳过忽略目录、二进制与超大文件；include 为文件名 glob（如 *.rs）。

use std::path::Path;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use walkdir::WalkDir;

use crate::core::ToolError;
use crate::tools::filesystem::{IgnoreRules, SafeFs};
use crate::tools::Tool;

const MAX_RESULTS: usize = 50;
const MAX_FILE_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchFilesArgs {
    /// Text or regex pattern to search for
    pub pattern: String,
    /// Directory or file to search in (default: workspace root)
    pub path: Option<String>,
    /// File glob filter, e.g. '*.py' or '*.rs'
    pub include: Option<String>,
}

/// 正则搜索工具
pub struct SearchFilesTool {
    fs: SafeFs,
    ignore: IgnoreRules,
}

impl SearchFilesTool {
    pub fn new(fs: SafeFs, ignore: IgnoreRules) -> Self {
        Self { fs, ignore }
    }

    fn search_in_file(&self, file: &Path, re: &regex::Regex, hits: &mut Vec<String>, total: &mut usize) {
        let Ok(bytes) = std::fs::read(file) else {
            return;
        };
        // 含 NUL 视为二进制
        if bytes.contains(&0) {
            return;
        }
        let content = String::from_utf8_lossy(&bytes);
        let shown = self.fs.display(file);
        for (n, line) in content.lines().enumerate() {
            if re.is_match(line) {
                *total += 1;
                if hits.len() < MAX_RESULTS {
                    hits.push(format!("{shown}:{}:{}", n + 1, line.trim_end()));
                }
            }
        }
    }
}

#[async_trait]
impl Tool for SearchFilesTool {
    type Args = SearchFilesArgs;

    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search for a text or regex pattern in workspace files. Returns matching lines with file paths and line numbers."
    }

    async fn execute(&self, args: SearchFilesArgs) -> Result<String, ToolError> {
        let path = args.path.unwrap_or_else(|| ".".to_string());
        tracing::info!(pattern = %args.pattern, path = %path, "search_files tool execute");
        let re = regex::Regex::new(&args.pattern)
            .or_else(|_| regex::Regex::new(&regex::escape(&args.pattern)))
            .map_err(|e| ToolError::Validation(format!("invalid pattern: {e}")))?;
        let include = match args.include.as_deref().filter(|s| !s.is_empty()) {
            Some(g) => Some(
                glob::Pattern::new(g)
                    .map_err(|e| ToolError::Validation(format!("invalid include glob: {e}")))?,
            ),
            None => None,
        };
        let root = self.fs.resolve(&path)?;
        if !root.exists() {
            return Err(ToolError::Execution(format!("path not found: {path}")));
        }

        let mut hits = Vec::new();
        let mut total = 0usize;
        let walker = WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0 || !self.ignore.is_ignored_name(&e.file_name().to_string_lossy())
            });
        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(glob) = &include {
                if !glob.matches(&entry.file_name().to_string_lossy()) {
                    continue;
                }
            }
            if entry.metadata().map(|m| m.len() > MAX_FILE_SIZE).unwrap_or(true) {
                continue;
            }
            self.search_in_file(entry.path(), &re, &mut hits, &mut total);
        }

        if hits.is_empty() {
            return Ok(format!("No matches found for '{}' in {path}", args.pattern));
        }
        let mut out = hits.join("\n");
        if total > hits.len() {
            out.push_str(&format!("\n\n[{} more matches...]", total - hits.len()));
        }
        Ok(out)
    }
}
