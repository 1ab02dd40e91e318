//! 沙箱文件系统工具
//!
//! SafeFs 绑定工作区根目录，所有路径经 resolve 校验必须在根下（禁止 ../ 与符号链接逃逸）；
//! 读类工具：read_file / list_files；变更类工具：write_file / create_file / edit_file /
//! replace_lines / delete_file，均先生成 diff 预览，由分发器确认后再执行。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::config::STATE_DIR;
use crate::core::ToolError;
use crate::tools::{Preview, Tool};

const MAX_READ_CHARS: usize = 50_000;
const MAX_SNIPPET_CHARS: usize = 4_000;

/// 按名称分量匹配的忽略规则（glob）
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    patterns: Vec<glob::Pattern>,
}

impl IgnoreRules {
    pub fn new(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| match glob::Pattern::new(p) {
                Ok(pat) => Some(pat),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "ignoring invalid ignore pattern");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn is_ignored_name(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(name))
    }

    /// 相对路径任一分量命中即忽略
    pub fn is_ignored(&self, rel: &Path) -> bool {
        rel.components().any(|c| match c {
            Component::Normal(name) => self.is_ignored_name(&name.to_string_lossy()),
            _ => false,
        })
    }
}

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 解析为工作区内的绝对路径；目标可以不存在（写入/新建）
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let trimmed = path.trim();
        let candidate = Path::new(trimmed);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root_dir.join(candidate)
        };
        let normalized = normalize(&joined);
        if !normalized.starts_with(&self.root_dir) {
            return Err(ToolError::Validation(format!(
                "path escapes workspace: {trimmed}"
            )));
        }
        // 状态目录存放快照与日志，写坏会让撤销失效
        let in_state_dir = normalized
            .strip_prefix(&self.root_dir)
            .ok()
            .and_then(|rel| rel.components().next())
            .is_some_and(|first| first.as_os_str() == STATE_DIR);
        if in_state_dir {
            return Err(ToolError::Validation(format!(
                "path is inside the protected {STATE_DIR}/ directory: {trimmed}"
            )));
        }
        // 最近的已存在祖先经 canonicalize 后仍须在根下（符号链接）
        let mut ancestor = normalized.as_path();
        while !ancestor.exists() {
            match ancestor.parent() {
                Some(parent) => ancestor = parent,
                None => break,
            }
        }
        if let Ok(real) = ancestor.canonicalize() {
            if !real.starts_with(&self.root_dir) {
                return Err(ToolError::Validation(format!(
                    "path escapes workspace: {trimmed}"
                )));
            }
        }
        Ok(normalized)
    }

    /// 相对根目录的展示路径
    pub fn display(&self, full: &Path) -> String {
        full.strip_prefix(&self.root_dir)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| full.to_string_lossy().to_string())
    }

    pub fn read_text(&self, path: &str) -> Result<(PathBuf, String), ToolError> {
        let resolved = self.resolve(path)?;
        if !resolved.exists() {
            return Err(ToolError::Execution(format!("file not found: {path}")));
        }
        if !resolved.is_file() {
            return Err(ToolError::Execution(format!("not a file: {path}")));
        }
        let bytes = std::fs::read(&resolved)
            .map_err(|e| ToolError::Execution(format!("reading {path}: {e}")))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| ToolError::Execution(format!("binary file, cannot display: {path}")))?;
        Ok((resolved, text))
    }

    pub fn write_text(&self, resolved: &Path, content: &str) -> Result<(), ToolError> {
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ToolError::Execution(format!("creating directories: {e}")))?;
        }
        std::fs::write(resolved, content).map_err(|e| {
            ToolError::Execution(format!("writing {}: {e}", self.display(resolved)))
        })
    }
}

/// 词法规整 . 与 ..（不访问文件系统）
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// 带行号输出：`{行号右对齐} | {内容}`
pub fn numbered(content: &str, start_line: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let max_line = start_line + lines.len().saturating_sub(1);
    let width = max_line.to_string().len();
    lines
        .iter()
        .enumerate()
        .map(|(i, l)| format!("{:>width$} | {}", i + start_line, l, width = width))
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_chars(s: &str, max: usize) -> (String, bool) {
    match s.char_indices().nth(max) {
        Some((idx, _)) => (s[..idx].to_string(), true),
        None => (s.to_string(), false),
    }
}

// ── read_file ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadFileArgs {
    /// Path to the file, relative to the workspace
    pub path: String,
    /// First line to read (default 1)
    pub start_line: Option<usize>,
    /// Last line to read (optional)
    pub end_line: Option<usize>,
}

/// 读取文件（带行号，可选行区间）
pub struct ReadFileTool {
    fs: SafeFs,
}

impl ReadFileTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    type Args = ReadFileArgs;

    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file and return contents with line numbers. Use start_line/end_line for efficiency on large files."
    }

    async fn execute(&self, args: ReadFileArgs) -> Result<String, ToolError> {
        tracing::info!(path = %args.path, "read_file tool execute");
        let (_, content) = self.fs.read_text(&args.path)?;
        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len();
        let start = args.start_line.unwrap_or(1).max(1);
        let end = args.end_line.map(|e| e.min(total)).unwrap_or(total);
        if total == 0 {
            return Ok(String::new());
        }
        if start > total {
            return Err(ToolError::Execution(format!(
                "start_line {start} is beyond end of file ({total} lines)"
            )));
        }
        if end < start {
            return Err(ToolError::Execution(format!(
                "end_line {end} is before start_line {start}"
            )));
        }
        let subset = lines[start - 1..end].join("\n");
        let (subset, truncated) = truncate_chars(&subset, MAX_READ_CHARS);
        let mut out = numbered(&subset, start);
        if truncated {
            out.push_str(&format!("\n\n[truncated at {MAX_READ_CHARS} chars]"));
        }
        Ok(out)
    }
}

// ── list_files ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListFilesArgs {
    /// Directory to list (default: workspace root)
    pub path: Option<String>,
    /// Maximum depth to recurse (default: 3)
    pub max_depth: Option<usize>,
}

/// 树形列出目录（遵循忽略规则）
pub struct ListFilesTool {
    fs: SafeFs,
    ignore: IgnoreRules,
}

impl ListFilesTool {
    pub fn new(fs: SafeFs, ignore: IgnoreRules) -> Self {
        Self { fs, ignore }
    }

    fn walk(&self, dir: &Path, prefix: &str, lines: &mut Vec<String>, max_depth: usize, depth: usize) {
        if depth > max_depth {
            lines.push(format!("{prefix}..."));
            return;
        }
        let Ok(read) = std::fs::read_dir(dir) else {
            return;
        };
        let mut entries: Vec<(bool, String, PathBuf)> = read
            .filter_map(|e| e.ok())
            .map(|e| {
                let is_dir = e.file_type().map(|t| t.is_dir()).unwrap_or(false);
                (is_dir, e.file_name().to_string_lossy().to_string(), e.path())
            })
            .filter(|(_, name, _)| !self.ignore.is_ignored_name(name))
            .collect();
        // 目录在前，再按名称
        entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let count = entries.len();
        for (i, (is_dir, name, path)) in entries.into_iter().enumerate() {
            let last = i + 1 == count;
            let connector = if last { "└── " } else { "├── " };
            if is_dir {
                lines.push(format!("{prefix}{connector}{name}/"));
                let ext = if last { "    " } else { "│   " };
                self.walk(&path, &format!("{prefix}{ext}"), lines, max_depth, depth + 1);
            } else {
                let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                lines.push(format!("{prefix}{connector}{name} ({})", human_size(size)));
            }
        }
    }
}

fn human_size(size: u64) -> String {
    let mut value = size as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if value < 1024.0 {
            return if unit == "B" {
                format!("{value:.0}{unit}")
            } else {
                format!("{value:.1}{unit}")
            };
        }
        value /= 1024.0;
    }
    format!("{value:.1}TB")
}

#[async_trait]
impl Tool for ListFilesTool {
    type Args = ListFilesArgs;

    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files and directories in a tree format. Respects ignore patterns from config."
    }

    async fn execute(&self, args: ListFilesArgs) -> Result<String, ToolError> {
        let path = args.path.unwrap_or_else(|| ".".to_string());
        tracing::info!(path = %path, "list_files tool execute");
        let root = self.fs.resolve(&path)?;
        if !root.exists() {
            return Err(ToolError::Execution(format!("path not found: {path}")));
        }
        if !root.is_dir() {
            return Err(ToolError::Execution(format!("not a directory: {path}")));
        }
        let mut lines = Vec::new();
        self.walk(&root, "", &mut lines, args.max_depth.unwrap_or(3), 0);
        if lines.is_empty() {
            return Ok(format!("Empty directory: {path}"));
        }
        Ok(lines.join("\n"))
    }
}

// ── write_file ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteFileArgs {
    /// Path to the file to write
    pub path: String,
    /// Full new content of the file
    pub content: String,
}

/// 整文件写入（覆盖）
pub struct WriteFileTool {
    fs: SafeFs,
}

impl WriteFileTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    type Args = WriteFileArgs;

    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file (full rewrite). Creates parent directories. Shows a diff and asks for confirmation."
    }

    fn is_mutating(&self) -> bool {
        true
    }

    fn target(&self, args: &WriteFileArgs) -> String {
        args.path.clone()
    }

    async fn preview(&self, args: &WriteFileArgs) -> Result<Option<Preview>, ToolError> {
        let resolved = self.fs.resolve(&args.path)?;
        let old = if resolved.is_file() {
            std::fs::read_to_string(&resolved).unwrap_or_default()
        } else {
            String::new()
        };
        Ok(Some(Preview::diff(&args.path, &old, &args.content)))
    }

    async fn execute(&self, args: WriteFileArgs) -> Result<String, ToolError> {
        let resolved = self.fs.resolve(&args.path)?;
        self.fs.write_text(&resolved, &args.content)?;
        Ok(format!("Wrote {} bytes to {}", args.content.len(), args.path))
    }
}

// ── create_file ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateFileArgs {
    /// Path of the new file
    pub path: String,
    /// Initial content (default empty)
    #[serde(default)]
    pub content: String,
}

/// 新建文件；已存在时失败
pub struct CreateFileTool {
    fs: SafeFs,
}

impl CreateFileTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }

    fn check_absent(&self, path: &str) -> Result<PathBuf, ToolError> {
        let resolved = self.fs.resolve(path)?;
        if resolved.exists() {
            return Err(ToolError::Execution(format!(
                "file already exists: {path}. Use write_file to overwrite."
            )));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl Tool for CreateFileTool {
    type Args = CreateFileArgs;

    fn name(&self) -> &str {
        "create_file"
    }

    fn description(&self) -> &str {
        "Create a new file. Fails if the file already exists."
    }

    fn is_mutating(&self) -> bool {
        true
    }

    fn target(&self, args: &CreateFileArgs) -> String {
        args.path.clone()
    }

    async fn preview(&self, args: &CreateFileArgs) -> Result<Option<Preview>, ToolError> {
        self.check_absent(&args.path)?;
        Ok(Some(Preview::diff(&args.path, "", &args.content)))
    }

    async fn execute(&self, args: CreateFileArgs) -> Result<String, ToolError> {
        let resolved = self.check_absent(&args.path)?;
        self.fs.write_text(&resolved, &args.content)?;
        Ok(format!("Created {} ({} bytes)", args.path, args.content.len()))
    }
}

// ── edit_file ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EditFileArgs {
    /// Path to the file to edit
    pub path: String,
    /// Exact string to find
    pub old_str: String,
    /// Replacement string
    pub new_str: String,
    /// Which match to replace (1-based). Use 0 to replace all. When omitted the match must be unique.
    pub occurrence: Option<usize>,
}

/// 精确字符串替换
pub struct EditFileTool {
    fs: SafeFs,
}

impl EditFileTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }

    fn plan(&self, args: &EditFileArgs) -> Result<(PathBuf, String, String), ToolError> {
        let (resolved, content) = self.fs.read_text(&args.path)?;
        let updated = apply_edit(&content, &args.old_str, &args.new_str, args.occurrence)
            .map_err(|e| match e {
                EditError::NotFound => {
                    let (snippet, cut) = truncate_chars(&numbered(&content, 1), MAX_SNIPPET_CHARS);
                    let more = if cut { "\n[truncated]" } else { "" };
                    ToolError::Execution(format!(
                        "string not found in {}. Current file content:\n{snippet}{more}",
                        args.path
                    ))
                }
                other => ToolError::Execution(other.message()),
            })?;
        Ok((resolved, content, updated))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum EditError {
    EmptyPattern,
    NotFound,
    NotUnique(usize),
    OccurrenceOutOfRange { count: usize, requested: usize },
}

impl EditError {
    fn message(&self) -> String {
        match self {
            EditError::EmptyPattern => "old_str cannot be empty.".to_string(),
            EditError::NotFound => "string not found.".to_string(),
            EditError::NotUnique(count) => format!(
                "string appears {count} times. Be more specific or use 'occurrence' (1-{count}, or 0 for all)."
            ),
            EditError::OccurrenceOutOfRange { count, requested } => format!(
                "string appears {count} times, but occurrence {requested} was requested."
            ),
        }
    }
}

/// occurrence: None = 必须唯一；Some(0) = 全部；Some(n) = 第 n 处
pub fn apply_edit(
    content: &str,
    old: &str,
    new: &str,
    occurrence: Option<usize>,
) -> Result<String, EditError> {
    if old.is_empty() {
        return Err(EditError::EmptyPattern);
    }
    let count = content.matches(old).count();
    if count == 0 {
        return Err(EditError::NotFound);
    }
    match occurrence {
        Some(0) => Ok(content.replace(old, new)),
        None if count > 1 => Err(EditError::NotUnique(count)),
        None => Ok(content.replacen(old, new, 1)),
        Some(n) if n > count => Err(EditError::OccurrenceOutOfRange {
            count,
            requested: n,
        }),
        Some(n) => {
            let (idx, _) = content
                .match_indices(old)
                .nth(n - 1)
                .ok_or(EditError::NotFound)?;
            let mut out = String::with_capacity(content.len() + new.len());
            out.push_str(&content[..idx]);
            out.push_str(new);
            out.push_str(&content[idx + old.len()..]);
            Ok(out)
        }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    type Args = EditFileArgs;

    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing an exact string match. old_str must be unique unless 'occurrence' is given."
    }

    fn is_mutating(&self) -> bool {
        true
    }

    fn target(&self, args: &EditFileArgs) -> String {
        args.path.clone()
    }

    async fn preview(&self, args: &EditFileArgs) -> Result<Option<Preview>, ToolError> {
        let (_, old, new) = self.plan(args)?;
        Ok(Some(Preview::diff(&args.path, &old, &new)))
    }

    async fn execute(&self, args: EditFileArgs) -> Result<String, ToolError> {
        let (resolved, _, updated) = self.plan(&args)?;
        self.fs.write_text(&resolved, &updated)?;
        let which = match args.occurrence {
            Some(0) => "all".to_string(),
            Some(n) => format!("occurrence {n}"),
            None => "occurrence 1".to_string(),
        };
        Ok(format!("Edited {} successfully ({which} replaced).", args.path))
    }
}

// ── replace_lines ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReplaceLinesArgs {
    /// Path to the file
    pub path: String,
    /// First line to replace (1-based, inclusive)
    pub start_line: usize,
    /// Last line to replace (1-based, inclusive)
    pub end_line: usize,
    /// Replacement text for the range
    pub content: String,
}

/// 按行区间替换
pub struct ReplaceLinesTool {
    fs: SafeFs,
}

impl ReplaceLinesTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }

    fn plan(&self, args: &ReplaceLinesArgs) -> Result<(PathBuf, String, String), ToolError> {
        let (resolved, content) = self.fs.read_text(&args.path)?;
        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len();
        if args.start_line < 1 || args.start_line > total {
            return Err(ToolError::Execution(format!(
                "start_line {} out of range (1-{total})",
                args.start_line
            )));
        }
        if args.end_line < args.start_line || args.end_line > total {
            return Err(ToolError::Execution(format!(
                "end_line {} out of range ({}-{total})",
                args.end_line, args.start_line
            )));
        }
        let mut out: Vec<&str> = Vec::with_capacity(total);
        out.extend_from_slice(&lines[..args.start_line - 1]);
        out.extend(args.content.lines());
        out.extend_from_slice(&lines[args.end_line..]);
        // 沿用原文件的换行风格
        let eol = if content.contains("\r\n") { "\r\n" } else { "\n" };
        let mut updated = out.join(eol);
        if content.ends_with('\n') && !updated.ends_with('\n') {
            updated.push_str(eol);
        }
        Ok((resolved, content, updated))
    }
}

#[async_trait]
impl Tool for ReplaceLinesTool {
    type Args = ReplaceLinesArgs;

    fn name(&self) -> &str {
        "replace_lines"
    }

    fn description(&self) -> &str {
        "Replace a range of lines in a file (1-based, inclusive)."
    }

    fn is_mutating(&self) -> bool {
        true
    }

    fn target(&self, args: &ReplaceLinesArgs) -> String {
        args.path.clone()
    }

    async fn preview(&self, args: &ReplaceLinesArgs) -> Result<Option<Preview>, ToolError> {
        let (_, old, new) = self.plan(args)?;
        Ok(Some(Preview::diff(&args.path, &old, &new)))
    }

    async fn execute(&self, args: ReplaceLinesArgs) -> Result<String, ToolError> {
        let (resolved, _, updated) = self.plan(&args)?;
        self.fs.write_text(&resolved, &updated)?;
        Ok(format!(
            "Replaced lines {}-{} in {}.",
            args.start_line, args.end_line, args.path
        ))
    }
}

// ── delete_file ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteFileArgs {
    /// Path to the file to delete
    pub path: String,
}

/// 删除文件
pub struct DeleteFileTool {
    fs: SafeFs,
}

impl DeleteFileTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }

    fn existing(&self, path: &str) -> Result<PathBuf, ToolError> {
        let resolved = self.fs.resolve(path)?;
        if !resolved.is_file() {
            return Err(ToolError::Execution(format!("file not found: {path}")));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    type Args = DeleteFileArgs;

    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file. Asks for confirmation first."
    }

    fn is_mutating(&self) -> bool {
        true
    }

    fn target(&self, args: &DeleteFileArgs) -> String {
        args.path.clone()
    }

    async fn preview(&self, args: &DeleteFileArgs) -> Result<Option<Preview>, ToolError> {
        let resolved = self.existing(&args.path)?;
        let old = std::fs::read_to_string(&resolved).unwrap_or_default();
        Ok(Some(Preview::diff(&args.path, &old, "")))
    }

    async fn execute(&self, args: DeleteFileArgs) -> Result<String, ToolError> {
        let resolved = self.existing(&args.path)?;
        std::fs::remove_file(&resolved)
            .map_err(|e| ToolError::Execution(format!("deleting {}: {e}", args.path)))?;
        Ok(format!("Deleted {}", args.path))
    }
}
