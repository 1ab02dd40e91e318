//! `@path` 引用展开
//!
//! 用户输入中的 @path 若指向工作区内可读文本文件，则把内容作为代码块放在前面，
//! 原文中的 @path 替换为 `path`；找不到或不可读的引用原样保留并产生警告。

use std::sync::OnceLock;

use regex::Regex;

use crate::tools::SafeFs;

/// 展开结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    pub text: String,
    pub attached: Vec<String>,
    pub warnings: Vec<String>,
}

fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"@([^\s,;:)(!?"']+)"#).expect("reference regex must compile"))
}

pub fn expand_references(input: &str, fs: &SafeFs) -> Expansion {
    let mut text = input.to_string();
    let mut blocks = Vec::new();
    let mut attached = Vec::new();
    let mut warnings = Vec::new();

    let refs: Vec<String> = reference_regex()
        .captures_iter(input)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect();

    for path in refs {
        if attached.contains(&path) {
            continue;
        }
        let resolved = match fs.resolve(&path) {
            Ok(p) if p.is_file() => p,
            Ok(_) => {
                warnings.push(format!("@{path}: file not found"));
                continue;
            }
            Err(e) => {
                warnings.push(format!("@{path}: {e}"));
                continue;
            }
        };
        match std::fs::read_to_string(&resolved) {
            Ok(content) => {
                blocks.push(format!("File `{path}`:\n```\n{content}\n```"));
                text = text.replacen(&format!("@{path}"), &format!("`{path}`"), 1);
                attached.push(path);
            }
            Err(e) => warnings.push(format!("Could not read {path}: {e}")),
        }
    }

    if !blocks.is_empty() {
        text = format!("{}\n\n{}", blocks.join("\n\n"), text);
    }
    Expansion {
        text,
        attached,
        warnings,
    }
}
