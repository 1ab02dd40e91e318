//! 斜杠命令解析
//!
//! 以 / 开头的输入不会发给模型。命令名支持前缀：精确匹配优先，否则取最短的匹配。

/// (命令, 用法, 说明)
pub const COMMANDS: &[(&str, &str, &str)] = &[
    ("/help", "/help", "Show available commands"),
    ("/yolo", "/yolo", "Toggle auto-accept for changes"),
    ("/config", "/config", "Show the active configuration"),
    ("/model", "/model [name]", "Show or switch the model"),
    ("/undo", "/undo [n]", "Revert the last n snapshots (default 1)"),
    ("/redo", "/redo", "Re-apply the most recently undone snapshot"),
    ("/checkpoint", "/checkpoint [message]", "Save a manual snapshot"),
    ("/history", "/history", "List recent snapshots"),
    ("/restore", "/restore <id>", "Rewind the workspace to a snapshot"),
    ("/compact", "/compact", "Summarize older conversation turns now"),
    ("/clear", "/clear", "Clear the conversation (the log is kept)"),
    ("/cost", "/cost", "Show context size against the compaction threshold"),
    ("/attach", "/attach <path>", "Add a file to the conversation"),
    ("/log", "/log [query]", "Show or search the conversation log"),
    ("/tools", "/tools", "List registered tools"),
    ("/quit", "/quit", "Exit"),
    ("/exit", "/exit", "Exit"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    Yolo,
    Config,
    Model(Option<String>),
    Undo(usize),
    Redo,
    Checkpoint(Option<String>),
    History,
    Restore(String),
    Compact,
    Clear,
    Cost,
    Attach(String),
    Log(Option<String>),
    Tools,
    Quit,
}

/// 解析结果：命令，或者给用户看的错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub command: SlashCommand,
    /// 通过前缀补全得到时的完整命令名
    pub expanded_from: Option<String>,
}

pub fn is_command(input: &str) -> bool {
    input.trim_start().starts_with('/')
}

/// 精确匹配优先，否则最短前缀匹配
pub fn resolve_name(raw: &str) -> Option<&'static str> {
    let raw = raw.to_lowercase();
    let mut matches: Vec<&'static str> = COMMANDS
        .iter()
        .map(|(name, _, _)| *name)
        .filter(|name| name.starts_with(&raw))
        .collect();
    if let Some(exact) = matches.iter().find(|m| **m == raw) {
        return Some(*exact);
    }
    matches.sort_by_key(|m| m.len());
    matches.into_iter().next()
}

pub fn parse(input: &str) -> Result<Resolved, String> {
    let input = input.trim();
    let (raw, rest) = match input.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (input, ""),
    };
    let Some(name) = resolve_name(raw) else {
        return Err(format!("Unknown command: {raw} (type /help)"));
    };
    let arg = (!rest.is_empty()).then(|| rest.to_string());

    let command = match name {
        "/help" => SlashCommand::Help,
        "/yolo" => SlashCommand::Yolo,
        "/config" => SlashCommand::Config,
        "/model" => SlashCommand::Model(arg),
        "/undo" => match arg {
            None => SlashCommand::Undo(1),
            Some(n) => match n.parse::<usize>() {
                Ok(n) if n > 0 => SlashCommand::Undo(n),
                _ => return Err(format!("Usage: /undo [n] (n must be a positive number, got '{n}')")),
            },
        },
        "/redo" => SlashCommand::Redo,
        "/checkpoint" => SlashCommand::Checkpoint(arg),
        "/history" => SlashCommand::History,
        "/restore" => match arg {
            Some(id) => SlashCommand::Restore(id),
            None => return Err("Usage: /restore <id>".to_string()),
        },
        "/compact" => SlashCommand::Compact,
        "/clear" => SlashCommand::Clear,
        "/cost" => SlashCommand::Cost,
        "/attach" => match arg {
            Some(path) => SlashCommand::Attach(path),
            None => return Err("Usage: /attach <path>".to_string()),
        },
        "/log" => SlashCommand::Log(arg),
        "/tools" => SlashCommand::Tools,
        _ => SlashCommand::Quit,
    };
    Ok(Resolved {
        command,
        expanded_from: (name != raw.to_lowercase()).then(|| name.to_string()),
    })
}

pub fn help_text() -> String {
    let width = COMMANDS.iter().map(|(_, usage, _)| usage.len()).max().unwrap_or(0);
    COMMANDS
        .iter()
        .map(|(_, usage, desc)| format!("  {usage:<width$}  {desc}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_resolution() {
        assert_eq!(resolve_name("/comp"), Some("/compact"));
        assert_eq!(resolve_name("/c"), Some("/cost"));
        assert_eq!(resolve_name("/h"), Some("/help"));
        assert_eq!(resolve_name("/re"), Some("/redo"));
        assert_eq!(resolve_name("/nope"), None);
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse("/undo").unwrap().command, SlashCommand::Undo(1));
        assert_eq!(parse("/undo 3").unwrap().command, SlashCommand::Undo(3));
        assert!(parse("/undo zero").is_err());
        assert!(parse("/restore").is_err());
        assert_eq!(parse("/model").unwrap().command, SlashCommand::Model(None));
        assert_eq!(
            parse("/m gpt-4o-mini").unwrap().command,
            SlashCommand::Model(Some("gpt-4o-mini".into()))
        );
        assert_eq!(
            parse("/checkpoint before refactor").unwrap().command,
            SlashCommand::Checkpoint(Some("before refactor".into()))
        );
        let r = parse("/comp").unwrap();
        assert_eq!(r.command, SlashCommand::Compact);
        assert_eq!(r.expanded_from.as_deref(), Some("/compact"));
        assert_eq!(parse("/EXIT").unwrap().command, SlashCommand::Quit);
    }

    #[test]
    fn test_help_lists_everything() {
        let help = help_text();
        for (_, usage, _) in COMMANDS {
            assert!(help.contains(usage));
        }
    }
}
