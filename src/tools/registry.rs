//! 工具注册表
//!
//! 每个工具实现带类型参数的 Tool trait（参数记录由 serde 反序列化、schemars 生成 schema），
//! 注册时擦除为 DynTool 按名存储；变更属性 = 工具自身声明 ∪ 配置列出的工具名。

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::core::ToolError;
use crate::tools::Preview;

/// 发给模型的工具描述
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 工具 trait：名称、描述（供 LLM 理解）、类型化参数、异步执行
#[async_trait]
pub trait Tool: Send + Sync + 'static {
    type Args: DeserializeOwned + JsonSchema + Send + Sync;

    /// 工具名称（tool_call.name）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 是否会修改工作区（需要预览、确认与快照）
    fn is_mutating(&self) -> bool {
        false
    }

    /// 变更前预览；None 时由分发器用参数 JSON 生成文本预览
    async fn preview(&self, _args: &Self::Args) -> Result<Option<Preview>, ToolError> {
        Ok(None)
    }

    /// 快照标签中的目标（通常是路径）
    fn target(&self, _args: &Self::Args) -> String {
        String::new()
    }

    async fn execute(&self, args: Self::Args) -> Result<String, ToolError>;
}

/// 擦除后的工具：参数以 JSON 传入，在边界处反序列化为 Tool::Args
#[async_trait]
pub trait DynTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    fn is_mutating(&self) -> bool;
    fn target(&self, args: &Value) -> Result<String, ToolError>;
    async fn preview(&self, args: &Value) -> Result<Option<Preview>, ToolError>;
    async fn execute(&self, args: Value) -> Result<String, ToolError>;
}

struct Typed<T: Tool> {
    tool: T,
    schema: Value,
}

fn parse_args<A: DeserializeOwned>(tool: &str, args: Value) -> Result<A, ToolError> {
    serde_json::from_value(args)
        .map_err(|e| ToolError::Validation(format!("wrong arguments for {tool}: {e}")))
}

#[async_trait]
impl<T: Tool> DynTool for Typed<T> {
    fn name(&self) -> &str {
        self.tool.name()
    }

    fn description(&self) -> &str {
        self.tool.description()
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    fn is_mutating(&self) -> bool {
        self.tool.is_mutating()
    }

    fn target(&self, args: &Value) -> Result<String, ToolError> {
        let parsed: T::Args = parse_args(self.tool.name(), args.clone())?;
        Ok(self.tool.target(&parsed))
    }

    async fn preview(&self, args: &Value) -> Result<Option<Preview>, ToolError> {
        let parsed: T::Args = parse_args(self.tool.name(), args.clone())?;
        self.tool.preview(&parsed).await
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let parsed: T::Args = parse_args(self.tool.name(), args)?;
        self.tool.execute(parsed).await
    }
}

/// 由参数类型生成 JSON Schema（内联子 schema，Option 字段不加 null）
pub fn schema_of<A: JsonSchema>() -> Value {
    let generator = SchemaSettings::draft07()
        .with(|s| {
            s.inline_subschemas = true;
            s.option_add_null_type = false;
            s.meta_schema = None;
        })
        .into_generator();
    let root = generator.into_root_schema_for::<A>();
    let mut value = serde_json::to_value(root).unwrap_or_else(|_| {
        serde_json::json!({ "type": "object", "properties": {} })
    });
    if let Some(obj) = value.as_object_mut() {
        obj.remove("title");
        obj.remove("definitions");
        obj.entry("properties")
            .or_insert_with(|| Value::Object(Default::default()));
    }
    value
}

/// 工具注册表：按名称存储 Arc<dyn DynTool>（BTreeMap 保证 schema 顺序稳定）
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn DynTool>>,
    extra_mutating: HashSet<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Tool>(&mut self, tool: T) {
        let name = tool.name().to_string();
        let schema = schema_of::<T::Args>();
        self.tools.insert(name, Arc::new(Typed { tool, schema }));
    }

    /// 配置里额外标记为变更类的工具名
    pub fn mark_mutating<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_mutating.extend(names.into_iter().map(Into::into));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DynTool>> {
        self.tools.get(name).cloned()
    }

    pub fn is_mutating(&self, name: &str) -> bool {
        self.extra_mutating.contains(name)
            || self.tools.get(name).map(|t| t.is_mutating()).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .values()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }
}
