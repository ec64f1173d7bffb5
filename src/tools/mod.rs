//! Tool trait and registry
//!
//! Tools are small, stateless adapters the agent may call by name.
//! Database tools only ever read; the converter calls exchangerate-api.com.

use crate::config::Config;
use crate::error::AssistantError;
use crate::models::{ToolInput, ToolOutput, ToolParam, ToolSpec};
use crate::Result;
use serde_json::{json, Map, Value};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

pub mod calculator;
pub mod currency;
pub mod query;
pub mod schema;

pub use calculator::{calculate, calculate_rounded, CalculatorTool};
pub use currency::CurrencyConversionTool;
pub use query::ExecuteQueryTool;
pub use schema::ListTablesTool;

/// Trait for a single tool
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn inputs(&self) -> Vec<ToolParam>;
    fn output_type(&self) -> &'static str;
    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput>;

    /// Function spec in the JSON-schema shape chat-completions APIs expect.
    fn spec(&self) -> ToolSpec {
        build_spec(self.name(), self.description(), &self.inputs())
    }
}

pub(crate) fn build_spec(name: &str, description: &str, inputs: &[ToolParam]) -> ToolSpec {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for param in inputs {
        let mut prop = json!({
            "type": param.param_type,
            "description": param.description,
        });
        if param.nullable {
            prop["nullable"] = json!(true);
        } else {
            required.push(json!(param.name));
        }
        properties.insert(param.name.to_string(), prop);
    }

    ToolSpec {
        name: name.to_string(),
        description: description.to_string(),
        parameters: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}

/// Tool registry for looking up and executing tools. Ordered by name so
/// prompts and specs render deterministically.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Like [`get`](Self::get), but a missing tool is an error.
    pub fn require(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.get(name)
            .ok_or_else(|| AssistantError::ToolNotFound(name.to_string()))
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn tools(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a tool's inputs the way the system prompt lists them.
pub fn describe_inputs(inputs: &[ToolParam]) -> Value {
    let mut map = Map::new();
    for param in inputs {
        let mut entry = json!({
            "type": param.param_type,
            "description": param.description,
        });
        if param.nullable {
            entry["nullable"] = json!(true);
        }
        map.insert(param.name.to_string(), entry);
    }
    Value::Object(map)
}

/// Create the registry with the four assistant tools.
///
/// The currency converter is left out when no API key is configured.
pub fn create_default_registry(pool: SqlitePool, config: &Config) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(ListTablesTool::new(pool.clone())));
    registry.register(Arc::new(ExecuteQueryTool::new(
        pool,
        config.allowed_tables.clone(),
    )));
    registry.register(Arc::new(CalculatorTool));

    match config.currency_api_key.as_deref() {
        Some(key) => match CurrencyConversionTool::new(key, &config.currency_api_base) {
            Ok(tool) => registry.register(Arc::new(tool)),
            Err(e) => warn!(error = %e, "Currency converter disabled"),
        },
        None => warn!("CURRENCY_API_KEY not set; currency converter disabled"),
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::seeded_pool;

    #[test]
    fn test_spec_marks_nullable_inputs_optional() {
        let spec = build_spec(
            "currency_converter",
            "Convert",
            &[
                ToolParam {
                    name: "base_currency",
                    param_type: "string",
                    description: "Base",
                    nullable: false,
                },
                ToolParam {
                    name: "amount",
                    param_type: "number",
                    description: "Amount",
                    nullable: true,
                },
            ],
        );

        assert_eq!(spec.parameters["required"], json!(["base_currency"]));
        assert_eq!(spec.parameters["properties"]["amount"]["nullable"], json!(true));
    }

    #[tokio::test]
    async fn test_default_registry_without_currency_key() {
        let pool = seeded_pool().await;
        let registry = create_default_registry(pool, &Config::default());
        assert_eq!(registry.list(), vec!["calculator", "execute_query", "list_tables"]);
    }

    #[tokio::test]
    async fn test_default_registry_with_currency_key() {
        let pool = seeded_pool().await;
        let config = Config {
            currency_api_key: Some("key".to_string()),
            ..Config::default()
        };
        let registry = create_default_registry(pool, &config);
        assert!(registry.get("currency_converter").is_some());
        assert_eq!(registry.specs().len(), 4);
    }

    #[test]
    fn test_require_unknown_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CalculatorTool));

        assert!(registry.require("calculator").is_ok());
        let err = registry.require("web_search").err().unwrap();
        assert!(matches!(err, AssistantError::ToolNotFound(ref name) if name == "web_search"));
        assert_eq!(err.to_string(), "Tool not found: web_search");
    }
}
