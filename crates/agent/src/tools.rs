use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Map, Value};
use tempra_core::ChatMessage;
use tracing::{info, warn};

use crate::llm::{complete_within, CompletionGateway, CompletionRequest};
use crate::parse::parse_string_list;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Boolean,
    DateTime,
    Date,
    StringList,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::DateTime => "string (ISO 8601 date-time with date)",
            Self::Date => "string (YYYY-MM-DD)",
            Self::StringList => "array of strings",
        }
    }
}

/// Values the loop fills in itself. Never shown to the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImplicitParam {
    AccessToken,
    UserId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: ParamType,
    pub required: bool,
    pub implicit: Option<ImplicitParam>,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamType, description: &'static str) -> Self {
        Self { name, description, kind, required: true, implicit: None }
    }

    pub const fn optional(name: &'static str, kind: ParamType, description: &'static str) -> Self {
        Self { name, description, kind, required: false, implicit: None }
    }

    pub const fn implicit(name: &'static str, source: ImplicitParam) -> Self {
        Self {
            name,
            description: "",
            kind: ParamType::String,
            required: true,
            implicit: Some(source),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
}

impl ToolSpec {
    pub fn visible_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(|param| param.implicit.is_none())
    }

    pub fn needs(&self, source: ImplicitParam) -> bool {
        self.params.iter().any(|param| param.implicit == Some(source))
    }

    /// Parameter schema as shown to the model, implicit parameters omitted.
    pub fn prompt_schema(&self) -> Value {
        let params: Map<String, Value> = self
            .visible_params()
            .map(|param| {
                (
                    param.name.to_owned(),
                    json!({
                        "type": param.kind.as_str(),
                        "required": param.required,
                        "description": param.description,
                    }),
                )
            })
            .collect();
        json!({ "name": self.name, "description": self.description, "parameters": params })
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> &'static ToolSpec;

    fn name(&self) -> &'static str {
        self.spec().name
    }

    async fn execute(&self, input: Value) -> Result<Value>;
}

/// Per-run values injected into implicit parameters.
#[derive(Clone, Debug)]
pub struct RunContext {
    pub user_id: String,
    pub access_token: Option<SecretString>,
}

impl RunContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), access_token: None }
    }

    pub fn with_access_token(mut self, token: SecretString) -> Self {
        self.access_token = Some(token);
        self
    }

    fn value_for(&self, source: ImplicitParam) -> Option<Value> {
        match source {
            ImplicitParam::UserId => Some(Value::String(self.user_id.clone())),
            ImplicitParam::AccessToken => {
                self.access_token.as_ref().map(|token| Value::String(token.expose_secret().to_owned()))
            }
        }
    }

    /// Fills every implicit parameter of `spec`, overwriting anything the model supplied.
    pub fn inject(&self, spec: &ToolSpec, args: Value) -> Value {
        let mut object = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for param in spec.params {
            if let Some(source) = param.implicit {
                match self.value_for(source) {
                    Some(value) => object.insert(param.name.to_owned(), value),
                    None => object.remove(param.name),
                };
            }
        }
        Value::Object(object)
    }
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn specs(&self) -> Vec<&'static ToolSpec> {
        self.tools.values().map(|tool| tool.spec()).collect()
    }

    pub fn needs(&self, source: ImplicitParam) -> bool {
        self.specs().iter().any(|spec| spec.needs(source))
    }

    /// Registry restricted to `names`, in catalog order. Unknown names are skipped.
    pub fn subset<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut tools = BTreeMap::new();
        for name in names {
            if let Some(tool) = self.tools.get(name) {
                tools.insert(name.to_owned(), Arc::clone(tool));
            }
        }
        Self { tools }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Narrows the catalog to the tools a request plausibly needs.
pub struct ToolSelector {
    gateway: Arc<dyn CompletionGateway>,
    timeout: Duration,
}

impl ToolSelector {
    pub fn new(gateway: Arc<dyn CompletionGateway>, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }

    /// Never returns an empty registry when `catalog` is non-empty.
    pub async fn select(
        &self,
        message: &str,
        catalog: &ToolRegistry,
        recent_history: &[ChatMessage],
    ) -> ToolRegistry {
        let request = CompletionRequest::new(selection_prompt(message, catalog, recent_history))
            .with_max_tokens(200)
            .with_temperature(0.0);

        let reply = match complete_within(self.gateway.as_ref(), request, self.timeout).await {
            Ok(reply) => reply,
            Err(error) => {
                warn!(
                    event_name = "agent.tool_selection.failed",
                    error = %error,
                    "tool selection failed, using full catalog"
                );
                return catalog.clone();
            }
        };

        let Some(names) = parse_string_list(&reply) else {
            warn!(
                event_name = "agent.tool_selection.unparseable",
                "tool selection reply was not a JSON array, using full catalog"
            );
            return catalog.clone();
        };

        let selected = catalog.subset(names.iter().map(String::as_str));
        if selected.is_empty() {
            return catalog.clone();
        }

        info!(
            event_name = "agent.tool_selection.narrowed",
            selected = ?selected.names(),
            catalog_size = catalog.len(),
            "narrowed tool catalog"
        );
        selected
    }
}

fn selection_prompt(
    message: &str,
    catalog: &ToolRegistry,
    recent_history: &[ChatMessage],
) -> Vec<ChatMessage> {
    let listing: Vec<String> = catalog
        .specs()
        .iter()
        .map(|spec| format!("- {}: {}", spec.name, spec.description))
        .collect();

    let mut messages = vec![ChatMessage::system(format!(
        "You choose which tools are needed to fulfil the user's request.\n\
         Available tools:\n{}\n\n\
         Reply with only a JSON array of tool names, for example [\"search_email\", \"add_todo\"]. \
         Include every tool that may be needed and nothing else.",
        listing.join("\n")
    ))];
    messages.extend(recent_history.iter().filter(|entry| !entry.is_blank()).cloned());
    messages.push(ChatMessage::user(message));
    messages
}
