//! Tools the gateway itself exposes. These answer from manager and catalog
//! snapshots; no upstream call is ever made on this path.

use std::borrow::Cow;
use std::sync::Arc;

use muster_core::Catalog;
use muster_core::CatalogDetail;
use muster_core::UpstreamManager;
use rmcp::model::CallToolResult;
use rmcp::model::ErrorData;
use rmcp::model::JsonObject;
use rmcp::model::Tool;
use serde_json::Value;
use serde_json::json;

pub const META_LIST_TOOLS: &str = "list_tools";
pub const META_DESCRIBE_TOOL: &str = "describe_tool";
pub const META_LIST_UPSTREAMS: &str = "list_upstreams";
pub const META_RESTART_UPSTREAM: &str = "restart_upstream";

pub fn is_meta_tool(name: &str) -> bool {
    matches!(
        name,
        META_LIST_TOOLS | META_DESCRIBE_TOOL | META_LIST_UPSTREAMS | META_RESTART_UPSTREAM
    )
}

fn schema(value: Value) -> Arc<JsonObject> {
    let object = serde_json::from_value(value).unwrap_or_default();
    Arc::new(object)
}

fn meta_tool(name: &'static str, description: &'static str, input: Value) -> Tool {
    Tool {
        name: Cow::Borrowed(name),
        title: None,
        description: Some(Cow::Borrowed(description)),
        input_schema: schema(input),
        output_schema: None,
        annotations: None,
        execution: None,
        icons: None,
        meta: None,
    }
}

pub fn meta_tools() -> Vec<Tool> {
    vec![
        meta_tool(
            META_LIST_TOOLS,
            "List every tool the gateway aggregates, with its upstream and schema.",
            json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        ),
        meta_tool(
            META_DESCRIBE_TOOL,
            "Describe one aggregated tool by its public name.",
            json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Public tool name" }
                },
                "required": ["name"],
                "additionalProperties": false
            }),
        ),
        meta_tool(
            META_LIST_UPSTREAMS,
            "List configured upstream servers and their lifecycle state.",
            json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        ),
        meta_tool(
            META_RESTART_UPSTREAM,
            "Restart one upstream server by name.",
            json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Upstream name" }
                },
                "required": ["name"],
                "additionalProperties": false
            }),
        ),
    ]
}

fn string_arg(arguments: Option<&Value>, key: &str) -> Result<String, ErrorData> {
    arguments
        .and_then(|args| args.get(key))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ErrorData::invalid_params(format!("missing `{key}` argument"), None))
}

fn success(payload: Value) -> CallToolResult {
    CallToolResult {
        content: Vec::new(),
        structured_content: Some(payload),
        is_error: Some(false),
        meta: None,
    }
}

/// Handles a meta-tool invocation; `None` means the name is not a meta-tool
/// and the caller should fall through to catalog routing.
pub async fn handle_meta_tool(
    manager: &UpstreamManager,
    catalog: &Catalog,
    name: &str,
    arguments: Option<&Value>,
) -> Option<Result<CallToolResult, ErrorData>> {
    match name {
        META_LIST_TOOLS => {
            let tools: Vec<Value> = catalog
                .tools()
                .iter()
                .map(|item| {
                    let schema = match &item.detail {
                        CatalogDetail::Tool { tool } => {
                            serde_json::to_value(tool.input_schema.as_ref()).unwrap_or_default()
                        }
                        _ => Value::Null,
                    };
                    json!({
                        "name": item.public_name,
                        "upstream": item.upstream,
                        "native_name": item.native_name,
                        "description": item.description,
                        "input_schema": schema,
                    })
                })
                .collect();
            Some(Ok(success(json!({
                "tools": tools,
                "catalog_version": catalog.version(),
            }))))
        }
        META_DESCRIBE_TOOL => {
            let target = match string_arg(arguments, "name") {
                Ok(target) => target,
                Err(err) => return Some(Err(err)),
            };
            match catalog.resolve(&target) {
                Some(item) => {
                    let schema = match &item.detail {
                        CatalogDetail::Tool { tool } => {
                            serde_json::to_value(tool.input_schema.as_ref()).unwrap_or_default()
                        }
                        _ => Value::Null,
                    };
                    Some(Ok(success(json!({
                        "name": item.public_name,
                        "kind": item.detail.kind().as_str(),
                        "upstream": item.upstream,
                        "native_name": item.native_name,
                        "description": item.description,
                        "input_schema": schema,
                    }))))
                }
                None => Some(Err(ErrorData::invalid_params(
                    format!("no catalog item named `{target}`"),
                    None,
                ))),
            }
        }
        META_LIST_UPSTREAMS => {
            let upstreams: Vec<Value> = manager
                .list()
                .await
                .into_iter()
                .map(|info| {
                    json!({
                        "name": info.name,
                        "state": info.display_state,
                        "consecutive_failures": info.status.consecutive_failures,
                        "message": info.status.message,
                    })
                })
                .collect();
            Some(Ok(success(json!({ "upstreams": upstreams }))))
        }
        META_RESTART_UPSTREAM => {
            let target = match string_arg(arguments, "name") {
                Ok(target) => target,
                Err(err) => return Some(Err(err)),
            };
            if manager.restart(&target).await {
                Some(Ok(success(json!({ "restarted": target }))))
            } else {
                Some(Err(ErrorData::invalid_params(
                    format!("no upstream named `{target}`"),
                    None,
                )))
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::is_meta_tool;
    use super::meta_tools;

    #[test]
    fn meta_tool_names_are_recognized() {
        for tool in meta_tools() {
            assert!(is_meta_tool(tool.name.as_ref()));
        }
        assert!(!is_meta_tool("echo"));
    }

    #[test]
    fn schemas_are_objects() {
        for tool in meta_tools() {
            assert_eq!(
                tool.input_schema.get("type").and_then(|v| v.as_str()),
                Some("object"),
                "{} schema must be an object",
                tool.name
            );
        }
    }
}
