//! Production [`crate::ExtractionOracle`]: posts a changelog document to an
//! OpenAI-compatible chat-completions endpoint with a forced tool call,
//! mirroring `vowstar-llm-git`'s `api.rs` (`ApiRequest`/`ApiResponse`,
//! `tool_choice` forcing a single structured function call) but with the
//! tool schema swapped for a list of breaking changes instead of a commit
//! summary.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use pyshift_knowledge::{BreakingChange, BreakingChangeKind, Confidence, MatchSpec, ReplacementSpec};

use crate::{retry_with_backoff, AcquireError, RetryPolicy, SourceDocument};

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct FunctionParameters {
    #[serde(rename = "type")]
    param_type: String,
    properties: serde_json::Value,
    required: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Function {
    name: String,
    description: String,
    parameters: FunctionParameters,
}

#[derive(Debug, Serialize)]
struct Tool {
    #[serde(rename = "type")]
    tool_type: String,
    function: Function,
}

#[derive(Debug, Serialize)]
struct ToolChoice {
    #[serde(rename = "type")]
    choice_type: String,
    function: ToolChoiceFunction,
}

#[derive(Debug, Serialize)]
struct ToolChoiceFunction {
    name: String,
}

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    tools: Vec<Tool>,
    tool_choice: ToolChoice,
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

/// The JSON shape the oracle is asked to emit: a flat list of candidate
/// breaking changes, each restricted to the subset of `ReplacementSpec` an
/// oracle can plausibly infer from prose (method/attribute rename, import
/// move, or a free-form template for anything shapelier).
#[derive(Debug, Deserialize)]
struct ExtractedChanges {
    changes: Vec<ExtractedChange>,
}

#[derive(Debug, Deserialize)]
struct ExtractedChange {
    kind: String,
    symbol: String,
    replacement_kind: String,
    replacement_value: String,
    confidence: String,
    explanation: String,
}

/// Calls a chat-completions endpoint (e.g. a self-hosted or vendor
/// OpenAI-compatible gateway) with the document's text and a forced
/// `emit_breaking_changes` tool call, then maps the structured result onto
/// [`BreakingChange`]. A malformed or missing tool call degrades to an
/// empty list — oracle unavailability/garbage output is a resource error
/// the acquisition pipeline treats as "zero changes from this source", not
/// a hard failure of the whole session (spec §7 "Resource errors").
pub struct HttpExtractionOracle {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: String,
    retry: RetryPolicy,
}

impl HttpExtractionOracle {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(RetryPolicy::default().timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client for HttpExtractionOracle");
        Self { client, endpoint: endpoint.into(), model: model.into(), api_key: api_key.into(), retry: RetryPolicy::default() }
    }

    fn tool() -> Tool {
        Tool {
            tool_type: "function".to_string(),
            function: Function {
                name: "emit_breaking_changes".to_string(),
                description: "Record every breaking API change described in this document.".to_string(),
                parameters: FunctionParameters {
                    param_type: "object".to_string(),
                    properties: serde_json::json!({
                        "changes": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "kind": {"type": "string"},
                                    "symbol": {"type": "string"},
                                    "replacement_kind": {"type": "string"},
                                    "replacement_value": {"type": "string"},
                                    "confidence": {"type": "string"},
                                    "explanation": {"type": "string"},
                                },
                                "required": ["kind", "symbol", "replacement_kind", "replacement_value", "confidence"],
                            },
                        },
                    }),
                    required: vec!["changes".to_string()],
                },
            },
        }
    }
}

impl crate::ExtractionOracle for HttpExtractionOracle {
    fn extract(
        &self,
        library: &str,
        from_version: &str,
        to_version: &str,
        document: &SourceDocument,
    ) -> Result<Vec<BreakingChange>, AcquireError> {
        let prompt = format!(
            "Library: {library}\nUpgrade: {from_version} -> {to_version}\nSource: {}\n\n{}",
            document.url,
            document.text()
        );
        let request = ApiRequest {
            model: self.model.clone(),
            max_tokens: 4096,
            temperature: 0.0,
            tools: vec![Self::tool()],
            tool_choice: ToolChoice { choice_type: "function".to_string(), function: ToolChoiceFunction { name: "emit_breaking_changes".to_string() } },
            messages: vec![Message { role: "user".to_string(), content: prompt }],
        };

        let call = || -> Result<ApiResponse, AcquireError> {
            let response = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .map_err(|err| AcquireError::Oracle { message: err.to_string() })?;
            if !response.status().is_success() {
                return Err(AcquireError::Oracle { message: format!("oracle responded with status {}", response.status()) });
            }
            response.json::<ApiResponse>().map_err(|err| AcquireError::Oracle { message: err.to_string() })
        };

        let response = retry_with_backoff(self.retry, call)?;
        let Some(choice) = response.choices.into_iter().next() else {
            tracing::warn!(url = %document.url, "oracle returned no choices; treating as zero changes");
            return Ok(Vec::new());
        };
        let Some(tool_call) = choice.message.tool_calls.into_iter().next() else {
            tracing::warn!(url = %document.url, "oracle did not call emit_breaking_changes; treating as zero changes");
            return Ok(Vec::new());
        };

        let extracted: ExtractedChanges = match serde_json::from_str(&tool_call.function.arguments) {
            Ok(extracted) => extracted,
            Err(err) => {
                tracing::warn!(url = %document.url, %err, "oracle tool call arguments did not parse; treating as zero changes");
                return Ok(Vec::new());
            }
        };

        Ok(extracted
            .changes
            .into_iter()
            .filter_map(|change| to_breaking_change(&change, &document.url, document.text()))
            .collect())
    }
}

fn to_breaking_change(extracted: &ExtractedChange, source_url: &str, source_excerpt: String) -> Option<BreakingChange> {
    let kind = parse_kind(&extracted.kind)?;
    let confidence = match extracted.confidence.to_lowercase().as_str() {
        "high" => Confidence::High,
        "medium" => Confidence::Medium,
        _ => Confidence::Low,
    };
    let replacement = match extracted.replacement_kind.as_str() {
        "method_rename" => ReplacementSpec::MethodRename { new_method: extracted.replacement_value.clone() },
        "attribute_rename" => ReplacementSpec::AttributeRename { new_attr: extracted.replacement_value.clone() },
        "rename" => ReplacementSpec::Rename { new_symbol: extracted.replacement_value.clone() },
        "import_move" => ReplacementSpec::ImportMove { new_module: extracted.replacement_value.clone() },
        _ => ReplacementSpec::Template { template: extracted.replacement_value.clone() },
    };
    let excerpt: String = source_excerpt.chars().take(280).collect();
    let mut change = BreakingChange::new(
        format!("{}::{}", extracted.symbol, extracted.replacement_kind),
        kind,
        MatchSpec::symbol(extracted.symbol.clone()),
        replacement,
        confidence,
    );
    change.explanation = extracted.explanation.clone();
    change.source_url = source_url.to_string();
    change.source_excerpt = excerpt;
    Some(change)
}

fn parse_kind(raw: &str) -> Option<BreakingChangeKind> {
    Some(match raw {
        "symbol_rename" => BreakingChangeKind::SymbolRename,
        "attribute_rename" => BreakingChangeKind::AttributeRename,
        "method_rename" => BreakingChangeKind::MethodRename,
        "function_signature" => BreakingChangeKind::FunctionSignature,
        "decorator_shape" => BreakingChangeKind::DecoratorShape,
        "class_config_restructure" => BreakingChangeKind::ClassConfigRestructure,
        "import_move" => BreakingChangeKind::ImportMove,
        "argument_rename" => BreakingChangeKind::ArgumentRename,
        "argument_removed" => BreakingChangeKind::ArgumentRemoved,
        "behavior_change" => BreakingChangeKind::BehaviorChange,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_kind_rejects_unknown_strings() {
        assert!(parse_kind("not-a-kind").is_none());
        assert_eq!(parse_kind("method_rename"), Some(BreakingChangeKind::MethodRename));
    }

    #[test]
    fn to_breaking_change_maps_confidence_and_replacement() {
        let extracted = ExtractedChange {
            kind: "method_rename".to_string(),
            symbol: "pydantic.BaseModel.dict".to_string(),
            replacement_kind: "method_rename".to_string(),
            replacement_value: "model_dump".to_string(),
            confidence: "medium".to_string(),
            explanation: "renamed in 2.0".to_string(),
        };
        let change = to_breaking_change(&extracted, "https://example/changelog", "some excerpt".to_string()).unwrap();
        assert_eq!(change.confidence, Confidence::Medium);
        assert!(matches!(change.replacement, ReplacementSpec::MethodRename { ref new_method } if new_method == "model_dump"));
    }
}
