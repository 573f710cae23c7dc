//! Adapter for a Claude-style CLI using the stable-JSON response strategy
//! (spec §4.2: "parse once, validate by schema, extract fields").

use async_trait::async_trait;
use serde::Deserialize;

use crate::adapter::{Adapter, AICallOptions, AIResponse};
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ClaudeResult {
    #[serde(default)]
    result: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<ClaudeUsage>,
}

pub struct ClaudeCliAdapter;

#[async_trait]
impl Adapter for ClaudeCliAdapter {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn cli_command(&self) -> &'static str {
        "claude"
    }

    fn build_args(&self, options: &AICallOptions) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            "--output-format".to_string(),
            "json".to_string(),
        ];
        if let Some(model) = &options.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(max_turns) = options.max_turns {
            args.push("--max-turns".to_string());
            args.push(max_turns.to_string());
        }
        if let Some(system_prompt) = &options.system_prompt {
            args.push("--system-prompt".to_string());
            args.push(system_prompt.clone());
        }
        args
    }

    fn parse_response(&self, stdout: &[u8], wall_ms: u64, exit_code: i32) -> Result<AIResponse> {
        let text = String::from_utf8_lossy(stdout);
        let parsed: ClaudeResult = serde_json::from_str(text.trim())
            .map_err(|e| Error::Serialization(e))?;

        if parsed.result.is_empty() {
            return Err(Error::Config("empty result field".to_string()));
        }

        let usage = parsed.usage.unwrap_or(ClaudeUsage {
            input_tokens: 0,
            output_tokens: 0,
            cache_read_input_tokens: 0,
            cache_creation_input_tokens: 0,
        });

        Ok(AIResponse {
            text: parsed.result,
            model: parsed.model,
            input_tokens: usage
                .input_tokens
                .saturating_sub(usage.cache_read_input_tokens),
            output_tokens: usage.output_tokens,
            cache_read_tokens: usage.cache_read_input_tokens,
            cache_creation_tokens: usage.cache_creation_input_tokens,
            duration_ms: wall_ms,
            exit_code,
            raw: serde_json::from_str(text.trim()).unwrap_or(serde_json::Value::Null),
        })
    }

    fn install_instructions(&self) -> String {
        "install the Claude CLI: npm install -g @anthropic-ai/claude-code".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stable_json_response() {
        let adapter = ClaudeCliAdapter;
        let stdout = br#"{"result":"hello world","model":"claude-3","usage":{"input_tokens":100,"output_tokens":10,"cache_read_input_tokens":30,"cache_creation_input_tokens":0}}"#;
        let response = adapter.parse_response(stdout, 500, 0).unwrap();
        assert_eq!(response.text, "hello world");
        assert_eq!(response.input_tokens, 70);
        assert_eq!(response.cache_read_tokens, 30);
    }

    #[test]
    fn test_parse_empty_result_is_error() {
        let adapter = ClaudeCliAdapter;
        let stdout = br#"{"result":"","model":"claude-3"}"#;
        assert!(adapter.parse_response(stdout, 0, 0).is_err());
    }

    #[test]
    fn test_parse_invalid_json_is_error() {
        let adapter = ClaudeCliAdapter;
        assert!(adapter.parse_response(b"not json", 0, 0).is_err());
    }

    #[test]
    fn test_build_args_includes_model_and_max_turns() {
        let adapter = ClaudeCliAdapter;
        let mut options = AICallOptions::new("do the thing");
        options.model = Some("claude-3".to_string());
        options.max_turns = Some(3);
        let args = adapter.build_args(&options);
        assert!(args.contains(&"--model".to_string()));
        assert!(args.contains(&"claude-3".to_string()));
        assert!(args.contains(&"--max-turns".to_string()));
    }
}
