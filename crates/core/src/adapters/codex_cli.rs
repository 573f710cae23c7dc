//! Adapter for a Codex-style CLI using the NDJSON event-stream response
//! strategy (spec §4.2: split by newline, discard non-JSON lines,
//! accumulate text deltas, read the final usage record).

use async_trait::async_trait;
use serde_json::Value;

use crate::adapter::{dedupe_preserving_order, Adapter, AICallOptions, AIResponse};
use crate::error::{Error, Result};

pub struct CodexCliAdapter;

#[async_trait]
impl Adapter for CodexCliAdapter {
    fn name(&self) -> &'static str {
        "codex"
    }

    fn cli_command(&self) -> &'static str {
        "codex"
    }

    fn build_args(&self, options: &AICallOptions) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "--json".to_string(),
            "--skip-git-repo-check".to_string(),
        ];
        if let Some(model) = &options.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args
    }

    fn compose_stdin_input(&self, options: &AICallOptions) -> Vec<u8> {
        // Codex-style CLIs have no dedicated system-prompt flag: wrap it
        // in delimiters and concatenate with the user prompt (spec §4.2).
        match &options.system_prompt {
            Some(system) => format!(
                "<system-instructions>\n{system}\n</system-instructions>\n\n{}",
                options.prompt
            )
            .into_bytes(),
            None => options.prompt.clone().into_bytes(),
        }
    }

    fn parse_response(&self, stdout: &[u8], wall_ms: u64, exit_code: i32) -> Result<AIResponse> {
        let text = String::from_utf8_lossy(stdout);
        let mut fragments = Vec::new();
        let mut model = None;
        let mut input_tokens = 0u64;
        let mut output_tokens = 0u64;
        let mut cache_read_tokens = 0u64;
        let mut cache_creation_tokens = 0u64;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(event) = serde_json::from_str::<Value>(line) else {
                continue;
            };

            match event.get("type").and_then(Value::as_str) {
                Some("agent_message_delta") | Some("item.completed") => {
                    if let Some(delta) = event
                        .get("delta")
                        .and_then(Value::as_str)
                        .or_else(|| event.get("text").and_then(Value::as_str))
                    {
                        fragments.push(delta.to_string());
                    }
                }
                Some("token_count") | Some("usage") => {
                    if let Some(usage) = event.get("usage").or(Some(&event)) {
                        let raw_input = usage
                            .get("input_tokens")
                            .and_then(Value::as_u64)
                            .unwrap_or(0);
                        cache_read_tokens = usage
                            .get("cached_input_tokens")
                            .and_then(Value::as_u64)
                            .unwrap_or(0);
                        input_tokens = raw_input.saturating_sub(cache_read_tokens);
                        output_tokens = usage
                            .get("output_tokens")
                            .and_then(Value::as_u64)
                            .unwrap_or(0);
                        cache_creation_tokens = usage
                            .get("cache_creation_tokens")
                            .and_then(Value::as_u64)
                            .unwrap_or(0);
                    }
                }
                _ => {}
            }

            if model.is_none() {
                model = event
                    .get("model")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
        }

        let fragments = dedupe_preserving_order(fragments);
        let joined = fragments.join("");

        if joined.is_empty() {
            return Err(Error::Config("no text extracted from event stream".to_string()));
        }

        Ok(AIResponse {
            text: joined,
            model,
            input_tokens,
            output_tokens,
            cache_read_tokens,
            cache_creation_tokens,
            duration_ms: wall_ms,
            exit_code,
            raw: serde_json::Value::Null,
        })
    }

    fn install_instructions(&self) -> String {
        "install the Codex CLI: npm install -g @openai/codex".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ndjson_accumulates_deltas() {
        let adapter = CodexCliAdapter;
        let stdout = b"{\"type\":\"agent_message_delta\",\"delta\":\"Hello\"}\n{\"type\":\"agent_message_delta\",\"delta\":\" world\"}\n{\"type\":\"usage\",\"input_tokens\":100,\"cached_input_tokens\":20,\"output_tokens\":5}\n";
        let response = adapter.parse_response(stdout, 10, 0).unwrap();
        assert_eq!(response.text, "Hello world");
        assert_eq!(response.input_tokens, 80);
        assert_eq!(response.cache_read_tokens, 20);
    }

    #[test]
    fn test_parse_discards_non_json_lines() {
        let adapter = CodexCliAdapter;
        let stdout = b"not json at all\n{\"type\":\"agent_message_delta\",\"delta\":\"ok\"}\n";
        let response = adapter.parse_response(stdout, 0, 0).unwrap();
        assert_eq!(response.text, "ok");
    }

    #[test]
    fn test_parse_empty_stream_is_error() {
        let adapter = CodexCliAdapter;
        assert!(adapter.parse_response(b"", 0, 0).is_err());
    }

    #[test]
    fn test_compose_stdin_wraps_system_prompt() {
        let adapter = CodexCliAdapter;
        let mut options = AICallOptions::new("do the thing");
        options.system_prompt = Some("be terse".to_string());
        let stdin = adapter.compose_stdin_input(&options);
        let s = String::from_utf8(stdin).unwrap();
        assert!(s.starts_with("<system-instructions>"));
        assert!(s.contains("be terse"));
        assert!(s.contains("do the thing"));
    }
}
