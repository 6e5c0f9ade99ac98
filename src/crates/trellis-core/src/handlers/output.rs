//! Output node: the terminal node producing the run's final text.
//!
//! `combine` concatenates the selected source outputs with optional
//! intro/outro text; `synthesis` makes one LLM call over them.

use super::{NodeHandler, NodeOutcome};
use crate::error::{EngineError, Result};
use crate::llm::ChatMessage;
use crate::runtime::ExecutionContext;
use crate::workflow::{Node, NodeKind, OutputData, OutputMode};
use async_trait::async_trait;
use serde_json::json;

const SYNTHESIS_PROMPT: &str = "Synthesize the inputs below into a single coherent response. \
Merge overlapping points, resolve contradictions explicitly, and keep the result focused.";

pub struct OutputHandler;

impl OutputHandler {
    /// The texts this node aggregates: the configured sources' recorded
    /// outputs, or the arrival input when none are configured.
    fn collect_sources(ctx: &ExecutionContext, data: &OutputData) -> Vec<(String, String)> {
        if data.sources.is_empty() {
            return vec![("input".to_string(), ctx.current_input.clone())];
        }
        data.sources
            .iter()
            .map(|id| {
                (
                    id.clone(),
                    ctx.outputs.get(id).cloned().unwrap_or_default(),
                )
            })
            .collect()
    }

    fn combine(data: &OutputData, sources: &[(String, String)]) -> String {
        let mut parts = Vec::new();
        if let Some(intro) = &data.intro_text {
            parts.push(intro.clone());
        }
        parts.extend(sources.iter().map(|(_, text)| text.clone()));
        if let Some(outro) = &data.outro_text {
            parts.push(outro.clone());
        }
        parts.join("\n\n")
    }

    fn apply_template(data: &OutputData, text: String, input: &str) -> String {
        match &data.template {
            Some(template) => template
                .replace("{output}", &text)
                .replace("{input}", input),
            None => text,
        }
    }
}

#[async_trait]
impl NodeHandler for OutputHandler {
    async fn execute(&self, ctx: &mut ExecutionContext, node: &Node) -> Result<NodeOutcome> {
        let NodeKind::Output(data) = &node.kind else {
            return Err(EngineError::Extension(
                "output handler invoked for a non-output node".to_string(),
            ));
        };

        let sources = Self::collect_sources(ctx, data);
        let text = match data.mode {
            OutputMode::Combine => Self::combine(data, &sources),
            OutputMode::Synthesis => {
                let model = ctx.model_for(data.model.as_deref());
                let mut body = String::new();
                for (name, text) in &sources {
                    body.push_str(&format!("## {}\n{}\n\n", name, text));
                }
                let messages = vec![
                    ChatMessage::system(SYNTHESIS_PROMPT),
                    ChatMessage::user(body),
                ];
                let options = ctx
                    .chat_options()
                    .with_on_token(ctx.token_callback_for(&node.id));
                let plan = ctx.retry_plan_for(node);
                let (result, trace) = ctx
                    .chat_with_retry(&node.id, &plan, &model, &messages, &options)
                    .await;
                match result {
                    Ok(outcome) => {
                        ctx.record_usage(&node.id, &model, outcome.usage);
                        outcome.content
                    }
                    Err(e) => {
                        return Err(ctx.node_failure(node, &e, Some(trace)).into());
                    }
                }
            }
        };

        let output = Self::apply_template(data, text, &ctx.current_input);
        Ok(NodeOutcome::terminal(output)
            .with_metadata(json!({ "format": data.format.clone(), "mode": data.mode })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_joins_with_intro_and_outro() {
        let data = OutputData {
            intro_text: Some("Results:".into()),
            outro_text: Some("Done.".into()),
            ..Default::default()
        };
        let combined = OutputHandler::combine(
            &data,
            &[("a".into(), "one".into()), ("b".into(), "two".into())],
        );
        assert_eq!(combined, "Results:\n\none\n\ntwo\n\nDone.");
    }

    #[test]
    fn template_substitutes_placeholders() {
        let data = OutputData {
            template: Some("<{input}> => {output}".into()),
            ..Default::default()
        };
        let text = OutputHandler::apply_template(&data, "result".into(), "query");
        assert_eq!(text, "<query> => result");
    }
}
