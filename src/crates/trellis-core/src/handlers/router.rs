//! Router node: asks the model to pick one declared route.
//!
//! The routing call enumerates routes by id/label/description and expects a
//! bare route id back. Mis-responses fall back deterministically: exact id,
//! case-insensitive id, case-insensitive label, the route declared as
//! `default`, then the first route.

use super::{NodeHandler, NodeOutcome};
use crate::error::{EngineError, Result};
use crate::llm::ChatMessage;
use crate::runtime::ExecutionContext;
use crate::workflow::{Node, NodeKind, Route};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

pub struct RouterHandler;

impl RouterHandler {
    fn routing_prompt(extra: Option<&str>, routes: &[Route]) -> String {
        let mut prompt = String::from(
            "You are a router. Select the single best route for the user input.\n",
        );
        if let Some(extra) = extra {
            prompt.push_str(extra);
            prompt.push('\n');
        }
        prompt.push_str("Routes:\n");
        for route in routes {
            match &route.description {
                Some(description) => {
                    prompt.push_str(&format!(
                        "- {}: {} ({})\n",
                        route.id, route.label, description
                    ));
                }
                None => prompt.push_str(&format!("- {}: {}\n", route.id, route.label)),
            }
        }
        prompt.push_str("Respond with the route id only.");
        prompt
    }

    /// Deterministic route resolution for (possibly malformed) responses.
    fn resolve_route<'a>(response: &str, routes: &'a [Route]) -> &'a Route {
        let trimmed = response.trim();

        if let Some(route) = routes.iter().find(|r| r.id == trimmed) {
            return route;
        }
        if let Some(route) = routes.iter().find(|r| r.id.eq_ignore_ascii_case(trimmed)) {
            return route;
        }
        if let Some(route) = routes
            .iter()
            .find(|r| r.label.eq_ignore_ascii_case(trimmed))
        {
            warn!(response = trimmed, route = %route.id, "router matched by label, not id");
            return route;
        }
        if let Some(route) = routes.iter().find(|r| r.id == "default") {
            warn!(response = trimmed, "router response unmatched, using declared default route");
            return route;
        }
        warn!(response = trimmed, route = %routes[0].id, "router response unmatched, using first route");
        &routes[0]
    }
}

#[async_trait]
impl NodeHandler for RouterHandler {
    async fn execute(&self, ctx: &mut ExecutionContext, node: &Node) -> Result<NodeOutcome> {
        let NodeKind::Router(data) = &node.kind else {
            return Err(EngineError::Extension(
                "router handler invoked for a non-router node".to_string(),
            ));
        };
        if data.routes.is_empty() {
            return Err(EngineError::Validation(format!(
                "router '{}' declares no routes",
                node.id
            )));
        }

        let model = ctx.model_for(data.model.as_deref());
        let messages = vec![
            ChatMessage::system(Self::routing_prompt(data.prompt.as_deref(), &data.routes)),
            ChatMessage::user(ctx.current_input.clone()),
        ];
        let options = ctx.chat_options();
        let plan = ctx.retry_plan_for(node);

        let (result, trace) = ctx
            .chat_with_retry(&node.id, &plan, &model, &messages, &options)
            .await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => return Err(ctx.node_failure(node, &e, Some(trace)).into()),
        };
        ctx.record_usage(&node.id, &model, outcome.usage);

        let route = Self::resolve_route(&outcome.content, &data.routes);
        debug!(node_id = %node.id, route = %route.id, "route selected");
        if let Some(cb) = &ctx.callbacks.on_route_selected {
            cb(&node.id, &route.id);
        }

        // Routing passes the input through to the selected route's targets.
        let targets = ctx.workflow.handle_targets(&node.id, &route.id);
        Ok(
            NodeOutcome::forward(ctx.current_input.clone(), targets)
                .with_metadata(json!({ "route": route.id.clone() })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routes() -> Vec<Route> {
        vec![
            Route {
                id: "billing".into(),
                label: "Billing questions".into(),
                description: None,
            },
            Route {
                id: "support".into(),
                label: "Technical support".into(),
                description: Some("bugs and outages".into()),
            },
        ]
    }

    #[test]
    fn exact_id_wins() {
        let routes = routes();
        assert_eq!(RouterHandler::resolve_route("support", &routes).id, "support");
        assert_eq!(RouterHandler::resolve_route(" billing \n", &routes).id, "billing");
    }

    #[test]
    fn case_insensitive_id_and_label_fallbacks() {
        let routes = routes();
        assert_eq!(RouterHandler::resolve_route("SUPPORT", &routes).id, "support");
        assert_eq!(
            RouterHandler::resolve_route("technical support", &routes).id,
            "support"
        );
    }

    #[test]
    fn declared_default_route_beats_first() {
        let mut routes = routes();
        routes.push(Route {
            id: "default".into(),
            label: "Everything else".into(),
            description: None,
        });
        assert_eq!(RouterHandler::resolve_route("garbage", &routes).id, "default");
    }

    #[test]
    fn first_route_is_last_resort() {
        let routes = routes();
        assert_eq!(RouterHandler::resolve_route("garbage", &routes).id, "billing");
    }

    #[test]
    fn prompt_enumerates_routes() {
        let prompt = RouterHandler::routing_prompt(Some("Prefer billing."), &routes());
        assert!(prompt.contains("- billing: Billing questions"));
        assert!(prompt.contains("(bugs and outages)"));
        assert!(prompt.contains("Prefer billing."));
        assert!(prompt.contains("route id only"));
    }
}
