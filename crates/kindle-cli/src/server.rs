use kindle_core::{ContextHints, Stimulus};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;

use crate::runtime::SharedRuntime;

/// Upper bound on ticks per kindle_tick call.
const MAX_TICKS_PER_CALL: u32 = 100;

#[derive(Clone)]
pub struct KindleServer {
    runtime: SharedRuntime,
    tool_router: ToolRouter<Self>,
}

impl KindleServer {
    pub fn new(runtime: SharedRuntime) -> Self {
        Self {
            runtime,
            tool_router: Self::tool_router(),
        }
    }
}

fn json_result(value: &serde_json::Value) -> CallToolResult {
    CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(value).unwrap_or_default(),
    )])
}

// --- Tool parameter types ---

#[derive(Debug, Deserialize, JsonSchema)]
struct EntryRequest {
    /// Node id to inject energy at
    node: String,
    /// Similarity score in [0, 1]; higher scores inject more energy
    score: f64,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct HintsRequest {
    /// The exchange is forming new memories
    #[serde(default)]
    memory_formation: bool,
    /// The user is exploring or brainstorming
    #[serde(default)]
    exploration_goal: bool,
    /// The user is building or fixing something concrete
    #[serde(default)]
    implementation_goal: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct InjectRequest {
    /// Entry nodes with similarity scores
    entries: Vec<EntryRequest>,
    /// Optional affect vector for the current exchange (same dimensions as node emotion)
    affect: Option<Vec<f64>>,
    /// Optional sub-entity channel to attribute the injected energy to
    channel: Option<String>,
    /// Optional task-context hints
    hints: Option<HintsRequest>,
    /// Tick immediately after queueing (default false)
    tick: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct TickRequest {
    /// Number of ticks to run (default 1, max 100)
    count: Option<u32>,
    /// Elapsed seconds per tick (default from config)
    dt: Option<f64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct EventsRequest {
    /// Number of most recent events to return (default 50)
    limit: Option<usize>,
}

impl InjectRequest {
    fn into_stimulus(self) -> Result<Stimulus, McpError> {
        if self.entries.is_empty() {
            return Err(McpError::invalid_params(
                "entries must not be empty".to_string(),
                None,
            ));
        }
        let hints = self.hints.unwrap_or_default();
        Ok(Stimulus {
            entries: self
                .entries
                .into_iter()
                .map(|e| (e.node, e.score))
                .collect(),
            affect: self.affect,
            channel: self.channel,
            hints: ContextHints {
                memory_formation: hints.memory_formation,
                exploration_goal: hints.exploration_goal,
                implementation_goal: hints.implementation_goal,
            },
        })
    }
}

#[tool_router]
impl KindleServer {
    #[tool(
        description = "Inject a stimulus into the activation graph. Call this when the conversation touches known nodes: pass each matching node id with its similarity score. Energy is applied on the next tick; set tick=true to apply it now. Optional affect biases injection toward emotionally aligned nodes, and hints steer the inferred task context."
    )]
    async fn kindle_inject(
        &self,
        Parameters(req): Parameters<InjectRequest>,
    ) -> Result<CallToolResult, McpError> {
        let tick_now = req.tick.unwrap_or(false);
        let stimulus = req.into_stimulus()?;
        let mut rt = self.runtime.lock().await;
        let queued = rt.inject(stimulus);

        let outcome = if tick_now {
            let outcome = rt
                .tick(None)
                .map_err(|e| McpError::internal_error(format!("tick failed: {e}"), None))?;
            Some(outcome)
        } else {
            None
        };

        Ok(json_result(&serde_json::json!({
            "queued": queued,
            "pending": rt.pending(),
            "tick": outcome,
        })))
    }

    #[tool(
        description = "Advance the activation engine. Each tick applies queued stimuli, spreads energy along links, decays it, and updates criticality, coherence, mode and task context. Returns a summary per tick."
    )]
    async fn kindle_tick(
        &self,
        Parameters(req): Parameters<TickRequest>,
    ) -> Result<CallToolResult, McpError> {
        let count = req.count.unwrap_or(1).clamp(1, MAX_TICKS_PER_CALL);
        let mut rt = self.runtime.lock().await;
        let mut ticks = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let outcome = rt
                .tick(req.dt)
                .map_err(|e| McpError::internal_error(format!("tick failed: {e}"), None))?;
            ticks.push(outcome);
        }
        Ok(json_result(&serde_json::json!({
            "ticks": ticks,
            "status": rt.status(),
        })))
    }

    #[tool(
        description = "Current engine status: tick, branching ratio rho and its target, regulated rates, safety state, coherence, mode, task context, plus graph size and total energy."
    )]
    async fn kindle_status(&self) -> Result<CallToolResult, McpError> {
        let rt = self.runtime.lock().await;
        let store = rt.store();
        let graph = serde_json::json!({
            "nodes": store.node_count().unwrap_or(0),
            "links": store.link_count().unwrap_or(0),
            "total_energy": store.total_energy().unwrap_or(0.0),
        });
        Ok(json_result(&serde_json::json!({
            "instance": rt.instance(),
            "instance_id": rt.engine().id(),
            "status": rt.status(),
            "pending": rt.pending(),
            "graph": graph,
        })))
    }

    #[tool(
        description = "Recent tick events, oldest first. Each event names the mechanism (injection, diffusion, decay, coherence, criticality, mode, context, groups) and carries the tick summary."
    )]
    async fn kindle_events(
        &self,
        Parameters(req): Parameters<EventsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let rt = self.runtime.lock().await;
        let events = rt
            .store()
            .recent_events(req.limit.unwrap_or(50))
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(json_result(&serde_json::json!({
            "count": events.len(),
            "events": events,
        })))
    }
}

#[tool_handler]
impl ServerHandler for KindleServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Kindle keeps an activation graph alongside the conversation.\n\n\
                 1. INJECT: when a message touches known nodes, call kindle_inject with the node ids \
                    and similarity scores. Add affect and hints when you know them.\n\
                 2. TICK: call kindle_tick (or inject with tick=true) to let energy spread and fade.\n\
                 3. OBSERVE: kindle_status reports rho, coherence, mode and the inferred task context; \
                    kindle_events returns the per-mechanism event log."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use kindle_core::{GraphStore, Link, MemoryGraph, Node};
    use kindle_store::Instance;

    fn make_server() -> KindleServer {
        let instance = Instance::open_in_memory().unwrap();
        let mut g = MemoryGraph::new();
        g.add_node(Node::new("a", "memory"));
        g.add_node(Node::new("b", "concept"));
        g.add_link(Link::new("a", "b", 1.0));
        instance.store().save_graph(&g).unwrap();
        KindleServer::new(Runtime::new(instance).unwrap().shared())
    }

    fn text_from_result(result: &CallToolResult) -> String {
        result
            .content
            .iter()
            .filter_map(|c| match &c.raw {
                RawContent::Text(t) => Some(t.text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    fn parse_result(result: &CallToolResult) -> serde_json::Value {
        let text = text_from_result(result);
        serde_json::from_str(&text).expect("handler should return valid JSON")
    }

    fn inject(node: &str, tick: bool) -> InjectRequest {
        InjectRequest {
            entries: vec![EntryRequest {
                node: node.to_string(),
                score: 0.8,
            }],
            affect: None,
            channel: Some("persona".to_string()),
            hints: None,
            tick: Some(tick),
        }
    }

    #[tokio::test]
    async fn test_status_fresh() {
        let server = make_server();
        let json = parse_result(&server.kindle_status().await.unwrap());
        assert_eq!(json["status"]["tick"], 0);
        assert_eq!(json["graph"]["nodes"], 2);
        assert_eq!(json["graph"]["links"], 1);
        assert_eq!(json["pending"], 0);
    }

    #[tokio::test]
    async fn test_inject_queues_until_tick() {
        let server = make_server();
        let json = parse_result(
            &server
                .kindle_inject(Parameters(inject("a", false)))
                .await
                .unwrap(),
        );
        assert_eq!(json["queued"], 1);
        assert!(json["tick"].is_null());

        let json = parse_result(
            &server
                .kindle_tick(Parameters(TickRequest {
                    count: Some(2),
                    dt: None,
                }))
                .await
                .unwrap(),
        );
        let ticks = json["ticks"].as_array().unwrap();
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0]["stimuli"], 1);
        assert_eq!(ticks[1]["stimuli"], 0);
        assert_eq!(json["status"]["tick"], 2);
    }

    #[tokio::test]
    async fn test_inject_with_tick_applies_now() {
        let server = make_server();
        let json = parse_result(
            &server
                .kindle_inject(Parameters(inject("a", true)))
                .await
                .unwrap(),
        );
        assert_eq!(json["pending"], 0);
        assert_eq!(json["tick"]["tick"], 1);
        assert!(json["tick"]["injected"].as_f64().unwrap() > 0.0);

        let rt = server.runtime.lock().await;
        let a = rt.store().read("a").unwrap().unwrap();
        assert!(a.energy.channel("persona") > 0.0);
    }

    #[tokio::test]
    async fn test_inject_rejects_empty_entries() {
        let server = make_server();
        let mut req = inject("a", false);
        req.entries.clear();
        assert!(server.kindle_inject(Parameters(req)).await.is_err());
    }

    #[tokio::test]
    async fn test_events_after_tick() {
        let server = make_server();
        server
            .kindle_inject(Parameters(inject("a", true)))
            .await
            .unwrap();
        let json = parse_result(
            &server
                .kindle_events(Parameters(EventsRequest { limit: Some(10) }))
                .await
                .unwrap(),
        );
        let events = json["events"].as_array().unwrap();
        assert!(!events.is_empty());
        assert!(
            events
                .iter()
                .any(|e| e["detail"]["mechanism"] == "injection")
        );
    }

    #[test]
    fn test_tool_registration() {
        let server = make_server();
        let info = server.get_info();

        assert!(info.instructions.is_some());
        assert!(info.capabilities.tools.is_some());
    }
}
