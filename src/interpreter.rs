//! Seam to the external natural-language-to-graph service.
//!
//! The interpreter is an untrusted black box: it receives a prompt and
//! answers with either a structured JSON payload or free text that may or
//! may not contain one. Everything downstream of the reply lives in
//! [`crate::reconcile`].

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::models::Edge;

/// Decoding temperature requested from the interpreter. Zero keeps repeated
/// reconciliations of the same instruction reproducible.
pub const DECODE_TEMPERATURE: f32 = 0.0;

/// Upper bound on reply size, to keep results cost-bounded.
pub const MAX_REPLY_TOKENS: u32 = 500;

const SYSTEM_PROMPT: &str = "\
You are a P&ID (Piping & Instrumentation Diagram) parser. Convert engineering \
descriptions into JSON graph structures.\n\n\
SYNTAX RULES:\n\
- 'feeds', 'supplies', 'sends to', 'connects to', 'flows to', '->', '=>' all mean: creates an edge from A to B\n\
- 'then' or 'followed by' or commas between items = series connection (chain of edges)\n\
- 'and' = parallel connection (same source, multiple targets) OR just list multiple items\n\
- Equipment types: pump, valve (ball/check/gate/globe/control), heat exchanger, tank, vessel, compressor, filter, separator, column, turbine, etc.\n\
- Abbreviations: HX=heat exchanger, UV=ultraviolet, PSV=pressure safety valve, CV=control valve\n\n\
OUTPUT FORMAT:\n\
Return ONLY a JSON object with these keys:\n\
- nodes: list of strings (unique equipment names)\n\
- edges: list of [source, target] pairs\n\
- assistant: optional string with clarifying questions or suggestions\n\
No prose, no markdown, only JSON.";

/// Read-only view of the caller's current graph, embedded in edit prompts.
#[derive(Debug, Clone, Copy)]
pub struct GraphContext<'a> {
    pub nodes: &'a [String],
    pub edges: &'a [Edge],
}

impl GraphContext<'_> {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct InterpreterRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// What came back from the interpreter. Structured replies skip text
/// extraction; text replies go through the first-`{` JSON scan.
#[derive(Debug, Clone)]
pub enum InterpreterReply {
    Structured(Value),
    Text(String),
}

/// Builds the request for one interpreter round-trip.
///
/// A prior graph with any nodes or edges selects the edit prompt, which
/// embeds the current node and edge lists verbatim and asks for the complete
/// new lists back, never a diff. Otherwise the parse-fresh prompt is used.
pub fn build_request(instruction: &str, prior: Option<GraphContext<'_>>) -> InterpreterRequest {
    let prompt = match prior.filter(|graph| !graph.is_empty()) {
        Some(graph) => {
            let nodes = serde_json::to_string(graph.nodes).unwrap_or_else(|_| "[]".to_string());
            let edges = serde_json::to_string(graph.edges).unwrap_or_else(|_| "[]".to_string());
            format!(
                "You are modifying an existing P&ID diagram. Current diagram:\n\
                 Nodes: {nodes}\n\
                 Edges: {edges}\n\n\
                 Based on the following instruction, modify the diagram by adding, removing, \
                 or changing nodes and edges. Return ONLY a JSON object with keys: nodes \
                 (complete list), edges (complete list), and assistant (optional \
                 suggestions/questions string).\n\n\
                 Instruction: {instruction}\n\nRespond with JSON only.",
                instruction = instruction.trim(),
            )
        }
        None => format!(
            "Parse the following description and return ONLY a JSON object with keys: \
             nodes, edges, and assistant (optional suggestions/questions string).\n\n\
             Description:\n{}\n\nRespond with JSON only.",
            instruction.trim(),
        ),
    };

    InterpreterRequest {
        system: SYSTEM_PROMPT.to_string(),
        prompt,
        temperature: DECODE_TEMPERATURE,
        max_tokens: MAX_REPLY_TOKENS,
    }
}

#[async_trait]
pub trait Interpreter: Send + Sync {
    fn name(&self) -> &str;

    /// One round-trip to the external service. Implementations report
    /// transport and configuration problems as
    /// [`crate::error::ErrorKind::InterpreterUnavailable`]; they never try to
    /// repair malformed output themselves.
    async fn interpret(&self, request: InterpreterRequest) -> Result<InterpreterReply>;
}

/// Test double that replays canned replies in order and records every
/// request it saw. Runs dry with an `InterpreterUnavailable` error.
#[derive(Default)]
pub struct ScriptedInterpreter {
    replies: Mutex<VecDeque<InterpreterReply>>,
    seen: Mutex<Vec<InterpreterRequest>>,
}

impl ScriptedInterpreter {
    pub fn new(replies: impl IntoIterator<Item = InterpreterReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn structured(value: Value) -> Self {
        Self::new([InterpreterReply::Structured(value)])
    }

    pub fn text(reply: impl Into<String>) -> Self {
        Self::new([InterpreterReply::Text(reply.into())])
    }

    pub fn push(&self, reply: InterpreterReply) {
        self.replies
            .lock()
            .expect("reply queue lock poisoned")
            .push_back(reply);
    }

    pub fn requests(&self) -> Vec<InterpreterRequest> {
        self.seen
            .lock()
            .expect("request log lock poisoned")
            .clone()
    }
}

#[async_trait]
impl Interpreter for ScriptedInterpreter {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn interpret(&self, request: InterpreterRequest) -> Result<InterpreterReply> {
        self.seen
            .lock()
            .expect("request log lock poisoned")
            .push(request);
        self.replies
            .lock()
            .expect("reply queue lock poisoned")
            .pop_front()
            .ok_or_else(|| {
                crate::error::LibError::interpreter_unavailable(
                    "Interpreter is not configured",
                    anyhow::anyhow!("scripted interpreter has no replies left"),
                )
            })
    }
}
