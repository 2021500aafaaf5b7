//! Version Reconciler: one interpreter round-trip turned into a validated
//! graph payload.
//!
//! Interpreter output is untrusted text. The pipeline here is extraction
//! (structured payload, or strict JSON parse from the first `{`), a
//! bounded-depth cleaning pass that strips null/"undefined" sentinels, and
//! normalization of the heterogeneous node/edge shapes different parsers
//! emit. Failure is total and explicit; no partial graph is fabricated. The
//! reconciler performs no store writes, so an aborted call leaves the store
//! untouched.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use indexmap::IndexSet;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{LibError, Result};
use crate::interpreter::{build_request, GraphContext, Interpreter, InterpreterReply};
use crate::models::Edge;

/// Nesting depth at which cleaning stops recursing and stringifies whatever
/// substructure remains. Defends against degenerate interpreter output.
pub const MAX_CLEAN_DEPTH: u32 = 10;

/// Filename of the raw-reply artifact written on parse failure.
pub const DEBUG_ARTIFACT_NAME: &str = "last_interpreter_reply.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledGraph {
    pub nodes: Vec<String>,
    pub edges: Vec<Edge>,
    pub assistant_note: String,
}

/// Node entry as emitted by interpreters: either a bare label or an object
/// carrying the label under `id`. Resolved to a plain label string here, at
/// the normalization boundary.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NodeSpec {
    Labeled { id: Value },
    Label(Value),
}

impl NodeSpec {
    pub fn into_label(self) -> Option<String> {
        match self {
            NodeSpec::Labeled { id } => value_to_label(&id),
            // An object without an `id` field carries no usable label.
            NodeSpec::Label(value) if value.is_object() => None,
            NodeSpec::Label(value) => value_to_label(&value),
        }
    }
}

/// Edge entry as emitted by interpreters: an ordered pair, or an object with
/// endpoints under documented synonym keys.
///
/// Accepted synonyms: `source`/`from`/`src` and `target`/`to`/`dst`. Do not
/// widen this list without a test.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EdgeSpec {
    Pair(Vec<Value>),
    Keyed {
        #[serde(default, alias = "from", alias = "src")]
        source: Option<Value>,
        #[serde(default, alias = "to", alias = "dst")]
        target: Option<Value>,
    },
}

impl EdgeSpec {
    /// Edges are best-effort: a missing or empty endpoint drops the entry
    /// silently rather than failing the reconciliation.
    pub fn into_edge(self) -> Option<Edge> {
        let (source, target) = match self {
            EdgeSpec::Pair(items) if items.len() >= 2 => {
                (value_to_label(&items[0]), value_to_label(&items[1]))
            }
            EdgeSpec::Pair(_) => (None, None),
            EdgeSpec::Keyed { source, target } => (
                source.as_ref().and_then(value_to_label),
                target.as_ref().and_then(value_to_label),
            ),
        };

        match (source, target) {
            (Some(source), Some(target)) if !source.is_empty() && !target.is_empty() => {
                Some(Edge { source, target })
            }
            _ => None,
        }
    }
}

fn value_to_label(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) if text.eq_ignore_ascii_case("undefined") => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn is_sentinel(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.eq_ignore_ascii_case("undefined"),
        _ => false,
    }
}

/// Recursively drops null/"undefined" keys and list elements. Beyond
/// [`MAX_CLEAN_DEPTH`] remaining substructures are stringified instead of
/// recursed into.
pub fn clean_value(value: Value, depth: u32) -> Option<Value> {
    if is_sentinel(&value) {
        return None;
    }

    if depth >= MAX_CLEAN_DEPTH {
        return match value {
            Value::Object(_) | Value::Array(_) => Some(Value::String(value.to_string())),
            other => Some(other),
        };
    }

    match value {
        Value::Object(map) => Some(Value::Object(
            map.into_iter()
                .filter(|(_, v)| !is_sentinel(v))
                .filter_map(|(k, v)| clean_value(v, depth + 1).map(|v| (k, v)))
                .collect(),
        )),
        Value::Array(items) => Some(Value::Array(
            items
                .into_iter()
                .filter(|v| !is_sentinel(v))
                .filter_map(|v| clean_value(v, depth + 1))
                .collect(),
        )),
        other => Some(other),
    }
}

/// Locates the first `{` and parses strict JSON from there, discarding any
/// leading prose. Trailing prose after a complete object is tolerated.
pub fn extract_json(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let candidate = &text[start..];

    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        return Some(value);
    }

    // Stream parse: take the first complete JSON value and ignore the rest.
    serde_json::Deserializer::from_str(candidate)
        .into_iter::<Value>()
        .next()?
        .ok()
}

pub fn normalize_nodes(entries: &[Value]) -> Vec<String> {
    let mut labels: IndexSet<String> = IndexSet::with_capacity(entries.len());
    for entry in entries {
        let Ok(spec) = serde_json::from_value::<NodeSpec>(entry.clone()) else {
            continue;
        };
        if let Some(label) = spec.into_label() {
            labels.insert(label);
        }
    }
    labels.into_iter().collect()
}

pub fn normalize_edges(entries: &[Value]) -> Vec<Edge> {
    entries
        .iter()
        .filter_map(|entry| serde_json::from_value::<EdgeSpec>(entry.clone()).ok())
        .filter_map(EdgeSpec::into_edge)
        .collect()
}

fn flatten_note(payload: &Value) -> String {
    let note = payload
        .get("assistant")
        .or_else(|| payload.get("notes"))
        .or_else(|| payload.get("questions"));

    match note {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(structured) => structured.to_string(),
    }
}

/// Turns a cleaned interpreter payload into the reconciled node/edge lists.
///
/// A payload whose normalized result has zero nodes AND zero edges is a
/// failure, not a success with an empty graph: the interpreter never
/// legitimately returns nothing for a non-trivial instruction.
pub fn normalize_payload(payload: Value) -> Result<ReconciledGraph> {
    let Value::Object(ref map) = payload else {
        return Err(LibError::unparseable(
            "Interpreter response could not be parsed",
            anyhow!("interpreter payload was not a JSON object"),
        ));
    };

    let nodes = match map.get("nodes") {
        Some(Value::Array(entries)) => normalize_nodes(entries),
        _ => Vec::new(),
    };
    let edges = match map.get("edges") {
        Some(Value::Array(entries)) => normalize_edges(entries),
        _ => Vec::new(),
    };

    if nodes.is_empty() && edges.is_empty() {
        return Err(LibError::empty_result(
            "Interpreter produced no nodes or edges",
            anyhow!("normalized payload was empty"),
        ));
    }

    Ok(ReconciledGraph {
        nodes,
        edges,
        assistant_note: flatten_note(&payload),
    })
}

/// Drives one interpreter round-trip and produces a validated graph payload.
#[derive(Clone)]
pub struct Reconciler {
    interpreter: Arc<dyn Interpreter>,
    debug_dir: Option<PathBuf>,
}

impl Reconciler {
    pub fn new(interpreter: Arc<dyn Interpreter>, debug_dir: Option<PathBuf>) -> Self {
        Self {
            interpreter,
            debug_dir,
        }
    }

    pub async fn reconcile(
        &self,
        instruction: &str,
        prior: Option<GraphContext<'_>>,
    ) -> Result<ReconciledGraph> {
        let request = build_request(instruction, prior);
        let reply = self.interpreter.interpret(request).await?;

        let payload = match reply {
            InterpreterReply::Structured(value) => value,
            InterpreterReply::Text(text) => match extract_json(&text) {
                Some(value) => value,
                None => {
                    self.persist_debug_artifact(&text);
                    tracing::warn!(
                        interpreter = self.interpreter.name(),
                        "interpreter reply contained no parseable JSON"
                    );
                    return Err(LibError::unparseable(
                        "Interpreter response could not be parsed",
                        anyhow!("no JSON object found in interpreter reply"),
                    ));
                }
            },
        };

        let cleaned = clean_value(payload, 0).unwrap_or(Value::Null);
        normalize_payload(cleaned)
    }

    /// Saves the raw reply for offline diagnosis. Best-effort: failures here
    /// only log, they never mask the parse error itself.
    fn persist_debug_artifact(&self, raw: &str) {
        let Some(dir) = &self.debug_dir else {
            return;
        };
        if let Err(err) = std::fs::create_dir_all(dir)
            .and_then(|_| std::fs::write(dir.join(DEBUG_ARTIFACT_NAME), raw))
        {
            tracing::warn!(error = %err, "failed to persist interpreter debug artifact");
        }
    }
}
