//! Protocol graph data model.
//!
//! A submitted plan is a DAG of [`Node`]s rooted at exactly one [`Node::Start`].
//! Children are owned by their parent (a `Vec<Node>` per variant); there is no
//! raw backpointer from child to parent. [`Graph`] wraps the owned root and
//! answers the identifier-indexed questions (`find`, cycle detection) that
//! the bare recursive `Node` cannot answer about itself.

use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use miette::Diagnostic;
use serde_json::{Value, json};
use thiserror::Error;
use uuid::Uuid;

/// Stable 128-bit identifier assigned at construction and preserved across
/// serialization.
pub type NodeId = Uuid;

/// Errors raised by graph construction and traversal.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Attaching a node whose identifier is already present in the rooted
    /// tree it would join.
    #[error("node {id} already exists in the rooted tree being joined")]
    #[diagnostic(
        code(labsched::graph::cycle),
        help("attach a node with a fresh identifier instead of reusing {id}")
    )]
    Cycle { id: NodeId },

    /// `find`, decode, or a token lookup referenced an identifier that is
    /// not present in the graph.
    #[error("unknown identifier {id}")]
    #[diagnostic(code(labsched::graph::unknown_identifier))]
    UnknownIdentifier { id: NodeId },

    /// A structurally invalid graph: wrong successor arity or type for a
    /// `Delay`, a `Start` used as a successor, an unrecognized `node_type`,
    /// or a missing required field during decode.
    #[error("invalid graph: {reason}")]
    #[diagnostic(code(labsched::graph::invalid_graph))]
    InvalidGraph { reason: String },
}

type Result<T> = std::result::Result<T, GraphError>;

/// Anchor for a [`DelayNode`]'s target gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FromType {
    /// Gap measured from the parent `Protocol`'s start.
    Start,
    /// Gap measured from the parent `Protocol`'s finish.
    Finish,
}

impl FromType {
    fn encode(self) -> &'static str {
        match self {
            FromType::Start => "start",
            FromType::Finish => "finish",
        }
    }

    fn decode(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(FromType::Start),
            "finish" => Ok(FromType::Finish),
            other => Err(GraphError::InvalidGraph {
                reason: format!("unknown from_type `{other}`"),
            }),
        }
    }
}

/// The sole root of a submitted plan. Carries no duration.
#[derive(Debug, Clone)]
pub struct StartNode {
    pub id: NodeId,
    pub post_node: Vec<Node>,
}

/// An atomic unit of physical work.
#[derive(Debug, Clone)]
pub struct ProtocolNode {
    pub id: NodeId,
    pub name: String,
    pub duration_seconds: i64,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub started_time: Option<DateTime<Utc>>,
    pub finished_time: Option<DateTime<Utc>>,
    pub post_node: Vec<Node>,
}

/// A timing constraint edge: imposes a target gap between its parent's
/// anchor and its (sole) child's start.
#[derive(Debug, Clone)]
pub struct DelayNode {
    pub id: NodeId,
    pub duration_seconds: i64,
    pub from_type: FromType,
    pub offset_seconds: i64,
    pub post_node: Vec<Node>,
}

/// A node in a protocol graph: one of `Start`, `Protocol`, or `Delay`.
///
/// Kept as a closed sum type rather than a class hierarchy so every
/// operation (`encode`, `flatten`, optimizer lowering) is a single
/// exhaustive match.
#[derive(Debug, Clone)]
pub enum Node {
    Start(StartNode),
    Protocol(ProtocolNode),
    Delay(DelayNode),
}

impl Node {
    /// Construct a fresh `Start` node with no children.
    #[must_use]
    pub fn new_start() -> Self {
        Node::Start(StartNode {
            id: Uuid::new_v4(),
            post_node: Vec::new(),
        })
    }

    /// Construct a fresh `Protocol` node.
    #[must_use]
    pub fn new_protocol(name: impl Into<String>, duration_seconds: i64) -> Self {
        Node::Protocol(ProtocolNode {
            id: Uuid::new_v4(),
            name: name.into(),
            duration_seconds,
            scheduled_time: None,
            started_time: None,
            finished_time: None,
            post_node: Vec::new(),
        })
    }

    /// Construct a fresh `Delay` node.
    #[must_use]
    pub fn new_delay(duration_seconds: i64, from_type: FromType, offset_seconds: i64) -> Self {
        Node::Delay(DelayNode {
            id: Uuid::new_v4(),
            duration_seconds,
            from_type,
            offset_seconds,
            post_node: Vec::new(),
        })
    }

    #[must_use]
    pub fn id(&self) -> NodeId {
        match self {
            Node::Start(n) => n.id,
            Node::Protocol(n) => n.id,
            Node::Delay(n) => n.id,
        }
    }

    #[must_use]
    pub fn post_node(&self) -> &[Node] {
        match self {
            Node::Start(n) => &n.post_node,
            Node::Protocol(n) => &n.post_node,
            Node::Delay(n) => &n.post_node,
        }
    }

    pub fn post_node_mut(&mut self) -> &mut Vec<Node> {
        match self {
            Node::Start(n) => &mut n.post_node,
            Node::Protocol(n) => &mut n.post_node,
            Node::Delay(n) => &mut n.post_node,
        }
    }

    #[must_use]
    pub fn as_protocol(&self) -> Option<&ProtocolNode> {
        match self {
            Node::Protocol(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_protocol_mut(&mut self) -> Option<&mut ProtocolNode> {
        match self {
            Node::Protocol(n) => Some(n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_delay(&self) -> Option<&DelayNode> {
        match self {
            Node::Delay(n) => Some(n),
            _ => None,
        }
    }

    /// Lazy pre-order sequence of all nodes reachable from `self`, `self`
    /// included.
    #[must_use]
    pub fn flatten(&self) -> Vec<&Node> {
        let mut out = vec![self];
        for child in self.post_node() {
            out.extend(child.flatten());
        }
        out
    }

    /// Attach `child` directly under `self` without any of [`Graph`]'s
    /// cross-tree cycle checking. Enforces only the per-variant local
    /// shape rules: a `Start` successor is always rejected, a `Delay`
    /// parent accepts at most one `Protocol` child.
    fn attach_local(&mut self, child: Node) -> Result<()> {
        if matches!(child, Node::Start(_)) {
            return Err(GraphError::InvalidGraph {
                reason: "a Start node cannot appear as a successor".to_string(),
            });
        }
        if let Node::Delay(delay) = self {
            if !delay.post_node.is_empty() {
                return Err(GraphError::InvalidGraph {
                    reason: "a Delay node may have at most one successor".to_string(),
                });
            }
            if !matches!(child, Node::Protocol(_)) {
                return Err(GraphError::InvalidGraph {
                    reason: "a Delay node's successor must be a Protocol".to_string(),
                });
            }
        }
        self.post_node_mut().push(child);
        Ok(())
    }

    /// Find the node with identifier `id` within the tree reachable from
    /// `self`.
    #[must_use]
    pub fn find(&self, id: NodeId) -> Option<&Node> {
        if self.id() == id {
            return Some(self);
        }
        self.post_node().iter().find_map(|c| c.find(id))
    }

    pub fn find_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        if self.id() == id {
            return Some(self);
        }
        self.post_node_mut().iter_mut().find_map(|c| c.find_mut(id))
    }

    /// Round-trip serialization to the canonical dictionary form (spec §3).
    #[must_use]
    pub fn encode(&self) -> Value {
        let post_node: Vec<Value> = self.post_node().iter().map(Node::encode).collect();
        match self {
            Node::Start(n) => json!({
                "node_type": "Start",
                "id": n.id.to_string(),
                "post_node": post_node,
            }),
            Node::Protocol(n) => json!({
                "node_type": "Protocol",
                "id": n.id.to_string(),
                "name": n.name,
                "duration_seconds": n.duration_seconds,
                "scheduled_time_epoch": n.scheduled_time.map(|t| t.timestamp()),
                "started_time_epoch": n.started_time.map(|t| t.timestamp()),
                "finished_time_epoch": n.finished_time.map(|t| t.timestamp()),
                "post_node": post_node,
            }),
            Node::Delay(n) => json!({
                "node_type": "Delay",
                "id": n.id.to_string(),
                "duration_seconds": n.duration_seconds,
                "from_type": n.from_type.encode(),
                "offset_seconds": n.offset_seconds,
                "post_node": post_node,
            }),
        }
    }

    /// Decode a node (and, recursively, its successors) from the canonical
    /// dictionary form. Rejects unknown `node_type`, missing required
    /// fields, and per-variant successor-shape violations.
    pub fn decode(value: &Value) -> Result<Node> {
        let obj = value.as_object().ok_or_else(|| GraphError::InvalidGraph {
            reason: "node must be a JSON object".to_string(),
        })?;
        let node_type = obj
            .get("node_type")
            .and_then(Value::as_str)
            .ok_or_else(|| GraphError::InvalidGraph {
                reason: "missing node_type".to_string(),
            })?;
        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| GraphError::InvalidGraph {
                reason: "missing id".to_string(),
            })?
            .parse::<Uuid>()
            .map_err(|e| GraphError::InvalidGraph {
                reason: format!("invalid id: {e}"),
            })?;
        let post_node_raw = obj
            .get("post_node")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let children: std::result::Result<Vec<Node>, GraphError> =
            post_node_raw.iter().map(Node::decode).collect();
        let children = children?;

        let mut node = match node_type {
            "Start" => Node::Start(StartNode {
                id,
                post_node: Vec::new(),
            }),
            "Protocol" => {
                let name = obj
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GraphError::InvalidGraph {
                        reason: "Protocol missing name".to_string(),
                    })?
                    .to_string();
                let duration_seconds = required_i64(obj, "duration_seconds")?;
                Node::Protocol(ProtocolNode {
                    id,
                    name,
                    duration_seconds,
                    scheduled_time: optional_epoch(obj, "scheduled_time_epoch"),
                    started_time: optional_epoch(obj, "started_time_epoch"),
                    finished_time: optional_epoch(obj, "finished_time_epoch"),
                    post_node: Vec::new(),
                })
            }
            "Delay" => {
                let duration_seconds = required_i64(obj, "duration_seconds")?;
                let offset_seconds = required_i64(obj, "offset_seconds")?;
                let from_type = FromType::decode(obj.get("from_type").and_then(Value::as_str).ok_or_else(
                    || GraphError::InvalidGraph {
                        reason: "Delay missing from_type".to_string(),
                    },
                )?)?;
                if children.len() > 1 {
                    return Err(GraphError::InvalidGraph {
                        reason: "Delay may have at most one successor".to_string(),
                    });
                }
                if let Some(child) = children.first() {
                    if !matches!(child, Node::Protocol(_)) {
                        return Err(GraphError::InvalidGraph {
                            reason: "Delay successor must be a Protocol".to_string(),
                        });
                    }
                }
                Node::Delay(DelayNode {
                    id,
                    duration_seconds,
                    from_type,
                    offset_seconds,
                    post_node: Vec::new(),
                })
            }
            other => {
                return Err(GraphError::InvalidGraph {
                    reason: format!("unknown node_type `{other}`"),
                });
            }
        };
        for child in children {
            if matches!(child, Node::Start(_)) {
                return Err(GraphError::InvalidGraph {
                    reason: "a Start node cannot appear as a successor".to_string(),
                });
            }
            node.post_node_mut().push(child);
        }
        Ok(node)
    }
}

fn required_i64(obj: &serde_json::Map<String, Value>, key: &str) -> Result<i64> {
    obj.get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| GraphError::InvalidGraph {
            reason: format!("missing or non-integer field `{key}`"),
        })
}

fn optional_epoch(obj: &serde_json::Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    obj.get(key)
        .and_then(Value::as_i64)
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

/// A `Start`-rooted tree together with an identifier index, so cycle
/// detection and lookup don't require parent backpointers on `Node` itself.
#[derive(Debug, Clone)]
pub struct Graph {
    root: Node,
}

impl Graph {
    /// Begin a new, empty graph (a lone `Start` node).
    #[must_use]
    pub fn new() -> Self {
        Graph {
            root: Node::new_start(),
        }
    }

    /// Wrap an already-constructed `Start`-rooted node, e.g. after `decode`.
    pub fn from_root(root: Node) -> Result<Self> {
        if !matches!(root, Node::Start(_)) {
            return Err(GraphError::InvalidGraph {
                reason: "graph root must be a Start node".to_string(),
            });
        }
        Ok(Graph { root })
    }

    #[must_use]
    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Node {
        &mut self.root
    }

    #[must_use]
    pub fn root_id(&self) -> NodeId {
        self.root.id()
    }

    /// Pre-order traversal of every node in the graph, root included.
    #[must_use]
    pub fn flatten(&self) -> Vec<&Node> {
        self.root.flatten()
    }

    #[must_use]
    pub fn find(&self, id: NodeId) -> Option<&Node> {
        self.root.find(id)
    }

    pub fn find_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.root.find_mut(id)
    }

    /// Attach `child` under the node identified by `parent_id`. Fails with
    /// `Cycle` if `child`'s own subtree reuses any identifier already
    /// present in this graph, or with `UnknownIdentifier`/`InvalidGraph` per
    /// the per-variant shape rules.
    pub fn attach(&mut self, parent_id: NodeId, child: Node) -> Result<NodeId> {
        let existing: HashSet<NodeId> = self.flatten().iter().map(|n| n.id()).collect();
        for n in child.flatten() {
            if existing.contains(&n.id()) {
                return Err(GraphError::Cycle { id: n.id() });
            }
        }
        let child_id = child.id();
        let parent = self
            .root
            .find_mut(parent_id)
            .ok_or(GraphError::UnknownIdentifier { id: parent_id })?;
        parent.attach_local(child)?;
        Ok(child_id)
    }

    /// Encode the whole graph to its canonical dictionary form.
    #[must_use]
    pub fn encode(&self) -> Value {
        self.root.encode()
    }

    /// Decode a graph from its canonical dictionary form.
    pub fn decode(value: &Value) -> Result<Graph> {
        Graph::from_root(Node::decode(value)?)
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
