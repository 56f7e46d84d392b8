//! The branching narrative graph.
//!
//! Scene nodes form a single-rooted tree. Each node remembers which of its
//! children is the active branch; abandoned branches are kept so the player
//! can walk back into them.

use crate::director::Direction;
use crate::emotion::Emotion;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Errors from graph operations. These are integrity violations, not
/// recoverable generation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Parent node {0} does not exist")]
    InvalidParent(NodeId),

    #[error("Node {0} does not exist or is not reachable from here")]
    InvalidReference(NodeId),

    #[error("Graph already has a root")]
    RootExists,

    #[error("Node {0} already has continuations and can no longer change")]
    NodeLocked(NodeId),

    #[error("Graph is inconsistent: {0}")]
    Inconsistent(String),
}

/// Unique identifier for a scene node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Create a new unique node ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who speaks a node's message. `None` on a node means the narrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Speaker {
    Player,
    Patron(String),
}

impl Speaker {
    pub fn patron_name(&self) -> Option<&str> {
        match self {
            Speaker::Patron(name) => Some(name),
            Speaker::Player => None,
        }
    }
}

/// One beat of generated narrative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneNode {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    child_ids: Vec<NodeId>,
    selected_child_id: Option<NodeId>,
    pub speaker: Option<Speaker>,
    pub emotion: Option<Emotion>,
    pub message: String,
    pub direction: Direction,
    /// Roster snapshot when this node was generated.
    pub present_patron_ids: Vec<String>,
    /// Focus patron for patron-centric directions.
    pub selected_patron_id: Option<String>,
    /// Drink served in response to this node.
    pub selected_beverage: Option<String>,
    /// Remaining stock per beverage name.
    #[serde(default)]
    pub beverage_counts: BTreeMap<String, u32>,
    pub night: u32,
    #[serde(default)]
    pub read: bool,
}

impl SceneNode {
    /// Branches created from this node, oldest first.
    pub fn child_ids(&self) -> &[NodeId] {
        &self.child_ids
    }

    /// The active branch, if one has been chosen.
    pub fn selected_child_id(&self) -> Option<NodeId> {
        self.selected_child_id
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.child_ids.is_empty()
    }

    /// Name of the speaking patron, if any.
    pub fn patron_speaker(&self) -> Option<&str> {
        self.speaker.as_ref().and_then(Speaker::patron_name)
    }
}

/// Content for a node about to be appended.
#[derive(Debug, Clone, Default)]
pub struct NodeFields {
    pub speaker: Option<Speaker>,
    pub emotion: Option<Emotion>,
    pub message: String,
    pub direction: Direction,
    pub present_patron_ids: Vec<String>,
    pub selected_patron_id: Option<String>,
    pub selected_beverage: Option<String>,
    pub beverage_counts: BTreeMap<String, u32>,
    pub night: u32,
}

/// A tree of scene nodes with one root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NarrativeGraph {
    nodes: HashMap<NodeId, SceneNode>,
    root: Option<NodeId>,
}

impl NarrativeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn root_id(&self) -> Option<NodeId> {
        self.root
    }

    pub fn root(&self) -> Option<&SceneNode> {
        self.root.and_then(|id| self.nodes.get(&id))
    }

    pub fn get(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(&id)
    }

    /// Like [`get`](Self::get), but a missing node is an error.
    pub fn node(&self, id: NodeId) -> Result<&SceneNode, GraphError> {
        self.nodes.get(&id).ok_or(GraphError::InvalidReference(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &SceneNode> {
        self.nodes.values()
    }

    /// Children of `id` in creation order.
    pub fn children(&self, id: NodeId) -> Result<Vec<&SceneNode>, GraphError> {
        let node = self.node(id)?;
        Ok(node
            .child_ids
            .iter()
            .filter_map(|child| self.nodes.get(child))
            .collect())
    }

    /// Create a node as a new child of `parent`, or as the root when
    /// `parent` is `None`. Existing branch selections are left alone.
    pub fn append_node(
        &mut self,
        parent: Option<NodeId>,
        fields: NodeFields,
    ) -> Result<&SceneNode, GraphError> {
        let id = NodeId::new();
        let mut night = fields.night;

        match parent {
            Some(parent_id) => {
                let parent = self
                    .nodes
                    .get_mut(&parent_id)
                    .ok_or(GraphError::InvalidParent(parent_id))?;
                night = night.max(parent.night);
                parent.child_ids.push(id);
            }
            None => {
                if self.root.is_some() {
                    return Err(GraphError::RootExists);
                }
                self.root = Some(id);
            }
        }

        let node = SceneNode {
            id,
            parent_id: parent,
            child_ids: Vec::new(),
            selected_child_id: None,
            speaker: fields.speaker,
            emotion: fields.emotion,
            message: fields.message,
            direction: fields.direction,
            present_patron_ids: fields.present_patron_ids,
            selected_patron_id: fields.selected_patron_id,
            selected_beverage: fields.selected_beverage,
            beverage_counts: fields.beverage_counts,
            night,
            read: false,
        };

        Ok(self.nodes.entry(id).or_insert(node))
    }

    /// Move forward from `id`.
    ///
    /// Returns the selected child if there is one. Otherwise the most
    /// recently appended child becomes selected and is returned. A leaf
    /// yields `None`: new content has to be generated first.
    pub fn advance(&mut self, id: NodeId) -> Result<Option<&SceneNode>, GraphError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(GraphError::InvalidReference(id))?;

        let next = match node.selected_child_id {
            Some(child) => Some(child),
            None => {
                let latest = node.child_ids.last().copied();
                node.selected_child_id = latest;
                latest
            }
        };

        Ok(next.and_then(|child| self.nodes.get(&child)))
    }

    /// Step back to the parent of `id`, or `None` at the root.
    pub fn recede(&self, id: NodeId) -> Result<Option<&SceneNode>, GraphError> {
        let node = self.node(id)?;
        Ok(node.parent_id.and_then(|parent| self.nodes.get(&parent)))
    }

    /// Make `child` the active branch of `parent`.
    pub fn select_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(&parent)
            .ok_or(GraphError::InvalidReference(parent))?;
        if !node.child_ids.contains(&child) {
            return Err(GraphError::InvalidReference(child));
        }
        node.selected_child_id = Some(child);
        Ok(())
    }

    /// Record that the player has fully seen this node's text.
    pub fn mark_read(&mut self, id: NodeId) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(GraphError::InvalidReference(id))?;
        node.read = true;
        Ok(())
    }

    /// Record the drink served at a leaf node along with the stock left.
    pub fn record_serving(
        &mut self,
        id: NodeId,
        beverage: impl Into<String>,
        counts: BTreeMap<String, u32>,
    ) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(GraphError::InvalidReference(id))?;
        if !node.is_leaf() {
            return Err(GraphError::NodeLocked(id));
        }
        node.selected_beverage = Some(beverage.into());
        node.beverage_counts = counts;
        Ok(())
    }

    /// Follow active-branch selections from `id` to the end of the branch.
    pub fn active_tip(&self, id: NodeId) -> Result<NodeId, GraphError> {
        let mut current = self.node(id)?;
        let mut steps = 0;
        while let Some(next) = current.selected_child_id {
            steps += 1;
            if steps > self.nodes.len() {
                return Err(GraphError::Inconsistent(format!(
                    "selection cycle below {id}"
                )));
            }
            current = self.node(next)?;
        }
        Ok(current.id)
    }

    /// Walk from `id` up to the root, `id` first.
    ///
    /// The walk is bounded by the node count, so a corrupt graph cannot
    /// make it loop.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            graph: self,
            next: Some(id),
            remaining: self.nodes.len(),
        }
    }

    /// Ancestors of `id` (including itself) that satisfy `predicate`,
    /// ordered from the root side down to `id`. The sequence stops at the
    /// first ancestor failing the predicate.
    pub fn history_of<P>(&self, id: NodeId, predicate: P) -> History<'_, P>
    where
        P: Fn(&SceneNode) -> bool,
    {
        History {
            graph: self,
            start: id,
            predicate,
        }
    }

    /// Check every structural invariant. Used after loading untrusted data.
    pub fn validate(&self) -> Result<(), GraphError> {
        let Some(root_id) = self.root else {
            if self.nodes.is_empty() {
                return Ok(());
            }
            return Err(GraphError::Inconsistent("nodes without a root".into()));
        };

        let root = self.node(root_id)?;
        if root.parent_id.is_some() {
            return Err(GraphError::Inconsistent("root has a parent".into()));
        }

        for node in self.nodes.values() {
            match node.parent_id {
                Some(parent_id) => {
                    let parent = self
                        .nodes
                        .get(&parent_id)
                        .ok_or(GraphError::InvalidParent(parent_id))?;
                    if !parent.child_ids.contains(&node.id) {
                        return Err(GraphError::Inconsistent(format!(
                            "{} is not listed as a child of {parent_id}",
                            node.id
                        )));
                    }
                    if node.night < parent.night {
                        return Err(GraphError::Inconsistent(format!(
                            "{} is on an earlier night than its parent",
                            node.id
                        )));
                    }
                }
                None if node.id != root_id => {
                    return Err(GraphError::Inconsistent(format!(
                        "{} has no parent but is not the root",
                        node.id
                    )));
                }
                None => {}
            }

            let mut seen = HashSet::new();
            for child_id in &node.child_ids {
                if !seen.insert(*child_id) {
                    return Err(GraphError::Inconsistent(format!(
                        "{} lists child {child_id} twice",
                        node.id
                    )));
                }
                let child = self.node(*child_id)?;
                if child.parent_id != Some(node.id) {
                    return Err(GraphError::Inconsistent(format!(
                        "{child_id} does not point back to {}",
                        node.id
                    )));
                }
            }

            if let Some(selected) = node.selected_child_id {
                if !node.child_ids.contains(&selected) {
                    return Err(GraphError::Inconsistent(format!(
                        "{} selects {selected}, which is not its child",
                        node.id
                    )));
                }
            }

            if self.ancestors(node.id).last().map(|n| n.id) != Some(root_id) {
                return Err(GraphError::Inconsistent(format!(
                    "{} does not reach the root",
                    node.id
                )));
            }
        }

        Ok(())
    }
}

/// Iterator from a node up to the root.
pub struct Ancestors<'g> {
    graph: &'g NarrativeGraph,
    next: Option<NodeId>,
    remaining: usize,
}

impl<'g> Iterator for Ancestors<'g> {
    type Item = &'g SceneNode;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.graph.nodes.get(&self.next?)?;
        self.remaining -= 1;
        self.next = node.parent_id;
        Some(node)
    }
}

/// A scoped slice of a node's history. Iterate it as many times as needed.
pub struct History<'g, P> {
    graph: &'g NarrativeGraph,
    start: NodeId,
    predicate: P,
}

impl<'g, P> History<'g, P>
where
    P: Fn(&SceneNode) -> bool,
{
    /// Iterate root-ward first. Nothing is walked until the first `next()`.
    pub fn iter(&self) -> HistoryIter<'g, '_, P> {
        HistoryIter {
            history: self,
            chain: None,
        }
    }
}

impl<'g, 'h, P> IntoIterator for &'h History<'g, P>
where
    P: Fn(&SceneNode) -> bool,
{
    type Item = &'g SceneNode;
    type IntoIter = HistoryIter<'g, 'h, P>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct HistoryIter<'g, 'h, P> {
    history: &'h History<'g, P>,
    /// Matching ancestors, `start` first, so popping yields root-ward order.
    chain: Option<Vec<&'g SceneNode>>,
}

impl<'g, P> Iterator for HistoryIter<'g, '_, P>
where
    P: Fn(&SceneNode) -> bool,
{
    type Item = &'g SceneNode;

    fn next(&mut self) -> Option<Self::Item> {
        let history = self.history;
        self.chain
            .get_or_insert_with(|| {
                history
                    .graph
                    .ancestors(history.start)
                    .take_while(|node| (history.predicate)(*node))
                    .collect()
            })
            .pop()
    }
}
