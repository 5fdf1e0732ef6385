//! In-process [`Namespace`]: an arena tree with a builder API and a
//! tiny named-object evaluator, enough to express any topology the
//! backings care about.

use crate::iface::{Namespace, NodeId, ObjectType, OpRegion};
use std::cell::Cell;
use std::collections::BTreeMap;

/// A value a named object evaluates to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Integer(u64),
    String(String),
    Package(Vec<Object>),
}

struct Node {
    name: String,
    parent: Option<NodeId>,
    object_type: ObjectType,
    region: Option<OpRegion>,
    children: Vec<NodeId>,
    values: BTreeMap<String, Object>,
}

/// The in-process namespace tree.
pub struct HostNamespace {
    nodes: Vec<Node>,
    evals: Cell<u64>,
}

impl HostNamespace {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                name: "\\".into(),
                parent: None,
                object_type: ObjectType::Scope,
                region: None,
                children: Vec::new(),
                values: BTreeMap::new(),
            }],
            evals: Cell::new(0),
        }
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    fn add_node(
        &mut self,
        parent: NodeId,
        name: &str,
        object_type: ObjectType,
        region: Option<OpRegion>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            name: name.into(),
            parent: Some(parent),
            object_type,
            region,
            children: Vec::new(),
            values: BTreeMap::new(),
        });
        self.nodes[parent.0 as usize].children.push(id);
        id
    }

    /// Add a scope node (names are four characters by convention).
    pub fn add_scope(&mut self, parent: NodeId, name: &str) -> NodeId {
        self.add_node(parent, name, ObjectType::Scope, None)
    }

    pub fn add_device(&mut self, parent: NodeId, name: &str) -> NodeId {
        self.add_node(parent, name, ObjectType::Device, None)
    }

    pub fn add_region(&mut self, parent: NodeId, name: &str, region: OpRegion) -> NodeId {
        self.add_node(parent, name, ObjectType::Region, Some(region))
    }

    /// Attach a named object (`_HID`, `_ADR`, `MAIN`, ...) to a node.
    pub fn set_value(&mut self, node: NodeId, name: &str, value: Object) {
        self.nodes[node.0 as usize]
            .values
            .insert(name.into(), value);
    }

    /// How many method evaluations have been performed so far.
    pub fn eval_count(&self) -> u64 {
        self.evals.get()
    }

    fn bump_evals(&self) {
        self.evals.set(self.evals.get() + 1);
    }

    fn child_by_name(&self, node: NodeId, name: &str) -> Option<NodeId> {
        self.node(node)
            .children
            .iter()
            .copied()
            .find(|&child| self.node(child).name == name)
    }

    /// Resolve a rooted path (`\SEGM.SEGM...`) to a node.
    pub fn evaluate_node(&self, path: &str) -> Option<NodeId> {
        let mut current = self.root();
        for segment in path.strip_prefix('\\')?.split('.') {
            current = self.child_by_name(current, segment)?;
        }
        Some(current)
    }

    /// Evaluate a rooted path to the object it names. The final
    /// segment may be a named object attached to its parent node.
    pub fn evaluate(&self, path: &str) -> Option<Object> {
        let stripped = path.strip_prefix('\\')?;
        let (scope, leaf) = match stripped.rsplit_once('.') {
            Some((scope, leaf)) => (self.evaluate_node(&format!("\\{scope}"))?, leaf),
            None => (self.root(), stripped),
        };

        self.bump_evals();
        self.node(scope).values.get(leaf).cloned()
    }
}

impl Default for HostNamespace {
    fn default() -> Self {
        Self::new()
    }
}

impl Namespace for HostNamespace {
    fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).parent
    }

    fn name(&self, node: NodeId) -> String {
        self.node(node).name.clone()
    }

    fn object_type(&self, node: NodeId) -> ObjectType {
        self.node(node).object_type
    }

    fn op_region(&self, node: NodeId) -> Option<OpRegion> {
        self.node(node).region
    }

    fn eval_hid(&self, node: NodeId) -> Option<String> {
        self.bump_evals();
        match self.node(node).values.get("_HID") {
            Some(Object::String(id)) => Some(id.clone()),
            _ => None,
        }
    }

    fn eval_cid(&self, node: NodeId) -> Option<Vec<String>> {
        self.bump_evals();
        match self.node(node).values.get("_CID") {
            Some(Object::String(id)) => Some(vec![id.clone()]),
            Some(Object::Package(entries)) => Some(
                entries
                    .iter()
                    .filter_map(|entry| match entry {
                        Object::String(id) => Some(id.clone()),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => None,
        }
    }

    fn eval_integer(&self, node: NodeId, name: &str) -> Option<u64> {
        self.bump_evals();
        match self.node(node).values.get(name) {
            Some(Object::Integer(value)) => Some(*value),
            _ => None,
        }
    }
}
