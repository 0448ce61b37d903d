use std::collections::HashMap;
use std::fmt;

use super::html::{is_void_tag, parse_html};
use super::{Error, Result};

/// Handle to a node in a [`Dom`] arena.
///
/// Ids are never reused, so a handle to a removed node stays valid; it just
/// stops being connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum NodeType {
    Document,
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) node_type: NodeType,
}

#[derive(Debug, Clone)]
pub(crate) struct Element {
    pub(crate) tag_name: String,
    pub(crate) attrs: HashMap<String, String>,
}

/// A change observed on a connected part of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRecord {
    ChildList {
        target: NodeId,
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
    Attributes {
        target: NodeId,
        name: String,
    },
}

impl MutationRecord {
    pub fn is_child_list(&self) -> bool {
        matches!(self, Self::ChildList { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Dom {
    pub(crate) nodes: Vec<Node>,
    root: NodeId,
    pending_mutations: Vec<MutationRecord>,
}

impl Default for Dom {
    fn default() -> Self {
        Self::new()
    }
}

impl Dom {
    pub fn new() -> Self {
        let root = Node {
            parent: None,
            children: Vec::new(),
            node_type: NodeType::Document,
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
            pending_mutations: Vec::new(),
        }
    }

    pub fn parse(html: &str) -> Result<Self> {
        parse_html(html)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn create_node(&mut self, parent: Option<NodeId>, node_type: NodeType) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent,
            children: Vec::new(),
            node_type,
        });
        if let Some(parent_id) = parent {
            self.nodes[parent_id.0].children.push(id);
        }
        id
    }

    pub(crate) fn create_element_in(
        &mut self,
        parent: NodeId,
        tag_name: String,
        attrs: HashMap<String, String>,
    ) -> NodeId {
        self.create_node(Some(parent), NodeType::Element(Element { tag_name, attrs }))
    }

    pub(crate) fn create_text_in(&mut self, parent: NodeId, text: String) -> NodeId {
        self.create_node(Some(parent), NodeType::Text(text))
    }

    pub(crate) fn create_comment_in(&mut self, parent: NodeId, text: String) -> NodeId {
        self.create_node(Some(parent), NodeType::Comment(text))
    }

    /// Creates an element that is not attached anywhere yet.
    pub fn create_element(&mut self, tag_name: &str) -> NodeId {
        let element = Element {
            tag_name: tag_name.to_ascii_lowercase(),
            attrs: HashMap::new(),
        };
        self.create_node(None, NodeType::Element(element))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.create_node(None, NodeType::Text(text.to_string()))
    }

    fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(node_id.0)
    }

    pub(crate) fn element(&self, node_id: NodeId) -> Option<&Element> {
        match &self.node(node_id)?.node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    fn element_mut(&mut self, node_id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes.get_mut(node_id.0)?.node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn is_element(&self, node_id: NodeId) -> bool {
        self.element(node_id).is_some()
    }

    pub fn tag_name(&self, node_id: NodeId) -> Option<&str> {
        self.element(node_id).map(|e| e.tag_name.as_str())
    }

    pub fn parent(&self, node_id: NodeId) -> Option<NodeId> {
        self.node(node_id).and_then(|node| node.parent)
    }

    /// Parent if it is an element; `None` at the top of the element tree.
    pub fn parent_element(&self, node_id: NodeId) -> Option<NodeId> {
        self.parent(node_id).filter(|parent| self.is_element(*parent))
    }

    pub fn children(&self, node_id: NodeId) -> &[NodeId] {
        self.node(node_id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    /// Element children in document order.
    pub fn element_children(&self, node_id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(node_id)
            .iter()
            .copied()
            .filter(|child| self.is_element(*child))
    }

    pub fn is_valid_node(&self, node_id: NodeId) -> bool {
        node_id.0 < self.nodes.len()
    }

    pub fn is_connected(&self, node_id: NodeId) -> bool {
        if !self.is_valid_node(node_id) {
            return false;
        }
        let mut cursor = Some(node_id);
        while let Some(node) = cursor {
            if node == self.root {
                return true;
            }
            cursor = self.parent(node);
        }
        false
    }

    fn can_have_children(&self, node_id: NodeId) -> bool {
        matches!(
            self.node(node_id).map(|n| &n.node_type),
            Some(NodeType::Document | NodeType::Element(_))
        )
    }

    pub fn attr(&self, node_id: NodeId, name: &str) -> Option<&str> {
        self.element(node_id)
            .and_then(|e| e.attrs.get(&name.to_ascii_lowercase()))
            .map(String::as_str)
    }

    pub fn has_attr(&self, node_id: NodeId, name: &str) -> bool {
        self.attr(node_id, name).is_some()
    }

    pub fn set_attr(&mut self, node_id: NodeId, name: &str, value: &str) -> Result<()> {
        let connected = self.is_connected(node_id);
        let lowered = name.to_ascii_lowercase();
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::InvalidNode("setAttribute target is not an element".into()))?;
        element.attrs.insert(lowered.clone(), value.to_string());
        if connected {
            self.pending_mutations.push(MutationRecord::Attributes {
                target: node_id,
                name: lowered,
            });
        }
        Ok(())
    }

    pub fn remove_attr(&mut self, node_id: NodeId, name: &str) -> Result<()> {
        let connected = self.is_connected(node_id);
        let lowered = name.to_ascii_lowercase();
        let element = self.element_mut(node_id).ok_or_else(|| {
            Error::InvalidNode("removeAttribute target is not an element".into())
        })?;
        if element.attrs.remove(&lowered).is_some() && connected {
            self.pending_mutations.push(MutationRecord::Attributes {
                target: node_id,
                name: lowered,
            });
        }
        Ok(())
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.insert_before(parent, child, None)
    }

    /// Inserts `child` before `reference`, or at the end when `reference`
    /// is `None`. A node that already has a parent is moved.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<()> {
        if !self.can_have_children(parent) {
            return Err(Error::InvalidNode(
                "insertion target cannot have children".into(),
            ));
        }
        if child == self.root || child == parent {
            return Err(Error::InvalidNode("invalid insertion node".into()));
        }
        if !self.is_valid_node(child) {
            return Err(Error::InvalidNode("inserted node is invalid".into()));
        }

        // Prevent cycles: parent must not be inside child's subtree.
        let mut cursor = Some(parent);
        while let Some(node) = cursor {
            if node == child {
                return Err(Error::InvalidNode("appendChild would create a cycle".into()));
            }
            cursor = self.parent(node);
        }

        if let Some(reference) = reference {
            if reference == child || self.parent(reference) != Some(parent) {
                return Err(Error::InvalidNode(
                    "insertBefore reference is not a child of the target".into(),
                ));
            }
        }

        self.detach(child);
        let position = reference
            .and_then(|reference| {
                self.nodes[parent.0]
                    .children
                    .iter()
                    .position(|id| *id == reference)
            })
            .unwrap_or(self.nodes[parent.0].children.len());
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.insert(position, child);
        if self.is_connected(parent) {
            self.pending_mutations.push(MutationRecord::ChildList {
                target: parent,
                added: vec![child],
                removed: Vec::new(),
            });
        }
        Ok(())
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if self.parent(child) != Some(parent) {
            return Err(Error::InvalidNode(
                "removeChild target is not a direct child".into(),
            ));
        }
        self.detach(child);
        Ok(())
    }

    pub fn remove_node(&mut self, node: NodeId) -> Result<()> {
        if node == self.root {
            return Err(Error::InvalidNode("cannot remove document root".into()));
        }
        let Some(parent) = self.parent(node) else {
            return Ok(());
        };
        self.remove_child(parent, node)
    }

    /// Removes every child of `node`, recording one child-list change.
    pub fn clear_children(&mut self, node: NodeId) -> Result<()> {
        if !self.can_have_children(node) {
            return Err(Error::InvalidNode("target cannot have children".into()));
        }
        let removed = std::mem::take(&mut self.nodes[node.0].children);
        for child in &removed {
            self.nodes[child.0].parent = None;
        }
        if !removed.is_empty() && self.is_connected(node) {
            self.pending_mutations.push(MutationRecord::ChildList {
                target: node,
                added: Vec::new(),
                removed,
            });
        }
        Ok(())
    }

    fn detach(&mut self, child: NodeId) {
        let Some(old_parent) = self.parent(child) else {
            return;
        };
        let was_connected = self.is_connected(old_parent);
        self.nodes[old_parent.0].children.retain(|id| *id != child);
        self.nodes[child.0].parent = None;
        if was_connected {
            self.pending_mutations.push(MutationRecord::ChildList {
                target: old_parent,
                added: Vec::new(),
                removed: vec![child],
            });
        }
    }

    /// Moves every top-level node of `fragment` to the end of `parent`.
    pub(crate) fn adopt_fragment(&mut self, parent: NodeId, fragment: &Dom) -> Result<Vec<NodeId>> {
        let mut added = Vec::new();
        for child in fragment.children(fragment.root) {
            let node = self.clone_subtree_from(fragment, *child, None)?;
            self.append_child(parent, node)?;
            added.push(node);
        }
        Ok(added)
    }

    fn clone_subtree_from(
        &mut self,
        source: &Dom,
        source_node: NodeId,
        parent: Option<NodeId>,
    ) -> Result<NodeId> {
        let node_type = match &source.nodes[source_node.0].node_type {
            NodeType::Document => {
                return Err(Error::InvalidNode(
                    "cannot clone a document node into a fragment".into(),
                ));
            }
            other => other.clone(),
        };
        let node = self.create_node(parent, node_type);
        let mut stack = vec![(source_node, node)];
        while let Some((from, to)) = stack.pop() {
            for child in &source.nodes[from.0].children {
                let copy = self.create_node(Some(to), source.nodes[child.0].node_type.clone());
                stack.push((*child, copy));
            }
        }
        Ok(node)
    }

    pub fn has_pending_mutations(&self) -> bool {
        !self.pending_mutations.is_empty()
    }

    pub fn take_mutations(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.pending_mutations)
    }

    pub fn all_element_nodes(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            if self.is_element(node) {
                out.push(node);
            }
            for child in self.children(node).iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    pub fn dump_node(&self, node_id: NodeId) -> String {
        let mut out = String::new();
        self.dump_into(node_id, &mut out);
        out
    }

    fn dump_into(&self, node_id: NodeId, out: &mut String) {
        let Some(node) = self.node(node_id) else {
            return;
        };
        stacker::maybe_grow(64 * 1024, 4 * 1024 * 1024, || match &node.node_type {
            NodeType::Document => {
                for child in &node.children {
                    self.dump_into(*child, out);
                }
            }
            NodeType::Text(text) => out.push_str(text),
            NodeType::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
            NodeType::Element(element) => {
                out.push('<');
                out.push_str(&element.tag_name);
                let mut attrs = element.attrs.iter().collect::<Vec<_>>();
                attrs.sort();
                for (k, v) in attrs {
                    out.push(' ');
                    out.push_str(k);
                    out.push_str("=\"");
                    out.push_str(v);
                    out.push('"');
                }
                out.push('>');
                if is_void_tag(&element.tag_name) {
                    return;
                }
                for child in &node.children {
                    self.dump_into(*child, out);
                }
                out.push_str("</");
                out.push_str(&element.tag_name);
                out.push('>');
            }
        });
    }
}
