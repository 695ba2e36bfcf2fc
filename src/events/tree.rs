//! The event tree model, independent of any view.
//!
//! Nodes are addressed by their index path from the roots of an
//! [`EventTree`] (or from a subtree's own node for [`EventNode`] methods).

use super::event::{Event, EventId, EventKind};
use crate::config::ConfigFields;

/// A node of the event tree and everything below it.
///
/// Cloning a node copies the whole subtree by value.
#[derive(Debug, Clone, PartialEq)]
pub struct EventNode {
    pub text: String,
    pub icon: String,
    pub event: Event,
    pub expanded: bool,
    pub children: Vec<EventNode>,
}

impl EventNode {
    pub fn new(event: Event) -> EventNode {
        EventNode {
            text: event.name.clone(),
            icon: event.kind.icon().to_string(),
            event,
            expanded: true,
            children: Vec::new(),
        }
    }

    pub fn from_kind(kind: EventKind) -> EventNode {
        EventNode::new(Event::new(kind))
    }

    /// Builder form of [`EventNode::append`].
    pub fn with_child(mut self, child: EventNode) -> EventNode {
        self.children.push(child);
        self
    }

    pub fn append(&mut self, child: EventNode) {
        self.children.push(child);
    }

    /// Inserts at `position`, appending when it is past the end.
    pub fn insert(&mut self, position: usize, child: EventNode) {
        let position = position.min(self.children.len());
        self.children.insert(position, child);
    }

    pub fn remove(&mut self, position: usize) -> Option<EventNode> {
        (position < self.children.len()).then(|| self.children.remove(position))
    }

    /// Levels in this subtree; a leaf has depth 1.
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(EventNode::depth).max().unwrap_or(0)
    }

    /// Nodes in this subtree whose attribute `name` equals `value`.
    pub fn count_attribute(&self, name: &str, value: &str) -> usize {
        let own = usize::from(self.event.kind.get_config(name).as_deref() == Some(value));
        own + self
            .children
            .iter()
            .map(|c| c.count_attribute(name, value))
            .sum::<usize>()
    }

    pub fn contains(&self, id: EventId) -> bool {
        self.find(id).is_some()
    }

    /// Path of the node holding event `id`; the empty path is this node.
    pub fn find(&self, id: EventId) -> Option<Vec<usize>> {
        if self.event.id == id {
            return Some(Vec::new());
        }
        self.children.iter().enumerate().find_map(|(i, child)| {
            child.find(id).map(|mut path| {
                path.insert(0, i);
                path
            })
        })
    }

    pub fn node_at(&self, path: &[usize]) -> Option<&EventNode> {
        match path.split_first() {
            None => Some(self),
            Some((first, rest)) => self.children.get(*first)?.node_at(rest),
        }
    }

    pub fn node_at_mut(&mut self, path: &[usize]) -> Option<&mut EventNode> {
        match path.split_first() {
            None => Some(self),
            Some((first, rest)) => self.children.get_mut(*first)?.node_at_mut(rest),
        }
    }

    /// A copy of the subtree whose events all have fresh ids.
    pub fn duplicate(&self) -> EventNode {
        let mut copy = self.clone();
        copy.visit_mut(&mut |node| node.event.id = EventId::new());
        copy
    }

    /// Nodes in pre-order, this node first.
    pub fn iter(&self) -> impl Iterator<Item = &EventNode> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    pub fn visit_mut(&mut self, f: &mut impl FnMut(&mut EventNode)) {
        f(self);
        for child in &mut self.children {
            child.visit_mut(f);
        }
    }

    /// Equality ignoring event ids and everything shape inference attaches.
    pub fn same_structure(&self, other: &EventNode) -> bool {
        self.text == other.text
            && self.expanded == other.expanded
            && self.event.name == other.event.name
            && self.event.is_active == other.event.is_active
            && self.event.class() == other.event.class()
            && self.event.kind.config_values() == other.event.kind.config_values()
            && self.children.len() == other.children.len()
            && self
                .children
                .iter()
                .zip(&other.children)
                .all(|(a, b)| a.same_structure(b))
    }
}

/// The top-level list of sequences.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventTree {
    pub roots: Vec<EventNode>,
}

impl EventTree {
    pub fn new() -> EventTree {
        EventTree::default()
    }

    /// Runnable roots, that is the sequence nodes.
    pub fn sequences(&self) -> impl Iterator<Item = &EventNode> {
        self.roots.iter().filter(|n| n.event.kind.is_root())
    }

    pub fn node_at(&self, path: &[usize]) -> Option<&EventNode> {
        let (first, rest) = path.split_first()?;
        self.roots.get(*first)?.node_at(rest)
    }

    pub fn node_at_mut(&mut self, path: &[usize]) -> Option<&mut EventNode> {
        let (first, rest) = path.split_first()?;
        self.roots.get_mut(*first)?.node_at_mut(rest)
    }

    pub fn find(&self, id: EventId) -> Option<Vec<usize>> {
        self.roots.iter().enumerate().find_map(|(i, root)| {
            root.find(id).map(|mut path| {
                path.insert(0, i);
                path
            })
        })
    }

    fn siblings_mut(&mut self, parent: &[usize]) -> Option<&mut Vec<EventNode>> {
        if parent.is_empty() {
            Some(&mut self.roots)
        } else {
            self.node_at_mut(parent).map(|n| &mut n.children)
        }
    }

    /// Moves the node at `path` before the previous sibling accepted by `filter`.
    ///
    /// Returns the new path, or `None` when nothing moved.
    pub fn move_up(&mut self, path: &[usize], filter: Option<&dyn Fn(&Event) -> bool>) -> Option<Vec<usize>> {
        let (index, parent) = path.split_last()?;
        let siblings = self.siblings_mut(parent)?;
        if *index >= siblings.len() {
            return None;
        }
        let target = (0..*index)
            .rev()
            .find(|i| filter.is_none_or(|f| f(&siblings[*i].event)))?;
        let node = siblings.remove(*index);
        siblings.insert(target, node);
        let mut moved = parent.to_vec();
        moved.push(target);
        Some(moved)
    }

    /// Moves the node at `path` after the next sibling accepted by `filter`.
    pub fn move_down(&mut self, path: &[usize], filter: Option<&dyn Fn(&Event) -> bool>) -> Option<Vec<usize>> {
        let (index, parent) = path.split_last()?;
        let siblings = self.siblings_mut(parent)?;
        if *index >= siblings.len() {
            return None;
        }
        let target = (*index + 1..siblings.len()).find(|i| filter.is_none_or(|f| f(&siblings[*i].event)))?;
        let node = siblings.remove(*index);
        siblings.insert(target, node);
        let mut moved = parent.to_vec();
        moved.push(target);
        Some(moved)
    }
}
