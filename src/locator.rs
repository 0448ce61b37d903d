//! Budgeted ascend-then-search lookup of media near an interaction point.
//!
//! Starting from the interaction target, the locator climbs one ancestor at
//! a time and runs a depth-limited breadth-first search below each ancestor.
//! The first level that yields media wins. Every element dequeued by any of
//! the searches is charged against one node-visit budget, so the total work
//! of a call is bounded no matter how deep or wide the page is.

use std::collections::{HashSet, VecDeque};

use crate::dom::{Dom, NodeId};
use crate::media::is_media;

/// Limits for one [`NodeLocator::locate`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    min_ancestor_levels_before_search: usize,
    max_ancestor_levels: usize,
    max_descendant_depth: usize,
    max_nodes_visited: usize,
    max_media_per_result: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            min_ancestor_levels_before_search: 0,
            max_ancestor_levels: 8,
            max_descendant_depth: 5,
            max_nodes_visited: 2500,
            max_media_per_result: 20,
        }
    }
}

impl SearchOptions {
    /// Ancestor levels to climb before the first descendant search.
    pub fn with_min_ancestor_levels_before_search(mut self, levels: usize) -> Self {
        self.min_ancestor_levels_before_search = levels;
        self
    }

    pub fn with_max_ancestor_levels(mut self, levels: usize) -> Self {
        self.max_ancestor_levels = levels;
        self
    }

    pub fn with_max_descendant_depth(mut self, depth: usize) -> Self {
        self.max_descendant_depth = depth;
        self
    }

    pub fn with_max_nodes_visited(mut self, nodes: usize) -> Self {
        self.max_nodes_visited = nodes;
        self
    }

    pub fn with_max_media_per_result(mut self, count: usize) -> Self {
        self.max_media_per_result = count;
        self
    }

    pub fn min_ancestor_levels_before_search(&self) -> usize {
        self.min_ancestor_levels_before_search
    }

    pub fn max_ancestor_levels(&self) -> usize {
        self.max_ancestor_levels
    }

    pub fn max_descendant_depth(&self) -> usize {
        self.max_descendant_depth
    }

    pub fn max_nodes_visited(&self) -> usize {
        self.max_nodes_visited
    }

    pub fn max_media_per_result(&self) -> usize {
        self.max_media_per_result
    }

    /// Highest ancestor level the climb may reach.
    pub fn climb_limit(&self) -> usize {
        self.max_ancestor_levels
            .max(self.min_ancestor_levels_before_search)
    }
}

/// Result of a locate call, with the work it took.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Located {
    pub elements: Vec<NodeId>,
    pub nodes_visited: usize,
    pub levels_climbed: usize,
    /// Ancestor level that produced `elements`, `Some(0)` for the start node.
    pub matched_level: Option<usize>,
}

impl Located {
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn into_vec(self) -> Vec<NodeId> {
        self.elements
    }
}

struct VisitBudget {
    limit: usize,
    used: usize,
}

impl VisitBudget {
    fn new(limit: usize) -> Self {
        Self { limit, used: 0 }
    }

    fn try_visit(&mut self) -> bool {
        if self.used >= self.limit {
            return false;
        }
        self.used += 1;
        true
    }

    fn exhausted(&self) -> bool {
        self.used >= self.limit
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NodeLocator {
    options: SearchOptions,
}

impl NodeLocator {
    pub fn new(options: SearchOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    /// Finds the media nearest to `start`.
    ///
    /// A missing, detached or non-element start yields an empty result.
    pub fn locate(&self, dom: &Dom, start: Option<NodeId>) -> Located {
        let mut located = Located::default();
        let Some(start) = start else {
            return located;
        };
        if !dom.is_element(start) || !dom.is_connected(start) {
            return located;
        }

        if is_media(dom, start) {
            located.elements.push(start);
            located.matched_level = Some(0);
            return located;
        }

        let opts = &self.options;
        let climb_limit = opts.climb_limit();
        let mut budget = VisitBudget::new(opts.max_nodes_visited);
        let mut current = start;
        let mut level = 0usize;

        loop {
            // Shapes inside an inline graphic reach their root this way.
            if level > 0 && is_media(dom, current) {
                if opts.max_media_per_result > 0 {
                    located.elements.push(current);
                    located.matched_level = Some(level);
                }
                break;
            }

            let parent = dom.parent_element(current);
            if level >= opts.min_ancestor_levels_before_search || parent.is_none() {
                let found = self.search_descendants(dom, current, &mut budget);
                if !found.is_empty() {
                    located.elements = dedupe(found, opts.max_media_per_result);
                    located.matched_level = Some(level);
                    break;
                }
            }

            let Some(parent) = parent else {
                break;
            };
            if level >= climb_limit || budget.exhausted() {
                break;
            }
            current = parent;
            level += 1;
        }

        located.levels_climbed = level;
        located.nodes_visited = budget.used;
        located
    }

    fn search_descendants(&self, dom: &Dom, root: NodeId, budget: &mut VisitBudget) -> Vec<NodeId> {
        let opts = &self.options;
        let mut found = Vec::new();
        if opts.max_media_per_result == 0 {
            return found;
        }

        let mut queue = VecDeque::from([(root, 0usize)]);
        while let Some((node, depth)) = queue.pop_front() {
            if !budget.try_visit() {
                break;
            }

            if node != root && is_media(dom, node) {
                found.push(node);
                if found.len() >= opts.max_media_per_result {
                    break;
                }
                continue;
            }

            if depth < opts.max_descendant_depth {
                queue.extend(dom.element_children(node).map(|child| (child, depth + 1)));
            }
        }
        found
    }
}

fn dedupe(found: Vec<NodeId>, cap: usize) -> Vec<NodeId> {
    let mut seen = HashSet::with_capacity(found.len());
    let mut unique = Vec::with_capacity(found.len().min(cap));
    for node in found {
        if seen.insert(node) {
            unique.push(node);
            if unique.len() >= cap {
                break;
            }
        }
    }
    unique
}

/// Locates with the given options and returns only the elements.
pub fn locate_nearby_media(dom: &Dom, start: NodeId, options: &SearchOptions) -> Vec<NodeId> {
    NodeLocator::new(*options).locate(dom, Some(start)).into_vec()
}
