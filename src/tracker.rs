use crate::dom::{Dom, MutationRecord, NodeId};

/// Remembers the node most recently targeted by an interaction.
///
/// The slot never owns the node. Liveness is checked when a mutation batch
/// arrives and again whenever the slot is read.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTracker {
    slot: Option<NodeId>,
}

impl ReferenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, target: NodeId) {
        self.slot = Some(target);
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }

    /// Raw slot value, without a liveness check.
    pub fn held(&self) -> Option<NodeId> {
        self.slot
    }

    /// Handles one mutation batch. Returns `true` if the slot was cleared.
    pub fn observe(&mut self, dom: &Dom, batch: &[MutationRecord]) -> bool {
        if !batch.iter().any(MutationRecord::is_child_list) {
            return false;
        }
        match self.slot {
            Some(node) if !dom.is_connected(node) => {
                self.slot = None;
                true
            }
            _ => false,
        }
    }

    /// The held node if it is still attached to the document.
    pub fn current(&self, dom: &Dom) -> Option<NodeId> {
        self.slot.filter(|node| dom.is_connected(*node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;

    #[test]
    fn batch_that_detaches_the_node_clears_the_slot() -> Result<()> {
        let mut dom = Dom::parse("<div><span>hi</span></div>")?;
        let span = dom.all_element_nodes()[1];
        let mut tracker = ReferenceTracker::new();
        tracker.record(span);
        assert_eq!(tracker.current(&dom), Some(span));

        dom.remove_node(span)?;
        let batch = dom.take_mutations();
        assert!(tracker.observe(&dom, &batch));
        assert_eq!(tracker.held(), None);
        Ok(())
    }

    #[test]
    fn unrelated_batches_keep_the_slot() -> Result<()> {
        let mut dom = Dom::parse("<div><span></span><p></p></div>")?;
        let nodes = dom.all_element_nodes();
        let mut tracker = ReferenceTracker::new();
        tracker.record(nodes[1]);

        dom.remove_node(nodes[2])?;
        dom.set_attr(nodes[1], "class", "x")?;
        let batch = dom.take_mutations();
        assert!(!tracker.observe(&dom, &batch));
        assert_eq!(tracker.held(), Some(nodes[1]));
        Ok(())
    }

    #[test]
    fn stale_slot_reads_as_empty_before_any_batch() -> Result<()> {
        let mut dom = Dom::parse("<div><img></div>")?;
        let nodes = dom.all_element_nodes();
        let mut tracker = ReferenceTracker::new();
        tracker.record(nodes[1]);

        dom.remove_node(nodes[0])?;
        assert_eq!(tracker.held(), Some(nodes[1]));
        assert_eq!(tracker.current(&dom), None);
        Ok(())
    }

    #[test]
    fn reattached_node_survives_batch() -> Result<()> {
        let mut dom = Dom::parse("<div id='a'><img></div><div id='b'></div>")?;
        let nodes = dom.all_element_nodes();
        let (img, b) = (nodes[1], nodes[2]);
        let mut tracker = ReferenceTracker::new();
        tracker.record(img);

        dom.append_child(b, img)?;
        let batch = dom.take_mutations();
        assert_eq!(batch.len(), 2);
        assert!(!tracker.observe(&dom, &batch));
        assert_eq!(tracker.current(&dom), Some(img));
        Ok(())
    }
}
