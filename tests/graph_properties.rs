//! Property-based checks on the graph model's core invariants.

use labsched::graph::{Graph, GraphError, Node};
use proptest::prelude::*;

proptest! {
    /// A graph built by attaching N fresh protocol nodes anywhere in the
    /// existing tree always has exactly N+1 nodes (the root plus each
    /// attached node), regardless of attach order.
    #[test]
    fn attaching_fresh_nodes_never_loses_or_duplicates_a_node(parent_choices in proptest::collection::vec(0usize..5, 1..20)) {
        let mut g = Graph::new();
        let mut ids = vec![g.root_id()];

        for choice in parent_choices {
            let parent = ids[choice % ids.len()];
            let id = g.attach(parent, Node::new_protocol("P", 1)).unwrap();
            ids.push(id);
        }

        prop_assert_eq!(g.flatten().len(), ids.len());
    }

    /// Re-attaching any identifier already present in the tree, anywhere
    /// else in the tree, is always rejected as a cycle and never mutates
    /// the tree's node count.
    #[test]
    fn reusing_an_existing_identifier_is_always_rejected(depth in 1usize..10) {
        let mut g = Graph::new();
        let mut last = g.root_id();
        for i in 0..depth {
            last = g.attach(last, Node::new_protocol(format!("P{i}"), 1)).unwrap();
        }
        let before = g.flatten().len();

        let mut dup = Node::new_protocol("dup", 1);
        if let Node::Protocol(p) = &mut dup {
            p.id = last;
        }
        let err = g.attach(g.root_id(), dup).unwrap_err();

        prop_assert!(matches!(err, GraphError::Cycle { id } if id == last));
        prop_assert_eq!(g.flatten().len(), before);
    }
}
