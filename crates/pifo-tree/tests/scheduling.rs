// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test readability over pedantic
#![allow(clippy::cast_possible_truncation)] // Test parameters
#![allow(clippy::too_many_lines)] // Test code

//! Scheduling order across the tree
//!
//! Single-leaf and multi-level ordering, consistency of root dequeues with
//! the leaf heads, and announcement bookkeeping.

use std::collections::{BTreeMap, HashSet};

use pifo_tree::pipeline::{
    AnnounceRank, Classify, EnqueueDecision, EnqueueMeta, FieldRank, FlowFields, MinRank, Stfq,
};
use pifo_tree::{EntryRef, MonitorParams, NodeId, PifoTree, QueueItem, QueueSize};

#[derive(Debug, Clone, PartialEq)]
struct Pkt {
    id: u32,
    rank: u64,
    class: u64,
    sub: u64,
    flow: u64,
    at: u64,
}

impl Pkt {
    fn new(id: u32, rank: u64) -> Self {
        Self {
            id,
            rank,
            class: 0,
            sub: 0,
            flow: 0,
            at: 0,
        }
    }

    fn class(mut self, class: u64) -> Self {
        self.class = class;
        self
    }

    fn sub(mut self, sub: u64) -> Self {
        self.sub = sub;
        self
    }

    fn flow(mut self, flow: u64) -> Self {
        self.flow = flow;
        self
    }

    fn at(mut self, at: u64) -> Self {
        self.at = at;
        self
    }
}

impl QueueItem for Pkt {
    fn size(&self) -> u32 {
        100
    }

    fn flow_fields(&self) -> FlowFields {
        FlowFields::new()
            .with("rank", self.rank)
            .with("class", self.class)
            .with("sub", self.sub)
            .with("flow", self.flow)
            .with("at", self.at)
    }
}

fn new_tree() -> PifoTree<Pkt> {
    PifoTree::new(QueueSize::Packets(10_000), MonitorParams::default()).expect("tree")
}

fn drain(tree: &mut PifoTree<Pkt>) -> Vec<Pkt> {
    std::iter::from_fn(|| tree.dequeue().expect("dequeue")).collect()
}

/// Root classifying on `class` into `n` leaves ranked by `rank`.
fn two_level(n: u64) -> (PifoTree<Pkt>, NodeId, Vec<NodeId>) {
    let mut tree = new_tree();
    let root = tree.add_node(false).unwrap();
    tree.add_pifos(root, 1).unwrap();
    let mut classify = Classify::new("class").rank(AnnounceRank::HeadRank);
    let mut leaves = Vec::new();
    for class in 0..n {
        let leaf = tree.add_node(true).unwrap();
        tree.add_pifos(leaf, 1).unwrap();
        tree.set_enqueue_pipeline(leaf, FieldRank::new("rank")).unwrap();
        tree.add_child(root, leaf).unwrap();
        classify = classify.route(class, leaf);
        leaves.push(leaf);
    }
    tree.set_enqueue_pipeline(root, classify).unwrap();
    tree.set_dequeue_pipeline(root, MinRank).unwrap();
    tree.activate().unwrap();
    (tree, root, leaves)
}

/// Number of announcements for pifo `pifo` of `child` held by its parent.
fn announcements_for(tree: &PifoTree<Pkt>, child: NodeId, pifo: usize) -> usize {
    let node = tree.get_node(child).unwrap();
    let Some(parent) = node.parent() else {
        return 0;
    };
    let parent = tree.get_node(parent).unwrap();
    (0..parent.pifo_count())
        .flat_map(|i| parent.pifo(i).unwrap().iter())
        .filter(|e| {
            matches!(e.reference(), EntryRef::Child { local_id, pifo: p }
                if *local_id == node.local_id() && *p == pifo)
        })
        .count()
}

fn assert_fresh(tree: &PifoTree<Pkt>) {
    for node in tree.nodes() {
        if node.parent().is_none() {
            continue;
        }
        for pifo in 0..node.pifo_count() {
            let held = announcements_for(tree, node.id(), pifo);
            let non_empty = !node.pifo(pifo).unwrap().is_empty();
            assert!(held <= 1, "node {} pifo {}: {} announcements", node.id(), pifo, held);
            assert_eq!(
                held == 1,
                non_empty,
                "node {} pifo {}: non_empty={} announcements={}",
                node.id(),
                pifo,
                non_empty,
                held
            );
        }
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_single_leaf_rank_order() {
    let mut tree = new_tree();
    let leaf = tree.add_node(true).unwrap();
    tree.add_pifos(leaf, 1).unwrap();
    tree.set_enqueue_pipeline(leaf, FieldRank::new("rank")).unwrap();
    tree.activate().unwrap();

    for (id, rank) in [(1, 30), (2, 20), (3, 10)] {
        assert!(tree.enqueue(Pkt::new(id, rank)).unwrap().is_enqueued());
    }
    let ranks: Vec<u64> = drain(&mut tree).iter().map(|p| p.rank).collect();
    assert_eq!(ranks, vec![10, 20, 30]);
    assert_eq!(tree.dequeue().unwrap(), None);
}

#[test]
fn test_two_leaves_served_by_rank() {
    let (mut tree, root, leaves) = two_level(2);
    tree.enqueue(Pkt::new(1, 15).class(1)).unwrap();
    tree.enqueue(Pkt::new(2, 5).class(0)).unwrap();

    assert_eq!(tree.dequeue().unwrap().map(|p| p.id), Some(2));
    assert_eq!(tree.dequeue().unwrap().map(|p| p.id), Some(1));
    for leaf in leaves {
        assert!(tree.get_node(leaf).unwrap().is_empty());
    }
    assert!(tree.get_node(root).unwrap().is_empty());
    assert!(tree.is_empty());

    let stats = tree.node_stats();
    // root holds announcements only: two published, two served
    assert_eq!((stats[0].arrivals, stats[0].served), (0, 2));
    for leaf in &stats[1..] {
        assert!(leaf.leaf);
        assert_eq!((leaf.arrivals, leaf.served, leaf.resident), (1, 1, 0));
    }
}

#[test]
fn test_child_priority_announcements() {
    let mut tree = new_tree();
    let root = tree.add_node(false).unwrap();
    let hi = tree.add_node(true).unwrap();
    let lo = tree.add_node(true).unwrap();
    for n in [root, hi, lo] {
        tree.add_pifos(n, 1).unwrap();
    }
    tree.add_child(root, hi).unwrap();
    tree.add_child(root, lo).unwrap();
    tree.set_enqueue_pipeline(
        root,
        Classify::new("class")
            .route(0, hi)
            .route(1, lo)
            .rank(AnnounceRank::ChildPriority),
    )
    .unwrap();
    tree.set_dequeue_pipeline(root, MinRank).unwrap();
    tree.activate().unwrap();

    for id in 0..3 {
        tree.enqueue(Pkt::new(id, 0).class(1)).unwrap();
    }
    for id in 3..6 {
        tree.enqueue(Pkt::new(id, 0).class(0)).unwrap();
    }
    let ids: Vec<u32> = drain(&mut tree).iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![3, 4, 5, 0, 1, 2]);
}

#[test]
fn test_stfq_alternates_flows() {
    let mut tree = new_tree();
    let leaf = tree.add_node(true).unwrap();
    tree.add_pifos(leaf, 1).unwrap();
    tree.set_enqueue_pipeline(leaf, Stfq::default()).unwrap();
    tree.activate().unwrap();

    for id in 0..4 {
        tree.enqueue(Pkt::new(id, 0).flow(1)).unwrap();
    }
    for id in 4..8 {
        tree.enqueue(Pkt::new(id, 0).flow(2)).unwrap();
    }
    let flows: Vec<u64> = drain(&mut tree).iter().map(|p| p.flow).collect();
    assert_eq!(flows, vec![1, 2, 1, 2, 1, 2, 1, 2]);
}

// ============================================================================
// Consistency
// ============================================================================

#[test]
fn test_lower_rank_behind_live_announcement_served_first() {
    let (mut tree, _, _) = two_level(2);
    tree.enqueue(Pkt::new(1, 15).class(0)).unwrap();
    tree.enqueue(Pkt::new(2, 10).class(1)).unwrap();
    tree.enqueue(Pkt::new(3, 1).class(0)).unwrap();
    assert_fresh(&tree);

    let ranks: Vec<u64> = drain(&mut tree).iter().map(|p| p.rank).collect();
    assert_eq!(ranks, vec![1, 10, 15]);
}

#[test]
fn test_two_level_global_rank_order() {
    // ranks are drawn at random, so leaf heads keep moving under live
    // announcements; the root must still serve in global rank order
    let mut rng = fastrand::Rng::with_seed(7);
    let (mut tree, _, _) = two_level(4);
    let mut resident: BTreeMap<u64, u32> = BTreeMap::new();

    for id in 0..400 {
        if rng.u8(0..3) > 0 || resident.is_empty() {
            let class = rng.u64(0..4);
            // unique ranks: low bits carry the class
            let mut rank = rng.u64(0..10_000) * 4 + class;
            while resident.contains_key(&rank) {
                rank += 4;
            }
            tree.enqueue(Pkt::new(id, rank).class(class)).unwrap();
            resident.insert(rank, id);
        } else {
            let (&min_rank, &min_id) = resident.iter().next().unwrap();
            let got = tree.dequeue().unwrap().expect("item");
            assert_eq!((got.rank, got.id), (min_rank, min_id));
            resident.remove(&min_rank);
        }
        assert_fresh(&tree);
    }
    assert!(tree.stats().retractions > 0);

    let rest: Vec<u64> = drain(&mut tree).iter().map(|p| p.rank).collect();
    let expected: Vec<u64> = resident.keys().copied().collect();
    assert_eq!(rest, expected);
}

#[test]
fn test_three_level_dequeue_follows_leaf_heads() {
    // root --class--> mid0, mid1 --sub--> two leaves each
    let mut tree = new_tree();
    let root = tree.add_node(false).unwrap();
    tree.add_pifos(root, 1).unwrap();
    let mut root_cls = Classify::new("class");
    let mut leaf_of = BTreeMap::new();
    for class in 0..2u64 {
        let mid = tree.add_node(false).unwrap();
        tree.add_pifos(mid, 1).unwrap();
        tree.add_child(root, mid).unwrap();
        root_cls = root_cls.route(class, mid);
        let mut mid_cls = Classify::new("sub");
        for sub in 0..2u64 {
            let leaf = tree.add_node(true).unwrap();
            tree.add_pifos(leaf, 1).unwrap();
            tree.set_enqueue_pipeline(leaf, FieldRank::new("rank")).unwrap();
            tree.add_child(mid, leaf).unwrap();
            mid_cls = mid_cls.route(sub, leaf);
            leaf_of.insert((class, sub), leaf);
        }
        tree.set_enqueue_pipeline(mid, mid_cls).unwrap();
        tree.set_dequeue_pipeline(mid, MinRank).unwrap();
    }
    tree.set_enqueue_pipeline(root, root_cls).unwrap();
    tree.set_dequeue_pipeline(root, MinRank).unwrap();
    tree.activate().unwrap();

    let mut rng = fastrand::Rng::with_seed(0xC0FFEE);
    let mut per_leaf: BTreeMap<NodeId, Vec<u64>> = BTreeMap::new();
    let mut seen = HashSet::new();
    let mut enqueued = 0;

    for id in 0..600 {
        if rng.u8(0..2) == 0 || tree.is_empty() {
            let (class, sub) = (rng.u64(0..2), rng.u64(0..2));
            let rank = rng.u64(0..1000);
            tree.enqueue(Pkt::new(id, rank).class(class).sub(sub)).unwrap();
            per_leaf.entry(leaf_of[&(class, sub)]).or_default().push(rank);
            enqueued += 1;
        } else {
            let peeked = tree.peek().unwrap().cloned();
            let got = tree.dequeue().unwrap().expect("item");
            assert_eq!(peeked.as_ref(), Some(&got));
            assert!(seen.insert(got.id), "item {} served twice", got.id);

            let global_min = per_leaf.values().flatten().min().copied();
            assert_eq!(Some(got.rank), global_min);

            // whatever the root picked must be the head of its own leaf
            let leaf = leaf_of[&(got.class, got.sub)];
            let ranks = per_leaf.get_mut(&leaf).unwrap();
            let min = *ranks.iter().min().unwrap();
            assert_eq!(got.rank, min);
            let pos = ranks.iter().position(|&r| r == min).unwrap();
            ranks.swap_remove(pos);
        }
        assert_fresh(&tree);
    }

    let served = seen.len() + drain(&mut tree).len();
    assert_eq!(served, enqueued);
    assert_eq!(tree.stats().dequeued_packets as usize, enqueued);
}

// ============================================================================
// Announcement freshness
// ============================================================================

#[test]
fn test_pending_refresh_superseded_by_earlier_head() {
    // leaf pipeline: rank from `rank`, readiness from `at`
    let mut tree = new_tree();
    let root = tree.add_node(false).unwrap();
    let leaf = tree.add_node(true).unwrap();
    tree.add_pifos(root, 1).unwrap();
    tree.add_pifos(leaf, 1).unwrap();
    tree.add_child(root, leaf).unwrap();
    tree.set_enqueue_pipeline(root, Classify::new("class").default_child(leaf))
        .unwrap();
    tree.set_dequeue_pipeline(root, MinRank).unwrap();
    tree.set_enqueue_pipeline(leaf, |m: &EnqueueMeta| {
        EnqueueDecision::push(0, m.flow.get("rank").unwrap_or(0))
            .at(m.flow.get("at").unwrap_or(0))
    })
    .unwrap();
    tree.activate().unwrap();

    tree.enqueue(Pkt::new(1, 50).at(5_000)).unwrap();
    assert_eq!(tree.pending_events(), 1);
    tree.enqueue(Pkt::new(2, 10).at(1_000)).unwrap();
    // the later refresh was cancelled, not duplicated
    assert_eq!(tree.pending_events(), 1);
    assert_eq!(tree.next_ready_time(), Some(1_000));
    assert_eq!(tree.dequeue().unwrap(), None);

    tree.advance_to(1_000).unwrap();
    assert_eq!(announcements_for(&tree, leaf, 0), 1);
    tree.advance_to(10_000).unwrap();
    assert_eq!(announcements_for(&tree, leaf, 0), 1);
    assert_eq!(tree.stats().announcements, 1);

    assert_eq!(tree.dequeue().unwrap().map(|p| p.id), Some(2));
    assert_eq!(tree.dequeue().unwrap().map(|p| p.id), Some(1));
    assert_eq!(announcements_for(&tree, leaf, 0), 0);
}

#[test]
fn test_live_announcement_not_duplicated() {
    let (mut tree, _, leaves) = two_level(1);
    for id in 0..10 {
        // every push lowers the head rank
        tree.enqueue(Pkt::new(id, 10 - u64::from(id))).unwrap();
        assert_eq!(announcements_for(&tree, leaves[0], 0), 1);
    }
    // each new head replaced the previous announcement
    assert_eq!(tree.stats().announcements, 10);
    assert_eq!(tree.stats().retractions, 9);
    assert_eq!(tree.dequeue().unwrap().map(|p| p.id), Some(9));
    assert_eq!(announcements_for(&tree, leaves[0], 0), 1);

    // pushes behind the head leave the live announcement alone
    for id in 10..15 {
        tree.enqueue(Pkt::new(id, 100)).unwrap();
    }
    assert_eq!(tree.stats().retractions, 9);
    assert_eq!(announcements_for(&tree, leaves[0], 0), 1);
}

#[test]
fn test_parent_occupancy_matches_announced_children() {
    let (mut tree, root, leaves) = two_level(3);
    for id in 0..30 {
        tree.enqueue(Pkt::new(id, u64::from(id)).class(u64::from(id % 3)))
            .unwrap();
    }
    assert_eq!(tree.get_node(root).unwrap().len(), 3);
    for leaf in &leaves {
        assert_eq!(tree.get_node(*leaf).unwrap().len(), 10);
    }

    for _ in 0..25 {
        tree.dequeue().unwrap();
        let non_empty = leaves
            .iter()
            .filter(|l| !tree.get_node(**l).unwrap().is_empty())
            .count();
        assert_eq!(tree.get_node(root).unwrap().len(), non_empty);
    }
}
