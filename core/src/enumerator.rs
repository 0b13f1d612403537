//! Breadth-first descendant enumeration over either tree.
//!
//! A revisit can only happen if the arena is corrupt, so it is reported as
//! a cycle rather than skipped.

use crate::{
    error::EngineResult,
    graph::NetworkGraph,
    types::{EdgeType, MemberId, MemberStatus, Side},
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Descendant indexes of `root`, nearest level first.
pub fn descendants(
    graph: &NetworkGraph,
    root: usize,
    edge: EdgeType,
    side: Option<Side>,
) -> EngineResult<Vec<usize>> {
    let mut visited = vec![false; graph.len()];
    visited[root] = true;
    let mut queue = VecDeque::new();
    let mut out = Vec::new();

    match (edge, side) {
        (EdgeType::Placement, Some(side)) => {
            queue.extend(graph.node(root).child(side).map(|c| (c, 1usize)));
        }
        _ => queue.extend(children(graph, root, edge).into_iter().map(|c| (c, 1usize))),
    }

    while let Some((idx, depth)) = queue.pop_front() {
        if visited[idx] {
            return Err(graph.cycle(idx, "enumerate", depth));
        }
        visited[idx] = true;
        out.push(idx);
        queue.extend(children(graph, idx, edge).into_iter().map(|c| (c, depth + 1)));
    }

    if let (EdgeType::Sponsor, Some(side)) = (edge, side) {
        let mut kept = Vec::with_capacity(out.len());
        for idx in out {
            if graph.leg_of(root, idx)? == Some(side) {
                kept.push(idx);
            }
        }
        return Ok(kept);
    }
    Ok(out)
}

/// `enumerate(rootId, edgeType, sideFilter)` by member id.
///
/// For the sponsor tree the side filter selects sponsored descendants by the
/// placement leg of `root_id` they sit in.
pub fn enumerate(
    graph: &NetworkGraph,
    root_id: &str,
    edge: EdgeType,
    side: Option<Side>,
) -> EngineResult<Vec<MemberId>> {
    let root = graph.index_of(root_id)?;
    Ok(descendants(graph, root, edge, side)?
        .into_iter()
        .map(|idx| graph.id(idx).to_string())
        .collect())
}

fn children(graph: &NetworkGraph, idx: usize, edge: EdgeType) -> Vec<usize> {
    let node = graph.node(idx);
    match edge {
        EdgeType::Placement => node.left.into_iter().chain(node.right).collect(),
        EdgeType::Sponsor   => node.sponsored.clone(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamStats {
    pub member_id:        MemberId,
    pub direct_referrals: usize,
    pub total_downline:   usize,
    pub active:           usize,
    pub inactive:         usize,
    pub placement_left:   usize,
    pub placement_right:  usize,
    pub sponsor_left:     usize,
    pub sponsor_right:    usize,
}

/// Downline counts for one member. Totals follow the placement tree;
/// sponsor counts are split by placement leg.
pub fn team_stats(graph: &NetworkGraph, member_id: &str) -> EngineResult<TeamStats> {
    let root = graph.index_of(member_id)?;
    let left = descendants(graph, root, EdgeType::Placement, Some(Side::Left))?;
    let right = descendants(graph, root, EdgeType::Placement, Some(Side::Right))?;

    let mut stats = TeamStats {
        member_id:        member_id.to_string(),
        direct_referrals: graph.node(root).sponsored.len(),
        total_downline:   left.len() + right.len(),
        placement_left:   left.len(),
        placement_right:  right.len(),
        ..Default::default()
    };
    for idx in left.iter().chain(&right) {
        match graph.node(*idx).status {
            MemberStatus::Active => stats.active += 1,
            _                    => stats.inactive += 1,
        }
    }
    for idx in descendants(graph, root, EdgeType::Sponsor, None)? {
        match graph.leg_of(root, idx)? {
            Some(Side::Left)  => stats.sponsor_left += 1,
            Some(Side::Right) => stats.sponsor_right += 1,
            None              => {}
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn graph() -> NetworkGraph {
        let day = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut g = NetworkGraph::new(32);
        g.attach_root("R", day).unwrap();
        g.attach("A", "R", "R", Side::Left, MemberStatus::Active, day).unwrap();
        g.attach("B", "R", "R", Side::Right, MemberStatus::Inactive, day).unwrap();
        g.attach("C", "A", "A", Side::Left, MemberStatus::Active, day).unwrap();
        // Sponsored by R but spilled into A's right slot.
        g.attach("D", "R", "A", Side::Right, MemberStatus::Active, day).unwrap();
        g
    }

    #[test]
    fn placement_enumeration_is_breadth_first() {
        let g = graph();
        assert_eq!(enumerate(&g, "R", EdgeType::Placement, None).unwrap(), ["A", "B", "C", "D"]);
        assert_eq!(enumerate(&g, "R", EdgeType::Placement, Some(Side::Left)).unwrap(), ["A", "C", "D"]);
        assert!(enumerate(&g, "C", EdgeType::Placement, None).unwrap().is_empty());
    }

    #[test]
    fn sponsor_side_filter_uses_placement_leg() {
        let g = graph();
        assert_eq!(enumerate(&g, "R", EdgeType::Sponsor, None).unwrap(), ["A", "B", "D", "C"]);
        assert_eq!(enumerate(&g, "R", EdgeType::Sponsor, Some(Side::Left)).unwrap(), ["A", "D", "C"]);
        assert_eq!(enumerate(&g, "R", EdgeType::Sponsor, Some(Side::Right)).unwrap(), ["B"]);
    }

    #[test]
    fn team_stats_counts_each_leg() {
        let stats = team_stats(&graph(), "R").unwrap();
        assert_eq!(stats.direct_referrals, 3);
        assert_eq!(stats.total_downline, 4);
        assert_eq!((stats.placement_left, stats.placement_right), (3, 1));
        assert_eq!((stats.active, stats.inactive), (3, 1));
        assert_eq!((stats.sponsor_left, stats.sponsor_right), (3, 1));
    }
}
