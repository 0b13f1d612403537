//! In-memory arena over the sponsor and placement trees.
//!
//! The store is the source of truth; the arena is bulk-loaded once and
//! extended after every committed registration. Nodes never move, so no
//! invalidation is needed beyond status changes.
//!
//! Every upward walk is bounded by `max_depth` and every downward walk keeps
//! a visited set. Either bound tripping raises `EngineError::GraphCycle`.

use crate::{
    error::{EngineError, EngineResult},
    types::{MemberId, MemberStatus, Side},
};
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet, VecDeque};

/// Topology of one member as persisted.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub member_id:           MemberId,
    pub sponsor_id:          Option<MemberId>,
    pub placement_parent_id: Option<MemberId>,
    pub placement_side:      Option<Side>,
    pub status:              MemberStatus,
    pub joined_on:           NaiveDate,
}

#[derive(Debug, Clone)]
pub struct MemberNode {
    pub member_id: MemberId,
    pub sponsor:   Option<usize>,
    /// Placement parent and the slot this node occupies under it.
    pub placement: Option<(usize, Side)>,
    pub status:    MemberStatus,
    pub joined_on: NaiveDate,
    pub sponsored: Vec<usize>,
    pub left:      Option<usize>,
    pub right:     Option<usize>,
}

impl MemberNode {
    pub fn child(&self, side: Side) -> Option<usize> {
        match side {
            Side::Left  => self.left,
            Side::Right => self.right,
        }
    }

    fn child_mut(&mut self, side: Side) -> &mut Option<usize> {
        match side {
            Side::Left  => &mut self.left,
            Side::Right => &mut self.right,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NetworkGraph {
    nodes:     Vec<MemberNode>,
    index:     HashMap<MemberId, usize>,
    root:      Option<usize>,
    max_depth: usize,
}

impl NetworkGraph {
    pub fn new(max_depth: usize) -> Self {
        Self { nodes: Vec::new(), index: HashMap::new(), root: None, max_depth }
    }

    /// Build the arena from persisted rows in any order, then verify that
    /// both trees reach every node from the single root.
    pub fn from_records(records: Vec<NodeRecord>, max_depth: usize) -> EngineResult<Self> {
        let mut graph = Self::new(max_depth);
        for r in &records {
            if graph.index.contains_key(&r.member_id) {
                return Err(EngineError::MemberExists(r.member_id.clone()));
            }
            graph.index.insert(r.member_id.clone(), graph.nodes.len());
            graph.nodes.push(MemberNode {
                member_id: r.member_id.clone(),
                sponsor:   None,
                placement: None,
                status:    r.status,
                joined_on: r.joined_on,
                sponsored: Vec::new(),
                left:      None,
                right:     None,
            });
        }

        for (idx, r) in records.iter().enumerate() {
            match (&r.sponsor_id, &r.placement_parent_id, r.placement_side) {
                (None, None, None) => {
                    if let Some(existing) = graph.root {
                        return Err(EngineError::RootExists(graph.nodes[existing].member_id.clone()));
                    }
                    graph.root = Some(idx);
                }
                (Some(sponsor_id), Some(parent_id), Some(side)) => {
                    let sponsor = graph.index_of(sponsor_id)?;
                    let parent = graph.index_of(parent_id)?;
                    graph.link(idx, sponsor, parent, side)?;
                }
                _ => {
                    return Err(EngineError::Configuration(format!(
                        "member '{}' has a partial parent link",
                        r.member_id
                    )))
                }
            }
        }

        graph.verify_reachable()?;
        log::debug!("graph loaded: members={} max_depth={max_depth}", graph.nodes.len());
        Ok(graph)
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn root(&self) -> Option<usize> {
        self.root
    }

    pub fn root_id(&self) -> Option<&str> {
        self.root.map(|r| self.nodes[r].member_id.as_str())
    }

    pub fn contains(&self, member_id: &str) -> bool {
        self.index.contains_key(member_id)
    }

    pub fn index_of(&self, member_id: &str) -> EngineResult<usize> {
        self.index
            .get(member_id)
            .copied()
            .ok_or_else(|| EngineError::MemberNotFound(member_id.to_string()))
    }

    pub fn node(&self, idx: usize) -> &MemberNode {
        &self.nodes[idx]
    }

    pub fn node_by_id(&self, member_id: &str) -> EngineResult<&MemberNode> {
        Ok(&self.nodes[self.index_of(member_id)?])
    }

    pub fn id(&self, idx: usize) -> &str {
        &self.nodes[idx].member_id
    }

    /// Nodes in insertion order, which is a valid top-down order for both trees.
    pub fn nodes(&self) -> impl Iterator<Item = (usize, &MemberNode)> {
        self.nodes.iter().enumerate()
    }

    // ── Mutation ───────────────────────────────────────────────────

    pub fn attach_root(&mut self, member_id: &str, joined_on: NaiveDate) -> EngineResult<()> {
        if let Some(root) = self.root_id() {
            return Err(EngineError::RootExists(root.to_string()));
        }
        self.push_node(member_id, MemberStatus::Active, joined_on)?;
        self.root = Some(self.nodes.len() - 1);
        Ok(())
    }

    /// Add a committed member below its sponsor and placement parent.
    pub fn attach(
        &mut self,
        member_id: &str,
        sponsor_id: &str,
        parent_id: &str,
        side: Side,
        status: MemberStatus,
        joined_on: NaiveDate,
    ) -> EngineResult<()> {
        let sponsor = self.index_of(sponsor_id)?;
        let parent = self.index_of(parent_id)?;
        if self.contains(member_id) {
            return Err(EngineError::MemberExists(member_id.to_string()));
        }
        if self.nodes[parent].child(side).is_some() {
            return Err(EngineError::SlotConflict { parent_id: parent_id.to_string(), side });
        }
        if self.would_create_cycle(member_id, parent_id)? {
            return Err(EngineError::GraphCycle {
                member_id: member_id.to_string(),
                operation: "attach",
                depth:     0,
            });
        }
        self.push_node(member_id, status, joined_on)?;
        let idx = self.nodes.len() - 1;
        self.link(idx, sponsor, parent, side)
    }

    pub fn set_status(&mut self, member_id: &str, status: MemberStatus) -> EngineResult<()> {
        let idx = self.index_of(member_id)?;
        self.nodes[idx].status = status;
        Ok(())
    }

    fn push_node(&mut self, member_id: &str, status: MemberStatus, joined_on: NaiveDate) -> EngineResult<()> {
        if self.contains(member_id) {
            return Err(EngineError::MemberExists(member_id.to_string()));
        }
        self.index.insert(member_id.to_string(), self.nodes.len());
        self.nodes.push(MemberNode {
            member_id: member_id.to_string(),
            sponsor: None,
            placement: None,
            status,
            joined_on,
            sponsored: Vec::new(),
            left: None,
            right: None,
        });
        Ok(())
    }

    fn link(&mut self, idx: usize, sponsor: usize, parent: usize, side: Side) -> EngineResult<()> {
        if self.nodes[parent].child(side).is_some() {
            return Err(EngineError::SlotConflict {
                parent_id: self.nodes[parent].member_id.clone(),
                side,
            });
        }
        *self.nodes[parent].child_mut(side) = Some(idx);
        self.nodes[sponsor].sponsored.push(idx);
        self.nodes[idx].sponsor = Some(sponsor);
        self.nodes[idx].placement = Some((parent, side));
        Ok(())
    }

    fn verify_reachable(&self) -> EngineResult<()> {
        let Some(root) = self.root else {
            return match self.nodes.first() {
                None => Ok(()),
                Some(n) => Err(EngineError::GraphCycle {
                    member_id: n.member_id.clone(),
                    operation: "load",
                    depth:     0,
                }),
            };
        };
        let walks: [(&'static str, fn(&MemberNode) -> Vec<usize>); 2] = [
            ("load_placement", Self::placement_children),
            ("load_sponsor", Self::sponsor_children),
        ];
        for (operation, children) in walks {
            let mut seen = vec![false; self.nodes.len()];
            seen[root] = true;
            let mut reached = 1;
            let mut queue = VecDeque::from([root]);
            while let Some(idx) = queue.pop_front() {
                for child in children(&self.nodes[idx]) {
                    if !seen[child] {
                        seen[child] = true;
                        reached += 1;
                        queue.push_back(child);
                    }
                }
            }
            if let Some(orphan) = seen.iter().position(|s| !s) {
                return Err(EngineError::GraphCycle {
                    member_id: self.nodes[orphan].member_id.clone(),
                    operation,
                    depth: reached,
                });
            }
        }
        Ok(())
    }

    fn placement_children(node: &MemberNode) -> Vec<usize> {
        node.left.into_iter().chain(node.right).collect()
    }

    fn sponsor_children(node: &MemberNode) -> Vec<usize> {
        node.sponsored.clone()
    }

    // ── Walks ──────────────────────────────────────────────────────

    /// Placement ancestors nearest first, with the leg of each ancestor the
    /// node descends through.
    pub fn placement_ancestors(&self, idx: usize) -> EngineResult<Vec<(usize, Side)>> {
        let mut out = Vec::new();
        let mut current = idx;
        while let Some((parent, side)) = self.nodes[current].placement {
            if out.len() >= self.max_depth {
                return Err(self.cycle(idx, "placement_ancestors", out.len()));
            }
            out.push((parent, side));
            current = parent;
        }
        Ok(out)
    }

    /// Sponsor ancestors nearest first (generation 1 is the direct sponsor).
    pub fn sponsor_ancestors(&self, idx: usize) -> EngineResult<Vec<usize>> {
        let mut out = Vec::new();
        let mut current = idx;
        while let Some(sponsor) = self.nodes[current].sponsor {
            if out.len() >= self.max_depth {
                return Err(self.cycle(idx, "sponsor_ancestors", out.len()));
            }
            out.push(sponsor);
            current = sponsor;
        }
        Ok(out)
    }

    /// True iff `ancestor_id` lies on the placement chain above `node_id`.
    /// A node is not its own descendant.
    pub fn is_descendant(&self, ancestor_id: &str, node_id: &str) -> EngineResult<bool> {
        let ancestor = self.index_of(ancestor_id)?;
        let node = self.index_of(node_id)?;
        let mut current = node;
        let mut hops = 0;
        while let Some((parent, _)) = self.nodes[current].placement {
            if hops >= self.max_depth {
                return Err(self.cycle(node, "is_descendant", hops));
            }
            if parent == ancestor {
                return Ok(true);
            }
            current = parent;
            hops += 1;
        }
        Ok(false)
    }

    /// Which leg of `ancestor` the node sits in, `None` outside its placement subtree.
    pub fn leg_of(&self, ancestor: usize, node: usize) -> EngineResult<Option<Side>> {
        Ok(self
            .placement_ancestors(node)?
            .into_iter()
            .find(|(a, _)| *a == ancestor)
            .map(|(_, side)| side))
    }

    /// Attaching `member_id` under `parent_id` would close a loop if the
    /// parent already sits below the member.
    pub fn would_create_cycle(&self, member_id: &str, parent_id: &str) -> EngineResult<bool> {
        if member_id == parent_id {
            return Ok(true);
        }
        if !self.contains(member_id) {
            return Ok(false);
        }
        self.is_descendant(member_id, parent_id)
    }

    /// Shallowest empty slot at or below `start`, left before right.
    /// With a preferred side the search begins in that leg of `start`.
    pub fn find_open_slot(
        &self,
        start_id: &str,
        preferred: Option<Side>,
    ) -> EngineResult<Option<(MemberId, Side)>> {
        let start = self.index_of(start_id)?;
        let mut queue = VecDeque::new();
        match preferred {
            Some(side) => match self.nodes[start].child(side) {
                None => return Ok(Some((start_id.to_string(), side))),
                Some(child) => queue.push_back((child, 1usize)),
            },
            None => queue.push_back((start, 0usize)),
        }

        let mut visited = HashSet::new();
        while let Some((idx, depth)) = queue.pop_front() {
            if !visited.insert(idx) || depth > self.max_depth {
                return Err(self.cycle(idx, "spillover", depth));
            }
            let node = &self.nodes[idx];
            for side in Side::BOTH {
                match node.child(side) {
                    None => return Ok(Some((node.member_id.clone(), side))),
                    Some(child) => queue.push_back((child, depth + 1)),
                }
            }
        }
        Ok(None)
    }

    pub(crate) fn cycle(&self, idx: usize, operation: &'static str, depth: usize) -> EngineError {
        let member_id = self.nodes[idx].member_id.clone();
        log::error!("graph cycle: member={member_id} operation={operation} depth={depth}");
        EngineError::GraphCycle { member_id, operation, depth }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    fn rec(id: &str, sponsor: Option<&str>, parent: Option<(&str, Side)>) -> NodeRecord {
        NodeRecord {
            member_id:           id.into(),
            sponsor_id:          sponsor.map(Into::into),
            placement_parent_id: parent.map(|(p, _)| p.into()),
            placement_side:      parent.map(|(_, s)| s),
            status:              MemberStatus::Active,
            joined_on:           day(),
        }
    }

    fn sample() -> NetworkGraph {
        let mut g = NetworkGraph::new(16);
        g.attach_root("R", day()).unwrap();
        g.attach("A", "R", "R", Side::Left, MemberStatus::Active, day()).unwrap();
        g.attach("B", "R", "R", Side::Right, MemberStatus::Active, day()).unwrap();
        g.attach("C", "A", "A", Side::Left, MemberStatus::Active, day()).unwrap();
        g
    }

    #[test]
    fn ancestors_report_the_leg_taken() {
        let g = sample();
        let c = g.index_of("C").unwrap();
        let chain: Vec<_> = g
            .placement_ancestors(c)
            .unwrap()
            .into_iter()
            .map(|(a, s)| (g.id(a).to_string(), s))
            .collect();
        assert_eq!(chain, vec![("A".to_string(), Side::Left), ("R".to_string(), Side::Left)]);
    }

    #[test]
    fn spillover_fills_shallowest_left_first() {
        let g = sample();
        assert_eq!(g.find_open_slot("R", None).unwrap(), Some(("A".into(), Side::Right)));
        assert_eq!(
            g.find_open_slot("R", Some(Side::Right)).unwrap(),
            Some(("B".into(), Side::Left))
        );
        assert_eq!(g.find_open_slot("B", Some(Side::Right)).unwrap(), Some(("B".into(), Side::Right)));
    }

    #[test]
    fn occupied_slot_is_a_conflict() {
        let mut g = sample();
        let err = g.attach("D", "R", "R", Side::Left, MemberStatus::Active, day()).unwrap_err();
        assert!(matches!(err, EngineError::SlotConflict { side: Side::Left, .. }));
        assert!(!g.contains("D"));
    }

    #[test]
    fn depth_bound_trips_as_cycle() {
        let mut g = NetworkGraph::new(2);
        g.attach_root("R", day()).unwrap();
        g.attach("A", "R", "R", Side::Left, MemberStatus::Active, day()).unwrap();
        g.attach("B", "A", "A", Side::Left, MemberStatus::Active, day()).unwrap();
        g.attach("C", "B", "B", Side::Left, MemberStatus::Active, day()).unwrap();
        let c = g.index_of("C").unwrap();
        assert!(matches!(g.placement_ancestors(c), Err(EngineError::GraphCycle { depth: 2, .. })));
        assert!(matches!(g.is_descendant("R", "C"), Err(EngineError::GraphCycle { .. })));
    }

    #[test]
    fn loading_a_detached_loop_is_rejected() {
        let records = vec![
            rec("R", None, None),
            rec("X", Some("Y"), Some(("Y", Side::Left))),
            rec("Y", Some("X"), Some(("X", Side::Left))),
        ];
        let err = NetworkGraph::from_records(records, 16).unwrap_err();
        assert!(matches!(err, EngineError::GraphCycle { operation: "load_placement", .. }));
    }

    #[test]
    fn loading_rejects_second_root() {
        let records = vec![rec("R", None, None), rec("S", None, None)];
        assert!(matches!(
            NetworkGraph::from_records(records, 16),
            Err(EngineError::RootExists(_))
        ));
    }

    #[test]
    fn self_parenting_would_cycle() {
        let g = sample();
        assert!(g.would_create_cycle("A", "A").unwrap());
        assert!(g.would_create_cycle("A", "C").unwrap());
        assert!(!g.would_create_cycle("Z", "C").unwrap());
    }
}
