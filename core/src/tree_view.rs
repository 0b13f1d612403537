//! Read-only, depth-limited placement subtree for display.
//!
//! Members may only view themselves and their own downline; admins may view
//! any subtree. Depth never exceeds `MAX_TREE_VIEW_DEPTH`.

use crate::{
    config::{TreeConfig, MAX_TREE_VIEW_DEPTH},
    error::{EngineError, EngineResult},
    graph::NetworkGraph,
    store::{MemberRecord, NetworkStore},
    types::{MemberId, MemberStatus, Side},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "member_id", rename_all = "snake_case")]
pub enum Viewer {
    Admin,
    Member(MemberId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub member_id:   MemberId,
    /// Slot under the parent; `None` for the node the view is rooted at.
    pub side:        Option<Side>,
    pub status:      MemberStatus,
    pub rank_order:  Option<u32>,
    pub personal_bv: f64,
    pub left_bv:     f64,
    pub right_bv:    f64,
    pub team_bv:     f64,
    /// Levels below the view root.
    pub depth:       usize,
    pub left:        Option<Box<TreeNode>>,
    pub right:       Option<Box<TreeNode>>,
}

pub fn effective_depth(requested: Option<usize>, tree: &TreeConfig) -> usize {
    let limit = tree.tree_view_depth.min(MAX_TREE_VIEW_DEPTH);
    requested.map_or(limit, |d| d.min(limit))
}

fn check_access(graph: &NetworkGraph, viewer: &Viewer, root_id: &str) -> EngineResult<()> {
    match viewer {
        Viewer::Admin => Ok(()),
        Viewer::Member(v) if v == root_id => Ok(()),
        Viewer::Member(v) => {
            if graph.is_descendant(v, root_id)? {
                Ok(())
            } else {
                log::warn!("tree view denied: viewer={v} target={root_id}");
                Err(EngineError::AccessDenied { viewer: v.clone(), target: root_id.to_string() })
            }
        }
    }
}

pub fn tree_view(
    store: &NetworkStore,
    graph: &NetworkGraph,
    tree: &TreeConfig,
    viewer: &Viewer,
    root_id: &str,
    requested_depth: Option<usize>,
) -> EngineResult<TreeNode> {
    let root = graph.index_of(root_id)?;
    check_access(graph, viewer, root_id)?;
    let depth = effective_depth(requested_depth, tree);

    // Collect the visible indexes level by level, then load them in one query.
    let mut visible = vec![root];
    let mut frontier = vec![root];
    for _ in 0..depth {
        let next: Vec<usize> = frontier
            .iter()
            .flat_map(|idx| {
                let n = graph.node(*idx);
                n.left.into_iter().chain(n.right)
            })
            .collect();
        if next.is_empty() {
            break;
        }
        visible.extend(&next);
        frontier = next;
    }
    let ids: Vec<&str> = visible.iter().map(|idx| graph.id(*idx)).collect();
    let records: HashMap<String, MemberRecord> = store
        .members_in(&ids)?
        .into_iter()
        .map(|r| (r.member_id.clone(), r))
        .collect();

    build(graph, &records, root, None, 0, depth)
}

fn build(
    graph: &NetworkGraph,
    records: &HashMap<String, MemberRecord>,
    idx: usize,
    side: Option<Side>,
    level: usize,
    max_level: usize,
) -> EngineResult<TreeNode> {
    let id = graph.id(idx);
    let r = records
        .get(id)
        .ok_or_else(|| EngineError::MemberNotFound(id.to_string()))?;
    let node = graph.node(idx);
    let child = |s: Side| -> EngineResult<Option<Box<TreeNode>>> {
        match node.child(s) {
            Some(c) if level < max_level => {
                Ok(Some(Box::new(build(graph, records, c, Some(s), level + 1, max_level)?)))
            }
            _ => Ok(None),
        }
    };
    Ok(TreeNode {
        member_id: r.member_id.clone(),
        side,
        status: r.status,
        rank_order: r.rank_order,
        personal_bv: r.personal_bv,
        left_bv: r.left_bv,
        right_bv: r.right_bv,
        team_bv: r.team_bv,
        depth: level,
        left: child(Side::Left)?,
        right: child(Side::Right)?,
    })
}
