//! Placement search
//!
//! Traversal strategies over the topology tree and the first-fit
//! placement search. The constrained walk prunes a subtree as soon as its
//! bucket fails the feasibility predicate, which is sound because traits,
//! labels and free capacity aggregate upward: a bucket that fails cannot
//! hide a server that would pass.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::instance::Instance;
use crate::topology::{NodeId, Topology};

/// How to traverse the topology tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraversalStrategy {
    /// Leaf servers only, in name order
    ServersOnly,
    /// Every node, preorder, children in name order
    FullPreorder,
    /// Preorder, but subtrees failing the instance's constraints are
    /// skipped
    #[default]
    ConstrainedPreorder,
}

/// Visit nodes per the given strategy. The constrained strategy checks
/// each node against `app` and does not descend below a failure; the
/// failing node itself is still reported so callers can explain why.
/// Without an instance the constrained walk degenerates to a full
/// preorder.
pub fn walk(topo: &Topology, strategy: TraversalStrategy, app: Option<&Instance>) -> Vec<NodeId> {
    match strategy {
        TraversalStrategy::ServersOnly => topo.servers().into_iter().map(|(_, id)| id).collect(),
        TraversalStrategy::FullPreorder => {
            let mut visited = Vec::new();
            preorder(topo, topo.root(), None, &mut visited);
            visited
        }
        TraversalStrategy::ConstrainedPreorder => {
            let mut visited = Vec::new();
            preorder(topo, topo.root(), app, &mut visited);
            visited
        }
    }
}

fn preorder(topo: &Topology, id: NodeId, app: Option<&Instance>, out: &mut Vec<NodeId>) {
    out.push(id);
    if let Some(app) = app {
        if !topo.check_app_constraints(id, app) {
            return;
        }
    }
    for child in topo.children(id) {
        preorder(topo, child, app, out);
    }
}

/// Find a server for the instance: the first feasible accepting server
/// the chosen traversal reaches, or `None` when nothing in the cell can
/// host it right now. Servers-only searches flat name order; the preorder
/// strategies search tree order, with the constrained variant pruning
/// subtrees that fail the instance's constraints.
pub fn find_placement(
    topo: &Topology,
    strategy: TraversalStrategy,
    app: &Instance,
    now: DateTime<Utc>,
) -> Option<String> {
    let found = match strategy {
        TraversalStrategy::ServersOnly => topo
            .servers()
            .into_iter()
            .find(|(_, id)| {
                topo.check_app_constraints(*id, app) && topo.server_accepts(*id, app, now)
            })
            .map(|(name, _)| name),
        TraversalStrategy::FullPreorder | TraversalStrategy::ConstrainedPreorder => {
            let prune = strategy == TraversalStrategy::ConstrainedPreorder;
            let mut found = None;
            let mut stack = vec![topo.root()];
            while let Some(id) = stack.pop() {
                let feasible = topo.check_app_constraints(id, app);
                if prune && !feasible {
                    continue;
                }
                let node = topo.node(id);
                if node.is_server() {
                    if feasible && topo.server_accepts(id, app, now) {
                        found = Some(node.name.clone());
                        break;
                    }
                    continue;
                }
                // Reverse push keeps name order on the stack.
                for child in topo.children(id).into_iter().rev() {
                    stack.push(child);
                }
            }
            found
        }
    };
    match &found {
        Some(server) => debug!(instance = %app.name, server = %server, "placement found"),
        None => debug!(instance = %app.name, "no feasible placement"),
    }
    found
}
