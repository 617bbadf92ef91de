//! SCC discovery and the liveness fixed point.
//!
//! Tarjan's algorithm (iterative, explicit frame stack) pops components
//! after everything they reach, so walking its output in reverse
//! processes demand sources before their dependents. Acyclic nodes take
//! one join over their incoming edges; members of a demand cycle are
//! observed through their own recursion and saturate to `Top`.

use bit_vec::BitVec;

use crate::{
    deps::{Graph, NodeIdx},
    live::Live,
    AnalysisError,
};

pub struct LivenessMap {
    live: Vec<Live>,
}

impl LivenessMap {
    pub fn get(&self, idx: NodeIdx) -> &Live {
        &self.live[idx.index()]
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }
}

pub(crate) fn solve(graph: &Graph) -> Result<LivenessMap, AnalysisError> {
    let components = sccs(graph);
    let mut live = vec![Live::Bot; graph.len()];
    live[graph.top().index()] = Live::Top;

    for scc in components.iter().rev() {
        if scc.is_empty() {
            return Err(AnalysisError::EmptyScc);
        }
        let cyclic = scc.len() > 1
            || graph.out_edges(scc[0]).iter().any(|(w, _)| *w == scc[0]);
        if cyclic {
            for &n in scc {
                live[n.index()] = Live::Top;
            }
        } else {
            let n = scc[0];
            if n == graph.top() {
                continue;
            }
            let mut acc = Live::Bot;
            for (src, t) in graph.in_edges(n) {
                acc = acc.join(&t.apply(&live[src.index()]));
            }
            live[n.index()] = acc;
        }
    }
    tracing::debug!(sccs = components.len(), nodes = live.len(), "liveness solved");
    Ok(LivenessMap { live })
}

/// Strongly connected components over the forward edges, in the order
/// Tarjan pops them: every component before the components that can
/// reach it.
fn sccs(graph: &Graph) -> Vec<Vec<NodeIdx>> {
    const UNDEF: u32 = u32::MAX;
    let n = graph.len();
    let mut index_of = vec![UNDEF; n];
    let mut low = vec![0u32; n];
    let mut on_stack = BitVec::from_elem(n, false);
    let mut stack: Vec<NodeIdx> = vec![];
    let mut frames: Vec<(NodeIdx, usize)> = vec![];
    let mut next_index = 0u32;
    let mut out = vec![];

    for start in 0..n {
        if index_of[start] != UNDEF {
            continue;
        }
        let root = NodeIdx(u32::try_from(start).unwrap());
        index_of[start] = next_index;
        low[start] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack.set(start, true);
        frames.push((root, 0));

        while let Some(&(v, pos)) = frames.last() {
            let edges = graph.out_edges(v);
            if pos < edges.len() {
                frames.last_mut().unwrap().1 += 1;
                let w = edges[pos].0;
                if index_of[w.index()] == UNDEF {
                    index_of[w.index()] = next_index;
                    low[w.index()] = next_index;
                    next_index += 1;
                    stack.push(w);
                    on_stack.set(w.index(), true);
                    frames.push((w, 0));
                } else if on_stack.get(w.index()) == Some(true) {
                    low[v.index()] = low[v.index()].min(index_of[w.index()]);
                }
            } else {
                frames.pop();
                if let Some(&(parent, _)) = frames.last() {
                    low[parent.index()] = low[parent.index()].min(low[v.index()]);
                }
                if low[v.index()] == index_of[v.index()] {
                    let mut scc = vec![];
                    loop {
                        let w = stack.pop().unwrap();
                        on_stack.set(w.index(), false);
                        scc.push(w);
                        if w == v {
                            break;
                        }
                    }
                    out.push(scc);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::{
        deps::Transform,
        preprocess::Label,
        value::{FlowNode, Tag},
    };

    fn expr(i: usize) -> FlowNode {
        FlowNode::Expr(Label::from_index(i))
    }

    #[test]
    fn demand_flows_along_identity_chain() {
        let mut g = Graph::new();
        g.add_edge(FlowNode::Top, expr(0), Transform::Const(Live::Top));
        g.add_edge(expr(0), expr(1), Transform::Id);
        let live = solve(&g).unwrap();
        assert_eq!(live.get(g.lookup(&expr(0)).unwrap()), &Live::Top);
        assert_eq!(live.get(g.lookup(&expr(1)).unwrap()), &Live::Top);
    }

    #[test]
    fn unreached_nodes_stay_bot() {
        let mut g = Graph::new();
        g.add_edge(FlowNode::Top, expr(0), Transform::Const(Live::Top));
        let lonely = g.node(expr(1));
        let live = solve(&g).unwrap();
        assert_eq!(live.get(lonely), &Live::Bot);
    }

    #[test]
    fn field_projection_drops_unobserved_slots() {
        // demand Ctor{Tuple: [Top]} on a tuple node: slot 0 is live,
        // slot 1 is not
        let mut map = BTreeMap::new();
        map.insert(Tag::Tuple, vec![Live::Top]);
        let demand = Live::Ctor(map);

        let mut g = Graph::new();
        g.add_edge(FlowNode::Top, expr(0), Transform::Const(demand));
        g.add_edge(expr(0), expr(1), Transform::Field(Tag::Tuple, 0));
        g.add_edge(expr(0), expr(2), Transform::Field(Tag::Tuple, 1));
        let live = solve(&g).unwrap();
        assert_eq!(live.get(g.lookup(&expr(1)).unwrap()), &Live::Top);
        assert_eq!(live.get(g.lookup(&expr(2)).unwrap()), &Live::Bot);
    }

    #[test]
    fn cycles_saturate() {
        let mut g = Graph::new();
        g.add_edge(expr(0), expr(1), Transform::Id);
        g.add_edge(expr(1), expr(0), Transform::Id);
        let live = solve(&g).unwrap();
        assert_eq!(live.get(g.lookup(&expr(0)).unwrap()), &Live::Top);
        assert_eq!(live.get(g.lookup(&expr(1)).unwrap()), &Live::Top);
    }

    #[test]
    fn self_loops_saturate() {
        let mut g = Graph::new();
        g.add_edge(expr(0), expr(0), Transform::Id);
        let live = solve(&g).unwrap();
        assert_eq!(live.get(g.lookup(&expr(0)).unwrap()), &Live::Top);
    }

    #[test]
    fn joins_multiple_consumers() {
        let mut demand_a = BTreeMap::new();
        demand_a.insert(Tag::Tuple, vec![Live::Top]);
        let mut demand_b = BTreeMap::new();
        demand_b.insert(Tag::Tuple, vec![Live::Bot, Live::Top]);

        let mut g = Graph::new();
        g.add_edge(FlowNode::Top, expr(0), Transform::Const(Live::Ctor(demand_a)));
        g.add_edge(FlowNode::Top, expr(0), Transform::Const(Live::Ctor(demand_b)));
        let live = solve(&g).unwrap();

        let mut joined = BTreeMap::new();
        joined.insert(Tag::Tuple, vec![Live::Top, Live::Top]);
        assert_eq!(live.get(g.lookup(&expr(0)).unwrap()), &Live::Ctor(joined));
    }
}
