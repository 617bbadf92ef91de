//! Dead-node enumeration, warning construction and debug dumps.

use std::io;

use dv_files::{Fragment, Report, Sources, Span};

use crate::{
    closure::Closure,
    deps::{Graph, NodeIdx},
    preprocess::{AstIndex, NodeRef},
    solve::LivenessMap,
    value::{AbstractValue, FlowNode, ValueSet},
    AnalysisConfig,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum WarnKind {
    DeadExpression,
    DeadBinding,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Warning {
    pub kind: WarnKind,
    pub span: Span,
    pub message: String,
}

/// A node is dead iff its liveness is `Bot` and, for expression nodes,
/// the label has no side effect. Unit-typed expressions are
/// uninformative and suppressed; identifiers report at their
/// declaration site.
pub(crate) fn report(
    index: &AstIndex,
    closure: &Closure,
    graph: &Graph,
    live: &LivenessMap,
    config: &AnalysisConfig,
    sources: &Sources,
) -> Vec<Warning> {
    let mut warnings = vec![];
    for i in 0..graph.len() {
        let idx = NodeIdx(u32::try_from(i).unwrap());
        if !live.get(idx).is_bot() {
            continue;
        }
        match graph.flow_node(idx) {
            FlowNode::Top | FlowNode::Mem(..) => {}
            FlowNode::Expr(l) => {
                if closure.has_effect(*l) {
                    continue;
                }
                let entry = index.entry(*l);
                if entry.unit_ty {
                    continue;
                }
                let message = match entry.node {
                    NodeRef::Expr(_) => "this expression's value is never used",
                    NodeRef::Mod(_) => "this module is never used",
                };
                warnings.push(Warning {
                    kind: WarnKind::DeadExpression,
                    span: entry.span,
                    message: message.to_owned(),
                });
            }
            FlowNode::Id(id) => {
                // synthesized identifiers have no declaration site
                if let Some(site) = index.decl_site(id) {
                    warnings.push(Warning {
                        kind: WarnKind::DeadBinding,
                        span: site.span,
                        message: format!("`{}` is never used", site.name),
                    });
                }
            }
        }
    }
    warnings.retain(|w| {
        !config
            .suppress
            .iter()
            .any(|prefix| sources.path(w.span.file).starts_with(prefix))
    });
    warnings.sort_by(|a, b| {
        (a.span.file, a.span.start, a.span.end, a.kind)
            .cmp(&(b.span.file, b.span.start, b.span.end, b.kind))
    });
    warnings
}

pub fn to_report(warning: &Warning) -> Report {
    Report {
        code: "Dead Value",
        msg: warning.message.clone(),
        fragments: vec![Fragment { full_text: warning.span, inlay_messages: vec![] }],
    }
}

/// Dump the closure map, reduction log, effect set and liveness map in
/// sorted order.
pub(crate) fn dump<W: io::Write>(
    out: &mut W,
    closure: &Closure,
    graph: &Graph,
    live: &LivenessMap,
) -> io::Result<()> {
    writeln!(out, "== closure map ==")?;
    let mut nodes: Vec<(&FlowNode, &ValueSet)> = closure.nodes().collect();
    nodes.sort_by(|a, b| a.0.cmp(b.0));
    for (node, set) in nodes {
        match set {
            ValueSet::Top => writeln!(out, "{node:?} -> <top>")?,
            ValueSet::Values(_) => {
                let mut values: Vec<&AbstractValue> = set.values().collect();
                values.sort();
                writeln!(out, "{node:?} -> {values:?}")?;
            }
        }
    }

    writeln!(out, "== reductions ==")?;
    for r in closure.reduces() {
        writeln!(out, "{:?} applies {:?} to {:?}", r.call, r.callee, r.args)?;
    }

    writeln!(out, "== effects ==")?;
    let mut effects: Vec<_> = closure.effects().iter().collect();
    effects.sort_by_key(|(l, _)| **l);
    for (label, reason) in effects {
        writeln!(out, "{label:?} -> {reason:?}")?;
    }

    writeln!(out, "== liveness ==")?;
    let mut by_node: Vec<(&FlowNode, NodeIdx)> = (0..graph.len())
        .map(|i| NodeIdx(u32::try_from(i).unwrap()))
        .map(|idx| (graph.flow_node(idx), idx))
        .collect();
    by_node.sort_by(|a, b| a.0.cmp(b.0));
    for (node, idx) in by_node {
        writeln!(out, "{node:?} -> {:?}", live.get(idx))?;
    }
    Ok(())
}
