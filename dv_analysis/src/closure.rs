//! The closure fixed point.
//!
//! Iterates four monotone steps until nothing changes: folding
//! `ExprRef`/`IdRef` indirections, evaluating projection constraints,
//! resolving mutable-store constraints, and resolving pending
//! reductions. Escaped nodes are propagated alongside. Value sets only
//! ever grow, so the joint fixed point exists and is order-independent.

use bitflags::bitflags;
use once_cell::sync::Lazy;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    constraints::bind_pattern,
    preprocess::{AstIndex, Label},
    value::{AbstractValue, FlowNode, ValueSet},
    AnalysisError, UnitData,
};

bitflags! {
    /// Why a label carries the side-effect bit. The reporter only cares
    /// that the bit is set; the reasons show up in debug dumps.
    pub struct EffectReason: u8 {
        const ASSIGN = 1 << 0;
        const PRIM = 1 << 1;
        const EXTERN = 1 << 2;
        const RAISE = 1 << 3;
    }
}

/// Primitives whose application is observationally pure. Everything
/// else taints its call site.
/// TODO: take this from the host compiler's primitive registry instead
/// of re-encoding it here.
static PURE_PRIMS: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    [
        "%identity",
        "%ignore",
        "%addint",
        "%subint",
        "%mulint",
        "%divint",
        "%modint",
        "%negint",
        "%succint",
        "%predint",
        "%lslint",
        "%lsrint",
        "%asrint",
        "%andint",
        "%orint",
        "%xorint",
        "%addfloat",
        "%subfloat",
        "%mulfloat",
        "%divfloat",
        "%negfloat",
        "%intoffloat",
        "%floatofint",
        "%eq",
        "%noteq",
        "%equal",
        "%notequal",
        "%lessthan",
        "%greaterthan",
        "%lessequal",
        "%greaterequal",
        "%compare",
        "%boolnot",
        "%sequand",
        "%sequor",
        "%string_length",
        "%array_length",
    ]
    .into_iter()
    .collect()
});

pub fn is_pure_prim(name: &str) -> bool {
    PURE_PRIMS.contains(name)
}

/// Argument lists only grow through partial-application composition;
/// past this length the call is tainted instead of composed further.
const MAX_PARTIAL_ARGS: usize = 32;

/// A pending application: the callee's label and the (possibly
/// labeled-and-omitted) argument labels, resolved at the fixed point.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Reduce {
    pub call: Label,
    pub callee: Label,
    pub args: Box<[Option<Label>]>,
}

/// Select one structural component during projection.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Select {
    TupleIdx(u32),
    CtorArg(dv_name::Name, u32),
    VariantArg(dv_name::Name),
    RecordField(dv_name::Name, u32),
    MutField(dv_name::Name),
}

/// `C[target] ⊇ path-projection of C[source]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Projection {
    pub target: FlowNode,
    pub source: Label,
    pub path: Box<[Select]>,
}

/// `C[Mem(alloc, field)] ⊇ C[value]` for every mutable cell the base
/// may evaluate to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Assign {
    pub base: Label,
    pub field: dv_name::Name,
    pub value: Label,
}

#[derive(Default)]
pub struct Closure {
    values: FxHashMap<FlowNode, ValueSet>,
    effects: FxHashMap<Label, EffectReason>,
    escaped: FxHashSet<FlowNode>,
    reduces: Vec<Reduce>,
    reduce_seen: FxHashSet<Reduce>,
    projections: Vec<Projection>,
    projection_seen: FxHashSet<Projection>,
    assigns: Vec<Assign>,
    assign_seen: FxHashSet<Assign>,
}

impl Closure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: FlowNode, value: AbstractValue) -> bool {
        self.values.entry(node).or_default().insert(value)
    }

    pub fn make_top(&mut self, node: FlowNode) -> bool {
        self.values.entry(node).or_default().make_top()
    }

    pub fn get(&self, node: &FlowNode) -> Option<&ValueSet> {
        self.values.get(node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&FlowNode, &ValueSet)> {
        self.values.iter()
    }

    pub fn effect(&mut self, label: Label, reason: EffectReason) -> bool {
        let entry = self.effects.entry(label).or_insert_with(EffectReason::empty);
        let before = *entry;
        *entry |= reason;
        *entry != before
    }

    pub fn has_effect(&self, label: Label) -> bool {
        self.effects.contains_key(&label)
    }

    pub fn effects(&self) -> &FxHashMap<Label, EffectReason> {
        &self.effects
    }

    pub fn escape(&mut self, node: FlowNode) -> bool {
        self.escaped.insert(node)
    }

    pub fn escaped(&self) -> &FxHashSet<FlowNode> {
        &self.escaped
    }

    pub fn enqueue_reduce(&mut self, reduce: Reduce) -> bool {
        if self.reduce_seen.insert(reduce.clone()) {
            self.reduces.push(reduce);
            true
        } else {
            false
        }
    }

    pub fn reduces(&self) -> &[Reduce] {
        &self.reduces
    }

    pub fn project(&mut self, projection: Projection) -> bool {
        if self.projection_seen.insert(projection.clone()) {
            self.projections.push(projection);
            true
        } else {
            false
        }
    }

    pub fn assign(&mut self, assign: Assign) -> bool {
        if self.assign_seen.insert(assign.clone()) {
            self.assigns.push(assign);
            true
        } else {
            false
        }
    }

    /// Run the solver to its joint fixed point.
    pub fn solve(&mut self, index: &AstIndex, units: &[UnitData<'_>]) -> Result<(), AnalysisError> {
        let mut rounds = 0usize;
        loop {
            let mut changed = false;
            changed |= self.fold_refs();
            changed |= self.run_projections();
            changed |= self.run_assigns();
            changed |= self.run_reduces(index, units)?;
            changed |= self.propagate_escapes(index, units);
            rounds += 1;
            if !changed {
                break;
            }
        }
        tracing::debug!(
            rounds,
            nodes = self.values.len(),
            reduces = self.reduces.len(),
            effects = self.effects.len(),
            "closure fixed point reached"
        );
        Ok(())
    }

    /// Union the source node's set into the destination's.
    fn copy_into(&mut self, src: &FlowNode, dst: &FlowNode) -> bool {
        if src == dst {
            return false;
        }
        let source = match self.values.get(src) {
            None => return false,
            Some(vs) => vs.clone(),
        };
        match source {
            ValueSet::Top => self.make_top(dst.clone()),
            ValueSet::Values(vs) => {
                let target = self.values.entry(dst.clone()).or_default();
                let mut changed = false;
                for v in vs {
                    changed |= target.insert(v);
                }
                changed
            }
        }
    }

    fn fold_refs(&mut self) -> bool {
        let nodes: Vec<FlowNode> = self.values.keys().cloned().collect();
        let mut changed = false;
        for node in nodes {
            let refs: Vec<FlowNode> = match self.values.get(&node) {
                Some(vs) => vs
                    .values()
                    .filter_map(|v| match v {
                        AbstractValue::ExprRef(l) => Some(FlowNode::Expr(*l)),
                        AbstractValue::IdRef(id) => Some(FlowNode::Id(id.clone())),
                        _ => None,
                    })
                    .collect(),
                None => continue,
            };
            for r in refs {
                changed |= self.copy_into(&r, &node);
            }
        }
        changed
    }

    fn run_projections(&mut self) -> bool {
        let mut changed = false;
        for i in 0..self.projections.len() {
            let p = self.projections[i].clone();
            changed |= self.project_once(&p);
        }
        changed
    }

    fn project_once(&mut self, p: &Projection) -> bool {
        let mut frontier = vec![FlowNode::Expr(p.source)];
        for step in p.path.iter() {
            let mut next = vec![];
            for node in &frontier {
                let vs = match self.values.get(node) {
                    None => continue,
                    Some(vs) => vs,
                };
                // anything universal along the path escapes the projection
                if vs.is_universal() {
                    return self.make_top(p.target.clone());
                }
                for v in vs.values() {
                    match (step, v) {
                        (Select::TupleIdx(i), AbstractValue::Ctor { tag: crate::value::Tag::Tuple, args }) => {
                            if let Some(&l) = args.get(*i as usize) {
                                next.push(FlowNode::Expr(l));
                            }
                        }
                        (Select::CtorArg(name, i), AbstractValue::Ctor { tag: crate::value::Tag::Ctor(n), args })
                            if name == n =>
                        {
                            if let Some(&l) = args.get(*i as usize) {
                                next.push(FlowNode::Expr(l));
                            }
                        }
                        (Select::VariantArg(tag), AbstractValue::Ctor { tag: crate::value::Tag::Variant(t), args })
                            if tag == t =>
                        {
                            if let Some(&l) = args.first() {
                                next.push(FlowNode::Expr(l));
                            }
                        }
                        (Select::RecordField(_, i), AbstractValue::Ctor { tag: crate::value::Tag::Record, args }) => {
                            if let Some(&l) = args.get(*i as usize) {
                                next.push(FlowNode::Expr(l));
                            }
                        }
                        (Select::MutField(name), AbstractValue::Mutable { alloc, field }) if name == field => {
                            next.push(FlowNode::Mem(*alloc, field.clone()));
                        }
                        _ => {}
                    }
                }
            }
            frontier = next;
            if frontier.is_empty() {
                return false;
            }
        }
        let mut changed = false;
        for node in frontier {
            match node {
                FlowNode::Expr(l) => {
                    changed |= self.add(p.target.clone(), AbstractValue::ExprRef(l));
                }
                mem @ FlowNode::Mem(..) => {
                    changed |= self.copy_into(&mem, &p.target);
                }
                FlowNode::Id(_) | FlowNode::Top => {}
            }
        }
        changed
    }

    fn run_assigns(&mut self) -> bool {
        let mut changed = false;
        for i in 0..self.assigns.len() {
            let a = self.assigns[i].clone();
            let base = match self.values.get(&FlowNode::Expr(a.base)) {
                None => continue,
                Some(vs) => vs,
            };
            if base.is_universal() {
                // storing into an unknown location: the value escapes
                changed |= self.escape(FlowNode::Expr(a.value));
                continue;
            }
            let cells: Vec<(Label, dv_name::Name)> = base
                .values()
                .filter_map(|v| match v {
                    AbstractValue::Mutable { alloc, field } if *field == a.field => {
                        Some((*alloc, field.clone()))
                    }
                    _ => None,
                })
                .collect();
            for (alloc, field) in cells {
                changed |= self.add(FlowNode::Mem(alloc, field), AbstractValue::ExprRef(a.value));
            }
        }
        changed
    }

    fn run_reduces(
        &mut self,
        index: &AstIndex,
        units: &[UnitData<'_>],
    ) -> Result<bool, AnalysisError> {
        let mut changed = false;
        let mut i = 0;
        while i < self.reduces.len() {
            let r = self.reduces[i].clone();
            i += 1;
            changed |= self.reduce_once(&r, index, units)?;
        }
        Ok(changed)
    }

    fn reduce_once(
        &mut self,
        r: &Reduce,
        index: &AstIndex,
        units: &[UnitData<'_>],
    ) -> Result<bool, AnalysisError> {
        let mut changed = false;
        let callee_set = match self.values.get(&FlowNode::Expr(r.callee)) {
            None => return Ok(false),
            Some(vs) => vs,
        };
        if callee_set.is_universal() {
            changed |= self.make_top(FlowNode::Expr(r.call));
            changed |= self.effect(r.call, EffectReason::EXTERN);
            for &a in r.args.iter().flatten() {
                changed |= self.escape(FlowNode::Expr(a));
            }
            return Ok(changed);
        }
        let callees: Vec<AbstractValue> = callee_set.values().cloned().collect();
        for v in callees {
            match v {
                AbstractValue::Fn { def } => {
                    let desc = index.fn_desc(def).ok_or(AnalysisError::MissingIndexEntry(def))?;
                    let head = match r.args.first().copied().flatten() {
                        Some(head) => head,
                        None => continue,
                    };
                    let param = FlowNode::Id(desc.param.clone());
                    changed |= self.add(param, AbstractValue::ExprRef(head));
                    let bodies: Vec<(dv_ast::PatId, Label)> =
                        desc.bodies.iter().map(|b| (b.pat, b.rhs)).collect();
                    let fn_unit = desc.unit;
                    for (pat, rhs) in bodies {
                        changed |=
                            bind_pattern(self, units, fn_unit, pat, Some(head), &mut Vec::new());
                        let rest = &r.args[1..];
                        if rest.is_empty() {
                            changed |= self.add(FlowNode::Expr(r.call), AbstractValue::ExprRef(rhs));
                        } else if rest[0].is_some() {
                            changed |= self.enqueue_reduce(Reduce {
                                call: r.call,
                                callee: rhs,
                                args: rest.into(),
                            });
                        } else {
                            changed |= self.add(
                                FlowNode::Expr(r.call),
                                AbstractValue::PartialApp { callee: rhs, args: rest[1..].into() },
                            );
                        }
                    }
                }
                AbstractValue::Prim(sig) => {
                    let provided = r.args.len();
                    let all_present = r.args.iter().all(|a| a.is_some());
                    if provided < sig.arity as usize && all_present {
                        changed |= self.add(
                            FlowNode::Expr(r.call),
                            AbstractValue::PartialApp { callee: r.callee, args: r.args.clone() },
                        );
                    } else {
                        // default primitive rule: taint the result, and for
                        // effectful primitives the call site and arguments too
                        changed |= self.make_top(FlowNode::Expr(r.call));
                        if sig.effectful {
                            changed |= self.effect(r.call, EffectReason::PRIM);
                            for &a in r.args.iter().flatten() {
                                changed |= self.escape(FlowNode::Expr(a));
                            }
                        }
                    }
                }
                AbstractValue::PartialApp { callee, args } => {
                    let mut combined: Vec<Option<Label>> = args.to_vec();
                    combined.extend(r.args.iter().copied());
                    if combined.len() > MAX_PARTIAL_ARGS {
                        changed |= self.make_top(FlowNode::Expr(r.call));
                        continue;
                    }
                    if combined.first().copied().flatten().is_some() {
                        changed |= self.enqueue_reduce(Reduce {
                            call: r.call,
                            callee,
                            args: combined.into_boxed_slice(),
                        });
                    } else {
                        changed |= self.add(
                            FlowNode::Expr(r.call),
                            AbstractValue::PartialApp {
                                callee,
                                args: combined[1..].into(),
                            },
                        );
                    }
                }
                AbstractValue::Ctor { .. }
                | AbstractValue::Mutable { .. }
                | AbstractValue::ExprRef(_)
                | AbstractValue::IdRef(_)
                | AbstractValue::Unknown => {}
            }
        }
        Ok(changed)
    }

    fn propagate_escapes(&mut self, index: &AstIndex, units: &[UnitData<'_>]) -> bool {
        let mut changed = false;
        let nodes: Vec<FlowNode> = self.escaped.iter().cloned().collect();
        for node in nodes {
            let vals: Vec<AbstractValue> = match self.values.get(&node) {
                None => vec![],
                Some(vs) => vs.values().cloned().collect(),
            };
            for v in vals {
                match v {
                    AbstractValue::Fn { def } => {
                        let desc = match index.fn_desc(def) {
                            None => continue,
                            Some(desc) => desc,
                        };
                        let param = FlowNode::Id(desc.param.clone());
                        let bodies: Vec<(dv_ast::PatId, Label)> =
                            desc.bodies.iter().map(|b| (b.pat, b.rhs)).collect();
                        let fn_unit = desc.unit;
                        changed |= self.make_top(param);
                        for (pat, rhs) in bodies {
                            changed |= bind_pattern(self, units, fn_unit, pat, None, &mut Vec::new());
                            changed |= self.escape(FlowNode::Expr(rhs));
                        }
                    }
                    AbstractValue::Ctor { args, .. } => {
                        for &l in args.iter() {
                            changed |= self.escape(FlowNode::Expr(l));
                        }
                    }
                    AbstractValue::Mutable { alloc, field } => {
                        changed |= self.escape(FlowNode::Mem(alloc, field));
                    }
                    AbstractValue::PartialApp { callee, args } => {
                        changed |= self.escape(FlowNode::Expr(callee));
                        for &a in args.iter().flatten() {
                            changed |= self.escape(FlowNode::Expr(a));
                        }
                    }
                    AbstractValue::ExprRef(l) => {
                        changed |= self.escape(FlowNode::Expr(l));
                    }
                    AbstractValue::IdRef(id) => {
                        changed |= self.escape(FlowNode::Id(id));
                    }
                    AbstractValue::Prim(_) | AbstractValue::Unknown => {}
                }
            }
        }
        changed
    }
}
