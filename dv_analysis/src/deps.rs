//! Dependency-graph construction.
//!
//! Translates the closure fixed point into Live-propagating edges.
//! Demand flows along an edge: an edge `a -> b` carrying `f`
//! contributes `f(M[a])` to `M[b]`, and `Top` is the unique demand
//! source. Structural walks emit the per-node rules; a second pass over
//! the reduction log emits the call edges the walks cannot see.

use dv_ast::{DeclKind, ExprKind, FieldKind, ModKind, ModRef, PatId, PatKind, VarRef};
use rustc_hash::FxHashMap;

use crate::{
    closure::Closure,
    live::{controlled_by_pat, Live},
    preprocess::{structure_members, AstIndex, Id, Label, UnitIdx},
    value::{AbstractValue, FlowNode, Tag},
    UnitData,
};

/// A monotone `Live -> Live` transformer. Kept as data rather than
/// closures so edges stay comparable, composable and dumpable.
#[derive(Clone, Debug, PartialEq)]
pub enum Transform {
    Id,
    /// `l -> Func(l)`: demand on a call demands the callee's result.
    Func,
    /// `l -> body(l)`: demand on a function demands its body result.
    Body,
    /// Extract slot `i` under `tag` out of the carried demand.
    Field(Tag, u32),
    /// Inject the carried demand into slot `i` under `tag`.
    FromField(Tag, u32),
    /// `Bot -> Bot`, anything else to the given constant.
    IfNotBot(Live),
    Const(Live),
    /// Apply the first transformer, then the second.
    Seq(Box<Transform>, Box<Transform>),
}

impl Transform {
    pub fn apply(&self, l: &Live) -> Live {
        match self {
            Transform::Id => l.clone(),
            Transform::Func => Live::func(l.clone()),
            Transform::Body => l.body(),
            Transform::Field(tag, i) => l.field(tag, *i),
            Transform::FromField(tag, i) => Live::from_field(tag.clone(), *i, l.clone()),
            Transform::IfNotBot(k) => {
                if l.is_bot() {
                    Live::Bot
                } else {
                    k.clone()
                }
            }
            Transform::Const(k) => k.clone(),
            Transform::Seq(a, b) => b.apply(&a.apply(l)),
        }
    }

    pub fn then(self, next: Transform) -> Transform {
        match (self, next) {
            (Transform::Id, t) | (t, Transform::Id) => t,
            (a, b) => Transform::Seq(Box::new(a), Box::new(b)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIdx(pub u32);

impl NodeIdx {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The dependency graph over interned flow nodes, with forward and
/// reverse transformer-labelled adjacency. `Top` is node 0.
pub struct Graph {
    intern: FxHashMap<FlowNode, NodeIdx>,
    nodes: Vec<FlowNode>,
    edges: Vec<Vec<(NodeIdx, Transform)>>,
    redges: Vec<Vec<(NodeIdx, Transform)>>,
}

impl Graph {
    pub fn new() -> Self {
        let mut g = Graph {
            intern: FxHashMap::default(),
            nodes: vec![],
            edges: vec![],
            redges: vec![],
        };
        g.node(FlowNode::Top);
        g
    }

    pub fn top(&self) -> NodeIdx {
        NodeIdx(0)
    }

    pub fn node(&mut self, n: FlowNode) -> NodeIdx {
        if let Some(&idx) = self.intern.get(&n) {
            return idx;
        }
        let idx = NodeIdx(u32::try_from(self.nodes.len()).unwrap());
        self.intern.insert(n.clone(), idx);
        self.nodes.push(n);
        self.edges.push(vec![]);
        self.redges.push(vec![]);
        idx
    }

    pub fn lookup(&self, n: &FlowNode) -> Option<NodeIdx> {
        self.intern.get(n).copied()
    }

    pub fn add_edge(&mut self, from: FlowNode, to: FlowNode, t: Transform) {
        let f = self.node(from);
        let to = self.node(to);
        self.edges[f.index()].push((to, t.clone()));
        self.redges[to.index()].push((f, t));
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn flow_node(&self, idx: NodeIdx) -> &FlowNode {
        &self.nodes[idx.index()]
    }

    pub fn out_edges(&self, idx: NodeIdx) -> &[(NodeIdx, Transform)] {
        &self.edges[idx.index()]
    }

    pub fn in_edges(&self, idx: NodeIdx) -> &[(NodeIdx, Transform)] {
        &self.redges[idx.index()]
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn collect(index: &AstIndex, closure: &Closure, units: &[UnitData<'_>]) -> Graph {
    let mut c = Collect { index, closure, units, unit_idx: UnitIdx(0), graph: Graph::new() };
    for i in 0..units.len() {
        c.unit_idx = UnitIdx(u32::try_from(i).unwrap());
        c.walk_mod(units[i].unit.root);
    }
    for r in closure.reduces() {
        c.reduce_edges(r);
    }
    // pins: unit roots are externally visible, effectful labels are
    // observable, escaped nodes are in unknown hands
    for i in 0..units.len() {
        let root = index.mod_label(UnitIdx(u32::try_from(i).unwrap()), units[i].unit.root);
        c.graph.add_edge(FlowNode::Top, FlowNode::Expr(root), Transform::Const(Live::Top));
    }
    let mut effect_labels: Vec<Label> = closure.effects().keys().copied().collect();
    effect_labels.sort_unstable();
    for l in effect_labels {
        c.graph.add_edge(FlowNode::Top, FlowNode::Expr(l), Transform::Const(Live::Top));
    }
    let mut escaped: Vec<FlowNode> = closure.escaped().iter().cloned().collect();
    escaped.sort_unstable();
    for n in escaped {
        c.graph.add_edge(FlowNode::Top, n, Transform::Const(Live::Top));
    }
    tracing::debug!(nodes = c.graph.len(), "dependency graph collected");
    c.graph
}

struct Collect<'a> {
    index: &'a AstIndex,
    closure: &'a Closure,
    units: &'a [UnitData<'a>],
    unit_idx: UnitIdx,
    graph: Graph,
}

impl<'a> Collect<'a> {
    fn unit(&self) -> &'a dv_ast::CompUnit {
        self.units[self.unit_idx.0 as usize].unit
    }

    fn label(&self, expr: dv_ast::ExprId) -> Label {
        self.index.expr_label(self.unit_idx, expr)
    }

    fn ident(&self, unit: UnitIdx, stamp: dv_ast::Stamp) -> Id {
        Id { unit: self.units[unit.0 as usize].unit.name.clone(), stamp }
    }

    fn walk_mod(&mut self, id: dv_ast::ModId) {
        let unit = self.unit();
        let l = self.index.mod_label(self.unit_idx, id);
        let me = FlowNode::Expr(l);
        self.graph.node(me.clone());
        let module = unit.body.get_mod(id);
        match &module.kind {
            ModKind::Structure { decls } => {
                for decl in decls {
                    match &decl.kind {
                        DeclKind::Let { bindings, .. } => {
                            for b in bindings {
                                self.walk_expr(b.expr);
                                let rhs = self.label(b.expr);
                                self.pat_edges(self.unit_idx, b.pat, rhs);
                            }
                        }
                        DeclKind::Module { stamp, body, .. } => {
                            let mid = self.ident(self.unit_idx, *stamp);
                            let mod_label = self.index.mod_label(self.unit_idx, *body);
                            self.graph.add_edge(
                                FlowNode::Id(mid),
                                FlowNode::Expr(mod_label),
                                Transform::Id,
                            );
                            self.walk_mod(*body);
                        }
                        DeclKind::External { stamp, .. } => {
                            let eid = self.ident(self.unit_idx, *stamp);
                            self.graph.node(FlowNode::Id(eid));
                        }
                        DeclKind::Eval { expr } => {
                            self.walk_expr(*expr);
                        }
                        DeclKind::Exception { .. } => {}
                    }
                }
                // demand on the structure distributes to its members
                if id == unit.root {
                    let exports: Vec<(dv_name::Name, Id)> = self
                        .index
                        .exports_of(&unit.name)
                        .iter()
                        .map(|(n, i)| (n.clone(), i.clone()))
                        .collect();
                    for (name, ident) in exports {
                        self.graph.add_edge(
                            me.clone(),
                            FlowNode::Id(ident),
                            Transform::Field(Tag::Member(name), 0),
                        );
                    }
                } else {
                    for (name, stamp) in structure_members(unit, decls) {
                        let ident = self.ident(self.unit_idx, stamp);
                        self.graph.add_edge(
                            me.clone(),
                            FlowNode::Id(ident),
                            Transform::Field(Tag::Member(name), 0),
                        );
                    }
                }
            }
            ModKind::Ref(ModRef::Local(stamp)) => {
                let ident = self.ident(self.unit_idx, *stamp);
                self.graph.add_edge(me, FlowNode::Id(ident), Transform::Id);
            }
            ModKind::Ref(ModRef::Global { unit: other }) => match self.index.root(other) {
                Some(root) => {
                    self.graph.add_edge(me, FlowNode::Expr(root), Transform::Id);
                }
                None => {
                    self.graph.add_edge(FlowNode::Top, me, Transform::Const(Live::Top));
                }
            },
        }
    }

    /// Emit this expression's edges; returns whether the subtree may
    /// perform an effect when evaluated (function bodies do not count,
    /// their effects happen at the call).
    fn walk_expr(&mut self, id: dv_ast::ExprId) -> bool {
        let unit = self.unit();
        let l = self.label(id);
        let me = FlowNode::Expr(l);
        self.graph.node(me.clone());
        let mut eff = self.closure.has_effect(l);
        let expr = unit.body.get_expr(id);
        match &expr.kind {
            ExprKind::Const(_) => {}
            ExprKind::Var(VarRef::Local(stamp)) => {
                let ident = self.ident(self.unit_idx, *stamp);
                self.graph.add_edge(me, FlowNode::Id(ident), Transform::Id);
            }
            ExprKind::Var(VarRef::Global { unit: other, member }) => {
                match self.index.export(other, member) {
                    Some(ident) => {
                        self.graph.add_edge(me, FlowNode::Id(ident.clone()), Transform::Id);
                    }
                    None => {
                        self.graph.add_edge(FlowNode::Top, me, Transform::Const(Live::Top));
                    }
                }
            }
            ExprKind::Let { bindings, body, .. } => {
                for b in bindings {
                    eff |= self.walk_expr(b.expr);
                    let rhs = self.label(b.expr);
                    self.pat_edges(self.unit_idx, b.pat, rhs);
                }
                eff |= self.walk_expr(*body);
                self.graph.add_edge(me, FlowNode::Expr(self.label(*body)), Transform::Id);
            }
            ExprKind::Function { cases } => {
                for c in cases {
                    self.walk_expr(c.body);
                    self.intern_pat_vars(self.unit_idx, c.pat);
                    self.graph.add_edge(
                        me.clone(),
                        FlowNode::Expr(self.label(c.body)),
                        Transform::Body,
                    );
                }
            }
            ExprKind::Apply { callee, args } => {
                eff |= self.walk_expr(*callee);
                for &a in args.iter().flatten() {
                    eff |= self.walk_expr(a);
                }
                // currying: wrap per present argument, unwrap per
                // omitted one
                let mut t = Transform::Id;
                for a in args {
                    t = t.then(if a.is_some() { Transform::Func } else { Transform::Body });
                }
                self.graph.add_edge(me, FlowNode::Expr(self.label(*callee)), t);
            }
            ExprKind::Match { scrutinee, arms } => {
                eff |= self.walk_expr(*scrutinee);
                let scrut = self.label(*scrutinee);
                let mut cbp = Live::Bot;
                for arm in arms {
                    if !arm.exception {
                        cbp = cbp.join(&controlled_by_pat(&unit.body, arm.pat));
                    }
                }
                self.graph.add_edge(
                    me.clone(),
                    FlowNode::Expr(scrut),
                    Transform::IfNotBot(cbp),
                );
                for arm in arms {
                    if let Some(g) = arm.guard {
                        eff |= self.walk_expr(g);
                        self.graph.add_edge(
                            me.clone(),
                            FlowNode::Expr(self.label(g)),
                            Transform::IfNotBot(Live::Top),
                        );
                    }
                    eff |= self.walk_expr(arm.body);
                    self.graph.add_edge(
                        me.clone(),
                        FlowNode::Expr(self.label(arm.body)),
                        Transform::Id,
                    );
                    if arm.exception {
                        self.intern_pat_vars(self.unit_idx, arm.pat);
                    } else {
                        self.pat_edges(self.unit_idx, arm.pat, scrut);
                    }
                }
            }
            ExprKind::Try { body, handlers } => {
                eff |= self.walk_expr(*body);
                self.graph.add_edge(
                    me.clone(),
                    FlowNode::Expr(self.label(*body)),
                    Transform::Id,
                );
                for arm in handlers {
                    if let Some(g) = arm.guard {
                        eff |= self.walk_expr(g);
                        self.graph.add_edge(
                            me.clone(),
                            FlowNode::Expr(self.label(g)),
                            Transform::IfNotBot(Live::Top),
                        );
                    }
                    eff |= self.walk_expr(arm.body);
                    self.graph.add_edge(
                        me.clone(),
                        FlowNode::Expr(self.label(arm.body)),
                        Transform::Id,
                    );
                    self.intern_pat_vars(self.unit_idx, arm.pat);
                }
            }
            ExprKind::Tuple { items } => {
                for (i, &e) in items.iter().enumerate() {
                    eff |= self.walk_expr(e);
                    self.graph.add_edge(
                        me.clone(),
                        FlowNode::Expr(self.label(e)),
                        Transform::Field(Tag::Tuple, u32::try_from(i).unwrap()),
                    );
                }
            }
            ExprKind::Construct { ctor, args } => {
                for (i, &e) in args.iter().enumerate() {
                    eff |= self.walk_expr(e);
                    self.graph.add_edge(
                        me.clone(),
                        FlowNode::Expr(self.label(e)),
                        Transform::Field(Tag::Ctor(ctor.clone()), u32::try_from(i).unwrap()),
                    );
                }
            }
            ExprKind::Variant { tag, arg } => {
                if let Some(a) = arg {
                    eff |= self.walk_expr(*a);
                    self.graph.add_edge(
                        me,
                        FlowNode::Expr(self.label(*a)),
                        Transform::Field(Tag::Variant(tag.clone()), 0),
                    );
                }
            }
            ExprKind::Record { fields } => {
                for (i, f) in fields.iter().enumerate() {
                    eff |= self.walk_expr(f.expr);
                    self.graph.add_edge(
                        me.clone(),
                        FlowNode::Expr(self.label(f.expr)),
                        Transform::Field(Tag::Record, u32::try_from(i).unwrap()),
                    );
                    if f.mutable {
                        // the cell's demand reaches the initializer
                        self.graph.add_edge(
                            FlowNode::Mem(l, f.name.clone()),
                            FlowNode::Expr(self.label(f.expr)),
                            Transform::Id,
                        );
                    }
                }
            }
            ExprKind::Field { base, kind } => {
                eff |= self.walk_expr(*base);
                let base_label = self.label(*base);
                match kind {
                    FieldKind::Tuple { index } => {
                        self.graph.add_edge(
                            me,
                            FlowNode::Expr(base_label),
                            Transform::FromField(Tag::Tuple, *index),
                        );
                    }
                    FieldKind::Record { index, mutable: false, .. } => {
                        self.graph.add_edge(
                            me,
                            FlowNode::Expr(base_label),
                            Transform::FromField(Tag::Record, *index),
                        );
                    }
                    FieldKind::Record { name, mutable: true, .. } => {
                        // reading a cell observes the carrier as a shape
                        self.graph.add_edge(
                            me.clone(),
                            FlowNode::Expr(base_label),
                            Transform::IfNotBot(Live::empty_ctor()),
                        );
                        for (alloc, field) in self.mutable_cells(base_label, name) {
                            self.graph.add_edge(
                                me.clone(),
                                FlowNode::Mem(alloc, field),
                                Transform::Id,
                            );
                        }
                    }
                }
            }
            ExprKind::SetField { base, field, value } => {
                eff |= self.walk_expr(*base);
                eff |= self.walk_expr(*value);
                let base_label = self.label(*base);
                // the stored-into carrier itself must stay alive as a shape
                self.graph.add_edge(
                    FlowNode::Top,
                    FlowNode::Expr(base_label),
                    Transform::Const(Live::empty_ctor()),
                );
                for (alloc, cell_field) in self.mutable_cells(base_label, field) {
                    self.graph.add_edge(
                        FlowNode::Mem(alloc, cell_field),
                        FlowNode::Expr(self.label(*value)),
                        Transform::Id,
                    );
                }
            }
            ExprKind::Sequence { first, second } => {
                eff |= self.walk_expr(*first);
                eff |= self.walk_expr(*second);
                self.graph.add_edge(me, FlowNode::Expr(self.label(*second)), Transform::Id);
            }
            ExprKind::If { cond, then, orelse } => {
                let cond_eff = self.walk_expr(*cond);
                let then_eff = self.walk_expr(*then);
                let else_eff = match orelse {
                    Some(e) => self.walk_expr(*e),
                    None => false,
                };
                let cond_label = FlowNode::Expr(self.label(*cond));
                if then_eff || else_eff {
                    self.graph.add_edge(FlowNode::Top, cond_label, Transform::Const(Live::Top));
                } else {
                    self.graph.add_edge(me.clone(), cond_label, Transform::IfNotBot(Live::Top));
                }
                self.graph.add_edge(me.clone(), FlowNode::Expr(self.label(*then)), Transform::Id);
                if let Some(e) = orelse {
                    self.graph.add_edge(me, FlowNode::Expr(self.label(*e)), Transform::Id);
                }
                eff |= cond_eff || then_eff || else_eff;
            }
            ExprKind::While { cond, body } => {
                let cond_eff = self.walk_expr(*cond);
                let body_eff = self.walk_expr(*body);
                let cond_label = FlowNode::Expr(self.label(*cond));
                if body_eff {
                    self.graph.add_edge(FlowNode::Top, cond_label, Transform::Const(Live::Top));
                } else {
                    self.graph.add_edge(me, cond_label, Transform::IfNotBot(Live::Top));
                }
                eff |= cond_eff || body_eff;
            }
            ExprKind::For { var, lo, hi, body, .. } => {
                let lo_eff = self.walk_expr(*lo);
                let hi_eff = self.walk_expr(*hi);
                let body_eff = self.walk_expr(*body);
                let ident = self.ident(self.unit_idx, *var);
                self.graph.node(FlowNode::Id(ident));
                let lo_label = FlowNode::Expr(self.label(*lo));
                let hi_label = FlowNode::Expr(self.label(*hi));
                if body_eff {
                    self.graph.add_edge(FlowNode::Top, lo_label, Transform::Const(Live::Top));
                    self.graph.add_edge(FlowNode::Top, hi_label, Transform::Const(Live::Top));
                } else {
                    self.graph.add_edge(me.clone(), lo_label, Transform::IfNotBot(Live::Top));
                    self.graph.add_edge(me, hi_label, Transform::IfNotBot(Live::Top));
                }
                eff |= lo_eff || hi_eff || body_eff;
            }
            ExprKind::Array { items } => {
                // no element tracking: any demand demands every element
                for &e in items {
                    eff |= self.walk_expr(e);
                    self.graph.add_edge(
                        me.clone(),
                        FlowNode::Expr(self.label(e)),
                        Transform::IfNotBot(Live::Top),
                    );
                }
            }
            ExprKind::Lazy { body } => {
                self.walk_expr(*body);
                self.graph.add_edge(
                    me,
                    FlowNode::Expr(self.label(*body)),
                    Transform::IfNotBot(Live::Top),
                );
            }
            ExprKind::Raise { arg } => {
                eff = true;
                self.walk_expr(*arg);
                self.graph.add_edge(
                    FlowNode::Top,
                    FlowNode::Expr(self.label(*arg)),
                    Transform::Const(Live::Top),
                );
            }
        }
        eff
    }

    /// The mutable cells a base expression may evaluate to, per the
    /// closure fixed point, in deterministic order.
    fn mutable_cells(&self, base: Label, field: &dv_name::Name) -> Vec<(Label, dv_name::Name)> {
        let mut cells: Vec<(Label, dv_name::Name)> = match self.closure.get(&FlowNode::Expr(base)) {
            None => vec![],
            Some(vs) => vs
                .values()
                .filter_map(|v| match v {
                    AbstractValue::Mutable { alloc, field: f } if f == field => {
                        Some((*alloc, f.clone()))
                    }
                    _ => None,
                })
                .collect(),
        };
        cells.sort_unstable();
        cells
    }

    /// Call edges for one resolved reduction.
    fn reduce_edges(&mut self, r: &crate::closure::Reduce) {
        let callee_set = match self.closure.get(&FlowNode::Expr(r.callee)) {
            None => return,
            Some(vs) => vs,
        };
        if callee_set.is_universal() {
            // arguments handed to unknown code are fully observable
            for &a in r.args.iter().flatten() {
                self.graph.add_edge(
                    FlowNode::Top,
                    FlowNode::Expr(a),
                    Transform::Const(Live::Top),
                );
            }
            return;
        }
        let callees: Vec<AbstractValue> = callee_set.values().cloned().collect();
        for v in callees {
            match v {
                AbstractValue::Fn { def } => {
                    let desc = match self.index.fn_desc(def) {
                        None => continue,
                        Some(d) => d,
                    };
                    let head = match r.args.first().copied().flatten() {
                        Some(h) => h,
                        None => continue,
                    };
                    let param = desc.param.clone();
                    let fn_unit = desc.unit;
                    let bodies: Vec<(PatId, Label)> =
                        desc.bodies.iter().map(|b| (b.pat, b.rhs)).collect();
                    self.graph.add_edge(
                        FlowNode::Id(param),
                        FlowNode::Expr(head),
                        Transform::Id,
                    );
                    for (pat, rhs) in bodies {
                        self.pat_edges(fn_unit, pat, head);
                        if r.args.len() == 1 {
                            self.graph.add_edge(
                                FlowNode::Expr(r.call),
                                FlowNode::Expr(rhs),
                                Transform::Id,
                            );
                        }
                        // longer argument lists continue through the
                        // chained reduce records in the log
                    }
                }
                AbstractValue::Prim(_) => {
                    for &a in r.args.iter().flatten() {
                        self.graph.add_edge(
                            FlowNode::Expr(r.call),
                            FlowNode::Expr(a),
                            Transform::IfNotBot(Live::Top),
                        );
                    }
                }
                _ => {}
            }
        }
    }

    fn pat_edges(&mut self, unit: UnitIdx, pat: PatId, scrut: Label) {
        let mut steps = vec![];
        self.pat_edges_inner(unit, pat, scrut, &mut steps, false);
    }

    fn pat_edges_inner(
        &mut self,
        u: UnitIdx,
        pat: PatId,
        scrut: Label,
        steps: &mut Vec<(Tag, u32)>,
        opaque: bool,
    ) {
        let unit = self.units[u.0 as usize].unit;
        match &unit.body.get_pat(pat).kind {
            PatKind::Any | PatKind::Const(_) => {}
            PatKind::Var { stamp, .. } => {
                self.var_edge(u, *stamp, scrut, steps, opaque);
            }
            PatKind::Alias { pat: inner, stamp, .. } => {
                self.var_edge(u, *stamp, scrut, steps, opaque);
                self.pat_edges_inner(u, *inner, scrut, steps, opaque);
            }
            PatKind::Tuple { items } => {
                for (i, &p) in items.iter().enumerate() {
                    steps.push((Tag::Tuple, u32::try_from(i).unwrap()));
                    self.pat_edges_inner(u, p, scrut, steps, opaque);
                    steps.pop();
                }
            }
            PatKind::Construct { ctor, args } => {
                for (i, &p) in args.iter().enumerate() {
                    steps.push((Tag::Ctor(ctor.clone()), u32::try_from(i).unwrap()));
                    self.pat_edges_inner(u, p, scrut, steps, opaque);
                    steps.pop();
                }
            }
            PatKind::Variant { tag, arg } => {
                if let Some(&p) = arg.as_ref() {
                    steps.push((Tag::Variant(tag.clone()), 0));
                    self.pat_edges_inner(u, p, scrut, steps, opaque);
                    steps.pop();
                }
            }
            PatKind::Record { fields } => {
                for f in fields {
                    if f.mutable {
                        // cell contents are not tracked through patterns
                        self.pat_edges_inner(u, f.pat, scrut, steps, true);
                    } else {
                        steps.push((Tag::Record, f.index));
                        self.pat_edges_inner(u, f.pat, scrut, steps, opaque);
                        steps.pop();
                    }
                }
            }
            PatKind::Or { left, right } => {
                self.pat_edges_inner(u, *left, scrut, steps, opaque);
                self.pat_edges_inner(u, *right, scrut, steps, opaque);
            }
            PatKind::Array { items } => {
                for &p in items.iter() {
                    self.pat_edges_inner(u, p, scrut, steps, true);
                }
            }
            PatKind::Lazy { pat: inner } => {
                self.pat_edges_inner(u, *inner, scrut, steps, true);
            }
        }
    }

    fn var_edge(
        &mut self,
        u: UnitIdx,
        stamp: dv_ast::Stamp,
        scrut: Label,
        steps: &[(Tag, u32)],
        opaque: bool,
    ) {
        let ident = self.ident(u, stamp);
        let t = if opaque {
            Transform::IfNotBot(Live::Top)
        } else {
            let mut t = Transform::Id;
            for (tag, i) in steps.iter().rev() {
                t = t.then(Transform::FromField(tag.clone(), *i));
            }
            t
        };
        self.graph.add_edge(FlowNode::Id(ident), FlowNode::Expr(scrut), t);
    }

    fn intern_pat_vars(&mut self, u: UnitIdx, pat: PatId) {
        let unit = self.units[u.0 as usize].unit;
        match &unit.body.get_pat(pat).kind {
            PatKind::Any | PatKind::Const(_) => {}
            PatKind::Var { stamp, .. } => {
                let ident = self.ident(u, *stamp);
                self.graph.node(FlowNode::Id(ident));
            }
            PatKind::Alias { pat: inner, stamp, .. } => {
                let ident = self.ident(u, *stamp);
                self.graph.node(FlowNode::Id(ident));
                self.intern_pat_vars(u, *inner);
            }
            PatKind::Tuple { items } | PatKind::Array { items } => {
                for &p in items {
                    self.intern_pat_vars(u, p);
                }
            }
            PatKind::Construct { args, .. } => {
                for &p in args {
                    self.intern_pat_vars(u, p);
                }
            }
            PatKind::Variant { arg, .. } => {
                if let Some(&p) = arg.as_ref() {
                    self.intern_pat_vars(u, p);
                }
            }
            PatKind::Record { fields } => {
                for f in fields {
                    self.intern_pat_vars(u, f.pat);
                }
            }
            PatKind::Or { left, right } => {
                self.intern_pat_vars(u, *left);
                self.intern_pat_vars(u, *right);
            }
            PatKind::Lazy { pat: inner } => self.intern_pat_vars(u, *inner),
        }
    }
}
