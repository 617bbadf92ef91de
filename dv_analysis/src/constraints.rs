//! Constraint generation.
//!
//! Walks each accepted unit once and seeds the closure state: initial
//! abstract values (`ExprRef`/`IdRef` indirections for subset
//! constraints), pending reductions for applications, projection
//! constraints for pattern binding and field access, assignment
//! constraints for mutable stores, and the per-label effect bits that
//! are known syntactically.

use dv_ast::{CompUnit, Decl, DeclKind, ExprId, ExprKind, FieldKind, ModId, ModKind, PatId, PatKind, Stamp, VarRef};
use dv_name::Name;

use crate::{
    closure::{is_pure_prim, Assign, Closure, EffectReason, Projection, Reduce, Select},
    preprocess::{AstIndex, Id, Label, UnitIdx},
    value::{AbstractValue, FlowNode, PrimSig, Tag},
    UnitData,
};

pub(crate) fn generate(
    index: &AstIndex,
    units: &[UnitData<'_>],
    unit_idx: UnitIdx,
    closure: &mut Closure,
) {
    let unit = units[unit_idx.0 as usize].unit;
    let mut gen = Gen { index, units, unit_idx, unit, closure };
    gen.gen_mod(unit.root);

    // exported members escape to unknown external callers
    for (_, id) in index.exports_of(&unit.name) {
        gen.closure.escape(FlowNode::Id(id.clone()));
    }
}

struct Gen<'a> {
    index: &'a AstIndex,
    units: &'a [UnitData<'a>],
    unit_idx: UnitIdx,
    unit: &'a CompUnit,
    closure: &'a mut Closure,
}

impl<'a> Gen<'a> {
    fn label(&self, expr: ExprId) -> Label {
        self.index.expr_label(self.unit_idx, expr)
    }

    fn ident(&self, stamp: Stamp) -> Id {
        Id { unit: self.unit.name.clone(), stamp }
    }

    fn gen_mod(&mut self, id: ModId) {
        let module = self.unit.body.get_mod(id);
        let l = self.index.mod_label(self.unit_idx, id);
        let node = FlowNode::Expr(l);
        match &module.kind {
            ModKind::Structure { decls } => {
                for decl in decls {
                    self.gen_decl(decl);
                }
                // the structure's value carries one member slot per named binding
                for decl in decls {
                    match &decl.kind {
                        DeclKind::Let { bindings, .. } => {
                            for b in bindings {
                                if let PatKind::Var { stamp: _, name } =
                                    &self.unit.body.get_pat(b.pat).kind
                                {
                                    let member = AbstractValue::Ctor {
                                        tag: Tag::Member(name.clone()),
                                        args: Box::new([self.label(b.expr)]),
                                    };
                                    self.closure.add(node.clone(), member);
                                }
                            }
                        }
                        DeclKind::Module { name, body, .. } => {
                            let member = AbstractValue::Ctor {
                                tag: Tag::Member(name.clone()),
                                args: Box::new([self.index.mod_label(self.unit_idx, *body)]),
                            };
                            self.closure.add(node.clone(), member);
                        }
                        _ => {}
                    }
                }
            }
            ModKind::Ref(dv_ast::ModRef::Local(stamp)) => {
                let id = self.ident(*stamp);
                self.closure.add(node, AbstractValue::IdRef(id));
            }
            ModKind::Ref(dv_ast::ModRef::Global { unit }) => match self.index.root(unit) {
                Some(root) => {
                    self.closure.add(node, AbstractValue::ExprRef(root));
                }
                None => {
                    self.closure.make_top(node);
                }
            },
        }
    }

    fn gen_decl(&mut self, decl: &Decl) {
        match &decl.kind {
            DeclKind::Let { bindings, .. } => {
                for b in bindings {
                    self.gen_expr(b.expr);
                    self.bind(b.pat, Some(self.label(b.expr)));
                }
            }
            DeclKind::Module { stamp, body, .. } => {
                self.gen_mod(*body);
                let id = self.ident(*stamp);
                let label = self.index.mod_label(self.unit_idx, *body);
                self.closure.add(FlowNode::Id(id), AbstractValue::ExprRef(label));
            }
            DeclKind::External { stamp, prim, arity, .. } => {
                let id = self.ident(*stamp);
                let sig = PrimSig {
                    name: prim.clone(),
                    arity: *arity,
                    effectful: !is_pure_prim(prim.as_str()),
                };
                self.closure.add(FlowNode::Id(id), AbstractValue::Prim(sig));
            }
            DeclKind::Eval { expr } => {
                self.gen_expr(*expr);
            }
            DeclKind::Exception { .. } => {}
        }
    }

    fn bind(&mut self, pat: PatId, source: Option<Label>) {
        bind_pattern(self.closure, self.units, self.unit_idx, pat, source, &mut Vec::new());
    }

    fn gen_expr(&mut self, id: ExprId) {
        let l = self.label(id);
        let node = FlowNode::Expr(l);
        let expr = self.unit.body.get_expr(id);
        match &expr.kind {
            ExprKind::Const(_) => {}
            ExprKind::Var(VarRef::Local(stamp)) => {
                let id = self.ident(*stamp);
                self.closure.add(node, AbstractValue::IdRef(id));
            }
            ExprKind::Var(VarRef::Global { unit, member }) => {
                match self.index.export(unit, member) {
                    Some(id) => {
                        self.closure.add(node, AbstractValue::IdRef(id.clone()));
                    }
                    // no tracked definition; the value escapes us
                    None => {
                        self.closure.make_top(node);
                    }
                }
            }
            ExprKind::Let { bindings, body, .. } => {
                for b in bindings {
                    self.gen_expr(b.expr);
                    self.bind(b.pat, Some(self.label(b.expr)));
                }
                self.gen_expr(*body);
                self.closure.add(node, AbstractValue::ExprRef(self.label(*body)));
            }
            ExprKind::Function { cases } => {
                self.closure.add(node, AbstractValue::Fn { def: l });
                for c in cases {
                    self.gen_expr(c.body);
                }
            }
            ExprKind::Apply { callee, args } => {
                self.gen_expr(*callee);
                for &a in args.iter().flatten() {
                    self.gen_expr(a);
                }
                let labels: Box<[Option<Label>]> =
                    args.iter().map(|a| a.map(|e| self.label(e))).collect();
                if labels.is_empty() {
                    self.closure.add(node, AbstractValue::ExprRef(self.label(*callee)));
                } else if labels[0].is_some() {
                    self.closure.enqueue_reduce(Reduce {
                        call: l,
                        callee: self.label(*callee),
                        args: labels,
                    });
                } else {
                    self.closure.add(
                        node,
                        AbstractValue::PartialApp {
                            callee: self.label(*callee),
                            args: labels[1..].into(),
                        },
                    );
                }
            }
            ExprKind::Match { scrutinee, arms } => {
                self.gen_expr(*scrutinee);
                let scrut = self.label(*scrutinee);
                for arm in arms {
                    if let Some(g) = arm.guard {
                        self.gen_expr(g);
                    }
                    self.gen_expr(arm.body);
                    self.closure.add(node.clone(), AbstractValue::ExprRef(self.label(arm.body)));
                    // exception arms match raised values we do not track
                    let source = if arm.exception { None } else { Some(scrut) };
                    self.bind(arm.pat, source);
                }
            }
            ExprKind::Try { body, handlers } => {
                self.gen_expr(*body);
                self.closure.add(node.clone(), AbstractValue::ExprRef(self.label(*body)));
                for arm in handlers {
                    if let Some(g) = arm.guard {
                        self.gen_expr(g);
                    }
                    self.gen_expr(arm.body);
                    self.closure.add(node.clone(), AbstractValue::ExprRef(self.label(arm.body)));
                    self.bind(arm.pat, None);
                }
            }
            ExprKind::Tuple { items } => {
                for &e in items {
                    self.gen_expr(e);
                }
                let args: Box<[Label]> = items.iter().map(|&e| self.label(e)).collect();
                self.closure.add(node, AbstractValue::Ctor { tag: Tag::Tuple, args });
            }
            ExprKind::Construct { ctor, args } => {
                for &e in args {
                    self.gen_expr(e);
                }
                let labels: Box<[Label]> = args.iter().map(|&e| self.label(e)).collect();
                self.closure
                    .add(node, AbstractValue::Ctor { tag: Tag::Ctor(ctor.clone()), args: labels });
            }
            ExprKind::Variant { tag, arg } => {
                if let Some(a) = arg {
                    self.gen_expr(*a);
                }
                let labels: Box<[Label]> = arg.iter().map(|&e| self.label(e)).collect();
                self.closure
                    .add(node, AbstractValue::Ctor { tag: Tag::Variant(tag.clone()), args: labels });
            }
            ExprKind::Record { fields } => {
                for f in fields {
                    self.gen_expr(f.expr);
                }
                let args: Box<[Label]> = fields.iter().map(|f| self.label(f.expr)).collect();
                self.closure.add(node.clone(), AbstractValue::Ctor { tag: Tag::Record, args });
                for f in fields {
                    if f.mutable {
                        self.closure.add(
                            node.clone(),
                            AbstractValue::Mutable { alloc: l, field: f.name.clone() },
                        );
                        self.closure.add(
                            FlowNode::Mem(l, f.name.clone()),
                            AbstractValue::ExprRef(self.label(f.expr)),
                        );
                    }
                }
            }
            ExprKind::Field { base, kind } => {
                self.gen_expr(*base);
                let step = match kind {
                    FieldKind::Tuple { index } => Select::TupleIdx(*index),
                    FieldKind::Record { name, mutable: true, .. } => Select::MutField(name.clone()),
                    FieldKind::Record { name, index, mutable: false } => {
                        Select::RecordField(name.clone(), *index)
                    }
                };
                self.closure.project(Projection {
                    target: node,
                    source: self.label(*base),
                    path: Box::new([step]),
                });
            }
            ExprKind::SetField { base, field, value } => {
                self.gen_expr(*base);
                self.gen_expr(*value);
                self.closure.effect(l, EffectReason::ASSIGN);
                self.closure.assign(Assign {
                    base: self.label(*base),
                    field: field.clone(),
                    value: self.label(*value),
                });
            }
            ExprKind::Sequence { first, second } => {
                self.gen_expr(*first);
                self.gen_expr(*second);
                self.closure.add(node, AbstractValue::ExprRef(self.label(*second)));
            }
            ExprKind::If { cond, then, orelse } => {
                self.gen_expr(*cond);
                self.gen_expr(*then);
                self.closure.add(node.clone(), AbstractValue::ExprRef(self.label(*then)));
                if let Some(e) = orelse {
                    self.gen_expr(*e);
                    self.closure.add(node, AbstractValue::ExprRef(self.label(*e)));
                }
            }
            ExprKind::While { cond, body } => {
                self.gen_expr(*cond);
                self.gen_expr(*body);
            }
            ExprKind::For { var, lo, hi, body, .. } => {
                self.gen_expr(*lo);
                self.gen_expr(*hi);
                self.gen_expr(*body);
                // the index ranges over ints we do not track
                let id = self.ident(*var);
                self.closure.add(FlowNode::Id(id), AbstractValue::Unknown);
            }
            ExprKind::Array { items } => {
                for &e in items {
                    self.gen_expr(e);
                }
            }
            ExprKind::Lazy { body } => {
                self.gen_expr(*body);
            }
            ExprKind::Raise { arg } => {
                self.gen_expr(*arg);
                self.closure.effect(l, EffectReason::RAISE);
                self.closure.escape(FlowNode::Expr(self.label(*arg)));
            }
        }
    }
}

/// Bind a pattern against a scrutinee source, emitting identifier
/// constraints and projection constraints for structured sub-patterns.
/// `source = None` binds every variable in the pattern to `⊤`.
pub(crate) fn bind_pattern(
    closure: &mut Closure,
    units: &[UnitData<'_>],
    unit_idx: UnitIdx,
    pat: PatId,
    source: Option<Label>,
    path: &mut Vec<Select>,
) -> bool {
    let unit = units[unit_idx.0 as usize].unit;
    let mut changed = false;
    match &unit.body.get_pat(pat).kind {
        PatKind::Any | PatKind::Const(_) => {}
        PatKind::Var { stamp, .. } => {
            changed |= bind_var(closure, &unit.name, *stamp, source, path);
        }
        PatKind::Alias { pat: inner, stamp, .. } => {
            changed |= bind_var(closure, &unit.name, *stamp, source, path);
            changed |= bind_pattern(closure, units, unit_idx, *inner, source, path);
        }
        PatKind::Tuple { items } => {
            for (i, &p) in items.iter().enumerate() {
                path.push(Select::TupleIdx(i as u32));
                changed |= bind_pattern(closure, units, unit_idx, p, source, path);
                path.pop();
            }
        }
        PatKind::Construct { ctor, args } => {
            for (i, &p) in args.iter().enumerate() {
                path.push(Select::CtorArg(ctor.clone(), i as u32));
                changed |= bind_pattern(closure, units, unit_idx, p, source, path);
                path.pop();
            }
        }
        PatKind::Variant { tag, arg } => {
            if let Some(&p) = arg.as_ref() {
                path.push(Select::VariantArg(tag.clone()));
                changed |= bind_pattern(closure, units, unit_idx, p, source, path);
                path.pop();
            }
        }
        PatKind::Record { fields } => {
            for f in fields {
                let step = if f.mutable {
                    Select::MutField(f.name.clone())
                } else {
                    Select::RecordField(f.name.clone(), f.index)
                };
                path.push(step);
                changed |= bind_pattern(closure, units, unit_idx, f.pat, source, path);
                path.pop();
            }
        }
        PatKind::Or { left, right } => {
            changed |= bind_pattern(closure, units, unit_idx, *left, source, path);
            changed |= bind_pattern(closure, units, unit_idx, *right, source, path);
        }
        // no element tracking inside arrays or suspensions
        PatKind::Array { items } => {
            for &p in items.iter() {
                changed |= bind_pattern(closure, units, unit_idx, p, None, path);
            }
        }
        PatKind::Lazy { pat: inner } => {
            changed |= bind_pattern(closure, units, unit_idx, *inner, None, path);
        }
    }
    changed
}

fn bind_var(
    closure: &mut Closure,
    unit_name: &Name,
    stamp: Stamp,
    source: Option<Label>,
    path: &[Select],
) -> bool {
    let node = FlowNode::Id(Id { unit: unit_name.clone(), stamp });
    match source {
        None => closure.add(node, AbstractValue::Unknown),
        Some(src) if path.is_empty() => closure.add(node, AbstractValue::ExprRef(src)),
        Some(src) => closure.project(Projection {
            target: node,
            source: src,
            path: path.to_vec().into_boxed_slice(),
        }),
    }
}
