//! Programmatic construction of compilation units.
//!
//! Host-compiler bridges and the test suite build typed trees through
//! this API instead of hand-writing arena indices and stamps.

use std::path::PathBuf;

use dv_name::Name;

use crate::{
    Arm, Binding, Body, CompUnit, Constant, Decl, DeclKind, Expr, ExprId, ExprKind, FieldKind,
    FnCase, ModExpr, ModId, ModKind, Pat, PatId, PatKind, RecordField, SrcSpan, Stamp, Ty, VarRef,
};

pub struct UnitBuilder {
    name: Name,
    source: PathBuf,
    body: Body,
    next_stamp: u32,
}

impl UnitBuilder {
    pub fn new(name: impl Into<Name>, source: impl Into<PathBuf>) -> Self {
        UnitBuilder {
            name: name.into(),
            source: source.into(),
            body: Body::new(),
            next_stamp: 0,
        }
    }

    pub fn stamp(&mut self) -> Stamp {
        self.next_stamp += 1;
        Stamp::new(self.next_stamp).unwrap()
    }

    pub fn expr(&mut self, ty: Ty, kind: ExprKind, span: SrcSpan) -> ExprId {
        self.body.add_expr(Expr { ty, kind, span })
    }

    pub fn pat(&mut self, kind: PatKind, span: SrcSpan) -> PatId {
        self.body.add_pat(Pat { kind, span })
    }

    pub fn module(&mut self, kind: ModKind, span: SrcSpan) -> ModId {
        self.body.add_mod(ModExpr { kind, span })
    }

    pub fn int(&mut self, value: i64, span: SrcSpan) -> ExprId {
        self.expr(Ty::Named(Name::new("int")), ExprKind::Const(Constant::Int(value)), span)
    }

    pub fn unit_const(&mut self, span: SrcSpan) -> ExprId {
        self.expr(Ty::Unit, ExprKind::Const(Constant::Unit), span)
    }

    pub fn var(&mut self, stamp: Stamp, ty: Ty, span: SrcSpan) -> ExprId {
        self.expr(ty, ExprKind::Var(VarRef::Local(stamp)), span)
    }

    pub fn global(&mut self, unit: impl Into<Name>, member: impl Into<Name>, ty: Ty, span: SrcSpan) -> ExprId {
        self.expr(
            ty,
            ExprKind::Var(VarRef::Global { unit: unit.into(), member: member.into() }),
            span,
        )
    }

    pub fn var_pat(&mut self, name: impl Into<Name>, span: SrcSpan) -> (PatId, Stamp) {
        let stamp = self.stamp();
        let pat = self.pat(PatKind::Var { stamp, name: name.into() }, span);
        (pat, stamp)
    }

    pub fn any_pat(&mut self, span: SrcSpan) -> PatId {
        self.pat(PatKind::Any, span)
    }

    pub fn unit_pat(&mut self, span: SrcSpan) -> PatId {
        self.pat(PatKind::Const(Constant::Unit), span)
    }

    pub fn let_in(&mut self, ty: Ty, bindings: Vec<Binding>, body: ExprId, span: SrcSpan) -> ExprId {
        self.expr(ty, ExprKind::Let { rec: false, bindings, body }, span)
    }

    /// A single-case function `fun pat -> body`.
    pub fn func1(&mut self, pat: PatId, body: ExprId, span: SrcSpan) -> ExprId {
        self.expr(Ty::Arrow, ExprKind::Function { cases: vec![FnCase { pat, body }] }, span)
    }

    /// An application with every argument present.
    pub fn apply(&mut self, ty: Ty, callee: ExprId, args: Vec<ExprId>, span: SrcSpan) -> ExprId {
        self.expr(
            ty,
            ExprKind::Apply { callee, args: args.into_iter().map(Some).collect() },
            span,
        )
    }

    pub fn tuple(&mut self, items: Vec<ExprId>, span: SrcSpan) -> ExprId {
        self.expr(Ty::Tuple, ExprKind::Tuple { items }, span)
    }

    pub fn tuple_field(&mut self, ty: Ty, base: ExprId, index: u32, span: SrcSpan) -> ExprId {
        self.expr(ty, ExprKind::Field { base, kind: FieldKind::Tuple { index } }, span)
    }

    pub fn record(&mut self, ty: Ty, fields: Vec<RecordField>, span: SrcSpan) -> ExprId {
        self.expr(ty, ExprKind::Record { fields }, span)
    }

    pub fn record_field(
        &mut self,
        ty: Ty,
        base: ExprId,
        name: impl Into<Name>,
        index: u32,
        mutable: bool,
        span: SrcSpan,
    ) -> ExprId {
        self.expr(
            ty,
            ExprKind::Field { base, kind: FieldKind::Record { name: name.into(), index, mutable } },
            span,
        )
    }

    pub fn construct(&mut self, ty: Ty, ctor: impl Into<Name>, args: Vec<ExprId>, span: SrcSpan) -> ExprId {
        self.expr(ty, ExprKind::Construct { ctor: ctor.into(), args }, span)
    }

    pub fn seq(&mut self, first: ExprId, second: ExprId, span: SrcSpan) -> ExprId {
        let ty = self.body.get_expr(second).ty.clone();
        self.expr(ty, ExprKind::Sequence { first, second }, span)
    }

    pub fn arm(&self, pat: PatId, body: ExprId) -> Arm {
        Arm { pat, guard: None, body, exception: false }
    }

    pub fn bind(&self, pat: PatId, expr: ExprId) -> Binding {
        Binding { pat, expr }
    }

    pub fn let_decl(&self, rec: bool, bindings: Vec<Binding>, span: SrcSpan) -> Decl {
        Decl { kind: DeclKind::Let { rec, bindings }, span }
    }

    pub fn eval_decl(&self, expr: ExprId, span: SrcSpan) -> Decl {
        Decl { kind: DeclKind::Eval { expr }, span }
    }

    pub fn external_decl(
        &mut self,
        name: impl Into<Name>,
        prim: impl Into<Name>,
        arity: u32,
        span: SrcSpan,
    ) -> (Decl, Stamp) {
        let stamp = self.stamp();
        (
            Decl {
                kind: DeclKind::External { stamp, name: name.into(), prim: prim.into(), arity },
                span,
            },
            stamp,
        )
    }

    /// Wrap the declarations in the unit's top-level structure.
    pub fn finish(
        mut self,
        decls: Vec<Decl>,
        root_span: SrcSpan,
        signature: Option<Vec<Name>>,
    ) -> CompUnit {
        let root = self.module(ModKind::Structure { decls }, root_span);
        CompUnit {
            name: self.name,
            source: self.source,
            body: self.body,
            root,
            signature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_are_distinct() {
        let mut b = UnitBuilder::new("Test", "Test.ml");
        let s1 = b.stamp();
        let s2 = b.stamp();
        assert_ne!(s1, s2);
    }

    #[test]
    fn finish_wraps_root_structure() {
        let mut b = UnitBuilder::new("Test", "Test.ml");
        let span = SrcSpan { start: 0, end: 9 };
        let one = b.int(1, SrcSpan { start: 8, end: 9 });
        let (pat, _) = b.var_pat("x", SrcSpan { start: 4, end: 5 });
        let binding = b.bind(pat, one);
        let decl = b.let_decl(false, vec![binding], span);
        let unit = b.finish(vec![decl], span, None);
        match &unit.body.get_mod(unit.root).kind {
            ModKind::Structure { decls } => assert_eq!(decls.len(), 1),
            other => panic!("expected a structure, got {other:?}"),
        }
    }
}
