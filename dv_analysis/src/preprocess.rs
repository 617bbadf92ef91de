//! The labelling pass and the AST index.
//!
//! Every expression and module expression in every accepted unit gets a
//! fresh globally unique label. The index resolves a label back to its
//! unit, node and source span, and holds the derived tables the later
//! passes work from: per-function body descriptors, identifier
//! declaration sites, per-unit export tables and root module labels.

use std::{fmt, num::NonZeroU32, path::PathBuf};

use dv_ast::{CompUnit, Decl, DeclKind, ExprId, ExprKind, ModId, ModKind, PatId, PatKind, SrcSpan, Stamp};
use dv_files::{FileId, Span};
use dv_name::Name;
use rustc_hash::FxHashMap;

use crate::AnalysisError;

/// A globally unique handle for one expression or module expression.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(NonZeroU32);

impl Label {
    pub(crate) fn from_index(i: usize) -> Label {
        Label(NonZeroU32::new(u32::try_from(i + 1).unwrap()).unwrap())
    }

    pub fn index(self) -> usize {
        self.0.get() as usize - 1
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// A bound name: the owning unit plus its per-unit stamp.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id {
    pub unit: Name,
    pub stamp: Stamp,
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.unit, self.stamp.get())
    }
}

/// Index of an accepted unit within the analysis run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitIdx(pub u32);

#[derive(Clone, Copy, Debug)]
pub enum NodeRef {
    Expr(ExprId),
    Mod(ModId),
}

pub struct IndexEntry {
    pub unit: UnitIdx,
    pub node: NodeRef,
    pub span: Span,
    /// The expression's type is `unit`; its value is uninformative.
    pub unit_ty: bool,
}

pub struct UnitInfo {
    pub name: Name,
    pub file: FileId,
    pub source: PathBuf,
    expr_labels: Vec<Option<Label>>,
    mod_labels: Vec<Option<Label>>,
}

/// One `fun`-case: the formal pattern and the label of its right-hand side.
pub struct BodyDesc {
    pub pat: PatId,
    pub rhs: Label,
}

/// Descriptor of a function expression, keyed by its defining label.
pub struct FnDesc {
    pub unit: UnitIdx,
    /// Synthesized identifier standing for the whole formal parameter.
    pub param: Id,
    pub bodies: Vec<BodyDesc>,
}

pub struct DeclSite {
    pub name: Name,
    pub span: Span,
}

#[derive(Default)]
pub struct AstIndex {
    units: Vec<UnitInfo>,
    entries: Vec<IndexEntry>,
    fns: FxHashMap<Label, FnDesc>,
    decl_sites: FxHashMap<Id, DeclSite>,
    exports: FxHashMap<Name, Vec<(Name, Id)>>,
    roots: FxHashMap<Name, Label>,
    root_list: Vec<Label>,
}

impl AstIndex {
    /// Label one unit and merge its tables. On error nothing is merged,
    /// so a rejected unit can be skipped without poisoning the index.
    pub fn add_unit(&mut self, unit: &CompUnit, file: FileId) -> Result<UnitIdx, AnalysisError> {
        if self.roots.contains_key(&unit.name) {
            return Err(AnalysisError::BadUnit {
                unit: unit.name.clone(),
                msg: "duplicate compilation unit name".to_owned(),
            });
        }
        let unit_idx = UnitIdx(u32::try_from(self.units.len()).unwrap());
        let mut labeler = Labeler {
            unit,
            unit_idx,
            file,
            base: self.entries.len(),
            entries: vec![],
            expr_labels: vec![None; unit.body.expr_count()],
            mod_labels: vec![None; unit.body.mod_count()],
            fns: vec![],
            decl_sites: vec![],
            next_stamp: max_stamp(unit) + 1,
        };
        let root = labeler.label_mod(unit.root)?;

        let members = match &unit.body.get_mod(unit.root).kind {
            ModKind::Structure { decls } => structure_members(unit, decls),
            ModKind::Ref(_) => vec![],
        };
        let exports: Vec<(Name, Id)> = members
            .into_iter()
            .filter(|(name, _)| match &unit.signature {
                None => true,
                Some(sig) => sig.contains(name),
            })
            .map(|(name, stamp)| (name, Id { unit: unit.name.clone(), stamp }))
            .collect();

        self.entries.extend(labeler.entries);
        self.fns.extend(labeler.fns);
        self.decl_sites.extend(labeler.decl_sites);
        self.units.push(UnitInfo {
            name: unit.name.clone(),
            file,
            source: unit.source.clone(),
            expr_labels: labeler.expr_labels,
            mod_labels: labeler.mod_labels,
        });
        self.roots.insert(unit.name.clone(), root);
        self.root_list.push(root);
        self.exports.insert(unit.name.clone(), exports);
        Ok(unit_idx)
    }

    pub fn entry(&self, l: Label) -> &IndexEntry {
        self.entries.get(l.index()).unwrap()
    }

    pub fn span(&self, l: Label) -> Span {
        self.entry(l).span
    }

    pub fn label_count(&self) -> usize {
        self.entries.len()
    }

    pub fn expr_label(&self, unit: UnitIdx, expr: ExprId) -> Label {
        self.units[unit.0 as usize].expr_labels[expr.index()].unwrap()
    }

    pub fn mod_label(&self, unit: UnitIdx, module: ModId) -> Label {
        self.units[unit.0 as usize].mod_labels[module.index()].unwrap()
    }

    pub fn fn_desc(&self, l: Label) -> Option<&FnDesc> {
        self.fns.get(&l)
    }

    pub fn decl_site(&self, id: &Id) -> Option<&DeclSite> {
        self.decl_sites.get(id)
    }

    pub fn export(&self, unit: &Name, member: &Name) -> Option<&Id> {
        self.exports
            .get(unit)
            .and_then(|members| members.iter().find(|(n, _)| n == member).map(|(_, id)| id))
    }

    pub fn exports_of(&self, unit: &Name) -> &[(Name, Id)] {
        self.exports.get(unit).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn root(&self, unit: &Name) -> Option<Label> {
        self.roots.get(unit).copied()
    }

    /// Root module labels in accepted-unit order.
    pub fn roots(&self) -> &[Label] {
        &self.root_list
    }

    pub fn unit_info(&self, unit: UnitIdx) -> &UnitInfo {
        &self.units[unit.0 as usize]
    }
}

/// Top-level members of a structure, in declaration order.
pub(crate) fn structure_members(unit: &CompUnit, decls: &[Decl]) -> Vec<(Name, Stamp)> {
    let mut out = vec![];
    for decl in decls {
        match &decl.kind {
            DeclKind::Let { bindings, .. } => {
                for b in bindings {
                    pat_vars(unit, b.pat, &mut out);
                }
            }
            DeclKind::Module { stamp, name, .. } => out.push((name.clone(), *stamp)),
            DeclKind::External { stamp, name, .. } => out.push((name.clone(), *stamp)),
            DeclKind::Eval { .. } | DeclKind::Exception { .. } => {}
        }
    }
    out
}

fn pat_vars(unit: &CompUnit, pat: PatId, out: &mut Vec<(Name, Stamp)>) {
    match &unit.body.get_pat(pat).kind {
        PatKind::Any | PatKind::Const(_) => {}
        PatKind::Var { stamp, name } => out.push((name.clone(), *stamp)),
        PatKind::Alias { pat, stamp, name } => {
            out.push((name.clone(), *stamp));
            pat_vars(unit, *pat, out);
        }
        PatKind::Tuple { items } | PatKind::Array { items } => {
            for &p in items {
                pat_vars(unit, p, out);
            }
        }
        PatKind::Construct { args, .. } => {
            for &p in args {
                pat_vars(unit, p, out);
            }
        }
        PatKind::Variant { arg, .. } => {
            if let Some(p) = arg {
                pat_vars(unit, *p, out);
            }
        }
        PatKind::Record { fields } => {
            for f in fields {
                pat_vars(unit, f.pat, out);
            }
        }
        // both sides of an or-pattern bind the same stamps
        PatKind::Or { left, .. } => pat_vars(unit, *left, out),
        PatKind::Lazy { pat } => pat_vars(unit, *pat, out),
    }
}

/// Highest stamp occurring anywhere in the unit, so synthesized
/// parameter identifiers never collide with artifact stamps.
fn max_stamp(unit: &CompUnit) -> u32 {
    let mut max = 0;
    for pat in unit.body.pats() {
        match &pat.kind {
            PatKind::Var { stamp, .. } | PatKind::Alias { stamp, .. } => max = max.max(stamp.get()),
            _ => {}
        }
    }
    for expr in unit.body.exprs() {
        if let ExprKind::For { var, .. } = &expr.kind {
            max = max.max(var.get());
        }
    }
    for module in unit.body.mods() {
        if let ModKind::Structure { decls } = &module.kind {
            for decl in decls {
                match &decl.kind {
                    DeclKind::Module { stamp, .. } | DeclKind::External { stamp, .. } => {
                        max = max.max(stamp.get())
                    }
                    _ => {}
                }
            }
        }
    }
    max
}

struct Labeler<'a> {
    unit: &'a CompUnit,
    unit_idx: UnitIdx,
    file: FileId,
    base: usize,
    entries: Vec<IndexEntry>,
    expr_labels: Vec<Option<Label>>,
    mod_labels: Vec<Option<Label>>,
    fns: Vec<(Label, FnDesc)>,
    decl_sites: Vec<(Id, DeclSite)>,
    next_stamp: u32,
}

impl<'a> Labeler<'a> {
    fn ident(&self, stamp: Stamp) -> Id {
        Id { unit: self.unit.name.clone(), stamp }
    }

    fn span(&self, s: SrcSpan) -> Span {
        Span { file: self.file, start: s.start, end: s.end }
    }

    fn bad(&self, msg: &str) -> AnalysisError {
        AnalysisError::BadUnit { unit: self.unit.name.clone(), msg: msg.to_owned() }
    }

    fn fresh_stamp(&mut self) -> Stamp {
        let s = Stamp::new(self.next_stamp).unwrap();
        self.next_stamp += 1;
        s
    }

    fn fresh_label(&mut self, node: NodeRef, span: SrcSpan, unit_ty: bool) -> Label {
        let l = Label::from_index(self.base + self.entries.len());
        self.entries.push(IndexEntry { unit: self.unit_idx, node, span: self.span(span), unit_ty });
        l
    }

    fn record_decl_site(&mut self, stamp: Stamp, name: &Name, span: SrcSpan) {
        self.decl_sites
            .push((self.ident(stamp), DeclSite { name: name.clone(), span: self.span(span) }));
    }

    fn label_mod(&mut self, id: ModId) -> Result<Label, AnalysisError> {
        let unit: &'a CompUnit = self.unit;
        let module = unit.body.try_mod(id).ok_or_else(|| self.bad("dangling module id"))?;
        if self.mod_labels[id.index()].is_some() {
            return Err(self.bad("module expression appears twice in the tree"));
        }
        let l = self.fresh_label(NodeRef::Mod(id), module.span, false);
        self.mod_labels[id.index()] = Some(l);
        if let ModKind::Structure { decls } = &module.kind {
            for decl in decls {
                self.label_decl(decl)?;
            }
        }
        Ok(l)
    }

    fn label_decl(&mut self, decl: &Decl) -> Result<(), AnalysisError> {
        match &decl.kind {
            DeclKind::Let { bindings, .. } => {
                for b in bindings {
                    self.label_pat(b.pat)?;
                    self.label_expr(b.expr)?;
                }
            }
            DeclKind::Module { stamp, name, body } => {
                self.record_decl_site(*stamp, name, decl.span);
                self.label_mod(*body)?;
            }
            DeclKind::External { stamp, name, .. } => {
                self.record_decl_site(*stamp, name, decl.span);
            }
            DeclKind::Eval { expr } => {
                self.label_expr(*expr)?;
            }
            DeclKind::Exception { .. } => {}
        }
        Ok(())
    }

    fn label_pat(&mut self, id: PatId) -> Result<(), AnalysisError> {
        let unit: &'a CompUnit = self.unit;
        let pat = unit.body.try_pat(id).ok_or_else(|| self.bad("dangling pattern id"))?;
        match &pat.kind {
            PatKind::Any | PatKind::Const(_) => {}
            PatKind::Var { stamp, name } => self.record_decl_site(*stamp, name, pat.span),
            PatKind::Alias { pat: inner, stamp, name } => {
                self.record_decl_site(*stamp, name, pat.span);
                self.label_pat(*inner)?;
            }
            PatKind::Tuple { items } | PatKind::Array { items } => {
                for &p in items {
                    self.label_pat(p)?;
                }
            }
            PatKind::Construct { args, .. } => {
                for &p in args {
                    self.label_pat(p)?;
                }
            }
            PatKind::Variant { arg, .. } => {
                if let Some(p) = arg {
                    self.label_pat(*p)?;
                }
            }
            PatKind::Record { fields } => {
                for f in fields {
                    self.label_pat(f.pat)?;
                }
            }
            PatKind::Or { left, right } => {
                self.label_pat(*left)?;
                self.label_pat(*right)?;
            }
            PatKind::Lazy { pat } => self.label_pat(*pat)?,
        }
        Ok(())
    }

    fn label_expr(&mut self, id: ExprId) -> Result<Label, AnalysisError> {
        let unit: &'a CompUnit = self.unit;
        let expr = unit.body.try_expr(id).ok_or_else(|| self.bad("dangling expression id"))?;
        if let Some(prev) = self.expr_labels[id.index()] {
            return Err(match &expr.kind {
                ExprKind::Function { .. } => AnalysisError::DuplicateFunction(prev),
                _ => self.bad("expression appears twice in the tree"),
            });
        }
        let l = self.fresh_label(NodeRef::Expr(id), expr.span, expr.ty.is_unit());
        self.expr_labels[id.index()] = Some(l);
        match &expr.kind {
            ExprKind::Const(_) | ExprKind::Var(_) => {}
            ExprKind::Let { bindings, body, .. } => {
                for b in bindings {
                    self.label_pat(b.pat)?;
                    self.label_expr(b.expr)?;
                }
                self.label_expr(*body)?;
            }
            ExprKind::Function { cases } => {
                let param_stamp = self.fresh_stamp();
                let param = self.ident(param_stamp);
                let mut bodies = vec![];
                for c in cases {
                    self.label_pat(c.pat)?;
                    let rhs = self.label_expr(c.body)?;
                    bodies.push(BodyDesc { pat: c.pat, rhs });
                }
                self.fns.push((l, FnDesc { unit: self.unit_idx, param, bodies }));
            }
            ExprKind::Apply { callee, args } => {
                self.label_expr(*callee)?;
                for &a in args.iter().flatten() {
                    self.label_expr(a)?;
                }
            }
            ExprKind::Match { scrutinee, arms } => {
                self.label_expr(*scrutinee)?;
                for arm in arms {
                    self.label_pat(arm.pat)?;
                    if let Some(g) = arm.guard {
                        self.label_expr(g)?;
                    }
                    self.label_expr(arm.body)?;
                }
            }
            ExprKind::Try { body, handlers } => {
                self.label_expr(*body)?;
                for arm in handlers {
                    self.label_pat(arm.pat)?;
                    if let Some(g) = arm.guard {
                        self.label_expr(g)?;
                    }
                    self.label_expr(arm.body)?;
                }
            }
            ExprKind::Tuple { items } | ExprKind::Construct { args: items, .. } | ExprKind::Array { items } => {
                for &e in items {
                    self.label_expr(e)?;
                }
            }
            ExprKind::Variant { arg, .. } => {
                if let Some(a) = arg {
                    self.label_expr(*a)?;
                }
            }
            ExprKind::Record { fields } => {
                for f in fields {
                    self.label_expr(f.expr)?;
                }
            }
            ExprKind::Field { base, .. } => {
                self.label_expr(*base)?;
            }
            ExprKind::SetField { base, value, .. } => {
                self.label_expr(*base)?;
                self.label_expr(*value)?;
            }
            ExprKind::Sequence { first, second } => {
                self.label_expr(*first)?;
                self.label_expr(*second)?;
            }
            ExprKind::If { cond, then, orelse } => {
                self.label_expr(*cond)?;
                self.label_expr(*then)?;
                if let Some(e) = orelse {
                    self.label_expr(*e)?;
                }
            }
            ExprKind::While { cond, body } => {
                self.label_expr(*cond)?;
                self.label_expr(*body)?;
            }
            ExprKind::For { var, var_name, lo, hi, body } => {
                self.record_decl_site(*var, var_name, expr.span);
                self.label_expr(*lo)?;
                self.label_expr(*hi)?;
                self.label_expr(*body)?;
            }
            ExprKind::Lazy { body } => {
                self.label_expr(*body)?;
            }
            ExprKind::Raise { arg } => {
                self.label_expr(*arg)?;
            }
        }
        Ok(l)
    }
}
