//! The typed-tree artifact model.
//!
//! A host compiler front-end emits one `CompUnit` per source module:
//! expression, pattern and module-expression arenas addressed by
//! `NonZeroU32` ids, the unit's top-level structure, and an optional
//! public signature. Name resolution has already happened; bound names
//! are per-unit stamps. Only a shallow structural type summary is kept
//! per expression, which is all the analysis needs.

use std::num::NonZeroU32;
use std::path::PathBuf;

use dv_name::Name;
use serde::{Deserialize, Serialize};

pub mod build;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExprId(NonZeroU32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PatId(NonZeroU32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModId(NonZeroU32);

/// A bound name's per-unit stamp, unique within its compilation unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp(NonZeroU32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0.get() as usize - 1
    }
}

impl PatId {
    pub fn index(self) -> usize {
        self.0.get() as usize - 1
    }
}

impl ModId {
    pub fn index(self) -> usize {
        self.0.get() as usize - 1
    }
}

impl Stamp {
    pub fn new(v: u32) -> Option<Stamp> {
        NonZeroU32::new(v).map(Stamp)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

/// A byte range within the unit's original source file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrcSpan {
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompUnit {
    pub name: Name,
    /// Path of the original source file, for diagnostics and suppression.
    pub source: PathBuf,
    pub body: Body,
    /// The unit's top-level structure.
    pub root: ModId,
    /// Exported value names; `None` exports every top-level member.
    pub signature: Option<Vec<Name>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Body {
    exprs: Vec<Expr>,
    pats: Vec<Pat>,
    mods: Vec<ModExpr>,
}

impl Body {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_expr(&mut self, expr: Expr) -> ExprId {
        let id = u32::try_from(self.exprs.len() + 1).unwrap();
        self.exprs.push(expr);
        ExprId(NonZeroU32::new(id).unwrap())
    }

    pub fn add_pat(&mut self, pat: Pat) -> PatId {
        let id = u32::try_from(self.pats.len() + 1).unwrap();
        self.pats.push(pat);
        PatId(NonZeroU32::new(id).unwrap())
    }

    pub fn add_mod(&mut self, module: ModExpr) -> ModId {
        let id = u32::try_from(self.mods.len() + 1).unwrap();
        self.mods.push(module);
        ModId(NonZeroU32::new(id).unwrap())
    }

    pub fn get_expr(&self, id: ExprId) -> &Expr {
        self.exprs.get(id.index()).unwrap()
    }

    pub fn get_pat(&self, id: PatId) -> &Pat {
        self.pats.get(id.index()).unwrap()
    }

    pub fn get_mod(&self, id: ModId) -> &ModExpr {
        self.mods.get(id.index()).unwrap()
    }

    pub fn try_expr(&self, id: ExprId) -> Option<&Expr> {
        self.exprs.get(id.index())
    }

    pub fn try_pat(&self, id: PatId) -> Option<&Pat> {
        self.pats.get(id.index())
    }

    pub fn try_mod(&self, id: ModId) -> Option<&ModExpr> {
        self.mods.get(id.index())
    }

    pub fn expr_count(&self) -> usize {
        self.exprs.len()
    }

    pub fn pat_count(&self) -> usize {
        self.pats.len()
    }

    pub fn mod_count(&self) -> usize {
        self.mods.len()
    }

    /// All patterns in the arena, reachable or not. Used for stamp scans.
    pub fn pats(&self) -> impl Iterator<Item = &Pat> {
        self.pats.iter()
    }

    pub fn exprs(&self) -> impl Iterator<Item = &Expr> {
        self.exprs.iter()
    }

    pub fn mods(&self) -> impl Iterator<Item = &ModExpr> {
        self.mods.iter()
    }
}

/// Shallow type summary of an expression.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ty {
    Unit,
    Arrow,
    Tuple,
    Named(Name),
    Var,
}

impl Ty {
    pub fn is_unit(&self) -> bool {
        matches!(self, Ty::Unit)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Expr {
    pub ty: Ty,
    pub kind: ExprKind,
    pub span: SrcSpan,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Str,
}

/// A resolved variable occurrence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarRef {
    /// A name bound within this unit.
    Local(Stamp),
    /// A value member of another unit's top-level module.
    Global { unit: Name, member: Name },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Binding {
    pub pat: PatId,
    pub expr: ExprId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FnCase {
    pub pat: PatId,
    pub body: ExprId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Arm {
    pub pat: PatId,
    pub guard: Option<ExprId>,
    pub body: ExprId,
    /// Exception arms match raised exceptions instead of the scrutinee.
    pub exception: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordField {
    pub name: Name,
    pub mutable: bool,
    pub expr: ExprId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Tuple { index: u32 },
    Record { name: Name, index: u32, mutable: bool },
}

#[derive(Debug, Serialize, Deserialize)]
pub enum ExprKind {
    Const(Constant),
    Var(VarRef),
    Let {
        rec: bool,
        bindings: Vec<Binding>,
        body: ExprId,
    },
    Function {
        cases: Vec<FnCase>,
    },
    /// `None` arguments are omitted labeled arguments (under-application).
    Apply {
        callee: ExprId,
        args: Vec<Option<ExprId>>,
    },
    Match {
        scrutinee: ExprId,
        arms: Vec<Arm>,
    },
    Try {
        body: ExprId,
        handlers: Vec<Arm>,
    },
    Tuple {
        items: Vec<ExprId>,
    },
    Construct {
        ctor: Name,
        args: Vec<ExprId>,
    },
    Variant {
        tag: Name,
        arg: Option<ExprId>,
    },
    Record {
        fields: Vec<RecordField>,
    },
    Field {
        base: ExprId,
        kind: FieldKind,
    },
    SetField {
        base: ExprId,
        field: Name,
        value: ExprId,
    },
    Sequence {
        first: ExprId,
        second: ExprId,
    },
    If {
        cond: ExprId,
        then: ExprId,
        orelse: Option<ExprId>,
    },
    While {
        cond: ExprId,
        body: ExprId,
    },
    For {
        var: Stamp,
        var_name: Name,
        lo: ExprId,
        hi: ExprId,
        body: ExprId,
    },
    Array {
        items: Vec<ExprId>,
    },
    Lazy {
        body: ExprId,
    },
    Raise {
        arg: ExprId,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Pat {
    pub kind: PatKind,
    pub span: SrcSpan,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordPatField {
    pub name: Name,
    pub index: u32,
    pub mutable: bool,
    pub pat: PatId,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum PatKind {
    Any,
    Var {
        stamp: Stamp,
        name: Name,
    },
    Alias {
        pat: PatId,
        stamp: Stamp,
        name: Name,
    },
    Const(Constant),
    Tuple {
        items: Vec<PatId>,
    },
    Construct {
        ctor: Name,
        args: Vec<PatId>,
    },
    Variant {
        tag: Name,
        arg: Option<PatId>,
    },
    Record {
        fields: Vec<RecordPatField>,
    },
    Or {
        left: PatId,
        right: PatId,
    },
    Array {
        items: Vec<PatId>,
    },
    Lazy {
        pat: PatId,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModExpr {
    pub kind: ModKind,
    pub span: SrcSpan,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModRef {
    /// A module bound within this unit.
    Local(Stamp),
    /// Another unit's top-level module.
    Global { unit: Name },
}

#[derive(Debug, Serialize, Deserialize)]
pub enum ModKind {
    Structure { decls: Vec<Decl> },
    Ref(ModRef),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Decl {
    pub kind: DeclKind,
    pub span: SrcSpan,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum DeclKind {
    Let {
        rec: bool,
        bindings: Vec<Binding>,
    },
    Module {
        stamp: Stamp,
        name: Name,
        body: ModId,
    },
    /// An external value declaration backed by a named primitive.
    External {
        stamp: Stamp,
        name: Name,
        prim: Name,
        arity: u32,
    },
    /// Top-level evaluation; the value is discarded.
    Eval {
        expr: ExprId,
    },
    Exception {
        ctor: Name,
    },
}
