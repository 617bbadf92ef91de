//! Abstract values, value sets and flow nodes.

use dv_name::Name;
use rustc_hash::FxHashSet;

use crate::preprocess::{Id, Label};

/// Constructor tags shared between abstract values and the liveness
/// lattice: ordinary constructors, polymorphic variants, tuples,
/// records and named module members.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tag {
    Tuple,
    Record,
    Ctor(Name),
    Variant(Name),
    Member(Name),
}

/// A node of the value-dependency graph.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FlowNode {
    Expr(Label),
    Id(Id),
    /// The storage cell of a mutable record field allocated at a label.
    Mem(Label, Name),
    /// The ambient external world; anything it points at is live.
    Top,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrimSig {
    pub name: Name,
    pub arity: u32,
    pub effectful: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AbstractValue {
    Prim(PrimSig),
    /// A closure, identified by its defining expression label.
    Fn { def: Label },
    /// An under-applied call awaiting more arguments.
    PartialApp { callee: Label, args: Box<[Option<Label>]> },
    /// A constructed value with its children labels.
    Ctor { tag: Tag, args: Box<[Label]> },
    /// A reference to the mutable field cell allocated at a label.
    Mutable { alloc: Label, field: Name },
    /// Indirection to another expression's value set.
    ExprRef(Label),
    /// Indirection to an identifier's value set.
    IdRef(Id),
    /// Escaped to the external world; reads as the universal set.
    Unknown,
}

/// Either the universe, or a finite set of abstract values. The set
/// only ever grows; `⊤` absorbs everything.
#[derive(Clone, Debug, PartialEq)]
pub enum ValueSet {
    Top,
    Values(FxHashSet<AbstractValue>),
}

impl Default for ValueSet {
    fn default() -> Self {
        ValueSet::Values(FxHashSet::default())
    }
}

impl ValueSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_top(&self) -> bool {
        matches!(self, ValueSet::Top)
    }

    /// `⊤`, or contains `Unknown` (which reads as the universe).
    pub fn is_universal(&self) -> bool {
        match self {
            ValueSet::Top => true,
            ValueSet::Values(vs) => vs.contains(&AbstractValue::Unknown),
        }
    }

    pub fn insert(&mut self, value: AbstractValue) -> bool {
        match self {
            ValueSet::Top => false,
            ValueSet::Values(vs) => vs.insert(value),
        }
    }

    pub fn make_top(&mut self) -> bool {
        if self.is_top() {
            return false;
        }
        *self = ValueSet::Top;
        true
    }

    /// The finite members; empty for `⊤`.
    pub fn values(&self) -> impl Iterator<Item = &AbstractValue> + '_ {
        match self {
            ValueSet::Top => None,
            ValueSet::Values(vs) => Some(vs.iter()),
        }
        .into_iter()
        .flatten()
    }

    pub fn len(&self) -> usize {
        match self {
            ValueSet::Top => 0,
            ValueSet::Values(vs) => vs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
