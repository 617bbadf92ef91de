//! The structural liveness lattice.
//!
//! A `Live` value describes how much of a value is observed: nothing
//! (`Bot`), everything (`Top`), the result of calling it (`Func`), or
//! selected constructor fields (`Ctor`). The maps are ordered so that
//! iteration and debug output stay deterministic.

use std::collections::BTreeMap;

use dv_ast::{Body, PatId, PatKind};

use crate::value::Tag;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Live {
    Top,
    Bot,
    /// The result of calling this function is demanded at the inner level.
    Func(Box<Live>),
    /// Per-tag slot demands; absent tags are not observed at all.
    Ctor(BTreeMap<Tag, Vec<Live>>),
}

impl Live {
    pub fn is_bot(&self) -> bool {
        matches!(self, Live::Bot)
    }

    pub fn is_top(&self) -> bool {
        matches!(self, Live::Top)
    }

    /// `Func` wrapping, normalizing `Func(Bot)` to `Bot`: a call whose
    /// result is not observed observes nothing of the callee.
    pub fn func(inner: Live) -> Live {
        if inner.is_bot() {
            Live::Bot
        } else {
            Live::Func(Box::new(inner))
        }
    }

    /// A constructed-but-fieldless observation: the value is inspected
    /// as a data shape without any field being demanded.
    pub fn empty_ctor() -> Live {
        Live::Ctor(BTreeMap::new())
    }

    pub fn join(&self, other: &Live) -> Live {
        match (self, other) {
            (Live::Top, _) | (_, Live::Top) => Live::Top,
            (Live::Bot, x) | (x, Live::Bot) => x.clone(),
            (Live::Func(a), Live::Func(b)) => Live::Func(Box::new(a.join(b))),
            (Live::Ctor(a), Live::Ctor(b)) => {
                let mut out = a.clone();
                for (tag, slots) in b {
                    match out.get_mut(tag) {
                        None => {
                            out.insert(tag.clone(), slots.clone());
                        }
                        Some(mine) => {
                            *mine = join_slots(mine, slots);
                        }
                    }
                }
                Live::Ctor(out)
            }
            // structurally incompatible observations
            (Live::Func(_), Live::Ctor(_)) | (Live::Ctor(_), Live::Func(_)) => Live::Top,
        }
    }

    pub fn meet(&self, other: &Live) -> Live {
        match (self, other) {
            (Live::Top, x) | (x, Live::Top) => x.clone(),
            (Live::Bot, _) | (_, Live::Bot) => Live::Bot,
            (Live::Func(a), Live::Func(b)) => Live::func(a.meet(b)),
            (Live::Ctor(a), Live::Ctor(b)) => {
                let mut out = BTreeMap::new();
                for (tag, slots) in a {
                    if let Some(theirs) = b.get(tag) {
                        out.insert(tag.clone(), meet_slots(slots, theirs));
                    }
                }
                Live::Ctor(out)
            }
            (Live::Func(_), Live::Ctor(_)) | (Live::Ctor(_), Live::Func(_)) => Live::Bot,
        }
    }

    /// What a call observes of the callee's result.
    pub fn body(&self) -> Live {
        match self {
            Live::Top => Live::Top,
            Live::Func(inner) => (**inner).clone(),
            _ => Live::Bot,
        }
    }

    /// Extract the demand on slot `i` under `tag`.
    pub fn field(&self, tag: &Tag, i: u32) -> Live {
        match self {
            Live::Top => Live::Top,
            Live::Ctor(map) => map
                .get(tag)
                .and_then(|slots| slots.get(i as usize))
                .cloned()
                .unwrap_or(Live::Bot),
            _ => Live::Bot,
        }
    }

    /// Inject `inner` into slot `i` under `tag`; every other slot is
    /// unobserved. Injecting `Bot` observes nothing at all.
    pub fn from_field(tag: Tag, i: u32, inner: Live) -> Live {
        if inner.is_bot() {
            return Live::Bot;
        }
        let mut slots = vec![Live::Bot; i as usize + 1];
        slots[i as usize] = inner;
        let mut map = BTreeMap::new();
        map.insert(tag, slots);
        Live::Ctor(map)
    }
}

fn join_slots(a: &[Live], b: &[Live]) -> Vec<Live> {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let x = a.get(i).unwrap_or(&Live::Bot);
            let y = b.get(i).unwrap_or(&Live::Bot);
            x.join(y)
        })
        .collect()
}

fn meet_slots(a: &[Live], b: &[Live]) -> Vec<Live> {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let x = a.get(i).unwrap_or(&Live::Bot);
            let y = b.get(i).unwrap_or(&Live::Bot);
            x.meet(y)
        })
        .collect()
}

/// The structural liveness a pattern match demands of its scrutinee:
/// constants force full evaluation, plain bindings force nothing, and
/// structured patterns force the shape they inspect.
pub fn controlled_by_pat(body: &Body, pat: PatId) -> Live {
    match &body.get_pat(pat).kind {
        PatKind::Any | PatKind::Var { .. } => Live::Bot,
        PatKind::Alias { pat, .. } => controlled_by_pat(body, *pat),
        PatKind::Const(_) => Live::Top,
        PatKind::Tuple { items } => {
            let slots = items.iter().map(|&p| controlled_by_pat(body, p)).collect();
            ctor1(Tag::Tuple, slots)
        }
        PatKind::Construct { ctor, args } => {
            let slots = args.iter().map(|&p| controlled_by_pat(body, p)).collect();
            ctor1(Tag::Ctor(ctor.clone()), slots)
        }
        PatKind::Variant { tag, arg } => {
            let slots = arg.iter().map(|&p| controlled_by_pat(body, p)).collect();
            ctor1(Tag::Variant(tag.clone()), slots)
        }
        PatKind::Record { fields } => {
            let len = fields.iter().map(|f| f.index as usize + 1).max().unwrap_or(0);
            let mut slots = vec![Live::Bot; len];
            for f in fields {
                slots[f.index as usize] = controlled_by_pat(body, f.pat);
            }
            ctor1(Tag::Record, slots)
        }
        PatKind::Or { left, right } => {
            controlled_by_pat(body, *left).join(&controlled_by_pat(body, *right))
        }
        // no element tracking for arrays or suspensions
        PatKind::Array { .. } | PatKind::Lazy { .. } => Live::Top,
    }
}

fn ctor1(tag: Tag, slots: Vec<Live>) -> Live {
    let mut map = BTreeMap::new();
    map.insert(tag, slots);
    Live::Ctor(map)
}
