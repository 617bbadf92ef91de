//! Whole-program dead-value analysis over typed trees of an ML-family
//! language.
//!
//! The pipeline runs in batched phases over every accepted unit:
//!
//! 1. label every expression and build the AST index (`preprocess`),
//! 2. seed abstract-value, effect and reduction constraints
//!    (`constraints`),
//! 3. iterate the closure to a fixed point (`closure`),
//! 4. translate the fixed point into a Live-propagating dependency
//!    graph (`deps`),
//! 5. solve liveness over SCCs (`solve`),
//! 6. enumerate dead nodes (`report`).
//!
//! All state lives in per-run values threaded through the phases; there
//! is no ambient global state.

use std::io;
use std::path::PathBuf;

use dv_ast::CompUnit;
use dv_files::{FileId, Sources};
use dv_name::Name;
use thiserror::Error;

pub mod closure;
mod constraints;
pub mod deps;
pub mod live;
pub mod preprocess;
pub mod report;
pub mod solve;
pub mod value;

use closure::Closure;
use preprocess::{AstIndex, Label, UnitIdx};
use report::Warning;

#[derive(Debug, Default)]
pub struct AnalysisConfig {
    /// Dump intermediate tables to stderr.
    pub debug: bool,
    /// Back-annotate source files with dead-value markers.
    pub write: bool,
    /// Suppress warnings whose source file matches one of these prefixes.
    pub suppress: Vec<PathBuf>,
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("function at {0:?} preprocessed twice")]
    DuplicateFunction(Label),
    #[error("no AST index entry for {0:?}")]
    MissingIndexEntry(Label),
    #[error("empty strongly connected component")]
    EmptyScc,
    #[error("unit `{unit}`: {msg}")]
    BadUnit { unit: Name, msg: String },
}

impl AnalysisError {
    /// Errors that condemn one unit without invalidating the run.
    pub fn is_unit_local(&self) -> bool {
        matches!(self, AnalysisError::BadUnit { .. })
    }
}

/// One accepted compilation unit plus its registered source file.
#[derive(Clone, Copy)]
pub struct UnitData<'a> {
    pub unit: &'a CompUnit,
    pub file: FileId,
}

/// Analyze the given units and return the dead-value warnings, sorted
/// by source file and byte offset. Units that fail validation are
/// skipped with a logged warning; internal invariant violations abort.
pub fn run(
    units: &[(CompUnit, FileId)],
    sources: &Sources,
    config: &AnalysisConfig,
) -> Result<Vec<Warning>, AnalysisError> {
    let mut index = AstIndex::default();
    let mut accepted: Vec<UnitData<'_>> = vec![];
    for (unit, file) in units {
        match index.add_unit(unit, *file) {
            Ok(_) => accepted.push(UnitData { unit, file: *file }),
            Err(err) if err.is_unit_local() => {
                tracing::warn!(unit = %unit.name, error = %err, "skipping unit");
            }
            Err(err) => return Err(err),
        }
    }
    tracing::debug!(units = accepted.len(), labels = index.label_count(), "preprocessed");

    let mut closure = Closure::new();
    for i in 0..accepted.len() {
        constraints::generate(&index, &accepted, UnitIdx(u32::try_from(i).unwrap()), &mut closure);
    }
    closure.solve(&index, &accepted)?;

    let graph = deps::collect(&index, &closure, &accepted);
    let live = solve::solve(&graph)?;
    let warnings = report::report(&index, &closure, &graph, &live, config, sources);

    if config.debug {
        let stderr = io::stderr();
        let mut lock = stderr.lock();
        let _ = report::dump(&mut lock, &closure, &graph, &live);
    }
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::Id;
    use crate::value::{AbstractValue, FlowNode, Tag};
    use dv_ast::Stamp;

    fn ident(stamp: u32) -> Id {
        Id { unit: Name::new("Test"), stamp: Stamp::new(stamp).unwrap() }
    }

    fn label(i: usize) -> Label {
        Label::from_index(i)
    }

    #[test]
    fn refs_fold_transitively() {
        let mut c = Closure::new();
        let ctor = AbstractValue::Ctor { tag: Tag::Tuple, args: Box::new([label(0), label(1)]) };
        c.add(FlowNode::Id(ident(1)), ctor.clone());
        c.add(FlowNode::Expr(label(2)), AbstractValue::IdRef(ident(1)));
        c.add(FlowNode::Expr(label(3)), AbstractValue::ExprRef(label(2)));
        c.solve(&AstIndex::default(), &[]).unwrap();

        let values: Vec<_> =
            c.get(&FlowNode::Expr(label(3))).unwrap().values().cloned().collect();
        assert!(values.contains(&ctor));
    }

    #[test]
    fn top_absorbs_through_refs() {
        let mut c = Closure::new();
        c.make_top(FlowNode::Id(ident(1)));
        c.add(FlowNode::Expr(label(0)), AbstractValue::IdRef(ident(1)));
        c.solve(&AstIndex::default(), &[]).unwrap();
        assert!(c.get(&FlowNode::Expr(label(0))).unwrap().is_top());
    }

    #[test]
    fn resolving_is_monotone_and_repeatable() {
        let mut c = Closure::new();
        let ctor = AbstractValue::Ctor { tag: Tag::Tuple, args: Box::new([label(0)]) };
        c.add(FlowNode::Id(ident(1)), ctor.clone());
        c.add(FlowNode::Expr(label(2)), AbstractValue::IdRef(ident(1)));
        c.solve(&AstIndex::default(), &[]).unwrap();
        let first: Vec<_> =
            c.get(&FlowNode::Expr(label(2))).unwrap().values().cloned().collect();

        // re-running changes nothing
        c.solve(&AstIndex::default(), &[]).unwrap();
        let second: Vec<_> =
            c.get(&FlowNode::Expr(label(2))).unwrap().values().cloned().collect();
        assert_eq!(first.len(), second.len());

        // an extra constraint only grows the sets
        c.add(FlowNode::Id(ident(1)), AbstractValue::Fn { def: label(9) });
        c.solve(&AstIndex::default(), &[]).unwrap();
        let grown = c.get(&FlowNode::Expr(label(2))).unwrap();
        assert!(grown.values().cloned().collect::<Vec<_>>().contains(&ctor));
        assert!(grown.len() > first.len());
    }

    #[test]
    fn escaped_constructors_escape_their_children() {
        let mut c = Closure::new();
        let ctor = AbstractValue::Ctor { tag: Tag::Tuple, args: Box::new([label(0), label(1)]) };
        c.add(FlowNode::Expr(label(2)), ctor);
        c.escape(FlowNode::Expr(label(2)));
        c.solve(&AstIndex::default(), &[]).unwrap();
        assert!(c.escaped().contains(&FlowNode::Expr(label(0))));
        assert!(c.escaped().contains(&FlowNode::Expr(label(1))));
    }
}
