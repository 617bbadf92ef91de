//! End-to-end runs over typed units built with `dv_ast::build`,
//! asserting the exact warning set the analysis produces.

use std::path::PathBuf;

use dv_analysis::{
    report::{to_report, WarnKind, Warning},
    run, AnalysisConfig, AnalysisError,
};
use dv_ast::{
    build::UnitBuilder, CompUnit, ExprKind, PatKind, RecordField, SrcSpan, Ty,
};
use dv_files::{FileId, Sources};
use dv_name::Name;

fn sp(text: &str, needle: &str) -> SrcSpan {
    let start = text
        .find(needle)
        .unwrap_or_else(|| panic!("`{needle}` not found in source")) as u32;
    SrcSpan { start, end: start + needle.len() as u32 }
}

/// Span of `needle` located within the first occurrence of `context`.
fn sp_in(text: &str, context: &str, needle: &str) -> SrcSpan {
    let ctx = text
        .find(context)
        .unwrap_or_else(|| panic!("`{context}` not found in source"));
    let off = context
        .find(needle)
        .unwrap_or_else(|| panic!("`{needle}` not found in `{context}`"));
    let start = (ctx + off) as u32;
    SrcSpan { start, end: start + needle.len() as u32 }
}

fn register(sources: &mut Sources, name: &str, text: &str) -> FileId {
    sources
        .add_file(name.to_owned(), text.as_bytes(), PathBuf::from(format!("{name}.ml")))
        .unwrap()
}

fn int_ty() -> Ty {
    Ty::Named(Name::new("int"))
}

fn analyze(units: Vec<(CompUnit, FileId)>, sources: &Sources) -> Vec<Warning> {
    run(&units, sources, &AnalysisConfig::default()).unwrap()
}

fn assert_warning(w: &Warning, kind: WarnKind, span: SrcSpan, message: &str) {
    assert_eq!(w.kind, kind, "wrong kind for {w:?}");
    assert_eq!((w.span.start, w.span.end), (span.start, span.end), "wrong span for {w:?}");
    assert_eq!(w.message, message);
}

/// `let result = let x = 1 in let y = 2 in x`: `y` and its bound
/// expression are dead, `x` is live.
fn unused_inner_binding_unit(sources: &mut Sources) -> (CompUnit, FileId, SrcSpan, SrcSpan) {
    let text = "let result = let x = 1 in let y = 2 in x\n";
    let file = register(sources, "Scenario1", text);

    let mut b = UnitBuilder::new("Scenario1", "Scenario1.ml");
    let one = b.int(1, sp(text, "1"));
    let (x_pat, x_stamp) = b.var_pat("x", sp_in(text, "let x", "x"));
    let two = b.int(2, sp(text, "2"));
    let (y_pat, _) = b.var_pat("y", sp_in(text, "let y", "y"));
    let x_use = b.var(x_stamp, int_ty(), sp_in(text, "in x", "x"));
    let bind_y = b.bind(y_pat, two);
    let inner = b.let_in(int_ty(), vec![bind_y], x_use, sp(text, "let y = 2 in x"));
    let bind_x = b.bind(x_pat, one);
    let outer = b.let_in(int_ty(), vec![bind_x], inner, sp(text, "let x = 1 in let y = 2 in x"));
    let (result_pat, _) = b.var_pat("result", sp_in(text, "let result", "result"));
    let bind_result = b.bind(result_pat, outer);
    let decl = b.let_decl(false, vec![bind_result], sp(text, text.trim_end()));
    let unit = b.finish(vec![decl], SrcSpan { start: 0, end: text.len() as u32 }, None);

    let y_span = sp_in(text, "let y", "y");
    let two_span = sp(text, "2");
    (unit, file, y_span, two_span)
}

#[test]
fn unused_inner_binding_is_dead() {
    let mut sources = Sources::new();
    let (unit, file, y_span, two_span) = unused_inner_binding_unit(&mut sources);
    let warnings = analyze(vec![(unit, file)], &sources);

    assert_eq!(warnings.len(), 2, "unexpected warnings: {warnings:#?}");
    assert_warning(&warnings[0], WarnKind::DeadBinding, y_span, "`y` is never used");
    assert_warning(
        &warnings[1],
        WarnKind::DeadExpression,
        two_span,
        "this expression's value is never used",
    );
}

#[test]
fn primitive_application_keeps_operands_live() {
    let text = "external add : int -> int -> int = \"%addint\"\nlet f = fun x -> add x 1\nlet r = f 3\n";
    let mut sources = Sources::new();
    let file = register(&mut sources, "Scenario2", text);

    let mut b = UnitBuilder::new("Scenario2", "Scenario2.ml");
    let (add_decl, add_stamp) =
        b.external_decl("add", "%addint", 2, sp(text, "external add : int -> int -> int = \"%addint\""));
    let (x_pat, x_stamp) = b.var_pat("x", sp_in(text, "fun x", "x"));
    let add_use = b.var(add_stamp, Ty::Arrow, sp_in(text, "add x 1", "add"));
    let x_use = b.var(x_stamp, int_ty(), sp_in(text, "add x 1", "x"));
    let one = b.int(1, sp_in(text, "add x 1", "1"));
    let body = b.apply(int_ty(), add_use, vec![x_use, one], sp(text, "add x 1"));
    let f = b.func1(x_pat, body, sp(text, "fun x -> add x 1"));
    let (f_pat, f_stamp) = b.var_pat("f", sp_in(text, "let f", "f"));
    let bind_f = b.bind(f_pat, f);
    let f_decl = b.let_decl(false, vec![bind_f], sp(text, "let f = fun x -> add x 1"));

    let f_use = b.var(f_stamp, Ty::Arrow, sp_in(text, "= f 3", "f"));
    let three = b.int(3, sp(text, "3"));
    let call = b.apply(int_ty(), f_use, vec![three], sp(text, "f 3"));
    let (r_pat, _) = b.var_pat("r", sp_in(text, "let r", "r"));
    let bind_r = b.bind(r_pat, call);
    let r_decl = b.let_decl(false, vec![bind_r], sp(text, "let r = f 3"));

    let unit = b.finish(
        vec![add_decl, f_decl, r_decl],
        SrcSpan { start: 0, end: text.len() as u32 },
        None,
    );
    let warnings = analyze(vec![(unit, file)], &sources);
    assert!(warnings.is_empty(), "unexpected warnings: {warnings:#?}");
}

/// `let pair = (1, 2)` with only the first component projected: the
/// second tuple slot is dead, `pair` itself is not.
#[test]
fn unprojected_tuple_slot_is_dead() {
    let text = "let pair = (1, 2)\nlet use_fst = fst pair\n";
    let mut sources = Sources::new();
    let file = register(&mut sources, "Scenario3", text);

    let mut b = UnitBuilder::new("Scenario3", "Scenario3.ml");
    let one = b.int(1, sp(text, "1"));
    let two = b.int(2, sp(text, "2"));
    let tuple = b.tuple(vec![one, two], sp(text, "(1, 2)"));
    let (pair_pat, pair_stamp) = b.var_pat("pair", sp_in(text, "let pair", "pair"));
    let bind_pair = b.bind(pair_pat, tuple);
    let pair_decl = b.let_decl(false, vec![bind_pair], sp(text, "let pair = (1, 2)"));

    let pair_use = b.var(pair_stamp, Ty::Tuple, sp_in(text, "fst pair", "pair"));
    let fst = b.tuple_field(int_ty(), pair_use, 0, sp(text, "fst pair"));
    let (use_pat, _) = b.var_pat("use_fst", sp_in(text, "let use_fst", "use_fst"));
    let bind_use = b.bind(use_pat, fst);
    let use_decl = b.let_decl(false, vec![bind_use], sp(text, "let use_fst = fst pair"));

    let unit = b.finish(
        vec![pair_decl, use_decl],
        SrcSpan { start: 0, end: text.len() as u32 },
        Some(vec![Name::new("use_fst")]),
    );
    let warnings = analyze(vec![(unit, file)], &sources);

    assert_eq!(warnings.len(), 1, "unexpected warnings: {warnings:#?}");
    assert_warning(
        &warnings[0],
        WarnKind::DeadExpression,
        sp(text, "2"),
        "this expression's value is never used",
    );
}

/// An unused record field whose initializer has a side effect is not
/// reported.
#[test]
fn effectful_initializer_is_not_dead() {
    let text = "external compute : unit -> int = \"caml_compute\"\nlet r = { a = 1; b = compute () }\nlet access = r.a\n";
    let mut sources = Sources::new();
    let file = register(&mut sources, "Scenario4", text);

    let mut b = UnitBuilder::new("Scenario4", "Scenario4.ml");
    let (compute_decl, compute_stamp) = b.external_decl(
        "compute",
        "caml_compute",
        1,
        sp(text, "external compute : unit -> int = \"caml_compute\""),
    );
    let one = b.int(1, sp_in(text, "a = 1", "1"));
    let compute_use = b.var(compute_stamp, Ty::Arrow, sp_in(text, "compute ()", "compute"));
    let unit_arg = b.unit_const(sp_in(text, "compute ()", "()"));
    let call = b.apply(int_ty(), compute_use, vec![unit_arg], sp(text, "compute ()"));
    let record = b.record(
        Ty::Named(Name::new("t")),
        vec![
            RecordField { name: Name::new("a"), mutable: false, expr: one },
            RecordField { name: Name::new("b"), mutable: false, expr: call },
        ],
        sp(text, "{ a = 1; b = compute () }"),
    );
    let (r_pat, r_stamp) = b.var_pat("r", sp_in(text, "let r", "r"));
    let bind_r = b.bind(r_pat, record);
    let r_decl = b.let_decl(false, vec![bind_r], sp(text, "let r = { a = 1; b = compute () }"));

    let r_use = b.var(r_stamp, Ty::Named(Name::new("t")), sp_in(text, "r.a", "r"));
    let access = b.record_field(int_ty(), r_use, "a", 0, false, sp(text, "r.a"));
    let (access_pat, _) = b.var_pat("access", sp_in(text, "let access", "access"));
    let bind_access = b.bind(access_pat, access);
    let access_decl = b.let_decl(false, vec![bind_access], sp(text, "let access = r.a"));

    let unit = b.finish(
        vec![compute_decl, r_decl, access_decl],
        SrcSpan { start: 0, end: text.len() as u32 },
        Some(vec![Name::new("access")]),
    );
    let warnings = analyze(vec![(unit, file)], &sources);
    assert!(warnings.is_empty(), "unexpected warnings: {warnings:#?}");
}

/// `let rec loop = fun () -> loop ()`, exported to nobody: the
/// recursive cycle saturates conservatively and nothing is reported.
#[test]
fn recursive_cycle_is_not_dead() {
    let text = "let rec loop = fun () -> loop ()\n";
    let mut sources = Sources::new();
    let file = register(&mut sources, "Scenario5", text);

    let mut b = UnitBuilder::new("Scenario5", "Scenario5.ml");
    let (loop_pat, loop_stamp) = b.var_pat("loop", sp_in(text, "let rec loop", "loop"));
    let param = b.unit_pat(sp_in(text, "fun ()", "()"));
    let loop_use = b.var(loop_stamp, Ty::Arrow, sp_in(text, "loop ()", "loop"));
    let unit_arg = b.unit_const(sp_in(text, "loop ()", "()"));
    let call = b.apply(Ty::Var, loop_use, vec![unit_arg], sp(text, "loop ()"));
    let fun = b.func1(param, call, sp(text, "fun () -> loop ()"));
    let bind_loop = b.bind(loop_pat, fun);
    let decl = b.let_decl(true, vec![bind_loop], sp(text, text.trim_end()));

    let unit = b.finish(
        vec![decl],
        SrcSpan { start: 0, end: text.len() as u32 },
        Some(vec![]),
    );
    let warnings = analyze(vec![(unit, file)], &sources);
    assert!(warnings.is_empty(), "unexpected warnings: {warnings:#?}");
}

/// A match whose arm demands its binding: everything is live via
/// `controlled_by_pat` and the arm edges.
#[test]
fn match_keeps_scrutinee_and_arms_live() {
    let text = "external add : int -> int -> int = \"%addint\"\nlet x = Some 3\nlet r = match x with Some v -> add v 1 | None -> 0\n";
    let mut sources = Sources::new();
    let file = register(&mut sources, "Scenario6", text);

    let mut b = UnitBuilder::new("Scenario6", "Scenario6.ml");
    let (add_decl, add_stamp) =
        b.external_decl("add", "%addint", 2, sp(text, "external add : int -> int -> int = \"%addint\""));

    let three = b.int(3, sp(text, "3"));
    let some = b.construct(Ty::Named(Name::new("option")), "Some", vec![three], sp(text, "Some 3"));
    let (x_pat, x_stamp) = b.var_pat("x", sp_in(text, "let x", "x"));
    let bind_x = b.bind(x_pat, some);
    let x_decl = b.let_decl(false, vec![bind_x], sp(text, "let x = Some 3"));

    let x_use = b.var(x_stamp, Ty::Named(Name::new("option")), sp_in(text, "match x", "x"));
    let (v_pat, v_stamp) = b.var_pat("v", sp_in(text, "Some v", "v"));
    let some_pat = b.pat(
        PatKind::Construct { ctor: Name::new("Some"), args: vec![v_pat] },
        sp(text, "Some v"),
    );
    let none_pat = b.pat(PatKind::Construct { ctor: Name::new("None"), args: vec![] }, sp(text, "None"));
    let add_use = b.var(add_stamp, Ty::Arrow, sp_in(text, "add v 1", "add"));
    let v_use = b.var(v_stamp, int_ty(), sp_in(text, "add v 1", "v"));
    let one = b.int(1, sp_in(text, "add v 1", "1"));
    let some_body = b.apply(int_ty(), add_use, vec![v_use, one], sp(text, "add v 1"));
    let zero = b.int(0, sp(text, "0"));
    let arms = vec![b.arm(some_pat, some_body), b.arm(none_pat, zero)];
    let m = b.expr(
        int_ty(),
        ExprKind::Match { scrutinee: x_use, arms },
        sp(text, "match x with Some v -> add v 1 | None -> 0"),
    );
    let (r_pat, _) = b.var_pat("r", sp_in(text, "let r", "r"));
    let bind_r = b.bind(r_pat, m);
    let r_decl = b.let_decl(false, vec![bind_r], sp(text, "let r = match x with Some v -> add v 1 | None -> 0"));

    let unit = b.finish(
        vec![add_decl, x_decl, r_decl],
        SrcSpan { start: 0, end: text.len() as u32 },
        None,
    );
    let warnings = analyze(vec![(unit, file)], &sources);
    assert!(warnings.is_empty(), "unexpected warnings: {warnings:#?}");
}

#[test]
fn warning_stream_is_deterministic() {
    let mut sources_a = Sources::new();
    let (unit_a, file_a, _, _) = unused_inner_binding_unit(&mut sources_a);
    let first = analyze(vec![(unit_a, file_a)], &sources_a);

    let mut sources_b = Sources::new();
    let (unit_b, file_b, _, _) = unused_inner_binding_unit(&mut sources_b);
    let second = analyze(vec![(unit_b, file_b)], &sources_b);

    assert_eq!(first, second);
}

#[test]
fn suppression_filters_by_path_prefix() {
    let mut sources = Sources::new();
    let (unit, file, _, _) = unused_inner_binding_unit(&mut sources);
    let config = AnalysisConfig {
        suppress: vec![PathBuf::from("Scenario1.ml")],
        ..AnalysisConfig::default()
    };
    let warnings = run(&[(unit, file)], &sources, &config).unwrap();
    assert!(warnings.is_empty(), "suppressed warnings leaked: {warnings:#?}");
}

#[test]
fn warnings_render_with_underlines() {
    let mut sources = Sources::new();
    let (unit, file, _, _) = unused_inner_binding_unit(&mut sources);
    let warnings = analyze(vec![(unit, file)], &sources);

    let mut out = vec![];
    for w in &warnings {
        sources.emit(&to_report(w), &mut out).unwrap();
    }
    let rendered = String::from_utf8(out).unwrap();
    assert!(rendered.contains("warning[Dead Value]: `y` is never used"));
    assert!(rendered.contains("Scenario1.ml:1:"));
    assert!(rendered.contains('^'));
}

/// A malformed unit (an expression appearing twice in the tree) is
/// skipped; other units still analyze.
#[test]
fn malformed_units_are_skipped() {
    let mut sources = Sources::new();

    let text = "let shared = (1, 1)\n";
    let bad_file = register(&mut sources, "BadUnit", text);
    let mut b = UnitBuilder::new("BadUnit", "BadUnit.ml");
    let one = b.int(1, sp(text, "1"));
    // the same expression id used twice makes labels non-injective
    let tuple = b.tuple(vec![one, one], sp(text, "(1, 1)"));
    let (pat, _) = b.var_pat("shared", sp_in(text, "let shared", "shared"));
    let binding = b.bind(pat, tuple);
    let decl = b.let_decl(false, vec![binding], sp(text, text.trim_end()));
    let bad = b.finish(vec![decl], SrcSpan { start: 0, end: text.len() as u32 }, None);

    let (good, good_file, y_span, _) = unused_inner_binding_unit(&mut sources);
    let warnings = analyze(vec![(bad, bad_file), (good, good_file)], &sources);

    assert_eq!(warnings.len(), 2);
    assert_warning(&warnings[0], WarnKind::DeadBinding, y_span, "`y` is never used");
}

fn counter_unit(
    sources: &mut Sources,
    name: &str,
    text: &str,
    with_reader: bool,
) -> (CompUnit, FileId) {
    let file = register(sources, name, text);
    let mut b = UnitBuilder::new(name, format!("{name}.ml"));
    let record_ty = Ty::Named(Name::new("t"));

    let zero = b.int(0, sp(text, "0"));
    let record = b.record(
        record_ty.clone(),
        vec![RecordField { name: Name::new("count"), mutable: true, expr: zero }],
        sp(text, "{ count = 0 }"),
    );
    let (r_pat, r_stamp) = b.var_pat("r", sp_in(text, "let r", "r"));
    let bind_r = b.bind(r_pat, record);
    let r_decl = b.let_decl(false, vec![bind_r], sp(text, "let r = { count = 0 }"));

    let store_base = b.var(r_stamp, record_ty.clone(), sp_in(text, "r.count <- 1", "r"));
    let one = b.int(1, sp_in(text, "r.count <- 1", "1"));
    let store = b.expr(
        Ty::Unit,
        ExprKind::SetField { base: store_base, field: Name::new("count"), value: one },
        sp(text, "r.count <- 1"),
    );
    let store_decl = b.eval_decl(store, sp(text, "r.count <- 1"));

    let mut decls = vec![r_decl, store_decl];
    let signature = if with_reader {
        let read_base = b.var(r_stamp, record_ty, sp_in(text, "read = r.count", "r"));
        let read = b.record_field(
            int_ty(),
            read_base,
            "count",
            0,
            true,
            sp_in(text, "read = r.count", "r.count"),
        );
        let (read_pat, _) = b.var_pat("read", sp_in(text, "let read", "read"));
        let bind_read = b.bind(read_pat, read);
        decls.push(b.let_decl(false, vec![bind_read], sp(text, "let read = r.count")));
        Some(vec![Name::new("read")])
    } else {
        Some(vec![])
    };

    let unit = b.finish(decls, SrcSpan { start: 0, end: text.len() as u32 }, signature);
    (unit, file)
}

/// A mutable cell that is read keeps both its initializer and every
/// stored value live.
#[test]
fn read_mutable_cell_keeps_stores_live() {
    let text = "let r = { count = 0 }\nlet () = r.count <- 1\nlet read = r.count\n";
    let mut sources = Sources::new();
    let (unit, file) = counter_unit(&mut sources, "CounterRead", text, true);
    let warnings = analyze(vec![(unit, file)], &sources);
    assert!(warnings.is_empty(), "unexpected warnings: {warnings:#?}");
}

/// A cell nobody reads: the initializer and the stored value are dead,
/// while the store expression itself is protected by its effect bit.
#[test]
fn unread_mutable_cell_values_are_dead() {
    let text = "let r = { count = 0 }\nlet () = r.count <- 1\n";
    let mut sources = Sources::new();
    let (unit, file) = counter_unit(&mut sources, "CounterWrite", text, false);
    let warnings = analyze(vec![(unit, file)], &sources);

    assert_eq!(warnings.len(), 2, "unexpected warnings: {warnings:#?}");
    assert_warning(
        &warnings[0],
        WarnKind::DeadExpression,
        sp(text, "0"),
        "this expression's value is never used",
    );
    assert_warning(
        &warnings[1],
        WarnKind::DeadExpression,
        sp_in(text, "r.count <- 1", "1"),
        "this expression's value is never used",
    );
}

/// Everything inside a never-used private function is dead along with
/// the binding itself.
#[test]
fn unused_private_function_cascades() {
    let text = "let helper = fun x -> x\nlet keep = 1\n";
    let mut sources = Sources::new();
    let file = register(&mut sources, "Unused", text);

    let mut b = UnitBuilder::new("Unused", "Unused.ml");
    let (x_pat, x_stamp) = b.var_pat("x", sp_in(text, "fun x", "x"));
    let x_use = b.var(x_stamp, Ty::Var, sp_in(text, "-> x", "x"));
    let fun = b.func1(x_pat, x_use, sp(text, "fun x -> x"));
    let (helper_pat, _) = b.var_pat("helper", sp_in(text, "let helper", "helper"));
    let bind_helper = b.bind(helper_pat, fun);
    let helper_decl = b.let_decl(false, vec![bind_helper], sp(text, "let helper = fun x -> x"));

    let one = b.int(1, sp_in(text, "keep = 1", "1"));
    let (keep_pat, _) = b.var_pat("keep", sp_in(text, "let keep", "keep"));
    let bind_keep = b.bind(keep_pat, one);
    let keep_decl = b.let_decl(false, vec![bind_keep], sp(text, "let keep = 1"));

    let unit = b.finish(
        vec![helper_decl, keep_decl],
        SrcSpan { start: 0, end: text.len() as u32 },
        Some(vec![Name::new("keep")]),
    );
    let warnings = analyze(vec![(unit, file)], &sources);

    assert_eq!(warnings.len(), 4, "unexpected warnings: {warnings:#?}");
    assert_warning(&warnings[0], WarnKind::DeadBinding, sp_in(text, "let helper", "helper"), "`helper` is never used");
    assert_warning(
        &warnings[1],
        WarnKind::DeadExpression,
        sp(text, "fun x -> x"),
        "this expression's value is never used",
    );
    assert_warning(&warnings[2], WarnKind::DeadBinding, sp_in(text, "fun x", "x"), "`x` is never used");
    assert_warning(
        &warnings[3],
        WarnKind::DeadExpression,
        sp_in(text, "-> x", "x"),
        "this expression's value is never used",
    );
}

/// A function expression shared between two parents breaks the
/// label-per-function invariant and aborts the run.
#[test]
fn duplicate_function_labels_are_fatal() {
    let mut sources = Sources::new();
    let text = "let fns = (f, f)\n";
    let file = register(&mut sources, "DupFn", text);

    let mut b = UnitBuilder::new("DupFn", "DupFn.ml");
    let (param, _) = b.var_pat("x", sp(text, "f"));
    let body = b.int(1, sp(text, "f"));
    let fun = b.func1(param, body, sp(text, "f"));
    let tuple = b.tuple(vec![fun, fun], sp(text, "(f, f)"));
    let (pat, _) = b.var_pat("fns", sp_in(text, "let fns", "fns"));
    let binding = b.bind(pat, tuple);
    let decl = b.let_decl(false, vec![binding], sp(text, text.trim_end()));
    let unit = b.finish(vec![decl], SrcSpan { start: 0, end: text.len() as u32 }, None);

    let err = run(&[(unit, file)], &sources, &AnalysisConfig::default()).unwrap_err();
    assert!(matches!(err, AnalysisError::DuplicateFunction(_)), "unexpected error: {err}");
}
