use anyhow::Result;
use idiomize_core::parser::parse_crate;
use idiomize_core::refactor::Query;
use idiomize_core::{Pipeline, PipelineError, RefactorError, ToSource, Tree};
use pretty_assertions::assert_eq;

fn run(script: &str, src: &str) -> Result<idiomize_core::RunOutput> {
    Ok(Pipeline::from_source(script)?.run(parse_crate(src)?)?)
}

fn count(tree: &Tree, query: &str) -> usize {
    let mut marks = idiomize_core::MarkStore::new();
    match Query::parse(query) {
        Ok(query) => query.run(tree, &mut marks).len(),
        Err(err) => panic!("bad query {query}: {err}"),
    }
}

#[test]
fn test_scoped_rewrite_over_empty_selection_is_noop() -> Result<()> {
    let src = "static P: *mut u8 = 0 as *mut u8;\nfn f() {\n    g(P as u8);\n}\n";
    let output = run(
        "select nothing 'crate; child(struct)' ;\n\
         rewrite_ty '*mut __t' '*const __t' scope=nothing ;\n\
         rewrite_expr '__e as u8' '__e' scope=nothing",
        src,
    )?;
    assert_eq!(output.tree.to_source(), src);
    assert_eq!(output.summary.rewrites, 0);
    assert!(output.summary.success());
    Ok(())
}

#[test]
fn test_copy_marks_is_a_snapshot() -> Result<()> {
    let output = run(
        "stage copy {\n\
             select a 'crate; child(static)' ;\n\
             copy_marks a b\n\
         }\n\
         stage grow { select a 'crate; child(fn)' }",
        "static A: u8 = 0;\nstatic B: u8 = 1;\nfn f() {}\n",
    )?;
    let names = |label: &str| -> Vec<String> {
        output
            .marks
            .marked(&output.tree, label)
            .iter()
            .filter_map(|id| output.tree.item(id).map(|item| item.name.clone()))
            .collect()
    };
    assert_eq!(names("b"), vec!["A", "B"]);
    assert_eq!(names("a"), vec!["A", "B", "f"]);
    Ok(())
}

#[test]
fn test_rewrite_ty_and_inverse_restore_the_tree() -> Result<()> {
    let src = "static P: *mut u8 = 0 as *mut u8;\n\
               fn f(p: *mut i32) -> *mut i32 {\n    return p;\n}\n";
    let forward = run("rewrite_ty '*mut __t' '&mut __t'", src)?;
    assert!(forward.tree.to_source().contains("fn f(p: &mut i32) -> &mut i32"));
    assert_eq!(forward.summary.rewrites, 4);

    let back = Pipeline::from_source("rewrite_ty '&mut __t' '*mut __t'")?.run(forward.tree)?;
    assert_eq!(back.tree.to_source(), src);
    Ok(())
}

#[test]
fn test_func_to_macro_converts_only_captured_calls() -> Result<()> {
    let output = run(
        "stage capture {\n\
             select calls 'item(log)' ;\n\
             mark_callers calls\n\
         }\n\
         stage late { rewrite_expr 'marker()' 'log(9)' }\n\
         stage convert { func_to_macro log }",
        "fn log(a: i32, b: i32) {}\nfn main() {\n    log(1, 2);\n    marker();\n}\n",
    )?;
    assert_eq!(
        output.tree.to_source(),
        "fn main() {\n    log!(1, 2);\n    log(9);\n}\n"
    );
    assert!(output.tree.find_item("log").is_none());
    Ok(())
}

#[test]
fn test_static_collect_two_globals() -> Result<()> {
    let output = run(
        "select target 'crate; child(static && mut)' ;\n\
         static_collect_to_struct State S",
        "static mut a: i32 = 1;\nstatic mut b: i32 = 2;\n\
         fn f() {\n    a = b;\n    b = a + 1;\n}\n",
    )?;
    let tree = &output.tree;
    assert_eq!(count(tree, "crate; child(static)"), 1);
    assert_eq!(count(tree, "crate; child(name(\"a\") || name(\"b\"))"), 0);
    assert_eq!(
        tree.to_source(),
        "struct State {\n    a: i32,\n    b: i32,\n}\n\
         static mut S: State = State { a: 1, b: 2 };\n\
         fn f() {\n    S.a = S.b;\n    S.b = S.a + 1;\n}\n"
    );
    Ok(())
}

#[test]
fn test_raw_pointer_globals_end_to_end() -> Result<()> {
    let src = "static mut a: *mut i32 = 0 as *mut i32;\n\
               static mut b: *const u8 = 0 as *const u8;\n\
               static mut count: i32 = 0;\n\
               fn read() {\n    let x = a;\n    let y = b;\n}\n\
               fn main() {\n    read();\n}\n";
    let output = run(
        "stage mark_pointers {\n\
             select target 'crate; child(static && mut && any_child(match_ty(*mut __t) || match_ty(*const __t)))'\n\
         }\n\
         stage collect { static_collect_to_struct Globals G }\n\
         stage thread {\n\
             select target 'item(G)' ;\n\
             select user 'item(read)' ;\n\
             static_to_local_ref\n\
         }",
        src,
    )?;
    let tree = &output.tree;
    let out = tree.to_source();

    assert_eq!(
        count(tree, "crate; child(static && any_child(match_ty(*mut __t) || match_ty(*const __t)))"),
        0
    );
    assert_eq!(count(tree, "crate; child(static)"), 2);
    assert!(out.contains("struct Globals {\n    a: *mut i32,\n    b: *const u8,\n}"), "{out}");
    assert!(out.contains("static mut count: i32 = 0;"), "{out}");
    assert!(out.contains("fn read(G: &mut Globals) {\n    let x = G.a;\n    let y = G.b;\n}"), "{out}");
    assert!(out.contains("fn main() {\n    read(&mut G);\n}"), "{out}");
    assert_eq!(count(tree, "crate; desc(match_expr(a) || match_expr(b))"), 0);
    assert_eq!(output.summary.stages.len(), 3);
    Ok(())
}

#[test]
fn test_failing_stage_is_reported_by_index() -> Result<()> {
    let err = run(
        "stage one { clear_marks }\n\
         stage two { select target 'crate; child(fn)' }\n\
         stage three { rewrite_expr 'x' '__missing' }",
        "fn f() {\n    x;\n}\n",
    )
    .unwrap_err();
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::Stage {
            index: 2,
            stage,
            source: RefactorError::RewriteConflict { .. },
        }) => assert_eq!(stage, "three"),
        other => panic!("unexpected error: {other:?}"),
    }
    Ok(())
}

#[test]
fn test_malformed_script_never_runs() {
    let err = Pipeline::from_source("stage ok { clear_marks }\nstage broken { select target 'crate; wander' }")
        .unwrap_err();
    match err {
        PipelineError::Script(script) => {
            assert_eq!(script.stage, 1);
            assert!(matches!(script.source, RefactorError::Query { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
