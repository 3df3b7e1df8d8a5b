use anyhow::Result;
use idiomize_core::parser::parse_crate;
use idiomize_core::refactor::Query;
use idiomize_core::{MarkStore, Pipeline, RunOutput, ToSource, Tree};

const RULES: &str = include_str!("../../../demos/robotfindskitten.rules");

/// A cut-down translation of robotfindskitten: the curses and stdio entry
/// points, the two string tables and some mutable game state.
const FIXTURE: &str = "extern \"C\" {
    fn printw(fmt: *const libc::c_char, ...) -> libc::c_int;
    fn mvprintw(y: libc::c_int, x: libc::c_int, fmt: *const libc::c_char, ...) -> libc::c_int;
    fn printf(fmt: *const libc::c_char, ...) -> libc::c_int;
}
struct screen_object {
    x: libc::c_int,
    y: libc::c_int,
}
static ver: *mut libc::c_char = b\"1.7\\0\" as *const u8 as *const libc::c_char as *mut libc::c_char;
static messages: [*mut libc::c_char; 2] = [
    b\"a rock\\0\" as *const u8 as *const libc::c_char as *mut libc::c_char,
    b\"a tree\\0\" as *const u8 as *const libc::c_char as *mut libc::c_char,
];
static mut robot: screen_object = screen_object { x: 0, y: 0 };
static mut num_bogus: libc::c_int = 0;
unsafe fn show_message(i: usize) {
    printw(b\"%s\\0\" as *const u8 as *const libc::c_char, messages[i]);
}
unsafe fn move_robot(dx: libc::c_int) {
    robot.x = robot.x.wrapping_add(dx);
    robot.y = 1;
    mvprintw(robot.y, robot.x, b\"#%d\\0\" as *const u8 as *const libc::c_char, num_bogus);
}
fn main() {
    unsafe {
        printf(b\"robotfindskitten v%s\\n\\0\" as *const u8 as *const libc::c_char, ver);
        move_robot(1);
        show_message(0);
    }
}
";

fn run_demo() -> Result<RunOutput> {
    Ok(Pipeline::from_source(RULES)?.run(parse_crate(FIXTURE)?)?)
}

fn count(tree: &Tree, query: &str) -> usize {
    let mut marks = MarkStore::new();
    match Query::parse(query) {
        Ok(query) => query.run(tree, &mut marks).len(),
        Err(err) => panic!("bad query {query}: {err}"),
    }
}

#[test]
fn test_demo_runs_every_stage() -> Result<()> {
    let output = run_demo()?;
    assert!(output.summary.success());
    let names: Vec<&str> = output
        .summary
        .stages
        .iter()
        .map(|s| s.stage_name.as_str())
        .collect();
    assert_eq!(
        names,
        vec![
            "arith",
            "messages",
            "collect",
            "private",
            "thread_state",
            "ncurses_mod",
            "printw",
            "mvprintw",
            "printf",
            "retype_ver",
            "retype_messages",
        ]
    );
    Ok(())
}

#[test]
fn test_demo_converts_output_calls_to_macros() -> Result<()> {
    let output = run_demo()?;
    let out = output.tree.to_source();

    assert!(out.contains("printw!(\"{}\", "), "{out}");
    assert!(out.contains("mvprintw!(S.robot.y, S.robot.x, \"#{}\", S.num_bogus);"), "{out}");
    assert!(out.contains("print!(\"robotfindskitten v{}\\n\", "), "{out}");
    assert!(!out.contains("printw("), "{out}");
    assert!(!out.contains("printf("), "{out}");

    // the foreign declarations went with their calls
    assert_eq!(count(&output.tree, "crate; desc(foreign_fn)"), 0);
    assert!(out.contains("extern \"C\" {}\nmod ncurses {}\n"), "{out}");
    Ok(())
}

#[test]
fn test_demo_collects_and_threads_state() -> Result<()> {
    let output = run_demo()?;
    let out = output.tree.to_source();

    assert!(
        out.contains("struct State {\n    robot: screen_object,\n    num_bogus: libc::c_int,\n}"),
        "{out}"
    );
    assert!(
        out.contains("static mut S: State = State { robot: screen_object { x: 0, y: 0 }, num_bogus: 0 };"),
        "{out}"
    );
    assert_eq!(count(&output.tree, "crate; child(static && mut)"), 1);
    assert!(out.contains("fn move_robot(S: &mut State, dx: libc::c_int)"), "{out}");
    assert!(out.contains("move_robot(&mut S, 1);"), "{out}");
    assert!(out.contains("fn show_message(i: usize)"), "{out}");

    // wrapping arithmetic and the two field stores became one update
    assert!(
        out.contains("S.robot = screen_object { x: S.robot.x + dx, y: 1, ..S.robot };"),
        "{out}"
    );
    Ok(())
}

#[test]
fn test_demo_retypes_string_tables() -> Result<()> {
    let output = run_demo()?;
    let out = output.tree.to_source();

    assert!(out.contains("static ver: &'static str = \"1.7\\0\";"), "{out}");
    assert!(
        out.contains("static messages: [&'static str; 2] = [\"a rock\\0\", \"a tree\\0\"];"),
        "{out}"
    );
    // table reads keep the pointer type their consumers expect
    assert!(out.contains("messages[i] as *mut libc::c_char"), "{out}");
    assert!(!out.contains("b\""), "{out}");
    Ok(())
}
