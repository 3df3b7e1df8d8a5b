// Parser round-trip tests

use pretty_assertions::assert_eq;

use super::*;
use crate::ast::{Expr, ItemKind, Lit, ToSource};

fn roundtrip(src: &str) {
    let tree = parse_crate(src).unwrap();
    assert_eq!(tree.to_source(), src);
}

#[test]
fn test_statics_and_fn() {
    roundtrip("static mut X: i32 = 0;\nfn main() {\n    X = 1;\n}\n");
}

#[test]
fn test_attributes_and_visibility() {
    roundtrip(
        "#![allow(non_upper_case_globals)]\n\n\
         #[no_mangle]\n\
         pub static mut COUNT: u32 = 0;\n\
         pub(crate) const LIMIT: usize = 10;\n",
    );
}

#[test]
fn test_foreign_block() {
    roundtrip(
        "extern \"C\" {\n    fn printf(fmt: *const i8, ...) -> i32;\n    static mut stdout: *mut u8;\n}\n",
    );
}

#[test]
fn test_control_flow() {
    roundtrip(
        "fn f(x: i32) -> i32 {\n    if x > 0 {\n        return 1;\n    } else if x < 0 {\n        return -1;\n    } else {\n        return 0;\n    }\n}\n",
    );
    roundtrip("fn g() {\n    let mut i = 0;\n    while i < 10 {\n        i += 1;\n    }\n    loop {\n        break;\n    }\n}\n");
}

#[test]
fn test_expressions() {
    roundtrip(
        "unsafe fn h(p: *mut S) -> u8 {\n    let a: [i32; 3] = [0; 3];\n    let b = (1 + 2) * 3 << 1 >> 2;\n    (*p).x.wrapping_add(-b as u8)\n}\n",
    );
    roundtrip("fn k() {\n    println!(\"{}\", b\"hi\\0\");\n    let t = (1,);\n    let s = S { a: 1, b: &mut y };\n}\n");
}

#[test]
fn test_struct_update_syntax() {
    roundtrip("fn k(s: S) -> S {\n    let t = S { a: 1, ..s };\n    S { ..t }\n}\n");
}

#[test]
fn test_nested_generics() {
    roundtrip("static V: Option<Vec<Vec<u8>>> = None;\n");
}

#[test]
fn test_references_and_lifetimes() {
    roundtrip("fn f(s: &'static str, t: &mut [u8]) -> &'static str {\n    s\n}\n");
}

#[test]
fn test_modules_and_opaque_items() {
    roundtrip(
        "use std::ffi::{CStr, CString};\nextern crate libc;\nmod m {\n    pub fn f() {}\n}\nmacro_rules! id {\n    ($e:expr) => { $e };\n}\ntype Int = i32;\n",
    );
}

#[test]
fn test_struct_literal_not_in_condition() {
    let tree = parse_crate("fn f() {\n    if x == y {\n        z;\n    }\n}\n").unwrap();
    let if_expr = tree
        .preorder(tree.root())
        .into_iter()
        .find(|id| matches!(tree.expr(*id), Some(Expr::If { .. })))
        .unwrap();
    let cond = tree.children(if_expr)[0];
    assert_eq!(tree.source_of(cond), "x == y");
}

#[test]
fn test_fragments() {
    let expr = parse_expr_fragment("marked!(__e, target) as u8").unwrap();
    assert_eq!(expr.source_of(expr.root()), "marked!(__e, target) as u8");

    let ty = parse_ty_fragment("*const marked!(__t)").unwrap();
    assert_eq!(ty.source_of(ty.root()), "*const marked!(__t)");
}

#[test]
fn test_literal_values() {
    let tree = parse_expr_fragment("b\"abc\\0\"").unwrap();
    assert_eq!(
        tree.expr(tree.root()),
        Some(&Expr::Lit(Lit::ByteStr(b"abc\0".to_vec())))
    );
}

#[test]
fn test_items_into_existing_tree() {
    let mut tree = parse_crate("fn a() {}\n").unwrap();
    let items = parse_items_into(&mut tree, "static B: i32 = 1;").unwrap();
    assert_eq!(items.len(), 1);
    assert!(matches!(
        tree.item(items[0]).map(|i| &i.kind),
        Some(ItemKind::Static { .. })
    ));
    assert!(!tree.is_attached(items[0]));
}

#[test]
fn test_errors_report_offset() {
    let err = parse_crate("fn f( {").unwrap_err();
    assert_eq!(err.offset, 6);
    assert!(err.message.contains("identifier"));

    let err = parse_expr_fragment("match x {}").unwrap_err();
    assert_eq!(err.offset, 0);
}

#[test]
fn test_create_parser() {
    let parser = create_parser("rust").unwrap();
    assert_eq!(parser.name(), "rust");
    let tree = parser.parse_crate("fn f() {}").unwrap();
    assert_eq!(tree.to_source(), "fn f() {}\n");
    assert!(create_parser("cobol").is_err());
}
