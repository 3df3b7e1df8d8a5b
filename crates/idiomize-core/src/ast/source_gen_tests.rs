// Tests for source generation over hand-built trees

use pretty_assertions::assert_eq;

use super::*;

fn path(tree: &mut Tree, name: &str) -> NodeId {
    tree.alloc_expr(Expr::Path(Path::single(name)))
}

fn binary(tree: &mut Tree, op: BinOp, lhs: NodeId, rhs: NodeId) -> NodeId {
    tree.alloc_expr(Expr::Binary { op, lhs, rhs })
}

fn prim(tree: &mut Tree, name: &str) -> NodeId {
    tree.alloc_ty(Ty::Path {
        path: Path::single(name),
        args: Vec::new(),
    })
}

#[test]
fn test_inserts_parentheses_for_precedence() {
    let mut tree = Tree::empty();
    let a = path(&mut tree, "a");
    let b = path(&mut tree, "b");
    let c = path(&mut tree, "c");
    let sum = binary(&mut tree, BinOp::Add, a, b);
    let product = binary(&mut tree, BinOp::Mul, sum, c);
    assert_eq!(tree.source_of(product), "(a + b) * c");
}

#[test]
fn test_right_operand_of_same_precedence() {
    let mut tree = Tree::empty();
    let a = path(&mut tree, "a");
    let b = path(&mut tree, "b");
    let c = path(&mut tree, "c");
    let inner = binary(&mut tree, BinOp::Sub, b, c);
    let outer = binary(&mut tree, BinOp::Sub, a, inner);
    assert_eq!(tree.source_of(outer), "a - (b - c)");
}

#[test]
fn test_cast_and_postfix() {
    let mut tree = Tree::empty();
    let x = path(&mut tree, "x");
    let u8_ty = prim(&mut tree, "u8");
    let cast = tree.alloc_expr(Expr::Cast { expr: x, ty: u8_ty });
    let call = tree.alloc_expr(Expr::MethodCall {
        receiver: cast,
        method: "wrapping_add".to_string(),
        args: Vec::new(),
    });
    assert_eq!(tree.source_of(call), "(x as u8).wrapping_add()");
}

#[test]
fn test_cast_before_less_than() {
    let mut tree = Tree::empty();
    let x = path(&mut tree, "x");
    let y = path(&mut tree, "y");
    let u32_ty = prim(&mut tree, "u32");
    let cast = tree.alloc_expr(Expr::Cast { expr: x, ty: u32_ty });
    let lt = binary(&mut tree, BinOp::Lt, cast, y);
    assert_eq!(tree.source_of(lt), "(x as u32) < y");
}

#[test]
fn test_reference_shape_erases_lifetimes() {
    let mut tree = Tree::empty();
    let str_ty = prim(&mut tree, "str");
    let reference = tree.alloc_ty(Ty::Ref {
        lifetime: Some("static".to_string()),
        mutability: Mutability::Not,
        pointee: str_ty,
    });
    assert_eq!(tree.source_of(reference), "&'static str");
    assert_eq!(tree.ty_shape(reference), "&str");
}

#[test]
fn test_literals_escape() {
    let mut tree = Tree::empty();
    let bytes = tree.alloc_expr(Expr::Lit(Lit::ByteStr(b"a\"b\0\xff".to_vec())));
    let text = tree.alloc_expr(Expr::Lit(Lit::Str("tab\there\0".to_string())));
    let quote = tree.alloc_expr(Expr::Lit(Lit::Char('\'')));
    assert_eq!(tree.source_of(bytes), r#"b"a\"b\0\xff""#);
    assert_eq!(tree.source_of(text), r#""tab\there\0""#);
    assert_eq!(tree.source_of(quote), r"'\''");
}

#[test]
fn test_struct_item_and_static() {
    let mut tree = Tree::new();
    let root = tree.root();
    let a_ty = prim(&mut tree, "i32");
    let s = tree.alloc(NodeKind::Item(Item {
        attrs: vec!["#[derive(Copy, Clone)]".to_string()],
        vis: Visibility::Inherited,
        name: "S".to_string(),
        kind: ItemKind::Struct {
            fields: vec![FieldDef {
                vis: Visibility::Public,
                name: "a".to_string(),
                ty: a_ty,
            }],
        },
    }));
    let zero = tree.alloc_expr(Expr::Lit(Lit::Int { value: 0, suffix: None }));
    let init = tree.alloc_expr(Expr::Struct {
        path: Path::single("S"),
        fields: vec![("a".to_string(), zero)],
        base: None,
    });
    let s_ty = prim(&mut tree, "S");
    let global = tree.alloc(NodeKind::Item(Item {
        attrs: Vec::new(),
        vis: Visibility::Inherited,
        name: "G".to_string(),
        kind: ItemKind::Static {
            mutability: Mutability::Mut,
            ty: s_ty,
            init: Some(init),
        },
    }));
    tree.insert_child(root, 0, s).unwrap();
    tree.insert_child(root, 1, global).unwrap();

    assert_eq!(
        tree.to_source(),
        "#[derive(Copy, Clone)]\n\
         struct S {\n    pub a: i32,\n}\n\
         static mut G: S = S { a: 0 };\n"
    );
}
