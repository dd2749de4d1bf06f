//! S5 (type resolution): a two-edge chain `Triangle -> $T -> Compressed $T`
//! must resolve `$T` to `Triangle` and the compound edge to
//! `Compressed Triangle` on both sides, by fixpoint substitution alone —
//! no edge here names a concrete type for the second hop, so the first
//! edge's binding has to carry forward.

use plumber_core::error::codes;
use plumber_core::type_resolver::{Binding, TypeResolver};

#[test]
fn variable_bound_by_one_edge_resolves_a_compound_expression_on_the_next() {
    let mut resolver = TypeResolver::new();
    let edges = vec![
        Binding { output_expr: "Triangle", input_expr: "$T" },
        Binding { output_expr: "Compressed $T", input_expr: "Compressed $T" },
    ];

    let resolved = resolver.resolve_fixpoint(&edges).unwrap();

    assert_eq!(resolved[0], ("Triangle".to_string(), "Triangle".to_string()));
    assert_eq!(
        resolved[1],
        ("Compressed Triangle".to_string(), "Compressed Triangle".to_string())
    );
}

#[test]
fn order_of_edges_does_not_matter_for_the_same_fixpoint() {
    let mut resolver = TypeResolver::new();
    let edges = vec![
        Binding { output_expr: "Compressed $T", input_expr: "Compressed $T" },
        Binding { output_expr: "Triangle", input_expr: "$T" },
    ];

    let resolved = resolver.resolve_fixpoint(&edges).unwrap();

    assert_eq!(
        resolved[0],
        ("Compressed Triangle".to_string(), "Compressed Triangle".to_string())
    );
    assert_eq!(resolved[1], ("Triangle".to_string(), "Triangle".to_string()));
}

#[test]
fn a_variable_no_edge_ever_binds_is_reported_rather_than_silently_dropped() {
    let mut resolver = TypeResolver::new();
    let edges = vec![
        Binding { output_expr: "Triangle", input_expr: "$T" },
        Binding { output_expr: "Compressed $U", input_expr: "Compressed $U" },
    ];

    let err = resolver.resolve_fixpoint(&edges).unwrap_err();
    assert_eq!(err.code(), codes::TYPE_UNRESOLVED_VARIABLE);
}
