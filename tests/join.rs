use std::collections::BTreeSet;
use std::sync::Arc;

use test_log::test;

use smg_rs::context::AnalysisContext;
use smg_rs::expr::Expr;
use smg_rs::frame::FunctionDecl;
use smg_rs::join::status::JoinStatus;
use smg_rs::machine::CType;
use smg_rs::options::SmgOptions;
use smg_rs::state::SmgState;
use smg_rs::transfer::CfaEdge;

fn var(name: &str) -> Expr {
    Expr::var(name, CType::Pointer)
}

fn context() -> Arc<AnalysisContext> {
    AnalysisContext::with_options(SmgOptions {
        check_consistency: true,
        ..SmgOptions::default()
    })
}

/// `head` points to a list of `n` zeroed 16-byte nodes.
fn list_state(ctx: &Arc<AnalysisContext>, n: usize) -> SmgState {
    let mut states = vec![SmgState::initial(ctx.clone())
        .add_stack_frame(FunctionDecl::void("main"))
        .unwrap()];
    let mut edges = Vec::new();
    for name in ["head", "tmp"] {
        edges.push(CfaEdge::Declaration {
            name: name.into(),
            ty: CType::Pointer,
            global: false,
            initializer: Some(Expr::null()),
        });
    }
    for _ in 0..n {
        edges.extend([
            CfaEdge::Call {
                result: Some(var("tmp")),
                function: "calloc".into(),
                arguments: vec![Expr::int(1, CType::Long), Expr::int(16, CType::Long)],
            },
            CfaEdge::Assignment {
                lhs: var("tmp").arrow(64, CType::Pointer),
                rhs: var("head"),
            },
            CfaEdge::Assignment {
                lhs: var("head"),
                rhs: var("tmp"),
            },
        ]);
    }
    edges.push(CfaEdge::Assignment {
        lhs: var("tmp"),
        rhs: Expr::null(),
    });
    for edge in &edges {
        states = states.iter().flat_map(|s| s.successors(edge).unwrap()).collect();
    }
    assert_eq!(states.len(), 1);
    states.remove(0)
}

fn abstracted(ctx: &Arc<AnalysisContext>, n: usize) -> SmgState {
    let (state, changed) = list_state(ctx, n).execute_heap_abstraction(&BTreeSet::new()).unwrap();
    assert!(changed);
    state
}

fn segment_lengths(state: &SmgState) -> Vec<u32> {
    state
        .smg()
        .objects()
        .filter(|o| o.is_list_segment())
        .map(|o| o.min_length())
        .collect()
}

#[test]
fn test_equal_lists_cover_each_other() {
    let ctx = context();
    let a = list_state(&ctx, 2);
    let b = list_state(&ctx, 2);
    let joined = a.join(&b).unwrap().unwrap();
    assert_eq!(joined.status, JoinStatus::Equal);
    assert!(a.is_less_or_equal(&b).unwrap());
    assert!(b.is_less_or_equal(&a).unwrap());
}

#[test]
fn test_lists_of_different_length_are_incomparable() {
    let ctx = context();
    let a = list_state(&ctx, 2);
    let b = list_state(&ctx, 3);
    assert!(!a.is_less_or_equal(&b).unwrap());
    assert!(!b.is_less_or_equal(&a).unwrap());
}

#[test]
fn test_join_of_segments_keeps_shorter_bound() {
    let ctx = context();
    let three = abstracted(&ctx, 3);
    let four = abstracted(&ctx, 4);

    let joined = three.join(&four).unwrap().unwrap();
    assert_eq!(joined.status, JoinStatus::RightEntails);
    assert_eq!(segment_lengths(&joined.state), vec![3]);
    assert!(four.is_less_or_equal(&three).unwrap());
    assert!(!three.is_less_or_equal(&four).unwrap());
}

#[test]
fn test_single_node_is_not_covered_by_longer_segment() {
    let ctx = context();
    let one = list_state(&ctx, 1);
    let three = abstracted(&ctx, 3);

    let joined = one.join(&three).unwrap().unwrap();
    assert_eq!(joined.status, JoinStatus::Incomparable);
    assert_eq!(segment_lengths(&joined.state), vec![1]);
    assert!(!one.is_less_or_equal(&three).unwrap());
    assert!(!three.is_less_or_equal(&one).unwrap());
}

#[test]
fn test_merge_into_segments() {
    let ctx = context();
    let three = abstracted(&ctx, 3);
    let four = abstracted(&ctx, 4);

    let merged = four.merge(&three).unwrap();
    assert_eq!(merged.id(), three.id());

    let merged = three.merge(&four).unwrap();
    assert_ne!(merged.id(), four.id());
    assert_eq!(segment_lengths(&merged), vec![3]);
}

#[test]
fn test_intersection_of_segments_keeps_longer_bound() {
    let ctx = context();
    let three = abstracted(&ctx, 3);
    let four = abstracted(&ctx, 4);

    let met = three.intersect(&four).unwrap().unwrap();
    assert_eq!(segment_lengths(&met), vec![4]);
}

#[test]
fn test_intersection_with_different_stack_is_empty() {
    let ctx = context();
    let a = list_state(&ctx, 1);
    let b = a.add_stack_frame(FunctionDecl::void("f")).unwrap();
    assert!(a.intersect(&b).unwrap().is_none());
}
