use quill::core::types::DocId;
use quill::matching::{
    all_ids, AndMaybeMatcher, AndNotMatcher, DisjunctionMaxMatcher, IntersectionMatcher,
    ListMatcher, Matcher, RequireMatcher, UnionMatcher,
};

fn list(ids: &[u64]) -> Box<dyn Matcher> {
    let pairs: Vec<(u64, f32)> = ids.iter().map(|&id| (id, 1.0)).collect();
    Box::new(ListMatcher::from_pairs(&pairs))
}

fn weighted(pairs: &[(u64, f32)]) -> Box<dyn Matcher> {
    Box::new(ListMatcher::from_pairs(pairs))
}

const A: &[u64] = &[1, 3, 5, 7];
const B: &[u64] = &[3, 4, 7, 9];

#[test]
fn union_yields_sorted_set_union() {
    let mut m = UnionMatcher::new(list(A), list(B));
    assert_eq!(all_ids(&mut m).unwrap(), vec![1, 3, 4, 5, 7, 9]);
}

#[test]
fn union_sums_weights_at_shared_ids() {
    let m = UnionMatcher::new(
        weighted(&[(1, 2.0), (3, 2.0)]),
        weighted(&[(3, 5.0), (4, 1.0)]),
    );
    let mut m = m;
    assert_eq!(m.id(), DocId(1));
    assert_eq!(m.weight().unwrap(), 2.0);
    m.next().unwrap();
    assert_eq!(m.id(), DocId(3));
    assert_eq!(m.weight().unwrap(), 7.0);
    m.next().unwrap();
    assert_eq!(m.id(), DocId(4));
    assert_eq!(m.weight().unwrap(), 1.0);
}

#[test]
fn intersection_yields_sorted_set_intersection() {
    let mut m = IntersectionMatcher::new(list(A), list(B)).unwrap();
    assert_eq!(all_ids(&mut m).unwrap(), vec![3, 7]);
}

#[test]
fn and_not_yields_difference() {
    let mut m = AndNotMatcher::new(list(A), list(B)).unwrap();
    assert_eq!(all_ids(&mut m).unwrap(), vec![1, 5]);
}

#[test]
fn and_maybe_yields_first_child_with_optional_scores() {
    let mut m = AndMaybeMatcher::new(
        weighted(&[(1, 1.0), (3, 1.0), (5, 1.0), (7, 1.0)]),
        weighted(&[(3, 4.0), (4, 4.0), (7, 4.0), (9, 4.0)]),
    )
    .unwrap();

    let mut seen = Vec::new();
    while m.is_active() {
        seen.push((m.id().0, m.score().unwrap()));
        m.next().unwrap();
    }
    assert_eq!(
        seen,
        vec![(1, 1.0), (3, 5.0), (5, 1.0), (7, 5.0)]
    );
}

#[test]
fn require_filters_without_affecting_score() {
    let mut m = RequireMatcher::new(
        weighted(&[(1, 2.0), (3, 2.0), (7, 2.0)]),
        weighted(&[(3, 9.0), (7, 9.0), (9, 9.0)]),
    )
    .unwrap();

    let mut seen = Vec::new();
    while m.is_active() {
        seen.push((m.id().0, m.score().unwrap()));
        m.next().unwrap();
    }
    assert_eq!(seen, vec![(3, 2.0), (7, 2.0)]);
}

#[test]
fn disjunction_max_takes_best_contribution() {
    let mut m = DisjunctionMaxMatcher::new(
        weighted(&[(1, 2.0), (3, 2.0)]),
        weighted(&[(3, 5.0), (4, 1.0)]),
    );
    let mut seen = Vec::new();
    while m.is_active() {
        seen.push((m.id().0, m.score().unwrap()));
        m.next().unwrap();
    }
    assert_eq!(seen, vec![(1, 2.0), (3, 5.0), (4, 1.0)]);
}

#[test]
fn skip_to_resynchronizes_children() {
    let mut m = UnionMatcher::new(list(A), list(B));
    m.skip_to(DocId(4)).unwrap();
    assert_eq!(all_ids(&mut m).unwrap(), vec![4, 5, 7, 9]);

    let mut m = IntersectionMatcher::new(list(A), list(B)).unwrap();
    m.skip_to(DocId(4)).unwrap();
    assert_eq!(all_ids(&mut m).unwrap(), vec![7]);

    let mut m = AndNotMatcher::new(list(A), list(B)).unwrap();
    m.skip_to(DocId(2)).unwrap();
    assert_eq!(all_ids(&mut m).unwrap(), vec![5]);
}

#[test]
fn replace_collapses_exhausted_branches() {
    // An empty OR branch collapses to the other side.
    let m = Box::new(UnionMatcher::new(list(&[]), list(B)));
    let mut replaced = m.replace(0.0);
    assert_eq!(all_ids(replaced.as_mut()).unwrap(), B.to_vec());

    // Both sides dead: permanently inactive.
    let m = Box::new(UnionMatcher::new(list(&[]), list(&[])));
    let replaced = m.replace(0.0);
    assert!(!replaced.is_active());

    // An intersection cannot survive a dead side.
    let m = Box::new(IntersectionMatcher::new(list(&[]), list(B)).unwrap());
    let replaced = m.replace(0.0);
    assert!(!replaced.is_active());

    // A non-competitive matcher drops below the quality floor.
    let m = Box::new(ListMatcher::from_pairs(&[(1, 0.5)]));
    let replaced = m.replace(2.0);
    assert!(!replaced.is_active());
}

#[test]
fn skip_to_quality_prunes_only_non_competitive_matchers() {
    // Combined bound is 1 + 5 = 6.
    let mut m = UnionMatcher::new(
        weighted(&[(1, 1.0), (5, 1.0)]),
        weighted(&[(2, 5.0), (6, 5.0)]),
    );

    // Threshold below the bound: nothing may be skipped.
    m.skip_to_quality(3.0).unwrap();
    assert!(m.is_active());
    assert_eq!(all_ids(&mut m).unwrap(), vec![1, 2, 5, 6]);

    // Threshold above the bound: everything is provably non-competitive.
    let mut m = UnionMatcher::new(
        weighted(&[(1, 1.0), (5, 1.0)]),
        weighted(&[(2, 5.0), (6, 5.0)]),
    );
    m.skip_to_quality(7.0).unwrap();
    assert!(!m.is_active());
}

#[test]
fn next_past_end_is_an_error() {
    let mut m = ListMatcher::from_pairs(&[(1, 1.0)]);
    m.next().unwrap();
    assert!(!m.is_active());
    assert!(m.next().is_err());
}
