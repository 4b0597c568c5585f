use glassbox_model::{BinTable, BoundaryRule, Value};
use proptest::prelude::*;

// Property tests for bin lookup: every value lands in the bin whose
// interval contains it, checked at and around every cut point.

fn sorted_cuts() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-1.0e6f64..1.0e6, 1..12).prop_map(|mut cuts| {
        cuts.sort_by(|a, b| a.total_cmp(b));
        cuts.dedup();
        cuts
    })
}

fn table(cuts: Vec<f64>) -> BinTable {
    let scores = (0..=cuts.len()).map(|i| i as f64).collect();
    BinTable::continuous("x", cuts, scores, -1.0)
}

proptest! {
    #[test]
    fn value_lands_in_containing_bin(cuts in sorted_cuts(), v in -2.0e6f64..2.0e6) {
        let expected = cuts.iter().filter(|&&t| t <= v).count() as f64;
        let t = table(cuts);
        prop_assert_eq!(t.score(&Value::Number(v), BoundaryRule::LeftClosed), expected);
    }
}

proptest! {
    #[test]
    fn cut_points_open_the_next_bin(cuts in sorted_cuts()) {
        let t = table(cuts.clone());
        for (i, &cut) in cuts.iter().enumerate() {
            let just_below = cut - cut.abs().max(1.0) * 1e-9;
            prop_assert_eq!(t.score(&Value::Number(cut), BoundaryRule::LeftClosed), (i + 1) as f64);
            prop_assert_eq!(t.score(&Value::Number(just_below), BoundaryRule::LeftClosed), i as f64);
            prop_assert_eq!(t.score(&Value::Number(cut), BoundaryRule::RightClosed), i as f64);
        }
    }
}

proptest! {
    #[test]
    fn null_always_selects_missing(cuts in sorted_cuts()) {
        let t = table(cuts);
        prop_assert_eq!(t.score(&Value::Null, BoundaryRule::LeftClosed), -1.0);
        prop_assert_eq!(t.score(&Value::Null, BoundaryRule::RightClosed), -1.0);
    }
}
