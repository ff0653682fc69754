#![allow(missing_docs)]

use penumbra::security::{can_read, VisibilityEvaluator};
use penumbra::{Authorizations, SecurityError, Visibility};
use proptest::prelude::*;

const TOKENS: &[&str] = &["a", "b", "c", "d", "e"];

fn token() -> impl Strategy<Value = String> {
    prop::sample::select(TOKENS).prop_map(str::to_string)
}

fn expression() -> impl Strategy<Value = String> {
    token().prop_recursive(4, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 2..4).prop_map(|terms| format!("({})", terms.join("&"))),
            prop::collection::vec(inner, 2..4).prop_map(|terms| format!("({})", terms.join("|"))),
        ]
    })
}

fn auths() -> impl Strategy<Value = Vec<&'static str>> {
    prop::sample::subsequence(TOKENS, 0..=TOKENS.len())
}

proptest! {
    #[test]
    fn adding_tokens_never_revokes_access(
        expr in expression(),
        base in auths(),
        extra in auths(),
    ) {
        let visibility = Visibility::new(expr);
        let small = Authorizations::new(base.iter().copied());
        let large = Authorizations::new(base.iter().chain(extra.iter()).copied());
        let before = can_read(&visibility, &small).expect("generated expressions parse");
        let after = can_read(&visibility, &large).expect("generated expressions parse");
        prop_assert!(!before || after);
    }

    #[test]
    fn empty_visibility_is_always_readable(tokens in auths()) {
        let auths = Authorizations::new(tokens);
        prop_assert!(can_read(&Visibility::empty(), &auths).expect("empty parses"));
    }

    #[test]
    fn cached_evaluation_matches_direct_parse(expr in expression(), tokens in auths()) {
        let evaluator = VisibilityEvaluator::new(4);
        let visibility = Visibility::new(expr);
        let auths = Authorizations::new(tokens);
        let direct = can_read(&visibility, &auths).expect("parse");
        prop_assert_eq!(evaluator.can_read(&visibility, &auths).expect("parse"), direct);
        prop_assert_eq!(evaluator.can_read(&visibility, &auths).expect("parse"), direct);
    }
}

#[test]
fn malformed_expressions_are_rejected() {
    for bad in ["a&b|c", "(a", "a)", "()", "a&", "&a", "a b", "\"\""] {
        let err = can_read(&Visibility::new(bad), &Authorizations::empty()).unwrap_err();
        assert!(
            matches!(err, SecurityError::MalformedVisibility { .. }),
            "{bad} should be malformed"
        );
    }
}

#[test]
fn grammar_examples() {
    let auths = Authorizations::new(["admin", "eu"]);
    let cases = [
        ("admin", true),
        ("admin&eu", true),
        ("admin&us", false),
        ("us|eu", true),
        ("(us|eu)&admin", true),
        ("(us&admin)|(eu&ops)", false),
        ("\"a b\"|admin", true),
    ];
    for (expr, expected) in cases {
        assert_eq!(
            can_read(&Visibility::new(expr), &auths).unwrap(),
            expected,
            "{expr}"
        );
    }
}
