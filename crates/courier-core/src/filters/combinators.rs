//! Logical combinators over [`Filter`]s.
//!
//! Combinators operate on the safe verdict of their operands: an operand
//! whose predicate errors counts as `false` before the combinator applies.
//! `not(broken)` therefore matches everything, which is the reading that
//! keeps `not(f)` and `none([f])` interchangeable.

use serde_json::Value;

use super::{check_all, Filter, FilterFuture, Predicate};

/// Matches when `inner` does not.
pub fn not(inner: Filter) -> Filter {
    let name = format!("not({})", inner.name());
    Filter::from_predicate(name, NotPredicate(inner))
}

/// Matches when at least one operand matches. Empty input never matches.
pub fn any(filters: impl IntoIterator<Item = Filter>) -> Filter {
    let filters: Vec<Filter> = filters.into_iter().collect();
    Filter::from_predicate(joined_name("any", &filters), AnyPredicate(filters))
}

/// Matches when every operand matches. Empty input always matches.
pub fn all(filters: impl IntoIterator<Item = Filter>) -> Filter {
    let filters: Vec<Filter> = filters.into_iter().collect();
    Filter::from_predicate(joined_name("all", &filters), AllPredicate(filters))
}

/// Matches when no operand matches.
pub fn none(filters: impl IntoIterator<Item = Filter>) -> Filter {
    let filters: Vec<Filter> = filters.into_iter().collect();
    Filter::from_predicate(joined_name("none", &filters), NonePredicate(filters))
}

/// Matches when exactly one operand matches.
pub fn xor(filters: impl IntoIterator<Item = Filter>) -> Filter {
    let filters: Vec<Filter> = filters.into_iter().collect();
    Filter::from_predicate(joined_name("xor", &filters), XorPredicate(filters))
}

fn joined_name(op: &str, filters: &[Filter]) -> String {
    let names: Vec<&str> = filters.iter().map(Filter::name).collect();
    format!("{}({})", op, names.join(", "))
}

// ============================================================================
// Predicates
// ============================================================================

struct NotPredicate(Filter);

impl Predicate for NotPredicate {
    fn eval<'a>(&'a self, payload: &'a Value) -> FilterFuture<'a> {
        Box::pin(async move { Ok(!self.0.check(payload).await) })
    }
}

struct AnyPredicate(Vec<Filter>);

impl Predicate for AnyPredicate {
    fn eval<'a>(&'a self, payload: &'a Value) -> FilterFuture<'a> {
        Box::pin(async move {
            for filter in &self.0 {
                if filter.check(payload).await {
                    return Ok(true);
                }
            }
            Ok(false)
        })
    }
}

struct AllPredicate(Vec<Filter>);

impl Predicate for AllPredicate {
    fn eval<'a>(&'a self, payload: &'a Value) -> FilterFuture<'a> {
        Box::pin(async move { Ok(check_all(&self.0, payload).await) })
    }
}

struct NonePredicate(Vec<Filter>);

impl Predicate for NonePredicate {
    fn eval<'a>(&'a self, payload: &'a Value) -> FilterFuture<'a> {
        Box::pin(async move {
            for filter in &self.0 {
                if filter.check(payload).await {
                    return Ok(false);
                }
            }
            Ok(true)
        })
    }
}

struct XorPredicate(Vec<Filter>);

impl Predicate for XorPredicate {
    fn eval<'a>(&'a self, payload: &'a Value) -> FilterFuture<'a> {
        Box::pin(async move {
            let mut matched = 0usize;
            for filter in &self.0 {
                if filter.check(payload).await {
                    matched += 1;
                    if matched > 1 {
                        return Ok(false);
                    }
                }
            }
            Ok(matched == 1)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FilterError;
    use serde_json::json;

    fn yes() -> Filter {
        Filter::new("yes", |_| true)
    }

    fn no() -> Filter {
        Filter::new("no", |_| false)
    }

    fn broken() -> Filter {
        Filter::try_new("broken", |_| Err(FilterError::MissingKey("x".into())))
    }

    #[tokio::test]
    async fn not_inverts_the_safe_verdict() {
        let payload = json!({});
        assert!(!not(yes()).check(&payload).await);
        assert!(not(no()).check(&payload).await);
        assert!(not(broken()).check(&payload).await);
    }

    #[tokio::test]
    async fn any_needs_one_match() {
        let payload = json!({});
        assert!(any([no(), yes()]).check(&payload).await);
        assert!(!any([no(), no()]).check(&payload).await);
        assert!(!any([]).check(&payload).await);
    }

    #[tokio::test]
    async fn all_needs_every_match() {
        let payload = json!({});
        assert!(all([yes(), yes()]).check(&payload).await);
        assert!(!all([yes(), no()]).check(&payload).await);
        assert!(all([]).check(&payload).await);
    }

    #[tokio::test]
    async fn none_is_the_negation_of_any() {
        let payload = json!({});
        assert!(none([no(), no()]).check(&payload).await);
        assert!(!none([no(), yes()]).check(&payload).await);
        assert_eq!(
            none([no(), yes()]).check(&payload).await,
            not(any([no(), yes()])).check(&payload).await,
        );
    }

    #[tokio::test]
    async fn xor_wants_exactly_one() {
        let payload = json!({});
        assert!(xor([yes(), no(), no()]).check(&payload).await);
        assert!(!xor([yes(), yes(), no()]).check(&payload).await);
        assert!(!xor([no(), no()]).check(&payload).await);
    }

    #[tokio::test]
    async fn combinator_names_describe_their_shape() {
        let filter = none([yes(), no()]);
        assert_eq!(filter.name(), "none(yes, no)");
        assert_eq!(not(yes()).name(), "not(yes)");
    }
}
