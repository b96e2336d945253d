//! Field-level helpers shared by the per-kind comparison, late-initialization and
//! conversion code.
//!
//! Desired state uses `Option` for everything the user may leave out: `None` means
//! "don't care" when comparing, and "fill me in" when late-initializing. ArgoCD's wire
//! format uses zero values (empty strings, `false`, empty lists) for the same thing.

use std::collections::BTreeMap;

/// `None` matches anything
pub fn matches<T: PartialEq>(desired: &Option<T>, observed: &T) -> bool {
    desired.as_ref().is_none_or(|d| d == observed)
}

pub fn matches_str(desired: &Option<String>, observed: &str) -> bool {
    desired.as_deref().is_none_or(|d| d == observed)
}

/// `None` matches anything; a set list must have the same length and match element-wise
/// by position.
pub fn matches_list<D, O>(
    desired: &Option<Vec<D>>,
    observed: &[O],
    eq: impl Fn(&D, &O) -> bool,
) -> bool {
    match desired {
        None => true,
        Some(desired) => {
            desired.len() == observed.len()
                && desired.iter().zip(observed).all(|(d, o)| eq(d, o))
        }
    }
}

pub fn matches_map(
    desired: &Option<BTreeMap<String, String>>,
    observed: &BTreeMap<String, String>,
) -> bool {
    desired.as_ref().is_none_or(|d| d == observed)
}

/// Compare an optional desired sub-object with an optional observed one. An unset
/// desired value matches; a set one requires the observed value to exist.
pub fn matches_nested<D, O>(
    desired: &Option<D>,
    observed: Option<&O>,
    eq: impl Fn(&D, &O) -> bool,
) -> bool {
    match (desired, observed) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(d), Some(o)) => eq(d, o),
    }
}

/// Fill an unset desired field from the observed value. Set fields are never touched.
pub fn late_init<T>(desired: &mut Option<T>, observed: Option<T>) {
    if desired.is_none() {
        *desired = observed;
    }
}

/// Zero value to `None`
pub fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

pub fn non_empty_list<T: Clone>(value: &[T]) -> Option<Vec<T>> {
    (!value.is_empty()).then(|| value.to_vec())
}

pub fn non_empty_map(value: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    (!value.is_empty()).then(|| value.clone())
}

/// `false` is indistinguishable from unset on the wire
pub fn non_false(value: bool) -> Option<bool> {
    value.then_some(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_desired_matches_anything() {
        assert!(matches(&None::<i64>, &3));
        assert!(matches_str(&None, "anything"));
        assert!(matches_list(&None::<Vec<String>>, &["a".to_string()], |a, b| a == b));
        assert!(matches_map(&None, &BTreeMap::from([("k".into(), "v".into())])));
        assert!(matches_nested(&None::<i64>, None::<&i64>, |a, b| a == b));
    }

    #[test]
    fn lists_compare_by_length_then_position() {
        let observed = vec!["a".to_string(), "b".to_string()];
        let eq = |a: &String, b: &String| a == b;
        assert!(matches_list(&Some(observed.clone()), &observed, eq));
        assert!(!matches_list(&Some(vec!["a".to_string()]), &observed, eq));
        assert!(!matches_list(
            &Some(vec!["b".to_string(), "a".to_string()]),
            &observed,
            eq
        ));
        assert!(!matches_list(&Some(vec![]), &observed, eq));
    }

    #[test]
    fn set_desired_requires_observed_nested_value() {
        assert!(!matches_nested(&Some(1), None::<&i64>, |a, b| a == b));
        assert!(matches_nested(&Some(1), Some(&1), |a, b| a == b));
    }

    #[test]
    fn late_init_only_fills_unset_fields() {
        let mut unset = None;
        late_init(&mut unset, Some("observed"));
        assert_eq!(unset, Some("observed"));

        let mut set = Some("desired");
        late_init(&mut set, Some("observed"));
        assert_eq!(set, Some("desired"));

        let mut unset = None::<&str>;
        late_init(&mut unset, None);
        assert_eq!(unset, None);
    }

    #[test]
    fn zero_values_become_none() {
        assert_eq!(non_empty(""), None);
        assert_eq!(non_empty("x"), Some("x".to_string()));
        assert_eq!(non_empty_list::<String>(&[]), None);
        assert_eq!(non_false(false), None);
        assert_eq!(non_false(true), Some(true));
        assert_eq!(non_empty_map(&BTreeMap::new()), None);
    }
}
