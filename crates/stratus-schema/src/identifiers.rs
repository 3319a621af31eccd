use crate::types::{CanonicalName, LogicalId, OutputKey};

/// Suffix of the logical id given to each function resource.
pub const FUNCTION_RESOURCE_SUFFIX: &str = "ServerlessDeployedLambda";

fn is_canonical_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-'
}

/// Replace the first maximal run of characters outside `[A-Za-z0-9-]` with a
/// single `-`. Later runs are left untouched.
pub fn canonicalize(name: &str) -> CanonicalName {
    let Some(start) = name.find(|c: char| !is_canonical_char(c)) else {
        return CanonicalName::new(name);
    };
    let end = name[start..]
        .find(is_canonical_char)
        .map_or(name.len(), |offset| start + offset);

    let mut out = String::with_capacity(name.len());
    out.push_str(&name[..start]);
    out.push('-');
    out.push_str(&name[end..]);
    CanonicalName::new(out)
}

/// Strip every character outside `[A-Za-z0-9]`.
pub fn alphanumeric(value: &str) -> String {
    value.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// Output name exposing a function's live identifier: `${canonical}Arn`,
/// reduced to alphanumerics.
pub fn output_key(canonical: &CanonicalName) -> OutputKey {
    OutputKey::new(alphanumeric(&format!("{canonical}Arn")))
}

/// Logical id of the function resource declared for `canonical`.
pub fn function_logical_id(canonical: &CanonicalName) -> LogicalId {
    LogicalId::new(format!("{canonical}-{FUNCTION_RESOURCE_SUFFIX}"))
}

/// Construct id of the output registered for `canonical`.
pub fn output_construct_id(canonical: &CanonicalName) -> String {
    format!("{canonical}-{FUNCTION_RESOURCE_SUFFIX}-arn")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_leaves_valid_names_alone() {
        assert_eq!(canonicalize("hello"), "hello");
        assert_eq!(canonicalize("my-Function-1"), "my-Function-1");
    }

    #[test]
    fn canonicalize_replaces_first_run_only() {
        assert_eq!(canonicalize("my-Function_1"), "my-Function-1");
        assert_eq!(canonicalize("a__b.c"), "a-b.c");
        assert_eq!(canonicalize("a.b_c"), "a-b_c");
    }

    #[test]
    fn canonicalize_collapses_a_run_into_one_dash() {
        assert_eq!(canonicalize("api  /v1"), "api-v1");
        assert_eq!(canonicalize("trailing__"), "trailing-");
        assert_eq!(canonicalize("__leading"), "-leading");
    }

    #[test]
    fn canonicalize_handles_empty_and_non_ascii() {
        assert_eq!(canonicalize(""), "");
        assert_eq!(canonicalize("résumé"), "r-sumé");
    }

    #[test]
    fn alphanumeric_is_global() {
        assert_eq!(alphanumeric("a-b_c.d e"), "abcde");
        assert_eq!(alphanumeric(""), "");
        assert_eq!(alphanumeric("---"), "");
    }

    #[test]
    fn output_key_of_example_name() {
        let key = output_key(&canonicalize("my-Function_1"));
        assert_eq!(key, "myFunction1Arn");
    }

    #[test]
    fn output_key_is_deterministic() {
        for name in ["hello", "my-Function_1", "a.b.c", "", "x__y__z"] {
            assert_eq!(
                output_key(&canonicalize(name)),
                output_key(&canonicalize(name))
            );
        }
    }

    #[test]
    fn prefix_names_do_not_collide() {
        let foo = output_key(&canonicalize("foo"));
        let foo_bar = output_key(&canonicalize("foo-bar"));
        assert_eq!(foo, "fooArn");
        assert_eq!(foo_bar, "foobarArn");
        assert_ne!(foo, foo_bar);
    }

    #[test]
    fn separator_only_differences_collide() {
        // Names differing only in separators share an output key; synthesis
        // rejects such pairs.
        assert_eq!(
            output_key(&canonicalize("foo_bar")),
            output_key(&canonicalize("foo-bar"))
        );
    }

    #[test]
    fn derived_resource_ids() {
        let canonical = canonicalize("hello");
        assert_eq!(
            function_logical_id(&canonical),
            "hello-ServerlessDeployedLambda"
        );
        assert_eq!(
            output_construct_id(&canonical),
            "hello-ServerlessDeployedLambda-arn"
        );
    }
}
