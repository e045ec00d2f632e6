/// Splits an invocation name of the form `name[.namespace]`.
///
/// The namespace is whatever follows the *last* dot, so a function name that
/// itself contains dots is resolved purely by suffix-strip. Without a dot the
/// default namespace applies.
pub fn parse_name(raw: &str, default_namespace: &str) -> (String, String) {
    match raw.rsplit_once('.') {
        Some((name, namespace)) => (name.to_string(), namespace.to_string()),
        None => (raw.to_string(), default_namespace.to_string()),
    }
}
