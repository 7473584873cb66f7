//! Typed environment-variable lookups with defaults.

/// Boolean environment flags accept 1/0, true/false, yes/no.
pub(crate) fn bool_var_or(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            other => {
                tracing::warn!(variable = name, value = other, "unparseable boolean, using default");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        assert!(bool_var_or("DEPFLOW_TEST_UNSET_FLAG", true));
        assert!(!bool_var_or("DEPFLOW_TEST_OTHER_UNSET_FLAG", false));
    }
}
