//! `${VAR_NAME}` expansion for secrets kept out of config files.

use crate::traits::NotifyError;

/// Resolve `${VAR_NAME}` patterns in a string using `std::env::var`.
///
/// Returns an error if a referenced variable is not set or a reference is
/// left unclosed.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, NotifyError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                var_name.push(c);
            }
            if !closed {
                return Err(NotifyError::Config(format!(
                    "unclosed env var reference in: {input}"
                )));
            }
            let value = std::env::var(&var_name).map_err(|_| {
                NotifyError::Config(format!("env var not found: {var_name}"))
            })?;
            result.push_str(&value);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}
