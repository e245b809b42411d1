//! Credential references in `config.toml`.
//!
//! A credential value is either plain text or a reference:
//!
//! - `env::VAR_NAME` reads `$VAR_NAME`
//! - `pass::path/in/store` runs `pass show path/in/store` and keeps the first line
//!
//! Errors name the reference, never the resolved value.

use std::process::Command;

use thiserror::Error;
use todaymeet_providers::Secret;

/// A reference that could not be resolved.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecretRefError {
    #[error("environment variable `{0}` is not set")]
    MissingEnv(String),

    #[error("`pass show {path}` failed: {reason}")]
    Pass { path: String, reason: String },

    #[error("reference `{0}` resolved to an empty value")]
    Empty(String),
}

/// Resolves `value`, expanding `env::` and `pass::` references.
pub fn resolve(value: &str) -> Result<Secret, SecretRefError> {
    let resolved = if let Some(var) = value.strip_prefix("env::") {
        std::env::var(var).map_err(|_| SecretRefError::MissingEnv(var.to_string()))?
    } else if let Some(path) = value.strip_prefix("pass::") {
        resolve_pass(path)?
    } else {
        return Ok(Secret::new(value));
    };

    if resolved.trim().is_empty() {
        return Err(SecretRefError::Empty(value.to_string()));
    }
    Ok(Secret::new(resolved))
}

/// Returns true if `value` is an `env::` or `pass::` reference.
pub fn is_reference(value: &str) -> bool {
    value.starts_with("env::") || value.starts_with("pass::")
}

fn resolve_pass(path: &str) -> Result<String, SecretRefError> {
    let pass_error = |reason: String| SecretRefError::Pass {
        path: path.to_string(),
        reason,
    };

    let output = Command::new("pass")
        .arg("show")
        .arg(path)
        .output()
        .map_err(|e| pass_error(e.to_string()))?;

    if !output.status.success() {
        // stderr from pass never contains the secret itself.
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(pass_error(format!("exit {}: {}", output.status, stderr.trim())));
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(str::to_string)
        .ok_or_else(|| pass_error("no output".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_value_is_kept() {
        assert_eq!(resolve("abc-123").unwrap().expose(), "abc-123");
        assert!(!is_reference("abc-123"));
    }

    #[test]
    fn env_reference() {
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("TODAYMEET_TEST_SECRET_REF", "from-env") };
        assert_eq!(
            resolve("env::TODAYMEET_TEST_SECRET_REF").unwrap().expose(),
            "from-env"
        );
        unsafe { std::env::remove_var("TODAYMEET_TEST_SECRET_REF") };
    }

    #[test]
    fn missing_env_reference_names_the_variable() {
        let err = resolve("env::TODAYMEET_TEST_DEFINITELY_UNSET").unwrap_err();
        assert_eq!(
            err,
            SecretRefError::MissingEnv("TODAYMEET_TEST_DEFINITELY_UNSET".to_string())
        );
    }

    #[test]
    fn empty_env_reference_is_rejected() {
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("TODAYMEET_TEST_EMPTY_REF", "  ") };
        let err = resolve("env::TODAYMEET_TEST_EMPTY_REF").unwrap_err();
        assert!(matches!(err, SecretRefError::Empty(_)));
        unsafe { std::env::remove_var("TODAYMEET_TEST_EMPTY_REF") };
    }

    #[test]
    fn detects_references() {
        assert!(is_reference("env::X"));
        assert!(is_reference("pass::work/graph"));
    }
}
