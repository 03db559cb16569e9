/// Privacy config validation
///
/// Rejects configs that would produce invalid display names before they
/// reach the masker or the sanitizer.
use crate::config::PrivacyConfig;
use crate::identity::{expand_template, ALIAS_PLACEHOLDER};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref NAME_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9_]{3,16}$").unwrap();
    static ref TEMPLATE_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9_\-\[\]]{3,16}$").unwrap();
}

/// Longest token the alias registry can hand out
const WIDEST_TOKEN: &str = "abcdef";

/// Validation error detail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Stable key for UI translation
    pub key: &'static str,
    pub message: String,
}

/// Validation result with detailed errors
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Validate a privacy config
pub fn validate_privacy_config(config: &PrivacyConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if !NAME_PATTERN.is_match(&config.local_name) {
        errors.push(error(
            "local_name_invalid",
            "Local replacement name must match [A-Za-z0-9_]{3,16}.",
        ));
    }

    for (key, label, value) in [
        ("local_skin_source_invalid", "Local skin source", &config.local_skin_source),
        ("local_cape_source_invalid", "Local cape source", &config.local_cape_source),
        ("others_skin_source_invalid", "Other-players skin source", &config.others_skin_source),
        ("others_cape_source_invalid", "Other-players cape source", &config.others_cape_source),
    ] {
        if !value.is_empty() && !NAME_PATTERN.is_match(value) {
            errors.push(error(
                key,
                &format!("{} must be empty or match [A-Za-z0-9_]{{3,16}}.", label),
            ));
        }
    }

    let template = &config.others_name_template;
    if !TEMPLATE_PATTERN.is_match(template) {
        errors.push(error(
            "others_template_invalid",
            "Other-players template must match [A-Za-z0-9_[]-]{3,16}.",
        ));
    }

    if !template.contains(ALIAS_PLACEHOLDER) {
        errors.push(error(
            "others_template_missing_id",
            "Other-players template must contain [ID].",
        ));
    }

    if expand_template(template, WIDEST_TOKEN).chars().count() > 16 {
        errors.push(error(
            "others_template_too_long",
            "Other-players template resolves to more than 16 characters.",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Join error messages for a single log line
pub fn describe(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join(" | ")
}

fn error(key: &'static str, message: &str) -> ValidationError {
    ValidationError {
        key,
        message: message.to_string(),
    }
}
