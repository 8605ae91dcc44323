//! Shared utility functions used across the codebase.

/// Parse a boolean flag value.
///
/// Recognises `1`, `true`, `yes`, `y`, `on` (case-insensitive) as `true`;
/// everything else maps to `false`.
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_common_truthy_values() {
        for value in ["1", "true", "TRUE", " yes ", "y", "On"] {
            assert!(parse_bool(value), "{value}");
        }
    }

    #[test]
    fn parse_bool_rejects_everything_else() {
        for value in ["0", "false", "no", "", "maybe"] {
            assert!(!parse_bool(value), "{value}");
        }
    }
}
