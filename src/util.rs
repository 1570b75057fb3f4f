//! Small shared helpers.

/// Interpret a flag value: `1`, `true`, `yes`, `y` and `on` are true.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// Return the value of `$HOME` (`%USERPROFILE%` on Windows), falling back to `/root`.
pub fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| "/root".to_string())
}
