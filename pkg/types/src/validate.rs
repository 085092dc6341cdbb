use anyhow::{Result, bail};

/// Validate a quota resource key (`pods`, `requests.ephemeral-storage`, `count/pods`).
pub fn validate_resource_key(key: &str) -> Result<()> {
    if key.is_empty() {
        bail!("resource key must not be empty");
    }
    if key.starts_with('.') || key.ends_with('.') {
        bail!("resource key '{}' must not start or end with a dot", key);
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.' | '/'))
    {
        bail!(
            "resource key '{}' must contain only lowercase letters, digits, '-', '.' and '/'",
            key
        );
    }
    Ok(())
}
