use anyhow::{Result, bail};

use crate::quantity::ResourceList;

/// Validate a Kubernetes-style resource name.
/// Rules: lowercase `[a-z0-9-]`, max 63 chars, no leading/trailing hyphens.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > 63 {
        bail!("name '{}' exceeds 63 characters (got {})", name, name.len());
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!("name '{}' must not start or end with a hyphen", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!(
            "name '{}' must contain only lowercase letters, digits, and hyphens [a-z0-9-]",
            name
        );
    }
    Ok(())
}

/// Validate a resource key such as `limits.cpu` or `requests.nvidia.com/gpu`.
/// Rules: non-empty, max 253 chars, `[A-Za-z0-9._/-]`, alphanumeric at both ends.
pub fn validate_resource_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("resource name must not be empty");
    }
    if name.len() > 253 {
        bail!("resource name '{}' exceeds 253 characters", name);
    }
    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
        bail!("resource name '{}' must start and end with a letter or digit", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '/'))
    {
        bail!("resource name '{}' contains invalid characters", name);
    }
    Ok(())
}

/// Every key valid and every quantity non-negative.
pub fn validate_resource_list(field: &str, list: &ResourceList) -> Result<()> {
    for (name, quantity) in list {
        validate_resource_name(name)?;
        if quantity.is_negative() {
            bail!("{}.{} must not be negative (got {})", field, name, quantity);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        assert!(validate_name("nginx").is_ok());
        assert!(validate_name("my-app").is_ok());
        assert!(validate_name("app-123").is_ok());
        assert!(validate_name("a").is_ok());
        assert!(validate_name("a-b-c-d").is_ok());
    }

    #[test]
    fn invalid_names() {
        assert!(validate_name("").is_err());
        assert!(validate_name("My-App").is_err());
        assert!(validate_name("my_app").is_err());
        assert!(validate_name("-leading").is_err());
        assert!(validate_name("trailing-").is_err());
        assert!(validate_name("special!char").is_err());
        assert!(validate_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn resource_names() {
        assert!(validate_resource_name("limits.cpu").is_ok());
        assert!(validate_resource_name("requests.nvidia.com/gpu").is_ok());
        assert!(validate_resource_name("pods").is_ok());
        assert!(validate_resource_name("").is_err());
        assert!(validate_resource_name(".cpu").is_err());
        assert!(validate_resource_name("cpu ").is_err());
        assert!(validate_resource_name("cpu!").is_err());
    }

    #[test]
    fn resource_lists_reject_negative() {
        let ok = crate::quantity::resource_list([("limits.cpu", "2")]).unwrap();
        assert!(validate_resource_list("spec.quota.hard", &ok).is_ok());
        let neg = crate::quantity::resource_list([("limits.cpu", "-1")]).unwrap();
        let err = validate_resource_list("spec.quota.hard", &neg).unwrap_err();
        assert!(err.to_string().contains("spec.quota.hard.limits.cpu"));
    }
}
