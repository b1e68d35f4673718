//! Input validation for names that end up in nft commands
//!
//! Table and set names reach the kernel through the nft JSON interface, so
//! they are held to the nft identifier grammar before anything is staged.

/// Longest object name nf_tables accepts (`NFT_NAME_MAXLEN` minus the NUL).
pub const MAX_OBJECT_NAME_LEN: usize = 255;

/// Validates an nft table or set name.
///
/// Rules:
/// - Non-empty, at most 255 bytes
/// - Starts with an ASCII letter or `_`
/// - Remaining characters are ASCII alphanumerics or one of `_ - . /`
///
/// # Examples
///
/// ```
/// use nftset_api::validators::validate_object_name;
///
/// assert!(validate_object_name("blocked_hosts4").is_ok());
/// assert!(validate_object_name("4blocked").is_err());
/// assert!(validate_object_name("bad name").is_err());
/// ```
///
/// # Errors
///
/// Returns `Err` describing the first rule the name breaks.
pub fn validate_object_name(name: &str) -> Result<String, String> {
    if name.is_empty() {
        return Err("Name cannot be empty".to_string());
    }

    if name.len() > MAX_OBJECT_NAME_LEN {
        return Err(format!(
            "Name too long (max {MAX_OBJECT_NAME_LEN} characters)"
        ));
    }

    let mut chars = name.chars();
    if !chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
    {
        return Err("Name must start with a letter or underscore".to_string());
    }

    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/')) {
        return Err("Name contains invalid characters".to_string());
    }

    Ok(name.to_string())
}

/// Validates a set prefix that will get a one-character family suffix.
///
/// # Errors
///
/// Returns `Err` if the prefix, or the prefix plus its suffix, is not a
/// valid object name.
pub fn validate_set_prefix(prefix: &str) -> Result<String, String> {
    validate_object_name(prefix)?;
    if prefix.len() >= MAX_OBJECT_NAME_LEN {
        return Err(format!(
            "Set prefix too long (max {} characters)",
            MAX_OBJECT_NAME_LEN - 1
        ));
    }
    Ok(prefix.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_object_name_accepts_nft_identifiers() {
        for name in ["filter", "mytable", "blocked4", "_tmp", "a-b.c/d", "Set_6"] {
            assert!(validate_object_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_validate_object_name_rejects() {
        assert!(validate_object_name("").is_err());
        assert!(validate_object_name("4set").is_err());
        assert!(validate_object_name("-set").is_err());
        assert!(validate_object_name("set name").is_err());
        assert!(validate_object_name("set;flush").is_err());
        assert!(validate_object_name("set\"").is_err());
        assert!(validate_object_name("sét").is_err());
    }

    #[test]
    fn test_validate_object_name_length() {
        let max = "a".repeat(MAX_OBJECT_NAME_LEN);
        assert!(validate_object_name(&max).is_ok());
        assert!(validate_object_name(&format!("{max}a")).is_err());
    }

    #[test]
    fn test_validate_set_prefix_leaves_room_for_suffix() {
        let max = "a".repeat(MAX_OBJECT_NAME_LEN);
        assert!(validate_set_prefix(&max).is_err());
        assert!(validate_set_prefix(&max[1..]).is_ok());
    }
}
