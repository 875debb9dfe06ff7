pub mod diagnostics;
pub mod logger;

use anyhow::Result;
use regex::Regex;

/// Collapse anything that is not ASCII alphanumeric into single underscores.
pub fn safe_file_component(raw: &str) -> Result<String> {
    let re = Regex::new(r"[^A-Za-z0-9]+")?;
    Ok(re.replace_all(raw.trim(), "_").trim_matches('_').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_components_are_sanitised() {
        assert_eq!(safe_file_component("Onion").unwrap(), "Onion");
        assert_eq!(
            safe_file_component("Bengal Gram (Gram)(Whole)").unwrap(),
            "Bengal_Gram_Gram_Whole"
        );
        assert_eq!(safe_file_component(" Pune/APMC ").unwrap(), "Pune_APMC");
    }
}
