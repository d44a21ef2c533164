use crate::storage::StorageError;

const DOCUMENT_EXTENSION: &str = ".json";

/// Turns a user supplied title into a name safe to use as a file stem.
///
/// Leading and trailing whitespace is dropped, every run of inner whitespace
/// becomes a single `_`, and anything that is not an ASCII word character or
/// `-` is removed. The result always matches `[A-Za-z0-9_-]*`, and applying
/// the transform twice gives the same string as applying it once.
pub fn sanitize_name(raw: &str) -> String {
    let mut name = String::with_capacity(raw.len());
    let mut in_whitespace = false;

    for c in raw.trim().chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                name.push('_');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        if is_name_char(c) {
            name.push(c);
        }
    }

    name
}

/// Validates a name used to look up an existing document.
///
/// A single trailing `.json` is accepted and stripped. What remains must be
/// non-empty and already sanitized.
pub fn document_name(raw: &str) -> Result<String, StorageError> {
    let bare = raw.strip_suffix(DOCUMENT_EXTENSION).unwrap_or(raw);
    if bare.is_empty() || sanitize_name(bare) != bare {
        return Err(StorageError::Validation(format!("invalid document name: {:?}", raw)));
    }
    Ok(bare.to_string())
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_collapses_to_underscore() {
        assert_eq!(sanitize_name("Q1 Report"), "Q1_Report");
        assert_eq!(sanitize_name("  March \t  groceries\n"), "March_groceries");
    }

    #[test]
    fn test_disallowed_characters_are_dropped() {
        assert_eq!(sanitize_name("Invoice #42 (final)!"), "Invoice_42_final");
        assert_eq!(sanitize_name("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_name("caf\u{e9}-bill"), "caf-bill");
    }

    #[test]
    fn test_titles_differing_in_disallowed_characters_collide() {
        assert_eq!(sanitize_name("Q1 Report!"), sanitize_name("Q1 Report?"));
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let samples = [
            "",
            "   ",
            "Q1 Report",
            "a \u{e9} b",
            "tabs\tand\nnewlines",
            "--keep-hyphens--",
            "dots.and/slashes\\",
            "\u{1F600} emoji title",
        ];
        for s in samples {
            let once = sanitize_name(s);
            assert_eq!(sanitize_name(&once), once, "not idempotent for {:?}", s);
            assert!(once.chars().all(is_name_char), "unexpected char in {:?}", once);
        }
    }

    #[test]
    fn test_document_name_accepts_bare_and_extension_forms() {
        assert_eq!(document_name("Q1_Report").unwrap(), "Q1_Report");
        assert_eq!(document_name("Q1_Report.json").unwrap(), "Q1_Report");
    }

    #[test]
    fn test_document_name_rejects_unsafe_names() {
        for raw in ["", ".json", "../secret", "a b", "dir/file.json", "x.json.json"] {
            assert!(
                matches!(document_name(raw), Err(StorageError::Validation(_))),
                "expected {:?} to be rejected",
                raw
            );
        }
    }
}
