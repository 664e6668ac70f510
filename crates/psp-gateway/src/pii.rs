//! Ordered regex-based PII redaction applied to prompts before they leave
//! the process boundary.

use regex::Regex;
use std::sync::OnceLock;

struct Pattern {
    name: &'static str,
    regex: Regex,
    replacement: &'static str,
}

fn patterns() -> &'static [Pattern] {
    static PATTERNS: OnceLock<Vec<Pattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Pattern {
                name: "ssn",
                regex: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap(),
                replacement: "[SSN_REDACTED]",
            },
            Pattern {
                name: "mrn",
                regex: Regex::new(r"(?i)\bMRN[:\s]*\w+\b").unwrap(),
                replacement: "[MRN_REDACTED]",
            },
            Pattern {
                name: "phone",
                regex: Regex::new(r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b").unwrap(),
                replacement: "[PHONE_REDACTED]",
            },
            Pattern {
                name: "email",
                regex: Regex::new(r"\b[\w.+-]+@[\w-]+\.[\w.-]+\b").unwrap(),
                replacement: "[EMAIL_REDACTED]",
            },
            Pattern {
                name: "dob",
                regex: Regex::new(
                    r"(?i)\b(?:DOB|date of birth)[:\s]*\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b",
                )
                .unwrap(),
                replacement: "[DOB_REDACTED]",
            },
            Pattern {
                name: "date",
                regex: Regex::new(r"\b\d{1,2}/\d{1,2}/\d{4}\b").unwrap(),
                replacement: "[DATE_REDACTED]",
            },
        ]
    })
}

/// Strip PII from `text`, returning the cleaned text and the list of
/// redaction types that fired (each pattern contributes at most one entry
/// regardless of how many times it matched).
pub fn strip(text: &str) -> (String, Vec<String>) {
    let mut cleaned = text.to_string();
    let mut redactions = Vec::new();

    for pattern in patterns() {
        if pattern.regex.is_match(&cleaned) {
            cleaned = pattern.regex.replace_all(&cleaned, pattern.replacement).into_owned();
            redactions.push(pattern.name.to_string());
        }
    }

    (cleaned, redactions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_ssn_and_email() {
        let (cleaned, redactions) = strip("SSN 123-45-6789, contact jane@example.com");
        assert!(cleaned.contains("[SSN_REDACTED]"));
        assert!(cleaned.contains("[EMAIL_REDACTED]"));
        assert_eq!(redactions, vec!["ssn", "email"]);
    }

    #[test]
    fn one_tag_per_pattern_regardless_of_match_count() {
        let (_, redactions) = strip("call 555-123-4567 or 555-987-6543");
        assert_eq!(redactions, vec!["phone"]);
    }

    #[test]
    fn clean_text_produces_no_redactions() {
        let (cleaned, redactions) = strip("patient is stable, no intervention needed");
        assert!(redactions.is_empty());
        assert_eq!(cleaned, "patient is stable, no intervention needed");
    }
}
