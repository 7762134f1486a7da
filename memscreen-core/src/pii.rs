//! Best-effort scrubbing of sensitive substrings from OCR text before it is
//! persisted, gated behind the `security` feature (matches the upstream
//! crate's own feature split).

#[cfg(feature = "security")]
mod enabled {
    use lazy_static::lazy_static;
    use regex::Regex;

    lazy_static! {
        static ref EMAIL: Regex =
            Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap();
        static ref CREDIT_CARD: Regex =
            Regex::new(r"\b(?:\d[ -]*?){13,16}\b").unwrap();
        static ref SSN: Regex = Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap();
        static ref PHONE: Regex =
            Regex::new(r"\b(?:\+?\d{1,2}[-. ]?)?\(?\d{3}\)?[-. ]?\d{3}[-. ]?\d{4}\b").unwrap();
    }

    /// Replaces recognizable PII patterns with a `[redacted:<kind>]` marker.
    /// Never panics on malformed input; unmatched text passes through
    /// unchanged.
    pub fn remove_pii(text: &str) -> String {
        let mut out = EMAIL.replace_all(text, "[redacted:email]").into_owned();
        out = SSN.replace_all(&out, "[redacted:ssn]").into_owned();
        out = CREDIT_CARD
            .replace_all(&out, "[redacted:card]")
            .into_owned();
        out = PHONE.replace_all(&out, "[redacted:phone]").into_owned();
        out
    }
}

#[cfg(not(feature = "security"))]
mod enabled {
    pub fn remove_pii(text: &str) -> String {
        text.to_string()
    }
}

pub use enabled::remove_pii;

#[cfg(all(test, feature = "security"))]
mod tests {
    use super::remove_pii;

    #[test]
    fn redacts_email() {
        let out = remove_pii("contact me at jane.doe@example.com please");
        assert!(out.contains("[redacted:email]"));
        assert!(!out.contains("jane.doe@example.com"));
    }

    #[test]
    fn redacts_ssn() {
        let out = remove_pii("ssn is 123-45-6789 on file");
        assert!(out.contains("[redacted:ssn]"));
    }

    #[test]
    fn leaves_plain_text_alone() {
        let out = remove_pii("nothing sensitive here");
        assert_eq!(out, "nothing sensitive here");
    }
}
