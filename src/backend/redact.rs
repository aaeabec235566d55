//! PII scrubbing for stored transcripts

use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").expect("valid email regex")
});

static PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\+?\d{1,3}[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}")
        .expect("valid phone regex")
});

pub const EMAIL_REDACTED: &str = "[EMAIL REDACTED]";
pub const PHONE_REDACTED: &str = "[PHONE REDACTED]";

/// Replace email-like and phone-like substrings.
pub fn redact_pii(text: &str) -> String {
    let without_email = EMAIL.replace_all(text, EMAIL_REDACTED);
    PHONE.replace_all(&without_email, PHONE_REDACTED).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_redacted() {
        assert_eq!(
            redact_pii("reach me at jane.doe+work@example.co.uk please"),
            "reach me at [EMAIL REDACTED] please"
        );
    }

    #[test]
    fn test_phone_redacted() {
        assert_eq!(
            redact_pii("call 555-123-4567 or (555) 987 6543"),
            "call [PHONE REDACTED] or [PHONE REDACTED]"
        );
        assert_eq!(redact_pii("+1 555.123.4567"), "[PHONE REDACTED]");
    }

    #[test]
    fn test_plain_text_untouched() {
        let text = "I have used the product for 3 years, maybe 40 hours a week.";
        assert_eq!(redact_pii(text), text);
    }
}
