//! Message content classification.
//!
//! A pure function over the message body: numeric-code patterns combined with a
//! verification keyword mean `otp`; a keyword alone means `verification`;
//! everything else is plain `sms`. A bare digit run with no keyword is NOT
//! treated as an OTP — a code alone is insufficient signal.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Category assigned to a message at creation time. Immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Sms,
    Otp,
    Verification,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Sms => "sms",
            Category::Otp => "otp",
            Category::Verification => "verification",
        }
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sms" => Ok(Category::Sms),
            "otp" => Ok(Category::Otp),
            "verification" => Ok(Category::Verification),
            other => Err(format!("unknown message category: {other}")),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric-code shapes: a bare 4-8 digit run, or digits following a marker word.
static CODE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\b\d{4,8}\b").unwrap(),
        Regex::new(r"code[:\s]*\d+").unwrap(),
        Regex::new(r"verification[:\s]*\d+").unwrap(),
        Regex::new(r"otp[:\s]*\d+").unwrap(),
    ]
});

const VERIFICATION_KEYWORDS: &[&str] = &[
    "verification",
    "verify",
    "confirm",
    "authenticate",
    "code",
    "otp",
    "pin",
    "security",
];

/// Classify message content. Deterministic, total, no I/O.
pub fn classify(content: &str) -> Category {
    let content = content.to_lowercase();

    let has_keyword = VERIFICATION_KEYWORDS.iter().any(|kw| content.contains(kw));
    let has_code = CODE_PATTERNS.iter().any(|re| re.is_match(&content));

    if has_code && has_keyword {
        Category::Otp
    } else if has_keyword {
        Category::Verification
    } else {
        Category::Sms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_with_keyword_is_otp() {
        assert_eq!(classify("Your code: 482910"), Category::Otp);
        assert_eq!(classify("Use OTP 55123 to sign in"), Category::Otp);
        assert_eq!(classify("Verification code 9981 expires soon"), Category::Otp);
    }

    #[test]
    fn keyword_without_code_is_verification() {
        assert_eq!(classify("Please verify your account"), Category::Verification);
        assert_eq!(
            classify("Confirm your email to continue"),
            Category::Verification
        );
    }

    #[test]
    fn plain_text_is_sms() {
        assert_eq!(classify("Hey, lunch at noon?"), Category::Sms);
    }

    #[test]
    fn bare_code_without_keyword_is_sms() {
        // A digit run alone carries no verification intent.
        assert_eq!(classify("482910"), Category::Sms);
        assert_eq!(classify("Meet at 1230 by the gate"), Category::Sms);
    }

    #[test]
    fn empty_string_is_sms() {
        assert_eq!(classify(""), Category::Sms);
    }

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(classify("YOUR CODE: 482910"), Category::Otp);
        assert_eq!(classify("PLEASE VERIFY"), Category::Verification);
    }

    #[test]
    fn category_round_trips_as_str() {
        for c in [Category::Sms, Category::Otp, Category::Verification] {
            assert_eq!(c.as_str().parse::<Category>().unwrap(), c);
        }
    }
}
