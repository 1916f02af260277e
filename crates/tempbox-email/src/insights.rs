//! Verification-code and sender-service detection for listed messages.

use regex::Regex;
use std::sync::OnceLock;
use tempbox_core::{MessageCategory, ServiceHint};

const CODE_KEYWORDS: [&str; 5] = ["código", "code", "verification", "verificación", "otp"];
const KEYWORD_WINDOW: usize = 50;

const KNOWN_SERVICES: &[(&[&str], &str, MessageCategory)] = &[
    (&["tiktok"], "TikTok", MessageCategory::Verification),
    (&["instagram"], "Instagram", MessageCategory::Verification),
    (&["facebook", "meta"], "Facebook", MessageCategory::Verification),
    (&["discord"], "Discord", MessageCategory::Invitation),
    (&["twitter", "x.com"], "Twitter", MessageCategory::Verification),
    (&["paypal"], "PayPal", MessageCategory::Receipt),
    (&["netflix"], "Netflix", MessageCategory::Account),
    (&["spotify"], "Spotify", MessageCategory::Account),
    (&["github"], "GitHub", MessageCategory::Verification),
    (&["linkedin"], "LinkedIn", MessageCategory::Invitation),
    (&["amazon"], "Amazon", MessageCategory::Order),
    (&["google"], "Google", MessageCategory::Security),
];

const CONTENT_CATEGORIES: &[(&[&str], MessageCategory)] = &[
    (&["welcome", "bienvenid"], MessageCategory::Welcome),
    (&["verify", "verificar"], MessageCategory::Verification),
    (&["invoice", "factura"], MessageCategory::Invoice),
    (&["receipt", "recibo"], MessageCategory::Receipt),
];

struct CodePatterns {
    otp: Regex,
    numeric: Regex,
    dashed: Regex,
    six_digits: Regex,
}

fn patterns() -> &'static CodePatterns {
    static PATTERNS: OnceLock<CodePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| CodePatterns {
        otp: Regex::new(
            r"(?i:código de verificación|verification code|código|code|otp)[\s:]*([A-Z0-9]{4,8})\b",
        )
        .expect("static regex compiles"),
        numeric: Regex::new(r"\b\d{4,8}\b").expect("static regex compiles"),
        dashed: Regex::new(r"(?i)\b[A-Z0-9]{2,4}-[A-Z0-9]{2,4}(?:-[A-Z0-9]{2,4})?\b")
            .expect("static regex compiles"),
        six_digits: Regex::new(r"^\d{6}$").expect("static regex compiles"),
    })
}

fn push_unique(codes: &mut Vec<String>, code: &str) {
    if !codes.iter().any(|c| c == code) {
        codes.push(code.to_string());
    }
}

/// Candidate codes in discovery order: keyword-anchored codes, else bare
/// 4-8 digit runs, then dashed codes.
pub fn extract_codes(text: &str) -> Vec<String> {
    let patterns = patterns();
    let mut codes = Vec::new();

    for caps in patterns.otp.captures_iter(text) {
        if let Some(code) = caps.get(1) {
            push_unique(&mut codes, code.as_str());
        }
    }

    if codes.is_empty() {
        for m in patterns.numeric.find_iter(text) {
            push_unique(&mut codes, m.as_str());
        }
    }

    for m in patterns.dashed.find_iter(text) {
        push_unique(&mut codes, m.as_str());
    }

    codes
}

fn floor_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

fn near_keyword(lowered: &str, code: &str) -> bool {
    let Some(index) = lowered.find(&code.to_lowercase()) else {
        return false;
    };
    let start = floor_boundary(lowered, index.saturating_sub(KEYWORD_WINDOW));
    let end = ceil_boundary(lowered, index + KEYWORD_WINDOW);
    let context = &lowered[start..end];
    CODE_KEYWORDS.iter().any(|kw| context.contains(kw))
}

/// The code a reader most likely wants: a 6-digit code when there is a
/// choice, then one mentioned near a keyword, else the first candidate.
pub fn main_code(text: &str, subject: &str) -> Option<String> {
    let codes = extract_codes(&format!("{text} {subject}"));
    if codes.len() > 1 {
        if let Some(code) = codes.iter().find(|c| patterns().six_digits.is_match(c)) {
            return Some(code.clone());
        }
        let lowered = text.to_lowercase();
        if let Some(code) = codes.iter().find(|c| near_keyword(&lowered, c)) {
            return Some(code.clone());
        }
    }
    codes.into_iter().next()
}

pub fn detect_service(from: &str, subject: &str) -> ServiceHint {
    let combined = format!("{from} {subject}").to_lowercase();
    let contains_any = |needles: &[&str]| needles.iter().any(|n| combined.contains(n));

    let known = KNOWN_SERVICES
        .iter()
        .find(|(needles, ..)| contains_any(needles));
    if let Some((_, name, category)) = known {
        return ServiceHint {
            service: Some(name.to_string()),
            category: *category,
        };
    }

    let category = CONTENT_CATEGORIES
        .iter()
        .find(|(needles, _)| contains_any(needles))
        .map_or(MessageCategory::Message, |(_, category)| *category);
    ServiceHint {
        service: None,
        category,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_codes_take_priority_over_bare_numbers() {
        let codes = extract_codes("Order 20240501 shipped. Your verification code: AB12CD");
        assert_eq!(codes, vec!["AB12CD".to_string()]);
    }

    #[test]
    fn falls_back_to_digit_runs_and_dashed_codes() {
        let codes = extract_codes("Use 482913 or the backup key QX7-92K-L4P to continue");
        assert_eq!(codes, vec!["482913".to_string(), "QX7-92K-L4P".to_string()]);
        assert!(extract_codes("nothing to see here").is_empty());
    }

    #[test]
    fn lowercase_words_after_keywords_are_not_codes() {
        assert!(extract_codes("Enter the code below").is_empty());
    }

    #[test]
    fn prefers_six_digit_codes() {
        assert_eq!(
            main_code("Ticket 1234 and 998877 are here", "").as_deref(),
            Some("998877")
        );
    }

    #[test]
    fn prefers_codes_near_keywords() {
        let text = "Reference 12345 for your records, kept on file for the next ninety days \
                    by the billing team. Verification number 7788";
        assert_eq!(main_code(text, "").as_deref(), Some("7788"));
    }

    #[test]
    fn subject_codes_count_too() {
        assert_eq!(main_code("", "Your code is 5521").as_deref(), Some("5521"));
        assert_eq!(main_code("", ""), None);
    }

    #[test]
    fn handles_multibyte_text_around_codes() {
        let text = "ñ".repeat(40) + " 1111 y 2222 código de verificación";
        assert!(main_code(&text, "").is_some());
    }

    #[test]
    fn detects_known_services_and_categories() {
        let github = detect_service("noreply@github.com", "Please verify your device");
        assert_eq!(github.service.as_deref(), Some("GitHub"));
        assert_eq!(github.category, MessageCategory::Verification);

        let amazon = detect_service("ship-confirm@amazon.com", "Shipped");
        assert_eq!(amazon.category, MessageCategory::Order);

        let unknown = detect_service("billing@acme.io", "Your invoice for May");
        assert_eq!(unknown.service, None);
        assert_eq!(unknown.category, MessageCategory::Invoice);

        assert_eq!(
            detect_service("a@b.io", "hello").category,
            MessageCategory::Message
        );
    }
}
