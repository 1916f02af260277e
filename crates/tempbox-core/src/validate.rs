use regex::Regex;
use std::sync::OnceLock;

pub const MAX_ADDRESS_LEN: usize = 254;
pub const MAX_MESSAGE_ID_LEN: usize = 128;

fn address_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("address pattern compiles")
    })
}

pub fn is_valid_address(address: &str) -> bool {
    address.len() <= MAX_ADDRESS_LEN && address_pattern().is_match(address)
}

/// Mail.tm ids are 24 hex chars, Mailsac ids are longer opaque tokens, so
/// only the character set and length are enforced. At least one alphanumeric
/// is required, which rules out `.` and `..` path segments.
pub fn is_valid_message_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_MESSAGE_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && id.chars().any(|c| c.is_ascii_alphanumeric())
}
