//! Slatepack armor: the copy-paste envelope around a serialized slate.
//!
//! ```text
//! BEGINSLATEPACK. <base64 payload, whitespace-wrapped> <check>. ENDSLATEPACK.
//! ```
//!
//! The trailing check word is the first four bytes of SHA-256d over the
//! payload, base64-encoded, so a truncated or mangled paste fails loudly
//! instead of producing a half-parsed slate. Whitespace and line breaks
//! inside the armor are insignificant.

use bitcoin::hashes::{sha256d, Hash};

use crate::error::Result;
use crate::Error;

use super::slate::Slate;

const HEADER: &str = "BEGINSLATEPACK.";
const FOOTER: &str = "ENDSLATEPACK.";
const CHECK_LEN: usize = 4;
const WRAP_COLS: usize = 60;

fn check_word(payload: &[u8]) -> String {
    let digest = sha256d::Hash::hash(payload).into_inner();
    base64::encode(&digest[..CHECK_LEN])
}

/// Armor a slate for transport. Words are period-terminated:
/// `<payload>. <check>.` between header and footer.
pub fn armor(slate: &Slate) -> String {
    let payload = slate.to_base64();
    let mut body =
        String::with_capacity(payload.len() + payload.len() / WRAP_COLS + 64);
    for chunk in payload.as_bytes().chunks(WRAP_COLS) {
        body.push_str(std::str::from_utf8(chunk).expect("base64 is ASCII"));
        body.push('\n');
    }
    format!(
        "{HEADER}\n{body}. {check}. {FOOTER}",
        check = check_word(payload.as_bytes()),
    )
}

/// Parse an armored slatepack. Strict about framing and the check word.
pub fn unarmor(armored: &str) -> Result<Slate> {
    let trimmed = armored.trim();
    let start = trimmed
        .find(HEADER)
        .ok_or_else(|| Error::invalid_input("missing BEGINSLATEPACK"))?;
    let end = trimmed
        .rfind(FOOTER)
        .ok_or_else(|| Error::invalid_input("missing ENDSLATEPACK"))?;
    if end <= start {
        return Err(Error::invalid_input("malformed slatepack framing"));
    }
    let inner = &trimmed[start + HEADER.len()..end];

    // Two period-terminated words: payload, then the check.
    let compact: String =
        inner.chars().filter(|c| !c.is_whitespace()).collect();
    let mut words = compact.split('.').filter(|w| !w.is_empty());
    let payload = words
        .next()
        .ok_or_else(|| Error::invalid_input("slatepack missing payload"))?;
    let check = words
        .next()
        .ok_or_else(|| Error::invalid_input("slatepack missing check word"))?;
    if words.next().is_some() {
        return Err(Error::invalid_input("slatepack has trailing words"));
    }

    if check_word(payload.as_bytes()) != check {
        return Err(Error::invalid_input("slatepack check mismatch"));
    }
    Slate::from_base64(payload)
}

#[cfg(test)]
mod test {
    use super::super::slate::{Slate, SlateState};
    use super::*;

    fn sample() -> Slate {
        let mut slate = Slate::new(
            "11112222-3333-4444-8555-666677778888".into(),
            SlateState::S1,
            1_000_000_000,
            23_000_000,
        );
        slate.offset = hex::encode([4u8; 32]);
        slate
    }

    #[test]
    fn armor_roundtrip() {
        let slate = sample();
        let armored = armor(&slate);
        assert!(armored.starts_with("BEGINSLATEPACK."));
        assert!(armored.ends_with("ENDSLATEPACK."));
        assert_eq!(unarmor(&armored).unwrap(), slate);
    }

    #[test]
    fn whitespace_is_insignificant() {
        let armored = armor(&sample());
        let reflowed = armored.replace('\n', " \t ");
        assert_eq!(unarmor(&reflowed).unwrap(), sample());
    }

    #[test]
    fn tampered_payload_rejected() {
        let armored = armor(&sample());
        // Flip a payload character well inside the body.
        let mut bytes = armored.into_bytes();
        let i = bytes.len() / 2;
        bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();
        assert!(unarmor(&tampered).is_err());
    }

    #[test]
    fn missing_framing_rejected() {
        assert!(unarmor("just some text").is_err());
        let armored = armor(&sample());
        assert!(unarmor(&armored.replace("ENDSLATEPACK.", "")).is_err());
    }
}
