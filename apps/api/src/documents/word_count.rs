//! Script-aware word counting.
//!
//! CJK ideographs and kana are counted one per character; everything else is
//! counted as whitespace-delimited words. Mixed text sums both.

/// Returns true for characters counted individually (Han ideographs, kana, CJK
/// compatibility ideographs). Hangul is space-delimited and counts as words.
fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x309F     // Hiragana
        | 0x30A0..=0x30FF   // Katakana
        | 0x3400..=0x4DBF   // CJK Extension A
        | 0x4E00..=0x9FFF   // CJK Unified Ideographs
        | 0xF900..=0xFAFF   // CJK Compatibility Ideographs
        | 0x20000..=0x2FA1F // Extensions B..F + compatibility supplement
    )
}

/// Punctuation never starts or extends a word on its own ("--", "。", "…").
fn is_word_char(c: char) -> bool {
    c.is_alphanumeric()
}

pub fn count_words(text: &str) -> i32 {
    let mut count: i32 = 0;
    let mut in_word = false;

    for c in text.chars() {
        if is_cjk(c) {
            count += 1;
            in_word = false;
        } else if c.is_whitespace() {
            in_word = false;
        } else if is_word_char(c) {
            if !in_word {
                count += 1;
                in_word = true;
            }
        }
        // Other punctuation joins whatever token it is attached to.
    }

    count
}
