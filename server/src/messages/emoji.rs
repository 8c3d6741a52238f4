const ZWJ: char = '\u{200D}';
const VARIATION_SELECTOR_16: char = '\u{FE0F}';

fn is_pictograph(c: char) -> bool {
    matches!(c as u32,
        0x1F000..=0x1F02F      // mahjong, dominoes
        | 0x1F0A0..=0x1F0FF    // playing cards
        | 0x1F100..=0x1F2FF    // enclosed alphanumerics / ideographs
        | 0x1F300..=0x1F5FF    // symbols & pictographs
        | 0x1F600..=0x1F64F    // emoticons
        | 0x1F680..=0x1F6FF    // transport & map
        | 0x1F700..=0x1F7FF
        | 0x1F900..=0x1F9FF
        | 0x1FA70..=0x1FAFF
        | 0x2300..=0x23FF      // watch, hourglass
        | 0x2600..=0x27BF      // misc symbols, dingbats
        | 0x2B00..=0x2BFF      // stars, arrows
        | 0x24C2
        | 0x3030
        | 0x303D
        | 0x3297
        | 0x3299)
}

/// Concatenate the emoji in `text`, or `None` if there are none.
///
/// Joiners and variation selectors are kept only when they follow an emoji,
/// so ZWJ sequences such as family glyphs survive intact.
pub fn extract(text: &str) -> Option<String> {
    let mut out = String::new();
    let mut in_emoji = false;

    for c in text.chars() {
        if is_pictograph(c) {
            out.push(c);
            in_emoji = true;
        } else if in_emoji && (c == ZWJ || c == VARIATION_SELECTOR_16) {
            out.push(c);
        } else {
            in_emoji = false;
        }
    }

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_emoji_out_of_text() {
        assert_eq!(extract("hello 👋").as_deref(), Some("👋"));
        assert_eq!(extract("a 🎉 b 🚀").as_deref(), Some("🎉🚀"));
    }

    #[test]
    fn plain_text_has_none() {
        assert_eq!(extract("hello"), None);
        assert_eq!(extract(""), None);
        assert_eq!(extract("café ñ 中文"), None);
    }

    #[test]
    fn keeps_zwj_sequences() {
        let family = "👨\u{200D}👩\u{200D}👧";
        assert_eq!(extract(&format!("my {}", family)).as_deref(), Some(family));
    }

    #[test]
    fn drops_stray_joiners() {
        assert_eq!(extract("a\u{200D}b"), None);
    }
}
