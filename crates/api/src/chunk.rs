/// Hard per-message payload cap imposed by the API.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Split `text` into pieces of at most `max_len` bytes, never cutting a
/// UTF-8 character, preferring to break at a newline and then at a space.
/// Callers chunk before enqueueing; the send path assumes every payload
/// already fits.
pub fn chunk_text(text: &str, max_len: usize) -> Vec<String> {
    if max_len == 0 || text.is_empty() {
        return Vec::new();
    }
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        if rest.len() <= max_len {
            chunks.push(rest.to_string());
            break;
        }

        let mut window = rest.floor_char_boundary(max_len);
        if window == 0 {
            // max_len is smaller than the first character; emit it whole.
            window = rest
                .chars()
                .next()
                .map(char::len_utf8)
                .unwrap_or(rest.len());
        }

        let head = &rest[..window];
        let mut cut = head.rfind('\n').or_else(|| head.rfind(' ')).unwrap_or(window);
        if cut == 0 {
            cut = window;
        }

        chunks.push(rest[..cut].trim_end().to_string());
        rest = rest[cut..].trim_start_matches(['\n', ' ']);
    }

    chunks.retain(|chunk| !chunk.is_empty());
    chunks
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(chunk_text("hello", 4096), vec!["hello"]);
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(chunk_text("", 10).is_empty());
    }

    #[test]
    fn splits_at_newline_before_limit() {
        let text = "first line\nsecond line";
        let chunks = chunk_text(text, 15);
        assert_eq!(chunks, vec!["first line", "second line"]);
    }

    #[test]
    fn splits_at_space_when_no_newline() {
        let chunks = chunk_text("alpha beta gamma", 11);
        assert_eq!(chunks, vec!["alpha beta", "gamma"]);
    }

    #[test]
    fn hard_splits_unbroken_text() {
        let chunks = chunk_text("abcdefghij", 4);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn never_splits_a_multibyte_char() {
        let text = "🙂".repeat(10);
        for chunk in chunk_text(&text, 5) {
            assert!(chunk.len() <= 5);
            assert!(chunk.chars().all(|c| c == '🙂'));
        }
    }

    #[rstest]
    #[case("a ", 1)]
    #[case("a\nb\nc", 2)]
    #[case("   spaced   out   ", 4)]
    fn no_chunk_is_empty(#[case] text: &str, #[case] max_len: usize) {
        for chunk in chunk_text(text, max_len) {
            assert!(!chunk.is_empty());
            assert!(chunk.len() <= max_len);
        }
    }

    #[test]
    fn chunks_reassemble_to_original_words() {
        let text = "one two three four five six seven eight nine ten";
        let chunks = chunk_text(text, 12);
        let rejoined = chunks.join(" ");
        assert_eq!(
            rejoined.split_whitespace().collect::<Vec<_>>(),
            text.split_whitespace().collect::<Vec<_>>()
        );
    }
}
