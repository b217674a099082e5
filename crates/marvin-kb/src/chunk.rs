//! Text chunking for embedding: fixed windows with overlap, preferring to
//! break at a sentence boundary near the window's end.

/// Window size in characters.
pub const CHUNK_SIZE: usize = 1000;
/// Overlap carried into the next window.
pub const CHUNK_OVERLAP: usize = 150;
/// How far back from the window end to look for a sentence terminator.
const BREAK_WINDOW: usize = 100;

/// Split `text` into overlapping chunks. Empty input yields no chunks.
pub fn chunk_text(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let mut end = (start + CHUNK_SIZE).min(chars.len());

        // Prefer the last ". " inside the trailing window so chunks end on
        // sentence boundaries where the text allows it.
        if end < chars.len() {
            let search_start = start.max(end.saturating_sub(BREAK_WINDOW));
            if let Some(offset) = find_last_sentence_break(&chars[search_start..end]) {
                let candidate = search_start + offset + 1;
                if candidate > start {
                    end = candidate;
                }
            }
        }

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }

        if end >= chars.len() {
            break;
        }
        start = end.saturating_sub(CHUNK_OVERLAP);
        if start >= chars.len() {
            break;
        }
    }

    chunks
}

/// Index of the '.' in the last ". " occurrence, if any.
fn find_last_sentence_break(window: &[char]) -> Option<usize> {
    (0..window.len().saturating_sub(1))
        .rev()
        .find(|&i| window[i] == '.' && window[i + 1] == ' ')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("Hello world.");
        assert_eq!(chunks, vec!["Hello world.".to_string()]);
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(chunk_text("").is_empty());
        assert!(chunk_text("   ").is_empty());
    }

    #[test]
    fn long_text_respects_window_and_overlap() {
        let text = "word ".repeat(600); // 3000 chars, no sentence breaks
        let chunks = chunk_text(&text);
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= CHUNK_SIZE);
        }
        // Consecutive chunks share overlapping content.
        let tail: String = chunks[0].chars().rev().take(50).collect::<String>();
        let tail: String = tail.chars().rev().collect();
        assert!(chunks[1].contains(tail.trim()));
    }

    #[test]
    fn breaks_at_sentence_boundary_when_available() {
        // A sentence terminator sits inside the trailing search window.
        let mut text = "x".repeat(CHUNK_SIZE - 50);
        text.push_str(". ");
        text.push_str(&"y".repeat(500));

        let chunks = chunk_text(&text);
        assert!(chunks[0].ends_with('.'));
    }

    #[test]
    fn multibyte_text_does_not_split_mid_char() {
        let text = "héllo wörld. ".repeat(200);
        let chunks = chunk_text(&text);
        assert!(!chunks.is_empty());
        // Reassembly sanity: every chunk is valid UTF-8 by construction and
        // contains whole words from the source.
        for chunk in &chunks {
            assert!(chunk.contains('ö') || chunk.contains('é'));
        }
    }
}
