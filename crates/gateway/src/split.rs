//! Reply splitting for platforms with a per-message length limit.

/// Longest single message the gateway posts.
pub const MAX_MESSAGE_CHARS: usize = 1900;

/// Split `text` into chunks of at most `max` characters, breaking on line
/// boundaries. A single line longer than `max` is cut mid-line.
pub fn split_message(text: &str, max: usize) -> Vec<String> {
    let max = max.max(1);
    if text.chars().count() <= max {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let len = line.chars().count();
        if current_len + len > max && !current.is_empty() {
            push_chunk(&mut chunks, std::mem::take(&mut current));
            current_len = 0;
        }

        if len > max {
            let chars: Vec<char> = line.chars().collect();
            let mut pieces = chars.chunks(max).peekable();
            while let Some(piece) = pieces.next() {
                let piece: String = piece.iter().collect();
                if pieces.peek().is_some() {
                    push_chunk(&mut chunks, piece);
                } else {
                    current_len = piece.chars().count();
                    current = piece;
                }
            }
            continue;
        }

        current.push_str(line);
        current_len += len;
    }
    push_chunk(&mut chunks, current);
    chunks
}

fn push_chunk(chunks: &mut Vec<String>, chunk: String) {
    let trimmed = chunk.trim_end_matches('\n');
    if !trimmed.trim().is_empty() {
        chunks.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(split_message("hello\nworld", 1900), vec!["hello\nworld"]);
    }

    #[test]
    fn splits_on_line_boundaries() {
        let text = "aaaa\nbbbb\ncccc";
        assert_eq!(split_message(text, 10), vec!["aaaa\nbbbb", "cccc"]);
    }

    #[test]
    fn long_lines_are_cut() {
        let chunks = split_message(&"x".repeat(25), 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], "xxxxx");
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
    }

    #[test]
    fn every_chunk_fits_a_realistic_reply() {
        let paragraph = "🌱 The garden grows one patient line at a time.\n";
        let text = paragraph.repeat(100);
        let chunks = split_message(&text, MAX_MESSAGE_CHARS);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= MAX_MESSAGE_CHARS));
        assert_eq!(chunks.concat().matches("🌱").count(), 100);
    }
}
