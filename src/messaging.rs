//! Outbound delivery seam: length-limited messengers and reply chunking.

use crate::ConversationId;
use crate::error::MessagingError;

/// A message-delivery channel with a platform maximum message size.
///
/// The chat platform itself is an external collaborator; adapters implement
/// this trait and the rest of the crate never sees platform specifics.
#[async_trait::async_trait]
pub trait Messenger: Send + Sync {
    /// Platform maximum outbound message length, in characters.
    fn max_message_len(&self) -> usize;

    /// Deliver one already-size-checked message to a conversation.
    async fn send(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<(), MessagingError>;

    /// Deliver a reply of any length, chunking to the platform limit.
    async fn send_chunked(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<(), MessagingError> {
        for chunk in chunk_message(text, self.max_message_len()) {
            self.send(conversation_id, &chunk).await?;
        }
        Ok(())
    }
}

/// Split a reply into chunks no longer than `max_len` characters.
///
/// Splits on line boundaries where possible so code blocks and paragraphs
/// stay readable, falling back to a hard split for single oversized lines.
pub fn chunk_message(text: &str, max_len: usize) -> Vec<String> {
    // A zero limit degrades to a single unsplit chunk. Config validation
    // rejects it upstream; delivery is still better than a panic here.
    if max_len == 0 || text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;

    for line in text.split_inclusive('\n') {
        let line_chars = line.chars().count();

        if current_chars + line_chars > max_len && current_chars > 0 {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }

        if line_chars > max_len {
            // A single line longer than the limit: hard split.
            for piece in split_hard(line, max_len) {
                let piece_chars = piece.chars().count();
                if current_chars + piece_chars > max_len && current_chars > 0 {
                    chunks.push(std::mem::take(&mut current));
                    current_chars = 0;
                }
                current.push_str(&piece);
                current_chars += piece_chars;
            }
        } else {
            current.push_str(line);
            current_chars += line_chars;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

fn split_hard(line: &str, max_len: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    chars
        .chunks(max_len)
        .map(|piece| piece.iter().collect())
        .collect()
}

/// Stdout-backed messenger for the local console conversation loop.
pub struct ConsoleMessenger {
    max_message_len: usize,
}

impl ConsoleMessenger {
    pub fn new(max_message_len: usize) -> Self {
        Self { max_message_len }
    }
}

#[async_trait::async_trait]
impl Messenger for ConsoleMessenger {
    fn max_message_len(&self) -> usize {
        self.max_message_len
    }

    async fn send(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<(), MessagingError> {
        println!("[{conversation_id}] {text}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_message_is_one_chunk() {
        assert_eq!(chunk_message("hello", 2000), vec!["hello".to_string()]);
    }

    #[test]
    fn zero_limit_degrades_to_a_single_chunk() {
        assert_eq!(chunk_message("hello", 0), vec!["hello".to_string()]);
    }

    #[test]
    fn no_chunk_exceeds_the_limit() {
        let text = (0..50)
            .map(|i| format!("line number {i} with some padding text"))
            .collect::<Vec<_>>()
            .join("\n");

        for max_len in [10, 40, 100, 500] {
            for chunk in chunk_message(&text, max_len) {
                assert!(
                    chunk.chars().count() <= max_len,
                    "chunk of {} chars exceeds limit {max_len}",
                    chunk.chars().count()
                );
            }
        }
    }

    #[test]
    fn chunks_reassemble_to_the_original() {
        let text = "alpha\nbeta\ngamma\ndelta\nepsilon";
        let reassembled: String = chunk_message(text, 12).concat();
        assert_eq!(reassembled, text);
    }

    #[test]
    fn prefers_line_boundaries() {
        let text = "short one\nshort two\nshort three\n";
        let chunks = chunk_message(text, 21);

        for chunk in &chunks {
            assert!(chunk.ends_with('\n'), "chunk {chunk:?} should end on a line");
        }
    }

    #[test]
    fn oversized_single_line_is_hard_split() {
        let text = "a".repeat(4500);
        let chunks = chunk_message(&text, 2000);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 2000);
        assert_eq!(chunks[2].len(), 500);
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "é".repeat(10);
        let chunks = chunk_message(&text, 3);

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.concat(), text);
    }
}
