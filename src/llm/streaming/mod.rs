//! Server-Sent Events decoding for streaming chat completions

/// Marker the OpenAI-compatible APIs send as the last `data:` payload
pub const DONE_MARKER: &str = "[DONE]";

/// Server-Sent Events (SSE) decoder
///
/// Buffers incoming bytes and extracts complete SSE `data:` payloads.
/// Events may be split across chunks (including inside a UTF-8 sequence),
/// several events may share a chunk, and the final event may lack a
/// trailing newline. Only complete lines are decoded.
///
/// # Example
/// ```
/// use scout::llm::streaming::SseDecoder;
///
/// let mut decoder = SseDecoder::new();
/// assert_eq!(decoder.push(b"data: {\"a\":1}\n\ndata: {\"b\""), vec!["{\"a\":1}"]);
/// assert_eq!(decoder.push(b":2}\n\n"), vec!["{\"b\":2}"]);
///
/// decoder.push(b"data: [DONE]");
/// assert_eq!(decoder.finish(), vec!["[DONE]"]);
/// ```
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push incoming bytes and extract complete SSE `data:` payloads
    ///
    /// Incomplete lines remain buffered for the next `push()` or `finish()`.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            if let Some(payload) = Self::data_payload(&String::from_utf8_lossy(&line)) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flush whatever is left once the byte stream has ended
    pub fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.buffer);
        String::from_utf8_lossy(&rest)
            .lines()
            .filter_map(Self::data_payload)
            .collect()
    }

    fn data_payload(line: &str) -> Option<String> {
        line.trim()
            .strip_prefix("data:")
            .map(|payload| payload.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_complete_event() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.push(b"data: {\"hello\":\"world\"}\n\n");
        assert_eq!(payloads, vec!["{\"hello\":\"world\"}"]);
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"text\":\"hel").is_empty());
        assert_eq!(decoder.push(b"lo\"}\n\n"), vec!["{\"text\":\"hello\"}"]);
    }

    #[test]
    fn test_comments_and_event_lines_ignored() {
        let mut decoder = SseDecoder::new();
        let payloads =
            decoder.push(b": keep-alive\ndata: {\"x\":1}\nevent: message\ndata: {\"y\":2}\n\n");
        assert_eq!(payloads, vec!["{\"x\":1}", "{\"y\":2}"]);
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.push(b"data: {\"x\":1}\r\n\r\ndata: [DONE]\r\n");
        assert_eq!(payloads, vec!["{\"x\":1}", DONE_MARKER]);
    }

    #[test]
    fn test_finish_clears_buffer() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: {\"a\":1}");
        assert_eq!(decoder.finish(), vec!["{\"a\":1}"]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_multibyte_text_split_between_characters() {
        let mut decoder = SseDecoder::new();
        let full = "data: {\"t\":\"café\"}\n".as_bytes();
        let (a, b) = full.split_at(10);
        assert!(decoder.push(a).is_empty());
        assert_eq!(decoder.push(b), vec!["{\"t\":\"café\"}"]);
    }

    #[test]
    fn test_utf8_sequence_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let full = "data: {\"t\":\"café\"}\n".as_bytes();
        // cut right after the 0xC3 lead byte of 'é'
        let lead = full.iter().position(|&b| b == 0xC3).unwrap();
        let (a, b) = full.split_at(lead + 1);
        assert!(decoder.push(a).is_empty());
        assert_eq!(decoder.push(b), vec!["{\"t\":\"café\"}"]);
    }

    #[test]
    fn test_utf8_sequence_split_before_finish() {
        let mut decoder = SseDecoder::new();
        let full = "data: {\"t\":\"naïve ✓\"}".as_bytes();
        for byte in full {
            assert!(decoder.push(std::slice::from_ref(byte)).is_empty());
        }
        assert_eq!(decoder.finish(), vec!["{\"t\":\"naïve ✓\"}"]);
    }
}
