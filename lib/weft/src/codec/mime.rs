use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// The whole-line sentinel that closes one framed message.
pub const MESSAGE_SEPARATOR: &str = "end-of-message";

const LINE_WIDTH: usize = 72;

/// Encode a message body into printable lines joined by newlines, closed by
/// the sentinel line. This framing is what delimits one message on the
/// wire; the bytes beneath it are the binary message format.
pub fn package(bytes: &[u8]) -> String {
    let encoded = STANDARD.encode(bytes);
    let mut framed = String::with_capacity(encoded.len() + encoded.len() / LINE_WIDTH + MESSAGE_SEPARATOR.len() + 2);

    for line in encoded.as_bytes().chunks(LINE_WIDTH) {
        framed.push_str(std::str::from_utf8(line).expect("Base64 output is ASCII"));
        framed.push('\n');
    }
    framed.push_str(MESSAGE_SEPARATOR);
    framed.push('\n');

    framed
}

/// Strip one sentinel line (and its preceding newline) and decode the
/// remaining lines. None for anything that is not one whole framed message.
pub fn unpackage(text: &str) -> Option<Vec<u8>> {
    let body = text.strip_suffix('\n').unwrap_or(text);
    let body = body.strip_suffix(MESSAGE_SEPARATOR)?;
    let body = body.strip_suffix('\n').unwrap_or(body);
    let compact: String = body.chars().filter(|character| *character != '\n').collect();

    STANDARD.decode(compact.as_bytes()).ok()
}

/// Incremental whole-line recognizer for the sentinel, for receivers that
/// see the stream one chunk at a time.
pub struct SeparatorScanner {
    matched: usize,
    candidate: bool,
}

impl SeparatorScanner {
    #[inline]
    pub fn new() -> SeparatorScanner {
        SeparatorScanner {
            matched: 0,
            candidate: true,
        }
    }

    #[inline]
    pub fn reset(&mut self) {
        self.matched = 0;
        self.candidate = true;
    }

    /// Feed one byte; true exactly when the byte completes a sentinel line.
    pub fn feed(&mut self, byte: u8) -> bool {
        let separator = MESSAGE_SEPARATOR.as_bytes();

        if byte == b'\n' {
            let hit = self.candidate && self.matched == separator.len();

            self.matched = 0;
            self.candidate = true;
            return hit;
        }

        if self.candidate {
            if self.matched < separator.len() && byte == separator[self.matched] {
                self.matched += 1;
            } else {
                self.candidate = false;
            }
        }

        false
    }
}

/// Scan a byte stream for the sentinel line. Returns the number of bytes
/// consumed up to and including the sentinel's newline, or None if the
/// stream ran out first.
pub fn match_message_separator<I: Iterator<Item = u8>>(bytes: I) -> Option<usize> {
    let mut scanner = SeparatorScanner::new();

    for (index, byte) in bytes.enumerate() {
        if scanner.feed(byte) {
            return Some(index + 1);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_shape() {
        let framed = package(b"hello");

        assert!(framed.ends_with("end-of-message\n"));
        assert_eq!(framed.lines().last(), Some(MESSAGE_SEPARATOR));
    }

    #[test]
    fn test_package_unpackage_roundtrip() {
        for length in &[0usize, 1, 53, 54, 55, 200, 4096] {
            let bytes: Vec<u8> = (0..*length).map(|ii| ii as u8).collect();
            let framed = package(&bytes);

            assert_eq!(unpackage(&framed), Some(bytes));
        }
    }

    #[test]
    fn test_long_bodies_split_into_lines() {
        let bytes = vec![0xAB; 300];
        let framed = package(&bytes);

        for line in framed.lines() {
            assert!(line.len() <= LINE_WIDTH);
        }
    }

    #[test]
    fn test_unpackage_requires_sentinel() {
        assert_eq!(unpackage("aGVsbG8=\n"), None);
    }

    #[test]
    fn test_scanner_finds_whole_line_sentinel_only() {
        let mut scanner = SeparatorScanner::new();
        let mut hits = 0;

        // The sentinel text embedded mid-line must not trigger.
        for byte in b"xxend-of-message\nend-of-message\nmore\n" {
            if scanner.feed(*byte) {
                hits += 1;
            }
        }

        assert_eq!(hits, 1);
    }

    #[test]
    fn test_scanner_across_chunk_boundaries() {
        let framed = package(&[7; 100]);
        let (head, tail) = framed.as_bytes().split_at(framed.len() / 2);
        let mut scanner = SeparatorScanner::new();
        let mut hits = 0;

        for byte in head.iter().chain(tail.iter()) {
            if scanner.feed(*byte) {
                hits += 1;
            }
        }

        assert_eq!(hits, 1);
    }

    #[test]
    fn test_match_message_separator_position() {
        let framed = package(&[1, 2, 3]);
        let consumed = match_message_separator(framed.bytes()).unwrap();

        assert_eq!(consumed, framed.len());
        assert_eq!(match_message_separator(b"no sentinel here".iter().copied()), None);
    }
}
