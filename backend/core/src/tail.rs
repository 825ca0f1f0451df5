/// Bounded text tail.
///
/// Keeps the last `cap` bytes of whatever is pushed into it, trimming from
/// the front on a line boundary where possible. Used to retain plugin stderr
/// for diagnostics without unbounded growth.
#[derive(Debug, Clone)]
pub struct LogTail {
    cap: usize,
    buf: String,
}

/// Default capacity for per-invocation stderr tails.
pub const DEFAULT_STDERR_TAIL_BYTES: usize = 4096;

impl LogTail {
    pub fn new(cap: usize) -> Self {
        Self { cap, buf: String::new() }
    }

    pub fn push(&mut self, chunk: &str) {
        self.buf.push_str(chunk);
        if self.buf.len() > self.cap {
            let cut = self.buf.len() - self.cap;
            // Prefer dropping whole lines; fall back to the nearest char.
            let boundary = match self.buf[cut..].find('\n') {
                Some(nl) => cut + nl + 1,
                None => {
                    let mut b = cut;
                    while !self.buf.is_char_boundary(b) {
                        b += 1;
                    }
                    b
                }
            };
            self.buf.drain(..boundary);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn into_string(self) -> String {
        self.buf
    }
}

impl Default for LogTail {
    fn default() -> Self {
        Self::new(DEFAULT_STDERR_TAIL_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_everything_under_cap() {
        let mut tail = LogTail::new(64);
        tail.push("line one\n");
        tail.push("line two\n");
        assert_eq!(tail.as_str(), "line one\nline two\n");
    }

    #[test]
    fn trims_from_front_on_line_boundary() {
        let mut tail = LogTail::new(16);
        tail.push("aaaaaaaa\n");
        tail.push("bbbbbbbb\n");
        tail.push("cccc\n");
        assert!(tail.as_str().len() <= 16);
        assert!(tail.as_str().ends_with("cccc\n"));
        assert!(!tail.as_str().contains('a'));
    }

    #[test]
    fn handles_long_unbroken_chunk() {
        let mut tail = LogTail::new(8);
        tail.push(&"x".repeat(100));
        assert_eq!(tail.as_str().len(), 8);
    }
}
