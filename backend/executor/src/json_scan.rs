//! Incremental top-level JSON object scanner.
//!
//! Asynchronous plugins are acknowledged on the first complete JSON object
//! their stdout produces, which may arrive long before EOF. This scanner
//! tracks brace depth through string and escape state over raw bytes so the
//! ack can fire without waiting for the process to exit.

/// Feed bytes in; the first complete `{...}` object comes back once.
#[derive(Debug, Default)]
pub struct JsonScanner {
    buf: Vec<u8>,
    depth: u32,
    in_string: bool,
    escaped: bool,
    started: bool,
    done: bool,
}

impl JsonScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk; returns the object's text the first time one closes.
    pub fn push(&mut self, chunk: &[u8]) -> Option<String> {
        if self.done {
            return None;
        }
        for &b in chunk {
            if !self.started {
                // Skip leading noise until the first opening brace.
                if b == b'{' {
                    self.started = true;
                    self.depth = 1;
                    self.buf.push(b);
                }
                continue;
            }
            self.buf.push(b);
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' => self.depth += 1,
                b'}' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        self.done = true;
                        return Some(String::from_utf8_lossy(&self.buf).into_owned());
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Bytes buffered so far (diagnostics on EOF without a complete object).
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}
