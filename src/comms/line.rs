//! Command line assembly from the received byte stream.

/// Line buffer size, including the terminator slot.
pub const LINE_CAPACITY: usize = 80;

/// Highest write position before a line is force-terminated.
const FORCE_AFTER: usize = 78;

/// Collects received bytes into command lines.
///
/// A line ends at CR or LF. When more than 78 characters have accumulated the next byte
/// terminates the line instead of being stored, so overlong input is split, never
/// overrun. The delimiter itself is never part of the line.
#[derive(Debug, Default)]
pub struct LineAssembler {
    line: Vec<u8>,
}

impl LineAssembler {
    /// Empty assembler.
    pub fn new() -> Self {
        Self {
            line: Vec::with_capacity(LINE_CAPACITY),
        }
    }

    /// Feed one byte; returns a finished line if this byte completed one.
    ///
    /// Empty lines (the LF of a CRLF pair) are not reported.
    pub fn push(&mut self, byte: u8) -> Option<String> {
        if byte == b'\r' || byte == b'\n' || self.line.len() > FORCE_AFTER {
            if self.line.is_empty() {
                return None;
            }
            let text = String::from_utf8_lossy(&self.line).into_owned();
            self.line.clear();
            return Some(text);
        }
        self.line.push(byte);
        None
    }

    /// Characters held for the line in progress.
    pub fn pending(&self) -> usize {
        self.line.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(asm: &mut LineAssembler, bytes: &[u8]) -> Vec<String> {
        bytes.iter().filter_map(|b| asm.push(*b)).collect()
    }

    #[test]
    fn crlf_yields_one_line() {
        let mut asm = LineAssembler::new();
        assert_eq!(feed(&mut asm, b"aS12\r\n"), vec!["aS12".to_string()]);
        assert_eq!(asm.pending(), 0);
    }

    #[test]
    fn bare_lf_and_cr_both_terminate() {
        let mut asm = LineAssembler::new();
        assert_eq!(feed(&mut asm, b"aE\naP\r"), vec!["aE", "aP"]);
    }

    #[test]
    fn overlong_line_is_forced_at_79_characters() {
        let mut asm = LineAssembler::new();
        let input = vec![b'x'; 85];
        let lines = feed(&mut asm, &input);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), 79);
        // The byte that forced the line is discarded.
        assert_eq!(asm.pending(), 85 - 80);
    }

    #[test]
    fn partial_line_is_held() {
        let mut asm = LineAssembler::new();
        assert!(feed(&mut asm, b"fW te").is_empty());
        assert_eq!(feed(&mut asm, b"st.txt\r"), vec!["fW test.txt"]);
    }
}
