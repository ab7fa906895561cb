//! Minimal AT firmware personality.
//!
//! Just enough of the text protocol to exercise the Running-mode routing
//! path: echo each command line and close with a terminal `OK`, or `ERROR`
//! for lines the firmware would reject.

/// The AT firmware personality.
#[derive(Debug, Default)]
pub struct AtPeer {
    partial: Vec<u8>,
    commands_seen: Vec<String>,
}

impl AtPeer {
    /// Command lines received so far.
    pub fn commands_seen(&self) -> &[String] {
        &self.commands_seen
    }

    /// Drop any partial line (fresh reset).
    pub fn reset_session(&mut self) {
        self.partial.clear();
    }

    /// Feed host bytes; returns the reply bytes.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for &byte in bytes {
            if byte != b'\n' {
                self.partial.push(byte);
                continue;
            }
            let raw = std::mem::take(&mut self.partial);
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            self.commands_seen.push(line.to_string());
            if line.starts_with("AT") {
                out.extend_from_slice(line.as_bytes());
                out.extend_from_slice(b"\r\nOK\r\n");
            } else {
                out.extend_from_slice(b"ERROR\r\n");
            }
        }
        out
    }
}
