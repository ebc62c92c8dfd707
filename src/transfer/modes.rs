//! FTP Transfer modes
//!
//! Representation types, data-channel modes, and the newline translation
//! applied to file bodies in text mode.

/// Representation type in effect for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferType {
    Text,
    #[default]
    Binary,
}

impl TransferType {
    /// The single-letter code used by `TYPE`.
    pub fn code(&self) -> &'static str {
        match self {
            TransferType::Text => "A",
            TransferType::Binary => "I",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_uppercase().as_str() {
            "A" => Some(TransferType::Text),
            "I" => Some(TransferType::Binary),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TransferType::Text => "ASCII",
            TransferType::Binary => "BINARY",
        }
    }
}

/// How the current data channel was negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataChannelMode {
    #[default]
    None,
    /// Listener-offered (PASV).
    Listener,
    /// Connector-offered (PORT).
    Connector,
}

/// Converts CRLF to LF across chunk boundaries.
#[derive(Debug, Default)]
pub struct CrlfDecoder {
    pending_cr: bool,
}

impl CrlfDecoder {
    pub fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for &byte in input {
            if self.pending_cr {
                self.pending_cr = false;
                if byte != b'\n' {
                    out.push(b'\r');
                }
            }
            if byte == b'\r' {
                self.pending_cr = true;
                continue;
            }
            out.push(byte);
        }
    }

    /// Emits a trailing lone CR held back from the last chunk.
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        if std::mem::take(&mut self.pending_cr) {
            out.push(b'\r');
        }
    }
}

/// Converts bare LF to CRLF across chunk boundaries.
#[derive(Debug, Default)]
pub struct CrlfEncoder {
    last_was_cr: bool,
}

impl CrlfEncoder {
    pub fn encode(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for &byte in input {
            if byte == b'\n' && !self.last_was_cr {
                out.push(b'\r');
            }
            out.push(byte);
            self.last_was_cr = byte == b'\r';
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_is_the_session_default() {
        assert_eq!(TransferType::default(), TransferType::Binary);
        assert_eq!(TransferType::from_code("a"), Some(TransferType::Text));
        assert_eq!(TransferType::from_code("E"), None);
    }

    #[test]
    fn decoder_handles_crlf_split_across_chunks() {
        let mut decoder = CrlfDecoder::default();
        let mut out = Vec::new();
        decoder.decode(b"one\r", &mut out);
        decoder.decode(b"\ntwo\r\r\n", &mut out);
        decoder.decode(b"lone\rcr\r", &mut out);
        decoder.finish(&mut out);
        assert_eq!(out, b"one\ntwo\r\nlone\rcr\r");
    }

    #[test]
    fn encoder_leaves_existing_crlf_alone() {
        let mut encoder = CrlfEncoder::default();
        let mut out = Vec::new();
        encoder.encode(b"a\nb\r", &mut out);
        encoder.encode(b"\nc\n", &mut out);
        assert_eq!(out, b"a\r\nb\r\nc\r\n");
    }
}
