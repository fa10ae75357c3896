use std::path::Path;

use crate::bytecode::format_error::LoadError;
use crate::bytecode::op::{FOREIGN_MAGIC, NATIVE_MAGIC};

const HEADER_LEN: usize = 4;
const HEX_BYTES_PER_LINE: usize = 16;

/// Which header marker a module carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    /// Executable Covi bytecode.
    Native,
    /// Recognized but unsupported (Java class file).
    Foreign,
}

impl Magic {
    pub const fn value(self) -> u32 {
        match self {
            Magic::Native => NATIVE_MAGIC,
            Magic::Foreign => FOREIGN_MAGIC,
        }
    }
}

/// A compiled unit: a magic header followed by a flat instruction stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    magic: Magic,
    code: Vec<u8>,
}

impl Module {
    /// Wraps an instruction stream in a native module.
    pub fn new(code: Vec<u8>) -> Self {
        Self {
            magic: Magic::Native,
            code,
        }
    }

    /// A native module with zero instructions. Stands in for missing imports.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn magic(&self) -> Magic {
        self.magic
    }

    /// Instruction stream, header excluded.
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Parses a module from either its binary form or its hex transcription.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        let decoded;
        let bytes = if is_hex_text(bytes) {
            decoded = decode_hex(bytes)?;
            decoded.as_slice()
        } else {
            bytes
        };

        if bytes.len() < HEADER_LEN {
            return Err(LoadError::TooShort { len: bytes.len() });
        }

        let magic = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let magic = match magic {
            NATIVE_MAGIC => Magic::Native,
            FOREIGN_MAGIC => Magic::Foreign,
            other => return Err(LoadError::UnknownMagic(other)),
        };

        Ok(Self {
            magic,
            code: bytes[HEADER_LEN..].to_vec(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }

    /// Binary form: big-endian magic then the instruction stream.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.code.len());
        out.extend_from_slice(&self.magic.value().to_be_bytes());
        out.extend_from_slice(&self.code);
        out
    }

    /// Hex transcription: `0xNN` tokens, sixteen per line.
    pub fn to_hex(&self) -> String {
        let bytes = self.to_bytes();
        let mut out = String::with_capacity(bytes.len() * 5);
        for line in bytes.chunks(HEX_BYTES_PER_LINE) {
            let tokens: Vec<String> = line.iter().map(|b| format!("0x{:02X}", b)).collect();
            out.push_str(&tokens.join(" "));
            out.push('\n');
        }
        out
    }
}

/// True when every byte is a hex digit, whitespace, `x` or `X`.
///
/// Binary native modules never qualify because their first byte is `0x00`.
pub fn is_hex_text(bytes: &[u8]) -> bool {
    !bytes.is_empty()
        && bytes
            .iter()
            .all(|b| b.is_ascii_hexdigit() || b.is_ascii_whitespace() || *b == b'x' || *b == b'X')
}

/// Decodes whitespace-delimited hex tokens (optionally `0x`-prefixed).
pub fn decode_hex(text: &[u8]) -> Result<Vec<u8>, LoadError> {
    let mut digits = Vec::with_capacity(text.len());

    for token in text.split(|b| b.is_ascii_whitespace()).filter(|t| !t.is_empty()) {
        let token = token
            .strip_prefix(b"0x")
            .or_else(|| token.strip_prefix(b"0X"))
            .unwrap_or(token);

        if let Some(bad) = token.iter().find(|b| !b.is_ascii_hexdigit()) {
            return Err(LoadError::InvalidHex(format!(
                "unexpected '{}' in token '{}'",
                *bad as char,
                String::from_utf8_lossy(token)
            )));
        }
        digits.extend_from_slice(token);
    }

    if digits.len() % 2 != 0 {
        return Err(LoadError::InvalidHex("odd number of hex digits".to_string()));
    }

    Ok(digits
        .chunks(2)
        .map(|pair| (hex_value(pair[0]) << 4) | hex_value(pair[1]))
        .collect())
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        b'A'..=b'F' => digit - b'A' + 10,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native(code: &[u8]) -> Vec<u8> {
        let mut bytes = NATIVE_MAGIC.to_be_bytes().to_vec();
        bytes.extend_from_slice(code);
        bytes
    }

    #[test]
    fn test_binary_module() {
        let module = Module::from_bytes(&native(&[0x01, 0x41, 0x03])).unwrap();
        assert_eq!(module.magic(), Magic::Native);
        assert_eq!(module.code(), &[0x01, 0x41, 0x03]);
    }

    #[test]
    fn test_header_only_module_is_empty() {
        let module = Module::from_bytes(&native(&[])).unwrap();
        assert!(module.is_empty());
    }

    #[test]
    fn test_foreign_magic() {
        let module = Module::from_bytes(&[0xCA, 0xFE, 0xBA, 0xBE, 0x00]).unwrap();
        assert_eq!(module.magic(), Magic::Foreign);
    }

    #[test]
    fn test_unknown_magic() {
        let err = Module::from_bytes(&[0xFA, 0xAC, 0xBE, 0xED, 0xFF]).unwrap_err();
        assert!(matches!(err, LoadError::UnknownMagic(0xFAACBEED)));
    }

    #[test]
    fn test_too_short() {
        let err = Module::from_bytes(&[0x00, 0xDE]).unwrap_err();
        assert!(matches!(err, LoadError::TooShort { len: 2 }));
    }

    #[test]
    fn test_empty_input_is_too_short() {
        assert!(matches!(
            Module::from_bytes(&[]),
            Err(LoadError::TooShort { len: 0 })
        ));
    }

    #[test]
    fn test_hex_with_prefixes() {
        let text = b"0x00 0xDE 0xFC 0xAA\n0x01 0x41 0x03\n";
        let module = Module::from_bytes(text).unwrap();
        assert_eq!(module.code(), &[0x01, 0x41, 0x03]);
    }

    #[test]
    fn test_hex_without_prefixes_and_joined_tokens() {
        let module = Module::from_bytes(b"00DEFCAA 0141\t03").unwrap();
        assert_eq!(module.code(), &[0x01, 0x41, 0x03]);
    }

    #[test]
    fn test_hex_odd_digits() {
        let err = Module::from_bytes(b"00 DE FC AA 1").unwrap_err();
        assert!(matches!(err, LoadError::InvalidHex(_)));
    }

    #[test]
    fn test_hex_stray_x() {
        let err = Module::from_bytes(b"00 DE FC AA 0x4x").unwrap_err();
        assert!(matches!(err, LoadError::InvalidHex(_)));
    }

    #[test]
    fn test_binary_never_detected_as_hex() {
        assert!(!is_hex_text(&native(&[0x01, 0x41])));
        assert!(is_hex_text(b"0x01 0X02"));
        assert!(!is_hex_text(b""));
    }

    #[test]
    fn test_hex_transcription_round_trips() {
        let code: Vec<u8> = (0u8..40).collect();
        let module = Module::new(code);
        let text = module.to_hex();
        assert!(text.starts_with("0x00 0xDE 0xFC 0xAA"));
        assert_eq!(Module::from_bytes(text.as_bytes()).unwrap(), module);
        assert_eq!(Module::from_bytes(&module.to_bytes()).unwrap(), module);
    }

    #[test]
    fn test_from_file_missing() {
        let err = Module::from_file(Path::new("/definitely/not/here.cb")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }
}
