//! Encoding detection and transcoding.
//!
//! Input side: a [`StreamDecoder`] sniffs the encoding of a byte stream from
//! its Byte Order Mark or XML declaration (XML 1.0 Section 4.3.3 and
//! Appendix F) and decodes it incrementally, so a multi-byte character may
//! be split across `feed` calls. Output side: [`encode_output`] turns
//! serialized text into bytes for a named encoding, writing characters the
//! encoding cannot represent as decimal character references.
//!
//! All conversions go through `encoding_rs`.

use std::fmt;

use encoding_rs::{DecoderResult, Encoding, UTF_16BE, UTF_16LE, UTF_8};

/// Bytes scanned for the end of an XML declaration before giving up on it.
const DECL_SCAN_LIMIT: usize = 1024;

/// An error that occurs during encoding detection or transcoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingError {
    /// A human-readable description of the encoding error.
    pub message: String,
}

impl EncodingError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "encoding error: {}", self.message)
    }
}

impl std::error::Error for EncodingError {}

/// Looks up an encoding by label.
///
/// # Errors
///
/// Returns `EncodingError` if the label is unknown.
pub fn lookup(label: &str) -> Result<&'static Encoding, EncodingError> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| EncodingError::new(format!("unknown encoding: {label}")))
}

/// Detects the encoding of an XML byte stream from its first bytes.
///
/// Returns the encoding and whether it was signalled by a Byte Order Mark:
/// - `EF BB BF` -> UTF-8 (BOM)
/// - `FE FF` -> UTF-16BE (BOM)
/// - `FF FE` -> UTF-16LE (BOM)
/// - `3C 00 3F 00` / `00 3C 00 3F` -> UTF-16LE / UTF-16BE without BOM
/// - anything else -> `None` (ASCII-compatible; check the declaration)
///
/// # Examples
///
/// ```
/// use etree_oxide::encoding::detect_encoding;
///
/// let (enc, bom) = detect_encoding(b"\xEF\xBB\xBFhello").unwrap();
/// assert_eq!(enc.name(), "UTF-8");
/// assert!(bom);
/// assert!(detect_encoding(b"<root/>").is_none());
/// ```
#[must_use]
pub fn detect_encoding(bytes: &[u8]) -> Option<(&'static Encoding, bool)> {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return Some((encoding, true));
    }
    match bytes {
        [0x3C, 0x00, 0x3F, 0x00, ..] => Some((UTF_16LE, false)),
        [0x00, 0x3C, 0x00, 0x3F, ..] => Some((UTF_16BE, false)),
        _ => None,
    }
}

/// Extracts the `encoding` pseudo-attribute of an XML declaration from raw
/// bytes read as ASCII. Returns `None` without a declaration or attribute.
fn declared_encoding(bytes: &[u8]) -> Option<String> {
    if !bytes.starts_with(b"<?xml") {
        return None;
    }
    let decl_end = bytes.windows(2).position(|w| w == b"?>")?;
    let decl = &bytes[..decl_end];

    let needle = b"encoding";
    let enc_pos = decl.windows(needle.len()).position(|w| w == needle)?;
    let after_enc = skip_ascii_whitespace(&decl[enc_pos + needle.len()..]);
    let after_eq = skip_ascii_whitespace(after_enc.strip_prefix(b"=")?);

    let quote = *after_eq.first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let after_quote = &after_eq[1..];
    let end = after_quote.iter().position(|&b| b == quote)?;
    let label = &after_quote[..end];

    label
        .iter()
        .all(u8::is_ascii)
        .then(|| String::from_utf8_lossy(label).into_owned())
}

/// Skips leading ASCII whitespace bytes (space, tab, CR, LF).
fn skip_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let skip = bytes
        .iter()
        .take_while(|&&b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
        .count();
    &bytes[skip..]
}

/// Incremental decoder from the source encoding to UTF-8.
///
/// Bytes are buffered until the encoding can be determined: an explicit
/// encoding is used as is; otherwise a BOM wins, then the XML declaration,
/// then UTF-8.
pub struct StreamDecoder {
    forced: Option<&'static Encoding>,
    decoder: Option<encoding_rs::Decoder>,
    pending: Vec<u8>,
}

impl StreamDecoder {
    /// Creates a decoder that sniffs the encoding from the input.
    #[must_use]
    pub fn new() -> Self {
        Self {
            forced: None,
            decoder: None,
            pending: Vec::new(),
        }
    }

    /// Creates a decoder that ignores BOM and declaration and decodes with
    /// the encoding named by `label`.
    ///
    /// # Errors
    ///
    /// Returns `EncodingError` if `label` is unknown.
    pub fn with_encoding(label: &str) -> Result<Self, EncodingError> {
        Ok(Self {
            forced: Some(lookup(label)?),
            ..Self::new()
        })
    }

    /// The encoding in use, once it has been determined.
    #[must_use]
    pub fn encoding(&self) -> Option<&'static Encoding> {
        self.decoder.as_ref().map(encoding_rs::Decoder::encoding)
    }

    /// Decodes the next chunk. With `last` set, the stream is finished and
    /// any incomplete trailing sequence is an error.
    ///
    /// # Errors
    ///
    /// Returns `EncodingError` for an unknown declared encoding or a byte
    /// sequence that is malformed in the source encoding.
    pub fn decode(&mut self, bytes: &[u8], last: bool) -> Result<String, EncodingError> {
        if self.decoder.is_some() {
            return self.run(bytes, last);
        }
        self.pending.extend_from_slice(bytes);
        let Some(decoder) = self.sniff(last)? else {
            return Ok(String::new());
        };
        tracing::debug!(encoding = decoder.encoding().name(), "selected input encoding");
        self.decoder = Some(decoder);
        let input = std::mem::take(&mut self.pending);
        self.run(&input, last)
    }

    /// Picks a decoder for the buffered prefix, or `None` to wait for more.
    fn sniff(&self, last: bool) -> Result<Option<encoding_rs::Decoder>, EncodingError> {
        if let Some(forced) = self.forced {
            return Ok(Some(forced.new_decoder_with_bom_removal()));
        }
        let pending = &self.pending;
        if !last && pending.len() < 4 {
            return Ok(None);
        }
        if let Some((encoding, bom)) = detect_encoding(pending) {
            let decoder = if bom {
                encoding.new_decoder_with_bom_removal()
            } else {
                encoding.new_decoder_without_bom_handling()
            };
            return Ok(Some(decoder));
        }
        if !last && pending.len() < 5 && b"<?xml".starts_with(pending) {
            return Ok(None);
        }
        if pending.starts_with(b"<?xml")
            && !last
            && pending.len() < DECL_SCAN_LIMIT
            && !pending.windows(2).any(|w| w == b"?>")
        {
            return Ok(None);
        }
        let scan = &pending[..pending.len().min(DECL_SCAN_LIMIT)];
        let encoding = match declared_encoding(scan) {
            // A UTF-16 declaration cannot apply to ASCII-compatible bytes.
            Some(label) => match lookup(&label)? {
                enc if enc == UTF_16LE || enc == UTF_16BE => UTF_8,
                enc => enc,
            },
            None => UTF_8,
        };
        Ok(Some(encoding.new_decoder_without_bom_handling()))
    }

    fn run(&mut self, mut src: &[u8], last: bool) -> Result<String, EncodingError> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(String::new());
        };
        let mut out = String::with_capacity(
            decoder
                .max_utf8_buffer_length_without_replacement(src.len())
                .unwrap_or(src.len() * 3 + 16),
        );
        loop {
            let (result, read) = decoder.decode_to_string_without_replacement(src, &mut out, last);
            src = &src[read..];
            match result {
                DecoderResult::InputEmpty => return Ok(out),
                DecoderResult::OutputFull => out.reserve(src.len() * 3 + 16),
                DecoderResult::Malformed(_, _) => {
                    return Err(EncodingError::new(format!(
                        "malformed byte sequence for encoding {}",
                        decoder.encoding().name()
                    )))
                }
            }
        }
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StreamDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamDecoder")
            .field("forced", &self.forced.map(Encoding::name))
            .field("encoding", &self.encoding().map(Encoding::name))
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Decodes a complete byte buffer from the named encoding. A BOM, if
/// present, takes precedence over the label.
///
/// # Errors
///
/// Returns `EncodingError` if the label is unknown or the input is malformed.
///
/// # Examples
///
/// ```
/// use etree_oxide::encoding::transcode;
///
/// assert_eq!(transcode(b"caf\xE9", "latin-1").unwrap(), "café");
/// ```
pub fn transcode(bytes: &[u8], label: &str) -> Result<String, EncodingError> {
    let encoding = lookup(label)?;
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        return Err(EncodingError::new(format!(
            "malformed byte sequence for encoding {}",
            used.name()
        )));
    }
    Ok(text.into_owned())
}

/// Returns `true` for labels that name UTF-8.
#[must_use]
pub fn is_utf8_label(label: &str) -> bool {
    matches!(label.to_ascii_lowercase().as_str(), "utf-8" | "utf8")
}

/// Returns `true` for labels that name 7-bit ASCII.
#[must_use]
pub fn is_ascii_label(label: &str) -> bool {
    matches!(
        label.to_ascii_lowercase().as_str(),
        "us-ascii" | "ascii" | "ansi_x3.4-1968" | "iso646-us"
    )
}

/// Encodes serialized text for output in the named encoding.
///
/// Characters the encoding cannot represent become decimal character
/// references (`&#233;`). ASCII is handled here rather than by
/// `encoding_rs`, whose `us-ascii` label denotes windows-1252. UTF-16
/// labels produce UTF-8, as `encoding_rs` does not encode to UTF-16.
///
/// # Errors
///
/// Returns `EncodingError` if the label is unknown.
pub fn encode_output(text: &str, label: &str) -> Result<Vec<u8>, EncodingError> {
    if is_utf8_label(label) {
        return Ok(text.as_bytes().to_vec());
    }
    if is_ascii_label(label) {
        return Ok(ascii_with_char_refs(text).into_bytes());
    }
    let (bytes, _, _) = lookup(label)?.encode(text);
    Ok(bytes.into_owned())
}

/// Replaces every non-ASCII character with a decimal character reference.
#[must_use]
pub fn ascii_with_char_refs(text: &str) -> String {
    if text.is_ascii() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len() + 16);
    for ch in text.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            out.push_str(&format!("&#{};", u32::from(ch)));
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_detect_utf16le_bom() {
        let bytes = b"\xFF\xFE<\x00r\x00";
        let (encoding, bom) = detect_encoding(bytes).unwrap();
        assert_eq!(encoding, UTF_16LE);
        assert!(bom);
    }

    #[test]
    fn test_detect_utf16_without_bom() {
        let (encoding, bom) = detect_encoding(b"\x00<\x00?\x00x").unwrap();
        assert_eq!(encoding, UTF_16BE);
        assert!(!bom);
    }

    #[test]
    fn test_declared_encoding() {
        assert_eq!(
            declared_encoding(b"<?xml version='1.0' encoding = \"ISO-8859-1\"?><a/>"),
            Some("ISO-8859-1".to_string())
        );
        assert_eq!(declared_encoding(b"<?xml version='1.0'?><a/>"), None);
        assert_eq!(declared_encoding(b"<a/>"), None);
    }

    #[test]
    fn test_stream_decoder_splits_multibyte_char() {
        let mut decoder = StreamDecoder::new();
        let bytes = "<a>é</a>".as_bytes();
        let mut text = String::new();
        for chunk in bytes.chunks(1) {
            text.push_str(&decoder.decode(chunk, false).unwrap());
        }
        text.push_str(&decoder.decode(&[], true).unwrap());
        assert_eq!(text, "<a>é</a>");
        assert_eq!(decoder.encoding(), Some(UTF_8));
    }

    #[test]
    fn test_stream_decoder_uses_declaration() {
        let mut decoder = StreamDecoder::new();
        let text = decoder
            .decode(b"<?xml version='1.0' encoding='latin-1'?><a>\xE9</a>", true)
            .unwrap();
        assert!(text.ends_with("<a>é</a>"));
    }

    #[test]
    fn test_stream_decoder_strips_bom() {
        let mut decoder = StreamDecoder::new();
        let text = decoder.decode(b"\xEF\xBB\xBF<a/>", true).unwrap();
        assert_eq!(text, "<a/>");
    }

    #[test]
    fn test_stream_decoder_forced_encoding() {
        let mut decoder = StreamDecoder::with_encoding("latin-1").unwrap();
        let text = decoder
            .decode(b"<?xml version='1.0' encoding='utf-8'?><a>\xE9</a>", true)
            .unwrap();
        assert!(text.ends_with("<a>é</a>"));
    }

    #[test]
    fn test_stream_decoder_errors() {
        assert!(StreamDecoder::with_encoding("no-such-encoding").is_err());
        let mut decoder = StreamDecoder::new();
        assert!(decoder.decode(b"<a>\xFF\xFE\xFD</a>", true).is_err());
        let mut decoder = StreamDecoder::new();
        assert!(decoder
            .decode(b"<?xml version='1.0' encoding='klingon'?><a/>", true)
            .is_err());
    }

    #[test]
    fn test_encode_output() {
        assert_eq!(encode_output("é<", "us-ascii").unwrap(), b"&#233;<".to_vec());
        assert_eq!(encode_output("é", "utf-8").unwrap(), "é".as_bytes().to_vec());
        assert_eq!(encode_output("é", "iso-8859-1").unwrap(), vec![0xE9]);
        assert_eq!(
            encode_output("\u{2603}", "iso-8859-1").unwrap(),
            b"&#9731;".to_vec()
        );
        assert!(encode_output("x", "klingon").is_err());
    }

    #[test]
    fn test_transcode() {
        assert_eq!(transcode(b"hello", "UTF-8").unwrap(), "hello");
        assert!(transcode(b"x", "klingon").is_err());
    }
}
