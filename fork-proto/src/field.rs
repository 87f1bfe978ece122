//! Token-level helpers shared by the command and event codecs.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::ProtocolError;

/// Token written in place of an absent field.
pub const NULL_FIELD: &str = "-";

/// Token separator. Base64 never produces it, so free text cannot collide.
pub const SEPARATOR: char = ':';

/// Charset token carried by frames with text fields.
pub const CHARSET: &str = "UTF-8";

/// Incrementally builds one frame: `:<magic>:<opcode>:(<token>:)*\n`.
pub(crate) struct FrameBuilder {
    buf: String,
}

impl FrameBuilder {
    pub(crate) fn new(magic: &str, opcode: &str) -> Self {
        let mut buf = String::with_capacity(64 + magic.len() + opcode.len());
        buf.push(SEPARATOR);
        let mut builder = Self { buf };
        builder.raw(magic).raw(opcode);
        builder
    }

    /// Append a token verbatim. Callers guarantee it contains no separator.
    pub(crate) fn raw(&mut self, token: &str) -> &mut Self {
        self.buf.push_str(token);
        self.buf.push(SEPARATOR);
        self
    }

    /// Append a free-text field, Base64 encoded, or `-` when absent.
    pub(crate) fn text(&mut self, value: Option<&str>) -> &mut Self {
        match value {
            Some(v) => STANDARD.encode_string(v.as_bytes(), &mut self.buf),
            None => self.buf.push_str(NULL_FIELD),
        }
        self.buf.push(SEPARATOR);
        self
    }

    /// Append a numeric field as a decimal integer, or `-` when absent.
    pub(crate) fn integer(&mut self, value: Option<u64>) -> &mut Self {
        match value {
            Some(v) => self.buf.push_str(&v.to_string()),
            None => self.buf.push_str(NULL_FIELD),
        }
        self.buf.push(SEPARATOR);
        self
    }

    pub(crate) fn finish(mut self) -> Vec<u8> {
        self.buf.push('\n');
        self.buf.into_bytes()
    }
}

/// Decode a Base64 text token. `-` decodes to `None`.
pub fn decode_text(token: &str) -> Result<Option<String>, ProtocolError> {
    if token == NULL_FIELD {
        return Ok(None);
    }
    let bytes = STANDARD
        .decode(token)
        .map_err(|_| ProtocolError::InvalidBase64(token.to_string()))?;
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|_| ProtocolError::InvalidUtf8)
}

/// Decode a numeric token. `-` decodes to `None`.
pub fn decode_integer(token: &str) -> Result<Option<u64>, ProtocolError> {
    if token == NULL_FIELD {
        return Ok(None);
    }
    token
        .parse()
        .map(Some)
        .map_err(|_| ProtocolError::InvalidInteger(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_and_empty_text_are_distinct() {
        let mut f = FrameBuilder::new("m", "op");
        f.text(None).text(Some(""));
        let frame = String::from_utf8(f.finish()).unwrap();
        assert_eq!(frame, ":m:op:-::\n");
        assert_eq!(decode_text("-").unwrap(), None);
        assert_eq!(decode_text("").unwrap(), Some(String::new()));
    }

    #[test]
    fn text_with_separator_and_newline_is_escaped() {
        let mut f = FrameBuilder::new("m", "op");
        f.text(Some("a:b\nc"));
        let frame = String::from_utf8(f.finish()).unwrap();
        let token = frame.trim_end().trim_end_matches(':').rsplit(':').next().unwrap();
        assert!(!token.contains('\n'));
        assert_eq!(decode_text(token).unwrap().as_deref(), Some("a:b\nc"));
    }

    #[test]
    fn integer_field() {
        let mut f = FrameBuilder::new("m", "op");
        f.integer(Some(1200)).integer(None);
        assert_eq!(String::from_utf8(f.finish()).unwrap(), ":m:op:1200:-:\n");
        assert_eq!(decode_integer("1200").unwrap(), Some(1200));
        assert_eq!(decode_integer("-").unwrap(), None);
        assert!(matches!(
            decode_integer("12x"),
            Err(ProtocolError::InvalidInteger(_))
        ));
    }

    #[test]
    fn rejects_bad_base64() {
        assert!(matches!(
            decode_text("***"),
            Err(ProtocolError::InvalidBase64(_))
        ));
    }
}
