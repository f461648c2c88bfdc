//! Response content parts.
//!
//! Content is a tagged union of the payload kinds a tool, prompt or resource can
//! return. Each variant carries a MIME type; when none was supplied the
//! variant's default is reported, so [`Content::mime_type`] is never empty.
//! Binary payloads are held as raw bytes and base64-encoded only at the wire.

use base64::Engine as _;

use crate::error::{Error, Result};

pub const DEFAULT_TEXT_MIME: &str = "text/plain";
pub const DEFAULT_IMAGE_MIME: &str = "image/png";
pub const DEFAULT_AUDIO_MIME: &str = "audio/wav";
pub const DEFAULT_FILE_MIME: &str = "application/octet-stream";
pub const DEFAULT_RESOURCE_MIME: &str = "application/octet-stream";

/// Discriminator of a [`Content`] part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Image,
    Resource,
    Audio,
    File,
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentKind::Text => write!(f, "text"),
            ContentKind::Image => write!(f, "image"),
            ContentKind::Resource => write!(f, "resource"),
            ContentKind::Audio => write!(f, "audio"),
            ContentKind::File => write!(f, "file"),
        }
    }
}

/// Plain text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextContent {
    pub text: String,
    pub mime_type: Option<String>,
}

/// Image bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageContent {
    pub data: Vec<u8>,
    pub mime_type: Option<String>,
    pub uri: Option<String>,
    pub alt_text: Option<String>,
}

/// Audio bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioContent {
    pub data: Vec<u8>,
    pub mime_type: Option<String>,
    pub uri: Option<String>,
}

/// An arbitrary file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileContent {
    pub data: Vec<u8>,
    pub mime_type: Option<String>,
    pub name: Option<String>,
    pub path: Option<String>,
    pub size: Option<u64>,
}

/// A reference to (and optionally the body of) a resource.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceContent {
    pub uri: String,
    pub mime_type: Option<String>,
    pub text: Option<String>,
    pub blob: Option<Vec<u8>>,
}

/// A single part of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(TextContent),
    Image(ImageContent),
    Resource(ResourceContent),
    Audio(AudioContent),
    File(FileContent),
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text(TextContent {
            text: text.into(),
            mime_type: None,
        })
    }

    pub fn image(data: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Content::Image(ImageContent {
            data: data.into(),
            mime_type: Some(mime_type.into()),
            ..Default::default()
        })
    }

    pub fn audio(data: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Content::Audio(AudioContent {
            data: data.into(),
            mime_type: Some(mime_type.into()),
            uri: None,
        })
    }

    pub fn file(data: impl Into<Vec<u8>>, name: impl Into<String>) -> Self {
        let data = data.into();
        let size = data.len() as u64;
        Content::File(FileContent {
            data,
            name: Some(name.into()),
            size: Some(size),
            ..Default::default()
        })
    }

    /// A resource reference with no inline body.
    pub fn resource(uri: impl Into<String>) -> Self {
        Content::Resource(ResourceContent {
            uri: uri.into(),
            ..Default::default()
        })
    }

    /// A resource with an inline text body.
    pub fn resource_text(uri: impl Into<String>, text: impl Into<String>) -> Self {
        Content::Resource(ResourceContent {
            uri: uri.into(),
            text: Some(text.into()),
            ..Default::default()
        })
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            Content::Text(_) => ContentKind::Text,
            Content::Image(_) => ContentKind::Image,
            Content::Resource(_) => ContentKind::Resource,
            Content::Audio(_) => ContentKind::Audio,
            Content::File(_) => ContentKind::File,
        }
    }

    /// MIME type of this part, falling back to the variant default.
    pub fn mime_type(&self) -> &str {
        let explicit = match self {
            Content::Text(c) => c.mime_type.as_deref(),
            Content::Image(c) => c.mime_type.as_deref(),
            Content::Resource(c) => c.mime_type.as_deref(),
            Content::Audio(c) => c.mime_type.as_deref(),
            Content::File(c) => c.mime_type.as_deref(),
        };
        match explicit {
            Some(m) if !m.is_empty() => m,
            _ => match self {
                Content::Text(_) => DEFAULT_TEXT_MIME,
                Content::Image(_) => DEFAULT_IMAGE_MIME,
                Content::Audio(_) => DEFAULT_AUDIO_MIME,
                Content::File(_) => DEFAULT_FILE_MIME,
                Content::Resource(r) if r.text.is_some() => DEFAULT_TEXT_MIME,
                Content::Resource(_) => DEFAULT_RESOURCE_MIME,
            },
        }
    }

    /// Text payload, if this is a text part or a text resource.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(c) => Some(&c.text),
            Content::Resource(r) => r.text.as_deref(),
            _ => None,
        }
    }

    /// Raw bytes for binary parts.
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Content::Image(c) => Some(&c.data),
            Content::Audio(c) => Some(&c.data),
            Content::File(c) => Some(&c.data),
            Content::Resource(r) => r.blob.as_deref(),
            Content::Text(_) => None,
        }
    }
}

/// Encode bytes as standard base64.
pub fn encode_base64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Decode standard base64.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| Error::DecodeFailure(format!("invalid base64: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_defaults() {
        assert_eq!(Content::text("hi").mime_type(), "text/plain");
        assert_eq!(
            Content::Image(ImageContent::default()).mime_type(),
            DEFAULT_IMAGE_MIME
        );
        assert_eq!(
            Content::Audio(AudioContent::default()).mime_type(),
            DEFAULT_AUDIO_MIME
        );
        assert_eq!(Content::file(vec![1, 2], "a.bin").mime_type(), DEFAULT_FILE_MIME);
        assert_eq!(Content::resource("file:///x").mime_type(), DEFAULT_RESOURCE_MIME);
        assert_eq!(
            Content::resource_text("file:///x", "body").mime_type(),
            DEFAULT_TEXT_MIME
        );
    }

    #[test]
    fn test_empty_mime_falls_back() {
        let c = Content::Image(ImageContent {
            mime_type: Some(String::new()),
            ..Default::default()
        });
        assert_eq!(c.mime_type(), DEFAULT_IMAGE_MIME);
    }

    #[test]
    fn test_explicit_mime_wins() {
        assert_eq!(Content::image(vec![0u8], "image/jpeg").mime_type(), "image/jpeg");
    }

    #[test]
    fn test_file_records_size() {
        match Content::file(vec![0u8; 42], "blob.bin") {
            Content::File(f) => assert_eq!(f.size, Some(42)),
            other => panic!("expected file, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Content::text("hello").as_text(), Some("hello"));
        assert_eq!(Content::image(vec![9u8, 8], "image/png").bytes(), Some(&[9u8, 8][..]));
        assert!(Content::text("x").bytes().is_none());
        assert_eq!(Content::resource("file:///a").kind(), ContentKind::Resource);
    }

    #[test]
    fn test_base64() {
        let encoded = encode_base64(b"hello");
        assert_eq!(encoded, "aGVsbG8=");
        assert_eq!(decode_base64(&encoded).unwrap(), b"hello");
        assert!(matches!(
            decode_base64("not base64!!"),
            Err(Error::DecodeFailure(_))
        ));
    }
}
