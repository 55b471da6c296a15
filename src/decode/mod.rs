//! Base64 payload decoding with content sniffing.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use bytes::Bytes;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("No Base64 data provided")]
    Empty,
    #[error("Malformed data URI: {0}")]
    MalformedDataUri(String),
    #[error("Invalid Base64 length: {length} characters cannot encode whole bytes")]
    InvalidLength { length: usize },
    #[error("Invalid Base64 data: {0}")]
    InvalidData(String),
}

/// Padding is restored before decoding; stray trailing bits are tolerated.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::RequireCanonical),
);

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    pub data: Bytes,
    /// MIME type from the data URI, else from signature sniffing.
    pub mime: Option<String>,
}

impl DecodedPayload {
    /// File extension suitable for downloading the payload.
    pub fn extension(&self) -> &'static str {
        self.mime
            .as_deref()
            .and_then(extension_for_mime)
            .unwrap_or("bin")
    }
}

/// Decode a Base64 string as pasted by a user.
///
/// Accepts an optional `data:<mime>;base64,` prefix, embedded whitespace,
/// the URL-safe alphabet and missing or wrong trailing padding.
pub fn decode_base64(input: &str) -> Result<DecodedPayload, DecodeError> {
    let trimmed = input.trim();
    let (declared_mime, body) = split_data_uri(trimmed)?;

    let mut normalized: String = body
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    while normalized.ends_with('=') {
        normalized.pop();
    }

    if normalized.is_empty() {
        return Err(DecodeError::Empty);
    }

    if normalized.len() % 4 == 1 {
        return Err(DecodeError::InvalidLength {
            length: normalized.len(),
        });
    }

    while normalized.len() % 4 != 0 {
        normalized.push('=');
    }

    let decoded = LENIENT
        .decode(normalized.as_bytes())
        .map_err(|e| DecodeError::InvalidData(e.to_string()))?;

    let mime = declared_mime.or_else(|| sniff_mime(&decoded).map(str::to_string));
    tracing::debug!(
        "Decoded {} bytes of Base64 ({})",
        decoded.len(),
        mime.as_deref().unwrap_or("unknown type")
    );

    Ok(DecodedPayload {
        data: Bytes::from(decoded),
        mime,
    })
}

fn split_data_uri(input: &str) -> Result<(Option<String>, &str), DecodeError> {
    let rest = match input.get(..5) {
        Some(scheme) if scheme.eq_ignore_ascii_case("data:") => &input[5..],
        _ => return Ok((None, input)),
    };

    let (header, body) = rest
        .split_once(',')
        .ok_or_else(|| DecodeError::MalformedDataUri("missing ',' separator".to_string()))?;

    let mut parts = header.split(';');
    let mime = parts
        .next()
        .map(str::trim)
        .filter(|mime| !mime.is_empty())
        .map(|mime| mime.to_lowercase());

    if !parts.any(|part| part.trim().eq_ignore_ascii_case("base64")) {
        return Err(DecodeError::MalformedDataUri(
            "payload is not marked as base64".to_string(),
        ));
    }

    Ok((mime, body))
}

/// Classify a payload by its magic bytes.
pub fn sniff_mime(data: &[u8]) -> Option<&'static str> {
    infer::get(data).map(|kind| kind.mime_type())
}

pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let ext = match mime {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" | "image/x-ms-bmp" => "bmp",
        "image/jp2" => "jp2",
        "image/avif" => "avif",
        "image/svg+xml" => "svg",
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        "application/pdf" => "pdf",
        _ => return None,
    };
    Some(ext)
}
