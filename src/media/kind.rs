//! Payload classification
//!
//! Decides which [`EventKind`] an upload belongs to and checks that its
//! leading bytes agree with the declared type. Anything that fails here is
//! rejected before it reaches the broadcast path.

use std::path::Path;

use crate::error::IngestError;
use crate::protocol::EventKind;

/// Classify a file name by its extension
pub fn classify_filename(name: &str) -> Option<EventKind> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())?
        .to_ascii_lowercase();

    match ext.as_str() {
        "jpg" | "jpeg" | "png" | "gif" => Some(EventKind::Image),
        "mp4" => Some(EventKind::Video),
        "mp3" | "wav" | "ogg" | "m4a" => Some(EventKind::Audio),
        _ => None,
    }
}

/// Classify a MIME type by its top-level type
pub fn classify_content_type(content_type: &str) -> Option<EventKind> {
    let top = content_type.split('/').next()?.trim().to_ascii_lowercase();
    match top.as_str() {
        "image" => Some(EventKind::Image),
        "video" => Some(EventKind::Video),
        "audio" => Some(EventKind::Audio),
        _ => None,
    }
}

/// Content type a producer declares for a file, by extension
pub fn content_type_for_filename(name: &str) -> Option<&'static str> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())?
        .to_ascii_lowercase();

    let content_type = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "m4a" => "audio/mp4",
        _ => return None,
    };
    Some(content_type)
}

/// File extension used when storing a payload of the given content type
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type.to_ascii_lowercase().as_str() {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "video/mp4" => "mp4",
        "audio/mpeg" => "mp3",
        "audio/wav" => "wav",
        "audio/ogg" => "ogg",
        "audio/mp4" => "m4a",
        _ => "bin",
    }
}

fn is_image(prefix: &[u8]) -> bool {
    prefix.starts_with(&[0xFF, 0xD8, 0xFF])
        || prefix.starts_with(b"\x89PNG\r\n\x1a\n")
        || prefix.starts_with(b"GIF87a")
        || prefix.starts_with(b"GIF89a")
}

fn is_mp4(prefix: &[u8]) -> bool {
    prefix.len() >= 12 && &prefix[4..8] == b"ftyp"
}

fn is_mpeg_audio(prefix: &[u8]) -> bool {
    prefix.starts_with(b"ID3") || (prefix.len() >= 2 && prefix[0] == 0xFF && (prefix[1] & 0xE0) == 0xE0)
}

fn is_audio(prefix: &[u8], content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    if ct.contains("mpeg") {
        return is_mpeg_audio(prefix);
    }
    if ct.contains("wav") {
        return prefix.len() >= 12 && prefix.starts_with(b"RIFF") && &prefix[8..12] == b"WAVE";
    }
    if ct.contains("ogg") {
        return prefix.starts_with(b"OggS");
    }
    if ct.contains("mp4") {
        return is_mp4(prefix);
    }
    is_mpeg_audio(prefix)
}

/// Check the magic bytes of a payload against its declared kind
pub fn sniff(kind: EventKind, prefix: &[u8], content_type: &str) -> bool {
    match kind {
        EventKind::Image => is_image(prefix),
        EventKind::Video => is_mp4(prefix),
        EventKind::Audio => is_audio(prefix, content_type),
    }
}

/// Validate a producer upload against the per-kind rules
pub fn validate_upload(
    kind: EventKind,
    content_type: &str,
    payload: &[u8],
    max_bytes: usize,
) -> Result<(), IngestError> {
    if payload.is_empty() {
        return Err(IngestError::EmptyPayload);
    }

    if payload.len() > max_bytes {
        return Err(IngestError::TooLarge {
            kind,
            size: payload.len(),
            limit: max_bytes,
        });
    }

    let normalized = content_type.trim().to_ascii_lowercase();
    if !kind.allowed_content_types().contains(&normalized.as_str()) {
        return Err(IngestError::ContentTypeNotAllowed {
            kind,
            content_type: content_type.to_string(),
        });
    }

    let prefix = &payload[..payload.len().min(16)];
    if !sniff(kind, prefix, &normalized) {
        return Err(IngestError::SignatureMismatch(kind));
    }

    Ok(())
}
