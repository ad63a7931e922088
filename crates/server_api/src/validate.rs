use base64::{engine::general_purpose::STANDARD, Engine as _};
use shared::{domain::EntryKind, error::ApiError};

pub fn player_name(raw: &str, max_chars: usize) -> Result<String, ApiError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ApiError::validation("player name is required"));
    }
    if name.chars().count() > max_chars {
        return Err(ApiError::validation(format!(
            "player name must be at most {max_chars} characters"
        )));
    }
    Ok(name.to_string())
}

/// Text is stored trimmed. Drawings must be `data:image/<subtype>;base64,`
/// urls with a decodable payload.
pub fn entry_content(kind: EntryKind, raw: &str, max_bytes: usize) -> Result<String, ApiError> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(ApiError::validation("entry content is required"));
    }
    if content.len() > max_bytes {
        return Err(ApiError::validation(format!(
            "entry exceeds {max_bytes} bytes"
        )));
    }
    if kind == EntryKind::Drawing {
        let payload = drawing_payload(content)
            .ok_or_else(|| ApiError::validation("drawing must be a base64 image data url"))?;
        STANDARD
            .decode(payload)
            .map_err(|_| ApiError::validation("drawing payload is not valid base64"))?;
    }
    Ok(content.to_string())
}

fn drawing_payload(content: &str) -> Option<&str> {
    let rest = content.strip_prefix("data:image/")?;
    let (subtype, payload) = rest.split_once(";base64,")?;
    if subtype.is_empty() || payload.is_empty() {
        return None;
    }
    Some(payload)
}
