//! Multipart form for the OCR endpoints.
//! Fields: `image` (repeatable, alias `images`), `messageSide`, `myName`, `theirName`.

use axum::extract::Multipart;
use tracing::debug;

use crate::error::PipelineError;
use crate::pipeline::ImageInput;
use crate::transcript::SpeakerMapping;

pub const MAX_NAME_CHARS: usize = 64;

#[derive(Debug)]
pub struct OcrForm {
    pub images: Vec<ImageInput>,
    pub mapping: SpeakerMapping,
}

pub async fn parse_ocr_form(
    mut multipart: Multipart,
    max_images: usize,
) -> Result<OcrForm, PipelineError> {
    let mut images = Vec::new();
    let mut mapping = SpeakerMapping::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PipelineError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" | "images" => {
                if images.len() == max_images {
                    return Err(PipelineError::BadRequest(format!(
                        "at most {max_images} images per request"
                    )));
                }
                let content_type = field.content_type().map(str::to_string);
                let file_name = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| PipelineError::BadRequest(format!("failed to read image: {e}")))?;
                images.push(ImageInput {
                    bytes: bytes.to_vec(),
                    content_type,
                    file_name,
                });
            }
            "messageSide" => {
                let value = text(field).await?;
                if !value.trim().is_empty() {
                    mapping.my_side = value.parse().map_err(PipelineError::BadRequest)?;
                }
            }
            "myName" => {
                if let Some(name) = clean_name(&text(field).await?) {
                    mapping.me_name = name;
                }
            }
            "theirName" => {
                if let Some(name) = clean_name(&text(field).await?) {
                    mapping.them_name = name;
                }
            }
            other => debug!(field = other, "ignoring unknown form field"),
        }
    }

    if images.is_empty() {
        return Err(PipelineError::BadRequest(
            "no image uploaded (expected an `image` field)".into(),
        ));
    }

    Ok(OcrForm { images, mapping })
}

async fn text(field: axum::extract::multipart::Field<'_>) -> Result<String, PipelineError> {
    field
        .text()
        .await
        .map_err(|e| PipelineError::BadRequest(format!("unreadable form field: {e}")))
}

/// Trimmed and capped; `None` keeps the default.
fn clean_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_NAME_CHARS).collect())
}
