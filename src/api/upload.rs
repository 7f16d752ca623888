//! Multipart media uploads, streamed to a temporary file under the upload dir.

use axum::{
    extract::multipart::{Field, Multipart, MultipartError},
    http::StatusCode,
};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use wagate_core::{
    config::UploadConfig,
    shellexpand,
    types::{MediaPayload, MessageKind},
};

use super::{error_response, ApiError};

const GENERIC_MIME: &str = "application/octet-stream";

/// A parsed send-media form. The temp file is deleted when this is dropped.
pub(super) struct MediaForm {
    pub account_id: String,
    pub to: String,
    pub media: MediaPayload,
    _file: NamedTempFile,
}

fn multipart_error(e: MultipartError) -> ApiError {
    error_response(e.status(), e.body_text())
}

fn io_error(what: &str, e: std::io::Error) -> ApiError {
    warn!("upload {what} failed: {e}");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("upload {what} failed"))
}

/// Pick the MIME type: the part's declared type, else sniffed, else generic.
fn detect_mime(declared: Option<&str>, data: &[u8]) -> String {
    match declared {
        Some(m) if !m.is_empty() && m != GENERIC_MIME => m.to_string(),
        _ => infer::get(data)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| GENERIC_MIME.to_string()),
    }
}

/// Stream one file part into a new temp file, enforcing the size cap.
async fn spool(
    field: &mut Field<'_>,
    config: &UploadConfig,
) -> Result<(NamedTempFile, Vec<u8>), ApiError> {
    let dir = shellexpand(&config.dir);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| io_error("dir", e))?;

    let tmp = tempfile::Builder::new()
        .prefix("upload-")
        .tempfile_in(&dir)
        .map_err(|e| io_error("temp file", e))?;
    let handle = tmp.as_file().try_clone().map_err(|e| io_error("temp file", e))?;
    let mut file = tokio::fs::File::from_std(handle);

    let max = config.max_file_bytes();
    let mut written = 0usize;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        written += chunk.len();
        if written > max {
            return Err(error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("file exceeds {} MB", config.max_file_mb),
            ));
        }
        file.write_all(&chunk).await.map_err(|e| io_error("write", e))?;
    }
    file.flush().await.map_err(|e| io_error("write", e))?;

    let data = tokio::fs::read(tmp.path())
        .await
        .map_err(|e| io_error("read", e))?;
    debug!("spooled {} bytes to {}", data.len(), tmp.path().display());
    Ok((tmp, data))
}

/// Read `account_id`, `to`, optional `caption`, and `file` from the form.
pub(super) async fn read_media_form(
    mut multipart: Multipart,
    config: &UploadConfig,
) -> Result<MediaForm, ApiError> {
    let mut account_id = None;
    let mut to = None;
    let mut caption = None;
    let mut file = None;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "account_id" => account_id = Some(field.text().await.map_err(multipart_error)?),
            "to" => to = Some(field.text().await.map_err(multipart_error)?),
            "caption" => caption = Some(field.text().await.map_err(multipart_error)?),
            "file" => {
                let file_name = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .unwrap_or("file")
                    .to_string();
                let declared = field.content_type().map(str::to_string);
                let (tmp, data) = spool(&mut field, config).await?;
                file = Some((tmp, data, file_name, declared));
            }
            other => {
                return Err(error_response(
                    StatusCode::BAD_REQUEST,
                    format!("unexpected form field '{other}'"),
                ))
            }
        }
    }

    let required = |v: Option<String>, what: &str| {
        v.map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, format!("{what} is required")))
    };
    let account_id = required(account_id, "account_id")?;
    let to = required(to, "to")?;

    let (tmp, data, file_name, declared) =
        file.ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "file is required"))?;
    if data.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "file must not be empty"));
    }

    let mime_type = detect_mime(declared.as_deref(), &data);
    Ok(MediaForm {
        account_id,
        to,
        media: MediaPayload {
            kind: MessageKind::from_mime(&mime_type),
            mime_type,
            file_name,
            caption: caption.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
            data,
        },
        _file: tmp,
    })
}
