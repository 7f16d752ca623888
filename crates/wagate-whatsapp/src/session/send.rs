//! Outbound messages — chunking, media message construction, and retry logic.

use tracing::{error, info, warn};
use wacore_binary::jid::Jid;
use wagate_core::{
    error::WagateError,
    types::{MediaPayload, MessageKind},
};
use waproto::whatsapp::{message, Message};
use whatsapp_rust::client::Client;
use whatsapp_rust::download::MediaType;

/// Pauses between send attempts, doubling each time.
pub(super) const RETRY_DELAYS_MS: [u64; 2] = [500, 1000];

/// One first try plus one retry per delay.
pub(super) const SEND_ATTEMPTS: usize = RETRY_DELAYS_MS.len() + 1;

/// Encrypted media reference returned by the upload endpoint.
#[derive(Debug, Clone, Default)]
pub(super) struct UploadedMedia {
    pub url: String,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_length: u64,
}

fn parse_jid(to: &str) -> Result<Jid, WagateError> {
    to.parse()
        .map_err(|e| WagateError::Validation(format!("invalid whatsapp JID '{to}': {e}")))
}

fn media_type(kind: MessageKind) -> MediaType {
    match kind {
        MessageKind::Image => MediaType::Image,
        MessageKind::Video => MediaType::Video,
        MessageKind::Audio => MediaType::Audio,
        MessageKind::Text | MessageKind::Document => MediaType::Document,
    }
}

/// Send text, split into chunks of at most `max_len` bytes.
///
/// Returns the id of the last chunk sent.
pub(super) async fn send_text(
    client: &Client,
    to: &str,
    text: &str,
    max_len: usize,
) -> Result<String, WagateError> {
    let jid = parse_jid(to)?;
    let chunks = split_message(text, max_len);
    let mut last_id = String::new();
    for chunk in chunks {
        let msg = Message {
            conversation: Some(chunk.to_string()),
            ..Default::default()
        };
        last_id = retry_send(client, &jid, msg).await?;
    }
    Ok(last_id)
}

/// Upload a media payload, then send it as the matching message type.
pub(super) async fn send_media(
    client: &Client,
    to: &str,
    media: &MediaPayload,
) -> Result<String, WagateError> {
    let jid = parse_jid(to)?;

    info!(
        "uploading {} ({} bytes, {})",
        media.kind.as_str(),
        media.data.len(),
        media.mime_type
    );
    let upload = client
        .upload(media.data.clone(), media_type(media.kind))
        .await
        .map_err(|e| WagateError::Session(format!("whatsapp media upload failed: {e}")))?;

    let uploaded = UploadedMedia {
        url: upload.url,
        direct_path: upload.direct_path,
        media_key: upload.media_key,
        file_enc_sha256: upload.file_enc_sha256,
        file_sha256: upload.file_sha256,
        file_length: upload.file_length,
    };

    retry_send(client, &jid, build_media_message(uploaded, media)).await
}

/// Wrap an uploaded file in the message variant for its kind.
///
/// Audio carries no caption on WhatsApp, so a caption on audio is dropped.
pub(super) fn build_media_message(upload: UploadedMedia, media: &MediaPayload) -> Message {
    let mimetype = Some(media.mime_type.clone());
    let caption = media.caption.clone().filter(|c| !c.is_empty());

    match media.kind {
        MessageKind::Image => Message {
            image_message: Some(Box::new(message::ImageMessage {
                url: Some(upload.url),
                direct_path: Some(upload.direct_path),
                media_key: Some(upload.media_key),
                file_enc_sha256: Some(upload.file_enc_sha256),
                file_sha256: Some(upload.file_sha256),
                file_length: Some(upload.file_length),
                mimetype,
                caption,
                ..Default::default()
            })),
            ..Default::default()
        },
        MessageKind::Video => Message {
            video_message: Some(Box::new(message::VideoMessage {
                url: Some(upload.url),
                direct_path: Some(upload.direct_path),
                media_key: Some(upload.media_key),
                file_enc_sha256: Some(upload.file_enc_sha256),
                file_sha256: Some(upload.file_sha256),
                file_length: Some(upload.file_length),
                mimetype,
                caption,
                ..Default::default()
            })),
            ..Default::default()
        },
        MessageKind::Audio => Message {
            audio_message: Some(Box::new(message::AudioMessage {
                url: Some(upload.url),
                direct_path: Some(upload.direct_path),
                media_key: Some(upload.media_key),
                file_enc_sha256: Some(upload.file_enc_sha256),
                file_sha256: Some(upload.file_sha256),
                file_length: Some(upload.file_length),
                mimetype,
                ..Default::default()
            })),
            ..Default::default()
        },
        MessageKind::Text | MessageKind::Document => Message {
            document_message: Some(Box::new(message::DocumentMessage {
                url: Some(upload.url),
                direct_path: Some(upload.direct_path),
                media_key: Some(upload.media_key),
                file_enc_sha256: Some(upload.file_enc_sha256),
                file_sha256: Some(upload.file_sha256),
                file_length: Some(upload.file_length),
                mimetype,
                title: Some(media.file_name.clone()),
                file_name: Some(media.file_name.clone()),
                caption,
                ..Default::default()
            })),
            ..Default::default()
        },
    }
}

/// Send a WhatsApp message with retry and exponential backoff.
///
/// Attempts up to 3 times, sleeping 500ms then 1s between attempts.
pub(super) async fn retry_send(
    client: &Client,
    jid: &Jid,
    msg: Message,
) -> Result<String, WagateError> {
    let mut last_err = None;

    for attempt in 1..=SEND_ATTEMPTS {
        match client.send_message(jid.clone(), msg.clone()).await {
            Ok(msg_id) => return Ok(msg_id),
            Err(e) => {
                match RETRY_DELAYS_MS.get(attempt - 1) {
                    Some(delay_ms) => {
                        warn!(
                            "whatsapp send to {jid} attempt {attempt}/{SEND_ATTEMPTS} failed: {e}, retrying in {delay_ms}ms"
                        );
                        tokio::time::sleep(std::time::Duration::from_millis(*delay_ms)).await;
                    }
                    None => {
                        error!(
                            "whatsapp send to {jid} attempt {attempt}/{SEND_ATTEMPTS} failed: {e}, giving up"
                        );
                    }
                }
                last_err = Some(e);
            }
        }
    }

    Err(WagateError::Session(format!(
        "whatsapp send failed after {SEND_ATTEMPTS} attempts: {}",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

/// Split a long message into chunks of at most `max_len` bytes.
///
/// Boundaries land on UTF-8 char boundaries and prefer the last newline
/// inside the window.
pub(super) fn split_message(text: &str, max_len: usize) -> Vec<&str> {
    if text.len() <= max_len || max_len == 0 {
        return vec![text];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // A single char wider than max_len; emit it whole.
            end = start + text[start..].chars().next().map_or(1, char::len_utf8);
        }
        let break_at = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .filter(|&i| i > 0)
                .map(|i| start + i + 1)
                .unwrap_or(end)
        } else {
            end
        };
        chunks.push(&text[start..break_at]);
        start = break_at;
    }

    chunks
}
