use std::time::Duration;

use anyhow::{anyhow, Result};
use teloxide::prelude::*;
use teloxide::types::{FileId, MediaGroupId, MessageId};
use tracing::{info, warn};

use crate::config::CONFIG;
use crate::handlers::chat::reply_with_advice;
use crate::llm::media::download_media;
use crate::state::{AppState, PendingAlbum};
use crate::studio::{EncodedImage, ReferenceKind, SessionError, MAX_REFERENCE_ASSETS};
use crate::utils::telegram::send_plain;
use crate::utils::timing::{complete_command_timer, start_command_timer};

/// Time to wait for the rest of an album after its first photo arrives.
const ALBUM_SETTLE_DELAY: Duration = Duration::from_millis(1500);

/// Conversation turn recorded when a new room photo replaces the base image.
pub const ROOM_UPLOADED_TURN: &str = "I've uploaded my room. Analyze the structure and potential.";

const UNREADABLE_IMAGE_REPLY: &str =
    "I couldn't read that image. Please send a JPEG, PNG or WebP photo.";

/// What an incoming photo is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadRole {
    Room,
    Reference(ReferenceKind),
}

impl UploadRole {
    pub fn from_caption(caption: Option<&str>) -> Self {
        caption
            .and_then(ReferenceKind::from_caption)
            .map(UploadRole::Reference)
            .unwrap_or(UploadRole::Room)
    }
}

pub async fn get_file_url(bot: &Bot, file_id: &FileId) -> Result<String> {
    let file = bot.get_file(file_id.clone()).await?;
    Ok(format!(
        "https://api.telegram.org/file/bot{}/{}",
        CONFIG.bot_token, file.path
    ))
}

fn is_image_document(mime_type: Option<&str>, file_name: Option<&str>) -> bool {
    let mime_is_image = mime_type
        .map(|mime| mime.starts_with("image/"))
        .unwrap_or(false);
    let name_is_image = file_name
        .map(|name| {
            let lower = name.to_ascii_lowercase();
            lower.ends_with(".png")
                || lower.ends_with(".jpg")
                || lower.ends_with(".jpeg")
                || lower.ends_with(".webp")
                || lower.ends_with(".heic")
        })
        .unwrap_or(false);
    mime_is_image || name_is_image
}

/// The largest photo size, or an image sent as a file.
pub fn image_file_id(message: &Message) -> Option<FileId> {
    if let Some(photo) = message.photo().and_then(|sizes| sizes.last()) {
        return Some(photo.file.id.clone());
    }
    let document = message.document()?;
    let mime = document.mime_type.as_ref().map(|mime| mime.essence_str());
    is_image_document(mime, document.file_name.as_deref()).then(|| document.file.id.clone())
}

pub fn message_has_image(message: &Message) -> bool {
    image_file_id(message).is_some()
}

async fn download_image(bot: &Bot, file_id: &FileId) -> Result<EncodedImage> {
    let url = get_file_url(bot, file_id).await?;
    let bytes = download_media(&url)
        .await
        .ok_or_else(|| anyhow!("download failed for file {}", file_id.0))?;
    Ok(EncodedImage::from_upload(bytes)?)
}

fn describe_added_references(added: usize, total: usize, rejected: usize) -> String {
    let mut reply = match added {
        0 => "No references were added.".to_string(),
        1 => format!("Reference added ({total}/{MAX_REFERENCE_ASSETS})."),
        n => format!("{n} references added ({total}/{MAX_REFERENCE_ASSETS})."),
    };
    if rejected > 0 {
        reply.push_str(&format!(
            " {rejected} skipped: the limit is {MAX_REFERENCE_ASSETS}. Use /unref or /clearrefs to make room."
        ));
    }
    reply
}

async fn store_references(
    bot: &Bot,
    state: &AppState,
    chat_id: ChatId,
    reply_to: MessageId,
    file_ids: &[FileId],
    kind: ReferenceKind,
) -> Result<usize> {
    let mut images = Vec::new();
    for file_id in file_ids {
        match download_image(bot, file_id).await {
            Ok(image) => images.push(image),
            Err(err) => warn!("Skipping reference upload: {err:#}"),
        }
    }
    if images.is_empty() {
        send_plain(bot, chat_id, UNREADABLE_IMAGE_REPLY, Some(reply_to)).await?;
        return Ok(0);
    }

    let (added, total, rejected) = state.with_session(chat_id, |session| {
        let mut added = 0;
        let mut rejected = 0;
        for image in images {
            match session.add_reference(image, kind) {
                Ok(_) => added += 1,
                Err(SessionError::ReferenceLimitReached) => rejected += 1,
                Err(err) => warn!("Unexpected reference error: {err}"),
            }
        }
        (added, session.references().len(), rejected)
    });
    info!(
        "Stored {added} {} reference(s) for chat {chat_id}, {rejected} over the limit",
        kind.label()
    );
    let reply = describe_added_references(added, total, rejected);
    send_plain(bot, chat_id, &reply, Some(reply_to)).await?;
    Ok(added)
}

/// Sets the room photo, then asks the assistant for a first read of the space.
async fn store_room_photo(
    bot: &Bot,
    state: &AppState,
    chat_id: ChatId,
    reply_to: MessageId,
    file_id: &FileId,
) -> Result<bool> {
    let image = match download_image(bot, file_id).await {
        Ok(image) => image,
        Err(err) => {
            warn!("Room photo upload failed: {err:#}");
            send_plain(bot, chat_id, UNREADABLE_IMAGE_REPLY, Some(reply_to)).await?;
            return Ok(false);
        }
    };

    state.with_session(chat_id, |session| {
        session.set_base_image(image);
        session.push_user_turn(ROOM_UPLOADED_TURN);
    });
    reply_with_advice(bot, state, chat_id, Some(reply_to)).await?;
    Ok(true)
}

/// Records one album item. Returns true for the first item, whose handler
/// owns flushing the album.
fn queue_album_item(
    state: &AppState,
    group_id: &MediaGroupId,
    message: &Message,
    file_id: FileId,
) -> bool {
    let caption_kind = message.caption().and_then(ReferenceKind::from_caption);
    let mut groups = state.media_groups.lock();
    match groups.get_mut(group_id) {
        Some(album) => {
            album.file_ids.push(file_id);
            if album.kind.is_none() {
                album.kind = caption_kind;
            }
            false
        }
        None => {
            groups.insert(
                group_id.clone(),
                PendingAlbum {
                    chat_id: message.chat.id,
                    first_message_id: message.id,
                    file_ids: vec![file_id],
                    kind: caption_kind,
                },
            );
            true
        }
    }
}

async fn flush_album(bot: Bot, state: AppState, group_id: MediaGroupId) -> Result<()> {
    tokio::time::sleep(ALBUM_SETTLE_DELAY).await;
    let Some(album) = state.media_groups.lock().remove(&group_id) else {
        return Ok(());
    };
    info!(
        "Album {} settled with {} photo(s), kind={:?}",
        group_id.0,
        album.file_ids.len(),
        album.kind
    );

    match album.kind {
        Some(kind) => {
            store_references(
                &bot,
                &state,
                album.chat_id,
                album.first_message_id,
                &album.file_ids,
                kind,
            )
            .await?;
        }
        None => {
            let Some((room, rest)) = album.file_ids.split_first() else {
                return Ok(());
            };
            if !rest.is_empty() {
                send_plain(
                    &bot,
                    album.chat_id,
                    &format!(
                        "Using the first photo as your room. To add the other {} as references, resend them captioned style or element.",
                        rest.len()
                    ),
                    Some(album.first_message_id),
                )
                .await?;
            }
            store_room_photo(&bot, &state, album.chat_id, album.first_message_id, room).await?;
        }
    }
    Ok(())
}

pub async fn image_message_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let Some(file_id) = image_file_id(&message) else {
        return Ok(());
    };

    if let Some(group_id) = message.media_group_id() {
        if queue_album_item(&state, group_id, &message, file_id) {
            let group_id = group_id.clone();
            tokio::spawn(async move {
                if let Err(err) = flush_album(bot, state, group_id).await {
                    tracing::error!("Album upload failed: {err:#}");
                }
            });
        }
        return Ok(());
    }

    let mut timer = start_command_timer("upload", &message);
    let chat_id = message.chat.id;
    match UploadRole::from_caption(message.caption()) {
        UploadRole::Reference(kind) => {
            let added =
                store_references(&bot, &state, chat_id, message.id, &[file_id], kind).await?;
            let status = if added > 0 { "reference" } else { "rejected" };
            complete_command_timer(&mut timer, status, Some(kind.label().to_string()));
        }
        UploadRole::Room => {
            let stored = store_room_photo(&bot, &state, chat_id, message.id, &file_id).await?;
            let status = if stored { "room" } else { "unreadable" };
            complete_command_timer(&mut timer, status, None);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_documents_are_recognised_by_mime_or_name() {
        assert!(is_image_document(Some("image/webp"), None));
        assert!(is_image_document(None, Some("Living-Room.JPG")));
        assert!(is_image_document(Some("application/octet-stream"), Some("sofa.heic")));
        assert!(!is_image_document(Some("application/pdf"), Some("plan.pdf")));
        assert!(!is_image_document(None, None));
    }

    #[test]
    fn captions_route_uploads() {
        assert_eq!(UploadRole::from_caption(None), UploadRole::Room);
        assert_eq!(UploadRole::from_caption(Some("my lounge")), UploadRole::Room);
        assert_eq!(
            UploadRole::from_caption(Some("#style warm oak")),
            UploadRole::Reference(ReferenceKind::Style)
        );
        assert_eq!(
            UploadRole::from_caption(Some("element")),
            UploadRole::Reference(ReferenceKind::Element)
        );
    }

    #[test]
    fn reference_summary_mentions_the_limit() {
        assert_eq!(describe_added_references(1, 3, 0), "Reference added (3/8).");
        assert_eq!(
            describe_added_references(2, 8, 1),
            "2 references added (8/8). 1 skipped: the limit is 8. Use /unref or /clearrefs to make room."
        );
        assert_eq!(
            describe_added_references(0, 8, 2),
            "No references were added. 2 skipped: the limit is 8. Use /unref or /clearrefs to make room."
        );
    }
}
