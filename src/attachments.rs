//! Storage layout for uploaded files. Only paths are computed here; the bytes
//! are written by whatever storage backend fronts this service.

use std::path::Path;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Images,
    Videos,
    Audio,
    Documents,
    Others,
}

impl MediaKind {
    pub fn from_file_name(file_name: &str) -> Self {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" | "svg" => MediaKind::Images,
            "mp4" | "mov" | "avi" | "mkv" | "webm" => MediaKind::Videos,
            "mp3" | "wav" | "ogg" | "flac" | "m4a" => MediaKind::Audio,
            "pdf" | "doc" | "docx" | "txt" | "md" | "ppt" | "pptx" | "xls" | "xlsx" | "csv" => {
                MediaKind::Documents
            }
            _ => MediaKind::Others,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Images => "images",
            MediaKind::Videos => "videos",
            MediaKind::Audio => "audio",
            MediaKind::Documents => "documents",
            MediaKind::Others => "others",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub path: String,
    pub file_name: String,
    pub kind: MediaKind,
}

impl Attachment {
    /// `messages/{kind}/{uploader}/{file}`
    pub fn for_upload(uploader: &str, file_name: &str) -> Self {
        let file_name = base_name(file_name);
        let kind = MediaKind::from_file_name(&file_name);
        Self {
            path: format!("messages/{}/{}/{}", kind.as_str(), base_name(uploader), file_name),
            file_name,
            kind,
        }
    }
}

pub fn avatar_path(file_name: &str) -> String {
    format!("avatars/{}", base_name(file_name))
}

// keeps client-supplied names from climbing out of their directory
fn base_name(name: &str) -> String {
    let name = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    match name {
        "" | "." | ".." => "unnamed".to_owned(),
        name => name.to_owned(),
    }
}
