use image::{DynamicImage, GenericImageView, ImageReader};
use std::io::Cursor;
use std::sync::Arc;

use crate::value::{FileType, ValueType};

pub type FileId = u64;

/// Longest side of the in-memory preview kept for a scan.
const PREVIEW_SIDE: u32 = 512;

/// Stable key correlating upload/download events with a file.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct FileKey(pub u64);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadStatus {
    #[default]
    NotStarted,
    InProgress(u64),
    Done,
    Failed,
}

/// Decoded image of a scan, downscaled for display.
#[derive(Clone, Debug)]
pub struct ScanPreview {
    pub width: u32,
    pub height: u32,
    pub thumbnail: Arc<DynamicImage>,
}

impl ScanPreview {
    /// Returns `None` when the bytes are not an image we can decode.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .ok()?;
        let image = reader.decode().ok()?;
        let (width, height) = image.dimensions();
        Some(Self {
            width,
            height,
            thumbnail: Arc::new(image.thumbnail(PREVIEW_SIDE, PREVIEW_SIDE)),
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct File {
    pub id: FileId,
    pub size: u64,
    pub access_hash: u64,
    /// Unix timestamp of the upload.
    pub date: i64,
    pub preview: Option<ScanPreview>,
    pub download: LoadStatus,
    pub error: Option<String>,
}

/// Upload in flight (or finished but not yet saved) for an edit file.
#[derive(Clone, Debug)]
pub struct UploadData {
    pub key: FileKey,
    /// Dropped once the upload finishes or fails.
    pub bytes: Option<Vec<u8>>,
    pub status: LoadStatus,
}

impl UploadData {
    pub fn started(key: FileKey, bytes: Vec<u8>) -> Self {
        Self {
            key,
            bytes: Some(bytes),
            status: LoadStatus::InProgress(0),
        }
    }
}

/// Edit-buffer mirror of a file.
#[derive(Clone, Debug)]
pub struct EditFile {
    /// Owning value.
    pub value: ValueType,
    pub role: FileType,
    pub fields: File,
    pub upload: Option<UploadData>,
    /// Pending removal; undone by restoring before the value is saved.
    pub deleted: bool,
    /// File this upload took the slot of; put back if the upload fails.
    pub replaced: Option<Box<EditFile>>,
}

impl EditFile {
    pub fn committed(value: ValueType, role: FileType, file: &File) -> Self {
        Self {
            value,
            role,
            fields: file.clone(),
            upload: None,
            deleted: false,
            replaced: None,
        }
    }

    pub fn uploaded(value: ValueType, role: FileType, fields: File, upload: UploadData) -> Self {
        Self {
            value,
            role,
            fields,
            upload: Some(upload),
            deleted: false,
            replaced: None,
        }
    }

    pub fn uploading(&self) -> bool {
        matches!(
            self.upload,
            Some(UploadData {
                status: LoadStatus::InProgress(_),
                ..
            })
        )
    }

    pub fn upload_failed(&self) -> bool {
        matches!(
            self.upload,
            Some(UploadData {
                status: LoadStatus::Failed,
                ..
            })
        )
    }

    /// Whether this file differs from what is committed.
    pub fn changed(&self) -> bool {
        if self.upload.is_some() {
            !self.deleted
        } else {
            self.deleted
        }
    }

    /// Server file id to reference when saving, if there is one.
    pub fn remote_id(&self) -> Option<FileId> {
        match &self.upload {
            None => Some(self.fields.id),
            Some(upload) if upload.status == LoadStatus::Done => Some(self.fields.id),
            Some(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[test]
    fn test_preview_decodes_and_downscales() {
        let preview = ScanPreview::decode(&png(1024, 256)).unwrap();
        assert_eq!((preview.width, preview.height), (1024, 256));
        assert!(preview.thumbnail.width() <= PREVIEW_SIDE);
        assert!(preview.thumbnail.height() <= PREVIEW_SIDE);
    }

    #[test]
    fn test_preview_rejects_garbage() {
        assert!(ScanPreview::decode(b"definitely not an image").is_none());
    }

    #[test]
    fn test_edit_file_change_and_remote_id() {
        let file = File {
            id: 42,
            ..File::default()
        };
        let mut committed = EditFile::committed(ValueType::Passport, FileType::FrontSide, &file);
        assert!(!committed.changed());
        assert_eq!(committed.remote_id(), Some(42));
        committed.deleted = true;
        assert!(committed.changed());

        let mut fresh = EditFile::uploaded(
            ValueType::Passport,
            FileType::Selfie,
            file,
            UploadData::started(FileKey(9), vec![0; 4]),
        );
        assert!(fresh.changed());
        assert!(fresh.uploading());
        assert_eq!(fresh.remote_id(), None);
        if let Some(upload) = fresh.upload.as_mut() {
            upload.status = LoadStatus::Done;
        }
        assert_eq!(fresh.remote_id(), Some(42));
        fresh.deleted = true;
        assert!(!fresh.changed());
    }
}
