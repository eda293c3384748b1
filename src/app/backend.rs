use crate::library::ImageRecord;
use crate::search::{ImageQuery, Page};

use super::errors::AppError;

/// One file of an upload batch, already decoded to bytes.
pub struct UploadFile {
    pub filename: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct UploadOpts {
    /// Queue enrichment in the background (daemon) instead of running it
    /// inline (CLI, tests).
    pub async_process: bool,
}

pub trait AppBackend: Send + Sync {
    /// Store a batch of files and create pending records. Unsupported or
    /// oversized files are skipped with a warning; they never fail the
    /// batch.
    fn upload(
        &self,
        user_id: &str,
        files: Vec<UploadFile>,
        opts: UploadOpts,
    ) -> anyhow::Result<Vec<ImageRecord>, AppError>;

    fn get(&self, id: &str) -> anyhow::Result<ImageRecord, AppError>;

    fn list(&self, user_id: &str, query: ImageQuery) -> anyhow::Result<Page, AppError>;

    fn similar(&self, user_id: &str, query: ImageQuery) -> anyhow::Result<Page, AppError>;

    fn download(&self, user_id: &str, id: &str) -> anyhow::Result<(String, Vec<u8>), AppError>;

    fn delete(&self, user_id: &str, id: &str) -> anyhow::Result<(), AppError>;

    /// Reset a record to pending and re-trigger enrichment. The only way a
    /// `failed` record gets another attempt.
    fn reprocess(&self, user_id: &str, id: &str, opts: UploadOpts)
        -> anyhow::Result<(), AppError>;

    fn public_url(&self, id: &str) -> anyhow::Result<(ImageRecord, String), AppError>;

    /// Distinct tag labels across the library, most frequent first.
    fn tags(&self) -> anyhow::Result<Vec<String>, AppError>;
}
