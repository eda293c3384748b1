use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    io::ErrorKind,
    sync::{Arc, RwLock},
    time::Instant,
};

use crate::eid::Eid;

/// Lifecycle of the AI enrichment attached to an image. Queries must treat
/// all three as valid: vectors are only present after `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStatus::Pending => write!(f, "pending"),
            ProcessingStatus::Completed => write!(f, "completed"),
            ProcessingStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(anyhow!("unknown processing status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: Eid,
    pub user_id: String,

    pub filename: String,
    pub original_path: String,
    pub thumbnail_path: Option<String>,
    pub uploaded_at: DateTime<Utc>,

    pub description: Option<String>,
    pub tags: Vec<String>,
    pub colors: Vec<String>,

    /// 4096-dim hashed tag embedding, present once enrichment completed
    pub tag_vec: Option<Vec<f32>>,
    /// 12-dim hue histogram, present once enrichment completed
    pub color_vec: Option<Vec<f32>>,

    pub status: ProcessingStatus,
}

#[derive(Debug, Clone, Default)]
pub struct ImageCreate {
    pub user_id: String,
    pub filename: String,
    pub original_path: String,
    pub thumbnail_path: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ImageUpdate {
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub colors: Option<Vec<String>>,
    pub tag_vec: Option<Vec<f32>>,
    pub color_vec: Option<Vec<f32>>,
    pub status: Option<ProcessingStatus>,
    pub thumbnail_path: Option<String>,
    /// drop vectors (reprocess resets them before re-enrichment)
    pub clear_vectors: bool,
}

pub trait ImageManager: Send + Sync {
    fn create(&self, create: ImageCreate) -> anyhow::Result<ImageRecord>;
    fn get(&self, id: &str) -> anyhow::Result<Option<ImageRecord>>;
    fn update(&self, id: &str, update: ImageUpdate) -> anyhow::Result<Option<ImageRecord>>;
    fn delete(&self, id: &str) -> anyhow::Result<bool>;
    /// Snapshot of one user's records in retrieval (insertion) order.
    fn list(&self, user_id: &str) -> anyhow::Result<Vec<ImageRecord>>;
    /// Snapshot of every record, all users.
    fn all(&self) -> anyhow::Result<Vec<ImageRecord>>;
    fn total(&self) -> anyhow::Result<usize>;
}

#[derive(Debug, Clone, Default)]
pub struct BackendCsv {
    list: Arc<RwLock<Vec<ImageRecord>>>,
    path: String,
}

const CSV_HEADERS: [&str; 12] = [
    "id",
    "user_id",
    "filename",
    "original_path",
    "thumbnail_path",
    "uploaded_at",
    "description",
    "tags",
    "colors",
    "tag_vec",
    "color_vec",
    "status",
];

fn field<'a>(record: &'a csv::StringRecord, idx: usize) -> anyhow::Result<&'a str> {
    record
        .get(idx)
        .ok_or_else(|| anyhow!("couldnt get record field {}", CSV_HEADERS[idx]))
}

/// Vectors live in CSV cells as JSON arrays. A stored vector whose length
/// disagrees with `expected_dim` is treated as absent: a wrong-width vector
/// would silently corrupt every dot product against it.
fn parse_vec_cell(cell: &str, expected_dim: usize, id: &str) -> Option<Vec<f32>> {
    if cell.is_empty() {
        return None;
    }
    match serde_json::from_str::<Vec<f32>>(cell) {
        Ok(v) if v.len() == expected_dim => Some(v),
        Ok(v) => {
            log::warn!(
                "record {id}: stored vector has dim {} (expected {expected_dim}), ignoring",
                v.len()
            );
            None
        }
        Err(err) => {
            log::warn!("record {id}: unreadable vector cell: {err}");
            None
        }
    }
}

fn parse_list_cell(cell: &str) -> Vec<String> {
    if cell.is_empty() {
        return vec![];
    }
    serde_json::from_str(cell).unwrap_or_default()
}

impl BackendCsv {
    pub fn load(path: &str, tag_dim: usize, color_dim: usize) -> anyhow::Result<Self> {
        if let Err(err) = std::fs::metadata(path) {
            match err.kind() {
                ErrorKind::NotFound => {
                    log::info!("Creating new library at {path}");
                    let mut csv_wrt = csv::Writer::from_path(path)?;
                    csv_wrt.write_record(CSV_HEADERS)?;
                    csv_wrt.flush()?;
                }
                _ => Err(err)?,
            }
        }

        let now = Instant::now();
        let mut csv_reader = csv::Reader::from_path(path)?;

        let mut records = vec![];
        for row in csv_reader.records() {
            let row = row?;

            let id = field(&row, 0)?.to_string();
            let thumbnail_path = field(&row, 4)?.to_string();
            let description = field(&row, 6)?.to_string();

            let record = ImageRecord {
                id: Eid::from(id.clone()),
                user_id: field(&row, 1)?.to_string(),
                filename: field(&row, 2)?.to_string(),
                original_path: field(&row, 3)?.to_string(),
                thumbnail_path: if thumbnail_path.is_empty() {
                    None
                } else {
                    Some(thumbnail_path)
                },
                uploaded_at: field(&row, 5)?
                    .parse::<DateTime<Utc>>()
                    .map_err(|err| anyhow!("record {id}: bad uploaded_at: {err}"))?,
                description: if description.is_empty() {
                    None
                } else {
                    Some(description)
                },
                tags: parse_list_cell(field(&row, 7)?),
                colors: parse_list_cell(field(&row, 8)?),
                tag_vec: parse_vec_cell(field(&row, 9)?, tag_dim, &id),
                color_vec: parse_vec_cell(field(&row, 10)?, color_dim, &id),
                status: field(&row, 11)?.parse()?,
            };

            records.push(record);
        }

        log::debug!(
            "took {}ms to read library csv",
            now.elapsed().as_micros() as f64 / 1000.0
        );

        Ok(BackendCsv {
            list: Arc::new(RwLock::new(records)),
            path: path.to_string(),
        })
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let records = self.list.write().unwrap();

        let temp_path = format!("{}-tmp", &self.path);
        let mut csv_wrt = csv::Writer::from_path(&temp_path)?;
        csv_wrt.write_record(CSV_HEADERS)?;
        for record in records.iter() {
            let json_cell = |v: &Option<Vec<f32>>| -> anyhow::Result<String> {
                Ok(match v {
                    Some(v) => serde_json::to_string(v)?,
                    None => String::new(),
                })
            };

            csv_wrt.write_record([
                record.id.to_string(),
                record.user_id.clone(),
                record.filename.clone(),
                record.original_path.clone(),
                record.thumbnail_path.clone().unwrap_or_default(),
                record.uploaded_at.to_rfc3339(),
                record.description.clone().unwrap_or_default(),
                serde_json::to_string(&record.tags)?,
                serde_json::to_string(&record.colors)?,
                json_cell(&record.tag_vec)?,
                json_cell(&record.color_vec)?,
                record.status.to_string(),
            ])?;
        }
        csv_wrt.flush()?;
        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }
}

impl ImageManager for BackendCsv {
    fn create(&self, create: ImageCreate) -> anyhow::Result<ImageRecord> {
        let record = ImageRecord {
            id: Eid::new(),
            user_id: create.user_id,
            filename: create.filename,
            original_path: create.original_path,
            thumbnail_path: create.thumbnail_path,
            uploaded_at: Utc::now(),
            description: None,
            tags: vec![],
            colors: vec![],
            tag_vec: None,
            color_vec: None,
            status: ProcessingStatus::Pending,
        };

        self.list.write().unwrap().push(record.clone());
        self.save()?;

        Ok(record)
    }

    fn get(&self, id: &str) -> anyhow::Result<Option<ImageRecord>> {
        Ok(self
            .list
            .read()
            .unwrap()
            .iter()
            .find(|r| *r.id == id)
            .cloned())
    }

    fn update(&self, id: &str, update: ImageUpdate) -> anyhow::Result<Option<ImageRecord>> {
        let mut records = self.list.write().unwrap();

        let Some(record) = records.iter_mut().find(|r| *r.id == id) else {
            return Ok(None);
        };

        if let Some(description) = update.description {
            record.description = Some(description);
        }
        if let Some(tags) = update.tags {
            record.tags = dedup(tags);
        }
        if let Some(colors) = update.colors {
            record.colors = dedup(colors);
        }
        if update.clear_vectors {
            record.tag_vec = None;
            record.color_vec = None;
        }
        if let Some(tag_vec) = update.tag_vec {
            record.tag_vec = Some(tag_vec);
        }
        if let Some(color_vec) = update.color_vec {
            record.color_vec = Some(color_vec);
        }
        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(thumbnail_path) = update.thumbnail_path {
            record.thumbnail_path = Some(thumbnail_path);
        }

        let result = record.clone();
        drop(records);

        self.save()?;

        Ok(Some(result))
    }

    fn delete(&self, id: &str) -> anyhow::Result<bool> {
        let mut records = self.list.write().unwrap();
        let found = records.iter().position(|r| *r.id == id).map(|idx| {
            records.remove(idx);
        });

        drop(records);

        if found.is_some() {
            self.save()?;
        }

        Ok(found.is_some())
    }

    fn list(&self, user_id: &str) -> anyhow::Result<Vec<ImageRecord>> {
        Ok(self
            .list
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    fn all(&self) -> anyhow::Result<Vec<ImageRecord>> {
        Ok(self.list.read().unwrap().clone())
    }

    fn total(&self) -> anyhow::Result<usize> {
        Ok(self.list.read().unwrap().len())
    }
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut items = items;
    items.retain(|item| seen.insert(item.clone()));
    items
}
