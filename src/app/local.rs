use crate::{
    auth,
    config::Config,
    eid::Eid,
    imgproc,
    library::{self, ImageCreate, ImageManager, ImageRecord, ImageUpdate, ProcessingStatus},
    search::{self, ImageQuery, Page},
    storage::{self, StorageManager},
    vectors::VectorSpace,
    vision::{VisionApi, VisionClient, VisionUnavailable},
};

use super::task_runner::{self, Status, Task};
use anyhow::anyhow;
use std::{
    collections::HashMap,
    path::Path,
    sync::{mpsc, Arc, RwLock},
};

use super::{backend::*, errors::AppError};

pub struct AppLocal {
    pub image_mgr: Arc<dyn ImageManager>,
    pub storage_mgr: Arc<dyn StorageManager>,
    vision: Arc<dyn VisionApi>,
    space: VectorSpace,

    tags_cache: Arc<RwLock<Vec<String>>>,

    task_tx: Option<Arc<mpsc::Sender<Task>>>,
    task_queue_handle: Option<std::thread::JoinHandle<()>>,

    config: Arc<RwLock<Config>>,
}

impl AppLocal {
    pub fn new(config: Arc<RwLock<Config>>) -> anyhow::Result<Self> {
        let space = VectorSpace::default();

        let (base_path, vision_config) = {
            let config = config.read().unwrap();
            (config.base_path().to_string(), config.vision.clone())
        };

        let image_mgr = Arc::new(library::BackendCsv::load(
            &format!("{base_path}/library.csv"),
            space.tag_dim(),
            space.color_dim(),
        )?);
        let storage_mgr = Arc::new(storage::BackendLocal::new(&format!(
            "{base_path}/uploads"
        ))?);

        let vision: Arc<dyn VisionApi> = match VisionClient::new(&vision_config) {
            Ok(client) => Arc::new(client),
            Err(err) => {
                log::warn!("vision api unavailable: {err}");
                Arc::new(VisionUnavailable(err.to_string()))
            }
        };

        log::info!("library loaded: {} images", image_mgr.total()?);

        Ok(Self {
            image_mgr,
            storage_mgr,
            vision,
            space,
            tags_cache: Arc::new(RwLock::new(Vec::new())),
            task_tx: None,
            task_queue_handle: None,
            config,
        })
    }

    pub fn run_queue(&mut self) {
        let (task_tx, task_rx) = mpsc::channel::<Task>();

        let handle = std::thread::spawn({
            let image_mgr = self.image_mgr.clone();
            let vision = self.vision.clone();
            let space = self.space.clone();
            let config = self.config.clone();

            let base_path = config.read().unwrap().base_path().to_string();
            let mut queue_dump = task_runner::read_queue_dump(&base_path);
            let task_list = queue_dump.queue.clone();

            queue_dump.queue = Vec::new();
            task_runner::write_queue_dump(&base_path, &queue_dump);

            std::thread::spawn({
                let task_tx = task_tx.clone();

                move || {
                    for task in task_list {
                        if let Status::Done = task.status {
                            continue;
                        }

                        log::info!("restarting interrupted task \"{:?}\"", task.task);
                        if let Err(err) = task_tx.send(task.task) {
                            log::error!("failed to initialize interrupted task: {err:?}");
                        }
                    }
                }
            });

            move || {
                task_runner::start_queue(task_rx, image_mgr, vision, space, config);
            }
        });

        self.task_queue_handle = Some(handle);
        self.task_tx = Some(Arc::new(task_tx));
    }

    pub fn wait_task_queue_finish(&mut self) {
        if let Some(handle) = self.task_queue_handle.take() {
            if let Err(err) = handle.join() {
                log::error!("task queue panicked: {err:?}");
            }
        }
    }

    pub fn shutdown(&self) {
        if let Some(task_tx) = self.task_tx.as_ref() {
            if let Err(err) = task_tx.send(Task::Shutdown) {
                log::error!("{err}");
            }
        }
    }

    pub fn config(&self) -> Arc<RwLock<Config>> {
        self.config.clone()
    }

    pub fn uploads_dir(&self) -> String {
        format!("{}/uploads", self.config.read().unwrap().base_path())
    }

    /// Map an Authorization header to a configured user id.
    pub fn authenticate(&self, auth_header: Option<&str>) -> anyhow::Result<String, AppError> {
        let tokens = self.config.read().unwrap().api_tokens.clone();
        auth::resolve_user(auth_header, &tokens).ok_or(AppError::Unauthenticated)
    }

    fn schedule_process(&self, record: &ImageRecord) {
        let Some(task_tx) = self.task_tx.as_ref() else {
            log::warn!(
                "task queue is not running, image {} stays pending",
                record.id
            );
            return;
        };

        if let Err(err) = task_tx.send(Task::ProcessImage {
            image_id: record.id.to_string(),
        }) {
            log::error!("{err}");
        };
    }

    fn process_now_or_later(&self, record: &ImageRecord, opts: &UploadOpts) {
        if opts.async_process {
            self.schedule_process(record);
        } else {
            let public_base_url = self.config.read().unwrap().public_base_url.clone();
            // a failure has already marked the record failed
            if let Err(err) = enrich_image(
                &record.id,
                self.image_mgr.as_ref(),
                self.vision.as_ref(),
                &self.space,
                &public_base_url,
            ) {
                log::error!("enrichment failed for {}: {err}", record.id);
            }
        }
    }

    fn owned_record(&self, user_id: &str, id: &str) -> anyhow::Result<ImageRecord, AppError> {
        let record = self.image_mgr.get(id)?.ok_or(AppError::NotFound)?;
        if record.user_id != user_id {
            return Err(AppError::NotAuthorized);
        }
        Ok(record)
    }

    fn schedule_tags_cache_reval(
        image_mgr: Arc<dyn ImageManager>,
        tags_cache: Arc<RwLock<Vec<String>>>,
    ) {
        std::thread::spawn(move || {
            if let Err(err) = Self::tags_cache_reeval(image_mgr, tags_cache) {
                log::error!("{err}");
            }
        });
    }

    fn tags_cache_reeval(
        image_mgr: Arc<dyn ImageManager>,
        tags_cache: Arc<RwLock<Vec<String>>>,
    ) -> anyhow::Result<()> {
        let mut counts = HashMap::new();
        for record in image_mgr.all()? {
            for tag in record.tags {
                *counts.entry(tag).or_insert(0usize) += 1;
            }
        }

        let mut unique_tags: Vec<String> = counts.keys().cloned().collect();
        unique_tags.sort_by(|a, b| counts[b].cmp(&counts[a]).then_with(|| a.cmp(b)));

        *tags_cache.write().unwrap() = unique_tags;

        Ok(())
    }
}

impl AppBackend for AppLocal {
    fn upload(
        &self,
        user_id: &str,
        files: Vec<UploadFile>,
        opts: UploadOpts,
    ) -> anyhow::Result<Vec<ImageRecord>, AppError> {
        let images_config = self.config.read().unwrap().images.clone();

        let mut records = vec![];

        for file in files {
            let Some((_mime, ext)) = imgproc::sniff_image_type(&file.data) else {
                log::warn!("invalid file type for {}", file.filename);
                continue;
            };

            if file.data.len() > images_config.max_upload_bytes {
                log::warn!(
                    "file too large: {} ({:.1}MB)",
                    file.filename,
                    file.data.len() as f64 / 1024.0 / 1024.0
                );
                continue;
            }

            // unique storage ident so repeated filenames never collide
            let stem = Path::new(&file.filename)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("image");
            let file_id = format!("{stem}_{}", Eid::new());
            let original_path = format!("{user_id}/{file_id}.{ext}");

            if let Err(err) = self.storage_mgr.write(&original_path, &file.data) {
                log::error!("storage upload error for {}: {err}", file.filename);
                continue;
            }
            log::info!("file uploaded: {original_path}");

            let thumbnail_path = match imgproc::make_thumbnail(
                &file.data,
                images_config.thumbnail_max_dimension,
                images_config.thumbnail_quality,
            ) {
                Ok(thumb) => {
                    let thumb_path = format!("{user_id}/{file_id}_thumb.webp");
                    match self.storage_mgr.write(&thumb_path, &thumb) {
                        Ok(_) => Some(thumb_path),
                        Err(err) => {
                            log::warn!("couldnt store thumbnail for {}: {err}", file.filename);
                            None
                        }
                    }
                }
                Err(err) => {
                    log::warn!("couldnt build thumbnail for {}: {err}", file.filename);
                    None
                }
            };

            let record = self.image_mgr.create(ImageCreate {
                user_id: user_id.to_string(),
                filename: file.filename,
                original_path,
                thumbnail_path,
            })?;
            log::info!("image record created: {} with status=pending", record.id);

            self.process_now_or_later(&record, &opts);

            records.push(record);
        }

        Self::schedule_tags_cache_reval(self.image_mgr.clone(), self.tags_cache.clone());

        Ok(records)
    }

    fn get(&self, id: &str) -> anyhow::Result<ImageRecord, AppError> {
        Ok(self.image_mgr.get(id)?.ok_or(AppError::NotFound)?)
    }

    fn list(&self, user_id: &str, query: ImageQuery) -> anyhow::Result<Page, AppError> {
        query.validate().map_err(AppError::InvalidQuery)?;

        let records = self.image_mgr.list(user_id)?;
        Ok(search::list_images(&records, &query, &self.space))
    }

    fn similar(&self, user_id: &str, query: ImageQuery) -> anyhow::Result<Page, AppError> {
        query.validate().map_err(AppError::InvalidQuery)?;

        let records = self.image_mgr.list(user_id)?;
        Ok(search::similar_images(&records, &query, &self.space))
    }

    fn download(&self, user_id: &str, id: &str) -> anyhow::Result<(String, Vec<u8>), AppError> {
        let record = self.owned_record(user_id, id)?;
        let data = self.storage_mgr.read(&record.original_path)?;
        Ok((record.filename, data))
    }

    fn delete(&self, user_id: &str, id: &str) -> anyhow::Result<(), AppError> {
        let record = self.owned_record(user_id, id)?;

        // storage failures dont block record removal
        if let Err(err) = self.storage_mgr.delete(&record.original_path) {
            log::warn!("storage delete warning: {err}");
        }
        if let Some(thumb) = &record.thumbnail_path {
            if self.storage_mgr.exists(thumb) {
                if let Err(err) = self.storage_mgr.delete(thumb) {
                    log::warn!("storage delete warning: {err}");
                }
            }
        }

        if !self.image_mgr.delete(id)? {
            return Err(AppError::NotFound);
        }
        log::info!("image deleted: {id}");

        Self::schedule_tags_cache_reval(self.image_mgr.clone(), self.tags_cache.clone());

        Ok(())
    }

    fn reprocess(
        &self,
        user_id: &str,
        id: &str,
        opts: UploadOpts,
    ) -> anyhow::Result<(), AppError> {
        let record = self.owned_record(user_id, id)?;

        let record = self
            .image_mgr
            .update(
                &record.id,
                ImageUpdate {
                    status: Some(ProcessingStatus::Pending),
                    clear_vectors: true,
                    ..Default::default()
                },
            )?
            .ok_or(AppError::NotFound)?;

        self.process_now_or_later(&record, &opts);

        Ok(())
    }

    fn public_url(&self, id: &str) -> anyhow::Result<(ImageRecord, String), AppError> {
        let record = self.image_mgr.get(id)?.ok_or(AppError::NotFound)?;

        let public_base_url = self.config.read().unwrap().public_base_url.clone();
        let url = file_url(&public_base_url, &record.original_path);

        Ok((record, url))
    }

    fn tags(&self) -> anyhow::Result<Vec<String>, AppError> {
        if self.tags_cache.read().unwrap().is_empty() {
            Self::tags_cache_reeval(self.image_mgr.clone(), self.tags_cache.clone())?;
        }

        Ok(self.tags_cache.read().unwrap().to_vec())
    }
}

/// URL a stored file is served at; handed to the vision API and to
/// public-url callers.
pub fn file_url(public_base_url: &str, original_path: &str) -> String {
    format!(
        "{}/api/file/{original_path}",
        public_base_url.trim_end_matches('/')
    )
}

/// Run AI enrichment for one record: extract keywords, colors and a
/// caption, encode vectors, mark completed. Any failure marks the record
/// failed and is never propagated to the original uploader.
pub fn enrich_image(
    image_id: &str,
    image_mgr: &dyn ImageManager,
    vision: &dyn VisionApi,
    space: &VectorSpace,
    public_base_url: &str,
) -> anyhow::Result<()> {
    log::info!("starting image processing for {image_id}");

    let result = run_enrichment(image_id, image_mgr, vision, space, public_base_url);

    if let Err(ref err) = result {
        log::error!("error processing image {image_id}: {err}");
        let failed = ImageUpdate {
            status: Some(ProcessingStatus::Failed),
            ..Default::default()
        };
        if let Err(err) = image_mgr.update(image_id, failed) {
            log::error!("error updating metadata status: {err}");
        }
    }

    result
}

fn run_enrichment(
    image_id: &str,
    image_mgr: &dyn ImageManager,
    vision: &dyn VisionApi,
    space: &VectorSpace,
    public_base_url: &str,
) -> anyhow::Result<()> {
    let record = image_mgr
        .get(image_id)?
        .ok_or_else(|| anyhow!("image {image_id} not found"))?;

    let enrichment = vision.analyze(&file_url(public_base_url, &record.original_path))?;

    let keywords: Vec<String> = enrichment
        .keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    let colors: Vec<String> = enrichment
        .colors
        .iter()
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect();

    let tag_vec = (!keywords.is_empty()).then(|| space.tag_vector(&keywords));
    let color_vec = (!colors.is_empty()).then(|| space.color_vector(&colors));

    log::info!(
        "generated vectors for {image_id}: tag_vec={}d, color_vec={}d",
        tag_vec.as_ref().map(|v| v.len()).unwrap_or(0),
        color_vec.as_ref().map(|v| v.len()).unwrap_or(0),
    );

    image_mgr
        .update(
            image_id,
            ImageUpdate {
                description: enrichment.caption,
                tags: Some(keywords),
                colors: Some(colors),
                tag_vec,
                color_vec,
                status: Some(ProcessingStatus::Completed),
                ..Default::default()
            },
        )?
        .ok_or_else(|| anyhow!("image {image_id} disappeared during processing"))?;

    log::info!("image processing completed for {image_id}");

    Ok(())
}

#[cfg(test)]
impl AppLocal {
    pub fn new_with(
        image_mgr: Arc<dyn ImageManager>,
        storage_mgr: Arc<dyn StorageManager>,
        vision: Arc<dyn VisionApi>,
        config: Arc<RwLock<Config>>,
    ) -> Self {
        Self {
            image_mgr,
            storage_mgr,
            vision,
            space: VectorSpace::default(),
            tags_cache: Arc::new(RwLock::new(Vec::new())),
            task_tx: None,
            task_queue_handle: None,
            config,
        }
    }
}
