use crate::{
    app::{task_runner, AppBackend, AppError, AppLocal, UploadFile, UploadOpts},
    config::Config,
    library::ImageRecord,
    parse_csv_list,
    search::{self, ImageQuery, Page},
};
use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt::Debug, sync::Arc};
use tokio::{signal, sync::RwLock};

#[derive(Clone)]
struct SharedState {
    app: Arc<RwLock<AppLocal>>,
}

async fn start_app(app: AppLocal) {
    let uploads_dir = app.uploads_dir();
    let bind_addr = app.config().read().unwrap().bind_addr.clone();

    let app = Arc::new(RwLock::new(app));

    let signal = shutdown_signal(app.clone());
    let shared_state = Arc::new(SharedState { app: app.clone() });

    async fn shutdown_signal(app: Arc<RwLock<AppLocal>>) {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::select! {
            _ = ctrl_c => {
                let mut app = app.write().await;
                app.shutdown();

                // join on queue thread handle
                log::warn!("waiting for queues to stop");
                app.wait_task_queue_finish();
            },
            _ = terminate => {},
        }
    }

    let router = Router::new()
        .nest_service(
            "/api/file",
            tower_http::services::ServeDir::new(uploads_dir),
        )
        .route("/api/images/upload", post(upload_images))
        .route("/api/images", get(list_images))
        .route("/api/images/similar", get(similar_images))
        .route("/api/images/:id", get(get_image))
        .route("/api/images/:id", delete(delete_image))
        .route("/api/images/:id/download", get(download_image))
        .route("/api/images/:id/public-url", get(get_public_url))
        .route("/api/images/:id/process", post(process_image))
        .route("/api/tags", get(tags))
        .route("/api/task_queue", get(task_queue))
        .route("/api/config", get(get_config))
        .route("/api/config", post(update_config))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await.unwrap();
    log::info!("listening on {bind_addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(signal)
        .await
        .unwrap();
}

pub fn start_daemon(app: AppLocal) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async { start_app(app).await });
}

// Make our own error that wraps `AppError`.
#[derive(Debug)]
struct HttpError(AppError);

// Tell axum how to convert `AppError` into a response.
impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::NotAuthorized => StatusCode::FORBIDDEN,
            AppError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            AppError::Base64(_) => StatusCode::BAD_REQUEST,
            AppError::Reqwest(_) | AppError::IO(_) | AppError::Other(_) => {
                log::error!("{self:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, json!({"error": self.0.to_string()}).to_string()).into_response()
    }
}

// This enables using `?` on functions that return `Result<_, anyhow::Error>` to turn them into
// `Result<_, AppError>`. That way you don't need to do that manually.
impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// Standard envelope all non-paginated endpoints return.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUploadResponse {
    pub id: String,
    pub filename: String,
    pub original_path: String,
    pub user_id: String,
    pub uploaded_at: DateTime<Utc>,
    pub ai_processing_status: String,
}

impl From<&ImageRecord> for ImageUploadResponse {
    fn from(record: &ImageRecord) -> Self {
        Self {
            id: record.id.to_string(),
            filename: record.filename.clone(),
            original_path: record.original_path.clone(),
            user_id: record.user_id.clone(),
            uploaded_at: record.uploaded_at,
            ai_processing_status: record.status.to_string(),
        }
    }
}

/// Complete image with AI-processed metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ImageMetadataResponse {
    pub id: String,
    pub filename: String,
    pub original_path: String,
    pub thumbnail_path: Option<String>,
    pub user_id: String,
    pub uploaded_at: DateTime<Utc>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub colors: Option<Vec<String>>,
    pub tag_vec: Option<Vec<f32>>,
    pub color_vec: Option<Vec<f32>>,
    pub ai_processing_status: String,
}

impl From<&ImageRecord> for ImageMetadataResponse {
    fn from(record: &ImageRecord) -> Self {
        Self {
            id: record.id.to_string(),
            filename: record.filename.clone(),
            original_path: record.original_path.clone(),
            thumbnail_path: record.thumbnail_path.clone(),
            user_id: record.user_id.clone(),
            uploaded_at: record.uploaded_at,
            description: record.description.clone(),
            tags: (!record.tags.is_empty()).then(|| record.tags.clone()),
            colors: (!record.colors.is_empty()).then(|| record.colors.clone()),
            tag_vec: record.tag_vec.clone(),
            color_vec: record.color_vec.clone(),
            ai_processing_status: record.status.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginatedImagesResponse {
    pub data: Vec<ImageMetadataResponse>,
    /// items in current page
    pub count: usize,
    /// total items matching the filters
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub message: String,
}

impl From<Page> for PaginatedImagesResponse {
    fn from(page: Page) -> Self {
        Self {
            data: page.data.iter().map(ImageMetadataResponse::from).collect(),
            count: page.count,
            total: page.total,
            page: page.page,
            page_size: page.page_size,
            message: "Images retrieved successfully".to_string(),
        }
    }
}

/// Public image info with public URL.
#[derive(Debug, Clone, Serialize)]
pub struct ImagePublicResponse {
    pub id: String,
    pub filename: String,
    pub user_id: String,
    pub uploaded_at: DateTime<Utc>,
    pub url: String,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub colors: Option<Vec<String>>,
    pub tag_vec: Option<Vec<f32>>,
    pub color_vec: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResponse {
    pub filename: String,
    pub content_b64: String,
    pub size: usize,
}

#[derive(Deserialize)]
pub struct UploadItem {
    pub filename: String,
    pub data_b64: String,
}

impl Debug for UploadItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "UploadItem {{ filename: {:?}, data_b64: [REDACTED] }}",
            self.filename
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub files: Vec<UploadItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub skip: Option<usize>,
    pub limit: Option<usize>,

    /// comma separated tag name(s), e.g. person,women
    pub tag: Option<String>,

    /// description search text
    pub desc: Option<String>,

    /// comma separated color(s), names or hex, e.g. red,#0000FF
    pub color: Option<String>,

    /// similarity threshold [0.0, 1.0]
    pub threshold: Option<f32>,
}

impl ListParams {
    fn into_query(self) -> ImageQuery {
        ImageQuery {
            tags: self.tag.map(|t| parse_csv_list(&t)),
            description: self.desc,
            colors: self.color.map(|c| parse_csv_list(&c)),
            threshold: self
                .threshold
                .unwrap_or(search::DEFAULT_SIMILARITY_THRESHOLD),
            skip: self.skip.unwrap_or(0),
            limit: self.limit.unwrap_or(search::DEFAULT_LIMIT),
        }
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok())
}

async fn upload_images(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Json(payload): Json<UploadRequest>,
) -> Result<impl IntoResponse, HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let user_id = app.authenticate(bearer(&headers))?;

        let mut files = vec![];
        for item in payload.files {
            let data = STANDARD.decode(item.data_b64)?;
            files.push(UploadFile {
                filename: item.filename,
                data,
            });
        }

        let records = app.upload(
            &user_id,
            files,
            UploadOpts {
                async_process: true,
            },
        )?;

        let responses: Vec<ImageUploadResponse> =
            records.iter().map(ImageUploadResponse::from).collect();

        // single upload gets a bare object, batches get a list
        let body = if responses.len() == 1 {
            ApiResponse {
                data: Some(json!(responses[0])),
                message: "Image uploaded successfully".to_string(),
            }
        } else {
            ApiResponse {
                data: Some(json!(responses)),
                message: format!("{} images uploaded successfully", responses.len()),
            }
        };

        Ok((StatusCode::CREATED, Json(body)))
    })
}

async fn list_images(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<PaginatedImagesResponse>, HttpError> {
    log::debug!("params: {params:?}");

    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let user_id = app.authenticate(bearer(&headers))?;

        let page = app.list(&user_id, params.into_query())?;
        Ok(Json(page.into()))
    })
}

async fn similar_images(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<PaginatedImagesResponse>, HttpError> {
    log::debug!("params: {params:?}");

    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let user_id = app.authenticate(bearer(&headers))?;

        let page = app.similar(&user_id, params.into_query())?;
        Ok(Json(page.into()))
    })
}

async fn get_image(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ImageMetadataResponse>>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let record = app.get(&id)?;

        Ok(Json(ApiResponse {
            data: Some(ImageMetadataResponse::from(&record)),
            message: "Image retrieved successfully".to_string(),
        }))
    })
}

async fn download_image(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<DownloadResponse>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let user_id = app.authenticate(bearer(&headers))?;

        let (filename, data) = app.download(&user_id, &id)?;

        Ok(Json(DownloadResponse {
            filename,
            size: data.len(),
            content_b64: STANDARD.encode(data),
        }))
    })
}

async fn get_public_url(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<String>,
) -> Result<Json<ImagePublicResponse>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let (record, url) = app.public_url(&id)?;

        Ok(Json(ImagePublicResponse {
            id: record.id.to_string(),
            filename: record.filename.clone(),
            user_id: record.user_id.clone(),
            uploaded_at: record.uploaded_at,
            url,
            description: record.description.clone(),
            tags: (!record.tags.is_empty()).then(|| record.tags.clone()),
            colors: (!record.colors.is_empty()).then(|| record.colors.clone()),
            tag_vec: record.tag_vec.clone(),
            color_vec: record.color_vec.clone(),
        }))
    })
}

async fn process_image(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let user_id = app.authenticate(bearer(&headers))?;

        app.reprocess(
            &user_id,
            &id,
            UploadOpts {
                async_process: true,
            },
        )?;

        Ok((
            StatusCode::ACCEPTED,
            Json(ApiResponse {
                data: Some(json!({ "id": id, "ai_processing_status": "pending" })),
                message: "Image processing scheduled".to_string(),
            }),
        ))
    })
}

async fn delete_image(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let user_id = app.authenticate(bearer(&headers))?;

        app.delete(&user_id, &id)?;
        Ok(StatusCode::NO_CONTENT)
    })
}

async fn tags(State(state): State<Arc<SharedState>>) -> Result<Json<Vec<String>>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        app.tags().map(Into::into).map_err(Into::into)
    })
}

async fn task_queue(
    State(state): State<Arc<SharedState>>,
) -> Result<Json<task_runner::QueueDump>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        let base_path = app.config().read().unwrap().base_path().to_string();
        Ok(task_runner::read_queue_dump(&base_path).into())
    })
}

async fn get_config(
    State(state): State<Arc<SharedState>>,
) -> Result<Json<Config>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        Ok(app.config().read().unwrap().clone().into())
    })
}

async fn update_config(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<Config>,
) -> Result<Json<Config>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let app = app.blocking_read();
        app.config().write().unwrap().update_from(payload);
        app.config().read().unwrap().save();
        Ok(app.config().read().unwrap().clone().into())
    })
}
