use crate::storage::{self, StorageManager};
use serde::{Deserialize, Serialize};

const TASK_QUEUE_MAX_THREADS: u16 = 4;

const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
const DEFAULT_THUMBNAIL_MAX_DIMENSION: u32 = 400;
const DEFAULT_THUMBNAIL_QUALITY: u8 = 85;

const DEFAULT_VISION_TIMEOUT_SECS: u64 = 15;
const DEFAULT_NUM_KEYWORDS: u8 = 5;
const DEFAULT_NUM_COLORS: u8 = 3;

/// A bearer token the identity platform issued for a user. The server only
/// resolves tokens to user ids; it never mints them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiToken {
    pub user_id: String,
    pub token: String,
}

/// Vision API credentials and extraction knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VisionConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,

    #[serde(default = "default_num_keywords")]
    pub num_keywords: u8,
    #[serde(default = "default_num_colors")]
    pub num_colors: u8,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default = "default_vision_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            num_keywords: DEFAULT_NUM_KEYWORDS,
            num_colors: DEFAULT_NUM_COLORS,
            lang: default_lang(),
            timeout_secs: DEFAULT_VISION_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImagesConfig {
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    #[serde(default = "default_thumbnail_max_dimension")]
    pub thumbnail_max_dimension: u32,
    #[serde(default = "default_thumbnail_quality")]
    pub thumbnail_quality: u8,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            thumbnail_max_dimension: DEFAULT_THUMBNAIL_MAX_DIMENSION,
            thumbnail_quality: DEFAULT_THUMBNAIL_QUALITY,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "task_queue_max_threads")]
    pub task_queue_max_threads: u16,

    /// Base URL the daemon is reachable at; used to build the file URLs
    /// handed to the vision API and the public-url endpoint.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default)]
    pub api_tokens: Vec<ApiToken>,

    #[serde(default)]
    pub vision: VisionConfig,

    #[serde(default)]
    pub images: ImagesConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            task_queue_max_threads: TASK_QUEUE_MAX_THREADS,
            public_base_url: default_public_base_url(),
            bind_addr: default_bind_addr(),
            api_tokens: vec![],
            vision: VisionConfig::default(),
            images: ImagesConfig::default(),
            base_path: String::new(),
        }
    }
}

fn task_queue_max_threads() -> u16 {
    TASK_QUEUE_MAX_THREADS
}

fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_lang() -> String {
    "en".to_string()
}

fn default_max_upload_bytes() -> usize {
    DEFAULT_MAX_UPLOAD_BYTES
}

fn default_thumbnail_max_dimension() -> u32 {
    DEFAULT_THUMBNAIL_MAX_DIMENSION
}

fn default_thumbnail_quality() -> u8 {
    DEFAULT_THUMBNAIL_QUALITY
}

fn default_vision_timeout_secs() -> u64 {
    DEFAULT_VISION_TIMEOUT_SECS
}

fn default_num_keywords() -> u8 {
    DEFAULT_NUM_KEYWORDS
}

fn default_num_colors() -> u8 {
    DEFAULT_NUM_COLORS
}

/// Data directory, overridable with IV_BASE_PATH.
pub fn base_path() -> String {
    std::env::var("IV_BASE_PATH").unwrap_or_else(|_| {
        format!(
            "{}/.local/share/iv",
            homedir::my_home()
                .expect("couldnt find home dir")
                .expect("couldnt find home dir")
                .to_string_lossy()
        )
    })
}

impl Config {
    fn validate(&mut self) {
        if self.task_queue_max_threads == 0 {
            self.task_queue_max_threads = 1
        }

        if self.bind_addr.is_empty() {
            self.bind_addr = default_bind_addr();
        }
        if self.public_base_url.is_empty() {
            self.public_base_url = default_public_base_url();
        }

        if self.images.max_upload_bytes == 0 {
            panic!("images.max_upload_bytes must be greater than 0");
        }
        if self.images.thumbnail_max_dimension == 0 {
            panic!("images.thumbnail_max_dimension must be greater than 0");
        }
        if self.images.thumbnail_quality == 0 || self.images.thumbnail_quality > 100 {
            panic!(
                "images.thumbnail_quality must be in [1, 100], got {}",
                self.images.thumbnail_quality
            );
        }

        if self.vision.timeout_secs == 0 {
            panic!("vision.timeout_secs must be greater than 0");
        }

        for (idx, entry) in self.api_tokens.iter().enumerate() {
            if entry.user_id.is_empty() || entry.token.is_empty() {
                let idx = idx + 1;
                panic!("api_tokens entry #{idx} is missing user_id or token");
            }
        }
    }

    pub fn load() -> Self {
        Self::load_with(&base_path())
    }

    pub fn load_with(base_path: &str) -> Self {
        let store = storage::BackendLocal::new(base_path).expect("couldnt create base path");

        // create new if does not exist
        if !store.exists("config.yaml") {
            store
                .write(
                    "config.yaml",
                    serde_yml::to_string(&Self::default()).unwrap().as_bytes(),
                )
                .expect("couldnt write default config");
        }

        let config_str =
            String::from_utf8(store.read("config.yaml").expect("couldnt read config"))
                .expect("config file is not valid utf8");
        let mut config: Self = serde_yml::from_str(&config_str).expect("config is malformed");

        config.base_path = base_path.to_string();

        config.validate();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config).unwrap() {
            config.save();
        }

        config
    }

    pub fn save(&self) {
        let store =
            storage::BackendLocal::new(&self.base_path).expect("couldnt create base path");

        let config_str = serde_yml::to_string(&self).unwrap();
        if let Err(err) = store.write("config.yaml", config_str.as_bytes()) {
            log::error!("failed to save config: {err}");
        }
    }

    /// Replace the config with an externally supplied one, keeping the
    /// base path this instance was loaded from.
    pub fn update_from(&mut self, mut new: Config) {
        new.base_path = self.base_path.clone();
        if new.task_queue_max_threads == 0 {
            new.task_queue_max_threads = 1;
        }
        *self = new;
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_with(tmp.path().to_str().unwrap());

        assert_eq!(config.task_queue_max_threads, TASK_QUEUE_MAX_THREADS);
        assert_eq!(config.images.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert!(config.api_tokens.is_empty());

        // second load reads the file written by the first
        let again = Config::load_with(tmp.path().to_str().unwrap());
        assert_eq!(again.vision.num_keywords, config.vision.num_keywords);
    }

    #[test]
    fn test_zero_threads_coerced() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.yaml"),
            "task_queue_max_threads: 0\n",
        )
        .unwrap();

        let config = Config::load_with(tmp.path().to_str().unwrap());
        assert_eq!(config.task_queue_max_threads, 1);
    }
}
