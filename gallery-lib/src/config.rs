use anyhow::{Context, Result, anyhow, bail};
use reqwest::Url;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 1024 * 1024;
pub const DEFAULT_QUALITY_STEP: f32 = 0.1;
pub const DEFAULT_QUALITY_FLOOR: f32 = 0.1;

const BASE_URL_ENV: &str = "GALLERY_BASE_URL";
const TOKEN_ENV: &str = "GALLERY_TOKEN";
const CONFIG_FILE_NAME: &str = "gallery.toml";

#[derive(Clone)]
pub struct Config {
    /// Root of the asset server, e.g. `http://media.example.com:1337`
    pub base_url: Url,

    /// Bearer token sent with every request
    pub token: String,

    /// Budget and quality search used before uploading
    pub compression: CompressionSettings,

    /// Directory where the CLI stores downloaded images
    pub download_dir: PathBuf,
}

/// Knobs of the JPEG quality search.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    pub max_bytes: usize,
    pub quality_step: f32,
    pub quality_floor: f32,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            quality_step: DEFAULT_QUALITY_STEP,
            quality_floor: DEFAULT_QUALITY_FLOOR,
        }
    }
}

impl CompressionSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_bytes == 0 {
            bail!("compression.max_bytes must be greater than zero");
        }
        for (name, value) in [
            ("quality_step", self.quality_step),
            ("quality_floor", self.quality_floor),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                bail!("compression.{name} must be within (0.0, 1.0], got {value}");
            }
        }
        Ok(())
    }
}

/// Layout of `gallery.toml`.
#[derive(Deserialize, Debug, Default)]
struct ConfigToml {
    server: Option<ServerToml>,
    compression: Option<CompressionSettings>,
    download_dir: Option<PathBuf>,
}

/// `[server]` toml section.
#[derive(Deserialize, Debug, Default)]
struct ServerToml {
    base_url: Option<String>,
    token: Option<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"<redacted>")
            .field("compression", &self.compression)
            .field("download_dir", &self.download_dir)
            .finish()
    }
}

impl Config {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid server base URL: {base_url}"))?;
        Ok(Self {
            base_url,
            token: token.into(),
            compression: CompressionSettings::default(),
            download_dir: Self::default_data_dir().join("downloads"),
        })
    }

    /// Loads the configuration file (or the default one, if it exists) and applies
    /// the `GALLERY_BASE_URL` / `GALLERY_TOKEN` environment overrides.
    pub fn setup(config_file: Option<&Path>) -> Result<Self> {
        let content = match config_file {
            Some(path) => Some(
                fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?,
            ),
            None => {
                let path = Self::default_config_file();
                if path.exists() {
                    Some(fs::read_to_string(&path)?)
                } else {
                    None
                }
            }
        };

        let config = Self::from_sources(content.as_deref(), |key| std::env::var(key).ok())?;
        fs::create_dir_all(&config.download_dir).with_context(|| {
            format!(
                "Failed to create download directory {}",
                config.download_dir.display()
            )
        })?;

        tracing::debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    fn from_sources(toml_content: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file = match toml_content {
            Some(content) => {
                toml::from_str::<ConfigToml>(content).context("Failed to parse gallery.toml")?
            }
            None => ConfigToml::default(),
        };
        let server = file.server.unwrap_or_default();

        let base_url = env(BASE_URL_ENV)
            .or(server.base_url)
            .ok_or_else(|| anyhow!("No server base URL configured (set {BASE_URL_ENV})"))?;
        let token = env(TOKEN_ENV)
            .or(server.token)
            .ok_or_else(|| anyhow!("No API token configured (set {TOKEN_ENV})"))?;

        let mut config = Self::new(&base_url, token)?;
        if let Some(compression) = file.compression {
            compression.validate()?;
            config.compression = compression;
        }
        if let Some(download_dir) = file.download_dir {
            config.download_dir = download_dir;
        }
        Ok(config)
    }

    /// Appends an API path to the base URL. The base may carry a path prefix,
    /// so the path is appended rather than resolved with [`Url::join`].
    pub fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let prefix = self.base_url.path().trim_end_matches('/');
        url.set_path(&format!("{prefix}{path}"));
        url
    }

    /// Prefixes a server-relative asset path with the base URL.
    /// Returns `None` when the result is not a valid URL.
    pub fn resolve(&self, relative_path: &str) -> Option<Url> {
        Url::parse(&format!("{}{}", self.base_str(), relative_path)).ok()
    }

    pub fn base_str(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    pub fn default_config_file() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".config"))
            .join("gallery")
            .join(CONFIG_FILE_NAME)
    }

    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"))
            .join("gallery")
    }
}
