use serde::Deserialize;
use std::{fs, path::Path};
use thiserror::Error;
use toml_edit::{DocumentMut, Item, value};
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config document: {0}")]
    Edit(#[from] toml_edit::TomlError),
    #[error("`{0}` is not a table")]
    NotATable(String),
    #[error("empty config key")]
    EmptyKey,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmSection,
    pub sheets: SheetsSection,
    pub store: StoreSection,
    pub server: ServerSection,
    pub ocr: OcrSection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    /// Groq when `GROQ_API_KEY` is set, Ollama otherwise.
    #[default]
    Auto,
    Groq,
    Ollama,
    Heuristics,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub backend: LlmBackend,
    pub max_content_chars: usize,
    pub request_timeout_secs: u64,
    pub groq: GroqConfig,
    pub ollama: OllamaConfig,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            backend: LlmBackend::Auto,
            max_content_chars: 12_000,
            request_timeout_secs: 120,
            groq: GroqConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GroqConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    /// Only ever read from `GROQ_API_KEY`.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for GroqConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.1-8b-instant".to_string(),
            max_tokens: 600,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "phi3:mini".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SheetsSection {
    pub spreadsheet_id: Option<String>,
    pub range: String,
    /// Path to a service account key file. `GOOGLE_SERVICE_ACCOUNT_JSON`
    /// (the key itself, inline) takes precedence.
    pub service_account_file: Option<String>,
    #[serde(skip)]
    pub service_account_json: Option<String>,
}

impl Default for SheetsSection {
    fn default() -> Self {
        Self {
            spreadsheet_id: None,
            range: "Sheet1!A:Z".to_string(),
            service_account_file: None,
            service_account_json: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub enabled: bool,
    pub db_path: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "records/extractions.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub max_upload_mb: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            max_upload_mb: 25,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OcrSection {
    pub enabled: bool,
    pub tesseract_lang: String,
}

impl Default for OcrSection {
    fn default() -> Self {
        Self {
            enabled: true,
            tesseract_lang: "eng".to_string(),
        }
    }
}

/// Trimmed, non-empty environment variable.
fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load the file if present, otherwise start from defaults; then apply
    /// environment overrides.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut cfg = if path.exists() {
            info!(path = %path.display(), "Loading config");
            Self::load(path)?
        } else {
            info!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(env_value);
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.llm.groq.api_key = lookup("GROQ_API_KEY");
        if let Some(model) = lookup("GROQ_MODEL") {
            self.llm.groq.model = model;
        }
        if let Some(url) = lookup("OLLAMA_URL") {
            self.llm.ollama.base_url = url;
        }
        if let Some(model) = lookup("OLLAMA_MODEL") {
            self.llm.ollama.model = model;
        }
        self.sheets.service_account_json = lookup("GOOGLE_SERVICE_ACCOUNT_JSON");
        if let Some(id) = lookup("GOOGLE_SHEETS_SPREADSHEET_ID") {
            self.sheets.spreadsheet_id = Some(id);
        }
        if let Some(range) = lookup("GOOGLE_SHEETS_RANGE") {
            self.sheets.range = range;
        }
    }

    /// Set `dotted.key = raw` in the TOML file, keeping its comments and
    /// layout. Booleans and numbers are written typed, anything else as a
    /// string. The file is created if missing.
    pub fn set_value(path: impl AsRef<Path>, key: &str, raw: &str) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = if path.exists() {
            fs::read_to_string(path)?
        } else {
            String::new()
        };
        let mut doc = content.parse::<DocumentMut>()?;

        let segments: Vec<&str> = key.split('.').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            return Err(ConfigError::EmptyKey);
        };

        let mut table = doc.as_table_mut();
        for segment in parents {
            let entry = table
                .entry(segment)
                .or_insert_with(|| Item::Table(toml_edit::Table::new()));
            table = entry
                .as_table_mut()
                .ok_or_else(|| ConfigError::NotATable(segment.to_string()))?;
        }
        table[*last] = typed_value(raw);

        fs::write(path, doc.to_string())?;
        info!(path = %path.display(), key, "Config updated");
        Ok(())
    }
}

fn typed_value(raw: &str) -> Item {
    if let Ok(b) = raw.parse::<bool>() {
        value(b)
    } else if let Ok(i) = raw.parse::<i64>() {
        value(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        value(f)
    } else {
        value(raw)
    }
}
