//! Runtime settings read from the environment.

use std::path::PathBuf;

/// Relationship expansion depth used when a request does not ask for another one.
pub const DEFAULT_RELATION_DEPTH: usize = 2;

pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: u32 = 1000;

#[derive(Clone, Debug)]
pub struct Settings {
    pub api_base_path: String,
    pub relation_depth: usize,
    /// Master switch; a model must also have validation enabled.
    pub global_validation: bool,
    pub default_page_size: u32,
    /// PostgreSQL schema holding one table per model.
    pub schema: String,
    pub database_url: Option<String>,
    pub models_path: PathBuf,
    pub listen_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            api_base_path: "/api".into(),
            relation_depth: DEFAULT_RELATION_DEPTH,
            global_validation: true,
            default_page_size: DEFAULT_PAGE_SIZE,
            schema: "restmodel".into(),
            database_url: None,
            models_path: PathBuf::from("demos/models"),
            listen_addr: "0.0.0.0:3000".into(),
        }
    }
}

impl Settings {
    /// Read `RESTMODEL_*`, `DATABASE_URL`, `MODELS_PATH` and `LISTEN_ADDR`; unset or unparsable values keep defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Settings::default();
        Settings {
            api_base_path: lookup("RESTMODEL_API_BASE_PATH").unwrap_or(d.api_base_path),
            relation_depth: parsed(&lookup, "RESTMODEL_RELATION_DEPTH").unwrap_or(d.relation_depth),
            global_validation: lookup("RESTMODEL_GLOBAL_VALIDATION")
                .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no" | "off"))
                .unwrap_or(d.global_validation),
            default_page_size: parsed(&lookup, "RESTMODEL_PAGE_SIZE")
                .map(|n: u32| n.clamp(1, MAX_PAGE_SIZE))
                .unwrap_or(d.default_page_size),
            schema: lookup("RESTMODEL_SCHEMA").unwrap_or(d.schema),
            database_url: lookup("DATABASE_URL").filter(|s| !s.trim().is_empty()),
            models_path: lookup("MODELS_PATH").map(PathBuf::from).unwrap_or(d.models_path),
            listen_addr: lookup("LISTEN_ADDR").unwrap_or(d.listen_addr),
        }
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("{}={} is not valid, using default", key, raw);
            None
        }
    }
}
