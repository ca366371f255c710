use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Browser configuration, loaded from a TOML file. Every field has a
/// default so a partial (or absent) file works.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub start_page: String,
    pub text_display: TextDisplay,
    pub use_os_scheme_handler: bool,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub protocols: ProtocolTable,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            start_page: "gemini://tlgs.one/".to_string(),
            text_display: TextDisplay::Fancy,
            use_os_scheme_handler: false,
            cert_file: None,
            key_file: None,
            protocols: ProtocolTable::default(),
        }
    }
}

/// `plain` forces every text response through the plain-text renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextDisplay {
    Fancy,
    Plain,
}

/// Per-scheme enable switches.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProtocolTable {
    pub gemini: bool,
    pub gopher: bool,
    pub finger: bool,
    pub http: bool,
    pub https: bool,
    pub file: bool,
    pub about: bool,
}

impl Default for ProtocolTable {
    fn default() -> Self {
        Self {
            gemini: true,
            gopher: true,
            finger: true,
            http: true,
            https: true,
            file: true,
            about: true,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config from {}", path.display()))
    }
}
