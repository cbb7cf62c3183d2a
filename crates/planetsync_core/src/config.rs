use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILENAME: &str = "planetsync.toml";
pub const DEFAULT_API_URL: &str = "https://www.sarna.net/api.php";
pub const DEFAULT_USER_AGENT: &str = "planetsync/0.1";
pub const DEFAULT_EDIT_SUMMARY: &str =
    "Updating Planet coordinates per BattleTechWiki:Project_Planets/Mapping";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct ToolConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub audit: AuditSection,
    #[serde(default)]
    pub images: ImageSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    /// Redirect hops followed per article, shared by audit and image runs.
    pub max_redirects: usize,
}

impl Default for WikiSection {
    fn default() -> Self {
        Self {
            api_url: None,
            user_agent: None,
            max_redirects: crate::remote::DEFAULT_MAX_REDIRECTS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuditSection {
    pub input: PathBuf,
    pub output: PathBuf,
    pub concurrency: usize,
    pub summary: String,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            input: PathBuf::from("suc.tsv"),
            output: PathBuf::from("sarna-audit.csv"),
            concurrency: 1,
            summary: DEFAULT_EDIT_SUMMARY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ImageSection {
    pub dir: PathBuf,
    pub version: String,
    pub year: u32,
    pub neighbor_radius: f64,
    pub skip_remote_check: bool,
    pub force_comment_edit: bool,
}

impl Default for ImageSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("planet-images"),
            version: "1.1.2".to_string(),
            year: 3151,
            neighbor_radius: 60.0,
            skip_remote_check: true,
            force_comment_edit: false,
        }
    }
}

impl ToolConfig {
    /// Resolve the wiki API URL: env WIKI_API_URL > config > DEFAULT_API_URL.
    pub fn api_url(&self) -> String {
        env_override("WIKI_API_URL")
            .or_else(|| self.wiki.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }
}

/// Bot credentials from WIKI_BOT_USER / WIKI_BOT_PASS.
pub fn credentials_from_env() -> Result<(String, String)> {
    let username = env_override("WIKI_BOT_USER")
        .ok_or_else(|| anyhow::anyhow!("WIKI_BOT_USER is required to edit the wiki"))?;
    let password = env_override("WIKI_BOT_PASS")
        .ok_or_else(|| anyhow::anyhow!("WIKI_BOT_PASS is required to edit the wiki"))?;
    Ok((username, password))
}

/// Load and parse a ToolConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ToolConfig> {
    if !config_path.exists() {
        return Ok(ToolConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ToolConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_override(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
