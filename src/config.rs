// ⚙️ Configuration - TOML file plus environment credentials
//
// Everything a run needs is read once at startup. Safety flags default to
// the harmless side: dry run on, sandbox on. The CLI can flip them.

use crate::feed::ObjectType;
use crate::vocabulary::Vocabulary;
use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_ACCESS_TOKEN: &str = "NRS_ACCESS_TOKEN";
pub const ENV_USERNAME: &str = "NRS_USERNAME";
pub const ENV_EMAIL: &str = "NRS_EMAIL";

fn default_true() -> bool {
    true
}

fn default_progress_db() -> PathBuf {
    PathBuf::from("nature-registry-sync.db")
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Shape documents go under the user's sandbox namespace
    #[serde(default = "default_true")]
    pub sandbox: bool,

    /// Product token, e.g. `NatureRegistrySync`; version and contact are appended
    pub user_agent: String,

    pub knowledge_base: KnowledgeBaseConfig,
    pub document_store: DocumentStoreConfig,
    pub run: RunConfig,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    #[serde(default)]
    pub vocabulary: Vocabulary,

    /// Filled from the environment, never from the file
    #[serde(skip)]
    pub credentials: Credentials,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeBaseConfig {
    pub api_url: String,
    pub sparql_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentStoreConfig {
    pub api_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Publication date of the dataset, cited on every statement
    pub publication_date: NaiveDate,
    /// Defaults to the day the run starts
    pub retrieved_date: Option<NaiveDate>,
    #[serde(default = "default_progress_db")]
    pub progress_db: PathBuf,
    pub operators: Option<PathBuf>,
    pub municipalities: Option<PathBuf>,
}

/// One feed: an object type and the GeoJSON files describing it
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(flatten)]
    pub object_type: ObjectType,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Credentials {
    pub access_token: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let var = |name| std::env::var(name).ok().filter(|v: &String| !v.trim().is_empty());
        Credentials {
            access_token: var(ENV_ACCESS_TOKEN),
            username: var(ENV_USERNAME),
            email: var(ENV_EMAIL),
        }
    }
}

impl SyncConfig {
    /// Load from a file, pick up credentials and validate
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config = Self::from_toml(&text).with_context(|| format!("Invalid config {}", path.display()))?;
        config.credentials = Credentials::from_env();

        // Relative paths in the file are relative to the file
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: SyncConfig = toml::from_str(text).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.user_agent.trim().is_empty() {
            bail!("user_agent must not be empty");
        }
        if self.user_agent.contains(' ') || self.user_agent.contains('/') {
            bail!("user_agent '{}' must not contain spaces or '/'", self.user_agent);
        }
        for source in &self.sources {
            if !source.object_type.reference_url_template.contains("{id}") {
                bail!(
                    "reference_url_template for {} must contain {{id}}",
                    source.object_type.label
                );
            }
            if source.files.is_empty() {
                bail!("source {} lists no files", source.object_type.label);
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.run.progress_db);
        self.run.operators.iter_mut().for_each(resolve);
        self.run.municipalities.iter_mut().for_each(resolve);
        for source in &mut self.sources {
            source.files.iter_mut().for_each(resolve);
        }
    }

    /// `Product/version (contact)` as the API etiquette asks for
    pub fn full_user_agent(&self) -> String {
        let contact = self.credentials.email.as_deref().unwrap_or("no contact configured");
        format!("{}/{} ({})", self.user_agent, crate::VERSION, contact)
    }

    /// Sandbox user for article naming; None outside sandbox mode
    pub fn sandbox_user(&self) -> Result<Option<String>> {
        if !self.sandbox {
            return Ok(None);
        }
        match &self.credentials.username {
            Some(user) => Ok(Some(user.clone())),
            None => bail!("sandbox mode needs {} to be set", ENV_USERNAME),
        }
    }

    /// Writing requires credentials; a dry run does not
    pub fn require_write_access(&self) -> Result<()> {
        if !self.dry_run && self.credentials.access_token.is_none() {
            bail!("committing changes needs {} to be set", ENV_ACCESS_TOKEN);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::EntityId;
    use std::io::Write;

    const CONFIG: &str = r#"
user_agent = "NatureRegistrySync"

[knowledge_base]
api_url = "https://www.wikidata.org/w/api.php"
sparql_url = "https://query.wikidata.org/sparql"

[document_store]
api_url = "https://commons.wikimedia.org/w/api.php"

[run]
publication_date = "2020-02-25"
operators = "operators.json"

[[sources]]
entity = "Q179049"
label = "nature reserve"
source_url = "http://metadatakatalogen.naturvardsverket.se/metadatakatalogen/GetMetaDataById?id=2921b01a-0baf-4702-a89f-9c5626c97844"
reference_url_template = "http://nvpub.vic-metria.nu/naturvardsregistret/rest/omrade/{id}/G%C3%A4llande"
stated_in = "Q29580583"
article_template = "Data:Naturvårdsregistret/{id}.map"
files = ["reserves.geojson"]
"#;

    #[test]
    fn test_parse_defaults_to_safe_mode() {
        let config = SyncConfig::from_toml(CONFIG).unwrap();
        assert!(config.dry_run);
        assert!(config.sandbox);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].object_type.entity, EntityId::new("Q179049"));
        assert_eq!(config.run.progress_db, PathBuf::from("nature-registry-sync.db"));
        assert_eq!(config.vocabulary, Vocabulary::wikidata());
    }

    #[test]
    fn test_user_agent_with_slash_is_rejected() {
        let text = CONFIG.replace("\"NatureRegistrySync\"", "\"Nature/Sync\"");
        assert!(SyncConfig::from_toml(&text).is_err());

        let text = CONFIG.replace("\"NatureRegistrySync\"", "\"Nature Sync\"");
        assert!(SyncConfig::from_toml(&text).is_err());
    }

    #[test]
    fn test_template_without_id_is_rejected() {
        let text = CONFIG.replace("omrade/{id}/", "omrade/");
        let err = SyncConfig::from_toml(&text).unwrap_err();
        assert!(err.to_string().contains("{id}"));
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.toml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();

        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.sources[0].files[0], dir.path().join("reserves.geojson"));
        assert_eq!(config.run.operators, Some(dir.path().join("operators.json")));
    }

    #[test]
    fn test_write_access_and_sandbox_need_credentials() {
        let mut config = SyncConfig::from_toml(CONFIG).unwrap();
        config.credentials = Credentials::default();
        assert!(config.require_write_access().is_ok());
        assert!(config.sandbox_user().is_err());

        config.dry_run = false;
        assert!(config.require_write_access().is_err());

        config.credentials.access_token = Some("secret".to_string());
        config.credentials.username = Some("Bot".to_string());
        assert!(config.require_write_access().is_ok());
        assert_eq!(config.sandbox_user().unwrap().as_deref(), Some("Bot"));

        config.sandbox = false;
        assert_eq!(config.sandbox_user().unwrap(), None);
        assert!(config.full_user_agent().starts_with("NatureRegistrySync/"));
    }
}
