use crate::library::ReadingStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use tracing::warn;

/// Title of the page in the config database that holds the sync settings.
pub const SYNC_CONFIG_KEY: &str = "同步配置";

/// Which authors are allowed through the filter.
///
/// An empty author selection in the remote config means "no restriction", not
/// "block everyone". That sentinel is `Unrestricted`; `Only` is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthorFilter {
    #[default]
    Unrestricted,
    Only(BTreeSet<String>),
}

impl AuthorFilter {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            AuthorFilter::Unrestricted
        } else {
            AuthorFilter::Only(names)
        }
    }

    pub fn allows(&self, author: &str) -> bool {
        match self {
            AuthorFilter::Unrestricted => true,
            AuthorFilter::Only(names) => names.contains(author),
        }
    }

    pub fn is_restricted(&self) -> bool {
        matches!(self, AuthorFilter::Only(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    Full,
    Incremental,
}

impl SyncMode {
    pub fn is_incremental(&self) -> bool {
        matches!(self, SyncMode::Incremental)
    }

    /// A full sync requested on the command line overrides whatever the config says.
    pub fn effective(force_full: bool, config: &LibraryConfig) -> SyncMode {
        if force_full {
            SyncMode::Full
        } else {
            config.sync_mode.unwrap_or(SyncMode::Incremental)
        }
    }
}

impl Display for SyncMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            SyncMode::Full => "全量",
            SyncMode::Incremental => "增量",
        };

        write!(f, "{}", str)
    }
}

impl FromStr for SyncMode {
    type Err = ConfigParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "全量" | "full" => Ok(SyncMode::Full),
            "增量" | "incremental" => Ok(SyncMode::Incremental),
            other => Err(ConfigParseError::SyncMode(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigParseError {
    #[error("unknown sync mode '{0}'")]
    SyncMode(String),

    #[error("unknown yes/no value '{0}'")]
    Flag(String),
}

pub fn parse_flag(value: &str) -> Result<bool, ConfigParseError> {
    match value.trim() {
        "是" | "yes" | "true" => Ok(true),
        "否" | "no" | "false" => Ok(false),
        other => Err(ConfigParseError::Flag(other.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// An empty set syncs nothing.
    pub enabled_statuses: BTreeSet<ReadingStatus>,
    pub enabled_authors: AuthorFilter,
    pub sync_mode: Option<SyncMode>,
    pub organize_by_chapter: Option<bool>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            enabled_statuses: ReadingStatus::ALL.into_iter().collect(),
            enabled_authors: AuthorFilter::Unrestricted,
            sync_mode: None,
            organize_by_chapter: None,
        }
    }
}

impl LibraryConfig {
    /// Builds a config from the raw option names stored in the config database.
    ///
    /// Unrecognised status names and flag values are dropped with a warning
    /// rather than failing the whole config.
    pub fn from_options(
        statuses: &[String],
        authors: &[String],
        sync_mode: Option<&str>,
        organize_by_chapter: Option<&str>,
    ) -> Self {
        let enabled_statuses = statuses
            .iter()
            .filter_map(|name| match name.parse::<ReadingStatus>() {
                Ok(status) => Some(status),
                Err(e) => {
                    warn!("Ignoring config entry: {}", e);
                    None
                }
            })
            .collect();

        let sync_mode = sync_mode.and_then(|v| {
            v.parse()
                .map_err(|e| warn!("Ignoring config entry: {}", e))
                .ok()
        });

        let organize_by_chapter = organize_by_chapter.and_then(|v| {
            parse_flag(v)
                .map_err(|e| warn!("Ignoring config entry: {}", e))
                .ok()
        });

        Self {
            enabled_statuses,
            enabled_authors: AuthorFilter::from_names(authors.iter().cloned()),
            sync_mode,
            organize_by_chapter,
        }
    }

    pub fn with_statuses<I: IntoIterator<Item = ReadingStatus>>(mut self, statuses: I) -> Self {
        self.enabled_statuses = statuses.into_iter().collect();
        self
    }

    pub fn with_authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_authors = AuthorFilter::from_names(authors);
        self
    }

    pub fn organize_by_chapter(&self) -> bool {
        self.organize_by_chapter.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_syncs_everything() {
        let config = LibraryConfig::default();
        assert_eq!(config.enabled_statuses.len(), 3);
        assert_eq!(config.enabled_authors, AuthorFilter::Unrestricted);
        assert!(!config.organize_by_chapter());
    }

    #[test]
    fn empty_author_list_is_unrestricted() {
        let filter = AuthorFilter::from_names(Vec::<String>::new());
        assert!(!filter.is_restricted());
        assert!(filter.allows(""));
        assert!(filter.allows("anyone"));

        let filter = AuthorFilter::from_names(["刘慈欣"]);
        assert!(filter.is_restricted());
        assert!(filter.allows("刘慈欣"));
        assert!(!filter.allows(""));
    }

    #[test]
    fn from_options_skips_unknown_values() {
        let config = LibraryConfig::from_options(
            &["已读".to_string(), "搁置".to_string()],
            &["A".to_string()],
            Some("全量"),
            Some("maybe"),
        );

        assert_eq!(
            config.enabled_statuses,
            [ReadingStatus::Finished].into_iter().collect()
        );
        assert_eq!(config.enabled_authors, AuthorFilter::from_names(["A"]));
        assert_eq!(config.sync_mode, Some(SyncMode::Full));
        assert_eq!(config.organize_by_chapter, None);
    }

    #[test]
    fn cli_full_sync_overrides_config() {
        let incremental = LibraryConfig {
            sync_mode: Some(SyncMode::Incremental),
            ..LibraryConfig::default()
        };
        assert_eq!(SyncMode::effective(true, &incremental), SyncMode::Full);
        assert_eq!(SyncMode::effective(false, &incremental), SyncMode::Incremental);

        let full = LibraryConfig {
            sync_mode: Some(SyncMode::Full),
            ..LibraryConfig::default()
        };
        assert_eq!(SyncMode::effective(false, &full), SyncMode::Full);
        assert_eq!(
            SyncMode::effective(false, &LibraryConfig::default()),
            SyncMode::Incremental
        );
    }

    #[test]
    fn flags_parse() {
        assert_eq!(parse_flag("是"), Ok(true));
        assert_eq!(parse_flag("否"), Ok(false));
        assert!(parse_flag("?").is_err());
    }
}
