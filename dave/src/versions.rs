//! API version deprecation registry.
//!
//! Versions are identified by the second path segment of `/api/{version}/...`. A deprecated
//! version still serves requests but its responses carry RFC 8594 headers (see
//! [`crate::middleware::deprecation`]); once its sunset date has passed it is refused with
//! `410 Gone`.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;
use utoipa::ToSchema;

use crate::config::DeprecatedVersion;

pub const CURRENT_VERSION: &str = "v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DeprecationStatus {
    pub version: String,
    pub deprecated: bool,
    pub sunset_date: Option<DateTime<Utc>>,
    pub migration_guide: Option<String>,
    /// Whole days left before sunset, rounded up; `None` when no sunset is scheduled
    pub days_until_sunset: Option<i64>,
}

#[derive(Debug, Clone)]
struct VersionEntry {
    deprecated: bool,
    sunset_date: Option<DateTime<Utc>>,
    migration_guide: Option<String>,
}

#[derive(Debug)]
pub struct DeprecationRegistry {
    entries: RwLock<HashMap<String, VersionEntry>>,
}

impl Default for DeprecationRegistry {
    fn default() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            CURRENT_VERSION.to_string(),
            VersionEntry {
                deprecated: false,
                sunset_date: None,
                migration_guide: None,
            },
        );
        Self {
            entries: RwLock::new(entries),
        }
    }
}

fn default_migration_guide(version: &str) -> String {
    format!("https://docs.employa.work/api/{version}/migration")
}

impl DeprecationRegistry {
    /// Registry with the current version active and the configured versions deprecated.
    pub fn from_config(deprecated: &[DeprecatedVersion]) -> Self {
        let registry = Self::default();
        for entry in deprecated {
            registry.deprecate_until(&entry.version, entry.sunset_date, entry.migration_guide.clone());
        }
        registry
    }

    /// Deprecate `version` with a sunset `sunset_days` from now.
    pub fn mark_deprecated(&self, version: &str, sunset_days: i64, migration_guide: Option<String>) {
        self.deprecate_until(version, Utc::now() + Duration::days(sunset_days), migration_guide);
    }

    pub fn deprecate_until(&self, version: &str, sunset_date: DateTime<Utc>, migration_guide: Option<String>) {
        info!(version, %sunset_date, "API version marked deprecated");
        self.entries.write().insert(
            version.to_string(),
            VersionEntry {
                deprecated: true,
                sunset_date: Some(sunset_date),
                migration_guide: Some(migration_guide.unwrap_or_else(|| default_migration_guide(version))),
            },
        );
    }

    pub fn status(&self, version: &str) -> Option<DeprecationStatus> {
        let entries = self.entries.read();
        let entry = entries.get(version)?;
        let days_until_sunset = entry.sunset_date.map(|sunset| {
            let seconds = (sunset - Utc::now()).num_seconds();
            seconds.div_euclid(86_400) + i64::from(seconds.rem_euclid(86_400) > 0)
        });

        Some(DeprecationStatus {
            version: version.to_string(),
            deprecated: entry.deprecated,
            sunset_date: entry.sunset_date,
            migration_guide: entry.migration_guide.clone(),
            days_until_sunset,
        })
    }

    pub fn is_deprecated(&self, version: &str) -> bool {
        self.entries.read().get(version).is_some_and(|e| e.deprecated)
    }

    pub fn is_sunset(&self, version: &str) -> bool {
        self.entries
            .read()
            .get(version)
            .and_then(|e| e.sunset_date)
            .is_some_and(|sunset| Utc::now() > sunset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_version_is_active() {
        let registry = DeprecationRegistry::default();
        let status = registry.status("v1").unwrap();
        assert!(!status.deprecated);
        assert_eq!(status.sunset_date, None);
        assert!(!registry.is_deprecated("v1"));
        assert!(!registry.is_sunset("v1"));
        assert!(registry.status("v9").is_none());
    }

    #[test]
    fn test_mark_deprecated() {
        let registry = DeprecationRegistry::default();
        registry.mark_deprecated("v1-test", 30, Some("http://example.com/guide".to_string()));

        let status = registry.status("v1-test").unwrap();
        assert!(status.deprecated);
        assert_eq!(status.days_until_sunset, Some(30));
        assert_eq!(status.migration_guide.as_deref(), Some("http://example.com/guide"));
        assert!(!registry.is_sunset("v1-test"));
    }

    #[test]
    fn test_default_guide_and_sunset() {
        let registry = DeprecationRegistry::default();
        registry.deprecate_until("v0", Utc::now() - Duration::days(1), None);

        let status = registry.status("v0").unwrap();
        assert_eq!(
            status.migration_guide.as_deref(),
            Some("https://docs.employa.work/api/v0/migration")
        );
        assert!(registry.is_sunset("v0"));
        assert!(registry.is_deprecated("v0"));
    }

    #[test]
    fn test_from_config() {
        let registry = DeprecationRegistry::from_config(&[DeprecatedVersion {
            version: "v0".to_string(),
            sunset_date: Utc::now() + Duration::days(10),
            migration_guide: None,
        }]);
        assert!(registry.is_deprecated("v0"));
        assert!(!registry.is_deprecated("v1"));
    }
}
