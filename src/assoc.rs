//! Binary association registry.
//!
//! Groups cooperating helper binaries under a single main identity so that an
//! application may spawn its own helpers without supervisor mediation. The
//! table is configuration: a deployment ships
//! `/etc/firejail/self/associations.toml`, and an embedded default table
//! covers bare installations.

use crate::error::{ExecGateError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::ffi::OsString;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Association table consumed at registry initialization.
pub const ASSOCIATIONS_CONFIG: &str = "/etc/firejail/self/associations.toml";

/// Identity reported when `/proc/self/exe` cannot be read.
pub const NULL_BINARY_PATH: &str = "/dev/null";

const DEFAULT_ASSOCIATIONS: &str = include_str!("../data/associations.toml");

#[derive(Debug, Default, Deserialize)]
struct AssociationsConfig {
    #[serde(default)]
    group: Vec<GroupConfig>,
}

#[derive(Debug, Deserialize)]
struct GroupConfig {
    main: String,
    #[serde(default)]
    members: Vec<String>,
}

/// Immutable registry of association groups.
///
/// Each group is an ordered member list whose last element is the group's
/// main key; the index maps every member (main key included) back to that
/// main key.
pub struct AssociationRegistry {
    groups: Vec<Vec<PathBuf>>,
    index: HashMap<PathBuf, PathBuf>,
}

impl AssociationRegistry {
    /// Parse a TOML association table.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: AssociationsConfig = toml::from_str(text)
            .map_err(|_| ExecGateError::InvalidArgument("malformed association table"))?;
        Ok(AssociationRegistry::from_config(config))
    }

    fn from_config(config: AssociationsConfig) -> Self {
        let mut registry = AssociationRegistry {
            groups: Vec::with_capacity(config.group.len()),
            index: HashMap::new(),
        };

        for group in config.group {
            let main = PathBuf::from(&group.main);
            if registry.index.contains_key(&main) {
                warn!(main = %main.display(), "duplicate association group ignored");
                continue;
            }

            let mut members: Vec<PathBuf> = Vec::with_capacity(group.members.len() + 1);
            for member in group.members {
                let member = PathBuf::from(member);
                if member != main && !members.contains(&member) {
                    members.push(member);
                }
            }
            members.push(main.clone());

            for member in &members {
                registry.index.insert(member.clone(), main.clone());
            }
            registry.groups.push(members);
        }

        registry
    }

    /// The process-wide registry, built on first use from the deployed table
    /// or the embedded defaults.
    pub fn shared() -> &'static AssociationRegistry {
        static REGISTRY: OnceLock<AssociationRegistry> = OnceLock::new();
        REGISTRY.get_or_init(|| {
            if let Ok(text) = std::fs::read_to_string(ASSOCIATIONS_CONFIG) {
                match AssociationRegistry::from_toml(&text) {
                    Ok(registry) => {
                        debug!(path = ASSOCIATIONS_CONFIG, "association table loaded");
                        return registry;
                    }
                    Err(err) => {
                        warn!(path = ASSOCIATIONS_CONFIG, %err, "association table rejected, using defaults");
                    }
                }
            }
            AssociationRegistry::from_toml(DEFAULT_ASSOCIATIONS)
                .unwrap_or_else(|_| AssociationRegistry::from_config(AssociationsConfig::default()))
        })
    }

    /// Whether `callee` belongs to the same group as `caller`.
    ///
    /// Unknown callers have no associations.
    #[must_use]
    pub fn is_associated(&self, caller: &Path, callee: &Path) -> bool {
        let Some(main) = self.index.get(caller) else {
            return false;
        };
        self.group_of(main)
            .is_some_and(|members| members.iter().any(|member| member == callee))
    }

    /// Ordered member list of the group whose main key is `main_key`.
    #[must_use]
    pub fn members_of(&self, main_key: &Path) -> Option<&[PathBuf]> {
        self.group_of(main_key).map(Vec::as_slice)
    }

    /// Colon-separated members of `binary`'s group, empty when unknown.
    ///
    /// The shape expected by the supervisor hand-off environment variables.
    #[must_use]
    pub fn describe_for(&self, binary: &Path) -> OsString {
        let Some(main) = self.index.get(binary) else {
            return OsString::new();
        };
        let Some(members) = self.group_of(main) else {
            return OsString::new();
        };

        let mut joined: Vec<u8> = Vec::new();
        for member in members {
            if !joined.is_empty() {
                joined.push(b':');
            }
            joined.extend_from_slice(member.as_os_str().as_bytes());
        }
        OsString::from_vec(joined)
    }

    fn group_of(&self, main_key: &Path) -> Option<&Vec<PathBuf>> {
        self.groups
            .iter()
            .find(|members| members.last().map(PathBuf::as_path) == Some(main_key))
    }
}

/// Identity of the running binary, read from `/proc/self/exe`.
#[must_use]
pub fn self_binary_path() -> PathBuf {
    std::fs::read_link("/proc/self/exe").unwrap_or_else(|_| PathBuf::from(NULL_BINARY_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"
        [[group]]
        main = "/usr/bin/app"
        members = ["/usr/lib/app/worker", "/usr/lib/app/renderer"]

        [[group]]
        main = "/usr/bin/other"
        members = []
    "#;

    #[test]
    fn test_members_end_with_main_key() {
        let registry = AssociationRegistry::from_toml(TABLE).expect("parses");
        let members = registry
            .members_of(Path::new("/usr/bin/app"))
            .expect("group exists");
        assert_eq!(members.last(), Some(&PathBuf::from("/usr/bin/app")));
        assert_eq!(members.len(), 3);
    }

    #[test]
    fn test_association_is_symmetric_within_group() {
        let registry = AssociationRegistry::from_toml(TABLE).expect("parses");
        let worker = Path::new("/usr/lib/app/worker");
        let renderer = Path::new("/usr/lib/app/renderer");
        let main = Path::new("/usr/bin/app");

        assert!(registry.is_associated(worker, renderer));
        assert!(registry.is_associated(renderer, worker));
        assert!(registry.is_associated(worker, main));
        assert!(registry.is_associated(main, worker));
    }

    #[test]
    fn test_unknown_caller_has_no_associations() {
        let registry = AssociationRegistry::from_toml(TABLE).expect("parses");
        assert!(!registry.is_associated(
            Path::new("/usr/bin/stranger"),
            Path::new("/usr/bin/app")
        ));
        assert!(!registry.is_associated(
            Path::new("/usr/lib/app/worker"),
            Path::new("/usr/bin/other")
        ));
    }

    #[test]
    fn test_describe_for_joins_members() {
        let registry = AssociationRegistry::from_toml(TABLE).expect("parses");
        let described = registry.describe_for(Path::new("/usr/lib/app/renderer"));
        assert_eq!(
            described,
            OsString::from("/usr/lib/app/worker:/usr/lib/app/renderer:/usr/bin/app")
        );
        assert!(registry.describe_for(Path::new("/nowhere")).is_empty());
    }

    #[test]
    fn test_duplicate_main_keys_are_rejected() {
        let duplicated = r#"
            [[group]]
            main = "/usr/bin/app"
            members = ["/usr/lib/app/worker"]

            [[group]]
            main = "/usr/bin/app"
            members = ["/usr/lib/app/imposter"]
        "#;
        let registry = AssociationRegistry::from_toml(duplicated).expect("parses");
        assert!(!registry.is_associated(
            Path::new("/usr/lib/app/imposter"),
            Path::new("/usr/bin/app")
        ));
        assert_eq!(registry.members_of(Path::new("/usr/bin/app")).map(<[PathBuf]>::len), Some(2));
    }

    #[test]
    fn test_embedded_defaults_parse() {
        let registry =
            AssociationRegistry::from_toml(DEFAULT_ASSOCIATIONS).expect("embedded table parses");
        assert!(registry.is_associated(
            Path::new("/usr/lib/firefox/plugin-container"),
            Path::new("/usr/bin/firefox")
        ));
    }

    #[test]
    fn test_self_binary_path_is_absolute() {
        let path = self_binary_path();
        assert!(path.is_absolute());
    }
}
