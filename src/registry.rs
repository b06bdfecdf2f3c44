//! Versioned registry of host-provided shared primitives.
//!
//! Both compiled forms resolve host primitives through an explicit lookup, never
//! ambient globals. The manifest recorded at compile time pins the versions an
//! artifact was built against so a primitive upgrade can detect stale artifacts
//! and recompile them instead of silently breaking them.

use std::collections::BTreeMap;

/// Version of the host-primitive set as a whole.
pub const REGISTRY_VERSION: &str = "1.4.0";

/// The full whitelist: every primitive scene source may acquire, with the
/// version of its current host implementation. Nothing outside this list is
/// reachable from scene code in either execution context.
pub const HOST_PRIMITIVES: &[(&str, &str)] = &[
    ("container", "1.0.0"),
    ("group", "1.0.0"),
    ("frame", "1.2.0"),
    ("duration", "1.2.0"),
    ("fps", "1.0.0"),
    ("width", "1.0.0"),
    ("height", "1.0.0"),
    ("interpolate", "1.1.0"),
    ("spring", "1.3.0"),
    ("sequence", "1.1.0"),
    ("image", "1.0.0"),
    ("video", "1.2.0"),
    ("audio", "1.2.0"),
];

/// Clock/viewport accessors. Scene declarations shadowing one of these names are
/// the rename fault category.
pub const ACCESSOR_PRIMITIVES: &[&str] = &["frame", "duration", "fps", "width", "height"];

pub fn is_host_primitive(name: &str) -> bool {
    HOST_PRIMITIVES.iter().any(|(n, _)| *n == name)
}

pub fn is_accessor_primitive(name: &str) -> bool {
    ACCESSOR_PRIMITIVES.contains(&name)
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DependencyManifest {
    pub registry_version: String,
    /// Primitive name -> version the artifact was compiled against.
    pub primitives: BTreeMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct DependencyRegistry {
    version: String,
    primitives: BTreeMap<String, String>,
}

impl DependencyRegistry {
    /// Registry for the built-in host primitive set.
    pub fn builtin() -> Self {
        Self {
            version: REGISTRY_VERSION.to_string(),
            primitives: HOST_PRIMITIVES
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Version of one primitive, if registered.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.primitives.get(name).map(String::as_str)
    }

    /// Manifest pinning the given primitive names at current versions. Unknown
    /// names are skipped; the validator has already rejected them upstream.
    pub fn manifest_for<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> DependencyManifest {
        let primitives = names
            .into_iter()
            .filter_map(|n| self.primitives.get(n).map(|v| (n.to_string(), v.clone())))
            .collect();
        DependencyManifest {
            registry_version: self.version.clone(),
            primitives,
        }
    }

    /// Whether an artifact compiled against `manifest` can load against this
    /// registry: every pinned primitive must still resolve to the same version.
    pub fn is_compatible(&self, manifest: &DependencyManifest) -> bool {
        manifest
            .primitives
            .iter()
            .all(|(name, version)| self.resolve(name) == Some(version.as_str()))
    }
}

impl Default for DependencyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
