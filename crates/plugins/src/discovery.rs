//! Plugin discovery from manifest files.
//!
//! A plugin directory holds one `<name>.plugin.toml` per plugin:
//! ```text
//! name = "profanity-filter"
//! version = "1.2.0"
//! category = "message-processor"
//! dependencies = ["lexicon"]
//! priority = "high"
//! kind = "word-filter"
//! description = "Masks blocked words"
//!
//! [config.settings]
//! words = ["darn"]
//! ```
//!
//! Manifests name a `kind`; a [`PluginCatalog`] maps kinds to factories that
//! build the concrete plugin.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    async_trait::async_trait,
    parlor_common::Priority,
    parlor_config::{PluginConfig, PluginsConfig},
    semver::Version,
    serde::{Deserialize, Serialize},
    tracing::{debug, warn},
};

use crate::{
    descriptor::{PluginCategory, PluginDescriptor},
    error::{PluginError, PluginResult},
    plugin::{Plugin, check_capabilities},
};

pub const MANIFEST_SUFFIX: &str = ".plugin.toml";

/// Contents of a `*.plugin.toml` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    pub category: PluginCategory,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    /// Catalog key; defaults to `name`.
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub description: String,
    /// Used when the config file has no entry for this plugin.
    #[serde(default)]
    pub config: Option<PluginConfig>,
}

impl PluginManifest {
    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or(&self.name)
    }

    pub fn descriptor(&self) -> PluginResult<PluginDescriptor> {
        let version = Version::parse(&self.version).map_err(|e| {
            PluginError::load(&self.name, format!("invalid version {:?}: {e}", self.version))
        })?;
        let descriptor = self
            .dependencies
            .iter()
            .fold(
                PluginDescriptor::new(&self.name, version, self.category),
                |d, dep| d.depends_on(dep.as_str()),
            )
            .with_priority(self.priority);
        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// Parse manifest text. `origin` only labels errors.
pub fn parse_manifest(content: &str, origin: &Path) -> PluginResult<PluginManifest> {
    toml::from_str(content).map_err(|e| {
        PluginError::load(
            origin.display().to_string(),
            format!("malformed manifest: {e}"),
        )
    })
}

/// Manifests found by a discoverer, plus per-file failures.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub manifests: Vec<(PathBuf, PluginManifest)>,
    pub errors: Vec<(PathBuf, PluginError)>,
}

/// Source of plugin manifests.
#[async_trait]
pub trait PluginDiscoverer: Send + Sync {
    async fn discover(&self) -> DiscoveryReport;
}

/// Scans one directory (non-recursively) for `*.plugin.toml` files.
pub struct FsPluginDiscoverer {
    root: PathBuf,
}

impl FsPluginDiscoverer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Discoverer for the configured plugin directory, if one is set.
    pub fn from_config(config: &PluginsConfig) -> Option<Self> {
        config.directory.as_ref().map(Self::new)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl PluginDiscoverer for FsPluginDiscoverer {
    async fn discover(&self) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();

        let entries = match std::fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) => {
                warn!(root = %self.root.display(), %e, "cannot read plugin directory");
                return report;
            },
        };

        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(MANIFEST_SUFFIX))
            })
            .collect();
        paths.sort();

        for path in paths {
            let parsed = std::fs::read_to_string(&path)
                .map_err(|e| {
                    PluginError::load(path.display().to_string(), format!("unreadable: {e}"))
                })
                .and_then(|content| parse_manifest(&content, &path));
            match parsed {
                Ok(manifest) => {
                    debug!(path = %path.display(), plugin = %manifest.name, "found plugin manifest");
                    report.manifests.push((path, manifest));
                },
                Err(e) => {
                    warn!(path = %path.display(), %e, "skipping plugin manifest");
                    report.errors.push((path, e));
                },
            }
        }

        report
    }
}

// ── Catalog ─────────────────────────────────────────────────────────────────

/// Builds a plugin instance for a manifest's descriptor.
pub trait PluginFactory: Send + Sync {
    fn create(&self, descriptor: PluginDescriptor) -> PluginResult<Arc<dyn Plugin>>;
}

impl<F> PluginFactory for F
where
    F: Fn(PluginDescriptor) -> PluginResult<Arc<dyn Plugin>> + Send + Sync,
{
    fn create(&self, descriptor: PluginDescriptor) -> PluginResult<Arc<dyn Plugin>> {
        self(descriptor)
    }
}

/// Known plugin implementations, keyed by manifest `kind`.
#[derive(Default)]
pub struct PluginCatalog {
    factories: BTreeMap<String, Arc<dyn PluginFactory>>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, factory: impl PluginFactory + 'static) {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    #[must_use]
    pub fn with(mut self, kind: impl Into<String>, factory: impl PluginFactory + 'static) -> Self {
        self.register(kind, factory);
        self
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Build and structurally check the plugin a manifest describes.
    pub fn instantiate(&self, manifest: &PluginManifest) -> PluginResult<Arc<dyn Plugin>> {
        let descriptor = manifest.descriptor()?;
        let factory = self.factories.get(manifest.kind()).ok_or_else(|| {
            PluginError::load(
                &manifest.name,
                format!("no implementation registered for kind '{}'", manifest.kind()),
            )
        })?;
        let plugin = factory.create(descriptor)?;

        let built = plugin.descriptor();
        if built.name != manifest.name || built.category != manifest.category {
            return Err(PluginError::load(
                &manifest.name,
                format!(
                    "factory built '{}' ({}) for a {} manifest",
                    built.name, built.category, manifest.category
                ),
            ));
        }
        check_capabilities(plugin.as_ref())?;
        Ok(plugin)
    }
}
