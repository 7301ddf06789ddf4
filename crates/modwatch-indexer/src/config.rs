//! Session configuration: options as supplied by the host, and the validated
//! project configuration the indexer works from.

use std::path::{Path, PathBuf};
use std::time::Duration;

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use modwatch_core::paths::clean;
use modwatch_core::{SyntaxKinds, default_cache_dir, snapshot_path};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_DEBOUNCE_MS: u64 = 250;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("projectRoot is required")]
    MissingProjectRoot,

    #[error("project root {0} is not an absolute directory")]
    ProjectRootNotDirectory(PathBuf),

    #[error("entry {0} must be an absolute path")]
    RelativeEntry(PathBuf),

    #[error("invalid glob pattern {pattern:?}: {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

const SCRIPT_EXTS: &[&str] = &["js", "mjs", "cjs", "ts", "tsx", "jsx", "mts", "cts"];

fn owned(exts: &[&str]) -> Vec<String> {
    exts.iter().map(|e| e.to_string()).collect()
}

/// Extensions scanned for each import syntax. A field that is supplied
/// replaces the default list for that syntax; lists are never merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupportedPaths {
    pub esm: Vec<String>,
    pub dyn_esm: Vec<String>,
    pub cjs: Vec<String>,
    pub css: Vec<String>,
}

impl Default for SupportedPaths {
    fn default() -> Self {
        let mut esm = owned(SCRIPT_EXTS);
        esm.push("mdx".to_string());
        SupportedPaths {
            esm,
            dyn_esm: owned(SCRIPT_EXTS),
            cjs: owned(SCRIPT_EXTS),
            css: owned(&["css", "scss", "sass", "mdx"]),
        }
    }
}

impl SupportedPaths {
    /// Strip leading dots and lowercase every extension.
    fn normalized(mut self) -> Self {
        for list in [&mut self.esm, &mut self.dyn_esm, &mut self.cjs, &mut self.css] {
            for ext in list.iter_mut() {
                *ext = ext.trim_start_matches('.').to_ascii_lowercase();
            }
            list.retain(|e| !e.is_empty());
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolveOptions {
    /// Resolve an extension-less specifier to every matching file instead of
    /// the first one.
    pub fan_out_ambiguous: bool,
    /// Track `import()` calls.
    pub dynamic_imports: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            fan_out_ambiguous: false,
            dynamic_imports: true,
        }
    }
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

/// Options supplied by the host at setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupOptions {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub project_root: PathBuf,
    #[serde(default)]
    pub entries: Vec<PathBuf>,
    #[serde(default)]
    pub glob_entries: Vec<String>,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub supported_paths: SupportedPaths,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub resolve: ResolveOptions,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl SetupOptions {
    pub fn new(project: impl Into<String>, project_root: impl Into<PathBuf>) -> Self {
        SetupOptions {
            project: project.into(),
            project_root: project_root.into(),
            entries: Vec::new(),
            glob_entries: Vec::new(),
            cache_dir: None,
            supported_paths: SupportedPaths::default(),
            debug: false,
            resolve: ResolveOptions::default(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

/// Validated configuration for one project.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub project: String,
    pub root: PathBuf,
    /// Explicit entries, in the order given.
    pub entries: Vec<PathBuf>,
    pub glob_patterns: Vec<String>,
    relative_globs: GlobSet,
    absolute_globs: GlobSet,
    pub supported: SupportedPaths,
    pub resolve: ResolveOptions,
    pub cache_dir: PathBuf,
    pub debounce: Duration,
    pub debug: bool,
}

fn compile(pattern: &str) -> Result<Glob, ConfigError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|source| ConfigError::InvalidGlob {
            pattern: pattern.to_string(),
            source,
        })
}

fn build_set(builder: GlobSetBuilder, pattern: &str) -> Result<GlobSet, ConfigError> {
    builder.build().map_err(|source| ConfigError::InvalidGlob {
        pattern: pattern.to_string(),
        source,
    })
}

impl ProjectConfig {
    /// Validate host options. Fails before any file is read.
    pub fn from_options(options: SetupOptions) -> Result<Self, ConfigError> {
        if options.project_root.as_os_str().is_empty() {
            return Err(ConfigError::MissingProjectRoot);
        }
        let root = clean(&options.project_root);
        if !root.is_absolute() || !root.is_dir() {
            return Err(ConfigError::ProjectRootNotDirectory(root));
        }

        let mut entries: Vec<PathBuf> = Vec::new();
        for entry in &options.entries {
            if !entry.is_absolute() {
                return Err(ConfigError::RelativeEntry(entry.clone()));
            }
            let entry = clean(entry);
            if !entries.contains(&entry) {
                entries.push(entry);
            }
        }

        let mut relative = GlobSetBuilder::new();
        let mut absolute = GlobSetBuilder::new();
        for pattern in &options.glob_entries {
            let glob = compile(pattern)?;
            if Path::new(pattern).is_absolute() {
                absolute.add(glob);
            } else {
                relative.add(glob);
            }
        }
        let joined = options.glob_entries.join(", ");
        let relative_globs = build_set(relative, &joined)?;
        let absolute_globs = build_set(absolute, &joined)?;

        let project = if options.project.is_empty() {
            root.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("default")
                .to_string()
        } else {
            options.project
        };

        let cache_dir = match options.cache_dir {
            Some(dir) if dir.is_absolute() => clean(&dir),
            Some(dir) => clean(&root.join(dir)),
            None => default_cache_dir(&root),
        };

        Ok(ProjectConfig {
            project,
            root,
            entries,
            glob_patterns: options.glob_entries,
            relative_globs,
            absolute_globs,
            supported: options.supported_paths.normalized(),
            resolve: options.resolve,
            cache_dir,
            debounce: Duration::from_millis(options.debounce_ms),
            debug: options.debug,
        })
    }

    pub fn snapshot_path(&self) -> PathBuf {
        snapshot_path(&self.cache_dir, &self.project)
    }

    pub fn has_globs(&self) -> bool {
        !self.glob_patterns.is_empty()
    }

    /// True when `path` matches one of the entry globs. Relative patterns are
    /// matched against the path relative to the project root.
    pub fn matches_glob(&self, path: &Path) -> bool {
        if self.absolute_globs.is_match(path) {
            return true;
        }
        match path.strip_prefix(&self.root) {
            Ok(relative) => self.relative_globs.is_match(relative),
            Err(_) => false,
        }
    }

    /// True when `path` is configured as an entry, explicitly or by glob.
    pub fn is_entry_path(&self, path: &Path) -> bool {
        self.entries.iter().any(|e| e == path) || self.matches_glob(path)
    }

    /// Which syntaxes to scan in `path`, by extension.
    pub fn kinds_for(&self, path: &Path) -> SyntaxKinds {
        let Some(ext) = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
        else {
            return SyntaxKinds::NONE;
        };
        let has = |list: &[String]| list.iter().any(|e| *e == ext);
        SyntaxKinds {
            esm: has(&self.supported.esm),
            dyn_esm: self.resolve.dynamic_imports && has(&self.supported.dyn_esm),
            cjs: has(&self.supported.cjs),
            css: has(&self.supported.css),
        }
    }

    /// Extensions tried for specifiers coming from script syntaxes.
    pub fn script_exts(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for ext in self
            .supported
            .esm
            .iter()
            .chain(&self.supported.dyn_esm)
            .chain(&self.supported.cjs)
        {
            if !out.contains(ext) {
                out.push(ext.clone());
            }
        }
        out
    }

    /// Extensions tried for `@import` specifiers.
    pub fn style_exts(&self) -> Vec<String> {
        self.supported.css.clone()
    }

    /// Paths that are never tracked: the cache directory and its contents.
    pub fn is_internal(&self, path: &Path) -> bool {
        path.starts_with(&self.cache_dir)
    }
}
