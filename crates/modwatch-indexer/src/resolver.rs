//! Specifier resolution: relative paths, the `~/` project alias, and
//! node_modules package lookup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use modwatch_core::ImportSyntax;
use modwatch_core::paths::clean;
use modwatch_core::signature::is_file;
use serde_json::Value;

use crate::config::ProjectConfig;

const NODE_MODULES: &str = "node_modules";
const MANIFEST: &str = "package.json";

/// Turns raw specifiers into files on disk. A miss yields an empty list.
#[derive(Debug)]
pub struct Resolver {
    root: PathBuf,
    script_exts: Vec<String>,
    style_exts: Vec<String>,
    fan_out: bool,
    manifests: DashMap<PathBuf, Option<Arc<Value>>>,
}

/// Split `name/sub/path` (or `@scope/name/sub`) into package name and subpath.
fn split_package(specifier: &str) -> Option<(&str, &str)> {
    let mut split_at = 0;
    let mut slashes = if specifier.starts_with('@') { 2 } else { 1 };
    for (i, c) in specifier.char_indices() {
        if c == '/' {
            slashes -= 1;
            if slashes == 0 {
                split_at = i;
                break;
            }
        }
    }
    let (name, rest) = if slashes == 0 {
        (&specifier[..split_at], &specifier[split_at + 1..])
    } else {
        (specifier, "")
    };
    if name.is_empty() || name.ends_with('/') || (name.starts_with('@') && !name.contains('/')) {
        return None;
    }
    Some((name, rest))
}

const BUILTINS: &[&str] = &[
    "assert", "async_hooks", "buffer", "child_process", "cluster", "console", "crypto", "dgram",
    "dns", "events", "fs", "http", "http2", "https", "inspector", "module", "net", "os", "path",
    "perf_hooks", "process", "querystring", "readline", "repl", "stream", "string_decoder",
    "timers", "tls", "tty", "url", "util", "v8", "vm", "worker_threads", "zlib",
];

/// Node core modules. They never resolve to a file and are not retried.
pub fn is_builtin(specifier: &str) -> bool {
    if specifier.starts_with("node:") {
        return true;
    }
    let name = specifier.split('/').next().unwrap_or(specifier);
    BUILTINS.contains(&name)
}

fn strip_query(specifier: &str) -> &str {
    specifier
        .split_once('?')
        .map(|(path, _)| path)
        .unwrap_or(specifier)
}

fn conditions_for(syntax: ImportSyntax) -> &'static [&'static str] {
    match syntax {
        ImportSyntax::Esm | ImportSyntax::DynamicEsm => &["import", "module", "default"],
        ImportSyntax::CommonJs => &["require", "node", "default"],
        ImportSyntax::Css => &["style", "default"],
    }
}

impl Resolver {
    pub fn new(config: &ProjectConfig) -> Self {
        Resolver {
            root: config.root.clone(),
            script_exts: config.script_exts(),
            style_exts: config.style_exts(),
            fan_out: config.resolve.fan_out_ambiguous,
            manifests: DashMap::new(),
        }
    }

    /// Forget cached `package.json` files so edits are picked up.
    pub fn clear_manifest_cache(&self) {
        self.manifests.clear();
    }

    fn exts_for(&self, syntax: ImportSyntax) -> &[String] {
        if syntax.is_script() {
            &self.script_exts
        } else {
            &self.style_exts
        }
    }

    /// Resolve `specifier`, imported by `from` through `syntax`.
    pub fn resolve(&self, specifier: &str, syntax: ImportSyntax, from: &Path) -> Vec<PathBuf> {
        let specifier = strip_query(specifier.trim());
        if specifier.is_empty() || specifier.starts_with("node:") {
            return Vec::new();
        }
        let exts = self.exts_for(syntax);
        let Some(dir) = from.parent() else {
            return Vec::new();
        };

        if specifier == "."
            || specifier == ".."
            || specifier.starts_with("./")
            || specifier.starts_with("../")
            || specifier.starts_with('/')
        {
            return self.probe(&clean(&dir.join(specifier)), exts);
        }
        if let Some(rest) = specifier.strip_prefix("~/") {
            return self.probe(&clean(&self.root.join(rest)), exts);
        }
        if syntax == ImportSyntax::Css {
            return self.probe(&clean(&dir.join(specifier)), exts);
        }
        self.resolve_package(specifier, syntax, dir)
    }

    /// Exact file, then each extension appended, then `index.<ext>` inside a
    /// directory.
    pub fn probe(&self, base: &Path, exts: &[String]) -> Vec<PathBuf> {
        if is_file(base) {
            return vec![base.to_path_buf()];
        }
        let with_ext = self.probe_exts(base, exts);
        if !with_ext.is_empty() {
            return with_ext;
        }
        if base.is_dir() {
            return self.probe_exts(&base.join("index"), exts);
        }
        Vec::new()
    }

    fn probe_exts(&self, base: &Path, exts: &[String]) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for ext in exts {
            let mut name = base.as_os_str().to_os_string();
            name.push(".");
            name.push(ext);
            let candidate = PathBuf::from(name);
            if is_file(&candidate) {
                found.push(candidate);
                if !self.fan_out {
                    break;
                }
            }
        }
        found
    }

    fn manifest(&self, package_dir: &Path) -> Option<Arc<Value>> {
        if let Some(cached) = self.manifests.get(package_dir) {
            return cached.clone();
        }
        let path = package_dir.join(MANIFEST);
        let parsed = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(value) => Some(Arc::new(value)),
                Err(e) => {
                    tracing::warn!("Cannot parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!("Cannot read {}: {}", path.display(), e);
                None
            }
        };
        self.manifests
            .insert(package_dir.to_path_buf(), parsed.clone());
        parsed
    }

    /// Walk up from `dir` through `node_modules` directories. The first
    /// directory holding the package wins, even if nothing inside resolves.
    fn resolve_package(&self, specifier: &str, syntax: ImportSyntax, dir: &Path) -> Vec<PathBuf> {
        let Some((name, subpath)) = split_package(specifier) else {
            return Vec::new();
        };
        let exts = self.exts_for(syntax);
        for ancestor in dir.ancestors() {
            if ancestor.file_name().is_some_and(|n| n == NODE_MODULES) {
                continue;
            }
            let package_dir = ancestor.join(NODE_MODULES).join(name);
            if !package_dir.is_dir() {
                continue;
            }
            tracing::trace!("{} found in {}", name, package_dir.display());
            return self.resolve_in_package(&package_dir, subpath, syntax, exts);
        }
        Vec::new()
    }

    fn resolve_in_package(
        &self,
        package_dir: &Path,
        subpath: &str,
        syntax: ImportSyntax,
        exts: &[String],
    ) -> Vec<PathBuf> {
        let manifest = self.manifest(package_dir);

        if let Some(exports) = manifest.as_deref().and_then(|m| m.get("exports")) {
            let key = if subpath.is_empty() {
                ".".to_string()
            } else {
                format!("./{subpath}")
            };
            for target in export_targets(exports, &key, syntax) {
                let found = self.probe(&clean(&package_dir.join(&target)), exts);
                if !found.is_empty() {
                    return found;
                }
            }
        }

        if !subpath.is_empty() {
            return self.probe(&clean(&package_dir.join(subpath)), exts);
        }

        let main = manifest
            .as_deref()
            .and_then(|m| m.get("main"))
            .and_then(Value::as_str);
        if let Some(main) = main {
            let found = self.probe(&clean(&package_dir.join(main)), exts);
            if !found.is_empty() {
                return found;
            }
        }
        self.probe_exts(&package_dir.join("index"), exts)
    }
}

/// Candidate targets of an `exports` field for one subpath key, best first.
fn export_targets(exports: &Value, key: &str, syntax: ImportSyntax) -> Vec<String> {
    let mut out = Vec::new();
    match exports {
        Value::Object(map) if map.keys().any(|k| k.starts_with('.')) => {
            if let Some(value) = map.get(key) {
                collect_targets(value, syntax, None, &mut out);
            } else if let Some((value, star)) = match_pattern(map, key) {
                collect_targets(value, syntax, Some(&star), &mut out);
            }
        }
        other if key == "." => collect_targets(other, syntax, None, &mut out),
        _ => {}
    }
    out
}

/// `"./features/*": "./src/features/*.js"` style keys.
fn match_pattern<'a>(
    map: &'a serde_json::Map<String, Value>,
    key: &str,
) -> Option<(&'a Value, String)> {
    let mut best: Option<(&'a Value, String, usize)> = None;
    for (pattern, value) in map {
        let Some((prefix, suffix)) = pattern.split_once('*') else {
            continue;
        };
        if key.len() >= prefix.len() + suffix.len()
            && key.starts_with(prefix)
            && key.ends_with(suffix)
        {
            let star = &key[prefix.len()..key.len() - suffix.len()];
            if best.as_ref().is_none_or(|(_, _, len)| prefix.len() > *len) {
                best = Some((value, star.to_string(), prefix.len()));
            }
        }
    }
    best.map(|(value, star, _)| (value, star))
}

fn collect_targets(value: &Value, syntax: ImportSyntax, star: Option<&str>, out: &mut Vec<String>) {
    match value {
        Value::String(target) => {
            let target = match star {
                Some(star) => target.replace('*', star),
                None => target.clone(),
            };
            out.push(target);
        }
        Value::Array(items) => {
            for item in items {
                collect_targets(item, syntax, star, out);
            }
        }
        // Conditions are tried in the order the manifest lists them.
        Value::Object(conditions) => {
            let active = conditions_for(syntax);
            let mut matched = false;
            for (condition, inner) in conditions {
                if active.contains(&condition.as_str()) {
                    collect_targets(inner, syntax, star, out);
                    matched = true;
                }
            }
            if !matched && let Some((_, first)) = conditions.iter().next() {
                collect_targets(first, syntax, star, out);
            }
        }
        _ => {}
    }
}
