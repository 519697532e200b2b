//! Benchmark catalog stored under `<storage_root>/benchmarks/`

use super::definition::{BenchmarkDefinition, BenchmarkManifest, LAUNCH_SCRIPT};
use crate::error::{BenchwrapError, IoResultExt, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Catalog sub-directory of the storage root
pub const BENCHMARKS_DIR: &str = "benchmarks";

const LAUNCHER_TEMPLATE: &str = "#!/usr/bin/env bash\nset -euo pipefail\n\
DIR=\"$(cd \"$(dirname \"$0\")\" && pwd)\"\npython \"$DIR/{workload}\"\n";

/// Catalog of registered benchmarks
///
/// Reads are shared; `add` is the only writer.
#[derive(Debug)]
pub struct BenchmarkRegistry {
    root: PathBuf,
    entries: RwLock<BTreeMap<String, BenchmarkDefinition>>,
}

impl BenchmarkRegistry {
    /// Scan the catalog under `storage_root`
    pub fn load(storage_root: &Path) -> Result<Self> {
        let root = storage_root.join(BENCHMARKS_DIR);
        let mut entries = BTreeMap::new();

        if root.is_dir() {
            for entry in fs::read_dir(&root).with_path(&root)? {
                let path = entry.with_path(&root)?.path();
                if !path.is_dir() {
                    continue;
                }
                match BenchmarkDefinition::from_dir(&path)? {
                    Some(def) => {
                        entries.insert(def.name.clone(), def);
                    }
                    None => debug!("Skipping {:?}: no {}", path, LAUNCH_SCRIPT),
                }
            }
        }

        debug!("Loaded {} benchmarks from {:?}", entries.len(), root);
        Ok(Self {
            root,
            entries: RwLock::new(entries),
        })
    }

    /// Catalog directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All definitions, ordered by name
    pub fn list(&self) -> Vec<BenchmarkDefinition> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.values().cloned().collect()
    }

    /// Definition by exact name
    pub fn get(&self, name: &str) -> Result<BenchmarkDefinition> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(name)
            .cloned()
            .ok_or_else(|| BenchwrapError::NotFound(name.to_string()))
    }

    /// Definition by exact name or unique prefix
    pub fn resolve(&self, query: &str) -> Result<BenchmarkDefinition> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        if let Some(def) = entries.get(query) {
            return Ok(def.clone());
        }

        let mut matches: Vec<&BenchmarkDefinition> = entries
            .values()
            .filter(|def| def.name.starts_with(query))
            .collect();

        match matches.len() {
            0 => Err(BenchwrapError::NotFound(query.to_string())),
            1 => Ok(matches.remove(0).clone()),
            _ => Err(BenchwrapError::AmbiguousName {
                query: query.to_string(),
                candidates: matches.iter().map(|def| def.name.clone()).collect(),
            }),
        }
    }

    /// Register a benchmark from a directory or a single `.py` workload
    pub fn add(
        &self,
        source: &Path,
        manifest: Option<BenchmarkManifest>,
    ) -> Result<BenchmarkDefinition> {
        let kind = SourceKind::classify(source)?;
        let name = kind.name(source)?;

        fs::create_dir_all(&self.root).with_path(&self.root)?;
        let dest = self.root.join(&name);

        // create_dir fails if the name exists, so concurrent adds serialize here
        match fs::create_dir(&dest) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(BenchwrapError::DuplicateName(name));
            }
            Err(e) => return Err(BenchwrapError::io(&dest, e)),
        }

        let populated = populate(&kind, source, &dest).and_then(|()| match manifest {
            Some(ref m) => m.save(&dest),
            None => Ok(()),
        });
        if let Err(e) = populated {
            warn!("Failed to add {}: {}; removing {:?}", name, e, dest);
            if let Err(cleanup) = fs::remove_dir_all(&dest) {
                warn!("Cleanup of {:?} failed: {}", dest, cleanup);
            }
            return Err(e);
        }

        let def = BenchmarkDefinition::from_dir(&dest)?.ok_or_else(|| {
            BenchwrapError::invalid_template(&dest, format!("{} missing after copy", LAUNCH_SCRIPT))
        })?;

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(def.name.clone(), def.clone());
        info!("Added benchmark {} at {:?}", def.name, dest);
        Ok(def)
    }
}

enum SourceKind {
    Directory,
    PythonWorkload,
}

impl SourceKind {
    fn classify(source: &Path) -> Result<Self> {
        if source.is_dir() {
            if source.join(LAUNCH_SCRIPT).is_file() {
                return Ok(Self::Directory);
            }
            return Err(BenchwrapError::invalid_template(
                source,
                format!("directory has no {}", LAUNCH_SCRIPT),
            ));
        }
        if source.is_file() && source.extension().map_or(false, |ext| ext == "py") {
            return Ok(Self::PythonWorkload);
        }
        Err(BenchwrapError::invalid_template(
            source,
            format!("need a .py file or a directory containing {}", LAUNCH_SCRIPT),
        ))
    }

    fn name(&self, source: &Path) -> Result<String> {
        let raw = match self {
            Self::Directory => source.file_name(),
            Self::PythonWorkload => source.file_stem(),
        };
        raw.and_then(|n| n.to_str())
            .filter(|n| !n.is_empty() && !n.starts_with('.'))
            .map(str::to_string)
            .ok_or_else(|| BenchwrapError::invalid_template(source, "cannot derive a benchmark name"))
    }
}

fn populate(kind: &SourceKind, source: &Path, dest: &Path) -> Result<()> {
    match kind {
        SourceKind::Directory => copy_tree(source, dest),
        SourceKind::PythonWorkload => {
            let file_name = source
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| BenchwrapError::invalid_template(source, "file name is not UTF-8"))?;
            let target = dest.join(file_name);
            fs::copy(source, &target).with_path(&target)?;

            let launcher = dest.join(LAUNCH_SCRIPT);
            fs::write(&launcher, LAUNCHER_TEMPLATE.replace("{workload}", file_name))
                .with_path(&launcher)?;
            make_executable(&launcher)
        }
    }
}

fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(source).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source.to_path_buf());
            BenchwrapError::io(path, e.into())
        })?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|_| BenchwrapError::invalid_template(entry.path(), "path escapes source"))?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).with_path(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target).with_path(&target)?;
        } else {
            debug!("Skipping non-regular file {:?}", entry.path());
        }
    }
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).with_path(path)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
