//! Benchmark definitions and their on-disk manifest

use crate::error::{BenchwrapError, IoResultExt, Result};
use crate::spec::ResourceRequest;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Launch script every benchmark directory must contain
pub const LAUNCH_SCRIPT: &str = "job_start.sh";

/// Optional manifest carrying default resources
pub const MANIFEST_FILE: &str = "benchmark.json";

/// A registered benchmark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkDefinition {
    /// Unique name (the directory name)
    pub name: String,
    /// Template directory copied into the catalog
    pub template_dir: PathBuf,
    /// Default resources
    pub resources: ResourceRequest,
    /// Cores per node, when the benchmark pins its placement
    pub cores_per_node: Option<u32>,
    /// Free-form description
    pub description: Option<String>,
}

impl BenchmarkDefinition {
    /// Launch script submitted to the scheduler
    pub fn script(&self) -> PathBuf {
        self.template_dir.join(LAUNCH_SCRIPT)
    }

    /// Load a definition from a catalog directory
    ///
    /// Returns `Ok(None)` for directories without a launch script.
    pub fn from_dir(dir: &Path) -> Result<Option<Self>> {
        if !dir.join(LAUNCH_SCRIPT).is_file() {
            return Ok(None);
        }

        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| BenchwrapError::invalid_template(dir, "directory name is not UTF-8"))?
            .to_string();

        let manifest = BenchmarkManifest::load(dir)?.unwrap_or_default();

        Ok(Some(Self {
            name,
            template_dir: dir.to_path_buf(),
            resources: manifest.resources,
            cores_per_node: manifest.cores_per_node,
            description: manifest.description,
        }))
    }
}

/// Contents of `benchmark.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkManifest {
    /// Default resources
    pub resources: ResourceRequest,
    /// Capacity constraint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cores_per_node: Option<u32>,
    /// Description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl BenchmarkManifest {
    /// Read the manifest in `dir`, if present
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).with_path(&path)?;
        let manifest = serde_json::from_str(&content).map_err(|e| {
            BenchwrapError::invalid_template(&path, format!("malformed manifest: {}", e))
        })?;
        Ok(Some(manifest))
    }

    /// Write the manifest into `dir`
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(MANIFEST_FILE);
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content).with_path(&path)
    }
}
