//! Loading source files from a directory or a git repository.

use std::path::{Path, PathBuf};
use anyhow::{anyhow, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use log::{debug, info, warn};
use tokio::process::Command;
use walkdir::WalkDir;

use crate::pipeline::errors::PipelineError;
use crate::utils::retrievers::Document;

/// Walks a directory and loads every file with a matching suffix as a [Document] whose source is the file path.
#[derive(Debug, Clone)]
pub struct SourceLoader {
    pub root: PathBuf,
    /// Kept suffixes such as `.py`. Empty keeps every file.
    pub suffixes: Vec<String>,
    exclude: Option<GlobSet>,
}

impl SourceLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            suffixes: Vec::new(),
            exclude: None,
        }
    }

    pub fn with_suffixes(mut self, suffixes: &[&str]) -> Self {
        self.suffixes = suffixes.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Skip paths matching any of `patterns`, e.g. `**/non-utf8-encoding.py`.
    pub fn with_exclude(mut self, patterns: &[&str]) -> Result<Self> {
        if patterns.is_empty() {
            self.exclude = None;
            return Ok(self);
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).with_context(|| format!("invalid exclude pattern '{}'", pattern))?;
            builder.add(glob);
        }
        self.exclude = Some(builder.build()?);
        Ok(self)
    }

    fn keeps(&self, path: &Path) -> bool {
        let suffix_ok = self.suffixes.is_empty() || path.file_name()
            .and_then(|name| name.to_str())
            .map(|name| self.suffixes.iter().any(|suffix| name.ends_with(suffix.as_str())))
            .unwrap_or(false);
        let excluded = self.exclude.as_ref().map(|set| set.is_match(path)).unwrap_or(false);
        suffix_ok && !excluded
    }

    /// All kept files, sorted by path. Files that are not valid UTF-8 are skipped with a warning.
    pub fn load(&self) -> Result<Vec<Document>> {
        if !self.root.is_dir() {
            return Err(anyhow!("{} is not a directory", self.root.display()));
        }
        let mut paths: Vec<PathBuf> = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| self.keeps(path))
            .collect();
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            match String::from_utf8(bytes) {
                Ok(content) => documents.push(Document::new(content).with_source(path.to_string_lossy())),
                Err(_) => warn!("skipping {}: not valid UTF-8", path.display()),
            }
        }
        info!("loaded {} files from {}", documents.len(), self.root.display());
        Ok(documents)
    }
}

/// Shallow-clones `url` into `dest`. An existing non-empty `dest` is taken as a previous checkout and reused.
pub async fn clone_repository(url: &str, dest: impl AsRef<Path>) -> Result<PathBuf> {
    let dest = dest.as_ref().to_path_buf();
    if is_non_empty_dir(&dest).await {
        debug!("reusing checkout at {}", dest.display());
        return Ok(dest);
    }
    info!("cloning {} into {}", url, dest.display());
    let output = Command::new("git")
        .arg("clone")
        .arg("--depth")
        .arg("1")
        .arg(url)
        .arg(&dest)
        .output()
        .await
        .map_err(|e| PipelineError::upstream("git clone", e))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PipelineError::upstream(format!("git clone {}", url), stderr.trim()).into());
    }
    Ok(dest)
}

async fn is_non_empty_dir(path: &Path) -> bool {
    match tokio::fs::read_dir(path).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
        Err(_) => false,
    }
}

#[cfg(test)]
mod test_loader {
    use std::fs;
    use std::path::PathBuf;
    use super::{clone_repository, SourceLoader};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pipeprompt-loader-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join("pkg/sub")).unwrap();
        fs::write(dir.join("pkg/a.py"), "def a():\n    pass\n").unwrap();
        fs::write(dir.join("pkg/sub/b.py"), "class B:\n    pass\n").unwrap();
        fs::write(dir.join("pkg/sub/notes.md"), "# notes").unwrap();
        fs::write(dir.join("pkg/sub/non-utf8-encoding.py"), "x = 1").unwrap();
        fs::write(dir.join("pkg/latin1.py"), [0x63u8, 0x61, 0x66, 0xe9]).unwrap();
        dir
    }

    #[test]
    fn test_load_filters() {
        let dir = scratch_dir("filters");
        let loader = SourceLoader::new(dir.join("pkg"))
            .with_suffixes(&[".py"])
            .with_exclude(&["**/non-utf8-encoding.py"])
            .unwrap();
        let docs = loader.load().unwrap();
        let sources: Vec<String> = docs.iter().map(|d| d.source.clone().unwrap()).collect();
        assert_eq!(docs.len(), 2);
        assert!(sources[0].ends_with("a.py"));
        assert!(sources[1].ends_with("b.py"));
        assert_eq!(docs[0].content, "def a():\n    pass\n");
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_load_missing_dir() {
        assert!(SourceLoader::new("/definitely/not/here").load().is_err());
        assert!(SourceLoader::new(".").with_exclude(&["[unclosed"]).is_err());
    }

    #[tokio::test]
    async fn test_clone_reuses_checkout() {
        let dir = scratch_dir("reuse");
        let dest = clone_repository("https://invalid.example/repo.git", &dir).await.unwrap();
        assert_eq!(dest, dir);
        fs::remove_dir_all(dir).unwrap();
    }
}
