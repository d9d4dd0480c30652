use anyhow::{Context, Result};
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

/// Fixed allow-list of extensions considered documentation/source content
/// (spec §4.4 step 1). Anything else is skipped regardless of directory.
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "md", "txt", "rst", "html", "json", "yaml", "yml", "toml", "py", "rs", "go", "js", "ts",
    "tsx", "jsx", "java", "rb", "php", "c", "h", "cpp", "hpp", "cs", "sh", "sql",
];

/// Fixed deny-list of directory names skipped during enumeration, regardless
/// of `.gitignore` contents (spec §4.4 step 1).
const DENY_DIR_NAMES: &[&str] = &[
    ".git",
    "node_modules",
    ".index",
    "venv",
    ".venv",
    "env",
    ".env",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".ruff_cache",
    ".cache",
    "target",
    "dist",
    "build",
];

fn default_overrides(repo_root: &Path, extra_exclude_dirs: &[String], index_dir_name: Option<&str>) -> Result<Override> {
    let mut ob = OverrideBuilder::new(repo_root);

    for d in DENY_DIR_NAMES {
        ob.add(&format!("**/{d}"))?;
        ob.add(&format!("**/{d}/**"))?;
    }

    if let Some(d) = index_dir_name {
        let d = d.trim().trim_matches('/');
        if !d.is_empty() {
            ob.add(&format!("**/{d}"))?;
            ob.add(&format!("**/{d}/**"))?;
        }
    }

    for d in extra_exclude_dirs {
        let d = d.trim().trim_matches('/');
        if d.is_empty() {
            continue;
        }
        ob.add(&format!("**/{d}"))?;
        ob.add(&format!("**/{d}/**"))?;
    }

    Ok(ob.build()?)
}

fn has_allowed_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| ALLOWED_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub abs_path: PathBuf,
    pub rel_path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub repo_root: PathBuf,
    pub target: PathBuf,
    pub max_file_bytes: u64,
    pub exclude_dir_names: Vec<String>,
    /// Basename of this engine's own index directory, always denied.
    pub index_dir_name: Option<String>,
}

impl ScanOptions {
    pub fn target_root(&self) -> PathBuf {
        if self.target.is_absolute() {
            self.target.clone()
        } else {
            self.repo_root.join(&self.target)
        }
    }
}

/// Enumerate candidate files under `opts.target`, in stable path order so
/// `index_paths` processes files in a deterministic arrival order (spec §4.4
/// step 3).
pub fn scan_workspace(opts: &ScanOptions) -> Result<Vec<FileEntry>> {
    let target_root = opts.target_root();

    let meta = std::fs::metadata(&target_root)
        .with_context(|| format!("Target does not exist: {}", target_root.display()))?;

    if meta.is_file() {
        return scan_single_file(&opts.repo_root, &target_root, opts.max_file_bytes)
            .map(|v| v.into_iter().collect());
    }

    let mut entries = Vec::new();
    let overrides = default_overrides(
        &opts.repo_root,
        &opts.exclude_dir_names,
        opts.index_dir_name.as_deref(),
    )?;
    let walker = WalkBuilder::new(&target_root)
        .standard_filters(true) // .gitignore, .ignore, hidden, etc.
        .overrides(overrides)
        .build();

    for item in walker {
        let dent = match item {
            Ok(d) => d,
            Err(_) => continue,
        };

        if !dent.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }

        let abs_path = dent.into_path();

        if !has_allowed_extension(&abs_path) {
            continue;
        }

        let bytes = match std::fs::metadata(&abs_path).map(|m| m.len()) {
            Ok(b) => b,
            Err(_) => continue,
        };

        if bytes == 0 || bytes > opts.max_file_bytes {
            continue;
        }

        let rel_path = path_relative_to(&abs_path, &opts.repo_root)
            .with_context(|| format!("Failed to relativize path: {}", abs_path.display()))?;

        entries.push(FileEntry {
            abs_path,
            rel_path,
            bytes,
        });
    }

    entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(entries)
}

fn scan_single_file(repo_root: &Path, abs_path: &Path, max_file_bytes: u64) -> Result<Vec<FileEntry>> {
    if !has_allowed_extension(abs_path) {
        return Ok(vec![]);
    }

    let ov = default_overrides(repo_root, &[], None)?;
    if ov.matched(abs_path, /* is_dir */ false).is_ignore() {
        return Ok(vec![]);
    }

    let bytes = std::fs::metadata(abs_path)?.len();
    if bytes == 0 || bytes > max_file_bytes {
        return Ok(vec![]);
    }

    let rel_path = path_relative_to(abs_path, repo_root)?;
    Ok(vec![FileEntry {
        abs_path: abs_path.to_path_buf(),
        rel_path,
        bytes,
    }])
}

fn path_relative_to(path: &Path, base: &Path) -> Result<PathBuf> {
    let rel = path
        .strip_prefix(base)
        .with_context(|| format!("{} is not under {}", path.display(), base.display()))?;
    Ok(rel.to_path_buf())
}
