//! Folder merge: one subdirectory per device, every file inside a CSV export
//! (optionally zipped). Produces the wide table the reshaper consumes.

use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use zip::ZipArchive;

use crate::error::PipelineError;
use crate::progress::RunHooks;
use crate::series::DEFAULT_DEVICE_COLUMN;
use crate::table::{read_csv_reader, write_csv_path, RawTable};

pub const EXPORTS_DIR: &str = "exports";
pub const MERGED_FILE_NAME: &str = "merged_data.csv";

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("folder not found: {0}")]
    FolderNotFound(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("archive at {path} has no CSV entry")]
    MissingCsvEntry { path: PathBuf },
    #[error("could not read table: {0}")]
    Table(#[from] PipelineError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConfig {
    pub device_column: String,
    pub excluded_dirs: Vec<String>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            device_column: DEFAULT_DEVICE_COLUMN.to_string(),
            excluded_dirs: vec![EXPORTS_DIR.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub table: RawTable,
    pub datasets: Vec<String>,
    pub files_loaded: u64,
    pub skipped: Vec<SkippedFile>,
}

pub fn merge_folder(
    folder: &Path,
    cfg: &MergeConfig,
    hooks: RunHooks<'_>,
) -> Result<Option<MergeOutcome>, MergeError> {
    if !folder.is_dir() {
        return Err(MergeError::FolderNotFound(folder.to_path_buf()));
    }

    let subdirs = list_dataset_dirs(folder, cfg)?;
    info!(
        component = "merge",
        event = "merge.start",
        folder = %folder.display(),
        dataset_dirs = subdirs.len()
    );
    if subdirs.is_empty() {
        return Ok(None);
    }

    let total = subdirs.len();
    let mut parts = Vec::new();
    let mut datasets = Vec::new();
    let mut files_loaded = 0u64;
    let mut skipped = Vec::new();

    for (idx, (name, path)) in subdirs.into_iter().enumerate() {
        hooks.checkpoint("merge")?;
        let mut tables = Vec::new();
        for file in list_files(&path)? {
            match read_table_file(&file) {
                Ok(table) => {
                    files_loaded += 1;
                    tables.push(table);
                }
                Err(err) => {
                    warn!(
                        component = "merge",
                        event = "merge.file.skipped",
                        path = %file.display(),
                        error = %err
                    );
                    skipped.push(SkippedFile {
                        path: file,
                        reason: err.to_string(),
                    });
                }
            }
        }

        if tables.is_empty() {
            continue;
        }

        let dataset = RawTable::concat(tables).with_leading_column(&cfg.device_column, &name);
        hooks.report(&format!("Processing folder {} of {}…", idx + 1, total));
        info!(
            component = "merge",
            event = "merge.dataset.loaded",
            dataset = %name,
            rows = dataset.len()
        );
        parts.push(dataset);
        datasets.push(name);
    }

    if parts.is_empty() {
        info!(component = "merge", event = "merge.empty");
        return Ok(None);
    }

    let table = RawTable::concat(parts);
    info!(
        component = "merge",
        event = "merge.finish",
        datasets = datasets.len(),
        files_loaded,
        files_skipped = skipped.len(),
        rows = table.len()
    );

    Ok(Some(MergeOutcome {
        table,
        datasets,
        files_loaded,
        skipped,
    }))
}

pub fn export_merged(
    outcome: &MergeOutcome,
    folder: &Path,
    export_dir: Option<&Path>,
) -> Result<PathBuf, MergeError> {
    let dir = export_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| folder.join(EXPORTS_DIR));
    fs::create_dir_all(&dir)?;
    let out_path = dir.join(MERGED_FILE_NAME);
    write_csv_path(&outcome.table, &out_path)?;

    info!(
        component = "merge",
        event = "merge.exported",
        path = %out_path.display(),
        rows = outcome.table.len()
    );
    Ok(out_path)
}

fn list_dataset_dirs(
    folder: &Path,
    cfg: &MergeConfig,
) -> Result<Vec<(String, PathBuf)>, MergeError> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(folder)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if cfg.excluded_dirs.iter().any(|excluded| excluded == &name) {
            continue;
        }
        dirs.push((name, path));
    }
    dirs.sort();
    Ok(dirs)
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>, MergeError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn read_table_file(path: &Path) -> Result<RawTable, MergeError> {
    let is_zip = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false);

    let table = if is_zip {
        read_zipped_csv(path)?
    } else {
        read_csv_reader(fs::File::open(path)?)?
    };
    Ok(table)
}

fn read_zipped_csv(path: &Path) -> Result<RawTable, MergeError> {
    let file = fs::File::open(path)?;
    let mut zip = ZipArchive::new(file)?;

    for idx in 0..zip.len() {
        let mut entry = zip.by_index(idx)?;
        if entry.is_dir() || !entry.name().to_ascii_lowercase().ends_with(".csv") {
            continue;
        }
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        return Ok(read_csv_reader(Cursor::new(buf))?);
    }

    Err(MergeError::MissingCsvEntry {
        path: path.to_path_buf(),
    })
}
