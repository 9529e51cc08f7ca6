//! Filesystem backups of the engine's data directory.
//!
//! A backup is an atomic snapshot of `{home}/data` written under
//! `{dest}/{chain_id}/{chain_id}_{height}_{timestamp}`, optionally
//! compressed, with retention trimming old entries. Backup failures are
//! logged by the caller, never fatal to the sync.

use anyhow::{bail, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    TarGz,
    Zip,
}

impl FromStr for Compression {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" => Ok(Compression::None),
            "tar.gz" => Ok(Compression::TarGz),
            "zip" => Ok(Compression::Zip),
            other => bail!("unsupported backup compression \"{other}\", use \"tar.gz\" or \"zip\""),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Directory being backed up, normally `{home}/data`.
    pub src_path: PathBuf,
    /// Backup root; per-chain directories are created below it.
    pub dest_path: PathBuf,
    /// Block interval between backups. Zero disables periodic backups.
    pub interval: u64,
    /// Number of newest backups to keep. Zero keeps all.
    pub keep_recent: u64,
    pub compression: Compression,
}

impl BackupConfig {
    pub fn new(
        src_path: impl Into<PathBuf>,
        dest_path: impl Into<PathBuf>,
        interval: u64,
        keep_recent: u64,
        compression: &str,
    ) -> Result<Self> {
        Ok(Self {
            src_path: src_path.into(),
            dest_path: dest_path.into(),
            interval,
            keep_recent,
            compression: compression.parse()?,
        })
    }
}

/// Snapshot the data directory. `is_final` marks the terminal backup taken
/// at the end of a sync; final backups carry a `_final` suffix and are
/// exempt from retention trimming.
pub async fn create_backup(
    config: &BackupConfig,
    chain_id: &str,
    height: u64,
    is_final: bool,
) -> Result<()> {
    let config = config.clone();
    let chain_id = chain_id.to_string();
    tokio::task::spawn_blocking(move || create_backup_blocking(&config, &chain_id, height, is_final))
        .await
        .context("backup task panicked")?
}

fn create_backup_blocking(
    config: &BackupConfig,
    chain_id: &str,
    height: u64,
    is_final: bool,
) -> Result<()> {
    if !config.src_path.is_dir() {
        bail!(
            "backup source {} is not a directory",
            config.src_path.display()
        );
    }

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before unix epoch")?
        .as_millis();
    let suffix = if is_final { "_final" } else { "" };
    let name = format!("{chain_id}_{height}_{timestamp}{suffix}");

    let chain_dir = config.dest_path.join(chain_id);
    fs::create_dir_all(&chain_dir)
        .with_context(|| format!("create backup directory {}", chain_dir.display()))?;

    match config.compression {
        Compression::None => {
            copy_dir_recursive(&config.src_path, &chain_dir.join(&name))?;
        }
        Compression::TarGz => {
            let archive_path = chain_dir.join(format!("{name}.tar.gz"));
            let file = File::create(&archive_path)
                .with_context(|| format!("create {}", archive_path.display()))?;
            let encoder = GzEncoder::new(file, GzLevel::default());
            let mut builder = tar::Builder::new(encoder);
            builder
                .append_dir_all(&name, &config.src_path)
                .context("append data directory to archive")?;
            builder
                .into_inner()
                .and_then(|encoder| encoder.finish())
                .context("finish tar.gz archive")?;
        }
        Compression::Zip => {
            let archive_path = chain_dir.join(format!("{name}.zip"));
            write_zip(&config.src_path, &archive_path, &name)?;
        }
    }

    info!(chain_id, height, backup = %name, "created backup");

    if config.keep_recent > 0 {
        trim_retention(&chain_dir, config.keep_recent)?;
    }

    Ok(())
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).with_context(|| format!("create {}", dest.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("read {}", src.display()))? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

fn write_zip(src: &Path, archive_path: &Path, prefix: &str) -> Result<()> {
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    let file =
        File::create(archive_path).with_context(|| format!("create {}", archive_path.display()))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    fn add_dir(
        writer: &mut ZipWriter<File>,
        options: SimpleFileOptions,
        dir: &Path,
        prefix: &str,
    ) -> Result<()> {
        for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
            let entry = entry?;
            let rel = format!("{prefix}/{}", entry.file_name().to_string_lossy());
            if entry.file_type()?.is_dir() {
                writer.add_directory(rel.as_str(), options)?;
                add_dir(writer, options, &entry.path(), &rel)?;
            } else {
                writer.start_file(rel.as_str(), options)?;
                let mut input = File::open(entry.path())
                    .with_context(|| format!("open {}", entry.path().display()))?;
                io::copy(&mut input, writer)?;
            }
        }
        Ok(())
    }

    add_dir(&mut writer, options, src, prefix)?;
    writer.finish().context("finish zip archive")?;
    Ok(())
}

/// Remove all but the `keep_recent` newest backups. Final backups are left
/// alone.
fn trim_retention(chain_dir: &Path, keep_recent: u64) -> Result<()> {
    let mut entries: Vec<(PathBuf, SystemTime)> = fs::read_dir(chain_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            !entry
                .file_name()
                .to_string_lossy()
                .trim_end_matches(".tar.gz")
                .trim_end_matches(".zip")
                .ends_with("_final")
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((entry.path(), modified))
        })
        .collect();

    entries.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in entries.into_iter().skip(keep_recent as usize) {
        debug!(backup = %path.display(), "trimming old backup");
        if path.is_dir() {
            fs::remove_dir_all(&path)
                .with_context(|| format!("remove old backup {}", path.display()))?;
        } else {
            fs::remove_file(&path)
                .with_context(|| format!("remove old backup {}", path.display()))?;
        }
    }

    Ok(())
}
