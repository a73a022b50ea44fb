use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info};
use walkdir::WalkDir;

use crate::error::ExtractionError;

/// Environment override for the extractor binary.
pub const EXTRACTOR_ENV: &str = "TMERGE_EXTRACTOR_PATH";

/// Unpacks one archive into a destination directory.
pub trait Extractor: Send + Sync {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<(), ExtractionError>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Resolve a tool path, honouring [`EXTRACTOR_ENV`] when it points at a file.
fn resolve_tool(default_name: &str) -> PathBuf {
    if let Ok(v) = env::var(EXTRACTOR_ENV) {
        let p = PathBuf::from(&v);
        if p.exists() {
            return p;
        }
    }
    PathBuf::from(default_name)
}

fn run(mut cmd: Command, program: &Path) -> Result<(), ExtractionError> {
    debug!("running {:?}", cmd);
    let output = cmd.output().map_err(|source| ExtractionError::Launch {
        program: program.display().to_string(),
        source,
    })?;

    if !output.status.success() {
        let status = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |c| format!("code {}", c));
        return Err(ExtractionError::Failed {
            status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// macOS `ditto -x -k --sequesterRsrc <archive> <dest>`.
#[derive(Debug, Clone)]
pub struct DittoExtractor {
    pub program: PathBuf,
}

impl Default for DittoExtractor {
    fn default() -> Self {
        Self {
            program: resolve_tool("ditto"),
        }
    }
}

impl Extractor for DittoExtractor {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<(), ExtractionError> {
        if !archive.is_file() {
            return Err(ExtractionError::MissingArchive(archive.to_path_buf()));
        }
        let mut cmd = Command::new(&self.program);
        cmd.args(["-x", "-k", "--sequesterRsrc"]).arg(archive).arg(dest);
        run(cmd, &self.program)
    }

    fn name(&self) -> &str {
        "ditto"
    }
}

/// Any command line; `{archive}` and `{dest}` in the arguments are substituted.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandExtractor {
    pub fn new(program: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// `unzip -q -o <archive> -d <dest>`
    pub fn unzip() -> Self {
        Self::new(resolve_tool("unzip"), &["-q", "-o", "{archive}", "-d", "{dest}"])
    }
}

impl Extractor for CommandExtractor {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<(), ExtractionError> {
        if !archive.exists() {
            return Err(ExtractionError::MissingArchive(archive.to_path_buf()));
        }
        let archive = archive.to_string_lossy();
        let dest = dest.to_string_lossy();
        let mut cmd = Command::new(&self.program);
        for arg in &self.args {
            cmd.arg(arg.replace("{archive}", &archive).replace("{dest}", &dest));
        }
        run(cmd, &self.program)
    }

    fn name(&self) -> &str {
        "command"
    }
}

/// The "archive" is a directory that was already unpacked. It is copied so
/// the pipeline's sidecar deletion and cleanup never touch the original.
#[derive(Debug, Clone, Default)]
pub struct DirectoryExtractor;

impl Extractor for DirectoryExtractor {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<(), ExtractionError> {
        if !archive.is_dir() {
            return Err(ExtractionError::MissingArchive(archive.to_path_buf()));
        }
        let mut copied = 0u64;
        for entry in WalkDir::new(archive).into_iter() {
            let entry = entry.map_err(|e| ExtractionError::Io(e.into()))?;
            let Ok(rel) = entry.path().strip_prefix(archive) else { continue };
            let target = dest.join(rel);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)?;
            } else if entry.file_type().is_file() {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(entry.path(), &target)?;
                copied += 1;
            }
        }
        info!("Copied {} file(s) from {}", copied, archive.display());
        Ok(())
    }

    fn name(&self) -> &str {
        "directory"
    }
}
