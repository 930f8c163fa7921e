// backuptool/src/utils/fs.rs
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Writes `contents` to `target` as a whole file.
///
/// Data goes to a temporary file in the same directory which is then renamed
/// over `target`, so a reader never observes a half-written file.
pub fn write_file_atomically(target: &Path, contents: &[u8]) -> Result<()> {
    let parent = match target.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    if !parent.exists() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let mut staged = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temporary file in {}", parent.display()))?;
    staged
        .write_all(contents)
        .with_context(|| format!("Failed to write temporary file for {}", target.display()))?;
    staged
        .as_file()
        .sync_all()
        .with_context(|| format!("Failed to flush temporary file for {}", target.display()))?;
    staged
        .persist(target)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to move temporary file into place: {}", target.display()))?;
    Ok(())
}
