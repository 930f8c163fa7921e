// backuptool/src/restore/mod.rs
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::backup::router::ENCRYPTED_SUFFIX;
use crate::codec::{decompress, decrypt, BackupKey};
use crate::errors::AppError;
use crate::utils::fs::write_file_atomically;

const COMPRESSED_SUFFIX: &str = ".gz";

/// Decrypts each `.encrypted` file next to itself, without the suffix.
///
/// With `decompress`, the decompressed dump is also written with `.gz`
/// stripped. Returns every file written, in order. Stops at the first failure.
pub fn decrypt_files(paths: &[PathBuf], key: &BackupKey, decompress_output: bool) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    for path in paths {
        let plain_path = strip_suffix(path, ENCRYPTED_SUFFIX).ok_or_else(|| {
            AppError::InvalidInput(format!(
                "{} does not end in {}, refusing to overwrite it",
                path.display(),
                ENCRYPTED_SUFFIX
            ))
        })?;

        let plaintext = {
            let sealed = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
            decrypt(key, &sealed).with_context(|| format!("Failed to decrypt {}", path.display()))?
        };

        write_file_atomically(&plain_path, &plaintext)?;
        println!("Decrypted {}", plain_path.display());
        written.push(plain_path.clone());

        if decompress_output {
            let Some(dump_path) = strip_suffix(&plain_path, COMPRESSED_SUFFIX) else {
                info!("{} is not gzip-named, leaving it compressed", plain_path.display());
                continue;
            };
            let dump = decompress(&plaintext)
                .with_context(|| format!("Failed to decompress {}", plain_path.display()))?;
            drop(plaintext);
            write_file_atomically(&dump_path, &dump)?;
            println!("Decompressed {}", dump_path.display());
            written.push(dump_path);
        }
    }

    Ok(written)
}

fn strip_suffix(path: &Path, suffix: &str) -> Option<PathBuf> {
    let text = path.to_str()?;
    text.strip_suffix(suffix)
        .filter(|rest| !rest.is_empty() && !rest.ends_with('/'))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{compress, encrypt};

    fn key() -> BackupKey {
        BackupKey::new([42u8; 32])
    }

    #[test]
    fn test_decrypt_and_decompress() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sealed_path = dir.path().join("app.json-dumpdata.gz.encrypted");
        std::fs::write(&sealed_path, encrypt(&key(), &compress(b"[{\"pk\": 1}]")?)?)?;

        let written = decrypt_files(&[sealed_path], &key(), true)?;
        assert_eq!(
            written,
            vec![
                dir.path().join("app.json-dumpdata.gz"),
                dir.path().join("app.json-dumpdata"),
            ]
        );
        assert_eq!(std::fs::read(&written[1])?, b"[{\"pk\": 1}]");
        Ok(())
    }

    #[test]
    fn test_rejects_paths_without_suffix() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let plain = dir.path().join("notes.txt");
        std::fs::write(&plain, b"keep me")?;

        let err = decrypt_files(&[plain.clone()], &key(), false).unwrap_err();
        assert!(matches!(err.downcast_ref::<AppError>(), Some(AppError::InvalidInput(_))));
        assert_eq!(std::fs::read(&plain)?, b"keep me");
        Ok(())
    }

    #[test]
    fn test_wrong_key_writes_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sealed_path = dir.path().join("a.gz.encrypted");
        std::fs::write(&sealed_path, encrypt(&key(), b"secret")?)?;

        let err = decrypt_files(&[sealed_path], &BackupKey::new([0u8; 32]), false).unwrap_err();
        assert!(matches!(err.root_cause().downcast_ref::<AppError>(), Some(AppError::Authentication)));
        assert!(!dir.path().join("a.gz").exists());
        Ok(())
    }
}
