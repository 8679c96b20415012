use std::path::Path;

use sha2::Digest;
use sha2::Sha256;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use tracing::warn;

/// Creates the parent directory of `path` when missing
pub(crate) async fn create_parent_dir_if_not_exist(path: &Path) -> std::io::Result<()> {
    if let Some(parent_dir) = path.parent() {
        if !parent_dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent_dir).await?;
        }
    }
    Ok(())
}

/// Streams `reader` into `writer` through a fixed-size buffer, hashing every
/// byte on the way. Returns the byte count and the hex SHA-256 digest.
pub(crate) async fn copy_with_digest<R, W>(
    reader: &mut R,
    writer: &mut W,
    buffer_size: usize,
) -> std::io::Result<(u64, String)>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; buffer_size];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        writer.write_all(&buffer[..n]).await?;
        total += n as u64;
    }
    writer.flush().await?;

    Ok((total, format!("{:x}", hasher.finalize())))
}

/// Hex SHA-256 of a file, read in `buffer_size` chunks
pub(crate) async fn sha256_file(
    path: &Path,
    buffer_size: usize,
) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; buffer_size];
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub(crate) fn sha256_bytes(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}

/// Removes a file or directory tree, ignoring a missing path
pub(crate) async fn remove_path_if_exists(path: &Path) {
    let result = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => debug!("removed {:?}", path),
        Err(e) => warn!("failed to remove {:?}: {}", path, e),
    }
}

/// Marks a file, or every file below a directory, read-only
pub(crate) fn set_read_only_recursive(path: &Path) -> std::io::Result<()> {
    let meta = std::fs::symlink_metadata(path)?;
    if meta.is_dir() {
        for entry in std::fs::read_dir(path)? {
            set_read_only_recursive(&entry?.path())?;
        }
    } else if meta.is_file() {
        let mut permissions = meta.permissions();
        permissions.set_readonly(true);
        std::fs::set_permissions(path, permissions)?;
    }
    Ok(())
}
