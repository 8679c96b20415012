use std::fs::File;
use std::io::BufReader;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;

use flate2::read::GzDecoder;

use crate::constants::GZIP_MAGIC;

/// Packs the contents of `src_dir` into an uncompressed tar at `dst`.
/// Blocking; run on a blocking thread.
pub(crate) fn pack_directory(
    src_dir: &Path,
    dst: &Path,
) -> std::io::Result<()> {
    let file = File::create(dst)?;
    let mut builder = tar::Builder::new(file);
    builder.follow_symlinks(false);
    builder.append_dir_all(".", src_dir)?;
    builder.into_inner()?.sync_all()
}

/// Unpacks a tar or gzip-compressed tar into `dst`, creating it.
/// Entries escaping `dst` are skipped by the tar reader. Blocking.
pub(crate) fn unpack(
    archive: &Path,
    dst: &Path,
) -> std::io::Result<()> {
    let mut file = File::open(archive)?;
    let compressed = is_gzip(&mut file)?;
    file.seek(SeekFrom::Start(0))?;

    std::fs::create_dir_all(dst)?;
    let reader = BufReader::new(file);
    if compressed {
        tar::Archive::new(GzDecoder::new(reader)).unpack(dst)
    } else {
        tar::Archive::new(reader).unpack(dst)
    }
}

fn is_gzip(file: &mut File) -> std::io::Result<bool> {
    let mut magic = [0u8; 2];
    let mut read = 0;
    while read < magic.len() {
        let n = file.read(&mut magic[read..])?;
        if n == 0 {
            return Ok(false);
        }
        read += n;
    }
    Ok(magic == GZIP_MAGIC)
}
