use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::io::BufWriter;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::archive;
use crate::constants::MATERIALIZE_TMP_PREFIX;
use crate::utils::file_io::copy_with_digest;
use crate::utils::file_io::create_parent_dir_if_not_exist;
use crate::utils::file_io::remove_path_if_exists;
use crate::utils::file_io::set_read_only_recursive;
use crate::utils::file_io::sha256_bytes;
use crate::utils::file_io::sha256_file;
use crate::ApplicationSpec;
use crate::BundleSource;
use crate::ResourceBundle;
use crate::ResourceMaterializationError;
use crate::ResourceStagingError;
use crate::Result;
use crate::StagingConfig;

/// A bundle captured into the staging area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedBundle {
    pub name: String,
    /// File inside the staging area
    pub location: PathBuf,
    pub size: u64,
    /// Hex SHA-256 of the staged content
    pub digest: String,
    pub destination: PathBuf,
    pub archive: bool,
    pub read_only: bool,
}

/// Staged bundles of one application, grouped by runnable name
pub type StagedApplication = HashMap<String, Vec<StagedBundle>>;

/// Ships bundles from the submitting side into instance working directories
#[derive(Debug, Clone)]
pub struct ResourceDistributor {
    config: StagingConfig,
}

impl ResourceDistributor {
    pub fn new(config: StagingConfig) -> Self {
        Self { config }
    }

    pub fn staging_root(&self) -> &Path {
        &self.config.staging_root
    }

    fn application_dir(
        &self,
        application_id: &str,
    ) -> PathBuf {
        self.config.staging_root.join(application_id)
    }

    /// Captures `bundle` into `<staging_root>/<application_id>/<runnable>/<name>`.
    ///
    /// The source is read exactly once. Later changes to it are not seen by
    /// any instance.
    pub async fn stage(
        &self,
        application_id: &str,
        runnable: &str,
        bundle: &ResourceBundle,
    ) -> Result<StagedBundle> {
        let location = self.application_dir(application_id).join(runnable).join(&bundle.name);
        create_parent_dir_if_not_exist(&location)
            .await
            .map_err(|source| ResourceStagingError::Io {
                path: location.clone(),
                source,
            })?;

        let (size, digest) = match &bundle.source {
            BundleSource::Bytes(content) => {
                tokio::fs::write(&location, content).await.map_err(|source| {
                    ResourceStagingError::Io {
                        path: location.clone(),
                        source,
                    }
                })?;
                (content.len() as u64, sha256_bytes(content))
            }
            BundleSource::Path(path) => self.stage_path(bundle, path, &location).await?,
        };

        debug!(
            application_id,
            runnable,
            bundle = %bundle.name,
            size,
            %digest,
            "staged bundle"
        );

        Ok(StagedBundle {
            name: bundle.name.clone(),
            location,
            size,
            digest,
            destination: bundle.destination.clone(),
            archive: bundle.archive,
            read_only: bundle.read_only,
        })
    }

    async fn stage_path(
        &self,
        bundle: &ResourceBundle,
        source_path: &Path,
        location: &Path,
    ) -> Result<(u64, String)> {
        let unreadable = |source| ResourceStagingError::SourceUnreadable {
            bundle: bundle.name.clone(),
            path: source_path.to_path_buf(),
            source,
        };

        let meta = tokio::fs::metadata(source_path).await.map_err(unreadable)?;
        if meta.is_dir() {
            if !bundle.archive {
                return Err(ResourceStagingError::NotArchivable {
                    bundle: bundle.name.clone(),
                    path: source_path.to_path_buf(),
                }
                .into());
            }

            let src = source_path.to_path_buf();
            let dst = location.to_path_buf();
            tokio::task::spawn_blocking(move || archive::pack_directory(&src, &dst))
                .await?
                .map_err(|source| ResourceStagingError::Archive {
                    bundle: bundle.name.clone(),
                    source,
                })?;

            let size = tokio::fs::metadata(location)
                .await
                .map_err(|source| ResourceStagingError::Io {
                    path: location.to_path_buf(),
                    source,
                })?
                .len();
            let digest = sha256_file(location, self.config.copy_buffer_size)
                .await
                .map_err(|source| ResourceStagingError::Io {
                    path: location.to_path_buf(),
                    source,
                })?;
            return Ok((size, digest));
        }

        let mut reader = File::open(source_path).await.map_err(unreadable)?;
        let target = File::create(location).await.map_err(|source| ResourceStagingError::Io {
            path: location.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(target);

        let copied = copy_with_digest(&mut reader, &mut writer, self.config.copy_buffer_size).await;
        let result = match copied {
            Ok(r) => r,
            Err(source) => {
                return Err(ResourceStagingError::SourceUnreadable {
                    bundle: bundle.name.clone(),
                    path: source_path.to_path_buf(),
                    source,
                }
                .into())
            }
        };
        writer
            .into_inner()
            .sync_all()
            .await
            .map_err(|source| ResourceStagingError::Io {
                path: location.to_path_buf(),
                source,
            })?;
        Ok(result)
    }

    /// Stages every bundle of every runnable.
    ///
    /// On the first failure the application's staging directory is removed and
    /// the error returned.
    pub async fn stage_application(
        &self,
        application_id: &str,
        spec: &ApplicationSpec,
    ) -> Result<StagedApplication> {
        let mut staged = StagedApplication::new();
        for runnable in spec.runnables() {
            let mut bundles = Vec::with_capacity(runnable.bundles.len());
            for bundle in &runnable.bundles {
                match self.stage(application_id, &runnable.name, bundle).await {
                    Ok(s) => bundles.push(s),
                    Err(e) => {
                        warn!(
                            application_id,
                            runnable = %runnable.name,
                            bundle = %bundle.name,
                            "staging failed: {}", e
                        );
                        self.cleanup(application_id).await;
                        return Err(e);
                    }
                }
            }
            staged.insert(runnable.name.clone(), bundles);
        }

        info!(
            application_id,
            bundles = staged.values().map(Vec::len).sum::<usize>(),
            "application resources staged"
        );
        Ok(staged)
    }

    /// Lays out `staged` at `<working_dir>/<destination>` and returns that path.
    ///
    /// Content goes to a hidden sibling first and is renamed into place once
    /// complete and verified, so the destination never shows partial content.
    pub async fn materialize(
        &self,
        staged: &StagedBundle,
        working_dir: &Path,
    ) -> Result<PathBuf> {
        let target = working_dir.join(&staged.destination);
        if tokio::fs::symlink_metadata(&target).await.is_ok() {
            return Err(ResourceMaterializationError::DestinationExists(target).into());
        }

        let io_err = |path: &Path, source| ResourceMaterializationError::Io {
            bundle: staged.name.clone(),
            path: path.to_path_buf(),
            source,
        };

        create_parent_dir_if_not_exist(&target)
            .await
            .map_err(|e| io_err(&target, e))?;

        let tmp = partial_path(&target);
        let result = self.materialize_into(staged, &tmp).await;
        if let Err(e) = result {
            remove_path_if_exists(&tmp).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            remove_path_if_exists(&tmp).await;
            return Err(io_err(&target, e).into());
        }

        debug!(bundle = %staged.name, target = ?target, "materialized bundle");
        Ok(target)
    }

    async fn materialize_into(
        &self,
        staged: &StagedBundle,
        tmp: &Path,
    ) -> Result<()> {
        let io_err = |path: &Path, source| ResourceMaterializationError::Io {
            bundle: staged.name.clone(),
            path: path.to_path_buf(),
            source,
        };

        if staged.archive {
            let actual = sha256_file(&staged.location, self.config.copy_buffer_size)
                .await
                .map_err(|e| io_err(&staged.location, e))?;
            verify_digest(staged, actual)?;

            let archive_path = staged.location.clone();
            let dst = tmp.to_path_buf();
            tokio::task::spawn_blocking(move || archive::unpack(&archive_path, &dst))
                .await?
                .map_err(|source| ResourceMaterializationError::Extract {
                    bundle: staged.name.clone(),
                    source,
                })?;
        } else {
            let mut reader = File::open(&staged.location)
                .await
                .map_err(|e| io_err(&staged.location, e))?;
            let file = File::create(tmp).await.map_err(|e| io_err(tmp, e))?;
            let mut writer = BufWriter::new(file);
            let (_, actual) =
                copy_with_digest(&mut reader, &mut writer, self.config.copy_buffer_size)
                    .await
                    .map_err(|e| io_err(tmp, e))?;
            writer.shutdown().await.map_err(|e| io_err(tmp, e))?;
            verify_digest(staged, actual)?;
        }

        if staged.read_only {
            let path = tmp.to_path_buf();
            tokio::task::spawn_blocking(move || set_read_only_recursive(&path))
                .await?
                .map_err(|e| io_err(tmp, e))?;
        }
        Ok(())
    }

    /// Removes everything staged for `application_id`
    pub async fn cleanup(
        &self,
        application_id: &str,
    ) {
        remove_path_if_exists(&self.application_dir(application_id)).await;
    }
}

fn verify_digest(
    staged: &StagedBundle,
    actual: String,
) -> Result<()> {
    if actual != staged.digest {
        return Err(ResourceMaterializationError::DigestMismatch {
            bundle: staged.name.clone(),
            expected: staged.digest.clone(),
            actual,
        }
        .into());
    }
    Ok(())
}

fn partial_path(target: &Path) -> PathBuf {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!("{MATERIALIZE_TMP_PREFIX}{file_name}"))
}
