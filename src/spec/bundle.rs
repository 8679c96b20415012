use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use bytes::Bytes;

use crate::Result;
use crate::SpecValidationError;

/// Where bundle content comes from. Read once, at staging time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleSource {
    /// Local file, or directory when the bundle is an archive
    Path(PathBuf),
    /// In-memory content
    Bytes(Bytes),
}

/// A named local file or archive shipped into an instance working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBundle {
    pub name: String,
    pub source: BundleSource,
    /// Relative path inside the working directory
    pub destination: PathBuf,
    /// Extract at `destination` before the entry point runs
    pub archive: bool,
    pub read_only: bool,
}

impl ResourceBundle {
    /// Plain file copied to `<working_dir>/<name>`
    pub fn file(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        let name = name.into();
        Self {
            destination: PathBuf::from(&name),
            name,
            source: BundleSource::Path(path.into()),
            archive: false,
            read_only: false,
        }
    }

    /// Archive (tar or tar.gz) extracted into `<working_dir>/<name>/`.
    /// A directory source is packed at staging time.
    pub fn archive(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            archive: true,
            ..Self::file(name, path)
        }
    }

    pub fn bytes(
        name: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        let name = name.into();
        Self {
            destination: PathBuf::from(&name),
            name,
            source: BundleSource::Bytes(content.into()),
            archive: false,
            read_only: false,
        }
    }

    pub fn with_destination(
        mut self,
        destination: impl Into<PathBuf>,
    ) -> Self {
        self.destination = destination.into();
        self
    }

    pub fn with_archive(
        mut self,
        archive: bool,
    ) -> Self {
        self.archive = archive;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub(crate) fn validate(
        &self,
        runnable: &str,
    ) -> Result<()> {
        if !is_plain_name(&self.name) {
            return Err(SpecValidationError::InvalidBundleName {
                runnable: runnable.to_string(),
                bundle: self.name.clone(),
            }
            .into());
        }

        if !is_contained_relative(&self.destination) {
            return Err(SpecValidationError::InvalidDestination {
                runnable: runnable.to_string(),
                bundle: self.name.clone(),
                destination: self.destination.clone(),
            }
            .into());
        }

        if let BundleSource::Path(path) = &self.source {
            if !self.archive && path.is_dir() {
                return Err(SpecValidationError::DirectoryWithoutArchive {
                    runnable: runnable.to_string(),
                    bundle: self.name.clone(),
                    path: path.clone(),
                }
                .into());
            }
        }

        Ok(())
    }
}

/// Names that double as a single path component (staging and work dirs)
pub(crate) fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.starts_with('.')
}

/// Non-empty, relative, and never escaping its base directory
pub(crate) fn is_contained_relative(path: &Path) -> bool {
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    depth > 0
}
