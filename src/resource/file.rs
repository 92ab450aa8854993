// Remote file resource
use super::{ensure_same_path, Located, Metadata, Ownership, Reconcile};
use crate::remote::RemoteClient;
use crate::ssh::channel::Transport;
use anyhow::{anyhow, Context, Result};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSpec {
    pub path: String,
    pub content: String,
    /// Create missing parent directories before the first write.
    pub ensure_dir: bool,
    pub ownership: Ownership,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileState {
    pub path: String,
    pub content: String,
    #[serde(flatten)]
    pub metadata: Metadata,
}

impl Located for FileSpec {
    fn path(&self) -> &str {
        &self.path
    }
}

impl Located for FileState {
    fn path(&self) -> &str {
        &self.path
    }
}

pub struct FileReconciler<'a, T: Transport> {
    client: &'a RemoteClient<T>,
}

impl<'a, T: Transport> FileReconciler<'a, T> {
    pub fn new(client: &'a RemoteClient<T>) -> Self {
        FileReconciler { client }
    }

    fn observe(&self, path: &str) -> Result<Option<FileState>> {
        let content = match self
            .client
            .read_file(path)
            .with_context(|| format!("Could not read remote file {}", path))?
        {
            Some(content) => content,
            None => return Ok(None),
        };

        Ok(Some(FileState {
            path: path.to_string(),
            content,
            metadata: Metadata::observe(self.client, path)?,
        }))
    }

    fn observe_existing(&self, path: &str) -> Result<FileState> {
        self.observe(path)?
            .ok_or_else(|| anyhow!("Remote file {} disappeared right after it was written", path))
    }
}

impl<'a, T: Transport> Reconcile for FileReconciler<'a, T> {
    type Desired = FileSpec;
    type Observed = FileState;

    fn create(&self, desired: &FileSpec) -> Result<FileState> {
        let path = desired.path.as_str();
        log::info!("Creating remote file {}", path);

        self.client
            .write_file(&desired.content, path, desired.ensure_dir)
            .with_context(|| format!("Could not create file {}", path))?;
        desired.ownership.apply(self.client, path)?;

        self.observe_existing(path)
    }

    fn read(&self, path: &str) -> Result<Option<FileState>> {
        log::debug!("Reading remote file {}", path);
        let state = self.observe(path)?;
        if state.is_none() {
            log::info!("Remote file {} is gone", path);
        }
        Ok(state)
    }

    fn update(&self, desired: &FileSpec, prior: &FileState) -> Result<FileState> {
        ensure_same_path(&desired.path, &prior.path)?;
        let path = prior.path.as_str();
        log::info!("Updating remote file {}", path);

        if desired.content != prior.content {
            // Same path as before, so the parent already exists.
            self.client
                .write_file(&desired.content, path, false)
                .with_context(|| format!("Could not update content of {}", path))?;
        }
        desired.ownership.converge(self.client, path, &prior.metadata)?;

        self.observe_existing(path)
    }

    fn delete(&self, prior: &FileState) -> Result<()> {
        log::info!("Deleting remote file {}", prior.path);
        self.client
            .delete_file(&prior.path)
            .with_context(|| format!("Could not delete file {}", prior.path))
    }
}
