// Remote folder resource
use super::{ensure_same_path, Located, Metadata, Ownership, Reconcile};
use crate::remote::RemoteClient;
use crate::ssh::channel::Transport;
use anyhow::{Context, Result};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderSpec {
    pub path: String,
    pub ownership: Ownership,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderState {
    pub path: String,
    #[serde(flatten)]
    pub metadata: Metadata,
}

impl Located for FolderSpec {
    fn path(&self) -> &str {
        &self.path
    }
}

impl Located for FolderState {
    fn path(&self) -> &str {
        &self.path
    }
}

pub struct FolderReconciler<'a, T: Transport> {
    client: &'a RemoteClient<T>,
}

impl<'a, T: Transport> FolderReconciler<'a, T> {
    pub fn new(client: &'a RemoteClient<T>) -> Self {
        FolderReconciler { client }
    }

    fn observe(&self, path: &str) -> Result<FolderState> {
        Ok(FolderState {
            path: path.to_string(),
            metadata: Metadata::observe(self.client, path)?,
        })
    }
}

impl<'a, T: Transport> Reconcile for FolderReconciler<'a, T> {
    type Desired = FolderSpec;
    type Observed = FolderState;

    fn create(&self, desired: &FolderSpec) -> Result<FolderState> {
        let path = desired.path.as_str();
        log::info!("Creating remote folder {}", path);

        self.client
            .create_dir(path)
            .with_context(|| format!("Could not create folder {}", path))?;
        desired.ownership.apply(self.client, path)?;

        self.observe(path)
    }

    fn read(&self, path: &str) -> Result<Option<FolderState>> {
        log::debug!("Reading remote folder {}", path);
        let exists = self
            .client
            .dir_exists(path)
            .with_context(|| format!("Could not read remote folder {}", path))?;
        if !exists {
            log::info!("Remote folder {} is gone", path);
            return Ok(None);
        }
        self.observe(path).map(Some)
    }

    fn update(&self, desired: &FolderSpec, prior: &FolderState) -> Result<FolderState> {
        ensure_same_path(&desired.path, &prior.path)?;
        let path = prior.path.as_str();
        log::info!("Updating remote folder {}", path);

        desired.ownership.converge(self.client, path, &prior.metadata)?;

        self.observe(path)
    }

    fn delete(&self, prior: &FolderState) -> Result<()> {
        log::info!("Deleting remote folder {} recursively", prior.path);
        self.client
            .delete_folder(&prior.path)
            .with_context(|| format!("Could not delete folder {}", prior.path))
    }
}
