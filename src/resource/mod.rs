//! Reconciliation of remote files and folders.
//!
//! Each resource kind implements [`Reconcile`]: Create, Read, Update and
//! Delete, each mapping a desired attribute set and/or the last observed one
//! to a short sequence of remote commands followed by a fresh read of the
//! remote state.
//!
//! Attribute re-reads are fatal everywhere: if the owner, group or mode of a
//! path cannot be read back, the transition fails rather than recording a
//! guessed value.

use crate::remote::RemoteClient;
use crate::ssh::channel::Transport;
use crate::utils::file::normalize_permissions;
use anyhow::{bail, Context, Result};
use serde::Serialize;

pub mod file;
pub mod folder;

pub use file::{FileReconciler, FileSpec, FileState};
pub use folder::{FolderReconciler, FolderSpec, FolderState};

/// A user-settable attribute that may be left out, deferred to whatever the
/// remote host decides, or given a value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Attr<T> {
    #[default]
    Unset,
    Computed,
    Known(T),
}

impl<T> Attr<T> {
    pub fn known(&self) -> Option<&T> {
        match self {
            Attr::Known(value) => Some(value),
            Attr::Unset | Attr::Computed => None,
        }
    }
}

impl<T> From<Option<T>> for Attr<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Attr::Known(value),
            None => Attr::Unset,
        }
    }
}

/// Desired ownership and mode shared by files and folders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ownership {
    pub owner: Attr<u32>,
    pub owner_name: Attr<String>,
    pub group: Attr<u32>,
    pub group_name: Attr<String>,
    pub permissions: Attr<String>,
}

/// Ownership and mode as read back from the remote host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub owner: u32,
    pub group: u32,
    pub owner_name: String,
    pub group_name: String,
    pub permissions: String,
}

/// Numeric id wins over a name; neither known means no command.
fn pick_id_or_name(id: &Attr<u32>, name: &Attr<String>) -> Option<String> {
    match (id.known(), name.known()) {
        (Some(id), _) => Some(id.to_string()),
        (None, Some(name)) => Some(name.clone()),
        (None, None) => None,
    }
}

/// Like [`pick_id_or_name`], but only for values that differ from what was
/// observed.
fn changed_id_or_name(
    id: &Attr<u32>,
    name: &Attr<String>,
    current_id: u32,
    current_name: &str,
) -> Option<String> {
    if let Some(id) = id.known().filter(|id| **id != current_id) {
        return Some(id.to_string());
    }
    name.known()
        .filter(|name| name.as_str() != current_name)
        .cloned()
}

impl Ownership {
    /// Applies every known attribute, in owner, group, mode order.
    pub(crate) fn apply<T: Transport>(&self, client: &RemoteClient<T>, path: &str) -> Result<()> {
        if let Some(owner) = pick_id_or_name(&self.owner, &self.owner_name) {
            client
                .chown(path, &owner)
                .with_context(|| format!("Could not set owner of {} to {}", path, owner))?;
        }
        if let Some(group) = pick_id_or_name(&self.group, &self.group_name) {
            client
                .chgrp(path, &group)
                .with_context(|| format!("Could not set group of {} to {}", path, group))?;
        }
        if let Some(mode) = self.permissions.known() {
            client
                .chmod(path, mode)
                .with_context(|| format!("Could not set permissions of {} to {}", path, mode))?;
        }
        Ok(())
    }

    /// Applies only the attributes that differ from `current`.
    pub(crate) fn converge<T: Transport>(
        &self,
        client: &RemoteClient<T>,
        path: &str,
        current: &Metadata,
    ) -> Result<()> {
        if let Some(owner) =
            changed_id_or_name(&self.owner, &self.owner_name, current.owner, &current.owner_name)
        {
            client
                .chown(path, &owner)
                .with_context(|| format!("Could not set owner of {} to {}", path, owner))?;
        }
        if let Some(group) =
            changed_id_or_name(&self.group, &self.group_name, current.group, &current.group_name)
        {
            client
                .chgrp(path, &group)
                .with_context(|| format!("Could not set group of {} to {}", path, group))?;
        }
        if let Some(mode) = self.permissions.known() {
            if normalize_permissions(mode) != current.permissions {
                client
                    .chmod(path, mode)
                    .with_context(|| format!("Could not set permissions of {} to {}", path, mode))?;
            }
        }
        Ok(())
    }
}

impl Metadata {
    pub(crate) fn observe<T: Transport>(client: &RemoteClient<T>, path: &str) -> Result<Self> {
        Ok(Metadata {
            owner: client
                .read_owner(path)
                .with_context(|| format!("Couldn't load owner id of {}", path))?,
            group: client
                .read_group(path)
                .with_context(|| format!("Couldn't load group id of {}", path))?,
            owner_name: client
                .read_owner_name(path)
                .with_context(|| format!("Couldn't load owner name of {}", path))?,
            group_name: client
                .read_group_name(path)
                .with_context(|| format!("Couldn't load group name of {}", path))?,
            permissions: client
                .read_permissions(path)
                .with_context(|| format!("Couldn't load permissions of {}", path))?,
        })
    }
}

/// The four transitions of a remote resource.
pub trait Reconcile {
    type Desired;
    type Observed;

    fn create(&self, desired: &Self::Desired) -> Result<Self::Observed>;

    /// `None` when the resource no longer exists and should be forgotten.
    fn read(&self, path: &str) -> Result<Option<Self::Observed>>;

    fn update(&self, desired: &Self::Desired, prior: &Self::Observed) -> Result<Self::Observed>;

    fn delete(&self, prior: &Self::Observed) -> Result<()>;
}

/// Identity of desired and observed records.
pub trait Located {
    fn path(&self) -> &str;
}

impl Located for String {
    fn path(&self) -> &str {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Created,
    Updated,
    Replaced,
}

/// Creates the resource when it is absent, updates it otherwise.
pub fn apply<R>(reconciler: &R, desired: &R::Desired) -> Result<(Outcome, R::Observed)>
where
    R: Reconcile,
    R::Desired: Located,
{
    match reconciler.read(desired.path())? {
        None => Ok((Outcome::Created, reconciler.create(desired)?)),
        Some(prior) => Ok((Outcome::Updated, reconciler.update(desired, &prior)?)),
    }
}

/// Moves a resource to a new path: delete the old one, create the new one.
pub fn replace<R>(
    reconciler: &R,
    desired: &R::Desired,
    prior: &R::Observed,
) -> Result<(Outcome, R::Observed)>
where
    R: Reconcile,
    R::Desired: Located,
    R::Observed: Located,
{
    if desired.path() == prior.path() {
        bail!("{} is already at the desired path", prior.path());
    }
    reconciler.delete(prior)?;
    Ok((Outcome::Replaced, reconciler.create(desired)?))
}

pub(crate) fn ensure_same_path(desired: &str, prior: &str) -> Result<()> {
    if desired != prior {
        bail!(
            "Path changed from {} to {}: the resource must be replaced, not updated",
            prior,
            desired
        );
    }
    Ok(())
}
