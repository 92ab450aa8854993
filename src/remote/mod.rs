//! Filesystem operations on the remote host, each one a shell command run on
//! its own leased channel.
//!
//! Sudo prefixing follows the client's own flag; individual operations take
//! no privilege override.

use crate::config::Config;
use crate::pool::SessionPool;
use crate::ssh::channel::Transport;
use crate::ssh::client::SshClient;
use crate::ssh::session;
use crate::utils::error::RemoteError;
use crate::utils::file::{normalize_permissions, parent_dir};
use anyhow::Result as AnyResult;

pub type Result<T> = std::result::Result<T, RemoteError>;

/// `stat -c` format selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatField {
    OwnerId,
    GroupId,
    OwnerName,
    GroupName,
    Permissions,
}

impl StatField {
    pub fn specifier(self) -> char {
        match self {
            StatField::OwnerId => 'u',
            StatField::GroupId => 'g',
            StatField::OwnerName => 'U',
            StatField::GroupName => 'G',
            StatField::Permissions => 'a',
        }
    }
}

pub struct RemoteClient<T: Transport> {
    pool: SessionPool<T>,
    sudo: bool,
    shut_down: bool,
}

impl RemoteClient<SshClient> {
    /// Opens the SSH connection described by `config`.
    pub fn connect(config: &Config) -> AnyResult<Self> {
        let transport = SshClient::connect(config)?;
        Ok(RemoteClient::new(transport, config.sudo, config.max_sessions))
    }
}

impl<T: Transport> RemoteClient<T> {
    pub fn new(transport: T, sudo: bool, max_sessions: usize) -> Self {
        RemoteClient {
            pool: SessionPool::new(transport, max_sessions),
            sudo,
            shut_down: false,
        }
    }

    pub fn pool(&self) -> &SessionPool<T> {
        &self.pool
    }

    fn privileged(&self, command: String) -> String {
        if self.sudo {
            format!("sudo {}", command)
        } else {
            command
        }
    }

    /// Leases a channel, runs `command` on it and releases the channel.
    fn exec(&self, command: &str, stdin: Option<&[u8]>) -> Result<Vec<u8>> {
        let mut lease = self.pool.acquire()?;
        let output = session::run(&mut *lease, command, stdin)?;
        Ok(output)
    }

    fn exec_text(&self, command: &str) -> Result<String> {
        let output = self.exec(command, None)?;
        Ok(String::from_utf8_lossy(&output).replace('\n', ""))
    }

    /// Streams `content` into `path` through `tee`, creating the parent
    /// directories first when `ensure_dir` is set.
    pub fn write_file(&self, content: &str, path: &str, ensure_dir: bool) -> Result<()> {
        let mut command = format!("cat /dev/stdin | {}", self.privileged(format!("tee {}", path)));
        if ensure_dir {
            if let Some(dir) = parent_dir(path) {
                command = format!("mkdir -p {} && {}", dir, command);
            }
        }
        self.exec(&command, Some(content.as_bytes()))?;
        Ok(())
    }

    pub fn create_dir(&self, path: &str) -> Result<()> {
        self.exec(&self.privileged(format!("mkdir -p {}", path)), None)?;
        Ok(())
    }

    /// File content, or `None` when the file does not exist.
    pub fn read_file(&self, path: &str) -> Result<Option<String>> {
        match self.exec(&self.privileged(format!("cat {}", path)), None) {
            Ok(content) => Ok(Some(String::from_utf8_lossy(&content).into_owned())),
            Err(RemoteError::Command(err)) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Whether `path` is a directory. A failing check counts as "no".
    pub fn dir_exists(&self, path: &str) -> Result<bool> {
        match self.exec(&format!("[ -d \"{}\" ] && exit 0 || exit 1", path), None) {
            Ok(_) => Ok(true),
            Err(RemoteError::Command(err)) => {
                log::debug!("Directory check for {} failed: {}", path, err.cause);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Whether `path` is a regular file. When the first check fails, a
    /// second one tells "absent" apart from a check that could not run.
    pub fn file_exists(&self, path: &str) -> Result<bool> {
        match self.exec(&self.privileged(format!("test -f {}", path)), None) {
            Ok(_) => Ok(true),
            Err(RemoteError::Command(_)) => {
                self.exec(&self.privileged(format!("test ! -f {}", path)), None)?;
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    pub fn stat(&self, path: &str, field: StatField) -> Result<String> {
        self.exec_text(&self.privileged(format!("stat -c %{} {}", field.specifier(), path)))
    }

    pub fn read_permissions(&self, path: &str) -> Result<String> {
        let mode = self.stat(path, StatField::Permissions)?;
        Ok(normalize_permissions(&mode))
    }

    pub fn read_owner(&self, path: &str) -> Result<u32> {
        self.stat_id(path, StatField::OwnerId)
    }

    pub fn read_group(&self, path: &str) -> Result<u32> {
        self.stat_id(path, StatField::GroupId)
    }

    pub fn read_owner_name(&self, path: &str) -> Result<String> {
        self.stat(path, StatField::OwnerName)
    }

    pub fn read_group_name(&self, path: &str) -> Result<String> {
        self.stat(path, StatField::GroupName)
    }

    fn stat_id(&self, path: &str, field: StatField) -> Result<u32> {
        let raw = self.stat(path, field)?;
        raw.trim().parse().map_err(|_| RemoteError::UnexpectedOutput {
            command: self.privileged(format!("stat -c %{} {}", field.specifier(), path)),
            output: raw,
        })
    }

    /// `owner` is a numeric uid or a user name.
    pub fn chown(&self, path: &str, owner: &str) -> Result<()> {
        self.exec(&self.privileged(format!("chown {} {}", owner, path)), None)?;
        Ok(())
    }

    /// `group` is a numeric gid or a group name.
    pub fn chgrp(&self, path: &str, group: &str) -> Result<()> {
        self.exec(&self.privileged(format!("chgrp {} {}", group, path)), None)?;
        Ok(())
    }

    pub fn chmod(&self, path: &str, permissions: &str) -> Result<()> {
        self.exec(&self.privileged(format!("chmod {} {}", permissions, path)), None)?;
        Ok(())
    }

    pub fn delete_file(&self, path: &str) -> Result<()> {
        self.exec(&self.privileged(format!("rm {}", path)), None)?;
        Ok(())
    }

    /// Removes `path` and everything below it.
    pub fn delete_folder(&self, path: &str) -> Result<()> {
        self.exec(&self.privileged(format!("rm -rf {}", path)), None)?;
        Ok(())
    }

    /// Closes the pool, then the transport connection.
    pub fn close(mut self) -> std::io::Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> std::io::Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        self.pool.close();
        self.pool.transport().disconnect()
    }
}

impl<T: Transport> Drop for RemoteClient<T> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Failed to disconnect from remote host: {}", e);
        }
    }
}
