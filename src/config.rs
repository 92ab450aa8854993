// Connection and operation settings
use crate::cli::{Cli, Commands, FileAction, FolderAction, OwnershipArgs};
use crate::resource::{FileSpec, FolderSpec, Ownership};
use anyhow::{bail, Context, Result};
use dialoguer::{Confirm, Password};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: AuthMethod,
    pub sudo: bool,
    pub max_sessions: usize,
    pub operation: Operation,
}

#[derive(Debug, Clone)]
pub enum AuthMethod {
    Password(String),
    PublicKey(PathBuf),
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    File,
    Folder,
}

#[derive(Debug, Clone)]
pub enum Operation {
    ApplyFile(FileSpec),
    ApplyFolders(Vec<FolderSpec>),
    Read { kind: ResourceKind, paths: Vec<String> },
    Delete { kind: ResourceKind, paths: Vec<String> },
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        if cli.max_sessions == 0 {
            bail!("--max-sessions must be at least 1");
        }

        let username = match &cli.username {
            Some(username) => username.clone(),
            None => std::env::var("USER")
                .context("Cannot determine the SSH user, pass --username")?,
        };

        let operation = Self::operation(&cli.command)?;
        let auth = Self::determine_auth_method(cli, &username)?;

        Ok(Config {
            host: cli.host.clone(),
            port: cli.port,
            username,
            auth,
            sudo: cli.sudo,
            max_sessions: cli.max_sessions,
            operation,
        })
    }

    fn operation(command: &Commands) -> Result<Operation> {
        let operation = match command {
            Commands::File { action } => match action {
                FileAction::Apply {
                    path,
                    content,
                    content_file,
                    ensure_dir,
                    ownership,
                } => {
                    let content = match (content, content_file) {
                        (Some(content), _) => content.clone(),
                        (None, Some(file)) => std::fs::read_to_string(file)
                            .with_context(|| format!("Failed to read {}", file.display()))?,
                        (None, None) => bail!("Either --content or --content-file is required"),
                    };
                    Operation::ApplyFile(FileSpec {
                        path: path.clone(),
                        content,
                        ensure_dir: *ensure_dir,
                        ownership: Self::ownership(ownership)?,
                    })
                }
                FileAction::Read { paths } => Operation::Read {
                    kind: ResourceKind::File,
                    paths: paths.clone(),
                },
                FileAction::Delete { paths } => Operation::Delete {
                    kind: ResourceKind::File,
                    paths: paths.clone(),
                },
            },
            Commands::Folder { action } => match action {
                FolderAction::Apply { paths, ownership } => {
                    let ownership = Self::ownership(ownership)?;
                    Operation::ApplyFolders(
                        paths
                            .iter()
                            .map(|path| FolderSpec {
                                path: path.clone(),
                                ownership: ownership.clone(),
                            })
                            .collect(),
                    )
                }
                FolderAction::Read { paths } => Operation::Read {
                    kind: ResourceKind::Folder,
                    paths: paths.clone(),
                },
                FolderAction::Delete { paths } => Operation::Delete {
                    kind: ResourceKind::Folder,
                    paths: paths.clone(),
                },
            },
        };
        Ok(operation)
    }

    fn ownership(args: &OwnershipArgs) -> Result<Ownership> {
        if let Some(mode) = &args.permissions {
            let valid = (3..=4).contains(&mode.len()) && u32::from_str_radix(mode, 8).is_ok();
            if !valid {
                bail!("Invalid permissions {:?}, expected an octal mode such as 0644", mode);
            }
        }

        Ok(Ownership {
            owner: args.owner.into(),
            owner_name: args.owner_name.clone().into(),
            group: args.group.into(),
            group_name: args.group_name.clone().into(),
            permissions: args.permissions.clone().into(),
        })
    }

    fn determine_auth_method(cli: &Cli, username: &str) -> Result<AuthMethod> {
        if let Some(password) = &cli.password {
            return Ok(AuthMethod::Password(password.clone()));
        }

        if let Some(var) = &cli.password_env_var {
            let password = std::env::var(var).unwrap_or_default();
            if password.is_empty() {
                log::warn!("Password environment variable {} is empty", var);
            }
            return Ok(AuthMethod::Password(password));
        }

        if cli.use_agent {
            return Ok(AuthMethod::Agent);
        }

        if let Some(key_file) = &cli.key_file {
            return Ok(AuthMethod::PublicKey(key_file.clone()));
        }

        let home = home::home_dir().context("Cannot determine home directory")?;
        let ssh_dir = home.join(".ssh");

        let key_files = ["id_rsa", "id_ed25519", "id_ecdsa"];
        for key_name in &key_files {
            let key_path = ssh_dir.join(key_name);
            if key_path.exists() {
                let use_key = Confirm::new()
                    .with_prompt(format!("Use SSH key {} for authentication?", key_path.display()))
                    .default(true)
                    .interact()?;

                if use_key {
                    return Ok(AuthMethod::PublicKey(key_path));
                }
            }
        }

        let password = Password::new()
            .with_prompt(format!("Enter password for {}@{}", username, cli.host))
            .interact()?;

        Ok(AuthMethod::Password(password))
    }
}
