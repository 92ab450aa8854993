// SSH transport: one authenticated session shared by every command channel
use crate::config::{AuthMethod, Config};
use crate::ssh::channel::Transport;
use crate::utils::error::RemoteError;
use anyhow::{Context, Result};
use ssh2::Session;
use std::io;
use std::net::TcpStream;

pub struct SshClient {
    pub session: Session,
}

impl SshClient {
    pub fn connect(config: &Config) -> Result<Self> {
        log::debug!("Connecting to {}:{}", config.host, config.port);

        let address = format!("{}:{}", config.host, config.port);
        let tcp = TcpStream::connect(&address)
            .with_context(|| format!("Couldn't establish a connection to {}", address))?;

        let mut session = Session::new().context("Failed to create SSH session")?;
        session.set_tcp_stream(tcp);
        session.handshake().context("SSH handshake failed")?;

        match &config.auth {
            AuthMethod::Password(password) => {
                log::debug!("Authenticating {} with password", config.username);
                session
                    .userauth_password(&config.username, password)
                    .context("Password authentication failed")?;
            }
            AuthMethod::PublicKey(key_path) => {
                log::debug!("Authenticating {} with key {}", config.username, key_path.display());
                session
                    .userauth_pubkey_file(&config.username, None, key_path, None)
                    .context("Public key authentication failed")?;
            }
            AuthMethod::Agent => {
                log::debug!("Authenticating {} with SSH agent", config.username);
                session
                    .userauth_agent(&config.username)
                    .context("SSH agent authentication failed")?;
            }
        }

        if !session.authenticated() {
            return Err(RemoteError::AuthenticationFailed.into());
        }

        log::info!("Connected to {}@{}:{}", config.username, config.host, config.port);
        Ok(SshClient { session })
    }
}

impl Transport for SshClient {
    type Channel = ssh2::Channel;

    fn open_channel(&self) -> io::Result<ssh2::Channel> {
        self.session.channel_session().map_err(io::Error::from)
    }

    fn disconnect(&self) -> io::Result<()> {
        self.session
            .disconnect(None, "ssh-remote closing", None)
            .map_err(io::Error::from)
    }
}
