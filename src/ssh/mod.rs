// SSH transport and command execution
pub mod channel;
pub mod client;
pub mod session;

pub use channel::{ExecChannel, Transport};
pub use client::SshClient;
pub use session::run;
