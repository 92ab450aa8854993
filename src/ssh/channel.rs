// Transport seams: a connection that opens channels, and a channel that runs one command
use std::io::{self, Read, Write};

/// A single-use command channel. Reading yields stdout, writing feeds stdin.
pub trait ExecChannel: Read + Write {
    fn exec(&mut self, command: &str) -> io::Result<()>;

    /// The channel's stderr stream.
    fn stderr(&mut self) -> Box<dyn Read + '_>;

    /// Stdout bytes already received, readable without blocking.
    fn pending_stdout(&self) -> usize;

    fn send_eof(&mut self) -> io::Result<()>;

    fn wait_close(&mut self) -> io::Result<()>;

    fn exit_status(&self) -> io::Result<i32>;

    fn close(&mut self) -> io::Result<()>;
}

/// An authenticated connection able to open independent command channels.
pub trait Transport: Send + Sync {
    type Channel: ExecChannel;

    fn open_channel(&self) -> io::Result<Self::Channel>;

    fn disconnect(&self) -> io::Result<()>;
}

impl ExecChannel for ssh2::Channel {
    fn exec(&mut self, command: &str) -> io::Result<()> {
        ssh2::Channel::exec(self, command).map_err(io::Error::from)
    }

    fn stderr(&mut self) -> Box<dyn Read + '_> {
        Box::new(ssh2::Channel::stderr(self))
    }

    fn pending_stdout(&self) -> usize {
        self.read_window().available as usize
    }

    fn send_eof(&mut self) -> io::Result<()> {
        ssh2::Channel::send_eof(self).map_err(io::Error::from)
    }

    fn wait_close(&mut self) -> io::Result<()> {
        ssh2::Channel::wait_close(self).map_err(io::Error::from)
    }

    fn exit_status(&self) -> io::Result<i32> {
        ssh2::Channel::exit_status(self).map_err(io::Error::from)
    }

    fn close(&mut self) -> io::Result<()> {
        ssh2::Channel::close(self).map_err(io::Error::from)
    }
}
