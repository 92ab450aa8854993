// Command runner: one shell command on one channel
use crate::ssh::channel::ExecChannel;
use crate::utils::error::{CommandError, ExitCause};
use std::io::{self, Read, Write};

/// Stdin goes out in pieces this size, well under libssh2's 2 MiB receive
/// window, with buffered stdout drained after each one.
const STDIN_CHUNK: usize = 32 * 1024;

/// Runs `command` on `channel`, feeding it `stdin` when given, and returns
/// everything the command wrote to stdout.
///
/// Stdout is read while stdin is still being written: a command that echoes
/// its input (`tee`) stalls once nobody reads what it printed. Both output
/// streams are drained before this returns. Any failure, be it a transport
/// error or a non-zero exit status, comes back as a [`CommandError`]
/// carrying the command text and the captured stderr.
pub fn run<C>(
    channel: &mut C,
    command: &str,
    stdin: Option<&[u8]>,
) -> Result<Vec<u8>, CommandError>
where
    C: ExecChannel + ?Sized,
{
    log::debug!("Running `{}`", command);

    let mut stderr = Vec::new();
    let fail = |cause: ExitCause, stderr: Vec<u8>| CommandError::new(command, cause, stderr);

    if let Err(e) = channel.exec(command) {
        return Err(fail(e.into(), stderr));
    }

    let mut stdout = Vec::new();
    if let Some(input) = stdin {
        if let Err(e) = feed(channel, input, &mut stdout) {
            return Err(fail(e.into(), stderr));
        }
    }

    if let Err(e) = channel.read_to_end(&mut stdout) {
        return Err(fail(e.into(), stderr));
    }
    if let Err(e) = channel.stderr().read_to_end(&mut stderr) {
        return Err(fail(e.into(), stderr));
    }
    if let Err(e) = channel.wait_close() {
        return Err(fail(e.into(), stderr));
    }

    match channel.exit_status() {
        Ok(0) => Ok(stdout),
        Ok(code) => Err(fail(ExitCause::Status(code), stderr)),
        Err(e) => Err(fail(e.into(), stderr)),
    }
}

fn feed<C>(channel: &mut C, input: &[u8], stdout: &mut Vec<u8>) -> io::Result<()>
where
    C: ExecChannel + ?Sized,
{
    for chunk in input.chunks(STDIN_CHUNK) {
        channel.write_all(chunk)?;
        drain_pending(channel, stdout)?;
    }
    channel.flush()?;
    channel.send_eof()
}

/// Reads whatever stdout has already arrived, never waiting for more.
fn drain_pending<C>(channel: &mut C, stdout: &mut Vec<u8>) -> io::Result<()>
where
    C: ExecChannel + ?Sized,
{
    loop {
        let pending = channel.pending_stdout();
        if pending == 0 {
            return Ok(());
        }
        let start = stdout.len();
        stdout.resize(start + pending, 0);
        let n = channel.read(&mut stdout[start..])?;
        stdout.truncate(start + n);
        if n == 0 {
            return Ok(());
        }
    }
}
