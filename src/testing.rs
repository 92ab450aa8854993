// Test doubles for the SSH transport: scripted channels and an in-memory Linux host
use crate::ssh::channel::{ExecChannel, Transport};
use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Reply {
    pub fn ok(stdout: &str) -> Self {
        Reply {
            status: 0,
            stdout: stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
        }
    }

    pub fn fail(status: i32, stderr: &str) -> Self {
        Reply {
            status,
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }
}

/// A channel that answers whatever command it gets with a fixed reply.
pub struct ScriptedChannel {
    reply: Reply,
    pub command: Option<String>,
    pub stdin: Vec<u8>,
    pub eof_sent: bool,
    fail_exec: bool,
    stdout_pos: usize,
}

impl ScriptedChannel {
    pub fn new(reply: Reply) -> Self {
        ScriptedChannel {
            reply,
            command: None,
            stdin: Vec::new(),
            eof_sent: false,
            fail_exec: false,
            stdout_pos: 0,
        }
    }

    pub fn failing_exec(mut self) -> Self {
        self.fail_exec = true;
        self
    }
}

impl Read for ScriptedChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = (&self.reply.stdout[self.stdout_pos..]).read(buf)?;
        self.stdout_pos += n;
        Ok(n)
    }
}

impl Write for ScriptedChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stdin.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ExecChannel for ScriptedChannel {
    fn exec(&mut self, command: &str) -> io::Result<()> {
        if self.fail_exec {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "channel reset"));
        }
        self.command = Some(command.to_string());
        Ok(())
    }

    fn stderr(&mut self) -> Box<dyn Read + '_> {
        Box::new(&self.reply.stderr[..])
    }

    fn pending_stdout(&self) -> usize {
        0
    }

    fn send_eof(&mut self) -> io::Result<()> {
        self.eof_sent = true;
        Ok(())
    }

    fn wait_close(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn exit_status(&self) -> io::Result<i32> {
        Ok(self.reply.status)
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// `cat /dev/stdin | tee`: every stdin byte comes back on stdout. Unread
/// stdout holds back further input once it fills `window`, and a write that
/// finds no room at all fails instead of blocking.
pub struct EchoChannel {
    window: usize,
    unread: VecDeque<u8>,
    pub received: usize,
}

impl EchoChannel {
    pub fn new(window: usize) -> Self {
        EchoChannel {
            window,
            unread: VecDeque::new(),
            received: 0,
        }
    }
}

impl Read for EchoChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.unread.len());
        for (slot, byte) in buf.iter_mut().zip(self.unread.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for EchoChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.window - self.unread.len();
        if room == 0 && !buf.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "send window never reopened"));
        }
        let n = buf.len().min(room);
        self.unread.extend(&buf[..n]);
        self.received += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ExecChannel for EchoChannel {
    fn exec(&mut self, _command: &str) -> io::Result<()> {
        Ok(())
    }

    fn stderr(&mut self) -> Box<dyn Read + '_> {
        Box::new(io::empty())
    }

    fn pending_stdout(&self) -> usize {
        self.unread.len()
    }

    fn send_eof(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn wait_close(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn exit_status(&self) -> io::Result<i32> {
        Ok(0)
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A transport that only counts channel opens and closes.
#[derive(Default)]
pub struct CountingTransport {
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
    fail_open: bool,
    fail_close: bool,
}

impl CountingTransport {
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Transport for CountingTransport {
    type Channel = CountingChannel;

    fn open_channel(&self) -> io::Result<CountingChannel> {
        if self.fail_open {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "channel open failed: administratively prohibited",
            ));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(CountingChannel {
            closed: Arc::clone(&self.closed),
            fail_close: self.fail_close,
        })
    }

    fn disconnect(&self) -> io::Result<()> {
        Ok(())
    }
}

pub struct CountingChannel {
    closed: Arc<AtomicUsize>,
    fail_close: bool,
}

impl Read for CountingChannel {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl Write for CountingChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ExecChannel for CountingChannel {
    fn exec(&mut self, _command: &str) -> io::Result<()> {
        Ok(())
    }

    fn stderr(&mut self) -> Box<dyn Read + '_> {
        Box::new(io::empty())
    }

    fn pending_stdout(&self) -> usize {
        0
    }

    fn send_eof(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn wait_close(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn exit_status(&self) -> io::Result<i32> {
        Ok(0)
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "close failed"));
        }
        Ok(())
    }
}

const USERS: &[(u32, &str)] = &[(0, "root"), (33, "www-data"), (1000, "alice"), (1001, "bob")];
const GROUPS: &[(u32, &str)] = &[(0, "root"), (33, "www-data"), (1000, "staff")];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    File(Vec<u8>),
    Dir,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: Kind,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

struct HostState {
    nodes: Mutex<BTreeMap<String, Node>>,
    commands: Mutex<Vec<String>>,
    stat_replies: Mutex<BTreeMap<String, Reply>>,
    uid: u32,
    sudoer: bool,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// An in-memory Linux host speaking just enough shell for the remote client.
#[derive(Clone)]
pub struct FakeHost {
    state: Arc<HostState>,
}

impl FakeHost {
    /// Logged in as root.
    pub fn new() -> Self {
        Self::login(0, true)
    }

    /// Logged in as alice (uid 1000), who may or may not use sudo.
    pub fn as_alice(sudoer: bool) -> Self {
        Self::login(1000, sudoer)
    }

    fn login(uid: u32, sudoer: bool) -> Self {
        let mut nodes = BTreeMap::new();
        let dir = |uid, mode| Node {
            kind: Kind::Dir,
            uid,
            gid: uid,
            mode,
        };
        nodes.insert("/".to_string(), dir(0, 0o755));
        nodes.insert("/etc".to_string(), dir(0, 0o755));
        nodes.insert("/home".to_string(), dir(0, 0o755));
        nodes.insert("/home/alice".to_string(), dir(1000, 0o755));
        nodes.insert("/tmp".to_string(), dir(0, 0o1777));

        FakeHost {
            state: Arc::new(HostState {
                nodes: Mutex::new(nodes),
                commands: Mutex::new(Vec::new()),
                stat_replies: Mutex::new(BTreeMap::new()),
                uid,
                sudoer,
                opened: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
            }),
        }
    }

    fn nodes(&self) -> MutexGuard<'_, BTreeMap<String, Node>> {
        self.state.nodes.lock().unwrap()
    }

    pub fn put_file(&self, path: &str, content: &str, uid: u32, gid: u32, mode: u32) {
        self.nodes().insert(
            path.to_string(),
            Node {
                kind: Kind::File(content.as_bytes().to_vec()),
                uid,
                gid,
                mode,
            },
        );
    }

    pub fn put_dir(&self, path: &str, uid: u32, gid: u32, mode: u32) {
        self.nodes().insert(
            path.to_string(),
            Node {
                kind: Kind::Dir,
                uid,
                gid,
                mode,
            },
        );
    }

    pub fn node(&self, path: &str) -> Option<Node> {
        self.nodes().get(path).cloned()
    }

    pub fn file_content(&self, path: &str) -> Option<String> {
        match self.node(path)?.kind {
            Kind::File(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Kind::Dir => None,
        }
    }

    /// Answers every `stat -c <format>` with `reply` from now on.
    pub fn answer_stat(&self, format: &str, reply: Reply) {
        self.state.stat_replies.lock().unwrap().insert(format.to_string(), reply);
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().unwrap().clone()
    }

    pub fn clear_commands(&self) {
        self.state.commands.lock().unwrap().clear();
    }

    /// Commands that change the remote filesystem.
    pub fn mutations(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|cmd| {
                let cmd = cmd.strip_prefix("sudo ").unwrap_or(cmd);
                let read_only = cmd.starts_with("stat ")
                    || cmd.starts_with("test ")
                    || cmd.starts_with("[ -d ")
                    || (cmd.starts_with("cat ") && !cmd.starts_with("cat /dev/stdin"));
                !read_only
            })
            .collect()
    }

    /// Channels opened but not yet closed.
    pub fn open_channels(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst) - self.state.closed.load(Ordering::SeqCst)
    }

    pub fn channels_opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    fn execute(&self, command: &str, stdin: &[u8]) -> Reply {
        self.state.commands.lock().unwrap().push(command.to_string());

        if let Some((mkdir, rest)) = command.split_once(" && ") {
            if let Some(dir) = mkdir.strip_prefix("mkdir -p ") {
                let reply = self.mkdir_p(dir, self.state.uid);
                if reply.status != 0 {
                    return reply;
                }
                return self.execute_one(rest, stdin);
            }
        }
        self.execute_one(command, stdin)
    }

    fn execute_one(&self, command: &str, stdin: &[u8]) -> Reply {
        if let Some(rest) = command.strip_prefix("[ -d \"") {
            let path = rest.split('"').next().unwrap_or_default();
            let is_dir = matches!(self.node(path), Some(Node { kind: Kind::Dir, .. }));
            return Reply {
                status: if is_dir { 0 } else { 1 },
                ..Reply::default()
            };
        }

        if let Some(tee) = command.strip_prefix("cat /dev/stdin | ") {
            let (uid, tee) = match self.elevate(tee) {
                Ok(found) => found,
                Err(reply) => return reply,
            };
            let path = tee.strip_prefix("tee ").unwrap_or(tee);
            return self.tee(path, stdin, uid);
        }

        let (uid, command) = match self.elevate(command) {
            Ok(found) => found,
            Err(reply) => return reply,
        };
        let args: Vec<&str> = command.split_whitespace().collect();
        match args.as_slice() {
            ["mkdir", "-p", path] => self.mkdir_p(path, uid),
            ["cat", path] => self.cat(path),
            ["test", "-f", path] => self.test_file(path, true),
            ["test", "!", "-f", path] => self.test_file(path, false),
            ["stat", "-c", format, path] => self.stat(format, path),
            ["chown", value, path] => self.change_owner("chown", value, path, uid),
            ["chgrp", value, path] => self.change_owner("chgrp", value, path, uid),
            ["chmod", value, path] => self.chmod(value, path, uid),
            ["rm", path] => self.rm(path, uid),
            ["rm", "-rf", path] => self.rm_rf(path, uid),
            _ => Reply::fail(127, &format!("sh: 1: {}: not found\n", args.first().unwrap_or(&""))),
        }
    }

    fn elevate<'c>(&self, command: &'c str) -> Result<(u32, &'c str), Reply> {
        match command.strip_prefix("sudo ") {
            Some(_) if !self.state.sudoer => Err(Reply::fail(
                1,
                "sudo: a terminal is required to read the password\n",
            )),
            Some(rest) => Ok((0, rest)),
            None => Ok((self.state.uid, command)),
        }
    }

    fn parent(path: &str) -> String {
        match path.rfind('/') {
            Some(0) => "/".to_string(),
            Some(i) => path[..i].to_string(),
            None => ".".to_string(),
        }
    }

    fn can_write_in(&self, dir: &str, uid: u32) -> bool {
        match self.node(dir) {
            Some(node) => uid == 0 || node.uid == uid || node.mode & 0o002 != 0,
            None => false,
        }
    }

    fn mkdir_p(&self, path: &str, uid: u32) -> Reply {
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            let parent = if current.is_empty() { "/".to_string() } else { current.clone() };
            current = format!("{}/{}", current, part);
            match self.node(&current) {
                Some(Node { kind: Kind::Dir, .. }) => continue,
                Some(_) => {
                    return Reply::fail(
                        1,
                        &format!("mkdir: cannot create directory '{}': File exists\n", current),
                    )
                }
                None if !self.can_write_in(&parent, uid) => {
                    return Reply::fail(
                        1,
                        &format!(
                            "mkdir: cannot create directory '{}': Permission denied\n",
                            current
                        ),
                    )
                }
                None => self.put_dir(&current, uid, uid, 0o755),
            }
        }
        Reply::default()
    }

    fn tee(&self, path: &str, stdin: &[u8], uid: u32) -> Reply {
        let parent = Self::parent(path);
        match self.node(path) {
            Some(Node { kind: Kind::Dir, .. }) => {
                return Reply::fail(1, &format!("tee: {}: Is a directory\n", path))
            }
            Some(mut node) => {
                if uid != 0 && node.uid != uid {
                    return Reply::fail(1, &format!("tee: {}: Permission denied\n", path));
                }
                node.kind = Kind::File(stdin.to_vec());
                self.nodes().insert(path.to_string(), node);
            }
            None => {
                if !matches!(self.node(&parent), Some(Node { kind: Kind::Dir, .. })) {
                    return Reply::fail(1, &format!("tee: {}: No such file or directory\n", path));
                }
                if !self.can_write_in(&parent, uid) {
                    return Reply::fail(1, &format!("tee: {}: Permission denied\n", path));
                }
                let gid = if uid == 0 { 0 } else { 1000 };
                self.nodes().insert(
                    path.to_string(),
                    Node {
                        kind: Kind::File(stdin.to_vec()),
                        uid,
                        gid,
                        mode: 0o644,
                    },
                );
            }
        }
        Reply {
            status: 0,
            stdout: stdin.to_vec(),
            stderr: Vec::new(),
        }
    }

    fn cat(&self, path: &str) -> Reply {
        match self.node(path) {
            Some(Node { kind: Kind::File(bytes), .. }) => Reply {
                status: 0,
                stdout: bytes,
                stderr: Vec::new(),
            },
            Some(_) => Reply::fail(1, &format!("cat: {}: Is a directory\n", path)),
            None => Reply::fail(1, &format!("cat: {}: No such file or directory\n", path)),
        }
    }

    fn test_file(&self, path: &str, expect_file: bool) -> Reply {
        let is_file = matches!(self.node(path), Some(Node { kind: Kind::File(_), .. }));
        Reply {
            status: if is_file == expect_file { 0 } else { 1 },
            ..Reply::default()
        }
    }

    fn stat(&self, format: &str, path: &str) -> Reply {
        if let Some(reply) = self.state.stat_replies.lock().unwrap().get(format) {
            return reply.clone();
        }
        let node = match self.node(path) {
            Some(node) => node,
            None => {
                return Reply::fail(
                    1,
                    &format!("stat: cannot statx '{}': No such file or directory\n", path),
                )
            }
        };
        let name = |table: &[(u32, &str)], id: u32| {
            table
                .iter()
                .find(|(known, _)| *known == id)
                .map(|(_, name)| name.to_string())
                .unwrap_or_else(|| id.to_string())
        };
        let value = match format {
            "%a" => format!("{:o}", node.mode),
            "%u" => node.uid.to_string(),
            "%g" => node.gid.to_string(),
            "%U" => name(USERS, node.uid),
            "%G" => name(GROUPS, node.gid),
            other => return Reply::fail(1, &format!("stat: unsupported format '{}'\n", other)),
        };
        Reply::ok(&format!("{}\n", value))
    }

    fn change_owner(&self, tool: &str, value: &str, path: &str, uid: u32) -> Reply {
        let (table, label) = if tool == "chown" { (USERS, "user") } else { (GROUPS, "group") };
        let id = match value.parse::<u32>() {
            Ok(id) => id,
            Err(_) => match table.iter().find(|(_, name)| *name == value) {
                Some((id, _)) => *id,
                None => {
                    let message = format!("{}: invalid {}: '{}'\n", tool, label, value);
                    return Reply::fail(1, &message);
                }
            },
        };
        let mut node = match self.node(path) {
            Some(node) => node,
            None => {
                return Reply::fail(
                    1,
                    &format!("{}: cannot access '{}': No such file or directory\n", tool, path),
                )
            }
        };
        if uid != 0 {
            return Reply::fail(
                1,
                &format!("{}: changing ownership of '{}': Operation not permitted\n", tool, path),
            );
        }
        if tool == "chown" {
            node.uid = id;
        } else {
            node.gid = id;
        }
        self.nodes().insert(path.to_string(), node);
        Reply::default()
    }

    fn chmod(&self, value: &str, path: &str, uid: u32) -> Reply {
        let mode = match u32::from_str_radix(value, 8) {
            Ok(mode) => mode,
            Err(_) => return Reply::fail(1, &format!("chmod: invalid mode: '{}'\n", value)),
        };
        let mut node = match self.node(path) {
            Some(node) => node,
            None => {
                return Reply::fail(
                    1,
                    &format!("chmod: cannot access '{}': No such file or directory\n", path),
                )
            }
        };
        if uid != 0 && node.uid != uid {
            return Reply::fail(
                1,
                &format!("chmod: changing permissions of '{}': Operation not permitted\n", path),
            );
        }
        node.mode = mode;
        self.nodes().insert(path.to_string(), node);
        Reply::default()
    }

    fn rm(&self, path: &str, uid: u32) -> Reply {
        match self.node(path) {
            None => Reply::fail(
                1,
                &format!("rm: cannot remove '{}': No such file or directory\n", path),
            ),
            Some(Node { kind: Kind::Dir, .. }) => {
                Reply::fail(1, &format!("rm: cannot remove '{}': Is a directory\n", path))
            }
            Some(_) if !self.can_write_in(&Self::parent(path), uid) => Reply::fail(
                1,
                &format!("rm: cannot remove '{}': Permission denied\n", path),
            ),
            Some(_) => {
                self.nodes().remove(path);
                Reply::default()
            }
        }
    }

    fn rm_rf(&self, path: &str, uid: u32) -> Reply {
        if self.node(path).is_none() {
            return Reply::default();
        }
        if !self.can_write_in(&Self::parent(path), uid) {
            return Reply::fail(
                1,
                &format!("rm: cannot remove '{}': Permission denied\n", path),
            );
        }
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.nodes()
            .retain(|existing, _| existing != path && !existing.starts_with(&prefix));
        Reply::default()
    }
}

impl Transport for FakeHost {
    type Channel = FakeChannel;

    fn open_channel(&self) -> io::Result<FakeChannel> {
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeChannel {
            host: self.clone(),
            command: None,
            stdin: Vec::new(),
            reply: None,
            stdout_pos: 0,
            closed: false,
        })
    }

    fn disconnect(&self) -> io::Result<()> {
        Ok(())
    }
}

pub struct FakeChannel {
    host: FakeHost,
    command: Option<String>,
    stdin: Vec<u8>,
    reply: Option<Reply>,
    stdout_pos: usize,
    closed: bool,
}

impl FakeChannel {
    /// Runs the command once all of stdin has arrived.
    fn settle(&mut self) -> &Reply {
        if self.reply.is_none() {
            let reply = match &self.command {
                Some(command) => self.host.execute(command, &self.stdin),
                None => Reply::fail(255, "no command executed\n"),
            };
            self.reply = Some(reply);
        }
        self.reply.get_or_insert_with(Reply::default)
    }
}

impl Read for FakeChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let pos = self.stdout_pos;
        let n = (&self.settle().stdout[pos..]).read(buf)?;
        self.stdout_pos += n;
        Ok(n)
    }
}

impl Write for FakeChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stdin.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ExecChannel for FakeChannel {
    fn exec(&mut self, command: &str) -> io::Result<()> {
        self.command = Some(command.to_string());
        Ok(())
    }

    fn stderr(&mut self) -> Box<dyn Read + '_> {
        Box::new(&self.settle().stderr[..])
    }

    fn pending_stdout(&self) -> usize {
        0
    }

    fn send_eof(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn wait_close(&mut self) -> io::Result<()> {
        self.settle();
        Ok(())
    }

    fn exit_status(&self) -> io::Result<i32> {
        Ok(self.reply.as_ref().map(|reply| reply.status).unwrap_or(-1))
    }

    fn close(&mut self) -> io::Result<()> {
        if !self.closed {
            self.closed = true;
            self.host.state.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
