//! In-memory backend: a tree of `Arc`-shared nodes.
//!
//! File bytes live behind `Arc<RwLock<..>>`, so content written through one
//! handle is visible to handles opened later, and a chrooted backend shares
//! storage with its parent. Directories keep their entries in a `BTreeMap`,
//! which makes listings deterministic. The full capability set (symlinks,
//! chroot, temp files) is supported.

use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use rand::RngCore;

use super::{
    Backend, BackendFile, ChrootBackend, DirEntry, OpenFlags, SymlinkBackend, TempFileBackend,
};

/// Unix file-type bit for symbolic links, surfaced in `lstat` modes.
const S_IFLNK: u32 = 0o120000;

/// How many chained symlinks `open` will follow before giving up.
const MAX_LINK_DEPTH: usize = 8;

#[derive(Clone)]
enum Node {
    File(Arc<RwLock<FileNode>>),
    Dir(Arc<DirNode>),
    Symlink(String),
}

struct FileNode {
    data: Vec<u8>,
    mode: u32,
    modified: SystemTime,
}

impl FileNode {
    fn new(mode: u32) -> Self {
        FileNode {
            data: Vec::new(),
            mode,
            modified: SystemTime::now(),
        }
    }
}

struct DirNode {
    entries: RwLock<BTreeMap<String, Node>>,
    mode: u32,
    created: SystemTime,
}

impl DirNode {
    fn new(mode: u32) -> Self {
        DirNode {
            entries: RwLock::new(BTreeMap::new()),
            mode,
            created: SystemTime::now(),
        }
    }
}

/// An in-memory [`Backend`] with full capability support.
///
/// Cloning is cheap and shares storage, as does [`ChrootBackend::chroot`].
#[derive(Clone)]
pub struct MemoryBackend {
    root: Arc<DirNode>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn components(path: &str) -> Vec<&str> {
    path.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect()
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no such file: {path}"))
}

fn not_a_directory(path: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("not a directory: {path}"),
    )
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            root: Arc::new(DirNode::new(0o755)),
        }
    }

    /// Walk to the node at `path`, without following a final symlink.
    fn lookup(&self, path: &str) -> io::Result<Node> {
        let comps = components(path);
        if comps.is_empty() {
            return Ok(Node::Dir(self.root.clone()));
        }

        let mut cur = self.root.clone();
        for (i, comp) in comps.iter().enumerate() {
            let node = cur
                .entries
                .read()
                .get(*comp)
                .cloned()
                .ok_or_else(|| not_found(path))?;
            if i + 1 == comps.len() {
                return Ok(node);
            }
            match node {
                Node::Dir(d) => cur = d,
                _ => return Err(not_a_directory(path)),
            }
        }
        unreachable!("loop returns on the final component")
    }

    fn lookup_dir(&self, path: &str) -> io::Result<Arc<DirNode>> {
        match self.lookup(path)? {
            Node::Dir(d) => Ok(d),
            _ => Err(not_a_directory(path)),
        }
    }

    /// Parent directory node and basename of `path`. The root has no parent.
    fn locate_parent(&self, path: &str) -> io::Result<(Arc<DirNode>, String)> {
        let comps = components(path);
        let (base, parents) = comps.split_last().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "path has no parent")
        })?;

        let mut cur = self.root.clone();
        for comp in parents {
            let node = cur
                .entries
                .read()
                .get(*comp)
                .cloned()
                .ok_or_else(|| not_found(path))?;
            match node {
                Node::Dir(d) => cur = d,
                _ => return Err(not_a_directory(path)),
            }
        }
        Ok((cur, (*base).to_string()))
    }

    fn entry_for(name: &str, node: &Node) -> DirEntry {
        match node {
            Node::File(f) => {
                let f = f.read();
                DirEntry {
                    name: name.to_string(),
                    size: f.data.len() as u64,
                    is_dir: false,
                    mode: f.mode,
                    modified: Some(f.modified),
                }
            }
            Node::Dir(d) => DirEntry {
                name: name.to_string(),
                size: 0,
                is_dir: true,
                mode: d.mode,
                modified: Some(d.created),
            },
            Node::Symlink(target) => DirEntry {
                name: name.to_string(),
                size: target.len() as u64,
                is_dir: false,
                mode: S_IFLNK | 0o777,
                modified: None,
            },
        }
    }

    fn basename(path: &str) -> String {
        components(path)
            .last()
            .map(|s| s.to_string())
            .unwrap_or_else(|| ".".to_string())
    }
}

impl Backend for MemoryBackend {
    fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> io::Result<Box<dyn BackendFile>> {
        let mut path = path.to_string();
        for _ in 0..MAX_LINK_DEPTH {
            let (dir, base) = self.locate_parent(&path)?;
            let mut entries = dir.entries.write();
            match entries.get(&base) {
                Some(Node::File(node)) => {
                    if flags.truncate {
                        let mut f = node.write();
                        f.data.clear();
                        f.modified = SystemTime::now();
                    }
                    return Ok(Box::new(MemFile {
                        node: node.clone(),
                        path,
                        pos: 0,
                        writable: flags.write,
                    }));
                }
                Some(Node::Dir(_)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("is a directory: {path}"),
                    ));
                }
                Some(Node::Symlink(target)) => {
                    let target = target.clone();
                    drop(entries);
                    path = target;
                }
                None => {
                    if !flags.create {
                        return Err(not_found(&path));
                    }
                    let node = Arc::new(RwLock::new(FileNode::new(mode)));
                    entries.insert(base, Node::File(node.clone()));
                    return Ok(Box::new(MemFile {
                        node,
                        path,
                        pos: 0,
                        writable: flags.write,
                    }));
                }
            }
        }
        Err(io::Error::other(format!(
            "too many levels of symbolic links: {path}"
        )))
    }

    fn stat(&self, path: &str) -> io::Result<DirEntry> {
        let mut path = path.to_string();
        for _ in 0..MAX_LINK_DEPTH {
            match self.lookup(&path)? {
                Node::Symlink(target) => path = target,
                node => return Ok(Self::entry_for(&Self::basename(&path), &node)),
            }
        }
        Err(io::Error::other(format!(
            "too many levels of symbolic links: {path}"
        )))
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let (from_dir, from_base) = self.locate_parent(from)?;
        let (to_dir, to_base) = self.locate_parent(to)?;

        let node = from_dir
            .entries
            .write()
            .remove(&from_base)
            .ok_or_else(|| not_found(from))?;
        to_dir.entries.write().insert(to_base, node);
        Ok(())
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        let (dir, base) = self.locate_parent(path)?;
        let mut entries = dir.entries.write();
        match entries.get(&base) {
            Some(Node::Dir(d)) => {
                if !d.entries.read().is_empty() {
                    return Err(io::Error::other(format!("directory not empty: {path}")));
                }
            }
            Some(_) => {}
            None => return Err(not_found(path)),
        }
        entries.remove(&base);
        Ok(())
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>> {
        let dir = self.lookup_dir(path)?;
        let entries = dir.entries.read();
        Ok(entries
            .iter()
            .map(|(name, node)| Self::entry_for(name, node))
            .collect())
    }

    fn mkdir_all(&self, path: &str, mode: u32) -> io::Result<()> {
        let mut cur = self.root.clone();
        for comp in components(path) {
            let next = {
                let mut entries = cur.entries.write();
                match entries.get(comp) {
                    Some(Node::Dir(d)) => d.clone(),
                    Some(_) => return Err(not_a_directory(path)),
                    None => {
                        let d = Arc::new(DirNode::new(mode));
                        entries.insert(comp.to_string(), Node::Dir(d.clone()));
                        d
                    }
                }
            };
            cur = next;
        }
        Ok(())
    }

    fn as_symlink(&self) -> Option<&dyn SymlinkBackend> {
        Some(self)
    }

    fn as_chroot(&self) -> Option<&dyn ChrootBackend> {
        Some(self)
    }

    fn as_temp_file(&self) -> Option<&dyn TempFileBackend> {
        Some(self)
    }
}

impl SymlinkBackend for MemoryBackend {
    fn symlink(&self, target: &str, link: &str) -> io::Result<()> {
        let (dir, base) = self.locate_parent(link)?;
        let mut entries = dir.entries.write();
        if entries.contains_key(&base) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("file exists: {link}"),
            ));
        }
        entries.insert(base, Node::Symlink(target.to_string()));
        Ok(())
    }

    fn readlink(&self, link: &str) -> io::Result<String> {
        match self.lookup(link)? {
            Node::Symlink(target) => Ok(target),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a symlink: {link}"),
            )),
        }
    }

    fn lstat(&self, path: &str) -> io::Result<DirEntry> {
        let node = self.lookup(path)?;
        Ok(Self::entry_for(&Self::basename(path), &node))
    }
}

impl ChrootBackend for MemoryBackend {
    fn chroot(&self, path: &str) -> io::Result<Arc<dyn Backend>> {
        let root = self.lookup_dir(path)?;
        Ok(Arc::new(MemoryBackend { root }))
    }
}

impl TempFileBackend for MemoryBackend {
    fn temp_file(&self, dir: &str, prefix: &str) -> io::Result<Box<dyn BackendFile>> {
        let dir_node = self.lookup_dir(dir)?;
        loop {
            let name = format!("{prefix}{:016x}", rand::rng().next_u64());
            let mut entries = dir_node.entries.write();
            if entries.contains_key(&name) {
                continue;
            }
            let node = Arc::new(RwLock::new(FileNode::new(0o600)));
            entries.insert(name.clone(), Node::File(node.clone()));
            let path = if components(dir).is_empty() {
                name
            } else {
                format!("{dir}/{name}")
            };
            return Ok(Box::new(MemFile {
                node,
                path,
                pos: 0,
                writable: true,
            }));
        }
    }
}

struct MemFile {
    node: Arc<RwLock<FileNode>>,
    path: String,
    pos: u64,
    writable: bool,
}

impl Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let f = self.node.read();
        let pos = self.pos as usize;
        if pos >= f.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(f.data.len() - pos);
        buf[..n].copy_from_slice(&f.data[pos..pos + n]);
        drop(f);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file not opened for writing",
            ));
        }
        let mut f = self.node.write();
        let pos = self.pos as usize;
        if f.data.len() < pos {
            f.data.resize(pos, 0);
        }
        let end = pos + buf.len();
        if f.data.len() < end {
            f.data.resize(end, 0);
        }
        f.data[pos..end].copy_from_slice(buf);
        f.modified = SystemTime::now();
        drop(f);
        self.pos = end as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.node.read().data.len() as i64;
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => len + delta,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

impl BackendFile for MemFile {
    fn truncate(&mut self, size: u64) -> io::Result<()> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file not opened for writing",
            ));
        }
        let mut f = self.node.write();
        f.data.resize(size as usize, 0);
        f.modified = SystemTime::now();
        Ok(())
    }

    fn path(&self) -> &str {
        &self.path
    }
}
