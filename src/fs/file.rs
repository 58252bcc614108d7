//! Per-handle file envelope: decrypt-on-first-read, buffered
//! encrypt-on-close.
//!
//! A handle is either reading or writing, never both, and the transition
//! into `Closed` is irreversible. Read handles lazily pull the whole backend
//! file into memory on the first read and serve sequential and random reads
//! from the decrypted buffer. Write handles emit the envelope nonce to the
//! backend on the first write, buffer all plaintext, and seal a single AEAD
//! blob on close — nothing is visible on the backend until then.
//!
//! GCM is not length-extensible, so whole-file sealing is the simplest sound
//! design for the sub-megabyte workload this crate targets. There is no cap
//! on the decrypt buffer; callers handling untrusted large files should
//! bound sizes themselves.

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::backend::{Backend, BackendFile, DirEntry};
use crate::crypto::content::{self, ContentError, NONCE_SIZE};
use crate::crypto::keys::VolumeKeys;
use crate::error::FsError;

/// An open file handle on a GrainFS volume.
///
/// Handles are internally synchronized: reads share a per-handle lock once
/// the decrypt buffer is populated, while cursor-advancing and mutating
/// calls take it exclusively. `close` is idempotent; dropping an unclosed
/// write handle flushes it on a best-effort basis.
pub struct EnvelopeFile {
    /// Cleartext path, as the caller sees it.
    name: String,
    /// Backend path of the obfuscated file.
    obfuscated: String,
    backend: Arc<dyn Backend>,
    keys: Arc<VolumeKeys>,
    state: RwLock<EnvelopeState>,
}

struct EnvelopeState {
    file: Box<dyn BackendFile>,
    write_mode: bool,
    closed: bool,
    reader: Option<DecryptBuffer>,
    writer: Option<WriteBuffer>,
}

/// Fully decrypted plaintext plus the sequential-read cursor.
struct DecryptBuffer {
    plaintext: Vec<u8>,
    pos: usize,
}

/// Buffered plaintext awaiting the seal on close. The nonce has already
/// been written to the backend.
struct WriteBuffer {
    nonce: [u8; NONCE_SIZE],
    plaintext: Vec<u8>,
}

impl EnvelopeFile {
    pub(crate) fn new(
        backend: Arc<dyn Backend>,
        keys: Arc<VolumeKeys>,
        file: Box<dyn BackendFile>,
        name: String,
        obfuscated: String,
        write_mode: bool,
    ) -> Self {
        EnvelopeFile {
            name,
            obfuscated,
            backend,
            keys,
            state: RwLock::new(EnvelopeState {
                file,
                write_mode,
                closed: false,
                reader: None,
                writer: None,
            }),
        }
    }

    /// The cleartext path this handle was opened at.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn map_content_err(&self, err: ContentError) -> FsError {
        match err {
            ContentError::TruncatedEnvelope { actual } => FsError::Corrupt {
                path: self.name.clone(),
                reason: format!("envelope too short ({actual} bytes)"),
            },
            ContentError::DecryptionFailed => FsError::AuthFailed {
                path: self.name.clone(),
            },
            ContentError::EncryptionFailed => FsError::Corrupt {
                path: self.name.clone(),
                reason: "content encryption failed".to_string(),
            },
        }
    }

    /// Drain the backend file and decrypt it into the read buffer.
    ///
    /// A zero-length backend file decrypts to empty plaintext; anything
    /// shorter than a full envelope but longer than zero is corrupt.
    fn ensure_reader(&self, st: &mut EnvelopeState) -> Result<(), FsError> {
        if st.reader.is_some() {
            return Ok(());
        }

        st.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| FsError::backend(&self.name, e))?;
        let mut envelope = Vec::new();
        st.file
            .read_to_end(&mut envelope)
            .map_err(|e| FsError::backend(&self.name, e))?;

        let plaintext = if envelope.is_empty() {
            Vec::new()
        } else {
            content::open(self.keys.master(), &envelope)
                .map_err(|e| self.map_content_err(e))?
        };

        trace!(file = %self.name, size = plaintext.len(), "decrypted file into read buffer");
        st.reader = Some(DecryptBuffer { plaintext, pos: 0 });
        Ok(())
    }

    /// Sequential read from the decrypted plaintext. Returns 0 at EOF.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, FsError> {
        let mut st = self.state.write();
        self.check_readable(&st)?;
        self.ensure_reader(&mut st)?;

        let reader = st.reader.as_mut().expect("reader initialized above");
        let available = reader.plaintext.len() - reader.pos;
        let n = buf.len().min(available);
        buf[..n].copy_from_slice(&reader.plaintext[reader.pos..reader.pos + n]);
        reader.pos += n;
        Ok(n)
    }

    /// Random-access read at `offset` into the decrypted plaintext. Does not
    /// move the sequential cursor. Returns 0 at or past EOF.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, FsError> {
        {
            let st = self.state.read();
            self.check_readable(&st)?;
            if let Some(reader) = &st.reader {
                return Ok(copy_at(&reader.plaintext, buf, offset));
            }
        }

        let mut st = self.state.write();
        self.check_readable(&st)?;
        self.ensure_reader(&mut st)?;
        let reader = st.reader.as_ref().expect("reader initialized above");
        Ok(copy_at(&reader.plaintext, buf, offset))
    }

    /// Read everything from the current cursor to EOF.
    pub fn read_to_end(&self) -> Result<Vec<u8>, FsError> {
        let mut st = self.state.write();
        self.check_readable(&st)?;
        self.ensure_reader(&mut st)?;

        let reader = st.reader.as_mut().expect("reader initialized above");
        let out = reader.plaintext[reader.pos..].to_vec();
        reader.pos = reader.plaintext.len();
        Ok(out)
    }

    /// Append plaintext to the write buffer. The envelope nonce is written
    /// to the backend on the first call.
    pub fn write(&self, buf: &[u8]) -> Result<usize, FsError> {
        let mut st = self.state.write();
        if st.closed {
            return Err(FsError::Closed {
                path: self.name.clone(),
            });
        }
        if !st.write_mode {
            return Err(FsError::WrongMode {
                op: "write",
                path: self.name.clone(),
            });
        }

        if st.writer.is_none() {
            let nonce = content::random_nonce();
            st.file
                .write_all(&nonce)
                .map_err(|e| FsError::backend(&self.name, e))?;
            st.writer = Some(WriteBuffer {
                nonce,
                plaintext: Vec::new(),
            });
        }

        let writer = st.writer.as_mut().expect("writer initialized above");
        writer.plaintext.extend_from_slice(buf);
        Ok(buf.len())
    }

    /// Seek. The only supported position is the start of the file: in read
    /// mode this tears down the decrypt buffer, in write mode it is accepted
    /// only before any bytes have been buffered.
    pub fn seek(&self, pos: SeekFrom) -> Result<u64, FsError> {
        let mut st = self.state.write();
        if st.closed {
            return Err(FsError::Closed {
                path: self.name.clone(),
            });
        }

        match pos {
            SeekFrom::Start(0) => {
                if st.write_mode {
                    if st.writer.is_some() {
                        return Err(FsError::unsupported(
                            "cannot seek after writing to an encrypted file",
                        ));
                    }
                } else {
                    st.reader = None;
                }
                st.file
                    .seek(SeekFrom::Start(0))
                    .map_err(|e| FsError::backend(&self.name, e))?;
                Ok(0)
            }
            _ => Err(FsError::unsupported(
                "only seeking to the start is supported on encrypted files",
            )),
        }
    }

    /// Truncate. Only size 0 is supported: the backend file is cleared and
    /// the encrypting state reset.
    pub fn truncate(&self, size: u64) -> Result<(), FsError> {
        let mut st = self.state.write();
        if st.closed {
            return Err(FsError::Closed {
                path: self.name.clone(),
            });
        }
        if !st.write_mode {
            return Err(FsError::WrongMode {
                op: "truncate",
                path: self.name.clone(),
            });
        }
        if size != 0 {
            return Err(FsError::unsupported(
                "truncation to a non-zero size is not supported on encrypted files",
            ));
        }

        st.writer = None;
        st.file
            .truncate(0)
            .map_err(|e| FsError::backend(&self.name, e))?;
        st.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| FsError::backend(&self.name, e))?;
        Ok(())
    }

    /// Backend metadata with the cleartext basename. The size is the
    /// decrypted length when the read buffer is populated; otherwise the
    /// backend size, which over-reports by the envelope overhead.
    pub fn stat(&self) -> Result<DirEntry, FsError> {
        let st = self.state.read();
        if st.closed {
            return Err(FsError::Closed {
                path: self.name.clone(),
            });
        }

        let mut entry = self
            .backend
            .stat(&self.obfuscated)
            .map_err(|e| FsError::backend(&self.name, e))?;
        entry.name = self
            .name
            .rsplit('/')
            .next()
            .unwrap_or(&self.name)
            .to_string();
        if let Some(reader) = &st.reader {
            entry.size = reader.plaintext.len() as u64;
        }
        Ok(entry)
    }

    /// Flush and close. The first call seals and writes the envelope for a
    /// write handle; subsequent calls are no-ops.
    pub fn close(&self) -> Result<(), FsError> {
        let mut st = self.state.write();
        if st.closed {
            return Ok(());
        }
        st.closed = true;

        if let Some(writer) = st.writer.take() {
            let sealed = content::seal_detached(self.keys.master(), &writer.nonce, &writer.plaintext)
                .map_err(|e| self.map_content_err(e))?;
            st.file
                .write_all(&sealed)
                .map_err(|e| FsError::backend(&self.name, e))?;
            st.file
                .flush()
                .map_err(|e| FsError::backend(&self.name, e))?;
            debug!(
                file = %self.name,
                plaintext_len = writer.plaintext.len(),
                "sealed file envelope on close"
            );
        }
        Ok(())
    }

    fn check_readable(&self, st: &EnvelopeState) -> Result<(), FsError> {
        if st.closed {
            return Err(FsError::Closed {
                path: self.name.clone(),
            });
        }
        if st.write_mode {
            return Err(FsError::WrongMode {
                op: "read",
                path: self.name.clone(),
            });
        }
        Ok(())
    }
}

fn copy_at(plaintext: &[u8], buf: &mut [u8], offset: u64) -> usize {
    if offset >= plaintext.len() as u64 {
        return 0;
    }
    let offset = offset as usize;
    let n = buf.len().min(plaintext.len() - offset);
    buf[..n].copy_from_slice(&plaintext[offset..offset + n]);
    n
}

impl Drop for EnvelopeFile {
    fn drop(&mut self) {
        let pending = {
            let st = self.state.read();
            !st.closed && st.writer.is_some()
        };
        if pending {
            if let Err(e) = self.close() {
                warn!(file = %self.name, error = %e, "failed to flush encrypted file on drop");
            }
        }
    }
}
