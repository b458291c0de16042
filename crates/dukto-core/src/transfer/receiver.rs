//! Inbound side of a transfer.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::file::{is_safe_element_name, ByteSink, FileStore};
use crate::protocol::{
    decode_int, DIRECTORY_SIZE, INT_FIELD_SIZE, MAX_ELEMENT_NAME_LEN, NAME_TERMINATOR,
    TEXT_ELEMENT_NAME,
};

use super::{emit, EventSender, RenameMap, TransferEvent, TransferOptions, TransferSession};

/// Receiver phases, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceivePhase {
    /// Waiting for the element count
    TotalElements,
    /// Waiting for the payload byte count
    TotalSize,
    /// Reading a NUL-terminated element name
    ElementName,
    /// Waiting for the element size
    ElementSize,
    /// Reading element payload
    ElementData,
    /// Every announced element was received
    Complete,
}

enum Target {
    File { path: PathBuf, sink: ByteSink },
    Text(Vec<u8>),
}

struct Element {
    /// Location relative to the destination, after renaming
    name: String,
    top_level: bool,
    size: u64,
    target: Target,
}

/// Consumes one incoming session and materializes it through a [`FileStore`].
pub struct Receiver {
    store: Arc<dyn FileStore>,
    dest_dir: PathBuf,
    events: EventSender,
    options: TransferOptions,
    phase: ReceivePhase,
    session: TransferSession,
    name_buf: Vec<u8>,
    pending_name: Option<String>,
    element: Option<Element>,
    renames: RenameMap,
}

impl fmt::Debug for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("dest_dir", &self.dest_dir)
            .field("phase", &self.phase)
            .field("session", &self.session)
            .field("file_open", &self.has_open_file())
            .finish_non_exhaustive()
    }
}

impl Receiver {
    /// Create a receiver writing below `dest_dir`.
    #[must_use]
    pub fn new(
        store: Arc<dyn FileStore>,
        dest_dir: PathBuf,
        events: EventSender,
        options: TransferOptions,
    ) -> Self {
        Self {
            store,
            dest_dir,
            events,
            options,
            phase: ReceivePhase::TotalElements,
            session: TransferSession::default(),
            name_buf: Vec::new(),
            pending_name: None,
            element: None,
            renames: RenameMap::new(),
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> ReceivePhase {
        self.phase
    }

    /// Session counters.
    #[must_use]
    pub const fn session(&self) -> &TransferSession {
        &self.session
    }

    /// Whether a destination file is currently open.
    #[must_use]
    pub fn has_open_file(&self) -> bool {
        matches!(
            self.element,
            Some(Element {
                target: Target::File { .. },
                ..
            })
        )
    }

    /// Consume as much of `buf` as the current phase allows.
    ///
    /// Returns once `buf` holds too little to make progress or the session
    /// is complete. Bytes past the end of the session are left in `buf`.
    pub async fn process(&mut self, buf: &mut BytesMut) -> Result<ReceivePhase> {
        loop {
            let progressed = match self.phase {
                ReceivePhase::TotalElements => self.read_total_elements(buf)?,
                ReceivePhase::TotalSize => self.read_total_size(buf)?,
                ReceivePhase::ElementName => self.read_name(buf)?,
                ReceivePhase::ElementSize => self.read_size(buf).await?,
                ReceivePhase::ElementData => self.read_data(buf).await?,
                ReceivePhase::Complete => false,
            };
            if !progressed {
                return Ok(self.phase);
            }
        }
    }

    fn read_total_elements(&mut self, buf: &mut BytesMut) -> Result<bool> {
        let Some(count) = take_int(buf) else {
            return Ok(false);
        };
        if count <= 0 {
            return Err(Error::ProtocolError(format!("invalid element count {count}")));
        }
        self.session.total_elements = count.unsigned_abs();
        self.phase = ReceivePhase::TotalSize;
        Ok(true)
    }

    fn read_total_size(&mut self, buf: &mut BytesMut) -> Result<bool> {
        let Some(total) = take_int(buf) else {
            return Ok(false);
        };
        if total < 0 {
            return Err(Error::ProtocolError(format!("invalid session size {total}")));
        }
        self.session.total_bytes = total.unsigned_abs();
        self.store.create_dir_all(&self.dest_dir)?;

        tracing::info!(
            "Receiving {} elements ({} bytes) into {}",
            self.session.total_elements,
            self.session.total_bytes,
            self.dest_dir.display()
        );
        emit(
            &self.events,
            TransferEvent::Started {
                total_bytes: self.session.total_bytes,
            },
        );
        self.phase = ReceivePhase::ElementName;
        Ok(true)
    }

    fn read_name(&mut self, buf: &mut BytesMut) -> Result<bool> {
        if buf.is_empty() {
            return Ok(false);
        }

        let Some(end) = buf.iter().position(|&b| b == NAME_TERMINATOR) else {
            self.name_buf.extend_from_slice(buf);
            buf.clear();
            if self.name_buf.len() > MAX_ELEMENT_NAME_LEN {
                return Err(Error::ProtocolError("element name too long".to_string()));
            }
            return Ok(false);
        };

        self.name_buf.extend_from_slice(&buf[..end]);
        buf.advance(end + 1);
        if self.name_buf.len() > MAX_ELEMENT_NAME_LEN {
            return Err(Error::ProtocolError("element name too long".to_string()));
        }

        let name = String::from_utf8(std::mem::take(&mut self.name_buf))
            .map_err(|_| Error::ProtocolError("element name is not UTF-8".to_string()))?;
        if name.is_empty() {
            return Err(Error::ProtocolError("empty element name".to_string()));
        }

        self.pending_name = Some(name);
        self.phase = ReceivePhase::ElementSize;
        Ok(true)
    }

    async fn read_size(&mut self, buf: &mut BytesMut) -> Result<bool> {
        let Some(size) = take_int(buf) else {
            return Ok(false);
        };
        let name = self
            .pending_name
            .take()
            .ok_or_else(|| Error::Internal("element size without a name".to_string()))?;

        if name == TEXT_ELEMENT_NAME {
            if size < 0 {
                return Err(Error::ProtocolError("text element without a size".to_string()));
            }
            self.begin_element(name, false, size.unsigned_abs(), Target::Text(Vec::new()))
                .await?;
            return Ok(true);
        }

        if !is_safe_element_name(&name) {
            return Err(Error::ProtocolError(format!("unsafe element name '{name}'")));
        }

        match size {
            DIRECTORY_SIZE => self.create_directory(&name)?,
            size if size < DIRECTORY_SIZE => {
                return Err(Error::ProtocolError(format!("invalid size {size} for '{name}'")));
            }
            size => self.open_file(&name, size.unsigned_abs()).await?,
        }
        Ok(true)
    }

    fn create_directory(&mut self, name: &str) -> Result<()> {
        let resolved = self.renames.resolve(self.store.as_ref(), &self.dest_dir, name);
        let path = self.dest_dir.join(&resolved);
        self.store.create_dir_all(&path)?;
        tracing::debug!("Created directory {}", path.display());

        self.session.elements_done += 1;
        emit(
            &self.events,
            TransferEvent::ElementCompleted {
                name: resolved.clone(),
            },
        );
        if !name.contains('/') {
            emit(
                &self.events,
                TransferEvent::DirectoryReceived {
                    name: resolved,
                    path,
                },
            );
        }
        self.after_element();
        Ok(())
    }

    async fn open_file(&mut self, name: &str, size: u64) -> Result<()> {
        let resolved = match name.rsplit_once('/') {
            Some((parent, _)) => {
                let resolved = self.renames.resolve(self.store.as_ref(), &self.dest_dir, name);
                self.store.create_dir_all(&self.dest_dir.join(parent_of(&resolved, parent)))?;
                resolved
            }
            None => super::unique_file_name(self.store.as_ref(), &self.dest_dir, name),
        };

        let path = self.dest_dir.join(&resolved);
        let sink = self.store.create_file(&path)?;
        let top_level = !name.contains('/');
        self.begin_element(resolved, top_level, size, Target::File { path, sink })
            .await
    }

    async fn begin_element(
        &mut self,
        name: String,
        top_level: bool,
        size: u64,
        target: Target,
    ) -> Result<()> {
        self.session.current_element = Some(name.clone());
        self.session.current_remaining = size;
        self.element = Some(Element {
            name,
            top_level,
            size,
            target,
        });

        if size == 0 {
            self.finish_element().await
        } else {
            self.phase = ReceivePhase::ElementData;
            Ok(())
        }
    }

    async fn read_data(&mut self, buf: &mut BytesMut) -> Result<bool> {
        if buf.is_empty() {
            return Ok(false);
        }

        let remaining = usize::try_from(self.session.current_remaining).unwrap_or(usize::MAX);
        let take = buf.len().min(remaining).min(self.options.unit_size());
        let chunk = buf.split_to(take);

        match self.element.as_mut().map(|e| &mut e.target) {
            Some(Target::File { path, sink }) => {
                let idle = self.options.idle_timeout;
                timeout(idle, sink.write_all(&chunk))
                    .await
                    .map_err(|_| Error::Timeout(idle.as_secs()))?
                    .map_err(|e| Error::CannotWrite(format!("{}: {e}", path.display())))?;
            }
            Some(Target::Text(text)) => text.extend_from_slice(&chunk),
            None => return Err(Error::Internal("payload without an element".to_string())),
        }

        self.session.bytes_done += take as u64;
        self.session.current_remaining -= take as u64;
        emit(&self.events, self.session.progress_event());

        if self.session.current_remaining == 0 {
            self.finish_element().await?;
        }
        Ok(true)
    }

    async fn finish_element(&mut self) -> Result<()> {
        let element = self
            .element
            .take()
            .ok_or_else(|| Error::Internal("no element to finish".to_string()))?;
        self.session.current_element = None;
        self.session.elements_done += 1;

        match element.target {
            Target::File { path, mut sink } => {
                sink.flush()
                    .await
                    .and(sink.shutdown().await)
                    .map_err(|e| Error::CannotWrite(format!("{}: {e}", path.display())))?;
                drop(sink);
                tracing::debug!("Received {} ({} bytes)", path.display(), element.size);

                emit(
                    &self.events,
                    TransferEvent::ElementCompleted {
                        name: element.name.clone(),
                    },
                );
                if element.top_level {
                    emit(
                        &self.events,
                        TransferEvent::FileReceived {
                            name: element.name,
                            path,
                            size: element.size,
                        },
                    );
                }
            }
            Target::Text(bytes) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                emit(
                    &self.events,
                    TransferEvent::ElementCompleted {
                        name: element.name,
                    },
                );
                emit(&self.events, TransferEvent::TextReceived { text });
            }
        }

        self.after_element();
        Ok(())
    }

    fn after_element(&mut self) {
        self.phase = if self.session.elements_done >= self.session.total_elements {
            ReceivePhase::Complete
        } else {
            ReceivePhase::ElementName
        };
    }

    /// Read the whole session from `stream`.
    ///
    /// Emits `Completed` once every announced element was stored and then
    /// closes the stream; emits `Aborted` if the stream ends early, stalls past
    /// the idle timeout, carries invalid data, or `cancel` fires.
    pub async fn receive_from<S>(&mut self, stream: &mut S, cancel: CancellationToken) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = tokio::select! {
            () = cancel.cancelled() => Err(Error::TransferAborted),
            result = self.pump(stream) => result,
        };

        // Releases the open destination file, if any.
        self.element = None;

        match &result {
            Ok(()) => {
                tracing::info!(
                    "Receive completed: {} elements, {} bytes",
                    self.session.elements_done,
                    self.session.bytes_done
                );
                emit(&self.events, TransferEvent::Completed);
                if let Err(e) = stream.shutdown().await {
                    tracing::debug!("Closing transfer socket failed: {}", e);
                }
            }
            Err(e) => {
                tracing::warn!("Receive aborted: {}", e);
                emit(
                    &self.events,
                    TransferEvent::Aborted {
                        error: e.to_string(),
                    },
                );
            }
        }
        result
    }

    async fn pump<S>(&mut self, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + Unpin,
    {
        let idle = self.options.idle_timeout;
        let mut chunk = vec![0u8; self.options.unit_size()];
        let mut buf = BytesMut::with_capacity(chunk.len());

        loop {
            if self.process(&mut buf).await? == ReceivePhase::Complete {
                if !buf.is_empty() {
                    tracing::debug!("Ignoring {} bytes after the session end", buf.len());
                }
                return Ok(());
            }

            let read = timeout(idle, stream.read(&mut chunk))
                .await
                .map_err(|_| Error::Timeout(idle.as_secs()))??;
            if read == 0 {
                return Err(Error::ConnectionClosed);
            }
            buf.extend_from_slice(&chunk[..read]);
        }
    }
}

/// Parent directory of a renamed path, keeping its segment count in step with
/// the original parent.
fn parent_of<'a>(resolved: &'a str, original_parent: &str) -> &'a Path {
    let depth = original_parent.split('/').count();
    let end = resolved
        .match_indices('/')
        .nth(depth - 1)
        .map_or(resolved.len(), |(i, _)| i);
    Path::new(&resolved[..end])
}

fn take_int(buf: &mut BytesMut) -> Option<i64> {
    let value = decode_int(buf)?;
    buf.advance(INT_FIELD_SIZE);
    Some(value)
}
