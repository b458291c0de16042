//! Outbound side of a transfer.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::file::{generate_list, ByteSource, EntryKind, EntryList, FileStore, TransferEntry};
use crate::protocol::{encode_element_header, encode_session_header, TEXT_ELEMENT_NAME};

use super::{configure_tcp_keepalive, emit, EventSender, TransferEvent, TransferOptions, TransferSession};

/// What a [`Sender`] should transmit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Files and directories, optionally renaming the first entry
    Files {
        /// Selected paths
        paths: Vec<PathBuf>,
        /// Replacement name for the first entry
        name_override: Option<String>,
    },
    /// A text blob
    Text(String),
}

impl Outgoing {
    /// Send `paths` under their own names.
    #[must_use]
    pub fn files(paths: Vec<PathBuf>) -> Self {
        Self::Files {
            paths,
            name_override: None,
        }
    }

    /// Send a single file under another top-level name.
    ///
    /// Only regular files can be renamed; a directory is rejected by
    /// [`Sender::prepare`].
    #[must_use]
    pub fn file_named(path: PathBuf, name: impl Into<String>) -> Self {
        Self::Files {
            paths: vec![path],
            name_override: Some(name.into()),
        }
    }
}

/// Sender phases. Each step of the sender emits at most one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPhase {
    /// Session header not sent yet
    Header,
    /// Next unit is the name and size record of the next element
    ElementHeader,
    /// Next unit is payload of the current element
    ElementData,
    /// Everything was produced; only flushing remains
    Finalize,
}

enum Items {
    Entries {
        store: Arc<dyn FileStore>,
        entries: Vec<TransferEntry>,
    },
    Text(Vec<u8>),
}

/// Streams an entry list or a text blob over one connection.
pub struct Sender {
    items: Items,
    events: EventSender,
    options: TransferOptions,
    phase: SendPhase,
    session: TransferSession,
    index: usize,
    offset: usize,
    source: Option<ByteSource>,
    pending: Vec<TransferEvent>,
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("phase", &self.phase)
            .field("session", &self.session)
            .field("source_open", &self.source.is_some())
            .finish_non_exhaustive()
    }
}

impl Sender {
    /// Build a sender for `outgoing`, enumerating paths up front.
    ///
    /// Enumeration errors are returned here, before any network I/O.
    pub fn prepare(
        store: Arc<dyn FileStore>,
        outgoing: Outgoing,
        events: EventSender,
        options: TransferOptions,
    ) -> Result<Self> {
        match outgoing {
            Outgoing::Files {
                paths,
                name_override,
            } => {
                let mut list = generate_list(store.as_ref(), &paths)?;
                if let Some(name) = name_override {
                    // Children of a directory would keep the old top-level name.
                    if list.entries.first().is_some_and(TransferEntry::is_dir) {
                        return Err(Error::InvalidInput(format!(
                            "cannot send a directory as {name}"
                        )));
                    }
                    list.rename_first(name);
                }
                Ok(Self::for_entries(store, list, events, options))
            }
            Outgoing::Text(text) => Ok(Self::for_text(text, events, options)),
        }
    }

    /// Build a sender for an already enumerated list.
    #[must_use]
    pub fn for_entries(
        store: Arc<dyn FileStore>,
        list: EntryList,
        events: EventSender,
        options: TransferOptions,
    ) -> Self {
        let session = TransferSession {
            total_elements: list.len() as u64,
            total_bytes: list.total_bytes,
            ..TransferSession::default()
        };
        Self::with_items(
            Items::Entries {
                store,
                entries: list.entries,
            },
            session,
            events,
            options,
        )
    }

    /// Build a sender for a text blob.
    #[must_use]
    pub fn for_text(text: String, events: EventSender, options: TransferOptions) -> Self {
        let session = TransferSession {
            total_elements: 1,
            total_bytes: text.len() as u64,
            ..TransferSession::default()
        };
        Self::with_items(Items::Text(text.into_bytes()), session, events, options)
    }

    fn with_items(
        items: Items,
        session: TransferSession,
        events: EventSender,
        options: TransferOptions,
    ) -> Self {
        Self {
            items,
            events,
            options,
            phase: SendPhase::Header,
            session,
            index: 0,
            offset: 0,
            source: None,
            pending: Vec::new(),
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> SendPhase {
        self.phase
    }

    /// Session counters.
    #[must_use]
    pub const fn session(&self) -> &TransferSession {
        &self.session
    }

    /// Whether a source file is currently open.
    #[must_use]
    pub const fn has_open_source(&self) -> bool {
        self.source.is_some()
    }

    /// Produce the next unit of wire bytes, or `None` once everything was
    /// produced.
    pub async fn next_unit(&mut self) -> Result<Option<Vec<u8>>> {
        match self.phase {
            SendPhase::Header => {
                self.phase = SendPhase::ElementHeader;
                self.pending.push(TransferEvent::Started {
                    total_bytes: self.session.total_bytes,
                });
                Ok(Some(encode_session_header(
                    wire_int(self.session.total_elements)?,
                    wire_int(self.session.total_bytes)?,
                )))
            }
            SendPhase::ElementHeader => self.element_header(),
            SendPhase::ElementData => self.element_data().await.map(Some),
            SendPhase::Finalize => Ok(None),
        }
    }

    fn element_header(&mut self) -> Result<Option<Vec<u8>>> {
        let (name, size) = match &self.items {
            Items::Text(text) if self.index == 0 => (TEXT_ELEMENT_NAME.to_string(), wire_int(text.len() as u64)?),
            Items::Text(_) => {
                self.phase = SendPhase::Finalize;
                return Ok(None);
            }
            Items::Entries { store, entries } => {
                let Some(entry) = entries.get(self.index) else {
                    self.phase = SendPhase::Finalize;
                    return Ok(None);
                };
                if matches!(entry.kind, EntryKind::File { .. }) {
                    self.source = Some(store.open_read(&entry.source)?);
                }
                (entry.name.clone(), entry.wire_size())
            }
        };

        let header = encode_element_header(&name, size);
        self.offset = 0;
        self.session.current_element = Some(name.clone());
        self.session.current_remaining = u64::try_from(size).unwrap_or(0);

        if self.session.current_remaining > 0 {
            self.phase = SendPhase::ElementData;
        } else {
            self.finish_element(name);
        }
        Ok(Some(header))
    }

    async fn element_data(&mut self) -> Result<Vec<u8>> {
        let take = usize::try_from(self.session.current_remaining)
            .unwrap_or(usize::MAX)
            .min(self.options.unit_size());

        let chunk = match (&self.items, self.source.as_mut()) {
            (Items::Text(text), _) => text[self.offset..self.offset + take].to_vec(),
            (Items::Entries { entries, .. }, Some(source)) => {
                let mut buf = vec![0u8; take];
                let read = source.read(&mut buf).await?;
                if read == 0 {
                    let path = entries
                        .get(self.index)
                        .map(|e| e.source.display().to_string())
                        .unwrap_or_default();
                    return Err(Error::CannotRead(format!("{path} (file shrank while sending)")));
                }
                buf.truncate(read);
                buf
            }
            (Items::Entries { .. }, None) => {
                return Err(Error::Internal("payload requested without an open file".to_string()))
            }
        };

        self.offset += chunk.len();
        self.session.bytes_done += chunk.len() as u64;
        self.session.current_remaining -= chunk.len() as u64;
        self.pending.push(self.session.progress_event());

        if self.session.current_remaining == 0 {
            let name = self.session.current_element.clone().unwrap_or_default();
            self.finish_element(name);
        }
        Ok(chunk)
    }

    fn finish_element(&mut self, name: String) {
        self.source = None;
        self.session.current_element = None;
        self.session.elements_done += 1;
        self.index += 1;
        self.phase = SendPhase::ElementHeader;
        self.pending.push(TransferEvent::ElementCompleted { name });
    }

    /// Drive the phase machine into `writer`, then flush and close it.
    pub async fn stream<W>(&mut self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let idle = self.options.idle_timeout;
        while let Some(unit) = self.next_unit().await? {
            write_unit(writer, &unit, idle).await?;
            for event in self.pending.drain(..) {
                emit(&self.events, event);
            }
        }

        timeout(idle, writer.flush())
            .await
            .map_err(|_| Error::Timeout(idle.as_secs()))??;
        timeout(idle, writer.shutdown())
            .await
            .map_err(|_| Error::Timeout(idle.as_secs()))??;
        Ok(())
    }

    /// Connect to `addr` and send everything.
    ///
    /// Emits `Completed` after the last byte was flushed, or `Aborted` on
    /// any failure or when `cancel` fires.
    pub async fn send_to(mut self, addr: SocketAddr, cancel: CancellationToken) -> Result<()> {
        let result = tokio::select! {
            () = cancel.cancelled() => Err(Error::TransferAborted),
            result = self.connect_and_stream(addr) => result,
        };
        self.finish(result)
    }

    /// Send everything over an already connected writer.
    pub async fn send_over<W>(mut self, mut writer: W, cancel: CancellationToken) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let result = tokio::select! {
            () = cancel.cancelled() => Err(Error::TransferAborted),
            result = self.stream(&mut writer) => result,
        };
        self.finish(result)
    }

    async fn connect_and_stream(&mut self, addr: SocketAddr) -> Result<()> {
        let connect_timeout = self.options.connect_timeout;
        let mut stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout(connect_timeout.as_secs()))??;

        if let Err(e) = configure_tcp_keepalive(&stream) {
            tracing::debug!("Failed to enable keep-alive: {}", e);
        }
        tracing::info!(
            "Sending {} elements ({} bytes) to {}",
            self.session.total_elements,
            self.session.total_bytes,
            addr
        );

        self.stream(&mut stream).await
    }

    fn finish(&mut self, result: Result<()>) -> Result<()> {
        self.source = None;
        self.pending.clear();
        match &result {
            Ok(()) => {
                tracing::info!("Send completed");
                emit(&self.events, TransferEvent::Completed);
            }
            Err(e) => {
                tracing::warn!("Send aborted: {}", e);
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
}

/// Write `data` completely, failing if a single write stalls past `idle`.
async fn write_unit<W>(writer: &mut W, mut data: &[u8], idle: Duration) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while !data.is_empty() {
        let written = timeout(idle, writer.write(data))
            .await
            .map_err(|_| Error::Timeout(idle.as_secs()))??;
        if written == 0 {
            return Err(Error::ConnectionClosed);
        }
        data = &data[written..];
    }
    Ok(())
}

fn wire_int(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::InvalidInput(format!("{value} does not fit the wire format")))
}
