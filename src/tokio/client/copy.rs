use std::io::{Error as IOError, ErrorKind};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::{BufMut, BytesMut};
use futures::StreamExt;
use log::debug;
use postgres_types::Type;
use tokio::sync::oneshot;

use super::connection::{NoticeHandler, NotificationHandler, Reader};
use super::Connection;
use crate::error::{ErrorInfo, GaussWireError, GaussWireResult};
use crate::messages::copy::{COPY_FORMAT_TEXT, CopyData, CopyDone, CopyFail};
use crate::messages::response::ReadyForQuery;
use crate::messages::startup::ParameterStatus;
use crate::messages::{BackendMessage, FrontendMessage};
use crate::types::Value;

const COPY_BUFFER_SIZE: usize = 64 * 1024;
const COPY_FLUSH_THRESHOLD: usize = 63 * 1024;

/// First server error seen by the drain task.
type SharedError = Arc<Mutex<Option<ErrorInfo>>>;

/// Handed back by the drain task once the server is ready again.
struct DrainOutcome {
    reader: Reader,
    parameters: Vec<ParameterStatus>,
    result: GaussWireResult<ReadyForQuery>,
}

fn shared_error(error: &SharedError) -> Option<ErrorInfo> {
    error
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Read the server side of a COPY until `ReadyForQuery`, remembering the
/// first error.
async fn drain(
    mut reader: Reader,
    error: SharedError,
    notice_handler: Option<NoticeHandler>,
    notification_handler: Option<NotificationHandler>,
) -> DrainOutcome {
    let mut parameters = Vec::new();
    let result = loop {
        let message = match reader.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => break Err(e),
            None => {
                break Err(GaussWireError::IoError(IOError::new(
                    ErrorKind::UnexpectedEof,
                    "server closed the connection during COPY",
                )));
            }
        };
        match message {
            BackendMessage::ErrorResponse(e) => {
                error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get_or_insert(e.into());
            }
            BackendMessage::CommandComplete(complete) => {
                debug!("COPY finished: {}", complete.tag);
            }
            BackendMessage::NoticeResponse(notice) => {
                let notice = ErrorInfo::from(notice);
                match &notice_handler {
                    Some(handler) => handler(&notice),
                    None => debug!("notice during COPY: {notice}"),
                }
            }
            BackendMessage::NotificationResponse(notification) => {
                if let Some(handler) = &notification_handler {
                    handler(&notification);
                }
            }
            BackendMessage::ParameterStatus(status) => parameters.push(status),
            BackendMessage::ReadyForQuery(ready) => break Ok(ready),
            other => {
                break Err(GaussWireError::UnexpectedMessage {
                    message: other.message_type() as char,
                    state: "draining COPY response",
                });
            }
        }
    };
    DrainOutcome {
        reader,
        parameters,
        result,
    }
}

/// Append one value in COPY text format.
fn encode_copy_value(value: &Value, buf: &mut BytesMut) -> GaussWireResult<()> {
    let Some(text) = value.encode_text(&Type::UNKNOWN)? else {
        buf.put_slice(b"\\N");
        return Ok(());
    };
    for b in text.iter() {
        match b {
            b'\\' => buf.put_slice(b"\\\\"),
            b'\n' => buf.put_slice(b"\\n"),
            b'\r' => buf.put_slice(b"\\r"),
            b'\t' => buf.put_slice(b"\\t"),
            b => buf.put_u8(*b),
        }
    }
    Ok(())
}

/// A running `COPY ... FROM STDIN`.
///
/// Rows are buffered and sent in `CopyData` frames while a background task
/// reads the server's answers. [`CopyIn::close`] must be called to finish
/// the COPY. Dropping the stream before that makes the connection unusable.
pub struct CopyIn<'a> {
    conn: &'a mut Connection,
    buffer: BytesMut,
    error: SharedError,
    done: Option<oneshot::Receiver<DrainOutcome>>,
    closed: bool,
}

impl Connection {
    /// Start `COPY ... FROM STDIN`. Only allowed inside a transaction.
    pub async fn copy_in(&mut self, query: &str) -> GaussWireResult<CopyIn<'_>> {
        self.ensure_usable().await?;
        if !self.in_transaction() {
            return Err(GaussWireError::CopyOutsideTransaction);
        }
        let result = self.start_copy(query).await;
        self.check(result)?;

        let Some(reader) = self.reader.take() else {
            return Err(GaussWireError::CopyInProgress);
        };
        let error = SharedError::default();
        let (tx, rx) = oneshot::channel();
        let task_error = error.clone();
        let notice_handler = self.notice_handler.clone();
        let notification_handler = self.notification_handler.clone();
        tokio::spawn(async move {
            let outcome = drain(reader, task_error, notice_handler, notification_handler).await;
            // the receiver is gone when the stream was dropped
            let _ = tx.send(outcome);
        });
        self.in_copy = true;

        Ok(CopyIn {
            conn: self,
            buffer: BytesMut::with_capacity(COPY_BUFFER_SIZE),
            error,
            done: Some(rx),
            closed: false,
        })
    }

    async fn start_copy(&mut self, query: &str) -> GaussWireResult<()> {
        let message = self.query_message(query)?;
        self.send_messages([message]).await?;
        loop {
            match self.recv().await? {
                BackendMessage::CopyInResponse(response) if response.format == COPY_FORMAT_TEXT => {
                    return Ok(());
                }
                BackendMessage::CopyInResponse(_) => {
                    return self.fail_copy(GaussWireError::CopyBinaryNotSupported).await;
                }
                BackendMessage::CopyOutResponse(_) => {
                    return self.fail_copy(GaussWireError::CopyToNotSupported).await;
                }
                BackendMessage::ErrorResponse(e) => {
                    self.read_ready_for_query().await?;
                    return Err(ErrorInfo::from(e).into());
                }
                BackendMessage::EmptyQueryResponse(_) => {}
                other => return Err(self.unexpected(&other, "starting COPY")),
            }
        }
    }

    /// Abort a COPY the client cannot serve and wait for the server to be
    /// ready again.
    async fn fail_copy(&mut self, error: GaussWireError) -> GaussWireResult<()> {
        self.send_messages([FrontendMessage::CopyFail(CopyFail::new(error.to_string()))])
            .await?;
        while !matches!(self.recv().await?, BackendMessage::ReadyForQuery(_)) {}
        Err(error)
    }
}

impl CopyIn<'_> {
    fn check_usable(&self) -> GaussWireResult<()> {
        if self.closed {
            return Err(GaussWireError::CopyInClosed);
        }
        if self.conn.is_bad() {
            return Err(GaussWireError::BadConnection);
        }
        match shared_error(&self.error) {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Append one row. Values are sent as text, NULL as `\N`.
    pub async fn write_row(&mut self, row: &[Value]) -> GaussWireResult<()> {
        self.check_usable()?;
        for (i, value) in row.iter().enumerate() {
            if i > 0 {
                self.buffer.put_u8(b'\t');
            }
            encode_copy_value(value, &mut self.buffer)?;
        }
        self.buffer.put_u8(b'\n');

        if self.buffer.len() > COPY_FLUSH_THRESHOLD {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> GaussWireResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let data = self.buffer.split().freeze();
        self.conn
            .send_messages([FrontendMessage::CopyData(CopyData::new(data))])
            .await
    }

    /// Send the buffered rows, end the COPY and wait for the server's
    /// answer. Returns the first error of the COPY. Closing twice does
    /// nothing.
    pub async fn close(&mut self) -> GaussWireResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = self.finish().await;
        self.conn.in_copy = false;
        self.conn.check(result)
    }

    async fn finish(&mut self) -> GaussWireResult<()> {
        if self.conn.is_bad() {
            return Err(GaussWireError::BadConnection);
        }
        self.flush().await?;
        self.conn
            .send_messages([FrontendMessage::CopyDone(CopyDone::new())])
            .await?;

        let Some(done) = self.done.take() else {
            return Err(GaussWireError::CopyInClosed);
        };
        let outcome = done.await.map_err(|_| {
            GaussWireError::IoError(IOError::other("COPY drain task ended early"))
        })?;
        self.conn.reader = Some(outcome.reader);
        for status in outcome.parameters {
            self.conn.on_parameter_status(status);
        }
        let ready = outcome.result?;
        self.conn.on_ready_for_query(&ready);

        match shared_error(&self.error) {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl Drop for CopyIn<'_> {
    fn drop(&mut self) {
        if !self.closed {
            self.conn.poison(GaussWireError::CopyAborted(
                "stream dropped before close".to_owned(),
            ));
        }
    }
}
