//! Stages at the edges of a pipeline: where bytes come from and where
//! muxed output goes.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Component, Context, Sink, Source, Stage};
use crate::error::Result;
use crate::message::Message;

/// Source backed by any writer: incoming bytes are fed by the host via
/// [`Pipeline::feed`](super::Pipeline::feed), outgoing [`Message::Raw`]
/// bytes are written to `W`.
#[derive(Debug)]
pub struct StreamSource<W> {
    writer: W,
}

impl<W> StreamSource<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }
}

impl<W: Write + Send + 'static> Stage for StreamSource<W> {
    fn outgoing(&mut self, msg: Message, _ctx: &mut Context) -> Result<()> {
        match msg {
            Message::Raw(data) => {
                self.writer.write_all(&data)?;
                self.writer.flush()?;
                tracing::trace!(bytes = data.len(), "wrote to transport");
            }
            other => tracing::trace!(kind = other.kind(), "source ignores non-raw message"),
        }
        Ok(())
    }
}

impl<W: Write + Send + 'static> Component for StreamSource<W> {
    type Role = Source;
}

/// Sink writing the bytes of every [`Message::Isom`] to `W`.
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: W,
    written: u64,
}

impl<W> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Total bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl<W: Write + Send + 'static> Stage for WriterSink<W> {
    fn incoming(&mut self, msg: Message, _ctx: &mut Context) -> Result<()> {
        if let Message::Isom(isom) = msg {
            self.writer.write_all(&isom.data)?;
            self.written += isom.data.len() as u64;
        }
        Ok(())
    }

    fn end(&mut self, _ctx: &mut Context) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl<W: Write + Send + 'static> Component for WriterSink<W> {
    type Role = Sink;
}

/// Sink handing every message to a closure.
pub struct FnSink<F> {
    f: F,
}

impl<F> FnSink<F>
where
    F: FnMut(Message) -> Result<()> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Stage for FnSink<F>
where
    F: FnMut(Message) -> Result<()> + Send + 'static,
{
    fn incoming(&mut self, msg: Message, _ctx: &mut Context) -> Result<()> {
        (self.f)(msg)
    }
}

impl<F> Component for FnSink<F>
where
    F: FnMut(Message) -> Result<()> + Send + 'static,
{
    type Role = Sink;
}

/// Sink collecting messages into a queue the host can drain from
/// elsewhere, possibly another thread.
#[derive(Default)]
pub struct QueueSink {
    queue: Arc<Mutex<VecDeque<Message>>>,
}

/// Shared view of a [`QueueSink`]'s queue.
#[derive(Clone)]
pub struct QueueHandle {
    queue: Arc<Mutex<VecDeque<Message>>>,
}

impl QueueSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            queue: self.queue.clone(),
        }
    }
}

impl QueueHandle {
    /// Take every queued message, oldest first.
    pub fn drain(&self) -> Vec<Message> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl Stage for QueueSink {
    fn incoming(&mut self, msg: Message, _ctx: &mut Context) -> Result<()> {
        self.queue.lock().push_back(msg);
        Ok(())
    }
}

impl Component for QueueSink {
    type Role = Sink;
}
