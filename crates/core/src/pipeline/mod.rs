//! Stage composition.
//!
//! A pipeline is a chain of duplex stages. Messages from the server travel
//! **incoming** (source → tubes → sink); requests for the server travel
//! **outgoing** (sink-side → source).
//!
//! ```text
//!            incoming ──────────────────────────────────────────▶
//! [StreamSource] ⇄ [RtspParser] ⇄ [RtspSession] ⇄ [Depay..] ⇄ [Mp4Muxer] ⇄ [Sink]
//!            ◀────────────────────────────────────────── outgoing
//! ```
//!
//! ## Roles
//!
//! | Role | Inbound | Outbound | May connect to |
//! |------|---------|----------|----------------|
//! | [`Source`] | host-fed | yes | Tube, Sink |
//! | [`Tube`] | yes | yes | Tube, Sink |
//! | [`Sink`] | yes | no | nothing |
//!
//! [`Pipeline::builder`] enforces these rules at compile time: it starts
//! from a source, accepts tubes, and is closed by a sink. Topologies built
//! at runtime go through [`Pipeline::connect`], which checks the same rules
//! and returns [`ConnectError`] instead.
//!
//! Processing is single-threaded and message-driven. Every call into the
//! pipeline drains a FIFO work queue before returning, so each stage sees
//! its messages in arrival order.

pub mod io;

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::time::Instant;

use crate::error::{ConnectError, Result, RtspError};
use crate::message::Message;

/// Runtime view of a stage's role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Source,
    Tube,
    Sink,
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Source {}
    impl Sealed for super::Tube {}
    impl Sealed for super::Sink {}
}

/// Marker trait implemented by the three role types.
pub trait Role: sealed::Sealed {
    const KIND: StageKind;
}

/// Role marker: outbound flow only.
pub struct Source;
/// Role marker: inbound and outbound flow.
pub struct Tube;
/// Role marker: inbound flow only.
pub struct Sink;

impl Role for Source {
    const KIND: StageKind = StageKind::Source;
}

impl Role for Tube {
    const KIND: StageKind = StageKind::Tube;
}

impl Role for Sink {
    const KIND: StageKind = StageKind::Sink;
}

/// Messages produced by a stage while handling one unit of work.
#[derive(Debug, Default)]
pub struct Context {
    incoming: Vec<Message>,
    outgoing: Vec<Message>,
}

impl Context {
    /// Emit a message downstream.
    pub fn push(&mut self, msg: Message) {
        self.incoming.push(msg);
    }

    /// Emit a message upstream, towards the server.
    pub fn push_outgoing(&mut self, msg: Message) {
        self.outgoing.push(msg);
    }

    pub fn take_incoming(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.incoming)
    }

    pub fn take_outgoing(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outgoing)
    }
}

/// One processing unit of a pipeline.
///
/// The defaults pass every message through unchanged, so a stage only
/// overrides the flows it cares about.
pub trait Stage: Any + Send {
    /// Handle a message travelling from the server towards the sink.
    fn incoming(&mut self, msg: Message, ctx: &mut Context) -> Result<()> {
        ctx.push(msg);
        Ok(())
    }

    /// Handle a message travelling towards the server.
    fn outgoing(&mut self, msg: Message, ctx: &mut Context) -> Result<()> {
        ctx.push_outgoing(msg);
        Ok(())
    }

    /// The inbound flow has ended. Forwarded downstream after this returns.
    fn end(&mut self, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    /// Fire any timers that are due at `now`.
    fn poll(&mut self, _now: Instant, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    /// A connected neighbour failed while handling a message.
    fn peer_error(&mut self, error: &RtspError) {
        tracing::debug!(stage = self.name(), %error, "error from connected stage");
    }

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A [`Stage`] with a fixed [`Role`].
pub trait Component: Stage {
    type Role: Role;
}

/// Untyped identifier of a stage inside a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageId(usize);

/// Typed identifier of a stage, used to reach it after it was moved into
/// the pipeline.
pub struct StageHandle<T> {
    id: StageId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StageHandle<T> {
    fn new(index: usize) -> Self {
        Self {
            id: StageId(index),
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> StageId {
        self.id
    }
}

impl<T> Clone for StageHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StageHandle<T> {}

impl<T> fmt::Debug for StageHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StageHandle").field(&self.id.0).finish()
    }
}

struct Node {
    stage: Box<dyn Stage>,
    kind: StageKind,
    upstream: Option<usize>,
    downstream: Option<usize>,
}

enum Flow {
    Incoming(Message),
    Outgoing(Message),
    End,
}

struct Work {
    node: usize,
    flow: Flow,
}

/// A graph of connected stages.
#[derive(Default)]
pub struct Pipeline {
    nodes: Vec<Node>,
}

impl Pipeline {
    /// An empty pipeline for runtime composition via [`add`](Self::add)
    /// and [`connect`](Self::connect).
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a linear pipeline whose legality is checked by the compiler.
    pub fn builder<S>(source: S) -> (PipelineBuilder, StageHandle<S>)
    where
        S: Component<Role = Source>,
    {
        let mut pipeline = Pipeline::new();
        let handle = pipeline.add(source);
        let tail = handle.id.0;
        (PipelineBuilder { pipeline, tail }, handle)
    }

    /// Add an unconnected stage.
    pub fn add<T: Component>(&mut self, stage: T) -> StageHandle<T> {
        let index = self.nodes.len();
        self.nodes.push(Node {
            stage: Box::new(stage),
            kind: T::Role::KIND,
            upstream: None,
            downstream: None,
        });
        StageHandle::new(index)
    }

    /// Connect `from`'s outbound flow to `to`'s inbound flow.
    pub fn connect(&mut self, from: StageId, to: StageId) -> Result<()> {
        let (a, b) = (
            self.nodes.get(from.0).ok_or(RtspError::StageNotFound)?,
            self.nodes.get(to.0).ok_or(RtspError::StageNotFound)?,
        );

        if a.downstream.is_some() || b.upstream.is_some() {
            return Err(RtspError::Connect(ConnectError::AlreadyConnected));
        }
        if a.kind == StageKind::Sink {
            return Err(RtspError::Connect(ConnectError::AfterSink));
        }
        if b.kind == StageKind::Source {
            return Err(RtspError::Connect(ConnectError::Incompatible));
        }

        let mut cursor = Some(to.0);
        while let Some(index) = cursor {
            if index == from.0 {
                return Err(RtspError::Connect(ConnectError::Cycle));
            }
            cursor = self.nodes[index].downstream;
        }

        self.link(from.0, to.0);
        tracing::debug!(
            from = self.nodes[from.0].stage.name(),
            to = self.nodes[to.0].stage.name(),
            "stages connected"
        );
        Ok(())
    }

    /// Remove the link between `from` and `to`. Returns `false` if they
    /// were not connected.
    pub fn disconnect(&mut self, from: StageId, to: StageId) -> bool {
        let linked = self.nodes.get(from.0).and_then(|n| n.downstream) == Some(to.0);
        if linked {
            self.nodes[from.0].downstream = None;
            self.nodes[to.0].upstream = None;
        }
        linked
    }

    fn link(&mut self, from: usize, to: usize) {
        self.nodes[from].downstream = Some(to);
        self.nodes[to].upstream = Some(from);
    }

    /// Feed a message into the inbound flow of the head source.
    pub fn feed(&mut self, msg: Message) -> Result<()> {
        let head = self
            .nodes
            .iter()
            .position(|n| n.kind == StageKind::Source && n.upstream.is_none())
            .ok_or(RtspError::StageNotFound)?;
        self.feed_at(StageId(head), msg)
    }

    /// Feed a message into the inbound flow of a specific stage.
    pub fn feed_at(&mut self, id: StageId, msg: Message) -> Result<()> {
        if id.0 >= self.nodes.len() {
            return Err(RtspError::StageNotFound);
        }
        self.dispatch(VecDeque::from([Work {
            node: id.0,
            flow: Flow::Incoming(msg),
        }]))
    }

    /// Signal end of input to every source; the end travels downstream.
    pub fn end(&mut self) -> Result<()> {
        let queue = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.kind == StageKind::Source)
            .map(|(node, _)| Work {
                node,
                flow: Flow::End,
            })
            .collect();
        self.dispatch(queue)
    }

    /// Give every stage a chance to fire timers.
    pub fn poll(&mut self, now: Instant) -> Result<()> {
        let mut queue = VecDeque::new();
        for node in 0..self.nodes.len() {
            let mut ctx = Context::default();
            if let Err(error) = self.nodes[node].stage.poll(now, &mut ctx) {
                self.propagate(node, &error);
                return Err(error);
            }
            self.route(node, ctx, &mut queue);
        }
        self.dispatch(queue)
    }

    /// Run `f` against a stage, then deliver whatever it emitted.
    pub fn control<T, R>(
        &mut self,
        handle: &StageHandle<T>,
        f: impl FnOnce(&mut T, &mut Context) -> Result<R>,
    ) -> Result<R>
    where
        T: Stage,
    {
        let node = self
            .nodes
            .get_mut(handle.id.0)
            .ok_or(RtspError::StageNotFound)?;
        let stage: &mut dyn Stage = node.stage.as_mut();
        let stage: &mut dyn Any = stage;
        let stage = stage.downcast_mut::<T>().ok_or(RtspError::StageNotFound)?;

        let mut ctx = Context::default();
        let value = f(stage, &mut ctx)?;

        let mut queue = VecDeque::new();
        self.route(handle.id.0, ctx, &mut queue);
        self.dispatch(queue)?;
        Ok(value)
    }

    /// Borrow a stage by handle.
    pub fn stage<T: Stage>(&self, handle: &StageHandle<T>) -> Result<&T> {
        let node = self.nodes.get(handle.id.0).ok_or(RtspError::StageNotFound)?;
        let stage: &dyn Stage = node.stage.as_ref();
        let stage: &dyn Any = stage;
        stage.downcast_ref::<T>().ok_or(RtspError::StageNotFound)
    }

    fn dispatch(&mut self, mut queue: VecDeque<Work>) -> Result<()> {
        while let Some(Work { node, flow }) = queue.pop_front() {
            let ended = matches!(flow, Flow::End);
            let mut ctx = Context::default();
            let stage = &mut self.nodes[node].stage;
            let result = match flow {
                Flow::Incoming(msg) => stage.incoming(msg, &mut ctx),
                Flow::Outgoing(msg) => stage.outgoing(msg, &mut ctx),
                Flow::End => stage.end(&mut ctx),
            };

            if let Err(error) = result {
                tracing::warn!(stage = self.nodes[node].stage.name(), %error, "stage failed");
                self.propagate(node, &error);
                return Err(error);
            }

            self.route(node, ctx, &mut queue);

            if ended && let Some(next) = self.nodes[node].downstream {
                queue.push_back(Work {
                    node: next,
                    flow: Flow::End,
                });
            }
        }
        Ok(())
    }

    fn route(&self, node: usize, mut ctx: Context, queue: &mut VecDeque<Work>) {
        let upstream = self.nodes[node].upstream;
        let downstream = self.nodes[node].downstream;

        for msg in ctx.take_incoming() {
            match downstream {
                Some(next) => queue.push_back(Work {
                    node: next,
                    flow: Flow::Incoming(msg),
                }),
                None => tracing::trace!(kind = msg.kind(), "no downstream stage, dropping"),
            }
        }
        for msg in ctx.take_outgoing() {
            match upstream {
                Some(prev) => queue.push_back(Work {
                    node: prev,
                    flow: Flow::Outgoing(msg),
                }),
                None => tracing::trace!(kind = msg.kind(), "no upstream stage, dropping"),
            }
        }
    }

    fn propagate(&mut self, node: usize, error: &RtspError) {
        let peers = [self.nodes[node].upstream, self.nodes[node].downstream];
        for peer in peers.into_iter().flatten() {
            self.nodes[peer].stage.peer_error(error);
        }
    }
}

/// Builder for a linear source → tubes → sink pipeline.
pub struct PipelineBuilder {
    pipeline: Pipeline,
    tail: usize,
}

impl PipelineBuilder {
    /// Append a tube after the current tail.
    pub fn tube<T>(&mut self, stage: T) -> StageHandle<T>
    where
        T: Component<Role = Tube>,
    {
        let handle = self.pipeline.add(stage);
        self.pipeline.link(self.tail, handle.id.0);
        self.tail = handle.id.0;
        handle
    }

    /// Close the pipeline with a sink.
    pub fn sink<T>(mut self, stage: T) -> (Pipeline, StageHandle<T>)
    where
        T: Component<Role = Sink>,
    {
        let handle = self.pipeline.add(stage);
        self.pipeline.link(self.tail, handle.id.0);
        (self.pipeline, handle)
    }

    /// Finish without a sink; whatever leaves the tail is dropped.
    pub fn build(self) -> Pipeline {
        self.pipeline
    }
}
