//! Endpoints run their protocol engine in a dedicated tokio task that exclusively owns the
//!  engine's state. Everything else (the application submitting messages, the transport
//!  delivering raw frames) talks to the task through bounded input queues via cloneable
//!  handles.
//!
//! The task sleeps until either input arrives or the next retransmission timer is due,
//!  whichever comes first, and no longer than the configured idle wake-up interval. It then
//!  processes all queued input in one go, fires expired timers, and transmits the resulting
//!  frames.
//!
//! A sender has separate queues for commands and incoming frames. Commands are taken from
//!  their queue only while the send window has room, so a sender that is waiting for acks
//!  pushes back on the application with [ArqError::QueueFull] instead of buffering without
//!  limit. Acks are never stuck behind waiting commands.

use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use tokio::select;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};
use crate::config::ArqConfig;
use crate::error::ArqError;
use crate::frame::{EndpointId, Frame, FrameCodec};
use crate::receiver::{PayloadDelivery, ReceiverEngine};
use crate::sender::{SendCommand, SenderEngine};
use crate::transport::{FrameSink, Transport};

fn map_send_error<T>(e: TrySendError<T>) -> ArqError {
    match e {
        TrySendError::Full(_) => ArqError::QueueFull,
        TrySendError::Closed(_) => ArqError::EndpointClosed,
    }
}

/// Frames coming in from the transport are dropped if the endpoint can not keep up, which
///  is just another form of loss on the link.
fn offer_frame<T>(id: EndpointId, input: &mpsc::Sender<T>, item: T) {
    match input.try_send(item) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => warn!("{:?}: input queue is full - dropping incoming frame", id),
        Err(TrySendError::Closed(_)) => debug!("{:?}: endpoint is shut down - dropping incoming frame", id),
    }
}

fn wake_up_at(next_deadline: Option<Instant>, idle_wakeup: Duration) -> Instant {
    let idle_limit = Instant::now() + idle_wakeup;
    match next_deadline {
        Some(deadline) => deadline.min(idle_limit),
        None => idle_limit,
    }
}

async fn transmit_all(codec: &FrameCodec, transport: &Arc<dyn Transport>, outgoing: &mut Vec<Frame>) {
    for frame in outgoing.drain(..) {
        transport.transmit(codec.serialize(&frame)).await;
    }
}


#[derive(Clone)]
pub struct SenderHandle {
    id: EndpointId,
    codec: FrameCodec,
    commands: mpsc::Sender<SendCommand>,
    frames: mpsc::Sender<Bytes>,
}

impl SenderHandle {
    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// Hands a message to the sender without waiting. Messages that exceed the frame's payload
    ///  capacity are rejected right away.
    pub fn submit(&self, dst: EndpointId, message: Bytes) -> Result<(), ArqError> {
        self.codec.check_payload_len(message.len())?;
        self.commands.try_send(SendCommand { dst, message })
            .map_err(map_send_error)
    }
}

impl FrameSink for SenderHandle {
    fn deliver_frame(&self, raw: Bytes) {
        offer_frame(self.id, &self.frames, raw);
    }
}

/// Validates the configuration and starts a sender endpoint's worker task. The task runs until
///  all handles to it (including those attached to a transport) are dropped.
pub fn spawn_sender(id: EndpointId, config: ArqConfig, transport: Arc<dyn Transport>) -> anyhow::Result<(SenderHandle, JoinHandle<()>)> {
    config.validate()?;
    let config = Arc::new(config);

    let (send_commands, recv_commands) = mpsc::channel(config.input_queue_capacity);
    let (send_frames, recv_frames) = mpsc::channel(config.input_queue_capacity);
    let engine = SenderEngine::new(id, config.clone());
    let join_handle = tokio::spawn(sender_loop(engine, config.clone(), recv_commands, recv_frames, transport));

    Ok((SenderHandle { id, codec: config.codec(), commands: send_commands, frames: send_frames }, join_handle))
}

async fn sender_loop(mut engine: SenderEngine, config: Arc<ArqConfig>, mut commands: mpsc::Receiver<SendCommand>, mut frames: mpsc::Receiver<Bytes>, transport: Arc<dyn Transport>) {
    let id = engine.id();
    info!("{:?}: starting sender loop", id);

    let codec = config.codec();
    let mut outgoing = Vec::new();

    loop {
        let wake_at = wake_up_at(engine.next_deadline(), config.idle_wakeup);

        select! {
            biased;
            Some(first) = commands.recv(), if engine.has_room() => {
                let mut next = Some(first);
                while let Some(command) = next {
                    if let Err(e) = engine.submit(command) {
                        warn!("{:?}: rejected queued command: {}", id, e);
                    }
                    next = if engine.has_room() { commands.try_recv().ok() } else { None };
                }
            }
            received = frames.recv() => {
                // both queues are closed when the last handle is dropped
                let Some(first) = received else {
                    info!("{:?}: all handles are dropped - shutting down sender loop", id);
                    break;
                };

                // rejected acks are logged and counted by the engine
                let _ = engine.on_incoming_bytes(&first);
                while let Ok(raw) = frames.try_recv() {
                    let _ = engine.on_incoming_bytes(&raw);
                }
            }
            _ = sleep_until(wake_at) => {
                trace!("{:?}: woke up without input", id);
            }
        }

        let now = Instant::now();
        engine.tick(now, &mut outgoing);
        engine.drain_outgoing(now, &mut outgoing);
        transmit_all(&codec, &transport, &mut outgoing).await;
    }

    info!("{:?}: sender loop terminated, {:?}", id, engine.stats());
}


#[derive(Clone)]
pub struct ReceiverHandle {
    id: EndpointId,
    input: mpsc::Sender<Bytes>,
}

impl ReceiverHandle {
    pub fn id(&self) -> EndpointId {
        self.id
    }
}

impl FrameSink for ReceiverHandle {
    fn deliver_frame(&self, raw: Bytes) {
        offer_frame(self.id, &self.input, raw);
    }
}

/// Validates the configuration and starts a receiver endpoint's worker task, delivering
///  payloads through `delivery`. The task runs until all handles to it are dropped.
pub fn spawn_receiver(id: EndpointId, config: ArqConfig, transport: Arc<dyn Transport>, delivery: Box<dyn PayloadDelivery>) -> anyhow::Result<(ReceiverHandle, JoinHandle<()>)> {
    config.validate()?;
    let config = Arc::new(config);

    let (send, recv) = mpsc::channel(config.input_queue_capacity);
    let engine = ReceiverEngine::new(id, config.clone(), delivery);
    let join_handle = tokio::spawn(receiver_loop(engine, config, recv, transport));

    Ok((ReceiverHandle { id, input: send }, join_handle))
}

async fn receiver_loop(mut engine: ReceiverEngine, config: Arc<ArqConfig>, mut input: mpsc::Receiver<Bytes>, transport: Arc<dyn Transport>) {
    let id = engine.id();
    info!("{:?}: starting receiver loop", id);

    let codec = config.codec();
    let mut outgoing = Vec::new();

    loop {
        let wake_at = wake_up_at(None, config.idle_wakeup);

        select! {
            received = input.recv() => {
                let Some(first) = received else {
                    info!("{:?}: all handles are dropped - shutting down receiver loop", id);
                    break;
                };

                // dropped frames are logged and counted by the engine
                let _ = engine.on_incoming_bytes(&first, &mut outgoing);
                while let Ok(raw) = input.try_recv() {
                    let _ = engine.on_incoming_bytes(&raw, &mut outgoing);
                }
            }
            _ = sleep_until(wake_at) => {
                trace!("{:?}: woke up without input", id);
            }
        }

        transmit_all(&codec, &transport, &mut outgoing).await;
    }

    info!("{:?}: receiver loop terminated, {:?}", id, engine.stats());
}
