use std::collections::VecDeque;
use std::sync::Arc;
use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use crate::config::ArqConfig;
use crate::error::ArqError;
use crate::frame::{EndpointId, Frame, FrameCodec};
use crate::seq_no::{SeqNo, SeqSpace};
use crate::timer_set::TimerSet;

/// A user level send request. The sequence number is assigned when the frame is actually
///  transmitted, not at submission time.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SendCommand {
    pub dst: EndpointId,
    pub message: Bytes,
}

#[derive(Debug)]
struct InFlight {
    frame: Frame,
    tx_count: u32,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct SenderStats {
    /// first transmissions
    pub frames_sent: u64,
    pub retransmissions: u64,
    pub acks_accepted: u64,
    pub acks_ignored: u64,
}

/// The sending side of the protocol: a Go-Back-N transmit window.
///
/// The engine does no I/O and never reads the clock. Frames it produces are appended to a
///  caller provided buffer, and time is passed in explicitly - this allows the surrounding
///  worker loop to own all scheduling, and tests to drive the engine step by step.
///
/// Acknowledgements are accepted strictly in order: only an ack for `LAR+1` advances the
///  window, anything else is ignored. Every in-flight frame has its own retransmission
///  timer, and a frame is retransmitted unchanged (and indefinitely) until it is acknowledged.
pub struct SenderEngine {
    id: EndpointId,
    config: Arc<ArqConfig>,
    seq_space: SeqSpace,
    codec: FrameCodec,

    lfs: SeqNo,
    lar: SeqNo,

    commands: VecDeque<SendCommand>,
    /// front is the frame for `LAR+1`, back is the frame for `LFS`
    in_flight: VecDeque<InFlight>,
    timers: TimerSet,

    stats: SenderStats,
}

impl SenderEngine {
    pub fn new(id: EndpointId, config: Arc<ArqConfig>) -> SenderEngine {
        let seq_space = config.seq_space();
        SenderEngine {
            id,
            seq_space,
            codec: config.codec(),
            lfs: seq_space.last(),
            lar: seq_space.last(),
            commands: VecDeque::default(),
            in_flight: VecDeque::with_capacity(config.send_window_size as usize),
            timers: TimerSet::new(),
            stats: SenderStats::default(),
            config,
        }
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn lfs(&self) -> SeqNo {
        self.lfs
    }

    pub fn lar(&self) -> SeqNo {
        self.lar
    }

    /// `(LFS - LAR) mod MAX_SEQ`
    pub fn in_flight(&self) -> u16 {
        self.seq_space.distance(self.lar, self.lfs)
    }

    /// the number of submitted commands that are waiting for room in the send window
    pub fn queued(&self) -> usize {
        self.commands.len()
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }

    /// `true` if one more submitted command would go out right away rather than wait for acks
    pub fn has_room(&self) -> bool {
        self.in_flight() as usize + self.commands.len() < self.config.send_window_size as usize
    }

    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Queues a command for transmission. Oversized messages are rejected here rather than
    ///  when the frame is built.
    pub fn submit(&mut self, command: SendCommand) -> Result<(), ArqError> {
        self.codec.check_payload_len(command.message.len())?;
        trace!("{:?}: queueing message of {} bytes for {:?}", self.id, command.message.len(), command.dst);
        self.commands.push_back(command);
        Ok(())
    }

    pub fn on_incoming_bytes(&mut self, raw: &[u8]) -> Result<SeqNo, ArqError> {
        match self.codec.deserialize(raw) {
            Ok(frame) => self.on_incoming_ack(&frame),
            Err(e) => {
                self.stats.acks_ignored += 1;
                debug!("{:?}: ignoring undecodable frame: {}", self.id, e);
                Err(e)
            }
        }
    }

    /// Returns the acknowledged sequence number if the ack advanced the window. Rejected acks
    ///  leave all state unchanged except for the statistics.
    pub fn on_incoming_ack(&mut self, frame: &Frame) -> Result<SeqNo, ArqError> {
        let result = self.do_on_incoming_ack(frame);
        match &result {
            Ok(seq) => {
                self.stats.acks_accepted += 1;
                debug!("{:?}: ack for {:?} accepted, {} frame(s) in flight", self.id, seq, self.in_flight());
            }
            Err(e) => {
                self.stats.acks_ignored += 1;
                debug!("{:?}: ignoring ack for {:?}: {}", self.id, frame.seq(), e);
            }
        }
        result
    }

    fn do_on_incoming_ack(&mut self, frame: &Frame) -> Result<SeqNo, ArqError> {
        if self.codec.is_corrupt(frame) {
            return Err(ArqError::CorruptFrame);
        }
        if frame.dst() != self.id {
            return Err(ArqError::Misdirected { own: self.id, dst: frame.dst() });
        }
        if !frame.is_ack() {
            return Err(ArqError::UnexpectedKind { seq: frame.seq() });
        }

        let seq = frame.seq();
        if !self.seq_space.contains(seq) || self.in_flight.is_empty() || seq != self.seq_space.next(self.lar) {
            return Err(ArqError::OutOfWindow { seq });
        }

        self.lar = seq;
        self.timers.cancel(seq);
        let acked = self.in_flight.pop_front();
        debug_assert_eq!(acked.map(|f| f.frame.seq()), Some(seq));
        Ok(seq)
    }

    /// Retransmits every in-flight frame whose timer expired at or before `now`, restarting
    ///  its timer from `now`.
    pub fn tick(&mut self, now: Instant, outgoing: &mut Vec<Frame>) {
        let first_in_flight = self.seq_space.next(self.lar);

        for seq in self.timers.expired_before(now) {
            let idx = self.seq_space.distance(first_in_flight, seq) as usize;
            let entry = match self.in_flight.get_mut(idx) {
                Some(entry) if entry.frame.seq() == seq => entry,
                _ => {
                    warn!("{:?}: timer expired for {:?} which is not in flight - skipping", self.id, seq);
                    continue;
                }
            };

            entry.tx_count += 1;
            self.stats.retransmissions += 1;
            debug!("{:?}: retransmitting {:?} to {:?} (transmission #{})", self.id, seq, entry.frame.dst(), entry.tx_count);

            outgoing.push(entry.frame.clone());
            self.timers.start(seq, now + self.config.retransmit_timeout);
        }
    }

    /// Moves queued commands into the send window as long as there is room, in submission
    ///  order. Commands that do not fit stay queued until acks open up the window.
    pub fn drain_outgoing(&mut self, now: Instant, outgoing: &mut Vec<Frame>) {
        while self.in_flight() < self.config.send_window_size {
            let Some(command) = self.commands.pop_front() else {
                break;
            };

            let seq = self.seq_space.next(self.lfs);
            let frame = match self.codec.data_frame(self.id, command.dst, seq, command.message) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("{:?}: discarding queued message: {}", self.id, e);
                    continue;
                }
            };

            self.lfs = seq;
            assert!(self.in_flight() <= self.config.send_window_size,
                    "send window overrun: LFS {:?}, LAR {:?}, SWS {}", self.lfs, self.lar, self.config.send_window_size);

            trace!("{:?}: sending {:?} to {:?}", self.id, seq, frame.dst());
            self.timers.start(seq, now + self.config.retransmit_timeout);
            self.stats.frames_sent += 1;
            outgoing.push(frame.clone());
            self.in_flight.push_back(InFlight { frame, tx_count: 1 });
        }

        debug_assert_eq!(self.in_flight.len(), self.in_flight() as usize);
        if !self.commands.is_empty() {
            trace!("{:?}: send window full, {} message(s) held back", self.id, self.commands.len());
        }
    }
}
