use std::time::Duration;
use anyhow::bail;
use crate::frame::FrameCodec;
use crate::seq_no::SeqSpace;

/// Configuration of a sender / receiver pair. Both sides of a conversation must agree on
///  `max_seq` and `payload_capacity` since they determine the wire format; window sizes and
///  timings are local to each side.
#[derive(Debug, Clone)]
pub struct ArqConfig {
    /// The size of the sequence number space. All sequence number arithmetic is modulo this
    ///  value, and it must be at least twice the bigger of the two window sizes - otherwise
    ///  a receiver can not distinguish a retransmitted old frame from a new one.
    pub max_seq: u16,

    /// SWS: the maximum number of frames that were sent but not acknowledged yet. Commands
    ///  submitted beyond this are held back until acks arrive.
    pub send_window_size: u16,

    /// RWS: the number of sequence numbers after the last delivered frame that a receiver
    ///  considers part of its window.
    pub receive_window_size: u16,

    /// Time after which an unacknowledged frame is sent again. Retransmission is repeated
    ///  indefinitely until the frame is acknowledged.
    pub retransmit_timeout: Duration,

    /// The number of payload bytes per frame. Frames are fixed size on the wire, so this
    ///  determines the frame length (see [FrameCodec::frame_len]).
    pub payload_capacity: usize,

    /// Upper bound for an endpoint's worker loop sleeping when there are no pending timers
    pub idle_wakeup: Duration,

    /// The number of commands / incoming frames that can be queued for an endpoint before
    ///  producers are turned away
    pub input_queue_capacity: usize,
}

impl Default for ArqConfig {
    fn default() -> Self {
        ArqConfig {
            max_seq: 32,
            send_window_size: 8,
            receive_window_size: 8,
            retransmit_timeout: Duration::from_millis(100),
            payload_capacity: 51, // 64 byte frames
            idle_wakeup: Duration::from_millis(100),
            input_queue_capacity: 1024,
        }
    }
}

impl ArqConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.send_window_size == 0 {
            bail!("send window size must be at least 1");
        }
        if self.receive_window_size == 0 {
            bail!("receive window size must be at least 1");
        }
        if self.max_seq < 2 {
            bail!("max_seq must be at least 2, was {}", self.max_seq);
        }

        let max_window = self.send_window_size.max(self.receive_window_size) as u32;
        if (self.max_seq as u32) < 2 * max_window {
            bail!("max_seq ({}) must be at least twice the bigger window size ({})", self.max_seq, max_window);
        }

        if self.payload_capacity == 0 || self.payload_capacity > u16::MAX as usize {
            bail!("payload capacity must be between 1 and {}, was {}", u16::MAX, self.payload_capacity);
        }
        if self.retransmit_timeout.is_zero() {
            bail!("retransmit timeout must not be zero");
        }
        if self.idle_wakeup.is_zero() {
            bail!("idle wakeup interval must not be zero");
        }
        if self.input_queue_capacity == 0 {
            bail!("input queue capacity must be at least 1");
        }

        Ok(())
    }

    pub fn seq_space(&self) -> SeqSpace {
        SeqSpace::new(self.max_seq)
    }

    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.payload_capacity)
    }
}
