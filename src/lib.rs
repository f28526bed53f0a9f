//! A sliding window ARQ (automatic repeat request) protocol: reliable, in-order delivery of
//!  fixed-size frames over a link that may lose, duplicate, reorder or corrupt them.
//!
//! ## Protocol
//!
//! A sender and a receiver agree on a sequence number space `[0, MAX_SEQ)`, with all
//!  arithmetic modulo `MAX_SEQ`. The sender keeps up to `SWS` frames in flight, i.e. sent but
//!  not yet acknowledged, and holds back further messages until acks arrive. This is the
//!  protocol's only flow control.
//!
//! * Every frame carries a CRC-32 checksum, and frames with a checksum mismatch are dropped
//!    before any of their fields are looked at. Loss, corruption and duplication are regular
//!    operation on the link rather than errors.
//! * The receiver delivers a frame only if it is the next one in sequence, and acks it. Frames
//!    that arrive ahead of a gap are dropped without an ack (Go-Back-N, no buffering).
//! * Frames that were delivered before are acked again but not delivered a second time, since
//!    their previous ack may have been lost.
//! * The sender accepts acks strictly in order: only an ack for `LAR+1` moves its window.
//! * Every in-flight frame has its own retransmission timer. When it expires, the frame is sent
//!    again unchanged. There is no upper bound on the number of retransmissions.
//!
//! The bookkeeping uses the classic names: `LFS` (last frame sent) and `LAR` (last ack
//!  received) on the sending side, `LFR` (last frame received) and `LAF` (largest acceptable
//!  frame, `LFR + RWS`) on the receiving side. All of them start at `MAX_SEQ - 1` so that the
//!  first frame on the wire has sequence number 0.
//!
//! ## Wire format
//!
//! See [frame] for the frame layout.
//!
//! ## Structure
//!
//! [sender::SenderEngine] and [receiver::ReceiverEngine] are synchronous state machines without
//!  I/O: they consume frames, are told the current time, and produce frames. [end_point] runs
//!  each engine in its own tokio task, feeding it from a bounded input queue and waking it up
//!  for retransmission deadlines. Frames leave an endpoint through a [transport::Transport]
//!  (UDP or the simulated [lossy_link::LossyLink]) and enter it through a
//!  [transport::FrameSink].

pub mod config;
pub mod end_point;
pub mod error;
pub mod frame;
pub mod lossy_link;
pub mod receiver;
pub mod sender;
pub mod seq_no;
pub mod timer_set;
pub mod transport;


#[cfg(test)]
mod test {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .with_test_writer()
            .try_init()
            .ok();
    }
}
