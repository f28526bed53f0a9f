use std::sync::Arc;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};
use crate::config::ArqConfig;
use crate::error::ArqError;
use crate::frame::{EndpointId, Frame, FrameCodec};
use crate::seq_no::{SeqNo, SeqSpace};

/// A payload on its way to the application
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Delivery {
    pub src: EndpointId,
    pub seq: SeqNo,
    pub payload: Bytes,
}

/// This is where received payloads are handed to the application, in order and exactly once
///  per sequence number.
#[cfg_attr(test, automock)]
pub trait PayloadDelivery: Send + 'static {
    fn deliver(&self, src: EndpointId, seq: SeqNo, payload: Bytes);
}

impl PayloadDelivery for mpsc::UnboundedSender<Delivery> {
    fn deliver(&self, src: EndpointId, seq: SeqNo, payload: Bytes) {
        if self.send(Delivery { src, seq, payload }).is_err() {
            debug!("application no longer receives deliveries - discarding payload {:?} from {:?}", seq, src);
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FrameDisposition {
    /// the frame was the next expected one, its payload was delivered and acked
    Delivered(SeqNo),
    /// the frame was delivered before, it was acked again without delivering it
    Duplicate(SeqNo),
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ReceiverStats {
    pub delivered: u64,
    pub duplicates: u64,
    pub dropped: u64,
}

/// The receiving side of the protocol. This is a Go-Back-N receiver: it accepts only the
///  next frame in sequence, and it does not buffer frames that arrive ahead of a gap.
///
/// Incoming sequence numbers are classified by their offset `d = (seq - LFR) mod MAX_SEQ`:
///
/// * `d == 1` is the next expected frame
/// * `2 <= d <= RWS` is in the window but out of order: dropped without ack
/// * `d == 0` or `d > MAX_SEQ / 2` is a frame that was delivered before: acked again
/// * anything else is beyond `LAF`: dropped without ack
pub struct ReceiverEngine {
    id: EndpointId,
    config: Arc<ArqConfig>,
    seq_space: SeqSpace,
    codec: FrameCodec,
    lfr: SeqNo,
    delivery: Box<dyn PayloadDelivery>,
    stats: ReceiverStats,
}

impl ReceiverEngine {
    pub fn new(id: EndpointId, config: Arc<ArqConfig>, delivery: Box<dyn PayloadDelivery>) -> ReceiverEngine {
        let seq_space = config.seq_space();
        ReceiverEngine {
            id,
            seq_space,
            codec: config.codec(),
            lfr: seq_space.last(),
            delivery,
            stats: ReceiverStats::default(),
            config,
        }
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn lfr(&self) -> SeqNo {
        self.lfr
    }

    /// `(LFR + RWS) mod MAX_SEQ`
    pub fn laf(&self) -> SeqNo {
        self.seq_space.add(self.lfr, self.config.receive_window_size)
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    pub fn on_incoming_bytes(&mut self, raw: &[u8], outgoing: &mut Vec<Frame>) -> Result<FrameDisposition, ArqError> {
        match self.codec.deserialize(raw) {
            Ok(frame) => self.on_incoming_frame(&frame, outgoing),
            Err(e) => {
                self.stats.dropped += 1;
                debug!("{:?}: dropping undecodable frame: {}", self.id, e);
                Err(e)
            }
        }
    }

    /// Acks produced for the frame are appended to `outgoing`.
    pub fn on_incoming_frame(&mut self, frame: &Frame, outgoing: &mut Vec<Frame>) -> Result<FrameDisposition, ArqError> {
        let result = self.do_on_incoming_frame(frame, outgoing);
        match &result {
            Ok(FrameDisposition::Delivered(_)) => self.stats.delivered += 1,
            Ok(FrameDisposition::Duplicate(seq)) => {
                self.stats.duplicates += 1;
                debug!("{:?}: duplicate frame {:?} from {:?} - acking again", self.id, seq, frame.src());
            }
            Err(e) => {
                self.stats.dropped += 1;
                debug!("{:?}: dropping frame {:?} from {:?}: {}", self.id, frame.seq(), frame.src(), e);
            }
        }
        result
    }

    fn do_on_incoming_frame(&mut self, frame: &Frame, outgoing: &mut Vec<Frame>) -> Result<FrameDisposition, ArqError> {
        // nothing in a corrupt frame can be trusted, including its destination
        if self.codec.is_corrupt(frame) {
            return Err(ArqError::CorruptFrame);
        }
        if frame.dst() != self.id {
            return Err(ArqError::Misdirected { own: self.id, dst: frame.dst() });
        }
        let payload = match frame.payload() {
            Some(payload) => payload,
            None => return Err(ArqError::UnexpectedKind { seq: frame.seq() }),
        };

        let seq = frame.seq();
        if !self.seq_space.contains(seq) {
            return Err(ArqError::OutOfWindow { seq });
        }

        let offset = self.seq_space.distance(self.lfr, seq);
        if offset == 1 {
            info!("<RECV_{}>: [{}]", self.id.0, String::from_utf8_lossy(payload));
            self.delivery.deliver(frame.src(), seq, payload.clone());
            self.lfr = seq;
            self.ack(frame, outgoing);
            return Ok(FrameDisposition::Delivered(seq));
        }

        if offset == 0 || offset > self.seq_space.max_seq() / 2 {
            self.ack(frame, outgoing);
            return Ok(FrameDisposition::Duplicate(seq));
        }

        if offset <= self.config.receive_window_size {
            return Err(ArqError::OutOfOrder { seq, expected: self.seq_space.next(self.lfr) });
        }
        Err(ArqError::OutOfWindow { seq })
    }

    fn ack(&self, frame: &Frame, outgoing: &mut Vec<Frame>) {
        trace!("{:?}: acking {:?} to {:?}", self.id, frame.seq(), frame.src());
        outgoing.push(self.codec.ack_frame(self.id, frame.src(), frame.seq()));
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use crate::frame::Checksum;
    use super::*;

    const S: EndpointId = EndpointId(1);
    const R: EndpointId = EndpointId(2);

    fn config(max_seq: u16, rws: u16) -> Arc<ArqConfig> {
        Arc::new(ArqConfig {
            max_seq,
            send_window_size: 1,
            receive_window_size: rws,
            payload_capacity: 8,
            ..ArqConfig::default()
        })
    }

    fn seq(n: u16) -> SeqNo {
        SeqNo::from_raw(n)
    }

    fn data(config: &ArqConfig, n: u16, payload: &'static str) -> Frame {
        config.codec().data_frame(S, R, seq(n), Bytes::from_static(payload.as_bytes())).unwrap()
    }

    fn channel_receiver(config: Arc<ArqConfig>) -> (ReceiverEngine, mpsc::UnboundedReceiver<Delivery>) {
        let (send, recv) = mpsc::unbounded_channel();
        (ReceiverEngine::new(R, config, Box::new(send)), recv)
    }

    #[test]
    fn test_initial_state() {
        let (receiver, _) = channel_receiver(config(8, 3));
        assert_eq!(receiver.id(), R);
        assert_eq!(receiver.lfr(), seq(7));
        assert_eq!(receiver.laf(), seq(2));
        assert_eq!(receiver.stats(), ReceiverStats::default());
    }

    #[test]
    fn test_deliver_in_order() {
        let config = config(8, 3);
        let (mut receiver, mut deliveries) = channel_receiver(config.clone());

        let mut acks = Vec::new();
        for (n, payload) in [(0, "a"), (1, "b"), (2, "c")] {
            assert_eq!(receiver.on_incoming_frame(&data(&config, n, payload), &mut acks), Ok(FrameDisposition::Delivered(seq(n))));
        }

        assert_eq!(receiver.lfr(), seq(2));
        assert_eq!(receiver.laf(), seq(5));
        assert_eq!(acks, vec![
            config.codec().ack_frame(R, S, seq(0)),
            config.codec().ack_frame(R, S, seq(1)),
            config.codec().ack_frame(R, S, seq(2)),
        ]);

        for (n, payload) in [(0, "a"), (1, "b"), (2, "c")] {
            assert_eq!(deliveries.try_recv().unwrap(), Delivery { src: S, seq: seq(n), payload: Bytes::from_static(payload.as_bytes()) });
        }
        assert!(deliveries.try_recv().is_err());
    }

    #[rstest]
    #[case::next_expected(3, Ok(FrameDisposition::Delivered(seq(3))), true)]
    #[case::last_delivered(2, Ok(FrameDisposition::Duplicate(seq(2))), true)]
    #[case::older_duplicate(1, Ok(FrameDisposition::Duplicate(seq(1))), true)]
    #[case::oldest_duplicate(7, Ok(FrameDisposition::Duplicate(seq(7))), true)]
    #[case::out_of_order(4, Err(ArqError::OutOfOrder { seq: seq(4), expected: seq(3) }), false)]
    #[case::out_of_order_at_laf(5, Err(ArqError::OutOfOrder { seq: seq(5), expected: seq(3) }), false)]
    #[case::beyond_laf(6, Err(ArqError::OutOfWindow { seq: seq(6) }), false)]
    #[case::outside_seq_space(8, Err(ArqError::OutOfWindow { seq: seq(8) }), false)]
    fn test_classification(#[case] n: u16, #[case] expected: Result<FrameDisposition, ArqError>, #[case] expect_ack: bool) {
        let config = config(8, 3);
        let (mut receiver, _deliveries) = channel_receiver(config.clone());
        receiver.lfr = seq(2);

        let mut acks = Vec::new();
        assert_eq!(receiver.on_incoming_frame(&data(&config, n, "x"), &mut acks), expected);

        if expect_ack {
            assert_eq!(acks, vec![config.codec().ack_frame(R, S, seq(n))]);
        }
        else {
            assert!(acks.is_empty());
        }
    }

    #[test]
    fn test_duplicate_delivered_once() {
        let config = config(8, 3);

        let mut delivery = MockPayloadDelivery::new();
        delivery.expect_deliver()
            .withf(|src, s, payload| *src == S && *s == seq(2) && &payload[..] == b"c")
            .times(1)
            .return_const(());
        delivery.expect_deliver()
            .withf(|_, s, _| *s != seq(2))
            .times(2)
            .return_const(());

        let mut receiver = ReceiverEngine::new(R, config.clone(), Box::new(delivery));
        let mut acks = Vec::new();
        for (n, payload) in [(0, "a"), (1, "b"), (2, "c")] {
            receiver.on_incoming_frame(&data(&config, n, payload), &mut acks).unwrap();
        }
        assert_eq!(receiver.lfr(), seq(2));

        // the ack for seq 2 got lost, so the sender retransmits it
        let mut re_acks = Vec::new();
        assert_eq!(receiver.on_incoming_frame(&data(&config, 2, "c"), &mut re_acks), Ok(FrameDisposition::Duplicate(seq(2))));
        assert_eq!(re_acks, vec![config.codec().ack_frame(R, S, seq(2))]);

        assert_eq!(receiver.lfr(), seq(2));
        assert_eq!(receiver.stats(), ReceiverStats { delivered: 3, duplicates: 1, dropped: 0 });
    }

    #[test]
    fn test_out_of_order_is_not_buffered() {
        let config = config(8, 3);
        let (mut receiver, mut deliveries) = channel_receiver(config.clone());

        let mut acks = Vec::new();
        assert!(receiver.on_incoming_frame(&data(&config, 1, "b"), &mut acks).is_err());
        assert_eq!(receiver.on_incoming_frame(&data(&config, 0, "a"), &mut acks), Ok(FrameDisposition::Delivered(seq(0))));

        assert_eq!(deliveries.try_recv().unwrap().payload, Bytes::from_static(b"a"));
        assert!(deliveries.try_recv().is_err());
        assert_eq!(receiver.lfr(), seq(0));

        assert_eq!(receiver.on_incoming_frame(&data(&config, 1, "b"), &mut acks), Ok(FrameDisposition::Delivered(seq(1))));
        assert_eq!(acks.len(), 2);
    }

    #[rstest]
    #[case::data(b"hello".as_slice())]
    #[case::empty(b"".as_slice())]
    fn test_single_bit_flips_are_never_delivered(#[case] payload: &[u8]) {
        let config = config(8, 3);
        let codec = config.codec();
        let raw = codec.serialize(&codec.data_frame(S, R, seq(0), Bytes::copy_from_slice(payload)).unwrap());

        let mut delivery = MockPayloadDelivery::new();
        delivery.expect_deliver().never();
        let mut receiver = ReceiverEngine::new(R, config.clone(), Box::new(delivery));

        let mut acks = Vec::new();
        for byte in 0..raw.len() - FrameCodec::CHECKSUM_LEN {
            for bit in 0..8 {
                let mut damaged = raw.to_vec();
                damaged[byte] ^= 1 << bit;
                assert_eq!(receiver.on_incoming_bytes(&damaged, &mut acks), Err(ArqError::CorruptFrame));
            }
        }

        assert!(acks.is_empty());
        assert_eq!(receiver.lfr(), seq(7));
        assert_eq!(receiver.stats().dropped, 8 * (raw.len() - FrameCodec::CHECKSUM_LEN) as u64);
    }

    #[test]
    fn test_rejects_invalid_frames() {
        let config = config(8, 3);
        let codec = config.codec();
        let (mut receiver, mut deliveries) = channel_receiver(config.clone());
        let mut acks = Vec::new();

        let valid = data(&config, 0, "a");
        let corrupt = valid.clone().with_checksum(Checksum(valid.checksum().0 ^ 1));
        assert_eq!(receiver.on_incoming_frame(&corrupt, &mut acks), Err(ArqError::CorruptFrame));

        let misdirected = codec.data_frame(S, EndpointId(9), seq(0), Bytes::from_static(b"a")).unwrap();
        assert_eq!(receiver.on_incoming_frame(&misdirected, &mut acks), Err(ArqError::Misdirected { own: R, dst: EndpointId(9) }));

        let ack = codec.ack_frame(S, R, seq(0));
        assert_eq!(receiver.on_incoming_frame(&ack, &mut acks), Err(ArqError::UnexpectedKind { seq: seq(0) }));

        assert!(acks.is_empty());
        assert!(deliveries.try_recv().is_err());
        assert_eq!(receiver.stats().dropped, 3);
    }

    #[test]
    fn test_lfr_wraps_around() {
        let config = config(4, 2);
        let (mut receiver, mut deliveries) = channel_receiver(config.clone());

        let mut acks = Vec::new();
        for i in 0..10u16 {
            let n = i % 4;
            assert_eq!(receiver.on_incoming_frame(&data(&config, n, "x"), &mut acks), Ok(FrameDisposition::Delivered(seq(n))));
        }
        assert_eq!(receiver.lfr(), seq(1));
        assert_eq!(receiver.laf(), seq(3));
        assert_eq!(std::iter::from_fn(|| deliveries.try_recv().ok()).count(), 10);
    }
}
