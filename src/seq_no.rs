use std::fmt::{Debug, Display, Formatter};


/// A frame sequence number. Sequence numbers live in `[0, MAX_SEQ)` and all arithmetic on them
///  is modulo `MAX_SEQ`, which is why they are manipulated through a [SeqSpace] rather than
///  through operator impls.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SeqNo(u16);
impl Debug for SeqNo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
impl Display for SeqNo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SeqNo {
    pub const fn from_raw(raw: u16) -> SeqNo {
        SeqNo(raw)
    }

    pub const fn to_raw(self) -> u16 {
        self.0
    }
}

/// The modular number space that sequence numbers of one sender / receiver pair live in.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SeqSpace {
    max_seq: u16,
}
impl SeqSpace {
    pub fn new(max_seq: u16) -> SeqSpace {
        assert!(max_seq >= 2, "a sequence space needs at least two sequence numbers");
        SeqSpace { max_seq }
    }

    pub fn max_seq(&self) -> u16 {
        self.max_seq
    }

    /// The highest sequence number, i.e. the one 'before' zero. LFS, LAR and LFR start here so
    ///  that the first frame on the wire carries sequence number 0.
    pub fn last(&self) -> SeqNo {
        SeqNo(self.max_seq - 1)
    }

    pub fn contains(&self, seq: SeqNo) -> bool {
        seq.0 < self.max_seq
    }

    pub fn next(&self, seq: SeqNo) -> SeqNo {
        self.add(seq, 1)
    }

    pub fn add(&self, seq: SeqNo, n: u16) -> SeqNo {
        debug_assert!(self.contains(seq));
        let sum = (seq.0 as u32 + n as u32) % self.max_seq as u32;
        SeqNo(sum as u16)
    }

    /// the number of steps it takes to get from `from` to `to` moving forward, i.e.
    ///  `(to - from) mod MAX_SEQ`
    pub fn distance(&self, from: SeqNo, to: SeqNo) -> u16 {
        debug_assert!(self.contains(from));
        debug_assert!(self.contains(to));
        let diff = (to.0 as u32 + self.max_seq as u32 - from.0 as u32) % self.max_seq as u32;
        diff as u16
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::simple(8, 3, 4)]
    #[case::zero(8, 0, 1)]
    #[case::wrap(8, 7, 0)]
    #[case::wrap_two(2, 1, 0)]
    #[case::big(u16::MAX, u16::MAX - 1, 0)]
    fn test_next(#[case] max_seq: u16, #[case] seq: u16, #[case] expected: u16) {
        let space = SeqSpace::new(max_seq);
        assert_eq!(space.next(SeqNo::from_raw(seq)), SeqNo::from_raw(expected));
    }

    #[rstest]
    #[case::no_wrap(8, 1, 3, 4)]
    #[case::to_end(8, 4, 3, 7)]
    #[case::wrap(8, 6, 4, 2)]
    #[case::full_circle(8, 5, 8, 5)]
    #[case::max_step(u16::MAX, 10, u16::MAX, 10)]
    fn test_add(#[case] max_seq: u16, #[case] seq: u16, #[case] n: u16, #[case] expected: u16) {
        let space = SeqSpace::new(max_seq);
        assert_eq!(space.add(SeqNo::from_raw(seq), n), SeqNo::from_raw(expected));
    }

    #[rstest]
    #[case::same(8, 3, 3, 0)]
    #[case::forward(8, 1, 5, 4)]
    #[case::wrap(8, 6, 1, 3)]
    #[case::backward_is_long_way_round(8, 5, 4, 7)]
    #[case::initial_to_zero(8, 7, 0, 1)]
    #[case::big(u16::MAX, u16::MAX - 1, 1, 2)]
    fn test_distance(#[case] max_seq: u16, #[case] from: u16, #[case] to: u16, #[case] expected: u16) {
        let space = SeqSpace::new(max_seq);
        assert_eq!(space.distance(SeqNo::from_raw(from), SeqNo::from_raw(to)), expected);
    }

    #[test]
    fn test_last() {
        assert_eq!(SeqSpace::new(8).last(), SeqNo::from_raw(7));
        assert_eq!(SeqSpace::new(8).next(SeqSpace::new(8).last()), SeqNo::from_raw(0));
    }

    #[rstest]
    #[case(8, 0, true)]
    #[case(8, 7, true)]
    #[case(8, 8, false)]
    #[case(8, 100, false)]
    fn test_contains(#[case] max_seq: u16, #[case] seq: u16, #[case] expected: bool) {
        assert_eq!(SeqSpace::new(max_seq).contains(SeqNo::from_raw(seq)), expected);
    }

    #[test]
    #[should_panic]
    fn test_degenerate_space() {
        SeqSpace::new(1);
    }
}
