use bytes::{Buf, BufMut, BytesMut};
use bytes_varint::try_get_fixed::TryGetFixedSupport;
use bytes_varint::{VarIntSupport, VarIntSupportMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::transport::node_id::SequenceNumber;

/// Reliable broadcasts and syns are acknowledged in separate number spaces; the type tag
///  is part of an ack set's identity.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum AckType {
    Broadcast = 0,
    Unicast = 1,
}

/// Sliding window of acknowledged sequence numbers: `highest` is always considered
///  acknowledged, and bit i of `marks` stands for `highest - (i + 1)`. Anything more than
///  [AckSet::WINDOW] below `highest` is no longer representable and gets rejected.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct AckSet {
    ack_type: AckType,
    highest: SequenceNumber,
    marks: u32,
}

impl AckSet {
    pub const WINDOW: u32 = 32;

    /// The seed itself counts as acknowledged.
    pub fn new(ack_type: AckType, seed: SequenceNumber) -> AckSet {
        AckSet {
            ack_type,
            highest: seed,
            marks: 0,
        }
    }

    pub fn ack_type(&self) -> AckType {
        self.ack_type
    }

    pub fn highest(&self) -> SequenceNumber {
        self.highest
    }

    /// Whether `sn` is representable: at or ahead of `highest` (wrap-aware), or no more
    ///  than [AckSet::WINDOW] behind it.
    pub fn can_add(&self, sn: SequenceNumber) -> bool {
        let ahead = sn.to_raw().wrapping_sub(self.highest.to_raw());
        if ahead < 0x8000_0000 {
            return true;
        }
        ahead.wrapping_neg() <= Self::WINDOW
    }

    /// Marks `sn` as acknowledged, shifting the window forward if `sn` is ahead of
    ///  `highest` (marks falling off the far end are dropped). Returns false if `sn` is
    ///  below the window or was already marked.
    pub fn try_add(&mut self, sn: SequenceNumber) -> bool {
        let ahead = sn.to_raw().wrapping_sub(self.highest.to_raw());

        if ahead == 0 {
            return false;
        }

        if ahead < 0x8000_0000 {
            self.marks = if ahead >= 32 { 0 } else { self.marks << ahead };
            if ahead <= Self::WINDOW {
                // the old highest stays acknowledged at its new distance
                self.marks |= 1 << (ahead - 1);
            }
            self.highest = sn;
            return true;
        }

        let behind = ahead.wrapping_neg();
        if behind > Self::WINDOW {
            return false;
        }
        let bit = 1u32 << (behind - 1);
        if self.marks & bit != 0 {
            return false;
        }
        self.marks |= bit;
        true
    }

    /// All acknowledged sequence numbers, in ascending order ending with `highest`.
    pub fn iter(&self) -> impl Iterator<Item = SequenceNumber> {
        let highest = self.highest;
        let marks = self.marks;

        (1..=Self::WINDOW)
            .rev()
            .filter(move |distance| marks & (1 << (distance - 1)) != 0)
            .map(move |distance| SequenceNumber::from_raw(highest.to_raw().wrapping_sub(distance)))
            .chain(std::iter::once(highest))
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u8(self.ack_type.into());
        buf.put_u32_varint(self.highest.to_raw());
        buf.put_u32_varint(self.marks);
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<AckSet> {
        let ack_type = AckType::try_from(buf.try_get_u8()?)
            .map_err(|e| anyhow::anyhow!("invalid ack type discriminator: {}", e))?;
        let highest = SequenceNumber::from_raw(buf.try_get_u32_varint()?);
        let marks = buf.try_get_u32_varint()?;

        Ok(AckSet {
            ack_type,
            highest,
            marks,
        })
    }
}
