//! The codec trait shared by all wire formats, plus checksum helpers.

/// Bidirectional framing for one firmware family.
///
/// `encode` is stateless. `feed` accumulates partial units across calls and
/// returns every frame completed by the new bytes, in arrival order.
pub trait FrameCodec {
    /// The decoded frame type.
    type Frame;

    /// Serialize a frame into wire bytes, including delimiters and checksum.
    fn encode(&self, frame: &Self::Frame) -> Vec<u8>;

    /// Push received bytes and collect any completed, valid frames.
    fn feed(&mut self, data: &[u8]) -> Vec<Self::Frame>;

    /// Discard any partially accumulated unit.
    fn reset(&mut self);

    /// Get the number of bytes held for an incomplete unit.
    fn buffered_len(&self) -> usize;

    /// Get the decode counters.
    fn stats(&self) -> CodecStats;
}

/// Decode counters kept by every codec.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CodecStats {
    /// Units that passed validation and were emitted.
    pub frames_decoded: u64,
    /// Units dropped for failing validation.
    pub frames_dropped: u64,
}

impl CodecStats {
    pub(crate) fn record_decoded(&mut self) {
        self.frames_decoded += 1;
    }

    pub(crate) fn record_dropped(&mut self) {
        self.frames_dropped += 1;
    }
}

/// Two's complement of the wrapping 16-bit sum of `data`.
///
/// Appending this value to the summed bytes makes the total wrap to zero.
pub fn additive_checksum(data: &[u8]) -> u16 {
    let sum = data
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)));
    (!sum).wrapping_add(1)
}

/// XOR of every byte in `data`.
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc ^ b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_additive_checksum() {
        assert_eq!(additive_checksum(&[0x01, 0x02, 0xC0]), 0xFF3D);
        assert_eq!(additive_checksum(&[]), 0x0000);
        // Sum wraps past 0xFFFF without panicking
        let data = vec![0xFF; 300];
        let sum = (300u32 * 0xFF) as u16;
        assert_eq!(additive_checksum(&data), sum.wrapping_neg());
    }

    #[test]
    fn test_xor_checksum() {
        assert_eq!(xor_checksum(&[0x00, 0x21, 0x02]), 0x23);
        assert_eq!(xor_checksum(&[0xAA, 0xAA]), 0x00);
    }
}
