use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// One immutable buffer of captured PCM bytes.
///
/// The backend hands out a borrowed slice that is only valid for the duration
/// of its callback; the relay copies it once into an `AudioChunk` before the
/// chunk crosses to the consumer context. Clones share the same allocation.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioChunk {
    data: Arc<[u8]>,
    sequence: u64,
}

impl AudioChunk {
    pub fn new(data: &[u8], sequence: u64) -> Self {
        Self {
            data: Arc::from(data),
            sequence,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Position of this chunk within its capture run, starting at 0.
    ///
    /// The terminal chunk of a run carries the next number after the last
    /// data chunk.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }
}

impl Deref for AudioChunk {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl AsRef<[u8]> for AudioChunk {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for AudioChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioChunk")
            .field("sequence", &self.sequence)
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_borrowed_bytes() {
        let mut source = vec![0x01, 0x02, 0x03];
        let chunk = AudioChunk::new(&source, 7);
        source[0] = 0xFF;

        assert_eq!(chunk.as_bytes(), &[0x01, 0x02, 0x03]);
        assert_eq!(chunk.sequence(), 7);
        assert_eq!(chunk.len(), 3);
    }

    #[test]
    fn clones_share_payload() {
        let chunk = AudioChunk::new(&[0xAA; 4], 0);
        let clone = chunk.clone();

        assert_eq!(chunk, clone);
        assert_eq!(chunk.as_bytes().as_ptr(), clone.as_bytes().as_ptr());
    }

    #[test]
    fn empty_chunk() {
        let chunk = AudioChunk::new(&[], 3);
        assert!(chunk.is_empty());
        assert_eq!(&*chunk, &[] as &[u8]);
    }
}
