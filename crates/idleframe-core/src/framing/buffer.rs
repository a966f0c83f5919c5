//! Bounded frame accumulator

use crate::error::LinkError;

/// Append-only byte accumulator with a fixed capacity.
///
/// An append that does not fit discards everything accumulated so far, so a
/// partial frame never outlives an overflow.
#[derive(Debug)]
pub struct FrameBuffer {
    data: Box<[u8]>,
    len: usize,
}

impl FrameBuffer {
    /// Allocate a buffer holding at most `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    /// Append `bytes` after the current contents
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let attempted = self.len + bytes.len();
        if attempted > self.data.len() {
            self.len = 0;
            return Err(LinkError::Overflow {
                capacity: self.data.len(),
                attempted,
            });
        }
        self.data[self.len..attempted].copy_from_slice(bytes);
        self.len = attempted;
        Ok(())
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> Vec<u8> {
        self.data[..self.len].to_vec()
    }

    /// Copy the contents out and reset
    pub fn take(&mut self) -> Vec<u8> {
        let frame = self.snapshot();
        self.reset();
        frame
    }

    /// Drop the current contents
    pub fn reset(&mut self) {
        self.len = 0;
    }

    /// Number of bytes accumulated
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is accumulated
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of bytes
    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}
