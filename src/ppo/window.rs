//! Fixed-capacity sliding window of encoded observation frames.
//!
//! The rollout driver keeps the last `num_frames` latent vectors as the
//! recurrent model's input. A push always evicts the oldest frame; capacity
//! is allocated once up front.

/// Circular arena of `num_frames` frames of `dim` f32 values each.
#[derive(Debug, Clone)]
pub struct FrameStack {
    frames: Vec<f32>,
    num_frames: usize,
    dim: usize,
    // Index of the oldest frame.
    head: usize,
}

impl FrameStack {
    pub fn new(num_frames: usize, dim: usize) -> Self {
        assert!(num_frames > 0, "window must hold at least one frame");
        assert!(dim > 0, "frame dimension must be non-zero");
        Self {
            frames: vec![0.0; num_frames * dim],
            num_frames,
            dim,
            head: 0,
        }
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Fill every slot with `frame`. Used at episode start so the first
    /// window is the initial observation repeated.
    pub fn seed(&mut self, frame: &[f32]) {
        assert_eq!(frame.len(), self.dim, "frame dimension mismatch");
        for slot in 0..self.num_frames {
            self.frames[slot * self.dim..(slot + 1) * self.dim].copy_from_slice(frame);
        }
        self.head = 0;
    }

    /// Append `frame` as the newest entry, evicting the oldest.
    pub fn push(&mut self, frame: &[f32]) {
        assert_eq!(frame.len(), self.dim, "frame dimension mismatch");
        let slot = self.head;
        self.frames[slot * self.dim..(slot + 1) * self.dim].copy_from_slice(frame);
        self.head = (self.head + 1) % self.num_frames;
    }

    /// Newest frame in the window.
    pub fn latest(&self) -> &[f32] {
        let slot = (self.head + self.num_frames - 1) % self.num_frames;
        &self.frames[slot * self.dim..(slot + 1) * self.dim]
    }

    /// Window contents in temporal order (oldest first) as one contiguous
    /// `[num_frames * dim]` vector.
    pub fn ordered(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.num_frames * self.dim);
        for i in 0..self.num_frames {
            let slot = (self.head + i) % self.num_frames;
            out.extend_from_slice(&self.frames[slot * self.dim..(slot + 1) * self.dim]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_duplicates_first_frame() {
        let mut stack = FrameStack::new(3, 2);
        stack.seed(&[1.0, 2.0]);
        assert_eq!(stack.ordered(), vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
        assert_eq!(stack.latest(), &[1.0, 2.0]);
    }

    #[test]
    fn push_evicts_oldest() {
        let mut stack = FrameStack::new(3, 1);
        stack.seed(&[0.0]);
        stack.push(&[1.0]);
        stack.push(&[2.0]);
        stack.push(&[3.0]);
        assert_eq!(stack.ordered(), vec![1.0, 2.0, 3.0]);
        stack.push(&[4.0]);
        assert_eq!(stack.ordered(), vec![2.0, 3.0, 4.0]);
        assert_eq!(stack.latest(), &[4.0]);
    }

    #[test]
    #[should_panic(expected = "frame dimension mismatch")]
    fn wrong_dimension_panics() {
        let mut stack = FrameStack::new(2, 3);
        stack.push(&[1.0]);
    }
}
