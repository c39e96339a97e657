//! Observation-encoding collaborators.
//!
//! The production encoder is a separately trained VQ-VAE over rendered
//! image/depth/segmentation channels; this crate only depends on its
//! `encode` surface. `StateEncoder` is the in-crate stand-in: a fixed random
//! projection of raw simulator features into the latent dimension.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::runtime::env::StepInfo;

/// Dimension of the encoded auxiliary-info vector appended to every latent.
pub const INFO_DIM: usize = 3;

/// Maps one raw simulator frame into a fixed-dimension latent vector.
pub trait LatentEncoder {
    fn latent_dim(&self) -> usize;
    fn encode(&self, frame: &[f32]) -> Vec<f32>;
}

/// Frozen random-projection encoder: `tanh(W x)` with `W` drawn once from a
/// seeded RNG, so encodings are deterministic across runs.
pub struct StateEncoder {
    weights: Vec<f32>,
    latent_dim: usize,
    frame_dim: usize,
}

impl StateEncoder {
    pub fn new(latent_dim: usize, frame_dim: usize, seed: u64) -> Self {
        assert!(latent_dim > 0 && frame_dim > 0);
        let mut rng = StdRng::seed_from_u64(seed);
        let scale = (1.0 / frame_dim as f32).sqrt();
        let weights = (0..latent_dim * frame_dim)
            .map(|_| rng.gen_range(-scale..scale))
            .collect();
        Self {
            weights,
            latent_dim,
            frame_dim,
        }
    }
}

impl LatentEncoder for StateEncoder {
    fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    fn encode(&self, frame: &[f32]) -> Vec<f32> {
        assert_eq!(frame.len(), self.frame_dim, "raw frame dimension mismatch");
        let mut out = Vec::with_capacity(self.latent_dim);
        for row in 0..self.latent_dim {
            let w = &self.weights[row * self.frame_dim..(row + 1) * self.frame_dim];
            let dot: f32 = w.iter().zip(frame).map(|(a, b)| a * b).sum();
            out.push(dot.tanh());
        }
        out
    }
}

/// Encodes the structured per-step info record into a fixed-size numeric
/// vector. Validates the record at the boundary: non-finite fields mean the
/// simulator transport is corrupted and the run cannot continue.
pub struct InfoEncoder {
    track_length: f32,
}

impl InfoEncoder {
    pub fn new(track_length: f32) -> Self {
        assert!(track_length > 0.0);
        Self { track_length }
    }

    pub fn encode(&self, info: &StepInfo) -> [f32; INFO_DIM] {
        assert!(
            info.velocity.is_finite() && info.overall_distance.is_finite(),
            "non-finite step info from simulator: {info:?}"
        );
        [
            info.velocity / 25.0,
            info.overall_distance / self.track_length,
            if info.done { 1.0 } else { 0.0 },
        ]
    }
}

/// One full per-step observation: the frame latent with the info vector
/// appended. This is the `obs_dim` the buffer and model see.
pub fn encode_observation(
    encoder: &impl LatentEncoder,
    info_encoder: &InfoEncoder,
    frame: &[f32],
    info: &StepInfo,
) -> Vec<f32> {
    let mut obs = encoder.encode(frame);
    obs.extend_from_slice(&info_encoder.encode(info));
    obs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_is_deterministic_and_sized() {
        let a = StateEncoder::new(16, 6, 3);
        let b = StateEncoder::new(16, 6, 3);
        let frame = vec![0.5, -0.2, 0.0, 1.0, 0.3, -0.7];
        assert_eq!(a.encode(&frame), b.encode(&frame));
        assert_eq!(a.encode(&frame).len(), 16);
    }

    #[test]
    fn observation_concatenates_latent_and_info() {
        let enc = StateEncoder::new(8, 6, 0);
        let info_enc = InfoEncoder::new(200.0);
        let info = StepInfo {
            velocity: 12.5,
            overall_distance: 100.0,
            done: true,
        };
        let obs = encode_observation(&enc, &info_enc, &[0.0; 6], &info);
        assert_eq!(obs.len(), 8 + INFO_DIM);
        assert_eq!(obs[8], 0.5);
        assert_eq!(obs[9], 0.5);
        assert_eq!(obs[10], 1.0);
    }

    #[test]
    #[should_panic(expected = "non-finite step info")]
    fn corrupt_info_panics_at_boundary() {
        let info_enc = InfoEncoder::new(200.0);
        let info = StepInfo {
            velocity: f32::NAN,
            ..Default::default()
        };
        let _ = info_enc.encode(&info);
    }
}
