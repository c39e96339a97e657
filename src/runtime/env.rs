//! Vectorized-environment collaborator boundary.
//!
//! The real simulator runs out of process behind this trait; the driver
//! blocks on every `step` until all N instances have returned. The crate
//! ships a small synthetic kart track so the training loop can run and be
//! tested without the external simulator.

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Raw per-env simulator observation (stand-in for a rendered frame).
pub type Frame = Vec<f32>;

/// Feature count of a raw synthetic-track frame.
pub const RAW_FRAME_DIM: usize = 6;

/// Structured per-step auxiliary record. Replaces the simulator's loose
/// dict payload with a fixed schema validated at the encoder boundary.
#[derive(Clone, Copy, Debug, Default)]
pub struct StepInfo {
    pub velocity: f32,
    pub overall_distance: f32,
    pub done: bool,
}

/// Out-of-band per-env episode diagnostics (the `env_method` query surface).
#[derive(Clone, Debug)]
pub struct EpisodeSummary {
    pub env_index: usize,
    pub steps: usize,
    pub overall_distance: f32,
    pub finished: bool,
}

/// Result of one synchronous vectorized step.
pub struct StepBatch {
    pub frames: Vec<Frame>,
    pub rewards: Vec<f32>,
    pub dones: Vec<bool>,
    pub infos: Vec<StepInfo>,
}

/// N parallel simulator instances stepped in lockstep.
///
/// Errors from the simulator are fatal for the run; early `done` is a normal
/// outcome, not an error.
pub trait VecEnv {
    fn num_envs(&self) -> usize;
    fn reset(&mut self) -> Result<Vec<Frame>>;
    /// `actions` is batch-major `[num_envs, act_dim]`, flat.
    fn step(&mut self, actions: &[f32]) -> Result<StepBatch>;
    fn episode_summaries(&self) -> Vec<EpisodeSummary>;
}

static ENGINE_HELD: AtomicBool = AtomicBool::new(false);

/// Scoped handle over the simulator engine's global init/cleanup state.
///
/// The engine singleton tolerates exactly one live session per process;
/// acquiring twice is a setup error. Release happens on every exit path
/// through `Drop`.
pub struct SimulatorGuard {
    _private: (),
}

impl SimulatorGuard {
    pub fn acquire() -> Result<Self> {
        if ENGINE_HELD.swap(true, Ordering::SeqCst) {
            bail!("simulator engine is already initialized in this process");
        }
        debug!(category = "SIM", "engine session acquired");
        Ok(Self { _private: () })
    }
}

impl Drop for SimulatorGuard {
    fn drop(&mut self) {
        ENGINE_HELD.store(false, Ordering::SeqCst);
        debug!(category = "SIM", "engine session released");
    }
}

/// Per-kart kinematic state of the synthetic track.
#[derive(Clone, Copy, Debug, Default)]
struct KartState {
    distance: f32,
    velocity: f32,
    lateral: f32,
    heading: f32,
    steps: usize,
    done: bool,
}

/// Minimal kinematic kart track: actions are `[steer, accel, brake]` per
/// kart, reward is track progress minus an off-center penalty, episodes end
/// at the finish line or the step cap. Deterministic under a seed.
pub struct TrackVecEnv {
    karts: Vec<KartState>,
    num_envs: usize,
    track_length: f32,
    max_episode_steps: usize,
    rng: StdRng,
}

const DT: f32 = 0.1;
const MAX_SPEED: f32 = 25.0;
const ACCEL_GAIN: f32 = 8.0;
const BRAKE_GAIN: f32 = 12.0;
const DRAG: f32 = 0.35;
const STEER_GAIN: f32 = 1.5;
const LATERAL_LIMIT: f32 = 4.0;

impl TrackVecEnv {
    pub fn new(num_envs: usize, track_length: f32, max_episode_steps: usize, seed: u64) -> Self {
        assert!(num_envs > 0, "need at least one environment");
        assert!(track_length > 0.0);
        Self {
            karts: vec![KartState::default(); num_envs],
            num_envs,
            track_length,
            max_episode_steps,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn frame_of(&self, kart: &KartState) -> Frame {
        // Curvature ahead of the kart, a crude proxy for what the camera sees.
        let curve = (kart.distance * 0.05).sin();
        let next_curve = ((kart.distance + 10.0) * 0.05).sin();
        vec![
            kart.distance / self.track_length,
            kart.velocity / MAX_SPEED,
            kart.lateral / LATERAL_LIMIT,
            kart.heading,
            curve,
            next_curve,
        ]
    }

    fn info_of(kart: &KartState) -> StepInfo {
        StepInfo {
            velocity: kart.velocity,
            overall_distance: kart.distance,
            done: kart.done,
        }
    }
}

impl VecEnv for TrackVecEnv {
    fn num_envs(&self) -> usize {
        self.num_envs
    }

    fn reset(&mut self) -> Result<Vec<Frame>> {
        for kart in &mut self.karts {
            *kart = KartState::default();
        }
        Ok(self.karts.iter().map(|k| self.frame_of(k)).collect())
    }

    fn step(&mut self, actions: &[f32]) -> Result<StepBatch> {
        if actions.len() != self.num_envs * 3 {
            bail!(
                "action batch has {} values, expected {} (num_envs * 3)",
                actions.len(),
                self.num_envs * 3
            );
        }

        let mut frames = Vec::with_capacity(self.num_envs);
        let mut rewards = Vec::with_capacity(self.num_envs);
        let mut dones = Vec::with_capacity(self.num_envs);
        let mut infos = Vec::with_capacity(self.num_envs);

        for (idx, kart) in self.karts.iter_mut().enumerate() {
            let steer = actions[idx * 3].clamp(-1.0, 1.0);
            let accel = actions[idx * 3 + 1].clamp(0.0, 1.0);
            let brake = actions[idx * 3 + 2].clamp(0.0, 1.0);

            let prev_distance = kart.distance;
            if !kart.done {
                let noise: f32 = self.rng.gen_range(-0.05..0.05);
                kart.velocity += (accel * ACCEL_GAIN - brake * BRAKE_GAIN - DRAG * kart.velocity)
                    * DT
                    + noise;
                kart.velocity = kart.velocity.clamp(0.0, MAX_SPEED);
                kart.heading = (kart.heading + steer * STEER_GAIN * DT).clamp(-1.5, 1.5);
                kart.lateral =
                    (kart.lateral + kart.heading * kart.velocity * DT).clamp(-LATERAL_LIMIT, LATERAL_LIMIT);
                kart.distance += kart.velocity * kart.heading.cos() * DT;
                kart.steps += 1;
                kart.done =
                    kart.distance >= self.track_length || kart.steps >= self.max_episode_steps;
            }

            let progress = kart.distance - prev_distance;
            let off_center = (kart.lateral / LATERAL_LIMIT).abs();
            rewards.push(progress - 0.1 * off_center);
            dones.push(kart.done);
            infos.push(Self::info_of(kart));
        }

        for kart in &self.karts {
            frames.push(self.frame_of(kart));
        }

        Ok(StepBatch {
            frames,
            rewards,
            dones,
            infos,
        })
    }

    fn episode_summaries(&self) -> Vec<EpisodeSummary> {
        self.karts
            .iter()
            .enumerate()
            .map(|(env_index, kart)| EpisodeSummary {
                env_index,
                steps: kart.steps,
                overall_distance: kart.distance,
                finished: kart.done && kart.distance >= self.track_length,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_is_exclusive_and_released_on_drop() {
        let first = SimulatorGuard::acquire().unwrap();
        assert!(SimulatorGuard::acquire().is_err());
        drop(first);
        let _second = SimulatorGuard::acquire().unwrap();
    }

    #[test]
    fn step_is_deterministic_under_seed() {
        let mut a = TrackVecEnv::new(2, 100.0, 50, 42);
        let mut b = TrackVecEnv::new(2, 100.0, 50, 42);
        a.reset().unwrap();
        b.reset().unwrap();
        let actions = vec![0.1, 0.8, 0.0, -0.2, 0.5, 0.0];
        let sa = a.step(&actions).unwrap();
        let sb = b.step(&actions).unwrap();
        assert_eq!(sa.rewards, sb.rewards);
        assert_eq!(sa.frames, sb.frames);
    }

    #[test]
    fn full_throttle_eventually_finishes() {
        let mut env = TrackVecEnv::new(1, 20.0, 500, 0);
        env.reset().unwrap();
        let actions = vec![0.0, 1.0, 0.0];
        let mut done = false;
        for _ in 0..500 {
            let batch = env.step(&actions).unwrap();
            if batch.dones[0] {
                done = true;
                break;
            }
        }
        assert!(done);
        let summary = &env.episode_summaries()[0];
        assert!(summary.finished);
        assert!(summary.overall_distance >= 20.0);
    }

    #[test]
    fn wrong_action_batch_size_is_an_error() {
        let mut env = TrackVecEnv::new(2, 100.0, 50, 0);
        env.reset().unwrap();
        assert!(env.step(&[0.0; 3]).is_err());
    }
}
