//! Rollout driver: steps the vectorized simulator under a frozen policy and
//! fills the trajectory buffer.
//!
//! One rollout is Init -> Stepping (up to `buffer_size` times) -> Terminal.
//! The terminal transition happens either at the horizon or as soon as any
//! environment reports done; a short rollout is a normal outcome. All policy
//! queries here run on the non-autodiff module, so no gradient state is
//! tracked during collection.

use anyhow::{anyhow, Result};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

use crate::models::Agent;
use crate::ppo::buffer::{BufferStats, TrajectoryBuffer};
use crate::ppo::loss::sample_gaussian;
use crate::ppo::window::FrameStack;
use crate::runtime::encoder::{encode_observation, InfoEncoder, LatentEncoder};
use crate::runtime::env::{EpisodeSummary, StepInfo, VecEnv};
use crate::runtime::telemetry::Telemetry;

pub struct RolloutReport {
    pub steps: usize,
    pub stats: BufferStats,
    pub summaries: Vec<EpisodeSummary>,
}

pub struct RolloutDriver<'a, B: Backend, E: VecEnv, L: LatentEncoder> {
    pub env: &'a mut E,
    pub encoder: &'a L,
    pub info_encoder: &'a InfoEncoder,
    pub telemetry: &'a Telemetry,
    pub device: &'a B::Device,
    pub act_dim: usize,
}

impl<'a, B: Backend, E: VecEnv, L: LatentEncoder> RolloutDriver<'a, B, E, L> {
    /// Run one rollout under `agent`, filling `buffer` and computing GAE.
    pub fn rollout(
        &mut self,
        update: usize,
        agent: &Agent<B>,
        buffer: &mut TrajectoryBuffer,
        buffer_size: usize,
    ) -> Result<RolloutReport> {
        let num_envs = self.env.num_envs();
        let obs_dim = self.encoder.latent_dim() + crate::runtime::encoder::INFO_DIM;

        buffer.reset();

        // Init: reset all envs, seed each window with the first encoded frame.
        let frames = self.env.reset()?;
        let mut infos = vec![StepInfo::default(); num_envs];
        let mut windows: Vec<FrameStack> = frames
            .iter()
            .zip(&infos)
            .map(|(frame, info)| {
                let mut stack = FrameStack::new(buffer.num_frames(), obs_dim);
                stack.seed(&encode_observation(
                    self.encoder,
                    self.info_encoder,
                    frame,
                    info,
                ));
                stack
            })
            .collect();

        let mut steps = 0usize;
        for step in 0..buffer_size {
            let window_tensor = self.windows_to_tensor(&windows, num_envs, obs_dim, buffer.num_frames());
            let out = agent.forward(window_tensor);
            let (action_tensor, log_prob_tensor) = sample_gaussian(out.mean, out.log_std);

            let actions = to_floats(action_tensor)?;
            assert_eq!(
                actions.len(),
                num_envs * self.act_dim,
                "action layout mismatch at the model/env boundary"
            );
            let log_probs = to_floats(log_prob_tensor)?;
            let values = to_floats(out.value)?;

            let batch = self.env.step(&actions)?;

            // The saved observation is the newest frame of the pre-step
            // window: the one the sampled action was conditioned on.
            let mut current_obs = Vec::with_capacity(num_envs * obs_dim);
            for window in &windows {
                current_obs.extend_from_slice(window.latest());
            }

            buffer.save(
                &current_obs,
                &actions,
                &batch.rewards,
                &values,
                &log_probs,
                infos.clone(),
            );
            steps = step + 1;

            let mean_reward = batch.rewards.iter().sum::<f32>() / num_envs as f32;
            let mean_value = values.iter().sum::<f32>() / num_envs as f32;
            self.telemetry
                .log_rollout_step(update, step, mean_reward, mean_value);

            infos = batch.infos;
            for (window, (frame, info)) in windows.iter_mut().zip(batch.frames.iter().zip(&infos)) {
                window.push(&encode_observation(
                    self.encoder,
                    self.info_encoder,
                    frame,
                    info,
                ));
            }

            if batch.dones.iter().any(|d| *d) {
                break;
            }
        }

        // Terminal: one more policy query for the bootstrap value of the
        // state past the horizon.
        let window_tensor = self.windows_to_tensor(&windows, num_envs, obs_dim, buffer.num_frames());
        let out = agent.forward(window_tensor);
        let bootstrap = to_floats(out.value)?;
        buffer.compute_gae(&bootstrap);

        let stats = buffer.stats();
        let summaries = self.env.episode_summaries();
        self.telemetry.log_rollout(update, steps, &stats, &summaries);

        Ok(RolloutReport {
            steps,
            stats,
            summaries,
        })
    }

    /// Assemble the batch-major `[num_envs, num_frames, obs_dim]` model input
    /// from the per-env sliding windows.
    fn windows_to_tensor(
        &self,
        windows: &[FrameStack],
        num_envs: usize,
        obs_dim: usize,
        num_frames: usize,
    ) -> Tensor<B, 3> {
        let mut flat = Vec::with_capacity(num_envs * num_frames * obs_dim);
        for window in windows {
            flat.extend(window.ordered());
        }
        Tensor::from_data(
            TensorData::new(flat, [num_envs, num_frames, obs_dim]),
            self.device,
        )
    }
}

fn to_floats<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .to_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("tensor readback failed: {e:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::encoder::StateEncoder;
    use crate::runtime::env::{TrackVecEnv, RAW_FRAME_DIM};
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    fn driver_parts() -> (TrackVecEnv, StateEncoder, InfoEncoder, Telemetry) {
        (
            TrackVecEnv::new(2, 50.0, 30, 1),
            StateEncoder::new(8, RAW_FRAME_DIM, 0),
            InfoEncoder::new(50.0),
            Telemetry::new(),
        )
    }

    #[test]
    fn rollout_fills_buffer_and_computes_gae() {
        let (mut env, encoder, info_encoder, telemetry) = driver_parts();
        let device = Default::default();
        let obs_dim = 8 + crate::runtime::encoder::INFO_DIM;
        let agent = Agent::<B>::new(obs_dim, 16, 3, &device);
        let mut buffer = TrajectoryBuffer::new(16, 2, obs_dim, 3, 2, 0.9, 0.95);

        let mut driver = RolloutDriver::<B, _, _> {
            env: &mut env,
            encoder: &encoder,
            info_encoder: &info_encoder,
            telemetry: &telemetry,
            device: &device,
            act_dim: 3,
        };
        let report = driver.rollout(0, &agent, &mut buffer, 16).unwrap();

        assert!(report.steps > 0);
        assert_eq!(report.steps, buffer.get_ptr());
        assert_eq!(report.summaries.len(), 2);
        assert!(report.stats.mean_reward.is_finite());
    }

    #[test]
    fn early_termination_leaves_short_buffer() {
        // Step cap of 5 forces done long before the 64-step horizon.
        let mut env = TrackVecEnv::new(1, 1000.0, 5, 3);
        let encoder = StateEncoder::new(8, RAW_FRAME_DIM, 0);
        let info_encoder = InfoEncoder::new(1000.0);
        let telemetry = Telemetry::new();
        let device = Default::default();
        let obs_dim = 8 + crate::runtime::encoder::INFO_DIM;
        let agent = Agent::<B>::new(obs_dim, 16, 3, &device);
        let mut buffer = TrajectoryBuffer::new(64, 1, obs_dim, 3, 2, 0.9, 0.95);

        let mut driver = RolloutDriver::<B, _, _> {
            env: &mut env,
            encoder: &encoder,
            info_encoder: &info_encoder,
            telemetry: &telemetry,
            device: &device,
            act_dim: 3,
        };
        let report = driver.rollout(0, &agent, &mut buffer, 64).unwrap();
        assert_eq!(report.steps, 5);
        assert_eq!(buffer.get_ptr(), 5);
    }
}
