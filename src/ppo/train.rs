//! Policy update loop and the outer rollout-train cycle.
//!
//! Collection and optimization are strictly sequential phases over the same
//! trajectory buffer: the driver writes, then the update loop reads. Gradient
//! tracking is scoped by module type — rollouts run on `agent.valid()`, the
//! optimizer steps the autodiff module.

use anyhow::Result;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Tensor, TensorData};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::config::{Args, SampleMode};
use crate::models::Agent;
use crate::ppo::buffer::{TrajectoryBuffer, WindowBatch};
use crate::ppo::loss::{compute_ppo_losses, gaussian_entropy, gaussian_log_prob};
use crate::ppo::rollout::RolloutDriver;
use crate::runtime::encoder::{InfoEncoder, StateEncoder};
use crate::runtime::env::{SimulatorGuard, TrackVecEnv, RAW_FRAME_DIM};
use crate::runtime::telemetry::Telemetry;
use crate::utils::checkpointing::{CheckpointConfig, Checkpointer};

pub type TrainBackend = burn::backend::Autodiff<burn::backend::NdArray<f32>>;

/// Train with the default CPU backend.
pub fn run(args: Args) -> Result<()> {
    let device = Default::default();
    run_with::<TrainBackend>(args, device)
}

pub fn run_with<B: AutodiffBackend>(args: Args, device: B::Device) -> Result<()> {
    let _engine = SimulatorGuard::acquire()?;
    let telemetry = Telemetry::new();

    let mut env = TrackVecEnv::new(
        args.num_envs,
        args.track_length,
        args.max_episode_steps,
        args.seed,
    );
    let encoder = StateEncoder::new(args.latent_dim, RAW_FRAME_DIM, args.seed);
    let info_encoder = InfoEncoder::new(args.track_length);
    let obs_dim = args.obs_dim();

    let mut agent = Agent::<B>::new(obs_dim, args.hidden_dim, args.action_dim, &device);
    let mut optim = AdamConfig::new().init::<B, Agent<B>>();
    let checkpointer = Checkpointer::new(CheckpointConfig::from_args(&args))?;

    let mut start_update = 0;
    if let Some(path) = checkpointer.load_path().map(|p| p.to_path_buf()) {
        if let Some(step) = checkpointer.load(&path, &mut agent, &mut optim, &device)? {
            start_update = step + 1;
            info!(category = "MISC", resumed_from = step, "resumed checkpoint");
        }
    }

    let mut buffer = TrajectoryBuffer::new(
        args.buffer_size,
        args.num_envs,
        obs_dim,
        args.action_dim,
        args.num_frames,
        args.gamma,
        args.lam,
    );
    let mut rng = StdRng::seed_from_u64(args.seed);

    info!(
        category = "MISC",
        num_envs = args.num_envs,
        buffer_size = args.buffer_size,
        num_frames = args.num_frames,
        obs_dim,
        "training start"
    );

    for update in start_update..args.num_updates {
        let frozen = agent.valid();
        let mut driver = RolloutDriver::<B::InnerBackend, _, _> {
            env: &mut env,
            encoder: &encoder,
            info_encoder: &info_encoder,
            telemetry: &telemetry,
            device: &device,
            act_dim: args.action_dim,
        };
        driver.rollout(update, &frozen, &mut buffer, args.buffer_size)?;

        if !buffer.can_train() {
            telemetry.log_skipped_update(update, buffer.get_ptr());
            continue;
        }

        run_update(
            update,
            &mut agent,
            &mut optim,
            &buffer,
            &args,
            &telemetry,
            &mut rng,
            &device,
        )?;

        if checkpointer.should_save(update) {
            checkpointer.save(update, &agent, &optim)?;
        }
    }

    Ok(())
}

/// One full PPO optimization pass over the collected rollout: `epochs`
/// epochs of `ptr` minibatch steps, each drawing one window from the buffer.
#[allow(clippy::too_many_arguments)]
pub fn run_update<B: AutodiffBackend>(
    update: usize,
    agent: &mut Agent<B>,
    optim: &mut impl Optimizer<Agent<B>, B>,
    buffer: &TrajectoryBuffer,
    args: &Args,
    telemetry: &Telemetry,
    rng: &mut StdRng,
    device: &B::Device,
) -> Result<()> {
    for epoch in 0..args.epochs {
        let indices: Vec<usize> = match args.sample_mode {
            // Original scheme: independent draws with replacement, one per
            // collected step.
            SampleMode::Random => (0..buffer.get_ptr())
                .map(|_| rng.gen_range(buffer.valid_indices()))
                .collect(),
            // Full-coverage alternative: every valid window once, shuffled.
            SampleMode::Shuffled => {
                let mut all: Vec<usize> = buffer.valid_indices().collect();
                all.shuffle(rng);
                all
            }
        };

        for (step, idx) in indices.into_iter().enumerate() {
            let batch = buffer.window_at(idx);
            let window = window_to_tensor::<B>(&batch, device);
            let out = agent.forward(window);

            let actions = Tensor::<B, 2>::from_data(
                TensorData::new(batch.actions.clone(), [batch.num_envs, batch.act_dim]),
                device,
            );
            let old_lp = Tensor::<B, 1>::from_data(
                TensorData::new(batch.log_probs.clone(), [batch.num_envs]),
                device,
            );
            let advantages = Tensor::<B, 1>::from_data(
                TensorData::new(batch.advantages.clone(), [batch.num_envs]),
                device,
            );
            let returns = Tensor::<B, 1>::from_data(
                TensorData::new(batch.returns.clone(), [batch.num_envs]),
                device,
            );

            let new_lp = gaussian_log_prob(actions, out.mean, out.log_std.clone());
            let entropy = gaussian_entropy(out.log_std);

            let parts = compute_ppo_losses(
                new_lp,
                old_lp,
                advantages,
                entropy,
                out.value,
                returns,
                args.clip_eps,
                args.entropy_beta,
                args.critic_discount,
            );

            let grads = parts.total_loss.backward();
            let grads = GradientsParams::from_grads(grads, agent);
            *agent = optim.step(args.lr, agent.clone(), grads);

            telemetry.log_train(
                update,
                epoch,
                step,
                scalar_of(&parts.actor_loss),
                scalar_of(&parts.critic_loss),
                scalar_of(&parts.entropy_mean),
                scalar_of(&parts.approx_kl),
                scalar_of(&parts.total_loss),
            );
        }
    }
    Ok(())
}

/// Transpose one sampled window from the buffer's time-major layout into the
/// model's batch-major `[num_envs, num_frames, obs_dim]` input.
fn window_to_tensor<B: Backend>(batch: &WindowBatch, device: &B::Device) -> Tensor<B, 3> {
    let (f, n, d) = (batch.num_frames, batch.num_envs, batch.obs_dim);
    assert_eq!(batch.obs.len(), f * n * d, "window layout mismatch");

    let mut flat = vec![0.0f32; f * n * d];
    for frame in 0..f {
        for env in 0..n {
            let src = (frame * n + env) * d;
            let dst = (env * f + frame) * d;
            flat[dst..dst + d].copy_from_slice(&batch.obs[src..src + d]);
        }
    }
    Tensor::from_data(TensorData::new(flat, [n, f, d]), device)
}

fn scalar_of<B: Backend>(tensor: &Tensor<B, 1>) -> f32 {
    tensor
        .clone()
        .to_data()
        .to_vec::<f32>()
        .unwrap_or_default()
        .first()
        .copied()
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::env::VecEnv;

    type B = TrainBackend;

    #[test]
    fn window_transpose_matches_layout_contract() {
        // 2 frames, 2 envs, 1 dim; time-major [t0e0, t0e1, t1e0, t1e1].
        let batch = WindowBatch {
            obs: vec![1.0, 2.0, 3.0, 4.0],
            actions: vec![0.0; 2],
            log_probs: vec![0.0; 2],
            returns: vec![0.0; 2],
            advantages: vec![0.0; 2],
            num_frames: 2,
            num_envs: 2,
            obs_dim: 1,
            act_dim: 1,
        };
        let device = Default::default();
        let tensor = window_to_tensor::<B>(&batch, &device);
        assert_eq!(tensor.dims(), [2, 2, 1]);
        let flat = tensor.to_data().to_vec::<f32>().unwrap();
        // Batch-major: env0 [t0, t1], env1 [t0, t1].
        assert_eq!(flat, vec![1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn rollout_then_update_smoke() {
        let args = Args {
            num_envs: 2,
            buffer_size: 12,
            num_frames: 2,
            epochs: 1,
            latent_dim: 4,
            hidden_dim: 8,
            max_episode_steps: 64,
            track_length: 50.0,
            ..Default::default()
        };
        let device = Default::default();
        let obs_dim = args.obs_dim();

        let mut env = TrackVecEnv::new(args.num_envs, args.track_length, args.max_episode_steps, 5);
        let encoder = StateEncoder::new(args.latent_dim, RAW_FRAME_DIM, 5);
        let info_encoder = InfoEncoder::new(args.track_length);
        let telemetry = Telemetry::new();
        let mut agent = Agent::<B>::new(obs_dim, args.hidden_dim, args.action_dim, &device);
        let mut optim = AdamConfig::new().init::<B, Agent<B>>();
        let mut buffer = TrajectoryBuffer::new(
            args.buffer_size,
            env.num_envs(),
            obs_dim,
            args.action_dim,
            args.num_frames,
            args.gamma,
            args.lam,
        );
        let mut rng = StdRng::seed_from_u64(args.seed);

        let frozen = agent.valid();
        let mut driver = RolloutDriver::<<B as AutodiffBackend>::InnerBackend, _, _> {
            env: &mut env,
            encoder: &encoder,
            info_encoder: &info_encoder,
            telemetry: &telemetry,
            device: &device,
            act_dim: args.action_dim,
        };
        let report = driver
            .rollout(0, &frozen, &mut buffer, args.buffer_size)
            .unwrap();
        assert!(report.steps > 0);

        assert!(buffer.can_train());
        run_update(
            0,
            &mut agent,
            &mut optim,
            &buffer,
            &args,
            &telemetry,
            &mut rng,
            &device,
        )
        .unwrap();
    }
}
