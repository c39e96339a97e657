//! Scalar telemetry sink. Fire-and-forget: every method emits one structured
//! tracing event and never fails the training loop.

use tracing::{debug, info};

use crate::ppo::buffer::BufferStats;
use crate::runtime::env::EpisodeSummary;

#[derive(Debug, Default)]
pub struct Telemetry;

impl Telemetry {
    pub fn new() -> Self {
        Self
    }

    pub fn log_rollout_step(&self, update: usize, step: usize, mean_reward: f32, mean_value: f32) {
        debug!(
            category = "ROLLOUT",
            update,
            step,
            mean_reward,
            mean_value,
            "step"
        );
    }

    pub fn log_rollout(
        &self,
        update: usize,
        steps: usize,
        stats: &BufferStats,
        summaries: &[EpisodeSummary],
    ) {
        info!(
            category = "ROLLOUT",
            update,
            steps,
            mean_reward = stats.mean_reward,
            mean_return = stats.mean_return,
            mean_value = stats.mean_value,
            residual_variance = stats.residual_variance,
            "rollout complete"
        );
        for summary in summaries {
            info!(
                category = "ROLLOUT",
                update,
                env = summary.env_index,
                episode_steps = summary.steps,
                overall_distance = summary.overall_distance,
                finished = summary.finished,
                "episode"
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_train(
        &self,
        update: usize,
        epoch: usize,
        step: usize,
        actor_loss: f32,
        critic_loss: f32,
        entropy: f32,
        approx_kl: f32,
        total_loss: f32,
    ) {
        debug!(
            category = "TRAINER",
            update,
            epoch,
            step,
            actor_loss,
            critic_loss,
            entropy,
            approx_kl,
            total_loss,
            "minibatch"
        );
    }

    pub fn log_skipped_update(&self, update: usize, ptr: usize) {
        info!(
            category = "TRAINER",
            update,
            collected_steps = ptr,
            "rollout too short to train, skipping update"
        );
    }
}
