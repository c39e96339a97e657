//! PPO loss terms and diagonal-Gaussian policy math.
//!
//! Conventions fixed here: the clip bounds are `(1 - eps, 1 + eps)`, and the
//! entropy bonus is subtracted from the total loss so that entropy is
//! maximized.

use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Tensor};

const LOG_STD_MIN: f32 = -20.0;
const LOG_STD_MAX: f32 = 2.0;

/// Sample actions from a diagonal Gaussian and return their log-probs.
///
/// `mean`, `log_std`: `[batch, action_dim]`; log-probs are summed over
/// action dimensions to `[batch]`.
pub fn sample_gaussian<B: Backend>(
    mean: Tensor<B, 2>,
    log_std: Tensor<B, 2>,
) -> (Tensor<B, 2>, Tensor<B, 1>) {
    let device = mean.device();
    let dims = mean.dims();
    let log_std = log_std.clamp(LOG_STD_MIN, LOG_STD_MAX);
    let std = log_std.clone().exp();

    let noise: Tensor<B, 2> = Tensor::random(dims, Distribution::Normal(0.0, 1.0), &device);
    let actions = mean + std * noise.clone();

    let log_2pi = (2.0 * std::f32::consts::PI).ln();
    let per_dim: Tensor<B, 2> = noise.powf_scalar(2.0).mul_scalar(-0.5) - log_std - 0.5 * log_2pi;
    let log_probs: Tensor<B, 1> = per_dim.sum_dim(1).squeeze(1);

    (actions, log_probs)
}

/// Log-probability of given actions under a diagonal Gaussian, `[batch]`.
pub fn gaussian_log_prob<B: Backend>(
    actions: Tensor<B, 2>,
    mean: Tensor<B, 2>,
    log_std: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let log_std = log_std.clamp(LOG_STD_MIN, LOG_STD_MAX);
    let std = log_std.clone().exp();
    let normalized = (actions - mean) / std;

    let log_2pi = (2.0 * std::f32::consts::PI).ln();
    let per_dim: Tensor<B, 2> =
        normalized.powf_scalar(2.0).mul_scalar(-0.5) - log_std - 0.5 * log_2pi;
    per_dim.sum_dim(1).squeeze(1)
}

/// Analytical entropy of a diagonal Gaussian, `[batch]`.
pub fn gaussian_entropy<B: Backend>(log_std: Tensor<B, 2>) -> Tensor<B, 1> {
    let log_std = log_std.clamp(LOG_STD_MIN, LOG_STD_MAX);
    let half_log_2pi_e = 0.5 * (1.0 + (2.0 * std::f32::consts::PI).ln());
    let per_dim = log_std.add_scalar(half_log_2pi_e);
    per_dim.sum_dim(1).squeeze(1)
}

pub struct PpoLossParts<B: Backend> {
    pub actor_loss: Tensor<B, 1>,
    pub critic_loss: Tensor<B, 1>,
    pub entropy_mean: Tensor<B, 1>,
    /// Reported only; updates are never gated on it.
    pub approx_kl: Tensor<B, 1>,
    pub total_loss: Tensor<B, 1>,
}

/// Clipped-surrogate PPO objective with critic MSE and entropy bonus.
///
/// `min(ratio * adv, clamp(ratio, 1-eps, 1+eps) * adv)` caps how far one
/// minibatch can move the policy; the clamp is symmetric around 1 regardless
/// of the advantage sign.
#[allow(clippy::too_many_arguments)]
pub fn compute_ppo_losses<B: Backend>(
    logp_new: Tensor<B, 1>,
    logp_old: Tensor<B, 1>,
    advantages: Tensor<B, 1>,
    entropy: Tensor<B, 1>,
    value_new: Tensor<B, 1>,
    returns: Tensor<B, 1>,
    clip_eps: f32,
    entropy_beta: f32,
    critic_discount: f32,
) -> PpoLossParts<B> {
    let ratio = (logp_new.clone() - logp_old.clone()).exp();
    let surr1 = ratio.clone() * advantages.clone();
    let surr2 = ratio.clamp(1.0 - clip_eps, 1.0 + clip_eps) * advantages;

    let actor_loss = surr1.min_pair(surr2).mean().neg();
    let critic_loss = (value_new - returns)
        .powf_scalar(2.0)
        .mean()
        .mul_scalar(critic_discount);
    let entropy_mean = entropy.mean();
    let approx_kl = (logp_old - logp_new).mean();

    let total_loss =
        actor_loss.clone() + critic_loss.clone() - entropy_mean.clone().mul_scalar(entropy_beta);

    PpoLossParts {
        actor_loss,
        critic_loss,
        entropy_mean,
        approx_kl,
        total_loss,
    }
}
