//! On-policy trajectory buffer shared by the rollout driver (writer) and the
//! update loop (reader).
//!
//! Layout contract: all per-step arrays are time-major, flat
//! `[time, env, ...]` — `obs` is `[T, N, obs_dim]`, `actions` is
//! `[T, N, act_dim]`, scalars are `[T, N]`. The model boundary is batch-major
//! `[N, F, obs_dim]`; the transpose happens exactly once, when a sampled
//! window is turned into a tensor (see `train::window_to_tensor`).
//!
//! Lifecycle: `reset` -> `save` x T -> `compute_gae` (exactly once; consumes
//! the value array) -> `window_at`/`sample` + `stats`. Violations of this
//! ordering are programming errors and panic.

use rand::Rng;

use crate::ppo::filter::discounted_sum;
use crate::runtime::env::StepInfo;

const NORM_EPS: f32 = 1e-6;

/// Scalar diagnostics retained by `compute_gae`.
#[derive(Clone, Copy, Debug)]
pub struct BufferStats {
    pub mean_reward: f32,
    pub mean_return: f32,
    pub mean_advantage: f32,
    pub mean_value: f32,
    /// `Var(returns - values) / Var(returns)`: the fraction of return
    /// variance the critic fails to capture (0 = perfect critic).
    pub residual_variance: f32,
}

/// One sampled minibatch: a temporally contiguous window of observations for
/// every environment, plus the per-env training targets at the window's
/// final step.
#[derive(Clone, Debug)]
pub struct WindowBatch {
    /// Time-major `[num_frames, num_envs, obs_dim]`.
    pub obs: Vec<f32>,
    /// `[num_envs, act_dim]`.
    pub actions: Vec<f32>,
    /// `[num_envs]`.
    pub log_probs: Vec<f32>,
    /// `[num_envs]`.
    pub returns: Vec<f32>,
    /// `[num_envs]`.
    pub advantages: Vec<f32>,
    pub num_frames: usize,
    pub num_envs: usize,
    pub obs_dim: usize,
    pub act_dim: usize,
}

pub struct TrajectoryBuffer {
    buffer_size: usize,
    num_envs: usize,
    obs_dim: usize,
    act_dim: usize,
    num_frames: usize,
    gamma: f32,
    lam: f32,

    ptr: usize,
    obs: Vec<f32>,
    actions: Vec<f32>,
    rewards: Vec<f32>,
    log_probs: Vec<f32>,
    returns: Vec<f32>,
    advantages: Vec<f32>,
    // buffer_size + 1 rows; the extra row holds the bootstrap value. Taken
    // (and thereby invalidated) by compute_gae.
    values: Option<Vec<f32>>,
    infos: Vec<Vec<StepInfo>>,
    stats: Option<BufferStats>,
}

impl TrajectoryBuffer {
    pub fn new(
        buffer_size: usize,
        num_envs: usize,
        obs_dim: usize,
        act_dim: usize,
        num_frames: usize,
        gamma: f32,
        lam: f32,
    ) -> Self {
        assert!(buffer_size > 0 && num_envs > 0 && obs_dim > 0 && act_dim > 0);
        assert!(num_frames > 0 && num_frames < buffer_size);
        let mut buf = Self {
            buffer_size,
            num_envs,
            obs_dim,
            act_dim,
            num_frames,
            gamma,
            lam,
            ptr: 0,
            obs: Vec::new(),
            actions: Vec::new(),
            rewards: Vec::new(),
            log_probs: Vec::new(),
            returns: Vec::new(),
            advantages: Vec::new(),
            values: None,
            infos: Vec::new(),
            stats: None,
        };
        buf.reset();
        buf
    }

    /// Zero all arrays and rewind the write pointer. Any unread rollout data
    /// is dropped.
    pub fn reset(&mut self) {
        let t = self.buffer_size;
        let n = self.num_envs;
        self.ptr = 0;
        self.obs = vec![0.0; t * n * self.obs_dim];
        self.actions = vec![0.0; t * n * self.act_dim];
        self.rewards = vec![0.0; t * n];
        self.log_probs = vec![0.0; t * n];
        self.returns = vec![0.0; t * n];
        self.advantages = vec![0.0; t * n];
        self.values = Some(vec![0.0; (t + 1) * n]);
        self.infos = Vec::with_capacity(t);
        self.stats = None;
    }

    /// Write one environment step (all N envs at once) into row `ptr`.
    pub fn save(
        &mut self,
        obs: &[f32],
        actions: &[f32],
        rewards: &[f32],
        values: &[f32],
        log_probs: &[f32],
        infos: Vec<StepInfo>,
    ) {
        assert!(
            self.ptr < self.buffer_size,
            "trajectory buffer overflow: save() called with ptr == buffer_size ({})",
            self.buffer_size
        );
        let n = self.num_envs;
        assert_eq!(obs.len(), n * self.obs_dim, "obs shape mismatch");
        assert_eq!(actions.len(), n * self.act_dim, "action shape mismatch");
        assert_eq!(rewards.len(), n, "reward shape mismatch");
        assert_eq!(values.len(), n, "value shape mismatch");
        assert_eq!(log_probs.len(), n, "log_prob shape mismatch");
        assert_eq!(infos.len(), n, "info shape mismatch");

        let row = self.ptr;
        self.obs[row * n * self.obs_dim..(row + 1) * n * self.obs_dim].copy_from_slice(obs);
        self.actions[row * n * self.act_dim..(row + 1) * n * self.act_dim].copy_from_slice(actions);
        self.rewards[row * n..(row + 1) * n].copy_from_slice(rewards);
        self.log_probs[row * n..(row + 1) * n].copy_from_slice(log_probs);
        let value_rows = self
            .values
            .as_mut()
            .expect("save() after compute_gae without reset()");
        value_rows[row * n..(row + 1) * n].copy_from_slice(values);
        self.infos.push(infos);
        self.ptr += 1;
    }

    /// Compute advantages and returns over the collected rows, normalize
    /// advantages per environment column, and retain scalar diagnostics.
    ///
    /// Consumes the value array: values are stale once advantages exist, and
    /// any later read is a bug. Must be called exactly once per rollout.
    pub fn compute_gae(&mut self, bootstrap_values: &[f32]) {
        let n = self.num_envs;
        let t = self.ptr;
        assert!(t > 0, "compute_gae on an empty buffer");
        assert_eq!(bootstrap_values.len(), n, "bootstrap value shape mismatch");

        let mut values = self
            .values
            .take()
            .expect("compute_gae called twice without reset()");
        values[t * n..(t + 1) * n].copy_from_slice(bootstrap_values);

        // delta[t][n] = r[t][n] + gamma * v[t+1][n] - v[t][n]
        let mut deltas = vec![0.0f32; t * n];
        for row in 0..t {
            for env in 0..n {
                let i = row * n + env;
                deltas[i] = self.rewards[i] + self.gamma * values[i + n] - values[i];
            }
        }

        let adv = discounted_sum(&deltas, t, n, self.gamma * self.lam);
        let ret = discounted_sum(&self.rewards[..t * n], t, n, self.gamma);
        self.advantages[..t * n].copy_from_slice(&adv);
        self.returns[..t * n].copy_from_slice(&ret);

        // Normalize each environment column to zero mean / unit std over the
        // collected horizon.
        for env in 0..n {
            let mut mean = 0.0f32;
            for row in 0..t {
                mean += self.advantages[row * n + env];
            }
            mean /= t as f32;
            let mut var = 0.0f32;
            for row in 0..t {
                let d = self.advantages[row * n + env] - mean;
                var += d * d;
            }
            let std = (var / t as f32).sqrt();
            for row in 0..t {
                let a = &mut self.advantages[row * n + env];
                *a = (*a - mean) / (std + NORM_EPS);
            }
        }

        self.stats = Some(Self::diagnostics(
            &self.rewards[..t * n],
            &self.returns[..t * n],
            &self.advantages[..t * n],
            &values[..t * n],
        ));
        // `values` drops here; the +1 bootstrap row dies with it.
    }

    fn diagnostics(rewards: &[f32], returns: &[f32], advantages: &[f32], values: &[f32]) -> BufferStats {
        let len = rewards.len() as f32;
        let mean = |xs: &[f32]| xs.iter().sum::<f32>() / len;
        let var = |xs: &[f32], m: f32| xs.iter().map(|x| (x - m) * (x - m)).sum::<f32>() / len;

        let mean_return = mean(returns);
        let residuals: Vec<f32> = returns.iter().zip(values).map(|(r, v)| r - v).collect();
        let mean_residual = mean(&residuals);
        let var_returns = var(returns, mean_return);
        let residual_variance = var(&residuals, mean_residual) / (var_returns + NORM_EPS);

        BufferStats {
            mean_reward: mean(rewards),
            mean_return,
            mean_advantage: mean(advantages),
            mean_value: mean(values),
            residual_variance,
        }
    }

    /// Whether enough steps exist to form at least one stacked window.
    /// Callers skip training (not an error) when this is false.
    pub fn can_train(&self) -> bool {
        self.ptr > self.num_frames + 1
    }

    pub fn get_ptr(&self) -> usize {
        self.ptr
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Valid sample indices for a full-coverage pass.
    pub fn valid_indices(&self) -> std::ops::Range<usize> {
        self.num_frames..self.ptr
    }

    /// Draw one window batch at a uniformly random index (with replacement).
    pub fn sample(&self, rng: &mut impl Rng) -> WindowBatch {
        assert!(self.can_train(), "sample() without enough collected steps");
        let idx = rng.gen_range(self.num_frames..self.ptr);
        self.window_at(idx)
    }

    /// The window of rows `[idx - num_frames, idx)` across every environment,
    /// with training targets taken at the window's final row. `idx` must lie
    /// in `[num_frames, ptr)`.
    pub fn window_at(&self, idx: usize) -> WindowBatch {
        assert!(
            self.stats.is_some(),
            "window_at() before compute_gae()"
        );
        assert!(
            idx >= self.num_frames && idx < self.ptr,
            "window index {idx} outside [{}, {})",
            self.num_frames,
            self.ptr
        );
        let n = self.num_envs;
        let start = idx - self.num_frames;
        let obs = self.obs[start * n * self.obs_dim..idx * n * self.obs_dim].to_vec();

        // Targets at the newest row actually inside the window.
        let target = idx - 1;
        let actions =
            self.actions[target * n * self.act_dim..(target + 1) * n * self.act_dim].to_vec();
        let log_probs = self.log_probs[target * n..(target + 1) * n].to_vec();
        let returns = self.returns[target * n..(target + 1) * n].to_vec();
        let advantages = self.advantages[target * n..(target + 1) * n].to_vec();

        WindowBatch {
            obs,
            actions,
            log_probs,
            returns,
            advantages,
            num_frames: self.num_frames,
            num_envs: n,
            obs_dim: self.obs_dim,
            act_dim: self.act_dim,
        }
    }

    /// Diagnostics retained by `compute_gae`. Calling this before the
    /// advantages exist is a programming error.
    pub fn stats(&self) -> BufferStats {
        self.stats
            .expect("stats() before compute_gae()")
    }

    /// Auxiliary infos recorded at row `idx`.
    pub fn infos_at(&self, idx: usize) -> &[StepInfo] {
        &self.infos[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn filled_buffer(steps: usize, num_envs: usize, num_frames: usize) -> TrajectoryBuffer {
        let obs_dim = 3;
        let act_dim = 2;
        let mut buf =
            TrajectoryBuffer::new(steps, num_envs, obs_dim, act_dim, num_frames, 0.9, 0.95);
        for t in 0..steps {
            let obs = vec![t as f32; num_envs * obs_dim];
            let actions = vec![0.1; num_envs * act_dim];
            let rewards = vec![1.0; num_envs];
            let values = vec![0.0; num_envs];
            let log_probs = vec![-0.5; num_envs];
            let infos = vec![StepInfo::default(); num_envs];
            buf.save(&obs, &actions, &rewards, &values, &log_probs, infos);
        }
        buf
    }

    #[test]
    fn save_fills_to_capacity() {
        let buf = filled_buffer(6, 2, 2);
        assert_eq!(buf.get_ptr(), 6);
    }

    #[test]
    #[should_panic(expected = "trajectory buffer overflow")]
    fn save_past_capacity_panics() {
        let mut buf = filled_buffer(4, 1, 2);
        buf.save(
            &[0.0; 3],
            &[0.0; 2],
            &[0.0],
            &[0.0],
            &[0.0],
            vec![StepInfo::default()],
        );
    }

    #[test]
    fn gae_constant_reward_single_env() {
        // r = 1, v = 0, T = 3, bootstrap 0: delta[t] = 1 for all t, so the raw
        // advantage is the discounted sum of ones under gamma * lam.
        let mut buf = TrajectoryBuffer::new(8, 1, 3, 2, 2, 0.9, 0.95);
        for _ in 0..3 {
            buf.save(
                &[0.0; 3],
                &[0.0; 2],
                &[1.0],
                &[0.0],
                &[0.0],
                vec![StepInfo::default()],
            );
        }
        buf.compute_gae(&[0.0]);

        // Returns are the gamma-discounted reward-to-go.
        let w = buf.window_at(2);
        assert!((w.returns[0] - 1.9).abs() < 1e-5);

        // Normalized advantages over the column: mean ~0.
        let stats = buf.stats();
        assert!(stats.mean_advantage.abs() < 1e-4);
        assert!((stats.mean_return - (2.71 + 1.9 + 1.0) / 3.0).abs() < 1e-4);
        assert!((stats.mean_reward - 1.0).abs() < 1e-6);
        assert!(stats.mean_value.abs() < 1e-6);
    }

    #[test]
    #[should_panic(expected = "compute_gae called twice")]
    fn second_compute_gae_panics() {
        let mut buf = filled_buffer(5, 1, 2);
        buf.compute_gae(&[0.0]);
        buf.compute_gae(&[0.0]);
    }

    #[test]
    #[should_panic(expected = "before compute_gae")]
    fn stats_before_gae_panics() {
        let buf = filled_buffer(5, 1, 2);
        let _ = buf.stats();
    }

    #[test]
    fn can_train_threshold() {
        // num_frames = 2: need ptr - num_frames - 1 > 0, i.e. ptr >= 4.
        let mut buf = TrajectoryBuffer::new(8, 1, 3, 2, 2, 0.9, 0.95);
        for step in 0..4 {
            assert_eq!(buf.can_train(), step > 3);
            buf.save(
                &[0.0; 3],
                &[0.0; 2],
                &[0.0],
                &[0.0],
                &[0.0],
                vec![StepInfo::default()],
            );
        }
        assert!(buf.can_train());
    }

    #[test]
    fn window_shape_and_bounds() {
        let mut buf = filled_buffer(6, 2, 3);
        buf.compute_gae(&[0.0, 0.0]);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..32 {
            let w = buf.sample(&mut rng);
            assert_eq!(w.num_frames, 3);
            assert_eq!(w.obs.len(), 3 * 2 * 3);
            assert_eq!(w.actions.len(), 2 * 2);
            assert_eq!(w.returns.len(), 2);
        }
        // End index of the observation window is strictly below ptr.
        let last = buf.window_at(buf.get_ptr() - 1);
        // Window rows are [ptr-1-num_frames, ptr-1): newest stored obs row is
        // ptr-2, whose value we stored as the row index at save time.
        let newest = &last.obs[(last.num_frames - 1) * 2 * 3..];
        assert!(newest[0] < buf.get_ptr() as f32);
    }

    #[test]
    fn round_trip_stats_are_finite() {
        let mut buf = filled_buffer(8, 2, 2);
        buf.compute_gae(&[0.5, 0.5]);
        let stats = buf.stats();
        for v in [
            stats.mean_reward,
            stats.mean_return,
            stats.mean_advantage,
            stats.mean_value,
            stats.residual_variance,
        ] {
            assert!(v.is_finite());
        }
    }

    #[test]
    fn reset_allows_fresh_rollout() {
        let mut buf = filled_buffer(5, 1, 2);
        buf.compute_gae(&[0.0]);
        buf.reset();
        assert_eq!(buf.get_ptr(), 0);
        buf.save(
            &[0.0; 3],
            &[0.0; 2],
            &[0.0],
            &[0.0],
            &[0.0],
            vec![StepInfo::default()],
        );
        assert_eq!(buf.get_ptr(), 1);
    }
}
