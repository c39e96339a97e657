use burn::module::{Module, Param};
use burn::nn::{Initializer, Linear, LinearConfig, Lstm, LstmConfig};
use burn::tensor::activation::tanh;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Policy/value output for one batch of stacked-latent windows.
///
/// `mean` and `log_std` parameterize a diagonal Gaussian over the action
/// vector; `value` is the critic's scalar estimate per batch element.
pub struct PolicyOutput<Bk: Backend> {
    pub mean: Tensor<Bk, 2>,
    pub log_std: Tensor<Bk, 2>,
    pub value: Tensor<Bk, 1>,
}

/// Recurrent actor-critic over a window of latent observations.
///
/// Input layout contract: `[batch, num_frames, obs_dim]` (batch-major). The
/// LSTM consumes the window; both heads read the final hidden state. The
/// policy log-std is state-independent and learned.
#[derive(Module, Debug)]
pub struct Agent<B: Backend> {
    torso: Lstm<B>,
    policy_mean: Linear<B>,
    value_head: Linear<B>,
    log_std: Param<Tensor<B, 1>>,
}

impl<Bk: Backend> Agent<Bk> {
    pub fn new(obs_dim: usize, hidden: usize, action_dim: usize, device: &Bk::Device) -> Self {
        let torso = LstmConfig::new(obs_dim, hidden, true).init(device);
        let policy_mean = LinearConfig::new(hidden, action_dim).init(device);
        let value_head = LinearConfig::new(hidden, 1).init(device);
        let log_std = Initializer::Zeros.init([action_dim], device);
        Self {
            torso,
            policy_mean,
            value_head,
            log_std,
        }
    }

    pub fn forward(&self, window: Tensor<Bk, 3>) -> PolicyOutput<Bk> {
        let (hidden_seq, _state) = self.torso.forward(window, None);
        let [batch, seq, hidden] = hidden_seq.dims();
        let last = hidden_seq
            .slice([0..batch, seq - 1..seq, 0..hidden])
            .reshape([batch, hidden]);

        // Actions are bounded control inputs; squash the mean.
        let mean = tanh(self.policy_mean.forward(last.clone()));
        let value = self.value_head.forward(last).reshape([batch]);
        let action_dim = self.log_std.val().dims()[0];
        let log_std = self
            .log_std
            .val()
            .unsqueeze::<2>()
            .expand([batch, action_dim]);

        PolicyOutput {
            mean,
            log_std,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type B = NdArray<f32>;

    #[test]
    fn forward_shapes() {
        let device = Default::default();
        let agent = Agent::<B>::new(10, 16, 3, &device);
        let window = Tensor::<B, 3>::random([4, 5, 10], Distribution::Default, &device);
        let out = agent.forward(window);
        assert_eq!(out.mean.dims(), [4, 3]);
        assert_eq!(out.log_std.dims(), [4, 3]);
        assert_eq!(out.value.dims(), [4]);
    }

    #[test]
    fn mean_is_bounded() {
        let device = Default::default();
        let agent = Agent::<B>::new(6, 8, 3, &device);
        let window = Tensor::<B, 3>::random([2, 3, 6], Distribution::Normal(0.0, 10.0), &device);
        let out = agent.forward(window);
        let mean = out.mean.to_data().to_vec::<f32>().unwrap();
        assert!(mean.iter().all(|m| (-1.0..=1.0).contains(m)));
    }
}
