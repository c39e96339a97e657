pub mod buffer;
pub mod filter;
pub mod loss;
pub mod rollout;
pub mod train;
pub mod window;
