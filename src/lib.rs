//! PPO training core for a kart-racing driving agent.
//!
//! Observations are latent vectors from an external learned encoder; the
//! policy/value model is a recurrent actor-critic over a fixed-length window
//! of stacked latents. The crate owns the on-policy trajectory buffer, GAE,
//! the rollout driver and the clipped-surrogate update loop; the simulator,
//! the visual encoder and the telemetry sink are collaborators behind narrow
//! interfaces in [`runtime`].

pub mod config;
pub mod models;
pub mod ppo;
pub mod runtime;
pub mod utils;
