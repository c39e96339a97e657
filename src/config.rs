use anyhow::{Context, Result};
use clap::{parser::ValueSource, ArgMatches, CommandFactory, Parser, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// How the update loop draws minibatch windows from the trajectory buffer.
#[derive(Copy, Clone, Debug, ValueEnum, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SampleMode {
    /// Independent uniform draws with replacement (no epoch-coverage guarantee).
    Random,
    /// Shuffled pass over every valid window index once per epoch.
    Shuffled,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "stk_ppo")]
pub struct Args {
    /// Optional YAML config file path.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of parallel simulator instances.
    #[arg(long, default_value_t = 8)]
    pub num_envs: usize,

    /// Rollout horizon (T): max transitions stored per env before training.
    #[arg(long, default_value_t = 512)]
    pub buffer_size: usize,

    /// Temporal window length fed to the recurrent model.
    #[arg(long, default_value_t = 4)]
    pub num_frames: usize,

    /// Total rollout-train cycles.
    #[arg(long, default_value_t = 500)]
    pub num_updates: usize,

    /// PPO epochs per update
    #[arg(long, default_value_t = 2)]
    pub epochs: usize,

    /// Discount gamma
    #[arg(long, default_value_t = 0.9)]
    pub gamma: f32,

    /// GAE lambda
    #[arg(long, default_value_t = 0.95)]
    pub lam: f32,

    /// PPO clip epsilon
    #[arg(long, default_value_t = 0.2)]
    pub clip_eps: f32,

    /// Entropy bonus coefficient (subtracted from total loss)
    #[arg(long, default_value_t = 0.2)]
    pub entropy_beta: f32,

    /// Critic loss coefficient
    #[arg(long, default_value_t = 0.5)]
    pub critic_discount: f32,

    /// Adam learning rate
    #[arg(long, default_value_t = 1e-4)]
    pub lr: f64,

    /// Minibatch sampling strategy over the trajectory buffer
    #[arg(long, value_enum, default_value_t = SampleMode::Random)]
    pub sample_mode: SampleMode,

    /// Latent observation dimension produced by the visual encoder
    #[arg(long, default_value_t = 64)]
    pub latent_dim: usize,

    /// Action vector dimension (steer, accel, brake)
    #[arg(long, default_value_t = 3)]
    pub action_dim: usize,

    /// LSTM hidden dimension
    #[arg(long, default_value_t = 256)]
    pub hidden_dim: usize,

    /// RNG seed
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Track length of the built-in synthetic environment
    #[arg(long, default_value_t = 200.0)]
    pub track_length: f32,

    /// Episode step cap of the built-in synthetic environment
    #[arg(long, default_value_t = 1000)]
    pub max_episode_steps: usize,

    /// Directory for checkpoint run folders.
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_save_dir: PathBuf,

    /// Save a checkpoint every N updates (0 disables saving).
    #[arg(long, default_value_t = 50)]
    pub checkpoint_save_interval: usize,

    /// Path to an agent .mpk checkpoint to resume from.
    #[arg(long)]
    pub checkpoint_load_path: Option<PathBuf>,

    /// Keep only the newest N checkpoint step directories.
    #[arg(long)]
    pub checkpoint_keep_last_n: Option<usize>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: None,
            num_envs: 8,
            buffer_size: 512,
            num_frames: 4,
            num_updates: 500,
            epochs: 2,
            gamma: 0.9,
            lam: 0.95,
            clip_eps: 0.2,
            entropy_beta: 0.2,
            critic_discount: 0.5,
            lr: 1e-4,
            sample_mode: SampleMode::Random,
            latent_dim: 64,
            action_dim: 3,
            hidden_dim: 256,
            seed: 0,
            track_length: 200.0,
            max_episode_steps: 1000,
            checkpoint_save_dir: PathBuf::from("checkpoints"),
            checkpoint_save_interval: 50,
            checkpoint_load_path: None,
            checkpoint_keep_last_n: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    environment: EnvironmentConfig,
    ppo_core: PpoCoreConfig,
    optimization: OptimizationConfig,
    architecture: ArchitectureConfig,
    checkpointing: CheckpointingConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct EnvironmentConfig {
    num_envs: Option<usize>,
    track_length: Option<f32>,
    max_episode_steps: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct PpoCoreConfig {
    buffer_size: Option<usize>,
    num_frames: Option<usize>,
    num_updates: Option<usize>,
    epochs: Option<usize>,
    gamma: Option<f32>,
    lam: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct OptimizationConfig {
    lr: Option<f64>,
    clip_eps: Option<f32>,
    entropy_beta: Option<f32>,
    critic_discount: Option<f32>,
    sample_mode: Option<SampleMode>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct ArchitectureConfig {
    latent_dim: Option<usize>,
    action_dim: Option<usize>,
    hidden_dim: Option<usize>,
    seed: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct CheckpointingConfig {
    save_dir: Option<PathBuf>,
    save_interval: Option<usize>,
    load_path: Option<PathBuf>,
    keep_last_n: Option<usize>,
}

impl Args {
    /// Per-step observation dimension stored in the buffer: latent plus the
    /// encoded auxiliary info vector.
    pub fn obs_dim(&self) -> usize {
        self.latent_dim + crate::runtime::encoder::INFO_DIM
    }

    pub fn load() -> Result<Self> {
        let argv = std::env::args_os().collect::<Vec<_>>();
        Self::load_from(&argv)
    }

    pub fn load_from(argv: &[std::ffi::OsString]) -> Result<Self> {
        let cli_args = Self::try_parse_from(argv)
            .map_err(|e| anyhow::anyhow!(e.to_string()))
            .context("failed to parse CLI arguments")?;
        let matches = Self::command()
            .try_get_matches_from(argv)
            .map_err(|e| anyhow::anyhow!(e.to_string()))
            .context("failed to parse CLI arguments")?;

        let mut merged = Self::default();

        if let Some(config_path) = cli_args.config.as_deref() {
            let file_config = Self::load_file_config(config_path)?;
            merged.apply_config_file(file_config);
        }

        merged.apply_cli_overrides(&cli_args, &matches);
        merged.config = cli_args.config;

        Ok(merged)
    }

    fn load_file_config(path: &Path) -> Result<FileConfig> {
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .context("failed to get current working directory")?
                .join(path)
        };

        let content = std::fs::read_to_string(&resolved)
            .with_context(|| format!("failed to read config file at {}", resolved.display()))?;

        serde_yaml::from_str::<FileConfig>(&content)
            .with_context(|| format!("failed to parse YAML config at {}", resolved.display()))
    }

    fn apply_config_file(&mut self, file: FileConfig) {
        macro_rules! set_if_some {
            ($field:ident, $value:expr) => {
                if let Some(value) = $value {
                    self.$field = value;
                }
            };
        }

        set_if_some!(num_envs, file.environment.num_envs);
        set_if_some!(track_length, file.environment.track_length);
        set_if_some!(max_episode_steps, file.environment.max_episode_steps);

        set_if_some!(buffer_size, file.ppo_core.buffer_size);
        set_if_some!(num_frames, file.ppo_core.num_frames);
        set_if_some!(num_updates, file.ppo_core.num_updates);
        set_if_some!(epochs, file.ppo_core.epochs);
        set_if_some!(gamma, file.ppo_core.gamma);
        set_if_some!(lam, file.ppo_core.lam);

        set_if_some!(lr, file.optimization.lr);
        set_if_some!(clip_eps, file.optimization.clip_eps);
        set_if_some!(entropy_beta, file.optimization.entropy_beta);
        set_if_some!(critic_discount, file.optimization.critic_discount);
        set_if_some!(sample_mode, file.optimization.sample_mode);

        set_if_some!(latent_dim, file.architecture.latent_dim);
        set_if_some!(action_dim, file.architecture.action_dim);
        set_if_some!(hidden_dim, file.architecture.hidden_dim);
        set_if_some!(seed, file.architecture.seed);

        set_if_some!(checkpoint_save_dir, file.checkpointing.save_dir);
        set_if_some!(checkpoint_save_interval, file.checkpointing.save_interval);
        if file.checkpointing.load_path.is_some() {
            self.checkpoint_load_path = file.checkpointing.load_path;
        }
        if file.checkpointing.keep_last_n.is_some() {
            self.checkpoint_keep_last_n = file.checkpointing.keep_last_n;
        }
    }

    fn apply_cli_overrides(&mut self, cli: &Self, matches: &ArgMatches) {
        macro_rules! set_if_cli {
            ($field:ident, $arg_name:literal) => {
                if Self::provided_on_cli(matches, $arg_name) {
                    self.$field = cli.$field.clone();
                }
            };
        }

        set_if_cli!(num_envs, "num_envs");
        set_if_cli!(track_length, "track_length");
        set_if_cli!(max_episode_steps, "max_episode_steps");

        set_if_cli!(buffer_size, "buffer_size");
        set_if_cli!(num_frames, "num_frames");
        set_if_cli!(num_updates, "num_updates");
        set_if_cli!(epochs, "epochs");
        set_if_cli!(gamma, "gamma");
        set_if_cli!(lam, "lam");

        set_if_cli!(lr, "lr");
        set_if_cli!(clip_eps, "clip_eps");
        set_if_cli!(entropy_beta, "entropy_beta");
        set_if_cli!(critic_discount, "critic_discount");
        set_if_cli!(sample_mode, "sample_mode");

        set_if_cli!(latent_dim, "latent_dim");
        set_if_cli!(action_dim, "action_dim");
        set_if_cli!(hidden_dim, "hidden_dim");
        set_if_cli!(seed, "seed");

        set_if_cli!(checkpoint_save_dir, "checkpoint_save_dir");
        set_if_cli!(checkpoint_save_interval, "checkpoint_save_interval");
        set_if_cli!(checkpoint_load_path, "checkpoint_load_path");
        set_if_cli!(checkpoint_keep_last_n, "checkpoint_keep_last_n");
    }

    fn provided_on_cli(matches: &ArgMatches, arg_name: &str) -> bool {
        matches.value_source(arg_name) == Some(ValueSource::CommandLine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    fn argv(args: &[&str]) -> Vec<OsString> {
        std::iter::once("stk_ppo")
            .chain(args.iter().copied())
            .map(OsString::from)
            .collect()
    }

    #[test]
    fn defaults_match_reference_constants() {
        let args = Args::load_from(&argv(&[])).unwrap();
        assert_eq!(args.epochs, 2);
        assert_eq!(args.gamma, 0.9);
        assert_eq!(args.lam, 0.95);
        assert_eq!(args.clip_eps, 0.2);
        assert_eq!(args.entropy_beta, 0.2);
        assert_eq!(args.critic_discount, 0.5);
        assert_eq!(args.sample_mode, SampleMode::Random);
    }

    #[test]
    fn cli_overrides_file_config() {
        let dir = std::env::temp_dir().join("stk_ppo_config_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        std::fs::write(
            &path,
            "ppo_core:\n  gamma: 0.5\n  epochs: 7\noptimization:\n  sample_mode: shuffled\n",
        )
        .unwrap();

        let args = Args::load_from(&argv(&[
            "--config",
            path.to_str().unwrap(),
            "--gamma",
            "0.99",
        ]))
        .unwrap();

        // CLI wins over file, file wins over defaults.
        assert_eq!(args.gamma, 0.99);
        assert_eq!(args.epochs, 7);
        assert_eq!(args.sample_mode, SampleMode::Shuffled);
        assert_eq!(args.lam, 0.95);
    }
}
