use anyhow::{bail, Context, Result};
use burn::module::Module;
use burn::optim::Optimizer;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::Args;
use crate::models::Agent;

const STEP_PREFIX: &str = "step_";
const AGENT_FILE: &str = "agent";
const OPTIM_FILE: &str = "optim";
const METADATA_FILE: &str = "metadata.json";
const ALGORITHM: &str = "ppo";

#[derive(Clone, Debug)]
pub struct CheckpointConfig {
    pub save_dir: PathBuf,
    pub save_interval: usize,
    pub load_path: Option<PathBuf>,
    pub keep_last_n: Option<usize>,
}

impl CheckpointConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            save_dir: args.checkpoint_save_dir.clone(),
            save_interval: args.checkpoint_save_interval,
            load_path: args.checkpoint_load_path.clone(),
            keep_last_n: args.checkpoint_keep_last_n,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Checkpointer {
    config: CheckpointConfig,
    run_dir: PathBuf,
    recorder: NamedMpkFileRecorder<FullPrecisionSettings>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointMetadata {
    step: usize,
    created_at_utc: String,
    algorithm: String,
}

impl Checkpointer {
    pub fn new(config: CheckpointConfig) -> Result<Self> {
        let run_dir = Self::resolve_run_dir(&config)?;
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("failed to create checkpoint run dir {}", run_dir.display()))?;

        Ok(Self {
            config,
            run_dir,
            recorder: NamedMpkFileRecorder::<FullPrecisionSettings>::default(),
        })
    }

    pub fn should_save(&self, update: usize) -> bool {
        let interval = self.config.save_interval;
        interval > 0 && (update + 1) % interval == 0
    }

    pub fn save<B, O>(&self, step: usize, agent: &Agent<B>, optim: &O) -> Result<()>
    where
        B: AutodiffBackend,
        O: Optimizer<Agent<B>, B>,
    {
        let step_dir = self.step_dir(step);
        fs::create_dir_all(&step_dir)
            .with_context(|| format!("failed to create checkpoint dir {}", step_dir.display()))?;

        agent
            .clone()
            .save_file(step_dir.join(AGENT_FILE), &self.recorder)
            .context("failed to save agent checkpoint")?;

        self.recorder
            .record(optim.to_record(), step_dir.join(OPTIM_FILE))
            .context("failed to save optimizer checkpoint")?;

        self.write_metadata(&step_dir, step)?;
        self.rotate_if_needed()?;
        Ok(())
    }

    pub fn load<B, O>(
        &self,
        path: &Path,
        agent: &mut Agent<B>,
        optim: &mut O,
        device: &B::Device,
    ) -> Result<Option<usize>>
    where
        B: AutodiffBackend,
        O: Optimizer<Agent<B>, B> + Clone,
    {
        Self::validate_checkpoint_path(path)?;
        let step_dir = Self::step_dir_from_load_path(path)?;

        *agent = agent
            .clone()
            .load_file(step_dir.join(AGENT_FILE), &self.recorder, device)
            .context("failed to load agent checkpoint")?;

        let optim_path = step_dir.join(OPTIM_FILE);
        if Self::mpk_file_exists(&optim_path) {
            let record = self
                .recorder
                .load(optim_path, device)
                .context("failed to load optimizer checkpoint")?;
            *optim = optim.clone().load_record(record);
        }

        self.read_metadata_step(&step_dir)
    }

    pub fn load_path(&self) -> Option<&Path> {
        self.config.load_path.as_deref()
    }

    fn step_dir(&self, step: usize) -> PathBuf {
        self.run_dir.join(format!("{STEP_PREFIX}{step}"))
    }

    fn validate_checkpoint_path(path: &Path) -> Result<()> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase());

        match ext.as_deref() {
            Some("mpk") => Ok(()),
            Some(other) => bail!("unsupported checkpoint extension '.{other}', expected '.mpk'"),
            None => bail!("checkpoint load path must be a .mpk file"),
        }
    }

    fn step_dir_from_load_path(path: &Path) -> Result<PathBuf> {
        let parent = path.parent().ok_or_else(|| {
            anyhow::anyhow!("checkpoint path '{}' has no parent directory", path.display())
        })?;
        Ok(parent.to_path_buf())
    }

    fn mpk_file_exists(base_path: &Path) -> bool {
        let mut path = base_path.to_path_buf();
        path.set_extension("mpk");
        path.exists()
    }

    fn resolve_run_dir(config: &CheckpointConfig) -> Result<PathBuf> {
        // Resuming keeps appending into the original run directory.
        if let Some(load_path) = config.load_path.as_ref() {
            if let Some(step_dir) = load_path.parent() {
                if let Some(step_name) = step_dir.file_name().and_then(|v| v.to_str()) {
                    if step_name.starts_with(STEP_PREFIX) {
                        if let Some(run_dir) = step_dir.parent() {
                            return Ok(run_dir.to_path_buf());
                        }
                    }
                }
            }
        }

        let run_id = Utc::now().format("run_%Y%m%d_%H%M%S").to_string();
        Ok(config.save_dir.join(ALGORITHM).join(run_id))
    }

    fn write_metadata(&self, step_dir: &Path, step: usize) -> Result<()> {
        let metadata = CheckpointMetadata {
            step,
            created_at_utc: Utc::now().to_rfc3339(),
            algorithm: ALGORITHM.to_string(),
        };

        let path = step_dir.join(METADATA_FILE);
        let json = serde_json::to_string_pretty(&metadata)
            .context("failed to serialize checkpoint metadata")?;
        fs::write(&path, json)
            .with_context(|| format!("failed to write checkpoint metadata {}", path.display()))?;
        Ok(())
    }

    fn read_metadata_step(&self, step_dir: &Path) -> Result<Option<usize>> {
        let path = step_dir.join(METADATA_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read checkpoint metadata {}", path.display()))?;
        let metadata: CheckpointMetadata = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse checkpoint metadata {}", path.display()))?;
        Ok(Some(metadata.step))
    }

    fn rotate_if_needed(&self) -> Result<()> {
        let Some(keep_last_n) = self.config.keep_last_n else {
            return Ok(());
        };

        let mut step_dirs: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&self.run_dir)
            .with_context(|| format!("failed to read checkpoint run dir {}", self.run_dir.display()))?
        {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|v| v.to_str()) else {
                continue;
            };
            if !name.starts_with(STEP_PREFIX) {
                continue;
            }

            let modified = fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            step_dirs.push((modified, path));
        }

        if step_dirs.len() <= keep_last_n {
            return Ok(());
        }

        step_dirs.sort_by_key(|(modified, _)| *modified);
        let to_remove = step_dirs.len().saturating_sub(keep_last_n);
        for (_, path) in step_dirs.into_iter().take(to_remove) {
            fs::remove_dir_all(&path).with_context(|| {
                format!("failed to remove rotated checkpoint directory {}", path.display())
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_disabled_when_interval_is_zero() {
        let config = CheckpointConfig {
            save_dir: std::env::temp_dir().join("stk_ppo_ckpt_test_interval"),
            save_interval: 0,
            load_path: None,
            keep_last_n: None,
        };
        let ckpt = Checkpointer::new(config).unwrap();
        assert!(!ckpt.should_save(0));
        assert!(!ckpt.should_save(49));
    }

    #[test]
    fn save_interval_boundaries() {
        let config = CheckpointConfig {
            save_dir: std::env::temp_dir().join("stk_ppo_ckpt_test_boundary"),
            save_interval: 50,
            load_path: None,
            keep_last_n: None,
        };
        let ckpt = Checkpointer::new(config).unwrap();
        assert!(!ckpt.should_save(0));
        assert!(ckpt.should_save(49));
        assert!(ckpt.should_save(99));
    }

    #[test]
    fn non_mpk_load_path_is_rejected() {
        assert!(Checkpointer::validate_checkpoint_path(Path::new("model.onnx")).is_err());
        assert!(Checkpointer::validate_checkpoint_path(Path::new("model")).is_err());
        assert!(Checkpointer::validate_checkpoint_path(Path::new("dir/agent.mpk")).is_ok());
    }
}
