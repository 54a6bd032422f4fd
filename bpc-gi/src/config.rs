//! Configuration for bpc-gi
//!
//! Settings come from `~/.config/bpc/bpc-gi.toml` (or `--config`), with
//! command-line flags and `BPC_*` environment variables layered on top by
//! the binary. Priority: CLI → ENV → TOML → compiled default.

use crate::error::{GiError, GiResult};
use crate::services::asset_store::AssetLayout;
use crate::services::classification_driver::{Checkpoint, DriverOptions, DEFAULT_ITEM_TIMEOUT};
use crate::services::classifier::AttributeClassifier;
use crate::services::command_classifier::CommandClassifier;
use crate::services::deepface_client::DeepFaceHttpClassifier;
use bpc_common::config::{load_toml_config, module_config_path, LoggingConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Module name used for the config file and root folder resolution
pub const MODULE_NAME: &str = "bpc-gi";

/// Default DeepFace server
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:5005";

/// Complete bpc-gi configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GiConfig {
    /// Read by the shared root folder resolver (below CLI and ENV)
    pub root_folder: Option<PathBuf>,
    pub assets: AssetsConfig,
    pub classifier: ClassifierConfig,
    pub run: RunConfig,
    pub logging: LoggingConfig,
}

/// `[assets]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    /// Asset store directory; `<root>/assets` when unset
    pub dir: Option<PathBuf>,
    #[serde(flatten)]
    pub layout: AssetLayout,
}

/// Which classifier backend to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    /// DeepFace REST server (`POST /analyze`)
    #[default]
    Deepface,
    /// Local executable printing DeepFace JSON
    Command,
}

impl FromStr for ClassifierKind {
    type Err = GiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deepface" | "http" => Ok(ClassifierKind::Deepface),
            "command" | "cmd" => Ok(ClassifierKind::Command),
            other => Err(GiError::Config(format!(
                "Unknown classifier kind '{}' (expected 'deepface' or 'command')",
                other
            ))),
        }
    }
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifierKind::Deepface => write!(f, "deepface"),
            ClassifierKind::Command => write!(f, "command"),
        }
    }
}

/// `[classifier]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub kind: ClassifierKind,
    pub endpoint: String,
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
    /// Per-item timeout in seconds
    pub timeout_secs: u64,
    pub requests_per_second: Option<u32>,
    pub enforce_detection: bool,
    /// Allow parallel invocations of the command classifier
    pub reentrant: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            kind: ClassifierKind::default(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            program: None,
            args: Vec::new(),
            timeout_secs: DEFAULT_ITEM_TIMEOUT.as_secs(),
            requests_per_second: None,
            enforce_detection: true,
            reentrant: false,
        }
    }
}

impl ClassifierConfig {
    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Construct the configured classifier
    pub fn build(&self) -> GiResult<Arc<dyn AttributeClassifier>> {
        match self.kind {
            ClassifierKind::Deepface => {
                let classifier = DeepFaceHttpClassifier::new(
                    &self.endpoint,
                    self.item_timeout(),
                    self.requests_per_second,
                )
                .map_err(|e| GiError::Config(e.to_string()))?
                .with_enforce_detection(self.enforce_detection);
                info!(endpoint = %classifier.analyze_url(), "Using DeepFace HTTP classifier");
                Ok(Arc::new(classifier))
            }
            ClassifierKind::Command => {
                let program = self.program.as_ref().ok_or_else(|| {
                    GiError::Config(
                        "Command classifier requires a program. Configure using one of:\n\
                         1. Command line: --program /path/to/analyze\n\
                         2. Environment: BPC_GI_PROGRAM=/path/to/analyze\n\
                         3. TOML config: [classifier] program = \"/path/to/analyze\""
                            .to_string(),
                    )
                })?;
                info!(program = %program.display(), "Using command classifier");
                Ok(Arc::new(
                    CommandClassifier::new(program, self.args.clone())
                        .with_reentrant(self.reentrant),
                ))
            }
        }
    }
}

/// `[run]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub workers: usize,
    /// Records between checkpoint writes; 0 disables checkpoints
    pub checkpoint_interval: usize,
    /// Result document; `<root>/results.json` when unset
    pub output: Option<PathBuf>,
    /// JSON-lines progress log
    pub progress_log: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            checkpoint_interval: 0,
            output: None,
            progress_log: None,
        }
    }
}

/// Values supplied on the command line or through `BPC_*` variables
///
/// `None` means "not given", so the file value (or default) stays in effect.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub assets_dir: Option<PathBuf>,
    pub classifier: Option<ClassifierKind>,
    pub endpoint: Option<String>,
    pub program: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub workers: Option<usize>,
    pub checkpoint_interval: Option<usize>,
    pub output: Option<PathBuf>,
    pub progress_log: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl GiConfig {
    /// Load from `path`, or the per-module default location
    ///
    /// A missing file yields defaults; a malformed file is an error.
    pub fn load(path: Option<&Path>) -> GiResult<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match module_config_path(MODULE_NAME) {
                Some(path) => path,
                None => {
                    debug!("No config directory on this platform, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let config = load_toml_config::<GiConfig>(&path)
            .map_err(|e| GiError::Config(e.to_string()))?;
        if config.is_some() {
            info!(path = %path.display(), "Loaded configuration");
        }
        Ok(config.unwrap_or_default())
    }

    /// Layer command-line / environment values over the file values
    pub fn apply(mut self, overrides: Overrides) -> Self {
        override_setting("assets.dir", &mut self.assets.dir, overrides.assets_dir.map(Some));
        override_setting("classifier.kind", &mut self.classifier.kind, overrides.classifier);
        override_setting("classifier.endpoint", &mut self.classifier.endpoint, overrides.endpoint);
        override_setting("classifier.program", &mut self.classifier.program, overrides.program.map(Some));
        override_setting("classifier.timeout_secs", &mut self.classifier.timeout_secs, overrides.timeout_secs);
        override_setting("run.workers", &mut self.run.workers, overrides.workers);
        override_setting(
            "run.checkpoint_interval",
            &mut self.run.checkpoint_interval,
            overrides.checkpoint_interval,
        );
        override_setting("run.output", &mut self.run.output, overrides.output.map(Some));
        override_setting("run.progress_log", &mut self.run.progress_log, overrides.progress_log.map(Some));
        override_setting("logging.level", &mut self.logging.level, overrides.log_level);
        self
    }

    /// Asset store directory under the resolved root folder
    pub fn assets_dir(&self, root_folder: &Path) -> PathBuf {
        self.assets
            .dir
            .clone()
            .unwrap_or_else(|| root_folder.join("assets"))
    }

    /// Result document path under the resolved root folder
    pub fn output_path(&self, root_folder: &Path) -> PathBuf {
        self.run
            .output
            .clone()
            .unwrap_or_else(|| root_folder.join("results.json"))
    }

    /// Driver options; checkpoints go to the output document
    pub fn driver_options(&self, output: &Path) -> DriverOptions {
        let checkpoint = (self.run.checkpoint_interval > 0).then(|| Checkpoint {
            path: output.to_path_buf(),
            interval: self.run.checkpoint_interval,
        });
        DriverOptions {
            workers: self.run.workers.max(1),
            item_timeout: self.classifier.item_timeout(),
            checkpoint,
        }
    }
}

fn override_setting<T: fmt::Debug + PartialEq>(name: &str, slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        if *slot != value {
            debug!(setting = name, from = ?slot, to = ?value, "Setting overridden from command line or environment");
        }
        *slot = value;
    }
}
