//! Local command classifier
//!
//! Runs an external program once per image: `<program> [args..] <image>`.
//! The program prints a DeepFace-style JSON analysis on stdout, e.g. a thin
//! wrapper script around `DeepFace.analyze(img_path, actions=['gender'])`.

use super::classifier::{AttributeClassifier, AttributeResult, ClassifyError};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Maximum stderr characters kept in a failure reason
const STDERR_EXCERPT: usize = 400;

/// Classifier backed by a local executable
pub struct CommandClassifier {
    program: PathBuf,
    args: Vec<String>,
    reentrant: bool,
}

impl CommandClassifier {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            reentrant: false,
        }
    }

    /// Declare that several instances of the program may run at once
    ///
    /// Model-loading wrappers are often GPU-bound, so this is off by default.
    pub fn with_reentrant(mut self, reentrant: bool) -> Self {
        self.reentrant = reentrant;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

/// Tail of stderr, the part that usually carries the Python exception
fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(STDERR_EXCERPT.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[start..].to_string()
}

#[async_trait::async_trait]
impl AttributeClassifier for CommandClassifier {
    fn name(&self) -> &'static str {
        "command"
    }

    fn is_reentrant(&self) -> bool {
        self.reentrant
    }

    async fn classify(&self, image_path: &Path) -> Result<AttributeResult, ClassifyError> {
        if !image_path.exists() {
            return Err(ClassifyError::FileNotFound(image_path.display().to_string()));
        }

        tracing::debug!(
            program = %self.program.display(),
            image = %image_path.display(),
            "Running classifier command"
        );

        // kill_on_drop: a timed-out call drops this future and must not leave the child running
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(image_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ClassifyError::Execution(format!("{}: {}", self.program.display(), e))
            })?;

        if !output.status.success() {
            return Err(ClassifyError::AnalysisFailed(format!(
                "Exit code: {:?}, stderr: {}",
                output.status.code(),
                stderr_excerpt(&output.stderr)
            )));
        }

        let value: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| ClassifyError::MalformedResponse(format!("stdout is not JSON: {}", e)))?;
        AttributeResult::from_deepface_json(value)
    }
}
