use std::fmt;

use crate::linker::StageKind;

/// Failures surfaced by the pipeline core.
///
/// Everything raised during setup is fatal to the demo; the frame loop is never
/// entered once one of these has been returned.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to compile {stage} stage:\n{diagnostic}")]
    ShaderCompile {
        stage: StageKind,
        diagnostic: String,
        stage_source: SourceText,
    },
    #[error("failed to link program: {diagnostic}")]
    ShaderLink { diagnostic: String },
    #[error("invalid stage list: {0}")]
    InvalidStages(String),
    #[error("failed to create resource: {0}")]
    ResourceCreation(String),
    #[error("context failure: {0}")]
    Context(String),
    #[error("invalid binding: {0}")]
    Binding(String),
    #[error("kernel declares local size {declared:?} but the dispatcher tile is {requested}")]
    TileMismatch { declared: [u32; 3], requested: u32 },
    #[error("device failure: {0}")]
    Device(String),
}

impl PipelineError {
    /// Source text of the stage that failed to compile, if that is what happened.
    pub fn failing_source(&self) -> Option<&str> {
        match self {
            Self::ShaderCompile { stage_source, .. } => Some(stage_source.as_str()),
            _ => None,
        }
    }

    /// The failing stage's source with line numbers, ready to print under the
    /// diagnostic.
    pub fn source_listing(&self) -> Option<String> {
        match self {
            Self::ShaderCompile { stage_source, .. } => Some(stage_source.numbered()),
            _ => None,
        }
    }
}

/// Stage source carried by a compile failure.
///
/// Not part of the `Display` output; use [`PipelineError::source_listing`] to
/// print it.
#[derive(Clone, PartialEq, Eq)]
pub struct SourceText(String);

impl SourceText {
    pub fn new(source: impl Into<String>) -> Self {
        Self(source.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn numbered(&self) -> String {
        let width = self.0.lines().count().max(1).to_string().len();
        self.0
            .lines()
            .enumerate()
            .map(|(index, line)| format!("{:>width$} | {line}\n", index + 1))
            .collect()
    }
}

impl fmt::Debug for SourceText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceText({} bytes)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_failure_lists_numbered_source() {
        let source = (1..=10).map(|n| format!("line{n}")).collect::<Vec<_>>().join("\n");
        let err = PipelineError::ShaderCompile {
            stage: StageKind::Compute,
            diagnostic: "error: unexpected token".to_string(),
            stage_source: SourceText::new(source),
        };
        let listing = err.source_listing().expect("listing");
        assert!(listing.starts_with(" 1 | line1\n"));
        assert!(listing.ends_with("10 | line10\n"));
        assert!(!err.to_string().contains("line1"));
    }

    #[test]
    fn other_failures_carry_no_listing() {
        let err = PipelineError::Device("lost".to_string());
        assert!(err.failing_source().is_none());
        assert!(err.source_listing().is_none());
    }
}
