//! Argument vectors and command lists.

use crate::error::PipelineError;

/// One pipeline stage: an immutable argument vector.
///
/// Element 0 is the program name. It is resolved against the search path the
/// same way `execvp` resolves it, and the full vector (including element 0)
/// is passed to the new image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    argv: Vec<String>,
}

impl Stage {
    /// Create a stage from an argument vector.
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    /// The program name (`argv[0]`), if any.
    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    /// Arguments after the program name.
    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or(&[])
    }

    /// The full argument vector.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn is_empty(&self) -> bool {
        self.argv.is_empty()
    }
}

impl<S: Into<String>> From<Vec<S>> for Stage {
    fn from(argv: Vec<S>) -> Self {
        Stage::new(argv)
    }
}

/// An ordered, non-empty list of stages forming one pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandList {
    stages: Vec<Stage>,
}

impl CommandList {
    /// Build a command list, rejecting empty lists and empty stages.
    pub fn new<I, T>(stages: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = T>,
        T: Into<Stage>,
    {
        let stages: Vec<Stage> = stages.into_iter().map(Into::into).collect();

        if stages.is_empty() {
            return Err(PipelineError::EmptyPipeline);
        }
        if let Some(index) = stages.iter().position(Stage::is_empty) {
            return Err(PipelineError::EmptyStage { index });
        }

        Ok(Self { stages })
    }

    /// A one-stage command list.
    pub fn single(stage: impl Into<Stage>) -> Result<Self, PipelineError> {
        Self::new([stage.into()])
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false for a constructed list.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
