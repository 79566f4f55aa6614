use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Staging,
    CheckingVersion,
    Running,
    CollectingResults,
    BackingUp,
    Completed,
}

impl RunStage {
    pub fn label(self) -> &'static str {
        match self {
            RunStage::Staging => "staging inputs",
            RunStage::CheckingVersion => "checking version",
            RunStage::Running => "running EnergyPlus",
            RunStage::CollectingResults => "collecting results",
            RunStage::BackingUp => "backing up",
            RunStage::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunProgressEvent {
    pub name: String,
    pub stage: RunStage,
    pub elapsed_wall_s: f64,
    pub message: Option<String>,
}

impl RunProgressEvent {
    pub fn stage(
        name: impl Into<String>,
        stage: RunStage,
        elapsed_wall_s: f64,
        message: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            stage,
            elapsed_wall_s,
            message,
        }
    }
}

/// Callback receiving stage events. Called from worker threads during batches.
pub type ProgressSink = Arc<dyn Fn(&RunProgressEvent) + Send + Sync>;
