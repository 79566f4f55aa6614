use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid simulation name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error(
        "model version ({model}) and EnergyPlus version ({engine}) do not match; \
         this can prevent the simulation from running or lead to silent errors"
    )]
    VersionMismatch { model: String, engine: String },

    #[error("Unknown version mismatch action: {0} (expected raise, warn or ignore)")]
    UnknownAction(String),
}
