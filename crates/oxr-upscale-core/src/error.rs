use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("object pointer is null")]
    NullObject,
    #[error("call table of object is null")]
    NullTable,
    #[error("slot {slot} already patched with a different substitute")]
    SlotConflict { slot: usize },
    #[error("memory protection change failed: {0}")]
    Protection(String),
    #[error("{0} is not available")]
    Unavailable(&'static str),
}

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no device bound")]
    NoDevice,
    #[error("image creation failed: {0}")]
    Create(String),
    #[error("view creation failed: {0}")]
    View(String),
    #[error("blit failed: {0}")]
    Blit(String),
    #[error("copy failed: {0}")]
    Copy(String),
}
