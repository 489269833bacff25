mod config;
mod error;
mod names;
mod status;

pub use config::{
    validate_label, BindingsConfig, EngineConfig, HooksConfig, LabelsConfig, MountsConfig,
    StandaloneConfig, MAX_LABEL_BYTES,
};
pub use error::{Outcome, ResultCode, UpdateError, UpdateResult};
pub use names::{
    AppName, ContentHash, PathBuilder, SystemName, CURRENT_NAME, MAX_APP_NAME_BYTES,
    MAX_COMPONENT_BYTES, MAX_HASH_BYTES, MAX_PATH_BYTES, UNPACK_NAME,
};
pub use status::{MarkerKind, Status};

#[cfg(test)]
mod tests;
