mod label;
mod policy;

pub use label::{Labeler, NullLabeler, RecordingLabeler, SmackLabeler, SMACK_XATTR};
pub use policy::{app_label, dir_label, file_label, FileLabel};
