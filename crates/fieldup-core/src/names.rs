use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use crate::error::UpdateError;

pub const MAX_APP_NAME_BYTES: usize = 47;
pub const MAX_HASH_BYTES: usize = 32;
pub const MAX_COMPONENT_BYTES: usize = 255;
pub const MAX_PATH_BYTES: usize = 4095;

/// Directory name reserved for the staging area in both the app store and the system store.
pub const UNPACK_NAME: &str = "unpack";
pub const CURRENT_NAME: &str = "current";

/// Name of an application slot inside a system.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AppName(String);

impl AppName {
    pub fn parse(value: &str) -> Result<Self, UpdateError> {
        if value.is_empty() {
            return Err(UpdateError::bad_parameter("app name must not be empty"));
        }
        if value.len() > MAX_APP_NAME_BYTES {
            return Err(UpdateError::bad_parameter(format!(
                "app name '{value}' is longer than {MAX_APP_NAME_BYTES} bytes"
            )));
        }
        // Leading dots are reserved for journal markers.
        if value.starts_with('.') {
            return Err(UpdateError::bad_parameter(format!(
                "app name '{value}' must not start with '.'"
            )));
        }
        if let Some(bad) = value
            .chars()
            .find(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.')))
        {
            return Err(UpdateError::bad_parameter(format!(
                "app name '{value}' contains invalid character '{bad}'"
            )));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AppName {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Key of an immutable payload in the content store (an MD5-style digest string).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn parse(value: &str) -> Result<Self, UpdateError> {
        if value.is_empty() {
            return Err(UpdateError::bad_parameter("content hash must not be empty"));
        }
        if value.len() > MAX_HASH_BYTES {
            return Err(UpdateError::bad_parameter(format!(
                "content hash '{value}' is longer than {MAX_HASH_BYTES} bytes"
            )));
        }
        if !value.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(UpdateError::bad_parameter(format!(
                "content hash '{value}' must be ASCII alphanumeric"
            )));
        }
        if value == UNPACK_NAME {
            return Err(UpdateError::bad_parameter(
                "'unpack' is reserved for the staging area",
            ));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A directory under the system store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemName {
    Current,
    Unpack,
    Numbered(u32),
}

impl SystemName {
    pub fn dir_name(self) -> String {
        match self {
            Self::Current => CURRENT_NAME.to_string(),
            Self::Unpack => UNPACK_NAME.to_string(),
            Self::Numbered(index) => index.to_string(),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            CURRENT_NAME => Some(Self::Current),
            UNPACK_NAME => Some(Self::Unpack),
            other => {
                if other.is_empty() || !other.chars().all(|ch| ch.is_ascii_digit()) {
                    return None;
                }
                other.parse().ok().map(Self::Numbered)
            }
        }
    }
}

impl fmt::Display for SystemName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir_name())
    }
}

/// Builds filesystem paths from untrusted components, rejecting anything that would escape the
/// base or overflow the platform path limit instead of truncating it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathBuilder {
    path: PathBuf,
}

impl PathBuilder {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { path: base.into() }
    }

    pub fn push(mut self, component: &str) -> Result<Self, UpdateError> {
        validate_component(component)?;
        self.path.push(component);
        self.check_length()?;
        Ok(self)
    }

    /// Appends every component of a relative path, as produced by a tree walk.
    pub fn push_relative(mut self, relative: &Path) -> Result<Self, UpdateError> {
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    let part = part.to_str().ok_or_else(|| {
                        UpdateError::bad_parameter(format!(
                            "path component is not valid UTF-8: {}",
                            relative.display()
                        ))
                    })?;
                    validate_component(part)?;
                    self.path.push(part);
                }
                Component::CurDir => {}
                _ => {
                    return Err(UpdateError::bad_parameter(format!(
                        "path must be relative and stay below its base: {}",
                        relative.display()
                    )));
                }
            }
        }
        self.check_length()?;
        Ok(self)
    }

    pub fn build(self) -> PathBuf {
        self.path
    }

    fn check_length(&self) -> Result<(), UpdateError> {
        let len = self.path.as_os_str().len();
        if len > MAX_PATH_BYTES {
            return Err(UpdateError::bad_parameter(format!(
                "path is {len} bytes, limit is {MAX_PATH_BYTES}: {}",
                self.path.display()
            )));
        }
        Ok(())
    }
}

fn validate_component(component: &str) -> Result<(), UpdateError> {
    if component.is_empty() {
        return Err(UpdateError::bad_parameter("path component must not be empty"));
    }
    if component == "." || component == ".." {
        return Err(UpdateError::bad_parameter(format!(
            "path component '{component}' is not allowed"
        )));
    }
    if component.contains('/') || component.contains('\0') {
        return Err(UpdateError::bad_parameter(format!(
            "path component '{component}' contains a separator or NUL"
        )));
    }
    if component.len() > MAX_COMPONENT_BYTES {
        return Err(UpdateError::bad_parameter(format!(
            "path component is longer than {MAX_COMPONENT_BYTES} bytes"
        )));
    }
    Ok(())
}
