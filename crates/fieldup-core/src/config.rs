use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use serde::Deserialize;

pub const MAX_LABEL_BYTES: usize = 255;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub integrity_protection: bool,
    #[serde(default)]
    pub labels: LabelsConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
    #[serde(default)]
    pub bindings: BindingsConfig,
    #[serde(default)]
    pub mounts: MountsConfig,
    #[serde(default)]
    pub standalone: StandaloneConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct LabelsConfig {
    pub framework: String,
    pub read_protected: String,
    pub system_files: String,
    pub app_prefix: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct HooksConfig {
    pub wrapper: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct BindingsConfig {
    pub reload_command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct MountsConfig {
    pub mountinfo: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct StandaloneConfig {
    pub config_tree_dir: Option<PathBuf>,
    pub principals_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::with_root(default_root())
    }
}

impl Default for LabelsConfig {
    fn default() -> Self {
        Self {
            framework: "framework".to_string(),
            read_protected: "imaRead".to_string(),
            system_files: "_".to_string(),
            app_prefix: "app.".to_string(),
        }
    }
}

impl Default for MountsConfig {
    fn default() -> Self {
        Self {
            mountinfo: PathBuf::from("/proc/self/mountinfo"),
        }
    }
}

impl EngineConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            read_only: false,
            integrity_protection: false,
            labels: LabelsConfig::default(),
            hooks: HooksConfig::default(),
            bindings: BindingsConfig::default(),
            mounts: MountsConfig::default(),
            standalone: StandaloneConfig::default(),
        }
    }

    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse engine config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config: {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid engine config: {}", path.display()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.root.is_absolute() {
            return Err(anyhow!(
                "root must be an absolute path: {}",
                self.root.display()
            ));
        }
        for (field, label) in [
            ("labels.framework", &self.labels.framework),
            ("labels.read_protected", &self.labels.read_protected),
            ("labels.system_files", &self.labels.system_files),
        ] {
            validate_label(label).with_context(|| format!("invalid {field}"))?;
        }
        // The prefix only has to be a valid label once an app name is appended.
        if !self.labels.app_prefix.is_empty() {
            validate_label(&self.labels.app_prefix).context("invalid labels.app_prefix")?;
        }
        if let Some(command) = &self.bindings.reload_command {
            if command.first().map_or(true, |program| program.trim().is_empty()) {
                return Err(anyhow!("bindings.reload_command must name a program"));
            }
        }
        Ok(())
    }

    pub fn hook_wrapper(&self) -> PathBuf {
        self.hooks.wrapper.clone().unwrap_or_else(|| {
            self.root
                .join("systems")
                .join("current")
                .join("bin")
                .join("install-hook")
        })
    }

    pub fn bindings_reload_command(&self) -> Vec<String> {
        self.bindings.reload_command.clone().unwrap_or_else(|| {
            vec![
                self.root
                    .join("systems")
                    .join("current")
                    .join("bin")
                    .join("sdir")
                    .display()
                    .to_string(),
                "load".to_string(),
            ]
        })
    }

    pub fn config_tree_dir(&self) -> PathBuf {
        self.standalone
            .config_tree_dir
            .clone()
            .unwrap_or_else(|| self.root.join("configTree"))
    }

    pub fn principals_dir(&self) -> PathBuf {
        self.standalone
            .principals_dir
            .clone()
            .unwrap_or_else(|| self.root.join("principals"))
    }
}

/// Checks a MAC label against the rules of the kernel label primitive.
pub fn validate_label(label: &str) -> anyhow::Result<()> {
    if label.is_empty() {
        return Err(anyhow!("label must not be empty"));
    }
    if label.len() > MAX_LABEL_BYTES {
        return Err(anyhow!(
            "label '{label}' is longer than {MAX_LABEL_BYTES} bytes"
        ));
    }
    if label.starts_with('-') {
        return Err(anyhow!("label '{label}' must not begin with '-'"));
    }
    if label
        .chars()
        .any(|ch| !ch.is_ascii_graphic() || matches!(ch, '/' | '\\' | '\'' | '"'))
    {
        return Err(anyhow!("label '{label}' contains invalid character(s)"));
    }
    Ok(())
}

fn default_root() -> PathBuf {
    PathBuf::from("/legato")
}
