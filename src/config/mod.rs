/* Copyright (C) 2022 Antmicro
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     https://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

/* Resolution of the effective build configuration.
 *
 * Precedence is fixed for every key: family default < project file < override.
 */

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Serialize, Serializer, ser::SerializeMap};

use crate::error::ConfigError;
use crate::family::{self, FamilyProfile};
use crate::log::*;
use crate::tools::ToolRole;

#[cfg(test)]
mod tests;

pub const DEFAULT_FAMILY: &str = "ice40";

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigKey {
    Device,
    Package,
    Top,
    Testbench,
    Project,
    RtlDir,
    TbDir,
    SimDir,
    SynthDir,
    PnrDir,
    BitstreamDir,
    ReportsDir,
    FileList,
    Constraints,
    Programmer,
    Board,
    ContainerImage,
}

impl ConfigKey {
    pub const ALL: &'static [ConfigKey] = &[
        Self::Device,
        Self::Package,
        Self::Top,
        Self::Testbench,
        Self::Project,
        Self::RtlDir,
        Self::TbDir,
        Self::SimDir,
        Self::SynthDir,
        Self::PnrDir,
        Self::BitstreamDir,
        Self::ReportsDir,
        Self::FileList,
        Self::Constraints,
        Self::Programmer,
        Self::Board,
        Self::ContainerImage,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Package => "package",
            Self::Top => "top",
            Self::Testbench => "testbench",
            Self::Project => "project",
            Self::RtlDir => "rtl_dir",
            Self::TbDir => "tb_dir",
            Self::SimDir => "sim_dir",
            Self::SynthDir => "synth_dir",
            Self::PnrDir => "pnr_dir",
            Self::BitstreamDir => "bitstream_dir",
            Self::ReportsDir => "reports_dir",
            Self::FileList => "file_list",
            Self::Constraints => "constraints",
            Self::Programmer => "programmer",
            Self::Board => "board",
            Self::ContainerImage => "container_image",
        }
    }

    /* Keys whose values only make sense for one particular family */
    fn is_family_specific(self) -> bool {
        matches!(
            self,
            Self::Device | Self::Package | Self::Programmer | Self::Board | Self::ContainerImage
        )
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_");
        Self::ALL.iter()
            .copied()
            .find(|k| k.name() == normalized)
            .ok_or_else(|| ConfigError::UnknownKey { key: s.to_string() })
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Which configuration layer supplied a value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Default,
    Persisted,
    Override,
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Default => "default",
            Self::Persisted => "project file",
            Self::Override => "override",
        })
    }
}

/// Fully resolved configuration of one invocation.
///
/// Directory and file paths are kept as configured (usually relative to
/// `root`); use `EffectiveConfig::abs` to get a path usable from any working
/// directory.
#[derive(Clone, Debug)]
pub struct EffectiveConfig {
    pub family: &'static FamilyProfile,
    pub root: PathBuf,
    pub device: String,
    pub package: String,
    pub top: String,
    pub testbench: String,
    pub project: String,
    pub rtl_dir: PathBuf,
    pub tb_dir: PathBuf,
    pub sim_dir: PathBuf,
    pub synth_dir: PathBuf,
    pub pnr_dir: PathBuf,
    pub bitstream_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub file_list: PathBuf,
    pub constraints: PathBuf,
    pub programmer: String,
    pub board: String,
    pub container_image: Option<String>,
    origins: BTreeMap<ConfigKey, Layer>,
}

fn default_project_name(root: &Path) -> String {
    root.file_name()
        .and_then(|n| n.to_str())
        .filter(|n| is_identifier(n))
        .unwrap_or("project")
        .to_string()
}

/* Names end up in tool command lines and file names */
pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => (),
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl EffectiveConfig {
    fn defaults(family: &'static FamilyProfile, root: &Path) -> Self {
        Self {
            family,
            root: root.to_path_buf(),
            device: family.default_device.to_string(),
            package: family.default_package.to_string(),
            top: "top".to_string(),
            testbench: "top_tb".to_string(),
            project: default_project_name(root),
            rtl_dir: "rtl".into(),
            tb_dir: "tb".into(),
            sim_dir: "build/sim".into(),
            synth_dir: "build/synth".into(),
            pnr_dir: "build/pnr".into(),
            bitstream_dir: "build/bitstream".into(),
            reports_dir: "build/reports".into(),
            file_list: "build/files.f".into(),
            constraints: PathBuf::from(format!("constraints/pins.{}", family.constraints_ext)),
            programmer: family.default_programmer.to_string(),
            board: family.default_board.to_string(),
            container_image: family.container_image.map(String::from),
            origins: ConfigKey::ALL.iter().map(|k| (*k, Layer::Default)).collect(),
        }
    }

    fn set(&mut self, key: ConfigKey, value: &str, layer: Layer) -> Result<(), ConfigError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: key.name().into(),
                value: value.into(),
                reason: "value must not be empty".into(),
            });
        }

        match key {
            ConfigKey::Device => self.device = value.into(),
            ConfigKey::Package => self.package = value.into(),
            ConfigKey::Top => self.top = value.into(),
            ConfigKey::Testbench => self.testbench = value.into(),
            ConfigKey::Project => self.project = value.into(),
            ConfigKey::RtlDir => self.rtl_dir = value.into(),
            ConfigKey::TbDir => self.tb_dir = value.into(),
            ConfigKey::SimDir => self.sim_dir = value.into(),
            ConfigKey::SynthDir => self.synth_dir = value.into(),
            ConfigKey::PnrDir => self.pnr_dir = value.into(),
            ConfigKey::BitstreamDir => self.bitstream_dir = value.into(),
            ConfigKey::ReportsDir => self.reports_dir = value.into(),
            ConfigKey::FileList => self.file_list = value.into(),
            ConfigKey::Constraints => self.constraints = value.into(),
            ConfigKey::Programmer => self.programmer = value.into(),
            ConfigKey::Board => self.board = value.into(),
            ConfigKey::ContainerImage => self.container_image = Some(value.into()),
        }
        self.origins.insert(key, layer);
        Ok(())
    }

    pub fn get(&self, key: ConfigKey) -> String {
        let path = |p: &PathBuf| p.to_string_lossy().into_owned();
        match key {
            ConfigKey::Device => self.device.clone(),
            ConfigKey::Package => self.package.clone(),
            ConfigKey::Top => self.top.clone(),
            ConfigKey::Testbench => self.testbench.clone(),
            ConfigKey::Project => self.project.clone(),
            ConfigKey::RtlDir => path(&self.rtl_dir),
            ConfigKey::TbDir => path(&self.tb_dir),
            ConfigKey::SimDir => path(&self.sim_dir),
            ConfigKey::SynthDir => path(&self.synth_dir),
            ConfigKey::PnrDir => path(&self.pnr_dir),
            ConfigKey::BitstreamDir => path(&self.bitstream_dir),
            ConfigKey::ReportsDir => path(&self.reports_dir),
            ConfigKey::FileList => path(&self.file_list),
            ConfigKey::Constraints => path(&self.constraints),
            ConfigKey::Programmer => self.programmer.clone(),
            ConfigKey::Board => self.board.clone(),
            ConfigKey::ContainerImage => self.container_image.clone().unwrap_or_default(),
        }
    }

    pub fn origin(&self, key: ConfigKey) -> Layer {
        self.origins.get(&key).copied().unwrap_or(Layer::Default)
    }

    /// Path anchored at the project root (absolute paths are kept as they are).
    pub fn abs<P>(&self, path: P) -> PathBuf where P: AsRef<Path> {
        self.root.join(path)
    }

    /// Path as seen from the project root, used when rendering command lines.
    pub fn rel<'p>(&self, path: &'p Path) -> &'p Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }

    /// Logical tool name bound to `role` for this configuration.
    pub fn tool_name(&self, role: ToolRole) -> Option<&str> {
        match role {
            ToolRole::Programmer => Some(&self.programmer),
            ToolRole::Viewer => Some(crate::tools::WAVE_VIEWER),
            _ => self.family.tool_name(role),
        }
    }

    fn validate(&mut self) -> Result<(), ConfigError> {
        let family = self.family;

        let device = family.device(&self.device).ok_or_else(|| ConfigError::UnknownDevice {
            family: family.name.into(),
            device: self.device.clone(),
        })?;
        self.device = device.name.to_string();

        self.package = family.package(&self.package)
            .ok_or_else(|| ConfigError::UnknownPackage {
                family: family.name.into(),
                package: self.package.clone(),
            })?
            .to_string();

        if !device.packages.contains(&self.package.as_str()) {
            let explicit = self.origin(ConfigKey::Device) != Layer::Default
                && self.origin(ConfigKey::Package) != Layer::Default;
            if explicit {
                return Err(ConfigError::IncompatiblePackage {
                    device: self.device.clone(),
                    package: self.package.clone(),
                });
            }
            dbg_log!(
                DBG_WARN,
                "Device {} is not offered in package {} (packages: {})",
                self.device, self.package, device.packages.join(", ")
            );
        }

        for key in [ConfigKey::Top, ConfigKey::Testbench, ConfigKey::Project] {
            let value = self.get(key);
            if !is_identifier(&value) {
                return Err(ConfigError::InvalidValue {
                    key: key.name().into(),
                    value,
                    reason: "expected a letter or `_` followed by letters, digits, `_` or `-`"
                        .into(),
                });
            }
        }

        let programmers = family.programmers();
        if !programmers.contains(&self.programmer.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: ConfigKey::Programmer.name().into(),
                value: self.programmer.clone(),
                reason: format!("family {} supports: {}", family.name, programmers.join(", ")),
            });
        }

        Ok(())
    }
}

impl Serialize for EffectiveConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error> where
        S: Serializer
    {
        let mut m = serializer.serialize_map(Some(ConfigKey::ALL.len() + 2))?;
        m.serialize_entry("family", self.family.name)?;
        m.serialize_entry("root", &self.root)?;
        for key in ConfigKey::ALL {
            m.serialize_entry(key.name(), &self.get(*key))?;
        }
        m.end()
    }
}

/// Project level configuration stored in `fpgaflow.yaml` at the project root.
/// It is a flat mapping of configuration keys (plus `family`) to values.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectConfig {
    pub entries: BTreeMap<String, String>,
}

impl ProjectConfig {
    pub const FILE_NAME: &'static str = "fpgaflow.yaml";

    pub fn path(root: &Path) -> PathBuf {
        root.join(Self::FILE_NAME)
    }

    /// Loads the project file from `root`; `Ok(None)` if there is none.
    pub fn load(root: &Path) -> Result<Option<Self>, ConfigError> {
        let path = Self::path(root);
        if !path.is_file() {
            return Ok(None);
        }
        let persisted_err = |reason: String| ConfigError::Persisted {
            path: path.clone(),
            reason,
        };
        let text = std::fs::read_to_string(&path).map_err(|e| persisted_err(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Some(Self::default()));
        }
        let cfg: Self = serde_yaml::from_str(&text).map_err(|e| persisted_err(e.to_string()))?;
        Ok(Some(cfg))
    }

    pub fn save(&self, root: &Path) -> Result<(), ConfigError> {
        let path = Self::path(root);
        let persisted_err = |reason: String| ConfigError::Persisted {
            path: path.clone(),
            reason,
        };
        let text = serde_yaml::to_string(self).map_err(|e| persisted_err(e.to_string()))?;
        std::fs::write(&path, text).map_err(|e| persisted_err(e.to_string()))
    }

    pub fn family(&self) -> Option<&str> {
        self.entries.get("family").map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }
}

pub struct ConfigResolver {
    root: PathBuf,
    persisted: Option<ProjectConfig>,
}

impl ConfigResolver {
    /// Resolver without any project file.
    pub fn new<P>(root: P) -> Self where P: Into<PathBuf> {
        Self { root: root.into(), persisted: None }
    }

    /// Resolver using the project file found at `root`, if any.
    pub fn load<P>(root: P) -> Result<Self, ConfigError> where P: Into<PathBuf> {
        let root = root.into();
        let persisted = ProjectConfig::load(&root)?;
        if persisted.is_some() {
            dbg_log!(DBG_INFO, "Using project file {}", ProjectConfig::path(&root).display());
        }
        Ok(Self { root, persisted })
    }

    pub fn with_persisted(mut self, persisted: ProjectConfig) -> Self {
        self.persisted = Some(persisted);
        self
    }

    pub fn persisted(&self) -> Option<&ProjectConfig> {
        self.persisted.as_ref()
    }

    /// Family used when none is given explicitly: the project's, else the
    /// built-in default.
    pub fn default_family(&self) -> &str {
        self.persisted.as_ref()
            .and_then(|p| p.family())
            .unwrap_or(DEFAULT_FAMILY)
    }

    pub fn resolve(
        &self,
        family: &str,
        overrides: &BTreeMap<String, String>
    ) -> Result<EffectiveConfig, ConfigError> {
        let profile = family::find(family).ok_or_else(|| ConfigError::UnknownFamily {
            family: family.to_string(),
            known: family::known_names(),
        })?;

        let mut cfg = EffectiveConfig::defaults(profile, &self.root);

        if let Some(persisted) = &self.persisted {
            /* Device, package and friends stored for another family are
             * meaningless here, everything else still applies. */
            let same_family = persisted.family()
                .map(|f| f.eq_ignore_ascii_case(profile.name))
                .unwrap_or(true);
            for (key, value) in &persisted.entries {
                if key == "family" {
                    continue;
                }
                let key = ConfigKey::from_str(key)?;
                if key.is_family_specific() && !same_family {
                    dbg_log!(DBG_INFO, "Ignoring project setting {} for another family", key);
                    continue;
                }
                cfg.set(key, value, Layer::Persisted)?;
            }
        }

        for (key, value) in overrides {
            if key == "family" {
                if !value.eq_ignore_ascii_case(profile.name) {
                    return Err(ConfigError::InvalidValue {
                        key: key.clone(),
                        value: value.clone(),
                        reason: format!("conflicts with selected family {}", profile.name),
                    });
                }
                continue;
            }
            let key = ConfigKey::from_str(key)?;
            cfg.set(key, value, Layer::Override)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}
