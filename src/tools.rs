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

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use which::which_in;

use crate::log::*;

/// What a tool is used for within a pipeline. Families map each role to a
/// logical tool name (the executable name searched for in `PATH`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolRole {
    Simulator,
    SimRuntime,
    Synthesizer,
    Placer,
    TimingAnalyzer,
    Packer,
    Programmer,
    Container,
    Viewer,
}

impl std::fmt::Display for ToolRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Simulator => "simulator",
            Self::SimRuntime => "simulation runtime",
            Self::Synthesizer => "synthesizer",
            Self::Placer => "placer",
            Self::TimingAnalyzer => "timing analyzer",
            Self::Packer => "bitstream packer",
            Self::Programmer => "programmer",
            Self::Container => "container runtime",
            Self::Viewer => "waveform viewer",
        };
        f.write_str(s)
    }
}

/// Logical name of the waveform viewer used by `fpgaflow wave`.
pub const WAVE_VIEWER: &str = "gtkwave";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum ToolBinding {
    Found(PathBuf),
    NotFound { name: String },
}

impl ToolBinding {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Found(path) => Some(path),
            Self::NotFound { .. } => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

impl std::fmt::Display for ToolBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Found(path) => write!(f, "{}", path.display()),
            Self::NotFound { .. } => write!(f, "not found"),
        }
    }
}

/// Resolves logical tool names to executables.
///
/// Every name is searched for at most once; later queries return the cached
/// binding, so a run sees a consistent view of the environment even if `PATH`
/// contents change underneath it.
pub struct ToolRegistry {
    search_path: Option<OsString>,
    cwd: PathBuf,
    explicit: HashMap<String, PathBuf>,
    cache: RefCell<HashMap<String, ToolBinding>>,
}

impl ToolRegistry {
    /// Registry searching the process' `PATH`.
    pub fn from_env() -> Self {
        Self::new(std::env::var_os("PATH"))
    }

    /// Registry searching the given list of directories (in `PATH` syntax).
    pub fn with_search_path<S>(path: S) -> Self where S: Into<OsString> {
        Self::new(Some(path.into()))
    }

    fn new(search_path: Option<OsString>) -> Self {
        Self {
            search_path,
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
            explicit: HashMap::new(),
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Uses `executable` for `name` instead of searching for it. The executable
    /// is still checked for existence when resolved.
    pub fn bind<P>(&mut self, name: &str, executable: P) where P: Into<PathBuf> {
        self.explicit.insert(name.to_string(), executable.into());
        self.cache.get_mut().remove(name);
    }

    /// Sets the binding of `name` without probing the environment at all.
    pub fn pin(&mut self, name: &str, binding: ToolBinding) {
        self.cache.get_mut().insert(name.to_string(), binding);
    }

    pub fn resolve(&self, name: &str) -> ToolBinding {
        if let Some(binding) = self.cache.borrow().get(name) {
            return binding.clone();
        }

        let query: OsString = match self.explicit.get(name) {
            Some(path) => path.clone().into_os_string(),
            None => name.into(),
        };
        let binding = match which_in(&query, self.search_path.as_ref(), &self.cwd) {
            Ok(path) => ToolBinding::Found(path),
            Err(e) => {
                dbg_log!(DBG_INFO, "Tool {} not found: {}", name, e);
                ToolBinding::NotFound { name: name.to_string() }
            }
        };
        dbg_log!(DBG_EXTRA, "Resolved tool {} -> {}", name, binding);

        self.cache.borrow_mut().insert(name.to_string(), binding.clone());
        binding
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.resolve(name).is_found()
    }
}
