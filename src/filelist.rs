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

//! The generated list of HDL sources (`file_list`).
//!
//! The list holds one root-relative path per line. Entries living under
//! `tb_dir` are testbench sources, everything else is RTL.

use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::EffectiveConfig;
use crate::log::*;

pub const HDL_EXTENSIONS: &[&str] = &["v", "sv"];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceList {
    pub rtl: Vec<PathBuf>,
    pub testbench: Vec<PathBuf>,
}

impl SourceList {
    /// RTL sources followed by testbench sources.
    pub fn all(&self) -> impl Iterator<Item = &PathBuf> {
        self.rtl.iter().chain(self.testbench.iter())
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for path in self.all() {
            out.push_str(&path.to_string_lossy().replace('\\', "/"));
            out.push('\n');
        }
        out
    }
}

fn is_hdl(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| HDL_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

fn scan_dir(cfg: &EffectiveConfig, dir: &Path) -> io::Result<Vec<PathBuf>> {
    let dir = cfg.abs(dir);
    if !dir.is_dir() {
        dbg_log!(DBG_WARN, "Source directory {} does not exist", dir.display());
        return Ok(Vec::new());
    }

    let mut sources = Vec::new();
    for entry in WalkDir::new(&dir).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() && is_hdl(entry.path()) {
            sources.push(cfg.rel(entry.path()).to_path_buf());
        }
    }
    Ok(sources)
}

/// Collects the HDL sources currently present in `rtl_dir` and `tb_dir`.
pub fn scan(cfg: &EffectiveConfig) -> io::Result<SourceList> {
    let testbench = scan_dir(cfg, &cfg.tb_dir)?;
    /* tb_dir may be nested inside rtl_dir */
    let rtl = scan_dir(cfg, &cfg.rtl_dir)?
        .into_iter()
        .filter(|p| !testbench.contains(p))
        .collect();
    Ok(SourceList { rtl, testbench })
}

/// Rescans the sources and rewrites the file list if its content changed.
/// Returns the current list and whether the file was (re)written.
pub fn generate(cfg: &EffectiveConfig) -> io::Result<(SourceList, bool)> {
    let sources = scan(cfg)?;
    let path = cfg.abs(&cfg.file_list);
    let rendered = sources.render();

    if let Ok(existing) = std::fs::read_to_string(&path) {
        if existing == rendered {
            return Ok((sources, false));
        }
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, rendered)?;
    dbg_log!(DBG_INFO, "Wrote {} sources to {}", sources.all().count(), path.display());
    Ok((sources, true))
}

/// Reads the file list back, classifying entries by location.
pub fn read(cfg: &EffectiveConfig) -> io::Result<SourceList> {
    let text = std::fs::read_to_string(cfg.abs(&cfg.file_list))?;
    let tb_dir = cfg.rel(&cfg.tb_dir).to_path_buf();
    let mut sources = SourceList::default();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            continue;
        }
        let path = PathBuf::from(line);
        if cfg.rel(&path).starts_with(&tb_dir) {
            sources.testbench.push(path);
        } else {
            sources.rtl.push(path);
        }
    }
    Ok(sources)
}
