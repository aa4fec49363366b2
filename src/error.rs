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

use std::path::PathBuf;
use thiserror::Error;

/// Configuration resolution failures. These are always fatal and are
/// reported before any stage runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown FPGA family `{family}` (known families: {known})")]
    UnknownFamily { family: String, known: String },
    #[error("unknown configuration key `{key}`")]
    UnknownKey { key: String },
    #[error("device `{device}` does not belong to family `{family}`")]
    UnknownDevice { family: String, device: String },
    #[error("package `{package}` does not belong to family `{family}`")]
    UnknownPackage { family: String, package: String },
    #[error("device `{device}` is not available in package `{package}`")]
    IncompatiblePackage { device: String, package: String },
    #[error("invalid value `{value}` for `{key}`: {reason}")]
    InvalidValue { key: String, value: String, reason: String },
    #[error("stage `{stage}` is not supported by family `{family}`")]
    UnsupportedStage { family: String, stage: String },
    #[error("couldn't load project configuration {}: {reason}", .path.display())]
    Persisted { path: PathBuf, reason: String },
}

/// Failures of a single external tool invocation.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error while running `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` did not finish within {secs} s")]
    TimedOut { program: String, secs: u64 },
    #[error("`{program}` was interrupted")]
    Cancelled { program: String },
}

/// Top-level errors of the command line front-end.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Scaffold(#[from] crate::scaffold::ScaffoldError),
    #[error("project is locked: {0}")]
    Locked(String),
    #[error("couldn't export {}: {source}", .path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
