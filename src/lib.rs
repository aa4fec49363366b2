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

//! Build configuration and pipeline resolution for FPGA toolchains.
//!
//! A `FamilyProfile` table describes each supported toolchain. The
//! `ConfigResolver` turns it, the project file and command line overrides
//! into an `EffectiveConfig`, and the `PipelineRunner` drives the external
//! tools of each stage through a `ToolExecutor`.

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate serde;

#[macro_use]
pub mod log;
pub mod error;
pub mod tools;
pub mod family;
pub mod config;
pub mod artifacts;
pub mod filelist;
pub mod exec;
pub mod stage;
pub mod runner;
pub mod lock;
pub mod scaffold;
pub mod exporter;

#[cfg(test)]
mod testing;

pub use crate::artifacts::{Artifact, ArtifactKind, ArtifactStore};
pub use crate::config::{ConfigKey, ConfigResolver, EffectiveConfig, Layer, ProjectConfig};
pub use crate::error::{ConfigError, ExecError, FlowError};
pub use crate::exec::{CancelToken, Invocation, ProcessExecutor, ToolExecutor, ToolOutput};
pub use crate::family::FamilyProfile;
pub use crate::runner::{Pipeline, PipelineRunner, RunFailure, RunObserver, RunResult};
pub use crate::stage::{Stage, StageError, StageKind, StageResult, StageState};
pub use crate::tools::{ToolBinding, ToolRegistry, ToolRole};
