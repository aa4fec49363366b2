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

//! Running sequences of stages.

use std::str::FromStr;

use crate::artifacts::ArtifactStore;
use crate::config::EffectiveConfig;
use crate::error::ConfigError;
use crate::exec::{CancelToken, ToolExecutor};
use crate::family::{self, FamilyProfile};
use crate::log::*;
use crate::stage::{Precondition, Stage, StageError, StageKind, StageResult, StageState};
use crate::tools::ToolRegistry;

/// Named sequence of stages selected on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pipeline {
    Stage(StageKind),
    /// Synthesis up to the bitstream.
    All,
    /// Simulation and synthesis only.
    QuickTest,
    /// `All`, then programming the device.
    Flash,
    /// `All` for the given family.
    Family(&'static str),
}

const BUILD_STAGES: &[StageKind] = &[
    StageKind::Synthesize,
    StageKind::PlaceRoute,
    StageKind::Timing,
    StageKind::Bitstream,
];

impl Pipeline {
    /// Stages of the pipeline for `family`, in execution order. Composite
    /// pipelines only contain stages the family supports; a single stage is
    /// returned as requested.
    pub fn stages(&self, family: &FamilyProfile) -> Vec<StageKind> {
        let mut build: Vec<_> = BUILD_STAGES.iter()
            .copied()
            .filter(|s| family.supports(*s))
            .collect();
        match self {
            Self::Stage(kind) => vec![*kind],
            Self::All | Self::Family(_) => build,
            Self::QuickTest => vec![StageKind::Simulate, StageKind::Synthesize],
            Self::Flash => {
                build.push(StageKind::Program);
                build
            }
        }
    }

    /// Family implied by the pipeline name, if any.
    pub fn family(&self) -> Option<&'static str> {
        match self {
            Self::Family(name) => Some(*name),
            _ => None,
        }
    }
}

impl FromStr for Pipeline {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => return Ok(Self::All),
            "quick-test" | "quick_test" => return Ok(Self::QuickTest),
            "flash" => return Ok(Self::Flash),
            _ => (),
        }
        if let Ok(kind) = StageKind::from_str(s) {
            return Ok(Self::Stage(kind));
        }
        if let Some(profile) = family::find(s) {
            return Ok(Self::Family(profile.name));
        }
        Err(format!(
            "unknown pipeline `{}` (expected a stage, all, quick-test, flash or one of: {})",
            s, family::known_names()
        ))
    }
}

impl std::fmt::Display for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stage(kind) => write!(f, "{}", kind),
            Self::All => write!(f, "all"),
            Self::QuickTest => write!(f, "quick-test"),
            Self::Flash => write!(f, "flash"),
            Self::Family(name) => write!(f, "{}", name),
        }
    }
}

/// Stage that stopped a run and why.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunFailure {
    pub stage: StageKind,
    pub error: StageError,
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stage {}: {}", self.stage, self.error)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RunResult {
    pub family: &'static str,
    /// One entry per requested stage, in order. Stages after the first
    /// failure stay `Pending`.
    pub stages: Vec<StageResult>,
    pub first_failure: Option<RunFailure>,
    pub success: bool,
}

impl RunResult {
    pub fn stage(&self, kind: StageKind) -> Option<&StageResult> {
        self.stages.iter().find(|r| r.stage == kind)
    }

    pub fn cancelled(&self) -> bool {
        matches!(self.first_failure, Some(RunFailure { error: StageError::Cancelled { .. }, .. }))
    }

    /// Result of the stage that stopped the run.
    pub fn failed_stage(&self) -> Option<&StageResult> {
        self.first_failure.as_ref().and_then(|f| self.stage(f.stage))
    }
}

/// Hooks called around every stage, e.g. to print progress.
pub trait RunObserver {
    fn stage_started(&mut self, _stage: StageKind, _cfg: &EffectiveConfig) {}
    fn stage_finished(&mut self, _result: &StageResult) {}
}

/// Runs stages one after another, stopping at the first one that does not
/// succeed.
pub struct PipelineRunner<'a> {
    registry: &'a ToolRegistry,
    store: ArtifactStore,
    executor: &'a mut dyn ToolExecutor,
    cancel: CancelToken,
    observer: Option<&'a mut dyn RunObserver>,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(registry: &'a ToolRegistry, executor: &'a mut dyn ToolExecutor) -> Self {
        Self {
            registry,
            store: ArtifactStore::new(),
            executor,
            cancel: CancelToken::new(),
            observer: None,
        }
    }

    /// Token checked between stages. The executor is expected to watch the
    /// same token while a tool runs.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer(mut self, observer: &'a mut dyn RunObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Runs `stages` in the given order. Fails up front, before anything is
    /// executed, if the family doesn't support one of them.
    pub fn run(
        &mut self,
        stages: &[StageKind],
        cfg: &EffectiveConfig
    ) -> Result<RunResult, ConfigError> {
        let mut stages = stages.iter()
            .map(|kind| Stage::new(*kind, cfg))
            .collect::<Result<Vec<_>, _>>()?;

        dbg_log!(
            DBG_INFO, "Running [{}] for {}",
            stages.iter().map(|s| s.kind().name()).collect::<Vec<_>>().join(", "),
            cfg.family.name
        );

        let mut results = Vec::with_capacity(stages.len());
        let mut first_failure = None;

        for stage in &mut stages {
            if first_failure.is_some() {
                results.push(StageResult::not_run(stage.kind()));
                continue;
            }

            let result = self.run_stage(stage, cfg);
            if let Some(error) = &result.error {
                dbg_log!(DBG_WARN, "Stage {} stopped the run: {}", stage.kind(), error);
                first_failure = Some(RunFailure { stage: stage.kind(), error: error.clone() });
            }
            results.push(result);
        }

        let success = first_failure.is_none()
            && results.iter().all(|r| r.status == StageState::Succeeded);
        Ok(RunResult { family: cfg.family.name, stages: results, first_failure, success })
    }

    fn run_stage(&mut self, stage: &mut Stage, cfg: &EffectiveConfig) -> StageResult {
        if let Some(observer) = self.observer.as_mut() {
            observer.stage_started(stage.kind(), cfg);
        }

        let result = if self.cancel.is_cancelled() {
            stage.cancel();
            let tool = stage.required_tools()
                .first()
                .and_then(|role| cfg.tool_name(*role))
                .unwrap_or("")
                .to_string();
            StageResult::cancelled(stage.kind(), &tool)
        } else {
            match stage.precondition(cfg, &self.store, self.registry) {
                Precondition::Skipped(reason) => StageResult::skipped(stage.kind(), reason),
                Precondition::Ready => {
                    stage.execute(cfg, &self.store, self.registry, &mut *self.executor)
                }
            }
        };

        if let Some(observer) = self.observer.as_mut() {
            observer.stage_finished(&result);
        }
        result
    }
}
