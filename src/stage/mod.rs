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

//! Pipeline stages.
//!
//! A stage wraps the external tool invocation(s) of one step of the FPGA flow.
//! What a stage consumes and produces is fixed per `StageKind`; how the tools
//! are called comes from the family's `StageRecipe`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::artifacts::{ArtifactKind, ArtifactStore};
use crate::config::EffectiveConfig;
use crate::error::{ConfigError, ExecError};
use crate::exec::{Invocation, ToolExecutor, ToolOutput};
use crate::family::{self, Arg, StageRecipe};
use crate::filelist::{self, SourceList};
use crate::log::*;
use crate::tools::{ToolRegistry, ToolRole};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StageKind {
    Simulate,
    Synthesize,
    PlaceRoute,
    Timing,
    Bitstream,
    Program,
}

impl StageKind {
    pub const ALL: &'static [StageKind] = &[
        Self::Simulate,
        Self::Synthesize,
        Self::PlaceRoute,
        Self::Timing,
        Self::Bitstream,
        Self::Program,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Simulate => "simulate",
            Self::Synthesize => "synthesize",
            Self::PlaceRoute => "placeRoute",
            Self::Timing => "timing",
            Self::Bitstream => "bitstream",
            Self::Program => "program",
        }
    }

    /// Short name used on the command line.
    pub fn command(self) -> &'static str {
        match self {
            Self::Simulate => "sim",
            Self::Synthesize => "synth",
            Self::PlaceRoute => "pnr",
            Self::Timing => "timing",
            Self::Bitstream => "bitstream",
            Self::Program => "prog",
        }
    }

    /// Artifacts that must exist before the stage may run.
    pub fn consumes(self) -> &'static [ArtifactKind] {
        match self {
            Self::Simulate | Self::Synthesize => &[ArtifactKind::FileList],
            Self::PlaceRoute => &[ArtifactKind::Netlist],
            Self::Timing | Self::Bitstream => &[ArtifactKind::PlacedDesign],
            Self::Program => &[ArtifactKind::Bitstream],
        }
    }

    /// Artifacts the stage writes. Programming only has a side effect on the
    /// device.
    pub fn produces(self) -> &'static [ArtifactKind] {
        match self {
            Self::Simulate => &[ArtifactKind::SimBinary, ArtifactKind::Waveform],
            Self::Synthesize => &[ArtifactKind::Netlist, ArtifactKind::SynthLog],
            Self::PlaceRoute => &[ArtifactKind::PlacedDesign],
            Self::Timing => &[ArtifactKind::TimingReport],
            Self::Bitstream => &[ArtifactKind::Bitstream],
            Self::Program => &[],
        }
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.iter()
            .copied()
            .find(|k| k.name().eq_ignore_ascii_case(s) || k.command().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown stage `{}`", s))
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl StageState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped | Self::Cancelled)
    }
}

fn producer_hint(producer: &Option<StageKind>) -> String {
    match producer {
        Some(stage) => format!("run stage `{}` first", stage),
        None => "create it or run `fpgaflow files`".to_string(),
    }
}

fn install_hint(alternatives: &[String]) -> String {
    if alternatives.is_empty() {
        String::new()
    } else {
        format!(" or select one of: {}", alternatives.join(", "))
    }
}

fn exit_status(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by a signal".to_string(),
    }
}

/// Why a stage did not complete.
#[derive(Error, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageError {
    #[error("required {role} `{tool}` was not found; install it{}", install_hint(.alternatives))]
    ToolMissing { tool: String, role: ToolRole, alternatives: Vec<String> },
    #[error("missing {artifact} `{}`; {}", .path.display(), producer_hint(.producer))]
    PreconditionUnmet {
        artifact: ArtifactKind,
        path: PathBuf,
        producer: Option<StageKind>,
    },
    #[error("`{tool}` failed ({})", exit_status(.exit_code))]
    ToolExecutionFailed { tool: String, exit_code: Option<i32>, diagnostics: String },
    #[error("`{tool}` could not be run: {message}")]
    ToolUnrunnable { tool: String, message: String },
    #[error("`{tool}` did not finish within {secs} s")]
    TimedOut { tool: String, secs: u64 },
    #[error("`{tool}` was interrupted")]
    Cancelled { tool: String },
}

pub enum Precondition {
    Ready,
    Skipped(StageError),
}

/// Outcome of one stage.
#[derive(Clone, Debug, Serialize)]
pub struct StageResult {
    pub stage: StageKind,
    pub status: StageState,
    pub invocations: Vec<Invocation>,
    /// Output of every tool run by the stage, in order.
    pub outputs: Vec<ToolOutput>,
    /// Declared outputs present on disk once the stage finished.
    pub produced: Vec<PathBuf>,
    pub warnings: Vec<String>,
    /// Outputs were already newer than the inputs before running (advisory).
    pub was_up_to_date: bool,
    pub error: Option<StageError>,
}

impl StageResult {
    fn new(stage: StageKind, status: StageState) -> Self {
        Self {
            stage,
            status,
            invocations: Vec::new(),
            outputs: Vec::new(),
            produced: Vec::new(),
            warnings: Vec::new(),
            was_up_to_date: false,
            error: None,
        }
    }

    pub(crate) fn not_run(stage: StageKind) -> Self {
        Self::new(stage, StageState::Pending)
    }

    pub(crate) fn skipped(stage: StageKind, error: StageError) -> Self {
        let mut result = Self::new(stage, StageState::Skipped);
        result.error = Some(error);
        result
    }

    pub(crate) fn cancelled(stage: StageKind, tool: &str) -> Self {
        let mut result = Self::new(stage, StageState::Cancelled);
        result.error = Some(StageError::Cancelled { tool: tool.to_string() });
        result
    }

    /// Captured stdout and stderr of every tool, verbatim.
    pub fn combined_output(&self) -> String {
        let mut out = String::new();
        for o in &self.outputs {
            out.push_str(&o.stdout);
            out.push_str(&o.stderr);
        }
        out
    }
}

pub struct Stage {
    kind: StageKind,
    recipe: &'static StageRecipe,
    state: StageState,
}

impl Stage {
    pub fn new(kind: StageKind, cfg: &EffectiveConfig) -> Result<Self, ConfigError> {
        let recipe = cfg.family.recipe(kind).ok_or_else(|| ConfigError::UnsupportedStage {
            family: cfg.family.name.into(),
            stage: kind.name().into(),
        })?;
        Ok(Self { kind, recipe, state: StageState::Pending })
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    /// Tool roles this stage needs, in invocation order.
    pub fn required_tools(&self) -> Vec<ToolRole> {
        let mut roles = Vec::new();
        for step in self.recipe.steps {
            if !roles.contains(&step.tool) {
                roles.push(step.tool);
            }
        }
        roles
    }

    /// Marks a stage that was never started because the run was interrupted.
    pub fn cancel(&mut self) {
        self.transition(StageState::Cancelled);
    }

    fn transition(&mut self, to: StageState) {
        dbg_log!(DBG_EXTRA, "Stage {}: {:?} -> {:?}", self.kind, self.state, to);
        self.state = to;
    }

    /// Checks inputs and tools, moving the stage to `Ready` or `Skipped`.
    pub fn precondition(
        &mut self,
        cfg: &EffectiveConfig,
        store: &ArtifactStore,
        registry: &ToolRegistry
    ) -> Precondition {
        for artifact in self.kind.consumes() {
            if !store.exists(*artifact, cfg) {
                self.transition(StageState::Skipped);
                return Precondition::Skipped(StageError::PreconditionUnmet {
                    artifact: *artifact,
                    path: store.path_for(*artifact, cfg),
                    producer: artifact.producer(),
                });
            }
        }

        for role in self.required_tools() {
            let tool = cfg.tool_name(role).unwrap_or("");
            if !registry.is_available(tool) {
                let alternatives = match role {
                    ToolRole::Programmer => cfg.family.programmers()
                        .into_iter()
                        .filter(|p| *p != tool)
                        .map(String::from)
                        .collect(),
                    _ => Vec::new(),
                };
                self.transition(StageState::Skipped);
                return Precondition::Skipped(StageError::ToolMissing {
                    tool: tool.to_string(),
                    role,
                    alternatives,
                });
            }
        }

        self.transition(StageState::Ready);
        Precondition::Ready
    }

    /// Runs the stage's tools. Checks the precondition first unless that was
    /// already done.
    pub fn execute(
        &mut self,
        cfg: &EffectiveConfig,
        store: &ArtifactStore,
        registry: &ToolRegistry,
        executor: &mut dyn ToolExecutor
    ) -> StageResult {
        if self.state != StageState::Ready {
            if let Precondition::Skipped(err) = self.precondition(cfg, store, registry) {
                return StageResult::skipped(self.kind, err);
            }
        }

        let mut result = StageResult::new(self.kind, StageState::Running);
        result.was_up_to_date = store.up_to_date(self.kind.consumes(), self.kind.produces(), cfg);
        if result.was_up_to_date {
            dbg_log!(DBG_INFO, "Stage {}: outputs are up to date, running anyway", self.kind);
        }
        if let Some((artifact, hint)) = self.recipe.missing_hint {
            if !store.exists(artifact, cfg) {
                result.warnings.push(format!(
                    "{} (`{}` not found)", hint, store.path_for(artifact, cfg).display()
                ));
            }
        }

        self.transition(StageState::Running);
        let outcome = self.run_steps(cfg, store, registry, executor, &mut result);
        let status = match &outcome {
            Ok(()) => StageState::Succeeded,
            Err(StageError::Cancelled { .. }) => StageState::Cancelled,
            Err(_) => StageState::Failed,
        };
        self.transition(status);

        result.status = status;
        result.error = outcome.err();
        /* Outputs left over from an earlier run don't count */
        if status == StageState::Succeeded {
            result.produced = self.kind.produces().iter()
                .filter(|a| store.exists(**a, cfg))
                .map(|a| store.path_for(*a, cfg))
                .collect();
        }
        result
    }

    fn run_steps(
        &self,
        cfg: &EffectiveConfig,
        store: &ArtifactStore,
        registry: &ToolRegistry,
        executor: &mut dyn ToolExecutor,
        result: &mut StageResult
    ) -> Result<(), StageError> {
        /* Each stage writes only into the directories of its own outputs */
        for artifact in self.kind.produces() {
            if let Some(dir) = cfg.abs(store.path_for(*artifact, cfg)).parent() {
                std::fs::create_dir_all(dir).map_err(|e| StageError::ToolUnrunnable {
                    tool: self.kind.name().into(),
                    message: format!("couldn't create {}: {}", dir.display(), e),
                })?;
            }
        }

        let mut renderer = Renderer::new(cfg, store);
        for step in self.recipe.steps {
            let tool = cfg.tool_name(step.tool).unwrap_or("").to_string();
            let program = match registry.resolve(&tool).path() {
                Some(path) => path.to_path_buf(),
                None => return Err(StageError::ToolMissing {
                    tool,
                    role: step.tool,
                    alternatives: Vec::new(),
                }),
            };
            let template = match step.tool {
                ToolRole::Programmer => family::programmer_args(&cfg.programmer)
                    .unwrap_or(step.args),
                _ => step.args,
            };
            let args = renderer.render(template).map_err(|e| StageError::ToolUnrunnable {
                tool: tool.clone(),
                message: format!("couldn't read source list: {}", e),
            })?;

            let invocation = Invocation { tool: tool.clone(), program, args, cwd: cfg.root.clone() };
            result.invocations.push(invocation.clone());

            match executor.execute(&invocation) {
                Ok(output) => {
                    let success = output.success();
                    let exit_code = output.exit_code;
                    let diagnostics = format!("{}{}", output.stdout, output.stderr);
                    result.outputs.push(output);
                    if !success {
                        return Err(StageError::ToolExecutionFailed { tool, exit_code, diagnostics });
                    }
                }
                Err(ExecError::Cancelled { .. }) => return Err(StageError::Cancelled { tool }),
                Err(ExecError::TimedOut { secs, .. }) => {
                    return Err(StageError::TimedOut { tool, secs })
                }
                Err(e) => return Err(StageError::ToolUnrunnable { tool, message: e.to_string() }),
            }
        }
        Ok(())
    }
}

/// Command line opening the simulation waveform in the viewer. Checked like
/// a stage: the waveform first, then the tool.
pub fn viewer_invocation(
    cfg: &EffectiveConfig,
    store: &ArtifactStore,
    registry: &ToolRegistry
) -> Result<Invocation, StageError> {
    let waveform = ArtifactKind::Waveform;
    if !store.exists(waveform, cfg) {
        return Err(StageError::PreconditionUnmet {
            artifact: waveform,
            path: store.path_for(waveform, cfg),
            producer: waveform.producer(),
        });
    }

    let tool = cfg.tool_name(ToolRole::Viewer).unwrap_or("");
    let program = match registry.resolve(tool).path() {
        Some(path) => path.to_path_buf(),
        None => return Err(StageError::ToolMissing {
            tool: tool.to_string(),
            role: ToolRole::Viewer,
            alternatives: Vec::new(),
        }),
    };
    Ok(Invocation {
        tool: tool.to_string(),
        program,
        args: vec![store.path_for(waveform, cfg).to_string_lossy().into_owned()],
        cwd: cfg.root.clone(),
    })
}

/// Substitutes `{placeholder}`s in command line templates.
pub struct Renderer<'c> {
    cfg: &'c EffectiveConfig,
    store: &'c ArtifactStore,
    values: HashMap<&'static str, String>,
    sources: Option<SourceList>,
}

impl<'c> Renderer<'c> {
    pub fn new(cfg: &'c EffectiveConfig, store: &'c ArtifactStore) -> Self {
        let mut values = HashMap::new();
        values.insert("device", cfg.device.clone());
        values.insert("package", cfg.package.clone());
        values.insert("top", cfg.top.clone());
        values.insert("testbench", cfg.testbench.clone());
        values.insert("project", cfg.project.clone());
        values.insert("family", cfg.family.name.to_string());
        values.insert("board", cfg.board.clone());
        values.insert("image", cfg.container_image.clone().unwrap_or_default());
        values.insert("root", cfg.root.to_string_lossy().into_owned());
        for kind in ArtifactKind::ALL {
            let path = store.path_for(*kind, cfg);
            values.insert(kind.name(), cfg.rel(&path).to_string_lossy().into_owned());
        }
        Self { cfg, store, values, sources: None }
    }

    fn sources(&mut self) -> std::io::Result<&SourceList> {
        if self.sources.is_none() {
            self.sources = Some(filelist::read(self.cfg)?);
        }
        Ok(self.sources.get_or_insert_with(SourceList::default))
    }

    fn list(&mut self, name: &str) -> std::io::Result<Option<Vec<String>>> {
        let sources = match name {
            "rtl_files" => self.sources()?.rtl.iter().collect::<Vec<_>>(),
            "sim_files" => self.sources()?.all().collect::<Vec<_>>(),
            _ => return Ok(None),
        };
        Ok(Some(sources.iter().map(|p| p.to_string_lossy().into_owned()).collect()))
    }

    fn substitute(&mut self, template: &str) -> std::io::Result<String> {
        let mut out = String::new();
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            let Some(len) = rest[start ..].find('}') else { break };
            let name = &rest[start + 1 .. start + len];
            out.push_str(&rest[.. start]);
            if let Some(value) = self.values.get(name) {
                out.push_str(value);
            } else if let Some(list) = self.list(name)? {
                out.push_str(&list.join(" "));
            } else {
                dbg_log!(DBG_WARN, "Unknown placeholder {{{}}} in `{}`", name, template);
                out.push_str(&rest[start ..= start + len]);
            }
            rest = &rest[start + len + 1 ..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Renders a template into the final argument list. A list placeholder
    /// standing alone expands into one argument per entry.
    pub fn render(&mut self, template: &[Arg]) -> std::io::Result<Vec<String>> {
        let mut args = Vec::new();
        for arg in template {
            let group: &[&str] = match arg {
                Arg::Lit(s) => std::slice::from_ref(s),
                Arg::IfPresent(kind, group) if self.store.exists(*kind, self.cfg) => *group,
                Arg::IfAbsent(kind, group) if !self.store.exists(*kind, self.cfg) => *group,
                _ => &[],
            };
            for s in group {
                let whole = s.strip_prefix('{').and_then(|s| s.strip_suffix('}'));
                match whole {
                    Some(name) if !self.values.contains_key(name) => match self.list(name)? {
                        Some(list) => args.extend(list),
                        None => args.push(self.substitute(s)?),
                    },
                    _ => args.push(self.substitute(s)?),
                }
            }
        }
        Ok(args)
    }
}
