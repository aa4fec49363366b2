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

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;

use fpgaflow::error::ExecError;
use fpgaflow::exporter::export_report;
use fpgaflow::filelist;
use fpgaflow::scaffold;
use fpgaflow::*;

/// Pretends to be every tool: records the call and writes whatever the
/// stage of the last step is supposed to produce.
struct Recorder {
    calls: Vec<Invocation>,
    outputs: HashMap<String, Vec<PathBuf>>,
    broken: Option<String>,
}

impl Recorder {
    fn new(cfg: &EffectiveConfig) -> Self {
        let store = ArtifactStore::new();
        let mut outputs: HashMap<String, Vec<PathBuf>> = HashMap::new();
        for recipe in cfg.family.recipes {
            if let Some(step) = recipe.steps.last() {
                let tool = cfg.tool_name(step.tool).unwrap().to_string();
                for kind in recipe.stage.produces() {
                    outputs.entry(tool.clone()).or_default().push(cfg.abs(store.path_for(*kind, cfg)));
                }
            }
        }
        Self { calls: Vec::new(), outputs, broken: None }
    }

    fn tools(&self) -> Vec<&str> {
        self.calls.iter().map(|c| c.tool.as_str()).collect()
    }
}

impl ToolExecutor for Recorder {
    fn execute(&mut self, invocation: &Invocation) -> Result<ToolOutput, ExecError> {
        self.calls.push(invocation.clone());
        if self.broken.as_deref() == Some(invocation.tool.as_str()) {
            return Ok(ToolOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "ERROR: Max frequency for clock 'clk': 3.00 MHz\n".into(),
            });
        }
        for path in self.outputs.get(&invocation.tool).into_iter().flatten() {
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "").unwrap();
        }
        Ok(ToolOutput { exit_code: Some(0), ..Default::default() })
    }
}

fn installed(cfg: &EffectiveConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::with_search_path("/nonexistent/fpgaflow-it-path");
    let mut tools = cfg.family.required_tools();
    tools.extend(cfg.family.programmers());
    for tool in tools {
        registry.pin(tool, ToolBinding::Found(PathBuf::from("/usr/local/bin").join(tool)));
    }
    registry
}

fn new_project(family: &str) -> (tempfile::TempDir, EffectiveConfig) {
    let dir = tempfile::TempDir::new().unwrap();
    scaffold::init(dir.path(), "blinky", family, &BTreeMap::new()).unwrap();
    let resolver = ConfigResolver::load(dir.path()).unwrap();
    let cfg = resolver.resolve(resolver.default_family(), &BTreeMap::new()).unwrap();
    filelist::generate(&cfg).unwrap();
    (dir, cfg)
}

#[test]
fn flash_scaffolded_ice40_project() {
    let (_dir, cfg) = new_project("ice40");
    assert_eq!(cfg.family.name, "ice40");
    assert_eq!(cfg.project, "blinky");

    let registry = installed(&cfg);
    let mut tools = Recorder::new(&cfg);
    let stages = Pipeline::Flash.stages(cfg.family);
    let result = PipelineRunner::new(&registry, &mut tools).run(&stages, &cfg).unwrap();

    assert!(result.success, "{:?}", result.first_failure);
    assert_eq!(tools.tools(), ["yosys", "nextpnr-ice40", "icetime", "icepack", "iceprog"]);
    let store = ArtifactStore::new();
    assert!(store.exists(ArtifactKind::Bitstream, &cfg));
    /* The scaffolded pin file is handed to the placer */
    assert!(tools.calls[1].args.iter().any(|a| a == "--pcf"));
}

#[test]
fn family_pipeline_uses_its_own_toolchain() {
    let (_dir, persisted) = new_project("ice40");
    let pipeline: Pipeline = "ecp5".parse().unwrap();
    let cfg = ConfigResolver::load(&persisted.root)
        .unwrap()
        .resolve(pipeline.family().unwrap(), &BTreeMap::new())
        .unwrap();

    /* Project name and directories carry over, the ice40 device does not */
    assert_eq!(cfg.project, "blinky");
    assert_eq!(cfg.device, cfg.family.default_device);
    assert_eq!(cfg.origin(ConfigKey::Device), Layer::Default);

    let registry = installed(&cfg);
    let mut tools = Recorder::new(&cfg);
    let result = PipelineRunner::new(&registry, &mut tools)
        .run(&pipeline.stages(cfg.family), &cfg)
        .unwrap();
    assert!(result.success);
    assert_eq!(tools.tools().first(), Some(&"yosys"));
    assert!(tools.tools().contains(&"ecppack"));
}

#[test]
fn failed_timing_stops_the_build_and_lands_in_report() {
    let (dir, cfg) = new_project("ice40");
    let registry = installed(&cfg);
    let mut tools = Recorder::new(&cfg);
    tools.broken = Some("icetime".into());

    let stages = Pipeline::All.stages(cfg.family);
    let result = PipelineRunner::new(&registry, &mut tools).run(&stages, &cfg).unwrap();

    assert!(!result.success);
    assert_eq!(result.failed_stage().map(|s| s.stage), Some(StageKind::Timing));
    assert_eq!(tools.tools(), ["yosys", "nextpnr-ice40", "icetime"]);
    assert_eq!(result.stage(StageKind::Bitstream).unwrap().status, StageState::Pending);
    match &result.first_failure.as_ref().unwrap().error {
        StageError::ToolExecutionFailed { diagnostics, exit_code, .. } => {
            assert_eq!(*exit_code, Some(1));
            assert!(diagnostics.contains("Max frequency"));
        }
        other => panic!("unexpected failure {:?}", other),
    }

    let report = dir.path().join("build/run.json");
    export_report(report.clone(), &Some(vec![":all".into()]), "all", &cfg, &result).unwrap();
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(report).unwrap()).unwrap();
    assert_eq!(json["run"]["success"], false);
    assert_eq!(json["run"]["stages"][2]["status"], "failed");
}

#[test]
fn overrides_beat_the_project_file() {
    let (dir, _) = new_project("ice40");
    let mut overrides = BTreeMap::new();
    overrides.insert("device".to_string(), "hx8k".to_string());
    overrides.insert("package".to_string(), "ct256".to_string());

    let cfg = ConfigResolver::load(dir.path()).unwrap().resolve("ice40", &overrides).unwrap();
    assert_eq!(cfg.device, "hx8k");
    assert_eq!(cfg.package, "ct256");
    assert_eq!(cfg.origin(ConfigKey::Device), Layer::Override);
    assert_eq!(cfg.origin(ConfigKey::Project), Layer::Persisted);
}
