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

/* Test doubles shared by the unit tests. */

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::artifacts::{ArtifactKind, ArtifactStore};
use crate::config::{ConfigResolver, EffectiveConfig};
use crate::error::ExecError;
use crate::exec::{Invocation, ToolExecutor, ToolOutput};
use crate::tools::{ToolBinding, ToolRegistry};

/// Executor that records invocations instead of running anything. Each tool
/// "writes" the artifacts of the stage it belongs to.
#[derive(Default)]
pub struct FakeExecutor {
    pub invocations: Vec<Invocation>,
    writes: HashMap<String, Vec<PathBuf>>,
    failing: HashMap<String, ToolOutput>,
    cancel_at: Option<String>,
}

impl FakeExecutor {
    pub fn for_config(cfg: &EffectiveConfig) -> Self {
        let store = ArtifactStore::new();
        let mut writes: HashMap<String, Vec<PathBuf>> = HashMap::new();
        for recipe in cfg.family.recipes {
            let Some(last) = recipe.steps.last() else { continue };
            let tool = cfg.tool_name(last.tool).unwrap().to_string();
            writes.entry(tool).or_default().extend(
                recipe.stage.produces().iter().map(|a| cfg.abs(store.path_for(*a, cfg)))
            );
        }
        Self { writes, ..Default::default() }
    }

    pub fn failing(mut self, tool: &str, output: ToolOutput) -> Self {
        self.failing.insert(tool.to_string(), output);
        self
    }

    pub fn cancelled_at(mut self, tool: &str) -> Self {
        self.cancel_at = Some(tool.to_string());
        self
    }

    pub fn tools(&self) -> Vec<&str> {
        self.invocations.iter().map(|i| i.tool.as_str()).collect()
    }
}

impl ToolExecutor for FakeExecutor {
    fn execute(&mut self, invocation: &Invocation) -> Result<ToolOutput, ExecError> {
        self.invocations.push(invocation.clone());
        if self.cancel_at.as_deref() == Some(invocation.tool.as_str()) {
            return Err(ExecError::Cancelled { program: invocation.tool.clone() });
        }
        if let Some(output) = self.failing.get(&invocation.tool) {
            return Ok(output.clone());
        }
        for path in self.writes.get(&invocation.tool).into_iter().flatten() {
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, format!("{}\n", invocation)).unwrap();
        }
        Ok(ToolOutput {
            exit_code: Some(0),
            stdout: format!("{} done\n", invocation.tool),
            stderr: String::new(),
        })
    }
}

/// Registry where exactly the given tools are installed.
pub fn registry_with(tools: &[&str]) -> ToolRegistry {
    let mut registry = ToolRegistry::with_search_path("/nonexistent/fpgaflow-test-path");
    for tool in tools {
        registry.pin(tool, ToolBinding::Found(PathBuf::from("/opt/fpga/bin").join(tool)));
    }
    registry
}

/// Registry with every tool of the configuration's family installed.
pub fn full_registry(cfg: &EffectiveConfig) -> ToolRegistry {
    let mut tools = cfg.family.required_tools();
    tools.extend(cfg.family.programmers());
    registry_with(&tools)
}

/// A minimal project with one RTL module, a testbench and a generated source
/// list.
pub fn project(family: &str) -> (tempfile::TempDir, EffectiveConfig) {
    let dir = tempfile::TempDir::new().unwrap();
    let cfg = ConfigResolver::new(dir.path()).resolve(family, &BTreeMap::new()).unwrap();
    write(dir.path(), "rtl/top.v", "module top(output led); assign led = 1'b1; endmodule\n");
    write(dir.path(), "tb/top_tb.v", "module top_tb; top dut(); endmodule\n");
    crate::filelist::generate(&cfg).unwrap();
    (dir, cfg)
}

pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

pub fn touch(cfg: &EffectiveConfig, kind: ArtifactKind) -> PathBuf {
    let path = cfg.abs(ArtifactStore::new().path_for(kind, cfg));
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "").unwrap();
    path
}
