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

//! Exporting run results: per-stage tool logs and a JSON summary.

use std::path::PathBuf;
use std::fs::File;
use std::collections::{BTreeMap, HashSet};
use std::io::Write;

use serde::Serialize;

use crate::config::EffectiveConfig;
use crate::runner::RunResult;
#[allow(unused)]
use crate::log::*;

pub trait AsBytes {
    fn as_bytes<'s>(&'s self) -> &'s [u8];
}

impl AsBytes for String {
    fn as_bytes<'s>(&'s self) -> &'s [u8] {
        String::as_bytes(self)
    }
}

/// Selects what gets exported: a list of names, where `:all` selects
/// everything.
#[derive(Default)]
struct ExportChecker {
    export: HashSet<String>,
    export_all: bool,
}

impl ExportChecker {
    fn new(arg_list: &Option<Vec<String>>) -> Self {
        let mut checker = Self::default();
        for arg in arg_list.iter().flatten() {
            if arg == ":all" {
                checker.export_all = true;
            } else {
                checker.export.insert(arg.clone());
            }
        }
        checker
    }

    fn should_export(&self, name: &str) -> bool {
        self.export_all || self.export.contains(name)
    }
}

pub trait Exporter<D> {
    fn ignore_or_export<'s, F>(&'s mut self, name: &str, exporter: F)
        -> std::io::Result<()>
    where
        F: FnOnce() -> D + 's;

    fn flush(&mut self) -> std::io::Result<()>;
}

/// Writes every selected entry into its own `<dir>/<name><suffix>` file.
pub struct MultiFileExporter {
    dir: PathBuf,
    suffix: String,
    checker: ExportChecker,
}

impl MultiFileExporter {
    pub fn new(arg_list: &Option<Vec<String>>, dir: PathBuf, suffix: String) -> Self {
        Self { dir, suffix, checker: ExportChecker::new(arg_list) }
    }
}

impl<D> Exporter<D> for MultiFileExporter where D: AsBytes {
    fn ignore_or_export<'s, F>(&'s mut self, name: &str, exporter: F)
        -> std::io::Result<()>
    where
        F: FnOnce() -> D + 's
    {
        if self.checker.should_export(name) {
            let data = exporter();
            std::fs::create_dir_all(&self.dir)?;
            let path = self.dir.join(name.to_string() + &self.suffix);
            dbg_log!(DBG_EXTRA, "Exporting {} to {}", name, path.display());
            let mut file = File::create(path)?;
            return file.write_all(data.as_bytes());
        }
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Collects every selected entry into one JSON object written on `flush`.
pub struct CompoundJsonExporter<D> where D: Serialize {
    filename: PathBuf,
    data: BTreeMap<String, D>,
    checker: ExportChecker,
}

impl<D> CompoundJsonExporter<D> where D: Serialize {
    pub fn new(arg_list: &Option<Vec<String>>, filename: PathBuf) -> Self {
        Self {
            filename,
            data: BTreeMap::new(),
            checker: ExportChecker::new(arg_list),
        }
    }
}

impl<D> Exporter<D> for CompoundJsonExporter<D> where D: Serialize {
    fn ignore_or_export<'s, F>(&'s mut self, name: &str, exporter: F)
        -> std::io::Result<()>
    where
        F: FnOnce() -> D + 's
    {
        if self.checker.should_export(name) {
            let data = exporter();
            self.data.insert(name.into(), data);
        }
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let data = serde_json::to_string_pretty(&self.data)?;
        if let Some(parent) = self.filename.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&self.filename)?;
        file.write_all(data.as_bytes())?;
        file.write_all(b"\n")
    }
}

/// Sections of the JSON run report.
#[derive(Serialize)]
#[serde(untagged)]
pub enum ReportEntry<'a> {
    Text(String),
    Config(&'a EffectiveConfig),
    Run(&'a RunResult),
}

/// Writes the captured output of every selected stage of `result` into
/// `<reports_dir>/<stage>.log`.
pub fn export_stage_logs(
    selection: &Option<Vec<String>>,
    cfg: &EffectiveConfig,
    result: &RunResult
) -> std::io::Result<()> {
    let mut exporter = MultiFileExporter::new(selection, cfg.abs(&cfg.reports_dir), ".log".into());
    for stage in result.stages.iter().filter(|s| !s.invocations.is_empty()) {
        exporter.ignore_or_export(stage.stage.name(), || {
            let mut log = String::new();
            for (invocation, output) in stage.invocations.iter().zip(&stage.outputs) {
                log.push_str(&format!("$ {}\n", invocation));
                log.push_str(&output.stdout);
                log.push_str(&output.stderr);
            }
            log
        })?;
    }
    <MultiFileExporter as Exporter<String>>::flush(&mut exporter)
}

/// Writes the selected sections (`pipeline`, `config`, `run`) of the JSON
/// summary of one run.
pub fn export_report(
    path: PathBuf,
    sections: &Option<Vec<String>>,
    pipeline: &str,
    cfg: &EffectiveConfig,
    result: &RunResult
) -> std::io::Result<()> {
    let mut exporter = CompoundJsonExporter::new(sections, path);
    exporter.ignore_or_export("pipeline", || ReportEntry::Text(pipeline.to_string()))?;
    exporter.ignore_or_export("config", || ReportEntry::Config(cfg))?;
    exporter.ignore_or_export("run", || ReportEntry::Run(result))?;
    exporter.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::PipelineRunner;
    use crate::stage::StageKind;
    use crate::testing::*;

    fn run_synthesis(cfg: &EffectiveConfig) -> RunResult {
        let registry = full_registry(cfg);
        let mut exec = FakeExecutor::for_config(cfg);
        PipelineRunner::new(&registry, &mut exec)
            .run(&[StageKind::Synthesize, StageKind::PlaceRoute], cfg)
            .unwrap()
    }

    #[test]
    fn test_checker_selection() {
        let checker = ExportChecker::new(&Some(vec!["synthesize".into()]));
        assert!(checker.should_export("synthesize"));
        assert!(!checker.should_export("timing"));
        assert!(ExportChecker::new(&Some(vec![":all".into()])).should_export("timing"));
        assert!(!ExportChecker::new(&None).should_export("timing"));
    }

    #[test]
    fn test_stage_logs_follow_selection() {
        let (dir, cfg) = project("ice40");
        let result = run_synthesis(&cfg);

        export_stage_logs(&Some(vec!["synthesize".into()]), &cfg, &result).unwrap();

        let log = std::fs::read_to_string(dir.path().join("build/reports/synthesize.log")).unwrap();
        assert!(log.starts_with("$ yosys -q -l"));
        assert!(log.ends_with("yosys done\n"));
        assert!(!dir.path().join("build/reports/placeRoute.log").exists());
    }

    #[test]
    fn test_report_is_valid_json() {
        let (dir, cfg) = project("ice40");
        let result = run_synthesis(&cfg);
        let path = dir.path().join("out/report.json");

        export_report(path.clone(), &Some(vec![":all".into()]), "all", &cfg, &result).unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["pipeline"], "all");
        assert_eq!(json["config"]["device"], "up5k");
        assert_eq!(json["run"]["success"], true);
        assert_eq!(json["run"]["stages"][0]["stage"], "synthesize");
        assert_eq!(json["run"]["stages"][1]["status"], "succeeded");
    }

    #[test]
    fn test_report_sections_follow_selection() {
        let (dir, cfg) = project("ice40");
        let result = run_synthesis(&cfg);
        let path = dir.path().join("run.json");

        export_report(path.clone(), &Some(vec!["run".into()]), "all", &cfg, &result).unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["run"]["family"], "ice40");
        assert!(json.get("pipeline").is_none());
        assert!(json.get("config").is_none());
    }
}
