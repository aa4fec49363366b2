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

use clap::Parser;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[macro_use]
extern crate fpgaflow;

use fpgaflow::config::DEFAULT_FAMILY;
use fpgaflow::exporter::{export_report, export_stage_logs};
use fpgaflow::filelist;
use fpgaflow::lock::ProjectLock;
use fpgaflow::scaffold;
use fpgaflow::stage;
use fpgaflow::tools::WAVE_VIEWER;
#[allow(unused)]
use fpgaflow::log::*;
use fpgaflow::*;

#[derive(Parser, Debug)]
#[clap(
    author = "Antmicro",
    version = "0.1.0",
    about = "fpgaflow - FPGA build configuration and pipeline runner",
    long_about = None
)]
struct Args {
    #[clap(flatten)]
    opts: GlobalOpts,
    #[clap(subcommand)]
    command: SubCommands,
}

/* Every `EffectiveConfig` field has a dedicated flag */
macro_rules! config_flags {
    ($( $field:ident : $help:literal ),* $(,)?) => {
        #[derive(Parser, Debug)]
        struct ConfigFlags {
            $(
                #[clap(long, global = true, help = $help)]
                $field: Option<String>,
            )*
        }

        impl ConfigFlags {
            fn overrides(&self) -> Vec<(&'static str, &str)> {
                let mut out = Vec::new();
                $(
                    if let Some(value) = &self.$field {
                        out.push((stringify!($field), value.as_str()));
                    }
                )*
                out
            }
        }
    };
}

config_flags! {
    device: "Target device",
    package: "Device package",
    top: "Top-level RTL module",
    testbench: "Top-level testbench module",
    project: "Project name, used to name the artifacts",
    rtl_dir: "Directory with RTL sources",
    tb_dir: "Directory with testbench sources",
    sim_dir: "Output directory of the simulation",
    synth_dir: "Output directory of the synthesis",
    pnr_dir: "Output directory of place & route",
    bitstream_dir: "Output directory of the bitstream",
    reports_dir: "Directory for reports and logs",
    file_list: "Generated list of HDL sources",
    constraints: "Pin constraint file",
    programmer: "Device programmer tool",
    board: "Board passed to the programmer",
    container_image: "Container image running vendor tools",
}

#[derive(Parser, Debug)]
struct GlobalOpts {
    #[clap(long, global = true, default_value = ".", help = "Project root directory")]
    root: String,
    #[clap(long, global = true, help = "FPGA family (defaults to the project's)")]
    family: Option<String>,
    #[clap(flatten)]
    config: ConfigFlags,
    #[clap(
        long = "set",
        global = true,
        number_of_values = 1,
        value_name = "KEY=VALUE",
        help = "Override any configuration key"
    )]
    set: Vec<String>,
    #[clap(
        long = "tool",
        global = true,
        number_of_values = 1,
        value_name = "NAME=PATH",
        help = "Use the given executable for a tool instead of searching PATH"
    )]
    tool: Vec<String>,
    #[clap(long, global = true, help = "Kill tools running longer than this many seconds")]
    timeout: Option<u64>,
    #[clap(long, global = true, help = "Write a JSON summary of the run to this file")]
    report: Option<String>,
    #[clap(
        long,
        global = true,
        number_of_values = 1,
        default_value = ":all",
        help = "Sections of the report to write: pipeline, config, run (:all for all)"
    )]
    report_sections: Vec<String>,
    #[clap(
        long,
        global = true,
        number_of_values = 1,
        help = "Stages to have their tool output saved to <reports_dir>/<stage>.log (:all for all)"
    )]
    logs: Option<Vec<String>>,
    #[clap(short, long, global = true, help = "Don't stream tool output while running")]
    quiet: bool,
}

#[derive(Parser, Debug)]
struct RunCmd {
    #[clap(help = "Stage, all, quick-test, flash or a family name")]
    pipeline: String,
}

#[derive(Parser, Debug)]
struct InitCmd {
    #[clap(help = "Project name")]
    name: String,
    #[clap(long, help = "Create the project in --root itself instead of <root>/<name>")]
    here: bool,
}

#[derive(Parser, Debug)]
struct ConfigCmd {
    #[clap(long, help = "Store the given overrides in the project file")]
    save: bool,
}

#[derive(Parser, Debug)]
enum SubCommands {
    /// Simulate the testbench
    Sim,
    /// Synthesize the design
    Synth,
    /// Place and route the netlist
    Pnr,
    /// Run static timing analysis
    Timing,
    /// Generate the bitstream
    Bitstream,
    /// Program the device
    Prog,
    /// Synthesize, place & route, analyze timing and generate the bitstream
    All,
    /// Simulate and synthesize
    QuickTest,
    /// Build everything and program the device
    Flash,
    /// Run a named pipeline
    Run(RunCmd),
    /// Create a new project
    Init(InitCmd),
    /// Regenerate the source file list
    Files,
    /// Show the artifacts of the project
    Status,
    /// Show the effective configuration
    Config(ConfigCmd),
    /// Show the tools required by the family
    Tools,
    /// Open the simulation waveform
    Wave,
}

impl GlobalOpts {
    fn overrides(&self) -> Result<BTreeMap<String, String>, ConfigError> {
        let mut overrides = BTreeMap::new();
        for (key, value) in self.config.overrides() {
            overrides.insert(key.to_string(), value.to_string());
        }
        for entry in &self.set {
            let (key, value) = entry.split_once('=').ok_or_else(|| ConfigError::InvalidValue {
                key: "set".into(),
                value: entry.clone(),
                reason: "expected KEY=VALUE".into(),
            })?;
            overrides.insert(key.trim().to_string(), value.to_string());
        }
        Ok(overrides)
    }

    fn registry(&self) -> Result<ToolRegistry, ConfigError> {
        let mut registry = ToolRegistry::from_env();
        for entry in &self.tool {
            let (name, path) = entry.split_once('=').ok_or_else(|| ConfigError::InvalidValue {
                key: "tool".into(),
                value: entry.clone(),
                reason: "expected NAME=PATH".into(),
            })?;
            registry.bind(name, path);
        }
        Ok(registry)
    }

    fn root(&self) -> Result<PathBuf, FlowError> {
        Ok(std::fs::canonicalize(&self.root)?)
    }

    /// Resolves the configuration. `family` (from a family pipeline) wins
    /// over `--family`, which wins over the project's family.
    fn resolve(&self, family: Option<&str>) -> Result<EffectiveConfig, FlowError> {
        let resolver = ConfigResolver::load(self.root()?)?;
        let family = family
            .or(self.family.as_deref())
            .unwrap_or_else(|| resolver.default_family());
        Ok(resolver.resolve(family, &self.overrides()?)?)
    }
}

/// Prints a banner and the warnings of every stage.
struct ProgressPrinter;

impl RunObserver for ProgressPrinter {
    fn stage_started(&mut self, stage: StageKind, cfg: &EffectiveConfig) {
        println!("==> [{}] {}", cfg.family.name, stage);
    }

    fn stage_finished(&mut self, result: &StageResult) {
        for warning in &result.warnings {
            eprintln!("warning: {}", warning);
        }
        if result.was_up_to_date {
            println!("    (outputs were already up to date)");
        }
        match result.status {
            StageState::Succeeded => println!("    {} succeeded", result.stage),
            StageState::Pending => (),
            status => println!("    {} {:?}", result.stage, status),
        }
    }
}

fn print_summary(pipeline: &Pipeline, result: &RunResult, quiet: bool) {
    match &result.first_failure {
        None => {
            println!(
                "fpgaflow: {} succeeded ({} stages, {})",
                pipeline, result.stages.len(), result.family
            );
        }
        Some(failure) => {
            if let StageError::ToolExecutionFailed { tool, diagnostics, .. } = &failure.error {
                /* Already streamed unless quiet */
                if quiet {
                    eprintln!("---- {} output ----", tool);
                    eprint!("{}", diagnostics);
                    eprintln!("---- end of {} output ----", tool);
                }
            }
            let verb = if result.cancelled() { "cancelled" } else { "failed" };
            eprintln!("fpgaflow: {} {} at {}", pipeline, verb, failure);
        }
    }
}

fn run_pipeline(opts: &GlobalOpts, pipeline: Pipeline) -> Result<bool, FlowError> {
    let cfg = opts.resolve(pipeline.family())?;
    let stages = pipeline.stages(cfg.family);
    let _lock = ProjectLock::acquire(&cfg.root)?;

    if stages.iter().any(|s| matches!(s, StageKind::Simulate | StageKind::Synthesize)) {
        let (sources, written) = filelist::generate(&cfg)?;
        if written {
            println!(
                "Updated {} ({} sources)", cfg.file_list.display(), sources.all().count()
            );
        }
    }

    let registry = opts.registry()?;
    let cancel = CancelToken::on_interrupt().unwrap_or_else(|e| {
        dbg_log!(DBG_WARN, "Couldn't install the SIGINT handler: {}", e);
        CancelToken::new()
    });
    let mut executor = ProcessExecutor::new(cancel.clone())
        .with_timeout(opts.timeout.map(Duration::from_secs))
        .with_echo(!opts.quiet);
    let mut printer = ProgressPrinter;

    let result = PipelineRunner::new(&registry, &mut executor)
        .with_cancel(cancel)
        .with_observer(&mut printer)
        .run(&stages, &cfg)?;

    if let Some(path) = &opts.report {
        let path = PathBuf::from(path);
        export_report(path.clone(), &Some(opts.report_sections.clone()), &pipeline.to_string(), &cfg, &result)
            .map_err(|source| FlowError::Export { path, source })?;
    }
    export_stage_logs(&opts.logs, &cfg, &result)
        .map_err(|source| FlowError::Export { path: cfg.abs(&cfg.reports_dir), source })?;

    print_summary(&pipeline, &result, opts.quiet);
    Ok(result.success)
}

fn init(opts: &GlobalOpts, args: &InitCmd) -> Result<bool, FlowError> {
    let root = Path::new(&opts.root);
    let dir = if args.here { root.to_path_buf() } else { root.join(&args.name) };
    let family = opts.family.as_deref().unwrap_or(DEFAULT_FAMILY);

    let report = scaffold::init(&dir, &args.name, family, &opts.overrides()?)?;
    for path in &report.created {
        println!("created {}", path.display());
    }
    for path in &report.kept {
        println!("kept    {}", path.display());
    }
    println!("Project {} ({}) is ready in {}", args.name, family, dir.display());
    Ok(true)
}

fn files(opts: &GlobalOpts) -> Result<bool, FlowError> {
    let cfg = opts.resolve(None)?;
    let (sources, written) = filelist::generate(&cfg)?;
    for path in sources.all() {
        println!("{}", path.display());
    }
    println!(
        "{} {}",
        cfg.file_list.display(),
        if written { "updated" } else { "unchanged" }
    );
    Ok(true)
}

fn status(opts: &GlobalOpts) -> Result<bool, FlowError> {
    let cfg = opts.resolve(None)?;
    let store = ArtifactStore::new();
    println!("{} {} {} ({})", cfg.project, cfg.family.name, cfg.device, cfg.package);
    for kind in ArtifactKind::ALL {
        let path = store.path_for(*kind, &cfg);
        let state = match (store.exists(*kind, &cfg), kind.producer()) {
            (false, _) => "missing",
            (true, None) => "present",
            (true, Some(producer)) => {
                let stale = producer.consumes().iter().any(|i| !store.newer_than(*kind, *i, &cfg));
                if stale { "stale" } else { "up to date" }
            }
        };
        println!("  {:<14} {:<11} {}", kind.name(), state, path.display());
    }
    Ok(true)
}

fn config(opts: &GlobalOpts, args: &ConfigCmd) -> Result<bool, FlowError> {
    let cfg = opts.resolve(None)?;
    println!("{:<16} {:<24} ({})", "family", cfg.family.name, cfg.family.description);
    for key in ConfigKey::ALL {
        println!("{:<16} {:<24} ({})", key.name(), cfg.get(*key), cfg.origin(*key));
    }

    if args.save {
        let mut persisted = ProjectConfig::load(&cfg.root)?.unwrap_or_default();
        persisted.set("family", cfg.family.name);
        for key in ConfigKey::ALL.iter().filter(|k| cfg.origin(**k) == Layer::Override) {
            persisted.set(key.name(), &cfg.get(*key));
        }
        persisted.save(&cfg.root)?;
        println!("Saved {}", ProjectConfig::path(&cfg.root).display());
    }
    Ok(true)
}

fn tools(opts: &GlobalOpts) -> Result<bool, FlowError> {
    let cfg = opts.resolve(None)?;
    let registry = opts.registry()?;
    let mut all_found = true;

    let mut show = |role: String, name: &str| {
        let binding = registry.resolve(name);
        all_found &= binding.is_found();
        println!("  {:<20} {:<16} {}", role, name, binding);
    };
    for (role, name) in cfg.family.tools {
        if *role != ToolRole::Programmer {
            show(role.to_string(), *name);
        }
    }
    for programmer in cfg.family.programmers() {
        let selected = if programmer == cfg.programmer { " (selected)" } else { "" };
        show(format!("programmer{}", selected), programmer);
    }
    show(ToolRole::Viewer.to_string(), WAVE_VIEWER);
    Ok(all_found)
}

fn wave(opts: &GlobalOpts) -> Result<bool, FlowError> {
    let cfg = opts.resolve(None)?;
    let registry = opts.registry()?;

    let invocation = match stage::viewer_invocation(&cfg, &ArtifactStore::new(), &registry) {
        Ok(invocation) => invocation,
        Err(problem) => {
            eprintln!("fpgaflow: wave: {}", problem);
            return Ok(false);
        }
    };
    let cancel = CancelToken::on_interrupt().unwrap_or_default();
    match ProcessExecutor::new(cancel).with_echo(!opts.quiet).execute(&invocation) {
        Ok(output) => Ok(output.success()),
        Err(e) => {
            eprintln!("fpgaflow: wave: {}", e);
            Ok(false)
        }
    }
}

fn main() {
    let args = Args::parse();
    let opts = &args.opts;

    let outcome = match &args.command {
        SubCommands::Sim => run_pipeline(opts, Pipeline::Stage(StageKind::Simulate)),
        SubCommands::Synth => run_pipeline(opts, Pipeline::Stage(StageKind::Synthesize)),
        SubCommands::Pnr => run_pipeline(opts, Pipeline::Stage(StageKind::PlaceRoute)),
        SubCommands::Timing => run_pipeline(opts, Pipeline::Stage(StageKind::Timing)),
        SubCommands::Bitstream => run_pipeline(opts, Pipeline::Stage(StageKind::Bitstream)),
        SubCommands::Prog => run_pipeline(opts, Pipeline::Stage(StageKind::Program)),
        SubCommands::All => run_pipeline(opts, Pipeline::All),
        SubCommands::QuickTest => run_pipeline(opts, Pipeline::QuickTest),
        SubCommands::Flash => run_pipeline(opts, Pipeline::Flash),
        SubCommands::Run(cmd) => match cmd.pipeline.parse::<Pipeline>() {
            Ok(pipeline) => run_pipeline(opts, pipeline),
            Err(e) => {
                eprintln!("fpgaflow: {}", e);
                std::process::exit(2);
            }
        },
        SubCommands::Init(cmd) => init(opts, cmd),
        SubCommands::Files => files(opts),
        SubCommands::Status => status(opts),
        SubCommands::Config(cmd) => config(opts, cmd),
        SubCommands::Tools => tools(opts),
        SubCommands::Wave => wave(opts),
    };

    let code = exit_code(&outcome);
    if let Err(e) = outcome {
        eprintln!("fpgaflow: {}", e);
    }
    std::process::exit(code);
}

/// 0 when everything succeeded, 1 when a stage or tool failed and 2 when the
/// run couldn't be set up at all.
fn exit_code(outcome: &Result<bool, FlowError>) -> i32 {
    match outcome {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(_) => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("fpgaflow").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_config_flags_map_to_keys() {
        let args = parse(&[
            "synth", "--rtl-dir", "hdl", "--device", "hx8k", "--container-image", "quartus:21.1",
        ]);
        assert!(matches!(args.command, SubCommands::Synth));

        let overrides = args.opts.overrides().unwrap();
        assert_eq!(overrides.len(), 3);
        assert_eq!(overrides["rtl_dir"], "hdl");
        assert_eq!(overrides["device"], "hx8k");
        assert_eq!(overrides["container_image"], "quartus:21.1");
        for key in overrides.keys() {
            assert!(key.parse::<ConfigKey>().is_ok(), "{}", key);
        }
    }

    #[test]
    fn test_set_overrides_any_key() {
        let args = parse(&["all", "--set", "top=blinky", "--set", "tb-dir=verif"]);
        let overrides = args.opts.overrides().unwrap();
        assert_eq!(overrides["top"], "blinky");
        assert_eq!(overrides["tb-dir"], "verif");

        let args = parse(&["--device", "hx8k", "synth"]);
        assert_eq!(args.opts.overrides().unwrap()["device"], "hx8k");

        let args = parse(&["all", "--set", "top"]);
        assert!(matches!(
            args.opts.overrides(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "set"
        ));
    }

    #[test]
    fn test_export_options() {
        let args = parse(&["flash", "--logs", "synthesize", "--logs", "timing", "--quiet"]);
        assert_eq!(args.opts.logs, Some(vec!["synthesize".to_string(), "timing".to_string()]));
        assert_eq!(args.opts.report_sections, vec![":all".to_string()]);
        assert!(args.opts.quiet);
        assert_eq!(args.opts.root, ".");

        let args = parse(&["run", "ecp5", "--report", "out.json", "--report-sections", "run"]);
        assert!(matches!(args.command, SubCommands::Run(ref cmd) if cmd.pipeline == "ecp5"));
        assert_eq!(args.opts.report.as_deref(), Some("out.json"));
        assert_eq!(args.opts.report_sections, vec!["run".to_string()]);
    }

    #[test]
    fn test_tool_bindings_need_a_path() {
        let args = parse(&["tools", "--tool", "yosys"]);
        assert!(args.opts.registry().is_err());

        let args = parse(&["tools", "--tool", "yosys=/bin/sh"]);
        let registry = args.opts.registry().unwrap();
        assert_eq!(registry.resolve("yosys").path(), Some(Path::new("/bin/sh")));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&Ok(true)), 0);
        assert_eq!(exit_code(&Ok(false)), 1);
        assert_eq!(exit_code(&Err(FlowError::Locked("busy".into()))), 2);
    }
}
