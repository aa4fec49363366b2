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

//! `fpgaflow init`: creating a new project.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::{ConfigKey, ConfigResolver, EffectiveConfig, Layer, ProjectConfig};
use crate::error::ConfigError;
use crate::lock::LOCK_FILE;
use crate::log::*;

pub const MAX_NAME_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum ScaffoldError {
    #[error("invalid project name `{name}`: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("couldn't create {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub fn validate_name(name: &str) -> Result<(), ScaffoldError> {
    let invalid = |reason| Err(ScaffoldError::InvalidName { name: name.to_string(), reason });

    let mut chars = name.chars();
    match chars.next() {
        None => return invalid("the name is empty"),
        Some(c) if !c.is_ascii_alphabetic() => return invalid("must start with a letter"),
        _ => (),
    }
    if name.len() > MAX_NAME_LEN {
        return invalid("at most 64 characters are allowed");
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return invalid("only letters, digits, `_` and `-` are allowed");
    }
    Ok(())
}

/// What `init` did.
#[derive(Debug, Default)]
pub struct ScaffoldReport {
    pub created: Vec<PathBuf>,
    /// Files that already existed and were left untouched.
    pub kept: Vec<PathBuf>,
}

const BLINKY: &str = "\
module @TOP@ #(
    parameter WIDTH = 24
) (
    input  wire clk,
    output wire led
);
    reg [WIDTH-1:0] counter = 0;

    always @(posedge clk)
        counter <= counter + 1'b1;

    assign led = counter[WIDTH-1];
endmodule
";

/* The simulate stage passes +dumpfile=<waveform> to the runtime */
const TESTBENCH: &str = "\
`timescale 1ns / 1ps

module @TB@;
    reg clk = 0;
    wire led;
    reg [8*256-1:0] dumpfile;

    @TOP@ #(.WIDTH(4)) dut (
        .clk(clk),
        .led(led)
    );

    always #5 clk = ~clk;

    task expect_led(input value);
        if (led !== value)
            $fatal(1, \"FAIL: led is %b at %0t, expected %b\", led, $time, value);
    endtask

    initial begin
        if ($value$plusargs(\"dumpfile=%s\", dumpfile))
            $dumpfile(dumpfile);
        else
            $dumpfile(\"@TB@.vcd\");
        $dumpvars(0, @TB@);

        repeat (8) @(posedge clk);
        #1 expect_led(1'b1);
        repeat (8) @(posedge clk);
        #1 expect_led(1'b0);

        $display(\"PASS\");
        $finish;
    end
endmodule
";

/* Pin-outs of each family's default board */
fn constraints_template(family: &str) -> &'static str {
    match family {
        "ice40" => "\
# iCEBreaker
set_io -nowarn clk 35
set_io -nowarn led 11
",
        "ecp5" => "\
# ULX3S
LOCATE COMP \"clk\" SITE \"G2\";
IOBUF PORT \"clk\" IO_TYPE=LVCMOS33;
FREQUENCY PORT \"clk\" 25 MHZ;
LOCATE COMP \"led\" SITE \"B2\";
IOBUF PORT \"led\" IO_TYPE=LVCMOS33;
",
        "cyclone4" => "\
# DE0-Nano
set_location_assignment PIN_R8 -to clk
set_location_assignment PIN_A15 -to led
set_instance_assignment -name IO_STANDARD \"3.3-V LVTTL\" -to clk
set_instance_assignment -name IO_STANDARD \"3.3-V LVTTL\" -to led
",
        _ => "",
    }
}

pub const QUARTUS_FLOW_SCRIPT: &str = "scripts/quartus_flow.tcl";

/* Every path argument is relative to the project root, which is the working
 * directory inside the container. */
const QUARTUS_FLOW: &str = r#"# quartus_sh -t scripts/quartus_flow.tcl <stage> <project> <args...> [sources...]
package require ::quartus::project
package require ::quartus::flow

set stage   [lindex $argv 0]
set project [lindex $argv 1]
set root    [pwd]
set workdir [file join $root build quartus]

proc open_flow_project {workdir project} {
    file mkdir $workdir
    cd $workdir
    if {[project_exists $project]} {
        project_open $project
    } else {
        project_new $project
    }
}

proc report {workdir project kind} {
    return [file join $workdir output_files "$project.$kind.rpt"]
}

open_flow_project $workdir $project

switch -- $stage {
    synthesize {
        lassign [lrange $argv 2 5] top device netlist synth_log
        set_global_assignment -name FAMILY "Cyclone IV E"
        set_global_assignment -name DEVICE $device
        set_global_assignment -name TOP_LEVEL_ENTITY $top
        set_global_assignment -name PROJECT_OUTPUT_DIRECTORY output_files
        # The remaining arguments are the RTL sources, testbenches excluded
        foreach src [lrange $argv 6 end] {
            if {[file extension $src] eq ".sv"} {
                set_global_assignment -name SYSTEMVERILOG_FILE [file join $root $src]
            } else {
                set_global_assignment -name VERILOG_FILE [file join $root $src]
            }
        }
        execute_module -tool map
        execute_module -tool cdb -args "--vqm=[file join $root $netlist]"
        file copy -force [report $workdir $project map] [file join $root $synth_log]
    }
    placeRoute {
        lassign [lrange $argv 2 end] device netlist placed constraints
        if {$constraints ne ""} {
            source [file join $root $constraints]
        }
        execute_module -tool fit
        file mkdir [file dirname [file join $root $placed]]
        execute_module -tool cdb -args "--export_database=[file join $root $placed]"
    }
    timing {
        lassign [lrange $argv 2 end] placed timing_report
        execute_module -tool sta
        file copy -force [report $workdir $project sta] [file join $root $timing_report]
    }
    bitstream {
        lassign [lrange $argv 2 end] placed bitstream
        execute_module -tool asm
        file mkdir [file dirname [file join $root $bitstream]]
        file copy -force [file join $workdir output_files "$project.sof"] [file join $root $bitstream]
    }
    default {
        post_message -type error "unknown stage $stage"
        exit 1
    }
}

project_close
"#;

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ScaffoldError + '_ {
    move |source| ScaffoldError::Io { path: path.to_path_buf(), source }
}

fn write_new(path: &Path, content: &str, report: &mut ScaffoldReport) -> Result<(), ScaffoldError> {
    if path.exists() {
        dbg_log!(DBG_INFO, "Keeping existing {}", path.display());
        report.kept.push(path.to_path_buf());
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    std::fs::write(path, content).map_err(io_err(path))?;
    report.created.push(path.to_path_buf());
    Ok(())
}

/// Creates a project called `name` in `root` (created if needed) for
/// `family`. `overrides` are validated like any other configuration and
/// stored in the project file.
pub fn init(
    root: &Path,
    name: &str,
    family: &str,
    overrides: &BTreeMap<String, String>
) -> Result<ScaffoldReport, ScaffoldError> {
    validate_name(name)?;

    let mut settings = overrides.clone();
    settings.insert(ConfigKey::Project.name().to_string(), name.to_string());
    let cfg = ConfigResolver::new(root).resolve(family, &settings)?;

    let mut report = ScaffoldReport::default();
    for dir in [&cfg.rtl_dir, &cfg.tb_dir, &cfg.sim_dir, &cfg.synth_dir, &cfg.pnr_dir,
                &cfg.bitstream_dir, &cfg.reports_dir]
    {
        let dir = cfg.abs(dir);
        std::fs::create_dir_all(&dir).map_err(io_err(&dir))?;
    }

    write_new(&ProjectConfig::path(root), &project_file(&cfg)?, &mut report)?;

    let rtl = cfg.abs(cfg.rtl_dir.join(format!("{}.v", cfg.top)));
    write_new(&rtl, &BLINKY.replace("@TOP@", &cfg.top), &mut report)?;

    let tb = cfg.abs(cfg.tb_dir.join(format!("{}.v", cfg.testbench)));
    let testbench = TESTBENCH.replace("@TB@", &cfg.testbench).replace("@TOP@", &cfg.top);
    write_new(&tb, &testbench, &mut report)?;

    write_new(
        &cfg.abs(&cfg.constraints),
        constraints_template(cfg.family.name),
        &mut report
    )?;
    if cfg.family.container_image.is_some() {
        write_new(&root.join(QUARTUS_FLOW_SCRIPT), QUARTUS_FLOW, &mut report)?;
    }
    write_new(&root.join(".gitignore"), &format!("build/\n{}\n", LOCK_FILE), &mut report)?;

    Ok(report)
}

/* Family, the device pair and whatever was set explicitly */
fn project_file(cfg: &EffectiveConfig) -> Result<String, ScaffoldError> {
    let mut persisted = ProjectConfig::default();
    persisted.set("family", cfg.family.name);
    for key in ConfigKey::ALL {
        let always = matches!(key, ConfigKey::Device | ConfigKey::Package | ConfigKey::Project);
        if always || cfg.origin(*key) == Layer::Override {
            persisted.set(key.name(), &cfg.get(*key));
        }
    }
    serde_yaml::to_string(&persisted).map_err(|e| ScaffoldError::Io {
        path: ProjectConfig::path(&cfg.root),
        source: io::Error::new(io::ErrorKind::InvalidData, e),
    })
}
