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

//! Static description of the supported FPGA families.
//!
//! Everything a family needs (device/package vocabulary, tool names, per-stage
//! command line templates, file extensions) is plain data, so supporting a new
//! family means adding one more `FamilyProfile` to `FAMILIES`.

use crate::artifacts::ArtifactKind;
use crate::stage::StageKind;
use crate::tools::ToolRole;

#[derive(Debug)]
pub struct DeviceInfo {
    pub name: &'static str,
    pub packages: &'static [&'static str],
}

/// A single argument of a command line template.
///
/// `Lit` arguments may contain `{placeholder}`s, which are substituted when
/// the stage is executed. Conditional groups are emitted only when the given
/// artifact exists (or doesn't) at execution time.
#[derive(Clone, Copy, Debug)]
pub enum Arg {
    Lit(&'static str),
    IfPresent(ArtifactKind, &'static [&'static str]),
    IfAbsent(ArtifactKind, &'static [&'static str]),
}

/// One external tool invocation within a stage.
#[derive(Clone, Copy, Debug)]
pub struct Step {
    pub tool: ToolRole,
    pub args: &'static [Arg],
}

#[derive(Clone, Copy, Debug)]
pub struct StageRecipe {
    pub stage: StageKind,
    pub steps: &'static [Step],
    /* Printed when an optional artifact consumed by this recipe is missing */
    pub missing_hint: Option<(ArtifactKind, &'static str)>,
}

#[derive(Debug)]
pub struct FamilyProfile {
    pub name: &'static str,
    pub description: &'static str,
    pub default_device: &'static str,
    pub default_package: &'static str,
    pub default_board: &'static str,
    pub default_programmer: &'static str,
    /* Programmers the recipes know how to drive, besides the default one */
    pub alternate_programmers: &'static [&'static str],
    pub container_image: Option<&'static str>,
    pub devices: &'static [DeviceInfo],
    pub tools: &'static [(ToolRole, &'static str)],
    pub recipes: &'static [StageRecipe],
    pub netlist_ext: &'static str,
    pub placed_ext: &'static str,
    pub bitstream_ext: &'static str,
    pub constraints_ext: &'static str,
}

const SIMULATE_ICARUS: StageRecipe = StageRecipe {
    stage: StageKind::Simulate,
    steps: &[
        Step {
            tool: ToolRole::Simulator,
            args: &[
                Arg::Lit("-g2012"),
                Arg::Lit("-o"),
                Arg::Lit("{sim_binary}"),
                Arg::Lit("-s"),
                Arg::Lit("{testbench}"),
                Arg::Lit("{sim_files}"),
            ],
        },
        Step {
            tool: ToolRole::SimRuntime,
            args: &[
                Arg::Lit("-n"),
                Arg::Lit("{sim_binary}"),
                Arg::Lit("+dumpfile={waveform}"),
            ],
        },
    ],
    missing_hint: None,
};

/* The programmer's arguments depend on which programmer is selected, not on
 * the family, so they live in `PROGRAMMERS`. */
const PROGRAM: StageRecipe = StageRecipe {
    stage: StageKind::Program,
    steps: &[Step { tool: ToolRole::Programmer, args: &[] }],
    missing_hint: None,
};

pub static PROGRAMMERS: &[(&str, &[Arg])] = &[
    ("iceprog", &[Arg::Lit("{bitstream}")]),
    ("openFPGALoader", &[Arg::Lit("--board"), Arg::Lit("{board}"), Arg::Lit("{bitstream}")]),
];

pub fn programmer_args(programmer: &str) -> Option<&'static [Arg]> {
    PROGRAMMERS.iter().find(|(name, _)| *name == programmer).map(|(_, args)| *args)
}

const ICE40: FamilyProfile = FamilyProfile {
    name: "ice40",
    description: "Lattice iCE40 (Yosys + nextpnr-ice40 + IceStorm)",
    default_device: "up5k",
    default_package: "sg48",
    default_board: "ice40_generic",
    default_programmer: "iceprog",
    alternate_programmers: &["openFPGALoader"],
    container_image: None,
    devices: &[
        DeviceInfo { name: "lp384", packages: &["qn32", "cm36", "cm49"] },
        DeviceInfo {
            name: "lp1k",
            packages: &["swg16tr", "cm36", "cm49", "cm81", "cb81", "qn84", "cm121", "cb121"],
        },
        DeviceInfo { name: "lp4k", packages: &["cm81", "cm121", "cm225"] },
        DeviceInfo { name: "lp8k", packages: &["cm81", "cm121", "cm225"] },
        DeviceInfo { name: "hx1k", packages: &["vq100", "cb132", "tq144"] },
        DeviceInfo { name: "hx4k", packages: &["cb132", "tq144", "bg121"] },
        DeviceInfo { name: "hx8k", packages: &["cm225", "cb132", "bg121", "ct256"] },
        DeviceInfo { name: "up3k", packages: &["sg48", "uwg30"] },
        DeviceInfo { name: "up5k", packages: &["sg48", "uwg30"] },
        DeviceInfo { name: "u4k", packages: &["sg48"] },
    ],
    tools: &[
        (ToolRole::Simulator, "iverilog"),
        (ToolRole::SimRuntime, "vvp"),
        (ToolRole::Synthesizer, "yosys"),
        (ToolRole::Placer, "nextpnr-ice40"),
        (ToolRole::TimingAnalyzer, "icetime"),
        (ToolRole::Packer, "icepack"),
        (ToolRole::Programmer, "iceprog"),
    ],
    recipes: &[
        SIMULATE_ICARUS,
        StageRecipe {
            stage: StageKind::Synthesize,
            steps: &[Step {
                tool: ToolRole::Synthesizer,
                args: &[
                    Arg::Lit("-q"),
                    Arg::Lit("-l"),
                    Arg::Lit("{synth_log}"),
                    Arg::Lit("-p"),
                    Arg::Lit("read_verilog -sv {rtl_files}; synth_ice40 -top {top} -json {netlist}"),
                ],
            }],
            missing_hint: None,
        },
        StageRecipe {
            stage: StageKind::PlaceRoute,
            steps: &[Step {
                tool: ToolRole::Placer,
                args: &[
                    Arg::Lit("--{device}"),
                    Arg::Lit("--package"),
                    Arg::Lit("{package}"),
                    Arg::Lit("--json"),
                    Arg::Lit("{netlist}"),
                    Arg::Lit("--asc"),
                    Arg::Lit("{placed}"),
                    Arg::IfPresent(ArtifactKind::Constraints, &["--pcf", "{constraints}"]),
                    Arg::IfAbsent(ArtifactKind::Constraints, &["--pcf-allow-unconstrained"]),
                ],
            }],
            missing_hint: Some((
                ArtifactKind::Constraints,
                "no pin constraint file, pins will be assigned automatically",
            )),
        },
        StageRecipe {
            stage: StageKind::Timing,
            steps: &[Step {
                tool: ToolRole::TimingAnalyzer,
                args: &[
                    Arg::Lit("-d"),
                    Arg::Lit("{device}"),
                    Arg::Lit("-P"),
                    Arg::Lit("{package}"),
                    Arg::IfPresent(ArtifactKind::Constraints, &["-p", "{constraints}"]),
                    Arg::Lit("-mtr"),
                    Arg::Lit("{timing_report}"),
                    Arg::Lit("{placed}"),
                ],
            }],
            missing_hint: None,
        },
        StageRecipe {
            stage: StageKind::Bitstream,
            steps: &[Step {
                tool: ToolRole::Packer,
                args: &[Arg::Lit("{placed}"), Arg::Lit("{bitstream}")],
            }],
            missing_hint: None,
        },
        PROGRAM,
    ],
    netlist_ext: "json",
    placed_ext: "asc",
    bitstream_ext: "bin",
    constraints_ext: "pcf",
};

const ECP5: FamilyProfile = FamilyProfile {
    name: "ecp5",
    description: "Lattice ECP5 (Yosys + nextpnr-ecp5 + Trellis)",
    default_device: "85k",
    default_package: "CABGA381",
    default_board: "ulx3s",
    default_programmer: "openFPGALoader",
    alternate_programmers: &[],
    container_image: None,
    devices: &[
        DeviceInfo { name: "12k", packages: &["CABGA256", "CABGA381", "CSFBGA285"] },
        DeviceInfo { name: "25k", packages: &["CABGA256", "CABGA381", "CSFBGA285"] },
        DeviceInfo { name: "45k", packages: &["CABGA256", "CABGA381", "CABGA554", "CSFBGA285"] },
        DeviceInfo { name: "85k", packages: &["CABGA381", "CABGA554", "CABGA756", "CSFBGA285"] },
        DeviceInfo { name: "um-25k", packages: &["CABGA256", "CABGA381", "CSFBGA285"] },
        DeviceInfo { name: "um-45k", packages: &["CABGA256", "CABGA381", "CABGA554", "CSFBGA285"] },
        DeviceInfo { name: "um-85k", packages: &["CABGA381", "CABGA554", "CABGA756", "CSFBGA285"] },
        DeviceInfo { name: "um5g-25k", packages: &["CABGA381", "CSFBGA285"] },
        DeviceInfo { name: "um5g-45k", packages: &["CABGA381", "CABGA554", "CSFBGA285"] },
        DeviceInfo { name: "um5g-85k", packages: &["CABGA381", "CABGA554", "CABGA756", "CSFBGA285"] },
    ],
    tools: &[
        (ToolRole::Simulator, "iverilog"),
        (ToolRole::SimRuntime, "vvp"),
        (ToolRole::Synthesizer, "yosys"),
        (ToolRole::Placer, "nextpnr-ecp5"),
        (ToolRole::Packer, "ecppack"),
        (ToolRole::Programmer, "openFPGALoader"),
    ],
    recipes: &[
        SIMULATE_ICARUS,
        StageRecipe {
            stage: StageKind::Synthesize,
            steps: &[Step {
                tool: ToolRole::Synthesizer,
                args: &[
                    Arg::Lit("-q"),
                    Arg::Lit("-l"),
                    Arg::Lit("{synth_log}"),
                    Arg::Lit("-p"),
                    Arg::Lit("read_verilog -sv {rtl_files}; synth_ecp5 -top {top} -json {netlist}"),
                ],
            }],
            missing_hint: None,
        },
        StageRecipe {
            stage: StageKind::PlaceRoute,
            steps: &[Step {
                tool: ToolRole::Placer,
                args: &[
                    Arg::Lit("--{device}"),
                    Arg::Lit("--package"),
                    Arg::Lit("{package}"),
                    Arg::Lit("--json"),
                    Arg::Lit("{netlist}"),
                    Arg::Lit("--textcfg"),
                    Arg::Lit("{placed}"),
                    Arg::IfPresent(ArtifactKind::Constraints, &["--lpf", "{constraints}"]),
                    Arg::IfAbsent(ArtifactKind::Constraints, &["--lpf-allow-unconstrained"]),
                ],
            }],
            missing_hint: Some((
                ArtifactKind::Constraints,
                "no LPF constraint file, pins will be assigned automatically",
            )),
        },
        StageRecipe {
            stage: StageKind::Bitstream,
            steps: &[Step {
                tool: ToolRole::Packer,
                args: &[Arg::Lit("--compress"), Arg::Lit("{placed}"), Arg::Lit("{bitstream}")],
            }],
            missing_hint: None,
        },
        PROGRAM,
    ],
    netlist_ext: "json",
    placed_ext: "config",
    bitstream_ext: "bit",
    constraints_ext: "lpf",
};

/* Quartus only runs inside a container here; the flow script is written by
 * `fpgaflow init` and receives every path relative to the mounted root. */
macro_rules! quartus_step {
    ($($arg:expr),* $(,)?) => {
        Step {
            tool: ToolRole::Container,
            args: &[
                Arg::Lit("run"),
                Arg::Lit("--rm"),
                Arg::Lit("-v"),
                Arg::Lit("{root}:/project"),
                Arg::Lit("-w"),
                Arg::Lit("/project"),
                Arg::Lit("{image}"),
                Arg::Lit("quartus_sh"),
                Arg::Lit("-t"),
                Arg::Lit("scripts/quartus_flow.tcl"),
                $( $arg ),*
            ],
        }
    };
}

const CYCLONE4: FamilyProfile = FamilyProfile {
    name: "cyclone4",
    description: "Intel Cyclone IV E (Quartus in a container)",
    default_device: "EP4CE22F17C6",
    default_package: "FBGA256",
    default_board: "de0nano",
    default_programmer: "openFPGALoader",
    alternate_programmers: &[],
    container_image: Some("quartus-lite:20.1"),
    devices: &[
        DeviceInfo { name: "EP4CE6E22C8", packages: &["EQFP144"] },
        DeviceInfo { name: "EP4CE10E22C8", packages: &["EQFP144"] },
        DeviceInfo { name: "EP4CE22E22C8", packages: &["EQFP144"] },
        DeviceInfo { name: "EP4CE22F17C6", packages: &["FBGA256"] },
    ],
    tools: &[
        (ToolRole::Simulator, "iverilog"),
        (ToolRole::SimRuntime, "vvp"),
        (ToolRole::Container, "docker"),
        (ToolRole::Programmer, "openFPGALoader"),
    ],
    recipes: &[
        SIMULATE_ICARUS,
        StageRecipe {
            stage: StageKind::Synthesize,
            steps: &[quartus_step!(
                Arg::Lit("synthesize"),
                Arg::Lit("{project}"),
                Arg::Lit("{top}"),
                Arg::Lit("{device}"),
                Arg::Lit("{netlist}"),
                Arg::Lit("{synth_log}"),
                Arg::Lit("{rtl_files}"),
            )],
            missing_hint: None,
        },
        StageRecipe {
            stage: StageKind::PlaceRoute,
            steps: &[quartus_step!(
                Arg::Lit("placeRoute"),
                Arg::Lit("{project}"),
                Arg::Lit("{device}"),
                Arg::Lit("{netlist}"),
                Arg::Lit("{placed}"),
                Arg::IfPresent(ArtifactKind::Constraints, &["{constraints}"]),
            )],
            missing_hint: Some((
                ArtifactKind::Constraints,
                "no pin assignment file, the fitter will place pins automatically",
            )),
        },
        StageRecipe {
            stage: StageKind::Timing,
            steps: &[quartus_step!(
                Arg::Lit("timing"),
                Arg::Lit("{project}"),
                Arg::Lit("{placed}"),
                Arg::Lit("{timing_report}"),
            )],
            missing_hint: None,
        },
        StageRecipe {
            stage: StageKind::Bitstream,
            steps: &[quartus_step!(
                Arg::Lit("bitstream"),
                Arg::Lit("{project}"),
                Arg::Lit("{placed}"),
                Arg::Lit("{bitstream}"),
            )],
            missing_hint: None,
        },
        PROGRAM,
    ],
    netlist_ext: "vqm",
    placed_ext: "qdb",
    bitstream_ext: "sof",
    constraints_ext: "qsf",
};

pub static FAMILIES: &[FamilyProfile] = &[ICE40, ECP5, CYCLONE4];

pub fn find(name: &str) -> Option<&'static FamilyProfile> {
    FAMILIES.iter().find(|f| f.name.eq_ignore_ascii_case(name))
}

pub fn known_names() -> String {
    FAMILIES.iter().map(|f| f.name).collect::<Vec<_>>().join(", ")
}

impl FamilyProfile {
    pub fn recipe(&self, stage: StageKind) -> Option<&StageRecipe> {
        self.recipes.iter().find(|r| r.stage == stage)
    }

    pub fn supports(&self, stage: StageKind) -> bool {
        self.recipe(stage).is_some()
    }

    /// Stages of this family, in pipeline order.
    pub fn stages(&self) -> Vec<StageKind> {
        let mut stages: Vec<_> = self.recipes.iter().map(|r| r.stage).collect();
        stages.sort();
        stages
    }

    pub fn device(&self, name: &str) -> Option<&'static DeviceInfo> {
        self.devices.iter().find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// Every package any device of the family ships in, without duplicates.
    pub fn packages(&self) -> Vec<&'static str> {
        let mut packages: Vec<&'static str> = Vec::new();
        for pkg in self.devices.iter().flat_map(|d| d.packages.iter()) {
            if !packages.contains(pkg) {
                packages.push(pkg);
            }
        }
        packages
    }

    pub fn package(&self, name: &str) -> Option<&'static str> {
        self.packages().into_iter().find(|p| p.eq_ignore_ascii_case(name))
    }

    /// Programmers the `programmer` key may select for this family.
    pub fn programmers(&self) -> Vec<&'static str> {
        std::iter::once(self.default_programmer)
            .chain(self.alternate_programmers.iter().copied())
            .collect()
    }

    pub fn tool_name(&self, role: ToolRole) -> Option<&'static str> {
        self.tools.iter().find(|(r, _)| *r == role).map(|(_, name)| *name)
    }

    /// Logical tool names needed across this family's stages, in stage order.
    pub fn required_tools(&self) -> Vec<&'static str> {
        self.tools.iter().map(|(_, name)| *name).collect()
    }

    /// Checks the internal consistency of the table entry: every listed tool
    /// is used by a stage recipe, every recipe step uses a listed tool and the
    /// defaults are part of the family's own vocabulary.
    pub fn validate(&self) -> Result<(), String> {
        for (role, name) in self.tools {
            let used = self.recipes.iter()
                .flat_map(|r| r.steps.iter())
                .any(|s| s.tool == *role);
            if !used {
                return Err(format!(
                    "{}: tool `{}` ({}) is not used by any stage", self.name, name, role
                ));
            }
        }
        for recipe in self.recipes {
            for step in recipe.steps {
                if self.tool_name(step.tool).is_none() {
                    return Err(format!(
                        "{}: stage `{}` uses {} which has no tool binding",
                        self.name, recipe.stage, step.tool
                    ));
                }
            }
        }
        let device = self.device(self.default_device).ok_or_else(|| {
            format!("{}: unknown default device {}", self.name, self.default_device)
        })?;
        if !device.packages.contains(&self.default_package) {
            return Err(format!(
                "{}: default package {} is not offered for {}",
                self.name, self.default_package, self.default_device
            ));
        }
        if self.tool_name(ToolRole::Programmer) != Some(self.default_programmer) {
            return Err(format!(
                "{}: default programmer {} is not the bound programmer", self.name,
                self.default_programmer
            ));
        }
        for programmer in self.programmers() {
            if programmer_args(programmer).is_none() {
                return Err(format!("{}: no recipe for programmer {}", self.name, programmer));
            }
        }
        Ok(())
    }
}
