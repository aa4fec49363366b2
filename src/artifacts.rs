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
use std::time::SystemTime;

use crate::config::EffectiveConfig;
use crate::filelist;
use crate::stage::StageKind;

/// Files flowing between pipeline stages.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    FileList,
    Constraints,
    SimBinary,
    Waveform,
    Netlist,
    SynthLog,
    PlacedDesign,
    TimingReport,
    Bitstream,
}

impl ArtifactKind {
    pub const ALL: &'static [ArtifactKind] = &[
        Self::FileList,
        Self::Constraints,
        Self::SimBinary,
        Self::Waveform,
        Self::Netlist,
        Self::SynthLog,
        Self::PlacedDesign,
        Self::TimingReport,
        Self::Bitstream,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::FileList => "file_list",
            Self::Constraints => "constraints",
            Self::SimBinary => "sim_binary",
            Self::Waveform => "waveform",
            Self::Netlist => "netlist",
            Self::SynthLog => "synth_log",
            Self::PlacedDesign => "placed",
            Self::TimingReport => "timing_report",
            Self::Bitstream => "bitstream",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// Stage writing this artifact. `None` for user-maintained or generated
    /// inputs (source list, constraints).
    pub fn producer(self) -> Option<StageKind> {
        match self {
            Self::FileList | Self::Constraints => None,
            Self::SimBinary | Self::Waveform => Some(StageKind::Simulate),
            Self::Netlist | Self::SynthLog => Some(StageKind::Synthesize),
            Self::PlacedDesign => Some(StageKind::PlaceRoute),
            Self::TimingReport => Some(StageKind::Timing),
            Self::Bitstream => Some(StageKind::Bitstream),
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A concrete artifact of one configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub producer: Option<StageKind>,
}

/// Knows where every artifact lives for a given configuration and what is
/// currently on disk. Nothing is cached: files may change between queries.
#[derive(Default, Clone, Copy, Debug)]
pub struct ArtifactStore;

impl ArtifactStore {
    pub fn new() -> Self {
        Self
    }

    /// Declared location of `kind` relative to the project root (or absolute,
    /// when the configuration uses absolute directories).
    pub fn path_for(&self, kind: ArtifactKind, cfg: &EffectiveConfig) -> PathBuf {
        let family = cfg.family;
        match kind {
            ArtifactKind::FileList => cfg.file_list.clone(),
            ArtifactKind::Constraints => cfg.constraints.clone(),
            ArtifactKind::SimBinary => cfg.sim_dir.join(format!("{}.vvp", cfg.testbench)),
            ArtifactKind::Waveform => cfg.sim_dir.join(format!("{}.vcd", cfg.testbench)),
            ArtifactKind::Netlist =>
                cfg.synth_dir.join(format!("{}.{}", cfg.project, family.netlist_ext)),
            ArtifactKind::SynthLog => cfg.reports_dir.join(format!("{}_synth.log", cfg.project)),
            ArtifactKind::PlacedDesign =>
                cfg.pnr_dir.join(format!("{}.{}", cfg.project, family.placed_ext)),
            ArtifactKind::TimingReport =>
                cfg.reports_dir.join(format!("{}_timing.rpt", cfg.project)),
            ArtifactKind::Bitstream => cfg.bitstream_dir.join(format!(
                "{}_{}.{}", cfg.project, family.name, family.bitstream_ext
            )),
        }
    }

    pub fn artifact(&self, kind: ArtifactKind, cfg: &EffectiveConfig) -> Artifact {
        Artifact { kind, path: self.path_for(kind, cfg), producer: kind.producer() }
    }

    pub fn exists(&self, kind: ArtifactKind, cfg: &EffectiveConfig) -> bool {
        cfg.abs(self.path_for(kind, cfg)).is_file()
    }

    pub fn modified(&self, kind: ArtifactKind, cfg: &EffectiveConfig) -> Option<SystemTime> {
        std::fs::metadata(cfg.abs(self.path_for(kind, cfg)))
            .and_then(|m| m.modified())
            .ok()
    }

    /// Last change of `kind` seen as a stage input. The source list changes
    /// whenever one of the sources it names does.
    pub fn input_modified(&self, kind: ArtifactKind, cfg: &EffectiveConfig) -> Option<SystemTime> {
        let own = self.modified(kind, cfg);
        if kind != ArtifactKind::FileList {
            return own;
        }
        let sources = match filelist::read(cfg) {
            Ok(sources) => sources,
            Err(_) => return own,
        };
        sources.all()
            .filter_map(|p| std::fs::metadata(cfg.abs(p)).and_then(|m| m.modified()).ok())
            .chain(own)
            .max()
    }

    /// Whether `a` was modified after input `b`. A missing `a` is never
    /// newer, a missing `b` is older than anything that exists.
    pub fn newer_than(&self, a: ArtifactKind, b: ArtifactKind, cfg: &EffectiveConfig) -> bool {
        match (self.modified(a, cfg), self.input_modified(b, cfg)) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(ta), Some(tb)) => ta > tb,
        }
    }

    /// Advisory: `true` if every output exists and is newer than every input.
    pub fn up_to_date(
        &self,
        inputs: &[ArtifactKind],
        outputs: &[ArtifactKind],
        cfg: &EffectiveConfig
    ) -> bool {
        !outputs.is_empty() && outputs.iter().all(|o| {
            self.exists(*o, cfg) && inputs.iter().all(|i| self.newer_than(*o, *i, cfg))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigResolver;
    use std::collections::BTreeMap;
    use std::fs;
    use std::time::Duration;

    fn config(root: &std::path::Path, family: &str) -> EffectiveConfig {
        ConfigResolver::new(root).resolve(family, &BTreeMap::new()).unwrap()
    }

    #[test]
    fn test_paths_follow_configuration() {
        let cfg = config(std::path::Path::new("/work/blinky"), "ice40");
        let store = ArtifactStore::new();

        assert_eq!(
            store.path_for(ArtifactKind::Bitstream, &cfg),
            PathBuf::from("build/bitstream/blinky_ice40.bin")
        );
        assert_eq!(store.path_for(ArtifactKind::Netlist, &cfg), PathBuf::from("build/synth/blinky.json"));
        assert_eq!(store.path_for(ArtifactKind::PlacedDesign, &cfg), PathBuf::from("build/pnr/blinky.asc"));
        assert_eq!(store.path_for(ArtifactKind::Waveform, &cfg), PathBuf::from("build/sim/top_tb.vcd"));

        let ecp5 = config(std::path::Path::new("/work/blinky"), "ecp5");
        assert_eq!(
            store.path_for(ArtifactKind::Bitstream, &ecp5),
            PathBuf::from("build/bitstream/blinky_ecp5.bit")
        );
    }

    #[test]
    fn test_producers() {
        assert_eq!(ArtifactKind::PlacedDesign.producer(), Some(StageKind::PlaceRoute));
        assert_eq!(ArtifactKind::Bitstream.producer(), Some(StageKind::Bitstream));
        assert_eq!(ArtifactKind::Constraints.producer(), None);
    }

    #[test]
    fn test_existence_is_checked_on_every_query() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = config(dir.path(), "ice40");
        let store = ArtifactStore::new();

        assert!(!store.exists(ArtifactKind::Netlist, &cfg));
        let path = cfg.abs(store.path_for(ArtifactKind::Netlist, &cfg));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{}").unwrap();
        assert!(store.exists(ArtifactKind::Netlist, &cfg));
        fs::remove_file(&path).unwrap();
        assert!(!store.exists(ArtifactKind::Netlist, &cfg));
    }

    #[test]
    fn test_newer_than() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = config(dir.path(), "ice40");
        let store = ArtifactStore::new();

        let netlist = cfg.abs(store.path_for(ArtifactKind::Netlist, &cfg));
        let placed = cfg.abs(store.path_for(ArtifactKind::PlacedDesign, &cfg));
        fs::create_dir_all(netlist.parent().unwrap()).unwrap();
        fs::create_dir_all(placed.parent().unwrap()).unwrap();

        assert!(!store.newer_than(ArtifactKind::PlacedDesign, ArtifactKind::Netlist, &cfg));
        fs::write(&netlist, "{}").unwrap();
        assert!(store.newer_than(ArtifactKind::Netlist, ArtifactKind::PlacedDesign, &cfg));

        fs::write(&placed, "").unwrap();
        let later = SystemTime::now() + Duration::from_secs(10);
        fs::File::options().write(true).open(&placed).unwrap().set_modified(later).unwrap();
        assert!(store.newer_than(ArtifactKind::PlacedDesign, ArtifactKind::Netlist, &cfg));
        assert!(!store.newer_than(ArtifactKind::Netlist, ArtifactKind::PlacedDesign, &cfg));
        assert!(store.up_to_date(
            &[ArtifactKind::Netlist], &[ArtifactKind::PlacedDesign], &cfg
        ));
    }

    fn set_mtime(path: &std::path::Path, offset: u64) {
        let time = SystemTime::now() + Duration::from_secs(offset);
        fs::File::options().write(true).open(path).unwrap().set_modified(time).unwrap();
    }

    #[test]
    fn test_source_edit_makes_netlist_stale() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = config(dir.path(), "ice40");
        let store = ArtifactStore::new();
        let top = dir.path().join("rtl/top.v");
        fs::create_dir_all(top.parent().unwrap()).unwrap();
        fs::write(&top, "module top; endmodule\n").unwrap();
        filelist::generate(&cfg).unwrap();

        let netlist = cfg.abs(store.path_for(ArtifactKind::Netlist, &cfg));
        fs::create_dir_all(netlist.parent().unwrap()).unwrap();
        fs::write(&netlist, "{}").unwrap();
        set_mtime(&netlist, 10);
        assert!(store.up_to_date(&[ArtifactKind::FileList], &[ArtifactKind::Netlist], &cfg));

        /* The list itself stays byte-identical */
        fs::write(&top, "module top(output led); endmodule\n").unwrap();
        set_mtime(&top, 60);
        assert!(!filelist::generate(&cfg).unwrap().1);
        assert!(!store.newer_than(ArtifactKind::Netlist, ArtifactKind::FileList, &cfg));
        assert!(!store.up_to_date(&[ArtifactKind::FileList], &[ArtifactKind::Netlist], &cfg));
    }
}
