// src/repository/build_system.rs

//! Build systems a package can declare
//!
//! Each build system knows its ordered phases, the tools it needs at
//! build time, and the command each phase runs for a given spec.

use crate::spec::ConcreteSpec;
use crate::variant::VariantValue;
use serde::{Deserialize, Serialize};
use std::path::Path;
use strum_macros::{Display, EnumString};

/// Supported build systems
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BuildSystem {
    /// Package provides its own install script
    #[default]
    Generic,
    Makefile,
    Autotools,
    CMake,
    Meson,
    /// No build of its own; exists to pull in dependencies
    Bundle,
}

/// A build phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Autoreconf,
    Configure,
    CMake,
    Meson,
    Build,
    Install,
}

/// One phase with the command it runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseStep {
    pub phase: Phase,
    pub command: Vec<String>,
}

impl BuildSystem {
    /// Phases in execution order
    pub fn phases(&self) -> &'static [Phase] {
        match self {
            Self::Generic => &[Phase::Install],
            Self::Makefile => &[Phase::Build, Phase::Install],
            Self::Autotools => &[Phase::Autoreconf, Phase::Configure, Phase::Build, Phase::Install],
            Self::CMake => &[Phase::CMake, Phase::Build, Phase::Install],
            Self::Meson => &[Phase::Meson, Phase::Build, Phase::Install],
            Self::Bundle => &[],
        }
    }

    /// Packages this build system needs at build time
    pub fn build_tools(&self) -> &'static [&'static str] {
        match self {
            Self::CMake => &["cmake"],
            Self::Meson => &["meson", "ninja"],
            _ => &[],
        }
    }

    /// Commands for each phase when building `spec` into `prefix`
    pub fn plan(&self, spec: &ConcreteSpec, prefix: &Path) -> Vec<PhaseStep> {
        let prefix = prefix.display().to_string();
        self.phases()
            .iter()
            .map(|&phase| PhaseStep {
                phase,
                command: self.command(phase, spec, &prefix),
            })
            .collect()
    }

    fn command(&self, phase: Phase, spec: &ConcreteSpec, prefix: &str) -> Vec<String> {
        let words = |ws: &[&str]| ws.iter().map(|w| w.to_string()).collect::<Vec<_>>();
        match (self, phase) {
            (Self::Generic, _) => vec!["./install.sh".to_string(), prefix.to_string()],
            (Self::Makefile, Phase::Build) => words(&["make"]),
            (Self::Makefile, _) => vec![
                "make".to_string(),
                "install".to_string(),
                format!("PREFIX={}", prefix),
            ],
            (Self::Autotools, Phase::Autoreconf) => words(&["autoreconf", "-ivf"]),
            (Self::Autotools, Phase::Configure) => {
                let mut cmd = vec!["./configure".to_string(), format!("--prefix={}", prefix)];
                for (name, value) in spec.variants() {
                    if let VariantValue::Bool(on) = value {
                        let flag = if *on { "enable" } else { "disable" };
                        cmd.push(format!("--{}-{}", flag, name.replace('_', "-")));
                    }
                }
                cmd
            }
            (Self::Autotools, Phase::Build) => words(&["make"]),
            (Self::Autotools, _) => words(&["make", "install"]),
            (Self::CMake, Phase::CMake) => {
                let build_type = spec
                    .variants()
                    .get("build_type")
                    .and_then(VariantValue::as_single)
                    .unwrap_or("Release");
                let mut cmd = vec![
                    "cmake".to_string(),
                    "-S".to_string(),
                    ".".to_string(),
                    "-B".to_string(),
                    "build".to_string(),
                    format!("-DCMAKE_INSTALL_PREFIX={}", prefix),
                    format!("-DCMAKE_BUILD_TYPE={}", build_type),
                ];
                if let Some(VariantValue::Bool(shared)) = spec.variants().get("shared") {
                    let on = if *shared { "ON" } else { "OFF" };
                    cmd.push(format!("-DBUILD_SHARED_LIBS={}", on));
                }
                cmd
            }
            (Self::CMake, Phase::Build) => words(&["cmake", "--build", "build"]),
            (Self::CMake, _) => words(&["cmake", "--install", "build"]),
            (Self::Meson, Phase::Meson) => vec![
                "meson".to_string(),
                "setup".to_string(),
                "build".to_string(),
                format!("--prefix={}", prefix),
            ],
            (Self::Meson, Phase::Build) => words(&["ninja", "-C", "build"]),
            (Self::Meson, _) => words(&["ninja", "-C", "build", "install"]),
            (Self::Bundle, _) => Vec::new(),
        }
    }
}
