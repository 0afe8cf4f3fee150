//! Machine facts consumed by the selection pipeline.

use depot_core::{Architecture, Version};

/// Facts about the running machine.
///
/// Constructed explicitly by the host at startup, from whatever probes it
/// has; tests build one with canned values. Nothing in the pipeline reads
/// ambient process state.
#[derive(Debug, Clone)]
pub struct SystemContext {
    /// Version of the running OS.
    pub os_version: Version,
    /// Native processor architecture.
    pub architecture: Architecture,
    /// Market region of the machine (ISO 3166 alpha-2).
    pub market: String,
    /// The user's preferred display languages, best first.
    pub preferred_languages: Vec<String>,
}

impl SystemContext {
    /// Construct a context from probed values.
    #[must_use]
    pub fn new(
        os_version: Version,
        architecture: Architecture,
        market: impl Into<String>,
        preferred_languages: Vec<String>,
    ) -> Self {
        Self {
            os_version,
            architecture,
            market: market.into(),
            preferred_languages,
        }
    }

    /// The architectures this machine can execute, best first. Neutral
    /// payloads run everywhere and rank last.
    #[must_use]
    pub fn applicable_architectures(&self) -> Vec<Architecture> {
        match self.architecture {
            Architecture::X64 => vec![Architecture::X64, Architecture::X86, Architecture::Neutral],
            Architecture::X86 => vec![Architecture::X86, Architecture::Neutral],
            Architecture::Arm64 => vec![
                Architecture::Arm64,
                Architecture::Arm,
                Architecture::X86,
                Architecture::X64,
                Architecture::Neutral,
            ],
            Architecture::Arm => vec![Architecture::Arm, Architecture::Neutral],
            Architecture::Neutral | Architecture::Unknown => vec![Architecture::Neutral],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(architecture: Architecture) -> SystemContext {
        SystemContext::new(Version::parse("10.0.22000"), architecture, "US", Vec::new())
    }

    #[test]
    fn native_architecture_ranks_first() {
        assert_eq!(
            context(Architecture::X64).applicable_architectures()[0],
            Architecture::X64
        );
        assert_eq!(
            context(Architecture::Arm64).applicable_architectures()[0],
            Architecture::Arm64
        );
    }

    #[test]
    fn neutral_is_always_applicable_and_last() {
        for architecture in [
            Architecture::X86,
            Architecture::X64,
            Architecture::Arm,
            Architecture::Arm64,
        ] {
            let list = context(architecture).applicable_architectures();
            assert_eq!(list.last(), Some(&Architecture::Neutral));
        }
    }

    #[test]
    fn emulation_reach_is_limited() {
        let x64 = context(Architecture::X64).applicable_architectures();
        assert!(!x64.contains(&Architecture::Arm64));
        let x86 = context(Architecture::X86).applicable_architectures();
        assert!(!x86.contains(&Architecture::X64));
    }
}
