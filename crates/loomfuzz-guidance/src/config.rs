//! Campaign configuration: engine selection, limits, directories, and the
//! validation that runs before any trial.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Which guidance engine drives the campaign.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Engine {
    /// Classic coverage guidance over a linear choice stream.
    Zest,
    /// Linear stream with call/return tracing for execution-indexing
    /// extensions.
    Zeal,
    /// Behavioral-diversity guidance over split structure/value streams.
    Bedivfuzz,
}

impl Engine {
    /// Whether this engine uses the split structure/value source.
    pub fn is_split(&self) -> bool {
        matches!(self, Engine::Bedivfuzz)
    }
}

impl FromStr for Engine {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zest" => Ok(Engine::Zest),
            "zeal" => Ok(Engine::Zeal),
            "bedivfuzz" => Ok(Engine::Bedivfuzz),
            other => Err(ConfigError::UnknownEngine(other.to_string())),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Engine::Zest => "zest",
            Engine::Zeal => "zeal",
            Engine::Bedivfuzz => "bedivfuzz",
        };
        f.write_str(name)
    }
}

/// Which instrumentation backend the harness should use. The core only
/// forwards this choice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Instrumentation {
    Fast,
    Janala,
}

impl FromStr for Instrumentation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(Instrumentation::Fast),
            "janala" => Ok(Instrumentation::Janala),
            other => Err(ConfigError::UnknownInstrumentation(other.to_string())),
        }
    }
}

/// Format of the periodic stats line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatsStyle {
    Afl,
    LibFuzzer,
}

impl FromStr for StatsStyle {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "afl" => Ok(StatsStyle::Afl),
            "libfuzzer" => Ok(StatsStyle::LibFuzzer),
            other => Err(ConfigError::UnknownStatsStyle(other.to_string())),
        }
    }
}

/// Errors detected before the first trial. Nothing is written when any of
/// these fire.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown engine '{0}' (expected zest, zeal, or bedivfuzz)")]
    UnknownEngine(String),

    #[error("unknown instrumentation '{0}' (expected fast or janala)")]
    UnknownInstrumentation(String),

    #[error("unknown stats style '{0}' (expected afl or libfuzzer)")]
    UnknownStatsStyle(String),

    #[error("invalid duration '{0}' (expected [Nh][Nm][Ns], e.g. 2h30m or 60s)")]
    InvalidDuration(String),

    #[error("--no-cov only makes sense together with --blind")]
    NoCovRequiresBlind,

    #[error("structure weight {0} is outside [0, 1]")]
    InvalidStructureWeight(f64),

    #[error("random-parent probability {0} is outside [0, 1]")]
    InvalidRandomProbability(f64),
}

/// Parse a `[Nh][Nm][Ns]` duration such as `60s`, `2h30m`, or `1h2m3s`.
/// Components must appear in h, m, s order and at least one must be given.
pub fn parse_duration(text: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(text.to_string());
    if text.is_empty() {
        return Err(invalid());
    }
    let mut seconds: u64 = 0;
    let mut rest = text;
    let mut last_unit = 0u8;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        if digits_end == 0 {
            return Err(invalid());
        }
        let value: u64 = rest[..digits_end].parse().map_err(|_| invalid())?;
        let unit = rest.as_bytes()[digits_end];
        let (scale, order) = match unit {
            b'h' => (3600, 1),
            b'm' => (60, 2),
            b's' => (1, 3),
            _ => return Err(invalid()),
        };
        if order <= last_unit {
            return Err(invalid());
        }
        last_unit = order;
        seconds += value * scale;
        rest = &rest[digits_end + 1..];
    }
    Ok(Duration::from_secs(seconds))
}

/// Full configuration of a fuzzing campaign.
#[derive(Clone, Debug)]
pub struct Config {
    /// Entry-point identifier handed to the harness, `class` part.
    pub test_class: String,
    /// Entry-point identifier handed to the harness, `method` part.
    pub test_method: String,
    pub engine: Engine,
    /// Wall-clock budget; unlimited when `None`.
    pub duration: Option<Duration>,
    /// Trial cap; unlimited when `None`.
    pub trials: Option<u64>,
    /// Master seed. `None` seeds from OS entropy.
    pub random_seed: Option<u64>,
    /// Disable the novelty filter; every input is random.
    pub blind: bool,
    /// Skip coverage collection entirely. Requires `blind`.
    pub no_cov: bool,
    pub input_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    /// Save redundant inputs too.
    pub save_all: bool,
    /// Persist the cumulative branch-hit-count snapshot at exit.
    pub save_branch_hit_counts: bool,
    /// Minimum interval between stats lines.
    pub stats_refresh: Duration,
    pub exit_on_crash: bool,
    /// Per-trial deadline; exceeding it is a failure with the timeout
    /// fingerprint.
    pub run_timeout: Option<Duration>,
    /// Disable stream extension: streams report EOF at their end.
    pub fixed_size: bool,
    pub instrumentation: Instrumentation,
    /// Class-prefix instrumentation filters, forwarded to the harness.
    pub excludes: Vec<String>,
    pub includes: Vec<String>,
    /// Probability of a uniformly random (non-favored) mutation parent.
    pub p_random_parent: f64,
    /// Probability a split mutation targets the structure stream.
    pub structure_weight: f64,
    /// Admit inputs on H1 growth alone (bedivfuzz only).
    pub admit_on_diversity_gain: bool,
    /// Minimum H1 gain for diversity-only admission.
    pub diversity_epsilon: f64,
    pub stats_style: StatsStyle,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            test_class: String::new(),
            test_method: String::new(),
            engine: Engine::Zest,
            duration: None,
            trials: None,
            random_seed: None,
            blind: false,
            no_cov: false,
            input_dir: None,
            output_dir: PathBuf::from("fuzz-results"),
            save_all: false,
            save_branch_hit_counts: false,
            stats_refresh: Duration::from_millis(300),
            exit_on_crash: false,
            run_timeout: None,
            fixed_size: false,
            instrumentation: Instrumentation::Fast,
            excludes: Vec::new(),
            includes: Vec::new(),
            p_random_parent: crate::corpus::DEFAULT_P_RANDOM,
            structure_weight: 0.5,
            admit_on_diversity_gain: false,
            diversity_epsilon: 1e-3,
            stats_style: StatsStyle::Afl,
        }
    }
}

impl Config {
    /// Reject invalid flag combinations before any state is written.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.no_cov && !self.blind {
            return Err(ConfigError::NoCovRequiresBlind);
        }
        if !(0.0..=1.0).contains(&self.structure_weight) {
            return Err(ConfigError::InvalidStructureWeight(self.structure_weight));
        }
        if !(0.0..=1.0).contains(&self.p_random_parent) {
            return Err(ConfigError::InvalidRandomProbability(self.p_random_parent));
        }
        Ok(())
    }

    /// The `class#method` entry-point string for the tracer.
    pub fn entry_point(&self) -> Option<String> {
        if self.test_class.is_empty() || self.test_method.is_empty() {
            None
        } else {
            Some(format!("{}#{}", self.test_class, self.test_method))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_names_parse() {
        assert_eq!("zest".parse::<Engine>().unwrap(), Engine::Zest);
        assert_eq!("zeal".parse::<Engine>().unwrap(), Engine::Zeal);
        assert_eq!("bedivfuzz".parse::<Engine>().unwrap(), Engine::Bedivfuzz);
        assert!(matches!(
            "afl".parse::<Engine>(),
            Err(ConfigError::UnknownEngine(_))
        ));
    }

    #[test]
    fn only_bedivfuzz_splits() {
        assert!(!Engine::Zest.is_split());
        assert!(!Engine::Zeal.is_split());
        assert!(Engine::Bedivfuzz.is_split());
    }

    #[test]
    fn durations_parse() {
        assert_eq!(parse_duration("60s").unwrap(), Duration::from_secs(60));
        assert_eq!(
            parse_duration("2h30m").unwrap(),
            Duration::from_secs(2 * 3600 + 30 * 60)
        );
        assert_eq!(
            parse_duration("1h2m3s").unwrap(),
            Duration::from_secs(3723)
        );
        assert_eq!(parse_duration("90m").unwrap(), Duration::from_secs(5400));
    }

    #[test]
    fn bad_durations_rejected() {
        for text in ["", "10", "s", "10x", "3m2h", "1h1h", "h30m", "10s5"] {
            assert!(
                matches!(parse_duration(text), Err(ConfigError::InvalidDuration(_))),
                "accepted {:?}",
                text
            );
        }
    }

    #[test]
    fn no_cov_requires_blind() {
        let config = Config {
            no_cov: true,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoCovRequiresBlind));

        let ok = Config {
            no_cov: true,
            blind: true,
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn weights_are_bounded() {
        let config = Config {
            structure_weight: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidStructureWeight(_))
        ));
    }

    #[test]
    fn entry_point_formats_class_and_method() {
        let config = Config {
            test_class: "com/example/Target".to_string(),
            test_method: "fuzzParse".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.entry_point().unwrap(),
            "com/example/Target#fuzzParse"
        );
        assert!(Config::default().entry_point().is_none());
    }
}
