//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `carestars.toml` files. The loaded [`Config`] is converted into the
//! explicit per-stage settings ([`LvmConfig`], [`ClusterStrategy`],
//! [`PreprocessConfig`], [`GroupWeights`]) that the library calls take.

use crate::analysis::GroupWeights;
use crate::cluster::{CentroidConfig, ClusterStrategy};
use crate::dataset::PreprocessConfig;
use crate::error::RatingError;
use crate::lvm::{Bound, Evaluator, InitialParams, LvmConfig, ParamBounds, PredictConfig};
use crate::models::{MeasureGroup, StrategyKind};
use crate::pipeline::RunPlan;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "carestars.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Latent variable model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Star clustering settings.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Measure preprocessing settings.
    #[serde(default)]
    pub preprocess: PreprocessConfig,

    /// Measure groups and their summary weights.
    #[serde(default = "default_groups")]
    pub groups: Vec<GroupConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            model: ModelConfig::default(),
            cluster: ClusterConfig::default(),
            preprocess: PreprocessConfig::default(),
            groups: default_groups(),
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Number of measure groups fitted concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Fit groups on worker threads.
    #[serde(default = "default_true")]
    pub parallel: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
            concurrency: default_concurrency(),
            parallel: true,
        }
    }
}

fn default_output() -> String {
    "carestars_report.md".to_string()
}

fn default_concurrency() -> usize {
    4
}

fn default_true() -> bool {
    true
}

/// Latent variable model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Gradient norm at which the parameter search stops.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// Lower bound on every measure's `err`.
    #[serde(default = "default_err_lower_bound")]
    pub err_lower_bound: f64,

    /// Optional bounds on `mu`.
    #[serde(default)]
    pub mu_lower: Option<f64>,
    #[serde(default)]
    pub mu_upper: Option<f64>,

    /// Optional bounds on `gamma`.
    #[serde(default)]
    pub gamma_lower: Option<f64>,
    #[serde(default)]
    pub gamma_upper: Option<f64>,

    /// Solver iteration budget.
    #[serde(default = "default_budget")]
    pub max_iterations: usize,

    /// Solver objective evaluation budget.
    #[serde(default = "default_budget")]
    pub max_evaluations: usize,

    /// Use Gauss-Hermite quadrature instead of the closed-form likelihood.
    #[serde(default)]
    pub quadrature: bool,

    /// Quadrature node count.
    #[serde(default = "default_quadrature_nodes")]
    pub quadrature_nodes: usize,

    /// Gradient tolerance for per-hospital ability prediction.
    #[serde(default = "default_prediction_tolerance")]
    pub prediction_tolerance: f64,

    /// Starting values replicated across measures.
    #[serde(default)]
    pub initial: InitialParams,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            err_lower_bound: default_err_lower_bound(),
            mu_lower: None,
            mu_upper: None,
            gamma_lower: None,
            gamma_upper: None,
            max_iterations: default_budget(),
            max_evaluations: default_budget(),
            quadrature: false,
            quadrature_nodes: default_quadrature_nodes(),
            prediction_tolerance: default_prediction_tolerance(),
            initial: InitialParams::default(),
        }
    }
}

fn default_tolerance() -> f64 {
    1e-15
}

fn default_err_lower_bound() -> f64 {
    1e-3
}

fn default_budget() -> usize {
    15_000
}

fn default_quadrature_nodes() -> usize {
    30
}

fn default_prediction_tolerance() -> f64 {
    1e-10
}

impl From<&ModelConfig> for LvmConfig {
    fn from(model: &ModelConfig) -> Self {
        let evaluator = if model.quadrature {
            Evaluator::Quadrature {
                nodes: model.quadrature_nodes,
            }
        } else {
            Evaluator::Exact
        };
        LvmConfig {
            initial: model.initial,
            bounds: ParamBounds {
                mu: Bound {
                    lower: model.mu_lower,
                    upper: model.mu_upper,
                },
                gamma: Bound {
                    lower: model.gamma_lower,
                    upper: model.gamma_upper,
                },
                err: Bound::lower(model.err_lower_bound),
            },
            tolerance: model.tolerance,
            evaluator,
            max_iterations: model.max_iterations,
            max_evaluations: model.max_evaluations,
            prediction: PredictConfig {
                tolerance: model.prediction_tolerance,
                ..PredictConfig::default()
            },
        }
    }
}

/// Star clustering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Clustering strategy.
    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,

    /// Number of star labels.
    #[serde(default = "default_k")]
    pub k: usize,

    /// Refinement passes for Simple Cluster Seeking.
    #[serde(default = "default_scs_iterations")]
    pub scs_iterations: usize,

    /// Centroid clustering restarts.
    #[serde(default = "default_restarts")]
    pub restarts: usize,

    /// Centroid movement tolerance, relative to the score variance.
    #[serde(default = "default_cluster_tolerance")]
    pub tolerance: f64,

    /// Iteration cap per centroid restart.
    #[serde(default = "default_cluster_max_iterations")]
    pub max_iterations: usize,

    /// Base seed for centroid restarts.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            k: default_k(),
            scs_iterations: default_scs_iterations(),
            restarts: default_restarts(),
            tolerance: default_cluster_tolerance(),
            max_iterations: default_cluster_max_iterations(),
            seed: None,
        }
    }
}

fn default_strategy() -> StrategyKind {
    StrategyKind::Scs
}

fn default_k() -> usize {
    5
}

fn default_scs_iterations() -> usize {
    1
}

fn default_restarts() -> usize {
    CentroidConfig::default().restarts
}

fn default_cluster_tolerance() -> f64 {
    CentroidConfig::default().tolerance
}

fn default_cluster_max_iterations() -> usize {
    CentroidConfig::default().max_iterations
}

impl From<&ClusterConfig> for ClusterStrategy {
    fn from(cluster: &ClusterConfig) -> Self {
        match cluster.strategy {
            StrategyKind::Scs => ClusterStrategy::Scs {
                iterations: cluster.scs_iterations,
            },
            StrategyKind::Centroid => ClusterStrategy::Centroid(CentroidConfig {
                restarts: cluster.restarts,
                tolerance: cluster.tolerance,
                max_iterations: cluster.max_iterations,
                seed: cluster.seed,
            }),
        }
    }
}

/// One measure group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,

    /// Share of the summary score.
    pub weight: f64,

    /// Measure columns, in model order.
    #[serde(default)]
    pub measures: Vec<String>,

    /// Denominator columns. Defaults to each measure plus the preprocess
    /// denominator suffix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denominators: Option<Vec<String>>,
}

fn group(name: &str, weight: f64, measures: &[&str]) -> GroupConfig {
    GroupConfig {
        name: name.to_string(),
        weight,
        measures: measures.iter().map(|m| m.to_string()).collect(),
        denominators: None,
    }
}

fn default_groups() -> Vec<GroupConfig> {
    vec![
        group(
            "mortality",
            0.22,
            &[
                "MORT_30_AMI",
                "MORT_30_CABG",
                "MORT_30_COPD",
                "MORT_30_HF",
                "MORT_30_PN",
                "MORT_30_STK",
                "PSI_4_SURG_COMP",
            ],
        ),
        group(
            "safety",
            0.22,
            &[
                "HAI_1", "HAI_2", "HAI_3", "HAI_4", "HAI_5", "HAI_6", "COMP_HIP_KNEE", "PSI_90_SAFETY",
            ],
        ),
        group(
            "read",
            0.22,
            &[
                "READM_30_AMI",
                "READM_30_CABG",
                "READM_30_COPD",
                "READM_30_HF",
                "READM_30_HIP_KNEE",
                "READM_30_HOSP_WIDE",
                "READM_30_PN",
                "READM_30_STK",
            ],
        ),
        group(
            "patientexp",
            0.22,
            &[
                "H_CLEAN_LINEAR_SCORE",
                "H_COMP_1_LINEAR_SCORE",
                "H_COMP_2_LINEAR_SCORE",
                "H_COMP_3_LINEAR_SCORE",
                "H_COMP_5_LINEAR_SCORE",
                "H_COMP_6_LINEAR_SCORE",
                "H_COMP_7_LINEAR_SCORE",
                "H_HSP_RATING_LINEAR_SCORE",
                "H_QUIET_LINEAR_SCORE",
                "H_RECMND_LINEAR_SCORE",
            ],
        ),
        group(
            "efficiency",
            0.04,
            &["OP_8", "OP_10", "OP_11", "OP_13", "OP_14"],
        ),
        group(
            "timeliness",
            0.04,
            &["ED_1B", "ED_2B", "OP_3B", "OP_5", "OP_18B", "OP_20", "OP_21"],
        ),
        group(
            "effectiveness",
            0.04,
            &[
                "IMM_2",
                "IMM_3_OP_27",
                "OP_4",
                "OP_22",
                "OP_23",
                "OP_29",
                "OP_30",
                "PC_01",
                "STK_4",
                "VTE_6",
            ],
        ),
    ]
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if let Some(concurrency) = args.concurrency {
            self.general.concurrency = concurrency;
        }
        if args.serial {
            self.general.parallel = false;
        }

        // Quadrature - a node count implies quadrature
        if args.quadrature {
            self.model.quadrature = true;
        }
        if let Some(nodes) = args.quadrature_nodes {
            self.model.quadrature = true;
            self.model.quadrature_nodes = nodes;
        }

        if let Some(strategy) = args.strategy {
            self.cluster.strategy = strategy;
        }
        if let Some(seed) = args.seed {
            self.cluster.seed = Some(seed);
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Check the tunables that the library would otherwise reject mid-run.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.general.concurrency == 0 {
            return Err(RatingError::Config("concurrency must be at least 1".to_string()));
        }
        if self.model.quadrature_nodes == 0 {
            return Err(RatingError::Config(
                "quadrature needs at least 1 node".to_string(),
            ));
        }
        if !(self.model.err_lower_bound > 0.0) {
            return Err(RatingError::Config(format!(
                "err lower bound must be positive, got {}",
                self.model.err_lower_bound
            )));
        }
        if self.cluster.k == 0 || self.cluster.k > u8::MAX as usize {
            return Err(RatingError::Config(format!(
                "cluster count must be between 1 and {}, got {}",
                u8::MAX,
                self.cluster.k
            )));
        }
        for group in &self.groups {
            if let Some(ref dens) = group.denominators {
                if dens.len() != group.measures.len() {
                    return Err(RatingError::Config(format!(
                        "group {} lists {} measures but {} denominators",
                        group.name,
                        group.measures.len(),
                        dens.len()
                    )));
                }
            }
        }
        self.group_weights()?;
        Ok(())
    }

    /// Summary weights, in group order.
    pub fn group_weights(&self) -> crate::error::Result<GroupWeights> {
        GroupWeights::new(
            self.groups
                .iter()
                .map(|g| (g.name.clone(), g.weight))
                .collect(),
        )
    }

    /// Measure groups with denominators resolved.
    pub fn measure_groups(&self) -> Vec<MeasureGroup> {
        self.groups
            .iter()
            .map(|g| match g.denominators {
                Some(ref dens) => MeasureGroup {
                    name: g.name.clone(),
                    measures: g.measures.clone(),
                    denominators: dens.clone(),
                },
                None => MeasureGroup::with_suffix(
                    g.name.clone(),
                    g.measures.clone(),
                    &self.preprocess.denominator_suffix,
                ),
            })
            .collect()
    }

    /// Validated settings for a pipeline run.
    pub fn run_plan(&self) -> crate::error::Result<RunPlan> {
        self.validate()?;
        Ok(RunPlan {
            lvm: LvmConfig::from(&self.model),
            strategy: ClusterStrategy::from(&self.cluster),
            clusters: self.cluster.k,
            weights: self.group_weights()?,
            concurrency: self.general.concurrency,
            parallel: self.general.parallel,
        })
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Args, OutputFormat};
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model.tolerance, 1e-15);
        assert_eq!(config.cluster.k, 5);
        assert_eq!(config.cluster.strategy, StrategyKind::Scs);
        assert_eq!(config.groups.len(), 7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "stars.json"
parallel = false

[model]
quadrature = true
quadrature_nodes = 40

[model.initial]
mu = 0.0
gamma = 1.0
err = 1.0

[cluster]
strategy = "centroid"
restarts = 50
seed = 9

[preprocess]
min_hospitals = 10
flipped_measures = ["MORT_30_AMI"]

[[groups]]
name = "mortality"
weight = 0.7
measures = ["MORT_30_AMI", "MORT_30_HF"]

[[groups]]
name = "experience"
weight = 0.3
measures = ["H_STAR"]
denominators = ["H_SURVEYS"]
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output, "stars.json");
        assert!(!config.general.parallel);
        assert_eq!(config.model.initial.gamma, 1.0);
        assert_eq!(config.preprocess.min_hospitals, 10);

        let plan = config.run_plan().unwrap();
        assert_eq!(plan.lvm.evaluator, Evaluator::Quadrature { nodes: 40 });
        match plan.strategy {
            ClusterStrategy::Centroid(ref c) => {
                assert_eq!(c.restarts, 50);
                assert_eq!(c.seed, Some(9));
                assert_eq!(c.tolerance, 1e-6);
            }
            ref other => panic!("unexpected strategy {:?}", other),
        }

        let groups = config.measure_groups();
        assert_eq!(groups[0].denominators, vec!["MORT_30_AMI_DEN", "MORT_30_HF_DEN"]);
        assert_eq!(groups[1].denominators, vec!["H_SURVEYS"]);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut config = Config::default();
        config.groups[0].weight = 0.5;
        assert!(matches!(config.validate(), Err(RatingError::Config(_))));
    }

    #[test]
    fn test_merge_with_args() {
        let mut config = Config::default();
        let args = Args {
            input: Some(PathBuf::from("data.json")),
            config: None,
            output: Some(PathBuf::from("out.json")),
            format: OutputFormat::Json,
            strategy: Some(StrategyKind::Centroid),
            quadrature: false,
            quadrature_nodes: Some(20),
            concurrency: Some(2),
            serial: true,
            seed: Some(3),
            verbose: true,
            quiet: false,
            init_config: false,
        };
        config.merge_with_args(&args);

        assert_eq!(config.general.output, "out.json");
        assert_eq!(config.general.concurrency, 2);
        assert!(!config.general.parallel);
        assert!(config.model.quadrature);
        assert_eq!(config.model.quadrature_nodes, 20);
        assert_eq!(config.cluster.strategy, StrategyKind::Centroid);
        assert_eq!(config.cluster.seed, Some(3));
        assert!(config.general.verbose);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[cluster]\nk = 3\n").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.cluster.k, 3);
        assert_eq!(config.groups.len(), 7);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[model]"));
        assert!(toml_str.contains("[[groups]]"));

        let reparsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(reparsed.groups.len(), 7);
        assert!(reparsed.validate().is_ok());
    }
}
