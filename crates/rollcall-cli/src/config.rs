use anyhow::{Context, Result};
use rollcall_core::detector::DEFAULT_CONFIDENCE_THRESHOLD;
use rollcall_core::extractor::DEFAULT_MAX_FACES_PER_IMAGE;
use rollcall_core::matcher::DEFAULT_TOLERANCE;
use rollcall_core::{DistanceMetric, ExtractorConfig, MatchConfig, MatchPolicy, ReferenceFacePolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Runtime configuration: TOML file, then `ROLLCALL_*` variables on top.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory containing the SCRFD and ArcFace ONNX files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Where CSV reports are written.
    pub report_dir: PathBuf,
    /// Largest distance still counted as the same person (inclusive).
    pub tolerance: f32,
    pub metric: DistanceMetric,
    pub match_policy: MatchPolicy,
    pub reference_faces: ReferenceFacePolicy,
    /// Cap on faces encoded per image.
    pub max_faces_per_image: usize,
    /// Minimum SCRFD score for a detection.
    pub detection_confidence: f32,
}

/// On-disk form; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    model_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    report_dir: Option<PathBuf>,
    tolerance: Option<f32>,
    metric: Option<DistanceMetric>,
    match_policy: Option<MatchPolicy>,
    reference_faces: Option<ReferenceFacePolicy>,
    max_faces_per_image: Option<usize>,
    detection_confidence: Option<f32>,
}

impl Config {
    /// Load `file` (or `ROLLCALL_CONFIG` when `file` is None), then apply
    /// environment overrides.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let file = file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("ROLLCALL_CONFIG").map(PathBuf::from));
        let file_cfg = match file {
            Some(path) => read_file(&path)?,
            None => FileConfig::default(),
        };
        Ok(Self::resolve(file_cfg, |key| std::env::var(key).ok()))
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let path = |key: &str, from_file: Option<PathBuf>, default: PathBuf| {
            env(key).map(PathBuf::from).or(from_file).unwrap_or(default)
        };

        Self {
            model_dir: path("ROLLCALL_MODEL_DIR", file.model_dir, data_dir.join("models")),
            db_path: path("ROLLCALL_DB_PATH", file.db_path, data_dir.join("attendance.db")),
            report_dir: path("ROLLCALL_REPORT_DIR", file.report_dir, data_dir.join("reports")),
            tolerance: env_parse(&env, "ROLLCALL_TOLERANCE")
                .or(file.tolerance)
                .unwrap_or(DEFAULT_TOLERANCE),
            metric: env_parse(&env, "ROLLCALL_METRIC")
                .or(file.metric)
                .unwrap_or_default(),
            match_policy: env_parse(&env, "ROLLCALL_MATCH_POLICY")
                .or(file.match_policy)
                .unwrap_or_default(),
            reference_faces: env_parse(&env, "ROLLCALL_REFERENCE_FACES")
                .or(file.reference_faces)
                .unwrap_or_default(),
            max_faces_per_image: env_parse(&env, "ROLLCALL_MAX_FACES_PER_IMAGE")
                .or(file.max_faces_per_image)
                .unwrap_or(DEFAULT_MAX_FACES_PER_IMAGE),
            detection_confidence: env_parse(&env, "ROLLCALL_DETECTION_CONFIDENCE")
                .or(file.detection_confidence)
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
        }
    }

    pub fn match_config(&self) -> MatchConfig {
        MatchConfig {
            tolerance: self.tolerance,
            metric: self.metric,
            policy: self.match_policy,
        }
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            reference_faces: self.reference_faces,
            max_faces_per_image: self.max_faces_per_image.max(1),
        }
    }
}

fn read_file(path: &Path) -> Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

/// Unset and unparsable values both fall through to the next layer.
fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::resolve(FileConfig::default(), env_of(&[("HOME", "/home/ta")]));
        assert_eq!(cfg.db_path, PathBuf::from("/home/ta/.local/share/rollcall/attendance.db"));
        assert_eq!(cfg.model_dir, PathBuf::from("/home/ta/.local/share/rollcall/models"));
        assert_eq!(cfg.tolerance, DEFAULT_TOLERANCE);
        assert_eq!(cfg.metric, DistanceMetric::Euclidean);
        assert_eq!(cfg.match_policy, MatchPolicy::Any);
        assert_eq!(cfg.reference_faces, ReferenceFacePolicy::First);
        assert_eq!(cfg.max_faces_per_image, DEFAULT_MAX_FACES_PER_IMAGE);
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            tolerance = 0.6
            metric = "cosine"
            report_dir = "/srv/reports"
            "#,
        )
        .unwrap();
        let cfg = Config::resolve(
            file,
            env_of(&[
                ("XDG_DATA_HOME", "/data"),
                ("ROLLCALL_TOLERANCE", "0.35"),
                ("ROLLCALL_MATCH_POLICY", "nearest"),
            ]),
        );
        assert_eq!(cfg.tolerance, 0.35);
        assert_eq!(cfg.metric, DistanceMetric::Cosine);
        assert_eq!(cfg.match_policy, MatchPolicy::Nearest);
        assert_eq!(cfg.report_dir, PathBuf::from("/srv/reports"));
        assert_eq!(cfg.db_path, PathBuf::from("/data/rollcall/attendance.db"));
    }

    #[test]
    fn test_bad_env_value_falls_back() {
        let file = FileConfig {
            max_faces_per_image: Some(10),
            ..FileConfig::default()
        };
        let cfg = Config::resolve(
            file,
            env_of(&[("ROLLCALL_MAX_FACES_PER_IMAGE", "lots"), ("ROLLCALL_METRIC", "manhattan")]),
        );
        assert_eq!(cfg.max_faces_per_image, 10);
        assert_eq!(cfg.metric, DistanceMetric::Euclidean);
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "tolerence = 0.4\n").unwrap();
        assert!(read_file(&path).is_err());
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "reference_faces = \"all\"\nmax_faces_per_image = 0\n").unwrap();
        let cfg = Config::resolve(read_file(&path).unwrap(), env_of(&[]));
        assert_eq!(cfg.reference_faces, ReferenceFacePolicy::All);
        assert_eq!(cfg.extractor_config().max_faces_per_image, 1);
    }
}
