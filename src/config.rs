//! Runtime configuration: TOML file, then `ZONECOUNT_*` environment overrides.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::integration::{Annotator, EnhanceParams, Enhancement, PipelineConfig, TrackerSettings};
use crate::video::{CodecChain, EncoderFactory, MjpegEncoderFactory, VideoBatchRunner};
use crate::zone::{LineSpec, LineZone};

const DEFAULT_ENHANCEMENT_KIND: &str = "CLAHE";
const DEFAULT_FPS: f64 = 25.0;
const DEFAULT_JPEG_QUALITY: u8 = 90;
const DEFAULT_THICKNESS: u32 = 2;
const DEFAULT_TEXT_SCALE: f32 = 16.0;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    pipeline: Option<PipelineFile>,
    line: Option<LineSpec>,
    video: Option<VideoFile>,
    annotation: Option<AnnotationFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineFile {
    enhance: Option<bool>,
    enhancement_kind: Option<String>,
    clip_limit: Option<f32>,
    tile_grid: Option<u32>,
    brightness: Option<i32>,
    contrast: Option<i32>,
    track: Option<bool>,
    annotate: Option<bool>,
    tracker: Option<String>,
    persist: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct VideoFile {
    codecs: Option<Vec<String>>,
    fallback_codec: Option<String>,
    default_fps: Option<f64>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AnnotationFile {
    thickness: Option<u32>,
    text_scale: Option<f32>,
    font_path: Option<PathBuf>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneCountConfig {
    pub pipeline: PipelineSettings,
    /// Line used when a request asks for counting without naming a zone.
    pub line: LineSpec,
    pub video: VideoSettings,
    pub annotation: AnnotationSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub enhance: bool,
    pub enhancement_kind: String,
    pub params: EnhanceParams,
    pub track: bool,
    pub annotate: bool,
    pub tracker: TrackerSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoSettings {
    pub chain: CodecChain,
    /// Used when a stream reports no usable frame rate.
    pub default_fps: f64,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationSettings {
    pub thickness: u32,
    pub text_scale: f32,
    pub font_path: Option<PathBuf>,
}

impl Default for ZoneCountConfig {
    fn default() -> Self {
        Self::from_file(ConfigFile::default())
    }
}

impl ZoneCountConfig {
    /// Read the file named by `ZONECOUNT_CONFIG` (if set), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let file = match std::env::var("ZONECOUNT_CONFIG").ok().as_deref() {
            Some(path) if !path.trim().is_empty() => read_config_file(Path::new(path))?,
            _ => ConfigFile::default(),
        };
        let mut cfg = Self::from_file(file);
        cfg.apply_env(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse and validate a TOML document, without environment overrides.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(raw).map_err(|e| Error::Config(format!("invalid config: {}", e)))?;
        let mut cfg = Self::from_file(file);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ConfigFile) -> Self {
        let pipeline = file.pipeline.unwrap_or_default();
        let video = file.video.unwrap_or_default();
        let annotation = file.annotation.unwrap_or_default();
        let default_params = EnhanceParams::default();
        let default_tracker = TrackerSettings::default();
        let default_chain = CodecChain::default();

        Self {
            pipeline: PipelineSettings {
                enhance: pipeline.enhance.unwrap_or(false),
                enhancement_kind: pipeline
                    .enhancement_kind
                    .unwrap_or_else(|| DEFAULT_ENHANCEMENT_KIND.to_string()),
                params: EnhanceParams {
                    clip_limit: pipeline.clip_limit.unwrap_or(default_params.clip_limit),
                    tile_grid: pipeline.tile_grid.unwrap_or(default_params.tile_grid),
                    brightness: pipeline.brightness.unwrap_or(default_params.brightness),
                    contrast: pipeline.contrast.unwrap_or(default_params.contrast),
                },
                track: pipeline.track.unwrap_or(true),
                annotate: pipeline.annotate.unwrap_or(true),
                tracker: TrackerSettings {
                    config: pipeline.tracker.unwrap_or(default_tracker.config),
                    persist: pipeline.persist.unwrap_or(default_tracker.persist),
                },
            },
            line: file.line.unwrap_or_default(),
            video: VideoSettings {
                chain: CodecChain {
                    preferred: video.codecs.unwrap_or(default_chain.preferred),
                    fallback: video.fallback_codec.unwrap_or(default_chain.fallback),
                },
                default_fps: video.default_fps.unwrap_or(DEFAULT_FPS),
                jpeg_quality: video.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            annotation: AnnotationSettings {
                thickness: annotation.thickness.unwrap_or(DEFAULT_THICKNESS),
                text_scale: annotation.text_scale.unwrap_or(DEFAULT_TEXT_SCALE),
                font_path: annotation.font_path,
            },
        }
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = var("ZONECOUNT_ENHANCE") {
            self.pipeline.enhance = parse_bool("ZONECOUNT_ENHANCE", &value)?;
        }
        if let Some(kind) = var("ZONECOUNT_ENHANCEMENT_KIND") {
            self.pipeline.enhancement_kind = kind;
        }
        if let Some(value) = var("ZONECOUNT_TRACK") {
            self.pipeline.track = parse_bool("ZONECOUNT_TRACK", &value)?;
        }
        if let Some(value) = var("ZONECOUNT_ANNOTATE") {
            self.pipeline.annotate = parse_bool("ZONECOUNT_ANNOTATE", &value)?;
        }
        if let Some(tracker) = var("ZONECOUNT_TRACKER") {
            self.pipeline.tracker.config = tracker;
        }
        if let Some(codecs) = var("ZONECOUNT_CODECS") {
            self.video.chain.preferred = split_csv(&codecs);
        }
        if let Some(fps) = var("ZONECOUNT_DEFAULT_FPS") {
            self.video.default_fps = fps
                .trim()
                .parse()
                .map_err(|_| Error::Config("ZONECOUNT_DEFAULT_FPS must be a number".into()))?;
        }
        if let Some(quality) = var("ZONECOUNT_JPEG_QUALITY") {
            self.video.jpeg_quality = quality.trim().parse().map_err(|_| {
                Error::Config("ZONECOUNT_JPEG_QUALITY must be an integer in 1..=100".into())
            })?;
        }
        if let Some(path) = var("ZONECOUNT_FONT_PATH") {
            self.annotation.font_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        LineZone::from_spec(&self.line)
            .map_err(|e| Error::Config(format!("[line]: {}", e)))?;

        let params = &self.pipeline.params;
        if !(params.clip_limit.is_finite() && params.clip_limit > 0.0) {
            return Err(Error::Config("clip_limit must be positive".into()));
        }
        if params.tile_grid == 0 {
            return Err(Error::Config("tile_grid must be at least 1".into()));
        }
        if self.pipeline.tracker.config.trim().is_empty() {
            return Err(Error::Config("tracker must not be empty".into()));
        }

        let video = &mut self.video;
        video.chain.preferred = video
            .chain
            .preferred
            .iter()
            .map(|codec| codec.trim().to_ascii_lowercase())
            .filter(|codec| !codec.is_empty())
            .collect();
        video.chain.fallback = video.chain.fallback.trim().to_ascii_lowercase();
        if video.chain.fallback.is_empty() {
            return Err(Error::Config("fallback_codec must not be empty".into()));
        }
        if !(video.default_fps.is_finite() && video.default_fps > 0.0) {
            return Err(Error::Config("default_fps must be positive".into()));
        }
        if !(1..=100).contains(&video.jpeg_quality) {
            return Err(Error::Config("jpeg_quality must be in 1..=100".into()));
        }

        if self.annotation.thickness == 0 {
            return Err(Error::Config("annotation thickness must be at least 1".into()));
        }
        if !(self.annotation.text_scale.is_finite() && self.annotation.text_scale > 0.0) {
            return Err(Error::Config("text_scale must be positive".into()));
        }
        Ok(())
    }

    /// Step toggles for requests that do not override them.
    pub fn pipeline_config(&self) -> PipelineConfig {
        let enhancement = self
            .pipeline
            .enhance
            .then(|| Enhancement::parse(&self.pipeline.enhancement_kind, &self.pipeline.params));
        PipelineConfig {
            enhancement,
            track: self.pipeline.track,
            annotate: self.pipeline.annotate,
        }
    }

    /// Annotator with the configured font loaded, if any.
    pub fn annotator(&self) -> Result<Annotator> {
        let annotator = Annotator::new(self.annotation.thickness, self.annotation.text_scale);
        match &self.annotation.font_path {
            Some(path) => annotator.with_font_file(path),
            None => Ok(annotator),
        }
    }

    /// Runner over `encoders` using the configured chain and rates.
    pub fn runner(&self, encoders: Arc<dyn EncoderFactory>) -> VideoBatchRunner {
        VideoBatchRunner::new(encoders, self.video.chain.clone(), self.video.default_fps)
            .with_fallback(Arc::new(MjpegEncoderFactory::new(self.video.jpeg_quality)))
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("failed to read config file {}: {}", path.display(), e))
    })?;
    toml::from_str(&raw)
        .map_err(|e| Error::Config(format!("invalid config file {}: {}", path.display(), e)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{} must be a boolean", key))),
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::zone::Anchor;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let cfg = ZoneCountConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, ZoneCountConfig::default());
        assert_eq!(cfg.line, LineSpec::default());
        assert_eq!(cfg.video.chain, CodecChain::default());
        assert_eq!(cfg.pipeline.tracker.config, "bytetrack.yaml");
        assert!(cfg.pipeline.tracker.persist);
        assert_eq!(cfg.pipeline_config(), PipelineConfig::default());
    }

    #[test]
    fn test_file_values() {
        let cfg = ZoneCountConfig::from_toml_str(
            r#"
            [pipeline]
            enhance = true
            enhancement_kind = "bc"
            brightness = 20
            contrast = 400

            [line]
            start = [0.0, 100.0]
            end = [640.0, 100.0]
            anchor = "center"

            [video]
            codecs = [" VP09 ", ""]
            default_fps = 12.5
            "#,
        )
        .unwrap();

        assert_eq!(cfg.line.anchor, Anchor::Center);
        assert_eq!(cfg.video.chain.preferred, vec!["vp09".to_string()]);
        assert_eq!(cfg.video.default_fps, 12.5);
        assert_eq!(
            cfg.pipeline_config().enhancement,
            Some(Enhancement::BrightnessContrast {
                brightness: 20,
                contrast: 127
            })
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        for raw in [
            "[line]\nstart = [5.0, 5.0]\nend = [5.0, 5.0]",
            "[video]\ndefault_fps = 0.0",
            "[video]\njpeg_quality = 0",
            "[pipeline]\ntile_grid = 0",
            "[annotation]\nthickness = 0",
            "[pipeline]\nunknown_key = 1",
        ] {
            let err = ZoneCountConfig::from_toml_str(raw).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config, "{}", raw);
        }
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ZONECOUNT_ENHANCE", "yes"),
            ("ZONECOUNT_ENHANCEMENT_KIND", "HE"),
            ("ZONECOUNT_CODECS", "mp4v, avc1"),
            ("ZONECOUNT_JPEG_QUALITY", "70"),
            ("ZONECOUNT_TRACKER", "  "),
        ]
        .into_iter()
        .collect();
        let mut cfg = ZoneCountConfig::default();
        cfg.apply_env(|key| env.get(key).map(|v| v.to_string())).unwrap();
        cfg.validate().unwrap();

        assert_eq!(
            cfg.pipeline_config().enhancement,
            Some(Enhancement::HistogramEqualization)
        );
        assert_eq!(cfg.video.chain.preferred, vec!["mp4v", "avc1"]);
        assert_eq!(cfg.video.jpeg_quality, 70);
        // Blank values are ignored.
        assert_eq!(cfg.pipeline.tracker.config, "bytetrack.yaml");
    }

    #[test]
    fn test_env_parse_errors() {
        let mut cfg = ZoneCountConfig::default();
        let err = cfg
            .apply_env(|key| (key == "ZONECOUNT_TRACK").then(|| "maybe".to_string()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_missing_font_file() {
        let mut cfg = ZoneCountConfig::default();
        cfg.annotation.font_path = Some(PathBuf::from("/nonexistent/font.ttf"));
        assert!(cfg.annotator().is_err());
        assert!(!ZoneCountConfig::default().annotator().unwrap().has_font());
    }
}
