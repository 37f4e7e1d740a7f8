//! Run configuration.
//!
//! [`RunConfig`] carries every option of a training/submission run. It is
//! stored as JSON through Burn's [`Config`] trait and dumped as sorted
//! `key = value` lines into logged submissions.

use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result};
use burn::config::Config;
use clap::{builder::BoolishValueParser, Args};
use roadseg_data::{
    AugmentationConfig, DatasetPaths, FillMode, PatchGeometry, PatchSampler, DEFAULT_MAX_ATTEMPTS,
};
use roadseg_submission::SubmissionLog;
use serde_json::Value;

/// Lower-case names for mode enums, used by the CLI and the config dump.
macro_rules! mode_names {
    ($mode:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $mode {
            pub const fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl FromStr for $mode {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    other => Err(format!(
                        "unknown {} '{other}', expected one of: {}",
                        stringify!($mode),
                        [$($name),+].join(", ")
                    )),
                }
            }
        }
    };
}

/// How rotated and flipped predictions are combined.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum GatherMode {
    /// Mean of all predictions.
    Avg,
    /// Discrete voting with a voting threshold.
    Vote,
}

mode_names!(GatherMode { Avg => "avg", Vote => "vote" });

/// How test images are brought to the model's input size.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum ScaleMode {
    Resize,
    Window,
}

mode_names!(ScaleMode { Resize => "resize", Window => "window" });

#[derive(Config, Debug, PartialEq, Eq)]
pub enum ModelChoice {
    Unet,
    UnetDilated1,
    UnetDilated2,
    UnetDilated3,
}

mode_names!(ModelChoice {
    Unet => "unet",
    UnetDilated1 => "unet_dilated1",
    UnetDilated2 => "unet_dilated2",
    UnetDilated3 => "unet_dilated3",
});

#[derive(Config, Debug, PartialEq, Eq)]
pub enum LineSmoothingMode {
    BeforeHough,
    AfterHough,
    Both,
    Off,
}

mode_names!(LineSmoothingMode {
    BeforeHough => "beforeHough",
    AfterHough => "afterHough",
    Both => "both",
    Off => "None",
});

#[derive(Config, Debug, PartialEq, Eq)]
pub enum DiscretizeMode {
    Discretize,
    Graphcut,
}

mode_names!(DiscretizeMode { Discretize => "discretize", Graphcut => "graphcut" });

/// Options of one training/submission run.
#[derive(Config, Debug)]
pub struct RunConfig {
    /// Save the run configuration next to the results.
    #[config(default = true)]
    pub arg_log: bool,

    #[config(default = 50)]
    pub epochs: usize,
    /// Training steps per epoch.
    #[config(default = 100)]
    pub steps: usize,
    /// Validation steps after each epoch; also the number of fixed
    /// validation patch sets.
    #[config(default = 22)]
    pub val_steps: usize,
    #[config(default = 4)]
    pub batch_size: usize,
    #[config(default = 0)]
    pub seed: u64,

    /// Predict with the best rather than the last weights.
    #[config(default = true)]
    pub predict_best: bool,
    #[config(default = true)]
    pub train_model: bool,

    /// Combine rotated and flipped predictions into one.
    #[config(default = true)]
    pub comb_pred: bool,
    #[config(default = "GatherMode::Avg")]
    pub gather_mode: GatherMode,
    #[config(default = "ScaleMode::Resize")]
    pub scale_mode: ScaleMode,

    #[config(default = "String::from(\"../data/training/\")")]
    pub train_path: String,
    #[config(default = "String::from(\"../data/validation/\")")]
    pub val_path: String,
    #[config(default = "String::from(\"../data/test/\")")]
    pub test_path: String,
    /// Where the best model weights are stored.
    #[config(default = "String::from(\"../tmp/model.mpk\")")]
    pub model_path: String,
    #[config(default = "String::from(\"images\")")]
    pub image_dir: String,
    #[config(default = "String::from(\"groundtruth\")")]
    pub mask_dir: String,
    /// Root of logged submissions.
    #[config(default = "String::from(\"../out/\")")]
    pub out_path: String,
    /// Root of per-run training logs.
    #[config(default = "String::from(\"../logs/fit/\")")]
    pub log_path: String,

    /// Archive the entire submission below `out_path`.
    #[config(default = true)]
    pub sub_log: bool,
    #[config(default = "String::from(\"dilated 2 submission\")")]
    pub sub_name: String,
    /// Foreground threshold of the CSV encoder.
    #[config(default = 0.5)]
    pub sub_thresh: f32,

    #[config(default = 360.0)]
    pub rotation_range: f32,
    #[config(default = 0.05)]
    pub width_shift_range: f32,
    #[config(default = 0.05)]
    pub height_shift_range: f32,
    #[config(default = 0.05)]
    pub shear_range: f32,
    #[config(default = "[0.95, 1.05]")]
    pub zoom_range: [f32; 2],
    #[config(default = "Some([1.0, 1.2])")]
    pub brightness_range: Option<[f32; 2]>,
    #[config(default = true)]
    pub horizontal_flip: bool,
    #[config(default = true)]
    pub vertical_flip: bool,
    /// `reflect`, `nearest` or `constant`.
    #[config(default = "String::from(\"reflect\")")]
    pub fill_mode: String,

    #[config(default = "ModelChoice::UnetDilated2")]
    pub model: ModelChoice,
    #[config(default = 1e-4)]
    pub adam_lr: f64,

    #[config(default = "LineSmoothingMode::Both")]
    pub line_smoothing_mode: LineSmoothingMode,
    #[config(default = true)]
    pub apply_hough: bool,
    #[config(default = "DiscretizeMode::Graphcut")]
    pub hough_discretize_mode: DiscretizeMode,
    #[config(default = "DiscretizeMode::Graphcut")]
    pub discretize_mode: DiscretizeMode,
    /// Remove small connected regions from predictions.
    #[config(default = true)]
    pub region_removal: bool,

    /// Side of a target patch.
    #[config(default = 16)]
    pub patch_size: usize,
    /// Square side images are resized to.
    #[config(default = 400)]
    pub target_size: u32,
    /// Probability of accepting a candidate patch without road.
    #[config(default = 0.5)]
    pub skip_probability: f64,
    /// Candidate draws per image before sampling fails.
    #[config(default = "DEFAULT_MAX_ATTEMPTS")]
    pub max_attempts: usize,
}

impl RunConfig {
    /// Load a configuration file, falling back to defaults when it is absent.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path)
                .with_context(|| format!("failed to load config {}", path.display())),
            None => Ok(Self::new()),
        }
    }

    pub fn geometry(&self) -> Result<PatchGeometry> {
        PatchGeometry::new(self.patch_size).context("invalid patch size")
    }

    pub fn sampler(&self) -> Result<PatchSampler> {
        Ok(PatchSampler::new(self.geometry()?, self.skip_probability)
            .context("invalid skip probability")?
            .with_max_attempts(self.max_attempts))
    }

    pub fn augmentation(&self) -> Result<AugmentationConfig> {
        let fill_mode: FillMode = self.fill_mode.parse()?;
        Ok(AugmentationConfig {
            rotation_range: self.rotation_range,
            width_shift_range: self.width_shift_range,
            height_shift_range: self.height_shift_range,
            shear_range: self.shear_range,
            zoom_range: (self.zoom_range[0], self.zoom_range[1]),
            brightness_range: self.brightness_range.map(|[lo, hi]| (lo, hi)),
            horizontal_flip: self.horizontal_flip,
            vertical_flip: self.vertical_flip,
            fill_mode,
        })
    }

    pub fn train_paths(&self) -> DatasetPaths {
        DatasetPaths::new(&self.train_path, &self.image_dir, &self.mask_dir)
    }

    pub fn validation_paths(&self) -> DatasetPaths {
        DatasetPaths::new(&self.val_path, &self.image_dir, &self.mask_dir)
    }

    pub fn test_image_dir(&self) -> PathBuf {
        Path::new(&self.test_path).join(&self.image_dir)
    }

    pub fn results_dir(&self) -> PathBuf {
        Path::new(&self.test_path).join("results")
    }

    /// All options as `(name, value)` pairs in the dump format: strings
    /// unquoted, booleans as `True`/`False`, modes by their lower-case name.
    pub fn entries(&self) -> Result<Vec<(String, String)>> {
        let Value::Object(map) = serde_json::to_value(self)? else {
            anyhow::bail!("run configuration did not serialize to an object");
        };

        let modes = [
            ("gather_mode", self.gather_mode.name()),
            ("scale_mode", self.scale_mode.name()),
            ("model", self.model.name()),
            ("line_smoothing_mode", self.line_smoothing_mode.name()),
            ("hough_discretize_mode", self.hough_discretize_mode.name()),
            ("discretize_mode", self.discretize_mode.name()),
        ];

        Ok(map
            .into_iter()
            .map(|(key, value)| {
                let value = match modes.iter().find(|(mode, _)| *mode == key) {
                    Some((_, name)) => name.to_string(),
                    None => dump_value(value),
                };
                (key, value)
            })
            .collect())
    }

    /// Describe the archive of this run, named `identifier`.
    pub fn submission_log(&self, identifier: &str) -> Result<SubmissionLog> {
        let training_logs = self
            .train_model
            .then(|| Path::new(&self.log_path).join(identifier));

        Ok(SubmissionLog {
            out_root: PathBuf::from(&self.out_path),
            identifier: identifier.to_string(),
            model_path: PathBuf::from(&self.model_path),
            model_name: self.model.name().to_string(),
            results_root: self.results_dir(),
            training_logs,
            config_entries: self.entries()?,
            threshold: self.sub_thresh,
            order: roadseg_submission::SubmissionOrder::Sorted,
        })
    }
}

fn dump_value(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        // Floats pass through f64 in JSON; print them at f32 precision.
        Value::Number(n) if n.is_f64() => {
            let value = n.as_f64().unwrap_or_default() as f32;
            if value.fract() == 0.0 {
                format!("{value:.1}")
            } else {
                value.to_string()
            }
        }
        Value::Array(items) => {
            let items: Vec<String> = items.into_iter().map(dump_value).collect();
            format!("[{}]", items.join(", "))
        }
        other => other.to_string(),
    }
}

/// Command-line overrides of [`RunConfig`]; every flag left out keeps the
/// loaded value.
#[derive(Args, Debug, Default)]
pub struct ConfigOverrides {
    /// Save the run configuration next to written results
    #[arg(long, global = true, value_parser = BoolishValueParser::new())]
    pub arg_log: Option<bool>,
    #[arg(long, global = true)]
    pub epochs: Option<usize>,
    /// Training steps per epoch
    #[arg(long, global = true)]
    pub steps: Option<usize>,
    #[arg(long, global = true)]
    pub val_steps: Option<usize>,
    #[arg(long, global = true)]
    pub batch_size: Option<usize>,
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    #[arg(long, global = true, value_parser = BoolishValueParser::new())]
    pub predict_best: Option<bool>,
    #[arg(long, global = true, value_parser = BoolishValueParser::new())]
    pub train_model: Option<bool>,
    #[arg(long, global = true, value_parser = BoolishValueParser::new())]
    pub comb_pred: Option<bool>,
    /// `avg` or `vote`
    #[arg(long, global = true)]
    pub gather_mode: Option<GatherMode>,
    /// `resize` or `window`
    #[arg(long, global = true)]
    pub scale_mode: Option<ScaleMode>,

    #[arg(long, global = true)]
    pub train_path: Option<String>,
    #[arg(long, global = true)]
    pub val_path: Option<String>,
    #[arg(long, global = true)]
    pub test_path: Option<String>,
    #[arg(long, global = true)]
    pub model_path: Option<String>,
    #[arg(long, global = true)]
    pub image_dir: Option<String>,
    #[arg(long, global = true)]
    pub mask_dir: Option<String>,
    #[arg(long, global = true)]
    pub out_path: Option<String>,
    #[arg(long, global = true)]
    pub log_path: Option<String>,

    /// Archive the submission below the output path
    #[arg(long, global = true, value_parser = BoolishValueParser::new())]
    pub sub_log: Option<bool>,
    #[arg(long, global = true)]
    pub sub_name: Option<String>,
    /// Foreground threshold of the CSV encoder
    #[arg(long, global = true)]
    pub sub_thresh: Option<f32>,

    #[arg(long, global = true)]
    pub rotation_range: Option<f32>,
    #[arg(long, global = true)]
    pub width_shift_range: Option<f32>,
    #[arg(long, global = true)]
    pub height_shift_range: Option<f32>,
    #[arg(long, global = true)]
    pub shear_range: Option<f32>,
    #[arg(long, global = true, num_args = 2, value_names = ["LOW", "HIGH"])]
    pub zoom_range: Option<Vec<f32>>,
    #[arg(long, global = true, num_args = 2, value_names = ["LOW", "HIGH"])]
    pub brightness_range: Option<Vec<f32>>,
    /// Disable brightness augmentation
    #[arg(long, global = true, conflicts_with = "brightness_range")]
    pub no_brightness: bool,
    #[arg(long, global = true, value_parser = BoolishValueParser::new())]
    pub horizontal_flip: Option<bool>,
    #[arg(long, global = true, value_parser = BoolishValueParser::new())]
    pub vertical_flip: Option<bool>,
    /// `reflect`, `nearest` or `constant`
    #[arg(long, global = true)]
    pub fill_mode: Option<String>,

    /// `unet`, `unet_dilated1`, `unet_dilated2` or `unet_dilated3`
    #[arg(long, global = true)]
    pub model: Option<ModelChoice>,
    #[arg(long, global = true)]
    pub adam_lr: Option<f64>,

    /// `beforeHough`, `afterHough`, `both` or `None`
    #[arg(long, global = true)]
    pub line_smoothing_mode: Option<LineSmoothingMode>,
    #[arg(long, global = true, value_parser = BoolishValueParser::new())]
    pub apply_hough: Option<bool>,
    /// `discretize` or `graphcut`
    #[arg(long, global = true)]
    pub hough_discretize_mode: Option<DiscretizeMode>,
    /// `discretize` or `graphcut`
    #[arg(long, global = true)]
    pub discretize_mode: Option<DiscretizeMode>,
    #[arg(long, global = true, value_parser = BoolishValueParser::new())]
    pub region_removal: Option<bool>,

    #[arg(long, global = true)]
    pub patch_size: Option<usize>,
    #[arg(long, global = true)]
    pub target_size: Option<u32>,
    #[arg(long, global = true)]
    pub skip_probability: Option<f64>,
    #[arg(long, global = true)]
    pub max_attempts: Option<usize>,
}

macro_rules! override_fields {
    ($overrides:ident => $config:ident: $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = $overrides.$field {
                $config.$field = value;
            }
        )+
    };
}

impl ConfigOverrides {
    /// Replace every option of `config` that was given on the command line.
    pub fn apply(self, mut config: RunConfig) -> RunConfig {
        if let Some(&[low, high]) = self.zoom_range.as_deref() {
            config.zoom_range = [low, high];
        }
        if let Some(&[low, high]) = self.brightness_range.as_deref() {
            config.brightness_range = Some([low, high]);
        }
        if self.no_brightness {
            config.brightness_range = None;
        }

        override_fields!(self => config:
            arg_log, epochs, steps, val_steps, batch_size, seed,
            predict_best, train_model, comb_pred, gather_mode, scale_mode,
            train_path, val_path, test_path, model_path, image_dir, mask_dir,
            out_path, log_path,
            sub_log, sub_name, sub_thresh,
            rotation_range, width_shift_range, height_shift_range, shear_range,
            horizontal_flip, vertical_flip, fill_mode,
            model, adam_lr,
            line_smoothing_mode, apply_hough, hough_discretize_mode,
            discretize_mode, region_removal,
            patch_size, target_size, skip_probability, max_attempts,
        );
        config
    }
}

/// Write the sorted `key = value` dump of `config` to `path`.
pub fn write_config_file(config: &RunConfig, path: &Path) -> Result<()> {
    roadseg_submission::write_config_file(&config.entries()?, path)
        .with_context(|| format!("failed to write config dump {}", path.display()))
}
