use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Frame directories to process, one pipeline per directory
    #[arg(long = "input", required = true)]
    pub inputs: Vec<PathBuf>,

    /// Root directory for output artifacts
    #[arg(long, env = "METEOR_PIPELINE_OUTPUT_ROOT", default_value = "output")]
    pub output_root: PathBuf,

    /// JSON properties file
    #[arg(long, env = "METEOR_PIPELINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Property overrides as key=value
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,

    /// Normalizer name, used as the `normalizer.<name>` property namespace
    #[arg(long, default_value = "size")]
    pub normalizer: String,

    /// Pass frames to the detector without resizing or masking
    #[arg(long)]
    pub skip_normalize: bool,

    /// Log detections instead of writing results.csv
    #[arg(long)]
    pub log_only: bool,

    /// Target frame width
    #[arg(long, default_value_t = 640)]
    pub width: u32,

    /// Target frame height
    #[arg(long, default_value_t = 480)]
    pub height: u32,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
