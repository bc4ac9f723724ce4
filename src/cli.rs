use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sb3js-rs",
    about = "Scratch 3 to JavaScript compiler (typed, ahead of time)."
)]
pub struct Args {
    /// An .sb3 archive or a bare project.json file.
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output path; defaults to the input with a .js extension.
    #[arg(value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    #[arg(long, help = "Keep a newline between emitted statements.")]
    pub no_minify: bool,

    #[arg(
        long,
        help = "Always use Math.floor instead of |0, even where int32 overflow is impossible."
    )]
    pub safe_floor: bool,

    #[arg(
        long,
        help = "Skip the 10-decimal rounding of sin/cos results that matches Scratch."
    )]
    pub fast_trig: bool,

    #[arg(long, help = "Disable compile-time constant folding.")]
    pub no_precompute: bool,

    #[arg(long, default_value = "", help = "Value reported by the username block.")]
    pub username: String,
}
