use clap::Parser;

/// Growatt Bridge - transparent datalogger proxy with telemetry decoding
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Config file to read
    #[clap(short = 'c', long = "config", default_value = "config.yaml")]
    pub config_file: String,

    /// Do not forward data to Growatt's servers
    #[clap(long = "no-forward")]
    pub no_forward: bool,

    /// Directory of layout documents, overrides the config file
    #[clap(short = 'l', long = "layouts")]
    pub layouts: Option<String>,

    /// Debug mode, more verbose
    #[clap(short = 'd', long = "debug")]
    pub debug: bool,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}
