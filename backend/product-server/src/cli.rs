use std::{ffi::OsString, path::PathBuf};

use clap::Parser;

use crate::consts;

/// Single-port HTTP and gRPC front door of the product service.
#[derive(Debug, Clone, Parser)]
#[command(version)]
pub struct Cli {
    /// Path to the config file
    #[arg(long = "config", value_name = "PATH", default_value = consts::DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Directory receiving the dated log files
    #[arg(long = "log.file", value_name = "DIR", default_value = consts::DEFAULT_LOG_DIRECTORY)]
    pub log_directory: PathBuf,
}

impl Cli {
    /// Parses the process arguments, accepting `-config` and `-log.file` as
    /// well as their double-dash forms.
    pub fn parse_args() -> Self {
        Self::parse_from(normalize_args(std::env::args_os()))
    }
}

const LONG_FLAGS: [&str; 2] = ["config", "log.file"];

/// Rewrites single-dash spellings of the long flags to their double-dash
/// form, including the `-flag=value` variant. Everything else passes through.
pub fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| {
            let rewritten = arg.to_str().and_then(|text| {
                let flag = text.strip_prefix('-')?;
                if flag.starts_with('-') {
                    return None;
                }
                let name = flag.split_once('=').map_or(flag, |(name, _)| name);
                LONG_FLAGS
                    .contains(&name)
                    .then(|| OsString::from(format!("-{text}")))
            });
            rewritten.unwrap_or(arg)
        })
        .collect()
}
