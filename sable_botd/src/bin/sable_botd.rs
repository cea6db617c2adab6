use sable_botd::run::{load_config, run_bot, Overrides};
use std::{path::PathBuf, process::ExitCode};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(rename_all = "kebab")]
struct Opts {
    /// Config file location
    #[structopt(short, long)]
    config: PathBuf,

    /// Write the effective configuration back to the config file and exit
    #[structopt(long)]
    save: bool,

    /// Server address, overriding the config file
    #[structopt(short, long)]
    server: Option<String>,

    /// Server port, overriding the config file
    #[structopt(short, long)]
    port: Option<u16>,

    /// Nickname, overriding the config file
    #[structopt(short, long)]
    nickname: Option<String>,
}

/// Main entry point.
///
/// Loads the config before starting the runtime, so that configuration errors
/// are reported without any connection being attempted.
pub fn main() -> Result<ExitCode, anyhow::Error> {
    let opts = Opts::from_args();

    let overrides = Overrides {
        server: opts.server,
        port: opts.port,
        nickname: opts.nickname,
    };
    let config = load_config(&opts.config, overrides)?;

    if opts.save {
        config.save_file(&opts.config)?;
        println!("Configuration written to {}", opts.config.display());
        return Ok(ExitCode::SUCCESS);
    }

    let exit = run_bot(opts.config, config)?;
    Ok(ExitCode::from(exit.exit_code()))
}
