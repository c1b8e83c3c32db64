// SPDX-License-Identifier: GPL-3.0-or-later
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "drover", about, long_about = None, version)]
pub(crate) struct Args {
    /// TOML configuration file, layered under `DROVER_*` environment variables.
    #[arg(short, long, global = true)]
    pub(crate) config: Option<PathBuf>,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub(crate) enum Command {
    /// Run the scheduler and the HTTP API until interrupted.
    Serve,
    /// Give one queue a single processing run and print the processed count.
    Process {
        queue: String,
        /// Seconds to run for instead of the queue's processing time.
        #[arg(short, long)]
        time_limit: Option<u64>,
    },
    /// Enqueue a job and print its id.
    Enqueue {
        queue: String,
        job_type: String,
        /// JSON object handed to the executor.
        #[arg(short, long, default_value = "{}")]
        payload: String,
        /// Seconds before the job may be claimed.
        #[arg(short, long, default_value_t = 0)]
        delay: u64,
    },
    /// Print a queue's job counts as JSON.
    Counts { queue: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_process_with_time_limit() {
        let args = Args::try_parse_from(["drover", "process", "default", "--time-limit", "30"])
            .unwrap();
        assert_eq!(
            args.command,
            Command::Process {
                queue: "default".to_string(),
                time_limit: Some(30),
            }
        );
        assert!(args.config.is_none());
    }

    #[test]
    fn parses_enqueue_defaults() {
        let args = Args::try_parse_from(["drover", "-c", "drover.toml", "enqueue", "mail", "echo"])
            .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("drover.toml")));
        assert_eq!(
            args.command,
            Command::Enqueue {
                queue: "mail".to_string(),
                job_type: "echo".to_string(),
                payload: "{}".to_string(),
                delay: 0,
            }
        );
    }

    #[test]
    fn requires_a_subcommand() {
        assert!(Args::try_parse_from(["drover"]).is_err());
        assert!(Args::try_parse_from(["drover", "counts"]).is_err());
    }
}
