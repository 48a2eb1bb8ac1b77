use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ziputil")]
#[command(version)]
#[command(about = "Pack and unpack ZIP archives, and move files over HTTP", long_about = None)]
#[command(after_help = "Examples:\n  \
  ziputil pack ./build build.zip -b          archive build/ with a build/ prefix\n  \
  ziputil unpack build.zip ./restored        extract into ./restored\n  \
  ziputil download https://example.com/a.zip a.zip --api-key KEY")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', long, global = true, action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// More log output (-vv => trace)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pack the regular files of a directory into a ZIP archive
    Pack {
        /// Directory to pack
        #[arg(value_name = "SRC")]
        src: PathBuf,

        /// Archive to create (overwritten if it exists)
        #[arg(value_name = "ARCHIVE")]
        dest: PathBuf,

        /// Prefix entry names with the directory's own name
        #[arg(short = 'b', long)]
        base_dir: bool,
    },

    /// Extract a ZIP archive into a directory
    Unpack {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        /// Destination directory, created if missing
        #[arg(value_name = "DIR")]
        dest: PathBuf,
    },

    /// List the entries of a ZIP archive
    List {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        /// Show sizes, compression ratio and timestamps
        #[arg(short = 'l', long)]
        long: bool,
    },

    /// Download a URL to a local file
    Download {
        #[arg(value_name = "URL")]
        url: String,

        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Sent as the x-api-key header
        #[arg(long, env = "ZIPUTIL_API_KEY", default_value = "", hide_env_values = true)]
        api_key: String,
    },

    /// Upload a local file as multipart field "file"
    Upload {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(value_name = "URL")]
        url: String,

        /// Sent as the X-Api-Key header
        #[arg(long, env = "ZIPUTIL_API_KEY", default_value = "", hide_env_values = true)]
        api_key: String,
    },
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0
    }

    /// Default log filter for the requested verbosity; `RUST_LOG` wins over it.
    pub fn log_filter(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (q, _) if q > 1 => "error",
            (1, _) => "warn",
            (_, 0) => "info",
            (_, 1) => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pack_with_base_dir() {
        let cli = Cli::try_parse_from(["ziputil", "pack", "src", "out.zip", "-b"]).unwrap();
        match cli.command {
            Command::Pack {
                src,
                dest,
                base_dir,
            } => {
                assert_eq!(src, PathBuf::from("src"));
                assert_eq!(dest, PathBuf::from("out.zip"));
                assert!(base_dir);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_upload_with_key() {
        let cli = Cli::try_parse_from([
            "ziputil",
            "upload",
            "report.zip",
            "https://example.com/up",
            "--api-key",
            "secret",
        ])
        .unwrap();
        match cli.command {
            Command::Upload { file, url, api_key } => {
                assert_eq!(file, PathBuf::from("report.zip"));
                assert_eq!(url, "https://example.com/up");
                assert_eq!(api_key, "secret");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn verbosity_maps_to_filter() {
        let cli = Cli::try_parse_from(["ziputil", "-vv", "list", "a.zip"]).unwrap();
        assert_eq!(cli.log_filter(), "trace");

        let cli = Cli::try_parse_from(["ziputil", "list", "a.zip", "-q"]).unwrap();
        assert_eq!(cli.log_filter(), "warn");
        assert!(cli.is_quiet());

        let cli = Cli::try_parse_from(["ziputil", "list", "a.zip"]).unwrap();
        assert_eq!(cli.log_filter(), "info");
    }

    #[test]
    fn unpack_requires_destination() {
        assert!(Cli::try_parse_from(["ziputil", "unpack", "a.zip"]).is_err());
    }
}
