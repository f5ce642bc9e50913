//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use geofetch::DEFAULT_MAX_RETRIES;
use geofetch::download::constants::{
    DEFAULT_MAX_CONCURRENT, DEFAULT_MULTIPART_COUNT, DEFAULT_PART_CONCURRENCY,
};

/// Bulk download the contents of an object-storage data repository.
///
/// Reads a JSON listing of objects (as produced by the repository
/// lister) from a file or stdin and downloads every object into the
/// output directory, resuming past completed files on re-runs.
#[derive(Parser, Debug)]
#[command(name = "geofetch")]
#[command(author, version, about)]
pub struct Args {
    /// JSON listing of objects to download (reads stdin when omitted)
    pub listing: Option<PathBuf>,

    /// Directory to recreate the repository layout under
    #[arg(short, long, default_value = "./downloads")]
    pub output_dir: PathBuf,

    /// Repository identifier recorded in the resume manifest
    #[arg(long, default_value = "")]
    pub repository: String,

    /// Key prefix stripped from object keys before writing
    #[arg(long)]
    pub strip_prefix: Option<String>,

    /// Maximum concurrent object downloads (1-100)
    #[arg(short = 'c', long, default_value_t = DEFAULT_MAX_CONCURRENT as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub max_concurrent: u8,

    /// Parts to split large objects into (0 disables multipart)
    #[arg(short = 'm', long, default_value_t = DEFAULT_MULTIPART_COUNT as u8, value_parser = clap::value_parser!(u8).range(0..=64))]
    pub multipart: u8,

    /// Maximum outstanding range requests across all downloads (1-256)
    #[arg(short = 'p', long, default_value_t = DEFAULT_PART_CONCURRENCY as u16, value_parser = clap::value_parser!(u16).range(1..=256))]
    pub part_concurrency: u16,

    /// Maximum retry attempts for transient failures (1-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_retries: u8,

    /// Suppress progress rendering and non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let args = Args::try_parse_from(["geofetch"]).unwrap();
        assert!(args.listing.is_none());
        assert_eq!(args.output_dir, PathBuf::from("./downloads"));
        assert_eq!(args.max_concurrent, 10);
        assert_eq!(args.multipart, 8);
        assert_eq!(args.part_concurrency, 16);
        assert_eq!(args.max_retries, 3);
        assert!(!args.quiet);
        assert_eq!(args.verbose, 0);
    }

    #[test]
    fn test_cli_listing_positional() {
        let args = Args::try_parse_from(["geofetch", "listing.json"]).unwrap();
        assert_eq!(args.listing, Some(PathBuf::from("listing.json")));
    }

    #[test]
    fn test_cli_all_flags() {
        let args = Args::try_parse_from([
            "geofetch",
            "listing.json",
            "-o",
            "/tmp/out",
            "--repository",
            "acct/repo",
            "--strip-prefix",
            "acct/repo",
            "-c",
            "4",
            "-m",
            "2",
            "-p",
            "8",
            "-r",
            "5",
            "-q",
        ])
        .unwrap();
        assert_eq!(args.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(args.repository, "acct/repo");
        assert_eq!(args.strip_prefix.as_deref(), Some("acct/repo"));
        assert_eq!(args.max_concurrent, 4);
        assert_eq!(args.multipart, 2);
        assert_eq!(args.part_concurrency, 8);
        assert_eq!(args.max_retries, 5);
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_multipart_zero_allowed() {
        // 0 disables splitting entirely.
        let args = Args::try_parse_from(["geofetch", "-m", "0"]).unwrap();
        assert_eq!(args.multipart, 0);
    }

    #[test]
    fn test_cli_concurrency_zero_rejected() {
        let result = Args::try_parse_from(["geofetch", "-c", "0"]);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::ValueValidation
        );
    }

    #[test]
    fn test_cli_concurrency_over_max_rejected() {
        let result = Args::try_parse_from(["geofetch", "-c", "101"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_part_concurrency_zero_rejected() {
        let result = Args::try_parse_from(["geofetch", "-p", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_verbose_counts() {
        let args = Args::try_parse_from(["geofetch", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_help_flag() {
        let result = Args::try_parse_from(["geofetch", "--help"]);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::DisplayHelp
        );
    }
}
