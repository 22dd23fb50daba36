// src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use conary_repodata::packages::RpmReader;
use conary_repodata::{build_repository, BuildReport, ChecksumType, RepoConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum YesNo {
    Yes,
    No,
}

#[derive(Parser)]
#[command(name = "conary-repodata")]
#[command(author, version, long_about = None)]
#[command(about = "Generate repository metadata for a directory of RPM packages")]
struct Cli {
    /// Directory containing the packages
    directory: PathBuf,

    /// Exclude packages matching a shell glob (repeatable)
    #[arg(short = 'x', long, value_name = "GLOB")]
    exclude: Vec<String>,

    /// Base URL recorded on every manifest location
    #[arg(short = 'u', long, value_name = "URL")]
    baseurl: Option<String>,

    /// Group file to copy into the metadata
    #[arg(short, long, value_name = "PATH")]
    groupfile: Option<PathBuf>,

    /// Checksum algorithm for packages and metadata (md5, sha256, sha512)
    #[arg(short = 's', long, default_value = "sha256")]
    checksum: ChecksumType,

    /// Indent the catalog documents
    #[arg(short, long)]
    pretty: bool,

    /// Derive file patterns from path requirements of the packages
    #[arg(long, conflicts_with_all = ["dirglob", "fileglob"])]
    autoglob: bool,

    /// Directory pattern for the primary file list (repeatable, replaces the defaults)
    #[arg(long, value_name = "REGEX")]
    dirglob: Vec<String>,

    /// File pattern for the primary file list (repeatable, replaces the defaults)
    #[arg(long, value_name = "REGEX")]
    fileglob: Vec<String>,

    /// Record the active patterns in the manifest (default: yes with --autoglob)
    #[arg(long, value_enum)]
    globinfo: Option<YesNo>,

    /// Package file extension
    #[arg(long, default_value = "rpm")]
    extension: String,

    /// Worker threads for checksumming and header reading
    #[arg(short = 'j', long)]
    workers: Option<usize>,

    /// Debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,

    /// Print the build summary as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn into_config(self) -> RepoConfig {
        let mut config = RepoConfig::new(self.directory).with_patterns(self.fileglob, self.dirglob);
        config.extension = self.extension;
        config.excludes = self.exclude;
        config.base_url = self.baseurl;
        config.group_file = self.groupfile;
        config.checksum = self.checksum;
        config.pretty = self.pretty;
        config.autoglob = self.autoglob;
        config.globinfo = match self.globinfo {
            Some(choice) => choice == YesNo::Yes,
            None => self.autoglob,
        };
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        config
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_report(report: &BuildReport) {
    println!(
        "Indexed {} packages from {} ({} skipped)",
        report.packages,
        report.root.display(),
        report.skipped.len()
    );
    for skipped in &report.skipped {
        println!("  skipped {}: {}", skipped.path.display(), skipped.reason);
    }
    println!("Manifest: {}", report.manifest.display());
    for entry in &report.entries {
        println!(
            "  {:<10} {} {}",
            entry.role.name(),
            entry.checksum.value,
            entry.location
        );
    }
    if report.cleanup_warnings > 0 {
        println!(
            "{} cleanup warnings, see log output",
            report.cleanup_warnings
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let json = cli.json;
    let config = cli.into_config();
    info!(
        "Generating metadata for {} ({} checksums)",
        config.root.display(),
        config.checksum
    );

    let report = build_repository(&config, &RpmReader::new())
        .with_context(|| format!("Failed to build metadata for {}", config.root.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from(args: &[&str]) -> RepoConfig {
        Cli::try_parse_from(args).unwrap().into_config()
    }

    #[test]
    fn test_globinfo_follows_autoglob_by_default() {
        assert!(!config_from(&["conary-repodata", "/srv/repo"]).globinfo);
        assert!(config_from(&["conary-repodata", "--autoglob", "/srv/repo"]).globinfo);
    }

    #[test]
    fn test_globinfo_explicit_choice_wins() {
        let args = ["conary-repodata", "--autoglob", "--globinfo", "no", "/srv/repo"];
        assert!(!config_from(&args).globinfo);
        assert!(config_from(&["conary-repodata", "--globinfo", "yes", "/srv/repo"]).globinfo);
    }

    #[test]
    fn test_autoglob_conflicts_with_manual_patterns() {
        let args = ["conary-repodata", "--autoglob", "--fileglob", "^/bin/", "/srv/repo"];
        assert!(Cli::try_parse_from(args).is_err());
    }
}
