// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("conary-repodata")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Conary Contributors")
        .about("Generate repository metadata for a directory of RPM packages")
        .arg(
            Arg::new("directory")
                .required(true)
                .value_name("DIRECTORY")
                .help("Directory containing the packages"),
        )
        .arg(
            Arg::new("exclude")
                .short('x')
                .long("exclude")
                .value_name("GLOB")
                .action(ArgAction::Append)
                .help("Exclude packages matching a shell glob (repeatable)"),
        )
        .arg(
            Arg::new("baseurl")
                .short('u')
                .long("baseurl")
                .value_name("URL")
                .help("Base URL recorded on every manifest location"),
        )
        .arg(
            Arg::new("groupfile")
                .short('g')
                .long("groupfile")
                .value_name("PATH")
                .help("Group file to copy into the metadata"),
        )
        .arg(
            Arg::new("checksum")
                .short('s')
                .long("checksum")
                .default_value("sha256")
                .value_parser(["md5", "sha256", "sha512"])
                .help("Checksum algorithm for packages and metadata"),
        )
        .arg(
            Arg::new("pretty")
                .short('p')
                .long("pretty")
                .action(ArgAction::SetTrue)
                .help("Indent the catalog documents"),
        )
        .arg(
            Arg::new("autoglob")
                .long("autoglob")
                .action(ArgAction::SetTrue)
                .help("Derive file patterns from path requirements of the packages"),
        )
        .arg(
            Arg::new("dirglob")
                .long("dirglob")
                .value_name("REGEX")
                .action(ArgAction::Append)
                .help(
                    "Directory pattern for the primary file list \
                     (repeatable, replaces the defaults)",
                ),
        )
        .arg(
            Arg::new("fileglob")
                .long("fileglob")
                .value_name("REGEX")
                .action(ArgAction::Append)
                .help("File pattern for the primary file list (repeatable, replaces the defaults)"),
        )
        .arg(
            Arg::new("globinfo")
                .long("globinfo")
                .value_parser(["yes", "no"])
                .help("Record the active patterns in the manifest (default: yes with --autoglob)"),
        )
        .arg(
            Arg::new("extension")
                .long("extension")
                .default_value("rpm")
                .help("Package file extension"),
        )
        .arg(
            Arg::new("workers")
                .short('j')
                .long("workers")
                .help("Worker threads for checksumming and header reading"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Debug logging"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Only log warnings and errors"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the build summary as JSON"),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer)
        .expect("Failed to render man page");

    let man_path = man_dir.join("conary-repodata.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
