use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::EngineConfig;
use crate::engine::AppendEntry;
use crate::zip::ExtractOptions;

#[derive(Parser, Debug)]
#[command(name = "attrzip")]
#[command(version)]
#[command(about = "A ZIP archiver that preserves POSIX owner, group and mode", long_about = None)]
#[command(after_help = "Examples:\n  \
  attrzip add logs.zip /var/log/app -r --relative-to /var/log   archive a tree\n  \
  attrzip list logs.zip                                          show members\n  \
  attrzip unzip logs.zip -d /tmp/out --restore-permissions       extract with modes\n  \
  attrzip delete logs.zip app/old.log                            remove a member")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Deflate level (0-9)
    #[arg(long, global = true, default_value_t = 9, value_parser = clap::value_parser!(u32).range(0..=9))]
    pub level: u32,

    /// Verbose logging (-vv => trace)
    #[arg(short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add files or directories to an archive, creating it if needed
    Add {
        /// ZIP file path
        #[arg(value_name = "ZIPFILE")]
        zipfile: PathBuf,

        /// Files or directories to add
        #[arg(value_name = "FILES", required = true)]
        files: Vec<PathBuf>,

        /// Strip this prefix from member names
        #[arg(long, value_name = "DIR")]
        relative_to: Option<PathBuf>,

        /// Recurse into directories
        #[arg(short = 'r', long)]
        recursive: bool,
    },

    /// Extract members from an archive
    Unzip {
        /// ZIP file path
        #[arg(value_name = "ZIPFILE")]
        zipfile: PathBuf,

        /// Members to extract (default: all)
        #[arg(value_name = "FILES")]
        files: Vec<String>,

        /// Extract every member under this archive directory
        #[arg(long = "directory", value_name = "DIR")]
        directories: Vec<String>,

        /// Extract files into exdir
        #[arg(short = 'd', value_name = "DIR", default_value = ".")]
        extract_dir: PathBuf,

        /// Overwrite existing files
        #[arg(short = 'o', long = "replace")]
        replace: bool,

        /// Restore owner, group, mode and symbolic links
        #[arg(short = 'p', long)]
        restore_permissions: bool,
    },

    /// List archive members
    List {
        /// ZIP file path
        #[arg(value_name = "ZIPFILE")]
        zipfile: PathBuf,
    },

    /// Delete members from an archive
    Delete {
        /// ZIP file path
        #[arg(value_name = "ZIPFILE")]
        zipfile: PathBuf,

        /// Members to delete
        #[arg(value_name = "NAMES", required = true)]
        names: Vec<String>,
    },
}

impl Cli {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            compression_level: self.level,
            ..Default::default()
        }
    }

    /// Default `log` filter for the requested verbosity.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    }
}

impl Command {
    /// Append requests for an `add` command.
    pub fn append_entries(files: &[PathBuf], relative_to: Option<&PathBuf>, recursive: bool) -> Vec<AppendEntry> {
        files
            .iter()
            .map(|file| AppendEntry {
                source: file.clone(),
                relative_to: relative_to.cloned(),
                recursive,
            })
            .collect()
    }

    /// Extraction options for an `unzip` command.
    pub fn extract_options(
        files: &[String],
        directories: &[String],
        replace: bool,
        restore_permissions: bool,
    ) -> ExtractOptions {
        ExtractOptions {
            names: (!files.is_empty()).then(|| files.to_vec()),
            directories: directories.to_vec(),
            replace_existing: replace,
            restore_permissions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_add_command() {
        let cli = Cli::parse_from([
            "attrzip", "add", "out.zip", "a", "b", "-r", "--relative-to", "/src", "--level", "3",
        ]);
        assert_eq!(cli.engine_config().compression_level, 3);
        match cli.command {
            Command::Add {
                zipfile,
                files,
                relative_to,
                recursive,
            } => {
                assert_eq!(zipfile, PathBuf::from("out.zip"));
                let entries = Command::append_entries(&files, relative_to.as_ref(), recursive);
                assert_eq!(entries.len(), 2);
                assert!(entries[1].recursive);
                assert_eq!(entries[0].relative_to.as_deref(), Some(std::path::Path::new("/src")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn unzip_without_names_extracts_everything() {
        let cli = Cli::parse_from(["attrzip", "-v", "unzip", "in.zip", "-d", "out", "-p"]);
        assert_eq!(cli.log_filter(), "debug");
        let Command::Unzip {
            files,
            directories,
            replace,
            restore_permissions,
            ..
        } = cli.command
        else {
            panic!("expected unzip");
        };
        let options = Command::extract_options(&files, &directories, replace, restore_permissions);
        assert_eq!(options.names, None);
        assert!(options.restore_permissions);
        assert!(!options.replace_existing);
    }

    #[test]
    fn level_is_bounded() {
        assert!(Cli::try_parse_from(["attrzip", "list", "x.zip", "--level", "12"]).is_err());
    }
}
