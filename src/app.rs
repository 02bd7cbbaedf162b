use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail, ensure};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::Level;

use crate::config::{AGE_PROGRAM, CLIPBOARD_PROGRAM, MAT2_PROGRAM, PASSPHRASE_WORDS, SHRED_PROGRAM, TAR_PROGRAM};
use crate::error::Error;
use crate::file::discover;
use crate::processor::{Processor, ProcessorOptions};
use crate::tool::{Tool, Toolchain};
use crate::types::{Mode, Target};
use crate::ui::display::{clear_screen, print_banner, show_decrypt_report, show_encrypt_report, show_targets};
use crate::ui::prompt::TerminalHost;

#[derive(Subcommand)]
pub enum Commands {
    /// Bundle files and folders into one passphrase-protected artifact
    Encrypt {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Securely delete the originals after a successful encryption
        #[arg(short, long)]
        delete: bool,

        /// Skip metadata scrubbing even if mat2 is installed
        #[arg(long)]
        no_scrub: bool,

        /// Number of words in the generated passphrase
        #[arg(short, long, default_value_t = PASSPHRASE_WORDS)]
        words: usize,
    },

    /// Decrypt one or more .age artifacts
    Decrypt {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Decrypt when every path is an .age artifact, encrypt otherwise
    Open {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    Interactive,
}

#[derive(Args)]
pub struct ToolArgs {
    /// Encryption tool
    #[arg(long, global = true, env = "AGEGUARD_AGE", default_value = AGE_PROGRAM)]
    age: PathBuf,

    /// Archiver
    #[arg(long, global = true, env = "AGEGUARD_TAR", default_value = TAR_PROGRAM)]
    tar: PathBuf,

    /// Metadata scrubber
    #[arg(long, global = true, env = "AGEGUARD_MAT2", default_value = MAT2_PROGRAM)]
    mat2: PathBuf,

    /// Secure delete tool
    #[arg(long, global = true, env = "AGEGUARD_SHRED", default_value = SHRED_PROGRAM)]
    shred: PathBuf,

    /// Clipboard helper
    #[arg(long, global = true, env = "AGEGUARD_CLIPBOARD", default_value = CLIPBOARD_PROGRAM)]
    clipboard: PathBuf,
}

impl From<ToolArgs> for Toolchain {
    fn from(args: ToolArgs) -> Self {
        Self { age: Tool::new(args.age), tar: Tool::new(args.tar), mat2: Tool::new(args.mat2), shred: Tool::new(args.shred), clipboard: Tool::new(args.clipboard) }
    }
}

#[derive(Parser)]
#[command(name = "ageguard", version = "26.1.0", about = "Encrypt files and folders with age through a pseudo-terminal, with metadata scrubbing and secure deletion.")]
pub struct App {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(flatten)]
    tools: ToolArgs,
}

impl App {
    pub fn init() -> Result<Self> {
        let app = Self::parse();
        let level = match app.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        };
        let subscriber = tracing_subscriber::fmt().with_writer(std::io::stderr).with_max_level(level).with_file(true).with_line_number(true).finish();
        tracing::subscriber::set_global_default(subscriber)?;
        Ok(app)
    }

    pub async fn execute(self) -> Result<()> {
        let tools = Toolchain::from(self.tools);
        let host = TerminalHost::new(tools.clipboard.clone());

        match self.command {
            Some(Commands::Encrypt { paths, delete, no_scrub, words }) => {
                let options = ProcessorOptions { words, scrub: !no_scrub, delete_originals: delete, ..ProcessorOptions::default() };
                Self::encrypt(&Processor::new(tools, options), &paths, &host).await
            }
            Some(Commands::Decrypt { paths }) => Self::decrypt(&Processor::new(tools, ProcessorOptions::default()), &paths, &host).await,
            Some(Commands::Open { paths }) => {
                let processor = Processor::new(tools, ProcessorOptions::default());
                match Mode::infer(&paths) {
                    Mode::Encrypt => Self::encrypt(&processor, &paths, &host).await,
                    Mode::Decrypt => Self::decrypt(&processor, &paths, &host).await,
                }
            }
            Some(Commands::Interactive) | None => Self::interactive(&Processor::new(tools, ProcessorOptions::default()), &host).await,
        }
    }

    async fn encrypt(processor: &Processor, paths: &[PathBuf], host: &TerminalHost) -> Result<()> {
        let targets = paths.iter().map(|path| inspect(path)).collect::<Result<Vec<_>>>()?;
        Self::encrypt_targets(processor, &targets, host).await
    }

    async fn encrypt_targets(processor: &Processor, targets: &[Target], host: &TerminalHost) -> Result<()> {
        match processor.encrypt(targets, host).await {
            Ok(report) => {
                show_encrypt_report(&report);
                Ok(())
            }
            Err(e) => Self::finish_with(e, "encryption failed"),
        }
    }

    async fn decrypt(processor: &Processor, paths: &[PathBuf], host: &TerminalHost) -> Result<()> {
        let paths = paths.iter().map(|path| std::path::absolute(path).with_context(|| format!("invalid path: {}", path.display()))).collect::<Result<Vec<_>>>()?;

        match processor.decrypt(&paths, host).await {
            Ok(report) => {
                show_decrypt_report(&report);
                ensure!(report.failed() == 0, "{} of {} artifact(s) could not be decrypted", report.failed(), report.items.len());
                Ok(())
            }
            Err(e) => Self::finish_with(e, "decryption failed"),
        }
    }

    async fn interactive(processor: &Processor, host: &TerminalHost) -> Result<()> {
        clear_screen()?;
        print_banner();

        let mode = host.select_mode()?;
        let cwd = std::env::current_dir().context("cannot read current directory")?;
        let found = discover(&cwd, mode);
        show_targets(&found);
        if found.is_empty() {
            bail!("no eligible items found in {}", cwd.display());
        }

        let picked = host.select_targets(found)?;
        match mode {
            Mode::Encrypt => Self::encrypt_targets(processor, &picked, host).await,
            Mode::Decrypt => {
                let paths: Vec<PathBuf> = picked.iter().map(|t| t.path().to_path_buf()).collect();
                Self::decrypt(processor, &paths, host).await
            }
        }
    }

    /// Declining a prompt is not a failure of the program.
    fn finish_with(error: Error, action: &str) -> Result<()> {
        if error.is_cancelled() {
            println!("Cancelled, nothing was written.");
            return Ok(());
        }
        bail!("{action}: {}", error.user_message())
    }
}

fn inspect(path: &Path) -> Result<Target> {
    let absolute = std::path::absolute(path).with_context(|| format!("invalid path: {}", path.display()))?;
    Target::inspect(absolute).with_context(|| format!("cannot use {}", path.display()))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        App::command().debug_assert();
    }

    #[test]
    fn test_encrypt_arguments() {
        let app = App::try_parse_from(["ageguard", "encrypt", "--delete", "-w", "12", "a.txt", "photos"]).unwrap();
        let Some(Commands::Encrypt { paths, delete, no_scrub, words }) = app.command else { panic!("expected encrypt") };
        assert_eq!(paths, [PathBuf::from("a.txt"), PathBuf::from("photos")]);
        assert!(delete);
        assert!(!no_scrub);
        assert_eq!(words, 12);
    }

    #[test]
    fn test_tool_overrides() {
        let app = App::try_parse_from(["ageguard", "--age", "/opt/age/bin/age", "decrypt", "x.age"]).unwrap();
        let tools = Toolchain::from(app.tools);
        assert_eq!(tools.age.name(), "age");
        assert_eq!(tools.tar, Tool::new("tar"));
    }

    #[test]
    fn test_decrypt_requires_paths() {
        assert!(App::try_parse_from(["ageguard", "decrypt"]).is_err());
    }
}
