//! cryptfile: password-based file encryption
//!
//! Usage:
//!   cryptfile -e <input> <output> [password]   - encrypt a file
//!   cryptfile -d <input> <output> [password]   - decrypt a file
//!
//! The password is prompted for (without echo) when omitted. Output goes to
//! a temporary file next to <output> and only replaces it on success.

use anyhow::{Context, Result};
use clap::{ArgGroup, CommandFactory, Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;

use cryptfile_core::config::{default_config_path, CryptfileConfig, CryptoConfig, LogFormat};
use cryptfile_crypto::{
    ErrorKind, KdfParams, StreamConfig, StreamEngine, StreamError, StreamSummary,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "cryptfile",
    version,
    about = "File encryption tool",
    long_about = "cryptfile: encrypt and decrypt files with a password (Argon2id + XChaCha20-Poly1305)",
    override_usage = "cryptfile -e <INPUT> <OUTPUT> [PASSWORD]\n       cryptfile -d <INPUT> <OUTPUT> [PASSWORD]",
    group(ArgGroup::new("mode").required(true).args(["encrypt", "decrypt"]))
)]
struct Cli {
    /// Encrypt INPUT into OUTPUT
    #[arg(short = 'e', long)]
    encrypt: bool,

    /// Decrypt INPUT into OUTPUT
    #[arg(short = 'd', long)]
    decrypt: bool,

    /// File to encrypt or decrypt
    input: PathBuf,

    /// Output file (encrypted or plaintext)
    output: PathBuf,

    /// Password to use (prompted for when omitted)
    password: Option<String>,

    /// Path to config.toml (default: ~/.config/cryptfile/config.toml)
    #[arg(long, short = 'c', env = "CRYPTFILE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "CRYPTFILE_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "CRYPTFILE_LOG_FORMAT")]
    log_format: Option<LogFormatArg>,

    /// Hide the progress bar
    #[arg(long, short = 'q')]
    quiet: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Encrypt,
    Decrypt,
}

impl Cli {
    fn mode(&self) -> Mode {
        if self.encrypt {
            Mode::Encrypt
        } else {
            Mode::Decrypt
        }
    }
}

/// First-argument spellings that ask for the usage screen.
const HELP_ARGUMENTS: [&str; 9] = ["?", "-?", "/?", "-h", "/h", "--h", "-help", "/help", "--help"];

fn is_help_argument(arg: &str) -> bool {
    HELP_ARGUMENTS.iter().any(|h| h.eq_ignore_ascii_case(arg))
}

/// Accept `-E` / `-D` as well as `-e` / `-d` for the command flag.
fn normalize_args(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    let mut args: Vec<OsString> = args.into_iter().collect();
    if let Some(command) = args.get_mut(1) {
        match command.to_str() {
            Some("-E") => *command = OsString::from("-e"),
            Some("-D") => *command = OsString::from("-d"),
            _ => {}
        }
    }
    args
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let args = normalize_args(std::env::args_os());

    let wants_help = args
        .get(1)
        .and_then(|arg| arg.to_str())
        .is_some_and(is_help_argument);
    if wants_help {
        let _ = Cli::command().print_help();
        return ExitCode::SUCCESS;
    }

    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(&cli) {
        Ok(message) => {
            println!("{message}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("ERROR: {}", describe(&err));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<&'static str> {
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = CryptfileConfig::load(&config_path)?;

    let level = cli.log.as_deref().unwrap_or(&config.log.level);
    let format = cli.log_format.map(LogFormat::from).unwrap_or(config.log.format);
    init_logging(level, format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = ?cli.mode(),
        config = %config_path.display(),
        "cryptfile starting"
    );

    execute(cli, &config)
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn execute(cli: &Cli, config: &CryptfileConfig) -> Result<&'static str> {
    let mode = cli.mode();

    if !cli.input.is_file() {
        anyhow::bail!("File not found: '{}'.", cli.input.display());
    }

    let password = match &cli.password {
        Some(p) => SecretString::from(p.clone()),
        None => SecretString::from(
            rpassword::prompt_password("Password: ").context("reading password")?,
        ),
    };
    if password.expose_secret().is_empty() {
        anyhow::bail!("Password cannot be empty.");
    }

    let input = File::open(&cli.input)
        .with_context(|| format!("opening input: {}", cli.input.display()))?;
    let input_len = input
        .metadata()
        .with_context(|| format!("reading metadata: {}", cli.input.display()))?
        .len();

    // Write beside the destination so the final rename stays on one filesystem
    let out_dir = cli
        .output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut staging = tempfile::NamedTempFile::new_in(out_dir)
        .with_context(|| format!("creating temporary file in {}", out_dir.display()))?;

    let progress = make_progress_bar(input_len, mode, cli.quiet)?;
    let summary = {
        let reader = BufReader::new(progress.wrap_read(input));
        let mut writer = BufWriter::new(staging.as_file_mut());
        let mut engine = StreamEngine::new(stream_config(&config.crypto));
        let summary = match mode {
            Mode::Encrypt => engine.encrypt(reader, &mut writer, &password),
            Mode::Decrypt => engine.decrypt(reader, &mut writer, &password),
        };
        progress.finish_and_clear();
        let summary = summary?;
        writer.flush().context("flushing output")?;
        summary
    };

    staging
        .as_file()
        .sync_all()
        .context("syncing output")?;
    staging
        .persist(&cli.output)
        .map_err(|e| e.error)
        .with_context(|| format!("writing output: {}", cli.output.display()))?;

    log_summary(mode, &summary, &cli.output);

    Ok(match mode {
        Mode::Encrypt => "File encrypted.",
        Mode::Decrypt => "File decrypted.",
    })
}

fn stream_config(crypto: &CryptoConfig) -> StreamConfig {
    StreamConfig {
        kdf: KdfParams {
            mem_cost_kib: crypto.argon2_mem_cost_kib,
            time_cost: crypto.argon2_time_cost,
            parallelism: crypto.argon2_parallelism,
        },
        chunk_size: crypto.chunk_size,
        workers: crypto.workers,
    }
}

fn log_summary(mode: Mode, summary: &StreamSummary, output: &Path) {
    info!(
        mode = ?mode,
        chunks = summary.chunks,
        plaintext_bytes = summary.plaintext_bytes,
        ciphertext_bytes = summary.ciphertext_bytes,
        output = %output.display(),
        "done"
    );
}

// ── Error messages ────────────────────────────────────────────────────────────

/// Render an error for the console, spelling out the three crypto outcomes.
fn describe(err: &anyhow::Error) -> String {
    match err.downcast_ref::<StreamError>() {
        Some(stream_err) => stream_error_message(stream_err),
        None => format!("{err:#}"),
    }
}

fn stream_error_message(err: &StreamError) -> String {
    match (err.kind(), err) {
        (ErrorKind::NotEncrypted, _) => "The file is not encrypted.".to_string(),
        (_, StreamError::IntegrityCheckFailed(fault)) => format!(
            "Wrong password or file has been tampered with. Integrity check failed: {fault}."
        ),
        (ErrorKind::DecryptionError, _) => format!(
            "Wrong password or file has been tampered with. Decryption error: {err}."
        ),
        _ => err.to_string(),
    }
}

// ── Progress bar / logging ────────────────────────────────────────────────────

fn make_progress_bar(total: u64, mode: Mode, quiet: bool) -> Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({binary_bytes_per_sec})",
        )
        .context("progress bar template")?
        .progress_chars("=>-"),
    );
    pb.set_prefix(match mode {
        Mode::Encrypt => "encrypting",
        Mode::Decrypt => "decrypting",
    });
    Ok(pb)
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptfile_crypto::IntegrityFault;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(args)
    }

    fn fast_config() -> CryptfileConfig {
        let mut config = CryptfileConfig::default();
        config.crypto.argon2_mem_cost_kib = 64;
        config.crypto.argon2_time_cost = 1;
        config.crypto.argon2_parallelism = 1;
        config.crypto.chunk_size = 1024;
        config
    }

    fn cli_for(mode: &str, input: &Path, output: &Path, password: &str) -> Cli {
        parse(&[
            "cryptfile",
            mode,
            input.to_str().unwrap(),
            output.to_str().unwrap(),
            password,
            "--quiet",
        ])
        .unwrap()
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_help_arguments() {
        for arg in ["?", "-?", "/?", "-h", "/H", "--h", "-HELP", "/help", "--help"] {
            assert!(is_help_argument(arg), "{arg} should request help");
        }
        for arg in ["-e", "help", "-hh", ""] {
            assert!(!is_help_argument(arg), "{arg} should not request help");
        }
    }

    #[test]
    fn test_uppercase_command_flag() {
        let args = normalize_args(["cryptfile", "-E", "in", "out"].map(OsString::from));
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.mode(), Mode::Encrypt);

        let args = normalize_args(["cryptfile", "-D", "in", "out"].map(OsString::from));
        assert_eq!(Cli::try_parse_from(args).unwrap().mode(), Mode::Decrypt);
    }

    #[test]
    fn test_parse_positionals() {
        let cli = parse(&["cryptfile", "-d", "a.enc", "a.txt", "hunter2"]).unwrap();
        assert_eq!(cli.mode(), Mode::Decrypt);
        assert_eq!(cli.input, PathBuf::from("a.enc"));
        assert_eq!(cli.output, PathBuf::from("a.txt"));
        assert_eq!(cli.password.as_deref(), Some("hunter2"));

        let cli = parse(&["cryptfile", "-e", "a.txt", "a.enc"]).unwrap();
        assert!(cli.password.is_none());
    }

    #[test]
    fn test_mode_required_and_exclusive() {
        assert!(parse(&["cryptfile", "a", "b"]).is_err());
        assert!(parse(&["cryptfile", "-e", "-d", "a", "b"]).is_err());
        assert!(parse(&["cryptfile", "-e", "a"]).is_err());
    }

    #[test]
    fn test_stream_error_messages() {
        assert_eq!(
            stream_error_message(&StreamError::NotEncrypted),
            "The file is not encrypted."
        );
        assert_eq!(
            stream_error_message(&StreamError::DecryptionFailed { index: 0 }),
            "Wrong password or file has been tampered with. \
             Decryption error: chunk 0 failed authentication."
        );
        assert_eq!(
            stream_error_message(&StreamError::IntegrityCheckFailed(
                IntegrityFault::TrailingData
            )),
            "Wrong password or file has been tampered with. \
             Integrity check failed: unexpected data after the final chunk."
        );
        assert_eq!(
            stream_error_message(&StreamError::UnsupportedVersion(3)),
            "unsupported format version 3"
        );
    }

    #[test]
    fn test_describe_downcasts_stream_errors() {
        let err = anyhow::Error::from(StreamError::NotEncrypted);
        assert_eq!(describe(&err), "The file is not encrypted.");

        let err = anyhow::anyhow!("File not found: 'x'.");
        assert_eq!(describe(&err), "File not found: 'x'.");
    }

    #[test]
    fn test_encrypt_then_decrypt_files() {
        let tmp = TempDir::new().unwrap();
        let plain = tmp.path().join("notes.txt");
        let sealed = tmp.path().join("notes.txt.enc");
        let restored = tmp.path().join("notes.restored.txt");
        let content = b"meeting at noon\n".repeat(500);
        std::fs::write(&plain, &content).unwrap();

        let config = fast_config();
        let msg = execute(&cli_for("-e", &plain, &sealed, "pw"), &config).unwrap();
        assert_eq!(msg, "File encrypted.");
        assert_ne!(std::fs::read(&sealed).unwrap(), content);

        let msg = execute(&cli_for("-d", &sealed, &restored, "pw"), &config).unwrap();
        assert_eq!(msg, "File decrypted.");
        assert_eq!(std::fs::read(&restored).unwrap(), content);
    }

    #[test]
    fn test_failed_decrypt_leaves_no_output() {
        let tmp = TempDir::new().unwrap();
        let plain = tmp.path().join("data.bin");
        let sealed = tmp.path().join("data.enc");
        let restored = tmp.path().join("data.out");
        std::fs::write(&plain, vec![0xA5u8; 5000]).unwrap();

        let config = fast_config();
        execute(&cli_for("-e", &plain, &sealed, "right"), &config).unwrap();

        let err = execute(&cli_for("-d", &sealed, &restored, "wrong"), &config).unwrap_err();
        assert!(describe(&err).starts_with("Wrong password or file has been tampered with."));
        assert!(!restored.exists(), "failed decryption must not leave output behind");
    }

    #[test]
    fn test_decrypt_plain_file() {
        let tmp = TempDir::new().unwrap();
        let plain = tmp.path().join("plain.txt");
        std::fs::write(&plain, "just some text that was never encrypted by anyone").unwrap();

        let err = execute(&cli_for("-d", &plain, &tmp.path().join("out"), "pw"), &fast_config())
            .unwrap_err();
        assert_eq!(describe(&err), "The file is not encrypted.");
    }

    #[test]
    fn test_missing_input_and_empty_password() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope.txt");
        let err = execute(&cli_for("-e", &missing, &tmp.path().join("o"), "pw"), &fast_config())
            .unwrap_err();
        assert_eq!(describe(&err), format!("File not found: '{}'.", missing.display()));

        let present = tmp.path().join("yes.txt");
        std::fs::write(&present, "x").unwrap();
        let err = execute(&cli_for("-e", &present, &tmp.path().join("o"), ""), &fast_config())
            .unwrap_err();
        assert_eq!(describe(&err), "Password cannot be empty.");
    }
}
