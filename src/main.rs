use clap::{Arg, Command};

use libselfpack::Error as SelfpackError;
use libselfpack::*;

use tracing::{debug, error, Level};
use tracing_subscriber::EnvFilter;

use std::env;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

enum Error {
    SelfpackError(SelfpackError),
    IoError(std::io::Error),
    NoInvocationName,
    TargetNotFound(String),
}
impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::SelfpackError(ref e) => write!(f, "selfpack error: {}", e),
            Error::IoError(ref e) => write!(f, "i/o error: {}", e),
            Error::NoInvocationName => write!(f, "the process was started without an argv[0]"),
            Error::TargetNotFound(ref name) => write!(f, "target executable does not exist: {}", name),
        }
    }
}
impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::SelfpackError(ref e) => write!(f, "SelfpackError: {}", e),
            Error::IoError(ref e) => write!(f, "IoError: {}", e),
            Error::NoInvocationName => write!(f, "NoInvocationName: {}", self),
            Error::TargetNotFound(_) => write!(f, "TargetNotFound: {}", self),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::SelfpackError(ref e) => Some(e),
            Error::IoError(ref e) => Some(e),
            _ => None,
        }
    }
}
impl From<SelfpackError> for Error {
    fn from(err: SelfpackError) -> Self {
        Self::SelfpackError(err)
    }
}
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err)
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();
}

fn pack_cli(config: &Config, image: &SelfImage) -> Result<(), Error> {
    let mut app = Command::new("selfpack")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Packs an executable into a self-extracting copy of this tool.")
        .arg(Arg::new("file")
             .value_name("FILE")
             .takes_value(true)
             .help("The executable to pack."))
        .arg(Arg::new("output")
             .short('o')
             .long("output")
             .takes_value(true)
             .help("The location of the packed file. Defaults to FILE with \".packed\" appended."));
    let version_string = format!("{} {}", app.get_name(), app.get_version().unwrap_or_default());
    let matches = app.clone().get_matches();

    let filename = match matches.value_of("file") {
        None => {
            app.print_help()?;
            println!();
            return Ok(());
        },
        Some(s) => s,
    };

    // checked here so a typo fails before the banner and before any packing
    // work; Packer::pack validates the target again for library callers
    if !Path::new(filename).exists() {
        return Err(Error::TargetNotFound(filename.to_string()));
    }

    let packer = Packer::new(config, &image.path);

    let output = match matches.value_of("output") {
        None => packer.output_path(filename),
        Some(s) => PathBuf::from(s),
    };

    println!("== {} ==\n", version_string);
    println!("[+] compressing {} with {} (this might take a bit)", filename, config.algorithm);

    let report = packer.pack(filename, &output)?;

    println!("[+] stub: {} bytes", report.stub_len);
    println!("[+] payload: {} -> {} bytes", report.original_len, report.payload_len);
    println!("\n[!] {} packed to {}", filename, output.display());

    Ok(())
}

fn run() -> Result<(), Error> {
    let config = Config::default();
    let argv0 = env::args_os().next().ok_or(Error::NoInvocationName)?;
    let image = SelfImage::locate(&argv0)?;
    let mut self_file = image.open()?;

    match detect_mode(&mut self_file, image.size)? {
        RunMode::Unpacker => {
            debug!(path = %image.path.display(), "footer found, unpacking");
            let unpacker = Unpacker::new(&config);

            match unpacker.run(&mut self_file, image.size, &image.path)? {}
        },
        RunMode::Packer => {
            drop(self_file);
            pack_cli(&config, &image)
        },
    }
}

fn main() -> ExitCode {
    init_logging();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if tracing::enabled!(Level::ERROR) {
                error!("{}", e);
            }
            else {
                eprintln!("error: {}", e);
            }

            ExitCode::FAILURE
        },
    }
}
