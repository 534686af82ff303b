//! Mock cucumber binary for integration testing
//!
//! Stands in for the real test runner: finds the `.wire` file under the
//! feature path it is given, connects to the step server, sends a byte, and
//! exits with a chosen code. Invoked the same way as cucumber:
//! `mock_cucumber [options] <feature-path>`.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use cucumber_wire_runner::wire::{find_wire_config, parse_wire_config, WireEndpoint};

#[derive(Parser)]
#[command(name = "mock_cucumber")]
struct Args {
    /// Exit with this code
    #[arg(long, default_value_t = 0)]
    exit_code: i32,

    /// Print this line to stdout before exiting
    #[arg(long)]
    print: Option<String>,

    /// Print this line to stderr before exiting
    #[arg(long)]
    eprint: Option<String>,

    /// Do not connect to the wire server
    #[arg(long)]
    no_connect: bool,

    /// Sleep this long (after connecting) before exiting
    #[arg(long, default_value_t = 0)]
    sleep_ms: u64,

    /// Report the environment and working directory the runner gave us
    #[arg(long)]
    report_env: bool,

    /// Feature file or directory
    features: PathBuf,
}

fn main() {
    let args = Args::parse();

    if args.report_env {
        println!(
            "RUBY_IGNORE_CALLERS={}",
            std::env::var("RUBY_IGNORE_CALLERS").unwrap_or_default()
        );
        if let Ok(cwd) = std::env::current_dir() {
            println!("cwd={}", cwd.display());
        }
    }

    if !args.no_connect {
        if let Err(e) = connect_and_send(&args.features) {
            eprintln!("mock_cucumber: {}", e);
            std::process::exit(2);
        }
    }

    if args.sleep_ms > 0 {
        std::thread::sleep(Duration::from_millis(args.sleep_ms));
    }

    if let Some(line) = &args.print {
        println!("{}", line);
    }
    if let Some(line) = &args.eprint {
        eprintln!("{}", line);
    }
    std::io::stdout().flush().ok();

    std::process::exit(args.exit_code);
}

fn connect_and_send(features: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = parse_wire_config(&find_wire_config(features)?)?;

    match endpoint {
        WireEndpoint::Tcp { host, port } => {
            let mut stream = std::net::TcpStream::connect((host.as_str(), port))?;
            stream.write_all(b"x")?;
        }
        #[cfg(unix)]
        WireEndpoint::Unix { path } => {
            let mut stream = std::os::unix::net::UnixStream::connect(path)?;
            stream.write_all(b"x")?;
        }
    }
    println!("mock_cucumber: connected");
    Ok(())
}
