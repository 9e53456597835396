use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Parser;
use tracing_subscriber::filter::LevelFilter;

use cairn::ui::{self, Env};

#[derive(Debug, Parser)]
#[command(name = "cairn", about = "A content-addressed snapshot backup system")]
struct Args {
    /// Verbosity (-v, -vv, -vvv, etc.)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use this config file instead of the default
    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    /// Operate on this storage instead of the configured default
    #[arg(long, global = true)]
    storage: Option<String>,

    #[command(subcommand)]
    subcommand: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
enum Subcommand {
    WriteDir(ui::write_dir::Args),
    RestoreDir(ui::restore_dir::Args),
    TakeSnapshot(ui::take_snapshot::Args),
    CreateSnapshot(ui::create_snapshot::Args),
    Snapshots(ui::snapshots::Args),
    RestoreSnapshot(ui::restore_snapshot::Args),
    Fsck(ui::fsck::Args),
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.verbose);

    let mut env = Env::open(args.config.as_deref(), args.storage.as_deref())?;

    let result = match args.subcommand {
        Subcommand::WriteDir(a) => ui::write_dir::run(&mut env, a),
        Subcommand::RestoreDir(a) => ui::restore_dir::run(&mut env, a),
        Subcommand::TakeSnapshot(a) => ui::take_snapshot::run(&mut env, a),
        Subcommand::CreateSnapshot(a) => ui::create_snapshot::run(&mut env, a),
        Subcommand::Snapshots(a) => ui::snapshots::run(&mut env, a),
        Subcommand::RestoreSnapshot(a) => ui::restore_snapshot::run(&mut env, a),
        Subcommand::Fsck(a) => ui::fsck::run(&mut env, a),
    };

    // Even a failed run flushes what it stored so far.
    let closed = env.close();
    result.and(closed)
}

/// Set up tracing to spit messages to stderr.
fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
