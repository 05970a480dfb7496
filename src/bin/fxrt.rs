use std::io::Write;
use std::path::PathBuf;
use std::process;

use clap::Parser;

use xrt_rs::job::{JobConfig, run};

#[derive(Parser)]
#[command(
    name = "fxrt",
    about = "Run a MapReduce-style batch job over local files",
    disable_version_flag = true
)]
struct Cli {
    /// Input file, directory, or wildcard pattern
    #[arg(long = "input", value_name = "PATH", default_value = "")]
    input: String,

    /// Mapper command (required)
    #[arg(long = "mapper", value_name = "CMD", default_value = "")]
    mapper: String,

    /// Number of mapper workers
    #[arg(long = "mappers", value_name = "NUM", default_value_t = 4)]
    mappers: usize,

    /// Reducer command; omit for a map-only job
    #[arg(long = "reducer", value_name = "CMD", default_value = "")]
    reducer: String,

    /// Number of reducer workers
    #[arg(long = "reducers", value_name = "NUM", default_value_t = 4)]
    reducers: usize,

    /// Intermediate memory limit, example: 1k, 2m, 3g, 4t
    #[arg(long = "memory", value_name = "MEM", default_value = "256m")]
    memory: String,

    /// Output directory; if not set any output goes to stdout
    #[arg(long = "output", value_name = "DIR", default_value = "")]
    output: String,

    /// Temporary directory
    #[arg(long = "tempdir", value_name = "DIR")]
    tempdir: Option<PathBuf>,

    /// Print version and exit
    #[arg(long = "version")]
    version: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.version {
        println!("{}", xrt_rs::VERSION);
        return;
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();

    let mut config = JobConfig {
        input: cli.input,
        mapper: cli.mapper,
        mappers: cli.mappers,
        reducer: cli.reducer,
        reducers: cli.reducers,
        memory: cli.memory,
        output: cli.output,
        ..JobConfig::default()
    };
    if let Some(tempdir) = cli.tempdir {
        config.temp_dir = tempdir;
    }

    if run(config).is_err() {
        process::exit(1);
    }
}
