use clap::Parser;

/// Prepares per-period roll-call matrices for spatial scaling.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path, optional) A JSON file describing the run: input, periods, thresholds, cache.
    /// Command line options override the values it contains.
    #[clap(short, long, value_parser)]
    pub config: Option<String>,

    /// (directory or file path) The vote records to read. See the manual for the layouts.
    #[clap(short, long, value_parser)]
    pub input: Option<String>,

    /// (default csv) The layout of the input: csv or json.
    #[clap(long, value_parser)]
    pub input_type: Option<String>,

    /// (directory, default: current directory) Where the matrices and the run report are written.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (directory) A directory with the files of a previous run. If provided, rcprep checks that
    /// every file it writes is identical to the one in the reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// (directory) The fingerprint cache of scaling results.
    #[clap(long, value_parser)]
    pub cache_dir: Option<String>,

    /// (number of days) Removes the cache entries not read within that many days.
    #[clap(long, value_parser)]
    pub evict_days: Option<i64>,

    /// (yearly, events, political, political-halves) A period preset. It replaces the periods of
    /// the configuration file.
    #[clap(long, value_parser)]
    pub periods: Option<String>,

    /// Minimum number of valid votes of a legislator within a period.
    #[clap(long, value_parser)]
    pub min_votes: Option<usize>,

    /// Minimum number of valid votes on a ballot.
    #[clap(long, value_parser)]
    pub min_legislators: Option<usize>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
