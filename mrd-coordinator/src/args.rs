use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// The port for the coordinator server to run on.
    #[arg(short, long, default_value = "8030")]
    pub port: u16,

    /// Worker pool endpoint.
    #[arg(short, long, default_value = "http://127.0.0.1:8040")]
    pub worker_pool_url: String,

    /// Event log endpoint.
    #[arg(short, long, default_value = "http://127.0.0.1:8041")]
    pub event_log_url: String,

    /// Out-of-band key store endpoint.
    #[arg(short, long, default_value = "http://127.0.0.1:8042")]
    pub oob_url: String,

    /// Garbage collector endpoint.
    #[arg(short, long, default_value = "http://127.0.0.1:8043")]
    pub gc_url: String,

    /// Data-error failures tolerated per partition before a job aborts.
    #[arg(short, long, default_value = "3")]
    pub max_failure_rate: usize,
}
