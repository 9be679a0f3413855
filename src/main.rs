use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use argh::FromArgs;
use dbintel::sources::redis::{Config, RedisFactory};
use exitcode::ExitCode;
use framework::{Factory, Pipeline, ReceiverContext, ShutdownSignal};
use tracing::{error, info};

#[derive(FromArgs, Debug)]
/// Scrape a Redis deployment and print every batch as a JSON line
struct RootCommand {
    #[argh(option, short = 'c', description = "path of the YAML config file")]
    config: PathBuf,

    #[argh(
        option,
        short = 'l',
        default = "String::from(\"info\")",
        description = "log level, RUST_LOG takes precedence"
    )]
    log_level: String,

    #[argh(option, description = "number of worker threads, defaults to 2")]
    threads: Option<usize>,
}

fn load(path: &Path) -> framework::Result<Config> {
    let text = std::fs::read_to_string(path)?;
    let config = serde_yaml::from_str::<Config>(&text)?;

    Ok(config)
}

fn main() {
    let opts: RootCommand = argh::from_env();

    framework::trace::init(std::io::stderr().is_terminal(), &opts.log_level);

    let config = match load(&opts.config) {
        Ok(config) => config,
        Err(err) => {
            error!(message = "load config failed", path = ?opts.config, %err);
            std::process::exit(exitcode::CONFIG);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(opts.threads.unwrap_or(2))
        .thread_name("dbintel-worker")
        .enable_io()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(message = "build tokio runtime failed", %err);
            std::process::exit(exitcode::OSERR);
        }
    };

    let code = runtime.block_on(run(config));
    std::process::exit(code);
}

async fn run(config: Config) -> ExitCode {
    let (output, mut batches) = Pipeline::new();
    let (trigger, shutdown) = ShutdownSignal::new();
    let cx = ReceiverContext {
        key: RedisFactory.component_type().to_string(),
        output,
        shutdown,
    };

    let receiver = match RedisFactory.create_metrics_receiver(cx, config) {
        Ok(receiver) => receiver,
        Err(err) => {
            error!(message = "invalid config", %err);
            return exitcode::CONFIG;
        }
    };

    info!(message = "start dbintel", version = env!("CARGO_PKG_VERSION"));

    let mut receiver = tokio::spawn(receiver);
    loop {
        tokio::select! {
            Some(batch) = batches.recv() => {
                match serde_json::to_string(&batch) {
                    Ok(line) => println!("{line}"),
                    Err(err) => error!(message = "encode batch failed", %err),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!(message = "signal received, shutting down");
                trigger.trigger();
            }

            result = &mut receiver => {
                return match result {
                    Ok(Ok(())) => exitcode::OK,
                    Ok(Err(())) => exitcode::UNAVAILABLE,
                    Err(err) => {
                        error!(message = "receiver panicked", %err);
                        exitcode::SOFTWARE
                    }
                };
            }
        }
    }
}
