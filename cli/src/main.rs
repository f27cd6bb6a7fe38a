#![allow(clippy::print_stdout, clippy::print_stderr)]
use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueHint};
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use vigraph::ingest;
use vigraph::protocol::{Outbound, ResponseMessage};
use vigraph::GraphWorker;

#[derive(Parser)]
#[command(about, version, name = "vigraph")]
/// ViGraph worker host and RDF toolkit.
struct Args {
    /// Log filter, e.g. `info` or `vigraph=debug`. Logs go to stderr.
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the worker over newline-delimited JSON on stdin/stdout.
    ///
    /// Each stdin line is one inbound message, each stdout line one outbound
    /// message. Malformed lines are answered with `response{ok:false}`.
    Serve,
    /// Convert an RDF file between serializations.
    Convert {
        /// Input file. Reads from standard input if not present.
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        input: Option<PathBuf>,
        /// Output file. Writes to standard output if not present.
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        output: Option<PathBuf>,
        /// Media type of the input. Resolved from the file name or content
        /// when absent.
        #[arg(long)]
        from: Option<String>,
        /// Target format, e.g. `turtle`, `n-quads`, `rdf+xml`, `ld+json`.
        #[arg(long)]
        to: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&args.log_level)
                .context("invalid --log-level filter")?,
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Serve => serve().await,
        Command::Convert {
            input,
            output,
            from,
            to,
        } => convert(input.as_deref(), output.as_deref(), from.as_deref(), &to),
    }
}

async fn serve() -> anyhow::Result<()> {
    let mut handle = GraphWorker::spawn();
    let sender = handle.sender();
    let (error_tx, mut error_rx) = tokio::sync::mpsc::unbounded_channel::<ResponseMessage>();

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match vigraph::decode_inbound(line) {
                Ok(message) => {
                    if sender.send(message).is_err() {
                        break;
                    }
                }
                Err(error) => {
                    debug!(message = %error.message, "rejected inbound line");
                    let response =
                        ResponseMessage::err(error.id.unwrap_or_default(), error.message);
                    if error_tx.send(response).is_err() {
                        break;
                    }
                }
            }
        }
    });

    loop {
        let outbound = tokio::select! {
            Some(response) = error_rx.recv() => Some(Outbound::Response(response)),
            message = handle.recv() => message,
        };
        let Some(message) = outbound else {
            break;
        };
        println!("{}", serde_json::to_string(&message)?);
    }
    Ok(())
}

fn convert(
    input: Option<&std::path::Path>,
    output: Option<&std::path::Path>,
    from: Option<&str>,
    to: &str,
) -> anyhow::Result<()> {
    let content = match input {
        Some(path) => fs::read(path).with_context(|| format!("unable to read {}", path.display()))?,
        None => {
            let mut buffer = Vec::new();
            std::io::stdin().read_to_end(&mut buffer)?;
            buffer
        }
    };
    let hints = ingest::extension_hints(None, None, input.and_then(|p| p.to_str()));
    let Ok(input_format) = ingest::resolve_format(from, None, &hints, &content) else {
        bail!("unable to resolve the input RDF format; pass --from");
    };
    let Some(output_format) = ingest::export_format(to) else {
        bail!("unsupported target format: {to}");
    };

    let graph = vigraph::oxrdf::GraphName::DefaultGraph;
    let mut parser = ingest::quad_parser(input_format, None, &graph, &content)?;
    let mut quads = Vec::new();
    for quad in parser.by_ref() {
        quads.push(quad?);
    }
    let prefixes = ingest::parser_prefixes(&parser);
    let serialized = ingest::serialize_graph(&quads, output_format, &prefixes)?;

    match output {
        Some(path) => fs::write(path, serialized)
            .with_context(|| format!("unable to write {}", path.display()))?,
        None => print!("{serialized}"),
    }
    Ok(())
}
