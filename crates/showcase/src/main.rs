use spate_api::ContentId;
use spate_core::{Client, EverythingSpec, RaceConfig};
use spate_gateway::car::CarWriter;
use spate_gateway::dagpb::DagPbScanner;
use spate_gateway::Gateway;
use std::sync::Arc;
use std::time::Instant;

/// Fetch a content-addressed dag by racing a pool of http gateways.
#[derive(clap::Parser)]
struct Args {
    /// Gateway base url. Repeat to grow the pool.
    #[arg(
        long = "gateway",
        default_values_t = [
            "https://ipfs.io/".to_string(),
            "https://dweb.link/".to_string(),
            "https://cloudflare-ipfs.com/".to_string(),
        ]
    )]
    gateways: Vec<String>,

    /// How many gateways to race concurrently.
    #[arg(long, default_value_t = 4)]
    parallel: usize,

    /// Write the fetched dag to this file as a CARv1 archive.
    #[arg(long)]
    out: Option<std::path::PathBuf>,

    /// The root identity to fetch.
    cid: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    let args = <Args as clap::Parser>::parse();

    let root: ContentId =
        args.cid.parse().expect("Failed to parse the root cid");

    let pool = args
        .gateways
        .iter()
        .map(|raw| -> spate_api::DynDownloader {
            let url = raw
                .parse::<url::Url>()
                .expect("Failed to parse a gateway url");
            Gateway::new(url).expect("Failed to construct a gateway")
        })
        .collect();

    let client = Client::new(
        RaceConfig {
            max_parallel_attempts: args.parallel,
            ..Default::default()
        },
        pool,
    );

    let spec = EverythingSpec::new(Arc::new(DagPbScanner));
    let mut stream = client.download(root.clone(), spec);

    let mut writer = args.out.as_ref().map(|_| CarWriter::new(&[root]));
    let mut blocks = 0u64;
    let mut bytes = 0u64;
    let started = Instant::now();

    while let Some(item) = stream.recv().await {
        match item {
            Ok(block) => {
                blocks += 1;
                bytes += block.data().len() as u64;
                if let Some(writer) = writer.as_mut() {
                    writer.put(&block);
                }
            }
            Err(err) => {
                tracing::error!("download failed: {err}");
                eprintln!(
                    "download failed after {blocks} blocks: {err}"
                );
                std::process::exit(1);
            }
        }
    }

    let elapsed = started.elapsed();
    let mib = bytes as f64 / (1024.0 * 1024.0);
    println!(
        "fetched {blocks} blocks, {mib:.2} MiB in {elapsed:.2?} ({:.2} MiB/s)",
        mib / elapsed.as_secs_f64().max(f64::EPSILON),
    );

    if let (Some(path), Some(writer)) = (args.out, writer) {
        std::fs::write(&path, writer.finish())
            .expect("Failed to write the car file");
        println!("wrote {}", path.display());
    }
}
