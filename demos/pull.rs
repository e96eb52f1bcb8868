use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use oci_pull::{
    Digest, EventHandler, FsSignatureStore, FsStore, Platforms, PolicyContext, PullError,
    PullState, Puller, Reference, RegistryClient,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// CPU architecture to download.
    #[arg(short, long)]
    arch: Option<String>,

    /// Operating system to download.
    #[arg(short, long)]
    os: Option<String>,

    /// Platform variant (`self-contained` or `shared-base`).
    #[arg(short, long)]
    platform: Option<String>,

    /// Trust policy. If missing, the default policy is used when it exists.
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Directory to store signatures.
    #[arg(long, default_value = FsSignatureStore::DEFAULT_ROOT)]
    signatures: PathBuf,

    /// Maximum number of concurrent layer downloads.
    #[arg(short = 'j', long, default_value_t = 8)]
    concurrency: usize,

    /// Image reference.
    image: String,

    /// Directory of the layer store.
    store: PathBuf,
}

struct Logger;

impl EventHandler for Logger {
    fn registry_request(&self, url: &str) {
        println!("GET {url}");
    }

    fn registry_auth(&self, url: &str) {
        println!("AUTH {url}");
    }

    fn state_changed(&self, state: &PullState) {
        println!("[{state}]");
    }

    fn layer_reused(&self, digest: &Digest) {
        println!("EXISTS {digest}");
    }

    fn layer_committed(&self, digest: &Digest) {
        println!("STORED {digest}");
    }

    fn signatures_failed(&self, error: &PullError) {
        println!("SIGNATURES {error}");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let reference = Reference::try_from(args.image.as_str())?;

    let mut registry = RegistryClient::new(&reference, &Logger);
    if let Some(arch) = &args.arch {
        registry = registry.architecture(arch);
    }

    if let Some(os) = &args.os {
        registry = registry.os(os);
    }

    let policy = match &args.policy {
        Some(path) => Some(PolicyContext::from_file(path)?),
        None => PolicyContext::default_policy()?,
    };

    let signatures = Arc::new(FsSignatureStore::new(&args.signatures));
    let mut platforms = Platforms::with_defaults(policy, signatures);
    if let Some(name) = &args.platform {
        platforms = platforms.select(name)?;
    }

    let store = FsStore::new(&args.store)?;

    let pulled = Puller::new(&registry, &store, &platforms)?
        .event_handler(&Logger)
        .concurrency(args.concurrency)
        .pull(&reference)?;

    println!("{} {}", pulled.image_id, pulled.reference);

    Ok(())
}
