use clap::{Parser, Subcommand};
use dorch_common::args::{MetricsArgs, NatsArgs, RedisArgs};
use dorch_common::streams::{DEFAULT_IMAGES_STREAM, DEFAULT_META_STREAM};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Publish one metadata job per indexed file hash
    Dispatch(DispatchArgs),

    /// Consume metadata jobs: extract, merge, post to the catalog
    MetaWorker(MetaWorkerArgs),

    /// Consume screenshot jobs: render via subprocess, post image URLs
    ImageWorker(ImageWorkerArgs),

    /// Analyze one local container file and print its metadata as JSON
    Analyze(AnalyzeArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct WadStoreArgs {
    /// Bucket holding the gzipped artifacts
    #[arg(long, env = "DORCH_WAD_BUCKET", default_value = "wadarchive2")]
    pub wad_bucket: String,

    /// S3-compatible endpoint URL for the artifact bucket
    #[arg(
        long,
        env = "DORCH_WAD_ENDPOINT",
        default_value = "https://nyc3.digitaloceanspaces.com"
    )]
    pub wad_endpoint: String,

    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    pub region: String,
}

#[derive(Parser, Debug, Clone)]
pub struct CatalogArgs {
    /// Base URL of the wadinfo catalog service
    #[arg(long, env = "WADINFO_BASE_URL", default_value = "http://localhost:8000")]
    pub wadinfo_base_url: String,

    /// Disable to run extraction without catalog writes
    #[arg(
        long,
        env = "DORCH_POST_TO_WADINFO",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub post_to_wadinfo: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct ScreenshotArgs {
    /// Renderer binary invoked per job in an isolated subprocess
    #[arg(
        long,
        env = "DORCH_RENDERER_BIN",
        default_value = "dorch-screenshot-renderer"
    )]
    pub renderer_bin: String,

    #[arg(long, env = "DORCH_SCREENSHOT_WIDTH", default_value_t = 800)]
    pub screenshot_width: u32,

    #[arg(long, env = "DORCH_SCREENSHOT_HEIGHT", default_value_t = 600)]
    pub screenshot_height: u32,

    #[arg(long, env = "DORCH_SCREENSHOT_COUNT", default_value_t = 3)]
    pub screenshot_count: u32,

    #[arg(
        long,
        env = "DORCH_PANORAMA",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    pub panorama: bool,

    /// Public bucket the renderer uploads images to
    #[arg(long, env = "DORCH_IMAGES_BUCKET", default_value = "wadimages2")]
    pub images_bucket: String,

    #[arg(
        long,
        env = "DORCH_IMAGES_ENDPOINT",
        default_value = "https://nyc3.digitaloceanspaces.com"
    )]
    pub images_endpoint: String,

    /// Wall-clock cap on one renderer subprocess, in seconds
    #[arg(long, env = "DORCH_SCREENSHOT_RENDER_TIMEOUT", default_value_t = 900.0)]
    pub render_timeout: f64,
}

#[derive(Parser, Debug, Clone)]
pub struct DispatchArgs {
    #[command(flatten)]
    pub nats: NatsArgs,

    /// Path or URL to the primary file index (JSONL)
    #[arg(long, env = "DORCH_WADS_JSON", required = true)]
    pub wads_json: String,

    /// Path or URL to the idGames cross-reference index (JSONL)
    #[arg(long, env = "DORCH_IDGAMES_JSON", required = true)]
    pub idgames_json: String,

    /// Optional path or URL to the readmes index (JSONL, lenient)
    #[arg(long, env = "DORCH_READMES_JSON")]
    pub readmes_json: Option<String>,

    #[arg(long, env = "DORCH_META_STREAM", default_value = DEFAULT_META_STREAM)]
    pub stream_name: String,

    /// Start index into the primary index
    #[arg(long, default_value_t = 0)]
    pub start: usize,

    /// Dispatch only N files (0 = all)
    #[arg(long, default_value_t = 0)]
    pub limit: usize,

    /// Sleep seconds between publishes
    #[arg(long, default_value_t = 0.0)]
    pub sleep: f64,

    /// Only dispatch SHA1s containing this substring
    #[arg(long)]
    pub smoke_test_id: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct MetaWorkerArgs {
    #[command(flatten)]
    pub nats: NatsArgs,

    #[command(flatten)]
    pub redis: RedisArgs,

    /// Enable the best-effort Redis byte cache
    #[arg(
        long,
        env = "DORCH_CACHE_ENABLED",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    pub cache_enabled: bool,

    #[command(flatten)]
    pub metrics: MetricsArgs,

    #[command(flatten)]
    pub store: WadStoreArgs,

    #[command(flatten)]
    pub catalog: CatalogArgs,

    #[command(flatten)]
    pub screenshots: ScreenshotArgs,

    /// Render screenshots after each successful metadata job
    #[arg(
        long,
        env = "DORCH_RENDER_SCREENSHOTS",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    pub render_screenshots: bool,

    #[arg(long, env = "DORCH_META_STREAM", default_value = DEFAULT_META_STREAM)]
    pub stream_name: String,

    /// Durable consumer name; one identity per queue-group
    #[arg(long, env = "DORCH_META_DURABLE", default_value = "meta-worker")]
    pub durable: String,

    /// Pull-fetch batch size
    #[arg(long, env = "DORCH_META_BATCH", default_value_t = 1)]
    pub batch: usize,

    /// Pull-fetch timeout in seconds
    #[arg(long, env = "DORCH_META_FETCH_TIMEOUT", default_value_t = 1.0)]
    pub fetch_timeout: f64,

    /// Failed jobs are dropped (ACKed) after this many deliveries
    #[arg(long, env = "DORCH_META_MAX_DELIVERIES", default_value_t = 3)]
    pub max_deliveries: i64,
}

#[derive(Parser, Debug, Clone)]
pub struct ImageWorkerArgs {
    #[command(flatten)]
    pub nats: NatsArgs,

    #[command(flatten)]
    pub metrics: MetricsArgs,

    #[command(flatten)]
    pub catalog: CatalogArgs,

    #[command(flatten)]
    pub screenshots: ScreenshotArgs,

    #[arg(long, env = "DORCH_IMAGES_STREAM", default_value = DEFAULT_IMAGES_STREAM)]
    pub stream_name: String,

    #[arg(long, env = "DORCH_IMAGES_DURABLE", default_value = "screenshot-worker")]
    pub durable: String,

    #[arg(long, env = "DORCH_IMAGES_BATCH", default_value_t = 1)]
    pub batch: usize,

    #[arg(long, env = "DORCH_IMAGES_FETCH_TIMEOUT", default_value_t = 1.0)]
    pub fetch_timeout: f64,

    /// Cap retries for renderer crashes / deterministic failures
    #[arg(long, env = "DORCH_SCREENSHOT_MAX_DELIVERIES", default_value_t = 3)]
    pub max_deliveries: i64,
}

#[derive(Parser, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Local container file (.wad, .pk3, ...)
    pub path: std::path::PathBuf,

    /// Override the extension used for format dispatch
    #[arg(long)]
    pub ext: Option<String>,

    /// Pretty-print the output JSON
    #[arg(long, default_value_t = false)]
    pub pretty: bool,
}
