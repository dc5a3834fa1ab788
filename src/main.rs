use alert_publisher::kafka::RdKafkaTransport;
use alert_publisher::{publish_once, BatteryAlert, Config, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "alert-publisher")]
#[command(about = "Publish a device battery alert to Kafka over mutual TLS", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,

    #[arg(long, default_value = "securityCam-front-1", help = "Device reporting the alert")]
    device_id: String,

    #[arg(long, default_value_t = 14, help = "Remaining battery charge, 0-100")]
    battery_percent: u8,

    #[arg(long, help = "Topic to publish to, overrides the configuration")]
    topic: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting alert-publisher");
    info!("Loading configuration from {:?}", args.config);

    let config = match Config::from_file(&args.config) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    let topic = args.topic.unwrap_or_else(|| config.producer.topic.clone());
    let settings = config.producer_settings();

    info!(
        broker_host = %config.broker.host,
        broker_port = %config.broker.port,
        client_id = %config.broker.client_id,
        topic = %topic,
        ack_level = %settings.ack_level,
        key_strategy = ?settings.key_strategy,
        "Configuration summary"
    );

    let endpoint = config.endpoint()?;
    let transport = Arc::new(RdKafkaTransport::new(settings.ack_level, settings.request_timeout));
    let alert = BatteryAlert::now(args.device_id, args.battery_percent);

    match publish_once(transport, &endpoint, &settings, &topic, &alert).await {
        Ok(result) => {
            info!(
                partition = result.partition,
                offset = ?result.offset,
                "Alert published"
            );
            Ok(())
        }
        Err(e) => {
            error!("Failed to publish alert: {}", e);
            Err(e)
        }
    }
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("alert_publisher=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("alert_publisher=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
