mod config;
mod cycle;
mod http;
mod internet;
mod metrics;
mod monitor;
mod probes;
mod state;
mod store;
mod tracker;
mod weather;

use axum::serve;
use clap::Parser;
use config::Config;
use metrics::Metrics;
use monitor::StatusMonitor;
use probes::NetworkProber;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use weather::WeatherClient;

#[derive(Parser, Debug)]
#[command(name = "homeportal")]
#[command(version)]
struct Cli {
    /// Defaults to ./private/config.yaml when present, else ./config.yaml.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    print_default_config: bool,
    /// Probe everything once, write the status file and exit.
    #[arg(long)]
    once: bool,
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let config_path = Config::resolve_path(cli.config.as_deref());
    let mut cfg = match Config::load_from_file(&config_path) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "не удалось загрузить конфигурацию");
            std::process::exit(1);
        }
    };
    if let Some(listen) = cli.listen {
        cfg.listen = listen;
    }
    let cfg = Arc::new(cfg);

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "не удалось инициализировать метрики");
            std::process::exit(1);
        }
    };
    let prober = Arc::new(NetworkProber::new(&cfg.probes));
    let monitor = Arc::new(StatusMonitor::new(cfg.clone(), prober, metrics.clone()));

    if cli.once {
        // Down services are data, not a failure of the run.
        if let Err(err) = monitor.force_check().await {
            error!(error = %err, "не удалось сохранить снимок статусов");
            std::process::exit(1);
        }
        return;
    }

    let addr: SocketAddr = match cfg.listen.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, listen = %cfg.listen, "некорректный адрес listen");
            std::process::exit(1);
        }
    };
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(err) => {
            error!(error = %err, "не удалось запустить HTTP-сервер");
            std::process::exit(1);
        }
    };

    info!(
        listen = %addr,
        config = %config_path.display(),
        services = cfg.services.len(),
        internet_services = cfg.internet_services.len(),
        internet_targets = cfg.internet_targets.len(),
        "запуск homeportal"
    );

    let app = http::build_router(http::HttpAppState {
        cfg: cfg.clone(),
        metrics,
        monitor,
        weather: WeatherClient::new(),
    });

    let server = serve(listener, app).with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "не удалось подписаться на Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("получен Ctrl+C, останавливаемся");
    });

    if let Err(err) = server.await {
        error!(error = %err, "ошибка HTTP-сервера");
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
