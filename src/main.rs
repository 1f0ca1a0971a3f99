use actix_web::{middleware, web, App, HttpServer};
use anyhow::Result;
use fundus_seg::config::Settings;
use fundus_seg::overlay::Overlay;
use fundus_seg::segment::TorchSegmenter;
use fundus_seg::server::{self, AppState};
use fundus_seg::util::init_tracing;
use std::time::Duration;
use std::{env, process};
use tracing::{error, info};

const USAGE: &str = "usage: ./fundus-seg [config file]";

fn get_args() -> Option<String> {
    let args: Vec<String> = env::args().collect();
    if args.len() > 2 {
        println!("{USAGE}");
        process::exit(1);
    }
    args.get(1).cloned()
}

#[actix_web::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{e:#}");
        eprintln!("fundus-seg: {e:#}");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config_file = get_args();
    let settings = Settings::load(config_file.as_deref())?;
    init_tracing(&settings);

    // Load the model once; every worker shares it
    let state = web::Data::new(AppState {
        segmenter: Box::new(TorchSegmenter::new(&settings.model)?),
        overlay: Overlay::new(settings.overlay.alpha)?,
        jpeg_quality: settings.overlay.jpeg_quality,
        max_upload_bytes: settings.server.max_upload_bytes,
        http: reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.server.fetch_timeout_secs))
            .build()?,
    });

    let addr = settings.bind_addr();
    info!("listening on {addr}");

    // Start the HTTP server
    let origins = settings.server.cors_origins.clone();
    let mut http = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(server::cors(&origins))
            .wrap(middleware::Logger::default())
            .configure(server::configure)
    })
    .bind(&addr)?;
    if let Some(workers) = settings.server.workers {
        http = http.workers(workers);
    }

    http.run().await?;
    Ok(())
}
