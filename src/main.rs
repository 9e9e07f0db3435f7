use std::env;

use anyhow::{Context, Result};
use crossbeam_channel::unbounded;
use log::{LevelFilter, info, warn};
use simplelog::{Config as LogConfig, SimpleLogger};
use tokio::io::{AsyncBufReadExt, BufReader};

use q_chase::config::Config;
use q_chase::console::Route;
use q_chase::dmx_output::{DmxTransport, MemoryTransport, OpenDmxTransport};
use q_chase::osc::OscListener;
use q_chase::show::Show;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = env::args()
        .nth(1)
        .context("Provide config path as first arg.")?;
    let cfg = Config::load(&config_path)?;
    let log_level = if cfg.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    SimpleLogger::init(log_level, LogConfig::default())?;

    let transport: Box<dyn DmxTransport> = match &cfg.dmx_port {
        Some(port) => Box::new(OpenDmxTransport::open(port)?),
        None => {
            warn!("No dmx_port configured, running without DMX output");
            Box::new(MemoryTransport::new())
        }
    };

    let show = Show::start(&cfg, transport)?;
    let (routes, routes_rx) = unbounded();

    let _osc = match &cfg.osc_listen {
        Some(address) => Some(OscListener::bind(address, routes.clone()).await?),
        None => None,
    };

    let runner = tokio::task::spawn_blocking(move || show.run(routes_rx));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match Route::parse(&line) {
            Ok(route) => {
                let quit = route == Route::Quit;
                if routes.send(route).is_err() || quit {
                    break;
                }
            }
            Err(e) => warn!("{e}"),
        }
    }
    // End of input stops the show as well.
    let _ = routes.send(Route::Quit);
    runner.await?;
    info!("Bye");
    Ok(())
}
