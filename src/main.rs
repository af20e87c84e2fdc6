use anyhow::Result;
use capiline::{
    call::CallManagerBuilder,
    config::{Cli, Config},
    device::DeviceKind,
    utils::scramble_number,
    version,
};
use clap::Parser;
use std::{fs::File, sync::Arc};
use tokio::select;
use tracing::{info, level_filters::LevelFilter, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version_info {
        println!("{}", version::get_version_info());
        return Ok(());
    }

    let config = match cli.conf {
        Some(ref conf) => Config::load(conf)?,
        None => Config::default(),
    };

    let mut log_fmt = tracing_subscriber::fmt();
    if let Some(ref level) = config.log_level {
        if let Ok(lv) = level.as_str().parse::<LevelFilter>() {
            log_fmt = log_fmt.with_max_level(lv);
        }
    }

    let _guard = if let Some(ref log_file) = config.log_file {
        let file = File::create(log_file)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        log_fmt.with_writer(non_blocking).try_init().ok();
        Some(guard)
    } else {
        log_fmt.try_init().ok();
        None
    };

    let mut builder = CallManagerBuilder::new().with_options(config.manager_options());
    for backend in &config.backends {
        builder = builder.with_backend(backend.build()?);
    }
    let manager = Arc::new(builder.build()?);
    info!(
        "starting capiline {} on controller {} with {} backends",
        version::get_short_version(),
        config.line.controller,
        manager.registry().len()
    );

    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!("event: {}", event.summary());
        }
    });

    if let Some(ref number) = cli.dial {
        let kind = if cli.fax {
            DeviceKind::Fax
        } else {
            DeviceKind::Phone
        };
        match manager.dial(kind, number, "", false).await {
            Ok(handle) => info!("dialing {} as connection {}", scramble_number(number), handle.id()),
            Err(e) => warn!("dial {} failed: {}", scramble_number(number), e),
        }
    }

    let serving = manager.clone();
    let mut server = tokio::spawn(async move { serving.serve().await });
    select! {
        r = &mut server => r??,
        _ = tokio::signal::ctrl_c() => {
            info!("Received CTRL+C, shutting down");
            manager.stop();
            server.await??;
        }
    }
    Ok(())
}
