//! `motorelay` - CLI for the live location relay
//!
//! Runs the relay, tracks a subject from a replay file, watches live
//! messages and reports on recorded routes.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use motorelay::cli::{
    Cli, Command, ConfigCommand, RouteCommand, ServeCommand, StatusCommand, TrackCommand,
    WatchCommand,
};
use motorelay::client::ConnectionState;
use motorelay::{
    init_logging, Config, Relay, RelayMessage, ReplaySource, RouteReconstructor, SampleStore,
    Storage, StreamClient, SubjectId, Tracker, TrackerEvent,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbosity());

    if let Command::Config(config_cmd) = cli.command {
        return handle_config(cli.config, config_cmd);
    }

    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;

    match cli.command {
        Command::Serve(cmd) => handle_serve(&config, &cmd).await,
        Command::Track(cmd) => handle_track(&config, cmd).await,
        Command::Watch(cmd) => handle_watch(&config, cmd).await,
        Command::Route(cmd) => handle_route(&config, &cmd),
        Command::Status(cmd) => handle_status(&config, &cmd),
        Command::Config(_) => Ok(()),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

async fn handle_serve(config: &Config, cmd: &ServeCommand) -> anyhow::Result<()> {
    let mut relay_config = config.relay.clone();
    if let Some(bind) = cmd.bind {
        relay_config.bind = bind;
    }

    let relay = Relay::bind(&relay_config)
        .await
        .with_context(|| format!("binding relay to {}", relay_config.bind))?;
    println!("Relay listening on ws://{}", relay.local_addr()?);

    relay.run(shutdown_signal()).await?;
    Ok(())
}

async fn handle_track(config: &Config, cmd: TrackCommand) -> anyhow::Result<()> {
    let store = Arc::new(
        Storage::open(config.database_path())
            .with_context(|| format!("opening {}", config.database_path().display()))?,
    );

    let mut client_config = config.stream_client();
    if let Some(url) = cmd.url {
        client_config.url = url;
    }
    let client = Arc::new(StreamClient::new(client_config));
    if !cmd.offline {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            if let Err(e) = client.connect().await {
                warn!(error = %e, "Relay unavailable, recording locally only");
            }
        });
    }

    let interval = cmd
        .interval
        .map_or_else(|| config.sample_interval(), Duration::from_millis);
    let source = Box::new(ReplaySource::from_file(&cmd.replay, interval));
    let subject = SubjectId::new(cmd.subject);

    let mut tracker = Tracker::new(
        Arc::clone(&client),
        Arc::clone(&store) as Arc<dyn SampleStore>,
        config.tracker.clone(),
    );
    let mut events = tracker
        .start(subject.clone(), source)
        .await
        .with_context(|| format!("starting to track {subject}"))?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let event = tokio::select! {
            () = &mut shutdown => {
                tracker.stop()?;
                break;
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            TrackerEvent::Sample {
                sample,
                totals,
                relayed,
            } => {
                let speed = totals
                    .last_speed_kmh
                    .map_or_else(|| "-".to_string(), |s| format!("{s:.1} km/h"));
                println!(
                    "#{:<5} {:>10.5} {:>11.5}  {:>12}  {:>9.3} km{}",
                    totals.sample_count,
                    sample.latitude,
                    sample.longitude,
                    speed,
                    totals.distance_km,
                    if relayed { "" } else { "  (not relayed)" }
                );
            }
            TrackerEvent::PersistFailed {
                subject,
                sample,
                error,
            } => {
                let retries = config.tracker.persist_retries;
                persist_with_retry(store.as_ref(), &subject, &sample, retries, &error).await?;
            }
            TrackerEvent::ConnectivityLost { url, attempts } => {
                warn!(url = %url, attempts, "Lost the relay; samples are still being recorded");
            }
            TrackerEvent::SourceFailed(e) => {
                client.disconnect();
                return Err(e).context("position source failed");
            }
            TrackerEvent::Finished => break,
        }
    }

    client.disconnect();
    let totals = tracker.totals();
    println!();
    println!("Subject:   {subject}");
    println!("Samples:   {}", totals.sample_count);
    println!("Distance:  {:.3} km", totals.distance_km);
    Ok(())
}

async fn persist_with_retry(
    store: &dyn SampleStore,
    subject: &SubjectId,
    sample: &motorelay::PositionSample,
    retries: u32,
    first_error: &motorelay::Error,
) -> anyhow::Result<()> {
    warn!(subject = %subject, error = %first_error, "Retrying sample write");
    for attempt in 1..=retries {
        tokio::time::sleep(Duration::from_millis(100) * attempt).await;
        match store.append(subject, sample) {
            Ok(_) => return Ok(()),
            Err(e) => warn!(subject = %subject, attempt, error = %e, "Sample write failed again"),
        }
    }
    bail!(
        "could not persist sample at {} for {subject} after {retries} retries",
        sample.timestamp_millis
    )
}

async fn handle_watch(config: &Config, cmd: WatchCommand) -> anyhow::Result<()> {
    let mut client_config = config.stream_client();
    if let Some(url) = cmd.url {
        client_config.url = url;
    }

    let filter = cmd.subject.map(SubjectId::new);
    let json = cmd.json;
    let mut client = StreamClient::new(client_config);
    client.on_message(move |message| {
        if filter.is_some() && message.subject() != filter.as_ref() {
            return;
        }
        print_message(&message, json);
    });
    client.on_error(|e| warn!(error = %e, "Stream closed"));

    client.connect().await.context("connecting to relay")?;
    info!(url = client.url(), "Watching relay");

    let mut session = client.session();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    tokio::select! {
        () = &mut shutdown => {}
        closed = wait_closed(&mut session) => {
            if closed {
                bail!("lost connection to {}", client.url());
            }
        }
    }

    client.disconnect();
    Ok(())
}

async fn wait_closed(session: &mut watch::Receiver<motorelay::Session>) -> bool {
    session
        .wait_for(|s| s.state == ConnectionState::Closed)
        .await
        .is_ok()
}

fn print_message(message: &RelayMessage, json: bool) {
    if json {
        match message.encode() {
            Ok(text) => println!("{text}"),
            Err(e) => warn!(error = %e, "Failed to encode message"),
        }
        return;
    }

    let subject = message
        .subject()
        .map_or_else(|| "-".to_string(), ToString::to_string);
    match message {
        RelayMessage::Location { data, .. } => {
            let at = data
                .recorded_at()
                .map_or_else(|| data.timestamp_millis.to_string(), |t| t.to_rfc3339());
            let speed = data
                .speed_mps
                .map_or_else(String::new, |s| format!("  {:.1} km/h", s * 3.6));
            println!(
                "[{at}] {subject:<12} {:>10.5} {:>11.5}{speed}",
                data.latitude, data.longitude
            );
        }
        RelayMessage::Status { data, .. } => println!("[status] {subject:<12} {data}"),
        RelayMessage::Error { data, .. } => println!("[error]  {subject:<12} {data}"),
    }
}

fn handle_route(config: &Config, cmd: &RouteCommand) -> anyhow::Result<()> {
    let store = Arc::new(Storage::open(config.database_path())?);
    let subject = SubjectId::new(cmd.subject.clone());
    let route = RouteReconstructor::new(store).reconstruct(&subject, config.viewport())?;

    if cmd.json {
        let output = if cmd.samples {
            serde_json::to_string_pretty(&route)?
        } else {
            serde_json::to_string_pretty(&route.summary)?
        };
        println!("{output}");
        return Ok(());
    }

    let summary = &route.summary;
    if summary.sample_count == 0 {
        println!("No samples recorded for {subject}.");
        return Ok(());
    }

    println!("Route for {subject}");
    println!("--------------------");
    println!("Samples:        {}", summary.sample_count);
    println!("Distance:       {:.3} km", summary.total_distance_km);
    println!("Duration:       {}", format_duration(summary.duration_millis));
    if let Some(avg) = summary.average_speed_kmh {
        println!("Average speed:  {avg:.1} km/h");
    }
    if let Some(max) = summary.max_speed_kmh {
        println!("Max speed:      {max:.1} km/h");
    }
    if let Some(center) = summary.center {
        println!(
            "Center:         {:.5}, {:.5}",
            center.latitude, center.longitude
        );
    }
    println!("Suggested zoom: {}", summary.suggested_zoom);

    if cmd.samples {
        println!();
        for sample in &route.samples {
            println!(
                "{:>15} {:>10.5} {:>11.5}",
                sample.timestamp_millis, sample.latitude, sample.longitude
            );
        }
    }
    Ok(())
}

fn format_duration(millis: i64) -> String {
    let seconds = millis / 1000;
    format!(
        "{}h {:02}m {:02}s",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

fn handle_status(config: &Config, cmd: &StatusCommand) -> anyhow::Result<()> {
    let storage = Storage::open(config.database_path())?;
    let stats = storage.stats()?;
    let subjects = storage.subjects()?;

    if cmd.json {
        let status = serde_json::json!({
            "database_path": storage.path(),
            "db_size_bytes": stats.db_size_bytes,
            "total_samples": stats.total_samples,
            "subjects": subjects,
            "oldest_sample": stats.oldest_sample,
            "newest_sample": stats.newest_sample,
            "relay_url": config.client.url,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("motorelay status");
    println!("----------------");
    println!("Database:      {}", storage.path().display());
    println!("Size:          {} bytes", stats.db_size_bytes);
    println!("Samples:       {}", stats.total_samples);
    println!("Subjects:      {}", stats.subject_count);
    if let (Some(oldest), Some(newest)) = (stats.oldest_sample, stats.newest_sample) {
        println!("Oldest sample: {}", oldest.to_rfc3339());
        println!("Newest sample: {}", newest.to_rfc3339());
    }
    for subject in &subjects {
        println!("  {subject:<20} {} samples", storage.count_for(subject)?);
    }
    println!("Relay URL:     {}", config.client.url);
    Ok(())
}

fn handle_config(path: Option<std::path::PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::load_from(path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Relay]");
                println!("  Bind:               {}", config.relay.bind);
                println!("  Peer buffer:        {}", config.relay.peer_buffer);
                println!("  Max message bytes:  {}", config.relay.max_message_bytes);
                println!();
                println!("[Client]");
                println!("  URL:                {}", config.client.url);
                println!("  Base delay (ms):    {}", config.client.base_delay_ms);
                println!("  Max attempts:       {}", config.client.max_attempts);
                println!();
                println!("[Tracker]");
                println!("  Interval (ms):      {}", config.tracker.sample_interval_ms);
                println!("  Persist retries:    {}", config.tracker.persist_retries);
                println!();
                println!("[Route]");
                println!(
                    "  Viewport:           {}x{}",
                    config.route.viewport_width, config.route.viewport_height
                );
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
            }
        }
        ConfigCommand::Path => {
            println!(
                "{}",
                path.unwrap_or_else(Config::default_config_path).display()
            );
        }
        ConfigCommand::Validate { file } => {
            let path = file.or(path).unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}
