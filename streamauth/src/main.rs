mod mock_service;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use streamauth_core::{
    logging, settings::ResolvedAuthConfig, Config, Connection, ProtocolTag, ScopeAuthRegistry,
};

#[derive(Parser, Debug)]
#[command(name = "streamauth")]
#[command(about = "Connection and stream authorization for media servers", long_about = None)]
struct Args {
    /// Configuration file (YAML)
    #[arg(short, long, env = "STREAMAUTH_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the configuration, then print what each application resolves to
    Check,

    /// Simulate a client connecting to an application
    Authenticate {
        /// Application name
        #[arg(long)]
        app: String,

        /// Protocol tag as the host would report it
        #[arg(long, default_value = "rtmp")]
        protocol: String,

        /// Connect parameter as key=value (repeatable)
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        /// Stream to publish after connecting
        #[arg(long)]
        publish: Option<String>,

        /// Stream to play after connecting
        #[arg(long)]
        play: Option<String>,

        /// Positional connect arguments
        args: Vec<String>,
    },

    /// Run a mock remote validation service
    MockService {
        /// Listen address
        #[arg(long, env = "MOCK_ADDR", default_value = "127.0.0.1:3000")]
        addr: String,

        /// Base URL used to build signed URLs for publishers
        #[arg(long)]
        signed_url_base: Option<String>,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("invalid key=value: no `=` found in `{s}`"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    logging::init_logging(&config.logging)?;

    match args.command {
        Command::Check => check(&config).await,
        Command::Authenticate {
            app,
            protocol,
            params,
            publish,
            play,
            args,
        } => {
            let params = params.into_iter().collect();
            authenticate(&config, &app, &protocol, params, publish, play, &args).await
        }
        Command::MockService {
            addr,
            signed_url_base,
        } => mock_service(&addr, signed_url_base).await,
    }
}

fn print_resolved(name: &str, resolved: &ResolvedAuthConfig, degraded: bool) {
    let p = &resolved.protocols;
    println!("{name}:");
    println!("  active: {}", resolved.active);
    println!(
        "  protocols: rtmp={} rtsp={} rtc={} srt={} mpegts={} http={} ws={}",
        p.rtmp, p.rtsp, p.rtc, p.srt, p.mpegts, p.http, p.ws
    );
    println!("  rtmp_query_params: {}", resolved.rtmp_query_params);
    println!("  rtmp_agents: {:?}", resolved.rtmp_agents);
    println!("  validator: {}", resolved.validator.kind());
    if degraded {
        println!("  status: DEGRADED (validator failed to initialize)");
    }
}

async fn check(config: &Config) -> Result<()> {
    let registry = ScopeAuthRegistry::from_config(config);

    let defaults = registry.settings().resolve_defaults();
    print_resolved("(defaults)", &defaults, false);

    let mut apps: Vec<&String> = config.auth.applications.keys().collect();
    apps.sort();
    let mut degraded = 0;
    for app in apps {
        registry.on_scope_created(app).await;
        if let Some(entry) = registry.entry(app) {
            let is_degraded = entry.dispatch.is_degraded();
            if is_degraded {
                degraded += 1;
            }
            print_resolved(app, &entry.config, is_degraded);
        }
    }

    if degraded > 0 {
        return Err(anyhow::anyhow!("{degraded} application(s) failed to initialize"));
    }
    info!("Configuration OK");
    Ok(())
}

async fn authenticate(
    config: &Config,
    app: &str,
    protocol: &str,
    params: HashMap<String, String>,
    publish: Option<String>,
    play: Option<String>,
    args: &[String],
) -> Result<()> {
    let registry = ScopeAuthRegistry::from_config(config);
    if !registry.on_scope_created(app).await {
        warn!("No auth attached to application '{app}', every connection is accepted");
    }

    let conn = Arc::new(
        Connection::new(ProtocolTag::from(protocol), format!("/{app}")).with_params(params),
    );

    let connected = registry.on_connect(app, &conn, args).await;
    match &connected {
        Ok(()) => println!("connect: accepted"),
        Err(e) => println!("connect: rejected ({e})"),
    }

    if connected.is_ok() {
        let outcome =
            stream_actions(&registry, app, &conn, publish.as_deref(), play.as_deref()).await;
        for (action, stream, allowed) in [
            ("publish", publish.as_deref(), outcome.publish),
            ("play", play.as_deref(), outcome.play),
        ] {
            if let (Some(stream), Some(allowed)) = (stream, allowed) {
                println!("{action} {stream}: {}", if allowed { "allowed" } else { "denied" });
            }
        }
        if outcome.closed {
            println!("connection: closed by deferred validation");
        }
        println!("context: {:?}", conn.context());
        registry.on_disconnect(app, &conn).await;
    }

    connected.map_err(Into::into)
}

/// Result of the simulated publish/play requests.
#[derive(Debug, Default, PartialEq, Eq)]
struct StreamActions {
    publish: Option<bool>,
    play: Option<bool>,
    /// A deferred (lazy) validation closed the connection.
    closed: bool,
}

async fn stream_actions(
    registry: &ScopeAuthRegistry,
    app: &str,
    conn: &Arc<Connection>,
    publish: Option<&str>,
    play: Option<&str>,
) -> StreamActions {
    let mut outcome = StreamActions::default();
    if let Some(stream) = publish {
        outcome.publish = Some(registry.on_publish(app, Some(conn), stream).await);
    }
    if let Some(stream) = play {
        outcome.play = Some(registry.on_play(app, Some(conn), stream).await);
    }

    // Lazy validations report through the connection, not the return value.
    registry.drain_pending().await;
    outcome.closed = !conn.is_connected();
    outcome
}

async fn mock_service(addr: &str, signed_url_base: Option<String>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown_token = CancellationToken::new();

    let token = shutdown_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        token.cancel();
    });

    mock_service::serve(
        listener,
        mock_service::MockState { signed_url_base },
        shutdown_token,
    )
    .await
}
