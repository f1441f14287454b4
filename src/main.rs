//! treasurehunt - Client for the treasurehunt manager
//!
//! Places treasures on the 60x120 map, fetches them back in a resumed
//! session and verifies the rendered map.

mod config;
mod map;
mod network;
mod protocol;
mod state;

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use map::{check_snapshot_len, Coordinate, MapSnapshot};
use network::{
    Client, Connection, ManagerStream, NetworkConfig, SessionCredentials, Status, Transport,
};
use state::{CredentialStore, SavedSession};

/// treasurehunt - place, fetch and survey treasures
#[derive(Parser)]
#[command(name = "treasurehunt")]
#[command(version = "0.1.0")]
#[command(about = "Client for the treasurehunt manager", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Spawn this manager executable instead of connecting over TCP
    #[arg(long, global = true)]
    exec: Option<PathBuf>,

    /// Manager host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Manager port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store data at a coordinate in a fresh session
    Place {
        /// Coordinate as row,col
        #[arg(long)]
        coords: Coordinate,

        /// Data to store
        #[arg(short, long)]
        data: String,

        /// Keep the session and save its credentials under this tick
        #[arg(short, long)]
        tick: Option<u64>,
    },

    /// Resume a session and read back a treasure
    Fetch {
        /// Tick the session was saved under
        #[arg(
            short,
            long,
            conflicts_with_all = ["public", "private", "coords"],
            required_unless_present_all = ["public", "private", "coords"]
        )]
        tick: Option<u64>,

        /// Public session id
        #[arg(long, requires_all = ["private", "coords"])]
        public: Option<String>,

        /// Private session id
        #[arg(long, requires_all = ["public", "coords"])]
        private: Option<String>,

        /// Coordinate as row,col
        #[arg(long, requires_all = ["public", "private"])]
        coords: Option<Coordinate>,

        /// Number of bytes to read
        #[arg(short, long)]
        len: usize,
    },

    /// Place a treasure and verify it is the only mark on the map
    Survey {
        /// Coordinate as row,col
        #[arg(long)]
        coords: Coordinate,

        /// Data to store
        #[arg(short, long)]
        data: String,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Write the configuration to this path instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show client information
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Some(exec) = cli.exec {
        config.process.executable = Some(exec);
    }
    if let Some(host) = cli.host {
        config.connection.host = host;
    }
    if let Some(port) = cli.port {
        config.connection.port = port;
    }

    match cli.command {
        Commands::Place { coords, data, tick } => {
            run_place(&config, coords, data.as_bytes(), tick).await?;
        }
        Commands::Fetch {
            tick,
            public,
            private,
            coords,
            len,
        } => {
            let saved = match (tick, public, private, coords) {
                (Some(tick), ..) => credential_store(&config)?
                    .load(tick)?
                    .with_context(|| format!("No session saved for tick {}", tick))?,
                (None, Some(public_id), Some(private_id), Some(coords)) => SavedSession {
                    public_id,
                    private_id,
                    coords,
                },
                _ => anyhow::bail!("Specify --tick or --public, --private and --coords"),
            };
            let data = run_fetch(&config, &saved, len).await?;
            std::io::stdout().write_all(&data)?;
            println!();

            // The session is destroyed now, so the saved ids are spent
            if let Some(tick) = tick {
                credential_store(&config)?.remove(tick)?;
            }
        }
        Commands::Survey { coords, data } => {
            run_survey(&config, coords, data.as_bytes()).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else if let Some(path) = output {
                config.save(&path)?;
                println!("Configuration written to: {}", path.display());
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Info => {
            print_info(&config);
        }
    }

    Ok(())
}

fn credential_store(config: &Config) -> anyhow::Result<CredentialStore> {
    match &config.state.directory {
        Some(dir) => Ok(CredentialStore::new(dir)),
        None => Ok(CredentialStore::open_default()?),
    }
}

/// Fail with the operation name unless the manager reported success
fn ensure(operation: &str, status: Status) -> anyhow::Result<()> {
    status
        .into_result()
        .with_context(|| format!("{} failed", operation))
}

async fn connect(network: &NetworkConfig) -> anyhow::Result<Client<ManagerStream>> {
    let stream = ManagerStream::open(network)
        .await
        .context("Failed to reach the manager")?;
    let connection = Connection::new(stream).with_io_timeout(network.io_timeout());
    Ok(Client::new(connection))
}

async fn disconnect(client: Client<ManagerStream>) -> anyhow::Result<()> {
    if client.is_active() {
        tracing::debug!("Leaving the session open on the manager");
    }

    let connection = client.connection();
    let stats = connection.stats();
    tracing::debug!(
        "Closing {:?} connection: sent {} frames ({} bytes), received {} frames ({} bytes)",
        connection.state(),
        stats.frames_sent,
        stats.bytes_sent,
        stats.frames_received,
        stats.bytes_received
    );

    client.into_connection().into_inner().teardown().await?;
    Ok(())
}

/// Run `place` and persist the session when a tick is given
async fn run_place(
    config: &Config,
    coords: Coordinate,
    data: &[u8],
    tick: Option<u64>,
) -> anyhow::Result<()> {
    let store = tick.map(|_| credential_store(config)).transpose()?;

    let mut client = connect(&config.to_network_config()).await?;
    let result = place_treasure(&mut client, coords, data, tick.is_some()).await;
    let teardown = disconnect(client).await;
    let credentials = result?;
    teardown?;

    println!(
        "Placed {} bytes at {} in session {}",
        data.len(),
        coords,
        String::from_utf8_lossy(credentials.public_id())
    );

    if let (Some(tick), Some(store)) = (tick, store) {
        store.save(tick, &SavedSession::new(&credentials, coords)?)?;
        println!("Session saved for tick {} in {}", tick, store.root().display());
    }

    Ok(())
}

async fn run_fetch(config: &Config, saved: &SavedSession, len: usize) -> anyhow::Result<Bytes> {
    let credentials = saved.credentials()?;

    let mut client = connect(&config.to_network_config()).await?;
    let result = fetch_treasure(&mut client, &credentials, saved.coords, len).await;
    let teardown = disconnect(client).await;
    let data = result?;
    teardown?;

    Ok(data)
}

async fn run_survey(config: &Config, coords: Coordinate, data: &[u8]) -> anyhow::Result<()> {
    let mut client = connect(&config.to_network_config()).await?;
    let result = survey_map(&mut client, coords, data).await;
    let teardown = disconnect(client).await;
    let mark = result?;
    teardown?;

    println!("Map verified: {:?} is the only mark, at {}", mark, coords);
    Ok(())
}

/// Create a session and store `data` under `coords`.
///
/// With `keep` the session is left alive so it can be resumed later;
/// otherwise it is destroyed.
async fn place_treasure<S: Transport>(
    client: &mut Client<S>,
    coords: Coordinate,
    data: &[u8],
    keep: bool,
) -> anyhow::Result<SessionCredentials> {
    let (status, credentials) = client.create_session().await?;
    ensure("create_session", status)?;
    let credentials = credentials.context("Manager returned no credentials")?;

    ensure("open", client.open(&coords.to_name()).await?)?;
    ensure("store", client.store(data).await?)?;
    ensure("close", client.close().await?)?;

    if !keep {
        ensure("destroy_session", client.destroy_session().await?)?;
    }

    Ok(credentials)
}

async fn fetch_treasure<S: Transport>(
    client: &mut Client<S>,
    credentials: &SessionCredentials,
    coords: Coordinate,
    len: usize,
) -> anyhow::Result<Bytes> {
    ensure("resume_session", client.resume_session(credentials).await?)?;
    ensure("open", client.open(&coords.to_name()).await?)?;

    let (status, data) = client.retrieve(len).await?;
    ensure("retrieve", status)?;

    ensure("close", client.close().await?)?;
    ensure("destroy_session", client.destroy_session().await?)?;

    Ok(data)
}

/// Store at `coords`, render the map and check that the only mark sits there
async fn survey_map<S: Transport>(
    client: &mut Client<S>,
    coords: Coordinate,
    data: &[u8],
) -> anyhow::Result<char> {
    let (status, _) = client.create_session().await?;
    ensure("create_session", status)?;

    ensure("open", client.open(&coords.to_name()).await?)?;
    ensure("store", client.store(data).await?)?;
    ensure("close", client.close().await?)?;

    ensure("open", client.open(protocol::AGGREGATE_NAME).await?)?;
    ensure("map", client.map().await?)?;

    let len = client.check().await?;
    check_snapshot_len(len)?;
    tracing::debug!("Map is {} bytes", len);

    let (status, view) = client.retrieve(len as usize).await?;
    ensure("retrieve", status)?;
    let mark = MapSnapshot::parse(&view)?.verify_single_mark(coords)?;

    ensure("close", client.close().await?)?;
    ensure("destroy_session", client.destroy_session().await?)?;

    Ok(mark)
}

/// Print client information
fn print_info(config: &Config) {
    println!("treasurehunt client {}", env!("CARGO_PKG_VERSION"));
    println!("=========================\n");

    match &config.process.executable {
        Some(exec) => println!("Manager: spawn {}", exec.display()),
        None => println!(
            "Manager: {}:{}",
            config.connection.host, config.connection.port
        ),
    }

    match &config.state.directory {
        Some(dir) => println!("State directory: {}", dir.display()),
        None => match dirs::data_dir() {
            Some(dir) => println!("State directory: {}", dir.join("treasurehunt").display()),
            None => println!("State directory: unavailable"),
        },
    }

    println!("\nHeader size: {} bytes", protocol::HEADER_SIZE);
    println!("Max frame size: {} bytes", protocol::MAX_FRAME_SIZE);
    println!("Map: {}x{}", map::MAP_HEIGHT, map::MAP_WIDTH);
    println!("Default Port: {}", protocol::DEFAULT_PORT);
}

#[cfg(test)]
mod tests {
    use super::*;
    use network::fake_manager::FakeManager;
    use network::ClientError;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["treasurehunt", "info"]);
        assert!(cli.is_ok());

        let cli = Cli::try_parse_from([
            "treasurehunt",
            "--exec",
            "./treasurehunt",
            "place",
            "--coords",
            "12,34",
            "--data",
            "hello",
        ])
        .unwrap();
        assert_eq!(cli.exec, Some(PathBuf::from("./treasurehunt")));
        match cli.command {
            Commands::Place { coords, tick, .. } => {
                assert_eq!(coords, Coordinate::new(12, 34).unwrap());
                assert_eq!(tick, None);
            }
            _ => panic!("expected place"),
        }
    }

    #[test]
    fn test_cli_rejects_bad_coords() {
        let cli = Cli::try_parse_from([
            "treasurehunt",
            "survey",
            "--coords",
            "60,0",
            "--data",
            "x",
        ]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_cli_fetch_sources() {
        assert!(Cli::try_parse_from(["treasurehunt", "fetch", "--tick", "3", "--len", "5"]).is_ok());
        assert!(Cli::try_parse_from(["treasurehunt", "fetch", "--len", "5"]).is_err());
        assert!(Cli::try_parse_from([
            "treasurehunt",
            "fetch",
            "--public",
            "p",
            "--len",
            "5"
        ])
        .is_err());
        assert!(Cli::try_parse_from([
            "treasurehunt",
            "fetch",
            "--tick",
            "3",
            "--public",
            "p",
            "--private",
            "s",
            "--coords",
            "1,1",
            "--len",
            "5"
        ])
        .is_err());
    }

    #[tokio::test]
    async fn test_place_then_fetch() {
        let manager = FakeManager::new();
        let coords = Coordinate::new(12, 34).unwrap();

        let mut client = Client::new(Connection::new(manager.connect()));
        let credentials = place_treasure(&mut client, coords, b"FLAG{abc}", true)
            .await
            .unwrap();
        assert!(client.is_active());
        drop(client);

        let mut client = Client::new(Connection::new(manager.connect()));
        let data = fetch_treasure(&mut client, &credentials, coords, 9)
            .await
            .unwrap();
        assert_eq!(data.as_ref(), b"FLAG{abc}");
        assert!(!client.is_active());
    }

    #[tokio::test]
    async fn test_fetch_after_destroy_fails() {
        let manager = FakeManager::new();
        let coords = Coordinate::new(1, 2).unwrap();

        let mut client = Client::new(Connection::new(manager.connect()));
        let credentials = place_treasure(&mut client, coords, b"gone", false)
            .await
            .unwrap();

        let mut client = Client::new(Connection::new(manager.connect()));
        let err = fetch_treasure(&mut client, &credentials, coords, 4)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("resume_session"));
    }

    #[tokio::test]
    async fn test_survey() {
        let manager = FakeManager::new();
        let coords = Coordinate::new(30, 7).unwrap();

        let mut client = Client::new(Connection::new(manager.connect()));
        let mark = survey_map(&mut client, coords, b"message").await.unwrap();
        assert_eq!(mark, '$');
        assert!(!client.is_active());
    }

    #[test]
    fn test_ensure() {
        assert!(ensure("open", Status::new(0)).is_ok());

        let err = ensure("store", Status::new(7)).unwrap_err();
        assert_eq!(err.to_string(), "store failed");
        assert!(matches!(
            err.downcast_ref::<ClientError>(),
            Some(ClientError::RemoteStatus(7))
        ));
    }
}
