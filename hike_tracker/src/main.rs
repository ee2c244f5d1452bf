use std::{fs::OpenOptions, path::PathBuf, sync::Arc};

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use hike_tracker::{
    api::ApiClient,
    buffer::PendingSessions,
    configuration::{FailurePolicy, TrackerConfig},
    database::KeyValueStore,
    geolocator::GpxReplayGeolocator,
    reports::{ReportCache, TrailReportClient},
    HikeEvent, HikeSessionController, HttpSessionUploader, TrackRecorder, UserStore,
};
use hike_tracker_lib::{
    geo_point::GeoPoint,
    interpolation::PathInterpolator,
    trail_report::{ReportCategory, TrailReport},
    user::UserInfo,
};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hike_tracker")]
#[command(about = "Record hikes, upload them and file trail reports", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a GPX track as a live hike, then upload it
    Replay {
        gpx_file: PathBuf,
        #[arg(long)]
        mountain_id: i64,
        /// Playback speed, 60 plays a minute of hiking per second
        #[arg(long, default_value_t = 1.)]
        speed: f64,
    },
    /// Trail reports
    Reports {
        #[command(subcommand)]
        command: ReportCommands,
    },
    /// Hikes already uploaded
    Records {
        #[command(subcommand)]
        command: RecordCommands,
    },
    /// Hikes whose upload has not been accepted yet
    Pending {
        #[command(subcommand)]
        command: PendingCommands,
    },
    Login {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        token: String,
    },
    Logout,
}

#[derive(Subcommand)]
enum ReportCommands {
    /// Show the cached reports
    List {
        /// Download the reports first
        #[arg(long)]
        refresh: bool,
    },
    Submit {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// trail_issue, construction, natural_disaster, wildlife or other
        #[arg(long)]
        category: ReportCategory,
        #[arg(long)]
        note: Option<String>,
        /// JPEG photo of the incident
        #[arg(long)]
        photo: PathBuf,
    },
}

#[derive(Subcommand)]
enum RecordCommands {
    /// Download and show the uploaded hikes
    List,
}

#[derive(Subcommand)]
enum PendingCommands {
    List,
    Resubmit,
}

struct App {
    config: TrackerConfig,
    store: KeyValueStore,
    users: Arc<UserStore>,
}

impl App {
    async fn open(config: TrackerConfig) -> anyhow::Result<Self> {
        let store = KeyValueStore::connect(&config.database_path()).await?;
        let users = Arc::new(UserStore::load(store.clone()).await?);
        Ok(Self { config, store, users })
    }

    fn api(&self) -> anyhow::Result<ApiClient> {
        Ok(ApiClient::new(&self.config.backend, self.users.clone())?)
    }

    fn uploader(&self) -> anyhow::Result<HttpSessionUploader> {
        Ok(HttpSessionUploader::new(self.api()?, self.config.upload.include_interpolated))
    }

    fn reports(&self) -> anyhow::Result<TrailReportClient> {
        Ok(TrailReportClient::new(self.api()?, ReportCache::new(self.store.clone())))
    }

    async fn pending(&self) -> anyhow::Result<PendingSessions> {
        Ok(PendingSessions::open(self.config.pending_dir()).await?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::default(),
    };

    let log_file = config.log_file();
    if let Some(log_dir) = log_file.parent() {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("Failed to open log file {}", log_file.display()))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| format!("{}=trace", env!("CARGO_CRATE_NAME")).into())
        )
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file))
        .init();

    let app = App::open(config).await?;

    match cli.command {
        Commands::Replay { gpx_file, mountain_id, speed } => replay(&app, gpx_file, mountain_id, speed).await?,
        Commands::Reports { command: ReportCommands::List { refresh } } => {
            let client = app.reports()?;
            let reports = if refresh { client.fetch_all().await? } else { client.cached().await? };
            for report in reports {
                println!(
                    "{}\t{:.6}\t{:.6}\t{}\t{}",
                    report.timestamp_ms,
                    report.latitude,
                    report.longitude,
                    report.category,
                    report.note.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Reports { command: ReportCommands::Submit { lat, lon, category, note, photo } } => {
            let photo = tokio::fs::read(&photo)
                .await
                .with_context(|| format!("Failed to read photo {}", photo.display()))?;
            let draft = TrailReport::new(GeoPoint::new(lat, lon, Utc::now().timestamp_millis()), category, note);
            let saved = app.reports()?.submit(&draft, photo).await?;
            println!("Submitted {} report{}", saved.category, saved.photo_url.map(|url| format!(" ({url})")).unwrap_or_default());
        }
        Commands::Records { command: RecordCommands::List } => {
            for record in app.uploader()?.fetch_records().await? {
                let saved = record.saved_at().map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".into());
                println!(
                    "mountain {}\t{}\t{} points\t{:.0} m",
                    record.mountain_id,
                    saved,
                    record.path.len(),
                    record.distance_m()
                );
            }
        }
        Commands::Pending { command: PendingCommands::List } => {
            for (id, session) in app.pending().await?.load_all().await? {
                let started = session.started_at().map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".into());
                println!("{}\tmountain {}\t{}\t{} points", id, session.mountain_id, started, session.path.len());
            }
        }
        Commands::Pending { command: PendingCommands::Resubmit } => {
            let summary = app.pending().await?.resubmit(&app.uploader()?).await?;
            println!(
                "{} uploaded, {} still pending, {} already uploading",
                summary.uploaded, summary.failed, summary.in_flight
            );
        }
        Commands::Login { user_id, name, token } => {
            app.users.login(UserInfo { user_id, name, access_token: token }).await?;
        }
        Commands::Logout => app.users.logout().await?,
    }

    Ok(())
}

async fn replay(app: &App, gpx_file: PathBuf, mountain_id: i64, speed: f64) -> anyhow::Result<()> {
    let geolocator = GpxReplayGeolocator::from_file(&gpx_file)?.with_speed(speed);
    if geolocator.is_empty() {
        bail!("{} has no timestamped track points", gpx_file.display());
    }

    if !app.users.is_logged_in().await {
        tracing::warn!("Not logged in, the upload will most likely be rejected");
    }

    let recorder = TrackRecorder::new(
        Arc::new(geolocator),
        app.config.sampling.watch_options(),
        PathInterpolator::new(app.config.interpolation_points),
    );
    let pending = match app.config.upload.on_failure {
        FailurePolicy::Retain => Some(app.pending().await?),
        FailurePolicy::Discard => None,
    };

    let controller = HikeSessionController::spawn(recorder, Arc::new(app.uploader()?), pending);
    let mut events = controller.subscribe();

    controller.start_hike(mountain_id).await?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(HikeEvent::PathExtended { total, last, .. }) => {
                    println!("{:>6} points  ({:.6}, {:.6})", total, last.latitude(), last.longitude());
                }
                Ok(HikeEvent::PositionStreamEnded) | Err(RecvError::Closed) => break,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => tracing::debug!("Skipped {} events", skipped),
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping hike");
                break;
            }
        }
    }

    let Some(session) = controller.shutdown().await? else {
        bail!("Hike was not running");
    };
    println!(
        "Hike on mountain {} finished: {} points, {:.0} m",
        session.mountain_id,
        session.path.len(),
        session.path.distance_m()
    );

    loop {
        match events.recv().await {
            Ok(HikeEvent::UploadSucceeded { ack, .. }) => {
                println!("Uploaded{}", ack.record_id.map(|id| format!(" as record {id}")).unwrap_or_default());
                break;
            }
            Ok(HikeEvent::UploadFailed { error, retained, .. }) => {
                println!("Upload failed: {error}{}", if retained { ", kept for `pending resubmit`" } else { "" });
                break;
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }

    Ok(())
}
