//! tmb: TinyMotion operator CLI
//!
//! Commands:
//!   user    create | list | update | delete
//!   infant  create | list | update | delete   (delete cascades to consents, videos, files)
//!   consent create | list | delete            (the last consent of an infant with videos is kept)
//!   video   list | upload | decrypt | delete
//!   secret  generate [--video] [--access] [--for-env-file]
//!   config  show
//!   version

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::ExposeSecret;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use tmb_core::config::TmbConfig;
use tmb_core::types::{
    ConsentCreate, ConsentCreateViaNhi, ConsentProposal, InfantCreate, InfantUpdate, UserCreate,
    UserUpdate,
};
use tmb_core::Sha256Hex;
use tmb_crypto::{ChunkedCipher, VideoKey};
use tmb_ingest::{consents, infants, users, videos, UploadRequest, VideoIngest, VideoLibrary};
use tmb_store::{EntityStore, JsonStore};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "tmb",
    version,
    about = "TinyMotion operator CLI",
    long_about = "tmb: manage TinyMotion users, infants, consents and encrypted videos"
)]
struct Cli {
    /// Path to config.toml
    #[arg(long, short = 'c', env = "TMB_CONFIG", default_value = "/etc/tinymotion/config.toml")]
    config: PathBuf,

    /// Log level for diagnostics on stderr
    #[arg(long, env = "TMB_LOG", default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Staff accounts
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Infant records
    Infant {
        #[command(subcommand)]
        action: InfantAction,
    },

    /// Consent records
    Consent {
        #[command(subcommand)]
        action: ConsentAction,
    },

    /// Encrypted videos
    Video {
        #[command(subcommand)]
        action: VideoAction,
    },

    /// Secret generation
    Secret {
        #[command(subcommand)]
        action: SecretAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Print the version
    Version,
}

#[derive(Subcommand, Debug)]
enum UserAction {
    /// Create a new user
    Create {
        #[arg(long, short = 'e')]
        email: String,
        /// Access key the user will authenticate with (stored hashed)
        #[arg(long, short = 'k')]
        access_key: String,
        /// Disable the account on creation
        #[arg(long, short = 'd')]
        disabled: bool,
    },
    /// List users
    List,
    /// Update a user; omitted options are left unchanged
    Update {
        user_id: Uuid,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        access_key: Option<String>,
        #[arg(long)]
        disabled: Option<bool>,
    },
    /// Delete a user that owns no records
    Delete { user_id: Uuid },
}

#[derive(Subcommand, Debug)]
enum InfantAction {
    /// Register an infant
    Create {
        /// Id of the user recording this infant
        #[arg(long)]
        user_id: Uuid,
        #[arg(long)]
        full_name: String,
        /// YYYY-MM-DD
        #[arg(long)]
        birth_date: NaiveDate,
        /// YYYY-MM-DD
        #[arg(long)]
        due_date: NaiveDate,
        #[arg(long)]
        nhi_number: String,
    },
    /// List infants
    List,
    /// Update an infant; omitted options are left unchanged
    Update {
        infant_id: Uuid,
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long)]
        birth_date: Option<NaiveDate>,
        #[arg(long)]
        due_date: Option<NaiveDate>,
        #[arg(long)]
        nhi_number: Option<String>,
    },
    /// Delete an infant with all of its consents, videos and video files
    Delete {
        infant_id: Uuid,
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConsentAction {
    /// Record a consent
    Create {
        #[arg(long)]
        user_id: Uuid,
        /// Infant by NHI number
        #[arg(long, conflicts_with = "infant_id", required_unless_present = "infant_id")]
        nhi_number: Option<String>,
        /// Infant by id
        #[arg(long)]
        infant_id: Option<Uuid>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        /// A signed paper copy was collected
        #[arg(long)]
        physically: bool,
    },
    /// List consents
    List {
        #[arg(long)]
        infant_id: Option<Uuid>,
    },
    /// Delete a consent
    Delete { consent_id: Uuid },
}

#[derive(Subcommand, Debug)]
enum VideoAction {
    /// List stored videos
    List {
        #[arg(long)]
        infant_id: Option<Uuid>,
    },
    /// Encrypt and store a local video file
    Upload {
        file: PathBuf,
        #[arg(long)]
        user_id: Uuid,
        #[arg(long)]
        nhi_number: String,
        /// Expected SHA-256 of the file (computed locally if omitted)
        #[arg(long)]
        checksum: Option<String>,
    },
    /// Decrypt a stored video to a local file, verifying its checksums
    Decrypt { video_id: Uuid, output: PathBuf },
    /// Delete a video record and its file
    Delete {
        video_id: Uuid,
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum SecretAction {
    /// Generate new secrets
    Generate {
        /// Generate a video encryption secret
        #[arg(long, short = 'v')]
        video: bool,
        /// Generate a user access key
        #[arg(long, short = 'a')]
        access: bool,
        /// Print in .env file format
        #[arg(long, short = 'e')]
        for_env_file: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file + env)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log);

    match cli.command {
        Commands::Version => {
            println!("tmb {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Secret {
            action:
                SecretAction::Generate {
                    video,
                    access,
                    for_env_file,
                },
        } => cmd_secret_generate(video, access, for_env_file),
        command => {
            let config = TmbConfig::load(&cli.config)
                .with_context(|| format!("loading config {}", cli.config.display()))?;
            run(command, &config, &cli.config).await
        }
    }
}

async fn run(command: Commands, config: &TmbConfig, config_path: &Path) -> Result<()> {
    match command {
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(config, config_path),
        Commands::User { action } => cmd_user(config, action),
        Commands::Infant { action } => cmd_infant(config, action).await,
        Commands::Consent { action } => cmd_consent(config, action),
        Commands::Video { action } => cmd_video(config, action).await,
        Commands::Version | Commands::Secret { .. } => Ok(()),
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ── Shared plumbing ───────────────────────────────────────────────────────────

fn open_store(config: &TmbConfig) -> Result<JsonStore> {
    JsonStore::open(&config.store.db_path)
        .with_context(|| format!("opening store {}", config.store.db_path.display()))
}

async fn open_library(config: &TmbConfig) -> Result<VideoLibrary> {
    VideoLibrary::open(&config.videos.library_path)
        .await
        .with_context(|| format!("opening video library {}", config.videos.library_path.display()))
}

async fn open_ingest(config: &TmbConfig) -> Result<VideoIngest> {
    let secret = config.videos.secret_key.as_ref().context(
        "no video secret configured: set videos.secret_key or TINYMOTION_VIDEO_SECRET_KEY",
    )?;
    let key = VideoKey::from_base64(secret).context("loading video secret")?;
    let cipher = ChunkedCipher::new(key, config.videos.chunk_size_bytes)?;
    let store: Arc<dyn EntityStore> = Arc::new(open_store(config)?);
    Ok(VideoIngest::new(store, open_library(config).await?, cipher))
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .context("reading confirmation")?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

// ── `tmb user` ────────────────────────────────────────────────────────────────

fn cmd_user(config: &TmbConfig, action: UserAction) -> Result<()> {
    let store = open_store(config)?;
    match action {
        UserAction::Create {
            email,
            access_key,
            disabled,
        } => {
            let user = users::create(
                &store,
                UserCreate {
                    email,
                    access_key,
                    disabled,
                },
            )?;
            println!("Created user {} ({})", user.user_id, user.email);
        }
        UserAction::List => {
            let all = users::list(&store)?;
            println!("Found {} users", all.len());
            for u in all {
                println!(
                    "  {}  {}{}",
                    u.user_id,
                    u.email,
                    if u.disabled { "  (disabled)" } else { "" }
                );
            }
        }
        UserAction::Update {
            user_id,
            email,
            access_key,
            disabled,
        } => {
            let user = users::update(
                &store,
                user_id,
                UserUpdate {
                    email,
                    access_key,
                    disabled,
                },
            )?;
            println!("Updated user {} ({})", user.user_id, user.email);
        }
        UserAction::Delete { user_id } => {
            if users::delete(&store, user_id)? {
                println!("Deleted user {user_id}");
            } else {
                println!("No user {user_id}");
            }
        }
    }
    Ok(())
}

// ── `tmb infant` ──────────────────────────────────────────────────────────────

async fn cmd_infant(config: &TmbConfig, action: InfantAction) -> Result<()> {
    let store = open_store(config)?;
    match action {
        InfantAction::Create {
            user_id,
            full_name,
            birth_date,
            due_date,
            nhi_number,
        } => {
            users::get(&store, user_id).context("checking --user-id")?;
            let infant = infants::create(
                &store,
                user_id,
                InfantCreate {
                    full_name,
                    birth_date,
                    due_date,
                    nhi_number,
                },
            )?;
            println!("Created infant {} (NHI {})", infant.infant_id, infant.nhi_number);
        }
        InfantAction::List => {
            let all = infants::list(&store)?;
            println!("Found {} infants", all.len());
            for i in all {
                println!(
                    "  {}  {}  {}  born {}  due {}",
                    i.infant_id, i.nhi_number, i.full_name, i.birth_date, i.due_date
                );
            }
        }
        InfantAction::Update {
            infant_id,
            full_name,
            birth_date,
            due_date,
            nhi_number,
        } => {
            let infant = infants::update(
                &store,
                infant_id,
                InfantUpdate {
                    full_name,
                    birth_date,
                    due_date,
                    nhi_number,
                },
            )?;
            println!("Updated infant {} (NHI {})", infant.infant_id, infant.nhi_number);
        }
        InfantAction::Delete { infant_id, yes } => {
            let infant = infants::get(&store, infant_id)?;
            let consent_count = store.consents_for_infant(infant_id)?.len();
            let video_count = store.videos_for_infant(infant_id)?.len();
            println!(
                "Deleting infant {} (NHI {}) with {consent_count} consent(s) and {video_count} video(s)",
                infant.infant_id, infant.nhi_number
            );
            if !yes && !confirm("Are you sure you want to delete it?")? {
                println!("Not deleting");
                return Ok(());
            }

            let library = open_library(config).await?;
            let outcome = infants::delete_cascade(&store, &library, infant_id).await?;
            println!(
                "Deleted infant, {} consent(s), {} video(s), {} file(s)",
                outcome.report.consents.len(),
                outcome.report.videos.len(),
                outcome.files_removed
            );
            for name in &outcome.orphaned_files {
                eprintln!("warning: could not remove video file {name}");
            }
        }
    }
    Ok(())
}

// ── `tmb consent` ─────────────────────────────────────────────────────────────

fn cmd_consent(config: &TmbConfig, action: ConsentAction) -> Result<()> {
    let store = open_store(config)?;
    match action {
        ConsentAction::Create {
            user_id,
            nhi_number,
            infant_id,
            name,
            email,
            physically,
        } => {
            users::get(&store, user_id).context("checking --user-id")?;
            let proposal = ConsentProposal {
                consent_giver_name: name,
                consent_giver_email: email,
                collected_physically: physically,
            };
            let consent = match (nhi_number, infant_id) {
                (Some(nhi_number), _) => consents::create_via_nhi(
                    &store,
                    user_id,
                    ConsentCreateViaNhi {
                        nhi_number,
                        proposal,
                    },
                )?,
                (None, Some(infant_id)) => consents::create(
                    &store,
                    user_id,
                    ConsentCreate {
                        infant_id,
                        proposal,
                    },
                )?,
                (None, None) => anyhow::bail!("one of --nhi-number or --infant-id is required"),
            };
            println!(
                "Created consent {} for infant {}",
                consent.consent_id, consent.infant_id
            );
        }
        ConsentAction::List { infant_id } => {
            let all = match infant_id {
                Some(id) => consents::list_for_infant(&store, id)?,
                None => consents::list(&store)?,
            };
            println!("Found {} consents", all.len());
            for c in all {
                let giver = match (&c.consent_giver_name, &c.consent_giver_email) {
                    (Some(n), Some(e)) => format!("{n} <{e}>"),
                    (Some(n), None) => n.clone(),
                    (None, Some(e)) => format!("<{e}>"),
                    (None, None) => "-".to_string(),
                };
                println!(
                    "  {}  infant {}  {giver}{}",
                    c.consent_id,
                    c.infant_id,
                    if c.collected_physically { "  (paper)" } else { "" }
                );
            }
        }
        ConsentAction::Delete { consent_id } => {
            let consent = consents::delete(&store, consent_id)?;
            println!(
                "Deleted consent {} of infant {}",
                consent.consent_id, consent.infant_id
            );
        }
    }
    Ok(())
}

// ── `tmb video` ───────────────────────────────────────────────────────────────

async fn cmd_video(config: &TmbConfig, action: VideoAction) -> Result<()> {
    match action {
        VideoAction::List { infant_id } => {
            let store = open_store(config)?;
            let all = match infant_id {
                Some(id) => videos::list_for_infant(&store, id)?,
                None => videos::list(&store)?,
            };
            println!("Found {} videos", all.len());
            for v in all {
                let size = v
                    .size_bytes
                    .map(fmt_bytes)
                    .unwrap_or_else(|| "pending".to_string());
                println!(
                    "  {}  infant {}  {}  {size}  {}",
                    v.video_id, v.infant_id, v.video_name, v.created_at
                );
            }
        }
        VideoAction::Upload {
            file,
            user_id,
            nhi_number,
            checksum,
        } => {
            let ingest = open_ingest(config).await?;
            users::get(ingest.store().as_ref(), user_id).context("checking --user-id")?;

            let declared = match checksum {
                Some(c) => c,
                None => tmb_crypto::sha256_file(&file)
                    .await
                    .with_context(|| format!("hashing {}", file.display()))?,
            };
            let request = UploadRequest {
                original_file_name: file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                declared_sha256: Sha256Hex::parse(&declared)?,
                nhi_number,
                created_by: user_id,
            };

            let mut source = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("opening {}", file.display()))?;
            let pb = make_spinner("upload");
            pb.set_message(file.display().to_string());
            let result = ingest.upload(&mut source, request).await;
            pb.finish_and_clear();

            let video = result.with_context(|| format!("uploading {}", file.display()))?;
            println!("Stored {}", video.video_name);
            println!("  id:      {}", video.video_id);
            println!("  infant:  {}", video.infant_id);
            println!("  bytes:   {}", fmt_bytes(video.size_bytes.unwrap_or(0)));
            println!("  sha256:  {}", video.sha256sum);
        }
        VideoAction::Decrypt { video_id, output } => {
            let ingest = open_ingest(config).await?;
            let pb = make_spinner("decrypt");
            pb.set_message(output.display().to_string());
            let result = ingest.export(video_id, &output).await;
            pb.finish_and_clear();

            let exported = result.with_context(|| format!("decrypting video {video_id}"))?;
            println!("Decrypted {}", exported.video.video_name);
            println!("  output:  {}", exported.output.display());
            println!("  bytes:   {}", fmt_bytes(exported.plaintext_bytes));
            println!("  chunks:  {}", exported.chunks);
            println!("  checksums verified");
        }
        VideoAction::Delete { video_id, yes } => {
            let store = open_store(config)?;
            let library = open_library(config).await?;
            let video = videos::get(&store, video_id)?;
            println!("Deleting video {} ({})", video.video_id, video.video_name);
            println!("Video file path: {}", library.path_for(&video.video_name)?.display());
            if !yes && !confirm("Are you sure you want to delete it?")? {
                println!("Not deleting");
                return Ok(());
            }
            let (_, file_removed) = videos::delete(&store, &library, video_id).await?;
            if file_removed {
                println!("Deleted video and file");
            } else {
                println!("Deleted video record (file was already missing)");
            }
        }
    }
    Ok(())
}

// ── `tmb secret generate` ─────────────────────────────────────────────────────

fn cmd_secret_generate(video: bool, access: bool, for_env_file: bool) -> Result<()> {
    if !(video || access) {
        anyhow::bail!("select which secrets to generate: --video and/or --access");
    }

    if video {
        let secret = tmb_crypto::generate_video_secret();
        if for_env_file {
            println!("TINYMOTION_VIDEO_SECRET_KEY={}", secret.expose_secret());
        } else {
            println!("video_secret = {}", secret.expose_secret());
        }
    }
    if access {
        // Same shape as a video secret: 32 random bytes, URL-safe base64
        let key = tmb_crypto::generate_video_secret();
        if for_env_file {
            println!("# access key for `tmb user create --access-key`: {}", key.expose_secret());
        } else {
            println!("access_key = {}", key.expose_secret());
        }
    }
    Ok(())
}

// ── `tmb config show` ─────────────────────────────────────────────────────────

fn cmd_config_show(config: &TmbConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    let secret_state = if config.videos.secret_key.is_some() {
        "set"
    } else {
        "NOT SET"
    };
    println!("# videos.secret_key: {secret_state}");
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
