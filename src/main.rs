use house_vote::config::{Config, ConfigError};
use house_vote::db::{BallotStore, Database, PollStore};
use house_vote::directory::Directory;
use house_vote::directory::oidc::OidcDirectory;
use house_vote::notify::discord::DiscordNotifier;
use house_vote::tasks::lifecycle::LifecycleScheduler;
use house_vote::voting::compute_result;
use chrono::Utc;
use log::{error, info, warn};
use std::env;
use std::error::Error;
use std::sync::Arc;

type BoxError = Box<dyn Error + Send + Sync>;

const USAGE: &str = "usage: house-vote [run | evaluate | results <poll-id>]";

#[tokio::main]
async fn main() {
    // Load .env before anything reads the environment
    dotenvy::dotenv().ok();
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    if let Err(e) = run(&args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: &[String]) -> Result<(), BoxError> {
    let config = Config::from_env()?;
    // Initialize database
    let database = Arc::new(Database::new(&config.database_url).await?);

    match args.first().map(String::as_str).unwrap_or("run") {
        "run" => {
            let (scheduler, directory) = scheduler(&config, &database).await?;
            // First pass at local midnight, then daily
            let task = Arc::clone(&scheduler).spawn_daily();
            info!("Poll lifecycle scheduler running; press Ctrl-C to stop");

            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
            // Let a pass in progress finish before the directory goes away
            task.stop().await;
            if let Some(directory) = directory {
                directory.shutdown().await;
            }
        }
        "evaluate" => {
            let (scheduler, directory) = scheduler(&config, &database).await?;
            let report = scheduler.run_pass(Utc::now()).await;
            info!(
                "Evaluated {} poll(s): {} reminders sent, {} closed, {} skipped",
                report.evaluated,
                report.reminders_sent,
                report.closed.len(),
                report.skipped
            );
            if let Some(directory) = directory {
                directory.shutdown().await;
            }
        }
        "results" => {
            // Read-only; no notifier or directory needed
            let poll_id = args.get(1).ok_or(USAGE)?;
            let poll = database.get_poll(poll_id).await?;
            let ballots = database.list_ballots(&poll.id).await?;
            let tally = compute_result(poll.vote_type, &ballots, &poll.options);

            println!("{} ({})", poll.short_description, if poll.open { "open" } else { "closed" });
            println!("{}", serde_json::to_string_pretty(&tally)?);
        }
        _ => return Err(USAGE.into()),
    }

    Ok(())
}

async fn scheduler(
    config: &Config,
    database: &Arc<Database>,
) -> Result<(Arc<LifecycleScheduler>, Option<Arc<OidcDirectory>>), BoxError> {
    let token = config
        .discord_token
        .as_deref()
        .ok_or(ConfigError::Missing("DISCORD_TOKEN"))?;
    let channel = config
        .announcements_channel
        .clone()
        .ok_or(ConfigError::Missing("VOTE_ANNOUNCEMENTS_CHANNEL_ID"))?;

    // The directory is optional; without it voter ids double as chat handles
    let oidc = match &config.oidc {
        Some(settings) => Some(OidcDirectory::start(settings.clone()).await?),
        None => {
            warn!("No directory configured; reminders go to voter ids as chat handles");
            None
        }
    };
    let directory = oidc.clone().map(|d| d as Arc<dyn Directory>);

    let scheduler = LifecycleScheduler::new(
        Arc::clone(database) as Arc<dyn PollStore>,
        Arc::clone(database) as Arc<dyn BallotStore>,
        directory,
        Arc::new(DiscordNotifier::new(token)),
        config.policy,
        channel,
        config.vote_host.clone(),
        config.call_timeout,
    );

    Ok((Arc::new(scheduler), oidc))
}
