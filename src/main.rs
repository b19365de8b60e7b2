//! Batch trigger binary
//!
//! Invoked by the scheduler to run one pool-matching batch:
//!
//! ```text
//! matchpool <session_id> [package_id] [zone_id]
//! ```
//!
//! `package_id`/`zone_id` default to 0 (no filter). The environment name for
//! `config/{env}.yaml` comes from `APP_ENV` (default `dev`).

use anyhow::{Context, Result, bail};
use rand::SeedableRng;
use rand::rngs::StdRng;

use matchpool::collaborators::NoopCollaborator;
use matchpool::config::{AppConfig, TradeRules};
use matchpool::logging::init_logging;
use matchpool::matcher::PoolMatcher;
use matchpool::store::PgStore;
use matchpool::SystemClock;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        bail!("usage: {} <session_id> [package_id] [zone_id]", args[0]);
    }
    let session_id: u64 = args[1].parse().context("invalid session_id")?;
    let package_id: u64 = args
        .get(2)
        .map(|s| s.parse())
        .transpose()
        .context("invalid package_id")?
        .unwrap_or(0);
    let zone_id: u64 = args
        .get(3)
        .map(|s| s.parse())
        .transpose()
        .context("invalid zone_id")?
        .unwrap_or(0);

    let env = std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());
    let config = AppConfig::load(&env);
    let _guard = init_logging(&config);

    let postgres_url = config
        .postgres_url
        .as_deref()
        .context("postgres_url missing from config")?;
    let store = PgStore::connect(postgres_url).await?;
    store.health_check().await?;

    // Rule snapshot for this run; the kv map comes from the config store
    let rules = TradeRules::from_kv(&config.rules);
    let clock = SystemClock;
    let collaborator = NoopCollaborator;

    let matcher = PoolMatcher::new(&store, &rules, &clock, &collaborator);
    let mut rng = StdRng::from_entropy();
    let outcome = matcher.run(session_id, package_id, zone_id, &mut rng).await?;

    println!(
        "matched={} failed={} refunded={} off_shelf={}",
        outcome.matched, outcome.failed, outcome.refunded, outcome.off_shelf
    );
    Ok(())
}
