use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};

use crate::assemble::{self, Globals};
use crate::config::Config;
use crate::content_api::{ContentApi, REQUEST_TIMEOUT};
use crate::sheets;
use crate::store;
use crate::tabs::{self, Table};
use crate::util::{str_field, Row};

const RACE_CONCURRENCY: usize = 4;

struct RaceOutcome {
    race: String,
    result: Result<PathBuf>,
}

/// One full pipeline run: fetch tabs, classify, assemble every race
/// concurrently and write each document as it completes. Races are isolated:
/// one failing validation does not abort its siblings, but any failure makes
/// the whole run exit non-zero.
pub async fn run(config: Config) -> Result<()> {
    info!("updating deciders for {}", config.group.to_uppercase());

    let raw_tabs = sheets::fetch(&config).await?;
    let classified = tabs::classify(raw_tabs);
    if classified.races.is_empty() {
        info!("no race tabs found; nothing to do");
        return Ok(());
    }

    let globals = Arc::new(prepare_globals(&classified.globals));
    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()?;
    let api = Arc::new(ContentApi::new(
        client.clone(),
        config.assets_endpoint.clone(),
        config.api_key.clone(),
        config.site_code.clone(),
    ));
    let config = Arc::new(config);

    let total = classified.races.len();
    let semaphore = Arc::new(Semaphore::new(RACE_CONCURRENCY));
    let (tx, mut rx) = mpsc::channel::<RaceOutcome>(total);

    for (race, race_tabs) in classified.races {
        let client = client.clone();
        let api = Arc::clone(&api);
        let globals = Arc::clone(&globals);
        let config = Arc::clone(&config);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            info!("generating input data for {race}");
            let result = match assemble::assemble(&client, &api, &race, &race_tabs, &globals).await
            {
                Ok(doc) => store::write_document(&config.out_dir, &config.group, &race, &doc).await,
                Err(e) => Err(e),
            };
            let _ = tx.send(RaceOutcome { race, result }).await;
        });
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} races")?
            .progress_chars("=> "),
    );

    let mut written = 0usize;
    let mut failures = Vec::new();
    while let Some(outcome) = rx.recv().await {
        match outcome.result {
            Ok(path) => {
                written += 1;
                info!("wrote {}", path.display());
            }
            Err(e) => {
                error!("race {} failed: {e:#}", outcome.race);
                failures.push(format!("{}: {e:#}", outcome.race));
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!("assembled {written} of {total} races");
    if !failures.is_empty() {
        bail!(
            "{} of {total} races failed:\n  {}",
            failures.len(),
            failures.join("\n  ")
        );
    }
    Ok(())
}

/// Race-independent tables, coerced once per run: node values become
/// integers and recommendation percentages are forced numeric.
fn prepare_globals(globals: &HashMap<String, Table>) -> Globals {
    let nodes = globals
        .get("nodes")
        .and_then(Table::as_rows)
        .filter(|rows| !rows.is_empty())
        .map(|rows| Value::Array(rows.iter().map(coerce_node).collect()))
        .unwrap_or_else(assemble::default_nodes);

    let recommendations = globals
        .get("recommendations")
        .and_then(Table::as_rows)
        .map(|rows| Value::Array(rows.iter().map(coerce_recommendation).collect()))
        .unwrap_or_else(|| json!([]));

    let related_links = globals
        .get("related_links")
        .and_then(Table::as_rows)
        .map(<[Row]>::to_vec);

    Globals {
        nodes,
        recommendations,
        related_links,
    }
}

fn coerce_node(row: &Row) -> Value {
    let mut node = row.clone();
    if let Ok(value) = str_field(row, "value").trim().parse::<i64>() {
        node.insert("value".to_string(), json!(value));
    }
    Value::Object(node)
}

fn coerce_recommendation(row: &Row) -> Value {
    let mut rec = row.clone();
    let raw = str_field(row, "percentage");
    match parse_leading_int(&raw) {
        Some(percentage) => {
            rec.insert("percentage".to_string(), json!(percentage));
        }
        None => {
            warn!("unparseable percentage {raw:?} in recommendations");
            rec.insert("percentage".to_string(), Value::Null);
        }
    }
    Value::Object(rec)
}

/// Integer prefix of a human-typed number: "48%" -> 48, "abc" -> None.
fn parse_leading_int(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    let unsigned = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let digits = unsigned.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let sign = trimmed.len() - unsigned.len();
    trimmed[..sign + digits].parse().ok()
}
