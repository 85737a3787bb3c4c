use std::collections::{HashMap, HashSet};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use rand::Rng;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::warn;
use url::Url;

use crate::content_api::{ArticleAsset, ContentApi};
use crate::media::{resolve_media, MediaRequest};
use crate::tabs::Table;
use crate::text::sanitize;
use crate::util::{index_by, slugify, str_field, Row};

const REQUIRED_TABS: &[&str] = &["top", "candidates", "prompts"];
const CONTENT_PROTECTION_STATES: &[&str] = &["free", "premium", "registered", "metered"];

/// `top` fields rendered as block markdown when present.
const MARKDOWN_BY_DEFAULT: &[&str] = &["intro", "methodology"];

/// House site code used when the spreadsheet leaves it blank.
const DEFAULT_SITE_CODE: &str = "USAT";

/// Placeholder for a canonical URL that would not parse.
const URL_SENTINEL: &str = "tk";

/// Spreadsheet dates are newsroom-local.
const NEWSROOM_TZ: Tz = chrono_tz::US::Eastern;

const CANDIDATE_CROP_DEFAULT: &str = "1_1";
const RELATED_LINK_CROP: &str = "4_3";

/// Race-independent tables shared by every race document in a run.
#[derive(Debug, Clone)]
pub struct Globals {
    pub nodes: Value,
    pub recommendations: Value,
    pub related_links: Option<Vec<Row>>,
}

impl Default for Globals {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            recommendations: json!([]),
            related_links: None,
        }
    }
}

/// The fixed 5-point sentiment scale used when no `nodes` tab exists.
pub fn default_nodes() -> Value {
    json!([
        { "value": -2, "label": "Strongly disagree" },
        { "value": -1, "label": "Disagree" },
        { "value": 0, "label": "Unsure" },
        { "value": 1, "label": "Agree" },
        { "value": 2, "label": "Strongly agree" },
    ])
}

/// Build one validated race document from the race's tabs. Missing or
/// misshapen required tabs are fatal for this race; per-item problems
/// (bad URLs, failed lookups) degrade with a warning instead.
pub async fn assemble(
    client: &Client,
    api: &ContentApi,
    race: &str,
    tabs: &HashMap<String, Table>,
    globals: &Globals,
) -> Result<Value> {
    for required in REQUIRED_TABS {
        if !tabs.contains_key(*required) {
            bail!("required tab {required}-{race} is not found");
        }
    }

    let mut top = tabs["top"]
        .as_flat()
        .with_context(|| format!("tab top-{race} is not a key/value tab"))?
        .clone();
    let candidate_rows = tabs["candidates"]
        .as_rows()
        .with_context(|| format!("tab candidates-{race} is not a row tab"))?;
    let prompt_rows = tabs["prompts"]
        .as_rows()
        .with_context(|| format!("tab prompts-{race} is not a row tab"))?;

    normalize_top(&mut top, race);

    let candidates = build_candidates(client, api, race, candidate_rows).await?;

    // First candidate in tab order anchors each prompt's directional flag.
    let flip_candidate = str_field(&candidates[0], "id");
    let prompts = build_prompts(race, prompt_rows, &candidates, &flip_candidate);
    let prompts = randomize(prompts);

    let topics = build_topics(tabs.get("topics"), &prompts);
    let related_links =
        build_related_links(client, api, race, globals.related_links.as_deref()).await;

    let mut doc = top;
    doc.insert(
        "prompts".to_string(),
        Value::Array(prompts.into_iter().map(Value::Object).collect()),
    );
    doc.insert(
        "candidates".to_string(),
        Value::Array(candidates.into_iter().map(Value::Object).collect()),
    );
    doc.insert("topics".to_string(), Value::Object(topics));
    doc.insert("related_links".to_string(), Value::Array(related_links));
    doc.insert("nodes".to_string(), globals.nodes.clone());
    doc.insert("recommendations".to_string(), globals.recommendations.clone());

    Ok(Value::Object(doc))
}

/// Page-level normalization of the `top` mapping, in place.
fn normalize_top(top: &mut Map<String, Value>, race: &str) {
    // Content protection state: case-insensitive match against the known
    // set, anything else falls back to free.
    let cps = top
        .get("content_protection_state")
        .and_then(Value::as_str)
        .unwrap_or("free")
        .to_lowercase();
    let cps = if CONTENT_PROTECTION_STATES.contains(&cps.as_str()) {
        cps
    } else {
        "free".to_string()
    };
    top.insert("content_protection_state".to_string(), Value::String(cps));

    if str_field(top, "headline").is_empty() {
        if let Some(title) = top.get("title").cloned() {
            top.insert("headline".to_string(), title);
        }
    }

    let contributing = str_field(top, "contributing");
    if !contributing.is_empty() {
        let html = sanitize(&contributing, true);
        top.insert("contributing".to_string(), Value::String(html));
    }
    for field in MARKDOWN_BY_DEFAULT {
        let raw = str_field(top, field);
        if !raw.is_empty() {
            let html = sanitize(&raw, false);
            top.insert(field.to_string(), Value::String(html));
        }
    }

    // Opinion pieces get different on-page treatment; the first SSTS
    // taxonomy segment decides.
    let is_opinion = top
        .get("ssts")
        .and_then(Value::as_str)
        .and_then(|ssts| ssts.split('/').next())
        .map(|section| section.eq_ignore_ascii_case("opinion"))
        .unwrap_or(false);
    top.insert("isOpinion".to_string(), Value::Bool(is_opinion));

    let canonical = str_field(top, "url");
    match Url::parse(&canonical) {
        Ok(parsed) => {
            top.insert("url".to_string(), Value::String(parsed.to_string()));
        }
        Err(e) => {
            warn!("error parsing canonical url for {race} ({canonical:?}): {e}");
            top.insert("url".to_string(), Value::String(URL_SENTINEL.to_string()));
        }
    }

    let site_code = str_field(top, "site_code").to_uppercase();
    let site_code = if site_code.is_empty() {
        DEFAULT_SITE_CODE.to_string()
    } else {
        site_code
    };
    top.insert("site_code".to_string(), Value::String(site_code));

    let published = str_field(top, "published");
    if !published.is_empty() {
        match parse_sheet_date(&published) {
            Some(ts) => {
                top.insert("published".to_string(), Value::String(ts.to_rfc3339()));
            }
            None => warn!("could not parse published date for {race}: {published:?}"),
        }
    }
    let updated = str_field(top, "updated");
    if updated.is_empty() {
        top.insert("updated".to_string(), Value::String(Utc::now().to_rfc3339()));
    } else {
        match parse_sheet_date(&updated) {
            Some(ts) => {
                top.insert("updated".to_string(), Value::String(ts.to_rfc3339()));
            }
            None => warn!("could not parse updated date for {race}: {updated:?}"),
        }
    }
}

async fn build_candidates(
    client: &Client,
    api: &ContentApi,
    race: &str,
    rows: &[Row],
) -> Result<Vec<Row>> {
    if rows.is_empty() {
        bail!("tab candidates-{race} has no rows");
    }

    let mut candidates = Vec::with_capacity(rows.len());
    let mut seen = HashSet::new();
    for row in rows {
        let mut candidate = row.clone();
        let id = slugify(&[&str_field(row, "name")]);
        if !seen.insert(id.clone()) {
            bail!("duplicate candidate id {id:?} in candidates-{race}");
        }

        let request = MediaRequest {
            image: str_field(row, "image"),
            alt: str_field(row, "image_alt"),
            crop: {
                let crop = str_field(row, "image_crop");
                if crop.is_empty() {
                    CANDIDATE_CROP_DEFAULT.to_string()
                } else {
                    crop
                }
            },
            ..Default::default()
        };
        candidate.remove("image_alt");
        candidate.remove("image_crop");
        candidate.insert("id".to_string(), Value::String(id));
        candidate.insert(
            "image".to_string(),
            resolve_media(client, api, &request).await,
        );
        candidates.push(candidate);
    }

    Ok(candidates)
}

/// Drop prompts without a candidate, slugify the cross-references, sanitize
/// the prompt text and compute the flip flag. Prompts naming a candidate that
/// does not exist are dropped too, so no orphan reference survives. Ids carry
/// the pre-shuffle index so they stay unique after randomization.
fn build_prompts(
    race: &str,
    rows: &[Row],
    candidates: &[Row],
    flip_candidate: &str,
) -> Vec<Row> {
    let known = index_by(candidates, "id");
    let mut prompts: Vec<Row> = Vec::with_capacity(rows.len());

    for row in rows {
        if str_field(row, "candidate").is_empty() {
            continue;
        }
        let topic = slugify(&[&str_field(row, "topic")]);
        let candidate = slugify(&[&str_field(row, "candidate")]);
        if !known.contains_key(&candidate) {
            warn!("dropping prompt in {race}: no such candidate {candidate:?}");
            continue;
        }

        let index = prompts.len();
        let mut prompt = row.clone();
        prompt.insert(
            "text".to_string(),
            Value::String(sanitize(&str_field(row, "text"), true)),
        );
        prompt.insert(
            "flip".to_string(),
            Value::Bool(candidate == flip_candidate),
        );
        prompt.insert(
            "id".to_string(),
            Value::String(format!("{topic}-{candidate}-{index}")),
        );
        prompt.insert("topic".to_string(), Value::String(topic));
        prompt.insert("candidate".to_string(), Value::String(candidate));
        prompts.push(prompt);
    }

    prompts
}

/// Unbiased shuffle: repeatedly pull a uniformly random remaining element.
fn randomize<T>(mut items: Vec<T>) -> Vec<T> {
    let mut rng = rand::thread_rng();
    let mut shuffled = Vec::with_capacity(items.len());
    while !items.is_empty() {
        let index = rng.gen_range(0..items.len());
        shuffled.push(items.remove(index));
    }
    shuffled
}

/// Topics become a slug-keyed lookup annotated with surviving-prompt counts,
/// but only when the tab has more than one row.
fn build_topics(topics_tab: Option<&Table>, prompts: &[Row]) -> Map<String, Value> {
    let mut topics = Map::new();
    let Some(rows) = topics_tab.and_then(Table::as_rows) else {
        return topics;
    };
    if rows.len() <= 1 {
        return topics;
    }

    for row in rows {
        let name = str_field(row, "name");
        let id = slugify(&[&name]);
        let count = prompts
            .iter()
            .filter(|p| str_field(p, "topic") == id)
            .count();
        topics.insert(
            id,
            json!({
                "name": name,
                "description": str_field(row, "description"),
                "count": count,
            }),
        );
    }
    topics
}

async fn build_related_links(
    client: &Client,
    api: &ContentApi,
    race: &str,
    rows: Option<&[Row]>,
) -> Vec<Value> {
    let mut related = Vec::new();
    let Some(rows) = rows else {
        return related;
    };

    for row in rows {
        let link = str_field(row, "link");
        let headline = str_field(row, "headline");

        if !link.is_empty() {
            match Url::parse(&link) {
                Ok(parsed) => related.push(json!({
                    "link": parsed.to_string(),
                    "headline": headline,
                })),
                Err(e) => warn!("problem with related link {link:?} for {race}: {e}"),
            }
            continue;
        }

        let asset_id = str_field(row, "asset_id");
        let assets = match api.get_articles(&asset_id).await {
            Ok(assets) => assets,
            Err(e) => {
                warn!("problem getting related asset {asset_id:?} for {race}: {e:#}");
                continue;
            }
        };
        let Some(asset) = assets.into_iter().next() else {
            continue;
        };

        let mut image = json!({});
        if let Some(photo_id) = asset.links.as_ref().and_then(|l| l.photo_id.clone()) {
            let request = MediaRequest {
                image: photo_id,
                crop: RELATED_LINK_CROP.to_string(),
                ..Default::default()
            };
            image = resolve_media(client, api, &request).await;
        }

        related.push(json!({
            "headline": pick_headline(&headline, &asset),
            "link": asset
                .page_url
                .as_ref()
                .and_then(|page| page.long.clone())
                .unwrap_or_default(),
            "image": image,
        }));
    }

    related
}

/// Explicit spreadsheet headline beats the service's short headline beats
/// its headline beats its title.
fn pick_headline(explicit: &str, asset: &ArticleAsset) -> String {
    if !explicit.is_empty() {
        return explicit.to_string();
    }
    for candidate in [&asset.short_headline, &asset.headline, &asset.title] {
        if let Some(value) = candidate {
            if !value.is_empty() {
                return value.clone();
            }
        }
    }
    String::new()
}

/// Coerce the loose date formats humans type into spreadsheets. Naive dates
/// are taken as newsroom-local time; output is always UTC.
fn parse_sheet_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    const DATETIME_FORMATS: &[&str] = &[
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    const DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%Y-%m-%d", "%B %d, %Y", "%b %d, %Y"];

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return newsroom_local(naive);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return newsroom_local(date.and_hms_opt(0, 0, 0)?);
        }
    }
    None
}

fn newsroom_local(naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    NEWSROOM_TZ
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}
