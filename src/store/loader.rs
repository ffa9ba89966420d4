//! Fills an [`InMemoryStore`] from the sources listed in the configuration.

use anyhow::{Context, Result};
use geo::Point;
use tracing::{debug, info};

use super::InMemoryStore;
use crate::config::{SourceConfig, SourceFormat};
use crate::fetch::{HttpClient, read_location};
use crate::model::Feature;

/// Reads every source and ingests it. Returns `(type_name, features)` per source.
pub async fn load_sources<C: HttpClient>(
    client: &C,
    store: &InMemoryStore,
    sources: &[SourceConfig],
) -> Result<Vec<(String, usize)>> {
    let mut loaded = Vec::with_capacity(sources.len());

    for source in sources {
        let bytes = read_location(client, &source.location).await?;
        let (schema, features) = match source.format {
            SourceFormat::GranulesJson => parse_granules_json(&bytes),
            SourceFormat::Csv => parse_csv(&source.type_name, &bytes),
        }
        .with_context(|| format!("failed to parse source '{}'", source.location))?;

        let count = store.ingest(&source.type_name, &schema, features)?;
        info!(type_name = %source.type_name, count, location = %source.location, "Source loaded");
        loaded.push((source.type_name.clone(), count));
    }

    Ok(loaded)
}

/// Parses a JSON array of [`Feature`]s. The schema is every attribute name in
/// order of first appearance.
pub fn parse_granules_json(bytes: &[u8]) -> Result<(Vec<String>, Vec<Feature>)> {
    let features: Vec<Feature> = serde_json::from_slice(bytes)?;

    let mut schema: Vec<String> = Vec::new();
    for feature in &features {
        for name in feature.attributes.keys() {
            if !schema.contains(name) {
                schema.push(name.clone());
            }
        }
    }
    Ok((schema, features))
}

/// Parses a CSV with a header row. An `id` column becomes the feature id
/// (otherwise `<type_name>.<row>`); `longitude`/`latitude` columns, matched
/// case-insensitively, become a point geometry.
pub fn parse_csv(type_name: &str, bytes: &[u8]) -> Result<(Vec<String>, Vec<Feature>)> {
    let mut rdr = csv::Reader::from_reader(bytes);
    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();

    let find = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    let id_col = headers.iter().position(|h| h == "id");
    let lon_col = find("longitude");
    let lat_col = find("latitude");

    let mut features = Vec::new();
    for (row, record) in rdr.records().enumerate() {
        let record = record?;

        let id = id_col
            .and_then(|i| record.get(i))
            .map(str::to_string)
            .unwrap_or_else(|| format!("{type_name}.{row}"));
        let mut feature = Feature::new(id);

        for (i, value) in record.iter().enumerate() {
            if Some(i) != id_col {
                feature.attributes.insert(headers[i].clone(), value.to_string());
            }
        }

        if let (Some(lon), Some(lat)) = (lon_col, lat_col) {
            let coords = record
                .get(lon)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .zip(record.get(lat).and_then(|v| v.trim().parse::<f64>().ok()));
            match coords {
                Some((x, y)) => feature.geometry = Some(Point::new(x, y).into()),
                None => debug!(row, "Row has no usable coordinates"),
            }
        }
        features.push(feature);
    }

    let schema = headers.into_iter().filter(|h| h != "id").collect();
    Ok((schema, features))
}
