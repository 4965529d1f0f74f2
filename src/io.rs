use crate::error::{Result, ScanError};
use crate::feature::BuildingFeature;
use crate::geometry::{LonLat, Polygon};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, Value};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::json;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Input building collection, kept whole so annotations can be merged back
/// without losing the caller's properties or foreign members.
#[derive(Debug, Clone)]
pub struct FeatureDocument {
    collection: FeatureCollection,
}

impl FeatureDocument {
    pub fn from_features(features: Vec<Feature>) -> Self {
        Self {
            collection: FeatureCollection {
                bbox: None,
                features,
                foreign_members: None,
            },
        }
    }

    /// Accepts a FeatureCollection, a single Feature, a bare array, or an
    /// object with a `buildings` array.
    ///
    /// Array entries may be GeoJSON Features, `{index, polygon}` records, or
    /// bare geometry objects. An entry that is none of these is kept without
    /// geometry, so it fails on its own instead of failing the whole document.
    pub fn parse(value: serde_json::Value) -> Result<Self> {
        if let serde_json::Value::Array(entries) = value {
            return Ok(Self::from_features(features_from_entries(entries)));
        }
        if value.get("type").is_none() {
            if let Some(serde_json::Value::Array(entries)) = value.get("buildings") {
                return Ok(Self::from_features(features_from_entries(entries.clone())));
            }
        }
        if value.get("type").and_then(|t| t.as_str()) == Some("FeatureCollection") {
            return collection_from_value(value);
        }
        match GeoJson::from_json_value(value)? {
            GeoJson::FeatureCollection(collection) => Ok(Self { collection }),
            GeoJson::Feature(feature) => Ok(Self::from_features(vec![feature])),
            GeoJson::Geometry(_) => Err(ScanError::UnsupportedInput(
                "bare geometry (expected features)".to_string(),
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.collection.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.features.is_empty()
    }

    pub fn features(&self) -> &[Feature] {
        &self.collection.features
    }

    /// Same document (foreign members kept) with a different feature list.
    pub fn with_features(&self, features: Vec<Feature>) -> Self {
        Self {
            collection: FeatureCollection {
                bbox: None,
                features,
                foreign_members: self.collection.foreign_members.clone(),
            },
        }
    }

    /// One `BuildingFeature` per input feature, in document order.
    pub fn building_features(&self) -> Vec<BuildingFeature> {
        self.collection
            .features
            .iter()
            .enumerate()
            .map(|(position, feature)| {
                let polygon = polygon_from_geometry(feature.geometry.as_ref());
                if polygon.is_empty() {
                    debug!("Feature {} has no polygon geometry", position);
                }
                BuildingFeature::new(feature_index(feature, position), polygon)
            })
            .collect()
    }

    /// Write classification results onto the features they came from.
    ///
    /// `buildings` must be in document order, as returned by the batch.
    pub fn annotate(&mut self, buildings: &[BuildingFeature]) {
        if buildings.len() != self.collection.features.len() {
            warn!(
                "Annotating {} features with {} results",
                self.collection.features.len(),
                buildings.len()
            );
        }
        for (feature, building) in self.collection.features.iter_mut().zip(buildings) {
            let properties = feature.properties.get_or_insert_with(JsonObject::new);
            let classification = building.classification().cloned().unwrap_or_default();

            properties.insert("isMarked".into(), json!(classification.is_marked));
            properties.insert(
                "markedPixelCount".into(),
                json!(classification.marked_pixel_count),
            );
            match classification.error {
                Some(error) => properties.insert("error".into(), json!(error)),
                None => properties.remove("error"),
            };
            if let Some(LonLat { lon, lat }) = building.polygon.centroid() {
                properties.insert("centroid".into(), json!([lon, lat]));
            }
        }
    }
}

/// A building given without the GeoJSON Feature wrapper.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BuildingRecord {
    /// `{ "index": 0, "polygon": [[lon, lat], ...] }`
    Outline {
        index: Option<u64>,
        polygon: Vec<[f64; 2]>,
        #[serde(flatten)]
        extra: JsonObject,
    },
    /// A geometry object, `{ "type": "Polygon", "coordinates": ... }`, with
    /// any other members treated as properties.
    Shape {
        index: Option<u64>,
        #[serde(rename = "type")]
        kind: String,
        coordinates: serde_json::Value,
        #[serde(flatten)]
        extra: JsonObject,
    },
}

impl BuildingRecord {
    fn into_feature(self) -> Feature {
        let (index, geometry, mut properties) = match self {
            BuildingRecord::Outline {
                index,
                polygon,
                extra,
            } => {
                let ring = polygon.iter().map(|&[lon, lat]| vec![lon, lat]).collect();
                let geometry = Geometry::new(Value::Polygon(vec![ring]));
                (index, Some(geometry), extra)
            }
            BuildingRecord::Shape {
                index,
                kind,
                coordinates,
                extra,
            } => {
                let value = json!({ "type": kind.as_str(), "coordinates": coordinates });
                let geometry = Geometry::from_json_value(value)
                    .map_err(|e| debug!("Unusable {} record: {}", kind, e))
                    .ok();
                (index, geometry, extra)
            }
        };
        if let Some(index) = index {
            properties.insert("index".into(), json!(index));
        }
        Feature {
            bbox: None,
            geometry,
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }
}

/// Parse one array entry, falling back to a geometry-less feature.
fn feature_from_entry(position: usize, entry: serde_json::Value) -> Feature {
    if entry.get("type").and_then(|t| t.as_str()) == Some("Feature") {
        match Feature::from_json_value(entry.clone()) {
            Ok(feature) => return feature,
            Err(e) => warn!("Entry {}: invalid Feature ({}), geometry dropped", position, e),
        }
    } else {
        match serde_json::from_value::<BuildingRecord>(entry.clone()) {
            Ok(record) => return record.into_feature(),
            Err(e) => warn!("Entry {}: not a building record ({})", position, e),
        }
    }

    let properties = match entry {
        serde_json::Value::Object(mut object) => {
            let keep = object.remove("properties").and_then(|p| match p {
                serde_json::Value::Object(p) => Some(p),
                _ => None,
            });
            let mut properties = keep.unwrap_or_default();
            if let Some(index) = object.get("index").filter(|i| i.is_u64()) {
                properties.insert("index".into(), index.clone());
            }
            properties
        }
        _ => JsonObject::new(),
    };
    Feature {
        bbox: None,
        geometry: None,
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

fn features_from_entries(entries: Vec<serde_json::Value>) -> Vec<Feature> {
    entries
        .into_iter()
        .enumerate()
        .map(|(position, entry)| feature_from_entry(position, entry))
        .collect()
}

/// FeatureCollection whose malformed features become geometry-less entries.
fn collection_from_value(value: serde_json::Value) -> Result<FeatureDocument> {
    let serde_json::Value::Object(mut object) = value else {
        return Err(ScanError::UnsupportedInput("expected an object".to_string()));
    };
    let entries = match object.remove("features") {
        Some(serde_json::Value::Array(entries)) => entries,
        _ => {
            return Err(ScanError::UnsupportedInput(
                "FeatureCollection without a features array".to_string(),
            ))
        }
    };
    object.remove("type");
    object.remove("bbox");
    Ok(FeatureDocument {
        collection: FeatureCollection {
            bbox: None,
            features: features_from_entries(entries),
            foreign_members: (!object.is_empty()).then_some(object),
        },
    })
}

/// Outer ring of a Polygon, or of the first polygon of a MultiPolygon.
fn polygon_from_geometry(geometry: Option<&Geometry>) -> Polygon {
    let ring = match geometry.map(|g| &g.value) {
        Some(Value::Polygon(rings)) => rings.first(),
        Some(Value::MultiPolygon(polygons)) => polygons.first().and_then(|rings| rings.first()),
        _ => None,
    };
    let vertices = ring
        .map(|positions| {
            positions
                .iter()
                .filter_map(|p| match (p.first(), p.get(1)) {
                    (Some(&lon), Some(&lat)) => Some(LonLat::new(lon, lat)),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    Polygon::new(vertices)
}

/// Integer `index` property if present, else the position in the document.
fn feature_index(feature: &Feature, position: usize) -> usize {
    feature
        .property("index")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(position)
}

/// Read an input building collection
pub fn read_feature_document(path: &Path) -> Result<FeatureDocument> {
    info!("Reading buildings: {}", path.display());
    let reader = BufReader::new(File::open(path)?);
    let value: serde_json::Value = serde_json::from_reader(reader)?;
    let document = FeatureDocument::parse(value)?;
    info!("Loaded {} features", document.len());
    Ok(document)
}

/// Write a collection as pretty-printed GeoJSON
pub fn write_feature_document(path: &Path, document: &FeatureDocument) -> Result<()> {
    info!("Writing {} features to {}", document.len(), path.display());
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, &document.collection)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
