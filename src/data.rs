//! Readers for vector geometry sources: zipped shapefiles, bare shapefiles and
//! GeoJSON feature collections.

use crate::error::{PlotError, Result};
use crate::types::RegionRecord;
use geo::MultiPolygon;
use shapefile::dbase::FieldValue;
use shapefile::Reader;
use std::convert::TryInto;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Reads every polygonal feature of `path`, keeping the attribute `columns`.
///
/// The format is picked from the file extension. Zip archives are extracted
/// next to the archive on first use.
pub fn read_source(path: &Path, columns: &[String]) -> Result<Vec<RegionRecord>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .ok_or_else(|| {
            PlotError::GeometrySource(format!("Geometry source has no extension: {:?}", path))
        })?;

    let records = match extension.as_str() {
        "zip" => {
            let shp = extract_shapefile(path)?;
            read_shapefile(&shp, columns)?
        }
        "shp" => read_shapefile(path, columns)?,
        "json" | "geojson" => read_geojson(path, columns)?,
        _ => {
            return Err(PlotError::GeometrySource(format!(
                "Unsupported geometry format: {}",
                extension
            )))
        }
    };

    info!(path = ?path, features = records.len(), "Loaded geometry source");
    Ok(records)
}

/// Extracts `archive` into a sibling directory named after its stem and
/// returns the first `.shp` inside. Already-extracted archives are reused.
pub fn extract_shapefile(archive: &Path) -> Result<PathBuf> {
    let stem = archive
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| PlotError::GeometrySource(format!("Bad archive name: {:?}", archive)))?;
    let target_dir = archive.with_file_name(stem);

    if let Some(shp) = find_shapefile(&target_dir)? {
        debug!(path = ?shp, "Using previously extracted shapefile");
        return Ok(shp);
    }

    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| {
        PlotError::GeometrySource(format!("Failed to open archive {:?}: {}", archive, e))
    })?;

    fs::create_dir_all(&target_dir)?;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| {
            PlotError::GeometrySource(format!("Corrupt archive {:?}: {}", archive, e))
        })?;
        if entry.is_dir() {
            continue;
        }
        // Flatten: Natural Earth archives keep everything at the top level anyway.
        let name = match entry.enclosed_name() {
            Some(p) => p.to_path_buf(),
            None => continue,
        };
        let Some(file_name) = name.file_name() else {
            continue;
        };
        let mut out = File::create(target_dir.join(file_name))?;
        io::copy(&mut entry, &mut out)?;
    }

    find_shapefile(&target_dir)?.ok_or_else(|| {
        PlotError::GeometrySource(format!("No .shp file inside archive {:?}", archive))
    })
}

fn find_shapefile(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("shp"))
                .unwrap_or(false)
        })
        .collect();
    candidates.sort();
    Ok(candidates.into_iter().next())
}

pub fn read_shapefile(path: &Path, columns: &[String]) -> Result<Vec<RegionRecord>> {
    let mut reader = Reader::from_path(path).map_err(|e| {
        PlotError::GeometrySource(format!("Failed to open Shapefile {:?}: {}", path, e))
    })?;

    let mut records = Vec::new();

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result.map_err(|e| {
            PlotError::GeometrySource(format!("Failed to read Shapefile {:?}: {}", path, e))
        })?;

        let geometry: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon.try_into().map_err(|e| {
                PlotError::GeometrySource(format!("Failed to convert polygon: {:?}", e))
            })?,
            shapefile::Shape::PolygonM(polygon) => polygon.try_into().map_err(|e| {
                PlotError::GeometrySource(format!("Failed to convert polygonM: {:?}", e))
            })?,
            shapefile::Shape::PolygonZ(polygon) => polygon.try_into().map_err(|e| {
                PlotError::GeometrySource(format!("Failed to convert polygonZ: {:?}", e))
            })?,
            _ => continue,
        };

        let mut region = RegionRecord::new(geometry);
        for column in columns {
            let value = [column.clone(), column.to_lowercase(), column.to_uppercase()]
                .iter()
                .find_map(|c| record.get(c))
                .and_then(field_to_string);
            if let Some(value) = value {
                region.set_attribute(column, value);
            }
        }
        records.push(region);
    }

    Ok(records)
}

fn field_to_string(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Character(Some(s)) => Some(s.trim().to_string()),
        FieldValue::Memo(s) => Some(s.trim().to_string()),
        FieldValue::Numeric(Some(n)) => Some(n.to_string()),
        FieldValue::Float(Some(f)) => Some(f.to_string()),
        FieldValue::Integer(i) => Some(i.to_string()),
        FieldValue::Double(d) => Some(d.to_string()),
        _ => None,
    }
}

pub fn read_geojson(path: &Path, columns: &[String]) -> Result<Vec<RegionRecord>> {
    let file = File::open(path)?;
    read_geojson_from(BufReader::new(file), columns)
        .map_err(|e| PlotError::GeometrySource(format!("{:?}: {}", path, e)))
}

/// Parses a GeoJSON `FeatureCollection`. Non-polygonal features are skipped.
pub fn read_geojson_from<R: io::Read>(
    reader: R,
    columns: &[String],
) -> std::result::Result<Vec<RegionRecord>, String> {
    use geojson::GeoJson;

    let geojson =
        GeoJson::from_reader(reader).map_err(|e| format!("Failed to parse GeoJSON: {}", e))?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err("GeoJSON must be a FeatureCollection".to_string()),
    };

    let mut records = Vec::new();

    for feature in collection.features {
        let geometry = match feature.geometry {
            Some(geo) => {
                let valid_geo: geo::Geometry<f64> = geo
                    .value
                    .try_into()
                    .map_err(|e| format!("Failed to convert geojson geometry: {:?}", e))?;

                match valid_geo {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => continue,
                }
            }
            None => continue,
        };

        let mut region = RegionRecord::new(geometry);
        if let Some(props) = feature.properties.as_ref() {
            for column in columns {
                let value = props
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(column))
                    .map(|(_, v)| v);
                match value {
                    Some(serde_json::Value::String(s)) => region.set_attribute(column, s.trim()),
                    Some(serde_json::Value::Number(n)) => region.set_attribute(column, n.to_string()),
                    _ => {}
                }
            }
        }
        records.push(region);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn geojson_keeps_polygons_and_requested_columns() {
        let doc = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": { "NAME": "Square", "postal": "SQ", "pop": 12, "ignored": "x" },
                    "geometry": { "type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]] }
                },
                {
                    "type": "Feature",
                    "properties": { "NAME": "Dot" },
                    "geometry": { "type": "Point", "coordinates": [5.0, 5.0] }
                },
                {
                    "type": "Feature",
                    "properties": { "NAME": "Nothing" },
                    "geometry": null
                }
            ]
        })
        .to_string();

        let records =
            read_geojson_from(doc.as_bytes(), &columns(&["name", "postal", "pop"])).unwrap();
        assert_eq!(records.len(), 1);
        let square = &records[0];
        assert_eq!(square.attribute("name"), Some("Square"));
        assert_eq!(square.attribute("postal"), Some("SQ"));
        assert_eq!(square.attribute("pop"), Some("12"));
        assert!(!square.has_attribute("ignored"));
        assert_eq!(square.geometry.0.len(), 1);
    }

    #[test]
    fn geojson_must_be_a_feature_collection() {
        let doc = json!({ "type": "Point", "coordinates": [0.0, 0.0] }).to_string();
        let err = read_geojson_from(doc.as_bytes(), &[]).unwrap_err();
        assert!(err.contains("FeatureCollection"));
    }

    /// Writes a one-feature polygon shapefile and zips its parts into `archive`.
    fn write_zipped_shapefile(archive: &Path) {
        use shapefile::dbase::{FieldName, Record, TableWriterBuilder};
        use shapefile::{Point, Polygon, PolygonRing};
        use std::io::Write;

        let parts = archive.parent().unwrap().join("parts");
        fs::create_dir_all(&parts).unwrap();
        let shp = parts.join("ne_test_admin_1.shp");
        {
            let table = TableWriterBuilder::new()
                .add_character_field(FieldName::try_from("name").unwrap(), 32)
                .add_character_field(FieldName::try_from("postal").unwrap(), 4);
            let mut writer = shapefile::Writer::from_path(&shp, table).unwrap();
            let ring = vec![
                Point::new(-120.0, 35.0),
                Point::new(-120.0, 42.0),
                Point::new(-114.0, 42.0),
                Point::new(-114.0, 35.0),
                Point::new(-120.0, 35.0),
            ];
            let polygon = Polygon::new(PolygonRing::Outer(ring));
            let mut record = Record::default();
            record.insert("name".to_string(), FieldValue::Character(Some("Nevada".to_string())));
            record.insert("postal".to_string(), FieldValue::Character(Some("NV".to_string())));
            writer.write_shape_and_record(&polygon, &record).unwrap();
        }

        let mut zip = zip::ZipWriter::new(File::create(archive).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        for ext in ["shp", "shx", "dbf"] {
            zip.start_file(format!("ne_test_admin_1.{}", ext), options).unwrap();
            zip.write_all(&fs::read(shp.with_extension(ext)).unwrap()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn zipped_shapefile_is_extracted_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("ne_test_admin_1.zip");
        write_zipped_shapefile(&archive);

        let records = read_source(&archive, &columns(&["name", "postal"])).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attribute("name"), Some("Nevada"));
        assert_eq!(records[0].attribute("postal"), Some("NV"));
        let bounds = geo::BoundingRect::bounding_rect(&records[0].geometry).unwrap();
        assert_eq!(bounds.min().x, -120.0);
        assert_eq!(bounds.max().y, 42.0);

        let extracted = dir.path().join("ne_test_admin_1");
        assert!(extracted.join("ne_test_admin_1.shp").is_file());

        // The archive is no longer needed once extracted.
        fs::remove_file(&archive).unwrap();
        assert_eq!(
            extract_shapefile(&archive).unwrap(),
            extracted.join("ne_test_admin_1.shp")
        );
        let again = read_source(&archive, &columns(&["postal"])).unwrap();
        assert_eq!(again[0].attribute("postal"), Some("NV"));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = read_source(Path::new("regions.kml"), &[]).unwrap_err();
        assert!(matches!(err, PlotError::GeometrySource(_)));
    }
}
