//! Lenient pack parsing.
//!
//! Envelope problems (bad JSON, missing metadata or id) fail the whole pack;
//! individual hazards, routes or centres that do not fit are skipped.

use serde_json::Value;

use super::{Centre, CentresPack, HazardsPack, PackMetadata, PracticeRoute, RoutesPack};
use crate::error::{SyncError, SyncResult};
use crate::geo::{BoundingBox, GeoPoint, haversine_m};
use crate::hazards::{HazardFeature, Tags};

/// Route start and end must lie this close to their centre.
const ROUTE_CENTRE_MATCH_MAX_M: f64 = 60.0;

fn malformed(msg: impl Into<String>) -> SyncError {
    SyncError::MalformedPayload(msg.into())
}

fn non_blank<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn finite(v: &Value, key: &str) -> Option<f64> {
    v.get(key).and_then(Value::as_f64).filter(|x| x.is_finite())
}

fn parse_metadata(v: Option<&Value>) -> Option<PackMetadata> {
    let v = v?;
    let bbox = v.get("bbox")?;
    Some(PackMetadata {
        version: non_blank(v, "version")?.to_string(),
        generated_at: non_blank(v, "generatedAt")?.to_string(),
        bbox: BoundingBox {
            south: finite(bbox, "south")?,
            west: finite(bbox, "west")?,
            north: finite(bbox, "north")?,
            east: finite(bbox, "east")?,
        },
    })
}

fn parse_tags(v: Option<&Value>) -> Tags {
    let Some(Value::Object(map)) = v else {
        return Tags::new();
    };
    map.iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

fn parse_hazard(v: &Value) -> Option<HazardFeature> {
    let hazard_type = non_blank(v, "type")?.parse().ok()?;
    let id = non_blank(v, "id")?.to_string();
    Some(HazardFeature {
        id,
        hazard_type,
        lat: finite(v, "lat")?,
        lon: finite(v, "lon")?,
        tags: parse_tags(v.get("tags")),
        source: non_blank(v, "source").unwrap_or("pack").to_string(),
        confidence_hint: finite(v, "confidenceHint").unwrap_or(0.5).clamp(0.0, 1.0),
    })
}

pub fn parse_hazards_pack(json: &str) -> SyncResult<HazardsPack> {
    let root: Value = serde_json::from_str(json)?;
    let metadata =
        parse_metadata(root.get("metadata")).ok_or_else(|| malformed("hazards pack metadata"))?;
    let centre_id = non_blank(&root, "centreId")
        .or_else(|| non_blank(&root, "entityId"))
        .ok_or_else(|| malformed("hazards pack centreId"))?
        .to_string();
    let hazards = root
        .get("hazards")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("hazards pack hazards array"))?
        .iter()
        .filter_map(parse_hazard)
        .collect();
    Ok(HazardsPack {
        metadata,
        centre_id,
        hazards,
    })
}

/// Every hazard must sit inside the metadata bbox.
pub fn validate_hazards_pack(pack: &HazardsPack) -> Vec<String> {
    let bbox = &pack.metadata.bbox;
    pack.hazards
        .iter()
        .filter(|h| !bbox.contains(h.point()))
        .map(|h| format!("hazard {} is outside bbox", h.id))
        .collect()
}

fn parse_geometry(v: &Value) -> Vec<GeoPoint> {
    if let Some(points) = v.get("geometry").and_then(Value::as_array) {
        let parsed: Vec<_> = points
            .iter()
            .filter_map(|p| Some(GeoPoint::new(finite(p, "lat")?, finite(p, "lon")?)))
            .collect();
        if !parsed.is_empty() {
            return parsed;
        }
    }
    // GeoJSON order: [lon, lat]
    v.get("coordinates")
        .and_then(Value::as_array)
        .map(|pairs| {
            pairs
                .iter()
                .filter_map(|pair| {
                    let pair = pair.as_array()?;
                    let lon = pair.first()?.as_f64()?;
                    let lat = pair.get(1)?.as_f64()?;
                    let p = GeoPoint::new(lat, lon);
                    p.is_finite().then_some(p)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_route(index: usize, v: &Value) -> Option<PracticeRoute> {
    let id = non_blank(v, "id")?.to_string();
    let geometry = parse_geometry(v);
    let start = *geometry.first()?;
    Some(PracticeRoute {
        id,
        name: non_blank(v, "name")
            .map(str::to_string)
            .unwrap_or_else(|| format!("Route {}", index + 1)),
        distance_m: finite(v, "distanceM").unwrap_or(0.0),
        duration_s: finite(v, "durationS")
            .or_else(|| finite(v, "durationEstS"))
            .unwrap_or(0.0),
        start_lat: finite(v, "startLat").unwrap_or(start.lat),
        start_lon: finite(v, "startLon").unwrap_or(start.lon),
        geometry,
    })
}

pub fn parse_routes_pack(json: &str) -> SyncResult<RoutesPack> {
    let root: Value = serde_json::from_str(json)?;
    let metadata =
        parse_metadata(root.get("metadata")).ok_or_else(|| malformed("routes pack metadata"))?;
    let centre_id = non_blank(&root, "centreId")
        .or_else(|| non_blank(&root, "entityId"))
        .ok_or_else(|| malformed("routes pack centreId"))?
        .to_string();
    let routes = root
        .get("routes")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("routes pack routes array"))?
        .iter()
        .enumerate()
        .filter_map(|(i, v)| parse_route(i, v))
        .collect();
    Ok(RoutesPack {
        metadata,
        centre_id,
        routes,
    })
}

/// Each route has to start and finish at its centre.
pub fn validate_routes_pack(pack: &RoutesPack, centre: &Centre) -> Vec<String> {
    let mut errors = Vec::new();
    for route in &pack.routes {
        let start = GeoPoint::new(route.start_lat, route.start_lon);
        let end = route.geometry.last().copied().unwrap_or(start);
        let start_m = haversine_m(centre.point(), start);
        let end_m = haversine_m(centre.point(), end);
        if start_m > ROUTE_CENTRE_MATCH_MAX_M {
            errors.push(format!("route {} start is {}m from centre", route.id, start_m as i64));
        }
        if end_m > ROUTE_CENTRE_MATCH_MAX_M {
            errors.push(format!("route {} end is {}m from centre", route.id, end_m as i64));
        }
    }
    errors
}

fn parse_centre(v: &Value) -> Option<Centre> {
    let id = non_blank(v, "id")?.to_string();
    let coords = v
        .get("geo")
        .and_then(|g| g.get("coordinates"))
        .and_then(Value::as_array);
    let lat = finite(v, "lat").or_else(|| coords?.get(1)?.as_f64())?;
    let lon = finite(v, "lon")
        .or_else(|| finite(v, "lng"))
        .or_else(|| coords?.first()?.as_f64())?;
    if !(lat.is_finite() && lon.is_finite()) {
        return None;
    }
    let address = non_blank(v, "address").map(str::to_string).unwrap_or_else(|| {
        ["city", "postcode"]
            .iter()
            .filter_map(|k| non_blank(v, k))
            .filter(|s| *s != "UNKNOWN")
            .collect::<Vec<_>>()
            .join(", ")
    });
    Some(Centre {
        id,
        name: non_blank(v, "name").unwrap_or_default().to_string(),
        address,
        lat,
        lon,
    })
}

fn bbox_of(points: impl Iterator<Item = GeoPoint>) -> BoundingBox {
    let mut bbox: Option<BoundingBox> = None;
    for p in points {
        let b = bbox.get_or_insert(BoundingBox {
            south: p.lat,
            west: p.lon,
            north: p.lat,
            east: p.lon,
        });
        b.south = b.south.min(p.lat);
        b.north = b.north.max(p.lat);
        b.west = b.west.min(p.lon);
        b.east = b.east.max(p.lon);
    }
    bbox.unwrap_or(BoundingBox {
        south: 0.0,
        west: 0.0,
        north: 0.0,
        east: 0.0,
    })
}

/// Accepts `{metadata, centres}`, `{data: {items}}` or a bare array.
pub fn parse_centres_pack(json: &str) -> SyncResult<CentresPack> {
    let root: Value = serde_json::from_str(json)?;
    let items = root
        .as_array()
        .or_else(|| root.get("centres").and_then(Value::as_array))
        .or_else(|| {
            root.get("data")
                .and_then(|d| d.get("items"))
                .and_then(Value::as_array)
        })
        .ok_or_else(|| malformed("centres array"))?;
    let centres: Vec<Centre> = items.iter().filter_map(parse_centre).collect();
    let metadata = parse_metadata(root.get("metadata")).unwrap_or_else(|| PackMetadata {
        version: "centres-compat".to_string(),
        generated_at: root
            .get("meta")
            .and_then(|m| non_blank(m, "generatedAt"))
            .unwrap_or_default()
            .to_string(),
        bbox: bbox_of(centres.iter().map(Centre::point)),
    });
    Ok(CentresPack { metadata, centres })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hazards::HazardType;

    const PACK: &str = r#"{
        "metadata": {"version": "hazards-1", "generatedAt": "2024-05-01T10:00:00Z",
                     "bbox": {"south": 51.0, "west": 0.0, "north": 51.1, "east": 0.1}},
        "centreId": "colchester",
        "hazards": [
            {"id": "roundabout:way:1", "type": "ROUNDABOUT", "lat": 51.05, "lon": 0.05,
             "tags": {"junction": "roundabout", "lanes": 2}, "source": "overpass", "confidenceHint": 0.8},
            {"id": "x", "type": "SPEED_BUMP", "lat": 51.05, "lon": 0.05},
            {"id": "", "type": "ROUNDABOUT", "lat": 51.05, "lon": 0.05},
            {"id": "nolat", "type": "ROUNDABOUT", "lon": 0.05}
        ]
    }"#;

    #[test]
    fn test_parse_hazards_pack_skips_bad_entries() {
        let pack = parse_hazards_pack(PACK).unwrap();
        assert_eq!(pack.centre_id, "colchester");
        assert_eq!(pack.hazards.len(), 1);
        let h = &pack.hazards[0];
        assert_eq!(h.hazard_type, HazardType::Roundabout);
        assert_eq!(h.tags.get("lanes").map(String::as_str), Some("2"));
        assert!(validate_hazards_pack(&pack).is_empty());
    }

    #[test]
    fn test_parse_hazards_pack_without_metadata_fails() {
        let err = parse_hazards_pack(r#"{"centreId":"a","hazards":[]}"#).unwrap_err();
        assert!(matches!(err, SyncError::MalformedPayload(_)));
        assert!(matches!(parse_hazards_pack("not json"), Err(SyncError::Json(_))));
    }

    #[test]
    fn test_validate_flags_hazard_outside_bbox() {
        let mut pack = parse_hazards_pack(PACK).unwrap();
        pack.hazards[0].lat = 52.0;
        assert_eq!(validate_hazards_pack(&pack).len(), 1);
    }

    #[test]
    fn test_parse_routes_pack_geojson_coordinates() {
        let json = r#"{
            "metadata": {"version": "routes-1", "generatedAt": "2024-05-01T10:00:00Z",
                         "bbox": {"south": 51.0, "west": 0.0, "north": 51.1, "east": 0.1}},
            "centreId": "colchester",
            "routes": [
                {"id": "r1", "coordinates": [[0.05, 51.05], [0.06, 51.06]]},
                {"id": "r2", "geometry": []}
            ]
        }"#;
        let pack = parse_routes_pack(json).unwrap();
        assert_eq!(pack.routes.len(), 1);
        let route = &pack.routes[0];
        assert_eq!(route.name, "Route 1");
        assert_eq!(route.start_lat, 51.05);
        assert_eq!(route.geometry[1], GeoPoint::new(51.06, 0.06));
    }

    #[test]
    fn test_validate_routes_pack_against_centre() {
        let centre = Centre {
            id: "c".into(),
            name: String::new(),
            address: String::new(),
            lat: 51.05,
            lon: 0.05,
        };
        let pack = RoutesPack {
            metadata: parse_hazards_pack(PACK).unwrap().metadata,
            centre_id: "c".into(),
            routes: vec![PracticeRoute {
                id: "r1".into(),
                name: "Loop".into(),
                geometry: vec![GeoPoint::new(51.05, 0.05), GeoPoint::new(51.06, 0.05)],
                distance_m: 0.0,
                duration_s: 0.0,
                start_lat: 51.05,
                start_lon: 0.05,
            }],
        };
        let errors = validate_routes_pack(&pack, &centre);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("end"));
    }

    #[test]
    fn test_parse_centres_accepts_bare_array_and_geo() {
        let json = r#"[
            {"id": "a", "name": "A", "lat": 51.5, "lon": -0.1},
            {"id": "b", "name": "B", "geo": {"coordinates": [0.9, 51.9]}, "city": "Colchester", "postcode": "UNKNOWN"},
            {"id": "", "lat": 1.0, "lon": 1.0}
        ]"#;
        let pack = parse_centres_pack(json).unwrap();
        assert_eq!(pack.centres.len(), 2);
        assert_eq!(pack.centres[1].lat, 51.9);
        assert_eq!(pack.centres[1].address, "Colchester");
        assert_eq!(pack.metadata.bbox.north, 51.9);
        assert_eq!(pack.metadata.version, "centres-compat");
    }
}
