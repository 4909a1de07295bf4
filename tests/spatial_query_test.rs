//! Spatial queries: NEARBY ordering and distances, WITHIN/INTERSECTS,
//! SPARSE sampling, cursors, and the TEST predicate command.

mod common;

use common::{TestServer, bulk, error_of, reply_ids, reply_items};
use fleetmap::geom;
use fleetmap::resp::Value;
use geo::Point;

#[test]
fn nearby_knn_with_distances() {
    let ts = TestServer::new();
    ts.exec(&["SET", "mykey", "1", "POINT", "5", "5"]);
    ts.exec(&["SET", "mykey", "2", "POINT", "19", "19"]);
    ts.exec(&["SET", "mykey", "3", "POINT", "12", "19"]);
    ts.exec(&["SET", "mykey", "4", "POINT", "-5", "5"]);
    ts.exec(&["SET", "mykey", "5", "POINT", "33", "21"]);

    let reply = ts.exec(&[
        "NEARBY", "mykey", "LIMIT", "10", "DISTANCE", "POINTS", "POINT", "20", "20",
    ]);
    assert_eq!(reply_ids(&reply), vec!["2", "3", "5", "1", "4"]);

    let target = Point::new(20.0, 20.0);
    let expected = [
        (19.0, 19.0),
        (19.0, 12.0),
        (21.0, 33.0),
        (5.0, 5.0),
        (5.0, -5.0),
    ];
    let items = reply_items(&reply);
    let mut last = 0.0;
    for (item, (lat, lon)) in items.iter().zip(expected) {
        let Value::Array(parts) = item else {
            panic!("unexpected item {item:?}");
        };
        // [id, [lat lon], dist]
        let dist: f64 = bulk(&parts[2]).parse().unwrap();
        let independent = geom::geodesic_distance(target, Point::new(lon, lat));
        assert!(
            (dist - independent).abs() < 0.01,
            "distance off: {dist} vs {independent}"
        );
        assert!(dist >= last, "distances must be non-decreasing");
        last = dist;
    }
}

#[test]
fn nearby_radius_and_empty_area() {
    let ts = TestServer::new();
    ts.exec(&["SET", "mykey", "near", "POINT", "20.01", "20.01"]);
    ts.exec(&["SET", "mykey", "far", "POINT", "45", "45"]);

    let reply = ts.exec(&["NEARBY", "mykey", "IDS", "POINT", "20", "20", "10000"]);
    assert_eq!(reply_ids(&reply), vec!["near"]);

    // no candidates inside the circle at all
    let reply = ts.exec(&["NEARBY", "mykey", "IDS", "POINT", "-60", "-60", "1000"]);
    assert!(reply_ids(&reply).is_empty());

    // unknown key is an empty result, not an error
    let reply = ts.exec(&["NEARBY", "ghost", "IDS", "POINT", "0", "0"]);
    assert!(reply_ids(&reply).is_empty());
}

#[test]
fn within_and_intersects() {
    let ts = TestServer::new();
    ts.exec(&["SET", "fleet", "inside", "POINT", "5", "5"]);
    ts.exec(&["SET", "fleet", "edge", "POINT", "10", "10"]);
    ts.exec(&["SET", "fleet", "outside", "POINT", "25", "25"]);
    ts.exec(&[
        "SET",
        "fleet",
        "straddle",
        "OBJECT",
        r#"{"type":"Polygon","coordinates":[[[8,8],[12,8],[12,12],[8,12],[8,8]]]}"#,
    ]);

    let within = ts.exec(&["WITHIN", "fleet", "IDS", "BOUNDS", "0", "0", "10", "10"]);
    let mut ids = reply_ids(&within);
    ids.sort();
    assert_eq!(ids, vec!["edge", "inside"]);

    let intersects = ts.exec(&["INTERSECTS", "fleet", "IDS", "BOUNDS", "0", "0", "10", "10"]);
    let mut ids = reply_ids(&intersects);
    ids.sort();
    assert_eq!(ids, vec!["edge", "inside", "straddle"]);
}

#[test]
fn within_circle_uses_meters() {
    let ts = TestServer::new();
    ts.exec(&["SET", "fleet", "a", "POINT", "33", "-115"]);
    let near = geom::geodesic_destination(Point::new(-115.0, 33.0), 90.0, 900.0);
    ts.exec(&[
        "SET",
        "fleet",
        "b",
        "POINT",
        &near.y().to_string(),
        &near.x().to_string(),
    ]);
    let far = geom::geodesic_destination(Point::new(-115.0, 33.0), 90.0, 1500.0);
    ts.exec(&[
        "SET",
        "fleet",
        "c",
        "POINT",
        &far.y().to_string(),
        &far.x().to_string(),
    ]);

    let reply = ts.exec(&["WITHIN", "fleet", "IDS", "CIRCLE", "33", "-115", "1000"]);
    let mut ids = reply_ids(&reply);
    ids.sort();
    assert_eq!(ids, vec!["a", "b"]);
}

#[test]
fn sector_rejects_equal_bearings() {
    let ts = TestServer::new();
    ts.exec(&["SET", "fleet", "a", "POINT", "33", "-115"]);
    assert_eq!(
        error_of(&ts.exec(&[
            "WITHIN", "fleet", "IDS", "SECTOR", "33", "-115", "1000", "45", "45",
        ])),
        "equal bearings (45 == 45), use CIRCLE instead"
    );
    // a proper sector works
    let reply = ts.exec(&[
        "WITHIN", "fleet", "IDS", "SECTOR", "32.99", "-115.01", "5000", "0", "90",
    ]);
    assert_eq!(reply_ids(&reply), vec!["a"]);
}

#[test]
fn tile_quadkey_hash_areas_agree() {
    let ts = TestServer::new();
    // center of geohash 9my5xp7
    ts.exec(&["SET", "fleet", "a", "HASH", "9my5xp7"]);
    let via_hash = ts.exec(&["INTERSECTS", "fleet", "IDS", "HASH", "9my5xp7"]);
    assert_eq!(reply_ids(&via_hash), vec!["a"]);

    let via_world = ts.exec(&["INTERSECTS", "fleet", "IDS", "TILE", "0", "0", "0"]);
    assert_eq!(reply_ids(&via_world), vec!["a"]);
}

#[test]
fn sparse_caps_output() {
    let ts = TestServer::new();
    for i in 0..15 {
        for j in 0..15 {
            ts.exec(&[
                "SET",
                "grid",
                &format!("p{i}x{j}"),
                "POINT",
                &(i as f64 * 0.6).to_string(),
                &(j as f64 * 0.6).to_string(),
            ]);
        }
    }
    let reply = ts.exec(&[
        "WITHIN", "grid", "SPARSE", "2", "IDS", "BOUNDS", "0", "0", "9", "9",
    ]);
    let ids = reply_ids(&reply);
    assert!(!ids.is_empty());
    assert!(ids.len() <= 16, "sparse 2 emitted {}", ids.len());
}

#[test]
fn cursor_pagination_is_stateless() {
    let ts = TestServer::new();
    for i in 0..10 {
        ts.exec(&["SET", "fleet", &format!("id{i:02}"), "POINT", "1", "1"]);
    }
    let first = ts.exec(&["SCAN", "fleet", "LIMIT", "4", "IDS"]);
    assert_eq!(reply_ids(&first), vec!["id00", "id01", "id02", "id03"]);
    let cursor = match &first {
        Value::Array(parts) => match parts[0] {
            Value::Int(c) => c.to_string(),
            _ => panic!("no cursor"),
        },
        _ => panic!("bad reply"),
    };
    assert_eq!(cursor, "4");

    let second = ts.exec(&["SCAN", "fleet", "CURSOR", &cursor, "LIMIT", "4", "IDS"]);
    assert_eq!(reply_ids(&second), vec!["id04", "id05", "id06", "id07"]);

    // cursor past the end is an empty result
    let done = ts.exec(&["SCAN", "fleet", "CURSOR", "50", "IDS"]);
    assert!(reply_ids(&done).is_empty());
}

#[test]
fn scan_filters() {
    let ts = TestServer::new();
    ts.exec(&["SET", "fleet", "truck1", "FIELD", "speed", "50", "POINT", "1", "1"]);
    ts.exec(&["SET", "fleet", "truck2", "FIELD", "speed", "80", "POINT", "2", "2"]);
    ts.exec(&["SET", "fleet", "car1", "FIELD", "speed", "90", "POINT", "3", "3"]);

    let fast = ts.exec(&["SCAN", "fleet", "WHERE", "speed", "60", "+inf", "IDS"]);
    let mut ids = reply_ids(&fast);
    ids.sort();
    assert_eq!(ids, vec!["car1", "truck2"]);

    let fast_trucks = ts.exec(&[
        "SCAN", "fleet", "MATCH", "truck*", "WHERE", "speed>60", "IDS",
    ]);
    assert_eq!(reply_ids(&fast_trucks), vec!["truck2"]);

    let chosen = ts.exec(&["SCAN", "fleet", "WHEREIN", "speed", "2", "50", "90", "IDS"]);
    let mut ids = reply_ids(&chosen);
    ids.sort();
    assert_eq!(ids, vec!["car1", "truck1"]);

    let count = ts.exec(&["SCAN", "fleet", "COUNT"]);
    match count {
        Value::Array(parts) => assert_eq!(parts[1], Value::Int(3)),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn search_walks_value_index() {
    let ts = TestServer::new();
    ts.exec(&["SET", "notes", "n3", "STRING", "apple"]);
    ts.exec(&["SET", "notes", "n1", "STRING", "cherry"]);
    ts.exec(&["SET", "notes", "n2", "STRING", "banana"]);
    ts.exec(&["SET", "notes", "p1", "POINT", "1", "1"]);

    let reply = ts.exec(&["SEARCH", "notes"]);
    let items = reply_items(&reply);
    let values: Vec<String> = items
        .iter()
        .map(|item| match item {
            Value::Array(parts) => bulk(&parts[1]),
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(values, vec!["apple", "banana", "cherry"]);

    let desc = ts.exec(&["SEARCH", "notes", "DESC", "IDS"]);
    assert_eq!(reply_ids(&desc), vec!["n1", "n2", "n3"]);

    let matched = ts.exec(&["SEARCH", "notes", "MATCH", "n2", "IDS"]);
    assert_eq!(reply_ids(&matched), vec!["n2"]);
}

#[test]
fn test_command_boolean_arithmetic() {
    let ts = TestServer::new();
    let inside = ["POINT", "5", "5", "WITHIN", "BOUNDS", "0", "0", "10", "10"];
    let outside = ["POINT", "50", "5", "WITHIN", "BOUNDS", "0", "0", "10", "10"];

    let mut cmd = vec!["TEST"];
    cmd.extend_from_slice(&inside);
    assert_eq!(ts.exec(&cmd), Value::Int(1));

    let mut cmd = vec!["TEST", "NOT"];
    cmd.extend_from_slice(&outside);
    assert_eq!(ts.exec(&cmd), Value::Int(1));

    let mut cmd = vec!["TEST", "("];
    cmd.extend_from_slice(&inside);
    cmd.push(")");
    cmd.push("AND");
    cmd.push("NOT");
    cmd.extend_from_slice(&outside);
    assert_eq!(ts.exec(&cmd), Value::Int(1));

    let mut cmd = vec!["TEST"];
    cmd.extend_from_slice(&outside);
    cmd.push("OR");
    cmd.extend_from_slice(&inside);
    assert_eq!(ts.exec(&cmd), Value::Int(1));

    let mut cmd = vec!["TEST"];
    cmd.extend_from_slice(&outside);
    cmd.push("AND");
    cmd.extend_from_slice(&inside);
    assert_eq!(ts.exec(&cmd), Value::Int(0));

    // stored objects as areas
    ts.exec(&["SET", "areas", "zone", "BOUNDS", "0", "0", "10", "10"]);
    assert_eq!(
        ts.exec(&["TEST", "POINT", "5", "5", "WITHIN", "GET", "areas", "zone"]),
        Value::Int(1)
    );
}

#[test]
fn clip_trims_intersecting_geometry() {
    let ts = TestServer::new();
    ts.exec(&["SET", "fleet", "box", "BOUNDS", "5", "5", "15", "15"]);
    let reply = ts.exec(&[
        "INTERSECTS", "fleet", "CLIP", "BOUNDS", "0", "0", "10", "10",
    ]);
    let items = reply_items(&reply);
    assert_eq!(items.len(), 1);
    let Value::Array(parts) = &items[0] else {
        panic!("unexpected item");
    };
    let body: serde_json::Value = serde_json::from_str(&bulk(&parts[1])).unwrap();
    // the clipped polygon stays inside the query window
    for corner in body["coordinates"][0].as_array().unwrap() {
        let x = corner[0].as_f64().unwrap();
        let y = corner[1].as_f64().unwrap();
        assert!((5.0..=10.0).contains(&x));
        assert!((5.0..=10.0).contains(&y));
    }
}
