//! Performance benchmarks for the per-tick hot paths

use ranker::classifier::Classifier;
use ranker::directory::parse_server_list;
use ranker::publisher::rank;
use ranker::schema::{MapCatalog, SchemaSnapshot};
use ranker::scoring::population_score;
use ranker::store::TickTables;
use ranker::vdf;
use shared::{ClassifiedServer, GeoPoint, RawCandidate, ScoredServer, APP_ID, APP_NAME};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

fn schema_document(maps: usize) -> String {
    let mut document = String::from(
        "\"items_game\"\n{\n\"matchmaking_categories\"\n{\n\"core\" { \"valid_match_groups\" { \"MatchGroup_Casual_12v12\" \"1\" } }\n}\n\"maps\"\n{\n\"payload\"\n{\n\"mm_type\" \"core\"\n\"maplist\"\n{\n",
    );
    for i in 0..maps {
        document.push_str(&format!(
            "\"{}\" {{ \"name\" \"pl_bench{}\" \"enabled\" \"1\" }}\n",
            i, i
        ));
    }
    document.push_str("}\n}\n}\n}\n");
    document
}

fn candidate(i: usize) -> RawCandidate {
    RawCandidate {
        addr: format!("203.0.{}.{}:27015", i / 250, i % 250 + 1),
        steamid: format!("{}", 85_568_392_920_000_000u64 + i as u64),
        name: format!("Bench Server #{}", i),
        players: (i % 24) as u32,
        bots: 0,
        max_players: 24,
        map: format!("pl_bench{}", i % 500),
        gametype: "payload,nocrits".to_string(),
        version: "8835751".to_string(),
        appid: APP_ID,
        gamedir: APP_NAME.to_string(),
        product: APP_NAME.to_string(),
    }
}

/// Benchmarks schema document parsing
#[test]
fn benchmark_schema_parse() {
    let document = schema_document(2_000);
    let iterations = 20;
    let start = Instant::now();

    for _ in 0..iterations {
        let parsed = vdf::parse(&document).unwrap();
        assert!(parsed.get("items_game").is_some());
    }

    let duration = start.elapsed();
    println!(
        "Schema parse: {} documents in {:?} ({:.2} ms/doc)",
        iterations,
        duration,
        duration.as_millis() as f64 / iterations as f64
    );

    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks the filter chain over a full directory listing
#[test]
fn benchmark_classification() {
    let items_game = vdf::parse(&schema_document(500))
        .unwrap()
        .get("items_game")
        .cloned()
        .unwrap();
    let catalog = Arc::new(MapCatalog::embedded().unwrap());
    let schema = SchemaSnapshot::build(&items_game, 3, catalog).unwrap();
    let tables = TickTables::default();
    let classifier = Classifier::new(&schema, &tables, 8_835_751);

    let candidates: Vec<RawCandidate> = (0..10_000).map(candidate).collect();
    let start = Instant::now();

    let accepted = candidates
        .iter()
        .filter(|c| classifier.classify((*c).clone()).reason().is_none())
        .count();

    let duration = start.elapsed();
    println!(
        "Classification: {} candidates in {:?} ({:.2} μs/candidate)",
        candidates.len(),
        duration,
        duration.as_micros() as f64 / candidates.len() as f64
    );

    assert_eq!(accepted, candidates.len());
    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks the population curve
#[test]
fn benchmark_population_score() {
    let iterations = 100_000;
    let start = Instant::now();
    let mut total = 0.0;

    for i in 0..iterations {
        let capacity = 18 + (i % 84) as u32;
        total += population_score(i as u32 % capacity, capacity);
    }

    let duration = start.elapsed();
    println!(
        "Population score: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(total.is_finite());
    // Should complete in under 100ms for 100k iterations
    assert!(duration.as_millis() < 100);
}

/// Benchmarks ranking a large tick
#[test]
fn benchmark_rank() {
    let servers: Vec<ScoredServer> = (0..10_000)
        .map(|i| {
            let candidate = candidate(i);
            ScoredServer {
                server: ClassifiedServer {
                    ip: candidate.ip().unwrap(),
                    port: 27015,
                    tags: BTreeSet::new(),
                    gamemode: "payload".to_string(),
                    expected_tag: Some("payload".to_string()),
                    custom_map: false,
                    probe: None,
                    candidate,
                },
                score: (i % 97) as f64 * 0.1,
                point: GeoPoint::new(0.0, 0.0),
                ping_overhead: 1.0,
                name: String::new(),
            }
        })
        .collect();

    let start = Instant::now();
    let ranked = rank(servers);
    let duration = start.elapsed();
    println!("Rank: {} servers in {:?}", ranked.len(), duration);

    assert!(ranked.windows(2).all(|pair| pair[0].score >= pair[1].score));
    // Should complete in under 500ms
    assert!(duration.as_millis() < 500);
}

/// Benchmarks decoding a directory listing
#[test]
fn benchmark_server_list_decode() {
    let servers: Vec<RawCandidate> = (0..5_000).map(candidate).collect();
    let body = serde_json::to_vec(&serde_json::json!({ "response": { "servers": servers } })).unwrap();

    let start = Instant::now();
    let decoded = parse_server_list(&body).unwrap();
    let duration = start.elapsed();
    println!(
        "Server list decode: {} servers ({} bytes) in {:?}",
        decoded.len(),
        body.len(),
        duration
    );

    assert_eq!(decoded.len(), 5_000);
    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}
