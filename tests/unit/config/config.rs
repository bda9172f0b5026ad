use std::collections::HashMap;

use super::*;

fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |k| map.get(k).cloned()
}

#[test]
fn defaults_are_valid() {
    let cfg = Config::default();
    cfg.validate().unwrap();
    assert_eq!(cfg.timing().unwrap(), LegTiming::FixedSeconds(5));
    assert_eq!(cfg.tile_layer().unwrap().name, "osm");
    assert!(cfg.user_agent.starts_with("tripreel/"));
    assert_eq!(cfg.http_timeout(), Duration::from_secs(15));
}

#[test]
fn json_fills_missing_fields_with_defaults() {
    let cfg: Config =
        serde_json::from_str(r#"{"seconds_per_km": 0.25, "tile_layer": "carto-dark"}"#).unwrap();
    assert_eq!(cfg.timing().unwrap(), LegTiming::SecondsPerKm(0.25));
    assert_eq!(cfg.width, 1280);
    cfg.validate().unwrap();

    assert!(serde_json::from_str::<Config>(r#"{"colour": "red"}"#).is_err());
}

#[test]
fn from_path_reads_json() {
    let path = std::env::temp_dir().join(format!("tripreel-config-{}.json", std::process::id()));
    std::fs::write(&path, r#"{"capture_rate": 24, "resume_policy": "restart-leg"}"#).unwrap();
    let cfg = Config::from_path(&path).unwrap();
    assert_eq!(cfg.capture_rate, 24);
    assert_eq!(cfg.resume_policy, ResumePolicy::RestartLeg);
    let _ = std::fs::remove_file(&path);

    assert!(matches!(
        Config::from_path(Path::new("/definitely/not/here.json")),
        Err(TripError::Input(_))
    ));
}

#[test]
fn variables_override_fields() {
    let mut cfg = Config::default();
    cfg.apply_vars(vars(&[
        ("GEOCODER_URL", "http://localhost:8080"),
        ("CAPTURE_RATE", "25"),
        ("SECONDS_PER_KM", "0.1"),
        ("RESUME_POLICY", "restart"),
        ("LABELS", "off"),
        ("WIDTH", "640"),
    ]))
    .unwrap();
    assert_eq!(cfg.geocoder_url, "http://localhost:8080");
    assert_eq!(cfg.capture_rate, 25);
    assert_eq!(cfg.seconds_per_km, Some(0.1));
    assert_eq!(cfg.resume_policy, ResumePolicy::RestartLeg);
    assert!(!cfg.labels);
    assert_eq!(cfg.width, 640);
}

#[test]
fn bad_variables_are_validation_errors() {
    for (k, v) in [
        ("CAPTURE_RATE", "fast"),
        ("LABELS", "maybe"),
        ("RESUME_POLICY", "skip"),
    ] {
        let mut cfg = Config::default();
        let err = cfg.apply_vars(vars(&[(k, v)])).unwrap_err();
        assert!(matches!(err, TripError::Validation(_)), "{k}");
        assert!(err.to_string().contains(k));
    }
}

#[test]
fn validate_rejects_bad_values() {
    let odd = Config {
        width: 641,
        ..Config::default()
    };
    assert!(odd.validate().is_err());

    let long = Config {
        leg_duration_secs: 601,
        ..Config::default()
    };
    assert!(long.validate().is_err());

    let negative = Config {
        seconds_per_km: Some(-1.0),
        ..Config::default()
    };
    assert!(negative.validate().is_err());

    let layer = Config {
        tile_layer: "watercolor".to_string(),
        ..Config::default()
    };
    assert!(layer.validate().is_err());

    let still = Config {
        capture_rate: 0,
        ..Config::default()
    };
    assert!(still.validate().is_err());
}
