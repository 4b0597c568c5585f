//! End-to-end: compiled artifacts executed by SQLite over CSV data
#![cfg(feature = "sqlite-verify")]

use glassbox_model::{
    introspect, parse_number, BinTable, BoundaryRule, Calibration, CalibrationMap, DeclaredTask, FittedAdditiveModel,
    Link, ModelExport, ScoreHead, Task, MODEL_FORMAT_VERSION,
};
use glassbox_sql::verify::{open_connection, run_query, verify, Dataset, DEFAULT_TOLERANCE};
use glassbox_sql::{compile, Dialect, ExportConfig, ExportError, SqlExporter};
use std::io::Write;
use tempfile::{tempdir, NamedTempFile};

const BINARY_EXPORT: &str = r#"{
    "link": "logit",
    "classes": [0, 1],
    "intercept": -0.05,
    "features": [
        {"type": "continuous", "name": "age", "cuts": [30.0, 60.0]},
        {"type": "continuous", "name": "income", "cuts": [50000.0]},
        {"type": "nominal", "name": "sex", "categories": ["female", "male"]}
    ],
    "terms": [
        {"features": [0], "scores": [0.0, 0.1, 0.4, 0.9, 0.0]},
        {"features": [1], "scores": [0.0, -0.2, 0.3, 0.0]},
        {"features": [2], "scores": [0.15, -0.1, 0.2, 0.05]},
        {"features": [0, 2], "scores": [
            0.0, 0.0, 0.0, 0.0,
            0.0, 0.3, -0.3, 0.0,
            0.0, -0.1, 0.1, 0.0,
            0.0, 0.0, 0.25, 0.0,
            0.0, 0.0, 0.0, 0.0
        ]}
    ]
}"#;

const MULTICLASS_EXPORT: &str = r#"{
    "link": "mlogit",
    "classes": ["Bumps", "K_Scatch", "Z_Scratch"],
    "intercept": [0.1, -0.2, 0.3],
    "features": [
        {"type": "continuous", "name": "length", "cuts": [10.0]}
    ],
    "terms": [
        {"features": [0], "scores": [
            0.0, 0.0, 0.0,
            1.0, 2.0, 3.0,
            -1.0, -2.0, -3.0,
            0.0, 0.0, 0.0
        ]}
    ]
}"#;

const DATA: &str = "\
age,income,sex
45,60000,male
30,50000,female
29.999,49999.5,male
60,,female
,120000,other
-3,0,
88,75000,male
";

fn sqlite_config(split: bool) -> ExportConfig {
    ExportConfig {
        split,
        dialect: Dialect::Sqlite,
        ..ExportConfig::default()
    }
}

fn binary_model() -> glassbox_model::FittedAdditiveModel {
    let export: ModelExport = serde_json::from_str(BINARY_EXPORT).unwrap();
    introspect(&export, &DeclaredTask::new(Task::Binary)).unwrap()
}

#[test]
fn test_binary_both_packagings() {
    let model = binary_model();
    let dataset = Dataset::from_reader(DATA.as_bytes()).unwrap();

    for split in [false, true] {
        let config = sqlite_config(split);
        let compilation = compile(&model, None, &config).unwrap();
        let report = verify(
            &model,
            None,
            &compilation.query,
            &config.input_table,
            &dataset,
            DEFAULT_TOLERANCE,
        )
        .unwrap();
        assert_eq!(report.rows_checked, 7);
        assert_eq!(report.values_compared, 7);
    }
}

#[test]
fn test_scenario_values_from_sqlite() {
    let model = binary_model();
    let dataset = Dataset::from_reader("age,income,sex\n45,60000,\n".as_bytes()).unwrap();
    let compilation = compile(&model, None, &sqlite_config(false)).unwrap();

    let mut conn = open_connection().unwrap();
    dataset.load_into(&mut conn, "input_data").unwrap();
    let results = run_query(&conn, &compilation.query).unwrap();

    // raw 0.65 from age and income, plus 0.15 for missing sex
    let p = results[0][0].unwrap();
    let expected = 1.0 / (1.0 + (-0.8f64).exp());
    assert!((p - expected).abs() < 1e-12, "{p} vs {expected}");
}

#[test]
fn test_multiclass_with_calibration() {
    let export: ModelExport = serde_json::from_str(MULTICLASS_EXPORT).unwrap();
    let model = introspect(&export, &DeclaredTask::new(Task::Multiclass)).unwrap();
    let curve = Calibration::Shared(CalibrationMap::linear(vec![0.0, 0.5, 1.0], vec![0.05, 0.6, 0.95]));

    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "id,length").unwrap();
    for (id, v) in ["1", "10", "12.5", "", "-7"].iter().enumerate() {
        writeln!(file, "{id},{v}").unwrap();
    }
    file.flush().unwrap();
    let dataset = Dataset::from_csv_path(file.path()).unwrap();

    for split in [false, true] {
        let config = ExportConfig {
            calibration: Some("isotonic".into()),
            ..sqlite_config(split)
        };
        let compilation = compile(&model, Some(&curve), &config).unwrap();
        assert_eq!(
            compilation.query.columns,
            vec!["probability_Bumps", "probability_K_Scatch", "probability_Z_Scratch"]
        );
        let report = verify(
            &model,
            Some(&curve),
            &compilation.query,
            &config.input_table,
            &dataset,
            DEFAULT_TOLERANCE,
        )
        .unwrap();
        assert_eq!(report.rows_checked, 5);
    }
}

#[test]
fn test_regression_with_custom_table() {
    let export: ModelExport = serde_json::from_str(&BINARY_EXPORT.replace("\"logit\"", "\"identity\"").replace(
        "\"classes\": [0, 1],",
        "",
    ))
    .unwrap();
    let model = introspect(&export, &DeclaredTask::new(Task::Regression)).unwrap();
    let dataset = Dataset::from_reader(DATA.as_bytes()).unwrap();

    let config = ExportConfig {
        input_table: "scoring input".into(),
        stage_prefix: "reg".into(),
        ..sqlite_config(true)
    };
    let compilation = compile(&model, None, &config).unwrap();
    assert!(compilation.query.text.contains("\"reg_scores\""));
    verify(
        &model,
        None,
        &compilation.query,
        &config.input_table,
        &dataset,
        DEFAULT_TOLERANCE,
    )
    .unwrap();
}

#[test]
fn test_numeric_view_agrees_with_reference_parse() {
    let conn = open_connection().unwrap();
    let sql = format!("SELECT {}", Dialect::Sqlite.numeric_view("?1"));

    for text in [
        "45", " 12.5 ", "+5", "-.5", "5.", "007", "1e3", "1E-2", "-2.5e+1", "100", "", " ", "unknown", "inf", "NaN",
        "0x10", "1,000", "12abc", "1-2", "1.2.3", "e5", "1e", ".e5", "5.e3", "--1", "+-1", "1e5.0", "1e2e3", ".", "-",
        "3 kg", "\t7",
    ] {
        let actual: Option<f64> = conn.query_row(&sql, [text], |row| row.get(0)).unwrap();
        match (actual, parse_number(text)) {
            (Some(a), Some(e)) => assert!((a - e).abs() <= 1e-12 * e.abs(), "{text:?}: {a} vs {e}"),
            (a, e) => assert_eq!(a, e, "{text:?}"),
        }
    }

    let number: Option<f64> = conn.query_row(&sql, [45.5f64], |row| row.get(0)).unwrap();
    assert_eq!(number, Some(45.5));
    let integer: Option<f64> = conn.query_row(&sql, [7i64], |row| row.get(0)).unwrap();
    assert_eq!(integer, Some(7.0));
}

#[test]
fn test_text_column_binned_by_value() {
    let model = FittedAdditiveModel {
        version: MODEL_FORMAT_VERSION,
        task: Task::Regression,
        link: Link::Identity,
        classes: vec![],
        features: vec!["age".into()],
        boundary: BoundaryRule::LeftClosed,
        heads: vec![ScoreHead {
            label: None,
            intercept: 0.0,
            mains: vec![BinTable {
                unknown: -1.0,
                ..BinTable::continuous("age", vec![30.0, 60.0], vec![1.0, 2.0, 3.0], 0.5)
            }],
            interactions: vec![],
        }],
    };
    // "unknown" makes the column TEXT, so every cell is stored as text
    let dataset = Dataset::from_reader("id,age\n0,100\n1,unknown\n2,45\n3,\n4, 12 \n5,5.\n".as_bytes()).unwrap();
    assert_eq!(dataset.numeric, vec![true, false]);

    for split in [false, true] {
        let config = sqlite_config(split);
        let compilation = compile(&model, None, &config).unwrap();

        let mut conn = open_connection().unwrap();
        dataset.load_into(&mut conn, &config.input_table).unwrap();
        let results = run_query(&conn, &compilation.query).unwrap();
        let predictions: Vec<Option<f64>> = results.into_iter().map(|r| r[0]).collect();
        assert_eq!(
            predictions,
            vec![Some(3.0), Some(-1.0), Some(2.0), Some(0.5), Some(1.0), Some(1.0)]
        );

        let report = verify(
            &model,
            None,
            &compilation.query,
            &config.input_table,
            &dataset,
            DEFAULT_TOLERANCE,
        )
        .unwrap();
        assert_eq!(report.rows_checked, 6);
    }
}

#[test]
fn test_input_column_shadowing_output_is_reported() {
    let model = binary_model();
    let dataset = Dataset::from_reader("age,income,sex,probability\n45,60000,male,0.5\n".as_bytes()).unwrap();
    let compilation = compile(&model, None, &sqlite_config(false)).unwrap();

    let err = verify(&model, None, &compilation.query, "input_data", &dataset, DEFAULT_TOLERANCE).unwrap_err();
    assert!(matches!(err, ExportError::Verification(ref m) if m.contains("more than once")));
}

#[test]
fn test_rejects_non_sqlite_query() {
    let model = binary_model();
    let dataset = Dataset::from_reader(DATA.as_bytes()).unwrap();
    let compilation = compile(&model, None, &ExportConfig::default()).unwrap();
    let err = verify(&model, None, &compilation.query, "input_data", &dataset, DEFAULT_TOLERANCE).unwrap_err();
    assert!(matches!(err, ExportError::InvalidConfig(_)));
}

#[test]
fn test_detects_mismatch() {
    let model = binary_model();
    let mut drifted = model.clone();
    drifted.heads[0].intercept += 0.5;

    let dataset = Dataset::from_reader(DATA.as_bytes()).unwrap();
    let compilation = compile(&drifted, None, &sqlite_config(false)).unwrap();
    let err = verify(&model, None, &compilation.query, "input_data", &dataset, DEFAULT_TOLERANCE).unwrap_err();
    assert!(matches!(err, ExportError::Verification(_)));
}

#[test]
fn test_exported_artifact_runs() {
    let model = binary_model();
    let dir = tempdir().unwrap();
    let config = sqlite_config(true);

    let path = SqlExporter::new(&config).export(&model, None, dir.path()).unwrap();
    assert!(path.ends_with("model/ebm_in_sql.sql"));

    let dataset = Dataset::from_reader(DATA.as_bytes()).unwrap();
    let mut conn = open_connection().unwrap();
    dataset.load_into(&mut conn, "input_data").unwrap();

    // the whole file runs as one script
    let text = std::fs::read_to_string(&path).unwrap();
    let (setup, last) = text.trim_end().trim_end_matches(';').rsplit_once(";\n").unwrap();
    conn.execute_batch(setup).unwrap();
    let count: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM ({last})"), [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 7);
}
