use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_boletind");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn boletind");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn result_of(value: serde_json::Value) -> serde_json::Value {
    assert_eq!(value["ok"], json!(true), "request failed: {}", value);
    value["result"].clone()
}

fn select(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> serde_json::Value {
    result_of(request(
        stdin,
        reader,
        "select",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    ))
}

#[test]
fn normalize_and_compare_names() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let ed = result_of(request(
        &mut stdin,
        &mut reader,
        "1",
        "subjects.normalize",
        json!({ "name": "ed. fisica" }),
    ));
    assert_eq!(ed["normalized"], json!("EDUCACIÓN FÍSICA"));
    assert_eq!(ed["folded"], json!("EDUCACION FISICA"));

    let garbled = result_of(request(
        &mut stdin,
        &mut reader,
        "2",
        "subjects.normalize",
        json!({ "name": "  MatemÃ¡tica  " }),
    ));
    assert_eq!(garbled["normalized"], json!("MATEMÁTICA"));

    let blank = result_of(request(
        &mut stdin,
        &mut reader,
        "3",
        "subjects.normalize",
        json!({ "name": "   " }),
    ));
    assert_eq!(blank["normalized"], json!(""));

    let same = result_of(request(
        &mut stdin,
        &mut reader,
        "4",
        "subjects.equivalent",
        json!({ "a": "Ingles", "b": "Inglés" }),
    ));
    assert_eq!(same["equivalent"], json!(true));
    assert_eq!(same["stage"], json!("exact"));

    let abbreviated = result_of(request(
        &mut stdin,
        &mut reader,
        "5",
        "subjects.equivalent",
        json!({ "a": "Lab. de Mediciones Elec.", "b": "Laboratorio de Mediciones Eléctricas" }),
    ));
    assert_eq!(abbreviated["equivalent"], json!(true));

    let different = result_of(request(
        &mut stdin,
        &mut reader,
        "6",
        "subjects.equivalent",
        json!({ "a": "Historia", "b": "Inglés" }),
    ));
    assert_eq!(different["equivalent"], json!(false));
    assert_eq!(different["stage"], json!(null));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn resolve_against_cohort_tables_and_explicit_candidates() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let machines = result_of(request(
        &mut stdin,
        &mut reader,
        "1",
        "subjects.resolve",
        json!({ "name": "Máquinas Eléctricas", "cohortYear": 7 }),
    ));
    assert_eq!(machines["canonical"], json!("MÁQUINAS ELÉCTRICAS"));
    assert_eq!(machines["index"], json!(4));
    assert_eq!(machines["stage"], json!("exact"));

    let explicit = result_of(request(
        &mut stdin,
        &mut reader,
        "2",
        "subjects.resolve",
        json!({ "name": "historia", "candidates": ["Geografía", "HISTORIA"] }),
    ));
    assert_eq!(explicit["canonical"], json!("HISTORIA"));
    assert_eq!(explicit["index"], json!(1));

    let unknown = result_of(request(
        &mut stdin,
        &mut reader,
        "3",
        "subjects.resolve",
        json!({ "name": "Astronomía", "cohortYear": 2 }),
    ));
    assert_eq!(unknown["canonical"], json!(null));

    let order = result_of(request(
        &mut stdin,
        &mut reader,
        "4",
        "subjects.order",
        json!({ "cohortYear": 3 }),
    ));
    assert_eq!(order["configured"], json!(true));
    assert_eq!(order["entries"][10], json!("PROCEDIMIENTOS TÉCNICOS"));

    let missing = result_of(request(
        &mut stdin,
        &mut reader,
        "5",
        "subjects.order",
        json!({ "cohortYear": 9 }),
    ));
    assert_eq!(missing["configured"], json!(false));
    assert_eq!(missing["entries"], json!([]));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn workspace_catalog_overrides_cohort_order() {
    let workspace = temp_dir("boletind-catalog-override");
    std::fs::write(
        workspace.join("catalog.json"),
        serde_json::to_string(&json!({
            "cohortOrder": { "9": ["TALLER INTEGRADOR", "MATEMÁTICA"] },
            "substringMinLen": 6
        }))
        .expect("catalog json"),
    )
    .expect("write catalog");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let selected = select(&mut stdin, &mut reader, &workspace);
    assert_eq!(selected["catalog"], json!("workspace"));
    assert_eq!(selected["catalogWarning"], json!(null));

    let order = result_of(request(
        &mut stdin,
        &mut reader,
        "1",
        "subjects.order",
        json!({ "cohortYear": 9 }),
    ));
    assert_eq!(order["entries"], json!(["TALLER INTEGRADOR", "MATEMÁTICA"]));

    // Built-in years survive a per-year override.
    let year2 = result_of(request(
        &mut stdin,
        &mut reader,
        "2",
        "subjects.order",
        json!({ "cohortYear": 2 }),
    ));
    assert_eq!(year2["configured"], json!(true));
    assert_eq!(year2["configuredYears"], json!([1, 2, 3, 4, 5, 6, 7, 9]));

    result_of(request(
        &mut stdin,
        &mut reader,
        "3",
        "records.import",
        json!({
            "students": [{ "id": "s9", "displayName": "Ruiz, Tomás", "cohortYear": 9 }],
            "subjects": [
                { "id": "a", "rawLabel": "Matematica", "cohortYear": 9 },
                { "id": "b", "rawLabel": "Taller Integrador", "cohortYear": 9 }
            ],
            "grades": [
                { "studentId": "s9", "subjectId": "a", "firstTerm": 7 },
                { "studentId": "s9", "subjectId": "b", "firstTerm": 8 }
            ]
        }),
    ));
    let card = result_of(request(
        &mut stdin,
        &mut reader,
        "4",
        "reports.reportCard",
        json!({ "studentId": "s9" }),
    ));
    let names: Vec<&str> = card["rows"]
        .as_array()
        .expect("rows")
        .iter()
        .map(|r| r["displayName"].as_str().expect("displayName"))
        .collect();
    assert_eq!(names, vec!["Taller Integrador", "Matematica"]);
    assert_eq!(card["diagnostics"], json!([]));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn invalid_catalog_falls_back_to_builtin() {
    let workspace = temp_dir("boletind-catalog-invalid");
    std::fs::write(workspace.join("catalog.json"), "{\"rewriteRules\": [{\"pattern\": \"(\", \"canonical\": \"X\"}]}")
        .expect("write catalog");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let selected = select(&mut stdin, &mut reader, &workspace);
    assert_eq!(selected["catalog"], json!("builtin"));
    assert!(selected["catalogWarning"].is_string());

    let missing = result_of(request(
        &mut stdin,
        &mut reader,
        "1",
        "subjects.order",
        json!({ "cohortYear": 9 }),
    ));
    assert_eq!(missing["configured"], json!(false));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
