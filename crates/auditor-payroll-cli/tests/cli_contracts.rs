#![allow(clippy::uninlined_format_args)]

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use calamine::{Reader, Xlsx};
use serde_json::Value;

const AUDIT_HEADER: &str = "assigned_to,visit_id,re_audited,mismatch_found_in_reaudit,Visit Date";

const PAYEE_CSV: &str = "GP GLM Auditor MFS Directory,,,\n\
    Prepared by Finance,,,\n\
    Auditor Name,Full Name,MFS Number,MFS Provider\n\
    Alice,Alice Rahman,1712345678,bKash\n\
    Bob,Bob Karim,01898765432,Nagad\n\
    Zed,Never Audited,1700000000,Rocket\n";

fn payroll_binary_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_payroll"))
}

fn temp_dir() -> tempfile::TempDir {
    match tempfile::tempdir() {
        Ok(value) => value,
        Err(err) => panic!("failed to create temp dir: {err}"),
    }
}

fn write_fixture(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    if let Err(err) = fs::write(&path, body) {
        panic!("failed to write fixture {}: {err}", path.display());
    }
    path
}

fn audit_csv(rows: &[&str]) -> String {
    let mut body = String::from(AUDIT_HEADER);
    body.push('\n');
    for row in rows {
        body.push_str(row);
        body.push('\n');
    }
    body
}

fn payroll_output(args: &[&str]) -> Output {
    match Command::new(payroll_binary_path()).args(args).output() {
        Ok(output) => output,
        Err(err) => panic!("failed to run payroll command {:?}: {err}", args),
    }
}

fn run_report(dir: &Path, audit_body: &str, extra: &[&str]) -> (Output, PathBuf) {
    let audit = write_fixture(dir, "audit.csv", audit_body);
    run_report_with(dir, &audit, extra)
}

fn run_report_with(dir: &Path, audit: &Path, extra: &[&str]) -> (Output, PathBuf) {
    let payees = write_fixture(dir, "mfs.csv", PAYEE_CSV);
    let out_dir = dir.join("out");

    let audit_arg = audit.display().to_string();
    let payees_arg = payees.display().to_string();
    let out_arg = out_dir.display().to_string();
    let mut args = vec![
        "report",
        "--audit",
        audit_arg.as_str(),
        "--payees",
        payees_arg.as_str(),
        "--out-dir",
        out_arg.as_str(),
    ];
    args.extend_from_slice(extra);
    (payroll_output(&args), out_dir)
}

fn read_lines(path: &Path) -> Vec<String> {
    match fs::read_to_string(path) {
        Ok(body) => body.lines().map(ToString::to_string).collect(),
        Err(err) => panic!("failed to read {}: {err}", path.display()),
    }
}

fn workbook_formulas(path: &Path) -> calamine::Range<String> {
    let bytes = match fs::read(path) {
        Ok(value) => value,
        Err(err) => panic!("failed to read workbook {}: {err}", path.display()),
    };
    let mut workbook = match Xlsx::new(Cursor::new(bytes)) {
        Ok(value) => value,
        Err(err) => panic!("failed to open workbook {}: {err}", path.display()),
    };
    let Some(sheet) = workbook.sheet_names().first().cloned() else {
        panic!("workbook {} has no worksheet", path.display());
    };
    match workbook.worksheet_formula(&sheet) {
        Ok(value) => value,
        Err(err) => panic!("failed to read formulas from {}: {err}", path.display()),
    }
}

fn formula_at(formulas: &calamine::Range<String>, row: u32, col: u32) -> &str {
    formulas.get_value((row, col)).map_or("", String::as_str)
}

fn stdout_json(output: &Output) -> Value {
    match serde_json::from_slice::<Value>(&output.stdout) {
        Ok(value) => value,
        Err(err) => panic!(
            "failed to parse stdout as JSON: {err}\nstdout={}\nstderr={}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ),
    }
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "command failed\nstdout={}\nstderr={}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn help_lists_expected_subcommands() {
    let output = payroll_output(&["--help"]);
    assert_success(&output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    for required in ["report", "ruleset"] {
        assert!(
            stdout.contains(required),
            "expected help output to contain subcommand {required}; output={stdout}"
        );
    }
}

#[test]
fn report_writes_flat_table_and_workbook() {
    let dir = temp_dir();
    let (output, out_dir) = run_report(
        dir.path(),
        &audit_csv(&[
            "Alice,v1,TRUE,TRUE,2025-12-01",
            "Alice,v1,TRUE,FALSE,2025-12-01",
            "Alice,v2,FALSE,FALSE,2025-12-20",
            "Bob,v3,TRUE,FALSE,2025-12-31",
            "Carol,v4,FALSE,FALSE,2025-12-15",
        ]),
        &[],
    );
    assert_success(&output);

    let lines = read_lines(&out_dir.join("combined_auditor_performance.csv"));
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[1], "1,Alice,2,2,1,1,50%,3,6,5,1,5,Alice Rahman,01712345678,bKash");
    assert_eq!(lines[2], "2,Bob,1,1,1,,0%,3,3,2,1,3,Bob Karim,01898765432,Nagad");
    assert_eq!(lines[3], "3,Carol,1,,,,0%,3,3,2,1,3,,,");
    assert_eq!(lines[4], ",GRAND TOTAL,4,3,2,1,33%,,12,9,2,11,,,");

    let formulas = workbook_formulas(&out_dir.join("GP_GLM_Auditor_s_Salary_December_2025.xlsx"));
    assert_eq!(formula_at(&formulas, 4, 11), "J5+K5");
    assert_eq!(formula_at(&formulas, 6, 6), "IF(D7>0,F7/D7,0)");
    assert_eq!(formula_at(&formulas, 7, 2), "SUM(C5:C7)");
    assert_eq!(formula_at(&formulas, 7, 11), "SUM(L5:L7)");
    assert_eq!(formula_at(&formulas, 7, 6), "IF(D8>0,F8/D8,0)");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("auditors=3"));
    assert!(stdout.contains("actual_payable=11"));
}

#[test]
fn flat_table_is_byte_identical_across_runs() {
    let body = audit_csv(&[
        "Bob,v9,TRUE,TRUE,",
        "Alice,v1,TRUE,FALSE,",
        "Alice,v2,TRUE,TRUE,",
    ]);

    let first_dir = temp_dir();
    let (first, first_out) = run_report(first_dir.path(), &body, &[]);
    assert_success(&first);
    let second_dir = temp_dir();
    let (second, second_out) = run_report(second_dir.path(), &body, &[]);
    assert_success(&second);

    let read = |path: PathBuf| match fs::read(&path) {
        Ok(value) => value,
        Err(err) => panic!("failed to read {}: {err}", path.display()),
    };
    assert_eq!(
        read(first_out.join("combined_auditor_performance.csv")),
        read(second_out.join("combined_auditor_performance.csv"))
    );
    assert!(first_out.join("GP_GLM_Auditor_s_Salary.xlsx").exists());
}

#[test]
fn nobody_reaudited_renders_zero_percent_total() {
    let dir = temp_dir();
    let (output, out_dir) = run_report(
        dir.path(),
        &audit_csv(&["Alice,v1,FALSE,FALSE,", "Bob,v2,FALSE,TRUE,"]),
        &[],
    );
    assert_success(&output);

    let lines = read_lines(&out_dir.join("combined_auditor_performance.csv"));
    let total = lines.last().map(String::as_str).unwrap_or_default();
    assert_eq!(total, ",GRAND TOTAL,2,,,,0%,,6,5,2,6,,,");
}

#[test]
fn missing_column_fails_with_stage_and_writes_nothing() {
    let dir = temp_dir();
    let (output, out_dir) = run_report(
        dir.path(),
        "assigned_to,visit_id,re_audited\nAlice,v1,TRUE\n",
        &[],
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("error: normalize stage failed: schema error"),
        "stderr={stderr}"
    );
    assert!(stderr.contains("mismatch_found_in_reaudit"), "stderr={stderr}");
    assert!(!out_dir.exists());
}

#[test]
fn malformed_records_can_be_excluded() {
    let dir = temp_dir();
    let body = audit_csv(&["Alice,v1,TRUE,FALSE,", "Bob,v2,maybe,FALSE,"]);

    let (aborted, _) = run_report(dir.path(), &body, &[]);
    assert!(!aborted.status.success());
    assert!(String::from_utf8_lossy(&aborted.stderr).contains("row 2"));

    let (output, out_dir) = run_report(
        dir.path(),
        &body,
        &["--on-malformed", "exclude", "--json"],
    );
    assert_success(&output);
    let payload = stdout_json(&output);
    assert_eq!(payload["auditors"], serde_json::json!(1));
    assert_eq!(payload["excluded_rows"], serde_json::json!([2]));

    let lines = read_lines(&out_dir.join("combined_auditor_performance.csv"));
    assert_eq!(lines.len(), 3);
}

#[test]
fn join_key_normalization_is_opt_in() {
    let dir = temp_dir();
    let body = audit_csv(&["alice ,v1,FALSE,FALSE,"]);

    let (exact, out_dir) = run_report(dir.path(), &body, &[]);
    assert_success(&exact);
    let lines = read_lines(&out_dir.join("combined_auditor_performance.csv"));
    assert!(lines[1].ends_with(",,,"), "line={}", lines[1]);

    let (folded, out_dir) = run_report(dir.path(), &body, &["--join-key", "case-insensitive"]);
    assert_success(&folded);
    let lines = read_lines(&out_dir.join("combined_auditor_performance.csv"));
    assert!(
        lines[1].ends_with("Alice Rahman,01712345678,bKash"),
        "line={}",
        lines[1]
    );
}

#[test]
fn unit_price_and_ruleset_file_drive_payments() {
    let dir = temp_dir();
    let ruleset = write_fixture(
        dir.path(),
        "ruleset.json",
        r#"{"ruleset_version":2,"unit_price":10,"fixed_share":0.5,"variable_share":0.5}"#,
    );
    let ruleset_arg = ruleset.display().to_string();
    let body = audit_csv(&["Alice,v1,TRUE,TRUE,", "Alice,v2,TRUE,FALSE,"]);

    let (output, out_dir) = run_report(dir.path(), &body, &["--ruleset", &ruleset_arg]);
    assert_success(&output);
    let lines = read_lines(&out_dir.join("combined_auditor_performance.csv"));
    assert!(lines[0].contains("Fixed (50%),Variable (50%)"));
    assert_eq!(lines[1], "1,Alice,2,2,1,1,50%,10,20,10,5,15,Alice Rahman,01712345678,bKash");

    let (output, out_dir) = run_report(
        dir.path(),
        &body,
        &["--ruleset", &ruleset_arg, "--unit-price", "2.5"],
    );
    assert_success(&output);
    let lines = read_lines(&out_dir.join("combined_auditor_performance.csv"));
    assert!(lines[1].starts_with("1,Alice,2,2,1,1,50%,2.5,5,3,1,4,"), "line={}", lines[1]);

    let (rejected, _) = run_report(dir.path(), &body, &["--unit-price", "-1"]);
    assert!(!rejected.status.success());
    assert!(String::from_utf8_lossy(&rejected.stderr).contains("unit_price"));
}

#[test]
fn ruleset_show_prints_effective_defaults() {
    let output = payroll_output(&["ruleset", "show"]);
    assert_success(&output);
    let payload = stdout_json(&output);
    assert_eq!(
        payload,
        serde_json::json!({
            "ruleset_version": 1,
            "unit_price": 3.0,
            "fixed_share": 0.75,
            "variable_share": 0.25
        })
    );
}

fn audit_workbook(path: &Path) {
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let worksheet = workbook.add_worksheet();
    let rows: [[&str; 4]; 3] = [
        ["assigned_to", "visit_id", "re_audited", "mismatch_found_in_reaudit"],
        ["Alice", "", "", ""],
        ["Bob", "", "", ""],
    ];
    let written = (0_u32..).zip(rows).try_for_each(|(row, cells)| {
        worksheet.write_string(row, 0, cells[0])?;
        if row == 0 {
            for (col, header) in (1_u16..).zip(&cells[1..]) {
                worksheet.write_string(row, col, *header)?;
            }
        } else {
            worksheet.write_number(row, 1, f64::from(row) + 1000.0)?;
            worksheet.write_boolean(row, 2, true)?;
            worksheet.write_boolean(row, 3, row == 2)?;
        }
        Ok::<(), rust_xlsxwriter::XlsxError>(())
    });
    if let Err(err) = written.and_then(|()| workbook.save(path)) {
        panic!("failed to write workbook fixture {}: {err}", path.display());
    }
}

#[test]
fn xlsx_audit_input_is_accepted() {
    let dir = temp_dir();
    let audit = dir.path().join("audit.xlsx");
    audit_workbook(&audit);

    let (output, out_dir) = run_report_with(dir.path(), &audit, &["--json"]);
    assert_success(&output);
    let payload = stdout_json(&output);
    assert_eq!(payload["auditors"], serde_json::json!(2));
    assert_eq!(payload["totals"]["mismatch_percent"], serde_json::json!("50%"));

    let lines = read_lines(&out_dir.join("combined_auditor_performance.csv"));
    assert_eq!(lines[1], "1,Alice,1,1,1,,0%,3,3,2,1,3,Alice Rahman,01712345678,bKash");
    assert_eq!(lines[2], "2,Bob,1,1,,1,100%,3,3,2,,2,Bob Karim,01898765432,Nagad");
}
