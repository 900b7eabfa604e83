// CLI conformance tests for mroc.
//
// Each case writes a source file, runs the built binary on it, and checks
// the exit status and output streams.
//
// Scope:
// - Accepted programs exit 0 and print the requested --emit view
// - Rejected programs exit 1 with rendered diagnostics on stderr
// - Unreadable inputs exit 2

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicUsize, Ordering};

fn mroc_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mroc"))
}

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn temp_path(prefix: &str, ext: &str) -> PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("{}_{}_{}.{}", prefix, std::process::id(), n, ext))
}

fn run_mroc(source: &Path, args: &[&str]) -> Output {
    Command::new(mroc_binary())
        .arg(source)
        .args(args)
        .output()
        .expect("failed to execute mroc")
}

fn run_mroc_inline(mro_source: &str, args: &[&str]) -> Output {
    let mro_file = temp_path("mroc_cli_case", "mro");
    std::fs::write(&mro_file, mro_source).expect("failed to write temporary mro source");
    let out = run_mroc(&mro_file, args);
    let _ = std::fs::remove_file(&mro_file);
    out
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

fn assert_accepted(case_name: &str, src: &str) {
    let out = run_mroc_inline(src, &[]);
    assert!(
        out.status.success(),
        "{case_name}: expected compile success, but failed.\nstderr:\n{}",
        stderr(&out),
    );
}

fn assert_rejected(case_name: &str, src: &str, kind: &str) {
    let out = run_mroc_inline(src, &[]);
    assert_eq!(
        out.status.code(),
        Some(1),
        "{case_name}: expected compile rejection.\nstderr:\n{}",
        stderr(&out),
    );
    assert!(
        stderr(&out).contains(&format!("MRO {kind}:")),
        "{case_name}: expected a {kind}, got:\n{}",
        stderr(&out),
    );
}

macro_rules! accept {
    ($test_name:ident, $src:expr) => {
        #[test]
        fn $test_name() {
            assert_accepted(stringify!($test_name), $src);
        }
    };
}

macro_rules! reject {
    ($test_name:ident, $kind:literal, $src:expr) => {
        #[test]
        fn $test_name() {
            assert_rejected(stringify!($test_name), $src, $kind);
        }
    };
}

const STAGES: &str = concat!(
    "filetype txt;\n",
    "stage SPLIT_READS(in txt reads, in int chunks, out txt[] parts, src py \"s\")\n",
    "stage ALIGN(in txt part, in string ref, out txt bam, src py \"a\")\n",
    "stage MERGE(in txt[] bams, out txt merged, src py \"m\")\n",
);

// ── Accepted programs ──────────────────────────────────────────────────

accept!(
    comments_and_trailing_commas,
    concat!(
        "# leading comment\n",
        "filetype txt;\n",
        "stage S(\n    in  int a,   # trailing comment\n    out txt f,\n    src py \"s\",\n)\n",
        "call S(a = 1,)\n",
    )
);

accept!(
    fan_out_and_gather,
    &format!(
        "{STAGES}{}",
        concat!(
            "pipeline ALIGNER(in txt reads, in string ref, out txt merged)\n{\n",
            "    call MERGE(bams = ALIGN.bam)\n",
            "    call ALIGN(part = split SPLIT_READS.parts, ref = self.ref)\n",
            "    call SPLIT_READS(reads = self.reads, chunks = 4)\n",
            "    return (merged = MERGE.merged)\n}\n",
            "call ALIGNER(reads = \"r.txt\", ref = \"hg19\")\n",
        )
    )
);

accept!(
    disabled_call_output_bound_downstream,
    &format!(
        "{STAGES}{}",
        concat!(
            "pipeline P(in txt reads, in bool skip, out txt[] parts)\n{\n",
            "    call SPLIT_READS(reads = self.reads, chunks = 2) using (disabled = self.skip)\n",
            "    return (parts = SPLIT_READS.parts)\n}\n",
        )
    )
);

// ── Rejected programs ──────────────────────────────────────────────────

reject!(syntax_error, "ParseError", "stage S(in int a src py \"s\")\n");

reject!(
    unknown_type,
    "TypeError",
    "stage S(in bam a, src py \"s\")\n"
);

reject!(
    wrong_binding_type,
    "TypeMismatchError",
    &format!("{STAGES}call MERGE(bams = 3)\n")
);

reject!(
    missing_binding,
    "ArgumentNotSuppliedError",
    &format!("{STAGES}call SPLIT_READS(reads = \"r.txt\")\n")
);

reject!(
    cyclic_calls,
    "CyclicDependencyError",
    &format!(
        "{STAGES}{}",
        concat!(
            "pipeline P(out txt f)\n{\n",
            "    call ALIGN(part = MERGE.merged, ref = \"x\")\n",
            "    call MERGE(bams = [ALIGN.bam])\n",
            "    return (f = MERGE.merged)\n}\n",
        )
    )
);

// ── Emission ───────────────────────────────────────────────────────────

const ALIGNER: &str = concat!(
    "pipeline ALIGNER(in txt reads, in string ref, out txt merged)\n{\n",
    "    call MERGE(bams = ALIGN.bam)\n",
    "    call ALIGN(part = split SPLIT_READS.parts, ref = self.ref)\n",
    "    call SPLIT_READS(reads = self.reads, chunks = 4)\n",
    "    return (merged = MERGE.merged)\n}\n",
    "call ALIGNER(reads = \"r.txt\", ref = \"hg19\")\n",
);

#[test]
fn emit_order_prints_sorted_calls() {
    let out = run_mroc_inline(&format!("{STAGES}{ALIGNER}"), &["--emit", "order"]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(
        stdout(&out),
        concat!(
            "pipeline ALIGNER:\n",
            "  SPLIT_READS [simple]\n",
            "  ALIGN [array] over SPLIT_READS.parts <- SPLIT_READS\n",
            "  MERGE [simple] <- ALIGN\n",
            "call ALIGNER\n",
        )
    );
}

#[test]
fn emit_json_is_valid_and_reproducible() {
    let mro_file = temp_path("mroc_cli_json", "mro");
    std::fs::write(&mro_file, format!("{STAGES}{ALIGNER}")).unwrap();
    let first = run_mroc(&mro_file, &["--emit", "json"]);
    let second = run_mroc(&mro_file, &["--emit", "json"]);
    let _ = std::fs::remove_file(&mro_file);

    assert!(first.status.success(), "{}", stderr(&first));
    assert_eq!(first.stdout, second.stdout, "json output is not deterministic");
    let doc: serde_json::Value = serde_json::from_slice(&first.stdout).unwrap();
    let calls = doc["pipelines"][0]["calls"].as_array().unwrap();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[1]["mode"], "array");
    assert_eq!(doc["sources"][0]["sha256"].as_str().unwrap().len(), 64);
}

#[test]
fn emit_types_lists_declared_types() {
    let out = run_mroc_inline(STAGES, &["--emit", "types"]);
    assert!(out.status.success(), "{}", stderr(&out));
    let text = stdout(&out);
    assert!(text.lines().any(|l| l.starts_with("txt ") && l.ends_with("file")), "{text}");
    assert!(text.lines().any(|l| l.starts_with("ALIGN ") && l.ends_with("directory")), "{text}");
}

// ── Options and exit codes ─────────────────────────────────────────────

#[test]
fn missing_source_exits_with_two() {
    let out = run_mroc(Path::new("/nonexistent/mroc/input.mro"), &[]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).starts_with("cannot read /nonexistent/mroc/input.mro"));
}

#[test]
fn verbose_reports_each_pass() {
    let out = run_mroc_inline(STAGES, &["--verbose"]);
    assert!(out.status.success(), "{}", stderr(&out));
    let err = stderr(&out);
    for pass in ["index_callables", "compile_calls", "specialize", "freeze"] {
        assert!(
            err.contains(&format!("mroc: {pass} complete, ")),
            "missing {pass} in:\n{err}"
        );
    }
}

#[test]
fn enforcement_turns_warnings_into_errors() {
    let src = "stage S(in int a, out file x \"help\" \"con\", src py \"s\")\n";
    let relaxed = run_mroc_inline(src, &["--enforcement", "log"]);
    assert!(relaxed.status.success(), "{}", stderr(&relaxed));
    assert!(stderr(&relaxed).contains("MRO OutName:"), "{}", stderr(&relaxed));

    let strict = run_mroc_inline(src, &["--enforcement", "error"]);
    assert_eq!(strict.status.code(), Some(1));

    let off = run_mroc_inline(src, &[]);
    assert!(off.status.success());
    assert!(stderr(&off).is_empty(), "{}", stderr(&off));
}

#[test]
fn argument_files_are_checked() {
    let src = format!("{STAGES}{ALIGNER}");
    let good = temp_path("mroc_cli_args", "json");
    std::fs::write(&good, r#"{"reads": "r.txt", "ref": "hg19"}"#).unwrap();
    let bad = temp_path("mroc_cli_args", "json");
    std::fs::write(&bad, r#"{"reads": 7}"#).unwrap();

    let ok = run_mroc_inline(&src, &["--args", good.to_str().unwrap()]);
    let rejected = run_mroc_inline(&src, &["--args", bad.to_str().unwrap()]);
    let _ = std::fs::remove_file(&good);
    let _ = std::fs::remove_file(&bad);

    assert!(ok.status.success(), "{}", stderr(&ok));
    assert_eq!(rejected.status.code(), Some(1));
    let err = stderr(&rejected);
    assert!(err.contains("MRO TypeMismatchError: argument 'reads'"), "{err}");
    assert!(err.contains("MRO ArgumentNotSuppliedError: argument 'ref' was not supplied"), "{err}");
}

#[test]
fn includes_resolve_relative_to_the_including_file() {
    let dir = std::env::temp_dir().join(format!("mroc_cli_include_{}", std::process::id()));
    std::fs::create_dir_all(dir.join("lib")).unwrap();
    std::fs::write(dir.join("lib/stages.mro"), STAGES).unwrap();
    std::fs::write(
        dir.join("main.mro"),
        format!("@include \"lib/stages.mro\"\n{ALIGNER}"),
    )
    .unwrap();
    let out = run_mroc(&dir.join("main.mro"), &["--emit", "json"]);
    let _ = std::fs::remove_dir_all(&dir);

    assert!(out.status.success(), "{}", stderr(&out));
    let doc: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(doc["sources"].as_array().unwrap().len(), 2);
}
