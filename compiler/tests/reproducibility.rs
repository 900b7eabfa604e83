// Reproducibility tests.
//
// These tests verify that the compiler produces byte-identical outputs for
// identical inputs, and that the recorded source hashes track content.

use mroc::config::CompileOptions;
use mroc::driver::{compile_source, compute_provenance};
use mroc::emit::{emit_json, emit_order};
use mroc::include::SourceText;

const SRC: &str = concat!(
    "filetype txt;\n",
    "stage A(in int n, out txt f, src py \"a\")\n",
    "stage B(in txt f, out txt g, src py \"b\")\n",
    "stage C(in txt[] gs, out txt h, src py \"c\")\n",
    "pipeline P(in int[] ns, out txt h)\n{\n",
    "    call C(gs = B.g)\n",
    "    call B(f = split A.f)\n",
    "    map call A(n = split self.ns)\n",
    "    return (h = C.h)\n}\n",
    "call P(ns = [1, 2, 3])\n",
);

#[test]
fn json_is_byte_identical_across_compiles() {
    let opts = CompileOptions::default();
    let first = emit_json(&compile_source(SRC, &opts).unwrap());
    let second = emit_json(&compile_source(SRC, &opts).unwrap());
    assert_eq!(first, second, "json output differs between runs");
}

#[test]
fn order_does_not_depend_on_verbosity() {
    let quiet = compile_source(SRC, &CompileOptions::default()).unwrap();
    let verbose = compile_source(
        SRC,
        &CompileOptions {
            verbose: true,
            ..CompileOptions::default()
        },
    )
    .unwrap();
    assert_eq!(emit_order(&quiet), emit_order(&verbose));
}

#[test]
fn program_hash_tracks_source_content() {
    let text = |s: &str| SourceText {
        path: "main.mro".to_string(),
        text: s.to_string(),
    };
    let a = compute_provenance(&[text(SRC)]);
    let b = compute_provenance(&[text(SRC)]);
    let c = compute_provenance(&[text(&format!("{SRC}# trailing comment\n"))]);
    assert_eq!(a.program_hash, b.program_hash);
    assert_ne!(a.program_hash, c.program_hash);
    assert_eq!(a.program_hash_hex().len(), 64);
}
