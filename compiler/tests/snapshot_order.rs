// Snapshot tests: lock the call order view to detect unintended changes in
// sorting or fan-out analysis.
//
// Uses the library API (compile_source → emit_order). Snapshots are managed
// by `insta` and stored under `compiler/tests/snapshots/`.
//
// Run `cargo insta review` after intentional output changes to update baselines.

use mroc::config::CompileOptions;
use mroc::driver::{compile_source, CompiledProgram};
use mroc::emit::emit_order;

const STAGES: &str = concat!(
    "filetype txt;\n",
    "stage SPLIT_READS(in txt reads, in int chunks, out txt[] parts, src py \"s\")\n",
    "stage ALIGN(in txt part, in string ref, out txt bam, src py \"a\")\n",
    "stage MERGE(in txt[] bams, out txt merged, src py \"m\")\n",
    "stage MAKE(in int n, out txt f, src py \"mk\")\n",
    "stage USE(in txt f, out txt g, src py \"u\")\n",
);

fn compile(body: &str) -> CompiledProgram {
    let src = format!("{STAGES}{body}");
    compile_source(&src, &CompileOptions::default())
        .unwrap_or_else(|e| panic!("compile failed:\n{e}"))
}

#[test]
fn aligner_order() {
    let program = compile(concat!(
        "pipeline ALIGNER(in txt reads, in string ref, out txt merged)\n{\n",
        "    call MERGE(bams = ALIGN.bam)\n",
        "    call ALIGN(part = split SPLIT_READS.parts, ref = self.ref)\n",
        "    call SPLIT_READS(reads = self.reads, chunks = 4)\n",
        "    return (merged = MERGE.merged)\n}\n",
        "call ALIGNER(reads = \"r.txt\", ref = \"hg19\")\n",
    ));
    insta::assert_snapshot!(emit_order(&program));
}

#[test]
fn mapped_input_order() {
    let program = compile(concat!(
        "pipeline P(in int[] ns, out txt[] gs)\n{\n",
        "    call USE(f = split MAKE.f)\n",
        "    map call MAKE(n = split self.ns)\n",
        "    return (gs = USE.g)\n}\n",
        "call P(ns = [1, 2])\n",
    ));
    insta::assert_snapshot!(emit_order(&program));
}
