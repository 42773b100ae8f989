//! Chunker benchmarks: prose sliding-window vs. code boundary scanning.

#![allow(missing_docs)]

use criterion::{Criterion, criterion_group, criterion_main};
use graphloom::text::{CodeChunker, Tokenizer};
use std::hint::black_box;

fn prose_input() -> String {
    let sentence = "The quick brown fox jumps over the lazy dog near the river bank. ";
    sentence.repeat(500)
}

fn code_input() -> String {
    let mut source = String::from("import os\nimport sys\n\n");
    for i in 0..200 {
        source.push_str(&format!(
            "def handler_{i}(event):\n    value = transform(event, {i});\n    return value\n\n"
        ));
    }
    source
}

fn bench_prose_chunking(c: &mut Criterion) {
    let tokenizer = Tokenizer::default();
    let input = prose_input();
    c.bench_function("prose_chunk_1200_100", |b| {
        b.iter(|| tokenizer.chunk(black_box(&input), 1200, 100));
    });
}

fn bench_code_chunking(c: &mut Criterion) {
    let chunker = CodeChunker::new(1200, 100, 4);
    let input = code_input();
    c.bench_function("code_chunk_1200_100", |b| {
        b.iter(|| chunker.chunk(black_box(&input)));
    });
}

fn bench_token_counting(c: &mut Criterion) {
    let tokenizer = Tokenizer::default();
    let input = prose_input();
    c.bench_function("count_tokens_32k_chars", |b| {
        b.iter(|| tokenizer.count_tokens(black_box(&input)));
    });
}

criterion_group!(
    benches,
    bench_prose_chunking,
    bench_code_chunking,
    bench_token_counting
);
criterion_main!(benches);
