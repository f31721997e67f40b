use criterion::{black_box, criterion_group, criterion_main, Criterion};
use whelk_shell::parser::{NativeParser, PosixParser};

const NATIVE_SOURCE: &str =
    "for i in 1 2 3 4 5 { if (test $i -gt 3) { break }; echo $i | tr a-z A-Z > /dev/null }";

const POSIX_SOURCE: &str =
    "while test $i -lt 5; do FOO=${FOO:-x} echo $((i * 2)) | sort; i=$((i+1)); done";

fn native_parse(c: &mut Criterion) {
    c.bench_function("native_parse", |b| {
        b.iter(|| NativeParser::new(black_box(NATIVE_SOURCE)).parse())
    });
}

fn posix_parse(c: &mut Criterion) {
    c.bench_function("posix_parse", |b| {
        b.iter(|| PosixParser::new(black_box(POSIX_SOURCE)).parse())
    });
}

criterion_group!(benches, native_parse, posix_parse);
criterion_main!(benches);
