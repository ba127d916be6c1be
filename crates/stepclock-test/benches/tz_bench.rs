//! Benchmarks for time zone rules and minute arithmetic

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use chrono::{DateTime, NaiveDate, Utc};

use stepclock_core::MinuteOfDay;
use stepclock_time::{TimeZoneRule, ZonePreset};

fn bench_rule_parse(c: &mut Criterion) {
    c.bench_function("rule_parse_cet", |b| {
        b.iter(|| TimeZoneRule::parse(black_box("CET-1CEST,M3.5.0,M10.5.0/3")))
    });

    c.bench_function("rule_parse_quoted_julian", |b| {
        b.iter(|| TimeZoneRule::parse(black_box("<+0330>-3:30<+0430>,J79/24,J263/24")))
    });
}

fn bench_to_local(c: &mut Criterion) {
    let rule = ZonePreset::EuropeCentral.rule().unwrap();
    let mut utc = DateTime::<Utc>::from_timestamp(1_767_225_600, 0).unwrap();
    let step = chrono::Duration::minutes(97);

    c.bench_function("rule_to_local", |b| {
        b.iter(|| {
            utc += step;
            black_box(rule.to_local(black_box(utc)))
        })
    });
}

fn bench_from_local(c: &mut Criterion) {
    let rule = ZonePreset::UsEastern.rule().unwrap();
    // Inside the autumn overlap
    let local = NaiveDate::from_ymd_opt(2026, 11, 1)
        .and_then(|d| d.and_hms_opt(1, 30, 0))
        .unwrap();

    c.bench_function("rule_from_local_ambiguous", |b| {
        b.iter(|| black_box(rule.from_local(black_box(local))))
    });
}

fn bench_forward_distance(c: &mut Criterion) {
    c.bench_function("minute_forward_distance", |b| {
        let mut i = 0i64;
        b.iter(|| {
            i += 1;
            let from = MinuteOfDay::wrapping(i * 7);
            let to = MinuteOfDay::wrapping(i * 13);
            black_box(from.forward_distance_to(to))
        })
    });
}

criterion_group!(
    benches,
    bench_rule_parse,
    bench_to_local,
    bench_from_local,
    bench_forward_distance,
);

criterion_main!(benches);
