use criterion::{criterion_group, criterion_main, Criterion};
use petqol_core::{summarize, Measurement, MeasurementId, PetId, QualityScores, SCORE_STEP};
use time::macros::{date, datetime};
use time::Duration;

fn mk_measurement(pet_id: PetId, index: usize) -> Measurement {
    let offset = i64::try_from(index).unwrap_or(i64::MAX);
    let step = |shift: usize| f64::from(u8::try_from((index + shift) % 5).unwrap_or(0)) * SCORE_STEP;
    Measurement {
        measurement_id: MeasurementId::new(),
        pet_id,
        date: date!(2024 - 01 - 01) + Duration::days(offset),
        scores: QualityScores {
            pain: step(0),
            hunger: step(1),
            hydration: step(2),
            hygiene: step(3),
            happiness: step(4),
            mobility: step(0),
        },
        custom_value: None,
        notes: "benchmark fixture".to_string(),
        images: Vec::new(),
        created_at: datetime!(2024-01-01 08:00 UTC) + Duration::days(offset),
        updated_at: datetime!(2024-01-01 08:00 UTC) + Duration::days(offset),
    }
}

fn bench_summary(c: &mut Criterion) {
    let pet_id = PetId::new();
    let year = (0..365).map(|index| mk_measurement(pet_id, index)).collect::<Vec<_>>();
    let decade = (0..3650).map(|index| mk_measurement(pet_id, index)).collect::<Vec<_>>();

    c.bench_function("summarize_one_year", |b| b.iter(|| summarize(&year)));
    c.bench_function("summarize_ten_years", |b| b.iter(|| summarize(&decade)));
}

criterion_group!(benches, bench_summary);
criterion_main!(benches);
