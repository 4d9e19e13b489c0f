use criterion::{
    BenchmarkId, Criterion, black_box, criterion_group, criterion_main,
};
use meteor::{Allocation, Format, Mesh, Settings};

fn torus(settings: Settings, step: f64) -> Mesh {
    let mut mesh = Mesh::with_settings(Format::COORDS, settings);
    mesh.set_field(|x, y, z| {
        let r = (x * x + y * y).sqrt();
        (0.6 - r).powi(2) + z * z - 0.09
    });
    mesh.set_size(-1.0, 1.0, -1.0, 1.0, -0.5, 0.5, step).unwrap();
    while mesh.build().unwrap() > 0 {}
    mesh
}

pub fn build_step_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("build vs step (torus)");
    for step in [0.1, 0.05, 0.025] {
        for (name, allocation) in [
            ("free-list", Allocation::FreeList),
            ("collected", Allocation::Collected),
        ] {
            let settings = Settings {
                allocation,
                ..Settings::default()
            };
            group.bench_function(BenchmarkId::new(name, step), move |b| {
                b.iter(|| black_box(torus(settings, step)))
            });
        }
    }
}

pub fn simplify(c: &mut Criterion) {
    let base = torus(Settings::default(), 0.025);
    let target = base.triangle_count() / 10;

    let mut group = c.benchmark_group("simplify (torus, 10%)");
    group.sample_size(10);
    group.bench_function("merge", |b| {
        b.iter(|| {
            let mut mesh = torus(Settings::default(), 0.025);
            while mesh.triangle_count() > target && mesh.merge() > 0 {}
            black_box(mesh)
        })
    });
    group.bench_function("merge while building", |b| {
        b.iter(|| {
            let mut mesh = Mesh::new(Format::COORDS);
            mesh.set_field(|x, y, z| {
                let r = (x * x + y * y).sqrt();
                (0.6 - r).powi(2) + z * z - 0.09
            });
            mesh.set_size(-1.0, 1.0, -1.0, 1.0, -0.5, 0.5, 0.025).unwrap();
            while mesh.build().unwrap() > 0 {
                while mesh.mergeable_triangle_count() > target
                    && mesh.merge() > 0
                {}
            }
            black_box(mesh)
        })
    });
    group.bench_function("aggregate", |b| {
        b.iter(|| {
            let mut mesh = torus(Settings::default(), 0.025);
            let target = mesh.point_count() / 10;
            while mesh.point_count() > target && mesh.aggregate().unwrap() > 0 {}
            black_box(mesh)
        })
    });
}

criterion_group!(benches, build_step_sweep, simplify);
criterion_main!(benches);
